mod capture;

pub use capture::{has_pixels, Camera, CameraError, CaptureApi, FrameSource, UsbCamera};
