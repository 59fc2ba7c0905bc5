use std::fmt;

use opencv::core::Mat;
use opencv::prelude::*;
use opencv::videoio::{self, VideoCapture};
use thiserror::Error;

use crate::config::CameraConfig;

#[derive(Debug, Error)]
pub enum CameraError {
    #[error("opencv error: {0}")]
    OpenCv(#[from] opencv::Error),
    #[error("camera {index} could not be opened with {api}")]
    NotOpened { index: i32, api: CaptureApi },
    #[error("no capture backend could open camera {0}")]
    NoBackend(i32),
    #[error("camera could not be reopened: {0}")]
    ReopenFailed(Box<CameraError>),
    #[error("camera still failing after {0} reconnect attempts")]
    ReconnectLimit(u32),
    #[error("capture session already consumed")]
    Closed,
    #[error("capture worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

/// OpenCV capture API used to open the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CaptureApi {
    DirectShow,
    MediaFoundation,
    V4l2,
    Any,
}

impl CaptureApi {
    /// Platform-specific backends first, generic auto-detect last.
    pub fn preferred() -> &'static [CaptureApi] {
        if cfg!(windows) {
            &[
                CaptureApi::DirectShow,
                CaptureApi::MediaFoundation,
                CaptureApi::Any,
            ]
        } else {
            &[CaptureApi::V4l2, CaptureApi::Any]
        }
    }

    pub fn code(self) -> i32 {
        match self {
            CaptureApi::DirectShow => videoio::CAP_DSHOW,
            CaptureApi::MediaFoundation => videoio::CAP_MSMF,
            CaptureApi::V4l2 => videoio::CAP_V4L2,
            CaptureApi::Any => videoio::CAP_ANY,
        }
    }
}

impl fmt::Display for CaptureApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CaptureApi::DirectShow => "DirectShow",
            CaptureApi::MediaFoundation => "Media Foundation",
            CaptureApi::V4l2 => "V4L2",
            CaptureApi::Any => "auto-detect",
        };
        f.write_str(name)
    }
}

/// An open capture device that yields frames.
pub trait FrameSource {
    /// Reads the next frame into `frame`. `Ok(false)` means the device
    /// produced nothing.
    fn read_frame(&mut self, frame: &mut Mat) -> Result<bool, CameraError>;
}

/// Opens capture sessions. Every call builds a fresh session.
pub trait Camera {
    type Session: FrameSource;

    fn open(&self, api: CaptureApi) -> Result<Self::Session, CameraError>;

    /// Device index, for diagnostics.
    fn index(&self) -> i32;

    fn apis(&self) -> Vec<CaptureApi> {
        CaptureApi::preferred().to_vec()
    }
}

pub struct UsbCamera {
    index: i32,
    width: u32,
    height: u32,
}

impl UsbCamera {
    pub fn new(config: &CameraConfig) -> Self {
        Self {
            index: config.index,
            width: config.width,
            height: config.height,
        }
    }
}

impl Camera for UsbCamera {
    type Session = CaptureSession;

    fn open(&self, api: CaptureApi) -> Result<CaptureSession, CameraError> {
        let mut capture = VideoCapture::new(self.index, api.code())?;
        if !capture.is_opened()? {
            return Err(CameraError::NotOpened {
                index: self.index,
                api,
            });
        }

        for (prop, name, value) in [
            (videoio::CAP_PROP_FRAME_WIDTH, "width", self.width),
            (videoio::CAP_PROP_FRAME_HEIGHT, "height", self.height),
        ] {
            let result = capture.set(prop, value as f64);
            property_applied(self.index, api, name, value, result);
        }

        let session = CaptureSession {
            capture,
            index: self.index,
            api,
        };
        session.log_properties();
        Ok(session)
    }

    fn index(&self) -> i32 {
        self.index
    }
}

/// Owns the device handle; dropping it releases the camera.
pub struct CaptureSession {
    capture: VideoCapture,
    index: i32,
    api: CaptureApi,
}

impl CaptureSession {
    fn log_properties(&self) {
        let width = self.capture.get(videoio::CAP_PROP_FRAME_WIDTH).unwrap_or(0.0);
        let height = self.capture.get(videoio::CAP_PROP_FRAME_HEIGHT).unwrap_or(0.0);
        let fps = self.capture.get(videoio::CAP_PROP_FPS).unwrap_or(0.0);
        tracing::info!(
            camera = self.index,
            backend = %self.api,
            resolution = format!("{}x{}", width as i32, height as i32),
            fps = fps as i32,
            "capture session opened"
        );
    }
}

impl FrameSource for CaptureSession {
    fn read_frame(&mut self, frame: &mut Mat) -> Result<bool, CameraError> {
        Ok(self.capture.read(frame)?)
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        if let Err(e) = self.capture.release() {
            tracing::warn!(camera = self.index, error = %e, "failed to release camera");
        } else {
            tracing::debug!(camera = self.index, "camera released");
        }
    }
}

/// Logs a capture property the driver refused. Returns whether it was applied.
fn property_applied(
    camera: i32,
    api: CaptureApi,
    name: &str,
    value: u32,
    result: opencv::Result<bool>,
) -> bool {
    match result {
        Ok(true) => true,
        Ok(false) => {
            tracing::warn!(
                camera,
                backend = %api,
                property = name,
                value,
                "camera ignored requested frame size"
            );
            false
        }
        Err(e) => {
            tracing::warn!(
                camera,
                backend = %api,
                property = name,
                error = %e,
                "failed to set frame size"
            );
            false
        }
    }
}

/// True when the frame holds pixel data.
pub fn has_pixels(frame: &Mat) -> bool {
    frame
        .size()
        .map(|size| size.width > 0 && size.height > 0)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use opencv::core::{Scalar, CV_8UC3};

    #[test]
    fn test_generic_backend_is_last_resort() {
        let apis = CaptureApi::preferred();
        assert!(apis.len() >= 2);
        assert_eq!(*apis.last().unwrap(), CaptureApi::Any);
        assert_ne!(apis[0], CaptureApi::Any);
    }

    #[test]
    fn test_refused_frame_size_is_reported() {
        assert!(property_applied(0, CaptureApi::V4l2, "width", 640, Ok(true)));
        assert!(!property_applied(0, CaptureApi::V4l2, "width", 640, Ok(false)));
        let err = opencv::Error::new(opencv::core::StsError, "unsupported property");
        assert!(!property_applied(0, CaptureApi::Any, "height", 480, Err(err)));
    }

    #[test]
    fn test_has_pixels() {
        assert!(!has_pixels(&Mat::default()));
        let frame = Mat::new_rows_cols_with_default(4, 4, CV_8UC3, Scalar::all(0.0)).unwrap();
        assert!(has_pixels(&frame));
    }
}
