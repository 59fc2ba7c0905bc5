mod cooldown;
mod decoder;
mod geometry;
mod pipeline;

pub use cooldown::CooldownRegistry;
pub use decoder::{Decoder, DetectionEvent, QrDecoder};
pub use pipeline::{DetectionLoop, LoopSettings};
