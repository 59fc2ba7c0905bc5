use std::time::Instant;

use opencv::core::{Mat, Point2f, Rect, Vector};
use opencv::imgproc;
use opencv::objdetect::QRCodeDetector;
use opencv::prelude::*;

use super::geometry::{bounding_box, normalize_polygon};

/// One code seen in one frame.
#[derive(Debug, Clone)]
pub struct DetectionEvent {
    pub payload: String,
    pub polygon: Vec<Point2f>,
    pub bounds: Rect,
    pub timestamp: Instant,
}

impl DetectionEvent {
    pub fn new(payload: String, outline: Vec<Point2f>, timestamp: Instant) -> opencv::Result<Self> {
        let polygon = normalize_polygon(outline)?;
        let bounds = bounding_box(&polygon)?;
        Ok(Self {
            payload,
            polygon,
            bounds,
            timestamp,
        })
    }
}

pub trait Decoder {
    /// Every code visible in `frame`. A frame without codes, or one the
    /// decoder cannot handle, yields an empty list.
    fn decode(&mut self, frame: &Mat) -> Vec<DetectionEvent>;
}

pub struct QrDecoder {
    detector: QRCodeDetector,
    gray: Mat,
}

impl QrDecoder {
    pub fn new() -> opencv::Result<Self> {
        Ok(Self {
            detector: QRCodeDetector::default()?,
            gray: Mat::default(),
        })
    }

    fn detect(&mut self, frame: &Mat) -> opencv::Result<Vec<DetectionEvent>> {
        imgproc::cvt_color_def(frame, &mut self.gray, imgproc::COLOR_BGR2GRAY)?;

        let mut decoded = Vector::<String>::new();
        let mut points = Mat::default();
        let mut straight = Vector::<Mat>::new();
        let found = self.detector.detect_and_decode_multi(
            &self.gray,
            &mut decoded,
            &mut points,
            &mut straight,
        )?;
        if !found || decoded.is_empty() {
            return Ok(Vec::new());
        }

        let now = Instant::now();
        let corners = points.data_typed::<Point2f>()?;
        let per_code = corners.len() / decoded.len();

        let mut events = Vec::with_capacity(decoded.len());
        for (i, payload) in decoded.iter().enumerate() {
            // Codes that were located but could not be read come back empty.
            if payload.is_empty() {
                continue;
            }
            let outline = corners
                .get(i * per_code..(i + 1) * per_code)
                .map(<[Point2f]>::to_vec)
                .unwrap_or_default();
            events.push(DetectionEvent::new(payload, outline, now)?);
        }
        Ok(events)
    }
}

impl Decoder for QrDecoder {
    fn decode(&mut self, frame: &Mat) -> Vec<DetectionEvent> {
        match self.detect(frame) {
            Ok(events) => events,
            Err(e) => {
                tracing::trace!(error = %e, "qr decode error");
                Vec::new()
            }
        }
    }
}
