use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use opencv::core::{Mat, Point, Scalar, Vector};
use opencv::imgcodecs;
use opencv::imgproc;
use opencv::prelude::*;
use thiserror::Error;

use crate::detection::DetectionEvent;
use crate::dispatch::ActionDecision;

const OUTLINE_THICKNESS: i32 = 3;
const LABEL_SCALE: f64 = 0.5;
const LABEL_THICKNESS: i32 = 2;
const LABEL_OFFSET: i32 = 10;

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("opencv error: {0}")]
    OpenCv(#[from] opencv::Error),
    #[error("image encoder refused to write {0}")]
    NotWritten(PathBuf),
    #[error("artifact writer failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

/// Writes one annotated image per accepted detection.
#[derive(Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    pub fn create<P: AsRef<Path>>(dir: P) -> Result<Self, ArtifactError> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(
        &self,
        payload: &str,
        action: ActionDecision,
        at: DateTime<Local>,
    ) -> PathBuf {
        self.dir.join(format!(
            "{}_{}_{}.jpg",
            sanitize(payload),
            action,
            at.format("%Y%m%d_%H%M%S")
        ))
    }

    /// Saves a copy of `frame` with every detected code outlined and labelled.
    pub fn persist(
        &self,
        frame: &Mat,
        events: &[DetectionEvent],
        payload: &str,
        action: ActionDecision,
        at: DateTime<Local>,
    ) -> Result<PathBuf, ArtifactError> {
        let mut annotated = frame.try_clone()?;
        annotate(&mut annotated, events)?;

        let path = self.path_for(payload, action, at);
        let written = imgcodecs::imwrite(
            &path.to_string_lossy(),
            &annotated,
            &Vector::<i32>::new(),
        )?;
        if !written {
            return Err(ArtifactError::NotWritten(path));
        }
        Ok(path)
    }
}

fn annotate(frame: &mut Mat, events: &[DetectionEvent]) -> opencv::Result<()> {
    let green = Scalar::new(0.0, 255.0, 0.0, 0.0);

    for event in events {
        let corners: Vec<Point> = event
            .polygon
            .iter()
            .map(|p| Point::new(p.x.round() as i32, p.y.round() as i32))
            .collect();

        for (i, start) in corners.iter().enumerate() {
            let end = corners[(i + 1) % corners.len()];
            imgproc::line(
                frame,
                *start,
                end,
                green,
                OUTLINE_THICKNESS,
                imgproc::LINE_8,
                0,
            )?;
        }

        let origin = Point::new(event.bounds.x, (event.bounds.y - LABEL_OFFSET).max(0));
        imgproc::put_text(
            frame,
            &format!("QR: {}", event.payload),
            origin,
            imgproc::FONT_HERSHEY_SIMPLEX,
            LABEL_SCALE,
            green,
            LABEL_THICKNESS,
            imgproc::LINE_8,
            false,
        )?;
    }
    Ok(())
}

/// Keeps payloads usable as file name components.
fn sanitize(payload: &str) -> String {
    payload
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}
