use std::{
    fs::File,
    io::{self, BufRead, BufReader},
    path::Path,
};

use frame_link::Frame;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Axis-aligned box in frame pixel coordinates (`x1,y1` top-left, `x2,y2` bottom-right).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Build from the centre/size layout most detector heads emit.
    pub fn from_xywh(cx: f32, cy: f32, w: f32, h: f32) -> Self {
        Self::new(cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0)
    }

    pub fn center(&self) -> (f32, f32) {
        ((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }

    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).abs()
    }

    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).abs()
    }
}

/// Single detection returned by the detector.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub label: String,
    pub confidence: f32,
    pub bbox: BoundingBox,
}

#[derive(Debug, Error)]
pub enum DetectorError {
    #[error("failed to read detections: {0}")]
    Io(#[from] io::Error),
    #[error("invalid detection script at line {line}")]
    Parse {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}

/// Seam for the object detector. The model itself lives outside this repository.
pub trait Detector: Send {
    fn name(&self) -> &str;

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>, DetectorError>;
}

/// Detector that never sees anything; keeps the link and failsafe running without a model.
#[derive(Default)]
pub struct IdleDetector;

impl Detector for IdleDetector {
    fn name(&self) -> &str {
        "idle"
    }

    fn detect(&mut self, _frame: &Frame) -> Result<Vec<Detection>, DetectorError> {
        Ok(Vec::new())
    }
}

/// Replays recorded detections, one JSON array per line and one line per frame.
///
/// Blank lines stand for frames with no detections. The script loops when exhausted,
/// which makes it useful for bench-testing the actuator against a fixed scenario.
pub struct ReplayDetector {
    script: Vec<Vec<Detection>>,
    cursor: usize,
}

impl ReplayDetector {
    pub fn new(script: Vec<Vec<Detection>>) -> Self {
        Self { script, cursor: 0 }
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, DetectorError> {
        let file = File::open(path)?;
        Self::from_reader(BufReader::new(file))
    }

    pub fn from_reader<R: BufRead>(reader: R) -> Result<Self, DetectorError> {
        let mut script = Vec::new();
        for (idx, line) in reader.lines().enumerate() {
            let line = line?;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                script.push(Vec::new());
                continue;
            }
            let detections = serde_json::from_str(trimmed)
                .map_err(|source| DetectorError::Parse {
                    line: idx + 1,
                    source,
                })?;
            script.push(detections);
        }
        debug!(frames = script.len(), "loaded detection replay script");
        Ok(Self::new(script))
    }

    pub fn len(&self) -> usize {
        self.script.len()
    }

    pub fn is_empty(&self) -> bool {
        self.script.is_empty()
    }
}

impl Detector for ReplayDetector {
    fn name(&self) -> &str {
        "replay"
    }

    fn detect(&mut self, _frame: &Frame) -> Result<Vec<Detection>, DetectorError> {
        if self.script.is_empty() {
            return Ok(Vec::new());
        }
        let detections = self.script[self.cursor].clone();
        self.cursor = (self.cursor + 1) % self.script.len();
        Ok(detections)
    }
}
