//! Pitch contour artifact
//!
//! A contour is a time series of fundamental-frequency estimates on a 10 ms
//! grid, with per-frame confidence. Frames with `frequency == 0` are
//! unvoiced. The on-disk / on-blob representation is an NPZ archive with the
//! arrays `time`, `frequency` and `confidence`, matching what the pitch
//! extraction service emits.

use ndarray::Array1;
use ndarray_npy::{NpzReader, NpzWriter};
use std::io::Cursor;

use crate::{Error, Result};

/// Frame spacing of the contour grid.
pub const FRAME_SECONDS: f32 = 0.010;

#[derive(Debug, Clone, PartialEq)]
pub struct PitchContour {
    /// Frame timestamps in seconds.
    pub time: Vec<f32>,
    /// Fundamental frequency in Hz; 0.0 marks an unvoiced frame.
    pub frequency: Vec<f32>,
    /// Per-frame confidence in [0, 1].
    pub confidence: Vec<f32>,
}

impl PitchContour {
    pub fn new(time: Vec<f32>, frequency: Vec<f32>, confidence: Vec<f32>) -> Result<Self> {
        let contour = Self {
            time,
            frequency,
            confidence,
        };
        contour.validate()?;
        Ok(contour)
    }

    /// Check the structural invariants a trustworthy artifact must hold.
    ///
    /// Cached artifacts are validated before use; a failure here is an
    /// [`Error::Integrity`] and triggers recomputation upstream.
    pub fn validate(&self) -> Result<()> {
        if self.time.is_empty() {
            return Err(Error::Integrity("empty pitch contour".to_string()));
        }
        if self.time.len() != self.frequency.len() || self.time.len() != self.confidence.len() {
            return Err(Error::Integrity(format!(
                "pitch contour length mismatch: time={} frequency={} confidence={}",
                self.time.len(),
                self.frequency.len(),
                self.confidence.len()
            )));
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.time.len()
    }

    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }

    /// Count of frames where voice was detected.
    pub fn voiced_frames(&self) -> usize {
        self.frequency.iter().filter(|f| **f > 0.0).count()
    }

    /// Serialize to NPZ bytes (arrays `time`, `frequency`, `confidence`).
    pub fn to_npz_bytes(&self) -> Result<Vec<u8>> {
        self.validate()?;
        let mut writer = NpzWriter::new(Cursor::new(Vec::new()));
        writer
            .add_array("time", &Array1::from(self.time.clone()))
            .map_err(|e| Error::Integrity(format!("npz write: {}", e)))?;
        writer
            .add_array("frequency", &Array1::from(self.frequency.clone()))
            .map_err(|e| Error::Integrity(format!("npz write: {}", e)))?;
        writer
            .add_array("confidence", &Array1::from(self.confidence.clone()))
            .map_err(|e| Error::Integrity(format!("npz write: {}", e)))?;
        let cursor = writer
            .finish()
            .map_err(|e| Error::Integrity(format!("npz finish: {}", e)))?;
        Ok(cursor.into_inner())
    }

    /// Parse NPZ bytes, verifying all three arrays are present and aligned.
    pub fn from_npz_bytes(bytes: &[u8]) -> Result<Self> {
        let mut reader = NpzReader::new(Cursor::new(bytes))
            .map_err(|e| Error::Integrity(format!("npz open: {}", e)))?;

        let time: Array1<f32> = reader
            .by_name("time")
            .map_err(|e| Error::Integrity(format!("npz missing 'time': {}", e)))?;
        let frequency: Array1<f32> = reader
            .by_name("frequency")
            .map_err(|e| Error::Integrity(format!("npz missing 'frequency': {}", e)))?;
        let confidence: Array1<f32> = reader
            .by_name("confidence")
            .map_err(|e| Error::Integrity(format!("npz missing 'confidence': {}", e)))?;

        Self::new(time.to_vec(), frequency.to_vec(), confidence.to_vec())
    }
}
