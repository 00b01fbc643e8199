//! Fit-quality diagnostic table.
//!
//! One CSV row per stored correspondence: the georeferenced point next to
//! the world point mapped through the current estimate. Values are written
//! with shortest round-trip formatting, so nothing is lost to rounding.

use georef_align_core::{CorrespondencePoint, TransformEstimate};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(thiserror::Error, Debug)]
pub enum ExportError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Csv(#[from] csv::Error),
}

/// One exported row. `world_*` is the world point *after* the transform.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticRow {
    pub gps_x: f64,
    pub gps_y: f64,
    pub world_x: f64,
    pub world_y: f64,
}

impl DiagnosticRow {
    pub fn new(point: &CorrespondencePoint, estimate: &TransformEstimate) -> Self {
        let aligned = estimate.apply(point.world);
        Self {
            gps_x: point.georef.x,
            gps_y: point.georef.y,
            world_x: aligned.x,
            world_y: aligned.y,
        }
    }

    /// Distance between the georeferenced point and the aligned world point.
    pub fn residual_norm(&self) -> f64 {
        (self.gps_x - self.world_x).hypot(self.gps_y - self.world_y)
    }
}

/// Writes the diagnostic table, replacing the previous file each time.
#[derive(Clone, Debug)]
pub struct DiagnosticExporter {
    path: PathBuf,
}

impl DiagnosticExporter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the table; returns the number of data rows.
    pub fn export(
        &self,
        correspondences: &[CorrespondencePoint],
        estimate: &TransformEstimate,
    ) -> Result<usize, ExportError> {
        let mut wtr = csv::Writer::from_path(&self.path)?;
        if correspondences.is_empty() {
            // serialize() only emits the header with the first row.
            wtr.write_record(["gps_x", "gps_y", "world_x", "world_y"])?;
        }
        for point in correspondences {
            wtr.serialize(DiagnosticRow::new(point, estimate))?;
        }
        wtr.flush()?;
        log::debug!(
            "wrote {} diagnostic rows to {}",
            correspondences.len(),
            self.path.display()
        );
        Ok(correspondences.len())
    }
}

/// Load a table written by [`DiagnosticExporter::export`].
pub fn read_diagnostics(path: impl AsRef<Path>) -> Result<Vec<DiagnosticRow>, ExportError> {
    let mut rdr = csv::Reader::from_path(path)?;
    let rows = rdr.deserialize().collect::<Result<Vec<DiagnosticRow>, _>>()?;
    Ok(rows)
}
