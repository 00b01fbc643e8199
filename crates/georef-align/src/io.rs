//! JSON configuration and report helpers, plus CSV loaders for replay input.

use crate::estimator::{Estimator, EstimatorError, EstimatorParams};
use crate::ingest::{GeorefObservation, HandlerParams, PoseBuffer, RunOptimizationRoute};
use crate::publish::BroadcastParams;
use georef_align_core::{SolverOptions, SolverSummary, TransformEstimate, DEFAULT_BATCH_SIZE};
use nalgebra::Point2;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

#[derive(thiserror::Error, Debug)]
pub enum ConfigIoError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Csv(#[from] csv::Error),
}

fn default_debug_file_path() -> String {
    "gps_alignment_solution.csv".to_string()
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_publish_period_ms() -> u64 {
    100
}

fn default_lookup_timeout_ms() -> u64 {
    3000
}

fn default_parent_frame() -> String {
    "utm".to_string()
}

fn default_child_frame() -> String {
    "world".to_string()
}

fn default_source_frame() -> String {
    "navsat_link".to_string()
}

/// Frame identifiers used on both adapter sides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameConfig {
    /// Georeferenced frame; parent of the broadcast transform.
    #[serde(default = "default_parent_frame")]
    pub parent: String,
    /// World frame; child of the broadcast transform and target of lookups.
    #[serde(default = "default_child_frame")]
    pub child: String,
    /// Frame observations are expected to be reported for.
    #[serde(default = "default_source_frame")]
    pub source: String,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            parent: default_parent_frame(),
            child: default_child_frame(),
            source: default_source_frame(),
        }
    }
}

/// Runtime configuration. Every field may be omitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlignmentConfig {
    /// Initial translation `[x, y]`.
    #[serde(default)]
    pub translation: [f64; 2],
    /// Initial rotation in radians.
    #[serde(default)]
    pub orientation: f64,
    #[serde(default)]
    pub write_debug_file: bool,
    #[serde(default = "default_debug_file_path")]
    pub debug_file_path: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_publish_period_ms")]
    pub publish_period_ms: u64,
    #[serde(default = "default_lookup_timeout_ms")]
    pub lookup_timeout_ms: u64,
    #[serde(default)]
    pub frames: FrameConfig,
    #[serde(default)]
    pub run_optimization_route: RunOptimizationRoute,
    #[serde(default)]
    pub solver: SolverOptions,
}

impl Default for AlignmentConfig {
    fn default() -> Self {
        Self {
            translation: [0.0, 0.0],
            orientation: 0.0,
            write_debug_file: false,
            debug_file_path: default_debug_file_path(),
            batch_size: default_batch_size(),
            publish_period_ms: default_publish_period_ms(),
            lookup_timeout_ms: default_lookup_timeout_ms(),
            frames: FrameConfig::default(),
            run_optimization_route: RunOptimizationRoute::default(),
            solver: SolverOptions::default(),
        }
    }
}

impl AlignmentConfig {
    /// Load a JSON config from disk.
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, ConfigIoError> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Write this config to disk as pretty JSON.
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), ConfigIoError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    pub fn initial_estimate(&self) -> TransformEstimate {
        TransformEstimate::new(self.translation, self.orientation)
    }

    /// Build estimator parameters from the config.
    pub fn build_params(&self) -> EstimatorParams {
        EstimatorParams {
            initial: self.initial_estimate(),
            batch_size: self.batch_size,
            solver: self.solver.clone(),
            diagnostics_path: self
                .write_debug_file
                .then(|| PathBuf::from(&self.debug_file_path)),
        }
    }

    /// Build an estimator from this config.
    pub fn build_estimator(&self) -> Result<Estimator, EstimatorError> {
        Estimator::new(self.build_params())
    }

    pub fn handler_params(&self) -> HandlerParams {
        HandlerParams {
            world_frame: self.frames.child.clone(),
            source_frame: self.frames.source.clone(),
            lookup_timeout: Duration::from_millis(self.lookup_timeout_ms),
            route: self.run_optimization_route,
        }
    }

    pub fn broadcast_params(&self) -> BroadcastParams {
        BroadcastParams {
            period: Duration::from_millis(self.publish_period_ms),
            parent_frame: self.frames.parent.clone(),
            child_frame: self.frames.child.clone(),
        }
    }
}

/// Summary of a replay run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlignmentReport {
    pub config_path: Option<String>,
    pub observations_path: String,
    pub trajectory_path: String,
    pub observations: usize,
    pub ingested: usize,
    /// Observations dropped because their world-frame correlate was missing.
    pub dropped: usize,
    pub frame_mismatches: usize,
    pub solves: usize,
    pub generation: u64,
    pub estimate: TransformEstimate,
    #[serde(default)]
    pub last_summary: Option<SolverSummary>,
    #[serde(default)]
    pub diagnostics_path: Option<String>,
}

impl AlignmentReport {
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, ConfigIoError> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), ConfigIoError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }
}

#[derive(Deserialize)]
struct ObservationRecord {
    stamp: f64,
    frame_id: String,
    x: f64,
    y: f64,
}

#[derive(Deserialize)]
struct TrajectoryRecord {
    stamp: f64,
    x: f64,
    y: f64,
}

/// Read georeferenced observations from a CSV with header `stamp,frame_id,x,y`.
pub fn read_observations_csv(
    path: impl AsRef<Path>,
) -> Result<Vec<GeorefObservation>, ConfigIoError> {
    let mut rdr = csv::Reader::from_path(path)?;
    let mut out = Vec::new();
    for record in rdr.deserialize() {
        let r: ObservationRecord = record?;
        out.push(GeorefObservation::new(r.frame_id, r.stamp, Point2::new(r.x, r.y)));
    }
    Ok(out)
}

/// Load a world-frame trajectory from a CSV with header `stamp,x,y` into a
/// [`PoseBuffer`] tracking `source_frame` in `world_frame`.
pub fn read_trajectory_csv(
    path: impl AsRef<Path>,
    world_frame: &str,
    source_frame: &str,
) -> Result<PoseBuffer, ConfigIoError> {
    let buffer = PoseBuffer::new(world_frame, source_frame);
    let mut rdr = csv::Reader::from_path(path)?;
    for record in rdr.deserialize() {
        let r: TrajectoryRecord = record?;
        buffer.insert(r.stamp, Point2::new(r.x, r.y));
    }
    Ok(buffer)
}
