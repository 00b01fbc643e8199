//! Outbound adapter: periodic broadcast of the current estimate.
//!
//! The planar estimate is embedded as a full 3D transform: zero vertical
//! translation and a unit quaternion about the vertical axis.

use crate::estimator::Estimator;
use georef_align_core::TransformEstimate;
use nalgebra::{Quaternion, Vector3};
use serde::{Deserialize, Serialize};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Transform as broadcast to frame-aware consumers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StampedTransform {
    /// Wall-clock seconds since the Unix epoch.
    pub stamp: f64,
    pub parent_frame: String,
    pub child_frame: String,
    pub translation: Vector3<f64>,
    pub rotation: Quaternion<f64>,
}

/// Embed `estimate` as a 3D transform from `child_frame` into `parent_frame`.
pub fn stamped_transform(
    estimate: &TransformEstimate,
    parent_frame: &str,
    child_frame: &str,
    stamp: f64,
) -> StampedTransform {
    let half = 0.5 * estimate.rotation;
    StampedTransform {
        stamp,
        parent_frame: parent_frame.to_string(),
        child_frame: child_frame.to_string(),
        translation: Vector3::new(estimate.translation.x, estimate.translation.y, 0.0),
        rotation: Quaternion::new(half.cos(), 0.0, 0.0, half.sin()),
    }
}

fn wall_clock_seconds() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Receives every broadcast tick.
pub trait TransformSink: Send + 'static {
    fn send(&mut self, transform: &StampedTransform);
}

impl<F> TransformSink for F
where
    F: FnMut(&StampedTransform) + Send + 'static,
{
    fn send(&mut self, transform: &StampedTransform) {
        self(transform)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct BroadcastParams {
    pub period: Duration,
    pub parent_frame: String,
    pub child_frame: String,
}

impl Default for BroadcastParams {
    fn default() -> Self {
        Self {
            period: Duration::from_millis(100),
            parent_frame: "utm".to_string(),
            child_frame: "world".to_string(),
        }
    }
}

/// Background thread broadcasting the estimate at a fixed period, whether
/// or not a solve ran since the last tick.
///
/// Stops on [`TransformBroadcaster::stop`] or when dropped.
pub struct TransformBroadcaster {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<u64>>,
}

impl TransformBroadcaster {
    /// Start the broadcast thread. A zero `period` is rejected with
    /// [`io::ErrorKind::InvalidInput`].
    pub fn spawn<S: TransformSink>(
        estimator: Arc<Estimator>,
        mut sink: S,
        params: BroadcastParams,
    ) -> io::Result<Self> {
        if params.period.is_zero() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "broadcast period must be positive",
            ));
        }
        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);
        let handle = thread::Builder::new()
            .name("transform-broadcaster".into())
            .spawn(move || {
                log::debug!(
                    "broadcasting {} -> {} every {:?}",
                    params.child_frame,
                    params.parent_frame,
                    params.period
                );
                let mut ticks = 0u64;
                let mut next = Instant::now();
                while flag.load(Ordering::Acquire) {
                    let estimate = estimator.current_estimate();
                    let tf = stamped_transform(
                        &estimate,
                        &params.parent_frame,
                        &params.child_frame,
                        wall_clock_seconds(),
                    );
                    sink.send(&tf);
                    ticks += 1;

                    next += params.period;
                    let now = Instant::now();
                    if next <= now {
                        // Fell behind; restart the schedule instead of bursting.
                        next = now + params.period;
                    }
                    while flag.load(Ordering::Acquire) {
                        let now = Instant::now();
                        if now >= next {
                            break;
                        }
                        thread::park_timeout(next - now);
                    }
                }
                ticks
            })?;

        Ok(Self {
            running,
            handle: Some(handle),
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Stop the thread and return how many transforms it sent.
    pub fn stop(mut self) -> u64 {
        self.shutdown()
    }

    fn shutdown(&mut self) -> u64 {
        self.running.store(false, Ordering::Release);
        let Some(handle) = self.handle.take() else {
            return 0;
        };
        handle.thread().unpark();
        match handle.join() {
            Ok(ticks) => ticks,
            Err(_) => {
                log::error!("transform broadcaster thread panicked");
                0
            }
        }
    }
}

impl Drop for TransformBroadcaster {
    fn drop(&mut self) {
        self.shutdown();
    }
}
