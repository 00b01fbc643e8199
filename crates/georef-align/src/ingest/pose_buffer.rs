use nalgebra::Point2;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum LookupError {
    #[error("no transform from '{source_frame}' to '{target_frame}' is tracked")]
    UnknownFrame {
        target_frame: String,
        source_frame: String,
    },
    #[error("lookup at t={stamp:.3} would extrapolate into the past (earliest sample t={earliest:.3})")]
    Extrapolation { stamp: f64, earliest: f64 },
    #[error("timed out after {waited:?} waiting for a sample covering t={stamp:.3}")]
    Timeout { stamp: f64, waited: Duration },
}

/// Resolves where `source_frame` was, expressed in `target_frame`, at a given time.
///
/// Implementations may block for at most `timeout` waiting for data to
/// arrive.
pub trait FrameLookup: Send + Sync {
    fn lookup_position(
        &self,
        target_frame: &str,
        source_frame: &str,
        stamp: f64,
        timeout: Duration,
    ) -> Result<Point2<f64>, LookupError>;
}

impl<T: FrameLookup + ?Sized> FrameLookup for Arc<T> {
    fn lookup_position(
        &self,
        target_frame: &str,
        source_frame: &str,
        stamp: f64,
        timeout: Duration,
    ) -> Result<Point2<f64>, LookupError> {
        (**self).lookup_position(target_frame, source_frame, stamp, timeout)
    }
}

enum Sampled {
    Found(Point2<f64>),
    BeforeFirst { earliest: f64 },
    NotYet,
}

/// Time-indexed positions of one frame relative to another.
///
/// Lookups interpolate linearly between the two samples bracketing the
/// requested stamp and block until a later sample arrives (or the wait runs
/// out) when the stamp is newer than everything buffered.
pub struct PoseBuffer {
    target_frame: String,
    source_frame: String,
    cache_duration: Option<f64>,
    samples: Mutex<Vec<(f64, Point2<f64>)>>,
    updated: Condvar,
}

impl PoseBuffer {
    /// Buffer for `source_frame` positions expressed in `target_frame`.
    /// Keeps every sample until [`PoseBuffer::with_cache_duration`] says otherwise.
    pub fn new(target_frame: impl Into<String>, source_frame: impl Into<String>) -> Self {
        Self {
            target_frame: target_frame.into(),
            source_frame: source_frame.into(),
            cache_duration: None,
            samples: Mutex::new(Vec::new()),
            updated: Condvar::new(),
        }
    }

    /// Drop samples older than `seconds` behind the newest one.
    pub fn with_cache_duration(mut self, seconds: f64) -> Self {
        self.cache_duration = Some(seconds.max(0.0));
        self
    }

    pub fn target_frame(&self) -> &str {
        &self.target_frame
    }

    pub fn source_frame(&self) -> &str {
        &self.source_frame
    }

    fn lock(&self) -> MutexGuard<'_, Vec<(f64, Point2<f64>)>> {
        self.samples.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a sample and wake blocked lookups. Out-of-order samples are
    /// inserted at their place; a sample with an existing stamp replaces it.
    pub fn insert(&self, stamp: f64, position: Point2<f64>) {
        if !stamp.is_finite() || !position.x.is_finite() || !position.y.is_finite() {
            log::warn!("ignoring non-finite pose sample at t={stamp}");
            return;
        }
        {
            let mut samples = self.lock();
            let idx = samples.partition_point(|(t, _)| *t < stamp);
            if samples.get(idx).is_some_and(|(t, _)| *t == stamp) {
                samples[idx].1 = position;
            } else {
                samples.insert(idx, (stamp, position));
            }
            if let (Some(window), Some(&(newest, _))) = (self.cache_duration, samples.last()) {
                let keep_from = samples.partition_point(|(t, _)| *t < newest - window);
                samples.drain(..keep_from);
            }
        }
        self.updated.notify_all();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn sample(samples: &[(f64, Point2<f64>)], stamp: f64) -> Sampled {
        let idx = samples.partition_point(|(t, _)| *t < stamp);
        match (idx.checked_sub(1).map(|i| samples[i]), samples.get(idx)) {
            (_, Some(&(t, p))) if t == stamp => Sampled::Found(p),
            (None, Some(&(earliest, _))) => Sampled::BeforeFirst { earliest },
            (Some((t0, p0)), Some(&(t1, p1))) => {
                let a = (stamp - t0) / (t1 - t0);
                Sampled::Found(Point2::from(p0.coords.lerp(&p1.coords, a)))
            }
            (_, None) => Sampled::NotYet,
        }
    }
}

impl FrameLookup for PoseBuffer {
    fn lookup_position(
        &self,
        target_frame: &str,
        source_frame: &str,
        stamp: f64,
        timeout: Duration,
    ) -> Result<Point2<f64>, LookupError> {
        if target_frame != self.target_frame || source_frame != self.source_frame {
            return Err(LookupError::UnknownFrame {
                target_frame: target_frame.to_string(),
                source_frame: source_frame.to_string(),
            });
        }

        let started = Instant::now();
        let deadline = started + timeout;
        let mut samples = self.lock();
        loop {
            match Self::sample(&samples, stamp) {
                Sampled::Found(p) => return Ok(p),
                Sampled::BeforeFirst { earliest } => {
                    return Err(LookupError::Extrapolation { stamp, earliest })
                }
                Sampled::NotYet => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(LookupError::Timeout {
                            stamp,
                            waited: now - started,
                        });
                    }
                    samples = self
                        .updated
                        .wait_timeout(samples, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0;
                }
            }
        }
    }
}
