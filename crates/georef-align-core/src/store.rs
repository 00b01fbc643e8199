use crate::types::CorrespondencePoint;

/// Re-optimization cadence used when nothing else is configured.
pub const DEFAULT_BATCH_SIZE: usize = 10;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("batch size must be at least 1")]
    ZeroBatchSize,
}

/// Append-only history of correspondences in arrival order.
///
/// There is no removal: the full history is re-solved on every batch, so
/// memory and solve time grow with the lifetime of the process.
///
/// The store itself is not synchronised; owners that share it across threads
/// must hold one lock across `append` + `should_solve`.
#[derive(Clone, Debug)]
pub struct CorrespondenceStore {
    points: Vec<CorrespondencePoint>,
    batch_size: usize,
}

impl Default for CorrespondenceStore {
    fn default() -> Self {
        Self {
            points: Vec::new(),
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

impl CorrespondenceStore {
    pub fn new(batch_size: usize) -> Result<Self, StoreError> {
        if batch_size == 0 {
            return Err(StoreError::ZeroBatchSize);
        }
        Ok(Self {
            points: Vec::new(),
            batch_size,
        })
    }

    #[inline]
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Append at the end. Returns the new size.
    pub fn append(&mut self, point: CorrespondencePoint) -> usize {
        self.points.push(point);
        self.points.len()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// True exactly when the size is a positive multiple of the batch size.
    #[inline]
    pub fn should_solve(&self) -> bool {
        let n = self.points.len();
        n > 0 && n % self.batch_size == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = &CorrespondencePoint> + '_ {
        self.points.iter()
    }

    pub fn as_slice(&self) -> &[CorrespondencePoint] {
        &self.points
    }
}
