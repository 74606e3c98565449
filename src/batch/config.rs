//! Batch configuration.
//!
//! [`BatchConfig`] holds every knob of a batch run: chunking, parallelism,
//! snapshot capture and the ranking tie-break.

use crate::ranking::{TieField, TieKey};

/// Configuration for a batch scoring run.
///
/// # Defaults
///
/// ```
/// use u_gradeflow::batch::BatchConfig;
///
/// let config = BatchConfig::default();
/// assert_eq!(config.chunk_size, 100);
/// assert_eq!(config.persist_chunk_size, 500);
/// assert!(config.validate().is_ok());
/// ```
///
/// # Builder Pattern
///
/// ```
/// use u_gradeflow::batch::BatchConfig;
///
/// let config = BatchConfig::default()
///     .with_chunk_size(250)
///     .with_parallel(false)
///     .with_capture_snapshots(false);
/// ```
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Students per execution chunk.
    ///
    /// Chunks run one after another; students inside a chunk may run
    /// concurrently. Progress is reported after each chunk.
    pub chunk_size: usize,

    /// Rows per persistence chunk (1–5000).
    pub persist_chunk_size: usize,

    /// Whether to run the students of a chunk in parallel using rayon.
    ///
    /// Ignored when the crate is built without the `parallel` feature.
    pub parallel: bool,

    /// Whether blocks record snapshots. Scores are identical either way.
    pub capture_snapshots: bool,

    /// Two final scores closer than this share a rank.
    pub tie_epsilon: f64,

    /// Secondary ranking keys, applied in order inside a tie group.
    /// Student id ascending always follows.
    pub tie_keys: Vec<TieKey>,

    /// Upper bound on worker threads. `None` uses the global rayon pool.
    pub max_workers: Option<usize>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            chunk_size: 100,
            persist_chunk_size: 500,
            parallel: true,
            capture_snapshots: true,
            tie_epsilon: 1e-9,
            tie_keys: vec![TieKey::desc(TieField::WeightedUnitSum)],
            max_workers: None,
        }
    }
}

impl BatchConfig {
    /// Sets the execution chunk size.
    pub fn with_chunk_size(mut self, n: usize) -> Self {
        self.chunk_size = n;
        self
    }

    /// Sets the persistence chunk size.
    pub fn with_persist_chunk_size(mut self, n: usize) -> Self {
        self.persist_chunk_size = n;
        self
    }

    /// Enables or disables parallel execution inside a chunk.
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn with_capture_snapshots(mut self, capture: bool) -> Self {
        self.capture_snapshots = capture;
        self
    }

    pub fn with_tie_epsilon(mut self, eps: f64) -> Self {
        self.tie_epsilon = eps;
        self
    }

    /// Replaces the secondary ranking keys.
    pub fn with_tie_keys(mut self, keys: Vec<TieKey>) -> Self {
        self.tie_keys = keys;
        self
    }

    /// Caps the worker thread count.
    pub fn with_max_workers(mut self, n: usize) -> Self {
        self.max_workers = Some(n);
        self
    }

    /// Validates the configuration.
    ///
    /// Returns `Err` with a description if any parameter is invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.chunk_size == 0 {
            return Err("chunk_size must be at least 1".into());
        }
        if !(1..=5000).contains(&self.persist_chunk_size) {
            return Err("persist_chunk_size must be between 1 and 5000".into());
        }
        if !self.tie_epsilon.is_finite() || self.tie_epsilon < 0.0 {
            return Err("tie_epsilon must be finite and non-negative".into());
        }
        if self.max_workers == Some(0) {
            return Err("max_workers must be positive or None".into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = BatchConfig::default();
        assert_eq!(config.chunk_size, 100);
        assert_eq!(config.persist_chunk_size, 500);
        assert!(config.parallel);
        assert!(config.capture_snapshots);
        assert!((config.tie_epsilon - 1e-9).abs() < 1e-20);
        assert_eq!(config.tie_keys, vec![TieKey::desc(TieField::WeightedUnitSum)]);
        assert!(config.max_workers.is_none());
    }

    #[test]
    fn test_builder_pattern() {
        let config = BatchConfig::default()
            .with_chunk_size(10)
            .with_persist_chunk_size(1000)
            .with_parallel(false)
            .with_capture_snapshots(false)
            .with_tie_epsilon(1e-6)
            .with_tie_keys(vec![])
            .with_max_workers(4);

        assert_eq!(config.chunk_size, 10);
        assert_eq!(config.persist_chunk_size, 1000);
        assert!(!config.parallel);
        assert!(!config.capture_snapshots);
        assert!(config.tie_keys.is_empty());
        assert_eq!(config.max_workers, Some(4));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects() {
        assert!(BatchConfig::default().with_chunk_size(0).validate().is_err());
        assert!(BatchConfig::default().with_persist_chunk_size(0).validate().is_err());
        assert!(BatchConfig::default().with_persist_chunk_size(5001).validate().is_err());
        assert!(BatchConfig::default().with_persist_chunk_size(5000).validate().is_ok());
        assert!(BatchConfig::default().with_tie_epsilon(-1.0).validate().is_err());
        assert!(BatchConfig::default().with_tie_epsilon(f64::NAN).validate().is_err());
        assert!(BatchConfig::default().with_max_workers(0).validate().is_err());
    }
}
