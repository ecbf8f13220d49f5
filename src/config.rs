//! Configuration builders controlling corpus ingestion and aggregation.

use std::num::NonZeroUsize;

use crate::error::{Result, TallyError};
use serde::{Deserialize, Serialize};

/// Upper bound on scanner worker threads.
pub const MAX_WORKERS: usize = 32;

/// Default maximum record length in bytes, excluding the line terminator.
pub const DEFAULT_MAX_RECORD_LEN: usize = 140;

/// Default number of input bytes processed per chunk.
pub const DEFAULT_CHUNK_SIZE: u64 = 64 * 1024 * 1024;

/// Default minimum shard size; smaller inputs use fewer workers.
pub const DEFAULT_MIN_SHARD_BYTES: u64 = 4096;

/// How scanner workers contribute to the global token frequency table.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum AggregationStrategy {
    /// Each worker fills a private table; tables are merged once the shard completes.
    #[default]
    ShardLocal,
    /// Workers share one table behind a mutex held for a single record's increments.
    SharedLock,
}

/// What to do with records longer than [`PipelineConfig::max_record_len`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum OverlongPolicy {
    /// Abort the run with [`TallyError::RecordTooLong`].
    #[default]
    Reject,
    /// Cut the record to the maximum length before tokenizing.
    Truncate,
}

/// Configuration for a full ingestion run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipelineConfig {
    /// Maximum record length in bytes, excluding the `\n` terminator.
    pub max_record_len: usize,
    /// Number of scanner workers (and threads in the scanning pool).
    pub workers: usize,
    /// Approximate number of input bytes processed before medians are flushed.
    pub chunk_size: u64,
    /// Shards smaller than this are avoided by lowering the worker count.
    pub min_shard_bytes: u64,
    /// Frequency aggregation strategy.
    pub strategy: AggregationStrategy,
    /// Handling of records above `max_record_len`.
    pub overlong: OverlongPolicy,
}

impl PipelineConfig {
    /// Returns a builder initialised with [`PipelineConfig::default`].
    #[must_use]
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::default()
    }

    /// Largest unique-token count a record within `max_record_len` can produce.
    ///
    /// `n` distinct tokens need at least `2n - 1` bytes.
    #[must_use]
    pub fn max_unique_count(&self) -> usize {
        (self.max_record_len + 1) / 2
    }

    /// Validates the invariants required for a run.
    pub fn validate(&self) -> Result<()> {
        if self.max_record_len < 2 {
            return Err(TallyError::InvalidConfig(
                "max_record_len must be at least 2".into(),
            ));
        }
        if self.max_unique_count() > usize::from(u8::MAX) {
            return Err(TallyError::InvalidConfig(format!(
                "max_record_len ({}) allows {} unique tokens, more than the supported {}",
                self.max_record_len,
                self.max_unique_count(),
                u8::MAX
            )));
        }
        if self.workers == 0 {
            return Err(TallyError::InvalidConfig(
                "workers must be greater than zero".into(),
            ));
        }
        if self.workers > MAX_WORKERS {
            return Err(TallyError::InvalidConfig(format!(
                "workers ({}) exceeds the maximum of {MAX_WORKERS}",
                self.workers
            )));
        }
        if self.chunk_size == 0 {
            return Err(TallyError::InvalidConfig(
                "chunk_size must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_record_len: DEFAULT_MAX_RECORD_LEN,
            workers: default_workers(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            min_shard_bytes: DEFAULT_MIN_SHARD_BYTES,
            strategy: AggregationStrategy::default(),
            overlong: OverlongPolicy::default(),
        }
    }
}

/// Platform concurrency capped at [`MAX_WORKERS`].
#[must_use]
pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map_or(1, NonZeroUsize::get)
        .min(MAX_WORKERS)
}

/// Builder for [`PipelineConfig`].
#[derive(Debug, Default, Clone)]
pub struct PipelineBuilder {
    cfg: PipelineConfig,
}

impl PipelineBuilder {
    /// Creates a builder with [`PipelineConfig::default`] settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum record length in bytes.
    #[must_use]
    pub fn max_record_len(mut self, value: usize) -> Self {
        self.cfg.max_record_len = value;
        self
    }

    /// Sets the number of scanner workers.
    #[must_use]
    pub fn workers(mut self, value: usize) -> Self {
        self.cfg.workers = value;
        self
    }

    /// Sets the chunk size in bytes.
    #[must_use]
    pub fn chunk_size(mut self, value: u64) -> Self {
        self.cfg.chunk_size = value;
        self
    }

    /// Sets the minimum shard size in bytes.
    #[must_use]
    pub fn min_shard_bytes(mut self, value: u64) -> Self {
        self.cfg.min_shard_bytes = value;
        self
    }

    /// Selects the frequency aggregation strategy.
    #[must_use]
    pub fn strategy(mut self, strategy: AggregationStrategy) -> Self {
        self.cfg.strategy = strategy;
        self
    }

    /// Selects the overlong record policy.
    #[must_use]
    pub fn overlong(mut self, policy: OverlongPolicy) -> Self {
        self.cfg.overlong = policy;
        self
    }

    /// Finalises the builder, returning a validated [`PipelineConfig`].
    pub fn build(self) -> Result<PipelineConfig> {
        self.cfg.validate()?;
        Ok(self.cfg)
    }
}
