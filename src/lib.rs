//! Parallel word tally and running median library and CLI.
//!
//! The crate reads a file of newline-terminated records, counts how often every
//! whitespace-separated token occurs across the whole input, and emits the running
//! median of the per-record unique-token count after every record. Scanning is split
//! into record-aligned shards processed in parallel; the median is computed on the
//! orchestrating thread in file order, so outputs never depend on the worker count.
//!
//! ```no_run
//! use wordtally::{Pipeline, PipelineConfig};
//!
//! # fn main() -> wordtally::Result<()> {
//! let cfg = PipelineConfig::builder()
//!     .workers(8)
//!     .chunk_size(16 * 1024 * 1024)
//!     .build()?;
//! let summary = Pipeline::new(cfg).run_to_files("tweets.txt", "frequencies.txt", "medians.txt")?;
//! println!("{} records, final median {:?}", summary.records, summary.final_median);
//! # Ok(())
//! # }
//! ```
//!
//! The CLI is enabled by default through the `cli` feature.  Users targeting the
//! library portion only can disable default features to avoid the CLI
//! dependencies: `wordtally = { version = "...", default-features = false }`.

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    clippy::all,
    rust_2018_idioms,
    future_incompatible,
    unused_lifetimes,
    unreachable_pub
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::missing_panics_doc,
    clippy::missing_errors_doc,
    clippy::doc_markdown,
    clippy::multiple_crate_versions
)]

pub mod config;
pub mod error;
pub mod frequency;
pub mod median;
pub mod pipeline;
pub mod scan;
pub mod shard;
pub mod sink;
pub mod tokenize;

pub use config::{AggregationStrategy, OverlongPolicy, PipelineBuilder, PipelineConfig};
pub use error::{Result, TallyError};
pub use frequency::{FrequencyTable, SharedFrequencyTable};
pub use median::{HalfValue, RunningMedian};
pub use pipeline::{ChunkPlan, Pipeline, RunPlan, RunSummary};
pub use sink::{FileSink, MemorySink, Sink};
