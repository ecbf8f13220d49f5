//! Parallel scanning of record-aligned shards.
//!
//! Each shard is read by its own worker through a private file handle. Workers
//! produce the unique-token count of every record in shard order plus their
//! contribution to the token frequency table; they never see each other's state.

use std::fs::File;
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom};
use std::ops::Range;
use std::path::Path;

use bstr::ByteSlice;
use log::{debug, warn};
use rayon::prelude::*;
use rayon::ThreadPool;

use crate::config::{AggregationStrategy, OverlongPolicy, PipelineConfig};
use crate::error::{Result, TallyError};
use crate::frequency::{FrequencyTable, SharedFrequencyTable};
use crate::shard::TERMINATOR;
use crate::tokenize::{tokenize, TokenizedRecord};

const READ_BUFFER: usize = 64 * 1024;

/// Per-record statistics gathered from one pass over a reader.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordStats {
    /// Unique-token count of every record, in input order.
    pub counts: Vec<u8>,
    /// Records cut down to the maximum length.
    pub truncated: u64,
}

/// Result of scanning a single shard.
#[derive(Debug, Clone)]
pub struct ShardScan {
    /// Byte range covered by the shard.
    pub range: Range<u64>,
    /// Unique-token counts in shard order.
    pub counts: Vec<u8>,
    /// Shard-local token table; empty when a shared table was used.
    pub frequencies: FrequencyTable,
    /// Records cut down to the maximum length.
    pub truncated: u64,
}

/// Result of scanning every shard of a chunk.
#[derive(Debug, Clone, Default)]
pub struct ChunkScan {
    /// Unique-token counts of the whole chunk in file order.
    pub counts: Vec<u8>,
    /// Token table accumulated over the chunk.
    pub frequencies: FrequencyTable,
    /// Records cut down to the maximum length.
    pub truncated: u64,
}

/// Reads newline-terminated records from `reader`, calling `on_record` for each.
///
/// `base_offset` is the input offset of the reader's first byte and is only used for
/// error reporting.
pub fn scan_records<R, F>(
    mut reader: R,
    base_offset: u64,
    cfg: &PipelineConfig,
    mut on_record: F,
) -> Result<RecordStats>
where
    R: BufRead,
    F: FnMut(&TokenizedRecord<'_>),
{
    let max_unique = cfg.max_unique_count();
    let mut stats = RecordStats::default();
    let mut line = Vec::with_capacity(cfg.max_record_len + 2);
    let mut offset = base_offset;
    loop {
        line.clear();
        let read = reader
            .read_until(TERMINATOR, &mut line)
            .map_err(|err| TallyError::io(err, None))?;
        if read == 0 {
            break;
        }
        let mut record = line.as_slice();
        if record.last() == Some(&TERMINATOR) {
            record = &record[..record.len() - 1];
        }
        if record.len() > cfg.max_record_len {
            match cfg.overlong {
                OverlongPolicy::Reject => {
                    return Err(TallyError::RecordTooLong {
                        offset,
                        len: record.len(),
                        max: cfg.max_record_len,
                    });
                }
                OverlongPolicy::Truncate => {
                    debug!(
                        "truncating record at offset {offset}: {:?}",
                        record[..cfg.max_record_len.min(32)].as_bstr()
                    );
                    record = &record[..cfg.max_record_len];
                    stats.truncated += 1;
                }
            }
        }

        let tokens = tokenize(record);
        let unique = tokens.unique_count();
        let count = u8::try_from(unique)
            .ok()
            .filter(|_| unique <= max_unique)
            .ok_or(TallyError::CountOutOfRange {
                value: unique,
                max: max_unique,
            })?;
        on_record(&tokens);
        stats.counts.push(count);
        offset += read as u64;
    }
    Ok(stats)
}

fn open_shard(path: &Path, range: &Range<u64>) -> Result<BufReader<std::io::Take<File>>> {
    let mut file = File::open(path).map_err(|source| TallyError::OpenInput {
        path: path.to_path_buf(),
        source,
    })?;
    file.seek(SeekFrom::Start(range.start))
        .map_err(|err| TallyError::io(err, Some(path.to_path_buf())))?;
    Ok(BufReader::with_capacity(
        READ_BUFFER,
        file.take(range.end - range.start),
    ))
}

/// Scans one shard into a private frequency table.
pub fn scan_shard(path: &Path, range: Range<u64>, cfg: &PipelineConfig) -> Result<ShardScan> {
    let reader = open_shard(path, &range)?;
    let mut frequencies = FrequencyTable::new();
    let stats = scan_records(reader, range.start, cfg, |record| {
        frequencies.add_record(record);
    })
    .map_err(|err| with_path(err, path))?;
    debug!(
        "scanned shard {:?}: {} records, {} distinct tokens",
        range,
        stats.counts.len(),
        frequencies.len()
    );
    Ok(ShardScan {
        range,
        counts: stats.counts,
        frequencies,
        truncated: stats.truncated,
    })
}

/// Scans one shard, adding token occurrences to `shared` one record at a time.
pub fn scan_shard_shared(
    path: &Path,
    range: Range<u64>,
    cfg: &PipelineConfig,
    shared: &SharedFrequencyTable,
) -> Result<ShardScan> {
    let reader = open_shard(path, &range)?;
    let stats = scan_records(reader, range.start, cfg, |record| shared.add_record(record))
        .map_err(|err| with_path(err, path))?;
    debug!(
        "scanned shard {:?}: {} records (shared table)",
        range,
        stats.counts.len()
    );
    Ok(ShardScan {
        range,
        counts: stats.counts,
        frequencies: FrequencyTable::new(),
        truncated: stats.truncated,
    })
}

/// Scans every shard of a chunk on `pool` and joins the results in shard order.
///
/// Returns only after every worker has finished.
pub fn scan_chunk(
    pool: &ThreadPool,
    path: &Path,
    shards: &[Range<u64>],
    cfg: &PipelineConfig,
) -> Result<ChunkScan> {
    pool.install(|| -> Result<ChunkScan> {
        match cfg.strategy {
            AggregationStrategy::ShardLocal => {
                let scans = shards
                    .par_iter()
                    .map(|range| scan_shard(path, range.clone(), cfg))
                    .collect::<Result<Vec<_>>>()?;
                let (counts, truncated) = concat_counts(&scans);
                let frequencies = scans
                    .into_par_iter()
                    .map(|scan| scan.frequencies)
                    .reduce(FrequencyTable::default, |mut acc, table| {
                        acc.merge(table);
                        acc
                    });
                Ok(ChunkScan {
                    counts,
                    frequencies,
                    truncated,
                })
            }
            AggregationStrategy::SharedLock => {
                let shared = SharedFrequencyTable::new();
                let scans = shards
                    .par_iter()
                    .map(|range| scan_shard_shared(path, range.clone(), cfg, &shared))
                    .collect::<Result<Vec<_>>>()?;
                let (counts, truncated) = concat_counts(&scans);
                Ok(ChunkScan {
                    counts,
                    frequencies: shared.into_inner(),
                    truncated,
                })
            }
        }
    })
    .map(|chunk| {
        if chunk.truncated > 0 {
            warn!(
                "truncated {} record(s) longer than {} bytes",
                chunk.truncated, cfg.max_record_len
            );
        }
        chunk
    })
}

fn concat_counts(scans: &[ShardScan]) -> (Vec<u8>, u64) {
    let total = scans.iter().map(|scan| scan.counts.len()).sum();
    let mut counts = Vec::with_capacity(total);
    let mut truncated = 0;
    for scan in scans {
        counts.extend_from_slice(&scan.counts);
        truncated += scan.truncated;
    }
    (counts, truncated)
}

fn with_path(err: TallyError, path: &Path) -> TallyError {
    match err {
        TallyError::Io { source, path: None } => TallyError::io(source, Some(path.to_path_buf())),
        other => other,
    }
}
