//! Planning of record-aligned chunks and shards over the input.
//!
//! Every range produced here starts at the beginning of a record and ends just
//! after a `\n` terminator (or at the end of the input), so no record is ever
//! split between two workers or two chunks.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::ops::Range;
use std::path::{Path, PathBuf};

use log::debug;

use crate::error::{Result, TallyError};

/// Record terminator byte.
pub const TERMINATOR: u8 = b'\n';

const SCAN_BUFFER: usize = 4096;

/// Random-access view of the input used to locate record boundaries.
pub trait BoundarySource {
    /// Total length of the input in bytes.
    fn len(&self) -> u64;

    /// Returns the offset just past the first terminator in `from..limit`, or `limit` when
    /// the range holds no terminator.
    fn next_record_start(&mut self, from: u64, limit: u64) -> Result<u64>;

    /// Returns true when the input is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-memory input.
#[derive(Debug, Clone, Copy)]
pub struct SliceSource<'a> {
    data: &'a [u8],
}

impl<'a> SliceSource<'a> {
    /// Wraps a byte slice.
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }
}

impl BoundarySource for SliceSource<'_> {
    fn len(&self) -> u64 {
        self.data.len() as u64
    }

    fn next_record_start(&mut self, from: u64, limit: u64) -> Result<u64> {
        let limit = limit.min(self.len());
        if from >= limit {
            return Ok(limit);
        }
        let window = &self.data[from as usize..limit as usize];
        Ok(window
            .iter()
            .position(|&byte| byte == TERMINATOR)
            .map_or(limit, |pos| from + pos as u64 + 1))
    }
}

/// File-backed input scanned with positioned reads.
#[derive(Debug)]
pub struct FileSource {
    file: File,
    path: PathBuf,
    len: u64,
}

impl FileSource {
    /// Opens `path` and records its size.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|source| TallyError::OpenInput {
            path: path.clone(),
            source,
        })?;
        let len = file
            .metadata()
            .map_err(|source| TallyError::OpenInput {
                path: path.clone(),
                source,
            })?
            .len();
        Ok(Self { file, path, len })
    }

    /// Path the source was opened from.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl BoundarySource for FileSource {
    fn len(&self) -> u64 {
        self.len
    }

    fn next_record_start(&mut self, from: u64, limit: u64) -> Result<u64> {
        let limit = limit.min(self.len);
        if from >= limit {
            return Ok(limit);
        }
        self.file
            .seek(SeekFrom::Start(from))
            .map_err(|err| TallyError::io(err, Some(self.path.clone())))?;
        let mut buffer = [0u8; SCAN_BUFFER];
        let mut offset = from;
        while offset < limit {
            let want = ((limit - offset) as usize).min(SCAN_BUFFER);
            let read = self
                .file
                .read(&mut buffer[..want])
                .map_err(|err| TallyError::io(err, Some(self.path.clone())))?;
            if read == 0 {
                break;
            }
            if let Some(pos) = buffer[..read].iter().position(|&byte| byte == TERMINATOR) {
                return Ok(offset + pos as u64 + 1);
            }
            offset += read as u64;
        }
        Ok(limit)
    }
}

/// Splits `range` into at most `workers` contiguous record-aligned shards.
///
/// Internal boundaries start from the even split `start + len * i / workers` and move
/// forward to just past the next terminator. Boundaries that would not advance past the
/// previous one, or that reach the end of the range, are dropped, so long records spanning
/// several split points simply produce fewer shards. An empty range yields one empty shard.
pub fn plan_shards<S>(source: &mut S, range: Range<u64>, workers: usize) -> Result<Vec<Range<u64>>>
where
    S: BoundarySource + ?Sized,
{
    if workers == 0 {
        return Err(TallyError::InvalidConfig(
            "shard planning requires at least one worker".into(),
        ));
    }
    if range.end < range.start || range.end > source.len() {
        return Err(TallyError::Internal(format!(
            "shard range {range:?} outside input of {} bytes",
            source.len()
        )));
    }

    let len = range.end - range.start;
    let mut bounds = Vec::with_capacity(workers + 1);
    bounds.push(range.start);
    for i in 1..workers {
        let naive = range.start + (u128::from(len) * i as u128 / workers as u128) as u64;
        let prev = bounds[bounds.len() - 1];
        if naive < prev {
            continue;
        }
        let boundary = source.next_record_start(naive, range.end)?;
        if boundary >= range.end {
            break;
        }
        bounds.push(boundary);
    }
    bounds.push(range.end);

    let shards: Vec<Range<u64>> = bounds.windows(2).map(|pair| pair[0]..pair[1]).collect();
    debug!("planned {} shard(s) over {:?}", shards.len(), range);
    Ok(shards)
}

/// Splits the whole input into consecutive record-aligned chunks of roughly `chunk_size` bytes.
///
/// A chunk ends just past the first terminator at or after its `chunk_size`-th byte.
pub fn plan_chunks<S>(source: &mut S, chunk_size: u64) -> Result<Vec<Range<u64>>>
where
    S: BoundarySource + ?Sized,
{
    if chunk_size == 0 {
        return Err(TallyError::InvalidConfig(
            "chunk_size must be greater than zero".into(),
        ));
    }
    let len = source.len();
    let mut chunks = Vec::new();
    let mut start = 0u64;
    while start < len {
        let budget_end = start.saturating_add(chunk_size);
        let end = if budget_end >= len {
            len
        } else {
            source.next_record_start(budget_end - 1, len)?
        };
        chunks.push(start..end);
        start = end;
    }
    Ok(chunks)
}

/// Number of workers to use for `len` bytes so that shards stay above `min_shard_bytes`.
#[must_use]
pub fn effective_workers(len: u64, requested: usize, min_shard_bytes: u64) -> usize {
    if min_shard_bytes == 0 {
        return requested.max(1);
    }
    let by_size = usize::try_from(len / min_shard_bytes).unwrap_or(usize::MAX);
    requested.min(by_size).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn assert_aligned(data: &[u8], range: Range<u64>, shards: &[Range<u64>]) {
        assert_eq!(shards.first().map(|s| s.start), Some(range.start));
        assert_eq!(shards.last().map(|s| s.end), Some(range.end));
        for pair in shards.windows(2) {
            assert_eq!(pair[0].end, pair[1].start, "shards must be contiguous");
            assert!(pair[0].start < pair[0].end, "shards must be non-empty");
            assert_eq!(data[pair[0].end as usize - 1], TERMINATOR);
        }
    }

    #[test]
    fn splits_on_record_boundaries() {
        let data = b"aaaa\nbbbb\ncccc\ndddd\n";
        let mut source = SliceSource::new(data);
        let shards = plan_shards(&mut source, 0..20, 4).unwrap();
        assert_eq!(shards, vec![0..10, 10..15, 15..20]);
        assert_aligned(data, 0..20, &shards);
    }

    #[test]
    fn boundary_on_terminator_byte_ends_the_shard_there() {
        let data = b"abc\ndef\n";
        let mut source = SliceSource::new(data);
        let shards = plan_shards(&mut source, 0..8, 2).unwrap();
        assert_eq!(shards, vec![0..8]);

        let data = b"ab\ncdefg\n";
        let mut source = SliceSource::new(data);
        let shards = plan_shards(&mut source, 0..9, 4).unwrap();
        assert_eq!(shards, vec![0..3, 3..9]);
    }

    #[test]
    fn long_record_collapses_shards() {
        let mut data = vec![b'x'; 100];
        data.push(TERMINATOR);
        data.extend_from_slice(b"tail\n");
        let mut source = SliceSource::new(&data);
        let shards = plan_shards(&mut source, 0..data.len() as u64, 8).unwrap();
        assert_eq!(shards, vec![0..101, 101..106]);
    }

    #[test]
    fn single_worker_and_empty_range() {
        let data = b"one\ntwo\n";
        let mut source = SliceSource::new(data);
        assert_eq!(plan_shards(&mut source, 0..8, 1).unwrap(), vec![0..8]);
        assert_eq!(plan_shards(&mut source, 4..4, 6).unwrap(), vec![4..4]);
        assert!(plan_shards(&mut source, 0..8, 0).is_err());
        assert!(plan_shards(&mut source, 0..9, 2).is_err());
    }

    #[test]
    fn shards_within_a_sub_range() {
        let data = b"a\nbb\nccc\ndddd\neeeee\n";
        let mut source = SliceSource::new(data);
        let shards = plan_shards(&mut source, 5..20, 3).unwrap();
        assert_aligned(data, 5..20, &shards);
        assert_eq!(shards, vec![5..14, 14..20]);
    }

    #[test]
    fn unterminated_tail_belongs_to_last_shard() {
        let data = b"first line\nsecond line\nno newline";
        let mut source = SliceSource::new(data);
        let shards = plan_shards(&mut source, 0..data.len() as u64, 3).unwrap();
        assert_aligned(data, 0..data.len() as u64, &shards);
        assert_eq!(shards.last().unwrap().end, data.len() as u64);
    }

    #[test]
    fn chunks_cover_input() {
        let data = b"aaaa\nbbbb\ncccc\ndddd\nee";
        let mut source = SliceSource::new(data);
        assert_eq!(
            plan_chunks(&mut source, 5).unwrap(),
            vec![0..5, 5..10, 10..15, 15..20, 20..22]
        );
        assert_eq!(
            plan_chunks(&mut source, 7).unwrap(),
            vec![0..10, 10..20, 20..22]
        );
        assert_eq!(plan_chunks(&mut source, 1_000).unwrap(), vec![0..22]);
        assert!(plan_chunks(&mut SliceSource::new(b""), 4).unwrap().is_empty());
    }

    #[test]
    fn file_source_matches_slice_source() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("records.txt");
        let data: Vec<u8> = (0..500)
            .flat_map(|i| format!("record {i} {}\n", "w ".repeat(i % 13)).into_bytes())
            .collect();
        fs::write(&path, &data).expect("write records");

        let mut file_source = FileSource::open(&path).expect("open source");
        let mut slice_source = SliceSource::new(&data);
        assert_eq!(file_source.len(), data.len() as u64);
        for workers in [1, 2, 3, 7, 16] {
            let from_file = plan_shards(&mut file_source, 0..data.len() as u64, workers).unwrap();
            let from_slice =
                plan_shards(&mut slice_source, 0..data.len() as u64, workers).unwrap();
            assert_eq!(from_file, from_slice);
            assert_aligned(&data, 0..data.len() as u64, &from_file);
        }
        assert_eq!(
            plan_chunks(&mut file_source, 1000).unwrap(),
            plan_chunks(&mut slice_source, 1000).unwrap()
        );
    }

    #[test]
    fn open_missing_file_is_input_error() {
        let dir = tempdir().expect("tempdir");
        let err = FileSource::open(dir.path().join("missing.txt")).expect_err("missing input");
        assert!(matches!(err, TallyError::OpenInput { .. }));
    }

    #[test]
    fn effective_workers_respects_minimum_shard_size() {
        assert_eq!(effective_workers(100, 8, 4096), 1);
        assert_eq!(effective_workers(3 * 4096, 8, 4096), 3);
        assert_eq!(effective_workers(1 << 30, 8, 4096), 8);
        assert_eq!(effective_workers(10, 8, 0), 8);
    }
}
