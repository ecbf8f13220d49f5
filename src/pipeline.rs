//! End-to-end orchestration: chunking, parallel scanning, ordered median tracking, output.

use std::fs::File;
use std::io::Write;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::time::Instant;

use log::{debug, info};
use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::{Deserialize, Serialize};

use crate::config::{AggregationStrategy, PipelineBuilder, PipelineConfig};
use crate::error::{Result, TallyError};
use crate::frequency::FrequencyTable;
use crate::median::{HalfValue, RunningMedian};
use crate::scan::scan_chunk;
use crate::shard::{effective_workers, plan_chunks, plan_shards, BoundarySource, FileSource};
use crate::sink::{FileSink, Sink};

/// Runs the word tally over an input file.
#[derive(Debug, Clone)]
pub struct Pipeline {
    cfg: PipelineConfig,
}

/// Shards planned for one chunk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChunkPlan {
    /// Byte range of the chunk.
    pub range: Range<u64>,
    /// Record-aligned shards covering the chunk.
    pub shards: Vec<Range<u64>>,
}

/// Chunk and shard layout for an input, computed without scanning records.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunPlan {
    /// Size of the input in bytes.
    pub input_bytes: u64,
    /// Planned chunks in file order.
    pub chunks: Vec<ChunkPlan>,
}

/// Summary of a completed run.
#[must_use]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunSummary {
    /// Input file that was processed.
    pub input: PathBuf,
    /// Size of the input in bytes.
    pub input_bytes: u64,
    /// Records processed, one median emitted per record.
    pub records: u64,
    /// Distinct tokens in the frequency table.
    pub distinct_tokens: usize,
    /// Token occurrences across the input.
    pub total_tokens: u64,
    /// Chunks processed.
    pub chunks: usize,
    /// Shards scanned across all chunks.
    pub shards: usize,
    /// Configured worker count.
    pub workers: usize,
    /// Frequency aggregation strategy in effect.
    pub strategy: AggregationStrategy,
    /// Records cut down to the maximum length.
    pub truncated_records: u64,
    /// Running median after the final record.
    pub final_median: Option<HalfValue>,
    /// Wall-clock duration in milliseconds.
    pub elapsed_ms: u64,
}

impl RunSummary {
    /// Writes the summary as pretty-printed JSON.
    pub fn write_json<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let mut file = File::create(path).map_err(|source| TallyError::CreateOutput {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::to_writer_pretty(&mut file, self)?;
        file.write_all(b"\n")
            .map_err(|err| TallyError::io(err, Some(path.to_path_buf())))?;
        Ok(())
    }
}

impl Pipeline {
    /// Creates a pipeline for the supplied configuration.
    #[must_use]
    pub fn new(cfg: PipelineConfig) -> Self {
        Self { cfg }
    }

    /// Returns a [`PipelineBuilder`] with default settings.
    #[must_use]
    pub fn builder() -> PipelineBuilder {
        PipelineConfig::builder()
    }

    /// Returns an immutable reference to the underlying configuration.
    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.cfg
    }

    /// Computes the chunk and shard layout for `input`.
    pub fn plan<P: AsRef<Path>>(&self, input: P) -> Result<RunPlan> {
        self.cfg.validate()?;
        let mut source = FileSource::open(input)?;
        let input_bytes = source.len();
        let chunks = plan_chunks(&mut source, self.cfg.chunk_size)?
            .into_iter()
            .map(|range| {
                let workers = self.workers_for(&range);
                let shards = plan_shards(&mut source, range.clone(), workers)?;
                Ok(ChunkPlan { range, shards })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(RunPlan {
            input_bytes,
            chunks,
        })
    }

    /// Processes `input`, creating (or truncating) both output files before scanning.
    pub fn run_to_files<P, F, M>(&self, input: P, frequencies: F, medians: M) -> Result<RunSummary>
    where
        P: AsRef<Path>,
        F: AsRef<Path>,
        M: AsRef<Path>,
    {
        self.cfg.validate()?;
        let source = FileSource::open(input)?;
        let mut sink = FileSink::create(frequencies, medians)?;
        self.execute(source, &mut sink)
    }

    /// Processes `input`, handing medians and the final frequency table to `sink`.
    pub fn run<P, S>(&self, input: P, sink: &mut S) -> Result<RunSummary>
    where
        P: AsRef<Path>,
        S: Sink + ?Sized,
    {
        self.cfg.validate()?;
        let source = FileSource::open(input)?;
        self.execute(source, sink)
    }

    fn workers_for(&self, range: &Range<u64>) -> usize {
        effective_workers(
            range.end - range.start,
            self.cfg.workers,
            self.cfg.min_shard_bytes,
        )
    }

    fn build_pool(&self) -> Result<ThreadPool> {
        ThreadPoolBuilder::new()
            .num_threads(self.cfg.workers)
            .thread_name(|idx| format!("wordtally-scan-{idx}"))
            .build()
            .map_err(|err| TallyError::Internal(format!("unable to build thread pool: {err}")))
    }

    fn execute<S>(&self, mut source: FileSource, sink: &mut S) -> Result<RunSummary>
    where
        S: Sink + ?Sized,
    {
        let started = Instant::now();
        let input_bytes = source.len();
        let chunks = plan_chunks(&mut source, self.cfg.chunk_size)?;
        info!(
            "processing {} ({:.2} MiB) in {} chunk(s) with up to {} worker(s)",
            source.path().display(),
            bytes_to_mebibytes(input_bytes),
            chunks.len(),
            self.cfg.workers
        );

        let pool = self.build_pool()?;
        let mut tracker = RunningMedian::new(self.cfg.max_unique_count());
        let mut frequencies = FrequencyTable::new();
        let mut series: Vec<HalfValue> = Vec::new();
        let mut shard_total = 0usize;
        let mut truncated = 0u64;

        for (idx, chunk) in chunks.iter().enumerate() {
            let workers = self.workers_for(chunk);
            let shards = plan_shards(&mut source, chunk.clone(), workers)?;
            debug!("chunk {} shards: {:?}", idx + 1, shards);
            shard_total += shards.len();

            let scan = scan_chunk(&pool, source.path(), &shards, &self.cfg)?;
            truncated += scan.truncated;
            frequencies.merge(scan.frequencies);

            series.clear();
            tracker.extend(scan.counts.iter().map(|&count| usize::from(count)), &mut series)?;
            sink.write_medians(&series)?;

            if chunks.len() > 1 {
                info!(
                    "chunk {}/{}: {} records, {} total, running median {}",
                    idx + 1,
                    chunks.len(),
                    series.len(),
                    tracker.records(),
                    tracker
                        .current()
                        .map_or_else(|| "-".to_string(), |median| median.to_string())
                );
            }
        }

        sink.write_frequencies(&frequencies)?;
        sink.finish()?;

        let summary = RunSummary {
            input: source.path().to_path_buf(),
            input_bytes,
            records: tracker.records(),
            distinct_tokens: frequencies.len(),
            total_tokens: frequencies.total_occurrences(),
            chunks: chunks.len(),
            shards: shard_total,
            workers: self.cfg.workers,
            strategy: self.cfg.strategy,
            truncated_records: truncated,
            final_median: tracker.current(),
            elapsed_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        };
        info!(
            "completed {} records, {} distinct tokens in {} ms",
            summary.records, summary.distinct_tokens, summary.elapsed_ms
        );
        Ok(summary)
    }
}

#[must_use]
fn bytes_to_mebibytes(bytes: u64) -> f64 {
    bytes as f64 / (1024.0 * 1024.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OverlongPolicy;
    use crate::sink::MemorySink;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::fs;
    use tempfile::{tempdir, TempDir};

    const WORDS: &[&str] = &[
        "the", "a", "rust", "median", "Rust", "#tag", "@user", "http://t.co/x", "ok", "ok!",
    ];

    fn corpus(seed: u64, records: usize) -> Vec<u8> {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut data = Vec::new();
        for _ in 0..records {
            let words = rng.gen_range(0..14);
            let mut line = String::new();
            for w in 0..words {
                if w > 0 {
                    line.push_str(if rng.gen_bool(0.2) { " \t " } else { " " });
                }
                line.push_str(WORDS[rng.gen_range(0..WORDS.len())]);
            }
            data.extend_from_slice(line.as_bytes());
            data.push(b'\n');
        }
        data
    }

    fn write_input(data: &[u8]) -> (TempDir, PathBuf) {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("input.txt");
        fs::write(&path, data).expect("write input");
        (dir, path)
    }

    fn pipeline(workers: usize, chunk_size: u64, strategy: AggregationStrategy) -> Pipeline {
        Pipeline::new(
            Pipeline::builder()
                .workers(workers)
                .chunk_size(chunk_size)
                .min_shard_bytes(0)
                .strategy(strategy)
                .build()
                .expect("valid config"),
        )
    }

    fn run(pipeline: &Pipeline, path: &Path) -> (RunSummary, MemorySink) {
        let mut sink = MemorySink::new();
        let summary = pipeline.run(path, &mut sink).expect("run succeeds");
        (summary, sink)
    }

    #[test]
    fn worker_count_and_strategy_do_not_change_outputs() {
        let (_dir, path) = write_input(&corpus(1, 3_000));
        let (base_summary, base) = run(&pipeline(1, 1 << 30, AggregationStrategy::ShardLocal), &path);
        assert_eq!(base_summary.records, 3_000);
        assert_eq!(base.medians.len(), 3_000);

        for strategy in [AggregationStrategy::ShardLocal, AggregationStrategy::SharedLock] {
            for workers in [2, 3, 8] {
                let (summary, sink) = run(&pipeline(workers, 1 << 30, strategy), &path);
                assert_eq!(sink.medians_text(), base.medians_text());
                assert_eq!(sink.frequencies, base.frequencies);
                assert_eq!(summary.records, base_summary.records);
                assert!(summary.shards >= 1 && summary.shards <= workers);
            }
        }
    }

    #[test]
    fn chunking_is_transparent() {
        let data = corpus(2, 2_000);
        let (_dir, path) = write_input(&data);
        let (_, whole) = run(&pipeline(4, 1 << 30, AggregationStrategy::ShardLocal), &path);
        for chunk_size in [1, 97, 4096] {
            let (summary, chunked) =
                run(&pipeline(4, chunk_size, AggregationStrategy::ShardLocal), &path);
            assert!(summary.chunks > 1);
            assert_eq!(chunked.batches, summary.chunks);
            assert_eq!(chunked.medians, whole.medians);
            assert_eq!(chunked.frequencies, whole.frequencies);
        }
    }

    #[test]
    fn medians_follow_reference_sequence() {
        let lines = [
            "a b", "c d", "e f", "a b c", "x y z", "p q r", "1 2 3", "1 2 3 4", "1 2 3 4 5",
            "5 4 3 2 1", "1 2 3 4 5 6",
        ];
        let data: String = lines.iter().map(|line| format!("{line}\n")).collect();
        let (_dir, path) = write_input(data.as_bytes());
        let (summary, sink) = run(&pipeline(3, 16, AggregationStrategy::ShardLocal), &path);
        assert_eq!(
            sink.medians_text(),
            "2.0\n2.0\n2.0\n2.0\n2.0\n2.5\n3.0\n3.0\n3.0\n3.0\n3.0\n"
        );
        assert_eq!(summary.final_median, Some(HalfValue::whole(3)));
    }

    #[test]
    fn identical_records_repeat_their_count() {
        let data = "to be or not to be\n".repeat(25);
        let (_dir, path) = write_input(data.as_bytes());
        let (_, sink) = run(&pipeline(4, 1 << 30, AggregationStrategy::SharedLock), &path);
        assert_eq!(sink.medians_text(), "4.0\n".repeat(25));
        let rendered = String::from_utf8(sink.frequencies.unwrap()).unwrap();
        assert_eq!(rendered, "be\t50\nnot\t25\nor\t25\nto\t50\n");
    }

    #[test]
    fn run_to_files_is_idempotent() {
        let (dir, path) = write_input(&corpus(3, 500));
        let freq = dir.path().join("out").join("freq.txt");
        let medians = dir.path().join("out").join("medians.txt");
        let pipeline = pipeline(3, 512, AggregationStrategy::ShardLocal);

        pipeline.run_to_files(&path, &freq, &medians).unwrap();
        let first = (fs::read(&freq).unwrap(), fs::read(&medians).unwrap());
        pipeline.run_to_files(&path, &freq, &medians).unwrap();
        let second = (fs::read(&freq).unwrap(), fs::read(&medians).unwrap());
        assert_eq!(first, second);
        assert_eq!(
            String::from_utf8(first.1).unwrap().lines().count(),
            500,
            "one median line per record"
        );
    }

    #[test]
    fn empty_and_blank_inputs() {
        let (_dir, path) = write_input(b"");
        let (summary, sink) = run(&pipeline(2, 64, AggregationStrategy::ShardLocal), &path);
        assert_eq!(summary.records, 0);
        assert_eq!(summary.final_median, None);
        assert!(sink.medians.is_empty());
        assert_eq!(sink.frequencies.as_deref(), Some(&b""[..]));

        let (_dir, path) = write_input(b"\n   \n\t\n");
        let (summary, sink) = run(&pipeline(2, 64, AggregationStrategy::ShardLocal), &path);
        assert_eq!(summary.records, 3);
        assert_eq!(sink.medians_text(), "0.0\n0.0\n0.0\n");
    }

    #[test]
    fn overlong_record_aborts_run_by_default() {
        let data = format!("fine\n{}\n", "x".repeat(141));
        let (_dir, path) = write_input(data.as_bytes());
        let mut sink = MemorySink::new();
        let err = pipeline(1, 1 << 20, AggregationStrategy::ShardLocal)
            .run(&path, &mut sink)
            .expect_err("record too long");
        assert!(matches!(err, TallyError::RecordTooLong { offset: 5, len: 141, .. }));

        let truncating = Pipeline::new(
            Pipeline::builder()
                .workers(1)
                .overlong(OverlongPolicy::Truncate)
                .build()
                .unwrap(),
        );
        let summary = truncating.run(&path, &mut MemorySink::new()).unwrap();
        assert_eq!(summary.truncated_records, 1);
        assert_eq!(summary.records, 2);
    }

    #[test]
    fn missing_input_is_reported_before_outputs_are_created() {
        let dir = tempdir().expect("tempdir");
        let freq = dir.path().join("freq.txt");
        let err = pipeline(1, 64, AggregationStrategy::ShardLocal)
            .run_to_files(dir.path().join("absent.txt"), &freq, dir.path().join("m.txt"))
            .expect_err("missing input");
        assert!(matches!(err, TallyError::OpenInput { .. }));
        assert!(!freq.exists());
    }

    #[test]
    fn plan_matches_run_layout() {
        let (_dir, path) = write_input(&corpus(4, 800));
        let pipeline = pipeline(4, 2048, AggregationStrategy::ShardLocal);
        let plan = pipeline.plan(&path).unwrap();
        let (summary, _) = run(&pipeline, &path);
        assert_eq!(plan.chunks.len(), summary.chunks);
        assert_eq!(
            plan.chunks.iter().map(|c| c.shards.len()).sum::<usize>(),
            summary.shards
        );
        assert_eq!(plan.chunks.last().map(|c| c.range.end), Some(plan.input_bytes));
    }

    #[test]
    fn summary_round_trips_through_json() {
        let (dir, path) = write_input(&corpus(5, 50));
        let (summary, _) = run(&pipeline(2, 1 << 20, AggregationStrategy::ShardLocal), &path);
        let report = dir.path().join("report.json");
        summary.write_json(&report).unwrap();
        let parsed: RunSummary =
            serde_json::from_str(&fs::read_to_string(&report).unwrap()).unwrap();
        assert_eq!(parsed, summary);
    }
}
