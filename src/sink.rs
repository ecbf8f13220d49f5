//! Destinations for the median series and the final frequency table.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::{Result, TallyError};
use crate::frequency::FrequencyTable;
use crate::median::HalfValue;

/// Receives already ordered, already finalised results.
pub trait Sink {
    /// Appends a batch of running medians, one per record, in record order.
    fn write_medians(&mut self, medians: &[HalfValue]) -> Result<()>;

    /// Stores the complete frequency table. Called once, after every record was processed.
    fn write_frequencies(&mut self, table: &FrequencyTable) -> Result<()>;

    /// Flushes any buffered output.
    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Writes `token<TAB>count` lines in byte order.
pub fn write_frequency_lines<W: Write>(writer: &mut W, table: &FrequencyTable) -> std::io::Result<()> {
    for (token, count) in table.sorted() {
        writer.write_all(token)?;
        writeln!(writer, "\t{count}")?;
    }
    Ok(())
}

/// Writes one `N.0` / `N.5` line per median.
pub fn write_median_lines<W: Write>(writer: &mut W, medians: &[HalfValue]) -> std::io::Result<()> {
    for median in medians {
        writeln!(writer, "{median}")?;
    }
    Ok(())
}

/// File-backed sink. Both destinations are created (or truncated) when the sink is built.
#[derive(Debug)]
pub struct FileSink {
    frequencies_path: PathBuf,
    medians_path: PathBuf,
    frequencies: Option<File>,
    medians: BufWriter<File>,
}

impl FileSink {
    /// Creates or truncates both output files, creating parent directories as needed.
    pub fn create<P, Q>(frequencies_path: P, medians_path: Q) -> Result<Self>
    where
        P: AsRef<Path>,
        Q: AsRef<Path>,
    {
        let frequencies_path = frequencies_path.as_ref().to_path_buf();
        let medians_path = medians_path.as_ref().to_path_buf();
        let frequencies = create_output(&frequencies_path)?;
        let medians = BufWriter::new(create_output(&medians_path)?);
        Ok(Self {
            frequencies_path,
            medians_path,
            frequencies: Some(frequencies),
            medians,
        })
    }

    /// Destination of the frequency table.
    #[must_use]
    pub fn frequencies_path(&self) -> &Path {
        &self.frequencies_path
    }

    /// Destination of the median series.
    #[must_use]
    pub fn medians_path(&self) -> &Path {
        &self.medians_path
    }
}

fn create_output(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|source| TallyError::CreateOutput {
                path: path.to_path_buf(),
                source,
            })?;
        }
    }
    File::create(path).map_err(|source| TallyError::CreateOutput {
        path: path.to_path_buf(),
        source,
    })
}

impl Sink for FileSink {
    fn write_medians(&mut self, medians: &[HalfValue]) -> Result<()> {
        write_median_lines(&mut self.medians, medians)
            .and_then(|()| self.medians.flush())
            .map_err(|err| TallyError::io(err, Some(self.medians_path.clone())))
    }

    fn write_frequencies(&mut self, table: &FrequencyTable) -> Result<()> {
        let file = self.frequencies.take().ok_or_else(|| {
            TallyError::Internal("frequency table already written".into())
        })?;
        let mut writer = BufWriter::new(file);
        write_frequency_lines(&mut writer, table)
            .and_then(|()| writer.flush())
            .map_err(|err| TallyError::io(err, Some(self.frequencies_path.clone())))
    }

    fn finish(&mut self) -> Result<()> {
        self.medians
            .flush()
            .map_err(|err| TallyError::io(err, Some(self.medians_path.clone())))
    }
}

/// In-memory sink holding the rendered outputs.
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    /// Every median received, in order.
    pub medians: Vec<HalfValue>,
    /// Number of median batches received.
    pub batches: usize,
    /// Rendered frequency table, if written.
    pub frequencies: Option<Vec<u8>>,
}

impl MemorySink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Median series rendered exactly as the file sink writes it.
    #[must_use]
    pub fn medians_text(&self) -> String {
        self.medians.iter().map(|median| format!("{median}\n")).collect()
    }
}

impl Sink for MemorySink {
    fn write_medians(&mut self, medians: &[HalfValue]) -> Result<()> {
        self.medians.extend_from_slice(medians);
        self.batches += 1;
        Ok(())
    }

    fn write_frequencies(&mut self, table: &FrequencyTable) -> Result<()> {
        let mut rendered = Vec::new();
        write_frequency_lines(&mut rendered, table).map_err(|err| TallyError::io(err, None))?;
        self.frequencies = Some(rendered);
        Ok(())
    }
}
