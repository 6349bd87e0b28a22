//! Raw tagged-stream container writer.
//!
//! Layout: one `SRAW <mux config json>` header line, then one record per unit:
//! a `V|A <pts> <duration> <keyframe> <len>` line followed by `len` payload
//! bytes and a newline. Streams are interleaved in write order.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use steadyrec_common::error::{RecorderError, RecorderResult};

use crate::media::{EncodedUnit, MuxConfig};
use crate::pipeline::MediaWriter;

const MAGIC: &str = "SRAW";
pub const SRAW_EXTENSION: &str = "sraw";

/// Flush to disk every this many records.
const FLUSH_EVERY: u64 = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Video,
    Audio,
}

impl StreamKind {
    fn tag(self) -> char {
        match self {
            StreamKind::Video => 'V',
            StreamKind::Audio => 'A',
        }
    }

    fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "V" => Some(StreamKind::Video),
            "A" => Some(StreamKind::Audio),
            _ => None,
        }
    }
}

struct OpenFile {
    writer: BufWriter<File>,
    partial: PathBuf,
    final_path: PathBuf,
}

/// [`MediaWriter`] producing `.sraw` files.
#[derive(Default)]
pub struct FileWriter {
    open: Option<OpenFile>,
    records_written: u64,
}

impl FileWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records_written(&self) -> u64 {
        self.records_written
    }

    fn write_record(&mut self, kind: StreamKind, unit: &EncodedUnit) -> RecorderResult<()> {
        let Some(open) = self.open.as_mut() else {
            return Err(RecorderError::writer("Writer is not initialized"));
        };

        let header = format!(
            "{} {} {} {} {}\n",
            kind.tag(),
            unit.pts,
            unit.duration,
            u8::from(unit.keyframe),
            unit.data.len()
        );
        open.writer
            .write_all(header.as_bytes())
            .and_then(|()| open.writer.write_all(&unit.data))
            .and_then(|()| open.writer.write_all(b"\n"))
            .map_err(|e| RecorderError::writer(format!("Failed to write record: {e}")))?;

        self.records_written += 1;
        if self.records_written % FLUSH_EVERY == 0 {
            open.writer
                .flush()
                .map_err(|e| RecorderError::writer(format!("Failed to flush: {e}")))?;
        }
        Ok(())
    }
}

impl MediaWriter for FileWriter {
    fn container_extension(&self) -> &'static str {
        SRAW_EXTENSION
    }

    fn initialize(
        &mut self,
        partial_path: &Path,
        final_path: &Path,
        config: &MuxConfig,
    ) -> RecorderResult<()> {
        if self.open.is_some() {
            return Err(RecorderError::writer("Writer is already initialized"));
        }
        if let Some(parent) = partial_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(partial_path)
            .map_err(|e| {
                RecorderError::writer(format!(
                    "Cannot open {}: {e}",
                    partial_path.display()
                ))
            })?;
        let mut writer = BufWriter::new(file);

        let header_json = serde_json::to_string(config)?;
        writeln!(writer, "{MAGIC} {header_json}")
            .map_err(|e| RecorderError::writer(format!("Failed to write header: {e}")))?;

        self.open = Some(OpenFile {
            writer,
            partial: partial_path.to_path_buf(),
            final_path: final_path.to_path_buf(),
        });
        self.records_written = 0;
        tracing::info!(path = %partial_path.display(), "Writer opened");
        Ok(())
    }

    fn write_video(&mut self, unit: EncodedUnit) -> RecorderResult<()> {
        self.write_record(StreamKind::Video, &unit)
    }

    fn write_audio(&mut self, unit: EncodedUnit) -> RecorderResult<()> {
        self.write_record(StreamKind::Audio, &unit)
    }

    fn finalize(&mut self) -> RecorderResult<bool> {
        let Some(mut open) = self.open.take() else {
            return Ok(false);
        };

        open.writer
            .flush()
            .map_err(|e| RecorderError::writer(format!("Failed to flush: {e}")))?;
        drop(open.writer);

        std::fs::rename(&open.partial, &open.final_path).map_err(|e| {
            RecorderError::writer(format!(
                "Cannot move {} to {}: {e}",
                open.partial.display(),
                open.final_path.display()
            ))
        })?;
        tracing::info!(
            path = %open.final_path.display(),
            records = self.records_written,
            "Recording finalized"
        );
        Ok(true)
    }

    fn discard(&mut self) -> RecorderResult<()> {
        let Some(open) = self.open.take() else {
            return Ok(());
        };
        drop(open.writer);
        match std::fs::remove_file(&open.partial) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        tracing::info!(path = %open.partial.display(), "Partial recording discarded");
        Ok(())
    }
}

/// One record read back from a `.sraw` file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SrawRecord {
    pub kind: StreamKind,
    pub pts: i64,
    pub duration: i64,
    pub keyframe: bool,
    pub data: Vec<u8>,
}

/// Parsed `.sraw` file.
#[derive(Debug, Clone)]
pub struct SrawStream {
    pub config: MuxConfig,
    pub records: Vec<SrawRecord>,
}

impl SrawStream {
    pub fn read(path: &Path) -> RecorderResult<Self> {
        let file = File::open(path).map_err(|_| RecorderError::FileNotFound {
            path: path.to_path_buf(),
        })?;
        let mut reader = BufReader::new(file);

        let mut line = String::new();
        reader.read_line(&mut line)?;
        let header = line
            .trim_end()
            .strip_prefix(MAGIC)
            .ok_or_else(|| RecorderError::writer("Missing SRAW header"))?;
        let config: MuxConfig = serde_json::from_str(header.trim())?;

        let mut records = Vec::new();
        loop {
            line.clear();
            if reader.read_line(&mut line)? == 0 {
                break;
            }
            let record = parse_record_header(line.trim_end())
                .ok_or_else(|| RecorderError::writer(format!("Bad record header: {line:?}")))?;
            let (kind, pts, duration, keyframe, len) = record;

            let mut data = vec![0; len];
            reader.read_exact(&mut data)?;
            let mut newline = [0u8; 1];
            reader.read_exact(&mut newline)?;

            records.push(SrawRecord {
                kind,
                pts,
                duration,
                keyframe,
                data,
            });
        }

        Ok(Self { config, records })
    }

    pub fn video(&self) -> impl Iterator<Item = &SrawRecord> {
        self.records.iter().filter(|r| r.kind == StreamKind::Video)
    }

    pub fn audio(&self) -> impl Iterator<Item = &SrawRecord> {
        self.records.iter().filter(|r| r.kind == StreamKind::Audio)
    }
}

fn parse_record_header(line: &str) -> Option<(StreamKind, i64, i64, bool, usize)> {
    let mut parts = line.split(' ');
    let kind = StreamKind::from_tag(parts.next()?)?;
    let pts = parts.next()?.parse().ok()?;
    let duration = parts.next()?.parse().ok()?;
    let keyframe = parts.next()? == "1";
    let len = parts.next()?.parse().ok()?;
    Some((kind, pts, duration, keyframe, len))
}
