use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use super::error::LogWriterError;
use super::packet::DecodedPacket;

/// Field separator of the event logs. Fixed for a whole run; files written with different
/// delimiters should not be concatenated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Delimiter {
    #[default]
    Comma,
    Tab,
}

impl Delimiter {
    pub fn as_char(&self) -> char {
        match self {
            Delimiter::Comma => ',',
            Delimiter::Tab => '\t',
        }
    }
}

/// What to do when a channel log for this run identifier already has data in it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExistingLogPolicy {
    /// Keep appending. Two runs with the same identifier end up interleaved in one file.
    #[default]
    Append,
    /// Fail at startup
    Refuse,
}

/// One row of a channel log: a single photon event
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OutputRecord {
    pub packet_number: u32,
    /// Seconds since the start of acquisition
    pub timestamp: f64,
    pub x: u32,
    pub y: u32,
    pub pulse_height: u32,
    /// Event count from the packet header
    pub event_count: u32,
}

impl OutputRecord {
    /// Write the record as one delimited line (with newline) into buffer
    pub fn write_line(&self, buffer: &mut String, delimiter: Delimiter) {
        let d = delimiter.as_char();
        buffer.push_str(&format!(
            "{}{d}{}{d}{}{d}{}{d}{}{d}{}\n",
            self.packet_number, self.timestamp, self.x, self.y, self.pulse_height, self.event_count
        ));
    }

    /// Parse one line of a channel log
    pub fn parse(line: &str, delimiter: Delimiter) -> Result<Self, LogWriterError> {
        let bad_record = || LogWriterError::BadRecord(line.to_string());
        let entries: Vec<&str> = line
            .trim_end_matches(&['\r', '\n'][..])
            .split(delimiter.as_char())
            .map(|entry| entry.trim())
            .collect();
        if entries.len() != 6 {
            return Err(bad_record());
        }
        Ok(Self {
            packet_number: entries[0].parse().map_err(|_| bad_record())?,
            timestamp: entries[1].parse().map_err(|_| bad_record())?,
            x: entries[2].parse().map_err(|_| bad_record())?,
            y: entries[3].parse().map_err(|_| bad_record())?,
            pulse_height: entries[4].parse().map_err(|_| bad_record())?,
            event_count: entries[5].parse().map_err(|_| bad_record())?,
        })
    }
}

/// Expand a decoded packet into one record per event
pub fn records_from_packet(packet: &DecodedPacket, arrival_time: f64) -> Vec<OutputRecord> {
    packet
        .events
        .iter()
        .map(|event| OutputRecord {
            packet_number: packet.packet_number,
            timestamp: arrival_time,
            x: event.x,
            y: event.y,
            pulse_height: event.pulse_height,
            event_count: packet.event_count,
        })
        .collect()
}

/// Destination for the events of one channel.
///
/// `append` must either persist the whole batch or return an error; the pipeline treats
/// any error as fatal.
pub trait EventSink: Send {
    fn append(&mut self, records: &[OutputRecord]) -> Result<(), LogWriterError>;

    /// Total bytes accepted by this sink during this run
    fn bytes_written(&self) -> u64;

    /// Human readable name of the destination, for diagnostics
    fn describe(&self) -> String;
}

/// Append-only delimited text log for one channel.
///
/// Every append is a single write of the whole batch followed by a flush, so the file can
/// be followed with `tail -f` while acquisition is running.
#[derive(Debug)]
pub struct EventLogWriter {
    file: BufWriter<File>,
    path: PathBuf,
    delimiter: Delimiter,
    sync_to_disk: bool,
    bytes_written: u64,
}

impl EventLogWriter {
    /// Open (creating if needed) the log at path for appending.
    pub fn open(
        path: &Path,
        delimiter: Delimiter,
        policy: ExistingLogPolicy,
        sync_to_disk: bool,
    ) -> Result<Self, LogWriterError> {
        let existing_size = match path.metadata() {
            Ok(meta) => meta.len(),
            Err(_) => 0,
        };
        if existing_size > 0 {
            match policy {
                ExistingLogPolicy::Refuse => {
                    return Err(LogWriterError::ExistingLog(path.to_path_buf()))
                }
                ExistingLogPolicy::Append => spdlog::warn!(
                    "Log {} already holds {} of data; this run will be appended to it",
                    path.to_string_lossy(),
                    human_bytes::human_bytes(existing_size as f64)
                ),
            }
        }

        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: BufWriter::new(file),
            path: path.to_path_buf(),
            delimiter,
            sync_to_disk,
            bytes_written: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl EventSink for EventLogWriter {
    fn append(&mut self, records: &[OutputRecord]) -> Result<(), LogWriterError> {
        if records.is_empty() {
            return Ok(());
        }
        let mut batch = String::new();
        for record in records {
            record.write_line(&mut batch, self.delimiter);
        }
        self.file.write_all(batch.as_bytes())?;
        self.file.flush()?;
        if self.sync_to_disk {
            self.file.get_ref().sync_data()?;
        }
        self.bytes_written += batch.len() as u64;
        Ok(())
    }

    fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    fn describe(&self) -> String {
        self.path.to_string_lossy().to_string()
    }
}

/// Read back every record of a channel log
pub fn read_log(path: &Path, delimiter: Delimiter) -> Result<Vec<OutputRecord>, LogWriterError> {
    let reader = BufReader::new(File::open(path)?);
    let mut records = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        records.push(OutputRecord::parse(&line, delimiter)?);
    }
    Ok(records)
}
