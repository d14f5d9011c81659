use crate::{AgentError, AgentId, History, TerminationReason};
use relay_llm::{Message, Usage};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Closing record of a run in a transcript file.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub reason: TerminationReason,
    pub active_agent: AgentId,
    pub cost: f64,
    pub usage: Usage,
    pub elapsed_ms: u64,
    pub turns: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TranscriptRecord {
    Message(Message),
    RunEnd(RunSummary),
}

/// JSON Lines sink; each record is flushed as soon as it is written.
#[derive(Debug)]
pub struct TranscriptWriter {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl TranscriptWriter {
    /// Create (or truncate) a transcript file.
    pub fn create(path: impl AsRef<Path>) -> Result<Self, AgentError> {
        Self::open(path.as_ref(), false)
    }

    /// Open a transcript file for appending.
    pub fn append(path: impl AsRef<Path>) -> Result<Self, AgentError> {
        Self::open(path.as_ref(), true)
    }

    fn open(path: &Path, append: bool) -> Result<Self, AgentError> {
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|error| {
                AgentError::Transcript(format!(
                    "failed to create directory '{}': {error}",
                    parent.display()
                ))
            })?;
        }
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .append(append)
            .truncate(!append)
            .open(path)
            .map_err(|error| {
                AgentError::Transcript(format!(
                    "failed to open transcript '{}': {error}",
                    path.display()
                ))
            })?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write_message(&mut self, message: &Message) -> Result<(), AgentError> {
        self.write_record(&TranscriptRecord::Message(message.clone()))
    }

    pub fn write_run_end(&mut self, summary: &RunSummary) -> Result<(), AgentError> {
        self.write_record(&TranscriptRecord::RunEnd(summary.clone()))
    }

    pub fn write_record(&mut self, record: &TranscriptRecord) -> Result<(), AgentError> {
        serde_json::to_writer(&mut self.writer, record).map_err(|error| {
            AgentError::Transcript(format!("failed to encode transcript record: {error}"))
        })?;
        self.writer
            .write_all(b"\n")
            .and_then(|_| self.writer.flush())
            .map_err(|error| {
                AgentError::Transcript(format!(
                    "failed to write transcript '{}': {error}",
                    self.path.display()
                ))
            })
    }
}

/// A replayed transcript: the message log and the last run summary, if the
/// run finished.
#[derive(Clone, Debug, PartialEq)]
pub struct Transcript {
    pub history: History,
    pub summary: Option<RunSummary>,
}

pub fn read_transcript(path: impl AsRef<Path>) -> Result<Transcript, AgentError> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|error| {
        AgentError::Transcript(format!(
            "failed to open transcript '{}': {error}",
            path.display()
        ))
    })?;

    let mut messages = Vec::new();
    let mut summary = None;
    for (line_no, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|error| {
            AgentError::Transcript(format!(
                "failed to read transcript '{}': {error}",
                path.display()
            ))
        })?;
        if line.trim().is_empty() {
            continue;
        }
        let record: TranscriptRecord = serde_json::from_str(&line).map_err(|error| {
            AgentError::Transcript(format!(
                "malformed record on line {} of '{}': {error}",
                line_no + 1,
                path.display()
            ))
        })?;
        match record {
            TranscriptRecord::Message(message) => messages.push(message),
            TranscriptRecord::RunEnd(run_end) => summary = Some(run_end),
        }
    }

    Ok(Transcript {
        history: History::replay(messages)?,
        summary,
    })
}
