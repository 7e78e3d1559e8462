//! Append-only queue journal
//!
//! The journal makes the queue survive process restarts. It is a JSON Lines
//! file with one record per line:
//!
//! ```text
//! {"op":"enqueued","seq":1,"event":{...}}
//! {"op":"acked","seq":1}
//! ```
//!
//! Every append is followed by `sync_data`, so an accepted event is on disk
//! before the accept response leaves the gateway. On open the journal is
//! replayed; a torn final line from a crash mid-write is skipped. The file is
//! then compacted down to the still-pending records, and the owning queue
//! compacts it again whenever enough acks have accumulated.
//!
//! All methods do blocking file I/O.

use crate::error::StoreError;
use crate::event::Event;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

/// One journal line
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum JournalRecord {
    Enqueued { seq: u64, event: Event },
    Acked { seq: u64 },
}

/// State recovered from a journal
#[derive(Debug, Default)]
pub struct Replay {
    /// Un-acknowledged events in sequence order
    pub pending: Vec<(u64, Event)>,
    /// Highest sequence number seen
    pub last_seq: u64,
    /// Lines that could not be decoded
    pub skipped: usize,
}

/// Writer half of the journal
pub struct Journal {
    file: File,
    path: PathBuf,
    acks_since_compaction: u64,
}

impl Journal {
    /// Open (or create) a journal, replay it and compact it
    pub fn open(path: impl AsRef<Path>) -> Result<(Self, Replay), StoreError> {
        let path = path.as_ref().to_path_buf();
        let replay = if path.exists() {
            Self::replay(&path)?
        } else {
            Replay::default()
        };

        Self::compact(&path, &replay.pending)?;

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok((
            Self {
                file,
                path,
                acks_since_compaction: 0,
            },
            replay,
        ))
    }

    /// Read a journal without modifying it
    pub fn replay(path: &Path) -> Result<Replay, StoreError> {
        let reader = BufReader::new(File::open(path)?);
        let mut pending: BTreeMap<u64, Event> = BTreeMap::new();
        let mut replay = Replay::default();

        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<JournalRecord>(&line) {
                Ok(JournalRecord::Enqueued { seq, event }) => {
                    replay.last_seq = replay.last_seq.max(seq);
                    pending.insert(seq, event);
                }
                Ok(JournalRecord::Acked { seq }) => {
                    replay.last_seq = replay.last_seq.max(seq);
                    pending.remove(&seq);
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping unreadable journal line");
                    replay.skipped += 1;
                }
            }
        }

        replay.pending = pending.into_iter().collect();
        Ok(replay)
    }

    /// Rewrite the journal with only `pending` records
    fn compact(path: &Path, pending: &[(u64, Event)]) -> Result<(), StoreError> {
        let tmp = path.with_extension("compact");
        {
            let mut out = File::create(&tmp)?;
            for (seq, event) in pending {
                let record = JournalRecord::Enqueued {
                    seq: *seq,
                    event: event.clone(),
                };
                let line = serde_json::to_string(&record)
                    .map_err(|e| StoreError::Corrupt(e.to_string()))?;
                writeln!(out, "{line}")?;
            }
            out.sync_all()?;
        }
        fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Append a record and flush it to disk
    pub fn append(&mut self, record: &JournalRecord) -> Result<(), StoreError> {
        let line =
            serde_json::to_string(record).map_err(|e| StoreError::Corrupt(e.to_string()))?;
        writeln!(self.file, "{line}")?;
        self.file.sync_data()?;
        if matches!(record, JournalRecord::Acked { .. }) {
            self.acks_since_compaction += 1;
        }
        Ok(())
    }

    /// Ack records written since the file was last compacted
    pub fn acks_since_compaction(&self) -> u64 {
        self.acks_since_compaction
    }

    /// Replace the file with only `pending` records and keep appending to it
    pub fn compact_to(&mut self, pending: &[(u64, Event)]) -> Result<(), StoreError> {
        Self::compact(&self.path, pending)?;
        self.file = OpenOptions::new().append(true).open(&self.path)?;
        self.acks_since_compaction = 0;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
