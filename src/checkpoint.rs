use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fs;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::PathBuf;
use std::sync::Mutex;

use crate::models::Message;

/// External persistence for conversation threads. The engine only needs to
/// load prior state when a run starts and persist the new state when it
/// ends; everything else (retention, indexing) lives behind this trait.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn load(&self, thread_id: &str) -> Result<Option<Vec<Message>>>;
    async fn persist(&self, thread_id: &str, messages: &[Message]) -> Result<()>;
}

/// In-memory store, useful for tests and single-process sessions.
#[derive(Default)]
pub struct MemoryCheckpoint {
    threads: Mutex<HashMap<String, Vec<Message>>>,
}

impl MemoryCheckpoint {
    pub fn new() -> Self {
        MemoryCheckpoint::default()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpoint {
    async fn load(&self, thread_id: &str) -> Result<Option<Vec<Message>>> {
        Ok(self.threads.lock().unwrap().get(thread_id).cloned())
    }

    async fn persist(&self, thread_id: &str, messages: &[Message]) -> Result<()> {
        self.threads
            .lock()
            .unwrap()
            .insert(thread_id.to_string(), messages.to_vec());
        Ok(())
    }
}

/// File-backed store: one JSON-lines file per thread.
pub struct FileCheckpoint {
    dir: PathBuf,
}

impl FileCheckpoint {
    pub fn new(dir: PathBuf) -> Result<Self> {
        if !dir.exists() {
            fs::create_dir_all(&dir)?;
        }
        Ok(FileCheckpoint { dir })
    }

    /// Store under ~/.config/drover/sessions
    pub fn default_dir() -> Result<Self> {
        let home_dir =
            dirs::home_dir().ok_or_else(|| anyhow::anyhow!("Could not determine home directory"))?;
        Self::new(home_dir.join(".config").join("drover").join("sessions"))
    }

    fn path(&self, thread_id: &str) -> PathBuf {
        self.dir.join(format!("{}.jsonl", thread_id))
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpoint {
    async fn load(&self, thread_id: &str) -> Result<Option<Vec<Message>>> {
        let path = self.path(thread_id);
        if !path.exists() {
            return Ok(None);
        }

        let reader = BufReader::new(fs::File::open(path)?);
        let mut messages = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if !line.trim().is_empty() {
                messages.push(serde_json::from_str(&line)?);
            }
        }
        Ok(Some(messages))
    }

    async fn persist(&self, thread_id: &str, messages: &[Message]) -> Result<()> {
        let file = fs::File::create(self.path(thread_id))?;
        let mut writer = BufWriter::new(file);
        for message in messages {
            serde_json::to_writer(&mut writer, message)?;
            writeln!(writer)?;
        }
        writer.flush()?;
        Ok(())
    }
}
