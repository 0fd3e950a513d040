//! Saved command templates, persisted as JSON.
//!
//! The history belongs to the front end: it only ever supplies template
//! strings and never sees rows or results.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::Result;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct HistoryFile {
    #[serde(default)]
    commands: Vec<String>,
}

/// List of saved command templates
#[derive(Debug, Clone, Default)]
pub struct CommandHistory {
    path: Option<PathBuf>,
    commands: Vec<String>,
}

impl CommandHistory {
    /// Open the history at `path`; a missing file yields an empty history
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let commands = match fs::read_to_string(&path) {
            Ok(contents) => serde_json::from_str::<HistoryFile>(&contents)?.commands,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %path.display(), "No command history yet");
                Vec::new()
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            path: Some(path),
            commands,
        })
    }

    /// History that is never written to disk
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn get(&self) -> &[String] {
        &self.commands
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Append a template unless it is already saved
    pub fn add(&mut self, command: impl Into<String>) -> Result<bool> {
        let command = command.into();
        if self.commands.contains(&command) {
            return Ok(false);
        }
        info!(command = %command, "Saving command template");
        self.commands.push(command);
        self.save()?;
        Ok(true)
    }

    /// Forget a template; returns whether it was present
    pub fn remove(&mut self, command: &str) -> Result<bool> {
        let before = self.commands.len();
        self.commands.retain(|saved| saved != command);
        if self.commands.len() == before {
            return Ok(false);
        }
        info!(command = %command, "Forgetting command template");
        self.save()?;
        Ok(true)
    }

    fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let file = HistoryFile {
            commands: self.commands.clone(),
        };
        fs::write(path, serde_json::to_string_pretty(&file)?)?;
        Ok(())
    }
}
