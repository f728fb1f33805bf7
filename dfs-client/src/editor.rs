//! The interactive editor a session runs against the cached copy.

use async_trait::async_trait;
use common::{CacheError, CacheResult};
use log::{info, warn};
use std::path::Path;
use tokio::process::Command;

#[async_trait]
pub trait Editor: Send + Sync {
    /// Edit `path` and return once the user is done.
    async fn run_interactive(&self, path: &Path) -> CacheResult<()>;
}

/// Runs an external program with the cached file as its last argument.
#[derive(Debug, Clone)]
pub struct CommandEditor {
    program: String,
    args: Vec<String>,
}

impl CommandEditor {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// `$EDITOR`, falling back to emacs.
    pub fn from_env() -> Self {
        Self::new(std::env::var("EDITOR").unwrap_or_else(|_| "emacs".to_string()))
    }
}

#[async_trait]
impl Editor for CommandEditor {
    async fn run_interactive(&self, path: &Path) -> CacheResult<()> {
        info!("[editor] starting {} on {}", self.program, path.display());
        let status = Command::new(&self.program)
            .args(&self.args)
            .arg(path)
            .status()
            .await
            .map_err(|e| CacheError::LaunchFailure(format!("{}: {e}", self.program)))?;
        if !status.success() {
            warn!("[editor] {} exited with {status}", self.program);
        }
        info!("[editor] session complete");
        Ok(())
    }
}
