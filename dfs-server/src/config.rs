use crate::entry::{DEFAULT_WRITEBACK_RETRY, EntryPolicy};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Deserialize)]
pub struct Config {
    // ip:port to listen on
    pub addr: String,
    // directory holding the authoritative files
    pub root: PathBuf,
    // how long a writer waits for the current owner; unset = forever
    #[serde(default)]
    pub writeback_timeout_secs: Option<u64>,
    // how often a waiting writer repeats its writeback request; unset = 1s
    #[serde(default)]
    pub writeback_retry_ms: Option<u64>,
    // accept commits from clients that are not the owner
    #[serde(default)]
    pub permissive_commits: bool,
}

impl Config {
    pub fn policy(&self) -> EntryPolicy {
        EntryPolicy {
            writeback_timeout: self.writeback_timeout_secs.map(Duration::from_secs),
            writeback_retry: self
                .writeback_retry_ms
                .map_or(DEFAULT_WRITEBACK_RETRY, Duration::from_millis),
            permissive_commits: self.permissive_commits,
        }
    }
}

pub fn load_config(path: &str) -> Result<Config> {
    let content =
        fs::read_to_string(path).with_context(|| format!("Failed to read config from {path}"))?;
    let cfg: Config = serde_yaml::from_str(&content).context("Failed to parse YAML config")?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_minimal_config() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("server.yaml");
        fs::write(&path, "addr: 127.0.0.1:50051\nroot: /srv/dfs\n").unwrap();

        let cfg = load_config(path.to_str().unwrap()).unwrap();
        assert_eq!(cfg.addr, "127.0.0.1:50051");
        assert_eq!(cfg.root, PathBuf::from("/srv/dfs"));
        let policy = cfg.policy();
        assert!(policy.writeback_timeout.is_none());
        assert_eq!(policy.writeback_retry, DEFAULT_WRITEBACK_RETRY);
        assert!(!policy.permissive_commits);
    }

    #[test]
    fn loads_policy_fields() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("server.yaml");
        fs::write(
            &path,
            "addr: 0.0.0.0:7000\nroot: tmp\nwriteback_timeout_secs: 30\nwriteback_retry_ms: 250\npermissive_commits: true\n",
        )
        .unwrap();

        let policy = load_config(path.to_str().unwrap()).unwrap().policy();
        assert_eq!(policy.writeback_timeout, Some(Duration::from_secs(30)));
        assert_eq!(policy.writeback_retry, Duration::from_millis(250));
        assert!(policy.permissive_commits);
    }

    #[test]
    fn missing_file_mentions_path() {
        let err = load_config("/definitely/not/here.yaml").unwrap_err();
        assert!(err.to_string().contains("/definitely/not/here.yaml"));
    }
}
