//! restic command-line client.
//!
//! This module defines the [`Repository`] seam the aggregator queries and
//! [`ResticClient`], which implements it by running the `restic` binary and
//! decoding its JSON output. Every invocation is read-only (`--no-lock`).

use crate::config::Settings;
use crate::error::{ExporterError, Result};
use crate::identity::Identity;
use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

/// Read-only queries against a backup repository.
#[async_trait]
pub trait Repository: Send + Sync {
    /// List snapshots, or only the most recent one per group when `latest_only` is set.
    async fn list_snapshots(&self, latest_only: bool) -> Result<Vec<RawSnapshot>>;

    /// Size and file count of one snapshot, or of the whole repository for `None`.
    async fn compute_stats(&self, snapshot_id: Option<&str>) -> Result<StatsResult>;

    /// Run a repository check. `Ok(false)` means the check ran and failed.
    async fn check_repository(&self) -> Result<bool>;

    /// Raw output of the lock listing, one lock id per line.
    async fn list_locks(&self) -> Result<String>;
}

/// Snapshot as reported by `restic snapshots --json`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawSnapshot {
    pub id: String,
    /// Creation time (ISO-8601)
    #[serde(rename = "time")]
    pub creation_time: String,
    pub hostname: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub username: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub paths: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub tags: Vec<String>,
    #[serde(default)]
    pub program_version: Option<String>,
    #[serde(default)]
    pub summary: Option<SnapshotSummary>,
}

impl RawSnapshot {
    pub fn identity(&self) -> Identity {
        Identity::derive(&self.hostname, &self.username, &self.paths)
    }
}

/// Backup summary attached to snapshots created by restic 0.17 and later.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SnapshotSummary {
    #[serde(default)]
    pub backup_start: Option<String>,
    #[serde(default)]
    pub backup_end: Option<String>,
    #[serde(default)]
    pub files_new: u64,
    #[serde(default)]
    pub files_changed: u64,
    #[serde(default)]
    pub files_unmodified: u64,
    #[serde(default)]
    pub total_files_processed: u64,
    #[serde(default)]
    pub total_bytes_processed: u64,
    #[serde(default)]
    pub data_added: u64,
}

/// Output of `restic stats --json`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct StatsResult {
    pub total_size: i64,
    pub total_file_count: i64,
}

impl StatsResult {
    /// Reported when stats collection is disabled. Not a real zero.
    pub const NOT_COLLECTED: StatsResult = StatsResult {
        total_size: -1,
        total_file_count: -1,
    };

    pub fn is_collected(&self) -> bool {
        self.total_size >= 0 && self.total_file_count >= 0
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// How to reach the repository.
#[derive(Debug, Clone)]
pub struct ResticConfig {
    /// restic executable
    pub binary: String,
    /// Repository location (`-r`)
    pub repository: String,
    /// Password file (`-p`)
    pub password_file: String,
    /// Pass `--insecure-tls`
    pub insecure_tls: bool,
    /// Kill an invocation that runs longer than this
    pub timeout: Option<Duration>,
}

impl ResticConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            binary: settings.restic_binary.clone(),
            repository: settings.restic_repository.clone(),
            password_file: settings.restic_password_file.clone(),
            insecure_tls: settings.insecure_tls,
            timeout: settings.command_timeout(),
        }
    }
}

/// restic client running one subprocess per query.
#[derive(Debug, Clone)]
pub struct ResticClient {
    config: ResticConfig,
}

impl ResticClient {
    /// Create a new restic client.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use restic_exporter::client::{ResticClient, ResticConfig};
    ///
    /// let client = ResticClient::new(ResticConfig {
    ///     binary: "restic".to_string(),
    ///     repository: "/srv/restic-repo".to_string(),
    ///     password_file: "/run/secrets/restic".to_string(),
    ///     insecure_tls: false,
    ///     timeout: None,
    /// });
    /// ```
    pub fn new(config: ResticConfig) -> Self {
        Self { config }
    }

    fn command_args(&self, subcommand: &[&str]) -> Vec<String> {
        let mut args = vec![
            "-r".to_string(),
            self.config.repository.clone(),
            "-p".to_string(),
            self.config.password_file.clone(),
            "--no-lock".to_string(),
        ];
        args.extend(subcommand.iter().map(|arg| arg.to_string()));
        if self.config.insecure_tls {
            args.push("--insecure-tls".to_string());
        }
        args
    }

    /// Run restic and return its raw output, whatever the exit status.
    async fn execute(&self, name: &str, subcommand: &[&str]) -> Result<Output> {
        let mut cmd = Command::new(&self.config.binary);
        cmd.args(self.command_args(subcommand))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!("Running restic command: restic {}", subcommand.join(" "));

        let output = match self.config.timeout {
            Some(after) => tokio::time::timeout(after, cmd.output())
                .await
                .map_err(|_| ExporterError::Timeout {
                    command: name.to_string(),
                    after,
                })?,
            None => cmd.output().await,
        };

        output.map_err(|source| ExporterError::Spawn {
            command: name.to_string(),
            source,
        })
    }

    /// Run restic and return stdout, failing on a non-zero exit status.
    async fn run(&self, name: &str, subcommand: &[&str]) -> Result<Vec<u8>> {
        let output = self.execute(name, subcommand).await?;
        if !output.status.success() {
            return Err(command_error(name, &output));
        }
        Ok(output.stdout)
    }
}

fn command_error(name: &str, output: &Output) -> ExporterError {
    ExporterError::Command {
        command: name.to_string(),
        stderr: flatten_stderr(&output.stderr),
        code: output.status.code().unwrap_or(-1),
    }
}

/// restic diagnostics on a single line.
fn flatten_stderr(stderr: &[u8]) -> String {
    String::from_utf8_lossy(stderr).replace('\n', " ")
}

fn preview(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    text.chars().take(200).collect()
}

#[async_trait]
impl Repository for ResticClient {
    async fn list_snapshots(&self, latest_only: bool) -> Result<Vec<RawSnapshot>> {
        let stdout = if latest_only {
            self.run("snapshots", &["snapshots", "--json", "--latest", "1"])
                .await?
        } else {
            self.run("snapshots", &["snapshots", "--json"]).await?
        };

        debug!("Raw snapshots response: {} bytes", stdout.len());
        parse_snapshots(&stdout)
    }

    async fn compute_stats(&self, snapshot_id: Option<&str>) -> Result<StatsResult> {
        let stdout = match snapshot_id {
            Some(id) => self.run("stats", &["stats", "--json", id]).await?,
            None => self.run("stats", &["stats", "--json"]).await?,
        };

        serde_json::from_slice(&stdout).map_err(|e| {
            ExporterError::ParseError(format!(
                "Failed to parse stats: {}. Body preview: {}",
                e,
                preview(&stdout)
            ))
        })
    }

    async fn check_repository(&self) -> Result<bool> {
        let output = self.execute("check", &["check"]).await?;
        if output.status.success() {
            return Ok(true);
        }

        warn!(
            "Error checking the repository health. {} Exit code: {}",
            flatten_stderr(&output.stderr),
            output.status.code().unwrap_or(-1)
        );
        Ok(false)
    }

    async fn list_locks(&self) -> Result<String> {
        let stdout = self.run("list locks", &["list", "locks"]).await?;
        Ok(String::from_utf8_lossy(&stdout).into_owned())
    }
}

/// Decode `restic snapshots --json` output.
pub fn parse_snapshots(body: &[u8]) -> Result<Vec<RawSnapshot>> {
    let snapshots: Option<Vec<RawSnapshot>> = serde_json::from_slice(body).map_err(|e| {
        ExporterError::ParseError(format!(
            "Failed to parse snapshots: {}. Body preview: {}...",
            e,
            preview(body)
        ))
    })?;
    Ok(snapshots.unwrap_or_default())
}
