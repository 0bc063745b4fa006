//! Slurm batch submission: one `aggregate` job per dataset.

use std::path::PathBuf;

use async_trait::async_trait;
use cci_publisher_core::contract::{BatchSubmitter, DatasetCandidate};
use cci_publisher_core::error::BatchError;
use tokio::process::Command;
use tracing::debug;

use crate::load_config::BatchSection;

#[derive(Debug, Clone)]
pub struct SlurmSubmitter {
    program: String,
    time_limit: String,
    error_dir: PathBuf,
    /// This executable, re-invoked inside the job.
    executable: PathBuf,
    config: PathBuf,
}

impl SlurmSubmitter {
    pub fn new(settings: &BatchSection, executable: PathBuf, config: PathBuf) -> Self {
        Self {
            program: settings.command.clone(),
            time_limit: settings.time_limit.clone(),
            error_dir: settings.error_dir.clone(),
            executable,
            config,
        }
    }

    /// Command line run inside the job.
    pub fn job_command(&self, candidate: &DatasetCandidate, force: bool) -> String {
        let mut parts = vec![
            shell_quote(&self.executable.to_string_lossy()),
            "aggregate".to_string(),
            "--config".to_string(),
            shell_quote(&self.config.to_string_lossy()),
            "-d".to_string(),
            shell_quote(&candidate.id),
        ];
        if force {
            parts.push("--force".to_string());
        }
        if candidate.wms {
            parts.push("--wms".to_string());
        }
        parts.join(" ")
    }

    pub fn sbatch_args(&self, candidate: &DatasetCandidate, force: bool) -> Vec<String> {
        let error_file = self.error_dir.join(format!("{}.err", candidate.id));
        vec![
            "--time".to_string(),
            self.time_limit.clone(),
            "-e".to_string(),
            error_file.to_string_lossy().into_owned(),
            "--wrap".to_string(),
            self.job_command(candidate, force),
        ]
    }
}

/// Quote `word` for `/bin/sh` unless it is made only of safe characters.
fn shell_quote(word: &str) -> String {
    let safe = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=+,@".contains(c));
    if safe {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}

#[async_trait]
impl BatchSubmitter for SlurmSubmitter {
    async fn submit(&self, candidate: &DatasetCandidate, force: bool) -> Result<(), BatchError> {
        let args = self.sbatch_args(candidate, force);
        debug!(program = %self.program, ?args, "[BATCH] Submitting job");
        let output = Command::new(&self.program)
            .args(&args)
            .output()
            .await
            .map_err(|source| BatchError::Spawn {
                program: self.program.clone(),
                source,
            })?;
        if output.status.success() {
            Ok(())
        } else {
            Err(BatchError::Rejected {
                dataset: candidate.id.clone(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("esacci.OC.day"), "esacci.OC.day");
        assert_eq!(shell_quote("/my configs/a.yml"), "'/my configs/a.yml'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }
}
