//! Aggregation creator backed by an external command.
//!
//! The configured program is invoked in two ways:
//!
//! - `<args..> probe --dimension <dim> <file>`: exits non-zero when the
//!   dimension cannot be read as a coordinate variable.
//! - `<args..> create --id <id> --thredds-url <url> --dimension <dim> [--no-cache]`:
//!   reads the ordered file list from stdin (one path per line) and prints
//!   the NcML document on stdout.

use std::process::Stdio;

use async_trait::async_trait;
use cci_publisher_core::contract::{AggregationCreator, AggregationRequest};
use cci_publisher_core::error::AggregationError;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct CommandAggregationCreator {
    program: String,
    args: Vec<String>,
}

impl CommandAggregationCreator {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    pub fn probe_args(&self, file: &str, dimension: &str) -> Vec<String> {
        let mut args = self.args.clone();
        args.extend(["probe", "--dimension", dimension, file].map(str::to_string));
        args
    }

    pub fn create_args(&self, request: &AggregationRequest) -> Vec<String> {
        let mut args = self.args.clone();
        args.extend(
            [
                "create",
                "--id",
                request.dataset_id.as_str(),
                "--thredds-url",
                request.thredds_url.as_str(),
                "--dimension",
                request.dimension.as_str(),
            ]
            .map(str::to_string),
        );
        if !request.cache {
            args.push("--no-cache".to_string());
        }
        args
    }

    fn spawn_error(&self, e: std::io::Error) -> AggregationError {
        AggregationError::Build(format!("failed to run {}: {e}", self.program))
    }
}

fn stderr_text(stderr: &[u8]) -> String {
    String::from_utf8_lossy(stderr).trim().to_string()
}

#[async_trait]
impl AggregationCreator for CommandAggregationCreator {
    async fn probe_coordinates(&self, file: &str, dimension: &str) -> Result<(), AggregationError> {
        let output = Command::new(&self.program)
            .args(self.probe_args(file, dimension))
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| self.spawn_error(e))?;
        if output.status.success() {
            Ok(())
        } else {
            Err(AggregationError::Coordinates(stderr_text(&output.stderr)))
        }
    }

    async fn create_aggregation(
        &self,
        request: &AggregationRequest,
    ) -> Result<String, AggregationError> {
        debug!(
            program = %self.program,
            dataset = %request.dataset_id,
            files = request.files.len(),
            cache = request.cache,
            "[AGG] Running aggregation command"
        );
        let mut child = Command::new(&self.program)
            .args(self.create_args(request))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| self.spawn_error(e))?;

        // stdin is fed from its own task; a full stdout pipe must not stall the write
        let mut input = request.files.join("\n");
        input.push('\n');
        let writer = child.stdin.take().map(|mut stdin| {
            tokio::spawn(async move {
                let written = stdin.write_all(input.as_bytes()).await;
                drop(stdin);
                written
            })
        });

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| self.spawn_error(e))?;
        if let Some(writer) = writer {
            match writer.await {
                Ok(Ok(())) => {}
                // the child may legitimately exit before reading everything
                Ok(Err(e)) if e.kind() == std::io::ErrorKind::BrokenPipe => {}
                Ok(Err(e)) => return Err(self.spawn_error(e)),
                Err(e) => return Err(AggregationError::Build(e.to_string())),
            }
        }

        if !output.status.success() {
            return Err(AggregationError::Build(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr_text(&output.stderr)
            )));
        }
        String::from_utf8(output.stdout)
            .map_err(|e| AggregationError::Build(format!("NcML output is not UTF-8: {e}")))
    }
}
