//! External encoding runtime: a container engine that runs the high-density encoder.

use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use crate::constants::{EXTERNAL_MOUNT_DATA, EXTERNAL_MOUNT_SCRIPTS, EXTERNAL_OUTPUT_STEM};
use crate::error::{MemvidError, Result};
use crate::process::{Completion, run_with_timeout};
use crate::types::{BackendSettings, BackendStatus, CodecProfile};

/// One external encoding job.
///
/// `work_dir` already holds the chunk list and the serialized profile; the runtime must leave
/// `output_name` (and optionally `output.json`) in the same directory.
#[derive(Debug, Clone)]
pub struct ExternalRequest {
    pub work_dir: PathBuf,
    pub input_name: String,
    pub profile_name: String,
    pub output_name: String,
    pub profile: CodecProfile,
    pub timeout: Duration,
}

impl ExternalRequest {
    #[must_use]
    pub fn output_path(&self) -> PathBuf {
        self.work_dir.join(&self.output_name)
    }

    #[must_use]
    pub fn sidecar_path(&self) -> PathBuf {
        self.work_dir.join(format!("{EXTERNAL_OUTPUT_STEM}.json"))
    }
}

#[derive(Debug, Clone)]
pub struct ExternalResponse {
    /// `None` when the process was killed by a signal.
    pub exit_code: Option<i32>,
    pub video: PathBuf,
    pub sidecar: Option<PathBuf>,
    pub stderr: String,
}

impl ExternalResponse {
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Seam between the router and whatever executes high-density encodes.
pub trait ExternalRuntime: Send + Sync {
    fn name(&self) -> &str;

    /// Derive the current readiness. Never fails; problems map to a status.
    fn probe(&self) -> BackendStatus;

    /// Build the execution environment.
    fn provision(&self) -> Result<()>;

    /// Run one job to completion. Timeouts are errors; non-zero exits are responses.
    fn invoke(&self, request: &ExternalRequest) -> Result<ExternalResponse>;
}

fn invocation_error(reason: impl Into<String>) -> MemvidError {
    MemvidError::ExternalInvocation {
        reason: reason.into(),
    }
}

/// Drives a docker-compatible CLI (`docker`, `podman`, ...).
#[derive(Debug, Clone)]
pub struct ContainerRuntime {
    settings: BackendSettings,
}

impl ContainerRuntime {
    #[must_use]
    pub fn new(settings: BackendSettings) -> Self {
        Self { settings }
    }

    /// First runtime command that answers `--version`.
    fn locate(&self) -> std::result::Result<String, BackendStatus> {
        let mut status = BackendStatus::NoRuntime;
        for candidate in &self.settings.runtime_commands {
            let mut cmd = Command::new(candidate);
            cmd.arg("--version");
            match run_with_timeout(&mut cmd, self.settings.probe_timeout()) {
                Ok(Completion::Exited(output)) if output.status.success() => {
                    return Ok(candidate.clone());
                }
                Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
                _ => status = BackendStatus::RuntimeNotRunning,
            }
        }
        Err(status)
    }

    fn run(&self, args: &[String], timeout: Duration, what: &str) -> Result<Completion> {
        let program = self.locate().map_err(|status| {
            invocation_error(format!("{what}: {}", status.describe()))
        })?;
        let mut cmd = Command::new(&program);
        cmd.args(args);
        tracing::debug!(
            target = "memvid::backend",
            runtime = %program,
            args = ?args,
            "running container runtime"
        );
        run_with_timeout(&mut cmd, timeout)
            .map_err(|err| invocation_error(format!("{what}: failed to start {program}: {err}")))
    }
}

fn absolute(path: &Path) -> Result<PathBuf> {
    fs_err::canonicalize(path)
        .map_err(|err| invocation_error(format!("{}: {err}", path.display())))
}

impl ExternalRuntime for ContainerRuntime {
    fn name(&self) -> &str {
        "container"
    }

    fn probe(&self) -> BackendStatus {
        let program = match self.locate() {
            Ok(program) => program,
            Err(status) => return status,
        };
        let mut cmd = Command::new(&program);
        cmd.args(["images", "-q", &self.settings.image]);
        match run_with_timeout(&mut cmd, self.settings.image_query_timeout()) {
            Ok(Completion::Exited(output)) if !output.status.success() => {
                BackendStatus::RuntimeNotRunning
            }
            Ok(Completion::Exited(output)) if output.stdout.iter().all(u8::is_ascii_whitespace) => {
                BackendStatus::ContainerMissing
            }
            Ok(Completion::Exited(_)) => BackendStatus::Ready,
            Ok(Completion::TimedOut) => BackendStatus::Unknown,
            Err(_) => BackendStatus::RuntimeNotRunning,
        }
    }

    fn provision(&self) -> Result<()> {
        let definition = absolute(&self.settings.definition_dir)?;
        let dockerfile = definition.join("Dockerfile");
        if !dockerfile.is_file() {
            return Err(invocation_error(format!(
                "no environment definition at {}",
                dockerfile.display()
            )));
        }
        let args = vec![
            "build".to_string(),
            "-f".to_string(),
            dockerfile.display().to_string(),
            "-t".to_string(),
            self.settings.image.clone(),
            definition.display().to_string(),
        ];
        match self.run(&args, self.settings.provision_timeout(), "provision")? {
            Completion::Exited(output) if output.status.success() => Ok(()),
            Completion::Exited(output) => Err(invocation_error(format!(
                "image build failed: {}",
                output.stderr.trim()
            ))),
            Completion::TimedOut => Err(invocation_error(format!(
                "image build timed out after {}s",
                self.settings.provision_timeout_secs
            ))),
        }
    }

    fn invoke(&self, request: &ExternalRequest) -> Result<ExternalResponse> {
        let work_dir = absolute(&request.work_dir)?;
        let scripts = absolute(&self.settings.scripts_dir)?;
        let args = vec![
            "run".to_string(),
            "--rm".to_string(),
            "-v".to_string(),
            format!("{}:{EXTERNAL_MOUNT_DATA}", work_dir.display()),
            "-v".to_string(),
            format!("{}:{EXTERNAL_MOUNT_SCRIPTS}", scripts.display()),
            self.settings.image.clone(),
            "python3".to_string(),
            format!("{EXTERNAL_MOUNT_SCRIPTS}/{}", self.settings.entrypoint),
            request.input_name.clone(),
            request.output_name.clone(),
            "--profile".to_string(),
            request.profile_name.clone(),
        ];
        match self.run(&args, request.timeout, "encode")? {
            Completion::Exited(output) => {
                let sidecar = request.sidecar_path();
                Ok(ExternalResponse {
                    exit_code: output.status.code(),
                    video: request.output_path(),
                    sidecar: sidecar.is_file().then_some(sidecar),
                    stderr: output.stderr,
                })
            }
            Completion::TimedOut => Err(invocation_error(format!(
                "encoding timed out after {}s",
                request.timeout.as_secs()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_runtime_reports_no_runtime() {
        let settings = BackendSettings {
            runtime_commands: vec!["memvid-no-such-runtime".into()],
            ..BackendSettings::default()
        };
        let runtime = ContainerRuntime::new(settings);
        assert_eq!(runtime.probe(), BackendStatus::NoRuntime);
        assert!(matches!(
            runtime.provision(),
            Err(MemvidError::ExternalInvocation { .. })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn failing_version_query_means_not_running() {
        // `false --version` exits non-zero.
        let settings = BackendSettings {
            runtime_commands: vec!["false".into()],
            ..BackendSettings::default()
        };
        assert_eq!(
            ContainerRuntime::new(settings).probe(),
            BackendStatus::RuntimeNotRunning
        );
    }

    #[cfg(unix)]
    #[test]
    fn empty_image_listing_means_missing() {
        // `true` answers every query with empty output and exit 0.
        let settings = BackendSettings {
            runtime_commands: vec!["true".into()],
            ..BackendSettings::default()
        };
        assert_eq!(
            ContainerRuntime::new(settings).probe(),
            BackendStatus::ContainerMissing
        );
    }
}
