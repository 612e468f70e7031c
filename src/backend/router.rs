//! Codec routing between the in-process writer and the external runtime.

use std::path::{Path, PathBuf};

use super::runtime::{ExternalRequest, ExternalRuntime};
use crate::constants::{
    EXTERNAL_INPUT_FILE, EXTERNAL_OUTPUT_STEM, EXTERNAL_PROFILE_FILE, HIGH_DENSITY_CODECS,
};
use crate::error::{MemvidError, Result};
use crate::types::{
    BackendKind, BackendSettings, BackendStatus, Chunk, CodecProfile, FallbackCause, Route,
    VideoCodec, VideoSettings,
};

/// Whether a codec name (case-insensitive) is routed to the external backend.
#[must_use]
pub fn should_use_external(codec_name: &str) -> bool {
    let lowered = codec_name.trim().to_ascii_lowercase();
    HIGH_DENSITY_CODECS.contains(&lowered.as_str())
}

/// Work handed to [`BackendRouter::encode`].
#[derive(Debug, Clone, Copy)]
pub struct EncodeJob<'a> {
    pub chunks: &'a [Chunk],
    pub output: &'a Path,
    pub codec: VideoCodec,
    pub video: &'a VideoSettings,
}

/// How a container was actually produced.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodeOutcome {
    pub backend: BackendKind,
    pub codec: VideoCodec,
    pub profile: CodecProfile,
    pub external_sidecar: Option<PathBuf>,
    pub warnings: Vec<String>,
}

/// Owns the backend status for one encoder. Status changes only through probing and
/// provisioning.
pub struct BackendRouter {
    runtime: Box<dyn ExternalRuntime>,
    settings: BackendSettings,
    status: BackendStatus,
}

impl std::fmt::Debug for BackendRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendRouter")
            .field("runtime", &self.runtime.name())
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

impl BackendRouter {
    /// Probe the runtime once and keep the result.
    #[must_use]
    pub fn new(runtime: Box<dyn ExternalRuntime>, settings: BackendSettings) -> Self {
        let status = runtime.probe();
        tracing::debug!(
            target = "memvid::backend",
            runtime = runtime.name(),
            status = status.label(),
            "backend probed"
        );
        Self {
            runtime,
            settings,
            status,
        }
    }

    #[must_use]
    pub fn status(&self) -> BackendStatus {
        self.status
    }

    #[must_use]
    pub fn status_message(&self) -> &'static str {
        self.status.describe()
    }

    pub fn reprobe(&mut self) -> BackendStatus {
        self.status = self.runtime.probe();
        self.status
    }

    /// Build the missing environment; moves `container_missing` to `ready`.
    pub fn provision(&mut self) -> Result<()> {
        match self.status {
            BackendStatus::Ready => Ok(()),
            BackendStatus::ContainerMissing => {
                tracing::info!(
                    target = "memvid::backend",
                    image = %self.settings.image,
                    "provisioning external environment"
                );
                self.runtime.provision()?;
                match self.reprobe() {
                    BackendStatus::Ready => Ok(()),
                    other => Err(MemvidError::ExternalInvocation {
                        reason: format!("environment not ready after provisioning ({other})"),
                    }),
                }
            }
            other => Err(MemvidError::ExternalInvocation {
                reason: format!("cannot provision: {}", other.describe()),
            }),
        }
    }

    /// Decide the encoding path. Depends only on status, flags and codec.
    #[must_use]
    pub fn plan(&self, codec: VideoCodec) -> Route {
        if !should_use_external(codec.name()) {
            return Route::InProcess { codec };
        }
        match self.status {
            BackendStatus::Ready => Route::External {
                codec,
                provision_first: false,
            },
            BackendStatus::ContainerMissing if self.settings.auto_provision => Route::External {
                codec,
                provision_first: true,
            },
            status if self.settings.allow_fallback => Route::Fallback {
                requested: codec,
                codec: VideoCodec::baseline(),
                cause: FallbackCause::Status { status },
            },
            status => Route::Refuse {
                requested: codec,
                status,
            },
        }
    }

    /// Execute the plan for `job`. `native` writes the container in-process for a profile.
    pub fn encode<F>(&mut self, job: EncodeJob<'_>, mut native: F) -> Result<EncodeOutcome>
    where
        F: FnMut(&CodecProfile) -> Result<()>,
    {
        match self.plan(job.codec) {
            Route::InProcess { codec } => {
                let profile = job.video.profile(codec);
                native(&profile)?;
                Ok(EncodeOutcome {
                    backend: BackendKind::InProcess,
                    codec,
                    profile,
                    external_sidecar: None,
                    warnings: Vec::new(),
                })
            }
            Route::Refuse { requested, status } => Err(MemvidError::BackendUnavailable {
                codec: requested,
                status,
            }),
            Route::Fallback {
                requested, cause, ..
            } => fall_back(job, requested, &cause, native),
            Route::External {
                codec,
                provision_first,
            } => {
                if provision_first {
                    if let Err(err) = self.provision() {
                        let cause = FallbackCause::ProvisionFailed {
                            reason: err_reason(&err),
                        };
                        return self.recover(job, err, cause, native);
                    }
                }
                match self.run_external(job, codec) {
                    Ok(outcome) => Ok(outcome),
                    Err(err) => {
                        remove_partial(job.output);
                        let cause = FallbackCause::InvocationFailed {
                            reason: err_reason(&err),
                        };
                        self.recover(job, err, cause, native)
                    }
                }
            }
        }
    }

    fn recover<F>(
        &self,
        job: EncodeJob<'_>,
        err: MemvidError,
        cause: FallbackCause,
        native: F,
    ) -> Result<EncodeOutcome>
    where
        F: FnMut(&CodecProfile) -> Result<()>,
    {
        if self.settings.allow_fallback {
            fall_back(job, job.codec, &cause, native)
        } else {
            Err(err)
        }
    }

    fn run_external(&self, job: EncodeJob<'_>, codec: VideoCodec) -> Result<EncodeOutcome> {
        let profile = job.video.profile(codec);
        let work = tempfile::Builder::new().prefix("memvid-external").tempdir()?;

        fs_err::write(
            work.path().join(EXTERNAL_INPUT_FILE),
            serde_json::to_vec(job.chunks)?,
        )?;
        fs_err::write(
            work.path().join(EXTERNAL_PROFILE_FILE),
            serde_json::to_vec_pretty(&profile)?,
        )?;

        let request = ExternalRequest {
            work_dir: work.path().to_path_buf(),
            input_name: EXTERNAL_INPUT_FILE.to_string(),
            profile_name: EXTERNAL_PROFILE_FILE.to_string(),
            output_name: format!("{EXTERNAL_OUTPUT_STEM}.{}", profile.file_extension),
            profile: profile.clone(),
            timeout: self.settings.encode_timeout(),
        };
        tracing::info!(
            target = "memvid::backend",
            codec = %codec,
            chunks = job.chunks.len(),
            runtime = self.runtime.name(),
            "encoding with external backend"
        );
        let response = self.runtime.invoke(&request)?;
        if !response.succeeded() {
            return Err(MemvidError::ExternalInvocation {
                reason: format!(
                    "exit status {:?}: {}",
                    response.exit_code,
                    response.stderr.trim()
                ),
            });
        }
        if !response.video.is_file() {
            return Err(MemvidError::ExternalInvocation {
                reason: format!("runtime produced no {}", request.output_name),
            });
        }

        if let Some(parent) = job.output.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs_err::create_dir_all(parent)?;
        }
        fs_err::copy(&response.video, job.output)?;
        let external_sidecar = match response.sidecar {
            Some(sidecar) => {
                let target = job.output.with_extension("backend.json");
                fs_err::copy(&sidecar, &target)?;
                Some(target)
            }
            None => None,
        };

        Ok(EncodeOutcome {
            backend: BackendKind::External,
            codec,
            profile,
            external_sidecar,
            warnings: Vec::new(),
        })
    }
}

fn err_reason(err: &MemvidError) -> String {
    match err {
        MemvidError::ExternalInvocation { reason } => reason.clone(),
        other => other.to_string(),
    }
}

fn remove_partial(output: &Path) {
    if output.exists() {
        if let Err(err) = fs_err::remove_file(output) {
            tracing::debug!(
                target = "memvid::backend",
                path = %output.display(),
                error = %err,
                "failed to remove partial output"
            );
        }
    }
}

/// Warn once and write the baseline container instead.
fn fall_back<F>(
    job: EncodeJob<'_>,
    requested: VideoCodec,
    cause: &FallbackCause,
    mut native: F,
) -> Result<EncodeOutcome>
where
    F: FnMut(&CodecProfile) -> Result<()>,
{
    let codec = VideoCodec::baseline();
    let message = format!("codec '{requested}' unavailable: {cause}; falling back to '{codec}'");
    tracing::warn!(
        target = "memvid::backend",
        requested = %requested,
        fallback = %codec,
        cause = %cause,
        "{message}"
    );
    let profile = job.video.profile(codec);
    native(&profile)?;
    Ok(EncodeOutcome {
        backend: BackendKind::InProcess,
        codec,
        profile,
        external_sidecar: None,
        warnings: vec![message],
    })
}
