//! Build executor - runs a descriptor's install steps in order.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use miette::Diagnostic as MietteDiagnostic;
use thiserror::Error;

use crate::builder::env::Environment;
use crate::builder::events::{BuildEvent, Reporter};
use crate::builder::expand::Placeholders;
use crate::core::{BuildStep, PackageDescriptor, PackageId};
use crate::util::cancel::CancelToken;
use crate::util::process::{CommandSpec, ProcessError, ProcessRunner};

/// Failure of one package's build. Steps are never retried.
#[derive(Debug, Error, MietteDiagnostic)]
pub enum BuildError {
    /// A step exited unsuccessfully. `index` is zero-based; `exit_code` is
    /// `None` when the process was killed by a signal.
    #[error("step {} `{command}` failed with {}", .index + 1, exit_status(.exit_code))]
    #[diagnostic(code(cellar::build::step_failed))]
    StepFailed {
        index: usize,
        exit_code: Option<i32>,
        command: String,
        output: String,
    },

    #[error("step {} `{command}` could not be started: {message}", .index + 1)]
    #[diagnostic(code(cellar::build::spawn))]
    Spawn {
        index: usize,
        command: String,
        message: String,
    },

    #[error("step {} failed to edit {}: {message}", .index + 1, file.display())]
    #[diagnostic(code(cellar::build::replace))]
    Replace {
        index: usize,
        file: PathBuf,
        message: String,
    },

    #[error("build cancelled before step {}: {reason}", .index + 1)]
    #[diagnostic(code(cellar::build::cancelled))]
    Cancelled { index: usize, reason: String },

    #[error("I/O error at {}: {message}", path.display())]
    #[diagnostic(code(cellar::build::io))]
    Io { path: PathBuf, message: String },
}

fn exit_status(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {}", code),
        None => "a signal".to_string(),
    }
}

impl BuildError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, BuildError::Cancelled { .. })
    }
}

/// Outcome of a successful build.
#[derive(Debug, Clone)]
pub struct BuildResult {
    pub id: PackageId,
    pub prefix: PathBuf,
    pub steps_run: usize,
    pub duration: Duration,
}

/// Runs install steps through a [`ProcessRunner`].
#[derive(Clone)]
pub struct BuildExecutor {
    runner: Arc<dyn ProcessRunner>,
    reporter: Arc<dyn Reporter>,
}

impl BuildExecutor {
    pub fn new(runner: Arc<dyn ProcessRunner>, reporter: Arc<dyn Reporter>) -> Self {
        BuildExecutor { runner, reporter }
    }

    pub fn runner(&self) -> &Arc<dyn ProcessRunner> {
        &self.runner
    }

    /// Run every step of `descriptor` with `workdir` as the working
    /// directory. The first failing step aborts the rest.
    pub fn execute(
        &self,
        descriptor: &PackageDescriptor,
        workdir: &Path,
        env: &Environment,
        cancel: &CancelToken,
    ) -> Result<BuildResult, BuildError> {
        let start = Instant::now();
        let id = descriptor.id();
        let placeholders = env.placeholders();
        let vars = env.vars();

        std::fs::create_dir_all(env.prefix()).map_err(|e| BuildError::Io {
            path: env.prefix().to_path_buf(),
            message: e.to_string(),
        })?;

        self.reporter.event(&BuildEvent::BuildStarted {
            package_id: id.to_string(),
            steps: descriptor.steps().len(),
        });

        for (index, step) in descriptor.steps().iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(BuildError::Cancelled {
                    index,
                    reason: cancel.reason().unwrap_or_else(|| "cancelled".to_string()),
                });
            }

            match step {
                BuildStep::Run { command, args } => {
                    let spec = CommandSpec::new(placeholders.expand(command), workdir)
                        .args(placeholders.expand_args(args))
                        .envs(&vars);
                    self.run_step(id, index, &spec, cancel)?;
                }
                BuildStep::Replace { file, from, to } => {
                    self.reporter
                        .event(&BuildEvent::step_started(id, index, step.describe()));
                    replace_in_file(index, workdir, &placeholders, file, from, to)?;
                }
            }
        }

        let duration = start.elapsed();
        tracing::debug!("Built {} in {:.2}s", id, duration.as_secs_f64());

        Ok(BuildResult {
            id,
            prefix: env.prefix().to_path_buf(),
            steps_run: descriptor.steps().len(),
            duration,
        })
    }

    fn run_step(
        &self,
        id: PackageId,
        index: usize,
        spec: &CommandSpec,
        cancel: &CancelToken,
    ) -> Result<(), BuildError> {
        let command = spec.display_command();
        self.reporter
            .event(&BuildEvent::step_started(id, index, command.clone()));
        tracing::debug!("{}: step {} `{}`", id, index + 1, command);

        let output = self.runner.run(spec, cancel).map_err(|err| match err {
            ProcessError::Cancelled { .. } => BuildError::Cancelled {
                index,
                reason: cancel.reason().unwrap_or_else(|| "cancelled".to_string()),
            },
            other => BuildError::Spawn {
                index,
                command: command.clone(),
                message: other.to_string(),
            },
        })?;

        if !output.success() {
            return Err(BuildError::StepFailed {
                index,
                exit_code: output.exit_code,
                command,
                output: output.combined(),
            });
        }

        Ok(())
    }
}

/// Replace `from` with `to` in a file. Relative paths are resolved against
/// the working directory. Matching nothing is an error: a stale pattern
/// would otherwise leave the wrong prefix in the installed file.
fn replace_in_file(
    index: usize,
    workdir: &Path,
    placeholders: &Placeholders,
    file: &str,
    from: &str,
    to: &str,
) -> Result<(), BuildError> {
    let path = workdir.join(placeholders.expand(file));
    let from = placeholders.expand(from);
    let to = placeholders.expand(to);

    let replace_err = |message: String| BuildError::Replace {
        index,
        file: path.clone(),
        message,
    };

    let contents = std::fs::read_to_string(&path).map_err(|e| replace_err(e.to_string()))?;
    if !contents.contains(&from) {
        return Err(replace_err(format!("`{}` not found", from)));
    }

    std::fs::write(&path, contents.replace(&from, &to)).map_err(|e| replace_err(e.to_string()))?;
    tracing::debug!("Rewrote `{}` to `{}` in {}", from, to, path.display());
    Ok(())
}
