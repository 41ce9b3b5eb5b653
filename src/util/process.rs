//! Subprocess execution.
//!
//! Build steps and test actions never spawn processes directly; they hand a
//! [`CommandSpec`] to a [`ProcessRunner`]. [`SystemRunner`] is the real
//! implementation, tests substitute a scripted fake.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::Duration;

use thiserror::Error;

use crate::util::cancel::CancelToken;

/// How often a waiting runner checks for cancellation.
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// A command to run: program, arguments, working directory and extra
/// environment variables layered over the inherited environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub env: BTreeMap<String, String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>, cwd: impl AsRef<Path>) -> Self {
        CommandSpec {
            program: program.into(),
            args: Vec::new(),
            cwd: cwd.as_ref().to_path_buf(),
            env: BTreeMap::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn envs(mut self, vars: &BTreeMap<String, String>) -> Self {
        self.env
            .extend(vars.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    /// Display the command for error messages.
    pub fn display_command(&self) -> String {
        let mut parts = vec![self.program.clone()];
        parts.extend(self.args.iter().cloned());
        parts.join(" ")
    }
}

/// Captured result of a finished process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    /// `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Stdout followed by stderr, lossily decoded.
    pub fn combined(&self) -> String {
        let mut out = String::from_utf8_lossy(&self.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&self.stderr);
        if !out.is_empty() && !stderr.is_empty() && !out.ends_with('\n') {
            out.push('\n');
        }
        out.push_str(&stderr);
        out
    }
}

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("command `{program}` not found")]
    NotFound { program: String },

    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to wait for `{program}`: {source}")]
    Wait {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("`{program}` was killed after cancellation")]
    Cancelled { program: String },
}

/// Executes commands on behalf of the build executor and verification runner.
pub trait ProcessRunner: Send + Sync {
    fn run(&self, spec: &CommandSpec, cancel: &CancelToken) -> Result<ProcessOutput, ProcessError>;
}

/// Runs commands as real child processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl SystemRunner {
    /// Resolve the program the way a shell would, but against the PATH the
    /// child will see.
    fn resolve_program(spec: &CommandSpec) -> Result<PathBuf, ProcessError> {
        let program = Path::new(&spec.program);

        if program.components().count() > 1 || program.is_absolute() {
            let resolved = if program.is_absolute() {
                program.to_path_buf()
            } else {
                spec.cwd.join(program)
            };
            if resolved.exists() {
                return Ok(resolved);
            }
            return Err(ProcessError::NotFound {
                program: spec.program.clone(),
            });
        }

        let path: Option<OsString> = spec
            .env
            .get("PATH")
            .map(OsString::from)
            .or_else(|| std::env::var_os("PATH"));

        which::which_in(&spec.program, path, &spec.cwd).map_err(|_| ProcessError::NotFound {
            program: spec.program.clone(),
        })
    }

    fn drain<R: Read + Send + 'static>(reader: Option<R>) -> thread::JoinHandle<Vec<u8>> {
        thread::spawn(move || {
            let mut buf = Vec::new();
            if let Some(mut reader) = reader {
                let _ = reader.read_to_end(&mut buf);
            }
            buf
        })
    }

    fn wait(
        spec: &CommandSpec,
        child: &mut Child,
        cancel: &CancelToken,
    ) -> Result<Option<i32>, ProcessError> {
        loop {
            match child.try_wait() {
                Ok(Some(status)) => return Ok(status.code()),
                Ok(None) => {}
                Err(source) => {
                    return Err(ProcessError::Wait {
                        program: spec.program.clone(),
                        source,
                    })
                }
            }

            if cancel.is_cancelled() {
                tracing::debug!("Killing `{}` after cancellation", spec.display_command());
                kill_tree(child);
                let _ = child.wait();
                return Err(ProcessError::Cancelled {
                    program: spec.program.clone(),
                });
            }

            thread::sleep(POLL_INTERVAL);
        }
    }
}

#[cfg(unix)]
fn kill_tree(child: &mut Child) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    if let Err(e) = killpg(Pid::from_raw(child.id() as i32), Signal::SIGKILL) {
        tracing::debug!("failed to kill process group {}: {}", child.id(), e);
    }
    let _ = child.kill();
}

#[cfg(not(unix))]
fn kill_tree(child: &mut Child) {
    let _ = child.kill();
}

impl ProcessRunner for SystemRunner {
    fn run(&self, spec: &CommandSpec, cancel: &CancelToken) -> Result<ProcessOutput, ProcessError> {
        let program = Self::resolve_program(spec)?;

        tracing::debug!("Running `{}` in {}", spec.display_command(), spec.cwd.display());

        let mut command = Command::new(&program);
        // Own process group, so cancellation also reaches grandchildren
        // holding the output pipes.
        #[cfg(unix)]
        std::os::unix::process::CommandExt::process_group(&mut command, 0);

        let mut child = command
            .args(&spec.args)
            .current_dir(&spec.cwd)
            .envs(&spec.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| ProcessError::Spawn {
                program: spec.program.clone(),
                source,
            })?;

        let stdout = Self::drain(child.stdout.take());
        let stderr = Self::drain(child.stderr.take());

        let exit_code = Self::wait(spec, &mut child, cancel);

        let stdout = stdout.join().unwrap_or_default();
        let stderr = stderr.join().unwrap_or_default();

        Ok(ProcessOutput {
            exit_code: exit_code?,
            stdout,
            stderr,
        })
    }
}
