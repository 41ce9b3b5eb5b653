//! Test utilities and fakes for cellar unit tests.
//!
//! Process execution and downloads are the two collaborators the engine
//! does not own. Both sit behind traits, and this module provides scripted
//! implementations of them.
//!
//! # Example
//!
//! ```rust,ignore
//! use cellar::test_support::{FakeRunner, FakeOutput, MemoryTransport};
//!
//! let runner = FakeRunner::new();
//! runner.expect_prefix("make", FakeOutput::failure(2, "make: *** [all] Error 1"));
//!
//! let transport = MemoryTransport::new();
//! transport.serve("https://example.org/a.tar.gz", b"bytes");
//! ```

pub mod fixtures;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use url::Url;

use crate::sources::{Transport, TransportError};
use crate::util::cancel::CancelToken;
use crate::util::process::{CommandSpec, ProcessError, ProcessOutput, ProcessRunner};

pub use fixtures::*;

/// Scripted process output.
#[derive(Debug, Clone)]
pub struct FakeOutput {
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl FakeOutput {
    pub fn success(stdout: impl Into<String>) -> Self {
        FakeOutput {
            status: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failure(status: i32, stderr: impl Into<String>) -> Self {
        FakeOutput {
            status,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    fn to_output(&self) -> ProcessOutput {
        ProcessOutput {
            exit_code: Some(self.status),
            stdout: self.stdout.clone().into_bytes(),
            stderr: self.stderr.clone().into_bytes(),
        }
    }
}

impl Default for FakeOutput {
    fn default() -> Self {
        FakeOutput::success("")
    }
}

/// Pattern for matching commands in [`FakeRunner`].
#[derive(Debug, Clone)]
pub enum CommandPattern {
    /// Exact match on the full command line.
    Exact(String),
    /// Match if the command line starts with prefix.
    StartsWith(String),
    /// Match if the command line contains substring.
    Contains(String),
    /// Match any command.
    Any,
}

impl CommandPattern {
    pub fn matches(&self, cmd: &str) -> bool {
        match self {
            CommandPattern::Exact(s) => cmd == s,
            CommandPattern::StartsWith(s) => cmd.starts_with(s),
            CommandPattern::Contains(s) => cmd.contains(s),
            CommandPattern::Any => true,
        }
    }
}

type Effect = Arc<dyn Fn(&CommandSpec) + Send + Sync>;

/// What happens when a command matches.
#[derive(Clone)]
pub enum Behavior {
    /// Return the output at once.
    Respond(FakeOutput),
    /// Block until the cancel token fires, then report cancellation.
    Hang,
}

/// One scripted expectation.
#[derive(Clone)]
pub struct CommandExpectation {
    pub pattern: CommandPattern,
    pub behavior: Behavior,
    /// Runs before the output is returned, e.g. to create installed files.
    pub effect: Option<Effect>,
    /// Number of times this expectation can be used (None = unlimited).
    pub times: Option<usize>,
    pub used: usize,
}

impl CommandExpectation {
    pub fn new(pattern: CommandPattern, output: FakeOutput) -> Self {
        CommandExpectation {
            pattern,
            behavior: Behavior::Respond(output),
            effect: None,
            times: None,
            used: 0,
        }
    }

    pub fn hang(pattern: CommandPattern) -> Self {
        CommandExpectation {
            behavior: Behavior::Hang,
            ..CommandExpectation::new(pattern, FakeOutput::default())
        }
    }

    pub fn times(mut self, n: usize) -> Self {
        self.times = Some(n);
        self
    }

    pub fn with_effect(mut self, effect: impl Fn(&CommandSpec) + Send + Sync + 'static) -> Self {
        self.effect = Some(Arc::new(effect));
        self
    }

    fn available(&self) -> bool {
        match self.times {
            Some(n) => self.used < n,
            None => true,
        }
    }
}

#[derive(Default)]
struct FakeState {
    expectations: Vec<CommandExpectation>,
    calls: Vec<CommandSpec>,
}

/// Scripted [`ProcessRunner`]. Commands without a matching expectation
/// succeed with empty output.
#[derive(Default, Clone)]
pub struct FakeRunner {
    state: Arc<Mutex<FakeState>>,
}

impl FakeRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn expect_pattern(&self, expectation: CommandExpectation) -> &Self {
        self.state
            .lock()
            .unwrap()
            .expectations
            .push(expectation);
        self
    }

    pub fn expect(&self, cmd: &str, output: FakeOutput) -> &Self {
        self.expect_pattern(CommandExpectation::new(
            CommandPattern::Exact(cmd.to_string()),
            output,
        ))
    }

    pub fn expect_prefix(&self, prefix: &str, output: FakeOutput) -> &Self {
        self.expect_pattern(CommandExpectation::new(
            CommandPattern::StartsWith(prefix.to_string()),
            output,
        ))
    }

    /// Command lines that were run, in order.
    pub fn calls(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .map(|c| c.display_command())
            .collect()
    }

    /// Full specs that were run, in order.
    pub fn specs(&self) -> Vec<CommandSpec> {
        self.state.lock().unwrap().calls.clone()
    }
}

impl ProcessRunner for FakeRunner {
    fn run(&self, spec: &CommandSpec, cancel: &CancelToken) -> Result<ProcessOutput, ProcessError> {
        let cmd = spec.display_command();

        let matched = {
            let mut state = self.state.lock().unwrap();
            state.calls.push(spec.clone());
            state
                .expectations
                .iter_mut()
                .find(|e| e.pattern.matches(&cmd) && e.available())
                .map(|e| {
                    e.used += 1;
                    (e.behavior.clone(), e.effect.clone())
                })
        };

        let Some((behavior, effect)) = matched else {
            return Ok(FakeOutput::default().to_output());
        };

        if let Some(effect) = effect {
            effect(spec);
        }

        match behavior {
            Behavior::Respond(output) => Ok(output.to_output()),
            Behavior::Hang => {
                while !cancel.is_cancelled() {
                    std::thread::sleep(Duration::from_millis(5));
                }
                Err(ProcessError::Cancelled {
                    program: spec.program.clone(),
                })
            }
        }
    }
}

#[derive(Default)]
struct MemoryState {
    bodies: HashMap<String, Vec<u8>>,
    failures: HashMap<String, usize>,
    calls: usize,
}

/// In-memory [`Transport`] that serves registered URLs and counts calls.
/// Clones share state.
#[derive(Default, Clone)]
pub struct MemoryTransport {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn serve(&self, url: &str, body: &[u8]) {
        self.state
            .lock()
            .unwrap()
            .bodies
            .insert(url.to_string(), body.to_vec());
    }

    /// Fail the next `n` requests for `url` with a transport error.
    pub fn fail_times(&self, url: &str, n: usize) {
        self.state
            .lock()
            .unwrap()
            .failures
            .insert(url.to_string(), n);
    }

    pub fn calls(&self) -> usize {
        self.state.lock().unwrap().calls
    }
}

impl Transport for MemoryTransport {
    fn get(&self, url: &Url) -> Result<Vec<u8>, TransportError> {
        let mut state = self.state.lock().unwrap();
        state.calls += 1;

        if let Some(remaining) = state.failures.get_mut(url.as_str()) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(TransportError::new(format!("connection reset: {}", url)));
            }
        }

        state
            .bodies
            .get(url.as_str())
            .cloned()
            .ok_or_else(|| TransportError::new(format!("failed to download {}: HTTP 404", url)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fake_runner_scripted() {
        let runner = FakeRunner::new();
        runner.expect("make", FakeOutput::failure(2, "boom"));

        let cancel = CancelToken::new();
        let spec = CommandSpec::new("make", "/tmp");
        let out = runner.run(&spec, &cancel).unwrap();
        assert_eq!(out.exit_code, Some(2));

        let other = runner
            .run(&CommandSpec::new("true", "/tmp"), &cancel)
            .unwrap();
        assert!(other.success());
        assert_eq!(runner.calls(), vec!["make", "true"]);
    }

    #[test]
    fn test_fake_runner_times() {
        let runner = FakeRunner::new();
        runner.expect_pattern(
            CommandExpectation::new(CommandPattern::Any, FakeOutput::failure(1, "")).times(1),
        );

        let cancel = CancelToken::new();
        let spec = CommandSpec::new("x", "/tmp");
        assert!(!runner.run(&spec, &cancel).unwrap().success());
        assert!(runner.run(&spec, &cancel).unwrap().success());
    }

    #[test]
    fn test_memory_transport_failures() {
        let transport = MemoryTransport::new();
        transport.serve("https://example.org/a", b"a");
        transport.fail_times("https://example.org/a", 1);

        let url = Url::parse("https://example.org/a").unwrap();
        assert!(transport.get(&url).is_err());
        assert_eq!(transport.get(&url).unwrap(), b"a");
        assert_eq!(transport.calls(), 2);
    }
}
