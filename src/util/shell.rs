//! Centralized shell output and progress management.
//!
//! The Shell module provides a unified API for all CLI output, including:
//! - Status messages with consistent formatting
//! - A package progress bar (via indicatif)
//! - JSON output mode for machine-readable output
//!
//! # Design Principles
//!
//! 1. **Commands never manage spacing/indentation directly** - Shell handles all formatting
//! 2. **JSON mode is mutually exclusive** - No human output when JSON mode is enabled
//! 3. **Status lines never tear the progress bar** - they are printed while it is suspended

use std::fmt::Display;
use std::io::{self, IsTerminal, Write};
use std::sync::Mutex;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};

use crate::builder::events::{BuildEvent, Reporter};

/// Shell output mode - Human and Json are mutually exclusive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellMode {
    /// Human-readable output with optional colors and progress bars.
    Human {
        verbosity: Verbosity,
        color: ColorChoice,
    },
    /// Machine-readable JSON output only.
    Json,
}

impl Default for ShellMode {
    fn default() -> Self {
        ShellMode::Human {
            verbosity: Verbosity::Normal,
            color: ColorChoice::Auto,
        }
    }
}

/// Output verbosity level (Human mode only).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verbosity {
    /// --quiet: errors only, no progress
    Quiet,
    /// Default: status messages + progress bar
    #[default]
    Normal,
    /// --verbose: every build step, no progress bar
    Verbose,
}

/// Color output mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColorChoice {
    /// Detect TTY and use colors if available.
    #[default]
    Auto,
    /// Always use ANSI colors.
    Always,
    /// Never use ANSI colors.
    Never,
}

impl std::str::FromStr for ColorChoice {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(ColorChoice::Auto),
            "always" => Ok(ColorChoice::Always),
            "never" => Ok(ColorChoice::Never),
            _ => Err(format!(
                "invalid color choice '{}'; expected 'auto', 'always', or 'never'",
                s
            )),
        }
    }
}

/// Status types for output messages.
///
/// Shell handles all formatting - callers just specify the semantic status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    // Success statuses (green)
    Installed,
    Tested,
    Removed,
    Finished,

    // In-progress statuses (cyan)
    Resolving,
    Fetching,
    Building,
    Running,
    Testing,

    // Info statuses (blue/default)
    Info,

    // Warning statuses (yellow)
    Skipped,
    Warning,

    // Error status (red)
    Error,
}

impl Status {
    /// Get the display text for this status.
    fn as_str(&self) -> &'static str {
        match self {
            Status::Installed => "Installed",
            Status::Tested => "Tested",
            Status::Removed => "Removed",
            Status::Finished => "Finished",
            Status::Resolving => "Resolving",
            Status::Fetching => "Fetching",
            Status::Building => "Building",
            Status::Running => "Running",
            Status::Testing => "Testing",
            Status::Info => "Info",
            Status::Skipped => "Skipped",
            Status::Warning => "Warning",
            Status::Error => "error",
        }
    }

    /// Get the ANSI color code for this status.
    fn color_code(&self) -> &'static str {
        match self {
            Status::Installed | Status::Tested | Status::Removed | Status::Finished => "\x1b[1;32m",
            Status::Resolving
            | Status::Fetching
            | Status::Building
            | Status::Running
            | Status::Testing => "\x1b[1;36m",
            Status::Info => "\x1b[1;34m",
            Status::Skipped | Status::Warning => "\x1b[1;33m",
            Status::Error => "\x1b[1;31m",
        }
    }
}

/// Width of the right-aligned status column.
const STATUS_WIDTH: usize = 12;

/// Central shell for all CLI output.
pub struct Shell {
    mode: ShellMode,
    use_color: bool,
    /// JSON lines written so far
    json_output: Mutex<Vec<String>>,
    /// Package progress bar, human normal mode only
    progress: Mutex<Option<ProgressBar>>,
}

impl Shell {
    /// Create a new shell with the given mode.
    pub fn new(mode: ShellMode) -> Self {
        let use_color = match &mode {
            ShellMode::Json => false,
            ShellMode::Human { color, .. } => match color {
                ColorChoice::Auto => io::stderr().is_terminal(),
                ColorChoice::Always => true,
                ColorChoice::Never => false,
            },
        };

        Shell {
            mode,
            use_color,
            json_output: Mutex::new(Vec::new()),
            progress: Mutex::new(None),
        }
    }

    /// Create a shell from CLI flags with proper precedence.
    ///
    /// JSON mode takes precedence over quiet/verbose.
    pub fn from_flags(
        quiet: bool,
        verbose: bool,
        color: ColorChoice,
        message_format_json: bool,
    ) -> Self {
        let mode = if message_format_json {
            ShellMode::Json
        } else {
            let verbosity = if quiet {
                Verbosity::Quiet
            } else if verbose {
                Verbosity::Verbose
            } else {
                Verbosity::Normal
            };
            ShellMode::Human { verbosity, color }
        };

        Shell::new(mode)
    }

    /// Get the current shell mode.
    pub fn mode(&self) -> &ShellMode {
        &self.mode
    }

    /// Check if shell is in quiet mode.
    pub fn is_quiet(&self) -> bool {
        matches!(
            self.mode,
            ShellMode::Human {
                verbosity: Verbosity::Quiet,
                ..
            }
        )
    }

    /// Check if shell is in verbose mode.
    pub fn is_verbose(&self) -> bool {
        matches!(
            self.mode,
            ShellMode::Human {
                verbosity: Verbosity::Verbose,
                ..
            }
        )
    }

    /// Check if shell is in JSON mode.
    pub fn is_json(&self) -> bool {
        matches!(self.mode, ShellMode::Json)
    }

    /// Check if colors are enabled.
    pub fn use_color(&self) -> bool {
        self.use_color
    }

    /// Print a status message.
    ///
    /// Format: `{status:>12} {message}`
    ///
    /// In quiet mode, only Error status is printed.
    /// In JSON mode, messages are silently ignored (use json_event for JSON output).
    pub fn status(&self, status: Status, msg: impl Display) {
        if self.is_json() {
            return;
        }

        if self.is_quiet() && status != Status::Error {
            return;
        }

        let line = format!("{} {}", self.format_status(status), msg);
        self.print_line(&line);
    }

    /// Print an info message.
    pub fn note(&self, msg: impl Display) {
        self.status(Status::Info, msg);
    }

    /// Print a warning message.
    pub fn warn(&self, msg: impl Display) {
        self.status(Status::Warning, msg);
    }

    /// Print an error message.
    ///
    /// In JSON mode, this outputs a JSON error event.
    pub fn error(&self, msg: impl Display) {
        if self.is_json() {
            let event = serde_json::json!({
                "reason": "error",
                "message": msg.to_string()
            });
            self.json_event(&event);
        } else {
            self.status(Status::Error, msg);
        }
    }

    /// Print plain text to stdout (listings, dependency trees).
    ///
    /// Ignored in JSON mode.
    pub fn print(&self, msg: impl Display) {
        if self.is_json() {
            return;
        }
        println!("{}", msg);
    }

    /// Print a JSON event to stdout.
    ///
    /// Only works in JSON mode; silently ignored in human mode.
    pub fn json_event(&self, event: &serde_json::Value) {
        if !self.is_json() {
            return;
        }
        self.json_line(serde_json::to_string(event).unwrap_or_default());
    }

    fn json_line(&self, line: String) {
        println!("{}", line);
        let _ = io::stdout().flush();

        if let Ok(mut buffer) = self.json_output.lock() {
            buffer.push(line);
        }
    }

    /// JSON lines emitted so far.
    pub fn json_lines(&self) -> Vec<String> {
        self.json_output
            .lock()
            .map(|b| b.clone())
            .unwrap_or_default()
    }

    /// Format a status prefix with optional color.
    fn format_status(&self, status: Status) -> String {
        let text = status.as_str();

        if self.use_color {
            let color = status.color_code();
            format!("{}{:>width$}\x1b[0m", color, text, width = STATUS_WIDTH)
        } else {
            format!("{:>width$}", text, width = STATUS_WIDTH)
        }
    }

    fn print_line(&self, line: &str) {
        let guard = self.progress.lock().unwrap_or_else(|e| e.into_inner());
        match guard.as_ref() {
            Some(pb) => pb.suspend(|| eprintln!("{}", line)),
            None => eprintln!("{}", line),
        }
    }

    /// Show a progress bar over `total` packages.
    ///
    /// No bar is drawn in quiet, verbose or JSON mode, or for a single package.
    pub fn start_progress(&self, total: u64, msg: impl Display) {
        if self.is_quiet() || self.is_verbose() || self.is_json() || total <= 1 {
            return;
        }

        let pb = ProgressBar::new(total);
        let template = "{spinner:.green} {msg} [{bar:40.cyan/blue}] {pos}/{len}";
        if let Ok(style) = ProgressStyle::default_bar().template(template) {
            pb.set_style(style.progress_chars("#>-"));
        }
        pb.set_message(msg.to_string());
        pb.enable_steady_tick(Duration::from_millis(120));

        *self.progress.lock().unwrap_or_else(|e| e.into_inner()) = Some(pb);
    }

    fn inc_progress(&self) {
        if let Some(pb) = self.progress.lock().unwrap_or_else(|e| e.into_inner()).as_ref() {
            pb.inc(1);
        }
    }

    /// Remove the progress bar, if any.
    pub fn finish_progress(&self) {
        if let Some(pb) = self.progress.lock().unwrap_or_else(|e| e.into_inner()).take() {
            pb.finish_and_clear();
        }
    }
}

impl Default for Shell {
    fn default() -> Self {
        Shell::new(ShellMode::default())
    }
}

impl Reporter for Shell {
    fn event(&self, event: &BuildEvent) {
        if self.is_json() {
            self.json_line(event.to_json());
            return;
        }

        match event {
            BuildEvent::Plan { packages } => {
                if self.is_verbose() {
                    self.status(Status::Resolving, format!("plan: {}", packages.join(", ")));
                }
                self.start_progress(packages.len() as u64, "Installing");
            }
            BuildEvent::FetchStarted { package_id, url } => {
                if self.is_verbose() {
                    self.status(Status::Fetching, format!("{} ({})", package_id, url));
                } else {
                    self.status(Status::Fetching, package_id);
                }
            }
            BuildEvent::FetchFinished { package_id, cached } => {
                if *cached && self.is_verbose() {
                    self.note(format!("{}: using cached archive", package_id));
                }
            }
            BuildEvent::BuildStarted { package_id, steps } => {
                self.status(Status::Building, format!("{} ({} steps)", package_id, steps));
            }
            BuildEvent::StepStarted {
                package_id,
                index,
                command,
            } => {
                if self.is_verbose() {
                    self.status(
                        Status::Running,
                        format!("{} [{}] {}", package_id, index + 1, command),
                    );
                }
            }
            BuildEvent::PackageInstalled {
                package_id,
                files,
                duration_ms,
            } => {
                self.inc_progress();
                self.status(
                    Status::Installed,
                    format!(
                        "{} ({} files) in {}",
                        package_id,
                        files,
                        format_duration(Duration::from_millis(*duration_ms))
                    ),
                );
            }
            BuildEvent::PackageFailed { .. } => {
                // Rendered as a diagnostic by the command.
                self.finish_progress();
            }
            BuildEvent::VerifyFinished {
                package_id,
                passed,
                failed_action,
            } => {
                if *passed {
                    self.status(Status::Tested, package_id);
                } else {
                    self.warn(format!(
                        "test of {} failed at `{}`",
                        package_id,
                        failed_action.as_deref().unwrap_or("setup")
                    ));
                }
            }
            BuildEvent::PackageRemoved {
                package_id,
                files_removed,
                files_kept,
            } => {
                let kept = if *files_kept > 0 {
                    format!(", {} shared kept", files_kept)
                } else {
                    String::new()
                };
                self.status(
                    Status::Removed,
                    format!("{} ({} files{})", package_id, files_removed, kept),
                );
            }
            BuildEvent::Finished {
                success,
                duration_ms,
                packages,
            } => {
                self.finish_progress();
                if *success {
                    self.status(
                        Status::Finished,
                        format!(
                            "{} package(s) in {}",
                            packages,
                            format_duration(Duration::from_millis(*duration_ms))
                        ),
                    );
                }
            }
            BuildEvent::Warning { message } => self.warn(message),
        }
    }
}

/// Format a duration in a human-readable way.
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs_f64();
    if secs < 60.0 {
        format!("{:.2}s", secs)
    } else {
        let mins = secs / 60.0;
        format!("{:.1}m", mins)
    }
}
