//! CLI definitions using clap.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use clap_complete::Shell as CompletionShell;

use cellar::util::shell::ColorChoice;

/// cellar - build and install packages from declarative descriptors
#[derive(Parser)]
#[command(name = "cellar")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Install root (defaults to $CELLAR_ROOT, then the user data directory)
    #[arg(long, global = true, value_name = "DIR")]
    pub root: Option<PathBuf>,

    /// Descriptor directory, searched in the order given
    #[arg(long = "registry", global = true, value_name = "DIR")]
    pub registries: Vec<PathBuf>,

    /// Show every build step
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Print errors only
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Output format for status messages
    #[arg(long, global = true, value_enum, default_value_t = MessageFormat::Human)]
    pub message_format: MessageFormat,

    /// Coloring: auto, always, never
    #[arg(long, global = true, default_value = "auto")]
    pub color: ColorChoice,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum MessageFormat {
    Human,
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Build and install packages with their dependencies
    Install(InstallArgs),

    /// Remove an installed package
    Uninstall(UninstallArgs),

    /// Run the test block of an installed package
    Test(TestArgs),

    /// List installed packages
    List(ListArgs),

    /// Show the resolved dependencies of a package
    Deps(DepsArgs),

    /// Remove working directories kept by failed builds
    Cleanup(CleanupArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

#[derive(Args)]
pub struct InstallArgs {
    /// Packages to install
    #[arg(required = true)]
    pub names: Vec<String>,

    /// Number of packages built in parallel
    #[arg(short, long)]
    pub jobs: Option<usize>,

    /// Skip post-install tests
    #[arg(long)]
    pub no_verify: bool,

    /// Give up on all builds after this many seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,
}

#[derive(Args)]
pub struct UninstallArgs {
    /// Package to remove
    pub name: String,

    /// Remove even if other installed packages depend on it
    #[arg(long)]
    pub force: bool,
}

#[derive(Args)]
pub struct TestArgs {
    /// Installed package to test
    pub name: String,
}

#[derive(Args)]
pub struct ListArgs {
    /// List every package in the registry instead
    #[arg(long)]
    pub available: bool,
}

#[derive(Args)]
pub struct DepsArgs {
    /// Package to resolve
    pub name: String,

    /// Include test dependencies
    #[arg(long)]
    pub include_test: bool,

    /// Print the build order instead of a tree
    #[arg(long)]
    pub order: bool,
}

#[derive(Args)]
pub struct CleanupArgs {
    /// Also empty the download cache
    #[arg(long)]
    pub downloads: bool,
}

#[derive(Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: CompletionShell,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "cellar",
            "install",
            "xkbcomp",
            "--root",
            "/opt/cellar",
            "--registry",
            "a",
            "--registry",
            "b",
            "-j",
            "4",
            "--message-format",
            "json",
        ])
        .unwrap();

        assert_eq!(cli.root, Some(PathBuf::from("/opt/cellar")));
        assert_eq!(cli.registries, vec![PathBuf::from("a"), PathBuf::from("b")]);
        assert_eq!(cli.message_format, MessageFormat::Json);
        match cli.command {
            Commands::Install(args) => {
                assert_eq!(args.names, vec!["xkbcomp"]);
                assert_eq!(args.jobs, Some(4));
            }
            _ => panic!("expected install"),
        }
    }

    #[test]
    fn test_verbose_conflicts_with_quiet() {
        assert!(Cli::try_parse_from(["cellar", "-v", "-q", "list"]).is_err());
    }
}
