//! cellar CLI - build and install packages from declarative descriptors

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

mod cli;
mod commands;

use cellar::ops::Failure;
use cellar::util::diagnostic::emit;
use cellar::util::{GlobalContext, Shell};
use cli::{Cli, Commands, MessageFormat};

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            // Usage errors must not collide with the resolution exit code.
            std::process::exit(if e.use_stderr() { 1 } else { 0 });
        }
    };

    init_logging(&cli);

    let shell = Arc::new(Shell::from_flags(
        cli.quiet,
        cli.verbose,
        cli.color,
        cli.message_format == MessageFormat::Json,
    ));

    if let Err(e) = run(cli, &shell) {
        shell.finish_progress();
        std::process::exit(report(&shell, &e));
    }
}

fn init_logging(cli: &Cli) {
    let default = if cli.verbose {
        "cellar=debug"
    } else if cli.quiet {
        "cellar=error"
    } else {
        "cellar=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();
}

fn run(cli: Cli, shell: &Arc<Shell>) -> Result<()> {
    if let Commands::Completions(args) = cli.command {
        return commands::completions::execute(args);
    }

    let mut ctx = GlobalContext::new(cli.root, cli.registries)?;
    ctx.set_verbose(cli.verbose);
    ctx.set_color(shell.use_color());

    match cli.command {
        Commands::Install(args) => commands::install::execute(args, &ctx, shell),
        Commands::Uninstall(args) => commands::uninstall::execute(args, &ctx, shell),
        Commands::Test(args) => commands::test::execute(args, &ctx, shell),
        Commands::List(args) => commands::list::execute(args, &ctx, shell),
        Commands::Deps(args) => commands::deps::execute(args, &ctx, shell),
        Commands::Cleanup(args) => commands::cleanup::execute(args, &ctx, shell),
        Commands::Completions(_) => Ok(()),
    }
}

/// Print the error and pick the exit code.
fn report(shell: &Shell, err: &anyhow::Error) -> i32 {
    let (diagnostic, code) = match err.downcast_ref::<Failure>() {
        Some(failure) => (failure.to_diagnostic(), failure.exit_code()),
        None => (cellar::util::Diagnostic::error(format!("{:#}", err)), 1),
    };

    if shell.is_json() {
        shell.json_event(&serde_json::json!({
            "reason": "error",
            "message": diagnostic.message,
            "context": diagnostic.context,
            "output": diagnostic.output,
            "exit_code": code,
        }));
    } else {
        emit(&diagnostic, shell.use_color());
    }

    code
}
