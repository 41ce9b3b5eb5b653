//! `cellar install` command

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use crate::cli::InstallArgs;
use cellar::ops::{install, InstallOptions, Session};
use cellar::util::diagnostic::emit;
use cellar::util::shell::Status;
use cellar::util::{GlobalContext, Shell};
use cellar::verify::VerificationFailure;

pub fn execute(args: InstallArgs, ctx: &GlobalContext, shell: &Arc<Shell>) -> Result<()> {
    let session = Session::new(ctx, shell.clone())?;

    // Jobs: CLI > config > CPU count
    let opts = InstallOptions {
        names: args.names,
        jobs: args.jobs.or(ctx.config().install.jobs),
        no_verify: args.no_verify,
        timeout: args.timeout.map(Duration::from_secs),
    };

    shell.status(Status::Resolving, opts.names.join(", "));
    let summary = install(&session, &opts)?;

    for id in &summary.already_installed {
        if opts.names.iter().any(|n| n == id.name().as_str()) {
            shell.status(Status::Skipped, format!("{} is already installed", id));
        }
    }

    if shell.is_verbose() && !shell.is_json() {
        for failure in summary
            .failed_tests()
            .filter_map(VerificationFailure::from_result)
        {
            emit(&failure.to_diagnostic().into_warning(), shell.use_color());
        }
    }

    Ok(())
}
