//! `cellar uninstall` command

use std::sync::Arc;

use anyhow::Result;

use crate::cli::UninstallArgs;
use cellar::ops::{uninstall, Session, UninstallOptions};
use cellar::util::shell::Status;
use cellar::util::{GlobalContext, Shell};

pub fn execute(args: UninstallArgs, ctx: &GlobalContext, shell: &Arc<Shell>) -> Result<()> {
    let session = Session::new(ctx, shell.clone())?;

    let opts = UninstallOptions {
        name: args.name,
        force: args.force,
    };
    let report = uninstall(&session, &opts)?;

    if shell.is_verbose() {
        for path in &report.kept {
            shell.status(Status::Skipped, format!("{} (still used)", path));
        }
    }

    Ok(())
}
