//! `cellar cleanup` command

use std::sync::Arc;

use anyhow::Result;

use crate::cli::CleanupArgs;
use cellar::ops::{cleanup, CleanupOptions, Session};
use cellar::util::shell::Status;
use cellar::util::{GlobalContext, Shell};

pub fn execute(args: CleanupArgs, ctx: &GlobalContext, shell: &Arc<Shell>) -> Result<()> {
    let session = Session::new(ctx, shell.clone())?;
    let report = cleanup(
        &session,
        &CleanupOptions {
            downloads: args.downloads,
        },
    )?;

    let noun = if report.workdirs == 1 {
        "directory"
    } else {
        "directories"
    };
    shell.status(
        Status::Removed,
        format!("{} working {}", report.workdirs, noun),
    );
    if report.downloads_cleared {
        shell.status(Status::Removed, ctx.layout().download_cache().display());
    }

    shell.json_event(&serde_json::json!({
        "reason": "cleanup",
        "workdirs": report.workdirs,
        "downloads_cleared": report.downloads_cleared,
    }));

    Ok(())
}
