//! `cellar list` command

use std::sync::Arc;

use anyhow::Result;

use crate::cli::ListArgs;
use cellar::ops::{list, ListEntry, Session};
use cellar::util::{GlobalContext, Shell};

pub fn execute(args: ListArgs, ctx: &GlobalContext, shell: &Arc<Shell>) -> Result<()> {
    let session = Session::new(ctx, shell.clone())?;
    let entries = list(&session, args.available)?;

    if shell.is_json() {
        for entry in &entries {
            shell.json_event(&serde_json::json!({
                "reason": "package",
                "package": entry,
            }));
        }
        return Ok(());
    }

    if entries.is_empty() && !shell.is_quiet() {
        let what = if args.available {
            "no packages in the registry"
        } else {
            "no packages installed"
        };
        shell.note(what);
        return Ok(());
    }

    let width = entries.iter().map(|e| e.name.len()).max().unwrap_or(0);
    for entry in &entries {
        shell.print(format_entry(entry, width, args.available));
    }

    Ok(())
}

fn format_entry(entry: &ListEntry, width: usize, available: bool) -> String {
    if !available {
        let marker = if entry.requested { "" } else { " (dependency)" };
        return format!("{:<width$}  {}{}", entry.name, entry.version, marker);
    }

    let marker = if entry.installed { "*" } else { " " };
    let line = format!("{} {:<width$}  {}", marker, entry.name, entry.version);
    match &entry.description {
        Some(description) => format!("{}  {}", line, description),
        None => line,
    }
}
