//! `cellar deps` command

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;

use crate::cli::DepsArgs;
use cellar::builder::{BuildEvent, Reporter};
use cellar::ops::{deps, Session};
use cellar::util::{GlobalContext, Shell};
use cellar::{PackageId, ResolvedPlan};

pub fn execute(args: DepsArgs, ctx: &GlobalContext, shell: &Arc<Shell>) -> Result<()> {
    let session = Session::new(ctx, shell.clone())?;
    let plan = deps(&session, &args.name, args.include_test)?;

    if shell.is_json() {
        shell.event(&BuildEvent::plan(&plan.ids()));
        return Ok(());
    }

    let lines: Vec<String> = if args.order {
        plan.ids().iter().map(|id| id.to_string()).collect()
    } else {
        tree_lines(&plan)
    };
    for line in lines {
        shell.print(line);
    }

    Ok(())
}

/// Render the plan as a tree from its roots. Subtrees already shown are
/// marked with `(*)` and not repeated.
fn tree_lines(plan: &ResolvedPlan) -> Vec<String> {
    let mut lines = Vec::new();
    let mut seen = HashSet::new();
    for root in plan.roots() {
        walk(plan, *root, "", None, &mut seen, &mut lines);
    }
    lines
}

fn walk(
    plan: &ResolvedPlan,
    id: PackageId,
    indent: &str,
    last: Option<bool>,
    seen: &mut HashSet<PackageId>,
    lines: &mut Vec<String>,
) {
    let duplicate = !seen.insert(id);
    let branch = match last {
        None => "",
        Some(true) => "└── ",
        Some(false) => "├── ",
    };
    let marker = if duplicate && !plan.deps(id).is_empty() {
        " (*)"
    } else {
        ""
    };
    lines.push(format!("{}{}{}{}", indent, branch, id, marker));

    if duplicate {
        return;
    }

    let child_indent = match last {
        None => String::new(),
        Some(true) => format!("{}    ", indent),
        Some(false) => format!("{}│   ", indent),
    };
    let children = plan.deps(id);
    for (i, child) in children.iter().enumerate() {
        let is_last = i + 1 == children.len();
        walk(plan, *child, &child_indent, Some(is_last), seen, lines);
    }
}
