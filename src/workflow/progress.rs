//! Markdown rendered for the progress comment, the pull request and the job summary.

use std::fmt::Write;
use std::path::Path;

use crate::workflow::types::{RunState, Stage, WorkflowRun};

const FOOTER: &str = "\n---\n*Hyphae*";

fn stage_table(run: &WorkflowRun) -> String {
    let mut out = String::from("| Stage | Status | Detail |\n|---|---|---|\n");
    for stage in Stage::ALL {
        let record = run.stages.iter().find(|r| r.stage == stage);
        let running = run.active.as_ref().is_some_and(|r| r.stage == stage);
        let (status, detail) = match record {
            Some(r) if r.success && !r.warnings.is_empty() => {
                ("⚠️ done with warnings", r.warnings.join("; "))
            }
            Some(r) if r.success => ("✅ done", r.result.clone().unwrap_or_default()),
            Some(r) => ("❌ failed", r.error.clone().unwrap_or_default()),
            None if running => ("⏳ running", String::new()),
            None => ("⬜ pending", String::new()),
        };
        let detail = detail.replace('|', "\\|").replace('\n', " ");
        let _ = writeln!(out, "| {} | {status} | {detail} |", stage.label());
    }
    out
}

fn run_link(run_url: Option<&str>) -> String {
    match run_url {
        Some(url) => format!("[logs]({url})"),
        None => "local run".to_string(),
    }
}

/// Body of the single comment a run keeps up to date on the ticket.
pub fn progress_comment(run: &WorkflowRun, run_url: Option<&str>) -> String {
    let headline = match run.state {
        RunState::Done => "Pull request opened".to_string(),
        RunState::Failed => "Run failed".to_string(),
        _ => match run.active.as_ref() {
            Some(active) => format!("Working: {}", active.stage.label()),
            None => "Working".to_string(),
        },
    };

    let mut out = format!(
        "### Hyphae run `{}`: {headline}\n\n{}\n",
        run.run_id,
        stage_table(run)
    );
    if let Some(branch) = &run.branch {
        let _ = writeln!(out, "**Branch:** `{branch}`");
    }
    if let Some(plan) = &run.plan_path {
        let _ = writeln!(out, "**Plan:** `{}`", plan.display());
    }
    if let Some(url) = &run.pr_url {
        let _ = writeln!(out, "**Pull request:** {url}");
    }
    let _ = writeln!(out, "\n{}", run_link(run_url));
    out.push_str(FOOTER);
    out
}

/// Progress comment once the run has failed.
pub fn failure_comment(run: &WorkflowRun, run_url: Option<&str>, artifacts: &Path) -> String {
    let stage = run
        .failed_stage()
        .map(|s| format!("`{s}`"))
        .unwrap_or_else(|| "setup".to_string());
    let error = run.error.as_deref().unwrap_or("unknown error");

    let mut out = format!(
        "### Hyphae run `{}`: Run failed\n\n{}\nFailed during {stage}:\n\n```\n{error}\n```\n\n",
        run.run_id,
        stage_table(run)
    );
    if let Some(branch) = &run.branch {
        let _ = writeln!(out, "**Branch:** `{branch}` (left in place)");
    }
    let _ = writeln!(out, "**Artifacts:** `{}`", artifacts.display());
    let _ = writeln!(out, "\n{}", run_link(run_url));
    out.push_str(FOOTER);
    out
}

pub fn pull_request_body(run: &WorkflowRun, run_url: Option<&str>) -> String {
    let mut out = format!("Closes #{}\n\n", run.ticket_number);
    if let Some(plan) = &run.plan_path {
        let _ = writeln!(out, "Implements the plan in `{}`.\n", plan.display());
    }
    let _ = write!(
        out,
        "## Run `{}`\n\n{}\n{}\n",
        run.run_id,
        stage_table(run),
        run_link(run_url)
    );
    let warnings: Vec<&str> = run.warnings().collect();
    if !warnings.is_empty() {
        out.push_str("\n## Warnings\n\n");
        for warning in warnings {
            let _ = writeln!(out, "- {warning}");
        }
    }
    out.push_str(FOOTER);
    out
}

/// Job summary appended once a run has opened its pull request.
pub fn job_summary(run: &WorkflowRun) -> String {
    let mut out = format!(
        "## Hyphae run `{}` for #{}\n\n| Output | Value |\n|---|---|\n",
        run.run_id, run.ticket_number
    );
    let rows = [
        (
            "Classification",
            run.classification.map(|c| c.as_str().to_string()),
        ),
        ("Branch", run.branch.clone()),
        (
            "Plan",
            run.plan_path.as_ref().map(|p| p.display().to_string()),
        ),
        ("Pull request", run.pr_url.clone()),
    ];
    for (name, value) in rows {
        let _ = writeln!(out, "| {name} | {} |", value.unwrap_or_default());
    }
    let warnings: Vec<&str> = run.warnings().collect();
    if !warnings.is_empty() {
        let _ = writeln!(out, "\n**Warnings:** {}", warnings.join("; "));
    }
    out
}
