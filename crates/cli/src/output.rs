use crate::{error::CliError, load::LoadOutcome};
use connectors::sql::capture::CapturedCall;
use planner::plan::ValidatedPlan;
use serde_json::{Value, json};
use std::path::Path;

fn report_json(plan: &ValidatedPlan, outcome: &LoadOutcome) -> Value {
    let totals = outcome.report.totals();
    let workers: Vec<Value> = outcome
        .report
        .workers
        .iter()
        .map(|w| {
            json!({
                "worker": w.context.to_string(),
                "unique_nr": w.context.unique_nr,
                "truncated": w.truncated,
                "rows_reported": w.rows_reported,
                "rows_written": w.metrics.rows_written,
                "bytes_streamed": w.metrics.bytes_streamed,
                "errors": w.metrics.error_count,
            })
        })
        .collect();

    json!({
        "table": plan.target.to_string(),
        "load_action": plan.load_action.to_string(),
        "rows_read": outcome.rows_read,
        "rows_written": totals.rows_written,
        "bytes_streamed": totals.bytes_streamed,
        "errors": totals.error_count,
        "workers": workers,
    })
}

pub async fn write_report(
    plan: &ValidatedPlan,
    outcome: &LoadOutcome,
    path: &Path,
) -> Result<(), CliError> {
    let report_json = serde_json::to_string_pretty(&report_json(plan, outcome))?;
    tokio::fs::write(path, report_json).await?;
    Ok(())
}

pub fn print_report(plan: &ValidatedPlan, outcome: &LoadOutcome) -> Result<(), CliError> {
    let report_json = serde_json::to_string_pretty(&report_json(plan, outcome))?;
    println!("{report_json}");
    Ok(())
}

/// Renders what each worker of a dry run would have sent.
pub fn render_dry_run(plan: &ValidatedPlan, outcome: &LoadOutcome) -> String {
    let mut out = String::new();
    for (target, adapter) in &outcome.captured {
        out.push_str(&format!("-- worker {}", target.index));
        if let Some(partition) = &target.partition_id {
            out.push_str(&format!(" (partition {partition})"));
        }
        out.push('\n');

        for call in adapter.calls() {
            match call {
                CapturedCall::Exec(sql) => out.push_str(&format!("{sql}\n")),
                CapturedCall::SetAutoCommit(on) => {
                    out.push_str(&format!("-- auto-commit {}\n", if on { "on" } else { "off" }))
                }
                CapturedCall::Commit => out.push_str("COMMIT;\n"),
                CapturedCall::Rollback => out.push_str("ROLLBACK;\n"),
                CapturedCall::Truncate(_) => {
                    out.push_str(&plan.truncate_statement());
                    out.push('\n');
                }
                CapturedCall::CopyIn(command) => {
                    out.push_str(&command);
                    out.push('\n');
                    out.push_str(&adapter.stream_text());
                    out.push_str("\\.\n");
                }
                CapturedCall::Flush => {}
                CapturedCall::EndCopy { rows } => out.push_str(&format!("-- {rows} rows\n")),
            }
        }
    }
    out
}
