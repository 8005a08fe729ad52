//! One-shot discovery or sync, for one user or every active user.

use anyhow::{bail, Result};
use clap::Args;
use relist_core::UserId;
use relist_scheduler::{CycleKind, CycleOutcome, CycleReport};

use crate::app::App;

/// Arguments shared by `discover` and `sync`.
#[derive(Args, Debug, Clone)]
pub struct CycleArgs {
    /// User id; every active user when omitted
    #[arg(long)]
    pub user: Option<i64>,
}

/// Runs a single cycle of `kind` and prints what it did.
///
/// # Errors
/// Returns an error if the user list cannot be loaded or any cycle failed.
pub async fn run_one_cycle(app: &App, kind: CycleKind, args: CycleArgs) -> Result<()> {
    let scheduler = app.scheduler();

    let outcomes = match args.user {
        Some(user) => {
            let user_id = UserId(user);
            vec![(user_id, scheduler.run_cycle(user_id, kind).await)]
        }
        None => scheduler.run_round(kind).await?,
    };

    let mut failed = 0;
    for (user_id, outcome) in &outcomes {
        match outcome {
            CycleOutcome::Completed(report) => print!("{}", render(report)),
            CycleOutcome::Skipped(reason) => println!("User {user_id}: {kind} skipped ({reason:?})"),
            CycleOutcome::DeadlineExceeded => {
                failed += 1;
                println!("User {user_id}: {kind} exceeded its deadline");
            }
            CycleOutcome::Failed(message) => {
                failed += 1;
                println!("User {user_id}: {kind} failed: {message}");
            }
        }
    }

    if failed > 0 {
        bail!("{failed} of {} cycle(s) did not complete", outcomes.len());
    }
    Ok(())
}

fn render(report: &CycleReport) -> String {
    let mut out = format!(
        "User {}: {} finished in {} ms\n",
        report.user_id, report.kind, report.duration_ms
    );
    match report.kind {
        CycleKind::Discovery => out.push_str(&format!(
            "  listings {}  published {}  duplicates {}  filtered {}  deferred {}  publish failed {}  expired {}\n",
            report.listings,
            report.published,
            report.duplicates,
            report.filtered,
            report.deferred,
            report.publish_failed,
            report.expired,
        )),
        CycleKind::Sync => out.push_str(&format!(
            "  sales {}  repeated {}  unmatched {}  refused {}  fulfilled {}  redelivered {}  audit rejected {}  audit missing {}\n",
            report.sales_recorded,
            report.sales_duplicate,
            report.sales_unmatched,
            report.sales_refused,
            report.resumed.fulfilled,
            report.resumed.redelivered,
            report.audit.rejected,
            report.audit.missing,
        )),
    }
    if report.errors > 0 {
        out.push_str(&format!("  errors {}\n", report.errors));
    }
    out
}
