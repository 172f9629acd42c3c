/// A `reportWin` that never returns.
///
/// `report_win_loop_forever.js` queues its report and then spins until it is
/// cancelled. With `reportingTimeout` set to 100ms the invocation is cut off,
/// its queued report is discarded, and the seller's report still goes out.

use crate::errors::WorkletError;
use crate::logger::{Logger, LogEvent};
use crate::reporting::Phase;
use crate::scenarios::{auction, group, origin, Checks, ScenarioContext, World};
use crate::logln;
use std::time::{Duration, Instant};

inventory::submit!(crate::scenarios::ScenarioEntry {
    short_name: "reporting_timeout",
    run,
});

const REPORTING_TIMEOUT_MS: u64 = 100;

pub fn run(ctx: &ScenarioContext, logger: &mut Logger) -> Result<(), Box<dyn std::error::Error>> {
    let buyer = origin("https://buyer.example")?;
    let seller = origin("https://seller.example")?;
    let mut world = World::new(ctx);
    world.browser.join(group(&buyer, "slow", "report_win_loop_forever.js")?);

    let mut config = auction(&seller, "decision_logic.js", &[&buyer])?;
    config.reporting_timeout = Some(REPORTING_TIMEOUT_MS);
    let started = Instant::now();
    let outcome = world.run_auction(&config, logger)?;
    let elapsed = started.elapsed();
    logln!(logger, LogEvent::Scenario, "auction took {:?}", elapsed);

    let mut checks = Checks::new();
    checks.check(logger, outcome.winner.is_some(), "The looping bidder still wins".to_string());
    let timed_out = outcome
        .errors_in(Phase::ReportWin)
        .any(|e| matches!(e.error, WorkletError::Timeout { timeout_ms: REPORTING_TIMEOUT_MS, .. }));
    checks.check(logger, timed_out, format!("reportWin timed out after {}ms: {:?}", REPORTING_TIMEOUT_MS, outcome.errors));
    checks.check(
        logger,
        outcome.reports_from(&buyer).count() == 0,
        "The report queued before the timeout was discarded".to_string(),
    );
    checks.check(logger, outcome.reports_from(&seller).count() == 1, "The seller report was sent".to_string());
    checks.check(
        logger,
        elapsed < Duration::from_secs(5),
        format!("The auction did not wait for the loop: {:?}", elapsed),
    );
    checks.finish(ctx.name)
}
