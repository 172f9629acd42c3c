/// Debug reports, private aggregation and beacons from one auction, and the
/// debug-report lockout that follows it.
///
/// Two buyers bid 3 and 1 with `bidding_logic_debug_reports.js`. The first
/// auction sends a win report for one and a loss report for the other, with
/// their macros filled in. Since the host is configured to lock out debug
/// reporting after the first report, the second auction sends none.

use crate::logger::{Logger, LogEvent};
use crate::origin::Origin;
use crate::reporting::ResolvedContribution;
use crate::scenarios::{auction, group, origin, Checks, ScenarioContext, World};
use crate::worklets::bidding_debug_reports::{REAL_TIME_BUCKET, REJECT_REASON_OFFSET, WIN_BUCKET};
use crate::logln;
use serde_json::json;

inventory::submit!(crate::scenarios::ScenarioEntry {
    short_name: "debug_report_lockout",
    run,
});

pub fn run(ctx: &ScenarioContext, logger: &mut Logger) -> Result<(), Box<dyn std::error::Error>> {
    let high = origin("https://high.example")?;
    let low = origin("https://low.example")?;
    let seller = origin("https://seller.example")?;
    let mut world = World::new(ctx);
    world.config.debug_report_sampling_rate = 1.0;
    world.config.debug_lockout_after_report = true;
    for (owner, bid) in [(&high, 3), (&low, 1)] {
        let mut g = group(owner, "debug", "bidding_logic_debug_reports.js")?;
        g.user_bidding_signals = Some(json!({ "bid": bid }));
        world.browser.join(g);
    }
    let config = auction(&seller, "decision_logic.js", &[&high, &low])?;

    let first = world.run_auction(&config, logger)?;
    let second = world.run_auction(&config, logger)?;
    logln!(logger, LogEvent::Scenario, "");

    let mut checks = Checks::new();
    let reports: Vec<&str> = first.debug_reports.iter().map(|u| u.as_str()).collect();
    checks.check(
        logger,
        reports.contains(&"https://high.example/debug_win?name=debug&bid=3&made=true&hsob=1"),
        format!("Win report has its macros filled in: {:?}", reports),
    );
    checks.check(
        logger,
        reports.contains(&"https://low.example/debug_loss?name=debug&bid=3&reason=not-available"),
        format!("Loss report has its macros filled in: {:?}", reports),
    );

    let contributions = |owner: &Origin| first.private_aggregation.iter().filter(move |(o, _)| o == owner).map(|(_, c)| *c).collect::<Vec<_>>();
    let winner_contributions = contributions(&high);
    checks.check(
        logger,
        winner_contributions.contains(&ResolvedContribution { bucket: WIN_BUCKET, value: 30 })
            && winner_contributions.contains(&ResolvedContribution { bucket: WIN_BUCKET - 1, value: 1 })
            && winner_contributions.contains(&ResolvedContribution { bucket: WIN_BUCKET + 2, value: 1 }),
        format!("Winner's win, always and reportWin contributions resolved: {:?}", winner_contributions),
    );
    let loser_contributions = contributions(&low);
    checks.check(
        logger,
        loser_contributions.contains(&ResolvedContribution { bucket: REJECT_REASON_OFFSET as u128, value: 1 })
            && !loser_contributions.iter().any(|c| c.bucket == WIN_BUCKET),
        format!("Loser only gets its loss contribution: {:?}", loser_contributions),
    );
    checks.check(
        logger,
        first.deferred_aggregation.len() == 1 && first.deferred_aggregation.iter().all(|(o, event, _)| o == &high && event == "click"),
        format!("Only the winner's click contribution waits for its event: {:?}", first.deferred_aggregation),
    );
    checks.check(
        logger,
        first.real_time.iter().filter(|(_, c)| c.bucket == REAL_TIME_BUCKET).count() == 2,
        format!("Both bidders contributed to real-time reporting: {:?}", first.real_time),
    );
    let beacons: Vec<&str> = first.beacons.iter().filter(|b| b.origin == high).map(|b| b.event.as_str()).collect();
    checks.check(
        logger,
        beacons.contains(&"click") && beacons.contains(&"reserved.top_navigation"),
        format!("Winner registered its beacons: {:?}", beacons),
    );
    checks.check(
        logger,
        second.debug_reports.is_empty(),
        format!("Lockout suppresses the second auction's debug reports: {:?}", second.debug_reports),
    );
    checks.check(
        logger,
        second.winner.as_ref().map(|w| &w.owner) == Some(&high),
        "The lockout does not change who wins".to_string(),
    );
    checks.finish(ctx.name)
}
