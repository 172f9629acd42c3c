/// The smallest complete auction.
///
/// One buyer with one interest group bids 1 with `bidding_logic.js`, the seller
/// scores with `decision_logic.js`. Checks the winner, both reports, that the
/// seller's `reportResult` return value reaches `reportWin` as `sellerSignals`,
/// and that the browser recorded the bid and the win.

use crate::logger::{Logger, LogEvent};
use crate::reporting::Phase;
use crate::scenarios::{auction, group, origin, Checks, ScenarioContext, World};
use crate::logln;
use serde_json::json;

// Register this scenario in the catalog
inventory::submit!(crate::scenarios::ScenarioEntry {
    short_name: "basic_auction",
    run,
});

pub fn run(ctx: &ScenarioContext, logger: &mut Logger) -> Result<(), Box<dyn std::error::Error>> {
    let buyer = origin("https://buyer.example")?;
    let seller = origin("https://seller.example")?;
    let mut world = World::new(ctx);
    world.browser.join(group(&buyer, "shoes", "bidding_logic.js")?);

    let outcome = world.run_auction(&auction(&seller, "decision_logic.js", &[&buyer])?, logger)?;
    logln!(logger, LogEvent::Scenario, "");

    let mut checks = Checks::new();
    let winner = outcome.winner.as_ref();
    checks.check(
        logger,
        winner.map(|w| w.bid) == Some(1.0),
        format!("Winning bid is 1: {:?}", winner.map(|w| w.bid)),
    );
    checks.check(
        logger,
        winner.map(|w| w.render_url.as_str()) == Some("https://buyer.example/ads/shoes"),
        format!("Winner renders the group's ad: {:?}", winner.map(|w| w.render_url.as_str())),
    );
    let seller_reports = outcome.reports.iter().filter(|r| r.phase == Phase::ReportResult).count();
    let bidder_reports = outcome.reports.iter().filter(|r| r.phase == Phase::ReportWin).count();
    checks.check(
        logger,
        seller_reports == 1 && bidder_reports == 1,
        format!("One seller and one bidder report were sent: {} and {}", seller_reports, bidder_reports),
    );
    checks.check(
        logger,
        outcome.report_win_seller_signals == Some(json!({ "signalForWinner": 1 })),
        format!("reportWin received the seller's signalsForWinner: {:?}", outcome.report_win_seller_signals),
    );
    let stored = world.browser.group(&buyer, "shoes");
    checks.check(
        logger,
        stored.map(|g| (g.bid_count, g.wins.len())) == Some((1, 1)),
        format!("Browser recorded one bid and one win: {:?}", stored.map(|g| (g.bid_count, g.wins.len()))),
    );
    checks.check(logger, outcome.errors.is_empty(), format!("No participant failed: {:?}", outcome.errors));
    checks.finish(ctx.name)
}
