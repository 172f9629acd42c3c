/// A bidder that only bids until it has won once.
///
/// `bidding_logic_stop_bidding_after_win.js` bids 2 while `prevWins` is empty
/// and 0 afterwards, so the first auction has a winner and the second has none.

use crate::logger::{Logger, LogEvent};
use crate::scenarios::{auction, group, origin, Checks, ScenarioContext, World};
use crate::logln;
use std::time::Duration;

inventory::submit!(crate::scenarios::ScenarioEntry {
    short_name: "stop_bidding_after_win",
    run,
});

pub fn run(ctx: &ScenarioContext, logger: &mut Logger) -> Result<(), Box<dyn std::error::Error>> {
    let buyer = origin("https://buyer.example")?;
    let seller = origin("https://seller.example")?;
    let mut world = World::new(ctx);
    world.browser.join(group(&buyer, "once", "bidding_logic_stop_bidding_after_win.js")?);
    let config = auction(&seller, "decision_logic.js", &[&buyer])?;

    let first = world.run_auction(&config, logger)?;
    world.browser.advance(Duration::from_secs(60));
    let second = world.run_auction(&config, logger)?;
    logln!(logger, LogEvent::Scenario, "");

    let mut checks = Checks::new();
    checks.check(
        logger,
        first.winner.as_ref().map(|w| w.bid) == Some(2.0),
        format!("First auction won with 2: {:?}", first.winner.as_ref().map(|w| w.bid)),
    );
    checks.check(logger, second.winner.is_none(), format!("Second auction has no winner: {:?}", second.winner.as_ref().map(|w| w.bid)));
    checks.check(
        logger,
        second.candidates.is_empty(),
        format!("A zero bid never becomes a candidate: {} candidates", second.candidates.len()),
    );
    let index = world.browser.bidding_groups(&buyer).first().copied();
    let wins = index.map(|i| world.browser.prev_wins(i));
    let elapsed = wins.as_ref().and_then(|w| w.0.first()).map(|w| w.elapsed);
    checks.check(
        logger,
        elapsed == Some(Duration::from_secs(60)),
        format!("prevWins holds the single win, 60s old: {:?}", elapsed),
    );
    checks.finish(ctx.name)
}
