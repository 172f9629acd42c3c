/// Multi-bid: `bidding_logic_multibid_feature.js` insists on a multiBidLimit of
/// 3 and returns a one-element bid list.
///
/// With `perBuyerMultiBidLimits` set to 3 it wins with 3; without it the
/// default limit of 1 makes the bidder throw, which only costs it the auction.

use crate::errors::WorkletError;
use crate::logger::{Logger, LogEvent};
use crate::per_buyer::PerBuyer;
use crate::reporting::Phase;
use crate::scenarios::{auction, group, origin, Checks, ScenarioContext, World};
use crate::logln;

inventory::submit!(crate::scenarios::ScenarioEntry {
    short_name: "multibid",
    run,
});

pub fn run(ctx: &ScenarioContext, logger: &mut Logger) -> Result<(), Box<dyn std::error::Error>> {
    let buyer = origin("https://buyer.example")?;
    let seller = origin("https://seller.example")?;
    let mut world = World::new(ctx);
    world.browser.join(group(&buyer, "many", "bidding_logic_multibid_feature.js")?);

    let mut with_limit = auction(&seller, "decision_logic.js", &[&buyer])?;
    with_limit.per_buyer_multi_bid_limits = PerBuyer::new().with_wildcard(3);
    let allowed = world.run_auction(&with_limit, logger)?;
    let default_limit = world.run_auction(&auction(&seller, "decision_logic.js", &[&buyer])?, logger)?;
    logln!(logger, LogEvent::Scenario, "");

    let mut checks = Checks::new();
    checks.check(
        logger,
        allowed.winner.as_ref().map(|w| w.bid) == Some(3.0),
        format!("With multiBidLimit 3 the bid list wins with 3: {:?}", allowed.winner.as_ref().map(|w| w.bid)),
    );
    checks.check(logger, default_limit.winner.is_none(), "With the default limit nobody wins".to_string());
    let thrown = default_limit.errors_in(Phase::GenerateBid).any(|e| matches!(e.error, WorkletError::Thrown(_)));
    checks.check(logger, thrown, format!("The bidder threw at the default limit: {:?}", default_limit.errors));
    checks.finish(ctx.name)
}
