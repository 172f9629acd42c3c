/// Two-level auction.
///
/// Two component sellers each run `decision_logic_component.js` over their own
/// buyer. Component A halves its winner's bid of 10 through
/// `sellerSignals.bidMultiplier`, component B forwards a bid of 4 untouched.
/// The top-level seller scores the forwarded bids with `decision_logic.js`.

use crate::auction_config::AuctionConfig;
use crate::logger::{Logger, LogEvent};
use crate::reporting::Phase;
use crate::scenarios::{auction, group, origin, url, Checks, ScenarioContext, World};
use crate::logln;
use serde_json::json;

inventory::submit!(crate::scenarios::ScenarioEntry {
    short_name: "component_auction",
    run,
});

pub fn run(ctx: &ScenarioContext, logger: &mut Logger) -> Result<(), Box<dyn std::error::Error>> {
    let top_seller = origin("https://top.example")?;
    let seller_a = origin("https://component-a.example")?;
    let seller_b = origin("https://component-b.example")?;
    let buyer_a = origin("https://buyer-a.example")?;
    let buyer_b = origin("https://buyer-b.example")?;

    let mut world = World::new(ctx);
    for (owner, bid) in [(&buyer_a, 10.0), (&buyer_b, 4.0)] {
        let mut g = group(owner, "bikes", "bidding_logic_currency.js")?;
        g.user_bidding_signals = Some(json!({ "bid": bid }));
        world.browser.join(g);
    }

    let mut component_a = auction(&seller_a, "decision_logic_component.js", &[&buyer_a])?;
    component_a.seller_signals = Some(json!({ "bidMultiplier": 0.5 }));
    let component_b = auction(&seller_b, "decision_logic_component.js", &[&buyer_b])?;
    let mut top = AuctionConfig::new(top_seller.clone(), url("https://top.example/decision_logic.js")?);
    top.component_auctions = vec![component_a, component_b];

    let outcome = world.run_auction(&top, logger)?;
    logln!(logger, LogEvent::Scenario, "");

    let mut checks = Checks::new();
    let winner = outcome.winner.as_ref();
    checks.check(
        logger,
        winner.map(|w| (&w.owner, &w.seller)) == Some((&buyer_a, &seller_a)),
        format!("buyer-a wins through component A: {:?}", winner.map(|w| (w.owner.as_str(), w.seller.as_str()))),
    );
    checks.check(
        logger,
        winner.and_then(|w| w.modified_bid).map(|m| m.bid) == Some(5.0),
        format!("Component A forwards the bid halved: {:?}", winner.and_then(|w| w.modified_bid).map(|m| m.bid)),
    );
    checks.check(
        logger,
        winner.and_then(|w| w.top_level_seller.as_ref()) == Some(&top_seller),
        "Winner carries the top-level seller".to_string(),
    );
    checks.check(
        logger,
        winner.map(|w| w.highest_scoring_other_bid) == Some(4.0),
        format!("highestScoringOtherBid at the top level is 4: {:?}", winner.map(|w| w.highest_scoring_other_bid)),
    );
    let reported = [&top_seller, &seller_a, &buyer_a].iter().all(|o| outcome.reports_from(o).count() == 1);
    checks.check(logger, reported, format!("Top seller, component seller and buyer each reported: {:?}", outcome.reports));
    checks.check(logger, outcome.reports_from(&seller_b).count() == 0, "The losing component seller did not report".to_string());
    checks.check(
        logger,
        outcome.beacons.iter().any(|b| b.origin == seller_a && b.event == "click"),
        "Component A registered its click beacon".to_string(),
    );
    checks.check(logger, outcome.errors_in(Phase::ScoreAd).count() == 0, format!("Nothing failed scoring: {:?}", outcome.errors));
    checks.finish(ctx.name)
}
