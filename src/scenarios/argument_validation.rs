/// Both argument validators in one auction, fed by trusted signals servers.
///
/// `bidding_argument_validator.js` and `decision_argument_validator.js` throw
/// on the first argument that does not look the way the worklet API promises,
/// so a clean run with a winner and both reports means every phase got
/// well-formed arguments, including both casings of every URL field.

use crate::logger::{Logger, LogEvent};
use crate::resources::KeyValueServer;
use crate::scenarios::{auction, group, origin, url, Checks, ScenarioContext, World};
use crate::logln;
use serde_json::json;

inventory::submit!(crate::scenarios::ScenarioEntry {
    short_name: "argument_validation",
    run,
});

pub fn run(ctx: &ScenarioContext, logger: &mut Logger) -> Result<(), Box<dyn std::error::Error>> {
    let buyer = origin("https://buyer.example")?;
    let seller = origin("https://seller.example")?;
    let mut world = World::new(ctx);

    let bidding_kv = url("https://kv.buyer.example/signals")?;
    let scoring_kv = url("https://kv.seller.example/signals")?;
    world.resources.add_bidding_signals(
        bidding_kv.clone(),
        KeyValueServer::default().with_value("campaign", json!({ "budget": 100 })).with_data_version(7),
    );
    world.resources.add_scoring_signals(
        scoring_kv.clone(),
        KeyValueServer::default().with_value("https://buyer.example/ads/validated", json!({ "approved": true })).with_data_version(3),
    );

    let mut g = group(&buyer, "validated", "bidding_argument_validator.js")?;
    g.trusted_bidding_signals_url = Some(bidding_kv);
    g.trusted_bidding_signals_keys = vec!["campaign".to_string(), "unknown".to_string()];
    world.browser.join(g);

    let mut config = auction(&seller, "decision_argument_validator.js", &[&buyer])?;
    config.trusted_scoring_signals_url = Some(scoring_kv);
    config.auction_signals = Some(json!({ "floor": 0.5 }));
    let outcome = world.run_auction(&config, logger)?;
    logln!(logger, LogEvent::Scenario, "");

    let mut checks = Checks::new();
    checks.check(logger, outcome.errors.is_empty(), format!("No validator threw: {:?}", outcome.errors));
    checks.check(logger, outcome.winner.is_some(), "The validating bidder won".to_string());
    checks.check(
        logger,
        outcome.reports_from(&buyer).count() == 1 && outcome.reports_from(&seller).count() == 1,
        format!("Both reports were sent: {:?}", outcome.reports),
    );
    checks.check(
        logger,
        outcome.report_win_seller_signals == Some(json!({ "validatedBy": "decision_argument_validator", "bid": 1.0 })),
        format!("reportWin saw the validated reportResult output: {:?}", outcome.report_win_seller_signals),
    );
    let versions = outcome.candidates.first().map(|c| (c.bidding_data_version, c.scoring_data_version));
    checks.check(
        logger,
        versions == Some((Some(7), Some(3))),
        format!("Data versions of both signals servers are carried: {:?}", versions),
    );
    checks.finish(ctx.name)
}
