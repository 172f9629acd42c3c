/// Bids in different currencies, scored by a seller that works in EUR.
///
/// `decision_argument_validator.js` converts foreign bids with a fixed rate
/// table and returns the result as `incomingBidInSellerCurrency`. The winner is
/// picked on desirability (the raw bid), while `highestScoringOtherBid` is
/// reported in the seller's currency. A third buyer that is required to bid in
/// USD bids in CAD and is dropped before scoring.

use crate::currency::Currency;
use crate::errors::{ContractError, WorkletError};
use crate::logger::{Logger, LogEvent};
use crate::per_buyer::PerBuyer;
use crate::reporting::Phase;
use crate::scenarios::{auction, group, origin, Checks, ScenarioContext, World};
use crate::logln;
use serde_json::json;

inventory::submit!(crate::scenarios::ScenarioEntry {
    short_name: "currency_conversion",
    run,
});

pub fn run(ctx: &ScenarioContext, logger: &mut Logger) -> Result<(), Box<dyn std::error::Error>> {
    let usd_buyer = origin("https://usd.example")?;
    let eur_buyer = origin("https://eur.example")?;
    let cad_buyer = origin("https://cad.example")?;
    let seller = origin("https://seller.example")?;
    let usd = Currency::parse("USD")?;
    let eur = Currency::parse("EUR")?;

    let mut world = World::new(ctx);
    for (owner, bid, currency) in [(&usd_buyer, 10.0, "USD"), (&eur_buyer, 9.5, "EUR"), (&cad_buyer, 20.0, "CAD")] {
        let mut g = group(owner, "travel", "bidding_logic_currency.js")?;
        g.user_bidding_signals = Some(json!({ "bid": bid, "currency": currency }));
        world.browser.join(g);
    }

    let mut config = auction(&seller, "decision_argument_validator.js", &[&usd_buyer, &eur_buyer, &cad_buyer])?;
    config.seller_currency = Some(eur);
    config.per_buyer_currencies = PerBuyer::new().with_entry(cad_buyer.clone(), usd);
    let outcome = world.run_auction(&config, logger)?;
    logln!(logger, LogEvent::Scenario, "");

    let mut checks = Checks::new();
    let winner = outcome.winner.as_ref();
    checks.check(
        logger,
        winner.map(|w| &w.owner) == Some(&usd_buyer) && winner.and_then(|w| w.bid_currency) == Some(usd),
        format!("The USD bid of 10 wins on desirability: {:?}", winner.map(|w| (w.owner.as_str(), w.bid))),
    );
    let converted = winner.map(|w| w.bid_in_seller_currency).unwrap_or(0.0);
    checks.check(
        logger,
        (converted - 9.1).abs() < 1e-9,
        format!("Winning bid is 9.1 in EUR: {}", converted),
    );
    let hsob = winner.map(|w| w.highest_scoring_other_bid).unwrap_or(0.0);
    checks.check(logger, (hsob - 9.5).abs() < 1e-9, format!("highestScoringOtherBid is the EUR bid: {}", hsob));

    let mismatch = outcome
        .errors_in(Phase::GenerateBid)
        .any(|e| e.origin == cad_buyer && matches!(e.error, WorkletError::Contract(ContractError::CurrencyMismatch { .. })));
    checks.check(logger, mismatch, format!("The CAD bid is dropped for its currency: {:?}", outcome.errors));
    checks.check(
        logger,
        outcome.candidates.len() == 2,
        format!("Two bids reached the seller: {}", outcome.candidates.len()),
    );
    checks.check(
        logger,
        outcome.reports_from(&usd_buyer).count() == 1 && outcome.reports_from(&seller).count() == 1,
        "Seller and winning buyer both reported".to_string(),
    );
    checks.finish(ctx.name)
}
