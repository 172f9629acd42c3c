/// Bidding with a WebAssembly helper.
///
/// The group's `biddingWasmHelperURL` serves a module whose `compute(x)` is
/// `4 * x`; `bidding_logic_use_wasm.js` bids `compute(2)` and throws unless it
/// is 8. A second group points at a module that does not compile and so never
/// gets to bid.

use crate::errors::WorkletError;
use crate::logger::{Logger, LogEvent};
use crate::reporting::Phase;
use crate::scenarios::{auction, group, origin, url, Checks, ScenarioContext, World};
use crate::logln;

inventory::submit!(crate::scenarios::ScenarioEntry {
    short_name: "wasm_bidding",
    run,
});

const TIMES_FOUR: &str = r#"(module
  (func (export "compute") (param i32) (result i32)
    local.get 0
    i32.const 4
    i32.mul))"#;

pub fn run(ctx: &ScenarioContext, logger: &mut Logger) -> Result<(), Box<dyn std::error::Error>> {
    let buyer = origin("https://buyer.example")?;
    let seller = origin("https://seller.example")?;
    let mut world = World::new(ctx);

    let helper = url("https://buyer.example/helper.wasm")?;
    let broken = url("https://buyer.example/broken.wasm")?;
    world.resources.add_wasm_module(helper.clone(), TIMES_FOUR.as_bytes());
    world.resources.add_wasm_module(broken.clone(), &b"not a module"[..]);

    let mut good = group(&buyer, "wasm", "bidding_logic_use_wasm.js")?;
    good.bidding_wasm_helper_url = Some(helper);
    let mut bad = group(&buyer, "broken", "bidding_logic_use_wasm.js")?;
    bad.bidding_wasm_helper_url = Some(broken);
    world.browser.join(good);
    world.browser.join(bad);

    let outcome = world.run_auction(&auction(&seller, "decision_logic.js", &[&buyer])?, logger)?;
    logln!(logger, LogEvent::Scenario, "");

    let mut checks = Checks::new();
    checks.check(
        logger,
        outcome.winner.as_ref().map(|w| (w.group_name.as_str(), w.bid)) == Some(("wasm", 8.0)),
        format!("The wasm group bids compute(2) = 8: {:?}", outcome.winner.as_ref().map(|w| w.bid)),
    );
    let compile_failures = outcome.errors_in(Phase::GenerateBid).filter(|e| matches!(e.error, WorkletError::Wasm(_))).count();
    checks.check(logger, compile_failures == 1, format!("The broken module fails once: {}", compile_failures));
    checks.check(logger, outcome.candidates.len() == 1, format!("Only one group bid: {}", outcome.candidates.len()));
    checks.finish(ctx.name)
}
