use super::{ensure, first_ad};
use crate::bid::{Bid, GenerateBidOutput};
use crate::errors::{WorkletError, WorkletResult};
use crate::reporting::WorkletScope;
use crate::worklet::{BiddingLogic, GenerateBidArgs, WorkletEntry, WorkletKind};

inventory::submit!(WorkletEntry { script: "bidding_logic_use_wasm.js", kind: WorkletKind::Bidding(wasm_bidder) });

fn wasm_bidder() -> Box<dyn BiddingLogic> {
    Box::new(WasmBidder)
}

/// Bids whatever the helper module's `compute(2)` returns, which has to be 8
pub struct WasmBidder;

impl BiddingLogic for WasmBidder {
    fn generate_bid(&mut self, args: &GenerateBidArgs, scope: &mut WorkletScope) -> WorkletResult<GenerateBidOutput> {
        let helper = args.browser_signals.wasm_helper.as_ref().ok_or_else(|| WorkletError::thrown("no wasmHelper in browserSignals"))?;
        let result = helper.call_i32("compute", 2)?;
        scope.console_log(format!("compute(2) = {}", result));
        ensure(result == 8, || format!("compute(2) returned {}, expected 8", result))?;
        let ad = first_ad(&args.interest_group)?;
        Ok(GenerateBidOutput::Single(Bid::new(f64::from(result), ad.render_url.clone())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reporting::Phase;
    use crate::wasm_helper::WasmHelper;
    use crate::worklets::testing::{bid_args, group};
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;

    const TIMES_FOUR: &str = r#"(module (func (export "compute") (param i32) (result i32) local.get 0 i32.const 4 i32.mul))"#;
    const PLUS_ONE: &str = r#"(module (func (export "compute") (param i32) (result i32) local.get 0 i32.const 1 i32.add))"#;

    fn run(module: Option<&str>) -> WorkletResult<GenerateBidOutput> {
        let mut args = bid_args(group());
        args.browser_signals.wasm_helper = module.map(|m| WasmHelper::compile(Arc::from(m.as_bytes()), 1_000_000).unwrap());
        let mut scope = WorkletScope::new(Phase::GenerateBid, Arc::new(AtomicBool::new(false)));
        WasmBidder.generate_bid(&args, &mut scope)
    }

    #[test]
    fn test_bids_helper_result() {
        assert_eq!(run(Some(TIMES_FOUR)).unwrap().bids()[0].bid, 8.0);
    }

    #[test]
    fn test_wrong_result_or_missing_helper_throws() {
        assert!(matches!(run(Some(PLUS_ONE)), Err(WorkletError::Thrown(_))));
        assert!(matches!(run(None), Err(WorkletError::Thrown(_))));
    }
}
