use super::first_ad;
use crate::bid::{Bid, GenerateBidOutput};
use crate::errors::WorkletResult;
use crate::reporting::WorkletScope;
use crate::worklet::{BiddingLogic, GenerateBidArgs, ReportWinArgs, WorkletEntry, WorkletKind};
use std::thread;
use std::time::Duration;

inventory::submit!(WorkletEntry { script: "report_win_loop_forever.js", kind: WorkletKind::Bidding(looping_reporter) });

fn looping_reporter() -> Box<dyn BiddingLogic> {
    Box::new(LoopingReporter)
}

/// Bids normally, then never returns from reportWin.
///
/// The report it queues before spinning must never be sent: the host cancels
/// the call at the reporting timeout and drops its effects.
pub struct LoopingReporter;

impl BiddingLogic for LoopingReporter {
    fn generate_bid(&mut self, args: &GenerateBidArgs, _scope: &mut WorkletScope) -> WorkletResult<GenerateBidOutput> {
        let ad = first_ad(&args.interest_group)?;
        Ok(GenerateBidOutput::Single(Bid::new(1.0, ad.render_url.clone())))
    }

    fn report_win(&mut self, args: &ReportWinArgs, scope: &mut WorkletScope) -> WorkletResult<()> {
        scope.send_report_to(&format!("{}/echo?bidder_report", args.browser_signals.interest_group_owner))?;
        while !scope.is_cancelled() {
            thread::sleep(Duration::from_millis(1));
        }
        Ok(())
    }
}
