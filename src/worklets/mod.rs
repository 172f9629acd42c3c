//! Reference worklets, each registered under the script file name it stands in for.

use crate::errors::{WorkletError, WorkletResult};
use crate::interest_group::{Ad, InterestGroup};
use serde::Serialize;
use serde_json::Value;

pub mod bidding_currency;
pub mod bidding_debug_reports;
pub mod bidding_logic;
pub mod bidding_validator;
pub mod bidding_wasm;
pub mod decision_logic;
pub mod decision_validator;
pub mod report_win_loop_forever;

/// First ad of the group, which the simple bidders bid on
pub(crate) fn first_ad(group: &InterestGroup) -> WorkletResult<&Ad> {
    group.ads.first().ok_or_else(|| WorkletError::thrown(format!("interest group '{}' has no ads", group.name)))
}

/// Throw unless `holds`
pub(crate) fn ensure(holds: bool, message: impl FnOnce() -> String) -> WorkletResult<()> {
    if holds {
        Ok(())
    } else {
        Err(WorkletError::thrown(message()))
    }
}

/// The object as a script would see it
pub(crate) fn as_script_object<T: Serialize>(value: &T) -> WorkletResult<Value> {
    serde_json::to_value(value).map_err(|e| WorkletError::thrown(format!("not serializable: {}", e)))
}

/// Both casings of a url field must be present and agree
pub(crate) fn ensure_aliases(object: &Value, upper: &str, lower: &str) -> WorkletResult<()> {
    let (a, b) = (&object[upper], &object[lower]);
    ensure(!a.is_null() && a == b, || format!("{} and {} should both be set and equal, got {} and {}", upper, lower, a, b))
}

/// Numeric field of a JSON object
pub(crate) fn number_field(object: Option<&Value>, field: &str) -> Option<f64> {
    object.and_then(|o| o.get(field)).and_then(Value::as_f64)
}

#[cfg(test)]
pub(crate) mod testing {
    use crate::auction_config::AuctionConfig;
    use crate::browser_signals::{BidBrowserSignals, RenderUrlField, ScoreBrowserSignals};
    use crate::interest_group::{Ad, InterestGroup};
    use crate::origin::Origin;
    use crate::score::AdMetadata;
    use crate::worklet::{GenerateBidArgs, ScoreAdArgs};
    use url::Url;

    pub const RENDER: &str = "https://example.com/render";

    pub fn buyer() -> Origin {
        Origin::parse("https://buyer.test").unwrap()
    }

    pub fn seller() -> Origin {
        Origin::parse("https://seller.test").unwrap()
    }

    pub fn group() -> InterestGroup {
        let mut group = InterestGroup::new(buyer(), "cars");
        group.bidding_logic_url = Some(Url::parse("https://buyer.test/bidding_logic.js").unwrap());
        group.ads.push(Ad::new(Url::parse(RENDER).unwrap()));
        group
    }

    pub fn bid_args(group: InterestGroup) -> GenerateBidArgs {
        let mut browser_signals = BidBrowserSignals::new("publisher.test", seller());
        browser_signals.join_count = 1;
        GenerateBidArgs {
            interest_group: group,
            auction_signals: None,
            per_buyer_signals: None,
            trusted_bidding_signals: None,
            browser_signals,
            direct_from_seller_signals: Default::default(),
        }
    }

    pub fn auction_config() -> AuctionConfig {
        AuctionConfig::new(seller(), Url::parse("https://seller.test/decision_logic.js").unwrap()).with_buyers(vec![buyer()])
    }

    pub fn score_args(bid: f64) -> ScoreAdArgs {
        let render = Url::parse(RENDER).unwrap();
        ScoreAdArgs {
            ad_metadata: AdMetadata::new(render.clone(), None),
            bid,
            auction_config: auction_config(),
            trusted_scoring_signals: None,
            browser_signals: ScoreBrowserSignals {
                top_window_hostname: "publisher.test".to_string(),
                interest_group_owner: buyer(),
                render_url: RenderUrlField(render),
                ad_components: Vec::new(),
                bidding_duration_msec: 3,
                bid_currency: None,
                nesting: Default::default(),
                data_version: None,
                for_debugging_only_in_cooldown_or_lockout: false,
            },
            direct_from_seller_signals: Default::default(),
        }
    }
}
