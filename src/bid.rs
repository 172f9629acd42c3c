//! Bids returned by generateBid and the checks the host applies to them.

use crate::ad_size::{substitute_size_macros, AdLength, AdSize, ScreenSize};
use crate::browser_signals::BidBrowserSignals;
use crate::currency::{check_currency, Currency};
use crate::errors::{ContractError, ContractResult};
use crate::interest_group::InterestGroup;
use crate::origin::require_https;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use url::Url;

/// Exclusive upper bound of `modelingSignals`
pub const MODELING_SIGNALS_LIMIT: u16 = 4096;

/// `render` of a bid: a bare url or a url with an explicit size
#[derive(Debug, Clone, PartialEq)]
pub enum RenderTarget {
    Url(Url),
    Sized { url: Url, size: AdSize },
}

impl RenderTarget {
    pub fn url(&self) -> &Url {
        match self {
            RenderTarget::Url(url) => url,
            RenderTarget::Sized { url, .. } => url,
        }
    }

    pub fn size(&self) -> Option<&AdSize> {
        match self {
            RenderTarget::Url(_) => None,
            RenderTarget::Sized { size, .. } => Some(size),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum RenderWire {
    Url(Url),
    Object {
        url: Url,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        width: Option<AdLength>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        height: Option<AdLength>,
    },
}

impl TryFrom<RenderWire> for RenderTarget {
    type Error = ContractError;

    fn try_from(wire: RenderWire) -> Result<Self, Self::Error> {
        match wire {
            RenderWire::Url(url) => Ok(RenderTarget::Url(url)),
            RenderWire::Object { url, width: None, height: None } => Ok(RenderTarget::Url(url)),
            RenderWire::Object { url, width: Some(width), height: Some(height) } => {
                Ok(RenderTarget::Sized { url, size: AdSize { width, height } })
            }
            RenderWire::Object { .. } => Err(ContractError::malformed("render", "width and height must be given together")),
        }
    }
}

impl From<RenderTarget> for RenderWire {
    fn from(target: RenderTarget) -> Self {
        match target {
            RenderTarget::Url(url) => RenderWire::Url(url),
            RenderTarget::Sized { url, size } => RenderWire::Object { url, width: Some(size.width), height: Some(size.height) },
        }
    }
}

impl Serialize for RenderTarget {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        RenderWire::from(self.clone()).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for RenderTarget {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        RenderTarget::try_from(RenderWire::deserialize(deserializer)?).map_err(D::Error::custom)
    }
}

/// One bid as returned by a bidder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bid {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ad: Option<Value>,
    pub bid: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bid_currency: Option<Currency>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ad_cost: Option<f64>,
    pub render: RenderTarget,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ad_components: Vec<RenderTarget>,
    #[serde(default)]
    pub allow_component_auction: bool,
    /// Raw value; only `0..4096` survives validation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modeling_signals: Option<f64>,
}

impl Bid {
    pub fn new(bid: f64, render: Url) -> Self {
        Self {
            ad: None,
            bid,
            bid_currency: None,
            ad_cost: None,
            render: RenderTarget::Url(render),
            ad_components: Vec::new(),
            allow_component_auction: false,
            modeling_signals: None,
        }
    }

    pub fn with_ad(mut self, ad: Value) -> Self {
        self.ad = Some(ad);
        self
    }

    pub fn with_currency(mut self, currency: Currency) -> Self {
        self.bid_currency = Some(currency);
        self
    }
}

/// What generateBid returned: nothing, one bid, or several bids
#[derive(Debug, Clone, PartialEq, Default)]
pub enum GenerateBidOutput {
    #[default]
    NoBid,
    Single(Bid),
    Multi(Vec<Bid>),
}

impl GenerateBidOutput {
    pub fn bids(&self) -> &[Bid] {
        match self {
            GenerateBidOutput::NoBid => &[],
            GenerateBidOutput::Single(bid) => std::slice::from_ref(bid),
            GenerateBidOutput::Multi(bids) => bids,
        }
    }
}

impl Serialize for GenerateBidOutput {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            GenerateBidOutput::NoBid => serializer.serialize_none(),
            GenerateBidOutput::Single(bid) => bid.serialize(serializer),
            GenerateBidOutput::Multi(bids) => bids.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for GenerateBidOutput {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match Value::deserialize(deserializer)? {
            Value::Null => Ok(GenerateBidOutput::NoBid),
            Value::Array(items) => items
                .into_iter()
                .map(serde_json::from_value)
                .collect::<Result<Vec<Bid>, _>>()
                .map(GenerateBidOutput::Multi)
                .map_err(D::Error::custom),
            other => serde_json::from_value(other).map(GenerateBidOutput::Single).map_err(D::Error::custom),
        }
    }
}

/// A bid that passed every check, ready to be scored
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedBid {
    pub bid: Bid,
    /// Render url with size macros substituted
    pub render_url: Url,
    pub render_size: Option<(u32, u32)>,
    pub ad_components: Vec<Url>,
    pub modeling_signals: Option<u16>,
}

/// Everything a bid is checked against besides the bid itself
pub struct BidRules<'a> {
    pub group: &'a InterestGroup,
    pub signals: &'a BidBrowserSignals,
    /// `perBuyerCurrencies` entry for the group's owner
    pub required_currency: Option<Currency>,
    pub screen: ScreenSize,
}

/// Check a generateBid output and keep the bids that take part in the auction.
///
/// Bids of zero or less are dropped silently. Any other violation rejects the
/// whole output, as does returning more bids than `multiBidLimit`.
pub fn validate_output(output: &GenerateBidOutput, rules: &BidRules<'_>) -> ContractResult<Vec<ValidatedBid>> {
    let bids = output.bids();
    if let GenerateBidOutput::Multi(_) = output {
        if bids.len() > rules.signals.multi_bid_limit {
            return Err(ContractError::LimitExceeded {
                what: "bids",
                count: bids.len(),
                limit: rules.signals.multi_bid_limit,
            });
        }
    }
    let mut validated = Vec::new();
    for bid in bids {
        if let Some(bid) = validate_bid(bid, rules)? {
            validated.push(bid);
        }
    }
    Ok(validated)
}

fn validate_bid(bid: &Bid, rules: &BidRules<'_>) -> ContractResult<Option<ValidatedBid>> {
    if !bid.bid.is_finite() {
        return Err(ContractError::malformed("bid", format!("{} is not finite", bid.bid)));
    }
    if bid.bid <= 0.0 {
        return Ok(None);
    }
    if let Some(ad_cost) = bid.ad_cost {
        if !ad_cost.is_finite() {
            return Err(ContractError::malformed("adCost", "must be finite"));
        }
    }
    let render_url = bid.render.url();
    require_https("render", render_url)?;
    if rules.group.find_ad(render_url).is_none() {
        return Err(ContractError::UnknownRender(render_url.to_string()));
    }
    if bid.ad_components.len() > rules.signals.ad_components_limit {
        return Err(ContractError::LimitExceeded {
            what: "adComponents",
            count: bid.ad_components.len(),
            limit: rules.signals.ad_components_limit,
        });
    }
    let mut ad_components = Vec::with_capacity(bid.ad_components.len());
    for component in &bid.ad_components {
        if rules.group.find_ad_component(component.url()).is_none() {
            return Err(ContractError::UnknownRender(component.url().to_string()));
        }
        ad_components.push(resolve_render(component, rules.screen)?.0);
    }
    if rules.signals.nesting.is_component() && !bid.allow_component_auction {
        return Err(ContractError::ComponentAuctionNotAllowed);
    }
    check_currency(rules.required_currency, bid.bid_currency)?;

    let (render_url, render_size) = resolve_render(&bid.render, rules.screen)?;
    Ok(Some(ValidatedBid {
        bid: bid.clone(),
        render_url,
        render_size,
        ad_components,
        modeling_signals: bid.modeling_signals.and_then(modeling_signals),
    }))
}

/// Resolve a render target to pixels and substitute its size macros
fn resolve_render(target: &RenderTarget, screen: ScreenSize) -> ContractResult<(Url, Option<(u32, u32)>)> {
    let Some(size) = target.size() else {
        return Ok((target.url().clone(), None));
    };
    let (width, height) = size.resolve(screen);
    if width == 0 || height == 0 {
        return Err(ContractError::InvalidSize(format!("{}x{}", size.width, size.height)));
    }
    let substituted = substitute_size_macros(target.url().as_str(), width, height);
    let url = Url::parse(&substituted).map_err(|e| ContractError::InvalidUrl { field: "render".to_string(), reason: e.to_string() })?;
    Ok((url, Some((width, height))))
}

fn modeling_signals(raw: f64) -> Option<u16> {
    if raw.is_finite() && raw >= 0.0 && raw < f64::from(MODELING_SIGNALS_LIMIT) {
        Some(raw.floor() as u16)
    } else {
        None
    }
}
