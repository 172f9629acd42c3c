//! Per-browser state that outlives a single auction: joined interest groups,
//! their bid/win history, and debug report cooldowns.

use crate::browser_signals::{PrevWin, PrevWins};
use crate::interest_group::InterestGroup;
use crate::origin::Origin;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone, PartialEq)]
pub struct StoredInterestGroup {
    pub group: InterestGroup,
    pub join_count: u32,
    pub bid_count: u32,
    pub joined_at: Duration,
    /// Time of each win and the ad that won
    pub wins: Vec<(Duration, Value)>,
}

#[derive(Debug, Clone, Default)]
pub struct BrowserState {
    /// Simulated wall clock
    now: Duration,
    groups: Vec<StoredInterestGroup>,
    /// Simulated time at which the debug report lockout ends
    debug_lockout_until: Option<Duration>,
    debug_cooldown_until: BTreeMap<Origin, Duration>,
}

impl BrowserState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now(&self) -> Duration {
        self.now
    }

    pub fn advance(&mut self, by: Duration) {
        self.now += by;
        let now = self.now;
        self.debug_cooldown_until.retain(|_, until| *until > now);
        if self.debug_lockout_until.is_some_and(|until| until <= now) {
            self.debug_lockout_until = None;
        }
    }

    /// Join a group; joining an existing (owner, name) replaces it and bumps its join count
    pub fn join(&mut self, group: InterestGroup) {
        let now = self.now;
        match self.groups.iter_mut().find(|g| g.group.owner == group.owner && g.group.name == group.name) {
            Some(stored) => {
                stored.group = group;
                stored.join_count = stored.join_count.saturating_add(1);
                stored.joined_at = now;
            }
            None => self.groups.push(StoredInterestGroup { group, join_count: 1, bid_count: 0, joined_at: now, wins: Vec::new() }),
        }
    }

    pub fn groups(&self) -> &[StoredInterestGroup] {
        &self.groups
    }

    pub fn group(&self, owner: &Origin, name: &str) -> Option<&StoredInterestGroup> {
        self.groups.iter().find(|g| &g.group.owner == owner && g.group.name == name)
    }

    /// Indices of the owner's groups that are able to bid
    pub fn bidding_groups(&self, owner: &Origin) -> Vec<usize> {
        self.groups
            .iter()
            .enumerate()
            .filter(|(_, g)| &g.group.owner == owner && g.group.can_bid())
            .map(|(i, _)| i)
            .collect()
    }

    pub fn stored(&self, index: usize) -> Option<&StoredInterestGroup> {
        self.groups.get(index)
    }

    pub fn prev_wins(&self, index: usize) -> PrevWins {
        let wins = self.groups.get(index).map(|g| g.wins.as_slice()).unwrap_or(&[]);
        PrevWins(wins.iter().map(|(at, ad)| PrevWin { elapsed: self.now.saturating_sub(*at), ad: ad.clone() }).collect())
    }

    pub fn recency_ms(&self, index: usize) -> Option<u64> {
        self.groups.get(index).map(|g| self.now.saturating_sub(g.joined_at).as_millis() as u64)
    }

    pub fn record_bid(&mut self, index: usize) {
        if let Some(g) = self.groups.get_mut(index) {
            g.bid_count = g.bid_count.saturating_add(1);
        }
    }

    pub fn record_win(&mut self, index: usize, render_url: &Url, metadata: Option<&Value>) {
        let now = self.now;
        if let Some(g) = self.groups.get_mut(index) {
            let mut ad = json!({ "renderURL": render_url.as_str() });
            if let Some(metadata) = metadata {
                ad["metadata"] = metadata.clone();
            }
            g.wins.push((now, ad));
        }
    }

    /// Whether forDebuggingOnly reports from `origin` are suppressed
    pub fn debug_suppressed(&self, origin: &Origin) -> bool {
        let now = self.now;
        self.debug_lockout_until.is_some_and(|until| until > now)
            || self.debug_cooldown_until.get(origin).is_some_and(|until| *until > now)
    }

    /// Suppress debug reports from every origin for `period`
    pub fn set_debug_lockout(&mut self, period: Duration) {
        let until = self.now + period;
        self.debug_lockout_until = Some(self.debug_lockout_until.map_or(until, |current| current.max(until)));
    }

    /// Suppress debug reports from `origin` for `period`
    pub fn add_debug_cooldown(&mut self, origin: Origin, period: Duration) {
        let until = self.now + period;
        let entry = self.debug_cooldown_until.entry(origin).or_insert(until);
        *entry = (*entry).max(until);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interest_group::Ad;

    fn group(name: &str) -> InterestGroup {
        let mut group = InterestGroup::new(Origin::parse("https://buyer.test").unwrap(), name);
        group.bidding_logic_url = Some(Url::parse("https://buyer.test/bidding_logic.js").unwrap());
        group.ads.push(Ad::new(Url::parse("https://ads.test/1").unwrap()));
        group
    }

    #[test]
    fn test_rejoin_bumps_join_count() {
        let mut state = BrowserState::new();
        state.join(group("cars"));
        state.advance(Duration::from_secs(5));
        state.join(group("cars"));
        let owner = Origin::parse("https://buyer.test").unwrap();
        assert_eq!(state.groups().len(), 1);
        assert_eq!(state.group(&owner, "cars").unwrap().join_count, 2);
        assert_eq!(state.recency_ms(0), Some(0));
    }

    #[test]
    fn test_prev_wins_elapsed() {
        let mut state = BrowserState::new();
        state.join(group("cars"));
        state.record_win(0, &Url::parse("https://ads.test/1").unwrap(), None);
        state.advance(Duration::from_millis(1500));
        let wins = state.prev_wins(0);
        assert_eq!(wins.0.len(), 1);
        assert_eq!(wins.0[0].elapsed, Duration::from_millis(1500));
        assert_eq!(wins.0[0].ad["renderURL"], "https://ads.test/1");
    }

    #[test]
    fn test_groups_without_ads_do_not_bid() {
        let mut state = BrowserState::new();
        let mut empty = group("empty");
        empty.ads.clear();
        state.join(empty);
        state.join(group("cars"));
        assert_eq!(state.bidding_groups(&Origin::parse("https://buyer.test").unwrap()), vec![1]);
    }

    #[test]
    fn test_debug_suppression() {
        let mut state = BrowserState::new();
        let a = Origin::parse("https://a.test").unwrap();
        let b = Origin::parse("https://b.test").unwrap();
        state.add_debug_cooldown(a.clone(), Duration::from_secs(60));
        assert!(state.debug_suppressed(&a));
        assert!(!state.debug_suppressed(&b));
        state.set_debug_lockout(Duration::from_secs(60));
        assert!(state.debug_suppressed(&b));
    }

    #[test]
    fn test_debug_cooldown_and_lockout_expire() {
        let mut state = BrowserState::new();
        let a = Origin::parse("https://a.test").unwrap();
        let b = Origin::parse("https://b.test").unwrap();
        state.add_debug_cooldown(a.clone(), Duration::from_secs(60));
        state.set_debug_lockout(Duration::from_secs(10));
        state.advance(Duration::from_secs(10));
        assert!(state.debug_suppressed(&a));
        assert!(!state.debug_suppressed(&b));
        state.advance(Duration::from_secs(50));
        assert!(!state.debug_suppressed(&a));

        // A shorter period never cuts an existing cooldown short
        state.add_debug_cooldown(b.clone(), Duration::from_secs(100));
        state.add_debug_cooldown(b.clone(), Duration::from_secs(1));
        state.advance(Duration::from_secs(50));
        assert!(state.debug_suppressed(&b));
    }
}
