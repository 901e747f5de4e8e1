//! Per-auction and per-season settings.
//!
//! Both structs are stored as JSON blobs on their owning rows; unknown or
//! missing keys fall back to the defaults below so old settings blobs keep
//! deserializing after new keys are added.

use std::time::Duration;

use serde::{
    Deserialize,
    Serialize,
};

use crate::{
    increment::IncrementSchedule,
    model::Money,
};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuctionSettings {
    /// Initial countdown per lot, in milliseconds.
    pub lot_duration_ms: u64,
    /// A bid landing with no more than this much time left extends the lot.
    pub soft_close_threshold_ms: u64,
    /// How much time an extension adds, measured from the moment of the bid.
    pub soft_close_extension_ms: u64,
    /// Cap on extensions per lot.
    pub max_extensions: u32,
    /// Pause between a finalized lot and the next lot going under the hammer.
    pub inter_lot_gap_ms: u64,
    /// The banded increment schedule.
    pub increment_bands: IncrementSchedule,
    /// Opt-in flat increment. When set, it replaces the banded schedule.
    pub constant_increment: Option<Money>,
}

impl Default for AuctionSettings {
    fn default() -> Self {
        Self {
            lot_duration_ms: 30_000,
            soft_close_threshold_ms: 5_000,
            soft_close_extension_ms: 10_000,
            max_extensions: 3,
            inter_lot_gap_ms: 3_000,
            increment_bands: IncrementSchedule::default(),
            constant_increment: None,
        }
    }
}

impl AuctionSettings {
    #[must_use]
    pub fn lot_duration(&self) -> Duration {
        Duration::from_millis(self.lot_duration_ms)
    }

    #[must_use]
    pub fn soft_close_threshold(&self) -> Duration {
        Duration::from_millis(self.soft_close_threshold_ms)
    }

    #[must_use]
    pub fn soft_close_extension(&self) -> Duration {
        Duration::from_millis(self.soft_close_extension_ms)
    }

    #[must_use]
    pub fn inter_lot_gap(&self) -> Duration {
        Duration::from_millis(self.inter_lot_gap_ms)
    }

    /// The smallest admissible next bid after `price` under these settings.
    #[must_use]
    pub fn minimum_next_bid(&self, price: Money) -> Money {
        match self.constant_increment {
            Some(step) => price.saturating_add(step),
            None => self.increment_bands.minimum_next_bid(price),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeasonSettings {
    /// Hard cap on players per team.
    pub max_squad_size: u32,
    /// Cap on overseas players per team.
    pub max_overseas: u32,
    /// Every team must end up with at least this many wicket-keepers; bids
    /// that would make the minimum unreachable are rejected.
    pub min_wicket_keepers: u32,
}

impl Default for SeasonSettings {
    fn default() -> Self {
        Self {
            max_squad_size: 20,
            max_overseas: 4,
            min_wicket_keepers: 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auction_settings_defaults() {
        let settings = AuctionSettings::default();
        assert_eq!(settings.lot_duration(), Duration::from_secs(30));
        assert_eq!(settings.soft_close_threshold(), Duration::from_secs(5));
        assert_eq!(settings.soft_close_extension(), Duration::from_secs(10));
        assert_eq!(settings.max_extensions, 3);
        assert_eq!(settings.inter_lot_gap(), Duration::from_secs(3));
        assert_eq!(settings.constant_increment, None);
    }

    #[test]
    fn season_settings_defaults() {
        let settings = SeasonSettings::default();
        assert_eq!(settings.max_squad_size, 20);
        assert_eq!(settings.max_overseas, 4);
        assert_eq!(settings.min_wicket_keepers, 1);
    }

    #[test]
    fn empty_settings_blob_deserializes_to_defaults() {
        let settings: AuctionSettings = serde_json::from_str("{}").unwrap();
        assert_eq!(settings, AuctionSettings::default());
        let settings: SeasonSettings = serde_json::from_str("{}").unwrap();
        assert_eq!(settings, SeasonSettings::default());
    }

    #[test]
    fn settings_round_trip_through_json() {
        let mut settings = AuctionSettings::default();
        settings.lot_duration_ms = 45_000;
        settings.constant_increment = Some(25_000);
        let json = serde_json::to_string(&settings).unwrap();
        let back: AuctionSettings = serde_json::from_str(&json).unwrap();
        assert_eq!(back, settings);
    }

    #[test]
    fn constant_increment_overrides_the_bands() {
        let mut settings = AuctionSettings::default();
        assert_eq!(settings.minimum_next_bid(2_000_000), 2_100_000);
        settings.constant_increment = Some(25_000);
        assert_eq!(settings.minimum_next_bid(2_000_000), 2_025_000);
    }
}
