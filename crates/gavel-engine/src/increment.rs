//! The increment schedule maps the current price of a lot to the minimum the
//! next bid must reach.

use serde::{
    Deserialize,
    Serialize,
};

use crate::model::Money;

/// A price band starting at `min` with the step that applies inside it.
/// `max` documents the upper bound (`None` = unbounded) and is where the next
/// band takes over.
///
/// A price sitting exactly on a boundary still steps by the band below it:
/// the increment grows only once the price *exceeds* the boundary. A price
/// above the highest band keeps using the highest band's step.
///
/// Serialized as a `[min, max, step]` triple so the schedule can be stored as
/// part of the auction settings blob.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    from = "(Money, Option<Money>, Money)",
    into = "(Money, Option<Money>, Money)"
)]
pub struct Band {
    pub min: Money,
    pub max: Option<Money>,
    pub step: Money,
}

impl From<(Money, Option<Money>, Money)> for Band {
    fn from((min, max, step): (Money, Option<Money>, Money)) -> Self {
        Self {
            min,
            max,
            step,
        }
    }
}

impl From<Band> for (Money, Option<Money>, Money) {
    fn from(band: Band) -> Self {
        (band.min, band.max, band.step)
    }
}

/// An ordered sequence of price bands. The minimum next bid for price `p` is
/// `p + step(p)`.
///
/// Deserialization runs the same validation as [`IncrementSchedule::new`],
/// so a stored settings blob can never smuggle in an empty or inverted
/// schedule.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Band>", into = "Vec<Band>")]
pub struct IncrementSchedule {
    bands: Vec<Band>,
}

#[derive(Debug, thiserror::Error)]
#[error("increment schedule must contain at least one band, none of them empty")]
pub struct InvalidScheduleError;

impl TryFrom<Vec<Band>> for IncrementSchedule {
    type Error = InvalidScheduleError;

    fn try_from(bands: Vec<Band>) -> Result<Self, Self::Error> {
        Self::new(bands).ok_or(InvalidScheduleError)
    }
}

impl From<IncrementSchedule> for Vec<Band> {
    fn from(schedule: IncrementSchedule) -> Self {
        schedule.bands
    }
}

impl IncrementSchedule {
    /// Constructs a schedule from `bands`, sorted by their lower bound.
    ///
    /// Returns `None` if `bands` is empty or any band is inverted
    /// (`max <= min`).
    #[must_use]
    pub fn new(mut bands: Vec<Band>) -> Option<Self> {
        if bands.is_empty()
            || bands
                .iter()
                .any(|band| band.max.is_some_and(|max| max <= band.min))
        {
            return None;
        }
        bands.sort_by_key(|band| band.min);
        Some(Self {
            bands,
        })
    }

    /// The step applying at `price`: the step of the highest band whose lower
    /// bound lies strictly below `price`, falling back to the first band.
    #[must_use]
    pub fn step_at(&self, price: Money) -> Money {
        let mut chosen = self
            .bands
            .first()
            .expect("constructor rejects empty schedules");
        for band in &self.bands[1..] {
            if band.min < price {
                chosen = band;
            }
        }
        chosen.step
    }

    /// The smallest admissible next bid after `price`.
    #[must_use]
    pub fn minimum_next_bid(&self, price: Money) -> Money {
        price.saturating_add(self.step_at(price))
    }
}

impl Default for IncrementSchedule {
    /// The standard banded schedule (amounts in paise):
    ///
    /// | band                | step      |
    /// |---------------------|-----------|
    /// | [0, 2 000 000)      | 100 000   |
    /// | [2e6, 10 000 000)   | 250 000   |
    /// | [1e7, 50 000 000)   | 1 000 000 |
    /// | [5e7, 200 000 000)  | 2 500 000 |
    /// | [2e8, ∞)            | 2 500 000 |
    fn default() -> Self {
        Self {
            bands: vec![
                Band::from((0, Some(2_000_000), 100_000)),
                Band::from((2_000_000, Some(10_000_000), 250_000)),
                Band::from((10_000_000, Some(50_000_000), 1_000_000)),
                Band::from((50_000_000, Some(200_000_000), 2_500_000)),
                Band::from((200_000_000, None, 2_500_000)),
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_schedule_steps_inside_each_band() {
        let schedule = IncrementSchedule::default();
        assert_eq!(schedule.minimum_next_bid(0), 100_000);
        assert_eq!(schedule.minimum_next_bid(1_900_000), 2_000_000);
        assert_eq!(schedule.minimum_next_bid(2_500_000), 2_750_000);
        assert_eq!(schedule.minimum_next_bid(12_000_000), 13_000_000);
        assert_eq!(schedule.minimum_next_bid(60_000_000), 62_500_000);
        assert_eq!(schedule.minimum_next_bid(250_000_000), 252_500_000);
    }

    #[test]
    fn boundary_price_steps_by_the_band_below() {
        // A lot whose price just reached a boundary keeps the smaller step
        // until the price exceeds the boundary.
        let schedule = IncrementSchedule::default();
        assert_eq!(schedule.minimum_next_bid(2_000_000), 2_100_000);
        assert_eq!(schedule.minimum_next_bid(2_000_001), 2_250_001);
        assert_eq!(schedule.minimum_next_bid(10_000_000), 10_250_000);
        assert_eq!(schedule.minimum_next_bid(50_000_000), 51_000_000);
    }

    #[test]
    fn price_above_the_highest_band_uses_its_step() {
        let schedule = IncrementSchedule::new(vec![
            Band::from((0, Some(1_000), 10)),
            Band::from((1_000, Some(2_000), 50)),
        ])
        .unwrap();
        assert_eq!(schedule.minimum_next_bid(5_000), 5_050);
    }

    #[test]
    fn rejects_empty_and_inverted_bands() {
        assert!(IncrementSchedule::new(vec![]).is_none());
        assert!(IncrementSchedule::new(vec![Band::from((10, Some(10), 1))]).is_none());
        assert!(IncrementSchedule::new(vec![Band::from((10, Some(5), 1))]).is_none());
    }

    #[test]
    fn deserialization_rejects_an_empty_schedule() {
        assert!(serde_json::from_str::<IncrementSchedule>("[]").is_err());
        assert!(serde_json::from_str::<IncrementSchedule>("[[10,5,1]]").is_err());
    }

    #[test]
    fn bands_serialize_as_triples() {
        let schedule = IncrementSchedule::new(vec![
            Band::from((0, Some(1_000), 10)),
            Band::from((1_000, None, 50)),
        ])
        .unwrap();
        let json = serde_json::to_string(&schedule).unwrap();
        assert_eq!(json, "[[0,1000,10],[1000,null,50]]");
        let back: IncrementSchedule = serde_json::from_str(&json).unwrap();
        assert_eq!(back, schedule);
    }
}
