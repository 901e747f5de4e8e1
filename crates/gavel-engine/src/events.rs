//! The typed event log entries.
//!
//! Events are a tagged sum type in memory and an opaque JSON blob in the
//! store; [`AuctionEvent::to_blob`]/[`AuctionEvent::from_blob`] convert
//! between the two. The envelope carries the per-auction sequence number
//! (1-origin, gap-free) that doubles as the subscriber sync cursor.

use jiff::Timestamp;
use serde::{
    Deserialize,
    Serialize,
};

use crate::model::{
    AuctionId,
    LotId,
    Money,
    PlayerId,
    TeamId,
    UserId,
};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuctionEvent {
    AuctionStarted {
        auction_id: AuctionId,
    },
    AuctionPaused {
        auction_id: AuctionId,
    },
    AuctionResumed {
        auction_id: AuctionId,
        /// The restored lot deadline; absent when no lot was paused with the
        /// auction.
        new_ends_at: Option<Timestamp>,
    },
    LotStarted {
        lot_id: LotId,
        player_id: PlayerId,
        base_price: Money,
        ends_at: Timestamp,
    },
    BidPlaced {
        lot_id: LotId,
        team_id: TeamId,
        amount: Money,
        /// Recorded for audit; admission never consults it.
        user_id: Option<UserId>,
    },
    LotExtended {
        lot_id: LotId,
        new_ends_at: Timestamp,
        extensions_used: u32,
    },
    LotSold {
        lot_id: LotId,
        team_id: TeamId,
        final_price: Money,
    },
    LotUnsold {
        lot_id: LotId,
        forced: bool,
    },
    AuctionEnded {
        auction_id: AuctionId,
    },
}

impl AuctionEvent {
    /// The wire tag of this event, e.g. `LOT_SOLD`.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            AuctionEvent::AuctionStarted {
                ..
            } => "AUCTION_STARTED",
            AuctionEvent::AuctionPaused {
                ..
            } => "AUCTION_PAUSED",
            AuctionEvent::AuctionResumed {
                ..
            } => "AUCTION_RESUMED",
            AuctionEvent::LotStarted {
                ..
            } => "LOT_STARTED",
            AuctionEvent::BidPlaced {
                ..
            } => "BID_PLACED",
            AuctionEvent::LotExtended {
                ..
            } => "LOT_EXTENDED",
            AuctionEvent::LotSold {
                ..
            } => "LOT_SOLD",
            AuctionEvent::LotUnsold {
                ..
            } => "LOT_UNSOLD",
            AuctionEvent::AuctionEnded {
                ..
            } => "AUCTION_ENDED",
        }
    }

    /// Serializes the event to the blob form stored in the event log.
    #[must_use]
    pub fn to_blob(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("event serialization is infallible")
    }

    /// Decodes an event from its stored blob form.
    ///
    /// # Errors
    /// Returns the underlying decode error if the blob is not a valid event.
    pub fn from_blob(blob: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(blob)
    }
}

/// An event together with its position in the auction's log.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub sequence: u64,
    pub timestamp: Timestamp,
    #[serde(flatten)]
    pub event: AuctionEvent,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_are_internally_tagged() {
        let event = AuctionEvent::LotSold {
            lot_id: LotId::new(),
            team_id: TeamId::new(),
            final_price: 2_100_000,
        };
        let json: serde_json::Value = serde_json::from_slice(&event.to_blob()).unwrap();
        assert_eq!(json["type"], "LOT_SOLD");
        assert_eq!(json["final_price"], 2_100_000);
    }

    #[test]
    fn blob_round_trip() {
        let event = AuctionEvent::LotExtended {
            lot_id: LotId::new(),
            new_ends_at: "2026-03-01T10:00:38Z".parse().unwrap(),
            extensions_used: 2,
        };
        let back = AuctionEvent::from_blob(&event.to_blob()).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn label_matches_wire_tag() {
        let event = AuctionEvent::AuctionEnded {
            auction_id: AuctionId::new(),
        };
        let json: serde_json::Value = serde_json::from_slice(&event.to_blob()).unwrap();
        assert_eq!(json["type"], event.label());
    }

    #[test]
    fn envelope_flattens_the_event() {
        let envelope = EventEnvelope {
            sequence: 7,
            timestamp: "2026-03-01T10:00:00Z".parse().unwrap(),
            event: AuctionEvent::LotUnsold {
                lot_id: LotId::new(),
                forced: false,
            },
        };
        let json: serde_json::Value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["sequence"], 7);
        assert_eq!(json["type"], "LOT_UNSOLD");
        assert_eq!(json["forced"], false);
    }
}
