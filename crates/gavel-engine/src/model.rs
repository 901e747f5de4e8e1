//! The persisted entities the engine operates on, together with their
//! lifecycle enumerations.
//!
//! Lifecycle transitions are checked against explicit tables
//! ([`AuctionStatus::can_transition_to`], [`LotStatus::can_transition_to`]);
//! illegal transitions are rejected by the callers with
//! [`crate::Error::InvalidState`] rather than silently ignored.

use jiff::Timestamp;
use serde::{
    Deserialize,
    Serialize,
};
use uuid::Uuid;

use crate::config::{
    AuctionSettings,
    SeasonSettings,
};

/// Monetary amount in the smallest indivisible unit (paise).
///
/// All money arithmetic in the engine is integer arithmetic on this type.
pub type Money = u64;

macro_rules! id_type {
    ($(#[$docs:meta])* $name:ident) => {
        $(#[$docs])*
        #[derive(
            Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            #[must_use]
            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                self.0.fmt(f)
            }
        }
    };
}

id_type!(
    /// Identifies a season.
    SeasonId
);
id_type!(
    /// Identifies a team within a season.
    TeamId
);
id_type!(
    /// Identifies a player within a season.
    PlayerId
);
id_type!(
    /// Identifies an auction.
    AuctionId
);
id_type!(
    /// Identifies a lot within an auction.
    LotId
);
id_type!(
    /// Identifies a single bid.
    BidId
);
id_type!(
    /// Identifies the user that placed a bid. Recorded for audit only.
    UserId
);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlayerRole {
    Batsman,
    Bowler,
    AllRounder,
    WicketKeeper,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuctionStatus {
    NotStarted,
    InProgress,
    Paused,
    Completed,
}

impl AuctionStatus {
    /// The legal auction lifecycle:
    /// `NOT_STARTED → IN_PROGRESS → (PAUSED ↔ IN_PROGRESS)* → COMPLETED`.
    ///
    /// `COMPLETED` is reachable from both running and paused auctions so an
    /// administrator can end a paused auction without resuming it first.
    #[must_use]
    pub fn can_transition_to(self, next: AuctionStatus) -> bool {
        use AuctionStatus::{
            Completed,
            InProgress,
            NotStarted,
            Paused,
        };
        matches!(
            (self, next),
            (NotStarted, InProgress)
                | (InProgress, Paused)
                | (Paused, InProgress)
                | (InProgress, Completed)
                | (Paused, Completed)
        )
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, AuctionStatus::Completed)
    }
}

impl std::fmt::Display for AuctionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            AuctionStatus::NotStarted => "NOT_STARTED",
            AuctionStatus::InProgress => "IN_PROGRESS",
            AuctionStatus::Paused => "PAUSED",
            AuctionStatus::Completed => "COMPLETED",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LotStatus {
    Queued,
    InProgress,
    Paused,
    Sold,
    Unsold,
}

impl LotStatus {
    /// The legal lot lifecycle:
    /// `QUEUED → IN_PROGRESS → (PAUSED ↔ IN_PROGRESS)* → {SOLD, UNSOLD}`.
    ///
    /// `QUEUED → UNSOLD` is additionally legal so that ending an auction can
    /// discard lots that never went under the hammer, and a paused lot can be
    /// finalized directly by an admin override.
    #[must_use]
    pub fn can_transition_to(self, next: LotStatus) -> bool {
        use LotStatus::{
            InProgress,
            Paused,
            Queued,
            Sold,
            Unsold,
        };
        matches!(
            (self, next),
            (Queued, InProgress)
                | (Queued, Unsold)
                | (InProgress, Paused)
                | (Paused, InProgress)
                | (InProgress, Sold)
                | (InProgress, Unsold)
                | (Paused, Sold)
                | (Paused, Unsold)
        )
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, LotStatus::Sold | LotStatus::Unsold)
    }
}

impl std::fmt::Display for LotStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            LotStatus::Queued => "QUEUED",
            LotStatus::InProgress => "IN_PROGRESS",
            LotStatus::Paused => "PAUSED",
            LotStatus::Sold => "SOLD",
            LotStatus::Unsold => "UNSOLD",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Season {
    pub id: SeasonId,
    pub name: String,
    pub settings: SeasonSettings,
}

/// A team's budget is split into a total fixed at season start and the amount
/// spent so far. Invariant: `0 <= budget_spent <= budget_total`; the spent
/// amount only grows during an auction.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Team {
    pub id: TeamId,
    pub season_id: SeasonId,
    pub name: String,
    pub budget_total: Money,
    pub budget_spent: Money,
}

impl Team {
    #[must_use]
    pub fn budget_remaining(&self) -> Money {
        self.budget_total.saturating_sub(self.budget_spent)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Player {
    pub id: PlayerId,
    pub season_id: SeasonId,
    pub name: String,
    pub role: PlayerRole,
    pub is_overseas: bool,
    pub base_price: Money,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Auction {
    pub id: AuctionId,
    pub season_id: SeasonId,
    pub status: AuctionStatus,
    pub current_lot: Option<LotId>,
    pub settings: AuctionSettings,
}

/// One player offered at one moment of the auction.
///
/// `current_price` and `ends_at` are set while the lot is under the hammer;
/// `winner_team` and `final_price` are set exactly when the lot is `SOLD`.
/// While the lot is paused, the wall-clock deadline is cleared and the time
/// that was left is kept in `paused_remaining_ms` so resuming can restore it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Lot {
    pub id: LotId,
    pub auction_id: AuctionId,
    pub player_id: PlayerId,
    /// Position in the auction catalog; strictly increasing per auction and
    /// immutable.
    pub order: u32,
    pub status: LotStatus,
    pub current_price: Option<Money>,
    pub ends_at: Option<Timestamp>,
    pub paused_remaining_ms: Option<u64>,
    pub winner_team: Option<TeamId>,
    pub final_price: Option<Money>,
}

impl Lot {
    /// A fresh catalog entry for `player` at position `order`.
    #[must_use]
    pub fn queued(auction_id: AuctionId, player_id: PlayerId, order: u32) -> Self {
        Self {
            id: LotId::new(),
            auction_id,
            player_id,
            order,
            status: LotStatus::Queued,
            current_price: None,
            ends_at: None,
            paused_remaining_ms: None,
            winner_team: None,
            final_price: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Bid {
    pub id: BidId,
    pub lot_id: LotId,
    pub team_id: TeamId,
    pub amount: Money,
    pub placed_at: Timestamp,
    pub valid: bool,
}

/// A player won by a team. Created atomically with the `SOLD` finalization of
/// the lot it came from; `price` equals the winning bid amount.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RosterEntry {
    pub team_id: TeamId,
    pub player_id: PlayerId,
    pub lot_id: LotId,
    pub price: Money,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BudgetTransactionKind {
    Debit,
    Refund,
}

/// Ledger record for every change to a team's `budget_spent`. The engine only
/// writes debits; refunds exist for administrative corrections outside the
/// engine.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BudgetTransaction {
    pub team_id: TeamId,
    pub lot_id: LotId,
    pub kind: BudgetTransactionKind,
    pub amount: Money,
    pub at: Timestamp,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auction_lifecycle_legal_transitions() {
        use AuctionStatus::{
            Completed,
            InProgress,
            NotStarted,
            Paused,
        };
        assert!(NotStarted.can_transition_to(InProgress));
        assert!(InProgress.can_transition_to(Paused));
        assert!(Paused.can_transition_to(InProgress));
        assert!(InProgress.can_transition_to(Completed));
        assert!(Paused.can_transition_to(Completed));
    }

    #[test]
    fn auction_lifecycle_illegal_transitions() {
        use AuctionStatus::{
            Completed,
            InProgress,
            NotStarted,
            Paused,
        };
        assert!(!NotStarted.can_transition_to(Paused));
        assert!(!NotStarted.can_transition_to(Completed));
        assert!(!Completed.can_transition_to(InProgress));
        assert!(!Completed.can_transition_to(Paused));
        assert!(!Paused.can_transition_to(NotStarted));
        assert!(!InProgress.can_transition_to(NotStarted));
    }

    #[test]
    fn lot_lifecycle_terminal_states_are_absorbing() {
        use LotStatus::{
            InProgress,
            Paused,
            Queued,
            Sold,
            Unsold,
        };
        for terminal in [Sold, Unsold] {
            for next in [Queued, InProgress, Paused, Sold, Unsold] {
                assert!(
                    !terminal.can_transition_to(next),
                    "{terminal} must not transition to {next}",
                );
            }
        }
    }

    #[test]
    fn queued_lot_can_be_discarded_unsold() {
        assert!(LotStatus::Queued.can_transition_to(LotStatus::Unsold));
        assert!(!LotStatus::Queued.can_transition_to(LotStatus::Sold));
        assert!(!LotStatus::Queued.can_transition_to(LotStatus::Paused));
    }

    #[test]
    fn status_json_uses_screaming_snake_case() {
        assert_eq!(
            serde_json::to_string(&AuctionStatus::NotStarted).unwrap(),
            r#""NOT_STARTED""#,
        );
        assert_eq!(
            serde_json::to_string(&LotStatus::InProgress).unwrap(),
            r#""IN_PROGRESS""#,
        );
        assert_eq!(
            serde_json::to_string(&PlayerRole::WicketKeeper).unwrap(),
            r#""WICKET_KEEPER""#,
        );
    }

    #[test]
    fn budget_remaining_saturates() {
        let team = Team {
            id: TeamId::new(),
            season_id: SeasonId::new(),
            name: "t".into(),
            budget_total: 100,
            budget_spent: 100,
        };
        assert_eq!(team.budget_remaining(), 0);
    }
}
