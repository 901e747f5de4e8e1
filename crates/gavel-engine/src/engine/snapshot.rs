//! Point-in-time projections of auction state.
//!
//! The live engine serves [`Snapshot`]s directly from its in-memory state;
//! [`replay`] folds a slice of the event log into the same shape, which gives
//! subscribers a cheaper alternative to a from-zero replay and gives
//! post-mortems a way to reconstruct what the engine showed at any sequence.

use jiff::Timestamp;
use serde::Serialize;

use crate::{
    events::{
        AuctionEvent,
        EventEnvelope,
    },
    model::{
        AuctionId,
        AuctionStatus,
        LotId,
        LotStatus,
        Money,
        PlayerId,
        TeamId,
    },
};

/// Bids kept on the current lot of a snapshot.
pub const TOP_BIDS_IN_SNAPSHOT: usize = 5;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Snapshot {
    pub auction_id: AuctionId,
    pub auction_status: AuctionStatus,
    pub current_lot: Option<LotSnapshot>,
    pub team_budgets: Vec<TeamBudget>,
    /// The sequence at which this projection is consistent.
    pub observed_sequence: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LotSnapshot {
    pub lot_id: LotId,
    pub player_id: PlayerId,
    pub status: LotStatus,
    pub current_price: Option<Money>,
    pub ends_at: Option<Timestamp>,
    pub extensions_used: u32,
    pub leading_team: Option<TeamId>,
    /// Highest amounts first, at most [`TOP_BIDS_IN_SNAPSHOT`].
    pub top_bids: Vec<BidSnapshot>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct BidSnapshot {
    pub team_id: TeamId,
    pub amount: Money,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TeamBudget {
    pub team_id: TeamId,
    pub budget_total: Money,
    pub budget_spent: Money,
    pub roster_size: u32,
}

/// Starting point for a [`replay`]: the team budgets and roster sizes as they
/// were before the first replayed event.
#[derive(Clone, Debug, Default)]
pub struct ReplayBase {
    pub teams: Vec<TeamBudget>,
}

/// Folds `events` (ascending by sequence) over `base` into the snapshot the
/// live engine would have served right after the last event.
///
/// Timers are not reconstructed beyond the deadlines recorded on the events
/// themselves, so a replayed snapshot of a paused or finalized lot matches
/// the live one exactly, and an in-progress one matches modulo nothing: the
/// deadline on `LOT_STARTED`/`LOT_EXTENDED` is the live deadline.
#[must_use]
pub fn replay(auction_id: AuctionId, base: &ReplayBase, events: &[EventEnvelope]) -> Snapshot {
    let mut snapshot = Snapshot {
        auction_id,
        auction_status: AuctionStatus::NotStarted,
        current_lot: None,
        team_budgets: base.teams.clone(),
        observed_sequence: 0,
    };

    for envelope in events {
        snapshot.observed_sequence = envelope.sequence;
        match &envelope.event {
            AuctionEvent::AuctionStarted {
                ..
            } => {
                snapshot.auction_status = AuctionStatus::InProgress;
            }
            AuctionEvent::AuctionPaused {
                ..
            } => {
                snapshot.auction_status = AuctionStatus::Paused;
                if let Some(lot) = snapshot.current_lot.as_mut() {
                    lot.status = LotStatus::Paused;
                    lot.ends_at = None;
                }
            }
            AuctionEvent::AuctionResumed {
                new_ends_at, ..
            } => {
                snapshot.auction_status = AuctionStatus::InProgress;
                if let Some(lot) = snapshot.current_lot.as_mut() {
                    lot.status = LotStatus::InProgress;
                    lot.ends_at = *new_ends_at;
                }
            }
            AuctionEvent::LotStarted {
                lot_id,
                player_id,
                base_price,
                ends_at,
            } => {
                snapshot.current_lot = Some(LotSnapshot {
                    lot_id: *lot_id,
                    player_id: *player_id,
                    status: LotStatus::InProgress,
                    current_price: Some(*base_price),
                    ends_at: Some(*ends_at),
                    extensions_used: 0,
                    leading_team: None,
                    top_bids: Vec::new(),
                });
            }
            AuctionEvent::BidPlaced {
                lot_id,
                team_id,
                amount,
                ..
            } => {
                if let Some(lot) = snapshot
                    .current_lot
                    .as_mut()
                    .filter(|lot| lot.lot_id == *lot_id)
                {
                    lot.current_price = Some(*amount);
                    lot.leading_team = Some(*team_id);
                    lot.top_bids.insert(
                        0,
                        BidSnapshot {
                            team_id: *team_id,
                            amount: *amount,
                        },
                    );
                    lot.top_bids.truncate(TOP_BIDS_IN_SNAPSHOT);
                }
            }
            AuctionEvent::LotExtended {
                lot_id,
                new_ends_at,
                extensions_used,
            } => {
                if let Some(lot) = snapshot
                    .current_lot
                    .as_mut()
                    .filter(|lot| lot.lot_id == *lot_id)
                {
                    lot.ends_at = Some(*new_ends_at);
                    lot.extensions_used = *extensions_used;
                }
            }
            AuctionEvent::LotSold {
                lot_id,
                team_id,
                final_price,
            } => {
                if let Some(team) = snapshot
                    .team_budgets
                    .iter_mut()
                    .find(|team| team.team_id == *team_id)
                {
                    team.budget_spent = team.budget_spent.saturating_add(*final_price);
                    team.roster_size = team.roster_size.saturating_add(1);
                }
                if snapshot
                    .current_lot
                    .as_ref()
                    .is_some_and(|lot| lot.lot_id == *lot_id)
                {
                    snapshot.current_lot = None;
                }
            }
            AuctionEvent::LotUnsold {
                lot_id, ..
            } => {
                // The forced unsold sweep of an ending auction also emits
                // this for lots that never became current.
                if snapshot
                    .current_lot
                    .as_ref()
                    .is_some_and(|lot| lot.lot_id == *lot_id)
                {
                    snapshot.current_lot = None;
                }
            }
            AuctionEvent::AuctionEnded {
                ..
            } => {
                snapshot.auction_status = AuctionStatus::Completed;
                snapshot.current_lot = None;
            }
        }
    }

    snapshot
}
