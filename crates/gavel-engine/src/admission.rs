//! The bid admission predicate.
//!
//! Admission is a pure function over a view of the serialized per-auction
//! state, so there is no window between the checks and the write that admits
//! the bid. The clauses run in a fixed order and the first failing clause
//! determines the returned error.

use jiff::Timestamp;

use crate::{
    config::SeasonSettings,
    error::Error,
    model::{
        AuctionStatus,
        LotId,
        LotStatus,
        Money,
        Player,
        PlayerRole,
        Team,
        TeamId,
    },
};

/// The slice of serialized auction state a single admission decision reads.
pub(crate) struct AdmissionContext<'a> {
    pub(crate) auction_status: AuctionStatus,
    /// The auction's current lot, if any, with its status and deadline.
    pub(crate) current_lot: Option<CurrentLot>,
    pub(crate) now: Timestamp,
    /// The team placing the bid, if it exists in the auction's season.
    pub(crate) team: Option<&'a Team>,
    pub(crate) season: &'a SeasonSettings,
    /// The player on the block.
    pub(crate) player: &'a Player,
    /// Team currently leading the lot.
    pub(crate) leading_team: Option<TeamId>,
    /// Minimum admissible amount per the increment schedule.
    pub(crate) minimum_next_bid: Money,
    /// Composition of the bidding team's roster so far.
    pub(crate) roster: RosterCounts,
    /// Wicket-keepers still waiting in QUEUED lots (candidate lot excluded).
    pub(crate) queued_wicket_keepers: u32,
}

#[derive(Clone, Copy)]
pub(crate) struct CurrentLot {
    pub(crate) lot_id: LotId,
    pub(crate) status: LotStatus,
    pub(crate) ends_at: Option<Timestamp>,
}

#[derive(Clone, Copy, Default)]
pub(crate) struct RosterCounts {
    pub(crate) size: u32,
    pub(crate) overseas: u32,
    pub(crate) wicket_keepers: u32,
}

/// Admits or rejects a candidate bid of `amount` on `lot_id`.
///
/// Clause order follows the admission design: auction running, lot active,
/// deadline open, team valid, not already leading, increment satisfied,
/// budget sufficient, squad not full, roster composition feasible.
pub(crate) fn admit(
    ctx: &AdmissionContext<'_>,
    lot_id: LotId,
    team_id: TeamId,
    amount: Money,
) -> Result<(), Error> {
    if ctx.auction_status != AuctionStatus::InProgress {
        return Err(Error::AuctionNotRunning);
    }

    let lot = ctx
        .current_lot
        .filter(|lot| lot.lot_id == lot_id && lot.status == LotStatus::InProgress)
        .ok_or(Error::LotNotActive)?;

    // A bid arriving exactly at the deadline is late.
    let ends_at = lot.ends_at.ok_or(Error::LotNotActive)?;
    if ctx.now >= ends_at {
        return Err(Error::LotClosed);
    }

    let team = ctx.team.filter(|team| team.id == team_id).ok_or(
        Error::TeamNotFound {
            id: team_id,
        },
    )?;

    if ctx.leading_team == Some(team.id) {
        return Err(Error::AlreadyLeading);
    }

    if amount < ctx.minimum_next_bid {
        return Err(Error::BelowIncrement {
            min_next: ctx.minimum_next_bid,
        });
    }

    if team.budget_spent.saturating_add(amount) > team.budget_total {
        return Err(Error::InsufficientBudget {
            remaining: team.budget_remaining(),
        });
    }

    if ctx.roster.size >= ctx.season.max_squad_size {
        return Err(Error::SquadFull);
    }

    check_composition(ctx)
}

/// Conservative roster-composition feasibility: the candidate is counted as
/// acquired, and required minimums must stay reachable with the squad slots
/// and QUEUED lots that would remain.
fn check_composition(ctx: &AdmissionContext<'_>) -> Result<(), Error> {
    if ctx.player.is_overseas && ctx.roster.overseas >= ctx.season.max_overseas {
        return Err(Error::RosterConstraint {
            reason: "the overseas player cap is reached",
        });
    }

    if ctx.player.role != PlayerRole::WicketKeeper {
        let keepers_missing = ctx
            .season
            .min_wicket_keepers
            .saturating_sub(ctx.roster.wicket_keepers);
        let slots_after = ctx
            .season
            .max_squad_size
            .saturating_sub(ctx.roster.size.saturating_add(1));
        let attainable = slots_after.min(ctx.queued_wicket_keepers);
        if keepers_missing > attainable {
            return Err(Error::RosterConstraint {
                reason: "the wicket-keeper minimum would become unreachable",
            });
        }
    }

    Ok(())
}
