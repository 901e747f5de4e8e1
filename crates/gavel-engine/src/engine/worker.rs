//! The per-auction single writer.
//!
//! One worker task owns all mutable state of one auction. It is driven by a
//! `select!` loop over the shutdown token, a single timer slot, and the
//! command channel, so every state transition, event-sequence allocation, and
//! store commit happens strictly one at a time. The timer slot holds at most
//! one pending wake (the lot deadline or the inter-lot gap); arming a new
//! wake always replaces the previous one.
//!
//! ## Finalization
//!
//! When the lot deadline fires (or an admin forces it), the lot is finalized
//! in one batch: the lot row flips to its terminal status and, for a sale,
//! the roster entry, budget debit, and team update land together with the
//! `LOT_SOLD` event. If the batch keeps failing past the retry bound, the
//! auction is escalated to paused with the lot's remaining time recorded as
//! zero, so a later resume immediately re-runs the finalization.

use std::{
    collections::HashMap,
    pin::Pin,
    sync::Arc,
    time::Duration,
};

use indexmap::IndexMap;
use jiff::Timestamp;
use tokio::{
    select,
    sync::{
        mpsc,
        oneshot,
    },
    time::{
        sleep_until,
        Sleep,
    },
};
use tokio_util::sync::CancellationToken;
use tracing::{
    error,
    info,
    instrument,
    warn,
};

use super::{
    snapshot::{
        BidSnapshot,
        LotSnapshot,
        Snapshot,
        TeamBudget,
        TOP_BIDS_IN_SNAPSHOT,
    },
    BidAccepted,
    PlaceBidRequest,
};
use crate::{
    admission::{
        self,
        AdmissionContext,
        CurrentLot,
        RosterCounts,
    },
    clock::{
        remaining_until,
        timestamp_after,
        Clock,
    },
    error::Error,
    events::{
        AuctionEvent,
        EventEnvelope,
    },
    hub::Topic,
    metrics,
    model::{
        Auction,
        AuctionStatus,
        Bid,
        BidId,
        BudgetTransaction,
        BudgetTransactionKind,
        Lot,
        LotId,
        LotStatus,
        Player,
        PlayerId,
        PlayerRole,
        RosterEntry,
        Season,
        Team,
        TeamId,
    },
    repository::{
        AuctionAggregate,
        EventRecord,
        Repository,
        RepositoryError,
        Write,
        WriteBatch,
    },
};

/// Attempts beyond the first for a finalization commit before escalating.
const FINALIZE_COMMIT_RETRIES: u32 = 2;
const FINALIZE_RETRY_BACKOFF: Duration = Duration::from_millis(100);
/// Page size when scanning the log for a lot's extension count at startup.
const EXTENSION_SCAN_PAGE: usize = 512;

type Reply<T> = oneshot::Sender<Result<T, Error>>;

pub(crate) enum Command {
    Start {
        reply: Reply<()>,
    },
    Pause {
        reply: Reply<()>,
    },
    Resume {
        reply: Reply<()>,
    },
    PlaceBid {
        request: PlaceBidRequest,
        reply: Reply<BidAccepted>,
    },
    StartNextLot {
        reply: Reply<()>,
    },
    ForceSell {
        lot_id: LotId,
        reply: Reply<()>,
    },
    MarkUnsold {
        lot_id: LotId,
        reply: Reply<()>,
    },
    EndAuction {
        reply: Reply<()>,
    },
    Snapshot {
        reply: Reply<Snapshot>,
    },
}

#[derive(Clone, Copy, PartialEq)]
enum TimerKind {
    LotDeadline,
    InterLotGap,
}

struct ActiveTimer {
    kind: TimerKind,
    sleep: Pin<Box<Sleep>>,
}

#[derive(Clone, Copy, PartialEq)]
enum FinalizePolicy {
    /// Sold to the last bidder if any valid bid exists, unsold otherwise.
    Natural,
    /// Same policy as [`FinalizePolicy::Natural`], but admin-initiated.
    ForceSell,
    /// Unsold regardless of bids on record.
    MarkUnsold,
}

/// The in-memory aggregate the worker serializes access to.
struct AuctionState {
    auction: Auction,
    season: Season,
    teams: IndexMap<TeamId, Team>,
    players: HashMap<PlayerId, Player>,
    /// Ascending catalog order.
    lots: IndexMap<LotId, Lot>,
    /// Placement order within each lot.
    bids_by_lot: HashMap<LotId, Vec<Bid>>,
    roster: Vec<RosterEntry>,
    last_sequence: u64,
}

impl AuctionState {
    fn from_aggregate(aggregate: AuctionAggregate) -> Self {
        let AuctionAggregate {
            auction,
            season,
            teams,
            players,
            mut lots,
            bids,
            roster,
            last_sequence,
        } = aggregate;

        lots.sort_by_key(|lot| lot.order);
        let mut teams: Vec<Team> = teams;
        teams.sort_by_key(|team| team.id);

        let mut bids_by_lot: HashMap<LotId, Vec<Bid>> = HashMap::new();
        for bid in bids {
            bids_by_lot.entry(bid.lot_id).or_default().push(bid);
        }

        Self {
            auction,
            season,
            teams: teams.into_iter().map(|team| (team.id, team)).collect(),
            players: players.into_iter().map(|player| (player.id, player)).collect(),
            lots: lots.into_iter().map(|lot| (lot.id, lot)).collect(),
            bids_by_lot,
            roster,
            last_sequence,
        }
    }

    fn current_lot(&self) -> Option<&Lot> {
        self.auction
            .current_lot
            .and_then(|lot_id| self.lots.get(&lot_id))
    }

    fn leading_bid(&self, lot_id: LotId) -> Option<&Bid> {
        self.bids_by_lot
            .get(&lot_id)
            .and_then(|bids| bids.iter().rev().find(|bid| bid.valid))
    }

    fn next_queued_lot(&self) -> Option<LotId> {
        self.lots
            .values()
            .filter(|lot| lot.status == LotStatus::Queued)
            .min_by_key(|lot| lot.order)
            .map(|lot| lot.id)
    }

    fn roster_counts(&self, team_id: TeamId) -> RosterCounts {
        let mut counts = RosterCounts::default();
        for entry in &self.roster {
            if entry.team_id != team_id {
                continue;
            }
            counts.size += 1;
            if let Some(player) = self.players.get(&entry.player_id) {
                if player.is_overseas {
                    counts.overseas += 1;
                }
                if player.role == PlayerRole::WicketKeeper {
                    counts.wicket_keepers += 1;
                }
            }
        }
        counts
    }

    fn queued_wicket_keepers(&self) -> u32 {
        self.lots
            .values()
            .filter(|lot| {
                lot.status == LotStatus::Queued
                    && self
                        .players
                        .get(&lot.player_id)
                        .is_some_and(|player| player.role == PlayerRole::WicketKeeper)
            })
            .count() as u32
    }
}

pub(crate) struct Worker {
    repo: Arc<dyn Repository>,
    clock: Arc<dyn Clock>,
    topic: Topic,
    commands: mpsc::Receiver<Command>,
    shutdown: CancellationToken,
    state: AuctionState,
    timer: Option<ActiveTimer>,
    /// Soft-close extensions granted on the current lot. Survives
    /// pause/resume; reconstructed from the log on startup.
    extensions_used: u32,
    /// Fired once startup recovery has run, so initialization can block on
    /// overdue finalization work.
    ready: Option<oneshot::Sender<()>>,
}

impl Worker {
    pub(crate) fn new(
        aggregate: AuctionAggregate,
        repo: Arc<dyn Repository>,
        clock: Arc<dyn Clock>,
        topic: Topic,
        commands: mpsc::Receiver<Command>,
        shutdown: CancellationToken,
        ready: oneshot::Sender<()>,
    ) -> Self {
        Self {
            repo,
            clock,
            topic,
            commands,
            shutdown,
            state: AuctionState::from_aggregate(aggregate),
            timer: None,
            extensions_used: 0,
            ready: Some(ready),
        }
    }

    #[instrument(skip_all, fields(auction_id = %self.state.auction.id))]
    pub(crate) async fn run(mut self) {
        if let Err(error) = self.recover().await {
            error!(%error, "failed to recover auction state at startup");
        }
        if let Some(ready) = self.ready.take() {
            let _ = ready.send(());
        }

        loop {
            select! {
                biased;

                () = self.shutdown.cancelled() => break,

                // Commands drain before a due timer so that a bid which was
                // already queued when the deadline passed is rejected by the
                // deadline check instead of racing the finalization.
                command = self.commands.recv() => {
                    let Some(command) = command else { break };
                    self.handle_command(command).await;
                }

                () = async {
                    self.timer
                        .as_mut()
                        .expect("arm checked by the select guard")
                        .sleep
                        .as_mut()
                        .await;
                }, if self.timer.is_some() => {
                    let kind = self
                        .timer
                        .take()
                        .expect("arm checked by the select guard")
                        .kind;
                    self.handle_timer(kind).await;
                }
            }
        }
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Start {
                reply,
            } => {
                let _ = reply.send(self.start_auction().await);
            }
            Command::Pause {
                reply,
            } => {
                let _ = reply.send(self.pause().await);
            }
            Command::Resume {
                reply,
            } => {
                let _ = reply.send(self.resume().await);
            }
            Command::PlaceBid {
                request,
                reply,
            } => {
                let _ = reply.send(self.place_bid(request).await);
            }
            Command::StartNextLot {
                reply,
            } => {
                let _ = reply.send(self.advance().await);
            }
            Command::ForceSell {
                lot_id,
                reply,
            } => {
                let _ = reply.send(self.force_finalize(lot_id, FinalizePolicy::ForceSell).await);
            }
            Command::MarkUnsold {
                lot_id,
                reply,
            } => {
                let _ = reply.send(self.force_finalize(lot_id, FinalizePolicy::MarkUnsold).await);
            }
            Command::EndAuction {
                reply,
            } => {
                let _ = reply.send(self.end_auction().await);
            }
            Command::Snapshot {
                reply,
            } => {
                let _ = reply.send(Ok(self.snapshot()));
            }
        }
    }

    async fn handle_timer(&mut self, kind: TimerKind) {
        match kind {
            TimerKind::LotDeadline => {
                match self.finalize_current_lot(FinalizePolicy::Natural).await {
                    Ok(()) => self.arm_gap_timer(),
                    Err(error) => {
                        error!(%error, "failed to finalize the lot at its deadline");
                    }
                }
            }
            TimerKind::InterLotGap => {
                if let Err(error) = self.advance().await {
                    error!(%error, "failed to advance past the inter-lot gap");
                }
            }
        }
    }

    /// Startup recovery: re-arm or immediately run the deadline of an
    /// in-progress lot, and keep an interrupted between-lots flow moving.
    async fn recover(&mut self) -> Result<(), Error> {
        if self.state.auction.status != AuctionStatus::InProgress {
            return Ok(());
        }

        let Some(lot) = self.state.current_lot().cloned() else {
            // Interrupted between lots; the gap wake advances or ends.
            self.arm_gap_timer();
            return Ok(());
        };

        if lot.status != LotStatus::InProgress {
            return Ok(());
        }

        self.extensions_used = self.count_extensions(lot.id).await?;
        let now = self.clock.now();
        // A lot whose row lost its deadline is treated as already due.
        let remaining = lot
            .ends_at
            .map(|ends_at| remaining_until(ends_at, now))
            .unwrap_or_default();
        if remaining.is_zero() {
            info!(
                lot_id = %lot.id,
                "lot deadline passed while the engine was down; finalizing now",
            );
            self.finalize_current_lot(FinalizePolicy::Natural).await?;
            self.arm_gap_timer();
        } else {
            self.arm_lot_timer(remaining);
        }
        Ok(())
    }

    async fn count_extensions(&self, lot_id: LotId) -> Result<u32, Error> {
        let mut count = 0;
        let mut cursor = 0;
        loop {
            let page = self
                .repo
                .events_since(self.state.auction.id, cursor, EXTENSION_SCAN_PAGE)
                .await?;
            let Some(last) = page.last() else {
                break;
            };
            cursor = last.sequence;
            count += page
                .iter()
                .filter(|envelope| {
                    matches!(
                        &envelope.event,
                        AuctionEvent::LotExtended { lot_id: extended, .. } if *extended == lot_id
                    )
                })
                .count() as u32;
            if page.len() < EXTENSION_SCAN_PAGE {
                break;
            }
        }
        Ok(count)
    }

    #[instrument(skip_all, err)]
    async fn start_auction(&mut self) -> Result<(), Error> {
        if self.state.auction.status != AuctionStatus::NotStarted {
            return Err(Error::invalid_state(
                "start_auction",
                self.state.auction.status,
            ));
        }

        let now = self.clock.now();
        let mut batch = WriteBatch::new();
        let mut pending = Vec::new();
        batch.push(Write::UpdateAuction {
            auction_id: self.state.auction.id,
            status: AuctionStatus::InProgress,
            current_lot: None,
        });
        self.stage_event(
            &mut batch,
            &mut pending,
            now,
            AuctionEvent::AuctionStarted {
                auction_id: self.state.auction.id,
            },
        );
        self.repo.commit(batch).await?;
        self.state.auction.status = AuctionStatus::InProgress;
        self.publish_applied(pending);
        info!("auction started");

        self.advance().await
    }

    /// Finalizes the current lot if it is still live, then puts the next
    /// queued lot under the hammer or ends the auction if none is left.
    async fn advance(&mut self) -> Result<(), Error> {
        if self.state.auction.status != AuctionStatus::InProgress {
            return Err(Error::invalid_state(
                "start_next_lot",
                self.state.auction.status,
            ));
        }

        if self
            .state
            .current_lot()
            .is_some_and(|lot| lot.status == LotStatus::InProgress)
        {
            self.finalize_current_lot(FinalizePolicy::Natural).await?;
        }
        self.clear_timer();

        let Some(lot_id) = self.state.next_queued_lot() else {
            return self.complete_auction().await;
        };

        let lot = self
            .state
            .lots
            .get(&lot_id)
            .cloned()
            .ok_or(Error::LotNotFound {
                id: lot_id,
            })?;
        let player = self
            .state
            .players
            .get(&lot.player_id)
            .cloned()
            .ok_or_else(Error::unavailable)?;

        let now = self.clock.now();
        let duration = self.state.auction.settings.lot_duration();
        let ends_at = timestamp_after(now, duration);

        let mut updated = lot;
        updated.status = LotStatus::InProgress;
        updated.current_price = Some(player.base_price);
        updated.ends_at = Some(ends_at);
        updated.paused_remaining_ms = None;

        let mut batch = WriteBatch::new();
        let mut pending = Vec::new();
        batch.push(Write::UpdateAuction {
            auction_id: self.state.auction.id,
            status: AuctionStatus::InProgress,
            current_lot: Some(lot_id),
        });
        batch.push(Write::UpdateLot(updated.clone()));
        self.stage_event(
            &mut batch,
            &mut pending,
            now,
            AuctionEvent::LotStarted {
                lot_id,
                player_id: player.id,
                base_price: player.base_price,
                ends_at,
            },
        );
        self.repo.commit(batch).await?;

        self.state.auction.current_lot = Some(lot_id);
        self.state.lots.insert(lot_id, updated);
        self.publish_applied(pending);
        self.extensions_used = 0;
        self.arm_lot_timer(duration);
        info!(
            %lot_id,
            player_id = %player.id,
            base_price = player.base_price,
            %ends_at,
            "lot started",
        );
        Ok(())
    }

    async fn complete_auction(&mut self) -> Result<(), Error> {
        let now = self.clock.now();
        let mut batch = WriteBatch::new();
        let mut pending = Vec::new();
        batch.push(Write::UpdateAuction {
            auction_id: self.state.auction.id,
            status: AuctionStatus::Completed,
            current_lot: None,
        });
        self.stage_event(
            &mut batch,
            &mut pending,
            now,
            AuctionEvent::AuctionEnded {
                auction_id: self.state.auction.id,
            },
        );
        self.repo.commit(batch).await?;

        self.state.auction.status = AuctionStatus::Completed;
        self.state.auction.current_lot = None;
        self.publish_applied(pending);
        self.clear_timer();
        info!("auction completed");
        Ok(())
    }

    #[instrument(skip_all, err)]
    async fn pause(&mut self) -> Result<(), Error> {
        if self.state.auction.status != AuctionStatus::InProgress {
            return Err(Error::invalid_state("pause", self.state.auction.status));
        }

        let now = self.clock.now();
        let mut batch = WriteBatch::new();
        let mut pending = Vec::new();

        let mut paused_lot = None;
        if let Some(lot) = self
            .state
            .current_lot()
            .filter(|lot| lot.status == LotStatus::InProgress)
            .cloned()
        {
            let remaining = lot
                .ends_at
                .map(|ends_at| remaining_until(ends_at, now))
                .unwrap_or_default();
            let mut updated = lot;
            updated.status = LotStatus::Paused;
            updated.ends_at = None;
            updated.paused_remaining_ms =
                Some(u64::try_from(remaining.as_millis()).unwrap_or(u64::MAX));
            batch.push(Write::UpdateLot(updated.clone()));
            paused_lot = Some(updated);
        }

        batch.push(Write::UpdateAuction {
            auction_id: self.state.auction.id,
            status: AuctionStatus::Paused,
            current_lot: self.state.auction.current_lot,
        });
        self.stage_event(
            &mut batch,
            &mut pending,
            now,
            AuctionEvent::AuctionPaused {
                auction_id: self.state.auction.id,
            },
        );
        self.repo.commit(batch).await?;

        self.state.auction.status = AuctionStatus::Paused;
        if let Some(lot) = paused_lot {
            info!(
                lot_id = %lot.id,
                remaining_ms = lot.paused_remaining_ms,
                "captured remaining lot time",
            );
            self.state.lots.insert(lot.id, lot);
        }
        self.publish_applied(pending);
        self.clear_timer();
        Ok(())
    }

    #[instrument(skip_all, err)]
    async fn resume(&mut self) -> Result<(), Error> {
        if self.state.auction.status != AuctionStatus::Paused {
            return Err(Error::invalid_state("resume", self.state.auction.status));
        }

        let now = self.clock.now();
        let mut batch = WriteBatch::new();
        let mut pending = Vec::new();

        let mut resumed = None;
        if let Some(lot) = self
            .state
            .current_lot()
            .filter(|lot| lot.status == LotStatus::Paused)
            .cloned()
        {
            let remaining = Duration::from_millis(lot.paused_remaining_ms.unwrap_or(0));
            let ends_at = timestamp_after(now, remaining);
            let mut updated = lot;
            updated.status = LotStatus::InProgress;
            updated.ends_at = Some(ends_at);
            updated.paused_remaining_ms = None;
            batch.push(Write::UpdateLot(updated.clone()));
            resumed = Some((updated, remaining, ends_at));
        }

        batch.push(Write::UpdateAuction {
            auction_id: self.state.auction.id,
            status: AuctionStatus::InProgress,
            current_lot: self.state.auction.current_lot,
        });
        self.stage_event(
            &mut batch,
            &mut pending,
            now,
            AuctionEvent::AuctionResumed {
                auction_id: self.state.auction.id,
                new_ends_at: resumed.as_ref().map(|(_, _, ends_at)| *ends_at),
            },
        );
        self.repo.commit(batch).await?;

        self.state.auction.status = AuctionStatus::InProgress;
        match resumed {
            Some((lot, remaining, ends_at)) => {
                info!(lot_id = %lot.id, %ends_at, "restored lot deadline");
                self.state.lots.insert(lot.id, lot);
                self.publish_applied(pending);
                self.arm_lot_timer(remaining);
            }
            None => {
                self.publish_applied(pending);
                // Resumed between lots; the gap wake advances or ends.
                self.arm_gap_timer();
            }
        }
        Ok(())
    }

    async fn place_bid(&mut self, request: PlaceBidRequest) -> Result<BidAccepted, Error> {
        let result = self.try_place_bid(request).await;
        match &result {
            Ok(accepted) => {
                metrics::bid_admitted();
                info!(
                    bid_id = %accepted.bid_id,
                    new_price = accepted.new_price,
                    sequence = accepted.sequence,
                    "bid admitted",
                );
            }
            Err(error) => {
                metrics::bid_rejected();
                info!(%error, "bid rejected");
            }
        }
        result
    }

    async fn try_place_bid(&mut self, request: PlaceBidRequest) -> Result<BidAccepted, Error> {
        let PlaceBidRequest {
            lot_id,
            team_id,
            amount,
            user_id,
        } = request;

        let lot = self
            .state
            .lots
            .get(&lot_id)
            .cloned()
            .ok_or(Error::LotNotFound {
                id: lot_id,
            })?;
        let player = self
            .state
            .players
            .get(&lot.player_id)
            .ok_or_else(Error::unavailable)?;

        let now = self.clock.now();
        let current_price = lot.current_price.unwrap_or(player.base_price);
        let minimum_next_bid = self.state.auction.settings.minimum_next_bid(current_price);
        let context = AdmissionContext {
            auction_status: self.state.auction.status,
            current_lot: self.state.current_lot().map(|current| CurrentLot {
                lot_id: current.id,
                status: current.status,
                ends_at: current.ends_at,
            }),
            now,
            team: self.state.teams.get(&team_id),
            season: &self.state.season.settings,
            player,
            leading_team: self.state.leading_bid(lot_id).map(|bid| bid.team_id),
            minimum_next_bid,
            roster: self.state.roster_counts(team_id),
            queued_wicket_keepers: self.state.queued_wicket_keepers(),
        };
        admission::admit(&context, lot_id, team_id, amount)?;

        let bid = Bid {
            id: BidId::new(),
            lot_id,
            team_id,
            amount,
            placed_at: now,
            valid: true,
        };

        let mut updated = lot;
        updated.current_price = Some(amount);

        let mut batch = WriteBatch::new();
        let mut pending = Vec::new();
        batch.push(Write::InsertBid(bid.clone()));
        let sequence = self.stage_event(
            &mut batch,
            &mut pending,
            now,
            AuctionEvent::BidPlaced {
                lot_id,
                team_id,
                amount,
                user_id,
            },
        );

        // Soft close: a late bid pushes the deadline out from the moment of
        // the bid, up to the per-lot extension cap.
        let settings = &self.state.auction.settings;
        let mut extended = None;
        let remaining = updated
            .ends_at
            .map(|ends_at| remaining_until(ends_at, now))
            .unwrap_or_default();
        if remaining <= settings.soft_close_threshold()
            && self.extensions_used < settings.max_extensions
        {
            let extension = settings.soft_close_extension();
            let new_ends_at = timestamp_after(now, extension);
            updated.ends_at = Some(new_ends_at);
            self.stage_event(
                &mut batch,
                &mut pending,
                now,
                AuctionEvent::LotExtended {
                    lot_id,
                    new_ends_at,
                    extensions_used: self.extensions_used + 1,
                },
            );
            extended = Some(extension);
        }
        batch.push(Write::UpdateLot(updated.clone()));

        self.repo.commit(batch).await?;

        self.state.lots.insert(lot_id, updated);
        self.state.bids_by_lot.entry(lot_id).or_default().push(bid.clone());
        self.publish_applied(pending);

        if let Some(extension) = extended {
            self.extensions_used += 1;
            self.arm_lot_timer(extension);
            metrics::lot_extended();
        }

        Ok(BidAccepted {
            bid_id: bid.id,
            new_price: amount,
            sequence,
        })
    }

    /// Admin override entry point; validates the target lot, finalizes it,
    /// and keeps the auction flowing through the usual inter-lot gap.
    async fn force_finalize(&mut self, lot_id: LotId, policy: FinalizePolicy) -> Result<(), Error> {
        if self.state.auction.status != AuctionStatus::InProgress {
            return Err(Error::invalid_state(
                match policy {
                    FinalizePolicy::MarkUnsold => "mark_unsold",
                    _ => "force_sell",
                },
                self.state.auction.status,
            ));
        }
        if !self.state.lots.contains_key(&lot_id) {
            return Err(Error::LotNotFound {
                id: lot_id,
            });
        }
        let is_current_and_live = self.state.auction.current_lot == Some(lot_id)
            && self
                .state
                .current_lot()
                .is_some_and(|lot| lot.status == LotStatus::InProgress);
        if !is_current_and_live {
            return Err(Error::LotNotActive);
        }

        self.finalize_current_lot(policy).await?;
        self.arm_gap_timer();
        Ok(())
    }

    /// Finalizes the current lot under `policy` in one transaction, with a
    /// bounded retry. Exhausting the retries escalates the auction to paused.
    async fn finalize_current_lot(&mut self, policy: FinalizePolicy) -> Result<(), Error> {
        let Some(lot) = self.state.current_lot().cloned() else {
            return Err(Error::LotNotActive);
        };
        let now = self.clock.now();
        let forced = policy != FinalizePolicy::Natural;
        let winner = match policy {
            FinalizePolicy::MarkUnsold => None,
            _ => self.state.leading_bid(lot.id).cloned(),
        };

        let target = if winner.is_some() {
            LotStatus::Sold
        } else {
            LotStatus::Unsold
        };
        if !lot.status.can_transition_to(target) {
            return Err(Error::invalid_state("finalize_lot", lot.status));
        }

        let mut updated = lot.clone();
        updated.status = target;
        updated.ends_at = None;
        updated.paused_remaining_ms = None;

        let mut batch = WriteBatch::new();
        let mut pending = Vec::new();
        let mut sold = None;
        match winner {
            Some(bid) => {
                updated.current_price = Some(bid.amount);
                updated.winner_team = Some(bid.team_id);
                updated.final_price = Some(bid.amount);
                let team = self
                    .state
                    .teams
                    .get(&bid.team_id)
                    .ok_or(Error::TeamNotFound {
                        id: bid.team_id,
                    })?;
                let budget_spent = team.budget_spent.saturating_add(bid.amount);
                batch.push(Write::UpdateLot(updated.clone()));
                batch.push(Write::InsertRosterEntry(RosterEntry {
                    team_id: bid.team_id,
                    player_id: lot.player_id,
                    lot_id: lot.id,
                    price: bid.amount,
                }));
                batch.push(Write::InsertBudgetTransaction(BudgetTransaction {
                    team_id: bid.team_id,
                    lot_id: lot.id,
                    kind: BudgetTransactionKind::Debit,
                    amount: bid.amount,
                    at: now,
                }));
                batch.push(Write::UpdateTeamBudget {
                    team_id: bid.team_id,
                    budget_spent,
                });
                self.stage_event(
                    &mut batch,
                    &mut pending,
                    now,
                    AuctionEvent::LotSold {
                        lot_id: lot.id,
                        team_id: bid.team_id,
                        final_price: bid.amount,
                    },
                );
                sold = Some((bid.team_id, bid.amount, budget_spent));
            }
            None => {
                batch.push(Write::UpdateLot(updated.clone()));
                self.stage_event(
                    &mut batch,
                    &mut pending,
                    now,
                    AuctionEvent::LotUnsold {
                        lot_id: lot.id,
                        forced,
                    },
                );
            }
        }
        batch.push(Write::UpdateAuction {
            auction_id: self.state.auction.id,
            status: self.state.auction.status,
            current_lot: None,
        });

        if let Err(error) = self.commit_with_retry(batch).await {
            warn!(
                %error,
                lot_id = %lot.id,
                "finalization kept failing; escalating the auction to paused",
            );
            self.escalate_pause(&lot).await;
            return Err(error.into());
        }

        match &sold {
            Some((team_id, final_price, budget_spent)) => {
                if let Some(team) = self.state.teams.get_mut(team_id) {
                    team.budget_spent = *budget_spent;
                }
                self.state.roster.push(RosterEntry {
                    team_id: *team_id,
                    player_id: lot.player_id,
                    lot_id: lot.id,
                    price: *final_price,
                });
                metrics::lot_sold();
                info!(
                    lot_id = %lot.id,
                    winner = %team_id,
                    final_price,
                    "lot sold",
                );
            }
            None => {
                metrics::lot_unsold();
                info!(lot_id = %lot.id, forced, "lot unsold");
            }
        }
        self.state.lots.insert(lot.id, updated);
        self.state.auction.current_lot = None;
        self.publish_applied(pending);
        self.clear_timer();
        Ok(())
    }

    async fn commit_with_retry(&self, batch: WriteBatch) -> Result<(), RepositoryError> {
        let repo = Arc::clone(&self.repo);
        tryhard::retry_fn(move || {
            let repo = Arc::clone(&repo);
            let batch = batch.clone();
            async move { repo.commit(batch).await }
        })
        .retries(FINALIZE_COMMIT_RETRIES)
        .fixed_backoff(FINALIZE_RETRY_BACKOFF)
        .await
    }

    /// Last resort after finalization failed: freeze the auction with zero
    /// remaining time on the lot, so resuming re-runs the deadline at once.
    async fn escalate_pause(&mut self, lot: &Lot) {
        let now = self.clock.now();
        let mut batch = WriteBatch::new();
        let mut pending = Vec::new();

        let mut frozen = None;
        if lot.status == LotStatus::InProgress {
            let mut updated = lot.clone();
            updated.status = LotStatus::Paused;
            updated.ends_at = None;
            updated.paused_remaining_ms = Some(0);
            batch.push(Write::UpdateLot(updated.clone()));
            frozen = Some(updated);
        }
        batch.push(Write::UpdateAuction {
            auction_id: self.state.auction.id,
            status: AuctionStatus::Paused,
            current_lot: self.state.auction.current_lot,
        });
        self.stage_event(
            &mut batch,
            &mut pending,
            now,
            AuctionEvent::AuctionPaused {
                auction_id: self.state.auction.id,
            },
        );

        match self.repo.commit(batch).await {
            Ok(()) => {
                self.state.auction.status = AuctionStatus::Paused;
                if let Some(updated) = frozen {
                    self.state.lots.insert(updated.id, updated);
                }
                self.publish_applied(pending);
                warn!("auction paused pending operator intervention");
            }
            Err(error) => {
                error!(
                    %error,
                    "failed to record the pause escalation; retry the override once the store \
                     recovers",
                );
            }
        }
        self.clear_timer();
    }

    /// Ends the auction: the current lot is finalized by natural policy,
    /// every still-queued lot is swept unsold, and the auction completes.
    #[instrument(skip_all, err)]
    async fn end_auction(&mut self) -> Result<(), Error> {
        if !self
            .state
            .auction
            .status
            .can_transition_to(AuctionStatus::Completed)
        {
            return Err(Error::invalid_state("end_auction", self.state.auction.status));
        }

        if self
            .state
            .current_lot()
            .is_some_and(|lot| !lot.status.is_terminal())
        {
            self.finalize_current_lot(FinalizePolicy::Natural).await?;
        }

        let now = self.clock.now();
        let mut batch = WriteBatch::new();
        let mut pending = Vec::new();

        let queued: Vec<Lot> = self
            .state
            .lots
            .values()
            .filter(|lot| lot.status == LotStatus::Queued)
            .cloned()
            .collect();
        let mut discarded = Vec::new();
        for lot in queued {
            let mut updated = lot;
            updated.status = LotStatus::Unsold;
            batch.push(Write::UpdateLot(updated.clone()));
            self.stage_event(
                &mut batch,
                &mut pending,
                now,
                AuctionEvent::LotUnsold {
                    lot_id: updated.id,
                    forced: true,
                },
            );
            discarded.push(updated);
        }

        batch.push(Write::UpdateAuction {
            auction_id: self.state.auction.id,
            status: AuctionStatus::Completed,
            current_lot: None,
        });
        self.stage_event(
            &mut batch,
            &mut pending,
            now,
            AuctionEvent::AuctionEnded {
                auction_id: self.state.auction.id,
            },
        );
        self.repo.commit(batch).await?;

        for lot in discarded {
            self.state.lots.insert(lot.id, lot);
        }
        self.state.auction.status = AuctionStatus::Completed;
        self.state.auction.current_lot = None;
        self.publish_applied(pending);
        self.clear_timer();
        info!("auction ended by admin");
        Ok(())
    }

    fn snapshot(&self) -> Snapshot {
        let current_lot = self.state.current_lot().map(|lot| {
            let top_bids = self
                .state
                .bids_by_lot
                .get(&lot.id)
                .map(|bids| {
                    bids.iter()
                        .rev()
                        .filter(|bid| bid.valid)
                        .take(TOP_BIDS_IN_SNAPSHOT)
                        .map(|bid| BidSnapshot {
                            team_id: bid.team_id,
                            amount: bid.amount,
                        })
                        .collect()
                })
                .unwrap_or_default();
            LotSnapshot {
                lot_id: lot.id,
                player_id: lot.player_id,
                status: lot.status,
                current_price: lot.current_price,
                ends_at: lot.ends_at,
                extensions_used: self.extensions_used,
                leading_team: self.state.leading_bid(lot.id).map(|bid| bid.team_id),
                top_bids,
            }
        });

        let mut team_budgets: Vec<TeamBudget> = self
            .state
            .teams
            .values()
            .map(|team| TeamBudget {
                team_id: team.id,
                budget_total: team.budget_total,
                budget_spent: team.budget_spent,
                roster_size: self.state.roster_counts(team.id).size,
            })
            .collect();
        team_budgets.sort_by_key(|team| team.team_id);

        Snapshot {
            auction_id: self.state.auction.id,
            auction_status: self.state.auction.status,
            current_lot,
            team_budgets,
            observed_sequence: self.state.last_sequence,
        }
    }

    fn stage_event(
        &self,
        batch: &mut WriteBatch,
        pending: &mut Vec<EventEnvelope>,
        timestamp: Timestamp,
        event: AuctionEvent,
    ) -> u64 {
        let sequence = self.state.last_sequence + pending.len() as u64 + 1;
        batch.push(Write::AppendEvent(EventRecord {
            auction_id: self.state.auction.id,
            sequence,
            timestamp,
            payload: event.to_blob(),
        }));
        pending.push(EventEnvelope {
            sequence,
            timestamp,
            event,
        });
        sequence
    }

    fn publish_applied(&mut self, pending: Vec<EventEnvelope>) {
        for envelope in pending {
            self.state.last_sequence = envelope.sequence;
            self.topic.publish(&envelope);
        }
    }

    fn arm_lot_timer(&mut self, remaining: Duration) {
        let deadline = self.clock.instant() + remaining;
        self.timer = Some(ActiveTimer {
            kind: TimerKind::LotDeadline,
            sleep: Box::pin(sleep_until(deadline)),
        });
    }

    fn arm_gap_timer(&mut self) {
        let deadline = self.clock.instant() + self.state.auction.settings.inter_lot_gap();
        self.timer = Some(ActiveTimer {
            kind: TimerKind::InterLotGap,
            sleep: Box::pin(sleep_until(deadline)),
        });
    }

    fn clear_timer(&mut self) {
        self.timer = None;
    }
}
