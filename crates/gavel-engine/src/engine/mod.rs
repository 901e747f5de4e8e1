//! The public operations surface of the auction core.
//!
//! One live worker per auction, looked up by id in a concurrent map. The
//! [`Engine`] handle is cheap to clone and is what request handlers hold;
//! every state-mutating operation is forwarded to the owning worker over its
//! command channel and answered on a oneshot, which gives the per-auction
//! serialization the rest of the design relies on. Reads either go through
//! the same channel (snapshot) or straight to the store (event history).

use std::sync::Arc;

use serde::{
    Deserialize,
    Serialize,
};
use tokio::sync::{
    mpsc,
    oneshot,
};
use tokio_util::{
    sync::CancellationToken,
    task::TaskTracker,
};
use tracing::instrument;

use crate::{
    clock::Clock,
    error::Error,
    events::EventEnvelope,
    hub::{
        self,
        EventStream,
        Topic,
    },
    model::{
        AuctionId,
        BidId,
        LotId,
        Money,
        TeamId,
        UserId,
    },
    repository::Repository,
};

mod snapshot;
mod worker;

pub use snapshot::{
    replay,
    BidSnapshot,
    LotSnapshot,
    ReplayBase,
    Snapshot,
    TeamBudget,
    TOP_BIDS_IN_SNAPSHOT,
};
use worker::{
    Command,
    Worker,
};


const COMMAND_CHANNEL_CAPACITY: usize = 64;
const DEFAULT_SUBSCRIBER_CAPACITY: usize = 256;
/// Hard cap on one `events_since` page.
const MAX_EVENTS_PAGE: usize = 1_000;

/// A candidate bid as submitted by a caller.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PlaceBidRequest {
    pub lot_id: LotId,
    pub team_id: TeamId,
    pub amount: Money,
    /// Recorded on the event payload for audit; not used for admission.
    pub user_id: Option<UserId>,
}

/// The outcome of an admitted bid.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct BidAccepted {
    pub bid_id: BidId,
    pub new_price: Money,
    /// Sequence of the `BID_PLACED` event this bid produced.
    pub sequence: u64,
}

#[derive(Clone)]
pub struct Engine {
    inner: Arc<Inner>,
}

struct Inner {
    repo: Arc<dyn Repository>,
    clock: Arc<dyn Clock>,
    auctions: papaya::HashMap<AuctionId, Handle>,
    tracker: TaskTracker,
    shutdown: CancellationToken,
    subscriber_capacity: usize,
}

#[derive(Clone)]
struct Handle {
    commands: mpsc::Sender<Command>,
    topic: Topic,
}

impl Engine {
    #[must_use]
    pub fn new(repo: Arc<dyn Repository>, clock: Arc<dyn Clock>) -> Self {
        Self::with_subscriber_capacity(repo, clock, DEFAULT_SUBSCRIBER_CAPACITY)
    }

    /// Like [`Engine::new`] with an explicit per-subscriber buffer size.
    /// Subscribers that fall more than `subscriber_capacity` events behind
    /// are dropped as slow consumers.
    #[must_use]
    pub fn with_subscriber_capacity(
        repo: Arc<dyn Repository>,
        clock: Arc<dyn Clock>,
        subscriber_capacity: usize,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                repo,
                clock,
                auctions: papaya::HashMap::new(),
                tracker: TaskTracker::new(),
                shutdown: CancellationToken::new(),
                subscriber_capacity,
            }),
        }
    }

    /// Brings an auction live: loads its persisted state and spawns its
    /// worker. If the current lot's deadline passed while the engine was
    /// down, the lot is finalized before this returns. Idempotent.
    #[instrument(skip(self), err)]
    pub async fn initialize_auction(&self, auction_id: AuctionId) -> Result<(), Error> {
        if self.inner.auctions.pin().contains_key(&auction_id) {
            return Ok(());
        }

        let aggregate = self
            .inner
            .repo
            .load_auction(auction_id)
            .await?
            .ok_or(Error::AuctionNotFound {
                id: auction_id,
            })?;

        let (ready_tx, ready_rx) = oneshot::channel();
        let mut spawn = None;
        {
            let auctions = self.inner.auctions.pin();
            auctions.get_or_insert_with(auction_id, || {
                let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
                let topic = Topic::new(self.inner.subscriber_capacity);
                spawn = Some(Worker::new(
                    aggregate,
                    Arc::clone(&self.inner.repo),
                    Arc::clone(&self.inner.clock),
                    topic.clone(),
                    command_rx,
                    self.inner.shutdown.child_token(),
                    ready_tx,
                ));
                Handle {
                    commands: command_tx,
                    topic,
                }
            });
        }

        if let Some(worker) = spawn {
            self.inner.tracker.spawn(worker.run());
            // Wait for startup recovery, so overdue finalization work is
            // done before the auction accepts operations.
            let _ = ready_rx.await;
        }
        Ok(())
    }

    /// Transitions a `NOT_STARTED` auction to `IN_PROGRESS` and puts the
    /// first lot under the hammer.
    pub async fn start_auction(&self, auction_id: AuctionId) -> Result<(), Error> {
        self.request(auction_id, |reply| Command::Start {
            reply,
        })
        .await
    }

    /// Freezes a running auction, capturing the current lot's remaining
    /// time.
    pub async fn pause_auction(&self, auction_id: AuctionId) -> Result<(), Error> {
        self.request(auction_id, |reply| Command::Pause {
            reply,
        })
        .await
    }

    /// Unfreezes a paused auction; a paused lot resumes with exactly the
    /// remaining time it had when the auction was paused.
    pub async fn resume_auction(&self, auction_id: AuctionId) -> Result<(), Error> {
        self.request(auction_id, |reply| Command::Resume {
            reply,
        })
        .await
    }

    /// Admits or rejects a bid. On admission the bid is persisted, the lot
    /// price reflects it, the `BID_PLACED` event is appended, and soft close
    /// has been evaluated, all before this returns.
    pub async fn place_bid(
        &self,
        auction_id: AuctionId,
        request: PlaceBidRequest,
    ) -> Result<BidAccepted, Error> {
        self.request(auction_id, |reply| Command::PlaceBid {
            request,
            reply,
        })
        .await
    }

    /// Admin override: finalizes the current lot (selling it if it has any
    /// valid bid) and advances to the next one.
    pub async fn start_next_lot(&self, auction_id: AuctionId) -> Result<(), Error> {
        self.request(auction_id, |reply| Command::StartNextLot {
            reply,
        })
        .await
    }

    /// Admin override: immediately finalizes the active lot by natural
    /// policy.
    pub async fn force_sell(&self, auction_id: AuctionId, lot_id: LotId) -> Result<(), Error> {
        self.request(auction_id, |reply| Command::ForceSell {
            lot_id,
            reply,
        })
        .await
    }

    /// Admin override: the active lot goes unsold regardless of bids on
    /// record.
    pub async fn mark_unsold(&self, auction_id: AuctionId, lot_id: LotId) -> Result<(), Error> {
        self.request(auction_id, |reply| Command::MarkUnsold {
            lot_id,
            reply,
        })
        .await
    }

    /// Admin override: finalizes the current lot naturally, sweeps every
    /// remaining queued lot unsold, and completes the auction.
    pub async fn end_auction(&self, auction_id: AuctionId) -> Result<(), Error> {
        self.request(auction_id, |reply| Command::EndAuction {
            reply,
        })
        .await
    }

    /// The current projected state and the sequence at which it is
    /// consistent.
    pub async fn snapshot(&self, auction_id: AuctionId) -> Result<Snapshot, Error> {
        self.request(auction_id, |reply| Command::Snapshot {
            reply,
        })
        .await
    }

    /// Attaches a subscriber: persisted events after `from_sequence` are
    /// replayed in order, then the live stream continues without duplicates
    /// or gaps.
    pub async fn subscribe(
        &self,
        auction_id: AuctionId,
        from_sequence: Option<u64>,
    ) -> Result<EventStream, Error> {
        let handle = self.handle(auction_id).await?;
        hub::subscribe(
            Arc::clone(&self.inner.repo),
            &handle.topic,
            auction_id,
            from_sequence.unwrap_or(0),
        )
        .await
    }

    /// A bounded historical slice for reconnect catch-up: up to `limit`
    /// events with `sequence > after_sequence`.
    pub async fn events_since(
        &self,
        auction_id: AuctionId,
        after_sequence: u64,
        limit: usize,
    ) -> Result<Vec<EventEnvelope>, Error> {
        let _ = self.handle(auction_id).await?;
        let limit = limit.min(MAX_EVENTS_PAGE);
        Ok(self
            .inner
            .repo
            .events_since(auction_id, after_sequence, limit)
            .await?)
    }

    /// Stops all workers and waits for them to wind down. In-flight
    /// operations finish or fail deterministically; subsequent operations
    /// return [`Error::Unavailable`].
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        self.inner.tracker.close();
        self.inner.tracker.wait().await;
    }

    async fn handle(&self, auction_id: AuctionId) -> Result<Handle, Error> {
        if let Some(handle) = self.inner.auctions.pin().get(&auction_id) {
            return Ok(handle.clone());
        }
        self.initialize_auction(auction_id).await?;
        self.inner
            .auctions
            .pin()
            .get(&auction_id)
            .cloned()
            .ok_or_else(Error::unavailable)
    }

    async fn request<T>(
        &self,
        auction_id: AuctionId,
        build: impl FnOnce(oneshot::Sender<Result<T, Error>>) -> Command,
    ) -> Result<T, Error> {
        let handle = self.handle(auction_id).await?;
        let (reply_tx, reply_rx) = oneshot::channel();
        handle
            .commands
            .send(build(reply_tx))
            .await
            .map_err(|_| Error::unavailable())?;
        reply_rx.await.map_err(|_| Error::unavailable())?
    }
}
