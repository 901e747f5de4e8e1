//! The persistence boundary the engine writes through.
//!
//! The engine serializes all writes for one auction itself, so the store only
//! has to apply a [`WriteBatch`] atomically and keep `(auction_id, sequence)`
//! unique on the event log. Read-committed semantics are sufficient.

use async_trait::async_trait;
use jiff::Timestamp;

use crate::{
    events::EventEnvelope,
    model::{
        Auction,
        AuctionId,
        AuctionStatus,
        Bid,
        BudgetTransaction,
        Lot,
        LotId,
        Money,
        Player,
        RosterEntry,
        Season,
        Team,
        TeamId,
    },
};

mod in_memory;
pub use in_memory::InMemoryRepository;

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("auction `{id}` is unknown to the store")]
    UnknownAuction { id: AuctionId },

    #[error("event sequence {sequence} already exists for auction `{auction_id}`")]
    SequenceConflict {
        auction_id: AuctionId,
        sequence: u64,
    },

    #[error("write batch referenced an entity missing from the store: {entity}")]
    MissingEntity { entity: String },

    #[error("stored event blob failed to decode")]
    Corrupt {
        #[source]
        source: serde_json::Error,
    },

    #[error("the store rejected the operation: {message}")]
    Unavailable { message: String },
}

/// Everything the engine needs in memory to run one auction.
#[derive(Clone, Debug)]
pub struct AuctionAggregate {
    pub auction: Auction,
    pub season: Season,
    pub teams: Vec<Team>,
    pub players: Vec<Player>,
    pub lots: Vec<Lot>,
    /// All bids on this auction's lots, in placement order.
    pub bids: Vec<Bid>,
    pub roster: Vec<RosterEntry>,
    /// Highest event sequence already appended; 0 for a fresh log.
    pub last_sequence: u64,
}

/// A stored event log row. The payload is the opaque blob form of
/// [`crate::events::AuctionEvent`].
#[derive(Clone, Debug, PartialEq)]
pub struct EventRecord {
    pub auction_id: AuctionId,
    pub sequence: u64,
    pub timestamp: Timestamp,
    pub payload: Vec<u8>,
}

impl EventRecord {
    /// Decodes the row back into its typed envelope form.
    ///
    /// # Errors
    /// Returns [`RepositoryError::Corrupt`] if the payload blob does not
    /// decode.
    pub fn decode(&self) -> Result<EventEnvelope, RepositoryError> {
        let event = crate::events::AuctionEvent::from_blob(&self.payload)
            .map_err(|source| RepositoryError::Corrupt {
                source,
            })?;
        Ok(EventEnvelope {
            sequence: self.sequence,
            timestamp: self.timestamp,
            event,
        })
    }
}

/// One write of a transactional batch.
#[derive(Clone, Debug)]
pub enum Write {
    UpdateAuction {
        auction_id: AuctionId,
        status: AuctionStatus,
        current_lot: Option<LotId>,
    },
    UpdateLot(Lot),
    InsertBid(Bid),
    InsertRosterEntry(RosterEntry),
    InsertBudgetTransaction(BudgetTransaction),
    UpdateTeamBudget {
        team_id: TeamId,
        budget_spent: Money,
    },
    AppendEvent(EventRecord),
}

/// A set of writes that must commit atomically: either every write lands or
/// none does.
#[derive(Clone, Debug, Default)]
pub struct WriteBatch {
    writes: Vec<Write>,
}

impl WriteBatch {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, write: Write) {
        self.writes.push(write);
    }

    #[must_use]
    pub fn writes(&self) -> &[Write] {
        &self.writes
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }
}

#[async_trait]
pub trait Repository: Send + Sync + 'static {
    /// Loads the full aggregate for `auction_id`, or `None` if the auction is
    /// unknown.
    async fn load_auction(
        &self,
        auction_id: AuctionId,
    ) -> Result<Option<AuctionAggregate>, RepositoryError>;

    /// Applies `batch` atomically.
    ///
    /// Must fail the whole batch with [`RepositoryError::SequenceConflict`]
    /// if any appended event's `(auction_id, sequence)` already exists.
    async fn commit(&self, batch: WriteBatch) -> Result<(), RepositoryError>;

    /// Up to `limit` events with `sequence > after_sequence`, in sequence
    /// order.
    async fn events_since(
        &self,
        auction_id: AuctionId,
        after_sequence: u64,
        limit: usize,
    ) -> Result<Vec<EventEnvelope>, RepositoryError>;
}
