//! The Gavel engine runs sealed-pool ascending-price auctions over a fixed
//! ordered catalog of lots, one player per lot.
//!
//! # How an auction runs
//!
//! Every auction is owned by a single worker task. Starting the auction puts
//! the first queued lot under the hammer with a countdown deadline; admitted
//! bids raise the lot's price along a banded increment schedule, and a bid
//! landing inside the soft-close window pushes the deadline out (up to a
//! per-lot cap) to deter sniping. When the deadline fires, the lot is
//! finalized in one transaction: sold to the last bidder with the roster
//! entry and budget debit, or unsold if nobody bid. After a short gap the
//! next lot starts, until the catalog is exhausted and the auction
//! completes. Administrators can pause/resume the auction (the remaining lot
//! time is preserved exactly), force an immediate sale, discard the active
//! lot, or end the whole auction early.
//!
//! # Events and subscribers
//!
//! Every state change appends a typed event to a per-auction, gap-free,
//! 1-origin sequence which is also the subscriber sync protocol: a
//! subscriber attaches with the last sequence it saw, gets the missed events
//! replayed in order, and then follows the live stream with no duplicate and
//! no gap. Slow subscribers are dropped with a [`Error::SlowConsumer`]
//! signal and reconnect from their cursor. [`Engine::snapshot`] serves the
//! current projected state together with the sequence it is consistent at,
//! and [`engine::replay`] rebuilds the same projection from the log.
//!
//! # Boundaries
//!
//! Durability goes through the [`repository::Repository`] trait; the crate
//! ships an in-memory reference store, and a relational store implements the
//! same trait externally. Transports (HTTP, SSE, websockets) live outside
//! the crate: they hold a cheap [`Engine`] clone and translate its typed
//! errors and event streams.

pub(crate) mod admission;
pub mod clock;
pub mod config;
pub mod engine;
mod error;
pub mod events;
pub mod hub;
pub mod increment;
pub mod metrics;
pub mod model;
pub mod repository;

pub use engine::{
    BidAccepted,
    Engine,
    PlaceBidRequest,
    Snapshot,
};
pub use error::Error;
pub use events::{
    AuctionEvent,
    EventEnvelope,
};
pub use hub::EventStream;
