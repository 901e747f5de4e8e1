//! Counter names and emit helpers on the `metrics` facade.
//!
//! The facade is a no-op unless the embedding service installs an exporter,
//! so the engine records unconditionally.

pub const BIDS_ADMITTED: &str = "gavel_bids_admitted";
pub const BIDS_REJECTED: &str = "gavel_bids_rejected";
pub const LOTS_SOLD: &str = "gavel_lots_sold";
pub const LOTS_UNSOLD: &str = "gavel_lots_unsold";
pub const LOT_EXTENSIONS: &str = "gavel_lot_extensions";
pub const SUBSCRIBERS_DROPPED: &str = "gavel_subscribers_dropped";

pub(crate) fn bid_admitted() {
    metrics::counter!(BIDS_ADMITTED).increment(1);
}

pub(crate) fn bid_rejected() {
    metrics::counter!(BIDS_REJECTED).increment(1);
}

pub(crate) fn lot_sold() {
    metrics::counter!(LOTS_SOLD).increment(1);
}

pub(crate) fn lot_unsold() {
    metrics::counter!(LOTS_UNSOLD).increment(1);
}

pub(crate) fn lot_extended() {
    metrics::counter!(LOT_EXTENSIONS).increment(1);
}

pub(crate) fn subscriber_dropped() {
    metrics::counter!(SUBSCRIBERS_DROPPED).increment(1);
}
