//! Fan-out of committed events to subscribers.
//!
//! Each auction owns one broadcast topic. A subscriber first replays the
//! persisted log past its resume cursor, then joins the live stream; events
//! that raced into both are deduplicated by sequence, so the combined stream
//! has no duplicate and no gap. A subscriber that cannot keep up with its
//! bounded buffer is handed [`Error::SlowConsumer`] once and then cut off; it
//! is expected to resubscribe from its last delivered sequence.

use std::{
    pin::Pin,
    sync::Arc,
    task::{
        Context,
        Poll,
    },
};

use futures::Stream;
use tokio::sync::broadcast;
use tokio_stream::wrappers::{
    errors::BroadcastStreamRecvError,
    BroadcastStream,
};
use tracing::debug;

use crate::{
    error::Error,
    events::EventEnvelope,
    metrics,
    model::AuctionId,
    repository::Repository,
};

/// How many persisted events one replay page fetches.
const REPLAY_PAGE: usize = 512;

/// The per-auction broadcast side of the hub. Cheap to clone; the engine
/// worker publishes through it and subscribers attach receivers to it.
#[derive(Clone)]
pub(crate) struct Topic {
    tx: broadcast::Sender<EventEnvelope>,
}

impl Topic {
    pub(crate) fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self {
            tx,
        }
    }

    /// Publishes a committed event to all live subscribers. A send error only
    /// means nobody is listening right now.
    pub(crate) fn publish(&self, envelope: &EventEnvelope) {
        let _ = self.tx.send(envelope.clone());
    }

    fn attach(&self) -> broadcast::Receiver<EventEnvelope> {
        self.tx.subscribe()
    }
}

/// Builds the replay-then-live stream for one subscriber.
///
/// The live receiver is attached *before* the log is read, so every event is
/// either in the replayed slice or still in the receiver buffer; overlap is
/// dropped by the sequence filter inside [`EventStream`].
pub(crate) async fn subscribe(
    repo: Arc<dyn Repository>,
    topic: &Topic,
    auction_id: AuctionId,
    from_sequence: u64,
) -> Result<EventStream, Error> {
    let live = topic.attach();

    let mut replay = Vec::new();
    let mut cursor = from_sequence;
    loop {
        let page = repo.events_since(auction_id, cursor, REPLAY_PAGE).await?;
        let Some(last) = page.last() else {
            break;
        };
        cursor = last.sequence;
        let full = page.len() == REPLAY_PAGE;
        replay.extend(page);
        if !full {
            break;
        }
    }
    debug!(
        %auction_id,
        from_sequence,
        replayed = replay.len(),
        "subscriber attached",
    );

    Ok(EventStream {
        replay: replay.into_iter(),
        live: BroadcastStream::new(live),
        last_delivered: from_sequence,
        dropped: false,
    })
}

/// An ordered, gap-free stream of [`EventEnvelope`]s for one auction.
///
/// Yields `Err(`[`Error::SlowConsumer`]`)` exactly once and then terminates
/// if the subscriber fell behind its buffer; the error carries the last
/// sequence that was delivered so the subscriber can resume from it.
pub struct EventStream {
    replay: std::vec::IntoIter<EventEnvelope>,
    live: BroadcastStream<EventEnvelope>,
    last_delivered: u64,
    dropped: bool,
}

impl EventStream {
    /// The sequence of the most recently yielded event; the resume cursor.
    #[must_use]
    pub fn last_delivered(&self) -> u64 {
        self.last_delivered
    }
}

impl Stream for EventStream {
    type Item = Result<EventEnvelope, Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.dropped {
            return Poll::Ready(None);
        }

        if let Some(envelope) = self.replay.next() {
            self.last_delivered = envelope.sequence;
            return Poll::Ready(Some(Ok(envelope)));
        }

        loop {
            match std::task::ready!(Pin::new(&mut self.live).poll_next(cx)) {
                Some(Ok(envelope)) => {
                    // Events already covered by the replay slice come through
                    // the live buffer again; skip them.
                    if envelope.sequence <= self.last_delivered {
                        continue;
                    }
                    self.last_delivered = envelope.sequence;
                    return Poll::Ready(Some(Ok(envelope)));
                }
                Some(Err(BroadcastStreamRecvError::Lagged(skipped))) => {
                    self.dropped = true;
                    metrics::subscriber_dropped();
                    debug!(
                        skipped,
                        last_delivered = self.last_delivered,
                        "subscriber lagged behind its buffer; dropping it",
                    );
                    return Poll::Ready(Some(Err(Error::SlowConsumer {
                        last_delivered: self.last_delivered,
                    })));
                }
                None => return Poll::Ready(None),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt as _;

    use super::*;
    use crate::events::AuctionEvent;

    fn envelope(auction_id: AuctionId, sequence: u64) -> EventEnvelope {
        EventEnvelope {
            sequence,
            timestamp: "2026-03-01T10:00:00Z".parse().unwrap(),
            event: AuctionEvent::AuctionStarted {
                auction_id,
            },
        }
    }

    #[tokio::test]
    async fn live_events_flow_through_the_topic() {
        let auction_id = AuctionId::new();
        let repo = Arc::new(crate::repository::InMemoryRepository::new());
        let topic = Topic::new(8);
        let mut stream = subscribe(repo, &topic, auction_id, 0).await.unwrap();

        topic.publish(&envelope(auction_id, 1));
        topic.publish(&envelope(auction_id, 2));

        assert_eq!(stream.next().await.unwrap().unwrap().sequence, 1);
        assert_eq!(stream.next().await.unwrap().unwrap().sequence, 2);
        assert_eq!(stream.last_delivered(), 2);
    }

    #[tokio::test]
    async fn lagged_subscriber_is_dropped_with_slow_consumer() {
        let auction_id = AuctionId::new();
        let repo = Arc::new(crate::repository::InMemoryRepository::new());
        let topic = Topic::new(2);
        let mut stream = subscribe(repo, &topic, auction_id, 0).await.unwrap();

        for sequence in 1..=5 {
            topic.publish(&envelope(auction_id, sequence));
        }

        let err = stream.next().await.unwrap().unwrap_err();
        assert!(matches!(err, Error::SlowConsumer { .. }));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn duplicate_of_replayed_sequence_is_filtered() {
        let auction_id = AuctionId::new();
        let repo = Arc::new(crate::repository::InMemoryRepository::new());
        let topic = Topic::new(8);
        let mut stream = subscribe(repo, &topic, auction_id, 3).await.unwrap();

        // The worker publishes an event that the replay cursor already
        // covers, then a fresh one.
        topic.publish(&envelope(auction_id, 3));
        topic.publish(&envelope(auction_id, 4));

        assert_eq!(stream.next().await.unwrap().unwrap().sequence, 4);
    }
}
