//! Stream adapters over tokio channels and MQTT topic-filter matching

use futures::{Stream, stream};
use tokio::sync::{broadcast, watch};
use tracing::warn;

/// Adapt a broadcast receiver into a stream that ends when the sender is gone
///
/// A lagging subscriber skips the overwritten items and keeps going.
pub fn broadcast_stream<T>(rx: broadcast::Receiver<T>) -> impl Stream<Item = T> + Send + 'static
where
    T: Clone + Send + 'static,
{
    stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(item) => return Some((item, rx)),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "broadcast subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    })
}

/// Adapt a watch receiver into a stream: the current value, then every change
pub fn watch_stream<T>(rx: watch::Receiver<T>) -> impl Stream<Item = T> + Send + 'static
where
    T: Clone + Send + Sync + 'static,
{
    stream::unfold((rx, true), |(mut rx, first)| async move {
        if !first {
            rx.changed().await.ok()?;
        }
        let value = rx.borrow_and_update().clone();
        Some((value, (rx, false)))
    })
}

/// MQTT topic-filter match with `+` (one level) and `#` (remaining levels)
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => {}
            (Some(f), Some(t)) if f == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}
