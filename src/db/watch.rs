//! Caller-owned bags of watch channels, awaited as a disjunction.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use crate::tree::{NotifiedOnce, WatchChannel};

/// A collection of watch channels accumulated while running one or more
/// queries, later awaited together: "wake me if anything I looked at might
/// have changed."
#[derive(Default)]
pub struct WatchSet {
    channels: Vec<Arc<WatchChannel>>,
}

impl WatchSet {
    pub fn new() -> Self {
        Self { channels: Vec::new() }
    }

    pub fn add(&mut self, channel: Arc<WatchChannel>) {
        self.channels.push(channel);
    }

    /// Adds `channel`, unless doing so would push the set past `limit`
    /// entries, in which case the whole set collapses to watching
    /// `fallback` alone — a single broader-scope channel (by convention,
    /// the root of the tree the scan ran against).
    pub fn add_with_limit(&mut self, limit: usize, channel: Arc<WatchChannel>, fallback: impl FnOnce() -> Arc<WatchChannel>) {
        if self.channels.len() >= limit {
            self.channels.clear();
            self.channels.push(fallback());
            return;
        }
        self.channels.push(channel);
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    /// Blocks until any tracked channel fires or `cancel` resolves first.
    /// Returns whether a channel fired; an empty set never fires and
    /// resolves only once `cancel` does, returning `false`.
    pub async fn watch<C: Future<Output = ()>>(&self, cancel: C) -> bool {
        if self.channels.iter().any(|c| c.is_fired()) {
            return true;
        }
        if self.channels.is_empty() {
            cancel.await;
            return false;
        }
        let any_fired = WatchAny { futures: self.channels.iter().map(|c| Box::pin(c.notified())).collect() };
        tokio::select! {
            _ = any_fired => true,
            _ = cancel => false,
        }
    }
}

/// Resolves as soon as any one of its inner `NotifiedOnce` futures does.
/// Each inner future is individually pinned (boxed), so `WatchAny` itself is
/// always `Unpin` and can be polled directly.
struct WatchAny<'a> {
    futures: Vec<Pin<Box<NotifiedOnce<'a>>>>,
}

impl<'a> Future for WatchAny<'a> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let me = self.get_mut();
        for fut in &mut me.futures {
            if fut.as_mut().poll(cx).is_ready() {
                return Poll::Ready(());
            }
        }
        Poll::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn fires_when_any_channel_fires() {
        let a = WatchChannel::new();
        let b = WatchChannel::new();
        let mut set = WatchSet::new();
        set.add(a.clone());
        set.add(b.clone());

        let handle = tokio::spawn({
            let b = b.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                b.fire();
            }
        });

        let triggered = set.watch(std::future::pending::<()>()).await;
        assert!(triggered);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn cancellation_returns_false_without_firing() {
        let a = WatchChannel::new();
        let mut set = WatchSet::new();
        set.add(a);
        let triggered = set.watch(tokio::time::sleep(Duration::from_millis(1))).await;
        assert!(!triggered);
    }

    #[tokio::test]
    async fn already_fired_channel_is_immediately_triggered() {
        let a = WatchChannel::new();
        a.fire();
        let mut set = WatchSet::new();
        set.add(a);
        let triggered = set.watch(std::future::pending::<()>()).await;
        assert!(triggered);
    }

    #[test]
    fn limit_collapses_to_fallback() {
        let mut set = WatchSet::new();
        let fallback = WatchChannel::new();
        set.add_with_limit(2, WatchChannel::new(), || fallback.clone());
        set.add_with_limit(2, WatchChannel::new(), || fallback.clone());
        assert_eq!(set.len(), 2);
        set.add_with_limit(2, WatchChannel::new(), || fallback.clone());
        assert_eq!(set.len(), 1);
    }
}
