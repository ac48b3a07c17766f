//! A poll loop over a dynamic set of keyed streams.
//!
//! Each registered source is a stream tagged with a key. One iteration polls
//! every source once and hands each ready item to a [`Handler`] together with
//! its key. Handlers receive the reactor itself so they can register or
//! unregister sources, including their own. A source that ends is removed
//! and its handler is called once with `None`. [`Reactor::run`] returns when
//! no sources remain or a handler fails.

use std::fmt;
use std::pin::Pin;
use std::task::Poll;

use async_trait::async_trait;
use futures_util::future::poll_fn;
use futures_util::Stream;
use tracing::{debug, trace};

/// A boxed source stream.
pub type Source<T> = Pin<Box<dyn Stream<Item = T> + Send>>;

/// Receives items from the reactor's sources.
#[async_trait]
pub trait Handler<K, T>: Send
where
    K: Send + 'static,
    T: Send + 'static,
{
    /// Handle one item from the source registered under `key`.
    ///
    /// `None` means the source ended and has already been unregistered.
    async fn handle(
        &mut self,
        reactor: &mut Reactor<K, T>,
        key: K,
        item: Option<T>,
    ) -> anyhow::Result<()>;
}

/// A set of keyed sources.
pub struct Reactor<K, T> {
    sources: Vec<(K, Source<T>)>,
}

impl<K, T> fmt::Debug for Reactor<K, T>
where
    K: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.sources.iter().map(|(k, _)| k)).finish()
    }
}

impl<K, T> Default for Reactor<K, T> {
    fn default() -> Self {
        Self { sources: Vec::new() }
    }
}

impl<K, T> Reactor<K, T>
where
    K: Clone + PartialEq + fmt::Debug + Send + 'static,
    T: Send + 'static,
{
    /// Create an empty reactor.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a source. A source already registered under `key` is replaced.
    pub fn register<S>(&mut self, key: K, source: S)
    where
        S: Stream<Item = T> + Send + 'static,
    {
        let source: Source<T> = Box::pin(source);
        match self.sources.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => {
                debug!(?key, "replacing reactor source");
                slot.1 = source;
            }
            None => {
                trace!(?key, "registering reactor source");
                self.sources.push((key, source));
            }
        }
    }

    /// Remove a source. Returns `false` if it was not registered.
    ///
    /// Items already taken from it in the current iteration are discarded.
    pub fn unregister(&mut self, key: &K) -> bool {
        let before = self.sources.len();
        self.sources.retain(|(k, _)| k != key);
        let removed = self.sources.len() != before;
        if removed {
            trace!(?key, "unregistered reactor source");
        }
        removed
    }

    /// Remove every source; the running loop ends after this iteration.
    pub fn clear(&mut self) {
        self.sources.clear();
    }

    /// Whether `key` is registered.
    pub fn contains(&self, key: &K) -> bool {
        self.sources.iter().any(|(k, _)| k == key)
    }

    /// Number of registered sources.
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    /// Whether no sources are registered.
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Wait until at least one source is ready, then dispatch one item from
    /// each ready source in registration order.
    ///
    /// Returns the number of items handed to `handler`. With no sources
    /// registered this returns `Ok(0)` immediately.
    pub async fn run_once<H>(&mut self, handler: &mut H) -> anyhow::Result<usize>
    where
        H: Handler<K, T> + ?Sized,
    {
        if self.sources.is_empty() {
            return Ok(0);
        }

        let ready = poll_fn(|cx| {
            let mut ready = Vec::new();
            for (key, source) in self.sources.iter_mut() {
                if let Poll::Ready(item) = source.as_mut().poll_next(cx) {
                    ready.push((key.clone(), item));
                }
            }
            if ready.is_empty() {
                Poll::Pending
            } else {
                Poll::Ready(ready)
            }
        })
        .await;

        for (key, item) in &ready {
            if item.is_none() {
                debug!(?key, "reactor source ended");
                self.unregister(key);
            }
        }

        let mut dispatched = 0;
        for (key, item) in ready {
            if item.is_some() && !self.contains(&key) {
                trace!(?key, "dropping item from unregistered source");
                continue;
            }
            handler.handle(self, key, item).await?;
            dispatched += 1;
        }
        Ok(dispatched)
    }

    /// Dispatch until no sources remain.
    pub async fn run<H>(&mut self, handler: &mut H) -> anyhow::Result<()>
    where
        H: Handler<K, T> + ?Sized,
    {
        while !self.is_empty() {
            self.run_once(handler).await?;
        }
        debug!("reactor drained");
        Ok(())
    }
}
