//! Subscriptions: long-lived streams a view is bound to while it is mounted.
//!
//! A [`Subscription`] wraps a [`SubscriptionSource`] (for example a
//! [`Query`](http::Query)) together with a stable [`SubscriptionId`]. A view
//! declares the set of subscriptions it needs; the [`SubscriptionManager`]
//! diffs successive sets, starting streams for new ids and cancelling streams
//! whose ids disappeared. Cancelling drops the stream, which is what releases
//! the underlying cache subscription.

pub mod http;

use std::any::TypeId;
use std::collections::HashMap;

use futures::StreamExt;
use futures::stream::BoxStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Identity of a subscription, used to decide whether it is already running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId {
    type_id: TypeId,
    hash: u64,
}

impl SubscriptionId {
    /// Creates an id from the source type and a hash of its identifying data.
    #[must_use]
    pub fn of<T: 'static>(hash: u64) -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            hash,
        }
    }
}

/// A source of values that can be subscribed to.
pub trait SubscriptionSource: Send {
    /// The type of values produced.
    type Output;

    /// Starts a fresh stream of values.
    fn stream(&self) -> BoxStream<'static, Self::Output>;

    /// Returns the identity of this source.
    fn id(&self) -> SubscriptionId;
}

/// A type-erased subscription producing messages of type `T`.
pub struct Subscription<T> {
    pub(crate) id: SubscriptionId,
    pub(crate) spawn: Box<dyn Fn() -> BoxStream<'static, T> + Send>,
}

impl<T: 'static> Subscription<T> {
    /// Wraps a subscription source.
    pub fn new(source: impl SubscriptionSource<Output = T> + 'static) -> Self {
        let id = source.id();
        Self {
            id,
            spawn: Box::new(move || source.stream()),
        }
    }

    /// Transforms every value produced by this subscription.
    #[must_use]
    pub fn map<F, B>(self, f: F) -> Subscription<B>
    where
        F: Fn(T) -> B + Clone + Send + 'static,
        B: 'static,
    {
        let spawn = self.spawn;
        Subscription {
            id: self.id,
            spawn: Box::new(move || {
                let f = f.clone();
                spawn().map(f).boxed()
            }),
        }
    }

    /// Returns the identity of this subscription.
    #[must_use]
    pub const fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Starts a fresh stream for this subscription.
    #[must_use]
    pub fn start(&self) -> BoxStream<'static, T> {
        (self.spawn)()
    }
}

struct Running {
    token: CancellationToken,
    join: JoinHandle<()>,
}

/// Runs the subscriptions of a mounted view and forwards their messages.
///
/// Call [`update`](Self::update) with the view's current subscription set each
/// time it may have changed. Subscriptions that are already running keep
/// running; new ones start; missing ones are cancelled ("unmounted").
pub struct SubscriptionManager<Msg> {
    running: HashMap<SubscriptionId, Running>,
    tx: mpsc::UnboundedSender<Msg>,
}

impl<Msg: Send + 'static> SubscriptionManager<Msg> {
    /// Creates a manager forwarding messages into `tx`.
    #[must_use]
    pub fn new(tx: mpsc::UnboundedSender<Msg>) -> Self {
        Self {
            running: HashMap::new(),
            tx,
        }
    }

    /// Reconciles the running set with `subscriptions`.
    pub fn update(&mut self, subscriptions: impl IntoIterator<Item = Subscription<Msg>>) {
        let mut wanted = HashMap::new();
        for subscription in subscriptions {
            wanted.entry(subscription.id).or_insert(subscription);
        }

        let stale: Vec<SubscriptionId> = self
            .running
            .keys()
            .filter(|id| !wanted.contains_key(id))
            .copied()
            .collect();
        for id in stale {
            if let Some(running) = self.running.remove(&id) {
                debug!(?id, "stopping subscription");
                running.token.cancel();
            }
        }

        for (id, subscription) in wanted {
            if self.running.contains_key(&id) {
                continue;
            }
            debug!(?id, "starting subscription");
            let token = CancellationToken::new();
            let child = token.clone();
            let tx = self.tx.clone();
            let mut stream = subscription.start();

            let join = tokio::spawn(async move {
                loop {
                    tokio::select! {
                        () = child.cancelled() => break,
                        next = stream.next() => match next {
                            Some(msg) => {
                                if tx.send(msg).is_err() {
                                    break;
                                }
                            }
                            None => break,
                        },
                    }
                }
            });

            self.running.insert(id, Running { token, join });
        }
    }

    /// Returns the number of running subscriptions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.running.len()
    }

    /// Returns `true` if nothing is running.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.running.is_empty()
    }

    /// Cancels every running subscription and waits for the tasks to finish.
    pub async fn shutdown(&mut self) {
        for (_, running) in self.running.drain() {
            running.token.cancel();
            let _ = running.join.await;
        }
    }
}

impl<Msg> Drop for SubscriptionManager<Msg> {
    fn drop(&mut self) {
        for running in self.running.values() {
            running.token.cancel();
        }
    }
}
