//! In-process message bus connecting isolated contexts.
//!
//! Every send is offered to every registered context, mirroring a runtime
//! broadcast; each `ContextRouter` drops deliveries not addressed to its
//! own target. Delivery order is preserved per context.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace};

use super::envelope::{Envelope, Reply, Target};
use crate::tabs::TabId;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RouterError {
    #[error("no context registered for {0}")]
    NoReceiver(&'static str),
    #[error("{kind} was dropped by {target} without an answer")]
    Closed { kind: &'static str, target: Target },
    #[error("{kind} to {target} timed out after {millis}ms")]
    Timeout {
        kind: &'static str,
        target: Target,
        millis: u128,
    },
}

/// Where a delivery came from. Page observers carry their tab; extension
/// contexts (popup, capture host, local API) do not.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Origin {
    pub tab: Option<TabId>,
}

impl Origin {
    pub fn extension() -> Self {
        Self { tab: None }
    }

    pub fn tab(tab: TabId) -> Self {
        Self { tab: Some(tab) }
    }
}

type ReplySlot = Arc<Mutex<Option<oneshot::Sender<Reply>>>>;

#[derive(Debug, Clone)]
pub struct Delivery {
    pub envelope: Envelope,
    pub origin: Origin,
    reply: Option<ReplySlot>,
}

impl Delivery {
    pub fn expects_reply(&self) -> bool {
        self.reply.is_some()
    }

    /// Answer the request. Only the first answer across all contexts wins.
    pub fn respond(&self, reply: Reply) -> bool {
        let Some(slot) = &self.reply else {
            return false;
        };
        let sender = lock(slot).take();
        match sender {
            Some(tx) => tx.send(reply).is_ok(),
            None => false,
        }
    }
}

struct Registration {
    target: Target,
    tx: mpsc::UnboundedSender<Delivery>,
}

#[derive(Clone, Default)]
pub struct MessageBus {
    contexts: Arc<Mutex<Vec<Registration>>>,
}

impl MessageBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a context and get its inbound router.
    pub fn register(&self, target: Target) -> ContextRouter {
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.contexts).push(Registration { target, tx });
        debug!("Context registered: {}", target);
        ContextRouter { local: target, rx }
    }

    pub fn is_registered(&self, target: Target) -> bool {
        lock(&self.contexts)
            .iter()
            .any(|reg| reg.target == target && !reg.tx.is_closed())
    }

    /// Fire-and-forget send.
    pub fn send(&self, envelope: Envelope, origin: Origin) {
        self.deliver(Delivery {
            envelope,
            origin,
            reply: None,
        });
    }

    /// Send and wait for the first reply.
    pub async fn request(
        &self,
        envelope: Envelope,
        origin: Origin,
        timeout: Duration,
    ) -> Result<Reply, RouterError> {
        let kind = envelope.kind();
        let target = envelope.target;
        let (tx, rx) = oneshot::channel();

        let reached = self.deliver(Delivery {
            envelope,
            origin,
            reply: Some(Arc::new(Mutex::new(Some(tx)))),
        });
        if !reached {
            return Err(RouterError::NoReceiver(kind));
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(RouterError::Closed { kind, target }),
            Err(_) => Err(RouterError::Timeout {
                kind,
                target,
                millis: timeout.as_millis(),
            }),
        }
    }

    /// Offer the delivery to every context. Returns whether a context with
    /// the envelope's target was among them.
    fn deliver(&self, delivery: Delivery) -> bool {
        let mut contexts = lock(&self.contexts);
        contexts.retain(|reg| !reg.tx.is_closed());
        let target = delivery.envelope.target;
        let reached = contexts.iter().any(|reg| reg.target == target);
        trace!(
            "Delivering {} to {} ({} contexts)",
            delivery.envelope.kind(),
            delivery.envelope.target,
            contexts.len()
        );
        for reg in contexts.iter() {
            let _ = reg.tx.send(delivery.clone());
        }
        reached
    }
}

/// Inbound side of one context.
pub struct ContextRouter {
    local: Target,
    rx: mpsc::UnboundedReceiver<Delivery>,
}

impl ContextRouter {
    pub fn local(&self) -> Target {
        self.local
    }

    /// Next delivery addressed to this context. Returns `None` once the bus
    /// is gone.
    pub async fn next(&mut self) -> Option<Delivery> {
        while let Some(delivery) = self.rx.recv().await {
            if delivery.envelope.target == self.local {
                return Some(delivery);
            }
        }
        None
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
