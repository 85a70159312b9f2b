//! Subscription seam between the monitor and whatever transport delivers the feed.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crossbeam_channel::{unbounded, Receiver, Sender, TryRecvError};
use monitor_proto::{ClientId, FeedFrame, FeedMessage, WorldId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("feed registry lock poisoned")]
    Poisoned,
    #[error("feed transport rejected subscription for {client} on {world}: {reason}")]
    Rejected {
        client: ClientId,
        world: WorldId,
        reason: String,
    },
}

/// Something that can attach the monitor to one world's four feed streams.
pub trait FeedSource {
    fn subscribe(&mut self, client: &ClientId, world: WorldId)
        -> Result<FeedSubscription, FeedError>;
}

/// Live attachment to a world's feed. Dropping it detaches from the transport.
pub struct FeedSubscription {
    client: ClientId,
    world: WorldId,
    receiver: Receiver<FeedFrame>,
    on_detach: Option<Box<dyn FnOnce() + Send>>,
}

impl FeedSubscription {
    pub fn new(client: ClientId, world: WorldId, receiver: Receiver<FeedFrame>) -> Self {
        Self {
            client,
            world,
            receiver,
            on_detach: None,
        }
    }

    pub fn with_detach(mut self, on_detach: impl FnOnce() + Send + 'static) -> Self {
        self.on_detach = Some(Box::new(on_detach));
        self
    }

    pub fn client(&self) -> &ClientId {
        &self.client
    }

    pub fn world(&self) -> WorldId {
        self.world
    }

    /// Next queued frame, or `None` when nothing is waiting or the transport is gone.
    pub fn try_next(&self) -> Option<FeedFrame> {
        match self.receiver.try_recv() {
            Ok(frame) => Some(frame),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }
}

impl std::fmt::Debug for FeedSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedSubscription")
            .field("client", &self.client)
            .field("world", &self.world)
            .field("queued", &self.receiver.len())
            .finish()
    }
}

impl Drop for FeedSubscription {
    fn drop(&mut self) {
        if let Some(on_detach) = self.on_detach.take() {
            on_detach();
        }
        tracing::debug!(
            target: "cluster_monitor::feed",
            client = %self.client,
            world = %self.world,
            "feed.detached"
        );
    }
}

type Registry = HashMap<WorldId, Vec<(u64, Sender<FeedFrame>)>>;

/// In-process feed hub. A transport task publishes decoded frames and every
/// subscriber attached to that frame's world receives them in order.
#[derive(Clone, Default)]
pub struct ChannelFeed {
    registry: Arc<Mutex<Registry>>,
    next_id: Arc<Mutex<u64>>,
}

impl ChannelFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver `frame` to the subscribers of its world; returns how many received it.
    pub fn publish(&self, frame: FeedFrame) -> usize {
        let Ok(mut registry) = self.registry.lock() else {
            tracing::error!(target: "cluster_monitor::feed", "feed.registry_poisoned");
            return 0;
        };
        let Some(subscribers) = registry.get_mut(&frame.world) else {
            return 0;
        };
        subscribers.retain(|(_, sender)| sender.send(frame.clone()).is_ok());
        subscribers.len()
    }

    pub fn publish_message(&self, world: WorldId, message: FeedMessage) -> usize {
        self.publish(FeedFrame::new(world, message))
    }

    pub fn subscriber_count(&self, world: WorldId) -> usize {
        self.registry
            .lock()
            .map(|registry| registry.get(&world).map_or(0, Vec::len))
            .unwrap_or(0)
    }
}

impl FeedSource for ChannelFeed {
    fn subscribe(
        &mut self,
        client: &ClientId,
        world: WorldId,
    ) -> Result<FeedSubscription, FeedError> {
        let id = {
            let mut next = self.next_id.lock().map_err(|_| FeedError::Poisoned)?;
            *next += 1;
            *next
        };
        let (sender, receiver) = unbounded();
        self.registry
            .lock()
            .map_err(|_| FeedError::Poisoned)?
            .entry(world)
            .or_default()
            .push((id, sender));

        tracing::info!(
            target: "cluster_monitor::feed",
            %client,
            %world,
            subscription = id,
            "feed.subscribed"
        );

        let registry = Arc::clone(&self.registry);
        Ok(
            FeedSubscription::new(client.clone(), world, receiver).with_detach(move || {
                if let Ok(mut registry) = registry.lock() {
                    if let Some(subscribers) = registry.get_mut(&world) {
                        subscribers.retain(|(sub_id, _)| *sub_id != id);
                    }
                }
            }),
        )
    }
}

/// Handle for feeding follow-up records back into a session's inbound queue.
#[derive(Debug, Clone)]
pub struct FeedSender {
    sender: Sender<FeedMessage>,
}

impl FeedSender {
    pub(crate) fn new(sender: Sender<FeedMessage>) -> Self {
        Self { sender }
    }

    /// Queue a batch; returns `false` once the session is gone.
    pub fn send(&self, message: FeedMessage) -> bool {
        self.sender.send(message).is_ok()
    }
}
