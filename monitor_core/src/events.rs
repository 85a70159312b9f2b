//! Change notifications and multi-consumer fan-out.

use crossbeam_channel::{unbounded, Receiver, Sender};

/// Notification emitted by a store after its state has been mutated.
///
/// Visibility edges are reported as `Created`/`Deleted`, so a consumer never
/// receives `Updated` for an item it was not told about.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent<T> {
    Created(T),
    Updated { current: T, previous: T },
    Deleted(T),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    Created,
    Updated,
    Deleted,
}

impl<T> ChangeEvent<T> {
    /// Latest known value; for `Deleted` this is the value that was removed.
    pub fn current(&self) -> &T {
        match self {
            Self::Created(value) | Self::Deleted(value) => value,
            Self::Updated { current, .. } => current,
        }
    }

    pub fn previous(&self) -> Option<&T> {
        match self {
            Self::Updated { previous, .. } => Some(previous),
            _ => None,
        }
    }

    pub fn kind(&self) -> ChangeKind {
        match self {
            Self::Created(_) => ChangeKind::Created,
            Self::Updated { .. } => ChangeKind::Updated,
            Self::Deleted(_) => ChangeKind::Deleted,
        }
    }
}

/// Consumer of a store's change stream.
pub trait ChangeListener<T> {
    fn on_change(&mut self, event: &ChangeEvent<T>);

    /// The producing store was cleared wholesale; derived state must be discarded.
    fn on_reset(&mut self) {}

    /// Detached listeners are dropped from the stream on the next publish.
    fn is_detached(&self) -> bool {
        false
    }
}

impl<T, F> ChangeListener<T> for F
where
    F: FnMut(&ChangeEvent<T>),
{
    fn on_change(&mut self, event: &ChangeEvent<T>) {
        self(event)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

/// Ordered fan-out: every listener sees every event in publish order.
pub struct ChangeStream<T> {
    listeners: Vec<(ListenerId, Box<dyn ChangeListener<T>>)>,
    next_id: u64,
}

impl<T> Default for ChangeStream<T> {
    fn default() -> Self {
        Self {
            listeners: Vec::new(),
            next_id: 0,
        }
    }
}

impl<T> std::fmt::Debug for ChangeStream<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeStream")
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

impl<T> ChangeStream<T> {
    pub fn subscribe(&mut self, listener: Box<dyn ChangeListener<T>>) -> ListenerId {
        let id = ListenerId(self.next_id);
        self.next_id += 1;
        self.listeners.push((id, listener));
        id
    }

    pub fn unsubscribe(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(listener_id, _)| *listener_id != id);
        self.listeners.len() != before
    }

    pub fn publish(&mut self, event: &ChangeEvent<T>) {
        for (_, listener) in self.listeners.iter_mut() {
            listener.on_change(event);
        }
        self.listeners.retain(|(_, listener)| !listener.is_detached());
    }

    pub fn publish_reset(&mut self) {
        for (_, listener) in self.listeners.iter_mut() {
            listener.on_reset();
        }
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    pub fn clear(&mut self) {
        self.listeners.clear();
    }
}

impl<T: Clone + Send + 'static> ChangeStream<T> {
    /// Mirror the stream into a channel for a consumer living on another thread.
    pub fn subscribe_channel(&mut self) -> (ListenerId, Receiver<StreamMessage<T>>) {
        let (sender, receiver) = unbounded();
        let id = self.subscribe(Box::new(ChannelListener {
            sender,
            detached: false,
        }));
        (id, receiver)
    }
}

/// Item delivered to channel subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamMessage<T> {
    Change(ChangeEvent<T>),
    Reset,
}

struct ChannelListener<T> {
    sender: Sender<StreamMessage<T>>,
    detached: bool,
}

impl<T: Clone> ChangeListener<T> for ChannelListener<T> {
    fn on_change(&mut self, event: &ChangeEvent<T>) {
        if self
            .sender
            .send(StreamMessage::Change(event.clone()))
            .is_err()
        {
            self.detached = true;
        }
    }

    fn on_reset(&mut self) {
        if self.sender.send(StreamMessage::Reset).is_err() {
            self.detached = true;
        }
    }

    fn is_detached(&self) -> bool {
        self.detached
    }
}
