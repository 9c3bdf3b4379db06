//! EventEmitter trait and its implementations
//!
//! - `EventEmitter`: injected into runners so tests can observe or ignore events
//! - `NoopEmitter`: discards everything
//! - `ChannelEmitter`: forwards to a tokio unbounded channel
//! - `FanOutEmitter`: forwards to every live subscriber and sink

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use super::log::{Event, EventClock, EventKind, EventLog};

/// Trait for emitting events during a run
pub trait EventEmitter: Send + Sync {
    /// Emit an event and return its ID
    fn emit(&self, kind: EventKind) -> u64;
}

impl EventEmitter for EventLog {
    fn emit(&self, kind: EventKind) -> u64 {
        EventLog::emit(self, kind)
    }
}

impl<T: EventEmitter + ?Sized> EventEmitter for Arc<T> {
    fn emit(&self, kind: EventKind) -> u64 {
        (**self).emit(kind)
    }
}

/// No-op emitter (always returns 0)
#[derive(Debug, Clone, Default)]
pub struct NoopEmitter;

impl NoopEmitter {
    pub fn new() -> Self {
        Self
    }
}

impl EventEmitter for NoopEmitter {
    fn emit(&self, _kind: EventKind) -> u64 {
        0
    }
}

/// Emitter feeding a channel; a dropped receiver is not an error
#[derive(Debug, Clone)]
pub struct ChannelEmitter {
    sender: UnboundedSender<Event>,
    clock: EventClock,
}

impl ChannelEmitter {
    pub fn new() -> (Self, UnboundedReceiver<Event>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (
            Self {
                sender,
                clock: EventClock::new(),
            },
            receiver,
        )
    }
}

impl EventEmitter for ChannelEmitter {
    fn emit(&self, kind: EventKind) -> u64 {
        let event = self.clock.stamp(kind);
        let id = event.id;
        let _ = self.sender.send(event);
        id
    }
}

/// Broadcasts every event to channel subscribers and synchronous sinks
///
/// Sinks run on the emitting task, before `emit` returns.
pub struct FanOutEmitter {
    clock: EventClock,
    subscribers: RwLock<Vec<UnboundedSender<Event>>>,
    sinks: RwLock<Vec<Arc<dyn EventEmitter>>>,
}

impl FanOutEmitter {
    pub fn new() -> Self {
        Self {
            clock: EventClock::new(),
            subscribers: RwLock::new(Vec::new()),
            sinks: RwLock::new(Vec::new()),
        }
    }

    /// New receiver for every event emitted from now on
    pub fn subscribe(&self) -> UnboundedReceiver<Event> {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.subscribers.write().push(sender);
        receiver
    }

    pub fn add_sink(&self, sink: Arc<dyn EventEmitter>) {
        self.sinks.write().push(sink);
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}

impl Default for FanOutEmitter {
    fn default() -> Self {
        Self::new()
    }
}

impl EventEmitter for FanOutEmitter {
    fn emit(&self, kind: EventKind) -> u64 {
        for sink in self.sinks.read().iter() {
            sink.emit(kind.clone());
        }

        let event = self.clock.stamp(kind);
        let id = event.id;
        self.subscribers
            .write()
            .retain(|subscriber| subscriber.send(event.clone()).is_ok());
        id
    }
}

impl std::fmt::Debug for FanOutEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FanOutEmitter")
            .field("subscribers", &self.subscriber_count())
            .field("sinks", &self.sinks.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn log_line(message: &str) -> EventKind {
        EventKind::Log {
            group_id: Uuid::nil(),
            message: message.to_string(),
        }
    }

    #[test]
    fn event_emitter_trait_is_object_safe() {
        fn accepts_emitter(_: &dyn EventEmitter) {}

        accepts_emitter(&EventLog::new());
        accepts_emitter(&NoopEmitter::new());
        accepts_emitter(&FanOutEmitter::new());
    }

    #[test]
    fn noop_emitter_always_returns_zero() {
        let noop = NoopEmitter::new();
        assert_eq!(noop.emit(log_line("a")), 0);
        assert_eq!(noop.emit(log_line("b")), 0);
    }

    #[test]
    fn arc_emitter_delegates() {
        let log = Arc::new(EventLog::new());
        let emitter: Arc<dyn EventEmitter> = log.clone();
        emitter.emit(log_line("via arc"));
        assert_eq!(log.len(), 1);
    }

    #[tokio::test]
    async fn channel_emitter_delivers_in_order() {
        let (emitter, mut rx) = ChannelEmitter::new();
        emitter.emit(log_line("first"));
        emitter.emit(log_line("second"));

        assert_eq!(rx.recv().await.unwrap().id, 0);
        assert_eq!(rx.recv().await.unwrap().id, 1);
    }

    #[test]
    fn channel_emitter_tolerates_dropped_receiver() {
        let (emitter, rx) = ChannelEmitter::new();
        drop(rx);
        assert_eq!(emitter.emit(log_line("nobody listens")), 0);
    }

    #[tokio::test]
    async fn fan_out_reaches_all_and_prunes_closed() {
        let fan_out = FanOutEmitter::new();
        let log = Arc::new(EventLog::new());
        fan_out.add_sink(log.clone());

        let mut rx1 = fan_out.subscribe();
        let rx2 = fan_out.subscribe();
        drop(rx2);

        fan_out.emit(log_line("hello"));

        assert_eq!(log.len(), 1);
        assert!(matches!(rx1.recv().await.unwrap().kind, EventKind::Log { .. }));
        assert_eq!(fan_out.subscriber_count(), 1);
    }
}
