//! Headless, topic-based publish/subscribe event bus.
//!
//! Uses [`tokio::sync::broadcast`] channels so that every subscriber receives
//! every message and no subscriber can block the publisher.  A subscriber
//! that falls more than `capacity` events behind loses the oldest ones and
//! is told so with [`broadcast::error::RecvError::Lagged`].
//!
//! # Topics
//!
//! | Topic | Typical traffic |
//! |---|---|
//! | [`Topic::Snapshots`] | One [`Snapshot`] per fusion cycle (~10 Hz) |
//! | [`Topic::Alerts`] | Watchdog safe-stops, actuator faults |
//! | [`Topic::Status`] | Controller link, mode changes, port lists |

use omnisense_types::{Event, EventPayload, Snapshot};
use tokio::sync::broadcast;
use tracing::trace;

/// Default channel capacity (number of buffered events before old ones are
/// dropped for slow subscribers).
const DEFAULT_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Snapshots,
    Alerts,
    Status,
}

/// Shared event bus.  Clone it cheaply – all clones share the same
/// underlying channels.
#[derive(Clone, Debug)]
pub struct EventBus {
    snapshots: broadcast::Sender<Event>,
    alerts: broadcast::Sender<Event>,
    status: broadcast::Sender<Event>,
}

impl EventBus {
    /// Create a new bus; `capacity` applies to every topic independently.
    pub fn new(capacity: usize) -> Self {
        let (snapshots, _) = broadcast::channel(capacity);
        let (alerts, _) = broadcast::channel(capacity);
        let (status, _) = broadcast::channel(capacity);
        Self {
            snapshots,
            alerts,
            status,
        }
    }

    /// Publish `event` on `topic`.
    ///
    /// Returns the number of subscribers handed the event; `0` when nobody
    /// is listening, which is a normal condition.
    pub fn publish_to(&self, topic: Topic, event: Event) -> usize {
        match self.topic_sender(topic).send(event) {
            Ok(n) => n,
            Err(broadcast::error::SendError(_)) => {
                trace!(?topic, "no subscribers");
                0
            }
        }
    }

    pub fn publish_snapshot(&self, source: &str, snapshot: Snapshot) -> usize {
        self.publish_to(
            Topic::Snapshots,
            Event::new(source, EventPayload::Snapshot(Box::new(snapshot))),
        )
    }

    pub fn publish_alert(
        &self,
        source: &str,
        component: &str,
        message: impl Into<String>,
    ) -> usize {
        self.publish_to(
            Topic::Alerts,
            Event::new(
                source,
                EventPayload::Alert {
                    component: component.to_string(),
                    message: message.into(),
                },
            ),
        )
    }

    /// Publish an acknowledgement such as
    /// [`EventPayload::SerialStatus`] on [`Topic::Status`].
    pub fn publish_status(&self, source: &str, payload: EventPayload) -> usize {
        self.publish_to(Topic::Status, Event::new(source, payload))
    }

    pub fn subscribe_to(&self, topic: Topic) -> TopicReceiver {
        TopicReceiver {
            topic,
            receiver: self.topic_sender(topic).subscribe(),
        }
    }

    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.topic_sender(topic).receiver_count()
    }

    fn topic_sender(&self, topic: Topic) -> &broadcast::Sender<Event> {
        match topic {
            Topic::Snapshots => &self.snapshots,
            Topic::Alerts => &self.alerts,
            Topic::Status => &self.status,
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// An async receiver bound to a single [`Topic`].
///
/// Obtained via [`EventBus::subscribe_to`].
pub struct TopicReceiver {
    topic: Topic,
    receiver: broadcast::Receiver<Event>,
}

impl TopicReceiver {
    /// Wait for the next event on this topic.
    ///
    /// Returns:
    /// * `Ok(event)` – a successfully received event.
    /// * `Err(RecvError::Lagged(n))` – `n` events were dropped because this
    ///   subscriber fell behind.  Calling `recv` again continues with the
    ///   oldest retained event.
    /// * `Err(RecvError::Closed)` – every publisher is gone.
    pub async fn recv(&mut self) -> Result<Event, broadcast::error::RecvError> {
        self.receiver.recv().await
    }

    pub fn topic(&self) -> Topic {
        self.topic
    }
}
