//! Message router for Parlor.
//!
//! The router resolves who a message is for, persists it and fans it out.
//! Room traffic goes to every connection joined to the room. Private traffic
//! goes to every connection bound to the target name, plus the sending
//! connection so the sender sees its own message.

use crate::error::ChatError;
use crate::message::{ChatMessage, Delivery, MessageEvent, NewMessage};
use crate::presence::PresenceTracker;
use crate::session::{ConnectionId, DeliveryOutcome, SessionManager};
use crate::store::MessageStore;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, trace};

/// An inbound message event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteRequest {
    /// Name the client claims to send as.
    pub display_name: String,
    /// Room the message is sent in.
    pub room: String,
    /// Message text.
    pub body: String,
    /// Private recipient. Empty counts as absent.
    pub private_target: Option<String>,
}

impl RouteRequest {
    /// A room message.
    #[must_use]
    pub fn room(
        display_name: impl Into<String>,
        room: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            display_name: display_name.into(),
            room: room.into(),
            body: body.into(),
            private_target: None,
        }
    }

    /// Address the message privately.
    #[must_use]
    pub fn to(mut self, target: impl Into<String>) -> Self {
        self.private_target = Some(target.into());
        self
    }

    fn target(&self) -> Option<&str> {
        self.private_target
            .as_deref()
            .filter(|t| !t.trim().is_empty())
    }
}

/// What happened to a routed message.
#[derive(Debug, Clone)]
pub struct RouteReport {
    /// The stored record.
    pub message: ChatMessage,
    /// Connections whose outbox accepted it.
    pub recipients: usize,
    /// Connections whose outbox was full.
    pub dropped: usize,
}

/// Routes messages from one connection to their audience.
pub struct Router {
    sessions: Arc<SessionManager>,
    presence: Arc<PresenceTracker>,
    store: Arc<dyn MessageStore>,
    /// Audience key -> turn lock. Persist and fan-out for one key run in a
    /// single turn so members receive messages in id order. Idle keys are
    /// removed after their last turn.
    sequencers: DashMap<String, Arc<Mutex<()>>>,
}

impl Router {
    /// Create a router.
    #[must_use]
    pub fn new(
        sessions: Arc<SessionManager>,
        presence: Arc<PresenceTracker>,
        store: Arc<dyn MessageStore>,
    ) -> Self {
        Self {
            sessions,
            presence,
            store,
            sequencers: DashMap::new(),
        }
    }

    /// Persist a message and deliver it to its audience.
    ///
    /// A private target with no live connection is not an error; the message
    /// is stored and only echoed to the sender.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::StorageUnavailable`] if the message could not be
    /// persisted, in which case nothing is delivered, and the policy errors
    /// of [`SessionManager::sender_name`].
    pub async fn route(
        &self,
        connection: ConnectionId,
        request: RouteRequest,
    ) -> Result<RouteReport, ChatError> {
        let target = request.target().map(str::to_string);
        let sender = self
            .sessions
            .sender_name(
                connection,
                &request.display_name,
                &request.room,
                target.is_some(),
            )
            .await?;

        let key = sequence_key(&request.room, &sender, target.as_deref());
        let sequencer = self.sequencer(&key);
        let result = {
            let _turn = sequencer.lock().await;
            self.persist_and_deliver(connection, request, sender, target)
                .await
        };
        self.release(&key, sequencer);
        result
    }

    async fn persist_and_deliver(
        &self,
        connection: ConnectionId,
        request: RouteRequest,
        sender: String,
        target: Option<String>,
    ) -> Result<RouteReport, ChatError> {
        let mut new_message = NewMessage::new(&request.room, &sender, request.body);
        if let Some(target) = &target {
            new_message = new_message.with_receiver(target);
        }

        let stored = self.store.append(new_message).await.map_err(|e| {
            error!(connection = %connection, room = %request.room, error = %e, "Failed to persist message");
            ChatError::from(e)
        })?;

        let delivery = Delivery::Message(Arc::new(MessageEvent::from(&stored)));
        let outcome = match &target {
            Some(name) => {
                let mut audience = self.presence.connections_named(name).await;
                if audience.is_empty() {
                    debug!(recipient = %name, "Private target is offline");
                }
                if !audience.contains(&connection) {
                    audience.push(connection);
                }
                self.sessions.deliver(&audience, delivery).await
            }
            None => self.sessions.deliver_to_room(&request.room, delivery).await,
        };

        trace!(
            id = stored.id,
            room = %request.room,
            private = target.is_some(),
            recipients = outcome.delivered,
            "Routed message"
        );

        let DeliveryOutcome { delivered, dropped } = outcome;
        Ok(RouteReport {
            message: stored,
            recipients: delivered,
            dropped,
        })
    }

    /// Number of audience keys with a turn in progress or queued.
    #[must_use]
    pub fn sequencer_count(&self) -> usize {
        self.sequencers.len()
    }

    fn sequencer(&self, key: &str) -> Arc<Mutex<()>> {
        self.sequencers
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drop the key's entry once nobody else holds or waits for it.
    ///
    /// Clones are only taken under the shard lock that `remove_if` holds,
    /// so a count of two (map plus ours) means no other route is queued.
    fn release(&self, key: &str, sequencer: Arc<Mutex<()>>) {
        self.sequencers.remove_if(key, |_, entry| {
            Arc::ptr_eq(entry, &sequencer) && Arc::strong_count(entry) == 2
        });
    }
}

/// Room traffic is ordered per room, private traffic per unordered pair.
fn sequence_key(room: &str, sender: &str, target: Option<&str>) -> String {
    match target {
        None => format!("room:{room}"),
        Some(target) if sender <= target => format!("pair:{sender}\u{0}{target}"),
        Some(target) => format!("pair:{target}\u{0}{sender}"),
    }
}
