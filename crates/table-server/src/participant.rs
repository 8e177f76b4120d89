//! `Participant` - one connected entity waiting for or seated in a session.
//!
//! A participant is shared (`Arc<Participant>`) by whichever components
//! currently need to reach it: the waiting room, the matchmaker buffer and a
//! session roster may all hold it during a hand-off. It is dropped when the
//! last holder lets go.
//!
//! The outbound channel is owned by the transport's connection task. The
//! participant only keeps a `Weak` to it, so once the connection task exits
//! every send silently fails instead of writing into a dead socket.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use chrono::{DateTime, TimeDelta, Utc};
use common::types::ParticipantId;
use tokio::sync::mpsc;
use tracing::trace;

use crate::protocol::ServerMessage;

/// Sending half of a connection's outbound queue.
pub type OutboundSender = mpsc::Sender<ServerMessage>;

/// A connected participant.
#[derive(Debug)]
pub struct Participant {
    id: ParticipantId,
    closed: AtomicBool,
    channel: Weak<OutboundSender>,
    connected_at: DateTime<Utc>,
}

impl Participant {
    /// Create a participant bound to the transport's outbound sender.
    #[must_use]
    pub fn new(id: ParticipantId, channel: &Arc<OutboundSender>) -> Arc<Self> {
        Arc::new(Self {
            id,
            closed: AtomicBool::new(false),
            channel: Arc::downgrade(channel),
            connected_at: Utc::now(),
        })
    }

    /// Create a participant with no outbound channel. Every send fails.
    #[must_use]
    pub fn detached(id: ParticipantId) -> Arc<Self> {
        Arc::new(Self {
            id,
            closed: AtomicBool::new(false),
            channel: Weak::new(),
            connected_at: Utc::now(),
        })
    }

    /// Get the participant ID.
    #[must_use]
    pub fn id(&self) -> ParticipantId {
        self.id
    }

    /// When the transport accepted this connection.
    #[must_use]
    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    /// Time since the connection was accepted.
    #[must_use]
    pub fn connected_for(&self) -> TimeDelta {
        Utc::now() - self.connected_at
    }

    /// Whether the underlying connection has terminated.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Mark the connection terminated.
    ///
    /// Returns true only for the call that performed the transition.
    pub fn mark_closed(&self) -> bool {
        !self.closed.swap(true, Ordering::SeqCst)
    }

    /// Queue `message` for delivery. Never blocks.
    ///
    /// Returns false when the participant is closed, the connection task is
    /// gone, or its outbound queue is full.
    pub fn send(&self, message: ServerMessage) -> bool {
        if self.is_closed() {
            return false;
        }

        let Some(sender) = self.channel.upgrade() else {
            return false;
        };

        let kind = message.kind();
        match sender.try_send(message) {
            Ok(()) => true,
            Err(e) => {
                trace!(
                    target: "table.participant",
                    participant_id = %self.id,
                    message_type = kind,
                    error = %e,
                    "Dropped outbound message"
                );
                false
            }
        }
    }
}
