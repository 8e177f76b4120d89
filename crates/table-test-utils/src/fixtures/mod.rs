//! Participant and configuration fixtures.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use common::types::ParticipantId;
use table_server::config::Config;
use table_server::participant::{OutboundSender, Participant};
use table_server::protocol::ServerMessage;
use tokio::sync::mpsc;

/// A participant whose outbound queue the test can read.
///
/// The fixture owns the sending half, mirroring the transport's connection
/// task; dropping the fixture makes every later send fail.
pub struct TestParticipant {
    participant: Arc<Participant>,
    _outbound: Arc<OutboundSender>,
    inbox: mpsc::Receiver<ServerMessage>,
}

impl TestParticipant {
    /// Create a connected participant with the given id.
    #[must_use]
    pub fn new(id: u64) -> Self {
        let (tx, inbox) = mpsc::channel(64);
        let outbound = Arc::new(tx);
        Self {
            participant: Participant::new(ParticipantId(id), &outbound),
            _outbound: outbound,
            inbox,
        }
    }

    #[must_use]
    pub fn id(&self) -> ParticipantId {
        self.participant.id()
    }

    /// A shared handle to hand to the component under test.
    #[must_use]
    pub fn participant(&self) -> Arc<Participant> {
        Arc::clone(&self.participant)
    }

    /// Set the closed flag, as the transport does before notifying.
    pub fn close(&self) {
        self.participant.mark_closed();
    }

    /// Everything queued so far.
    pub fn drain(&mut self) -> Vec<ServerMessage> {
        let mut messages = Vec::new();
        while let Ok(message) = self.inbox.try_recv() {
            messages.push(message);
        }
        messages
    }

    /// Wait up to `timeout` for the next message.
    pub async fn next_message(&mut self, timeout: Duration) -> Option<ServerMessage> {
        tokio::time::timeout(timeout, self.inbox.recv())
            .await
            .ok()
            .flatten()
    }
}

/// Configuration for in-process tests: ephemeral port, short intervals.
#[must_use]
pub fn test_config(players_per_session: usize) -> Config {
    Config {
        bind_address: SocketAddr::from(([127, 0, 0, 1], 0)),
        players_per_session,
        matchmaker_poll_interval: Duration::from_millis(20),
        session_check_interval: Duration::from_millis(20),
        shutdown_timeout: Duration::from_secs(2),
        ..Config::default()
    }
}

/// Poll `condition` every 10ms until it holds or `timeout` elapses.
///
/// Returns whether the condition was met.
pub async fn wait_until<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let poll = async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    };
    tokio::time::timeout(timeout, poll).await.is_ok()
}

/// Run `future` with a timeout, panicking with `what` if it elapses.
pub async fn within<F: Future>(timeout: Duration, what: &str, future: F) -> F::Output {
    tokio::time::timeout(timeout, future)
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {what}"))
}
