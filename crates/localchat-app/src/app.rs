//! Application context: the single owner of the server session and the
//! conversation.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use localchat_relay::{Conversation, ConversationError, Relay};
use localchat_server::{ServerHandle, ServerStatus, StartOutcome, StopOutcome};
use tracing::{debug, info};

use crate::shutdown::ShutdownCoordinator;

/// Conversation plus bookkeeping for the reply being streamed into it.
#[derive(Debug, Default)]
struct ChatState {
    conversation: Conversation,
    /// Bumped on every new reply and on clear; stale relays compare against it.
    epoch: u64,
    in_flight: bool,
}

/// Everything the HTTP handlers share.
pub struct AppContext {
    server: Mutex<ServerHandle>,
    chat: Mutex<ChatState>,
    relay: Relay,
    shutdown: ShutdownCoordinator,
}

impl AppContext {
    pub fn new(server: ServerHandle, relay: Relay, shutdown: ShutdownCoordinator) -> Self {
        Self {
            server: Mutex::new(server),
            chat: Mutex::new(ChatState::default()),
            relay,
            shutdown,
        }
    }

    pub fn relay(&self) -> &Relay {
        &self.relay
    }

    pub fn shutdown(&self) -> &ShutdownCoordinator {
        &self.shutdown
    }

    fn server(&self) -> MutexGuard<'_, ServerHandle> {
        self.server.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn chat(&self) -> MutexGuard<'_, ChatState> {
        self.chat.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start the model server. Blocking.
    pub fn start_server(&self) -> StartOutcome {
        let outcome = self.server().start();
        info!("{}", outcome);
        outcome
    }

    /// Stop the model server, waiting out the grace period if needed. Blocking.
    pub fn stop_server(&self) -> StopOutcome {
        let outcome = self.server().stop();
        info!("{}", outcome);
        outcome
    }

    pub fn server_status(&self) -> ServerStatus {
        self.server().status()
    }

    /// Stop the server, then schedule the application exit.
    ///
    /// Returns both statuses; the exit happens after the shutdown delay.
    pub async fn close_application(self: &Arc<Self>) -> String {
        let ctx = Arc::clone(self);
        let stopped = match tokio::task::spawn_blocking(move || ctx.stop_server()).await {
            Ok(outcome) => outcome.to_string(),
            Err(e) => StopOutcome::Failed(e.to_string()).to_string(),
        };
        let closing = self.shutdown.schedule();
        format!("{}\n{}", stopped, closing)
    }

    /// Append the user's message and hand back the snapshot to relay.
    ///
    /// Fails while another reply is still streaming.
    pub fn begin_reply(&self, message: String) -> Result<(Conversation, u64), ConversationError> {
        let mut chat = self.chat();
        if chat.in_flight {
            return Err(ConversationError::AwaitingReply);
        }
        chat.conversation.push_user(message)?;
        chat.epoch += 1;
        chat.in_flight = true;
        Ok((chat.conversation.clone(), chat.epoch))
    }

    /// Store a relay snapshot unless the history was cleared meanwhile.
    pub fn record_snapshot(&self, epoch: u64, snapshot: Conversation) {
        let mut chat = self.chat();
        if chat.epoch == epoch {
            chat.conversation = snapshot;
        } else {
            debug!("Ignoring snapshot from stale reply {}", epoch);
        }
    }

    /// Mark the reply finished. A user turn left without any assistant turn
    /// (the request never got through) is rolled back.
    pub fn settle_reply(&self, epoch: u64) {
        let mut chat = self.chat();
        if chat.epoch != epoch || !chat.in_flight {
            return;
        }
        chat.in_flight = false;
        if let Some(turn) = chat.conversation.abandon_pending() {
            debug!("Rolled back unanswered message ({} chars)", turn.content.len());
        }
    }

    pub fn history(&self) -> Conversation {
        self.chat().conversation.clone()
    }

    /// Discard the whole conversation. A reply still streaming is orphaned.
    pub fn clear_history(&self) {
        let mut chat = self.chat();
        chat.conversation.clear();
        chat.epoch += 1;
        chat.in_flight = false;
        info!("Conversation cleared");
    }
}
