//! Fragment-to-snapshot relay.

use futures_util::{Stream, StreamExt};
use std::pin::Pin;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::client::{ChatClient, Fragment};
use crate::conversation::{Conversation, ConversationError};
use crate::error::RelayError;
use crate::params::SamplingParams;

const RELAY_CHANNEL_CAPACITY: usize = 64;

/// Conversation snapshots, one per received fragment.
pub type SnapshotStream = Pin<Box<dyn Stream<Item = Result<Conversation, RelayError>> + Send>>;

/// What a spawned relay reports to its consumer.
#[derive(Debug)]
pub enum RelayEvent {
    /// The whole conversation so far.
    Snapshot(Conversation),
    /// The upstream stream closed normally.
    Finished,
    /// The request or the stream failed; no further events follow.
    Failed(RelayError),
}

/// Grow an assistant turn out of streamed fragments.
///
/// Appends an empty assistant turn and yields it, then yields the full
/// conversation once per fragment. Fragments without text are still
/// yielded but leave the turn untouched. An upstream error is the last item.
pub fn relay<S>(
    mut conversation: Conversation,
    fragments: S,
) -> impl Stream<Item = Result<Conversation, RelayError>>
where
    S: Stream<Item = Result<Fragment, RelayError>>,
{
    async_stream::stream! {
        if let Err(e) = conversation.begin_assistant() {
            yield Err(RelayError::from(e));
            return;
        }
        yield Ok(conversation.clone());

        let mut fragments = std::pin::pin!(fragments);
        while let Some(fragment) = fragments.next().await {
            match fragment {
                Ok(fragment) => {
                    if let Some(text) = fragment.content() {
                        conversation.append_to_reply(text);
                    }
                    yield Ok(conversation.clone());
                }
                Err(e) => {
                    yield Err(e);
                    return;
                }
            }
        }
    }
}

/// Relays chat completions from one server.
#[derive(Debug, Clone)]
pub struct Relay {
    client: ChatClient,
}

impl Relay {
    pub fn new(client: ChatClient) -> Self {
        Self { client }
    }

    /// Send the conversation and return its snapshot stream.
    ///
    /// The request is made before the assistant turn is appended, so an
    /// unreachable server fails here with the conversation untouched.
    pub async fn open(
        &self,
        conversation: Conversation,
        params: SamplingParams,
    ) -> Result<SnapshotStream, RelayError> {
        if !conversation.is_awaiting_reply() {
            return Err(ConversationError::NoPendingUser.into());
        }

        let fragments = self.client.stream_chat(conversation.turns(), &params).await?;
        info!("Streaming reply from {}", self.client.base_url());

        Ok(Box::pin(relay(conversation, fragments)))
    }

    /// Run the relay on a background task and forward its events.
    ///
    /// The receiver sees any number of snapshots followed by exactly one
    /// `Finished` or `Failed`. Dropping the receiver cancels the task, which
    /// drops the HTTP response with it.
    pub fn spawn(
        &self,
        conversation: Conversation,
        params: SamplingParams,
    ) -> mpsc::Receiver<RelayEvent> {
        let (tx, rx) = mpsc::channel(RELAY_CHANNEL_CAPACITY);
        let relay = self.clone();

        tokio::spawn(async move {
            let opened = tokio::select! {
                _ = tx.closed() => {
                    debug!("Relay consumer went away before the request completed");
                    return;
                }
                opened = relay.open(conversation, params) => opened,
            };

            let mut snapshots = match opened {
                Ok(snapshots) => snapshots,
                Err(e) => {
                    warn!("Chat request failed: {}", e);
                    let _ = tx.send(RelayEvent::Failed(e)).await;
                    return;
                }
            };

            loop {
                let next = tokio::select! {
                    _ = tx.closed() => {
                        debug!("Relay consumer went away; dropping stream");
                        return;
                    }
                    next = snapshots.next() => next,
                };

                match next {
                    Some(Ok(snapshot)) => {
                        if tx.send(RelayEvent::Snapshot(snapshot)).await.is_err() {
                            return;
                        }
                    }
                    Some(Err(e)) => {
                        warn!("Chat stream failed: {}", e);
                        let _ = tx.send(RelayEvent::Failed(e)).await;
                        return;
                    }
                    None => break,
                }
            }

            let _ = tx.send(RelayEvent::Finished).await;
        });

        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::Turn;
    use futures_util::stream;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn pending(message: &str) -> Conversation {
        let mut conversation = Conversation::new();
        conversation.push_user(message).unwrap();
        conversation
    }

    #[tokio::test]
    async fn test_relay_concatenates_non_empty_fragments() {
        let fragments = stream::iter(vec![
            Ok(Fragment::text("")),
            Ok(Fragment::text("Hi")),
            Ok(Fragment::text(" there")),
        ]);

        let snapshots: Vec<Conversation> = relay(pending("hello"), fragments)
            .map(Result::unwrap)
            .collect()
            .await;

        // The opening snapshot, then one per fragment.
        assert_eq!(snapshots.len(), 4);
        assert_eq!(snapshots[0].last(), Some(&Turn::assistant("")));
        assert_eq!(snapshots[1].last(), Some(&Turn::assistant("")));
        assert_eq!(snapshots[2].last(), Some(&Turn::assistant("Hi")));

        let last = snapshots.last().unwrap();
        assert_eq!(
            last.turns(),
            &[Turn::user("hello"), Turn::assistant("Hi there")]
        );
    }

    #[tokio::test]
    async fn test_relay_skips_fragments_without_content() {
        let fragments = stream::iter(vec![
            Ok(Fragment::default()),
            Ok(Fragment::text("a")),
            Ok(Fragment {
                content: None,
                finish_reason: Some("stop".to_string()),
            }),
            Ok(Fragment::text("b")),
        ]);

        let last = relay(pending("x"), fragments)
            .map(Result::unwrap)
            .collect::<Vec<_>>()
            .await
            .pop()
            .unwrap();

        assert_eq!(last.last(), Some(&Turn::assistant("ab")));
    }

    #[tokio::test]
    async fn test_relay_stops_at_upstream_error() {
        let fragments = stream::iter(vec![
            Ok(Fragment::text("partial")),
            Err(RelayError::Stream("connection reset".to_string())),
            Ok(Fragment::text("never seen")),
        ]);

        let items: Vec<_> = relay(pending("x"), fragments).collect().await;
        assert_eq!(items.len(), 3);
        assert_eq!(
            items[1].as_ref().unwrap().last(),
            Some(&Turn::assistant("partial"))
        );
        assert!(matches!(items[2], Err(RelayError::Stream(_))));
    }

    #[tokio::test]
    async fn test_relay_without_fragments_keeps_empty_reply() {
        let snapshots: Vec<Conversation> = relay(pending("hello"), stream::empty())
            .map(Result::unwrap)
            .collect()
            .await;

        assert_eq!(snapshots.len(), 1);
        assert_eq!(
            snapshots[0].turns(),
            &[Turn::user("hello"), Turn::assistant("")]
        );
    }

    #[tokio::test]
    async fn test_relay_requires_pending_user_turn() {
        let items: Vec<_> = relay(Conversation::new(), stream::empty()).collect().await;
        assert!(matches!(
            items.as_slice(),
            [Err(RelayError::Conversation(ConversationError::NoPendingUser))]
        ));
    }

    #[tokio::test]
    async fn test_spawn_forwards_snapshots_then_finishes() {
        let server = MockServer::start().await;
        let body = [
            r#"{"choices":[{"delta":{"role":"assistant"}}]}"#,
            r#"{"choices":[{"delta":{"content":"Hi"}}]}"#,
            r#"{"choices":[{"delta":{"content":" there"}}]}"#,
            "[DONE]",
        ]
        .iter()
        .map(|payload| format!("data: {}\n\n", payload))
        .collect::<String>();

        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
            .mount(&server)
            .await;

        let relay = Relay::new(ChatClient::with_url(format!("{}/v1", server.uri())));
        let mut rx = relay.spawn(pending("hello"), SamplingParams::default());

        let mut snapshots = Vec::new();
        let mut finished = false;
        while let Some(event) = rx.recv().await {
            match event {
                RelayEvent::Snapshot(snapshot) => snapshots.push(snapshot),
                RelayEvent::Finished => finished = true,
                RelayEvent::Failed(e) => panic!("relay failed: {}", e),
            }
        }

        assert!(finished);
        assert_eq!(snapshots.len(), 4);
        assert_eq!(
            snapshots.last().unwrap().last(),
            Some(&Turn::assistant("Hi there"))
        );
    }

    #[tokio::test]
    async fn test_spawn_done_only_body_records_empty_reply() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw("data: [DONE]\n\n", "text/event-stream"),
            )
            .mount(&server)
            .await;

        let relay = Relay::new(ChatClient::with_url(format!("{}/v1", server.uri())));
        let mut rx = relay.spawn(pending("hello"), SamplingParams::default());

        match rx.recv().await {
            Some(RelayEvent::Snapshot(snapshot)) => assert_eq!(
                snapshot.turns(),
                &[Turn::user("hello"), Turn::assistant("")]
            ),
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(matches!(rx.recv().await, Some(RelayEvent::Finished)));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_spawn_reports_unreachable_server() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };

        let relay = Relay::new(ChatClient::with_url(format!("http://127.0.0.1:{}/v1", port)));
        let mut rx = relay.spawn(pending("hello"), SamplingParams::default());

        match rx.recv().await {
            Some(RelayEvent::Failed(RelayError::ServerNotRunning(_))) => {}
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_open_rejects_answered_conversation() {
        let relay = Relay::new(ChatClient::default());
        let result = relay.open(Conversation::new(), SamplingParams::default()).await;
        assert!(matches!(
            result,
            Err(RelayError::Conversation(ConversationError::NoPendingUser))
        ));
    }
}
