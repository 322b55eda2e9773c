use std::{sync::Arc, time::Duration};

use anyhow::Result;
use async_trait::async_trait;
use maimai_core::{ApplicationError, InboundMessage};
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::delivery::{deliver, LoggingReplySink, ReplySink};
use crate::events::{parse_event, EventEnvelope, Ingress, IngressFilter};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("transport failed to connect: {0}")]
    Connect(String),
    #[error("transport read failed: {0}")]
    Receive(String),
    #[error("transport ack failed: {0}")]
    Acknowledge(String),
    #[error("transport disconnect failed: {0}")]
    Disconnect(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self { max_retries: 5, base_delay_ms: 250, max_delay_ms: 5_000 }
    }
}

impl ReconnectPolicy {
    fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(16);
        let multiplier = 1_u64 << exponent;
        let delay_ms = self.base_delay_ms.saturating_mul(multiplier).min(self.max_delay_ms);
        Duration::from_millis(delay_ms)
    }
}

/// Inbound side of the chat platform.
#[async_trait]
pub trait ChannelTransport: Send + Sync {
    async fn connect(&self) -> Result<(), TransportError>;
    /// `Ok(None)` means the stream closed cleanly.
    async fn next_event(&self) -> Result<Option<EventEnvelope>, TransportError>;
    async fn acknowledge(&self, envelope_id: &str) -> Result<(), TransportError>;
    async fn disconnect(&self) -> Result<(), TransportError>;
}

#[derive(Default)]
pub struct NoopTransport;

#[async_trait]
impl ChannelTransport for NoopTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn next_event(&self) -> Result<Option<EventEnvelope>, TransportError> {
        Ok(None)
    }

    async fn acknowledge(&self, _envelope_id: &str) -> Result<(), TransportError> {
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        Ok(())
    }
}

/// Turns a validated message into an optional reply.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: &InboundMessage) -> Option<String>;
}

pub struct ChannelRunner {
    transport: Arc<dyn ChannelTransport>,
    handler: Arc<dyn MessageHandler>,
    sink: Arc<dyn ReplySink>,
    filter: IngressFilter,
    reconnect_policy: ReconnectPolicy,
}

impl ChannelRunner {
    pub fn new(
        transport: Arc<dyn ChannelTransport>,
        handler: Arc<dyn MessageHandler>,
        reconnect_policy: ReconnectPolicy,
    ) -> Self {
        Self {
            transport,
            handler,
            sink: Arc::new(LoggingReplySink),
            filter: IngressFilter::default(),
            reconnect_policy,
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn ReplySink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_filter(mut self, filter: IngressFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Pumps events until the stream closes or reconnects are exhausted,
    /// then waits for in-flight message tasks. Transport failures never
    /// surface as an error.
    pub async fn start(&self) -> Result<()> {
        let mut tasks = JoinSet::new();

        for attempt in 0..=self.reconnect_policy.max_retries {
            match self.connect_and_pump(attempt, &mut tasks).await {
                Ok(()) => break,
                Err(transport_error) => {
                    warn!(
                        event_name = "ingress.transport.failed",
                        attempt,
                        max_retries = self.reconnect_policy.max_retries,
                        error = %transport_error,
                        "channel transport failed"
                    );

                    if attempt >= self.reconnect_policy.max_retries {
                        warn!(
                            max_retries = self.reconnect_policy.max_retries,
                            "channel retries exhausted; continuing process without crash"
                        );
                        break;
                    }

                    let delay = self.reconnect_policy.backoff(attempt);
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(error) = joined {
                warn!(event_name = "ingress.message.task_failed", error = %error, "task aborted");
            }
        }
        Ok(())
    }

    async fn connect_and_pump(
        &self,
        attempt: u32,
        tasks: &mut JoinSet<()>,
    ) -> Result<(), TransportError> {
        info!(attempt, "opening channel transport connection");
        self.transport.connect().await?;
        info!(event_name = "ingress.transport.connected", attempt, "channel transport connected");

        loop {
            while tasks.try_join_next().is_some() {}

            let Some(envelope) = self.transport.next_event().await? else {
                info!(attempt, "channel transport stream closed");
                self.transport.disconnect().await?;
                return Ok(());
            };

            if let Err(error) = self.transport.acknowledge(&envelope.envelope_id).await {
                warn!(
                    event_name = "ingress.event.ack_failed",
                    envelope_id = %envelope.envelope_id,
                    error = %error,
                    "failed to acknowledge event"
                );
            }

            let message = match parse_event(&envelope.payload, &self.filter) {
                Ok(Ingress::Accepted(message)) => message,
                Ok(Ingress::Filtered) => {
                    debug!(
                        event_name = "ingress.event.filtered",
                        envelope_id = %envelope.envelope_id,
                        "ignoring bot-authored event"
                    );
                    continue;
                }
                Err(error) => {
                    let error = ApplicationError::from(error);
                    debug!(
                        event_name = "ingress.event.malformed",
                        envelope_id = %envelope.envelope_id,
                        category = error.category().as_str(),
                        error = %error,
                        "dropping malformed event"
                    );
                    continue;
                }
            };

            debug!(
                event_name = "ingress.event.received",
                envelope_id = %envelope.envelope_id,
                message_id = %message.message_id,
                author_id = %message.author_id,
                "received message"
            );

            let handler = Arc::clone(&self.handler);
            let sink = Arc::clone(&self.sink);
            tasks.spawn(async move {
                if let Some(reply) = handler.handle(&message).await {
                    deliver(sink.as_ref(), &message, &reply).await;
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Arc;

    use async_trait::async_trait;
    use maimai_core::{ApplicationError, InboundMessage};
    use tokio::sync::Mutex;

    use super::{ChannelRunner, ChannelTransport, MessageHandler, ReconnectPolicy, TransportError};
    use crate::delivery::{Delivered, RecordingReplySink};
    use crate::events::{EventEnvelope, IngressFilter};

    #[derive(Default)]
    struct ScriptedTransport {
        state: Mutex<ScriptedState>,
    }

    #[derive(Default)]
    struct ScriptedState {
        connect_results: VecDeque<Result<(), TransportError>>,
        events: VecDeque<Result<Option<EventEnvelope>, TransportError>>,
        connect_attempts: usize,
        acknowledgements: Vec<String>,
        disconnect_calls: usize,
    }

    impl ScriptedTransport {
        fn with_script(
            connect_results: Vec<Result<(), TransportError>>,
            events: Vec<Result<Option<EventEnvelope>, TransportError>>,
        ) -> Self {
            Self {
                state: Mutex::new(ScriptedState {
                    connect_results: connect_results.into(),
                    events: events.into(),
                    ..ScriptedState::default()
                }),
            }
        }

        async fn connect_attempts(&self) -> usize {
            self.state.lock().await.connect_attempts
        }

        async fn acknowledgements(&self) -> Vec<String> {
            self.state.lock().await.acknowledgements.clone()
        }

        async fn disconnect_calls(&self) -> usize {
            self.state.lock().await.disconnect_calls
        }
    }

    #[async_trait]
    impl ChannelTransport for ScriptedTransport {
        async fn connect(&self) -> Result<(), TransportError> {
            let mut state = self.state.lock().await;
            state.connect_attempts += 1;
            state.connect_results.pop_front().unwrap_or(Ok(()))
        }

        async fn next_event(&self) -> Result<Option<EventEnvelope>, TransportError> {
            let mut state = self.state.lock().await;
            state.events.pop_front().unwrap_or(Ok(None))
        }

        async fn acknowledge(&self, envelope_id: &str) -> Result<(), TransportError> {
            let mut state = self.state.lock().await;
            state.acknowledgements.push(envelope_id.to_owned());
            Ok(())
        }

        async fn disconnect(&self) -> Result<(), TransportError> {
            let mut state = self.state.lock().await;
            state.disconnect_calls += 1;
            Ok(())
        }
    }

    #[derive(Default)]
    struct EchoHandler {
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl MessageHandler for EchoHandler {
        async fn handle(&self, message: &InboundMessage) -> Option<String> {
            self.seen.lock().await.push(message.message_id.clone());
            (!message.text.is_empty()).then(|| format!("echo: {}", message.text))
        }
    }

    fn message_event(
        id: &str,
        author: &str,
        text: &str,
    ) -> Result<Option<EventEnvelope>, TransportError> {
        let payload = format!(
            r#"{{"message_id":"{id}","channel_id":"c-1","author_id":"{author}","text":"{text}",
            "channel_kind":"group","is_mentioned":true}}"#
        );
        Ok(Some(EventEnvelope::new(format!("env-{id}"), payload)))
    }

    fn no_delay(max_retries: u32) -> ReconnectPolicy {
        ReconnectPolicy { max_retries, base_delay_ms: 0, max_delay_ms: 0 }
    }

    #[tokio::test]
    async fn reconnects_after_initial_connect_failure() {
        let transport = Arc::new(ScriptedTransport::with_script(
            vec![Err(TransportError::Connect("network down".to_owned())), Ok(())],
            vec![message_event("m-1", "u-1", "hi"), Ok(None)],
        ));
        let handler = Arc::new(EchoHandler::default());
        let sink = Arc::new(RecordingReplySink::default());

        let runner = ChannelRunner::new(transport.clone(), handler.clone(), no_delay(2))
            .with_sink(sink.clone());
        runner.start().await.expect("runner should not fail");

        assert_eq!(transport.connect_attempts().await, 2);
        assert_eq!(transport.acknowledgements().await, vec!["env-m-1"]);
        assert_eq!(transport.disconnect_calls().await, 1);
        assert_eq!(
            sink.delivered(),
            vec![Delivered::Reply { message_id: "m-1".to_owned(), text: "echo: hi".to_owned() }]
        );
    }

    #[tokio::test]
    async fn read_failure_reconnects_and_resumes() {
        let transport = Arc::new(ScriptedTransport::with_script(
            vec![Ok(()), Ok(())],
            vec![
                message_event("m-1", "u-1", "one"),
                Err(TransportError::Receive("socket reset".to_owned())),
                message_event("m-2", "u-1", "two"),
                Ok(None),
            ],
        ));
        let handler = Arc::new(EchoHandler::default());

        ChannelRunner::new(transport.clone(), handler.clone(), no_delay(3))
            .start()
            .await
            .expect("runner should not fail");

        assert_eq!(transport.connect_attempts().await, 2);
        let mut seen = handler.seen.lock().await.clone();
        seen.sort();
        assert_eq!(seen, vec!["m-1", "m-2"]);
    }

    #[tokio::test]
    async fn exhausts_retries_without_crashing() {
        let transport = Arc::new(ScriptedTransport::with_script(
            vec![
                Err(TransportError::Connect("fail-1".to_owned())),
                Err(TransportError::Connect("fail-2".to_owned())),
                Err(TransportError::Connect("fail-3".to_owned())),
            ],
            vec![],
        ));

        ChannelRunner::new(transport.clone(), Arc::new(EchoHandler::default()), no_delay(2))
            .start()
            .await
            .expect("runner should degrade gracefully");
        assert_eq!(transport.connect_attempts().await, 3);
    }

    #[tokio::test]
    async fn malformed_and_bot_events_are_acknowledged_but_not_handled() {
        let transport = Arc::new(ScriptedTransport::with_script(
            vec![Ok(())],
            vec![
                Ok(Some(EventEnvelope::new("env-bad", "{\"text\": \"no author\"}"))),
                Ok(Some(EventEnvelope::new("env-garbage", "not json at all"))),
                message_event("m-bot", "bot-other", "hi"),
                message_event("m-ok", "u-1", "hi"),
                Ok(None),
            ],
        ));
        let handler = Arc::new(EchoHandler::default());
        let filter = IngressFilter::new(None, ["bot-other".to_owned()]);

        ChannelRunner::new(transport.clone(), handler.clone(), no_delay(0))
            .with_filter(filter)
            .start()
            .await
            .expect("runner should not fail");

        assert_eq!(transport.acknowledgements().await.len(), 4);
        assert_eq!(handler.seen.lock().await.clone(), vec!["m-ok"]);
    }

    #[tokio::test]
    async fn failed_reply_is_delivered_through_channel_send() {
        let transport = Arc::new(ScriptedTransport::with_script(
            vec![Ok(())],
            vec![message_event("m-1", "u-1", "hi"), message_event("m-2", "u-2", ""), Ok(None)],
        ));
        let sink = Arc::new(RecordingReplySink::failing(true, false));

        ChannelRunner::new(transport, Arc::new(EchoHandler::default()), no_delay(0))
            .with_sink(sink.clone())
            .start()
            .await
            .expect("runner should not fail");

        assert_eq!(
            sink.delivered(),
            vec![Delivered::Send { channel_id: "c-1".to_owned(), text: "echo: hi".to_owned() }]
        );
    }
}
