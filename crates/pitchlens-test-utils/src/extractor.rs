use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use futures::future::BoxFuture;

use pitchlens_core::error::{PitchlensError, Result};
use pitchlens_core::traits::StructuredExtractor;
use pitchlens_core::types::{Extraction, ExtractionRequest, ToolCall};

/// One scripted extractor answer.
#[derive(Debug, Clone)]
pub struct MockReply {
    pub result: std::result::Result<Extraction, String>,
    pub delay: Option<Duration>,
}

impl MockReply {
    pub fn record(value: serde_json::Value) -> Self {
        Self {
            result: Ok(Extraction::Structured(value)),
            delay: None,
        }
    }

    pub fn tool_calls(calls: Vec<ToolCall>) -> Self {
        Self {
            result: Ok(Extraction::ToolCalls(calls)),
            delay: None,
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            result: Err(message.into()),
            delay: None,
        }
    }

    /// Delay the reply.
    pub fn after(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

type Handler = Box<dyn Fn(&ExtractionRequest) -> MockReply + Send + Sync>;

/// Scripted structured extractor.
///
/// Replies are keyed by the request's schema name (`""` when no schema is
/// set). Queued replies are consumed first; the handler, if any, answers the
/// rest.
#[derive(Default)]
pub struct MockExtractor {
    queues: Mutex<HashMap<String, VecDeque<MockReply>>>,
    handler: Option<Handler>,
    requests: Mutex<Vec<ExtractionRequest>>,
}

impl MockExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every unscripted request with `handler`.
    pub fn with_handler(
        mut self,
        handler: impl Fn(&ExtractionRequest) -> MockReply + Send + Sync + 'static,
    ) -> Self {
        self.handler = Some(Box::new(handler));
        self
    }

    /// Queue a reply for requests with the given schema name.
    pub fn on(self, schema: &str, reply: MockReply) -> Self {
        self.queues
            .lock()
            .unwrap()
            .entry(schema.to_string())
            .or_default()
            .push_back(reply);
        self
    }

    /// Every request seen so far, in arrival order.
    pub fn requests(&self) -> Vec<ExtractionRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Number of requests seen for the given schema name.
    pub fn calls_for(&self, schema: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.schema_name().unwrap_or("") == schema)
            .count()
    }

    fn reply_for(&self, request: &ExtractionRequest) -> MockReply {
        let key = request.schema_name().unwrap_or("").to_string();
        if let Some(reply) = self
            .queues
            .lock()
            .unwrap()
            .get_mut(&key)
            .and_then(|q| q.pop_front())
        {
            return reply;
        }
        match &self.handler {
            Some(handler) => handler(request),
            None => MockReply::fail(format!("no scripted reply for schema '{}'", key)),
        }
    }
}

impl StructuredExtractor for MockExtractor {
    fn extract(&self, request: ExtractionRequest) -> BoxFuture<'_, Result<Extraction>> {
        Box::pin(async move {
            let reply = self.reply_for(&request);
            self.requests.lock().unwrap().push(request);
            if let Some(delay) = reply.delay {
                tokio::time::sleep(delay).await;
            }
            reply.result.map_err(PitchlensError::LlmRequest)
        })
    }
}
