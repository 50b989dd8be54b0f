//! Queue batch dispatch
//!
//! A batch shares one delivery source and one `remaining_time` budget
//! oracle from the host. Standard batches fan out in parallel and report
//! the set of messages that failed; FIFO batches run strictly in arrival
//! order and cut off at the first failure so per-group ordering survives
//! the host's retry. Each message races its handler against an effective
//! deadline of `min(module timeout, remaining budget)`.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{Message, MessageDisposition};
use crate::context::{self, RequestContext};
use crate::errors::DispatchError;
use crate::manifest::Queue;
use crate::module::{Payload, QueueMeta, User};
use crate::state::RuntimeState;

/// Milliseconds left in the host's batch budget
pub type RemainingTime = Arc<dyn Fn() -> u64 + Send + Sync>;

/// Dispatches queue batches against the manifest
#[derive(Clone)]
pub struct QueueDispatcher {
    state: Arc<RuntimeState>,
}

impl QueueDispatcher {
    pub fn new(state: Arc<RuntimeState>) -> Self {
        Self { state }
    }

    /// Dispatch one batch; returns the item identifiers the host must
    /// redeliver
    pub async fn dispatch_batch(
        &self,
        queue_name: &str,
        messages: Vec<Message>,
        remaining_time: RemainingTime,
    ) -> Vec<String> {
        if messages.is_empty() {
            return Vec::new();
        }

        let Some(queue) = self.state.services.queue(queue_name).cloned() else {
            warn!(queue = %queue_name, "no module registered, leaving batch pending");
            return messages.into_iter().map(|message| message.id).collect();
        };

        // FIFO from the queue name suffix or the presence of group ids
        let fifo = queue.fifo || messages.iter().any(|message| message.group_id.is_some());
        let total = messages.len();

        let failed = if fifo {
            self.dispatch_fifo(&queue, messages, &remaining_time).await
        } else {
            self.dispatch_standard(&queue, messages, &remaining_time).await
        };

        info!(
            queue = %queue.name,
            total,
            failed = failed.len(),
            fifo,
            "batch dispatched"
        );
        failed
    }

    /// Standard semantics: all messages in parallel, failures independent
    async fn dispatch_standard(
        &self,
        queue: &Arc<Queue>,
        messages: Vec<Message>,
        remaining_time: &RemainingTime,
    ) -> Vec<String> {
        let outcomes = join_all(messages.into_iter().map(|message| {
            let id = message.id.clone();
            async move {
                let disposition = self.dispatch_message(queue, message, remaining_time).await;
                (id, disposition)
            }
        }))
        .await;

        outcomes
            .into_iter()
            .filter(|(_, disposition)| *disposition == MessageDisposition::Failed)
            .map(|(id, _)| id)
            .collect()
    }

    /// FIFO semantics: strict arrival order; the first failure fails the
    /// rest of the batch, earlier deletions stand
    async fn dispatch_fifo(
        &self,
        queue: &Arc<Queue>,
        messages: Vec<Message>,
        remaining_time: &RemainingTime,
    ) -> Vec<String> {
        let mut failed = Vec::new();
        let mut cut_off = false;
        for message in messages {
            if cut_off {
                failed.push(message.id);
                continue;
            }
            let id = message.id.clone();
            if self.dispatch_message(queue, message, remaining_time).await
                == MessageDisposition::Failed
            {
                warn!(queue = %queue.name, message_id = %id, "FIFO batch cut off");
                failed.push(id);
                cut_off = true;
            }
        }
        failed
    }

    /// One message: pending → handling → (deleted | failed)
    async fn dispatch_message(
        &self,
        queue: &Arc<Queue>,
        message: Message,
        remaining_time: &RemainingTime,
    ) -> MessageDisposition {
        let budget_ms = remaining_time();
        let effective_ms = budget_ms.min(queue.timeout.saturating_mul(1_000));
        if effective_ms == 0 {
            warn!(
                queue = %queue.name,
                message_id = %message.id,
                "batch budget exhausted, leaving message pending"
            );
            return MessageDisposition::Failed;
        }

        let token = CancellationToken::new();
        let user = message.attributes.user_id.clone().map(User::new);
        let meta = QueueMeta {
            message_id: message.id.clone(),
            group_id: message.group_id.clone(),
            params: message.attributes.params_map(),
            queue_name: queue.name.clone(),
            received_count: message.attributes.received_count,
            sent_at: message.attributes.sent_at,
            sequence_number: message.attributes.sequence_number,
            user: user.clone(),
            signal: token.clone(),
        };

        let payload = match decode_payload(&message) {
            Ok(payload) => payload,
            Err(err) => {
                error!(queue = %queue.name, message_id = %message.id, error = %err, "payload decode failed");
                self.report_failure(queue, Arc::new(err), meta).await;
                return MessageDisposition::Failed;
            }
        };

        debug!(queue = %queue.name, message_id = %message.id, timeout_ms = effective_ms, "handling message");

        let ambient = Arc::new(RequestContext::new(self.state.clone()));
        let _ = ambient.set_user(user);
        let handler = queue.module.handler.clone();
        let handler_meta = meta.clone();
        // Run on a task: a timed-out handler is abandoned, not terminated
        let scoped = tokio::spawn(context::scope(ambient, async move {
            handler(payload, handler_meta).await
        }));

        let joined = tokio::select! {
            joined = scoped => joined,
            _ = tokio::time::sleep(Duration::from_millis(effective_ms)) => {
                token.cancel();
                let err = DispatchError::Timeout { seconds: effective_ms / 1_000 };
                warn!(queue = %queue.name, message_id = %message.id, "message handler timed out");
                self.report_failure(queue, Arc::new(err), meta).await;
                return MessageDisposition::Failed;
            }
        };

        let outcome = match joined {
            Ok(outcome) => outcome,
            Err(join_error) => {
                let err = DispatchError::handler(join_error.to_string());
                error!(queue = %queue.name, message_id = %message.id, error = %err, "message handler panicked");
                self.report_failure(queue, Arc::new(err), meta).await;
                return MessageDisposition::Failed;
            }
        };

        let err = match outcome {
            Ok(Ok(())) => {
                if let Err(delete_err) = self
                    .state
                    .queue
                    .delete_message(&queue.name, &message.receipt_handle)
                    .await
                {
                    // The host will redeliver; the handler result stands
                    error!(queue = %queue.name, message_id = %message.id, error = %delete_err, "delete failed");
                }
                return MessageDisposition::Deleted;
            }
            Ok(Err(crate::module::HandlerFailure::Response(response))) => {
                DispatchError::handler(format!(
                    "queue handler produced a response (status {})",
                    response.status
                ))
            }
            Ok(Err(crate::module::HandlerFailure::Error(err))) => DispatchError::Handler(err),
            Err(context_error) => context_error.into(),
        };

        error!(queue = %queue.name, message_id = %message.id, error = %err, "message handler failed");
        self.report_failure(queue, Arc::new(err), meta).await;
        MessageDisposition::Failed
    }

    async fn report_failure(&self, queue: &Arc<Queue>, err: Arc<DispatchError>, meta: QueueMeta) {
        if let Some(on_error) = &queue.module.on_error {
            on_error(err, meta).await;
        }
    }
}

/// Decode per the `type` attribute: JSON when it says so, otherwise
/// attempt JSON and fall back to the raw string
fn decode_payload(message: &Message) -> Result<Payload, DispatchError> {
    match message.attributes.content_type.as_deref() {
        Some(content_type)
            if content_type == "application/json" || content_type.ends_with("+json") =>
        {
            serde_json::from_str(&message.body)
                .map(Payload::Json)
                .map_err(|err| DispatchError::handler(format!("invalid JSON payload: {err}")))
        }
        _ => Ok(serde_json::from_str(&message.body)
            .map(Payload::Json)
            .unwrap_or_else(|_| Payload::Text(message.body.clone()))),
    }
}
