//! Queue message model and backend interface
//!
//! Messages arrive in batches from the host's queue service; the backend
//! trait covers the two operations the dispatcher and the ambient context
//! need from it: enqueue and delete. The in-memory backend serves local
//! mode, where deletes are a no-op because nothing is actually queued
//! remotely.

pub mod dispatcher;

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use uuid::Uuid;

use crate::errors::HandlerError;
use crate::module::Payload;

pub use dispatcher::{QueueDispatcher, RemainingTime};

/// An incoming queue message
#[derive(Debug, Clone)]
pub struct Message {
    pub id: String,
    /// Message group (FIFO queues only)
    pub group_id: Option<String>,
    pub receipt_handle: String,
    pub body: String,
    pub attributes: MessageAttributes,
}

/// Attributes carried alongside a message body
#[derive(Debug, Clone, Default)]
pub struct MessageAttributes {
    pub received_count: u32,
    /// Sent timestamp, milliseconds since the epoch
    pub sent_at: Option<u64>,
    /// FIFO sequence number
    pub sequence_number: Option<u64>,
    /// Media type the payload was enqueued with
    pub content_type: Option<String>,
    /// Id of the user on whose behalf the message was enqueued
    pub user_id: Option<String>,
    /// Additional parameters as a query string
    pub params: Option<String>,
}

impl MessageAttributes {
    /// Decode the `params` query string into a map
    pub fn params_map(&self) -> HashMap<String, String> {
        match &self.params {
            Some(raw) => url::form_urlencoded::parse(raw.as_bytes())
                .into_owned()
                .collect(),
            None => HashMap::new(),
        }
    }
}

/// Terminal state of one dispatched message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageDisposition {
    /// Handled and removed from the queue
    Deleted,
    /// Returned to the host's retry policy
    Failed,
}

/// A job submitted through the ambient context
#[derive(Debug, Clone)]
pub struct JobRequest {
    pub queue_name: String,
    pub payload: Payload,
    /// Message group for FIFO queues
    pub group_id: Option<String>,
    /// Extra parameters, delivered back as the `params` attribute
    pub params: HashMap<String, String>,
    /// User pinned to the enqueuing context, if any
    pub user_id: Option<String>,
}

impl JobRequest {
    pub fn new(queue_name: impl Into<String>, payload: Payload) -> Self {
        Self {
            queue_name: queue_name.into(),
            payload,
            group_id: None,
            params: HashMap::new(),
            user_id: None,
        }
    }

    pub fn with_group(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = Some(group_id.into());
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }
}

/// The host's queue service, reduced to what the runtime needs
#[async_trait]
pub trait QueueBackend: Send + Sync {
    /// Submit a job; resolves to the new message id
    async fn enqueue(&self, job: JobRequest) -> Result<String, HandlerError>;

    /// Remove a handled message. Local backends treat this as a no-op.
    async fn delete_message(
        &self,
        queue_name: &str,
        receipt_handle: &str,
    ) -> Result<(), HandlerError>;

    /// Whether this backend is the in-process local one
    fn is_local(&self) -> bool;
}

/// In-memory queue backend for local mode and tests
#[derive(Debug, Default)]
pub struct MemoryQueueBackend {
    enqueued: RwLock<Vec<(String, JobRequest)>>,
    deleted: RwLock<Vec<(String, String)>>,
}

impl MemoryQueueBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Jobs enqueued so far, as (message id, job) pairs
    pub fn enqueued(&self) -> Vec<(String, JobRequest)> {
        self.enqueued.read().clone()
    }

    /// Deletes recorded so far, as (queue, receipt handle) pairs
    pub fn deleted(&self) -> Vec<(String, String)> {
        self.deleted.read().clone()
    }

    /// Drain enqueued jobs, e.g. for simulated delivery in tests
    pub fn drain(&self) -> Vec<(String, JobRequest)> {
        std::mem::take(&mut *self.enqueued.write())
    }
}

#[async_trait]
impl QueueBackend for MemoryQueueBackend {
    async fn enqueue(&self, job: JobRequest) -> Result<String, HandlerError> {
        let id = Uuid::new_v4().to_string();
        self.enqueued.write().push((id.clone(), job));
        Ok(id)
    }

    async fn delete_message(
        &self,
        queue_name: &str,
        receipt_handle: &str,
    ) -> Result<(), HandlerError> {
        self.deleted
            .write()
            .push((queue_name.to_string(), receipt_handle.to_string()));
        Ok(())
    }

    fn is_local(&self) -> bool {
        true
    }
}
