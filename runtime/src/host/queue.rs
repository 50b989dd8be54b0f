//! Queue batch event shape
//!
//! The host delivers an ordered record list sharing one event source ARN
//! plus a remaining-time oracle; the dispatcher hands back the item
//! identifiers to redeliver. Record attributes arrive as the queue
//! service's PascalCase string map.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::queue::{Message, MessageAttributes, QueueDispatcher, RemainingTime};

/// A batch of queue records as delivered by the host
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueEvent {
    pub records: Vec<QueueRecord>,
}

/// One queue record
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueRecord {
    pub message_id: String,
    pub receipt_handle: String,
    pub body: String,
    #[serde(rename = "eventSourceARN")]
    pub event_source_arn: String,
    #[serde(default)]
    pub attributes: RecordAttributes,
    #[serde(default)]
    pub message_attributes: HashMap<String, MessageAttributeValue>,
}

/// Service-level record attributes (stringly-typed on the wire)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RecordAttributes {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approximate_receive_count: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sent_timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_group_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence_number: Option<String>,
}

/// One user-set message attribute
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageAttributeValue {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub string_value: Option<String>,
    pub data_type: String,
}

/// The partial-batch-failure report returned to the host
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchFailureReport {
    pub batch_item_failures: Vec<ItemFailure>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemFailure {
    pub item_identifier: String,
}

/// Logical queue name from an event source ARN (its final segment)
pub fn queue_name(event_source_arn: &str) -> &str {
    event_source_arn
        .rsplit(':')
        .next()
        .unwrap_or(event_source_arn)
}

/// Translate one record into the dispatcher's message model
pub fn into_message(record: QueueRecord) -> Message {
    let string_attr = |key: &str| {
        record
            .message_attributes
            .get(key)
            .and_then(|attr| attr.string_value.clone())
    };
    Message {
        id: record.message_id,
        group_id: record.attributes.message_group_id.clone(),
        receipt_handle: record.receipt_handle,
        body: record.body,
        attributes: MessageAttributes {
            received_count: record
                .attributes
                .approximate_receive_count
                .as_deref()
                .and_then(|count| count.parse().ok())
                .unwrap_or(1),
            sent_at: record
                .attributes
                .sent_timestamp
                .as_deref()
                .and_then(|ts| ts.parse().ok()),
            sequence_number: record
                .attributes
                .sequence_number
                .as_deref()
                .and_then(|seq| seq.parse().ok()),
            content_type: string_attr("type"),
            user_id: string_attr("userId"),
            params: string_attr("params"),
        },
    }
}

/// Run one batch through the dispatcher and shape the failure report
pub async fn dispatch(
    dispatcher: &QueueDispatcher,
    event: QueueEvent,
    remaining_time: RemainingTime,
) -> BatchFailureReport {
    let Some(first) = event.records.first() else {
        return BatchFailureReport {
            batch_item_failures: Vec::new(),
        };
    };
    let name = queue_name(&first.event_source_arn).to_string();
    let messages = event.records.into_iter().map(into_message).collect();

    let failed = dispatcher
        .dispatch_batch(&name, messages, remaining_time)
        .await;
    BatchFailureReport {
        batch_item_failures: failed
            .into_iter()
            .map(|item_identifier| ItemFailure { item_identifier })
            .collect(),
    }
}
