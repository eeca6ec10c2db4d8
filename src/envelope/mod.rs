//! Message envelope and its wire mapping.
//!
//! | Envelope field | Wire |
//! |---|---|
//! | event id | `message-id` (UUID) |
//! | timestamp | `timestamp` (UTC seconds) |
//! | event type | `type` |
//! | source application | `app-id` |
//! | persistent | `delivery-mode` |
//! | action | header `action` |
//! | tenant id | header `tenantid` |
//! | extensions | other string headers |
//! | body | JSON object of strings |

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::addressing::{split_routing_key, topic_segment, EventType};
use crate::application::ApplicationIdentity;
use crate::broker::{FieldTable, FieldValue, MessageProperties};
use crate::error::{EncodeError, MalformedEnvelopeError};

pub const ACTION_HEADER: &str = "action";
pub const TENANT_HEADER: &str = "tenantid";
pub const CONTENT_TYPE_JSON: &str = "application/json";

/// Message payload: flat string map.
pub type MessageBody = BTreeMap<String, String>;

/// One domain event, outbound or received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageEnvelope {
    event_id: Uuid,
    timestamp: DateTime<Utc>,
    event_type: EventType,
    action: String,
    source_application: ApplicationIdentity,
    tenant_id: String,
    body: MessageBody,
    persistent: bool,
    routing_key_suffix: String,
    extensions: BTreeMap<String, String>,
}

impl MessageEnvelope {
    /// New outbound event with a fresh id and the current time.
    pub fn new(
        source_application: ApplicationIdentity,
        event_type: EventType,
        action: impl Into<String>,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            event_type,
            action: action.into(),
            source_application,
            tenant_id: String::new(),
            body: MessageBody::new(),
            persistent: true,
            routing_key_suffix: topic_segment(event_type).to_string(),
            extensions: BTreeMap::new(),
        }
    }

    pub fn with_body(mut self, body: MessageBody) -> Self {
        self.body = body;
        self
    }

    /// Tenant the event belongs to. Required when a multi-tenant application
    /// publishes; tenant-scoped publishers use their configured tenant.
    pub fn with_tenant_id(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = tenant_id.into();
        self
    }

    /// Routing key tail after `{tenant}.{application}`. Defaults to the topic
    /// segment of the event type, which is the only value publishers accept.
    pub fn with_routing_key_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.routing_key_suffix = suffix.into();
        self
    }

    pub fn with_persistent(mut self, persistent: bool) -> Self {
        self.persistent = persistent;
        self
    }

    /// Extra string header carried next to `action` and `tenantid`.
    ///
    /// Those two names are reserved; encoding an envelope that uses them fails.
    pub fn with_extension(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.extensions.insert(name.into(), value.into());
        self
    }

    pub fn insert_body(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.body.insert(key.into(), value.into());
    }

    pub fn body_mut(&mut self) -> &mut MessageBody {
        &mut self.body
    }

    pub fn set_persistent(&mut self, persistent: bool) {
        self.persistent = persistent;
    }

    pub fn event_id(&self) -> Uuid {
        self.event_id
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn event_type(&self) -> EventType {
        self.event_type
    }

    pub fn action(&self) -> &str {
        &self.action
    }

    pub fn source_application(&self) -> &ApplicationIdentity {
        &self.source_application
    }

    /// Empty when unset.
    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    pub fn body(&self) -> &MessageBody {
        &self.body
    }

    pub fn is_persistent(&self) -> bool {
        self.persistent
    }

    pub fn routing_key_suffix(&self) -> &str {
        &self.routing_key_suffix
    }

    pub fn extensions(&self) -> &BTreeMap<String, String> {
        &self.extensions
    }

    /// Encode for publishing. `tenant_header` is the value sent as `tenantid`.
    pub fn to_wire(&self, tenant_header: &str) -> Result<(MessageProperties, Vec<u8>), EncodeError> {
        if let Some(name) = self.extensions.keys().find(|name| is_reserved_header(name)) {
            return Err(EncodeError::ReservedHeader(name.clone()));
        }
        let seconds = self.timestamp.timestamp();
        let timestamp =
            u64::try_from(seconds).map_err(|_| EncodeError::TimestampBeforeEpoch(seconds))?;
        let body = serde_json::to_vec(&self.body)?;

        let mut headers: FieldTable = self
            .extensions
            .iter()
            .map(|(k, v)| (k.clone(), FieldValue::from(v.as_str())))
            .collect();
        headers.insert(ACTION_HEADER.to_string(), FieldValue::from(self.action.as_str()));
        headers.insert(TENANT_HEADER.to_string(), FieldValue::from(tenant_header));

        let properties = MessageProperties {
            message_id: Some(self.event_id.to_string()),
            timestamp: Some(timestamp),
            kind: Some(self.event_type.as_str().to_string()),
            app_id: Some(self.source_application.label().to_string()),
            content_type: Some(CONTENT_TYPE_JSON.to_string()),
            persistent: self.persistent,
            headers,
        };
        Ok((properties, body))
    }

    /// Rebuild an envelope from a received message.
    pub fn from_wire(
        properties: &MessageProperties,
        routing_key: &str,
        body: &[u8],
    ) -> Result<Self, MalformedEnvelopeError> {
        let message_id = properties
            .message_id
            .as_deref()
            .ok_or(MalformedEnvelopeError::MissingProperty("message-id"))?;
        let event_id = Uuid::parse_str(message_id)
            .map_err(|_| MalformedEnvelopeError::InvalidMessageId(message_id.to_string()))?;

        let seconds = properties
            .timestamp
            .ok_or(MalformedEnvelopeError::MissingProperty("timestamp"))?;
        let timestamp = i64::try_from(seconds)
            .ok()
            .and_then(|s| DateTime::from_timestamp(s, 0))
            .ok_or(MalformedEnvelopeError::InvalidTimestamp(seconds))?;

        let kind = properties
            .kind
            .as_deref()
            .ok_or(MalformedEnvelopeError::MissingProperty("type"))?;
        let event_type: EventType = kind
            .parse()
            .map_err(|_| MalformedEnvelopeError::UnknownEventType(kind.to_string()))?;

        let app_id = properties
            .app_id
            .as_deref()
            .ok_or(MalformedEnvelopeError::MissingProperty("app-id"))?;
        let source_application = ApplicationIdentity::from_label(app_id)
            .ok_or_else(|| MalformedEnvelopeError::UnknownApplication(app_id.to_string()))?;

        let action = string_header(&properties.headers, ACTION_HEADER)?;
        let tenant_id = string_header(&properties.headers, TENANT_HEADER)?;

        let body: MessageBody = serde_json::from_slice(body)
            .map_err(|e| MalformedEnvelopeError::InvalidBody(e.to_string()))?;

        let routing_key_suffix = split_routing_key(routing_key)
            .map(|(_, _, suffix)| suffix)
            .unwrap_or_else(|| topic_segment(event_type))
            .to_string();

        let extensions = properties
            .headers
            .iter()
            .filter(|(name, _)| !is_reserved_header(name))
            .filter_map(|(name, value)| value.as_str().map(|v| (name.clone(), v.to_string())))
            .collect();

        Ok(Self {
            event_id,
            timestamp,
            event_type,
            action,
            source_application,
            tenant_id,
            body,
            persistent: properties.persistent,
            routing_key_suffix,
            extensions,
        })
    }
}

fn is_reserved_header(name: &str) -> bool {
    name == ACTION_HEADER || name == TENANT_HEADER
}

fn string_header(
    headers: &FieldTable,
    name: &'static str,
) -> Result<String, MalformedEnvelopeError> {
    headers
        .get(name)
        .ok_or(MalformedEnvelopeError::MissingHeader(name))?
        .as_str()
        .map(str::to_string)
        .ok_or(MalformedEnvelopeError::InvalidHeader(name))
}

#[cfg(test)]
mod tests;
