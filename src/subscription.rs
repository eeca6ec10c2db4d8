//! Subscription descriptors.
//!
//! A descriptor names one event family from one source application that the
//! local application wants to receive, plus the flags of the queue it lands in.

use serde::Serialize;

use crate::addressing::EventType;
use crate::application::ApplicationIdentity;
use crate::broker::{FieldTable, FieldValue, QueueOptions};
use crate::error::ValidationError;

/// Interest in one event type published by one application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriptionDescriptor {
    event_type: EventType,
    #[serde(serialize_with = "serialize_label")]
    source: ApplicationIdentity,
    durable: bool,
    auto_delete: bool,
    exclusive: bool,
    arguments: FieldTable,
}

impl SubscriptionDescriptor {
    /// Subscribe to `event_type` published by `source`.
    ///
    /// External applications cannot be listened to.
    pub fn new(event_type: EventType, source: ApplicationIdentity) -> Result<Self, ValidationError> {
        if source.is_external() {
            return Err(ValidationError::ExternalSource);
        }
        Ok(Self {
            event_type,
            source,
            durable: true,
            auto_delete: false,
            exclusive: false,
            arguments: FieldTable::new(),
        })
    }

    pub fn durable(mut self, durable: bool) -> Self {
        self.durable = durable;
        self
    }

    pub fn auto_delete(mut self, auto_delete: bool) -> Self {
        self.auto_delete = auto_delete;
        self
    }

    pub fn exclusive(mut self, exclusive: bool) -> Self {
        self.exclusive = exclusive;
        self
    }

    /// Add a broker queue argument (e.g. `x-dead-letter-exchange`).
    pub fn argument(mut self, key: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.arguments.insert(key.into(), value.into());
        self
    }

    pub fn event_type(&self) -> EventType {
        self.event_type
    }

    pub fn source(&self) -> &ApplicationIdentity {
        &self.source
    }

    pub fn is_durable(&self) -> bool {
        self.durable
    }

    pub fn is_auto_delete(&self) -> bool {
        self.auto_delete
    }

    pub fn is_exclusive(&self) -> bool {
        self.exclusive
    }

    pub fn arguments(&self) -> &FieldTable {
        &self.arguments
    }

    /// Declaration flags for the queue this subscription consumes from.
    pub fn queue_options(&self) -> QueueOptions {
        QueueOptions {
            durable: self.durable,
            exclusive: self.exclusive,
            auto_delete: self.auto_delete,
            arguments: self.arguments.clone(),
        }
    }
}

fn serialize_label<S: serde::Serializer>(
    app: &ApplicationIdentity,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(app.label())
}
