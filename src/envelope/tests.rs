use super::*;
use crate::application::{ExternalName, KnownApplication};
use chrono::{SubsecRound, TimeZone};

fn employee_created() -> MessageEnvelope {
    let mut envelope =
        MessageEnvelope::new(KnownApplication::Saphir.into(), EventType::Employee, "created");
    envelope.insert_body("employeeId", "E-1042");
    envelope.insert_body("name", "Ada");
    envelope
}

#[test]
fn test_new_envelope_defaults() {
    let a = employee_created();
    let b = employee_created();
    assert_ne!(a.event_id(), b.event_id());
    assert_eq!(a.event_id().get_version_num(), 4);
    assert!(a.is_persistent());
    assert_eq!(a.tenant_id(), "");
    assert_eq!(a.routing_key_suffix(), "employee");
}

#[test]
fn test_to_wire_fields() {
    let envelope = employee_created()
        .with_persistent(false)
        .with_extension("correlation", "c-7");
    let (properties, body) = envelope.to_wire("acme").unwrap();

    assert_eq!(properties.message_id, Some(envelope.event_id().to_string()));
    assert_eq!(properties.kind.as_deref(), Some("employee"));
    assert_eq!(properties.app_id.as_deref(), Some("saphir"));
    assert_eq!(properties.content_type.as_deref(), Some(CONTENT_TYPE_JSON));
    assert!(!properties.persistent);
    assert_eq!(properties.headers[ACTION_HEADER], FieldValue::from("created"));
    assert_eq!(properties.headers[TENANT_HEADER], FieldValue::from("acme"));
    assert_eq!(properties.headers["correlation"], FieldValue::from("c-7"));

    let decoded: MessageBody = serde_json::from_slice(&body).unwrap();
    assert_eq!(&decoded, envelope.body());
}

#[test]
fn test_to_wire_rejects_reserved_extension() {
    for name in [ACTION_HEADER, TENANT_HEADER] {
        let envelope = employee_created().with_extension(name, "spoofed");
        assert!(matches!(
            envelope.to_wire("acme"),
            Err(EncodeError::ReservedHeader(header)) if header == name
        ));
    }
}

#[test]
fn test_to_wire_rejects_timestamp_before_epoch() {
    let mut envelope = employee_created();
    envelope.timestamp = Utc.with_ymd_and_hms(1969, 12, 31, 23, 59, 0).unwrap();

    assert!(matches!(
        envelope.to_wire("acme"),
        Err(EncodeError::TimestampBeforeEpoch(-60))
    ));
}

#[test]
fn test_wire_round_trip_keeps_whole_seconds() {
    let envelope = employee_created()
        .with_tenant_id("acme")
        .with_routing_key_suffix("employee.created")
        .with_extension("correlation", "c-7");
    let (properties, body) = envelope.to_wire("acme").unwrap();

    let decoded =
        MessageEnvelope::from_wire(&properties, "acme.saphir.employee.created", &body).unwrap();

    assert_eq!(decoded.event_id(), envelope.event_id());
    assert_eq!(decoded.timestamp(), envelope.timestamp().trunc_subsecs(0));
    assert_eq!(decoded.event_type(), EventType::Employee);
    assert_eq!(decoded.action(), "created");
    assert_eq!(decoded.source_application(), envelope.source_application());
    assert_eq!(decoded.tenant_id(), "acme");
    assert_eq!(decoded.body(), envelope.body());
    assert!(decoded.is_persistent());
    assert_eq!(decoded.routing_key_suffix(), "employee.created");
    assert_eq!(decoded.extensions(), envelope.extensions());
}

#[test]
fn test_from_wire_external_source() {
    let source = ApplicationIdentity::External(ExternalName::new("planner").unwrap());
    let mut envelope = MessageEnvelope::new(source.clone(), EventType::Booking, "created");
    envelope.insert_body("room", "4.12");
    let (properties, body) = envelope.to_wire("acme").unwrap();

    let decoded = MessageEnvelope::from_wire(&properties, "acme.planner.booking", &body).unwrap();
    assert_eq!(decoded.source_application(), &source);
}

#[test]
fn test_from_wire_timestamp() {
    let (mut properties, body) = employee_created().to_wire("acme").unwrap();
    properties.timestamp = Some(1_700_000_000);

    let decoded = MessageEnvelope::from_wire(&properties, "acme.saphir.employee", &body).unwrap();
    assert_eq!(
        decoded.timestamp(),
        Utc.timestamp_opt(1_700_000_000, 0).unwrap()
    );
}

#[test]
fn test_from_wire_rejects_missing_fields() {
    let (properties, body) = employee_created().to_wire("acme").unwrap();
    let key = "acme.saphir.employee";

    let mut missing_id = properties.clone();
    missing_id.message_id = None;
    assert_eq!(
        MessageEnvelope::from_wire(&missing_id, key, &body),
        Err(MalformedEnvelopeError::MissingProperty("message-id"))
    );

    let mut missing_timestamp = properties.clone();
    missing_timestamp.timestamp = None;
    assert_eq!(
        MessageEnvelope::from_wire(&missing_timestamp, key, &body),
        Err(MalformedEnvelopeError::MissingProperty("timestamp"))
    );

    let mut missing_action = properties.clone();
    missing_action.headers.remove(ACTION_HEADER);
    assert_eq!(
        MessageEnvelope::from_wire(&missing_action, key, &body),
        Err(MalformedEnvelopeError::MissingHeader(ACTION_HEADER))
    );

    let mut numeric_tenant = properties.clone();
    numeric_tenant
        .headers
        .insert(TENANT_HEADER.to_string(), FieldValue::from(7i64));
    assert_eq!(
        MessageEnvelope::from_wire(&numeric_tenant, key, &body),
        Err(MalformedEnvelopeError::InvalidHeader(TENANT_HEADER))
    );
}

#[test]
fn test_from_wire_rejects_unknown_values() {
    let (properties, body) = employee_created().to_wire("acme").unwrap();
    let key = "acme.saphir.employee";

    let mut bad_id = properties.clone();
    bad_id.message_id = Some("not-a-uuid".to_string());
    assert!(matches!(
        MessageEnvelope::from_wire(&bad_id, key, &body),
        Err(MalformedEnvelopeError::InvalidMessageId(_))
    ));

    let mut unknown_type = properties.clone();
    unknown_type.kind = Some("payroll".to_string());
    assert_eq!(
        MessageEnvelope::from_wire(&unknown_type, key, &body),
        Err(MalformedEnvelopeError::UnknownEventType("payroll".to_string()))
    );

    let mut unknown_app = properties.clone();
    unknown_app.app_id = Some("a.b".to_string());
    assert_eq!(
        MessageEnvelope::from_wire(&unknown_app, key, &body),
        Err(MalformedEnvelopeError::UnknownApplication("a.b".to_string()))
    );

    let mut huge_timestamp = properties.clone();
    huge_timestamp.timestamp = Some(u64::MAX);
    assert_eq!(
        MessageEnvelope::from_wire(&huge_timestamp, key, &body),
        Err(MalformedEnvelopeError::InvalidTimestamp(u64::MAX))
    );
}

#[test]
fn test_from_wire_rejects_non_string_body() {
    let (properties, _) = employee_created().to_wire("acme").unwrap();
    let result = MessageEnvelope::from_wire(&properties, "acme.saphir.employee", br#"{"age": 3}"#);
    assert!(matches!(result, Err(MalformedEnvelopeError::InvalidBody(_))));

    let result = MessageEnvelope::from_wire(&properties, "acme.saphir.employee", b"not json");
    assert!(matches!(result, Err(MalformedEnvelopeError::InvalidBody(_))));
}

#[test]
fn test_from_wire_ignores_non_string_headers() {
    let (mut properties, body) = employee_created().to_wire("acme").unwrap();
    properties
        .headers
        .insert("x-delivery-count".to_string(), FieldValue::from(2i64));

    let decoded = MessageEnvelope::from_wire(&properties, "acme.saphir.employee", &body).unwrap();
    assert!(decoded.extensions().is_empty());
}
