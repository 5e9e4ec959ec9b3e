//! Trace context propagation over queue message attributes.
//!
//! Message queues carry trace context as message attributes of the form
//! `{DataType: "String", StringValue: <value>}`. The transport caps a
//! message at 10 attributes; when the trace context does not fit, the
//! attributes that fit are written, the rest are skipped with a one-time
//! warning, and the receiving side starts an unconnected trace rather than
//! failing the send.
//!
//! Attribute lookup on the receiving side is case-insensitive: fan-out
//! transports (topic-to-queue bridging) downcase or otherwise vary attribute
//! naming. When the original message was published to a topic and bridged
//! into a queue without raw delivery, the attributes sit inside a JSON
//! notification envelope in the message body instead; [`read_trace_context_from_sns_body`]
//! unwraps that envelope.

use serde::Deserialize;
use std::collections::HashMap;

use crate::propagation::IncomingTraceContext;
use crate::trace::ids::is_valid_id;
use crate::trace::{OneTimeWarning, TracingLevel};
use crate::Context;

/// Message attribute carrying the trace ID.
pub const TRACE_ID_ATTRIBUTE: &str = "X_TRACEKIT_T";
/// Message attribute carrying the parent span ID.
pub const SPAN_ID_ATTRIBUTE: &str = "X_TRACEKIT_S";
/// Message attribute carrying the tracing level.
pub const TRACE_LEVEL_ATTRIBUTE: &str = "X_TRACEKIT_L";

/// The hard cap on attributes per message imposed by the transport.
pub const MAX_MESSAGE_ATTRIBUTES: usize = 10;

static ATTRIBUTE_CAP_WARNING: OneTimeWarning = OneTimeWarning::new();

/// One message attribute as queue SDKs model it.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct MessageAttributeValue {
    /// The attribute's declared type, `"String"` for trace context.
    #[serde(rename = "DataType")]
    pub data_type: String,
    /// The attribute's value for string-typed attributes.
    #[serde(rename = "StringValue")]
    pub string_value: Option<String>,
}

impl MessageAttributeValue {
    /// A string-typed attribute.
    pub fn string(value: impl Into<String>) -> Self {
        MessageAttributeValue {
            data_type: "String".to_owned(),
            string_value: Some(value.into()),
        }
    }
}

/// The attribute map of an outgoing message.
pub type MessageAttributes = HashMap<String, MessageAttributeValue>;

fn write_attribute(attributes: &mut MessageAttributes, key: &str, value: &str) -> bool {
    // Overwriting an existing key does not grow the map, so it is always
    // allowed; only new keys count against the transport cap.
    if attributes.contains_key(key) || attributes.len() < MAX_MESSAGE_ATTRIBUTES {
        attributes.insert(key.to_owned(), MessageAttributeValue::string(value));
        true
    } else {
        ATTRIBUTE_CAP_WARNING.fire(|| {
            tracekit_warn!(
                name: "QueuePropagation.AttributeCapReached",
                max_attributes = MAX_MESSAGE_ATTRIBUTES,
                skipped_attribute = key.to_owned()
            );
        });
        false
    }
}

/// Writes the context's trace state into an outgoing message's attributes.
///
/// For an active trace this writes the trace ID, span ID and level
/// attributes in that order, stopping at the transport's attribute cap; for
/// a suppressed context only the level attribute is written so downstream
/// consumers stay untraced as well.
pub fn propagate_trace_context(attributes: &mut MessageAttributes, cx: &Context) {
    if cx.tracing_suppressed() {
        write_attribute(
            attributes,
            TRACE_LEVEL_ATTRIBUTE,
            TracingLevel::Suppressed.as_wire_value(),
        );
        return;
    }
    let span = match cx.span() {
        Some(span) => span,
        None => return,
    };
    if !write_attribute(attributes, TRACE_ID_ATTRIBUTE, span.trace_id()) {
        return;
    }
    if !write_attribute(attributes, SPAN_ID_ATTRIBUTE, span.span_id()) {
        return;
    }
    write_attribute(
        attributes,
        TRACE_LEVEL_ATTRIBUTE,
        TracingLevel::Active.as_wire_value(),
    );
}

/// Like [`propagate_trace_context`] for the current context.
pub fn propagate(attributes: &mut MessageAttributes) {
    Context::map_current(|cx| propagate_trace_context(attributes, cx))
}

fn get_case_insensitive<'a>(
    attributes: &'a MessageAttributes,
    key: &str,
) -> Option<&'a MessageAttributeValue> {
    attributes
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(key))
        .map(|(_, value)| value)
}

fn string_value<'a>(attributes: &'a MessageAttributes, key: &str) -> Option<&'a str> {
    get_case_insensitive(attributes, key)
        .and_then(|attribute| attribute.string_value.as_deref())
        .map(str::trim)
}

/// Reads trace context from a received message's attributes.
///
/// Lookup is case-insensitive. Suppression discards incoming IDs, exactly
/// as for HTTP extraction.
pub fn read_trace_context(attributes: &MessageAttributes) -> IncomingTraceContext {
    let level = string_value(attributes, TRACE_LEVEL_ATTRIBUTE)
        .and_then(TracingLevel::from_wire_value);

    let (trace_id, parent_span_id) = if level == Some(TracingLevel::Suppressed) {
        (None, None)
    } else {
        let trace_id = string_value(attributes, TRACE_ID_ATTRIBUTE)
            .filter(|value| is_valid_id(value))
            .map(str::to_owned);
        let parent_span_id = string_value(attributes, SPAN_ID_ATTRIBUTE)
            .filter(|value| value.len() == 16 && is_valid_id(value))
            .map(str::to_owned);
        match (trace_id, parent_span_id) {
            (Some(trace_id), Some(parent_span_id)) => (Some(trace_id), Some(parent_span_id)),
            _ => (None, None),
        }
    };

    IncomingTraceContext {
        trace_id,
        parent_span_id,
        level,
        correlation: None,
    }
}

/// Whether the attributes carry any trace context at all.
pub fn has_trace_context(attributes: &MessageAttributes) -> bool {
    [
        TRACE_ID_ATTRIBUTE,
        SPAN_ID_ATTRIBUTE,
        TRACE_LEVEL_ATTRIBUTE,
    ]
    .iter()
    .any(|key| get_case_insensitive(attributes, key).is_some())
}

/// The result of inspecting a message body for a notification envelope.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SnsEnvelope {
    /// The body was a notification envelope; its attributes were read.
    Parsed(IncomingTraceContext),
    /// The body is not a notification envelope; the caller should fall back
    /// to the message's own attributes or start a fresh trace.
    NotApplicable,
}

#[derive(Debug, Deserialize)]
struct SnsNotification {
    #[serde(rename = "Type")]
    kind: String,
    #[serde(rename = "MessageAttributes", default)]
    message_attributes: HashMap<String, SnsMessageAttribute>,
}

/// Inside the envelope, attributes use `Type`/`Value` instead of
/// `DataType`/`StringValue`.
#[derive(Debug, Deserialize)]
struct SnsMessageAttribute {
    #[serde(rename = "Type")]
    data_type: String,
    #[serde(rename = "Value")]
    value: String,
}

/// Unwraps a topic-notification envelope from a received message body and
/// reads the trace context from the attributes inside it.
///
/// This sits on the message-receive hot path, so cheap substring checks
/// weed out ordinary message bodies before a full JSON parse is attempted.
/// A body that fails any check or does not parse is simply
/// [`NotApplicable`](SnsEnvelope::NotApplicable), never an error.
pub fn read_trace_context_from_sns_body(body: &str) -> SnsEnvelope {
    let trimmed = body.trim_start();
    if !trimmed.starts_with('{')
        || !trimmed.contains("\"Type\"")
        || !trimmed.contains("Notification")
    {
        return SnsEnvelope::NotApplicable;
    }

    let notification: SnsNotification = match serde_json::from_str(trimmed) {
        Ok(notification) => notification,
        Err(_) => return SnsEnvelope::NotApplicable,
    };
    if notification.kind != "Notification" {
        return SnsEnvelope::NotApplicable;
    }

    let attributes: MessageAttributes = notification
        .message_attributes
        .into_iter()
        .map(|(name, attribute)| {
            (
                name,
                MessageAttributeValue {
                    data_type: attribute.data_type,
                    string_value: Some(attribute.value),
                },
            )
        })
        .collect();

    SnsEnvelope::Parsed(read_trace_context(&attributes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::{InMemorySpanSink, SpanKind, Tracer, TracerConfig};
    use std::sync::Arc;

    fn attributes_with(count: usize) -> MessageAttributes {
        (0..count)
            .map(|index| {
                (
                    format!("custom-{index}"),
                    MessageAttributeValue::string("value"),
                )
            })
            .collect()
    }

    fn in_span<T>(f: impl FnOnce() -> T) -> T {
        let sink = Arc::new(InMemorySpanSink::default());
        let tracer = Tracer::new(TracerConfig::default(), sink);
        Context::run_and_return(|| {
            tracer.start_span("sqs", SpanKind::Exit).unwrap();
            f()
        })
    }

    #[test]
    fn propagates_full_trace_context() {
        in_span(|| {
            let mut attributes = MessageAttributes::new();
            propagate(&mut attributes);

            assert_eq!(attributes.len(), 3);
            assert_eq!(
                attributes[TRACE_LEVEL_ATTRIBUTE],
                MessageAttributeValue::string("1")
            );
            let incoming = read_trace_context(&attributes);
            assert!(incoming.has_parent());
        });
    }

    #[test]
    fn suppression_writes_only_the_level_attribute() {
        let cx = Context::new().with_tracing_level(TracingLevel::Suppressed);
        let mut attributes = MessageAttributes::new();
        propagate_trace_context(&mut attributes, &cx);

        assert_eq!(attributes.len(), 1);
        assert_eq!(
            attributes[TRACE_LEVEL_ATTRIBUTE],
            MessageAttributeValue::string("0")
        );

        let incoming = read_trace_context(&attributes);
        assert!(incoming.is_suppressed());
        assert!(!incoming.has_parent());
    }

    #[test]
    fn nothing_is_written_without_a_span() {
        let mut attributes = MessageAttributes::new();
        propagate_trace_context(&mut attributes, &Context::new());
        assert!(attributes.is_empty());
    }

    #[test]
    fn nine_existing_attributes_admit_exactly_one_more() {
        in_span(|| {
            let mut attributes = attributes_with(9);
            propagate(&mut attributes);

            // Only the trace ID fit below the cap of 10.
            assert_eq!(attributes.len(), 10);
            assert!(attributes.contains_key(TRACE_ID_ATTRIBUTE));
            assert!(!attributes.contains_key(SPAN_ID_ATTRIBUTE));
            assert!(!attributes.contains_key(TRACE_LEVEL_ATTRIBUTE));
        });
    }

    #[test]
    fn ten_existing_attributes_skip_propagation_entirely() {
        in_span(|| {
            let mut attributes = attributes_with(10);
            propagate(&mut attributes);

            assert_eq!(attributes.len(), 10);
            assert!(!attributes.contains_key(TRACE_ID_ATTRIBUTE));
        });
    }

    #[test]
    fn existing_trace_attributes_are_overwritten_not_counted() {
        in_span(|| {
            let mut attributes = attributes_with(7);
            attributes.insert(
                TRACE_ID_ATTRIBUTE.to_owned(),
                MessageAttributeValue::string("stale"),
            );
            attributes.insert(
                SPAN_ID_ATTRIBUTE.to_owned(),
                MessageAttributeValue::string("stale"),
            );
            attributes.insert(
                TRACE_LEVEL_ATTRIBUTE.to_owned(),
                MessageAttributeValue::string("0"),
            );
            propagate(&mut attributes);

            assert_eq!(attributes.len(), 10);
            assert_ne!(
                attributes[TRACE_ID_ATTRIBUTE],
                MessageAttributeValue::string("stale")
            );
            assert_eq!(
                attributes[TRACE_LEVEL_ATTRIBUTE],
                MessageAttributeValue::string("1")
            );
        });
    }

    #[test]
    fn read_is_case_insensitive() {
        let mut attributes = MessageAttributes::new();
        attributes.insert(
            "x_tracekit_t".to_owned(),
            MessageAttributeValue::string("0123456789abcdef"),
        );
        attributes.insert(
            "X_Tracekit_S".to_owned(),
            MessageAttributeValue::string("fedcba9876543210"),
        );

        let incoming = read_trace_context(&attributes);
        assert_eq!(incoming.trace_id.as_deref(), Some("0123456789abcdef"));
        assert_eq!(incoming.parent_span_id.as_deref(), Some("fedcba9876543210"));
        assert!(has_trace_context(&attributes));
    }

    #[test]
    fn read_discards_ids_when_suppressed() {
        let mut attributes = MessageAttributes::new();
        attributes.insert(
            TRACE_ID_ATTRIBUTE.to_owned(),
            MessageAttributeValue::string("0123456789abcdef"),
        );
        attributes.insert(
            SPAN_ID_ATTRIBUTE.to_owned(),
            MessageAttributeValue::string("fedcba9876543210"),
        );
        attributes.insert(
            TRACE_LEVEL_ATTRIBUTE.to_owned(),
            MessageAttributeValue::string("0"),
        );

        let incoming = read_trace_context(&attributes);
        assert!(incoming.is_suppressed());
        assert!(!incoming.has_parent());
    }

    #[test]
    fn read_ignores_malformed_ids() {
        let mut attributes = MessageAttributes::new();
        attributes.insert(
            TRACE_ID_ATTRIBUTE.to_owned(),
            MessageAttributeValue::string("NOT-HEX"),
        );
        attributes.insert(
            SPAN_ID_ATTRIBUTE.to_owned(),
            MessageAttributeValue::string("fedcba9876543210"),
        );

        let incoming = read_trace_context(&attributes);
        assert!(!incoming.has_parent());
        assert_eq!(incoming.parent_span_id, None);
    }

    #[test]
    fn sns_envelope_is_unwrapped() {
        let body = r#"{
            "Type": "Notification",
            "MessageId": "d2b68667-b2f5-592c-b4f2-cd7a63e52b4b",
            "Message": "the actual payload",
            "MessageAttributes": {
                "x_tracekit_t": {"Type": "String", "Value": "0123456789abcdef"},
                "X_TRACEKIT_S": {"Type": "String", "Value": "fedcba9876543210"},
                "X_TRACEKIT_L": {"Type": "String", "Value": "1"}
            }
        }"#;

        match read_trace_context_from_sns_body(body) {
            SnsEnvelope::Parsed(incoming) => {
                assert_eq!(incoming.trace_id.as_deref(), Some("0123456789abcdef"));
                assert_eq!(
                    incoming.parent_span_id.as_deref(),
                    Some("fedcba9876543210")
                );
                assert_eq!(incoming.level, Some(TracingLevel::Active));
            }
            SnsEnvelope::NotApplicable => panic!("envelope was not unwrapped"),
        }
    }

    #[test]
    fn ordinary_bodies_are_not_applicable() {
        for body in [
            "plain text message",
            "{\"order_id\": 42}",
            "{\"Type\": \"SubscriptionConfirmation\", \"Notification\": true}",
            "",
            "   ",
            "{not json at all, Type Notification",
        ] {
            assert_eq!(
                read_trace_context_from_sns_body(body),
                SnsEnvelope::NotApplicable,
                "accepted {body:?}"
            );
        }
    }

    #[test]
    fn sns_envelope_without_attributes_yields_empty_context() {
        let body = r#"{"Type": "Notification", "Message": "hello"}"#;
        assert_eq!(
            read_trace_context_from_sns_body(body),
            SnsEnvelope::Parsed(IncomingTraceContext::default())
        );
    }
}
