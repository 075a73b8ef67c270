//! Canonical JSON encoding for telemetry events and session framing.
//!
//! Event fragments have the shape
//! `{"eventName":"<name>"[,<fixed fields>][,"attributes":[{"name":..,"value":..}]]}`
//! with no insignificant whitespace. Encoding is pure: the same event always
//! yields the same bytes.

use chrono::{DateTime, SecondsFormat, Utc};
use tcplog_protocol::attribute::is_json_number;
use tcplog_protocol::event::SESSION_END_EVENT;
use tcplog_protocol::{Attribute, AttributeValue, DeviceId, Event, Framing, Session, SessionId, UserId};
use tracing::debug;

/// Identity fields written at the top of every session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionHeader {
    pub session_id: SessionId,
    pub user_id: UserId,
    pub device_id: Option<DeviceId>,
    pub timestamp: Option<DateTime<Utc>>,
}

impl SessionHeader {
    pub fn from_session(session: &Session, timestamp_events: bool) -> Self {
        Self {
            session_id: session.session_id.clone(),
            user_id: session.user_id.clone(),
            device_id: session.device_id.clone(),
            timestamp: timestamp_events.then_some(session.started_at),
        }
    }
}

/// Incremental writer for one flat JSON object.
struct ObjectWriter {
    buf: String,
    empty: bool,
}

impl ObjectWriter {
    fn new() -> Self {
        Self {
            buf: String::from("{"),
            empty: true,
        }
    }

    fn key(&mut self, key: &str) {
        if !self.empty {
            self.buf.push(',');
        }
        self.empty = false;
        push_json_string(&mut self.buf, key);
        self.buf.push(':');
    }

    fn string(&mut self, key: &str, value: &str) {
        self.key(key);
        push_json_string(&mut self.buf, value);
    }

    fn value(&mut self, key: &str, value: &AttributeValue) {
        self.key(key);
        push_attribute_value(&mut self.buf, value);
    }

    /// Writes `"attributes":[...]`, or nothing when the list is empty.
    fn attributes(&mut self, attributes: &[Attribute]) {
        if attributes.is_empty() {
            return;
        }
        self.key("attributes");
        self.buf.push('[');
        for (index, attribute) in attributes.iter().enumerate() {
            if index > 0 {
                self.buf.push(',');
            }
            self.buf.push_str("{\"name\":");
            push_json_string(&mut self.buf, &attribute.name);
            self.buf.push_str(",\"value\":");
            push_attribute_value(&mut self.buf, &attribute.value);
            self.buf.push('}');
        }
        self.buf.push(']');
    }

    fn finish(mut self) -> String {
        self.buf.push('}');
        self.buf
    }
}

fn push_json_string(buf: &mut String, text: &str) {
    // Display on a JSON string value cannot fail and applies the standard
    // escapes (quote, backslash, control characters).
    buf.push_str(&serde_json::Value::String(text.to_owned()).to_string());
}

fn push_attribute_value(buf: &mut String, value: &AttributeValue) {
    match value {
        AttributeValue::Numeric(text) if is_json_number(text) => buf.push_str(text),
        AttributeValue::Numeric(text) => {
            debug!(value = %text, "numeric attribute is not a JSON number, quoting it");
            push_json_string(buf, text);
        }
        AttributeValue::Text(text) => push_json_string(buf, text),
    }
}

fn write_event_fields(object: &mut ObjectWriter, event: &Event) {
    object.string("eventName", event.name());
    for (key, value) in event.kind.fixed_fields() {
        object.value(key, &value);
    }
}

/// Encode one event as a standalone JSON object fragment.
pub fn encode_event(event: &Event) -> String {
    let mut object = ObjectWriter::new();
    write_event_fields(&mut object, event);
    object.attributes(&event.attributes);
    object.finish()
}

fn write_identity(object: &mut ObjectWriter, header: &SessionHeader) {
    object.string("sessionId", header.session_id.as_str());
    object.string("userId", header.user_id.as_str());
    if let Some(device_id) = &header.device_id {
        object.string("deviceId", device_id.as_str());
    }
    if let Some(timestamp) = header.timestamp {
        object.string(
            "timestamp",
            &timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
        );
    }
}

/// Opening bytes of a session, including `start` as its first event.
///
/// - `Document`: `{<identity>,"events":[` followed by the start fragment.
/// - `Lines`: one object holding the start event name, the identity fields,
///   and the start attributes.
pub fn encode_header(framing: Framing, header: &SessionHeader, start: &Event) -> String {
    match framing {
        Framing::Document => {
            let mut out = encode_document_open(header);
            out.push_str(&encode_record(framing, start, true));
            out
        }
        Framing::Lines => {
            let mut object = ObjectWriter::new();
            write_event_fields(&mut object, start);
            write_identity(&mut object, header);
            object.attributes(&start.attributes);
            let mut out = object.finish();
            out.push('\n');
            out
        }
    }
}

fn encode_document_open(header: &SessionHeader) -> String {
    let mut object = ObjectWriter::new();
    write_identity(&mut object, header);
    object.key("events");
    // The object stays open until the trailer; `finish` is not called.
    let mut out = object.buf;
    out.push_str("[\n");
    out
}

/// Bytes for one event inside a running session.
///
/// In document framing every event after the first is preceded by exactly
/// one comma so the session's fragments form a JSON array.
pub fn encode_record(framing: Framing, event: &Event, first: bool) -> String {
    let fragment = encode_event(event);
    let mut out = String::with_capacity(fragment.len() + 2);
    if framing == Framing::Document && !first {
        out.push(',');
    }
    out.push_str(&fragment);
    out.push('\n');
    out
}

/// Closing bytes of a session.
pub fn encode_trailer(framing: Framing, header: &SessionHeader) -> String {
    match framing {
        Framing::Document => "]}\n".to_owned(),
        Framing::Lines => {
            let mut object = ObjectWriter::new();
            object.string("eventName", SESSION_END_EVENT);
            object.string("sessionId", header.session_id.as_str());
            object.string("userId", header.user_id.as_str());
            let mut out = object.finish();
            out.push('\n');
            out
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::{Value, json};
    use tcplog_protocol::EventKind;

    fn header() -> SessionHeader {
        SessionHeader {
            session_id: SessionId::from_string("S1"),
            user_id: UserId::from_string("alice"),
            device_id: None,
            timestamp: None,
        }
    }

    #[test]
    fn login_event_matches_canonical_fragment() {
        let event = Event::new("Login").attribute("method", "password");
        assert_eq!(
            encode_event(&event),
            r#"{"eventName":"Login","attributes":[{"name":"method","value":"password"}]}"#
        );
    }

    #[test]
    fn empty_attributes_are_omitted() {
        assert_eq!(encode_event(&Event::new("Ping")), r#"{"eventName":"Ping"}"#);
    }

    #[test]
    fn encoding_is_idempotent() {
        let event = Event::new("Score").attribute("points", 10).attribute("mode", "ranked");
        assert_eq!(encode_event(&event), encode_event(&event));
    }

    #[test]
    fn numeric_values_are_unquoted() {
        let event = Event::new("Score").attribute("points", 10).attribute("ratio", 0.25);
        let parsed: Value = serde_json::from_str(&encode_event(&event)).unwrap();
        assert!(parsed["attributes"][0]["value"].is_number());
        assert_eq!(parsed["attributes"][0]["value"], json!(10));
        assert_eq!(parsed["attributes"][1]["value"], json!(0.25));
    }

    #[test]
    fn invalid_numeric_text_is_quoted() {
        let event = Event::new("Bad").attribute("n", AttributeValue::numeric("12abc"));
        let parsed: Value = serde_json::from_str(&encode_event(&event)).unwrap();
        assert_eq!(parsed["attributes"][0]["value"], json!("12abc"));
    }

    #[test]
    fn text_escaping_round_trips() {
        let tricky = "quote\" backslash\\ newline\n tab\t bell\u{7} unicode é 🚀 slash/";
        let event = Event::new("name \"with\" quotes").attribute("a\\b", tricky);
        let encoded = encode_event(&event);
        let parsed: Value = serde_json::from_str(&encoded).unwrap();
        assert_eq!(parsed["eventName"], json!("name \"with\" quotes"));
        assert_eq!(parsed["attributes"][0]["name"], json!("a\\b"));
        assert_eq!(parsed["attributes"][0]["value"], json!(tricky));
    }

    #[test]
    fn fixed_fields_come_before_attributes() {
        let event = Event::item_purchase("sword", 2).attribute("shop", "blacksmith");
        assert_eq!(
            encode_event(&event),
            r#"{"eventName":"ItemPurchase","itemId":"sword","itemQuantity":2,"attributes":[{"name":"shop","value":"blacksmith"}]}"#
        );
    }

    #[test]
    fn currency_purchase_encodes_optional_fields_in_order() {
        let event = Event::from_kind(EventKind::CurrencyPurchase {
            game_currency_type: "gems".into(),
            game_currency_amount: 500,
            real_currency_type: Some("USD".into()),
            real_money_cost: Some(4.99),
            payment_provider: Some("store".into()),
        });
        assert_eq!(
            encode_event(&event),
            r#"{"eventName":"CurrencyPurchase","gameCurrencyType":"gems","gameCurrencyAmount":500,"realCurrencyType":"USD","realMoneyCost":4.99,"paymentProvider":"store"}"#
        );
    }

    #[test]
    fn error_and_progress_fragments() {
        assert_eq!(
            encode_event(&Event::error("disk full")),
            r#"{"eventName":"Error","error":"disk full"}"#
        );
        assert_eq!(
            encode_event(&Event::progress("Complete", "World1.Level3")),
            r#"{"eventName":"Progress","progressType":"Complete","progressHierarchy":"World1.Level3"}"#
        );
    }

    #[test]
    fn document_records_are_comma_separated() {
        let first = encode_record(Framing::Document, &Event::new("A"), true);
        let second = encode_record(Framing::Document, &Event::new("B"), false);
        assert_eq!(first, "{\"eventName\":\"A\"}\n");
        assert_eq!(second, ",{\"eventName\":\"B\"}\n");
    }

    #[test]
    fn lines_records_never_have_separators() {
        let record = encode_record(Framing::Lines, &Event::new("B"), false);
        assert_eq!(record, "{\"eventName\":\"B\"}\n");
    }

    #[test]
    fn document_session_parses_as_json() {
        let mut header = header();
        header.device_id = Some(DeviceId::from_string("D1"));
        header.timestamp = Some(Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).single().unwrap());

        let start = Event::session_start(vec![Attribute::new("build", "1.2.3")]);
        let mut doc = encode_header(Framing::Document, &header, &start);
        doc.push_str(&encode_record(Framing::Document, &Event::new("A"), false));
        doc.push_str(&encode_record(Framing::Document, &Event::new("B"), false));
        doc.push_str(&encode_trailer(Framing::Document, &header));

        let parsed: Value = serde_json::from_str(&doc).unwrap();
        assert_eq!(parsed["sessionId"], json!("S1"));
        assert_eq!(parsed["userId"], json!("alice"));
        assert_eq!(parsed["deviceId"], json!("D1"));
        assert_eq!(parsed["timestamp"], json!("2024-01-02T03:04:05.000Z"));
        let events = parsed["events"].as_array().unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0]["eventName"], json!("Session.Start"));
        assert_eq!(events[0]["attributes"][0]["value"], json!("1.2.3"));
        assert_eq!(events[2]["eventName"], json!("B"));
    }

    #[test]
    fn document_header_omits_optional_identity() {
        let doc = encode_header(Framing::Document, &header(), &Event::session_start(vec![]));
        assert!(doc.starts_with(r#"{"sessionId":"S1","userId":"alice","events":["#));
        assert!(!doc.contains("deviceId"));
        assert!(!doc.contains("timestamp"));
    }

    #[test]
    fn lines_session_is_one_object_per_line() {
        let start = Event::session_start(vec![Attribute::new("level", 3)]);
        let mut out = encode_header(Framing::Lines, &header(), &start);
        out.push_str(&encode_record(Framing::Lines, &Event::new("A"), false));
        out.push_str(&encode_trailer(Framing::Lines, &header()));

        let lines: Vec<Value> = out
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0]["eventName"], json!("Session.Start"));
        assert_eq!(lines[0]["sessionId"], json!("S1"));
        assert_eq!(lines[0]["attributes"][0]["value"], json!(3));
        assert_eq!(lines[1]["eventName"], json!("A"));
        assert_eq!(lines[2]["eventName"], json!("Session.End"));
        assert_eq!(lines[2]["userId"], json!("alice"));
    }
}
