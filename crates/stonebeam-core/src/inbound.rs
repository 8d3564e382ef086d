//! Inbound update messages.
//!
//! Every transport delivers JSON objects of the shape
//! `{"id": 12, "type": "order", "action": "new", ...payload}`. They are decoded
//! here, once, into a closed set of variants. The variant is chosen by `type`
//! alone; payload fields are read leniently, so a field of the wrong JSON type
//! reads as absent instead of rejecting the message. Anything without a known
//! `type` is kept verbatim as [`MessageBody::Other`].

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// One decoded update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "Value", into = "Value")]
pub struct InboundMessage {
    /// Server-assigned sequence number, if the server sent one.
    pub id: Option<i64>,
    pub body: MessageBody,
}

/// Kind-specific payload of an [`InboundMessage`].
#[derive(Debug, Clone, PartialEq)]
pub enum MessageBody {
    Quotation(QuotationUpdate),
    Order(OrderUpdate),
    Message(DirectMessage),
    Notification(NotificationUpdate),
    System(SystemNotice),
    Heartbeat,
    /// Message with a missing or unknown `type`, kept as received.
    Other(Value),
}

/// Routing key of a message; also the key of the subscriber registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MessageKind {
    Quotation,
    Order,
    Message,
    Notification,
    System,
    Heartbeat,
    Other,
}

impl MessageKind {
    /// The `type` string used on the wire. `Other` has none.
    pub fn wire_name(self) -> Option<&'static str> {
        match self {
            Self::Quotation => Some("quotation"),
            Self::Order => Some("order"),
            Self::Message => Some("message"),
            Self::Notification => Some("notification"),
            Self::System => Some("system"),
            Self::Heartbeat => Some("heartbeat"),
            Self::Other => None,
        }
    }

    pub fn from_wire(name: &str) -> Self {
        match name {
            "quotation" => Self::Quotation,
            "order" => Self::Order,
            "message" => Self::Message,
            "notification" => Self::Notification,
            "system" => Self::System,
            "heartbeat" => Self::Heartbeat,
            _ => Self::Other,
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name().unwrap_or("other"))
    }
}

/// Free-form `action` field, with the values the client reacts to spelled out.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Action {
    New,
    Updated,
    Delete,
    Read,
    Custom(String),
    #[default]
    Unspecified,
}

impl Action {
    pub fn as_str(&self) -> &str {
        match self {
            Self::New => "new",
            Self::Updated => "updated",
            Self::Delete => "delete",
            Self::Read => "read",
            Self::Custom(s) => s,
            Self::Unspecified => "",
        }
    }
}

impl From<String> for Action {
    fn from(s: String) -> Self {
        match s.as_str() {
            "new" => Self::New,
            "updated" => Self::Updated,
            "delete" => Self::Delete,
            "read" => Self::Read,
            "" => Self::Unspecified,
            _ => Self::Custom(s),
        }
    }
}

impl From<Action> for String {
    fn from(a: Action) -> Self {
        a.as_str().to_string()
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotationUpdate {
    pub action: Action,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quotation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contractor_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderUpdate {
    pub action: Action,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

/// A chat message between customer and dealer (`type: "message"`).
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectMessage {
    pub action: Action,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationUpdate {
    pub action: Action,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Site-wide notice. Both flags are independent and may arrive together.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemNotice {
    pub action: Action,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maintenance: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub announcement: Option<String>,
}

impl MessageBody {
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Quotation(_) => MessageKind::Quotation,
            Self::Order(_) => MessageKind::Order,
            Self::Message(_) => MessageKind::Message,
            Self::Notification(_) => MessageKind::Notification,
            Self::System(_) => MessageKind::System,
            Self::Heartbeat => MessageKind::Heartbeat,
            Self::Other(_) => MessageKind::Other,
        }
    }

    /// How this message moves its kind's badge counter.
    ///
    /// Removal is spelled `delete` for quotations and orders but `read` for
    /// messages and notifications. The result is never clamped by callers.
    pub fn counter_delta(&self) -> i64 {
        match self {
            Self::Quotation(QuotationUpdate { action, .. })
            | Self::Order(OrderUpdate { action, .. }) => match action {
                Action::New => 1,
                Action::Delete => -1,
                _ => 0,
            },
            Self::Message(DirectMessage { action, .. })
            | Self::Notification(NotificationUpdate { action, .. }) => match action {
                Action::New => 1,
                Action::Read => -1,
                _ => 0,
            },
            _ => 0,
        }
    }
}

impl InboundMessage {
    pub fn new(body: MessageBody) -> Self {
        Self { id: None, body }
    }

    pub fn with_id(mut self, id: i64) -> Self {
        self.id = Some(id);
        self
    }

    pub fn kind(&self) -> MessageKind {
        self.body.kind()
    }

    /// Decode from raw JSON text. Only fails if the text is not JSON.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        let value: Value = serde_json::from_str(text)?;
        Ok(Self::from(value))
    }
}

/// Text field. Numbers and booleans are rendered; other types read as absent.
fn text(value: &Value, key: &str) -> Option<String> {
    match value.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Numeric field. Numeric strings such as `"1200"` are accepted.
fn number(value: &Value, key: &str) -> Option<f64> {
    match value.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Sequence id. Whole-number floats count; anything else is no id.
fn sequence_id(value: &Value) -> Option<i64> {
    let id = value.get("id")?;
    id.as_i64().or_else(|| {
        id.as_f64()
            .filter(|f| f.fract() == 0.0 && *f >= i64::MIN as f64 && *f <= i64::MAX as f64)
            .map(|f| f as i64)
    })
}

fn action(value: &Value) -> Action {
    match value.get("action") {
        Some(Value::String(s)) => Action::from(s.clone()),
        _ => Action::Unspecified,
    }
}

impl From<&Value> for QuotationUpdate {
    fn from(value: &Value) -> Self {
        Self {
            action: action(value),
            quotation_id: text(value, "quotationId"),
            contractor_name: text(value, "contractorName"),
            project_title: text(value, "projectTitle"),
            price: number(value, "price"),
        }
    }
}

impl From<&Value> for OrderUpdate {
    fn from(value: &Value) -> Self {
        Self {
            action: action(value),
            order_id: text(value, "orderId"),
            status: text(value, "status"),
        }
    }
}

impl From<&Value> for DirectMessage {
    fn from(value: &Value) -> Self {
        Self {
            action: action(value),
            sender: text(value, "sender"),
            preview: text(value, "preview"),
        }
    }
}

impl From<&Value> for NotificationUpdate {
    fn from(value: &Value) -> Self {
        Self {
            action: action(value),
            title: text(value, "title"),
            message: text(value, "message"),
        }
    }
}

impl From<&Value> for SystemNotice {
    fn from(value: &Value) -> Self {
        Self {
            action: action(value),
            maintenance: text(value, "maintenance"),
            announcement: text(value, "announcement"),
        }
    }
}

impl From<Value> for InboundMessage {
    fn from(value: Value) -> Self {
        let id = sequence_id(&value);
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .map(MessageKind::from_wire)
            .unwrap_or(MessageKind::Other);

        let body = match kind {
            MessageKind::Quotation => MessageBody::Quotation((&value).into()),
            MessageKind::Order => MessageBody::Order((&value).into()),
            MessageKind::Message => MessageBody::Message((&value).into()),
            MessageKind::Notification => MessageBody::Notification((&value).into()),
            MessageKind::System => MessageBody::System((&value).into()),
            MessageKind::Heartbeat => MessageBody::Heartbeat,
            MessageKind::Other => MessageBody::Other(value),
        };

        Self { id, body }
    }
}

impl From<InboundMessage> for Value {
    fn from(msg: InboundMessage) -> Self {
        let kind = msg.kind();
        let mut value = match msg.body {
            MessageBody::Quotation(p) => serde_json::to_value(p),
            MessageBody::Order(p) => serde_json::to_value(p),
            MessageBody::Message(p) => serde_json::to_value(p),
            MessageBody::Notification(p) => serde_json::to_value(p),
            MessageBody::System(p) => serde_json::to_value(p),
            MessageBody::Heartbeat => Ok(Value::Object(Map::new())),
            MessageBody::Other(raw) => Ok(raw),
        }
        .unwrap_or(Value::Null);

        if let Value::Object(map) = &mut value {
            if let Some(name) = kind.wire_name() {
                map.insert("type".into(), Value::from(name));
            }
            if let Some(id) = msg.id {
                map.insert("id".into(), Value::from(id));
            }
        }
        value
    }
}
