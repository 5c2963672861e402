//! Message envelope codec.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::error::{FabricError, Result};
use crate::health::snapshot::HealthSnapshot;

const MAX_TYPE_LEN: usize = 64;

/// Heartbeat payload carried by `ping` and `pong`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Heartbeat {
    #[serde(default = "Utc::now", deserialize_with = "lenient_timestamp")]
    pub timestamp: DateTime<Utc>,
    #[serde(default, alias = "client_id")]
    pub sender: String,
    /// Arrived as `heartbeat` / `heartbeat_response`; replies keep that naming.
    #[serde(skip)]
    pub legacy: bool,
}

impl Heartbeat {
    pub fn new(sender: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            sender: sender.into(),
            legacy: false,
        }
    }
}

/// Server greeting sent once per accepted connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Welcome {
    pub client_id: String,
    pub server_time: DateTime<Utc>,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionTest {
    #[serde(default)]
    pub data: Value,
}

/// Reply to `connection_test`; the echo travels under `data`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionTestResponse {
    pub data: ConnectionTestEcho,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionTestEcho {
    #[serde(deserialize_with = "lenient_timestamp")]
    pub received_at: DateTime<Utc>,
    #[serde(default)]
    pub echo_data: Value,
}

impl ConnectionTestResponse {
    pub fn echo(data: Value) -> Self {
        Self {
            data: ConnectionTestEcho {
                received_at: Utc::now(),
                echo_data: data,
            },
        }
    }
}

/// A message whose `type` this layer does not interpret.
#[derive(Debug, Clone, PartialEq)]
pub struct DomainMessage {
    kind: String,
    payload: Map<String, Value>,
}

impl DomainMessage {
    /// Build a domain message. Non-object payloads are wrapped under `data`.
    pub fn new(kind: impl Into<String>, payload: Value) -> Result<Self> {
        let kind = kind.into();
        validate_type(&kind)?;
        if is_reserved(&kind) {
            return Err(FabricError::Parse(format!(
                "`{kind}` is a reserved message type"
            )));
        }
        let payload = match payload {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("data".to_string(), other);
                map
            }
        };
        Ok(Self { kind, payload })
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn payload(&self) -> &Map<String, Value> {
        &self.payload
    }
}

/// Tagged union of everything that travels over a connection.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    Ping(Heartbeat),
    Pong(Heartbeat),
    Welcome(Welcome),
    HealthStatus(HealthSnapshot),
    ConnectionTest(ConnectionTest),
    ConnectionTestResponse(ConnectionTestResponse),
    Domain(DomainMessage),
}

impl Envelope {
    pub fn ping(sender: impl Into<String>) -> Self {
        Envelope::Ping(Heartbeat::new(sender))
    }

    /// Answer a ping, echoing its timestamp so the peer can measure round trips.
    pub fn pong_for(ping: &Heartbeat, sender: impl Into<String>) -> Self {
        Envelope::Pong(Heartbeat {
            timestamp: ping.timestamp,
            sender: sender.into(),
            legacy: ping.legacy,
        })
    }

    pub fn domain(kind: impl Into<String>, payload: Value) -> Result<Self> {
        Ok(Envelope::Domain(DomainMessage::new(kind, payload)?))
    }

    /// The wire `type` of this envelope.
    pub fn message_type(&self) -> &str {
        match self {
            Envelope::Ping(hb) if hb.legacy => "heartbeat",
            Envelope::Pong(hb) if hb.legacy => "heartbeat_response",
            Envelope::Ping(_) => "ping",
            Envelope::Pong(_) => "pong",
            Envelope::Welcome(_) => "welcome",
            Envelope::HealthStatus(_) => "health_status",
            Envelope::ConnectionTest(_) => "connection_test",
            Envelope::ConnectionTestResponse(_) => "connection_test_response",
            Envelope::Domain(msg) => msg.kind(),
        }
    }

    /// Decode and validate a text frame.
    pub fn parse(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Self> {
        let mut object = match value {
            Value::Object(map) => map,
            other => {
                return Err(FabricError::Parse(format!(
                    "expected a JSON object, got {}",
                    json_kind(&other)
                )))
            }
        };

        let kind = match object.remove("type") {
            Some(Value::String(kind)) => kind,
            Some(other) => {
                return Err(FabricError::Parse(format!(
                    "`type` must be a string, got {}",
                    json_kind(&other)
                )))
            }
            None => return Err(FabricError::Parse("missing `type` field".to_string())),
        };
        validate_type(&kind)?;

        let envelope = match kind.as_str() {
            "ping" => Envelope::Ping(decode(object)?),
            "pong" => Envelope::Pong(decode(object)?),
            "heartbeat" => Envelope::Ping(decode_legacy(object)?),
            "heartbeat_response" => Envelope::Pong(decode_legacy(object)?),
            "welcome" => Envelope::Welcome(decode(object)?),
            "health_status" => Envelope::HealthStatus(decode(object)?),
            "connection_test" => Envelope::ConnectionTest(decode(object)?),
            "connection_test_response" => Envelope::ConnectionTestResponse(decode(object)?),
            _ => Envelope::Domain(DomainMessage {
                kind,
                payload: object,
            }),
        };
        Ok(envelope)
    }

    pub fn to_value(&self) -> Result<Value> {
        let body = match self {
            Envelope::Ping(hb) | Envelope::Pong(hb) => serde_json::to_value(hb)?,
            Envelope::Welcome(w) => serde_json::to_value(w)?,
            Envelope::HealthStatus(s) => serde_json::to_value(s)?,
            Envelope::ConnectionTest(t) => serde_json::to_value(t)?,
            Envelope::ConnectionTestResponse(r) => serde_json::to_value(r)?,
            Envelope::Domain(msg) => Value::Object(msg.payload.clone()),
        };
        let mut object = match body {
            Value::Object(map) => map,
            _ => return Err(FabricError::Internal("envelope body is not an object".into())),
        };
        object.insert(
            "type".to_string(),
            Value::String(self.message_type().to_string()),
        );
        Ok(Value::Object(object))
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.to_value()?)?)
    }
}

/// Anything that can be written to a connection as a text frame.
///
/// Strings pass through unchanged; structured values are serialized.
pub trait IntoWire {
    fn into_wire(self) -> Result<String>;
}

impl IntoWire for String {
    fn into_wire(self) -> Result<String> {
        Ok(self)
    }
}

impl IntoWire for &str {
    fn into_wire(self) -> Result<String> {
        Ok(self.to_string())
    }
}

impl IntoWire for &Envelope {
    fn into_wire(self) -> Result<String> {
        self.to_json()
    }
}

impl IntoWire for Envelope {
    fn into_wire(self) -> Result<String> {
        self.to_json()
    }
}

impl IntoWire for &Value {
    fn into_wire(self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

impl IntoWire for Value {
    fn into_wire(self) -> Result<String> {
        Ok(serde_json::to_string(&self)?)
    }
}

fn decode<T: serde::de::DeserializeOwned>(object: Map<String, Value>) -> Result<T> {
    Ok(serde_json::from_value(Value::Object(object))?)
}

fn decode_legacy(object: Map<String, Value>) -> Result<Heartbeat> {
    let mut heartbeat: Heartbeat = decode(object)?;
    heartbeat.legacy = true;
    Ok(heartbeat)
}

fn is_reserved(kind: &str) -> bool {
    matches!(
        kind,
        "ping"
            | "pong"
            | "heartbeat"
            | "heartbeat_response"
            | "welcome"
            | "health_status"
            | "connection_test"
            | "connection_test_response"
    )
}

fn validate_type(kind: &str) -> Result<()> {
    if kind.is_empty() {
        return Err(FabricError::Parse("`type` is empty".to_string()));
    }
    if kind.len() > MAX_TYPE_LEN {
        return Err(FabricError::Parse(format!(
            "`type` longer than {MAX_TYPE_LEN} characters"
        )));
    }
    let valid = kind
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | ':'));
    if !valid {
        return Err(FabricError::Parse(format!("malformed `type`: {kind:?}")));
    }
    Ok(())
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Accepts RFC 3339, naive ISO-8601 (assumed UTC) and epoch milliseconds.
/// Older peers send `datetime.isoformat()` without an offset.
fn lenient_timestamp<'de, D>(deserializer: D) -> std::result::Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    match value {
        Value::String(s) => {
            if let Ok(ts) = DateTime::parse_from_rfc3339(&s) {
                return Ok(ts.with_timezone(&Utc));
            }
            NaiveDateTime::parse_from_str(&s, "%Y-%m-%dT%H:%M:%S%.f")
                .map(|naive| naive.and_utc())
                .map_err(serde::de::Error::custom)
        }
        Value::Number(n) => n
            .as_i64()
            .and_then(DateTime::from_timestamp_millis)
            .ok_or_else(|| serde::de::Error::custom("timestamp out of range")),
        other => Err(serde::de::Error::custom(format!(
            "unsupported timestamp: {other}"
        ))),
    }
}
