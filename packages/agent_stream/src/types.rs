use chrono::{DateTime, Utc};
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Function name the agent uses to put a multiple-choice question to the user.
pub const ASK_QUESTION: &str = "askQuestion";

/// Function name the agent uses to run a shell command on the user's behalf.
pub const EXECUTE_COMMAND: &str = "executeCommand";

/// One structured unit of agent output, tagged on the wire by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Entity {
    /// Chat text delta.
    #[serde(rename = "TXT")]
    Text {
        #[serde(rename = "text", default, deserialize_with = "null_as_default")]
        content: String,
        #[serde(rename = "isLast", default)]
        is_final: bool,
    },
    /// Reasoning trace delta. Merges exactly like `Text`.
    #[serde(rename = "TH")]
    Thinking {
        #[serde(rename = "text", default, deserialize_with = "null_as_default")]
        content: String,
        #[serde(rename = "isLast", default)]
        is_final: bool,
    },
    #[serde(rename = "FC")]
    FunctionCall(FunctionCall),
    #[serde(rename = "FR")]
    FunctionResult(FunctionResult),
    /// Raw terminal I/O or a resize handshake.
    #[serde(rename = "TERMINAL")]
    Terminal(TerminalFrame),
    /// Catch-all for entity types this client does not know
    #[serde(other)]
    Unknown,
}

impl Entity {
    pub fn text(content: impl Into<String>, is_final: bool) -> Self {
        Entity::Text {
            content: content.into(),
            is_final,
        }
    }

    pub fn thinking(content: impl Into<String>, is_final: bool) -> Self {
        Entity::Thinking {
            content: content.into(),
            is_final,
        }
    }

    /// The wire tag this entity travels under.
    pub fn tag(&self) -> &'static str {
        match self {
            Entity::Text { .. } => "TXT",
            Entity::Thinking { .. } => "TH",
            Entity::FunctionCall(_) => "FC",
            Entity::FunctionResult(_) => "FR",
            Entity::Terminal(_) => "TERMINAL",
            Entity::Unknown => "UNKNOWN",
        }
    }

    /// Whether this part is complete: a final text/thinking delta or a call
    /// with its result attached.
    pub fn is_sealed(&self) -> bool {
        match self {
            Entity::Text { is_final, .. } | Entity::Thinking { is_final, .. } => *is_final,
            Entity::FunctionCall(call) => call.result.is_some(),
            _ => false,
        }
    }

    pub fn as_function_call(&self) -> Option<&FunctionCall> {
        match self {
            Entity::FunctionCall(call) => Some(call),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub arguments: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
}

impl FunctionCall {
    pub fn new(name: impl Into<String>, arguments: Map<String, Value>) -> Self {
        Self {
            name: name.into(),
            arguments,
            result: None,
        }
    }

    /// String argument by key, if present and a string.
    pub fn str_argument(&self, key: &str) -> Option<&str> {
        self.arguments.get(key).and_then(Value::as_str)
    }
}

/// Closes out an earlier [`FunctionCall`] with the same name.
///
/// The service either names the function directly or echoes the originating
/// call as `call: { name, .. }`; both decode to `name`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawFunctionResult")]
pub struct FunctionResult {
    pub name: String,
    pub result: String,
}

impl FunctionResult {
    pub fn new(name: impl Into<String>, result: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            result: result.into(),
        }
    }
}

#[derive(Deserialize)]
struct RawFunctionResult {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    call: Option<CallRef>,
    #[serde(default)]
    result: Option<Value>,
}

#[derive(Deserialize)]
struct CallRef {
    #[serde(default)]
    name: Option<String>,
}

impl TryFrom<RawFunctionResult> for FunctionResult {
    type Error = String;

    fn try_from(raw: RawFunctionResult) -> Result<Self, Self::Error> {
        let name = raw
            .name
            .or_else(|| raw.call.and_then(|c| c.name))
            .ok_or_else(|| "function result has no name".to_string())?;
        let result = match raw.result {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(s)) => s,
            Some(other) => other.to_string(),
        };
        Ok(Self { name, result })
    }
}

/// Terminal traffic: `output` carries bytes to or from the remote shell,
/// `columns`/`rows` carry a resize handshake.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalFrame {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(
        default,
        deserialize_with = "lenient_dimension",
        skip_serializing_if = "Option::is_none"
    )]
    pub columns: Option<u16>,
    #[serde(
        default,
        deserialize_with = "lenient_dimension",
        skip_serializing_if = "Option::is_none"
    )]
    pub rows: Option<u16>,
}

impl TerminalFrame {
    pub fn output(data: impl Into<String>) -> Self {
        Self {
            output: Some(data.into()),
            ..Default::default()
        }
    }

    pub fn resize(columns: u16, rows: u16) -> Self {
        Self {
            output: None,
            columns: Some(columns),
            rows: Some(rows),
        }
    }
}

/// An inbound frame: the stream id grouping one agent turn plus one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// `None` for the first frame of a turn whose id is not yet known.
    #[serde(rename = "id", default)]
    pub stream_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
    pub entity: Entity,
}

impl Envelope {
    pub fn new(stream_id: Option<&str>, entity: Entity) -> Self {
        Self {
            stream_id: stream_id.map(str::to_string),
            metadata: None,
            entity,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Bot,
}

/// One transcript entry: a user submission or one agent turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: Option<String>,
    pub sender: Sender,
    pub timestamp: DateTime<Utc>,
    /// Placeholder still waiting for its first frame.
    pub is_loading: bool,
    pub parts: Vec<Entity>,
}

impl Message {
    pub fn last_part(&self) -> Option<&Entity> {
        self.parts.last()
    }

    pub fn is_sealed(&self) -> bool {
        self.last_part().is_some_and(Entity::is_sealed)
    }

    /// Concatenated text of all `Text` parts.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                Entity::Text { content, .. } => Some(content.as_str()),
                _ => None,
            })
            .collect()
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Dimension {
    Number(u16),
    Text(String),
}

// The service has sent sizes both as numbers and as numeric strings.
fn lenient_dimension<'de, D>(deserializer: D) -> Result<Option<u16>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Dimension>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Dimension::Number(n)) => Ok(Some(n)),
        Some(Dimension::Text(s)) => s
            .trim()
            .parse::<u16>()
            .map(Some)
            .map_err(|_| de::Error::custom(format!("invalid terminal dimension: {s:?}"))),
    }
}
