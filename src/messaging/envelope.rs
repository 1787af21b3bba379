//! Typed message envelopes exchanged between contexts.
//!
//! On the wire an envelope is `{type, target, data}`. Inside the process it
//! is a tagged union so every context matches exhaustively on what it can
//! receive.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::capture::{CaptureError, RecordingArtifact};
use crate::config::ConfigPatch;
use crate::session::SessionSnapshot;
use crate::tabs::{CaptureTarget, TabId};

/// Addressable execution context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Target {
    /// Owner of the session state machine.
    Background,
    /// Ephemeral context running the audio encoders.
    CaptureHost,
    Popup,
    /// Page observer embedded in one tab.
    Page(TabId),
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Background => write!(f, "background"),
            Target::CaptureHost => write!(f, "capture_host"),
            Target::Popup => write!(f, "popup"),
            Target::Page(tab) => write!(f, "page:{}", tab),
        }
    }
}

impl FromStr for Target {
    type Err = EnvelopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "background" => Ok(Target::Background),
            "capture_host" | "offscreen" => Ok(Target::CaptureHost),
            "popup" => Ok(Target::Popup),
            other => other
                .strip_prefix("page:")
                .and_then(|tab| tab.parse().ok())
                .map(Target::Page)
                .ok_or_else(|| EnvelopeError::UnknownTarget(other.to_string())),
        }
    }
}

impl TryFrom<String> for Target {
    type Error = EnvelopeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Target> for String {
    fn from(target: Target) -> Self {
        target.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EnvelopeError {
    #[error("unknown message type: {0}")]
    UnknownType(String),
    #[error("unknown target: {0}")]
    UnknownTarget(String),
    #[error("invalid {kind} payload: {reason}")]
    InvalidPayload { kind: &'static str, reason: String },
}

/// Participant list pushed by a page observer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantsUpdate {
    pub participants: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meeting_title: Option<String>,
}

impl ParticipantsUpdate {
    /// Lenient parse: anything that is not a list of names degrades to an
    /// empty list; non-string entries are dropped.
    pub fn from_value(data: &Value) -> Self {
        let participants = data
            .get("participants")
            .and_then(Value::as_array)
            .map(|names| {
                let mut seen = Vec::new();
                for name in names.iter().filter_map(Value::as_str) {
                    let name = name.trim();
                    if !name.is_empty() && !seen.iter().any(|n: &String| n == name) {
                        seen.push(name.to_string());
                    }
                }
                seen
            })
            .unwrap_or_default();

        let meeting_title = data
            .get("meetingTitle")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|title| !title.is_empty())
            .map(String::from);

        Self {
            participants,
            meeting_title,
        }
    }
}

/// Payload of `START_RECORDING`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRecording {
    pub capture_target: CaptureTarget,
    pub tab_id: TabId,
    pub title: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    GetState,
    ToggleRecording,
    TakeScreenshot,
    UpdateConfig(ConfigPatch),
    ParticipantsUpdate(ParticipantsUpdate),
    GetParticipants,
    StartRecording(StartRecording),
    StopRecording,
}

impl Message {
    pub fn kind(&self) -> &'static str {
        match self {
            Message::GetState => "GET_STATE",
            Message::ToggleRecording => "TOGGLE_RECORDING",
            Message::TakeScreenshot => "TAKE_SCREENSHOT",
            Message::UpdateConfig(_) => "UPDATE_CONFIG",
            Message::ParticipantsUpdate(_) => "PARTICIPANTS_UPDATE",
            Message::GetParticipants => "GET_PARTICIPANTS",
            Message::StartRecording(_) => "START_RECORDING",
            Message::StopRecording => "STOP_RECORDING",
        }
    }

    fn data(&self) -> Value {
        match self {
            Message::UpdateConfig(patch) => serde_json::to_value(patch).unwrap_or(Value::Null),
            Message::ParticipantsUpdate(update) => {
                serde_json::to_value(update).unwrap_or(Value::Null)
            }
            Message::StartRecording(start) => serde_json::to_value(start).unwrap_or(Value::Null),
            _ => Value::Null,
        }
    }

    fn from_parts(kind: &str, data: Value) -> Result<Self, EnvelopeError> {
        Ok(match kind {
            "GET_STATE" => Message::GetState,
            "TOGGLE_RECORDING" => Message::ToggleRecording,
            "TAKE_SCREENSHOT" => Message::TakeScreenshot,
            // A malformed patch is an empty patch: nothing changes.
            "UPDATE_CONFIG" => Message::UpdateConfig(serde_json::from_value(data).unwrap_or_default()),
            "PARTICIPANTS_UPDATE" => {
                Message::ParticipantsUpdate(ParticipantsUpdate::from_value(&data))
            }
            "GET_PARTICIPANTS" => Message::GetParticipants,
            "START_RECORDING" => Message::StartRecording(serde_json::from_value(data).map_err(
                |e| EnvelopeError::InvalidPayload {
                    kind: "START_RECORDING",
                    reason: e.to_string(),
                },
            )?),
            "STOP_RECORDING" => Message::StopRecording,
            other => return Err(EnvelopeError::UnknownType(other.to_string())),
        })
    }
}

/// Wire form of an envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawEnvelope {
    #[serde(rename = "type")]
    pub kind: String,
    pub target: Target,
    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawEnvelope", into = "RawEnvelope")]
pub struct Envelope {
    pub target: Target,
    pub message: Message,
}

impl Envelope {
    pub fn new(target: Target, message: Message) -> Self {
        Self { target, message }
    }

    pub fn to_background(message: Message) -> Self {
        Self::new(Target::Background, message)
    }

    pub fn kind(&self) -> &'static str {
        self.message.kind()
    }
}

impl TryFrom<RawEnvelope> for Envelope {
    type Error = EnvelopeError;

    fn try_from(raw: RawEnvelope) -> Result<Self, Self::Error> {
        Ok(Self {
            target: raw.target,
            message: Message::from_parts(&raw.kind, raw.data)?,
        })
    }
}

impl From<Envelope> for RawEnvelope {
    fn from(envelope: Envelope) -> Self {
        Self {
            kind: envelope.kind().to_string(),
            target: envelope.target,
            data: envelope.message.data(),
        }
    }
}

/// Response to a request envelope.
#[derive(Debug, Clone)]
pub enum Reply {
    State(SessionSnapshot),
    Recording(bool),
    ScreenshotCount(usize),
    ConfigUpdated,
    Participants(ParticipantsUpdate),
    /// Capture host acknowledged `START_RECORDING`.
    CaptureStarted,
    Artifacts(RecordingArtifact),
    CaptureFailed(CaptureError),
    /// Request refused by a guard (busy, wrong sender, nothing to do).
    Rejected(String),
}

impl Reply {
    /// JSON form used by the local API bridge. Audio bytes are summarised,
    /// never inlined.
    pub fn to_json(&self) -> Value {
        match self {
            Reply::State(snapshot) => json!({ "state": snapshot }),
            Reply::Recording(recording) => json!({ "recording": recording }),
            Reply::ScreenshotCount(count) => json!({ "screenshotCount": count }),
            Reply::ConfigUpdated => json!({ "success": true }),
            Reply::Participants(update) => json!(update),
            Reply::CaptureStarted => json!({ "success": true }),
            Reply::Artifacts(artifact) => json!({
                "success": true,
                "micBytes": artifact.mic.bytes.len(),
                "tabBytes": artifact.tab.bytes.len(),
            }),
            Reply::CaptureFailed(err) => json!({ "success": false, "error": err.to_string() }),
            Reply::Rejected(reason) => json!({ "success": false, "error": reason }),
        }
    }
}
