//! The message contract between the host thread and the UI.
//!
//! Everything crossing the boundary travels as an [`Envelope`]: a channel name plus JSON
//! arguments. A name only means something once [`Channel::parse`] has matched it against
//! the closed set of channels below; anything else is refused before it is forwarded.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};
use thiserror::Error;

use crate::host::performance::{PerformanceAlert, PerformanceSnapshot};
use crate::storage::{DeviceInfo, Note, NoteInfo, StoreError, StoreErrorKind};

mod client;

pub use client::{BridgeClient, PendingReply, WindowEvents};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, EnumString, IntoStaticStr,
)]
pub enum Channel {
    #[strum(serialize = "getNotes")]
    GetNotes,
    #[strum(serialize = "readNote")]
    ReadNote,
    #[strum(serialize = "writeNote")]
    WriteNote,
    #[strum(serialize = "createNote")]
    CreateNote,
    #[strum(serialize = "deleteNote")]
    DeleteNote,
    #[strum(serialize = "getDeviceInfo")]
    GetDeviceInfo,
    #[strum(serialize = "openDevTool")]
    OpenDevTool,
    #[strum(serialize = "openUrl")]
    OpenUrl,
    #[strum(serialize = "openExternalUrl")]
    OpenExternalUrl,
    #[strum(serialize = "openSecondaryWindow")]
    OpenSecondaryWindow,
    #[strum(serialize = "main-process-message")]
    MainProcessMessage,
    #[strum(serialize = "onUpdateMessage")]
    UpdateMessage,
    #[strum(serialize = "secondary-process-message")]
    SecondaryProcessMessage,
    #[strum(serialize = "performance-data")]
    PerformanceData,
    #[strum(serialize = "performance-alert")]
    PerformanceAlert,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "kebab-case")]
pub enum Direction {
    /// UI asks, host answers.
    Invoke,
    /// UI tells, host never answers.
    Send,
    /// Host tells, UI never answers.
    Push,
}

impl Channel {
    pub fn parse(name: &str) -> Result<Self, BridgeError> {
        name.parse()
            .map_err(|_| BridgeError::ChannelNotAllowed(name.to_string()))
    }

    pub fn name(self) -> &'static str {
        self.into()
    }

    pub fn direction(self) -> Direction {
        match self {
            Channel::GetNotes
            | Channel::ReadNote
            | Channel::WriteNote
            | Channel::CreateNote
            | Channel::DeleteNote
            | Channel::GetDeviceInfo
            | Channel::OpenDevTool => Direction::Invoke,
            Channel::OpenUrl | Channel::OpenExternalUrl | Channel::OpenSecondaryWindow => {
                Direction::Send
            }
            Channel::MainProcessMessage
            | Channel::UpdateMessage
            | Channel::SecondaryProcessMessage
            | Channel::PerformanceData
            | Channel::PerformanceAlert => Direction::Push,
        }
    }

    pub fn expect(self, expected: Direction) -> Result<Self, BridgeError> {
        let actual = self.direction();
        if actual == expected {
            Ok(self)
        } else {
            Err(BridgeError::WrongDirection {
                channel: self,
                expected,
                actual,
            })
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BridgeError {
    #[error("Channel \"{0}\" is not allowed.")]
    ChannelNotAllowed(String),
    #[error("channel {channel} is a {actual} channel, not {expected}")]
    WrongDirection {
        channel: Channel,
        expected: Direction,
        actual: Direction,
    },
    #[error("invalid arguments for {channel}: {reason}")]
    InvalidArguments { channel: Channel, reason: String },
    #[error("{channel} failed: {message}")]
    Store {
        channel: Channel,
        kind: StoreErrorKind,
        message: String,
    },
    #[error("timed out waiting for a reply on {channel}")]
    Timeout { channel: Channel },
    #[error("unexpected reply on {channel}")]
    UnexpectedResponse { channel: Channel },
    #[error("host process is not running")]
    Disconnected,
}

impl BridgeError {
    pub fn from_store(channel: Channel, err: &StoreError) -> Self {
        BridgeError::Store {
            channel,
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// Raw wire form of one message, mirroring `invoke(channel, ...args)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub channel: String,
    #[serde(default)]
    pub args: Vec<Value>,
}

impl Envelope {
    pub fn new(channel: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            channel: channel.into(),
            args,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    GetNotes,
    ReadNote { title: String },
    WriteNote { title: String, content: String },
    CreateNote,
    DeleteNote { title: String },
    GetDeviceInfo,
    OpenDevTool,
}

impl Request {
    pub fn channel(&self) -> Channel {
        match self {
            Request::GetNotes => Channel::GetNotes,
            Request::ReadNote { .. } => Channel::ReadNote,
            Request::WriteNote { .. } => Channel::WriteNote,
            Request::CreateNote => Channel::CreateNote,
            Request::DeleteNote { .. } => Channel::DeleteNote,
            Request::GetDeviceInfo => Channel::GetDeviceInfo,
            Request::OpenDevTool => Channel::OpenDevTool,
        }
    }

    pub fn to_envelope(&self) -> Envelope {
        let args = match self {
            Request::GetNotes
            | Request::CreateNote
            | Request::GetDeviceInfo
            | Request::OpenDevTool => Vec::new(),
            Request::ReadNote { title } | Request::DeleteNote { title } => vec![json!(title)],
            Request::WriteNote { title, content } => vec![json!(title), json!(content)],
        };
        Envelope::new(self.channel().name(), args)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    OpenUrl { url: String },
    OpenExternalUrl { url: String },
    OpenSecondaryWindow { note: Note },
}

impl Command {
    pub fn channel(&self) -> Channel {
        match self {
            Command::OpenUrl { .. } => Channel::OpenUrl,
            Command::OpenExternalUrl { .. } => Channel::OpenExternalUrl,
            Command::OpenSecondaryWindow { .. } => Channel::OpenSecondaryWindow,
        }
    }

    pub fn to_envelope(&self) -> Envelope {
        let args = match self {
            Command::OpenUrl { url } | Command::OpenExternalUrl { url } => vec![json!(url)],
            Command::OpenSecondaryWindow { note } => {
                vec![serde_json::to_value(note).unwrap_or_default()]
            }
        };
        Envelope::new(self.channel().name(), args)
    }
}

/// A decoded message from the UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Invoke(Request),
    Send(Command),
}

impl Inbound {
    /// Decodes `envelope` only when its channel travels in the `expected` direction.
    pub fn decode_as(envelope: &Envelope, expected: Direction) -> Result<Self, BridgeError> {
        Channel::parse(&envelope.channel)?.expect(expected)?;
        Self::decode(envelope)
    }

    pub fn decode(envelope: &Envelope) -> Result<Self, BridgeError> {
        let channel = Channel::parse(&envelope.channel)?;
        let args = &envelope.args;
        let inbound = match channel {
            Channel::GetNotes => Inbound::Invoke(Request::GetNotes),
            Channel::ReadNote => Inbound::Invoke(Request::ReadNote {
                title: arg(channel, args, 0)?,
            }),
            Channel::WriteNote => Inbound::Invoke(Request::WriteNote {
                title: arg(channel, args, 0)?,
                content: arg(channel, args, 1)?,
            }),
            Channel::CreateNote => Inbound::Invoke(Request::CreateNote),
            Channel::DeleteNote => Inbound::Invoke(Request::DeleteNote {
                title: arg(channel, args, 0)?,
            }),
            Channel::GetDeviceInfo => Inbound::Invoke(Request::GetDeviceInfo),
            Channel::OpenDevTool => Inbound::Invoke(Request::OpenDevTool),
            Channel::OpenUrl => Inbound::Send(Command::OpenUrl {
                url: arg(channel, args, 0)?,
            }),
            Channel::OpenExternalUrl => Inbound::Send(Command::OpenExternalUrl {
                url: arg(channel, args, 0)?,
            }),
            Channel::OpenSecondaryWindow => Inbound::Send(Command::OpenSecondaryWindow {
                note: arg(channel, args, 0)?,
            }),
            Channel::MainProcessMessage
            | Channel::UpdateMessage
            | Channel::SecondaryProcessMessage
            | Channel::PerformanceData
            | Channel::PerformanceAlert => {
                return Err(BridgeError::WrongDirection {
                    channel,
                    expected: Direction::Invoke,
                    actual: Direction::Push,
                })
            }
        };
        Ok(inbound)
    }
}

fn arg<T: DeserializeOwned>(channel: Channel, args: &[Value], index: usize) -> Result<T, BridgeError> {
    let value = args.get(index).ok_or_else(|| BridgeError::InvalidArguments {
        channel,
        reason: format!("missing argument {index}"),
    })?;
    T::deserialize(value).map_err(|err| BridgeError::InvalidArguments {
        channel,
        reason: format!("argument {index}: {err}"),
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Notes(Vec<NoteInfo>),
    Content(String),
    Written,
    /// `None` when the user cancelled or picked a location outside the notes root.
    Created(Option<String>),
    Deleted(bool),
    Device(DeviceInfo),
    DevToolsOpened,
}

impl Response {
    /// JSON result as the UI script would see it; a cancelled create is `false`.
    pub fn into_value(self) -> Value {
        match self {
            Response::Notes(notes) => serde_json::to_value(notes).unwrap_or_default(),
            Response::Content(content) => Value::String(content),
            Response::Written | Response::DevToolsOpened => Value::Null,
            Response::Created(Some(title)) => Value::String(title),
            Response::Created(None) => Value::Bool(false),
            Response::Deleted(deleted) => Value::Bool(deleted),
            Response::Device(device) => serde_json::to_value(device).unwrap_or_default(),
        }
    }
}

/// Host-to-UI notifications. None of them is acknowledged.
#[derive(Debug, Clone, PartialEq)]
pub enum PushEvent {
    MainProcessMessage(String),
    UpdateMessage(String),
    SecondaryWindowData(Note),
    PerformanceData(PerformanceSnapshot),
    PerformanceAlert(PerformanceAlert),
}

impl PushEvent {
    pub fn channel(&self) -> Channel {
        match self {
            PushEvent::MainProcessMessage(_) => Channel::MainProcessMessage,
            PushEvent::UpdateMessage(_) => Channel::UpdateMessage,
            PushEvent::SecondaryWindowData(_) => Channel::SecondaryProcessMessage,
            PushEvent::PerformanceData(_) => Channel::PerformanceData,
            PushEvent::PerformanceAlert(_) => Channel::PerformanceAlert,
        }
    }

    pub fn to_envelope(&self) -> Envelope {
        let payload = match self {
            PushEvent::MainProcessMessage(text) | PushEvent::UpdateMessage(text) => json!(text),
            PushEvent::SecondaryWindowData(note) => serde_json::to_value(note).unwrap_or_default(),
            PushEvent::PerformanceData(snapshot) => {
                serde_json::to_value(snapshot).unwrap_or_default()
            }
            PushEvent::PerformanceAlert(alert) => serde_json::to_value(alert).unwrap_or_default(),
        };
        Envelope::new(self.channel().name(), vec![payload])
    }
}

/// What travels from a [`BridgeClient`] to the host thread.
#[derive(Debug)]
pub enum HostMessage {
    Invoke {
        envelope: Envelope,
        reply: crossbeam_channel::Sender<Result<Response, BridgeError>>,
    },
    Send {
        envelope: Envelope,
    },
    Shutdown,
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use strum::IntoEnumIterator;

    #[test]
    fn allow_list_is_exactly_the_known_channels() {
        let listing = Channel::iter()
            .map(|channel| format!("{} ({})", channel.name(), channel.direction()))
            .collect::<Vec<_>>()
            .join("\n");
        insta::assert_snapshot!(listing, @r###"
        getNotes (invoke)
        readNote (invoke)
        writeNote (invoke)
        createNote (invoke)
        deleteNote (invoke)
        getDeviceInfo (invoke)
        openDevTool (invoke)
        openUrl (send)
        openExternalUrl (send)
        openSecondaryWindow (send)
        main-process-message (push)
        onUpdateMessage (push)
        secondary-process-message (push)
        performance-data (push)
        performance-alert (push)
        "###);
    }

    #[test]
    fn unknown_channel_names_are_refused() {
        for name in ["deleteAllNotes", "getnotes", "GetNotes", "", "some-data"] {
            let err = Inbound::decode(&Envelope::new(name, vec![])).unwrap_err();
            assert_eq!(err, BridgeError::ChannelNotAllowed(name.to_string()));
        }
        assert_eq!(
            BridgeError::ChannelNotAllowed("x".into()).to_string(),
            "Channel \"x\" is not allowed."
        );
    }

    #[test]
    fn push_channels_cannot_be_invoked() {
        let err = Inbound::decode(&Envelope::new("performance-data", vec![])).unwrap_err();
        assert_matches!(
            err,
            BridgeError::WrongDirection {
                channel: Channel::PerformanceData,
                actual: Direction::Push,
                ..
            }
        );
    }

    #[test]
    fn direction_errors_name_the_expected_direction() {
        let err = Inbound::decode_as(&Envelope::new("onUpdateMessage", vec![]), Direction::Send)
            .unwrap_err();
        assert_eq!(
            err,
            BridgeError::WrongDirection {
                channel: Channel::UpdateMessage,
                expected: Direction::Send,
                actual: Direction::Push,
            }
        );
        let err = Inbound::decode_as(
            &Envelope::new("openUrl", vec![json!("https://example.com")]),
            Direction::Invoke,
        )
        .unwrap_err();
        assert_matches!(
            err,
            BridgeError::WrongDirection {
                expected: Direction::Invoke,
                actual: Direction::Send,
                ..
            }
        );
    }

    #[test]
    fn malformed_arguments_are_refused() {
        let err = Inbound::decode(&Envelope::new("writeNote", vec![json!("t")])).unwrap_err();
        assert_matches!(
            err,
            BridgeError::InvalidArguments {
                channel: Channel::WriteNote,
                ..
            }
        );
        let err = Inbound::decode(&Envelope::new("readNote", vec![json!(42)])).unwrap_err();
        assert_matches!(err, BridgeError::InvalidArguments { .. });
    }

    #[test]
    fn typed_messages_survive_the_envelope() {
        let request = Request::WriteNote {
            title: "Plan".into(),
            content: "# Plan".into(),
        };
        assert_eq!(
            Inbound::decode(&request.to_envelope()),
            Ok(Inbound::Invoke(request))
        );

        let command = Command::OpenSecondaryWindow {
            note: Note {
                info: NoteInfo {
                    title: "Plan".into(),
                    last_edit_time: 7,
                },
                content: "body".into(),
            },
        };
        let envelope = command.to_envelope();
        assert_eq!(
            envelope.args[0],
            json!({"title": "Plan", "lastEditTime": 7, "content": "body"})
        );
        assert_eq!(Inbound::decode(&envelope), Ok(Inbound::Send(command)));
    }

    #[test]
    fn responses_render_as_script_values() {
        assert_eq!(Response::Created(None).into_value(), json!(false));
        assert_eq!(Response::Created(Some("A".into())).into_value(), json!("A"));
        assert_eq!(Response::Written.into_value(), Value::Null);
        assert_eq!(
            Response::Notes(vec![NoteInfo {
                title: "A".into(),
                last_edit_time: 1
            }])
            .into_value(),
            json!([{"title": "A", "lastEditTime": 1}])
        );
    }
}
