//! # Lobby WebSocket Protocol
//!
//! JSON messages exchanged over `/ws/lobby`. Every text frame is one message
//! tagged by its `type` field. Recorded fragments travel as binary frames
//! holding an encoded WAV file and have no JSON envelope.
//!
//! ## Client → Server:
//! - `create_lobby`, `join_lobby`, `close_lobby`
//! - `choose_device_type`, `update_lobby_settings`
//! - `start_measurement`
//! - `ping`
//!
//! ## Server → Client:
//! - lobby state: `lobby_created`, `lobby_joined`, `role_assignment`,
//!   `lobby_settings`, `lobby_closed`
//! - device commands: `begin_recording`, `play_sound`, `end_recording`
//! - measurement status: `measurement_started`, `measurement_failed`,
//!   `measurement_cancelled`, `measurement_results`
//! - `error`, `ping`, `pong`

use crate::analysis::pipeline::ResultMatrix;
use serde::{de, Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Distances in meters, keyed by speaker index then microphone index.
pub type Distances = BTreeMap<usize, BTreeMap<usize, f64>>;

/// JSON object keys are strings; parse them back into device indices.
fn distances_from_json<'de, D>(deserializer: D) -> Result<Option<Distances>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<BTreeMap<String, BTreeMap<String, f64>>> = Option::deserialize(deserializer)?;
    let parse = |key: &str| -> Result<usize, D::Error> {
        key.parse::<usize>()
            .map_err(|_| de::Error::custom(format!("invalid device index {:?}", key)))
    };

    raw.map(|rows| {
        rows.iter()
            .map(|(speaker, row)| {
                let row = row
                    .iter()
                    .map(|(mic, meters)| Ok((parse(mic)?, *meters)))
                    .collect::<Result<BTreeMap<_, _>, D::Error>>()?;
                Ok((parse(speaker)?, row))
            })
            .collect::<Result<Distances, D::Error>>()
    })
    .transpose()
}

/// Role a connected device plays during a measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceRole {
    Microphone,
    Speaker,
}

/// Messages sent by clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Create a lobby and become its host.
    CreateLobby {
        user_id: String,
        #[serde(default)]
        repetitions: Option<u32>,
        /// Seconds between cycles.
        #[serde(default)]
        delay: Option<f64>,
        #[serde(default, deserialize_with = "distances_from_json")]
        distances: Option<Distances>,
    },

    JoinLobby {
        lobby_id: String,
        user_id: String,
    },

    /// Move this connection to `device` at slot `index`.
    ChooseDeviceType { device: DeviceRole, index: usize },

    /// Host only; fields left out keep their current value.
    UpdateLobbySettings {
        #[serde(default)]
        repetitions: Option<u32>,
        #[serde(default)]
        delay: Option<f64>,
        #[serde(default, deserialize_with = "distances_from_json")]
        distances: Option<Distances>,
    },

    StartMeasurement,

    CloseLobby,

    Ping { timestamp: u64 },
}

/// Messages sent by the server.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    LobbyCreated {
        lobby_id: String,
    },

    LobbyJoined {
        lobby_id: String,
        is_host: bool,
    },

    /// Full slot index sets for both roles, in list order.
    RoleAssignment {
        microphones: Vec<usize>,
        speakers: Vec<usize>,
    },

    LobbySettings {
        repetitions: u32,
        delay: f64,
        distances: Distances,
    },

    BeginRecording {
        cycle: u32,
    },

    PlaySound {
        cycle: u32,
        speaker_index: usize,
    },

    EndRecording {
        cycle: u32,
    },

    MeasurementStarted {
        repetitions: u32,
    },

    MeasurementFailed {
        reason: String,
        message: String,
    },

    MeasurementCancelled {
        reason: String,
    },

    MeasurementResults {
        measurement_id: String,
        center_frequencies: Vec<f64>,
        /// `values[cycle][microphone]`
        values: Arc<ResultMatrix>,
    },

    LobbyClosed {
        reason: String,
    },

    Error {
        code: String,
        message: String,
    },

    Ping {
        timestamp: u64,
    },

    Pong {
        timestamp: u64,
    },
}

impl ServerMessage {
    /// Event name as it appears in the `type` field.
    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::LobbyCreated { .. } => "lobby_created",
            ServerMessage::LobbyJoined { .. } => "lobby_joined",
            ServerMessage::RoleAssignment { .. } => "role_assignment",
            ServerMessage::LobbySettings { .. } => "lobby_settings",
            ServerMessage::BeginRecording { .. } => "begin_recording",
            ServerMessage::PlaySound { .. } => "play_sound",
            ServerMessage::EndRecording { .. } => "end_recording",
            ServerMessage::MeasurementStarted { .. } => "measurement_started",
            ServerMessage::MeasurementFailed { .. } => "measurement_failed",
            ServerMessage::MeasurementCancelled { .. } => "measurement_cancelled",
            ServerMessage::MeasurementResults { .. } => "measurement_results",
            ServerMessage::LobbyClosed { .. } => "lobby_closed",
            ServerMessage::Error { .. } => "error",
            ServerMessage::Ping { .. } => "ping",
            ServerMessage::Pong { .. } => "pong",
        }
    }

    pub fn error(code: &str, message: impl Into<String>) -> Self {
        ServerMessage::Error {
            code: code.to_string(),
            message: message.into(),
        }
    }
}
