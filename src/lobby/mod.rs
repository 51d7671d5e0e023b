//! # Lobby Coordination
//!
//! Coordinates distributed measurement sessions: one host, N speaker devices
//! and M microphone devices connected over WebSockets.
//!
//! ## Components:
//! - **registry**: process-wide [`SessionStore`] holding lobbies, sessions and
//!   running measurement handles behind a single lock
//! - **allocator**: speaker/microphone slot assignment
//! - **orchestrator**: the per-lobby measurement task (cycles, fragment
//!   collection, analysis, persistence)
//! - **lifecycle**: create/join/close and disconnect handling
//! - **transport**: outbound delivery to connections and lobby rooms
//!
//! ## Concurrency:
//! Lobby operations are synchronous and run under the store lock. The only
//! asynchronous piece is the measurement task, which owns the consumer side of
//! its lobby's fragment queue. Cancelling a measurement aborts the task and
//! releases everything it owned in one store transaction.

pub mod allocator;
pub mod lifecycle;
pub mod model;
pub mod orchestrator;
pub mod registry;
pub mod transport;

pub use model::ConnectionId;
pub use registry::SessionStore;
pub use transport::{ConnectionHub, Transport};

use crate::analysis::pipeline::AnalysisPipeline;
use crate::config::MeasurementConfig;
use crate::persistence::MeasurementStore;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Cancellation and close reasons sent to clients.
pub mod reasons {
    pub const PARTICIPANT_DISCONNECTED: &str = "participant_disconnected";
    pub const HOST_DISCONNECTED: &str = "host_disconnected";
    pub const HOST_CLOSED_LOBBY: &str = "host_closed_lobby";
    pub const MEASUREMENT_COMPLETED: &str = "measurement_completed";
    pub const MEASUREMENT_CANCELLED: &str = "measurement_cancelled";
    pub const MEASUREMENT_FAILED: &str = "measurement_failed";
    pub const ANALYSIS_FAILED: &str = "analysis_failed";
    pub const PERSISTENCE_FAILED: &str = "persistence_failed";
}

/// Rejections of lobby requests. Each carries a stable reason string.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LobbyError {
    #[error("A measurement is already running in lobby {0}")]
    SessionBusy(String),

    #[error("Lobby {0} does not exist")]
    LobbyNotFound(String),

    #[error("Connection is not part of a lobby")]
    NotInLobby,

    #[error("Connection already belongs to lobby {0}")]
    AlreadyInLobby(String),

    #[error("Only the host may {0}")]
    NotHost(&'static str),

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Lobby has no speakers")]
    NoSpeakers,

    #[error("Lobby has no microphones")]
    NoMicrophones,

    #[error("Speaker indices {0:?} do not form 0..{len}", len = .0.len())]
    SpeakerIndicesNotContiguous(Vec<usize>),

    #[error("Microphone indices {0:?} do not form 0..{len}", len = .0.len())]
    MicrophoneIndicesNotContiguous(Vec<usize>),

    #[error("Maximum of {0} concurrent lobbies reached")]
    LobbyLimitReached(usize),

    #[error("Only microphones may send recordings")]
    NotAMicrophone,

    #[error("No measurement is running in lobby {0}")]
    NoMeasurementRunning(String),
}

impl LobbyError {
    /// Machine-readable reason.
    pub fn reason(&self) -> &'static str {
        match self {
            LobbyError::SessionBusy(_) => "session_busy",
            LobbyError::LobbyNotFound(_) => "lobby_not_found",
            LobbyError::NotInLobby => "not_in_lobby",
            LobbyError::AlreadyInLobby(_) => "already_in_lobby",
            LobbyError::NotHost(_) => "not_host",
            LobbyError::Validation(_) => "validation_error",
            LobbyError::NoSpeakers => "no_speakers",
            LobbyError::NoMicrophones => "no_microphones",
            LobbyError::SpeakerIndicesNotContiguous(_) => "speaker_indices_not_contiguous",
            LobbyError::MicrophoneIndicesNotContiguous(_) => "microphone_indices_not_contiguous",
            LobbyError::LobbyLimitReached(_) => "lobby_limit_reached",
            LobbyError::NotAMicrophone => "not_a_microphone",
            LobbyError::NoMeasurementRunning(_) => "no_measurement_running",
        }
    }
}

pub type LobbyResult<T> = std::result::Result<T, LobbyError>;

/// Measurement counters exposed on `/api/v1/metrics`.
#[derive(Debug, Default)]
pub struct MeasurementStats {
    started: AtomicU64,
    completed: AtomicU64,
    cancelled: AtomicU64,
    failed: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct MeasurementStatsSnapshot {
    pub started: u64,
    pub completed: u64,
    pub cancelled: u64,
    pub failed: u64,
}

impl MeasurementStats {
    pub fn record_started(&self) {
        self.started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_completed(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cancelled(&self) {
        self.cancelled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MeasurementStatsSnapshot {
        MeasurementStatsSnapshot {
            started: self.started.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// Everything a lobby operation needs, captured once per request.
///
/// `settings` and `pipeline` are snapshots: a measurement keeps the values it
/// started with even if the configuration changes while it runs.
#[derive(Clone)]
pub struct LobbyContext {
    pub store: Arc<SessionStore>,
    pub transport: Arc<dyn Transport>,
    pub persistence: Arc<dyn MeasurementStore>,
    pub pipeline: Arc<AnalysisPipeline>,
    pub settings: MeasurementConfig,
    pub stats: Arc<MeasurementStats>,
}
