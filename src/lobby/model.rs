//! Lobby data model: lobbies, their device slots and per-connection sessions.

use super::{LobbyError, LobbyResult};
use crate::protocol::{DeviceRole, Distances};
use uuid::Uuid;

/// Identity of one WebSocket connection.
pub type ConnectionId = Uuid;

/// A device occupying one role slot in a lobby.
#[derive(Debug, Clone, PartialEq)]
pub struct LobbyClient {
    pub connection_id: ConnectionId,
    /// Role slot index.
    pub index: usize,
    /// Owner reference used when results are persisted.
    pub user_id: String,
}

/// Per-connection session, created on create/join and dropped on disconnect.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub lobby_id: String,
    pub is_host: bool,
    pub user_id: String,
}

/// One recorded fragment, tagged with the producing microphone's slot.
#[derive(Debug, Clone)]
pub struct RecordData {
    pub connection_id: ConnectionId,
    pub microphone_index: usize,
    /// Encoded WAV payload.
    pub recording: Vec<u8>,
}

/// Host-adjustable parameters of a lobby.
#[derive(Debug, Clone, PartialEq)]
pub struct LobbySettings {
    pub repetitions: u32,
    /// Seconds between cycles.
    pub delay: f64,
    pub distances: Distances,
}

/// Longest accepted pause between cycles, in seconds.
pub const MAX_DELAY_SECS: f64 = 3600.0;

impl LobbySettings {
    pub fn validate(&self) -> LobbyResult<()> {
        if self.repetitions == 0 {
            return Err(LobbyError::Validation(
                "repetitions must be at least 1".to_string(),
            ));
        }
        if !(self.delay.is_finite() && (0.0..=MAX_DELAY_SECS).contains(&self.delay)) {
            return Err(LobbyError::Validation(format!(
                "delay must be between 0 and {} seconds, got {}",
                MAX_DELAY_SECS, self.delay
            )));
        }
        if let Some(d) = self
            .distances
            .values()
            .flat_map(|row| row.values())
            .find(|d| !(d.is_finite() && **d >= 0.0))
        {
            return Err(LobbyError::Validation(format!(
                "distances must be non-negative meters, got {}",
                d
            )));
        }
        Ok(())
    }

    /// Apply the provided fields, keeping the rest.
    pub fn patched(&self, update: SettingsUpdate) -> Self {
        Self {
            repetitions: update.repetitions.unwrap_or(self.repetitions),
            delay: update.delay.unwrap_or(self.delay),
            distances: update.distances.unwrap_or_else(|| self.distances.clone()),
        }
    }
}

/// Partial settings sent with `create_lobby` or `update_lobby_settings`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SettingsUpdate {
    pub repetitions: Option<u32>,
    pub delay: Option<f64>,
    pub distances: Option<Distances>,
}

/// One measurement session's devices and parameters.
#[derive(Debug, Clone)]
pub struct Lobby {
    pub lobby_id: String,
    pub host: ConnectionId,
    pub host_user_id: String,
    pub microphones: Vec<LobbyClient>,
    pub speakers: Vec<LobbyClient>,
    pub settings: LobbySettings,
}

impl Lobby {
    pub fn new(lobby_id: String, host: ConnectionId, host_user_id: String, settings: LobbySettings) -> Self {
        Self {
            lobby_id,
            host,
            host_user_id,
            microphones: Vec::new(),
            speakers: Vec::new(),
            settings,
        }
    }

    pub fn devices(&self, role: DeviceRole) -> &[LobbyClient] {
        match role {
            DeviceRole::Microphone => &self.microphones,
            DeviceRole::Speaker => &self.speakers,
        }
    }

    pub fn devices_mut(&mut self, role: DeviceRole) -> &mut Vec<LobbyClient> {
        match role {
            DeviceRole::Microphone => &mut self.microphones,
            DeviceRole::Speaker => &mut self.speakers,
        }
    }

    /// Role and slot currently held by `connection_id`.
    pub fn role_of(&self, connection_id: &ConnectionId) -> Option<(DeviceRole, usize)> {
        [DeviceRole::Microphone, DeviceRole::Speaker]
            .into_iter()
            .find_map(|role| {
                self.devices(role)
                    .iter()
                    .find(|c| c.connection_id == *connection_id)
                    .map(|c| (role, c.index))
            })
    }

    /// Remove `connection_id` from whichever list holds it.
    pub fn remove_device(&mut self, connection_id: &ConnectionId) -> Option<(DeviceRole, LobbyClient)> {
        for role in [DeviceRole::Microphone, DeviceRole::Speaker] {
            let devices = self.devices_mut(role);
            if let Some(pos) = devices.iter().position(|c| c.connection_id == *connection_id) {
                return Some((role, devices.remove(pos)));
            }
        }
        None
    }

    /// Every connection that belongs to the lobby, host first.
    pub fn members(&self) -> Vec<ConnectionId> {
        let mut members = vec![self.host];
        for client in self.microphones.iter().chain(&self.speakers) {
            if !members.contains(&client.connection_id) {
                members.push(client.connection_id);
            }
        }
        members
    }

    /// Distinct owner references of the host and every device.
    pub fn participant_user_ids(&self) -> Vec<String> {
        let mut users = vec![self.host_user_id.clone()];
        for client in self.microphones.iter().chain(&self.speakers) {
            if !users.contains(&client.user_id) {
                users.push(client.user_id.clone());
            }
        }
        users
    }

    pub fn microphone_indices(&self) -> Vec<usize> {
        self.microphones.iter().map(|c| c.index).collect()
    }

    pub fn speaker_indices(&self) -> Vec<usize> {
        self.speakers.iter().map(|c| c.index).collect()
    }
}
