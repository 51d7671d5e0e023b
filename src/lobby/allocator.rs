//! Device role allocation.
//!
//! Joining devices are balanced between roles: a new connection becomes a
//! speaker while there are fewer speakers than microphones, otherwise a
//! microphone. Its slot index is the current size of that role's list.
//!
//! Explicit re-selection appends the connection at the requested index without
//! renumbering anything; gaps and duplicates surface at measurement preflight.

use super::model::{ConnectionId, Lobby, LobbyClient};
use crate::protocol::{DeviceRole, ServerMessage};
use tracing::debug;

/// Assign a role and slot to a connection joining `lobby`.
pub fn assign_on_join(lobby: &mut Lobby, connection_id: ConnectionId, user_id: String) -> (DeviceRole, usize) {
    let role = if lobby.speakers.len() < lobby.microphones.len() {
        DeviceRole::Speaker
    } else {
        DeviceRole::Microphone
    };

    let devices = lobby.devices_mut(role);
    let index = devices.len();
    devices.push(LobbyClient {
        connection_id,
        index,
        user_id,
    });

    debug!(lobby_id = %lobby.lobby_id, %connection_id, ?role, index, "Assigned role on join");
    (role, index)
}

/// Move `connection_id` to `role` at slot `index`.
pub fn choose_device(
    lobby: &mut Lobby,
    connection_id: ConnectionId,
    user_id: String,
    role: DeviceRole,
    index: usize,
) {
    let previous = lobby.remove_device(&connection_id);

    lobby.devices_mut(role).push(LobbyClient {
        connection_id,
        index,
        user_id,
    });

    debug!(
        lobby_id = %lobby.lobby_id,
        %connection_id,
        from = ?previous.map(|(r, c)| (r, c.index)),
        to = ?(role, index),
        "Device role changed"
    );
}

/// Current slot indices of both roles.
pub fn role_assignment(lobby: &Lobby) -> ServerMessage {
    ServerMessage::RoleAssignment {
        microphones: lobby.microphone_indices(),
        speakers: lobby.speaker_indices(),
    }
}

/// True when `indices` is exactly `{0, .., len - 1}` without duplicates.
pub fn is_contiguous(indices: &[usize]) -> bool {
    let mut seen = vec![false; indices.len()];
    for &index in indices {
        match seen.get_mut(index) {
            Some(slot) if !*slot => *slot = true,
            _ => return false,
        }
    }
    true
}
