//! # Session Lifecycle
//!
//! Lobby requests that are not part of the measurement loop: creating and
//! joining lobbies, role changes, settings updates, explicit close, and the
//! teardown that follows a disconnect.
//!
//! Every function mutates the store under one lock and only emits messages
//! once the lock has been released.

use super::allocator;
use super::model::{ConnectionId, Lobby, LobbySettings, Session, SettingsUpdate};
use super::registry::ReleasedLobby;
use super::{reasons, LobbyContext, LobbyError, LobbyResult};
use crate::protocol::{DeviceRole, ServerMessage};
use tracing::{debug, info, warn};

fn settings_message(settings: &LobbySettings) -> ServerMessage {
    ServerMessage::LobbySettings {
        repetitions: settings.repetitions,
        delay: settings.delay,
        distances: settings.distances.clone(),
    }
}

/// Create a lobby with `connection_id` as host.
pub fn create_lobby(
    ctx: &LobbyContext,
    connection_id: ConnectionId,
    user_id: String,
    update: SettingsUpdate,
) -> LobbyResult<String> {
    if user_id.trim().is_empty() {
        return Err(LobbyError::Validation("user_id must not be empty".to_string()));
    }

    let defaults = LobbySettings {
        repetitions: ctx.settings.default_repetitions,
        delay: ctx.settings.default_delay_secs,
        distances: Default::default(),
    };
    let settings = defaults.patched(update);
    settings.validate()?;

    let lobby_id = {
        let mut store = ctx.store.lock();
        if let Ok(session) = store.session(&connection_id) {
            return Err(LobbyError::AlreadyInLobby(session.lobby_id.clone()));
        }
        let limit = ctx.settings.max_concurrent_lobbies;
        if store.lobby_count() >= limit {
            return Err(LobbyError::LobbyLimitReached(limit));
        }

        let host_user = user_id.clone();
        store.insert_lobby(
            |id| Lobby::new(id, connection_id, host_user, settings),
            |id| Session {
                lobby_id: id,
                is_host: true,
                user_id,
            },
            connection_id,
        )
    };

    info!(%lobby_id, %connection_id, "Lobby created");
    ctx.transport.join_room(&lobby_id, &connection_id);
    ctx.transport.emit_to(
        &connection_id,
        &ServerMessage::LobbyCreated {
            lobby_id: lobby_id.clone(),
        },
    );
    Ok(lobby_id)
}

/// Join an idle lobby and receive a role slot.
pub fn join_lobby(
    ctx: &LobbyContext,
    connection_id: ConnectionId,
    lobby_id: &str,
    user_id: String,
) -> LobbyResult<(DeviceRole, usize)> {
    if user_id.trim().is_empty() {
        return Err(LobbyError::Validation("user_id must not be empty".to_string()));
    }

    let (assigned, assignment) = {
        let mut store = ctx.store.lock();
        if let Ok(session) = store.session(&connection_id) {
            return Err(LobbyError::AlreadyInLobby(session.lobby_id.clone()));
        }
        store.lobby(lobby_id)?;
        store.ensure_idle(lobby_id)?;

        let lobby = store.lobby_mut(lobby_id)?;
        let assigned = allocator::assign_on_join(lobby, connection_id, user_id.clone());
        let assignment = allocator::role_assignment(lobby);
        store.insert_session(
            connection_id,
            Session {
                lobby_id: lobby_id.to_string(),
                is_host: false,
                user_id,
            },
        );
        (assigned, assignment)
    };

    info!(lobby_id, %connection_id, role = ?assigned.0, index = assigned.1, "Joined lobby");
    ctx.transport.join_room(lobby_id, &connection_id);
    ctx.transport.emit_to(
        &connection_id,
        &ServerMessage::LobbyJoined {
            lobby_id: lobby_id.to_string(),
            is_host: false,
        },
    );
    ctx.transport.broadcast(lobby_id, &assignment);
    Ok(assigned)
}

/// Move the caller to `role` at `index` and rebroadcast the assignment.
pub fn choose_device_type(
    ctx: &LobbyContext,
    connection_id: ConnectionId,
    role: DeviceRole,
    index: usize,
) -> LobbyResult<()> {
    let (lobby_id, assignment) = {
        let mut store = ctx.store.lock();
        let session = store.session(&connection_id)?.clone();
        store.ensure_idle(&session.lobby_id)?;

        let lobby = store.lobby_mut(&session.lobby_id)?;
        allocator::choose_device(lobby, connection_id, session.user_id, role, index);
        (session.lobby_id, allocator::role_assignment(lobby))
    };

    ctx.transport.broadcast(&lobby_id, &assignment);
    Ok(())
}

/// Host-only partial settings update.
pub fn update_lobby_settings(
    ctx: &LobbyContext,
    connection_id: ConnectionId,
    update: SettingsUpdate,
) -> LobbyResult<LobbySettings> {
    let (lobby_id, settings) = {
        let mut store = ctx.store.lock();
        let session = store.session(&connection_id)?.clone();
        if !session.is_host {
            return Err(LobbyError::NotHost("change lobby settings"));
        }
        store.ensure_idle(&session.lobby_id)?;

        let lobby = store.lobby_mut(&session.lobby_id)?;
        let settings = lobby.settings.patched(update);
        settings.validate()?;
        lobby.settings = settings.clone();
        (session.lobby_id, settings)
    };

    debug!(%lobby_id, repetitions = settings.repetitions, delay = settings.delay, "Lobby settings updated");
    ctx.transport.broadcast(&lobby_id, &settings_message(&settings));
    Ok(settings)
}

/// Host-only close. A running measurement is cancelled first.
pub fn close_lobby(ctx: &LobbyContext, connection_id: ConnectionId) -> LobbyResult<()> {
    let released = {
        let mut store = ctx.store.lock();
        let session = store.session(&connection_id)?.clone();
        if !session.is_host {
            return Err(LobbyError::NotHost("close the lobby"));
        }
        store
            .release_lobby(&session.lobby_id)
            .ok_or(LobbyError::LobbyNotFound(session.lobby_id))?
    };

    info!(lobby_id = %released.lobby.lobby_id, "Lobby closed by host");
    announce_release(ctx, &released, reasons::HOST_CLOSED_LOBBY, reasons::HOST_CLOSED_LOBBY);
    Ok(())
}

/// Clean up after a connection went away.
///
/// ## Outcomes:
/// - host: the lobby is torn down (cancelling any measurement)
/// - any participant while measuring: the measurement is cancelled and the
///   lobby torn down
/// - idle participant: removed from its role; the new assignment is broadcast
pub fn handle_disconnect(ctx: &LobbyContext, connection_id: ConnectionId) {
    enum Outcome {
        Released(ReleasedLobby, &'static str),
        Removed(String, ServerMessage),
        Nothing,
    }

    let outcome = {
        let mut store = ctx.store.lock();
        match store.remove_session(&connection_id) {
            None => Outcome::Nothing,
            Some(session) if session.is_host => match store.release_lobby(&session.lobby_id) {
                Some(released) => Outcome::Released(released, reasons::HOST_DISCONNECTED),
                None => Outcome::Nothing,
            },
            Some(session) if store.is_measuring(&session.lobby_id) => {
                match store.release_lobby(&session.lobby_id) {
                    Some(released) => Outcome::Released(released, reasons::MEASUREMENT_CANCELLED),
                    None => Outcome::Nothing,
                }
            }
            Some(session) => match store.lobby_mut(&session.lobby_id) {
                Ok(lobby) => {
                    lobby.remove_device(&connection_id);
                    Outcome::Removed(session.lobby_id, allocator::role_assignment(lobby))
                }
                Err(_) => Outcome::Nothing,
            },
        }
    };

    match outcome {
        Outcome::Released(released, close_reason) => {
            info!(
                lobby_id = %released.lobby.lobby_id,
                %connection_id,
                cancelled = released.cancelled_measurement,
                "Lobby released after disconnect"
            );
            ctx.transport.leave_room(&released.lobby.lobby_id, &connection_id);
            announce_release(ctx, &released, reasons::PARTICIPANT_DISCONNECTED, close_reason);
        }
        Outcome::Removed(lobby_id, assignment) => {
            info!(%lobby_id, %connection_id, "Participant left lobby");
            ctx.transport.leave_room(&lobby_id, &connection_id);
            ctx.transport.broadcast(&lobby_id, &assignment);
        }
        Outcome::Nothing => {}
    }
}

/// Notify remaining members of a released lobby and close its room.
fn announce_release(
    ctx: &LobbyContext,
    released: &ReleasedLobby,
    cancel_reason: &str,
    close_reason: &str,
) {
    let lobby_id = &released.lobby.lobby_id;
    if released.cancelled_measurement {
        ctx.stats.record_cancelled();
        warn!(%lobby_id, reason = cancel_reason, "Measurement cancelled");
        ctx.transport.broadcast(
            lobby_id,
            &ServerMessage::MeasurementCancelled {
                reason: cancel_reason.to_string(),
            },
        );
    }
    ctx.transport.broadcast(
        lobby_id,
        &ServerMessage::LobbyClosed {
            reason: close_reason.to_string(),
        },
    );
    ctx.transport.close_room(lobby_id);
}
