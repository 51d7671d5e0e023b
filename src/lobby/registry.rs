//! # Session Store
//!
//! Process-wide lobby registry. Lobbies, per-connection sessions and running
//! measurement handles live behind one lock so every lobby operation sees and
//! changes them atomically. The lock is never held across an `.await`.
//!
//! A lobby has a running measurement exactly when a [`MeasurementHandle`] is
//! stored for its id.

use super::model::{ConnectionId, Lobby, RecordData, Session};
use super::{LobbyError, LobbyResult};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

const LOBBY_ID_LEN: usize = 6;

/// Handle to a running measurement task and the producer side of its queue.
#[derive(Debug)]
pub struct MeasurementHandle {
    pub task: JoinHandle<()>,
    pub fragments: mpsc::UnboundedSender<RecordData>,
}

/// Lobby and its members, removed in one step.
#[derive(Debug)]
pub struct ReleasedLobby {
    pub lobby: Lobby,
    pub members: Vec<ConnectionId>,
    /// Whether a measurement task was aborted during release.
    pub cancelled_measurement: bool,
}

#[derive(Debug, Default)]
pub struct StoreInner {
    lobbies: HashMap<String, Lobby>,
    sessions: HashMap<ConnectionId, Session>,
    measurements: HashMap<String, MeasurementHandle>,
}

impl StoreInner {
    pub fn lobby(&self, lobby_id: &str) -> LobbyResult<&Lobby> {
        self.lobbies
            .get(lobby_id)
            .ok_or_else(|| LobbyError::LobbyNotFound(lobby_id.to_string()))
    }

    pub fn lobby_mut(&mut self, lobby_id: &str) -> LobbyResult<&mut Lobby> {
        self.lobbies
            .get_mut(lobby_id)
            .ok_or_else(|| LobbyError::LobbyNotFound(lobby_id.to_string()))
    }

    pub fn session(&self, connection_id: &ConnectionId) -> LobbyResult<&Session> {
        self.sessions.get(connection_id).ok_or(LobbyError::NotInLobby)
    }

    pub fn is_measuring(&self, lobby_id: &str) -> bool {
        self.measurements.contains_key(lobby_id)
    }

    /// Fail with `SessionBusy` while a measurement runs in `lobby_id`.
    pub fn ensure_idle(&self, lobby_id: &str) -> LobbyResult<()> {
        if self.is_measuring(lobby_id) {
            Err(LobbyError::SessionBusy(lobby_id.to_string()))
        } else {
            Ok(())
        }
    }

    pub fn lobby_count(&self) -> usize {
        self.lobbies.len()
    }

    /// Insert a lobby under a fresh id and make `session` its host session.
    pub fn insert_lobby(
        &mut self,
        build: impl FnOnce(String) -> Lobby,
        session_for: impl FnOnce(String) -> Session,
        host: ConnectionId,
    ) -> String {
        let lobby_id = self.fresh_lobby_id();
        let lobby = build(lobby_id.clone());
        self.lobbies.insert(lobby_id.clone(), lobby);
        self.sessions.insert(host, session_for(lobby_id.clone()));
        lobby_id
    }

    fn fresh_lobby_id(&self) -> String {
        loop {
            let candidate: String = Uuid::new_v4()
                .simple()
                .to_string()
                .chars()
                .take(LOBBY_ID_LEN)
                .collect::<String>()
                .to_uppercase();
            if !self.lobbies.contains_key(&candidate) {
                return candidate;
            }
        }
    }

    pub fn insert_session(&mut self, connection_id: ConnectionId, session: Session) {
        self.sessions.insert(connection_id, session);
    }

    pub fn remove_session(&mut self, connection_id: &ConnectionId) -> Option<Session> {
        self.sessions.remove(connection_id)
    }

    pub fn insert_measurement(&mut self, lobby_id: String, handle: MeasurementHandle) {
        self.measurements.insert(lobby_id, handle);
    }

    /// Producer side of the running measurement's fragment queue.
    pub fn fragment_sender(&self, lobby_id: &str) -> Option<&mpsc::UnboundedSender<RecordData>> {
        self.measurements.get(lobby_id).map(|h| &h.fragments)
    }

    /// Abort the lobby's measurement, if any. Returns whether one was running.
    pub fn cancel_measurement(&mut self, lobby_id: &str) -> bool {
        match self.measurements.remove(lobby_id) {
            Some(handle) => {
                handle.task.abort();
                true
            }
            None => false,
        }
    }

    /// Remove the lobby, every member session and any measurement handle.
    ///
    /// A running task is aborted. Members whose session already went away
    /// (such as a disconnecting connection) are still reported.
    pub fn release_lobby(&mut self, lobby_id: &str) -> Option<ReleasedLobby> {
        let cancelled_measurement = self.cancel_measurement(lobby_id);
        let lobby = self.lobbies.remove(lobby_id)?;
        let members = lobby.members();
        for member in &members {
            if self
                .sessions
                .get(member)
                .is_some_and(|s| s.lobby_id == lobby_id)
            {
                self.sessions.remove(member);
            }
        }
        Some(ReleasedLobby {
            lobby,
            members,
            cancelled_measurement,
        })
    }

    /// Called by the measurement task itself once it has finished.
    ///
    /// Detaches the task's own handle (no abort) and releases the lobby.
    /// Returns `None` when the measurement was cancelled in the meantime.
    pub fn finish_measurement(&mut self, lobby_id: &str) -> Option<ReleasedLobby> {
        // Dropping a JoinHandle detaches the task.
        self.measurements.remove(lobby_id)?;
        self.release_lobby(lobby_id)
    }
}

/// Injectable, process-wide store shared by every connection.
#[derive(Debug, Default)]
pub struct SessionStore {
    inner: Mutex<StoreInner>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock the store. Callers must drop the guard before awaiting.
    pub fn lock(&self) -> MutexGuard<'_, StoreInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn lobby_count(&self) -> usize {
        self.lock().lobby_count()
    }

    pub fn session_count(&self) -> usize {
        self.lock().sessions.len()
    }

    pub fn running_measurements(&self) -> usize {
        self.lock().measurements.len()
    }

    pub fn is_measuring(&self, lobby_id: &str) -> bool {
        self.lock().is_measuring(lobby_id)
    }

    pub fn lobby_snapshot(&self, lobby_id: &str) -> Option<Lobby> {
        self.lock().lobbies.get(lobby_id).cloned()
    }

    pub fn session_snapshot(&self, connection_id: &ConnectionId) -> Option<Session> {
        self.lock().sessions.get(connection_id).cloned()
    }
}
