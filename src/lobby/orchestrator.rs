//! # Measurement Orchestrator
//!
//! Drives one lobby's measurement from `start_measurement` to results.
//!
//! ## Cycle:
//! 1. `begin_recording` to every microphone, then the settle delay
//! 2. `play_sound` to each speaker in index order, one playback window each
//! 3. `end_recording` to every microphone
//! 4. wait until every microphone delivered its fragment for the cycle
//!
//! Cycles repeat `repetitions` times with `delay` seconds between them. The
//! collected fragments are then analysed off the async runtime, persisted for
//! every participant and broadcast as `measurement_results`. The lobby is
//! released once the measurement completes or fails.

use super::allocator::is_contiguous;
use super::model::{ConnectionId, Lobby, RecordData};
use super::registry::MeasurementHandle;
use super::{reasons, LobbyContext, LobbyError, LobbyResult};
use crate::persistence::{save_for_participants, Measurement};
use crate::protocol::{DeviceRole, Distances, ServerMessage};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Immutable copy of everything a running measurement needs from its lobby.
#[derive(Debug, Clone)]
pub struct MeasurementPlan {
    pub lobby_id: String,
    pub host: ConnectionId,
    pub host_user_id: String,
    /// Sorted by slot index.
    pub microphones: Vec<ConnectionId>,
    /// Sorted by slot index.
    pub speakers: Vec<ConnectionId>,
    pub repetitions: u32,
    pub delay: Duration,
    pub distances: Distances,
    pub participants: Vec<String>,
}

impl MeasurementPlan {
    pub fn from_lobby(lobby: &Lobby) -> Self {
        let sorted = |role: DeviceRole| -> Vec<ConnectionId> {
            let mut devices = lobby.devices(role).to_vec();
            devices.sort_by_key(|c| c.index);
            devices.into_iter().map(|c| c.connection_id).collect()
        };

        Self {
            lobby_id: lobby.lobby_id.clone(),
            host: lobby.host,
            host_user_id: lobby.host_user_id.clone(),
            microphones: sorted(DeviceRole::Microphone),
            speakers: sorted(DeviceRole::Speaker),
            repetitions: lobby.settings.repetitions,
            delay: Duration::from_secs_f64(lobby.settings.delay),
            distances: lobby.settings.distances.clone(),
            participants: lobby.participant_user_ids(),
        }
    }
}

/// Checks run before a measurement may start.
pub fn preflight(lobby: &Lobby) -> LobbyResult<()> {
    if lobby.speakers.is_empty() {
        return Err(LobbyError::NoSpeakers);
    }
    if lobby.microphones.is_empty() {
        return Err(LobbyError::NoMicrophones);
    }

    let speakers = lobby.speaker_indices();
    if !is_contiguous(&speakers) {
        return Err(LobbyError::SpeakerIndicesNotContiguous(speakers));
    }
    let microphones = lobby.microphone_indices();
    if !is_contiguous(&microphones) {
        return Err(LobbyError::MicrophoneIndicesNotContiguous(microphones));
    }

    lobby.settings.validate()
}

/// Host request to start measuring. Spawns the lobby's measurement task.
pub fn start_measurement(ctx: &LobbyContext, connection_id: ConnectionId) -> LobbyResult<()> {
    let mut store = ctx.store.lock();
    let session = store.session(&connection_id)?.clone();
    if !session.is_host {
        return Err(LobbyError::NotHost("start a measurement"));
    }
    store.ensure_idle(&session.lobby_id)?;

    let lobby = store.lobby(&session.lobby_id)?;
    preflight(lobby)?;
    let plan = MeasurementPlan::from_lobby(lobby);

    info!(
        lobby_id = %plan.lobby_id,
        microphones = plan.microphones.len(),
        speakers = plan.speakers.len(),
        repetitions = plan.repetitions,
        "Starting measurement"
    );

    // Announced before the task exists so it precedes every device command.
    ctx.transport.broadcast(
        &plan.lobby_id,
        &ServerMessage::MeasurementStarted {
            repetitions: plan.repetitions,
        },
    );

    let (fragments, rx) = mpsc::unbounded_channel();
    let lobby_id = plan.lobby_id.clone();
    let task = tokio::spawn(run_measurement(ctx.clone(), plan, rx));
    store.insert_measurement(lobby_id, MeasurementHandle { task, fragments });
    drop(store);

    ctx.stats.record_started();
    Ok(())
}

/// Hand a recorded fragment to the sender's running measurement.
pub fn push_fragment(
    ctx: &LobbyContext,
    connection_id: ConnectionId,
    recording: Vec<u8>,
) -> LobbyResult<()> {
    let store = ctx.store.lock();
    let session = store.session(&connection_id)?;
    let lobby = store.lobby(&session.lobby_id)?;

    let microphone_index = match lobby.role_of(&connection_id) {
        Some((DeviceRole::Microphone, index)) => index,
        _ => return Err(LobbyError::NotAMicrophone),
    };
    let no_measurement = || LobbyError::NoMeasurementRunning(session.lobby_id.clone());
    let sender = store
        .fragment_sender(&session.lobby_id)
        .ok_or_else(no_measurement)?;

    debug!(
        lobby_id = %session.lobby_id,
        microphone_index,
        bytes = recording.len(),
        "Recording fragment received"
    );
    sender
        .send(RecordData {
            connection_id,
            microphone_index,
            recording,
        })
        .map_err(|_| no_measurement())
}

async fn run_measurement(
    ctx: LobbyContext,
    plan: MeasurementPlan,
    mut fragments: mpsc::UnboundedReceiver<RecordData>,
) {
    let mut recordings = Vec::with_capacity(plan.repetitions as usize);

    for cycle in 0..plan.repetitions {
        debug!(lobby_id = %plan.lobby_id, cycle, "Cycle started");
        for microphone in &plan.microphones {
            ctx.transport
                .emit_to(microphone, &ServerMessage::BeginRecording { cycle });
        }
        tokio::time::sleep(ctx.settings.settle_delay()).await;

        for (speaker_index, speaker) in plan.speakers.iter().enumerate() {
            ctx.transport.emit_to(
                speaker,
                &ServerMessage::PlaySound {
                    cycle,
                    speaker_index,
                },
            );
            tokio::time::sleep(ctx.settings.speaker_window()).await;
        }

        for microphone in &plan.microphones {
            ctx.transport
                .emit_to(microphone, &ServerMessage::EndRecording { cycle });
        }

        match collect_cycle(&mut fragments, plan.microphones.len()).await {
            Some(cycle_recordings) => recordings.push(cycle_recordings),
            None => {
                // The queue only closes when the lobby was released under us.
                debug!(lobby_id = %plan.lobby_id, cycle, "Fragment queue closed");
                return;
            }
        }

        if cycle + 1 < plan.repetitions {
            tokio::time::sleep(plan.delay).await;
        }
    }

    finalize(&ctx, &plan, recordings).await;
}

/// Wait for one fragment per microphone slot, returned in slot order.
async fn collect_cycle(
    fragments: &mut mpsc::UnboundedReceiver<RecordData>,
    expected: usize,
) -> Option<Vec<Vec<u8>>> {
    let mut slots: Vec<Option<Vec<u8>>> = vec![None; expected];
    let mut received = 0;

    while received < expected {
        let fragment = fragments.recv().await?;
        match slots.get_mut(fragment.microphone_index) {
            Some(slot) if slot.is_none() => {
                *slot = Some(fragment.recording);
                received += 1;
            }
            Some(_) => warn!(
                connection_id = %fragment.connection_id,
                microphone_index = fragment.microphone_index,
                "Duplicate fragment for this cycle dropped"
            ),
            None => warn!(
                connection_id = %fragment.connection_id,
                microphone_index = fragment.microphone_index,
                "Fragment for unknown microphone slot dropped"
            ),
        }
    }

    Some(slots.into_iter().flatten().collect())
}

async fn finalize(ctx: &LobbyContext, plan: &MeasurementPlan, recordings: Vec<Vec<Vec<u8>>>) {
    let pipeline = ctx.pipeline.clone();
    let analysis =
        tokio::task::spawn_blocking(move || pipeline.analyze_payloads(&recordings)).await;

    let values = match analysis {
        Ok(Ok(values)) => Arc::new(values),
        Ok(Err(e)) => return fail(ctx, plan, reasons::ANALYSIS_FAILED, e.to_string()),
        Err(e) => {
            return fail(
                ctx,
                plan,
                reasons::ANALYSIS_FAILED,
                format!("Analysis task failed: {}", e),
            )
        }
    };

    let center_frequencies = ctx.pipeline.center_frequencies().to_vec();
    let measurement = Measurement::new(
        plan.host_user_id.clone(),
        plan.lobby_id.clone(),
        center_frequencies.clone(),
        plan.distances.clone(),
        values.clone(),
    );
    let saved =
        save_for_participants(ctx.persistence.as_ref(), measurement, &plan.participants).await;
    let measurement_id = match saved {
        Ok(id) => id,
        Err(e) => return fail(ctx, plan, reasons::PERSISTENCE_FAILED, e.to_string()),
    };

    let released = ctx.store.lock().finish_measurement(&plan.lobby_id);
    if released.is_none() {
        debug!(lobby_id = %plan.lobby_id, "Measurement finished after cancellation");
        return;
    }

    info!(lobby_id = %plan.lobby_id, %measurement_id, "Measurement completed");
    ctx.transport.broadcast(
        &plan.lobby_id,
        &ServerMessage::MeasurementResults {
            measurement_id,
            center_frequencies,
            values,
        },
    );
    ctx.transport.broadcast(
        &plan.lobby_id,
        &ServerMessage::LobbyClosed {
            reason: reasons::MEASUREMENT_COMPLETED.to_string(),
        },
    );
    ctx.transport.close_room(&plan.lobby_id);
    ctx.stats.record_completed();
}

fn fail(ctx: &LobbyContext, plan: &MeasurementPlan, reason: &str, message: String) {
    let released = ctx.store.lock().finish_measurement(&plan.lobby_id);
    if released.is_none() {
        return;
    }

    error!(lobby_id = %plan.lobby_id, reason, "Measurement failed: {}", message);
    ctx.transport.broadcast(
        &plan.lobby_id,
        &ServerMessage::MeasurementFailed {
            reason: reason.to_string(),
            message,
        },
    );
    ctx.transport.broadcast(
        &plan.lobby_id,
        &ServerMessage::LobbyClosed {
            reason: reasons::MEASUREMENT_FAILED.to_string(),
        },
    );
    ctx.transport.close_room(&plan.lobby_id);
    ctx.stats.record_failed();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lobby::lifecycle::{
        choose_device_type, close_lobby, create_lobby, handle_disconnect, join_lobby,
        update_lobby_settings,
    };
    use crate::lobby::model::{SettingsUpdate, MAX_DELAY_SECS};
    use crate::lobby::testing::{fixture, recording_payload, Fixture};
    use crate::persistence::MeasurementStore;
    use uuid::Uuid;

    struct Room {
        host: ConnectionId,
        lobby_id: String,
        guests: Vec<ConnectionId>,
    }

    /// Host plus `guests` joined devices. Joins alternate microphone, speaker.
    fn room(fx: &Fixture, guests: usize, repetitions: u32) -> Room {
        let host = Uuid::new_v4();
        let lobby_id = create_lobby(
            &fx.ctx,
            host,
            "host".into(),
            SettingsUpdate {
                repetitions: Some(repetitions),
                ..SettingsUpdate::default()
            },
        )
        .unwrap();
        let guests = (0..guests)
            .map(|i| {
                let id = Uuid::new_v4();
                join_lobby(&fx.ctx, id, &lobby_id, format!("guest-{}", i)).unwrap();
                id
            })
            .collect();
        Room {
            host,
            lobby_id,
            guests,
        }
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        for _ in 0..500 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached in time");
    }

    fn device_commands(fx: &Fixture) -> Vec<&'static str> {
        fx.transport
            .kinds()
            .into_iter()
            .filter(|k| matches!(*k, "begin_recording" | "play_sound" | "end_recording"))
            .collect()
    }

    #[tokio::test]
    async fn test_measurement_runs_cycle_and_publishes_results() {
        let fx = fixture();
        // guest-0 mic 0, guest-1 speaker 0, guest-2 mic 1
        let room = room(&fx, 3, 1);
        let (mic0, speaker, mic1) = (room.guests[0], room.guests[1], room.guests[2]);

        start_measurement(&fx.ctx, room.host).unwrap();
        assert_eq!(fx.transport.count("measurement_started"), 1);

        wait_until(|| fx.transport.count("end_recording") == 2).await;
        assert_eq!(
            device_commands(&fx),
            vec![
                "begin_recording",
                "begin_recording",
                "play_sound",
                "end_recording",
                "end_recording"
            ]
        );
        assert_eq!(fx.transport.sent_to(mic0, "begin_recording"), 1);
        assert_eq!(fx.transport.sent_to(mic1, "end_recording"), 1);
        assert_eq!(fx.transport.sent_to(speaker, "play_sound"), 1);
        assert_eq!(fx.transport.sent_to(room.host, "begin_recording"), 0);

        // Nothing is analysed until every microphone has delivered.
        push_fragment(&fx.ctx, mic1, recording_payload()).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(fx.transport.count("measurement_results"), 0);
        assert!(fx.ctx.store.is_measuring(&room.lobby_id));

        push_fragment(&fx.ctx, mic0, recording_payload()).unwrap();
        wait_until(|| fx.transport.count("measurement_results") == 1).await;

        let Some(ServerMessage::MeasurementResults {
            measurement_id,
            center_frequencies,
            values,
        }) = fx.transport.last_of("measurement_results")
        else {
            panic!("missing results");
        };
        assert_eq!(values.len(), 1);
        assert_eq!(values[0].len(), 2);
        assert_eq!(values[0][0].band_count(), center_frequencies.len());
        assert!(matches!(
            fx.transport.last_of("lobby_closed"),
            Some(ServerMessage::LobbyClosed { reason }) if reason == reasons::MEASUREMENT_COMPLETED
        ));

        assert_eq!(fx.ctx.store.lobby_count(), 0);
        assert_eq!(fx.ctx.store.session_count(), 0);
        assert_eq!(fx.ctx.store.running_measurements(), 0);
        assert_eq!(fx.ctx.stats.snapshot().completed, 1);

        let stored = fx.persistence.get(&measurement_id).await.unwrap().unwrap();
        assert_eq!(stored.owner_user_id, "host");
        assert_eq!(stored.lobby_id, room.lobby_id);
        for user in ["host", "guest-0", "guest-1", "guest-2"] {
            let user = fx.persistence.find_user(user).await.unwrap().unwrap();
            assert_eq!(user.measurement_ids, vec![measurement_id.clone()]);
        }
    }

    #[tokio::test]
    async fn test_next_cycle_waits_for_collection() {
        let fx = fixture();
        let room = room(&fx, 2, 2);
        let mic = room.guests[0];

        start_measurement(&fx.ctx, room.host).unwrap();
        wait_until(|| fx.transport.count("end_recording") == 1).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(fx.transport.count("begin_recording"), 1);

        push_fragment(&fx.ctx, mic, recording_payload()).unwrap();
        wait_until(|| fx.transport.count("end_recording") == 2).await;
        assert_eq!(fx.transport.count("begin_recording"), 2);
        assert!(matches!(
            fx.transport.last_of("begin_recording"),
            Some(ServerMessage::BeginRecording { cycle: 1 })
        ));

        push_fragment(&fx.ctx, mic, recording_payload()).unwrap();
        wait_until(|| fx.transport.count("measurement_results") == 1).await;
        match fx.transport.last_of("measurement_results") {
            Some(ServerMessage::MeasurementResults { values, .. }) => {
                assert_eq!(values.len(), 2);
                assert_eq!(values[1].len(), 1);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_duplicate_fragment_is_not_counted() {
        let fx = fixture();
        let room = room(&fx, 3, 1);
        let (mic0, mic1) = (room.guests[0], room.guests[2]);

        start_measurement(&fx.ctx, room.host).unwrap();
        wait_until(|| fx.transport.count("end_recording") == 2).await;

        push_fragment(&fx.ctx, mic0, recording_payload()).unwrap();
        push_fragment(&fx.ctx, mic0, recording_payload()).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(fx.transport.count("measurement_results"), 0);

        push_fragment(&fx.ctx, mic1, recording_payload()).unwrap();
        wait_until(|| fx.transport.count("measurement_results") == 1).await;
    }

    #[tokio::test]
    async fn test_undecodable_fragment_fails_measurement() {
        let fx = fixture();
        let room = room(&fx, 2, 1);

        start_measurement(&fx.ctx, room.host).unwrap();
        wait_until(|| fx.transport.count("end_recording") == 1).await;
        push_fragment(&fx.ctx, room.guests[0], b"not a wav file".to_vec()).unwrap();

        wait_until(|| fx.transport.count("measurement_failed") == 1).await;
        match fx.transport.last_of("measurement_failed") {
            Some(ServerMessage::MeasurementFailed { reason, .. }) => {
                assert_eq!(reason, reasons::ANALYSIS_FAILED)
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(
            fx.transport.last_of("lobby_closed"),
            Some(ServerMessage::LobbyClosed { reason }) if reason == reasons::MEASUREMENT_FAILED
        ));
        assert_eq!(fx.ctx.store.lobby_count(), 0);
        assert_eq!(fx.ctx.stats.snapshot().failed, 1);
        assert_eq!(fx.persistence.measurement_count().await, 0);
    }

    #[tokio::test]
    async fn test_preflight_rejections_start_nothing() {
        let fx = fixture();
        let room = room(&fx, 1, 1);

        assert_eq!(
            start_measurement(&fx.ctx, room.host),
            Err(LobbyError::NoSpeakers)
        );

        let speaker = Uuid::new_v4();
        join_lobby(&fx.ctx, speaker, &room.lobby_id, "s".into()).unwrap();
        choose_device_type(&fx.ctx, speaker, DeviceRole::Speaker, 1).unwrap();
        assert_eq!(
            start_measurement(&fx.ctx, room.host),
            Err(LobbyError::SpeakerIndicesNotContiguous(vec![1]))
        );

        choose_device_type(&fx.ctx, speaker, DeviceRole::Speaker, 0).unwrap();
        choose_device_type(&fx.ctx, room.guests[0], DeviceRole::Microphone, 2).unwrap();
        assert_eq!(
            start_measurement(&fx.ctx, room.host),
            Err(LobbyError::MicrophoneIndicesNotContiguous(vec![2]))
        );

        assert_eq!(
            start_measurement(&fx.ctx, speaker),
            Err(LobbyError::NotHost("start a measurement"))
        );
        assert_eq!(fx.ctx.store.running_measurements(), 0);
        assert_eq!(fx.transport.count("measurement_started"), 0);
        assert_eq!(fx.ctx.stats.snapshot().started, 0);
    }

    #[tokio::test]
    async fn test_no_microphones() {
        let fx = fixture();
        let room = room(&fx, 0, 1);
        choose_device_type(&fx.ctx, room.host, DeviceRole::Speaker, 0).unwrap();
        assert_eq!(
            start_measurement(&fx.ctx, room.host),
            Err(LobbyError::NoMicrophones)
        );
    }

    #[tokio::test]
    async fn test_requests_rejected_while_measuring() {
        let fx = fixture();
        let room = room(&fx, 2, 1);
        start_measurement(&fx.ctx, room.host).unwrap();

        let busy = LobbyError::SessionBusy(room.lobby_id.clone());
        assert_eq!(start_measurement(&fx.ctx, room.host), Err(busy.clone()));
        assert_eq!(
            join_lobby(&fx.ctx, Uuid::new_v4(), &room.lobby_id, "late".into()),
            Err(busy.clone())
        );
        assert_eq!(
            choose_device_type(&fx.ctx, room.guests[0], DeviceRole::Speaker, 1),
            Err(busy.clone())
        );
        assert_eq!(
            update_lobby_settings(&fx.ctx, room.host, SettingsUpdate::default()),
            Err(busy)
        );

        close_lobby(&fx.ctx, room.host).unwrap();
        assert!(matches!(
            fx.transport.last_of("measurement_cancelled"),
            Some(ServerMessage::MeasurementCancelled { reason }) if reason == reasons::HOST_CLOSED_LOBBY
        ));
        assert_eq!(fx.ctx.store.running_measurements(), 0);
        assert_eq!(fx.ctx.stats.snapshot().cancelled, 1);
    }

    #[tokio::test]
    async fn test_participant_disconnect_cancels_running_measurement() {
        let fx = fixture();
        let room = room(&fx, 2, 1);
        start_measurement(&fx.ctx, room.host).unwrap();
        wait_until(|| fx.transport.count("end_recording") == 1).await;

        handle_disconnect(&fx.ctx, room.guests[1]);

        assert!(matches!(
            fx.transport.last_of("measurement_cancelled"),
            Some(ServerMessage::MeasurementCancelled { reason }) if reason == reasons::PARTICIPANT_DISCONNECTED
        ));
        assert!(matches!(
            fx.transport.last_of("lobby_closed"),
            Some(ServerMessage::LobbyClosed { reason }) if reason == reasons::MEASUREMENT_CANCELLED
        ));
        assert_eq!(fx.ctx.store.lobby_count(), 0);
        assert_eq!(fx.ctx.store.running_measurements(), 0);

        // A late fragment finds no session.
        assert_eq!(
            push_fragment(&fx.ctx, room.guests[0], recording_payload()),
            Err(LobbyError::NotInLobby)
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(fx.transport.count("measurement_results"), 0);
    }

    #[tokio::test]
    async fn test_host_disconnect_during_settle_delay_cancels() {
        let mut fx = fixture();
        fx.ctx.settings.settle_delay_ms = 60_000;
        let room = room(&fx, 2, 1);
        start_measurement(&fx.ctx, room.host).unwrap();
        wait_until(|| fx.transport.count("begin_recording") == 1).await;

        handle_disconnect(&fx.ctx, room.host);

        assert!(matches!(
            fx.transport.last_of("measurement_cancelled"),
            Some(ServerMessage::MeasurementCancelled { reason }) if reason == reasons::PARTICIPANT_DISCONNECTED
        ));
        assert!(matches!(
            fx.transport.last_of("lobby_closed"),
            Some(ServerMessage::LobbyClosed { reason }) if reason == reasons::HOST_DISCONNECTED
        ));
        assert_eq!(fx.ctx.store.lobby_count(), 0);
        assert_eq!(fx.ctx.store.session_count(), 0);
        assert_eq!(fx.ctx.store.running_measurements(), 0);
        assert_eq!(fx.ctx.stats.snapshot().cancelled, 1);

        // The aborted task never reaches playback.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(fx.transport.count("play_sound"), 0);
    }

    #[tokio::test]
    async fn test_disconnect_during_cycle_delay_cancels() {
        let fx = fixture();
        let room = room(&fx, 2, 2);
        let (mic, speaker) = (room.guests[0], room.guests[1]);
        update_lobby_settings(
            &fx.ctx,
            room.host,
            SettingsUpdate {
                delay: Some(MAX_DELAY_SECS),
                ..SettingsUpdate::default()
            },
        )
        .unwrap();

        start_measurement(&fx.ctx, room.host).unwrap();
        wait_until(|| fx.transport.count("end_recording") == 1).await;
        push_fragment(&fx.ctx, mic, recording_payload()).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(fx.transport.count("begin_recording"), 1);
        assert!(fx.ctx.store.is_measuring(&room.lobby_id));

        handle_disconnect(&fx.ctx, speaker);

        assert_eq!(fx.transport.count("measurement_cancelled"), 1);
        assert_eq!(fx.ctx.store.lobby_count(), 0);
        assert_eq!(fx.ctx.store.running_measurements(), 0);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(fx.transport.count("begin_recording"), 1);
        assert_eq!(fx.transport.count("measurement_results"), 0);
    }

    #[tokio::test]
    async fn test_out_of_range_delay_is_rejected_before_start() {
        let fx = fixture();
        let room = room(&fx, 2, 1);

        let result = update_lobby_settings(
            &fx.ctx,
            room.host,
            SettingsUpdate {
                delay: Some(1e20),
                ..SettingsUpdate::default()
            },
        );
        assert!(matches!(result, Err(LobbyError::Validation(_))));
        let lobby = fx.ctx.store.lobby_snapshot(&room.lobby_id).unwrap();
        assert_eq!(lobby.settings.delay, 0.0);

        start_measurement(&fx.ctx, room.host).unwrap();
        assert_eq!(fx.ctx.store.running_measurements(), 1);
        close_lobby(&fx.ctx, room.host).unwrap();
    }

    #[tokio::test]
    async fn test_push_fragment_rejections() {
        let fx = fixture();
        let room = room(&fx, 2, 1);
        let (mic, speaker) = (room.guests[0], room.guests[1]);

        assert_eq!(
            push_fragment(&fx.ctx, mic, recording_payload()),
            Err(LobbyError::NoMeasurementRunning(room.lobby_id.clone()))
        );
        assert_eq!(
            push_fragment(&fx.ctx, Uuid::new_v4(), Vec::new()),
            Err(LobbyError::NotInLobby)
        );

        start_measurement(&fx.ctx, room.host).unwrap();
        assert_eq!(
            push_fragment(&fx.ctx, speaker, recording_payload()),
            Err(LobbyError::NotAMicrophone)
        );
        assert_eq!(
            push_fragment(&fx.ctx, room.host, recording_payload()),
            Err(LobbyError::NotAMicrophone)
        );
        close_lobby(&fx.ctx, room.host).unwrap();
    }

    #[test]
    fn test_plan_orders_devices_by_slot() {
        let fx = fixture();
        let room = room(&fx, 3, 1);
        // Swap the two microphones' slots.
        choose_device_type(&fx.ctx, room.guests[0], DeviceRole::Microphone, 1).unwrap();
        choose_device_type(&fx.ctx, room.guests[2], DeviceRole::Microphone, 0).unwrap();

        let lobby = fx.ctx.store.lobby_snapshot(&room.lobby_id).unwrap();
        assert!(preflight(&lobby).is_ok());
        let plan = MeasurementPlan::from_lobby(&lobby);
        assert_eq!(plan.microphones, vec![room.guests[2], room.guests[0]]);
        assert_eq!(plan.speakers, vec![room.guests[1]]);
        assert_eq!(plan.participants.len(), 4);
    }
}
