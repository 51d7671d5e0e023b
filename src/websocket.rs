//! # Lobby WebSocket Handler
//!
//! One actor per connection on `/ws/lobby`. Text frames carry
//! [`ClientMessage`] JSON; binary frames carry a microphone's recorded
//! fragment as an encoded WAV file.
//!
//! ## Connection lifecycle:
//! 1. **Upgrade**: the actor gets a fresh connection id and registers its
//!    mailbox with the [`ConnectionHub`](crate::lobby::ConnectionHub)
//! 2. **Requests**: each message is dispatched to the lobby coordinator with
//!    a fresh [`LobbyContext`] snapshot
//! 3. **Outbound**: coordinator messages arrive as [`Outbound`] and are
//!    written to the socket as text frames
//! 4. **Close / timeout**: the connection is unregistered and the disconnect
//!    path tears down or updates its lobby

use crate::lobby::model::SettingsUpdate;
use crate::lobby::transport::Outbound;
use crate::lobby::{lifecycle, orchestrator, ConnectionId, LobbyContext, LobbyError};
use crate::protocol::{ClientMessage, ServerMessage};
use crate::state::AppState;

use actix::prelude::*;
use actix_http::ws::Item;
use actix_web::{web, HttpRequest, HttpResponse, Result as ActixResult};
use actix_web_actors::ws;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const CLIENT_TIMEOUT: Duration = Duration::from_secs(60);

/// Largest accepted frame, and largest message reassembled from continuation
/// frames. Fragments are several seconds of uncompressed audio.
const MAX_FRAME_SIZE: usize = 32 * 1024 * 1024;

pub struct LobbyWebSocket {
    connection_id: ConnectionId,
    state: web::Data<AppState>,
    last_heartbeat: Instant,
    continuation: ContinuationBuffer,
}

/// Result of feeding one continuation frame to a [`ContinuationBuffer`].
#[derive(Debug, PartialEq)]
enum Reassembly {
    Pending,
    Complete(Vec<u8>),
    Unsupported,
    TooLarge,
}

/// Binary message being reassembled from continuation frames.
struct ContinuationBuffer {
    buffer: Option<Vec<u8>>,
    limit: usize,
}

impl ContinuationBuffer {
    fn new(limit: usize) -> Self {
        Self {
            buffer: None,
            limit,
        }
    }

    fn push(&mut self, item: Item) -> Reassembly {
        let (data, last) = match item {
            Item::FirstBinary(data) => {
                self.buffer = Some(Vec::new());
                (data, false)
            }
            Item::FirstText(_) => {
                self.buffer = None;
                return Reassembly::Unsupported;
            }
            Item::Continue(data) => (data, false),
            Item::Last(data) => (data, true),
        };

        // Stray frames without a first frame are ignored.
        let Some(buffer) = self.buffer.as_mut() else {
            return Reassembly::Pending;
        };
        if buffer.len() + data.len() > self.limit {
            self.buffer = None;
            return Reassembly::TooLarge;
        }
        buffer.extend_from_slice(&data);

        match (last, self.buffer.take()) {
            (true, Some(message)) => Reassembly::Complete(message),
            (_, pending) => {
                self.buffer = pending;
                Reassembly::Pending
            }
        }
    }
}

/// Rejection sent back to the requesting connection.
///
/// A refused `start_measurement` is reported as `measurement_failed` so the
/// host UI can show it next to the start button; everything else is `error`.
fn rejection(starting_measurement: bool, err: &LobbyError) -> ServerMessage {
    if starting_measurement {
        ServerMessage::MeasurementFailed {
            reason: err.reason().to_string(),
            message: err.to_string(),
        }
    } else {
        ServerMessage::error(err.reason(), err.to_string())
    }
}

impl LobbyWebSocket {
    pub fn new(state: web::Data<AppState>) -> Self {
        Self {
            connection_id: Uuid::new_v4(),
            state,
            last_heartbeat: Instant::now(),
            continuation: ContinuationBuffer::new(MAX_FRAME_SIZE),
        }
    }

    fn context(&self) -> LobbyContext {
        self.state.lobby_context()
    }

    fn send(&self, ctx: &mut ws::WebsocketContext<Self>, message: &ServerMessage) {
        match serde_json::to_string(message) {
            Ok(json) => ctx.text(json),
            Err(e) => error!(kind = message.kind(), "Failed to serialize message: {}", e),
        }
    }

    fn handle_text(&mut self, text: &str, ctx: &mut ws::WebsocketContext<Self>) {
        let message = match serde_json::from_str::<ClientMessage>(text) {
            Ok(message) => message,
            Err(err) => {
                debug!(connection_id = %self.connection_id, "Invalid message: {}", err);
                self.send(
                    ctx,
                    &ServerMessage::error("invalid_message", format!("Invalid message: {}", err)),
                );
                return;
            }
        };

        let lobby = self.context();
        let id = self.connection_id;
        let starting = matches!(message, ClientMessage::StartMeasurement);

        let result = match message {
            ClientMessage::CreateLobby {
                user_id,
                repetitions,
                delay,
                distances,
            } => {
                let update = SettingsUpdate {
                    repetitions,
                    delay,
                    distances,
                };
                lifecycle::create_lobby(&lobby, id, user_id, update).map(|_| ())
            }
            ClientMessage::JoinLobby { lobby_id, user_id } => {
                lifecycle::join_lobby(&lobby, id, &lobby_id, user_id).map(|_| ())
            }
            ClientMessage::ChooseDeviceType { device, index } => {
                lifecycle::choose_device_type(&lobby, id, device, index)
            }
            ClientMessage::UpdateLobbySettings {
                repetitions,
                delay,
                distances,
            } => {
                let update = SettingsUpdate {
                    repetitions,
                    delay,
                    distances,
                };
                lifecycle::update_lobby_settings(&lobby, id, update).map(|_| ())
            }
            ClientMessage::StartMeasurement => orchestrator::start_measurement(&lobby, id),
            ClientMessage::CloseLobby => lifecycle::close_lobby(&lobby, id),
            ClientMessage::Ping { timestamp } => {
                self.send(ctx, &ServerMessage::Pong { timestamp });
                Ok(())
            }
        };

        if let Err(err) = result {
            debug!(connection_id = %id, reason = err.reason(), "Request rejected: {}", err);
            self.send(ctx, &rejection(starting, &err));
        }
    }

    fn handle_continuation(&mut self, item: Item, ctx: &mut ws::WebsocketContext<Self>) {
        match self.continuation.push(item) {
            Reassembly::Pending => {}
            Reassembly::Complete(recording) => self.handle_fragment(recording, ctx),
            Reassembly::Unsupported => {
                warn!(connection_id = %self.connection_id, "Fragmented text frames are not supported");
            }
            Reassembly::TooLarge => {
                warn!(connection_id = %self.connection_id, "Fragmented message exceeds {} bytes, dropping it", MAX_FRAME_SIZE);
                self.send(
                    ctx,
                    &ServerMessage::error(
                        "message_too_large",
                        format!("Messages may not exceed {} bytes", MAX_FRAME_SIZE),
                    ),
                );
            }
        }
    }

    fn handle_fragment(&mut self, recording: Vec<u8>, ctx: &mut ws::WebsocketContext<Self>) {
        if let Err(err) = orchestrator::push_fragment(&self.context(), self.connection_id, recording)
        {
            warn!(connection_id = %self.connection_id, reason = err.reason(), "Fragment rejected: {}", err);
            self.send(ctx, &rejection(false, &err));
        }
    }
}

impl Actor for LobbyWebSocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!(connection_id = %self.connection_id, "WebSocket connection started");
        self.state
            .hub
            .register(self.connection_id, ctx.address().recipient());

        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > CLIENT_TIMEOUT {
                warn!(connection_id = %act.connection_id, "WebSocket heartbeat timeout, closing connection");
                ctx.stop();
                return;
            }

            ctx.ping(b"");
            let timestamp = chrono::Utc::now().timestamp_millis().max(0) as u64;
            act.send(ctx, &ServerMessage::Ping { timestamp });
        });
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        info!(connection_id = %self.connection_id, "WebSocket connection stopped");
        // Unregister first so teardown broadcasts skip this connection.
        self.state.hub.unregister(&self.connection_id);
        lifecycle::handle_disconnect(&self.context(), self.connection_id);
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for LobbyWebSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        let msg = match msg {
            Ok(msg) => msg,
            Err(err) => {
                error!(connection_id = %self.connection_id, "WebSocket protocol error: {}", err);
                ctx.stop();
                return;
            }
        };

        self.last_heartbeat = Instant::now();
        match msg {
            ws::Message::Text(text) => self.handle_text(&text, ctx),
            ws::Message::Binary(data) => self.handle_fragment(data.to_vec(), ctx),
            ws::Message::Continuation(item) => self.handle_continuation(item, ctx),
            ws::Message::Ping(data) => ctx.pong(&data),
            ws::Message::Pong(_) => {}
            ws::Message::Close(reason) => {
                info!(connection_id = %self.connection_id, "WebSocket closed: {:?}", reason);
                ctx.close(reason);
                ctx.stop();
            }
            ws::Message::Nop => {}
        }
    }
}

impl Handler<Outbound> for LobbyWebSocket {
    type Result = ();

    fn handle(&mut self, msg: Outbound, ctx: &mut Self::Context) {
        ctx.text(msg.0);
    }
}

/// Upgrade an HTTP request on `/ws/lobby` to a lobby connection.
pub async fn lobby_websocket(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    info!(
        peer = ?req.connection_info().peer_addr(),
        "New WebSocket connection request"
    );

    ws::WsResponseBuilder::new(LobbyWebSocket::new(state), &req, stream)
        .frame_size(MAX_FRAME_SIZE)
        .start()
}
