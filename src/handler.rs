//! WebSocket connection handler
//!
//! Handles individual client connections: authorizing the upgrade,
//! attaching the client to its room, and running the inbound and outbound
//! pumps until either side ends.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{FutureExt, Sink, SinkExt, Stream, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinError;
use tokio::time::{interval_at, timeout, timeout_at, Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::{Error as WsError, Message as Frame};
use tracing::{debug, error, info, warn};

use crate::auth::{self, Admission};
use crate::client::Client;
use crate::config::ConnectionSettings;
use crate::error::{AppError, Rejection};
use crate::message::{decode, encode_batch, split_frame, Message, MessageType};
use crate::router;
use crate::server::AppState;

/// Handle a new TCP connection
///
/// Authorizes the upgrade request, joins the room and manages the
/// connection lifecycle. Teardown runs on every exit path after the join.
pub async fn handle_connection(stream: TcpStream, state: Arc<AppState>) -> Result<(), AppError> {
    let peer_addr = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "unknown".to_string());

    debug!(peer = %peer_addr, "New TCP connection");

    let settings = state.config.connection.clone();

    // Authorization happens inside the handshake so a refused caller gets
    // an HTTP error and never becomes a client
    let mut admission: Option<Admission> = None;
    let callback = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        let result = auth::parse_query(request.uri().query())
            .and_then(|token| auth::authorize(&state.codec, state.directory.as_ref(), &token));
        match result {
            Ok(granted) => {
                admission = Some(granted);
                Ok(response)
            }
            Err(e) => {
                warn!(peer = %peer_addr, error = %e, "Upgrade rejected");
                Err(rejection_response(&e))
            }
        }
    };

    let upgrade_config = Some(ws_config(&settings));
    let ws_stream =
        tokio_tungstenite::accept_hdr_async_with_config(stream, callback, upgrade_config).await?;
    let Some(Admission { room_id, peer }) = admission else {
        return Err(AppError::Protocol("upgrade completed without admission".to_string()));
    };

    // Room -> client queue
    let (msg_tx, msg_rx) = mpsc::channel::<Message>(settings.outbound_capacity);
    let client = Arc::new(Client::new(peer, msg_tx));

    let room = state.registry.join(&room_id, Arc::clone(&client)).await?;
    info!(
        room_id = %room.id(),
        user_id = %client.id(),
        session = %client.session(),
        role = %client.role(),
        peer = %peer_addr,
        "Client connected"
    );

    let (ws_sender, ws_receiver) = ws_stream.split();

    let mut read_task = tokio::spawn(read_pump(ws_receiver, Arc::clone(&client), settings.clone()));
    let mut write_task = tokio::spawn(write_pump(
        ws_sender,
        msg_rx,
        Arc::clone(&client),
        settings.clone(),
    ));

    // Wait for either task to complete
    let writer_done = tokio::select! {
        result = &mut read_task => {
            log_pump_exit("read", client.id(), result);
            false
        }
        result = &mut write_task => {
            log_pump_exit("write", client.id(), result);
            read_task.abort();
            true
        }
    };

    // Only the first detach gets the room; a displaced session finds none
    if let Some(room) = client.detach() {
        if let Err(e) = room.remove(Arc::clone(&client)).await {
            debug!(
                room_id = %room.id(),
                user_id = %client.id(),
                error = %e,
                "Room already stopped"
            );
        }
    }
    client.close_queue();

    if !writer_done {
        match timeout(settings.write_wait, &mut write_task).await {
            Ok(result) => log_pump_exit("write", client.id(), result),
            Err(_) => {
                debug!(user_id = %client.id(), "Writer did not finish in time");
                write_task.abort();
            }
        }
    }

    info!(
        room_id = %room_id,
        user_id = %client.id(),
        session = %client.session(),
        "Client disconnected"
    );

    Ok(())
}

/// Inbound pump: frames from the socket into the router.
///
/// Ends on close, read failure, an expired read deadline or the first
/// malformed envelope.
async fn read_pump<S>(
    mut ws_receiver: S,
    client: Arc<Client>,
    settings: ConnectionSettings,
) -> Result<(), AppError>
where
    S: Stream<Item = Result<Frame, WsError>> + Unpin,
{
    let mut deadline = Instant::now() + settings.pong_wait;

    loop {
        let frame = match timeout_at(deadline, ws_receiver.next()).await {
            Err(_) => return Err(AppError::ReadTimeout),
            Ok(None) => return Ok(()),
            Ok(Some(frame)) => frame?,
        };

        let text = match frame {
            Frame::Text(text) => text.to_string(),
            Frame::Binary(data) => String::from_utf8(data.to_vec())
                .map_err(|_| AppError::Protocol("binary frame is not UTF-8".to_string()))?,
            Frame::Pong(_) => {
                deadline = Instant::now() + settings.pong_wait;
                continue;
            }
            Frame::Close(_) => {
                debug!(user_id = %client.id(), "Client sent close frame");
                return Ok(());
            }
            // Pings are answered by tungstenite
            Frame::Ping(_) | Frame::Frame(_) => continue,
        };

        deadline = Instant::now() + settings.pong_wait;

        for line in split_frame(&text) {
            let message = decode(line).map_err(|e| AppError::Protocol(e.to_string()))?;
            let kind = message.kind.clone();
            let routing = router::dispatch(&client, message, settings.pong_quiet);
            guard_routing(client.id(), &kind, routing).await;
        }
    }
}

/// Await one routing future; a failure or panic is logged and the
/// connection kept.
///
/// Returns whether routing completed without error.
async fn guard_routing<F>(user_id: &str, kind: &MessageType, routing: F) -> bool
where
    F: Future<Output = Result<(), AppError>>,
{
    match AssertUnwindSafe(routing).catch_unwind().await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            warn!(user_id = %user_id, kind = %kind, error = %e, "Failed to route message");
            false
        }
        Err(_) => {
            error!(user_id = %user_id, kind = %kind, "Panic while routing message");
            false
        }
    }
}

/// Outbound pump: queued messages onto the socket.
///
/// Coalesces everything already queued into one newline-separated frame.
/// Sends a transport ping after a quiet `ping_period`. Ends after
/// delivering a kick or when the queue is closed.
async fn write_pump<S>(
    mut ws_sender: S,
    mut msg_rx: mpsc::Receiver<Message>,
    client: Arc<Client>,
    settings: ConnectionSettings,
) -> Result<(), AppError>
where
    S: Sink<Frame, Error = WsError> + Unpin,
{
    let period = settings.ping_period();
    let mut ping_ticker = interval_at(Instant::now() + period, period);
    ping_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            received = msg_rx.recv() => {
                let Some(first) = received else {
                    debug!(user_id = %client.id(), "Outbound queue closed");
                    let _ = timeout(settings.write_wait, ws_sender.close()).await;
                    return Ok(());
                };

                let mut batch = vec![first];
                while let Ok(next) = msg_rx.try_recv() {
                    batch.push(next);
                }
                let kicked = batch.iter().any(|m| m.kind == MessageType::Kick);

                let frame = encode_batch(&batch)?;
                write_frame(&mut ws_sender, Frame::Text(frame.into()), settings.write_wait).await?;
                client.touch();
                ping_ticker.reset();

                if kicked {
                    debug!(user_id = %client.id(), "Kick delivered, closing connection");
                    let _ = timeout(settings.write_wait, ws_sender.close()).await;
                    return Ok(());
                }
            }
            _ = ping_ticker.tick() => {
                let ping = Frame::Ping(Vec::<u8>::new().into());
                write_frame(&mut ws_sender, ping, settings.write_wait).await?;
            }
        }
    }
}

async fn write_frame<S>(
    ws_sender: &mut S,
    frame: Frame,
    write_wait: Duration,
) -> Result<(), AppError>
where
    S: Sink<Frame, Error = WsError> + Unpin,
{
    match timeout(write_wait, ws_sender.send(frame)).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(AppError::WriteTimeout),
    }
}

fn ws_config(settings: &ConnectionSettings) -> WebSocketConfig {
    let mut config = WebSocketConfig::default();
    config.max_message_size = Some(settings.max_message_size);
    config.max_frame_size = Some(settings.max_message_size);
    config
}

/// HTTP response refusing an upgrade
fn rejection_response(err: &AppError) -> ErrorResponse {
    let body = serde_json::to_string(&Rejection::from(err)).ok();
    let mut response = ErrorResponse::new(body);
    *response.status_mut() = err.status();
    response
}

fn log_pump_exit(pump: &str, user_id: &str, result: Result<Result<(), AppError>, JoinError>) {
    match result {
        Ok(Ok(())) => debug!(user_id = %user_id, pump, "Pump finished"),
        Ok(Err(AppError::Protocol(reason))) => {
            warn!(user_id = %user_id, pump, reason = %reason, "Protocol violation")
        }
        Ok(Err(e)) => debug!(user_id = %user_id, pump, error = %e, "Pump ended with error"),
        Err(e) if e.is_cancelled() => debug!(user_id = %user_id, pump, "Pump cancelled"),
        Err(e) => error!(user_id = %user_id, pump, error = %e, "Pump task failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Peer;
    use crate::types::Role;
    use tokio::io::DuplexStream;
    use tokio_tungstenite::tungstenite::http::StatusCode;
    use tokio_tungstenite::tungstenite::protocol::Role as WsRole;
    use tokio_tungstenite::WebSocketStream;

    async fn socket_pair() -> (WebSocketStream<DuplexStream>, WebSocketStream<DuplexStream>) {
        socket_pair_with(None).await
    }

    /// Server side limited by `config`, remote side unlimited
    async fn socket_pair_with(
        config: Option<WebSocketConfig>,
    ) -> (WebSocketStream<DuplexStream>, WebSocketStream<DuplexStream>) {
        let (server_io, client_io) = tokio::io::duplex(64 * 1024);
        let server = WebSocketStream::from_raw_socket(server_io, WsRole::Server, config).await;
        let client = WebSocketStream::from_raw_socket(client_io, WsRole::Client, None).await;
        (server, client)
    }

    fn test_client(capacity: usize) -> (Arc<Client>, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(capacity);
        let peer = Peer {
            id: "u1".to_string(),
            role: Role::PARTICIPANT,
            ..Peer::default()
        };
        (Arc::new(Client::new(peer, tx)), rx)
    }

    #[tokio::test]
    async fn test_writer_coalesces_queued_messages() {
        let (server, mut remote) = socket_pair().await;
        let (sink, _stream) = server.split();
        let (client, rx) = test_client(8);

        client
            .send(Message::new(MessageType::Chat, None, "one".into()))
            .unwrap();
        client
            .send(Message::new(MessageType::Chat, None, "two".into()))
            .unwrap();
        let settings = ConnectionSettings::default();
        let writer = tokio::spawn(write_pump(sink, rx, client.clone(), settings));

        let frame = remote.next().await.unwrap().unwrap();
        let text = frame.into_text().unwrap();
        let lines: Vec<&str> = split_frame(&text).collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(decode(lines[1]).unwrap().data, "two");

        client.close_queue();
        assert!(matches!(remote.next().await, Some(Ok(Frame::Close(_)))));
        assert!(writer.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_writer_closes_after_kick() {
        let (server, mut remote) = socket_pair().await;
        let (sink, _stream) = server.split();
        let (client, rx) = test_client(8);

        client.kick("bye");
        let settings = ConnectionSettings::default();
        let writer = tokio::spawn(write_pump(sink, rx, client.clone(), settings));

        let text = remote.next().await.unwrap().unwrap().into_text().unwrap();
        let kick = decode(&text).unwrap();
        assert_eq!(kick.kind, MessageType::Kick);
        assert_eq!(kick.data, "bye");

        assert!(matches!(remote.next().await, Some(Ok(Frame::Close(_)))));
        assert!(writer.await.unwrap().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reader_times_out_without_traffic() {
        let (server, _remote) = socket_pair().await;
        let (_sink, stream) = server.split();
        let (client, _rx) = test_client(8);

        let result = read_pump(stream, client, ConnectionSettings::default()).await;
        assert!(matches!(result, Err(AppError::ReadTimeout)));
    }

    #[tokio::test]
    async fn test_reader_rejects_malformed_envelope() {
        let (server, mut remote) = socket_pair().await;
        let (_sink, stream) = server.split();
        let (client, _rx) = test_client(8);

        remote
            .send(Frame::Text("{\"type\":\"ping\"}\n{not json".to_string().into()))
            .await
            .unwrap();

        let result = read_pump(stream, client, ConnectionSettings::default()).await;
        assert!(matches!(result, Err(AppError::Protocol(_))));
    }

    #[tokio::test]
    async fn test_reader_ends_on_close() {
        let (server, mut remote) = socket_pair().await;
        let (_sink, stream) = server.split();
        let (client, _rx) = test_client(8);

        remote.close(None).await.unwrap();

        let result = read_pump(stream, client, ConnectionSettings::default()).await;
        assert!(result.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_writer_pings_after_quiet_period() {
        let (server, mut remote) = socket_pair().await;
        let (sink, _stream) = server.split();
        let (client, rx) = test_client(8);
        let settings = ConnectionSettings::default();
        let period = settings.ping_period();
        let _writer = tokio::spawn(write_pump(sink, rx, client.clone(), settings));

        let early = timeout(period - Duration::from_secs(1), remote.next()).await;
        assert!(early.is_err(), "ping sent before the quiet period");

        assert!(matches!(remote.next().await, Some(Ok(Frame::Ping(_)))));
    }

    #[tokio::test]
    async fn test_reader_rejects_oversized_message() {
        let settings = ConnectionSettings {
            max_message_size: 1024,
            ..ConnectionSettings::default()
        };
        let (server, mut remote) = socket_pair_with(Some(ws_config(&settings))).await;
        let (_sink, stream) = server.split();
        let (client, _rx) = test_client(8);

        let oversized = format!("{{\"type\":\"chat\",\"data\":\"{}\"}}", "x".repeat(4096));
        remote.send(Frame::Text(oversized.into())).await.unwrap();

        let result = read_pump(stream, client, settings).await;
        assert!(matches!(result, Err(AppError::WebSocket(WsError::Capacity(_)))));
    }

    async fn panicking_route() -> Result<(), AppError> {
        panic!("routing bug")
    }

    #[tokio::test]
    async fn test_routing_panic_is_contained() {
        let kind = MessageType::Chat;

        assert!(!guard_routing("u1", &kind, panicking_route()).await);

        let closed = async { Err::<(), _>(AppError::RoomClosed("r1".to_string())) };
        assert!(!guard_routing("u1", &kind, closed).await);

        assert!(guard_routing("u1", &kind, async { Ok::<(), AppError>(()) }).await);
    }

    #[test]
    fn test_rejection_response() {
        let err = AppError::from(crate::error::SignatureError::InvalidSignature);
        let response = rejection_response(&err);
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(response
            .body()
            .as_deref()
            .unwrap_or_default()
            .contains("invalid_signature"));
    }

    #[test]
    fn test_ws_config_limits() {
        let settings = ConnectionSettings::default();
        let config = ws_config(&settings);
        assert_eq!(config.max_message_size, Some(settings.max_message_size));
    }
}
