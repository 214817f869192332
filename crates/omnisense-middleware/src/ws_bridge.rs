//! [`WsBridge`] – WebSocket transport for snapshots and operator commands.
//!
//! Each accepted client gets its own task:
//!
//! * **Downstream**: every event on [`Topic::Snapshots`], [`Topic::Alerts`]
//!   and [`Topic::Status`] is serialised to JSON and sent as a text frame.
//! * **Upstream**: text frames are parsed with [`parse_command`] and pushed
//!   onto the loop's command channel.  Malformed frames are logged and
//!   dropped, and a per-client rate limit discards command floods.
//!
//! A failing client only ends its own task.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use omnisense_middleware::{EventBus, WsBridge};
//! use tokio::sync::mpsc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let bus = Arc::new(EventBus::default());
//!     let (tx, _rx) = mpsc::channel(32);
//!     WsBridge::new(bus, tx).with_port(9090).run().await.ok();
//! }
//! ```

use std::net::SocketAddr;
use std::num::NonZeroU32;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use omnisense_types::{Event, OmniError, OperatorCommand};
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::bus::{EventBus, Topic};

pub const DEFAULT_PORT: u16 = 8765;

/// Inbound commands accepted per second per client.
const DEFAULT_COMMAND_RATE: u32 = 20;

// ---------------------------------------------------------------------------
// Command parsing
// ---------------------------------------------------------------------------

/// Decode one inbound text frame.
///
/// Besides the tagged [`OperatorCommand`] encoding, a `move` carrying raw
/// `m1`/`m2`/`m3` wheel values is accepted and mapped to
/// [`OperatorCommand::MoveRaw`].
pub fn parse_command(text: &str) -> Result<OperatorCommand, OmniError> {
    let value: Value = serde_json::from_str(text)
        .map_err(|e| OmniError::MalformedCommand(format!("invalid JSON: {e}")))?;

    if value.get("type").and_then(Value::as_str) == Some("move") && value.get("m1").is_some() {
        let wheel = |name: &str| -> Result<i32, OmniError> {
            value
                .get(name)
                .and_then(Value::as_i64)
                .and_then(|v| i32::try_from(v).ok())
                .ok_or_else(|| OmniError::MalformedCommand(format!("'{name}' must be an integer")))
        };
        return Ok(OperatorCommand::MoveRaw {
            m1: wheel("m1")?,
            m2: wheel("m2")?,
            m3: wheel("m3")?,
        });
    }

    serde_json::from_value(value).map_err(|e| OmniError::MalformedCommand(e.to_string()))
}

// ---------------------------------------------------------------------------
// WsBridge
// ---------------------------------------------------------------------------

pub struct WsBridge {
    bus: Arc<EventBus>,
    commands: mpsc::Sender<OperatorCommand>,
    port: u16,
    command_rate: u32,
}

impl WsBridge {
    pub fn new(bus: Arc<EventBus>, commands: mpsc::Sender<OperatorCommand>) -> Self {
        Self {
            bus,
            commands,
            port: DEFAULT_PORT,
            command_rate: DEFAULT_COMMAND_RATE,
        }
    }

    /// Override the listening port (builder-style).  `0` picks a free port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Override the per-client inbound command rate (builder-style).
    pub fn with_command_rate(mut self, per_second: u32) -> Self {
        self.command_rate = per_second;
        self
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Bind the listener without serving yet.
    ///
    /// # Errors
    ///
    /// Returns [`OmniError::Config`] when the port cannot be bound.
    pub async fn bind(&self) -> Result<TcpListener, OmniError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        TcpListener::bind(addr)
            .await
            .map_err(|e| OmniError::Config(format!("bridge bind error on {addr}: {e}")))
    }

    /// Bind and serve until the task is dropped.
    pub async fn run(self) -> Result<(), OmniError> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }

    /// Accept clients on an already bound listener.
    pub async fn serve(self, listener: TcpListener) -> Result<(), OmniError> {
        if let Ok(addr) = listener.local_addr() {
            info!(%addr, "snapshot bridge listening");
        }
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    let bus = Arc::clone(&self.bus);
                    let commands = self.commands.clone();
                    let rate = self.command_rate;
                    tokio::spawn(async move {
                        if let Err(e) = handle_client(stream, peer, bus, commands, rate).await {
                            warn!(%peer, error = %e, "bridge client error");
                        }
                        debug!(%peer, "bridge client disconnected");
                    });
                }
                Err(e) => warn!(error = %e, "bridge accept error"),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Per-client handler
// ---------------------------------------------------------------------------

fn limiter(per_second: u32) -> DefaultDirectRateLimiter {
    let rate = NonZeroU32::new(per_second).unwrap_or(NonZeroU32::MIN);
    RateLimiter::direct(Quota::per_second(rate))
}

async fn handle_client(
    stream: TcpStream,
    peer: SocketAddr,
    bus: Arc<EventBus>,
    commands: mpsc::Sender<OperatorCommand>,
    command_rate: u32,
) -> Result<(), OmniError> {
    let ws = accept_async(stream)
        .await
        .map_err(|e| OmniError::Channel(format!("handshake from {peer}: {e}")))?;
    info!(%peer, "bridge client connected");

    let (mut ws_tx, mut ws_rx) = ws.split();
    let mut snapshots = bus.subscribe_to(Topic::Snapshots);
    let mut alerts = bus.subscribe_to(Topic::Alerts);
    let mut status = bus.subscribe_to(Topic::Status);
    let limiter = limiter(command_rate);

    loop {
        let outbound: Option<Event> = tokio::select! {
            // ── Downstream: bus → client ──────────────────────────────────
            res = snapshots.recv() => match res {
                Ok(event) => Some(event),
                Err(RecvError::Lagged(n)) => {
                    debug!(%peer, skipped = n, "client lagging; snapshots dropped");
                    None
                }
                Err(RecvError::Closed) => break,
            },
            res = alerts.recv() => match res {
                Ok(event) => Some(event),
                Err(RecvError::Lagged(_)) => None,
                Err(RecvError::Closed) => break,
            },
            res = status.recv() => match res {
                Ok(event) => Some(event),
                Err(RecvError::Lagged(_)) => None,
                Err(RecvError::Closed) => break,
            },
            // ── Upstream: client → command channel ────────────────────────
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if limiter.check().is_err() {
                            warn!(%peer, "command rate exceeded; frame dropped");
                            continue;
                        }
                        match parse_command(text.as_str()) {
                            Ok(cmd) => {
                                debug!(%peer, ?cmd, "command received");
                                if commands.send(cmd).await.is_err() {
                                    let closed = "command channel closed".to_string();
                                    return Err(OmniError::Channel(closed));
                                }
                            }
                            Err(e) => warn!(%peer, error = %e, "malformed command ignored"),
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        return Err(OmniError::Channel(format!("read from {peer}: {e}")));
                    }
                }
                None
            }
        };

        if let Some(event) = outbound {
            let json = serde_json::to_string(&event)
                .map_err(|e| OmniError::Serialization(e.to_string()))?;
            ws_tx
                .send(Message::Text(json.into()))
                .await
                .map_err(|e| OmniError::Channel(format!("write to {peer}: {e}")))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use omnisense_types::{Direction, EventPayload, ModeFlags, NavigationDecision, Snapshot};
    use std::collections::BTreeMap;
    use std::time::Duration;
    use tokio_tungstenite::connect_async;
    use uuid::Uuid;

    #[test]
    fn parses_tagged_commands() {
        assert_eq!(
            parse_command(r#"{"type":"move","direction":"rotate_right","speed":90}"#).unwrap(),
            OperatorCommand::Move {
                direction: Direction::Rotate,
                speed: 90
            }
        );
        assert_eq!(
            parse_command(r#"{"type":"connect_serial","port":"/dev/ttyACM0"}"#).unwrap(),
            OperatorCommand::ConnectSerial {
                port: "/dev/ttyACM0".to_string()
            }
        );
        assert_eq!(
            parse_command(r#"{"type":"list_ports"}"#).unwrap(),
            OperatorCommand::ListPorts
        );
    }

    #[test]
    fn legacy_move_with_wheels_becomes_move_raw() {
        assert_eq!(
            parse_command(r#"{"type":"move","m1":10,"m2":-20,"m3":30}"#).unwrap(),
            OperatorCommand::MoveRaw {
                m1: 10,
                m2: -20,
                m3: 30
            }
        );
        assert!(parse_command(r#"{"type":"move","m1":10,"m2":"x","m3":30}"#).is_err());
    }

    #[test]
    fn malformed_frames_are_rejected() {
        for bad in ["not json", r#"{"type":"fly"}"#, r#"{"type":"move","direction":"up"}"#] {
            assert!(matches!(
                parse_command(bad),
                Err(OmniError::MalformedCommand(_))
            ));
        }
    }

    #[tokio::test]
    async fn client_receives_snapshots_and_sends_commands()
    -> Result<(), Box<dyn std::error::Error>> {
        let bus = Arc::new(EventBus::default());
        let (tx, mut rx) = mpsc::channel(8);
        let bridge = WsBridge::new(Arc::clone(&bus), tx).with_port(0);
        let listener = bridge.bind().await?;
        let port = listener.local_addr()?.port();
        tokio::spawn(bridge.serve(listener));

        let (mut client, _) = connect_async(format!("ws://127.0.0.1:{port}")).await?;

        client
            .send(Message::Text(r#"{"type":"set_autonomous","enabled":true,"speed":120}"#.into()))
            .await?;
        client.send(Message::Text("garbage".into())).await?;
        client
            .send(Message::Text(r#"{"type":"set_autonomous_speed","speed":80}"#.into()))
            .await?;

        let first = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await?;
        assert_eq!(
            first,
            Some(OperatorCommand::SetAutonomous {
                enabled: true,
                speed: Some(120)
            })
        );
        let second = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await?;
        assert_eq!(second, Some(OperatorCommand::SetAutonomousSpeed { speed: 80 }));

        // Once the client task is subscribed, published snapshots arrive.
        while bus.subscriber_count(Topic::Snapshots) == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        bus.publish_snapshot(
            "test",
            Snapshot {
                id: Uuid::new_v4(),
                timestamp: Utc::now(),
                cycle: 42,
                cycle_time_ms: 2.0,
                obstacle_reports: BTreeMap::new(),
                tracked_objects: Vec::new(),
                navigation_decision: NavigationDecision::stop(),
                mode: ModeFlags::default(),
            },
        );
        let frame = tokio::time::timeout(Duration::from_secs(2), client.next())
            .await?
            .ok_or("stream ended")??;
        let event: Event = serde_json::from_str(frame.to_text()?)?;
        match event.payload {
            EventPayload::Snapshot(s) => assert_eq!(s.cycle, 42),
            other => panic!("unexpected payload {other:?}"),
        }

        // Acknowledgements reach the client too.
        bus.publish_status(
            "test",
            EventPayload::SerialStatus {
                connected: true,
                port: Some("/dev/ttyACM0".to_string()),
            },
        );
        let frame = tokio::time::timeout(Duration::from_secs(2), client.next())
            .await?
            .ok_or("stream ended")??;
        let event: Event = serde_json::from_str(frame.to_text()?)?;
        match event.payload {
            EventPayload::SerialStatus { connected, port } => {
                assert!(connected);
                assert_eq!(port.as_deref(), Some("/dev/ttyACM0"));
            }
            other => panic!("unexpected payload {other:?}"),
        }
        Ok(())
    }
}
