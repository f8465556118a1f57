//! Transport lifecycle for the room socket: dialing, closure detection and
//! the pluggable reconnect policy.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use rand::Rng;
use tokio::{
    sync::mpsc,
    time::{self, Instant},
};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};
use url::Url;

use crate::error::TransportError;

const OUTBOUND_BUFFER: usize = 256;
const INBOUND_BUFFER: usize = 1024;
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_STABLE_AFTER: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Message(String),
    Closed(String),
}

/// An open room socket. Frames are written through `outbound`; frames and the
/// final close notification arrive on `inbound` in wire order.
pub struct Connection {
    pub outbound: mpsc::Sender<String>,
    pub inbound: mpsc::Receiver<ConnectionEvent>,
}

#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, endpoint: &Url) -> Result<Connection, TransportError>;
}

pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, endpoint: &Url) -> Result<Connection, TransportError> {
        let (ws_stream, _) =
            connect_async(endpoint.as_str())
                .await
                .map_err(|err| TransportError::Connect {
                    endpoint: endpoint.to_string(),
                    reason: err.to_string(),
                })?;
        let (mut ws_writer, mut ws_reader) = ws_stream.split();
        let (outbound, mut outbound_rx) = mpsc::channel::<String>(OUTBOUND_BUFFER);
        let (inbound_tx, inbound) = mpsc::channel(INBOUND_BUFFER);

        tokio::spawn(async move {
            while let Some(frame) = outbound_rx.recv().await {
                if let Err(err) = ws_writer.send(Message::Text(frame)).await {
                    warn!(error = %err, "websocket send failed");
                    break;
                }
            }
            let _ = ws_writer.close().await;
        });

        tokio::spawn(async move {
            let reason = loop {
                match ws_reader.next().await {
                    Some(Ok(Message::Text(text))) => {
                        if inbound_tx.send(ConnectionEvent::Message(text)).await.is_err() {
                            return;
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        break frame
                            .map(|frame| format!("{} {}", u16::from(frame.code), frame.reason))
                            .unwrap_or_else(|| "closed by server".to_string());
                    }
                    Some(Ok(_)) => debug!("ignoring non-text websocket frame"),
                    Some(Err(err)) => break format!("websocket receive failed: {err}"),
                    None => break "stream ended".to_string(),
                }
            };
            let _ = inbound_tx.send(ConnectionEvent::Closed(reason)).await;
        });

        Ok(Connection { outbound, inbound })
    }
}

/// Builds the socket URL for a room from the HTTP base URL of the server.
pub fn room_endpoint(server_url: &str, room: &str) -> Result<Url, TransportError> {
    let ws_url = if server_url.starts_with("https://") {
        server_url.replacen("https://", "wss://", 1)
    } else if server_url.starts_with("http://") {
        server_url.replacen("http://", "ws://", 1)
    } else {
        return Err(TransportError::InvalidEndpoint(format!(
            "server_url must start with http:// or https://, got '{server_url}'"
        )));
    };
    if room.trim().is_empty() {
        return Err(TransportError::InvalidEndpoint("room name is empty".into()));
    }

    let mut url =
        Url::parse(&ws_url).map_err(|err| TransportError::InvalidEndpoint(err.to_string()))?;
    url.path_segments_mut()
        .map_err(|_| TransportError::InvalidEndpoint(format!("'{server_url}' cannot be a base")))?
        .pop_if_empty()
        .extend(["ws", "chat", room, ""]);
    Ok(url)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Reconnecting { attempt: u32, retry_in: Duration },
    /// Reconnect attempts are exhausted. Persistent.
    Disconnected,
}

pub trait ReconnectPolicy: Send + Sync {
    /// Delay before retry number `attempt` (1-based), or `None` to give up.
    fn next_delay(&mut self, attempt: u32) -> Option<Duration>;
}

#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    pub base: Duration,
    pub factor: f64,
    pub cap: Duration,
    /// Fraction of the delay added or removed at random, e.g. `0.2` for ±20%.
    pub jitter: f64,
    pub max_attempts: Option<u32>,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            factor: 2.0,
            cap: Duration::from_secs(30),
            jitter: 0.2,
            max_attempts: None,
        }
    }
}

impl ExponentialBackoff {
    pub fn nominal_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let millis = self.base.as_millis() as f64 * self.factor.powi(exponent);
        let capped = millis.min(self.cap.as_millis() as f64).max(0.0);
        Duration::from_millis(capped as u64)
    }
}

impl ReconnectPolicy for ExponentialBackoff {
    fn next_delay(&mut self, attempt: u32) -> Option<Duration> {
        if self.max_attempts.is_some_and(|max| attempt > max) {
            return None;
        }
        let nominal = self.nominal_delay(attempt);
        if self.jitter <= 0.0 {
            return Some(nominal);
        }
        let jitter = self.jitter.min(1.0);
        let scale = 1.0 + rand::rng().random_range(-jitter..=jitter);
        Some(nominal.mul_f64(scale))
    }
}

/// Gives up on the first failure.
pub struct NoReconnect;

impl ReconnectPolicy for NoReconnect {
    fn next_delay(&mut self, _attempt: u32) -> Option<Duration> {
        None
    }
}

/// Owns the endpoint, the transport and the retry bookkeeping for one room.
///
/// The failure count only resets once a connection has stayed open for
/// `stable_after`; a server that accepts and immediately drops keeps counting
/// toward the policy's limit.
pub struct ConnectionManager {
    endpoint: Url,
    connector: Arc<dyn Connector>,
    policy: Box<dyn ReconnectPolicy>,
    connect_timeout: Duration,
    stable_after: Duration,
    failures: u32,
    opened_at: Option<Instant>,
    opened_before: bool,
}

impl ConnectionManager {
    pub fn new(
        endpoint: Url,
        connector: Arc<dyn Connector>,
        policy: Box<dyn ReconnectPolicy>,
    ) -> Self {
        Self {
            endpoint,
            connector,
            policy,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            stable_after: DEFAULT_STABLE_AFTER,
            failures: 0,
            opened_at: None,
            opened_before: false,
        }
    }

    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    pub fn with_stable_after(mut self, stable_after: Duration) -> Self {
        self.stable_after = stable_after;
        self
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Dials once. A dial that outlives `connect_timeout` counts as failed.
    pub async fn connect(&self) -> Result<Connection, TransportError> {
        match time::timeout(self.connect_timeout, self.connector.connect(&self.endpoint)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Connect {
                endpoint: self.endpoint.to_string(),
                reason: format!("timed out after {}ms", self.connect_timeout.as_millis()),
            }),
        }
    }

    /// Returns `true` if this open is a reconnect.
    pub fn on_open(&mut self) -> bool {
        self.opened_at = Some(Instant::now());
        let reconnect = self.opened_before;
        self.opened_before = true;
        info!(endpoint = %self.endpoint, reconnect, failures = self.failures, "room connection open");
        reconnect
    }

    /// Records a failed dial or a dropped connection and asks the policy for
    /// the next delay. `None` means the session is disconnected for good.
    pub fn on_failure(&mut self) -> Option<(u32, Duration)> {
        if let Some(opened_at) = self.opened_at.take() {
            if opened_at.elapsed() >= self.stable_after {
                self.failures = 0;
            } else {
                debug!(endpoint = %self.endpoint, "connection dropped before it was stable");
            }
        }
        self.failures = self.failures.saturating_add(1);
        let attempt = self.failures;
        self.policy
            .next_delay(attempt)
            .map(|delay| (attempt, delay))
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_up_to_the_cap() {
        let mut policy = ExponentialBackoff {
            jitter: 0.0,
            ..ExponentialBackoff::default()
        };
        let delays: Vec<u64> = (1..=8)
            .map(|attempt| policy.next_delay(attempt).expect("delay").as_secs())
            .collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 30, 30, 30]);
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let mut policy = ExponentialBackoff::default();
        for _ in 0..200 {
            let delay = policy.next_delay(3).expect("delay");
            assert!(delay >= Duration::from_millis(3190), "{delay:?}");
            assert!(delay <= Duration::from_millis(4810), "{delay:?}");
        }
    }

    #[test]
    fn bounded_policy_gives_up() {
        let mut policy = ExponentialBackoff {
            max_attempts: Some(2),
            ..ExponentialBackoff::default()
        };
        assert!(policy.next_delay(2).is_some());
        assert!(policy.next_delay(3).is_none());
        assert!(NoReconnect.next_delay(1).is_none());
    }

    struct StalledConnector;

    #[async_trait]
    impl Connector for StalledConnector {
        async fn connect(&self, _endpoint: &Url) -> Result<Connection, TransportError> {
            std::future::pending().await
        }
    }

    fn manager(policy: ExponentialBackoff) -> ConnectionManager {
        let endpoint = Url::parse("ws://chat.test/ws/chat/general/").expect("url");
        ConnectionManager::new(endpoint, Arc::new(StalledConnector), Box::new(policy))
    }

    fn fixed(max_attempts: Option<u32>) -> ExponentialBackoff {
        ExponentialBackoff {
            jitter: 0.0,
            max_attempts,
            ..ExponentialBackoff::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn drops_right_after_open_keep_counting() {
        let mut manager = manager(fixed(Some(2)));

        manager.on_open();
        assert_eq!(manager.on_failure(), Some((1, Duration::from_secs(1))));
        manager.on_open();
        assert_eq!(manager.on_failure(), Some((2, Duration::from_secs(2))));
        manager.on_open();
        assert_eq!(manager.on_failure(), None);
        assert_eq!(manager.failures(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn stable_connection_resets_the_count() {
        let mut manager = manager(fixed(None)).with_stable_after(Duration::from_secs(5));

        assert!(manager.on_failure().is_some());
        assert!(manager.on_failure().is_some());
        manager.on_open();
        time::advance(Duration::from_secs(5)).await;
        assert_eq!(manager.on_failure(), Some((1, Duration::from_secs(1))));
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_dial_times_out() {
        let manager = manager(fixed(None)).with_connect_timeout(Duration::from_secs(3));
        let started = Instant::now();

        let err = manager.connect().await.err().expect("must time out");
        assert!(matches!(err, TransportError::Connect { .. }), "{err:?}");
        assert!(started.elapsed() >= Duration::from_secs(3));
    }

    #[test]
    fn room_endpoint_maps_scheme_and_path() {
        let url = room_endpoint("https://chat.example.com", "general").expect("url");
        assert_eq!(url.as_str(), "wss://chat.example.com/ws/chat/general/");

        let url = room_endpoint("http://127.0.0.1:8000/", "dev room").expect("url");
        assert_eq!(url.as_str(), "ws://127.0.0.1:8000/ws/chat/dev%20room/");

        assert!(room_endpoint("ftp://example.com", "general").is_err());
        assert!(room_endpoint("http://example.com", " ").is_err());
    }
}
