//! Reconnecting socket client with channel subscriptions.
//!
//! [`SocketClient`] keeps one WebSocket open, fans inbound `event` and `ack`
//! frames out to handlers keyed by [`MessageKind`], and maintains a set of
//! channel subscriptions that outlives any single connection.
//!
//! Subscription invariant: while the socket is open every change to the set
//! is sent immediately; while it is not, changes only touch the set. Each
//! time a connection opens, one `subscribe` per channel in the set is sent,
//! in channel order, before any other outbound frame.

mod connector;
mod message;

pub use connector::{FrameSink, FrameSource, SocketConnector, SocketLink, WsConnector};
pub use message::{MessageKind, SocketEvent, SocketMessage};

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use pulse_core::backoff::DEFAULT_MAX_RECONNECT_ATTEMPTS;
use pulse_core::{
    BackoffPolicy, Channel, ConnectionState, Handler, HandlerRegistry, LifecycleEvent,
    TransportError,
};
use reqwest::Url;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::lifecycle::{Lifecycle, ReconnectPolicy, Session};
use crate::url::{redacted, with_token};

/// Time allowed for a close handshake when disconnecting.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Reconnect tuning for a [`SocketClient`].
#[derive(Clone, Copy, Debug)]
pub struct SocketConfig {
    /// Delay law between reconnect attempts.
    pub backoff: BackoffPolicy,
    /// Consecutive failures after which reconnecting stops.
    pub max_reconnect_attempts: u32,
    /// Timeout for the opening handshake.
    pub connect_timeout: Duration,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            backoff: BackoffPolicy::default(),
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

struct Shared {
    lifecycle: Lifecycle,
    handlers: HandlerRegistry<MessageKind, SocketEvent>,
    channels: Mutex<Channels>,
    connect_timeout: Duration,
}

#[derive(Default)]
struct Channels {
    subscribed: BTreeSet<Channel>,
    /// Outbound queue of the open connection, tagged with its generation.
    outbound: Option<(u64, mpsc::UnboundedSender<SocketMessage>)>,
}

/// Reconnecting WebSocket client.
///
/// Must be used from within a Tokio runtime. Dropping the client disconnects it.
pub struct SocketClient {
    shared: Arc<Shared>,
    connector: Arc<dyn SocketConnector>,
}

impl SocketClient {
    /// Client using [`WsConnector`].
    pub fn new(config: SocketConfig) -> Self {
        Self::with_connector(config, Arc::new(WsConnector))
    }

    /// Client using a custom connector.
    pub fn with_connector(config: SocketConfig, connector: Arc<dyn SocketConnector>) -> Self {
        let policy = ReconnectPolicy {
            backoff: config.backoff,
            max_attempts: config.max_reconnect_attempts,
        };
        Self {
            shared: Arc::new(Shared {
                lifecycle: Lifecycle::new("socket", policy),
                handlers: HandlerRegistry::new(),
                channels: Mutex::new(Channels::default()),
                connect_timeout: config.connect_timeout,
            }),
            connector,
        }
    }

    /// Open a socket to `url`, replacing any existing connection.
    ///
    /// The token is sent as the `token` query parameter. Subscriptions made
    /// before this call are sent as soon as the socket opens.
    pub fn connect(&self, url: &str, token: &str) -> Result<(), TransportError> {
        let url = with_token(url, token, &["ws", "wss"])?;
        let session = self.shared.lifecycle.begin();
        info!(url = %redacted(&url), generation = session.generation(), "connecting socket");
        drop(tokio::spawn(drive(
            self.shared.clone(),
            self.connector.clone(),
            url,
            session,
        )));
        Ok(())
    }

    /// Add `channel` to the subscription set.
    pub fn subscribe(&self, channel: impl Into<Channel>) {
        let channel = channel.into();
        let mut channels = self.shared.channels.lock();
        if !channels.subscribed.insert(channel.clone()) {
            debug!(%channel, "already subscribed");
            return;
        }
        match &channels.outbound {
            Some((_, tx)) => {
                debug!(%channel, "subscribing");
                let _ = tx.send(SocketMessage::Subscribe { channel });
            }
            None => debug!(%channel, "socket not open, subscription queued"),
        }
    }

    /// Remove `channel` from the subscription set.
    pub fn unsubscribe(&self, channel: &str) {
        let mut channels = self.shared.channels.lock();
        if !channels.subscribed.remove(channel) {
            return;
        }
        if let Some((_, tx)) = &channels.outbound {
            debug!(channel, "unsubscribing");
            let _ = tx.send(SocketMessage::Unsubscribe {
                channel: Channel::from(channel),
            });
        }
    }

    /// Current subscription set, in replay order.
    pub fn subscriptions(&self) -> Vec<Channel> {
        self.shared.channels.lock().subscribed.iter().cloned().collect()
    }

    /// Register `handler` for messages of `kind`.
    pub fn on(&self, kind: MessageKind, handler: Handler<SocketEvent>) {
        self.shared.handlers.on(kind, handler);
    }

    /// Remove `handler` from `kind`. Returns `false` if it was not registered.
    pub fn off(&self, kind: MessageKind, handler: &Handler<SocketEvent>) -> bool {
        self.shared.handlers.off(&kind, handler)
    }

    /// Close the socket, cancel any pending reconnect, and drop all
    /// subscriptions and handlers.
    ///
    /// Safe to call repeatedly.
    pub fn disconnect(&self) {
        if self.shared.lifecycle.shutdown() {
            info!("socket disconnected");
        }
        {
            let mut channels = self.shared.channels.lock();
            channels.subscribed.clear();
            channels.outbound = None;
        }
        self.shared.handlers.clear();
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.shared.lifecycle.state()
    }

    /// Reconnect attempts consumed since the last successful open.
    pub fn reconnect_attempts(&self) -> u32 {
        self.shared.lifecycle.attempts()
    }

    /// Receiver that observes every state change.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.shared.lifecycle.watch()
    }
}

impl Drop for SocketClient {
    fn drop(&mut self) {
        let _ = self.shared.lifecycle.shutdown();
    }
}

impl std::fmt::Debug for SocketClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SocketClient")
            .field("lifecycle", &self.shared.lifecycle)
            .field("subscriptions", &self.shared.channels.lock().subscribed.len())
            .finish_non_exhaustive()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Driver
// ─────────────────────────────────────────────────────────────────────────────

/// How one open connection ended.
enum Outcome {
    /// Session cancelled or superseded.
    Cancelled,
    /// Server sent a normal close.
    CleanClose,
    /// Connection lost.
    Failed(TransportError),
}

async fn drive(
    shared: Arc<Shared>,
    connector: Arc<dyn SocketConnector>,
    url: Url,
    session: Session,
) {
    loop {
        let opened = tokio::select! {
            biased;
            () = session.cancelled() => return,
            result = tokio::time::timeout(shared.connect_timeout, connector.connect(&url)) => {
                result.unwrap_or_else(|_| Err(TransportError::Timeout {
                    timeout_ms: u64::try_from(shared.connect_timeout.as_millis()).unwrap_or(u64::MAX),
                }))
            }
        };

        let failure = match opened {
            Ok(link) => match serve(&shared, link, &session).await {
                Outcome::Cancelled => return,
                Outcome::CleanClose => {
                    if shared.lifecycle.apply(&session, LifecycleEvent::ClosedCleanly) {
                        info!(generation = session.generation(), "socket closed by server");
                    }
                    return;
                }
                Outcome::Failed(err) => err,
            },
            Err(err) => err,
        };

        warn!(error = %failure, generation = session.generation(), "socket connection failed");
        if !shared.lifecycle.apply(&session, LifecycleEvent::Failed) {
            return;
        }
        let Some(delay) = shared.lifecycle.next_retry(&session) else {
            return;
        };
        tokio::select! {
            biased;
            () = session.cancelled() => return,
            () = tokio::time::sleep(delay) => {}
        }
        if !shared.lifecycle.apply(&session, LifecycleEvent::Retry) {
            return;
        }
    }
}

async fn serve(shared: &Shared, link: SocketLink, session: &Session) -> Outcome {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let replay: Vec<Channel> = {
        let mut channels = shared.channels.lock();
        if !shared.lifecycle.opened(session) {
            return Outcome::Cancelled;
        }
        channels.outbound = Some((session.generation(), tx));
        channels.subscribed.iter().cloned().collect()
    };
    info!(
        generation = session.generation(),
        channels = replay.len(),
        "socket open"
    );

    let SocketLink {
        mut sink,
        mut source,
    } = link;
    let mut outcome = None;
    for channel in replay {
        if let Err(err) = send(&mut sink, &SocketMessage::Subscribe { channel }).await {
            outcome = Some(Outcome::Failed(err));
            break;
        }
    }

    let outcome = match outcome {
        Some(outcome) => outcome,
        None => loop {
            tokio::select! {
                biased;
                () = session.cancelled() => {
                    let _ = tokio::time::timeout(CLOSE_TIMEOUT, sink.close()).await;
                    break Outcome::Cancelled;
                }
                Some(message) = rx.recv() => {
                    if let Err(err) = send(&mut sink, &message).await {
                        break Outcome::Failed(err);
                    }
                }
                item = source.next() => match item {
                    Some(Ok(text)) => dispatch(shared, &text),
                    Some(Err(err)) if err.is_clean_close() => break Outcome::CleanClose,
                    Some(Err(err)) => break Outcome::Failed(err),
                    None => break Outcome::Failed(TransportError::Ended),
                },
            }
        },
    };

    let mut channels = shared.channels.lock();
    if channels
        .outbound
        .as_ref()
        .is_some_and(|(generation, _)| *generation == session.generation())
    {
        channels.outbound = None;
    }
    outcome
}

async fn send(sink: &mut FrameSink, message: &SocketMessage) -> Result<(), TransportError> {
    let text = message
        .encode()
        .map_err(|e| TransportError::Send(e.to_string()))?;
    sink.send(text).await
}

fn dispatch(shared: &Shared, text: &str) {
    let message = match SocketMessage::decode(text) {
        Ok(message) => message,
        Err(err) => {
            warn!(error = %err, "dropping malformed socket frame");
            return;
        }
    };
    let kind = message.kind();
    let event = match message {
        SocketMessage::Event { channel, event } => SocketEvent {
            kind,
            channel,
            payload: event,
        },
        SocketMessage::Ack { channel } => {
            debug!(channel = channel.as_ref().map(Channel::as_str), "socket ack");
            SocketEvent {
                kind,
                channel,
                payload: serde_json::Value::Null,
            }
        }
        SocketMessage::Subscribe { channel } | SocketMessage::Unsubscribe { channel } => {
            warn!(%channel, ?kind, "ignoring control message sent by server");
            return;
        }
    };
    let _ = shared.handlers.emit(&kind, &event);
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use futures::channel::mpsc as fmpsc;
    use pulse_core::handler;
    use serde_json::json;

    /// Server side of an in-memory socket.
    struct Peer {
        /// Frames the client sent.
        sent: fmpsc::UnboundedReceiver<String>,
        /// Frames to deliver to the client.
        inbound: fmpsc::UnboundedSender<Result<String, TransportError>>,
    }

    impl Peer {
        fn drain(&mut self) -> Vec<SocketMessage> {
            let mut out = Vec::new();
            while let Ok(Some(text)) = self.sent.try_next() {
                out.push(SocketMessage::decode(&text).unwrap());
            }
            out
        }

        fn push(&self, value: serde_json::Value) {
            self.inbound.unbounded_send(Ok(value.to_string())).unwrap();
        }
    }

    /// Connector that fails unless a link has been queued for the next connect.
    #[derive(Default)]
    struct ScriptedConnector {
        connects: AtomicUsize,
        queued: Mutex<VecDeque<SocketLink>>,
    }

    impl ScriptedConnector {
        fn queue_link(&self) -> Peer {
            let (sent_tx, sent_rx) = fmpsc::unbounded::<String>();
            let (in_tx, in_rx) = fmpsc::unbounded();
            self.queued.lock().push_back(SocketLink {
                sink: Box::pin(sent_tx.sink_map_err(|e| TransportError::Send(e.to_string()))),
                source: Box::pin(in_rx),
            });
            Peer {
                sent: sent_rx,
                inbound: in_tx,
            }
        }

        fn connects(&self) -> usize {
            self.connects.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl SocketConnector for ScriptedConnector {
        async fn connect(&self, _url: &Url) -> Result<SocketLink, TransportError> {
            let _ = self.connects.fetch_add(1, Ordering::SeqCst);
            self.queued
                .lock()
                .pop_front()
                .ok_or_else(|| TransportError::Connect("refused".into()))
        }
    }

    const URL: &str = "wss://console.test/ws";

    fn client(connector: &Arc<ScriptedConnector>) -> SocketClient {
        SocketClient::with_connector(SocketConfig::default(), connector.clone())
    }

    async fn wait_for_state(client: &SocketClient, state: ConnectionState) {
        let mut rx = client.state_changes();
        let _ = rx.wait_for(|s| *s == state).await.unwrap();
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    fn subscribe_msg(channel: &str) -> SocketMessage {
        SocketMessage::Subscribe {
            channel: Channel::from(channel),
        }
    }

    fn collecting() -> (Arc<Mutex<Vec<SocketEvent>>>, Handler<SocketEvent>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        (seen, handler(move |e: &SocketEvent| sink.lock().push(e.clone())))
    }

    #[tokio::test(start_paused = true)]
    async fn queued_subscriptions_replayed_once_on_open() {
        let connector = Arc::new(ScriptedConnector::default());
        let mut peer = connector.queue_link();
        let client = client(&connector);
        client.subscribe("b");
        client.subscribe("a");
        client.subscribe("a");

        client.connect(URL, "t").unwrap();
        wait_for_state(&client, ConnectionState::Open).await;
        settle().await;

        assert_eq!(peer.drain(), vec![subscribe_msg("a"), subscribe_msg("b")]);
    }

    #[tokio::test(start_paused = true)]
    async fn subscribe_while_open_sends_immediately() {
        let connector = Arc::new(ScriptedConnector::default());
        let mut peer = connector.queue_link();
        let client = client(&connector);
        client.connect(URL, "t").unwrap();
        wait_for_state(&client, ConnectionState::Open).await;

        client.subscribe("jobs");
        client.unsubscribe("jobs");
        client.unsubscribe("never-subscribed");
        settle().await;

        assert_eq!(
            peer.drain(),
            vec![
                subscribe_msg("jobs"),
                SocketMessage::Unsubscribe {
                    channel: Channel::from("jobs")
                },
            ]
        );
        assert!(client.subscriptions().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn unsubscribe_while_closed_is_not_replayed() {
        let connector = Arc::new(ScriptedConnector::default());
        let mut peer = connector.queue_link();
        let client = client(&connector);
        client.subscribe("a");
        client.subscribe("b");
        client.unsubscribe("a");

        client.connect(URL, "t").unwrap();
        wait_for_state(&client, ConnectionState::Open).await;
        settle().await;

        assert_eq!(peer.drain(), vec![subscribe_msg("b")]);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_replays_current_set() {
        let connector = Arc::new(ScriptedConnector::default());
        let mut first = connector.queue_link();
        let mut second = connector.queue_link();
        let client = client(&connector);
        client.subscribe("jobs");
        client.connect(URL, "t").unwrap();
        wait_for_state(&client, ConnectionState::Open).await;
        settle().await;
        assert_eq!(first.drain(), vec![subscribe_msg("jobs")]);

        first
            .inbound
            .unbounded_send(Err(TransportError::Closed { code: 1006 }))
            .unwrap();
        settle().await;
        assert_eq!(client.state(), ConnectionState::Error);
        client.subscribe("agents");

        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(client.state(), ConnectionState::Open);
        assert_eq!(
            second.drain(),
            vec![subscribe_msg("agents"), subscribe_msg("jobs")]
        );
        assert_eq!(client.reconnect_attempts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn events_fan_out_to_handlers() {
        let connector = Arc::new(ScriptedConnector::default());
        let peer = connector.queue_link();
        let client = client(&connector);
        let (events, on_event) = collecting();
        let (acks, on_ack) = collecting();
        client.on(MessageKind::Event, on_event);
        client.on(MessageKind::Ack, on_ack);
        client.connect(URL, "t").unwrap();
        wait_for_state(&client, ConnectionState::Open).await;

        peer.push(json!({"type": "event", "channel": "jobs", "event": {"id": 7}}));
        peer.push(json!({"type": "ack", "channel": "jobs"}));
        settle().await;

        let events = events.lock();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].channel.as_deref(), Some("jobs"));
        assert_eq!(events[0].payload, json!({"id": 7}));
        assert_eq!(acks.lock()[0].kind, MessageKind::Ack);
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_frames_dropped_connection_kept() {
        let connector = Arc::new(ScriptedConnector::default());
        let peer = connector.queue_link();
        let client = client(&connector);
        let (events, on_event) = collecting();
        client.on(MessageKind::Event, on_event);
        client.connect(URL, "t").unwrap();
        wait_for_state(&client, ConnectionState::Open).await;

        peer.inbound.unbounded_send(Ok("{oops".into())).unwrap();
        peer.push(json!({"type": "mystery"}));
        peer.push(json!({"type": "subscribe", "channel": "x"}));
        peer.push(json!({"type": "event", "event": 1}));
        settle().await;

        assert_eq!(events.lock().len(), 1);
        assert_eq!(client.state(), ConnectionState::Open);
        assert_eq!(connector.connects(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn clean_close_does_not_reconnect() {
        let connector = Arc::new(ScriptedConnector::default());
        let peer = connector.queue_link();
        let client = client(&connector);
        client.connect(URL, "t").unwrap();
        wait_for_state(&client, ConnectionState::Open).await;

        peer.inbound
            .unbounded_send(Err(TransportError::Closed { code: 1000 }))
            .unwrap();
        tokio::time::sleep(Duration::from_secs(60)).await;

        assert_eq!(client.state(), ConnectionState::Closed);
        assert_eq!(connector.connects(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn eleventh_failure_schedules_no_timer() {
        let connector = Arc::new(ScriptedConnector::default());
        let client = client(&connector);
        client.subscribe("jobs");
        client.connect(URL, "t").unwrap();

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(connector.connects(), 11);
        assert_eq!(client.state(), ConnectionState::Error);

        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert_eq!(connector.connects(), 11);
        assert_eq!(client.subscriptions(), vec![Channel::from("jobs")]);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_during_backoff_is_terminal() {
        let connector = Arc::new(ScriptedConnector::default());
        let client = client(&connector);
        let (_events, on_event) = collecting();
        client.on(MessageKind::Event, on_event);
        client.subscribe("jobs");
        client.connect(URL, "t").unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(client.state(), ConnectionState::Error);

        client.disconnect();
        client.disconnect();
        tokio::time::sleep(Duration::from_secs(120)).await;

        assert_eq!(connector.connects(), 1);
        assert_eq!(client.state(), ConnectionState::Closed);
        assert!(client.subscriptions().is_empty());
        assert!(client.shared.handlers.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_closes_open_socket() {
        let connector = Arc::new(ScriptedConnector::default());
        let mut peer = connector.queue_link();
        let client = client(&connector);
        client.connect(URL, "t").unwrap();
        wait_for_state(&client, ConnectionState::Open).await;

        client.disconnect();
        settle().await;

        // Sink closed: the peer sees end of stream.
        assert_eq!(peer.sent.try_next().unwrap(), None);
        assert_eq!(client.state(), ConnectionState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn off_removes_handler() {
        let connector = Arc::new(ScriptedConnector::default());
        let peer = connector.queue_link();
        let client = client(&connector);
        let (events, on_event) = collecting();
        client.on(MessageKind::Event, on_event.clone());
        client.connect(URL, "t").unwrap();
        wait_for_state(&client, ConnectionState::Open).await;

        assert!(client.off(MessageKind::Event, &on_event));
        peer.push(json!({"type": "event", "event": 1}));
        settle().await;
        assert!(events.lock().is_empty());
    }
}
