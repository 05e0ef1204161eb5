//! Change-feed client over the realtime websocket.
//!
//! The socket runs in a dedicated tokio task. Callers talk to it through a
//! typed command channel; change events flow back on one unbounded channel
//! per subscription. The socket is opened lazily by the first subscription.
//! The task also follows the auth session, joining with the newest access
//! token and handing every joined channel a new token when it changes.
//! When the socket closes, every subscription stream ends; there is no
//! reconnect.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;

use realchat_shared::constants::REALTIME_HEARTBEAT_SECS;

use super::auth::AuthClient;
use super::phoenix::{
    Frame, RefCounter, PHX_CLOSE, PHX_ERROR, PHX_REPLY, POSTGRES_CHANGES,
};
use crate::backend::{AuthChange, ChangeEvent, ChangeFilter};
use crate::error::{BackendError, Result};
use crate::subscription::{AuthSubscription, ChangeSubscription, Subscription, SubscriptionHandle};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

/// Commands sent *into* the socket task.
#[derive(Debug)]
enum RealtimeCommand {
    /// Join a channel and route its change events to `events`.
    Join {
        topic: String,
        filter: ChangeFilter,
        events: mpsc::UnboundedSender<ChangeEvent>,
    },
    /// Leave a channel.
    Leave { topic: String },
}

/// A joined channel inside the socket task.
struct Channel {
    join_ref: String,
    filter: ChangeFilter,
    events: mpsc::UnboundedSender<ChangeEvent>,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct RealtimeClient {
    endpoint: Url,
    anon_key: String,
    auth: AuthClient,
    commands: Arc<Mutex<Option<mpsc::Sender<RealtimeCommand>>>>,
    next_channel: Arc<AtomicU64>,
}

impl RealtimeClient {
    pub fn new(endpoint: Url, anon_key: String, auth: AuthClient) -> Self {
        Self {
            endpoint,
            anon_key,
            auth,
            commands: Arc::new(Mutex::new(None)),
            next_channel: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Join a channel for `filter`'s changes.
    pub async fn subscribe(&self, filter: ChangeFilter) -> Result<ChangeSubscription> {
        let commands = self.connection().await?;

        let n = self.next_channel.fetch_add(1, Ordering::Relaxed);
        let topic = format!("realtime:{}:{}", filter.table, n);
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        commands
            .send(RealtimeCommand::Join {
                topic: topic.clone(),
                filter,
                events: events_tx,
            })
            .await
            .map_err(|_| BackendError::Realtime("realtime socket is closed".into()))?;

        let handle = SubscriptionHandle::new(move || {
            // The socket may already be gone, in which case there is nothing
            // left to leave.
            if let Err(e) = commands.try_send(RealtimeCommand::Leave { topic }) {
                debug!(error = %e, "Leave not delivered");
            }
        });

        Ok(Subscription::new(events_rx, handle))
    }

    /// Command sender of the live socket, connecting first if needed.
    async fn connection(&self) -> Result<mpsc::Sender<RealtimeCommand>> {
        let mut slot = self.commands.lock().await;
        if let Some(tx) = slot.as_ref() {
            if !tx.is_closed() {
                return Ok(tx.clone());
            }
        }

        let mut redacted = self.endpoint.clone();
        redacted.set_query(None);
        info!(endpoint = %redacted, "Connecting to realtime");

        let (ws, _response) = connect_async(self.endpoint.as_str()).await?;
        let (tx, rx) = mpsc::channel(64);
        let tokens = TokenState {
            current: self.auth.bearer_token(),
            anon_key: self.anon_key.clone(),
            changes: Some(self.auth.on_auth_state_change()),
        };
        tokio::spawn(socket_loop(ws, rx, tokens));

        *slot = Some(tx.clone());
        Ok(tx)
    }
}

// ---------------------------------------------------------------------------
// Socket task
// ---------------------------------------------------------------------------

/// The token channels are joined with, kept in step with the session.
struct TokenState {
    current: String,
    anon_key: String,
    changes: Option<AuthSubscription>,
}

impl TokenState {
    /// Adopt the token of `change`. Returns whether it differs from the
    /// previous one.
    fn apply(&mut self, change: AuthChange) -> bool {
        let next = change
            .session
            .map(|s| s.access_token)
            .unwrap_or_else(|| self.anon_key.clone());
        if next == self.current {
            return false;
        }
        debug!(event = ?change.event, "Realtime access token changed");
        self.current = next;
        true
    }
}

async fn socket_loop(
    ws: WsStream,
    mut commands: mpsc::Receiver<RealtimeCommand>,
    mut tokens: TokenState,
) {
    let (mut sink, mut stream) = ws.split();
    let mut refs = RefCounter::default();
    let mut channels: HashMap<String, Channel> = HashMap::new();

    let period = Duration::from_secs(REALTIME_HEARTBEAT_SECS);
    let mut heartbeat = tokio::time::interval_at(tokio::time::Instant::now() + period, period);

    'socket: loop {
        let outgoing: Vec<Frame> = tokio::select! {
            _ = heartbeat.tick() => vec![Frame::heartbeat(&refs.next())],

            command = commands.recv() => match command {
                Some(RealtimeCommand::Join { topic, filter, events }) => {
                    let join_ref = refs.next();
                    debug!(topic = %topic, "Joining channel");
                    let frame = Frame::join(&topic, &filter, &tokens.current, &join_ref);
                    channels.insert(topic, Channel { join_ref, filter, events });
                    vec![frame]
                }
                Some(RealtimeCommand::Leave { topic }) => channels
                    .remove(&topic)
                    .map(|channel| {
                        debug!(topic = %topic, "Leaving channel");
                        Frame::leave(&topic, &refs.next(), &channel.join_ref)
                    })
                    .into_iter()
                    .collect(),
                None => {
                    debug!("All realtime handles dropped, closing socket");
                    let _ = sink.send(WsMessage::Close(None)).await;
                    break;
                }
            },

            change = recv_or_pending(&mut tokens.changes) => match change {
                Some(change) => {
                    if tokens.apply(change) {
                        channels
                            .iter()
                            .map(|(topic, channel)| {
                                Frame::access_token(topic, &tokens.current, &refs.next(), &channel.join_ref)
                            })
                            .collect()
                    } else {
                        Vec::new()
                    }
                }
                None => {
                    tokens.changes = None;
                    Vec::new()
                }
            },

            incoming = stream.next() => match incoming {
                Some(Ok(WsMessage::Text(text))) => {
                    handle_frame(text.as_str(), &mut channels);
                    Vec::new()
                }
                Some(Ok(WsMessage::Close(reason))) => {
                    info!(?reason, "Realtime socket closed by server");
                    break;
                }
                Some(Ok(_)) => Vec::new(),
                Some(Err(e)) => {
                    warn!(error = %e, "Realtime socket error");
                    break;
                }
                None => {
                    info!("Realtime socket ended");
                    break;
                }
            },
        };

        for frame in outgoing {
            let text = match serde_json::to_string(&frame) {
                Ok(text) => text,
                Err(e) => {
                    warn!(error = %e, "Failed to encode realtime frame");
                    continue;
                }
            };
            if let Err(e) = sink.send(WsMessage::text(text)).await {
                warn!(error = %e, "Failed to write to realtime socket");
                break 'socket;
            }
        }
    }

    // Dropping the channels ends every subscriber stream.
    if !channels.is_empty() {
        warn!(channels = channels.len(), "Realtime socket gone, ending subscriptions");
    }
}

async fn recv_or_pending<T>(subscription: &mut Option<Subscription<T>>) -> Option<T> {
    match subscription {
        Some(sub) => sub.recv().await,
        None => std::future::pending().await,
    }
}

/// Route one inbound frame.
fn handle_frame(text: &str, channels: &mut HashMap<String, Channel>) {
    let frame: Frame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => {
            debug!(error = %e, "Ignoring undecodable realtime frame");
            return;
        }
    };

    match frame.event.as_str() {
        POSTGRES_CHANGES => {
            let Some(channel) = channels.get(&frame.topic) else {
                debug!(topic = %frame.topic, "Change for unknown channel");
                return;
            };
            match frame.change_event() {
                Ok(event) if channel.filter.matches(&event) => {
                    if channel.events.send(event).is_err() {
                        debug!(topic = %frame.topic, "Subscriber gone, dropping change");
                    }
                }
                Ok(event) => {
                    debug!(topic = %frame.topic, kind = ?event.kind, "Change outside filter");
                }
                Err(e) => warn!(topic = %frame.topic, error = %e, "Malformed change frame"),
            }
        }

        PHX_REPLY => {
            let Some(channel) = channels.get(&frame.topic) else {
                return;
            };
            if frame.reference.as_deref() != Some(channel.join_ref.as_str()) {
                return;
            }
            match frame.reply_status() {
                Some("ok") => info!(topic = %frame.topic, "Channel joined"),
                status => {
                    warn!(topic = %frame.topic, ?status, payload = %frame.payload, "Channel join rejected");
                    channels.remove(&frame.topic);
                }
            }
        }

        PHX_ERROR | PHX_CLOSE => {
            if channels.remove(&frame.topic).is_some() {
                warn!(topic = %frame.topic, event = %frame.event, "Channel closed by server");
            }
        }

        other => debug!(topic = %frame.topic, event = %other, "Unhandled realtime event"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ChangeKind;
    use crate::hosted::phoenix::{ACCESS_TOKEN, HEARTBEAT, PHOENIX_TOPIC, PHX_JOIN, PHX_LEAVE};
    use realchat_shared::Credentials;
    use serde_json::json;
    use tokio::net::TcpListener;
    use tokio::time::timeout;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn channel() -> (Channel, mpsc::UnboundedReceiver<ChangeEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Channel {
                join_ref: "1".into(),
                filter: ChangeFilter::default(),
                events: tx,
            },
            rx,
        )
    }

    fn change_frame(topic: &str, kind: &str, table: &str) -> String {
        serde_json::json!({
            "topic": topic,
            "event": "postgres_changes",
            "ref": null,
            "payload": { "data": {
                "schema": "public", "table": table, "type": kind,
                "record": { "id": "m1" }, "old_record": {}
            }}
        })
        .to_string()
    }

    #[test]
    fn test_changes_are_routed_by_topic() {
        let (ch, mut rx) = channel();
        let mut channels = HashMap::from([("realtime:messages:1".to_string(), ch)]);

        handle_frame(&change_frame("realtime:messages:1", "INSERT", "messages"), &mut channels);
        handle_frame(&change_frame("realtime:other:9", "INSERT", "messages"), &mut channels);

        let event = rx.try_recv().unwrap();
        assert_eq!(event.kind, ChangeKind::Insert);
        assert_eq!(event.new["id"], "m1");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_changes_outside_filter_are_dropped() {
        let (mut ch, mut rx) = channel();
        ch.filter = ChangeFilter::only("public", "messages", ChangeKind::Insert);
        let mut channels = HashMap::from([("t".to_string(), ch)]);

        handle_frame(&change_frame("t", "UPDATE", "messages"), &mut channels);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_rejected_join_ends_stream() {
        let (ch, mut rx) = channel();
        let mut channels = HashMap::from([("t".to_string(), ch)]);

        handle_frame(
            r#"{"topic":"t","event":"phx_reply","ref":"1","payload":{"status":"error","response":{"reason":"unauthorized"}}}"#,
            &mut channels,
        );
        assert!(channels.is_empty());
        assert!(matches!(
            rx.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }

    #[test]
    fn test_ok_reply_keeps_channel() {
        let (ch, _rx) = channel();
        let mut channels = HashMap::from([("t".to_string(), ch)]);
        handle_frame(
            r#"{"topic":"t","event":"phx_reply","ref":"1","payload":{"status":"ok","response":{}}}"#,
            &mut channels,
        );
        assert_eq!(channels.len(), 1);
    }

    #[test]
    fn test_server_close_ends_stream() {
        let (ch, _rx) = channel();
        let mut channels = HashMap::from([("t".to_string(), ch)]);
        handle_frame(r#"{"topic":"t","event":"phx_close","ref":null,"payload":{}}"#, &mut channels);
        assert!(channels.is_empty());
    }

    // -----------------------------------------------------------------------
    // Against a local websocket server
    // -----------------------------------------------------------------------

    const WAIT: Duration = Duration::from_secs(5);

    /// A websocket server that reports every text frame it receives and
    /// writes whatever the test pushes.
    struct LocalServer {
        url: Url,
        received: mpsc::UnboundedReceiver<Frame>,
        push: mpsc::UnboundedSender<WsMessage>,
    }

    impl LocalServer {
        async fn start() -> Self {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            let (received_tx, received) = mpsc::unbounded_channel();
            let (push, mut push_rx) = mpsc::unbounded_channel::<WsMessage>();

            tokio::spawn(async move {
                let (tcp, _) = listener.accept().await.unwrap();
                let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
                loop {
                    tokio::select! {
                        incoming = ws.next() => match incoming {
                            Some(Ok(WsMessage::Text(text))) => {
                                if let Ok(frame) = serde_json::from_str::<Frame>(text.as_str()) {
                                    let _ = received_tx.send(frame);
                                }
                            }
                            Some(Ok(_)) => {}
                            _ => break,
                        },
                        outgoing = push_rx.recv() => match outgoing {
                            Some(message) => {
                                let closing = matches!(message, WsMessage::Close(_));
                                if ws.send(message).await.is_err() || closing {
                                    break;
                                }
                            }
                            None => break,
                        },
                    }
                }
            });

            let url = Url::parse(&format!("ws://{addr}/realtime/v1/websocket?apikey=anon&vsn=1.0.0"))
                .unwrap();
            Self { url, received, push }
        }

        /// Next received frame carrying `event`, skipping the others.
        async fn next(&mut self, event: &str) -> Frame {
            loop {
                let frame = self.received.recv().await.expect("server stopped");
                if frame.event == event {
                    return frame;
                }
            }
        }

        async fn expect(&mut self, event: &str) -> Frame {
            timeout(WAIT, self.next(event)).await.expect("frame not received")
        }

        fn send(&self, frame: serde_json::Value) {
            self.push.send(WsMessage::text(frame.to_string())).unwrap();
        }
    }

    /// Auth client whose server is never contacted.
    fn signed_out_auth() -> AuthClient {
        let base = Url::parse("http://127.0.0.1:9/auth/v1/").unwrap();
        AuthClient::new(reqwest::Client::new(), base, "anon".into())
    }

    #[tokio::test]
    async fn test_join_and_leave_reach_the_socket() {
        let mut server = LocalServer::start().await;
        let client = RealtimeClient::new(server.url.clone(), "anon".into(), signed_out_auth());

        let mut sub = client.subscribe(ChangeFilter::default()).await.unwrap();
        let join = server.expect(PHX_JOIN).await;
        assert_eq!(join.topic, "realtime:messages:1");
        assert_eq!(join.payload["access_token"], "anon");
        assert_eq!(join.payload["config"]["postgres_changes"][0]["table"], "messages");
        assert_eq!(join.payload["config"]["postgres_changes"][0]["event"], "*");

        assert!(sub.unsubscribe());
        let leave = server.expect(PHX_LEAVE).await;
        assert_eq!(leave.topic, join.topic);
        assert_eq!(leave.join_ref, join.join_ref);
    }

    #[tokio::test]
    async fn test_changes_flow_until_server_closes() {
        let mut server = LocalServer::start().await;
        let client = RealtimeClient::new(server.url.clone(), "anon".into(), signed_out_auth());

        let mut sub = client
            .subscribe(ChangeFilter::only("public", "messages", ChangeKind::Insert))
            .await
            .unwrap();
        let join = server.expect(PHX_JOIN).await;

        server.send(json!({
            "topic": join.topic, "event": "phx_reply", "ref": join.reference,
            "payload": { "status": "ok", "response": {} }
        }));
        server.send(serde_json::from_str(&change_frame(&join.topic, "INSERT", "messages")).unwrap());

        let event = timeout(WAIT, sub.recv()).await.unwrap().unwrap();
        assert_eq!(event.kind, ChangeKind::Insert);
        assert_eq!(event.new["id"], "m1");

        server.push.send(WsMessage::Close(None)).unwrap();
        assert!(timeout(WAIT, sub.recv()).await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_uses_phoenix_topic() {
        let mut server = LocalServer::start().await;
        let client = RealtimeClient::new(server.url.clone(), "anon".into(), signed_out_auth());
        let _sub = client.subscribe(ChangeFilter::default()).await.unwrap();

        // The paused clock jumps from timer to timer while the socket idles.
        let beat = timeout(Duration::from_secs(600), server.next(HEARTBEAT))
            .await
            .expect("no heartbeat");
        assert_eq!(beat.topic, PHOENIX_TOPIC);
        assert!(beat.reference.is_some());
    }

    #[tokio::test]
    async fn test_channels_follow_the_session_token() {
        let auth_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/v1/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "user-jwt",
                "token_type": "bearer",
                "expires_in": 3600,
                "refresh_token": "rt-1",
                "user": { "id": "0f8fad5b-d9cb-469f-a165-70867728950e", "email": "ada@example.com" }
            })))
            .mount(&auth_server)
            .await;
        Mock::given(method("POST"))
            .and(path("/auth/v1/logout"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&auth_server)
            .await;
        let base = Url::parse(&format!("{}/auth/v1/", auth_server.uri())).unwrap();
        let auth = AuthClient::new(reqwest::Client::new(), base, "anon".into());

        let mut server = LocalServer::start().await;
        let client = RealtimeClient::new(server.url.clone(), "anon".into(), auth.clone());

        let _first = client.subscribe(ChangeFilter::default()).await.unwrap();
        let first = server.expect(PHX_JOIN).await;
        assert_eq!(first.payload["access_token"], "anon");

        auth.sign_in_with_password(&Credentials::new("ada@example.com", "pw"))
            .await
            .unwrap();
        let pushed = server.expect(ACCESS_TOKEN).await;
        assert_eq!(pushed.topic, first.topic);
        assert_eq!(pushed.join_ref, first.join_ref);
        assert_eq!(pushed.payload["access_token"], "user-jwt");

        let _second = client.subscribe(ChangeFilter::default()).await.unwrap();
        let second = server.expect(PHX_JOIN).await;
        assert_eq!(second.payload["access_token"], "user-jwt");

        auth.sign_out().await.unwrap();
        let mut topics = Vec::new();
        for _ in 0..2 {
            let frame = server.expect(ACCESS_TOKEN).await;
            assert_eq!(frame.payload["access_token"], "anon");
            topics.push(frame.topic);
        }
        topics.sort();
        assert_eq!(topics, vec![first.topic, second.topic]);
    }
}
