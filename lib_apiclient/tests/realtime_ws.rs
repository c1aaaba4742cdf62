mod common;

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::{broadcast, mpsc};

use lib_apiclient::{
    handler, ApiCollectionConfig, ApiManager, ConnectionState, SocketConfig, TransportKind,
};

struct Peer {
    id: usize,
    tx: mpsc::UnboundedSender<Message>,
    channels: HashSet<String>,
}

/// Minimal pub/sub hub speaking the control-frame protocol.
#[derive(Clone)]
struct Hub {
    peers: Arc<Mutex<Vec<Peer>>>,
    subscribe_log: Arc<Mutex<Vec<String>>>,
    kick: broadcast::Sender<()>,
    next_id: Arc<Mutex<usize>>,
}

impl Hub {
    fn new() -> Self {
        Self {
            peers: Arc::default(),
            subscribe_log: Arc::default(),
            kick: broadcast::channel(4).0,
            next_id: Arc::default(),
        }
    }

    fn subscribes(&self, channel: &str) -> usize {
        self.subscribe_log.lock().unwrap().iter().filter(|c| *c == channel).count()
    }

    fn peer_count(&self) -> usize {
        self.peers.lock().unwrap().len()
    }

    /// Closes every open socket from the server side.
    fn kick_all(&self) {
        let _ = self.kick.send(());
    }

    fn handle(&self, id: usize, text: &str) {
        let frame: Value = serde_json::from_str(text).unwrap();
        let channel = frame["channel"].as_str().unwrap_or_default().to_string();
        let mut peers = self.peers.lock().unwrap();
        match frame["type"].as_str() {
            Some("subscribe") => {
                self.subscribe_log.lock().unwrap().push(channel.clone());
                if let Some(peer) = peers.iter_mut().find(|p| p.id == id) {
                    peer.channels.insert(channel);
                }
            }
            Some("unsubscribe") => {
                if let Some(peer) = peers.iter_mut().find(|p| p.id == id) {
                    peer.channels.remove(&channel);
                }
            }
            Some("publish") => {
                let out = json!({ "channel": channel, "message": frame["message"] }).to_string();
                for peer in peers.iter().filter(|p| p.channels.contains(&channel)) {
                    let _ = peer.tx.send(Message::Text(out.clone().into()));
                }
            }
            _ => {}
        }
    }
}

async fn upgrade(ws: WebSocketUpgrade, State(hub): State<Hub>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| run_peer(socket, hub))
}

async fn run_peer(socket: WebSocket, hub: Hub) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let id = {
        let mut next = hub.next_id.lock().unwrap();
        *next += 1;
        *next
    };
    hub.peers.lock().unwrap().push(Peer { id, tx, channels: HashSet::new() });
    let mut kick = hub.kick.subscribe();

    loop {
        tokio::select! {
            _ = kick.recv() => {
                let _ = sink.send(Message::Close(None)).await;
                break;
            }
            Some(msg) = rx.recv() => {
                if sink.send(msg).await.is_err() {
                    break;
                }
            }
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => hub.handle(id, text.as_str()),
                Some(Ok(_)) => {}
                _ => break,
            }
        }
    }
    hub.peers.lock().unwrap().retain(|p| p.id != id);
}

async fn start(hub: Hub) -> (String, tokio::task::JoinHandle<()>) {
    let app = Router::new().route("/ws", get(upgrade)).with_state(hub);
    let (addr, server) = common::serve(app).await;
    (format!("http://{}", addr), server)
}

fn live(base: &str, resubscribe: bool, max_attempts: u32) -> ApiCollectionConfig {
    slow_live(base, resubscribe, max_attempts, 20)
}

/// Like [`live`] with a longer backoff, leaving room to act while `Reconnecting`.
fn slow_live(base: &str, resubscribe: bool, max_attempts: u32, delay_ms: u64) -> ApiCollectionConfig {
    let mut socket = SocketConfig::new("/ws", TransportKind::Websocket);
    socket.resubscribe_on_reconnect = resubscribe;
    socket.max_reconnect_attempts = max_attempts;
    socket.reconnect_base_delay_ms = delay_ms;
    ApiCollectionConfig::new("live").with_base_url(base).with_socket("hub", socket)
}

fn collector() -> (lib_apiclient::MessageHandler, mpsc::UnboundedReceiver<Value>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (handler(move |m| { let _ = tx.send(m); }), rx)
}

#[tokio::test]
async fn publish_round_trips_through_hub() {
    let hub = Hub::new();
    let (base, _) = start(hub.clone()).await;
    let manager = ApiManager::new().unwrap();
    manager.register(live(&base, true, 5)).unwrap();

    let (h, mut rx) = collector();
    let _sub = manager.subscribe("live:hub", "news", h).await.unwrap();
    common::eventually("subscribe frame", || hub.subscribes("news") == 1).await;

    manager.publish("live:hub", "news", json!({ "title": "hello" })).await.unwrap();
    assert_eq!(common::next(&mut rx).await, json!({ "title": "hello" }));
}

#[tokio::test]
async fn one_physical_connection_serves_many_channels() {
    let hub = Hub::new();
    let (base, _) = start(hub.clone()).await;
    let manager = ApiManager::new().unwrap();
    manager.register(live(&base, true, 5)).unwrap();

    let (a, mut rx_a) = collector();
    let (b, mut rx_b) = collector();
    let sub_a = manager.subscribe("live:hub", "news", a).await.unwrap();
    let _sub_b = manager.subscribe("live:hub", "news", b).await.unwrap();
    let (s, mut rx_s) = collector();
    let _sub_s = manager.subscribe("live:hub", "sports", s).await.unwrap();

    common::eventually("subscribe frames", || hub.subscribes("sports") == 1).await;
    assert_eq!(hub.peer_count(), 1);
    // A second handler on the same channel sends no extra frame
    assert_eq!(hub.subscribes("news"), 1);

    manager.publish("live:hub", "news", json!(1)).await.unwrap();
    assert_eq!(common::next(&mut rx_a).await, json!(1));
    assert_eq!(common::next(&mut rx_b).await, json!(1));

    sub_a.unsubscribe();
    manager.publish("live:hub", "news", json!(2)).await.unwrap();
    manager.publish("live:hub", "sports", json!(3)).await.unwrap();
    assert_eq!(common::next(&mut rx_b).await, json!(2));
    assert_eq!(common::next(&mut rx_s).await, json!(3));
    assert!(rx_a.try_recv().is_err());
}

#[tokio::test]
async fn reconnect_replays_subscriptions() {
    let hub = Hub::new();
    let (base, _) = start(hub.clone()).await;
    let manager = ApiManager::new().unwrap();
    let collection = manager.register(live(&base, true, 5)).unwrap();

    let (h, mut rx) = collector();
    let _sub = manager.subscribe("live:hub", "news", h).await.unwrap();
    common::eventually("first subscribe", || hub.subscribes("news") == 1).await;

    hub.kick_all();
    common::eventually("replayed subscribe", || hub.subscribes("news") == 2).await;
    assert_eq!(collection.connection_state("hub"), Some(ConnectionState::Connected));

    manager.publish("live:hub", "news", json!("after")).await.unwrap();
    assert_eq!(common::next(&mut rx).await, json!("after"));
}

#[tokio::test]
async fn reconnect_without_replay_leaves_channels_silent() {
    let hub = Hub::new();
    let (base, _) = start(hub.clone()).await;
    let manager = ApiManager::new().unwrap();
    let collection = manager.register(live(&base, false, 5)).unwrap();

    let (h, mut rx) = collector();
    let _sub = manager.subscribe("live:hub", "news", h).await.unwrap();
    common::eventually("first subscribe", || hub.subscribes("news") == 1).await;

    hub.kick_all();
    common::eventually("reconnected peer", || {
        hub.peer_count() == 1 && collection.connection_state("hub") == Some(ConnectionState::Connected)
    })
    .await;
    // Give a stray replay the chance to show up before asserting it did not
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(hub.subscribes("news"), 1);

    manager.publish("live:hub", "news", json!("lost")).await.unwrap();
    let silent = tokio::time::timeout(Duration::from_millis(200), rx.recv()).await;
    assert!(silent.is_err());
}

#[tokio::test]
async fn channel_added_while_reconnecting_is_announced_without_replay() {
    let hub = Hub::new();
    let (base, _) = start(hub.clone()).await;
    let manager = ApiManager::new().unwrap();
    let collection = manager.register(slow_live(&base, false, 5, 400)).unwrap();

    let (news, _rx_news) = collector();
    let _news = manager.subscribe("live:hub", "news", news).await.unwrap();
    common::eventually("first subscribe", || hub.subscribes("news") == 1).await;

    hub.kick_all();
    common::eventually("reconnecting", || {
        collection.connection_state("hub") == Some(ConnectionState::Reconnecting)
    })
    .await;

    let (sports, mut rx_sports) = collector();
    let _sports = manager.subscribe("live:hub", "sports", sports).await.unwrap();
    common::eventually("sports announced", || hub.subscribes("sports") == 1).await;
    assert_eq!(collection.connection_state("hub"), Some(ConnectionState::Connected));
    assert_eq!(hub.subscribes("news"), 1);

    manager.publish("live:hub", "sports", json!({ "score": 3 })).await.unwrap();
    assert_eq!(common::next(&mut rx_sports).await, json!({ "score": 3 }));
}

#[tokio::test]
async fn disconnect_during_backoff_cancels_the_pending_reconnect() {
    let hub = Hub::new();
    let (base, _) = start(hub.clone()).await;
    let manager = ApiManager::new().unwrap();
    let collection = manager.register(slow_live(&base, true, 5, 400)).unwrap();

    let (h, _rx) = collector();
    let _sub = manager.subscribe("live:hub", "news", h).await.unwrap();
    common::eventually("first subscribe", || hub.subscribes("news") == 1).await;

    hub.kick_all();
    common::eventually("reconnecting", || {
        collection.connection_state("hub") == Some(ConnectionState::Reconnecting)
    })
    .await;
    collection.disconnect_all();

    // Well past the 400ms backoff: no new peer and no replayed subscribe
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(hub.peer_count(), 0);
    assert_eq!(hub.subscribes("news"), 1);
    assert_eq!(collection.connection_state("hub"), Some(ConnectionState::Disconnected));
}

#[tokio::test]
async fn exhausted_reconnects_leave_connection_disconnected() {
    let hub = Hub::new();
    let (base, server) = start(hub.clone()).await;
    let manager = ApiManager::new().unwrap();
    let collection = manager.register(live(&base, true, 2)).unwrap();

    let (h, _rx) = collector();
    let _sub = manager.subscribe("live:hub", "news", h).await.unwrap();
    common::eventually("first subscribe", || hub.subscribes("news") == 1).await;

    // Stop accepting, then drop the live socket
    server.abort();
    let _ = server.await;
    hub.kick_all();

    common::eventually("terminal disconnect", || {
        collection.connection_state("hub") == Some(ConnectionState::Disconnected)
    })
    .await;

    let err = manager.publish("live:hub", "news", json!(1)).await.unwrap_err();
    assert!(err.is_api());
    assert!(err.to_string().contains("live:hub"));
}

#[tokio::test]
async fn clearing_the_manager_closes_sockets() {
    let hub = Hub::new();
    let (base, _) = start(hub.clone()).await;
    let manager = ApiManager::new().unwrap();
    manager.register(live(&base, true, 5)).unwrap();

    let (h, _rx) = collector();
    let _sub = manager.subscribe("live:hub", "news", h).await.unwrap();
    common::eventually("peer connected", || hub.peer_count() == 1).await;

    manager.clear();
    common::eventually("peer gone", || hub.peer_count() == 0).await;
}
