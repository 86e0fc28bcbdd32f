//! Realtime price broadcast over WebSocket.
//!
//! Connections register in a service-owned registry. The broadcast loop
//! starts on the first subscription and runs until an explicit shutdown:
//! one task multiplexes two named timers, the 30s price poll (union of all
//! subscribed tickers, skipped when empty) and the 30s ping/pong
//! heartbeat that prunes dead connections. Unsubscribes and disconnects
//! never stop the loop.

pub mod connection;
pub mod protocol;

use crate::constants::{BROADCAST_INTERVAL_SECS, HEARTBEAT_INTERVAL_SECS};
use crate::realtime::connection::ClientConnection;
use crate::realtime::protocol::{ClientMessage, PriceUpdateData, ServerMessage};
use crate::services::stock_source::StockSource;
use crate::services::store::SharedMarketStore;
use axum::extract::ws::{Message, WebSocket};
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::sync::{watch, RwLock};
use tokio::time::interval;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Registry snapshot returned by `get_connection_stats`.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionStats {
    pub total_clients: usize,
    pub is_running: bool,
    pub clients: Vec<ClientInfo>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClientInfo {
    pub id: String,
    pub subscriptions: Vec<String>,
    pub is_alive: bool,
}

pub struct RealtimeService {
    source: Arc<dyn StockSource>,
    store: SharedMarketStore,
    clients: RwLock<HashMap<Uuid, ClientConnection>>,
    running: AtomicBool,
    shutdown: watch::Sender<bool>,
    // Handle back to the owning Arc so the broadcast loop can be spawned
    // from &self methods.
    self_handle: Weak<RealtimeService>,
}

impl RealtimeService {
    pub fn new(source: Arc<dyn StockSource>, store: SharedMarketStore) -> Arc<Self> {
        let (shutdown, _) = watch::channel(false);
        Arc::new_cyclic(|weak| Self {
            source,
            store,
            clients: RwLock::new(HashMap::new()),
            running: AtomicBool::new(false),
            shutdown,
            self_handle: weak.clone(),
        })
    }

    /// Register a new connection and send its `connection` ack.
    pub async fn register(&self, sender: UnboundedSender<Message>) -> Uuid {
        let id = Uuid::new_v4();
        let conn = ClientConnection::new(id, sender);
        conn.send(&ServerMessage::Connection {
            client_id: id.to_string(),
            message: "connected to pennypulse realtime updates".to_string(),
        });

        self.clients.write().await.insert(id, conn);
        info!(client_id = %id, "client connected");
        id
    }

    pub async fn deregister(&self, id: Uuid) {
        if self.clients.write().await.remove(&id).is_some() {
            info!(client_id = %id, "client disconnected");
        }
    }

    /// Dispatch one inbound text frame from a client.
    pub async fn handle_client_frame(&self, id: Uuid, raw: &str) {
        match serde_json::from_str::<ClientMessage>(raw) {
            Ok(ClientMessage::Subscribe { tickers }) => {
                let resulting = self.subscribe(id, &tickers).await;
                self.send_to(id, &ServerMessage::SubscriptionSuccess { tickers: resulting })
                    .await;
            }
            Ok(ClientMessage::Unsubscribe { tickers }) => {
                let resulting = self.unsubscribe(id, &tickers).await;
                self.send_to(id, &ServerMessage::UnsubscriptionSuccess { tickers: resulting })
                    .await;
            }
            Ok(ClientMessage::Ping) => {
                self.send_to(id, &ServerMessage::Pong { timestamp: Utc::now() }).await;
            }
            Err(e) => {
                debug!(client_id = %id, error = %e, "malformed client frame");
                self.send_to(
                    id,
                    &ServerMessage::Error {
                        message: "unrecognized message; expected subscribe, unsubscribe or ping"
                            .to_string(),
                    },
                )
                .await;
            }
        }
    }

    /// Add subscriptions for a connection and start the broadcast loop if
    /// this is the first subscription since the service was created.
    pub async fn subscribe(&self, id: Uuid, tickers: &[String]) -> Vec<String> {
        let resulting = self.register_subscriptions(id, tickers).await;
        if !resulting.is_empty() {
            self.ensure_loop();
        }
        resulting
    }

    async fn register_subscriptions(&self, id: Uuid, tickers: &[String]) -> Vec<String> {
        let mut clients = self.clients.write().await;
        match clients.get_mut(&id) {
            Some(conn) => {
                let resulting = conn.subscribe(tickers);
                debug!(client_id = %id, subscriptions = resulting.len(), "subscriptions updated");
                resulting
            }
            None => Vec::new(),
        }
    }

    pub async fn unsubscribe(&self, id: Uuid, tickers: &[String]) -> Vec<String> {
        let mut clients = self.clients.write().await;
        match clients.get_mut(&id) {
            Some(conn) => conn.unsubscribe(tickers),
            None => Vec::new(),
        }
    }

    pub async fn handle_pong(&self, id: Uuid) {
        if let Some(conn) = self.clients.write().await.get_mut(&id) {
            conn.mark_alive();
        }
    }

    /// Stop the broadcast loop. Registered connections stay open; only an
    /// explicit shutdown ever stops the loop.
    pub fn stop_real_time_updates(&self) {
        let _ = self.shutdown.send(true);
        info!("realtime updates stopping");
    }

    pub async fn get_connection_stats(&self) -> ConnectionStats {
        let clients = self.clients.read().await;
        let mut infos: Vec<ClientInfo> = clients
            .values()
            .map(|c| ClientInfo {
                id: c.id().to_string(),
                subscriptions: c.subscription_list(),
                is_alive: c.is_alive(),
            })
            .collect();
        infos.sort_by(|a, b| a.id.cmp(&b.id));

        ConnectionStats {
            total_clients: infos.len(),
            is_running: self.running.load(Ordering::SeqCst),
            clients: infos,
        }
    }

    fn ensure_loop(&self) {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            let Some(service) = self.self_handle.upgrade() else {
                return;
            };
            let _ = self.shutdown.send(false);
            info!(
                poll_secs = BROADCAST_INTERVAL_SECS,
                heartbeat_secs = HEARTBEAT_INTERVAL_SECS,
                "broadcast loop starting"
            );
            tokio::spawn(service.run_loop());
        }
    }

    async fn run_loop(self: Arc<Self>) {
        let mut poll = interval(Duration::from_secs(BROADCAST_INTERVAL_SECS));
        let mut heartbeat = interval(Duration::from_secs(HEARTBEAT_INTERVAL_SECS));
        let mut shutdown = self.shutdown.subscribe();

        loop {
            tokio::select! {
                _ = poll.tick() => self.poll_once().await,
                _ = heartbeat.tick() => self.check_heartbeats().await,
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        self.running.store(false, Ordering::SeqCst);
        info!("broadcast loop stopped");
    }

    /// One poll cycle: fetch the union of subscribed tickers, merge the
    /// scalars into the store (no history append on this path) and push a
    /// `price_update` to every matching subscriber.
    pub(crate) async fn poll_once(&self) {
        let union: BTreeSet<String> = self
            .clients
            .read()
            .await
            .values()
            .flat_map(|c| c.subscriptions().iter().cloned())
            .collect();

        if union.is_empty() {
            debug!("no subscriptions, poll cycle skipped");
            return;
        }

        let tickers: Vec<String> = union.into_iter().collect();
        let outcome = match self.source.fetch_quotes(&tickers).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(error = %e, "realtime poll fetch failed");
                return;
            }
        };

        for skipped in &outcome.skipped {
            debug!(symbol = %skipped.symbol, reason = %skipped.reason, "no realtime update for symbol");
        }

        for quote in &outcome.fetched {
            self.store.apply_stock_quote(quote).await;

            let frame = ServerMessage::PriceUpdate {
                data: PriceUpdateData::from_quote(quote),
            };
            let clients = self.clients.read().await;
            for conn in clients.values() {
                if conn.is_subscribed(&quote.ticker) {
                    conn.send(&frame);
                }
            }
        }
    }

    /// One heartbeat cycle: prune connections that never answered the
    /// previous ping, mark the rest stale and ping them again.
    pub(crate) async fn check_heartbeats(&self) {
        let mut clients = self.clients.write().await;
        let mut dead: Vec<Uuid> = Vec::new();

        for (id, conn) in clients.iter_mut() {
            if !conn.is_alive() {
                conn.close();
                dead.push(*id);
            } else {
                conn.mark_stale();
                conn.send_ping();
            }
        }

        for id in dead {
            clients.remove(&id);
            info!(client_id = %id, "connection failed heartbeat, pruned");
        }
    }

    async fn send_to(&self, id: Uuid, frame: &ServerMessage) {
        if let Some(conn) = self.clients.read().await.get(&id) {
            conn.send(frame);
        }
    }
}

/// Drive one upgraded WebSocket: a writer task drains the connection's
/// outbound channel into the socket while this task parses inbound frames.
pub async fn handle_socket(service: Arc<RealtimeService>, socket: WebSocket) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    let client_id = service.register(tx).await;

    let writer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let closing = matches!(message, Message::Close(_));
            if sink.send(message).await.is_err() || closing {
                break;
            }
        }
    });

    while let Some(Ok(message)) = stream.next().await {
        match message {
            Message::Text(text) => service.handle_client_frame(client_id, text.as_str()).await,
            Message::Pong(_) => service.handle_pong(client_id).await,
            Message::Close(_) => break,
            _ => {}
        }
    }

    service.deregister(client_id).await;
    writer.abort();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::source::{BatchOutcome, SkipReason, SourceError};
    use crate::services::stock_source::StockQuote;
    use crate::services::store::MarketStore;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;
    use tokio::sync::mpsc::UnboundedReceiver;

    /// Serves quotes only for the tickers it knows; everything else is
    /// reported as a failed fetch.
    struct PartialSource {
        known: Vec<&'static str>,
        calls: AtomicUsize,
        last_request: Mutex<Vec<String>>,
    }

    impl PartialSource {
        fn new(known: Vec<&'static str>) -> Arc<Self> {
            Arc::new(Self {
                known,
                calls: AtomicUsize::new(0),
                last_request: Mutex::new(Vec::new()),
            })
        }
    }

    fn quote(ticker: &str) -> StockQuote {
        StockQuote {
            ticker: ticker.to_string(),
            name: String::new(),
            exchange: String::new(),
            price: 12.5,
            previous_close: 12.0,
            change: 0.5,
            change_percent: 4.17,
            volume: 9000,
            history: Vec::new(),
        }
    }

    #[async_trait]
    impl StockSource for PartialSource {
        async fn fetch_quote(&self, symbol: &str) -> Result<StockQuote, SourceError> {
            if self.known.contains(&symbol) {
                Ok(quote(symbol))
            } else {
                Err(SourceError::NotFound(symbol.to_string()))
            }
        }

        async fn fetch_quotes(
            &self,
            symbols: &[String],
        ) -> Result<BatchOutcome<StockQuote>, SourceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_request.lock().unwrap() = symbols.to_vec();

            let mut outcome = BatchOutcome::new();
            for symbol in symbols {
                if self.known.contains(&symbol.as_str()) {
                    outcome.fetched.push(quote(symbol));
                } else {
                    outcome.skip(symbol.clone(), SkipReason::NotFound);
                }
            }
            Ok(outcome)
        }
    }

    fn test_service(source: Arc<PartialSource>) -> Arc<RealtimeService> {
        let store = Arc::new(MarketStore::new(
            std::env::temp_dir().join(format!("pennypulse-test-{}", uuid::Uuid::new_v4())),
        ));
        RealtimeService::new(source, store)
    }

    async fn connect(service: &Arc<RealtimeService>) -> (Uuid, UnboundedReceiver<Message>) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = service.register(tx).await;

        // Drain the connection ack
        let ack = rx.recv().await.unwrap();
        assert!(matches!(ack, Message::Text(t) if t.as_str().contains("connection")));
        (id, rx)
    }

    fn drain_text_frames(rx: &mut UnboundedReceiver<Message>) -> Vec<serde_json::Value> {
        let mut frames = Vec::new();
        while let Ok(message) = rx.try_recv() {
            if let Message::Text(text) = message {
                frames.push(serde_json::from_str(text.as_str()).unwrap());
            }
        }
        frames
    }

    #[tokio::test]
    async fn test_partial_fetch_pushes_only_fetched_tickers() {
        let source = PartialSource::new(vec!["IDEA"]);
        let service = test_service(source.clone());
        let (id, mut rx) = connect(&service).await;

        service
            .register_subscriptions(id, &["IDEA".to_string(), "SBIN".to_string()])
            .await;
        service.poll_once().await;

        // Union fetched in one call
        assert_eq!(
            *source.last_request.lock().unwrap(),
            vec!["IDEA".to_string(), "SBIN".to_string()]
        );

        // Exactly one price_update, for IDEA, nothing for SBIN
        let frames = drain_text_frames(&mut rx);
        let updates: Vec<&serde_json::Value> = frames
            .iter()
            .filter(|f| f["type"] == "price_update")
            .collect();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0]["data"]["ticker"], "IDEA");

        // Broadcast path merges scalars into the store
        let record = service.store.get_stock("IDEA").await.unwrap();
        assert_eq!(record.current_price, 12.5);
        assert!(record.price_history.is_empty());
    }

    #[tokio::test]
    async fn test_update_not_sent_to_unsubscribed_connection() {
        let source = PartialSource::new(vec!["IDEA"]);
        let service = test_service(source);
        let (subscriber, mut sub_rx) = connect(&service).await;
        let (bystander, mut other_rx) = connect(&service).await;

        service
            .register_subscriptions(subscriber, &["IDEA".to_string()])
            .await;
        service
            .register_subscriptions(bystander, &["YESBANK".to_string()])
            .await;
        service.poll_once().await;

        assert_eq!(
            drain_text_frames(&mut sub_rx)
                .iter()
                .filter(|f| f["type"] == "price_update")
                .count(),
            1
        );
        assert_eq!(
            drain_text_frames(&mut other_rx)
                .iter()
                .filter(|f| f["type"] == "price_update")
                .count(),
            0
        );
    }

    #[tokio::test]
    async fn test_empty_union_skips_the_cycle() {
        let source = PartialSource::new(vec!["IDEA"]);
        let service = test_service(source.clone());
        let (_id, _rx) = connect(&service).await;

        service.poll_once().await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_heartbeat_prunes_dead_connections() {
        let source = PartialSource::new(vec![]);
        let service = test_service(source);
        let (responsive, mut responsive_rx) = connect(&service).await;
        let (_silent, mut silent_rx) = connect(&service).await;

        // First check: everyone alive, everyone marked stale and pinged
        service.check_heartbeats().await;
        assert_eq!(service.get_connection_stats().await.total_clients, 2);
        assert!(matches!(responsive_rx.recv().await.unwrap(), Message::Ping(_)));
        assert!(matches!(silent_rx.recv().await.unwrap(), Message::Ping(_)));

        // Only one peer answers the ping
        service.handle_pong(responsive).await;

        // Second check: the silent one is closed and deregistered, the
        // responsive one is re-marked stale and pinged again
        service.check_heartbeats().await;
        let stats = service.get_connection_stats().await;
        assert_eq!(stats.total_clients, 1);
        assert_eq!(stats.clients[0].id, responsive.to_string());
        assert!(!stats.clients[0].is_alive);

        assert!(matches!(silent_rx.recv().await.unwrap(), Message::Close(_)));
        assert!(matches!(responsive_rx.recv().await.unwrap(), Message::Ping(_)));
    }

    #[tokio::test]
    async fn test_malformed_frame_gets_error_and_connection_survives() {
        let source = PartialSource::new(vec![]);
        let service = test_service(source);
        let (id, mut rx) = connect(&service).await;

        service.handle_client_frame(id, "{not json").await;
        service.handle_client_frame(id, r#"{"type":"trade"}"#).await;

        let frames = drain_text_frames(&mut rx);
        assert_eq!(frames.iter().filter(|f| f["type"] == "error").count(), 2);
        assert_eq!(service.get_connection_stats().await.total_clients, 1);
    }

    #[tokio::test]
    async fn test_subscribe_frame_starts_loop_and_shutdown_stops_it() {
        let source = PartialSource::new(vec![]);
        let service = test_service(source);
        let (id, mut rx) = connect(&service).await;

        service
            .handle_client_frame(id, r#"{"type":"subscribe","tickers":["idea"]}"#)
            .await;

        let frames = drain_text_frames(&mut rx);
        let ack = frames
            .iter()
            .find(|f| f["type"] == "subscription_success")
            .unwrap();
        assert_eq!(ack["tickers"][0], "IDEA");
        assert!(service.get_connection_stats().await.is_running);

        service.stop_real_time_updates();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!service.get_connection_stats().await.is_running);
    }

    #[tokio::test]
    async fn test_ping_frame_answered_with_pong() {
        let source = PartialSource::new(vec![]);
        let service = test_service(source);
        let (id, mut rx) = connect(&service).await;

        service.handle_client_frame(id, r#"{"type":"ping"}"#).await;

        let frames = drain_text_frames(&mut rx);
        assert_eq!(frames.iter().filter(|f| f["type"] == "pong").count(), 1);
    }
}
