//! A single subscriber connection, owned by the broadcast registry.
//!
//! All mutation of the subscription set and the liveness flag goes through
//! this type; the broadcast loop only performs read-only membership checks.

use crate::realtime::protocol::ServerMessage;
use axum::body::Bytes;
use axum::extract::ws::Message;
use std::collections::HashSet;
use tokio::sync::mpsc::UnboundedSender;
use tracing::warn;
use uuid::Uuid;

pub struct ClientConnection {
    id: Uuid,
    sender: UnboundedSender<Message>,
    subscriptions: HashSet<String>,
    is_alive: bool,
}

impl ClientConnection {
    pub fn new(id: Uuid, sender: UnboundedSender<Message>) -> Self {
        Self {
            id,
            sender,
            subscriptions: HashSet::new(),
            is_alive: true,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Add tickers (case-normalized upper) and return the resulting set.
    pub fn subscribe(&mut self, tickers: &[String]) -> Vec<String> {
        for ticker in tickers {
            let normalized = ticker.trim().to_uppercase();
            if !normalized.is_empty() {
                self.subscriptions.insert(normalized);
            }
        }
        self.subscription_list()
    }

    /// Remove tickers and return the resulting set.
    pub fn unsubscribe(&mut self, tickers: &[String]) -> Vec<String> {
        for ticker in tickers {
            self.subscriptions.remove(&ticker.trim().to_uppercase());
        }
        self.subscription_list()
    }

    pub fn is_subscribed(&self, ticker: &str) -> bool {
        self.subscriptions.contains(ticker)
    }

    pub fn subscriptions(&self) -> &HashSet<String> {
        &self.subscriptions
    }

    pub fn subscription_list(&self) -> Vec<String> {
        let mut list: Vec<String> = self.subscriptions.iter().cloned().collect();
        list.sort();
        list
    }

    pub fn is_alive(&self) -> bool {
        self.is_alive
    }

    /// Flip the liveness flag down; the peer's pong flips it back up
    /// before the next heartbeat check.
    pub fn mark_stale(&mut self) {
        self.is_alive = false;
    }

    pub fn mark_alive(&mut self) {
        self.is_alive = true;
    }

    /// Serialize and send a protocol frame. Returns false when the
    /// outbound channel is gone (peer already disconnected).
    pub fn send(&self, frame: &ServerMessage) -> bool {
        match serde_json::to_string(frame) {
            Ok(json) => self.send_raw(Message::Text(json.into())),
            Err(e) => {
                warn!(client_id = %self.id, error = %e, "frame serialization failed");
                false
            }
        }
    }

    pub fn send_raw(&self, message: Message) -> bool {
        self.sender.send(message).is_ok()
    }

    pub fn send_ping(&self) -> bool {
        self.send_raw(Message::Ping(Bytes::new()))
    }

    /// Ask the socket task to close the connection.
    pub fn close(&self) {
        let _ = self.sender.send(Message::Close(None));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn connection() -> (ClientConnection, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ClientConnection::new(Uuid::new_v4(), tx), rx)
    }

    #[test]
    fn test_subscribe_normalizes_and_dedups() {
        let (mut conn, _rx) = connection();

        let set = conn.subscribe(&["idea".to_string(), "IDEA".to_string(), " sbin ".to_string()]);
        assert_eq!(set, vec!["IDEA".to_string(), "SBIN".to_string()]);
        assert!(conn.is_subscribed("IDEA"));
        assert!(!conn.is_subscribed("idea"));
    }

    #[test]
    fn test_unsubscribe_removes_tickers() {
        let (mut conn, _rx) = connection();
        conn.subscribe(&["IDEA".to_string(), "SBIN".to_string()]);

        let set = conn.unsubscribe(&["idea".to_string()]);
        assert_eq!(set, vec!["SBIN".to_string()]);
    }

    #[tokio::test]
    async fn test_send_delivers_frame() {
        let (conn, mut rx) = connection();
        assert!(conn.send(&ServerMessage::Error {
            message: "oops".to_string()
        }));

        match rx.recv().await.unwrap() {
            Message::Text(text) => assert!(text.as_str().contains("oops")),
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_send_after_disconnect_reports_failure() {
        let (conn, rx) = connection();
        drop(rx);
        assert!(!conn.send_ping());
    }
}
