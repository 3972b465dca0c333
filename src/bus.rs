//! The message bus abstraction the supervisor publishes lifecycle events to
//! and accepts remote control commands over.
//!
//! `NatsBus` is the production binding, against the same kind of clustered
//! messaging server [`crate::cluster`] brings up. `LocalBus` is an
//! in-process stand-in over a broadcast channel, used by tests and by
//! callers that only want the control-channel wiring without a live NATS
//! deployment — the same role `aggregator.rs`'s broadcast fan-out plays
//! elsewhere in this codebase.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dusa_collection_utils::core::errors::{ErrorArrayItem, Errors};
use dusa_collection_utils::core::types::stringy::Stringy;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, Mutex};

use crate::manager::ProcessState;
use crate::timestamp::{current_timestamp, to_rfc3339};

/// Subject every lifecycle event for `name` is published to.
pub fn event_subject(name: &str) -> String {
    format!("goreman.events.{}", name)
}

/// Subject the control listener subscribes to, under the `goreman-control`
/// queue group.
pub const COMMAND_SUBJECT: &str = "goreman.commands";
pub const COMMAND_QUEUE_GROUP: &str = "goreman-control";

/// Bound on a single request/reply round trip over the control channel.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// How long to wait between reconnect attempts when the bus connection is
/// lost. Reconnection itself is retried forever.
pub const RECONNECT_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleEvent {
    pub name: Stringy,
    pub status: Stringy,
    pub pid: u32,
    /// RFC3339, per the wire format.
    pub start_time: String,
    pub exit_code: i32,
    /// RFC3339 time this event was published (not the `start_time` of the
    /// activation it reports on).
    pub timestamp: String,
}

impl LifecycleEvent {
    pub fn new(name: &str, status: ProcessState, pid: u32, start_time: u64, exit_code: i32) -> Self {
        Self {
            name: Stringy::new(name),
            status: Stringy::new(status.as_str()),
            pid,
            start_time: to_rfc3339(start_time),
            exit_code,
            timestamp: to_rfc3339(current_timestamp()),
        }
    }
}

/// A single inbound message delivered to a subscriber: the raw payload plus,
/// when the message came in over a request/reply round trip, a handle back
/// to the sender.
pub struct BusMessage {
    pub payload: Vec<u8>,
    pub reply: Option<Arc<dyn ReplySink>>,
}

#[async_trait]
pub trait ReplySink: Send + Sync {
    async fn reply(&self, payload: Vec<u8>) -> Result<(), ErrorArrayItem>;
}

/// A message bus connection capable of publish/subscribe and a timed
/// request/reply round trip. Implementations must be cheap to clone
/// (`Arc`-backed) since the `Manager` and the control listener both hold a
/// handle to the same connection.
#[async_trait]
pub trait Bus: Send + Sync {
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<(), ErrorArrayItem>;

    /// Subscribes to `subject` under `queue_group`, returning a channel of
    /// inbound messages. Multiple subscribers in the same queue group split
    /// the traffic; distinct groups (or no group) each see every message.
    async fn subscribe(
        &self,
        subject: &str,
        queue_group: Option<&str>,
    ) -> Result<tokio::sync::mpsc::Receiver<BusMessage>, ErrorArrayItem>;

    async fn request(
        &self,
        subject: &str,
        payload: Vec<u8>,
        timeout: Duration,
    ) -> Result<Vec<u8>, ErrorArrayItem>;

    async fn publish_event(&self, event: &LifecycleEvent) -> Result<(), ErrorArrayItem> {
        let payload = serde_json::to_vec(event)
            .map_err(|err| ErrorArrayItem::new(Errors::JsonCreation, err.to_string()))?;
        self.publish(&event_subject(&event.name), payload).await
    }
}

/// Production binding over `async_nats::Client`.
#[derive(Clone)]
pub struct NatsBus {
    client: async_nats::Client,
}

impl NatsBus {
    pub fn new(client: async_nats::Client) -> Self {
        Self { client }
    }

    /// Connects with the library's infinite-retry-at-fixed-interval
    /// reconnection policy rather than `async-nats`'s default backoff, so
    /// the supervisor's control channel keeps trying for as long as the
    /// process runs.
    pub async fn connect(urls: &str) -> Result<Self, ErrorArrayItem> {
        let client = async_nats::ConnectOptions::new()
            .retry_on_initial_connect()
            .reconnect_delay_callback(|_attempts| RECONNECT_INTERVAL)
            .connect(urls)
            .await
            .map_err(|err| ErrorArrayItem::new(Errors::Network, format!("connect to bus: {}", err)))?;
        Ok(Self::new(client))
    }
}

struct NatsReplySink {
    client: async_nats::Client,
    reply_subject: async_nats::Subject,
}

#[async_trait]
impl ReplySink for NatsReplySink {
    async fn reply(&self, payload: Vec<u8>) -> Result<(), ErrorArrayItem> {
        self.client
            .publish(self.reply_subject.clone(), payload.into())
            .await
            .map_err(|err| ErrorArrayItem::new(Errors::Network, format!("reply: {}", err)))
    }
}

#[async_trait]
impl Bus for NatsBus {
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<(), ErrorArrayItem> {
        self.client
            .publish(subject.to_owned(), payload.into())
            .await
            .map_err(|err| ErrorArrayItem::new(Errors::Network, format!("publish {}: {}", subject, err)))
    }

    async fn subscribe(
        &self,
        subject: &str,
        queue_group: Option<&str>,
    ) -> Result<tokio::sync::mpsc::Receiver<BusMessage>, ErrorArrayItem> {
        use futures_util::StreamExt;

        let mut subscriber = match queue_group {
            Some(group) => self
                .client
                .queue_subscribe(subject.to_owned(), group.to_owned())
                .await,
            None => self.client.subscribe(subject.to_owned()).await,
        }
        .map_err(|err| ErrorArrayItem::new(Errors::Network, format!("subscribe {}: {}", subject, err)))?;

        let (tx, rx) = tokio::sync::mpsc::channel(64);
        let client = self.client.clone();
        tokio::spawn(async move {
            while let Some(message) = subscriber.next().await {
                let reply = message.reply.clone().map(|reply_subject| {
                    Arc::new(NatsReplySink {
                        client: client.clone(),
                        reply_subject,
                    }) as Arc<dyn ReplySink>
                });
                let outbound = BusMessage {
                    payload: message.payload.to_vec(),
                    reply,
                };
                if tx.send(outbound).await.is_err() {
                    break;
                }
            }
        });

        Ok(rx)
    }

    async fn request(
        &self,
        subject: &str,
        payload: Vec<u8>,
        timeout: Duration,
    ) -> Result<Vec<u8>, ErrorArrayItem> {
        let response = tokio::time::timeout(timeout, self.client.request(subject.to_owned(), payload.into()))
            .await
            .map_err(|_| ErrorArrayItem::new(Errors::Network, format!("request {}: timed out", subject)))?
            .map_err(|err| ErrorArrayItem::new(Errors::Network, format!("request {}: {}", subject, err)))?;
        Ok(response.payload.to_vec())
    }
}

/// In-process stand-in for tests and single-binary setups that don't need a
/// live NATS deployment. Request/reply is implemented by publishing to an
/// implicit reply subject and racing a subscriber against a timeout.
#[derive(Clone)]
pub struct LocalBus {
    inner: Arc<Mutex<broadcast::Sender<(String, Vec<u8>, Option<String>)>>>,
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalBus {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(256);
        Self {
            inner: Arc::new(Mutex::new(tx)),
        }
    }
}

struct LocalReplySink {
    tx: broadcast::Sender<(String, Vec<u8>, Option<String>)>,
    reply_subject: String,
}

#[async_trait]
impl ReplySink for LocalReplySink {
    async fn reply(&self, payload: Vec<u8>) -> Result<(), ErrorArrayItem> {
        let _ = self.tx.send((self.reply_subject.clone(), payload, None));
        Ok(())
    }
}

#[async_trait]
impl Bus for LocalBus {
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<(), ErrorArrayItem> {
        let tx = self.inner.lock().await;
        let _ = tx.send((subject.to_owned(), payload, None));
        Ok(())
    }

    async fn subscribe(
        &self,
        subject: &str,
        _queue_group: Option<&str>,
    ) -> Result<tokio::sync::mpsc::Receiver<BusMessage>, ErrorArrayItem> {
        let mut broadcast_rx = self.inner.lock().await.subscribe();
        let (tx, rx) = tokio::sync::mpsc::channel(64);
        let subject = subject.to_owned();
        let sender = self.inner.lock().await.clone();

        tokio::spawn(async move {
            loop {
                match broadcast_rx.recv().await {
                    Ok((msg_subject, payload, reply_to)) if msg_subject == subject => {
                        let reply = reply_to.map(|reply_subject| {
                            Arc::new(LocalReplySink {
                                tx: sender.clone(),
                                reply_subject,
                            }) as Arc<dyn ReplySink>
                        });
                        if tx.send(BusMessage { payload, reply }).await.is_err() {
                            break;
                        }
                    }
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Ok(rx)
    }

    async fn request(
        &self,
        subject: &str,
        payload: Vec<u8>,
        timeout: Duration,
    ) -> Result<Vec<u8>, ErrorArrayItem> {
        let reply_subject = format!("{}.reply.{}", subject, uuid_like());
        let mut broadcast_rx = self.inner.lock().await.subscribe();
        let tx = self.inner.lock().await.clone();
        let _ = tx.send((subject.to_owned(), payload, Some(reply_subject.clone())));

        let wait = async {
            loop {
                match broadcast_rx.recv().await {
                    Ok((msg_subject, reply_payload, _)) if msg_subject == reply_subject => {
                        return Ok(reply_payload);
                    }
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => {
                        return Err(ErrorArrayItem::new(Errors::Network, "local bus closed".to_owned()));
                    }
                }
            }
        };

        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| ErrorArrayItem::new(Errors::Network, format!("request {}: timed out", subject)))?
    }
}

/// Good enough uniqueness for a process-local reply subject; not a real UUID.
fn uuid_like() -> String {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    format!("{:x}", COUNTER.fetch_add(1, Ordering::Relaxed))
}
