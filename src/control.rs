//! The remote control channel: a request/reply command plane layered on
//! top of [`crate::bus::Bus`], plus the bootstrap helper that owns the bus
//! connection's lifetime and reconnection policy.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dusa_collection_utils::core::errors::{ErrorArrayItem, Errors};
use dusa_collection_utils::core::logger::LogLevel;
use dusa_collection_utils::log;
use serde::{Deserialize, Serialize};

use crate::bus::{Bus, NatsBus, COMMAND_QUEUE_GROUP, COMMAND_SUBJECT, RECONNECT_INTERVAL, REQUEST_TIMEOUT};
use crate::manager::Manager;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlCommand {
    pub action: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub statuses: Option<HashMap<String, String>>,
}

impl ControlResponse {
    fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            statuses: None,
        }
    }

    fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
            statuses: None,
        }
    }

    fn statuses(statuses: HashMap<String, String>) -> Self {
        Self {
            success: true,
            message: None,
            statuses: Some(statuses),
        }
    }
}

/// Decodes one command, runs it against `manager`, and returns the reply
/// that should be sent back on the bus. Never fails — any error is folded
/// into a `success=false` response.
pub async fn handle_command(manager: &Manager, payload: &[u8]) -> ControlResponse {
    let command: ControlCommand = match serde_json::from_slice(payload) {
        Ok(command) => command,
        Err(err) => return ControlResponse::err(format!("invalid command payload: {}", err)),
    };

    let action = command.action.trim().to_lowercase();

    match action.as_str() {
        "start" | "stop" | "restart" => {
            let name = match command.name.as_deref().map(str::trim) {
                Some(name) if !name.is_empty() => name,
                _ => return ControlResponse::err("missing process name"),
            };

            let result = match action.as_str() {
                "start" => manager.start(name).await,
                "stop" => manager.stop(name).await,
                "restart" => manager.restart(name).await,
                _ => unreachable!(),
            };

            match result {
                Ok(()) => ControlResponse::ok(format!("{} {}", action, name)),
                Err(err) => ControlResponse::err(err.to_string()),
            }
        }
        "status" => match manager.all_status().await {
            Ok(statuses) => ControlResponse::statuses(statuses),
            Err(err) => ControlResponse::err(err.to_string()),
        },
        other => ControlResponse::err(format!("unknown action \"{}\"", other)),
    }
}

/// Subscribes to the commands subject under the control queue group and
/// handles messages until the bus closes the subscription. Runs forever;
/// callers spawn this as a background task.
pub async fn start_command_listener(bus: Arc<dyn Bus>, manager: Manager) -> Result<(), ErrorArrayItem> {
    let mut messages = bus
        .subscribe(COMMAND_SUBJECT, Some(COMMAND_QUEUE_GROUP))
        .await?;

    while let Some(message) = messages.recv().await {
        let manager = manager.clone();
        tokio::spawn(async move {
            let response = handle_command(&manager, &message.payload).await;

            let Some(reply) = message.reply else {
                return;
            };

            let payload = match serde_json::to_vec(&response) {
                Ok(payload) => payload,
                Err(err) => {
                    log!(LogLevel::Error, "Failed to encode control response: {}", err);
                    return;
                }
            };

            if let Err(err) = reply.reply(payload).await {
                log!(LogLevel::Warn, "Failed to send control response: {}", err);
            }
        });
    }

    Ok(())
}

/// Client-side helper: publishes a command and awaits a reply within the
/// fixed control-bus timeout.
pub async fn send_command(bus: &dyn Bus, command: &ControlCommand) -> Result<ControlResponse, ErrorArrayItem> {
    let payload = serde_json::to_vec(command)
        .map_err(|err| ErrorArrayItem::new(Errors::JsonCreation, err.to_string()))?;

    let reply = bus.request(COMMAND_SUBJECT, payload, REQUEST_TIMEOUT).await?;

    serde_json::from_slice(&reply)
        .map_err(|err| ErrorArrayItem::new(Errors::InvalidType, format!("decode control response: {}", err)))
}

/// Owns the bus connection's lifetime: connects (retrying forever at the
/// fixed reconnect interval on failure), starts the listener, and returns a
/// handle whose `shutdown` tears the listener down.
pub struct ControlChannel {
    bus: Arc<dyn Bus>,
    listener: tokio::task::JoinHandle<()>,
}

impl ControlChannel {
    pub async fn bootstrap(urls: &str, manager: Manager) -> Result<Self, ErrorArrayItem> {
        let bus: Arc<dyn Bus> = Arc::new(connect_with_retry(urls).await?);
        manager.set_bus(bus.clone()).await?;

        let listener_bus = bus.clone();
        let listener_manager = manager.clone();
        let listener = tokio::spawn(async move {
            if let Err(err) = start_command_listener(listener_bus, listener_manager).await {
                log!(LogLevel::Error, "Control channel listener exited: {}", err);
            }
        });

        Ok(Self { bus, listener })
    }

    pub fn bus(&self) -> Arc<dyn Bus> {
        self.bus.clone()
    }

    pub fn shutdown(self) {
        self.listener.abort();
    }
}

/// Connects with infinite retry at [`RECONNECT_INTERVAL`]; only returns
/// `Err` if the URL itself cannot be parsed.
async fn connect_with_retry(urls: &str) -> Result<NatsBus, ErrorArrayItem> {
    loop {
        match NatsBus::connect(urls).await {
            Ok(bus) => return Ok(bus),
            Err(err) => {
                log!(LogLevel::Warn, "Bus connect to {} failed: {}; retrying in {:?}", urls, err, RECONNECT_INTERVAL);
                tokio::time::sleep(Duration::from_secs(RECONNECT_INTERVAL.as_secs())).await;
            }
        }
    }
}
