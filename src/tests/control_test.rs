#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use dusa_collection_utils::core::types::pathtype::PathType;

    use crate::bus::{Bus, LocalBus};
    use crate::control::{send_command, start_command_listener, ControlCommand};
    use crate::manager::{Manager, ProcessConfig};

    /// Scenario 5: a client sends `{action:"status"}` over an in-memory bus
    /// and gets back the registered-name keyset.
    #[tokio::test]
    async fn status_command_over_local_bus_lists_registered_names() {
        let manager = Manager::new();
        manager
            .register(ProcessConfig::new("ctl-a", PathType::Str("/bin/echo".into()), vec!["x".into()]))
            .await
            .expect("register");

        let bus: Arc<dyn Bus> = Arc::new(LocalBus::new());
        let listener_bus = bus.clone();
        let listener_manager = manager.clone();
        tokio::spawn(async move {
            let _ = start_command_listener(listener_bus, listener_manager).await;
        });

        tokio::time::sleep(Duration::from_millis(50)).await;

        let response = send_command(bus.as_ref(), &ControlCommand { action: "status".to_owned(), name: None })
            .await
            .expect("status command should succeed");

        assert!(response.success);
        let statuses = response.statuses.expect("status response carries a statuses map");
        assert!(statuses.contains_key("ctl-a"));
    }

    /// An unknown action gets a structured failure response, not a dropped
    /// message or a panic.
    #[tokio::test]
    async fn unknown_action_replies_with_failure() {
        let manager = Manager::new();
        let bus: Arc<dyn Bus> = Arc::new(LocalBus::new());
        let listener_bus = bus.clone();
        let listener_manager = manager.clone();
        tokio::spawn(async move {
            let _ = start_command_listener(listener_bus, listener_manager).await;
        });

        tokio::time::sleep(Duration::from_millis(50)).await;

        let response = send_command(bus.as_ref(), &ControlCommand { action: "dance".to_owned(), name: None })
            .await
            .expect("bus round trip should still succeed");

        assert!(!response.success);
        assert!(response.message.unwrap().contains("unknown action"));
    }

    /// `start`/`stop`/`restart` without a `name` get a clear error rather
    /// than being dispatched against nothing.
    #[tokio::test]
    async fn start_without_a_name_is_rejected() {
        let manager = Manager::new();
        let bus: Arc<dyn Bus> = Arc::new(LocalBus::new());
        let listener_bus = bus.clone();
        let listener_manager = manager.clone();
        tokio::spawn(async move {
            let _ = start_command_listener(listener_bus, listener_manager).await;
        });

        tokio::time::sleep(Duration::from_millis(50)).await;

        let response = send_command(bus.as_ref(), &ControlCommand { action: "start".to_owned(), name: None })
            .await
            .expect("bus round trip should still succeed");

        assert!(!response.success);
        assert_eq!(response.message.as_deref(), Some("missing process name"));
    }
}
