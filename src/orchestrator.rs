//! The orchestrator facade: the single entry point that composes auth
//! material, optional cluster bring-up, a local embedded leaf node, a
//! supporting gateway process, and the control-channel listener into one
//! call.

use std::sync::Arc;

use dusa_collection_utils::core::errors::{ErrorArrayItem, Errors};
use dusa_collection_utils::core::logger::LogLevel;
use dusa_collection_utils::core::types::pathtype::PathType;
use dusa_collection_utils::log;

use crate::auth::{ensure_auth_material, AuthArtifacts};
use crate::bus::Bus;
use crate::cluster::{self, ClusterAuthArtifacts, ClusterConfig, ClusterEnvironment};
use crate::control::{self, ControlChannel};
use crate::manager::{Manager, ProcessConfig};

/// Parameters the facade needs beyond the cluster description itself: where
/// to seal auth material, the leaf node and gateway binaries to launch
/// locally, and whether this invocation should bring up (or merely join) a
/// cluster.
pub struct OrchestratorOptions {
    pub auth_dir: PathType,
    pub leaf_binary: PathType,
    pub leaf_config_path: PathType,
    pub gateway_binary: Option<PathType>,
    pub gateway_args: Vec<String>,
    pub ensure_cluster: bool,
}

pub struct OrchestratorHandle {
    pub leaf_url: String,
    manager: Manager,
    control: Option<ControlChannel>,
}

impl OrchestratorHandle {
    /// Tears down the control listener and stops every process this
    /// invocation started, in reverse order, same as `Manager::stop_all`.
    pub async fn cleanup(self) -> Result<(), ErrorArrayItem> {
        if let Some(control) = self.control {
            control.shutdown();
        }
        self.manager.stop_all().await
    }
}

/// Brings up: auth material, a cluster (if `options.ensure_cluster`), a
/// local leaf node pointed at the cluster's leaf remotes, a gateway process,
/// and the control-channel listener bound to the leaf's own bus connection.
/// Returns the leaf's connect URL and a handle whose `cleanup` tears
/// everything down.
pub async fn start(
    manager: Manager,
    cluster_config: &ClusterConfig,
    bus_urls: &str,
    options: OrchestratorOptions,
) -> Result<OrchestratorHandle, ErrorArrayItem> {
    let auth: AuthArtifacts = ensure_auth_material(&options.auth_dir, &cluster_config.cluster_name)?;
    let cluster_auth = ClusterAuthArtifacts {
        operator_jwt: auth.operator_jwt,
        system_account_jwt: auth.system_account_jwt,
        application_account_jwt: auth.application_account_jwt,
    };

    if options.ensure_cluster {
        match cluster_config.environment {
            ClusterEnvironment::Development => {
                cluster::ensure_cluster(&manager, cluster_config, &cluster_auth).await?;
            }
            ClusterEnvironment::Production => {
                return Err(ErrorArrayItem::new(
                    Errors::GeneralError,
                    "production cluster bring-up is delegated to the remote-deployment path, out of this crate's scope".to_owned(),
                ));
            }
        }
    }

    let remotes = cluster::leaf_remotes(cluster_config);
    start_leaf_node(&manager, &options, &remotes).await?;

    if let Some(gateway_binary) = &options.gateway_binary {
        manager
            .register(ProcessConfig::new(
                &format!("{}-gateway", cluster_config.cluster_name),
                gateway_binary.clone(),
                options.gateway_args.clone(),
            ))
            .await?;
        manager.start(&format!("{}-gateway", cluster_config.cluster_name)).await?;
    }

    let control = ControlChannel::bootstrap(bus_urls, manager.clone()).await?;
    log!(LogLevel::Info, "Orchestrator facade ready; leaf remotes: {:?}", remotes);

    Ok(OrchestratorHandle {
        leaf_url: bus_urls.to_owned(),
        manager,
        control: Some(control),
    })
}

async fn start_leaf_node(
    manager: &Manager,
    options: &OrchestratorOptions,
    remotes: &[String],
) -> Result<(), ErrorArrayItem> {
    let name = "orchestrator-leaf";
    let args = vec![
        "--config".to_owned(),
        options.leaf_config_path.to_path_buf().display().to_string(),
    ];
    let mut config = ProcessConfig::new(name, options.leaf_binary.clone(), args);
    config
        .env
        .push(("ORCHESTRATOR_LEAF_REMOTES".to_owned(), remotes.join(",")));

    manager.register(config).await?;
    manager.start(name).await
}

/// Convenience used by callers that already hold a bus handle and only want
/// the control listener started against it (e.g. a caller that composed its
/// own leaf/gateway wiring and just needs the control plane).
pub async fn attach_control_listener(bus: Arc<dyn Bus>, manager: Manager) -> Result<(), ErrorArrayItem> {
    control::start_command_listener(bus, manager).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::ClusterNode;
    use dusa_collection_utils::core::types::stringy::Stringy;

    fn sample_cluster() -> ClusterConfig {
        ClusterConfig {
            nodes: vec![ClusterNode {
                name: Stringy::new("a"),
                region: None,
                host: "127.0.0.1".to_owned(),
                port: 4222,
                cluster_port: 6222,
                http_port: 8222,
                leaf_port: 7422,
                local: true,
            }],
            cluster_name: "orch-test".to_owned(),
            environment: ClusterEnvironment::Production,
            server_binary: PathType::Str("/usr/local/bin/nats-server".into()),
            data_root: PathType::Str("/tmp/orch-test".into()),
        }
    }

    #[tokio::test]
    async fn production_cluster_bring_up_is_rejected_as_out_of_scope() {
        let manager = Manager::new();
        let config = sample_cluster();
        let options = OrchestratorOptions {
            auth_dir: PathType::Str("/tmp/orch-test/auth".into()),
            leaf_binary: PathType::Str("/bin/true".into()),
            leaf_config_path: PathType::Str("/tmp/orch-test/leaf.conf".into()),
            gateway_binary: None,
            gateway_args: vec![],
            ensure_cluster: true,
        };

        let result = start(manager, &config, "nats://127.0.0.1:4222", options).await;
        assert!(result.is_err());
    }
}
