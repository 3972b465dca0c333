//! Brings up and introspects a fleet of server nodes that form a single
//! cluster, managed entirely through the [`crate::manager::Manager`].
//!
//! Per-node configs are rendered from a small fixed template — no macro
//! system, following this codebase's preference for a structured emitter
//! over string interpolation once variability grows past a handful of
//! fields (see `config_bundle.rs`'s rendering style).

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::time::Duration;

use dusa_collection_utils::core::errors::{ErrorArrayItem, Errors};
use dusa_collection_utils::core::logger::LogLevel;
use dusa_collection_utils::core::types::pathtype::PathType;
use dusa_collection_utils::core::types::stringy::Stringy;
use dusa_collection_utils::log;
use procfs::process::all_processes;
use serde::{Deserialize, Serialize};

use crate::manager::{Manager, ProcessConfig};

/// Directory mode applied to each node's data directory and its
/// `jetstream/` subdirectory.
const NODE_DIR_MODE: u32 = 0o755;

/// Sleep between starting consecutive nodes, letting each settle before the
/// next attempts to route to it.
const NODE_SETTLE_DELAY: Duration = Duration::from_millis(500);

/// Bound on an HTTP liveness probe against a node's monitoring port.
const HEALTH_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Name of the group every cluster node is registered under.
pub const CLUSTER_GROUP: &str = "nats-cluster";

const JETSTREAM_MEMORY_LIMIT_BYTES: u64 = 256 * 1024 * 1024;
const JETSTREAM_FILE_LIMIT_BYTES: u64 = 2 * 1024 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClusterEnvironment {
    Development,
    Production,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterNode {
    pub name: Stringy,
    pub region: Option<String>,
    pub host: String,
    pub port: u16,
    pub cluster_port: u16,
    pub http_port: u16,
    pub leaf_port: u16,
    /// True when this node runs on the same host as the orchestrator.
    pub local: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    pub nodes: Vec<ClusterNode>,
    pub cluster_name: String,
    pub environment: ClusterEnvironment,
    pub server_binary: PathType,
    pub data_root: PathType,
}

/// JWTs handed in from [`crate::auth`] and inlined into each rendered
/// `nats.conf`'s memory account resolver.
#[derive(Debug, Clone)]
pub struct ClusterAuthArtifacts {
    pub operator_jwt: String,
    pub system_account_jwt: String,
    pub application_account_jwt: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeStatus {
    Running,
    Unhealthy,
    Stopped,
}

impl NodeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeStatus::Running => "running",
            NodeStatus::Unhealthy => "unhealthy",
            NodeStatus::Stopped => "stopped",
        }
    }
}

/// Brings the cluster up: ensures the data root, renders and registers
/// every node not already answering its health probe, and groups them.
///
/// Binary installation is an external collaborator's responsibility — this
/// only verifies the configured path exists.
pub async fn ensure_cluster(
    manager: &Manager,
    config: &ClusterConfig,
    auth: &ClusterAuthArtifacts,
) -> Result<(), ErrorArrayItem> {
    let binary = config.server_binary.to_path_buf();
    if !binary.exists() {
        return Err(ErrorArrayItem::new(
            Errors::InvalidFile,
            format!("cluster server binary not found at {}", binary.display()),
        ));
    }

    let data_root = config.data_root.to_path_buf();
    fs::create_dir_all(&data_root).map_err(ErrorArrayItem::from)?;

    for node in &config.nodes {
        let node_dir = data_root.join(node.name.to_string());
        let jetstream_dir = node_dir.join("jetstream");
        fs::create_dir_all(&jetstream_dir).map_err(ErrorArrayItem::from)?;
        set_dir_mode(&node_dir)?;
        set_dir_mode(&jetstream_dir)?;

        let process_name = node_process_name(&config.cluster_name, &node.name);
        let conf_path = node_dir.join("nats.conf");

        if probe_health(node).await {
            log!(LogLevel::Debug, "Cluster node {} already healthy; registering for visibility only", node.name);
            manager
                .register(node_process_config(&process_name, &config.server_binary, &conf_path))
                .await?;
            continue;
        }

        let routes = route_list(config, node);
        let rendered = render_node_config(&config.cluster_name, node, &routes, auth);
        fs::write(&conf_path, rendered).map_err(ErrorArrayItem::from)?;

        manager
            .register(node_process_config(&process_name, &config.server_binary, &conf_path))
            .await?;
        manager.start(&process_name).await?;

        tokio::time::sleep(NODE_SETTLE_DELAY).await;
    }

    let members = config
        .nodes
        .iter()
        .map(|node| Stringy::new(&node_process_name(&config.cluster_name, &node.name)))
        .collect();
    manager.add_group(CLUSTER_GROUP, members).await
}

/// Stops the cluster group, then — belt and suspenders, to recover nodes
/// started outside this supervisor — scans for any process whose command
/// line references a node's rendered config and signals it directly.
pub async fn stop_local_cluster(manager: &Manager, config: &ClusterConfig) -> Result<(), ErrorArrayItem> {
    manager.stop_group(CLUSTER_GROUP).await?;

    for node in &config.nodes {
        let conf_path = config
            .data_root
            .to_path_buf()
            .join(node.name.to_string())
            .join("nats.conf");
        if let Err(err) = stop_process_by_config_path(&conf_path) {
            log!(LogLevel::Warn, "Cluster teardown scan for {} failed: {}", node.name, err);
        }
    }

    Ok(())
}

/// Combines an HTTP liveness probe with the supervisor's own view of
/// whether the node process is running.
pub async fn get_cluster_status(manager: &Manager, config: &ClusterConfig) -> Vec<(Stringy, NodeStatus)> {
    let mut statuses = Vec::with_capacity(config.nodes.len());
    for node in &config.nodes {
        let process_name = node_process_name(&config.cluster_name, &node.name);
        let healthy = probe_health(node).await;
        let supervised = manager.is_running(&process_name).await;

        let status = if healthy {
            NodeStatus::Running
        } else if supervised {
            NodeStatus::Unhealthy
        } else {
            NodeStatus::Stopped
        };
        statuses.push((node.name.clone(), status));
    }
    statuses
}

/// `nats://host:leaf_port` for every node, for embedding in a leaf node's
/// remote list.
pub fn leaf_remotes(config: &ClusterConfig) -> Vec<String> {
    config
        .nodes
        .iter()
        .map(|node| format!("nats://{}:{}", node.host, node.leaf_port))
        .collect()
}

fn node_process_name(cluster_name: &str, node_name: &str) -> String {
    format!("{}-{}", cluster_name, node_name)
}

fn node_process_config(process_name: &str, binary: &PathType, conf_path: &PathBuf) -> ProcessConfig {
    ProcessConfig::new(
        process_name,
        binary.clone(),
        vec!["--config".to_owned(), conf_path.display().to_string()],
    )
}

fn route_list(config: &ClusterConfig, node: &ClusterNode) -> String {
    config
        .nodes
        .iter()
        .filter(|other| other.name != node.name)
        .map(|other| format!("nats://{}:{}", other.host, other.cluster_port))
        .collect::<Vec<_>>()
        .join(",")
}

fn render_node_config(cluster_name: &str, node: &ClusterNode, routes: &str, auth: &ClusterAuthArtifacts) -> String {
    format!(
        r#"server_name: "{name}"
host: "{host}"
port: {port}

http: {http_port}

operator: {operator_jwt}

resolver: MEMORY
resolver_preload: {{
  SYS: {system_account_jwt}
  APP: {application_account_jwt}
}}

cluster {{
  name: "{cluster_name}"
  listen: "{host}:{cluster_port}"
  routes: [{routes}]
}}

jetstream {{
  store_dir: "./jetstream"
  max_memory_store: {js_mem}
  max_file_store: {js_file}
}}

leafnodes {{
  listen: "{host}:{leaf_port}"
}}
"#,
        name = node.name,
        host = node.host,
        port = node.port,
        http_port = node.http_port,
        operator_jwt = auth.operator_jwt,
        system_account_jwt = auth.system_account_jwt,
        application_account_jwt = auth.application_account_jwt,
        cluster_name = cluster_name,
        cluster_port = node.cluster_port,
        routes = routes,
        js_mem = JETSTREAM_MEMORY_LIMIT_BYTES,
        js_file = JETSTREAM_FILE_LIMIT_BYTES,
        leaf_port = node.leaf_port,
    )
}

async fn probe_health(node: &ClusterNode) -> bool {
    let url = format!("http://{}:{}/", node.host, node.http_port);
    let client = match reqwest::Client::builder().timeout(HEALTH_PROBE_TIMEOUT).build() {
        Ok(client) => client,
        Err(_) => return false,
    };

    matches!(client.get(&url).send().await, Ok(response) if response.status().is_success())
}

fn set_dir_mode(path: &PathBuf) -> Result<(), ErrorArrayItem> {
    let metadata = fs::metadata(path).map_err(ErrorArrayItem::from)?;
    let mut permissions = metadata.permissions();
    permissions.set_mode(NODE_DIR_MODE);
    fs::set_permissions(path, permissions).map_err(ErrorArrayItem::from)
}

fn stop_process_by_config_path(conf_path: &PathBuf) -> Result<(), ErrorArrayItem> {
    let needle = conf_path.display().to_string();

    for entry in all_processes().map_err(|err| ErrorArrayItem::new(Errors::GeneralError, err.to_string()))? {
        let process = match entry {
            Ok(process) => process,
            Err(_) => continue,
        };

        let cmdline = match process.cmdline() {
            Ok(cmdline) => cmdline,
            Err(_) => continue,
        };

        if !cmdline.iter().any(|arg| arg.contains(&needle)) {
            continue;
        }

        let pid = process.pid();
        let result = unsafe { libc::kill(pid, libc::SIGINT) };
        if result != 0 {
            let err = std::io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::ESRCH) {
                log!(LogLevel::Warn, "Failed to SIGINT leftover cluster process {}: {}", pid, err);
                let _ = unsafe { libc::kill(pid, libc::SIGKILL) };
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(name: &str, host: &str) -> ClusterNode {
        ClusterNode {
            name: Stringy::new(name),
            region: None,
            host: host.to_owned(),
            port: 4222,
            cluster_port: 6222,
            http_port: 8222,
            leaf_port: 7422,
            local: true,
        }
    }

    #[test]
    fn route_list_excludes_self() {
        let config = ClusterConfig {
            nodes: vec![node("a", "10.0.0.1"), node("b", "10.0.0.2"), node("c", "10.0.0.3")],
            cluster_name: "test".into(),
            environment: ClusterEnvironment::Development,
            server_binary: PathType::Str("/usr/local/bin/nats-server".into()),
            data_root: PathType::Str("/tmp/cluster".into()),
        };

        let routes = route_list(&config, &config.nodes[0]);
        assert_eq!(routes, "nats://10.0.0.2:6222,nats://10.0.0.3:6222");
    }

    #[test]
    fn leaf_remotes_lists_every_node() {
        let config = ClusterConfig {
            nodes: vec![node("a", "10.0.0.1"), node("b", "10.0.0.2")],
            cluster_name: "test".into(),
            environment: ClusterEnvironment::Development,
            server_binary: PathType::Str("/usr/local/bin/nats-server".into()),
            data_root: PathType::Str("/tmp/cluster".into()),
        };

        assert_eq!(
            leaf_remotes(&config),
            vec!["nats://10.0.0.1:7422".to_string(), "nats://10.0.0.2:7422".to_string()]
        );
    }

    #[test]
    fn rendered_config_contains_cluster_routes_and_jetstream_limits() {
        let auth = ClusterAuthArtifacts {
            operator_jwt: "OP".into(),
            system_account_jwt: "SYS".into(),
            application_account_jwt: "APP".into(),
        };
        let rendered = render_node_config("test-cluster", &node("a", "10.0.0.1"), "nats://10.0.0.2:6222", &auth);
        assert!(rendered.contains("routes: [nats://10.0.0.2:6222]"));
        assert!(rendered.contains("max_file_store: 2147483648"));
        assert!(rendered.contains(r#"name: "test-cluster""#));
    }
}
