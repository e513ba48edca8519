//! Container runtime seam and the docker CLI implementation.

use std::collections::BTreeMap;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::{DiscoveryError, DiscoveryResult};

/// Subset of `docker inspect` output used by discovery.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContainerDetails {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub created: String,
    #[serde(default)]
    pub config: ContainerConfig,
    #[serde(default)]
    pub state: ContainerState,
    #[serde(default)]
    pub network_settings: NetworkSettings,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContainerConfig {
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub labels: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub env: Option<Vec<String>>,
    #[serde(default)]
    pub exposed_ports: Option<BTreeMap<String, Value>>,
    #[serde(default)]
    pub cmd: Option<Vec<String>>,
    #[serde(default)]
    pub entrypoint: Option<Vec<String>>,
    #[serde(default)]
    pub healthcheck: Option<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContainerState {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub running: bool,
    #[serde(default)]
    pub pid: u32,
    #[serde(default)]
    pub health: Option<ContainerHealth>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContainerHealth {
    #[serde(default)]
    pub status: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NetworkSettings {
    /// `"80/tcp" -> [bindings]`; unpublished ports map to `null`.
    #[serde(default)]
    pub ports: Option<BTreeMap<String, Option<Vec<PortBinding>>>>,
    #[serde(default)]
    pub networks: Option<BTreeMap<String, NetworkEndpoint>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PortBinding {
    #[serde(default)]
    pub host_ip: String,
    #[serde(default)]
    pub host_port: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NetworkEndpoint {
    #[serde(rename = "IPAddress", default)]
    pub ip_address: String,
}

impl ContainerDetails {
    pub fn labels(&self) -> BTreeMap<String, String> {
        self.config.labels.clone().unwrap_or_default()
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.config
            .labels
            .as_ref()
            .and_then(|l| l.get(key))
            .map(String::as_str)
    }

    /// Container name without the leading slash.
    pub fn display_name(&self) -> &str {
        self.name.trim_start_matches('/')
    }

    /// Full command line, entrypoint first.
    pub fn command_line(&self) -> String {
        self.config
            .entrypoint
            .iter()
            .flatten()
            .chain(self.config.cmd.iter().flatten())
            .cloned()
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// One line of `docker service ls --format '{{json .}}'`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SwarmService {
    #[serde(rename = "ID", default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub mode: String,
    /// e.g. `"2/3"`
    #[serde(default)]
    pub replicas: String,
    #[serde(default)]
    pub image: String,
    /// e.g. `"*:8080->80/tcp"`
    #[serde(default)]
    pub ports: String,
}

impl SwarmService {
    /// `(running, desired)` parsed from `replicas`.
    pub fn replica_counts(&self) -> Option<(u32, u32)> {
        let counts = self.replicas.split_whitespace().next()?;
        let (running, desired) = counts.split_once('/')?;
        Some((running.parse().ok()?, desired.parse().ok()?))
    }
}

/// A container lifecycle event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerEvent {
    /// Docker action, e.g. `start`, `die`, `destroy`.
    pub action: String,
    pub id: String,
    pub name: Option<String>,
}

/// Container runtime introspection.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Verify the runtime is reachable.
    async fn ping(&self) -> DiscoveryResult<()>;

    /// Container ids; `all` includes stopped containers.
    async fn list_containers(&self, all: bool) -> DiscoveryResult<Vec<String>>;

    async fn inspect_container(&self, id: &str) -> DiscoveryResult<ContainerDetails>;

    /// Whether the runtime is an active swarm manager.
    async fn swarm_active(&self) -> DiscoveryResult<bool>;

    async fn list_swarm_services(&self) -> DiscoveryResult<Vec<SwarmService>>;

    /// Stream container events until the receiver is dropped.
    async fn events(&self) -> DiscoveryResult<mpsc::Receiver<ContainerEvent>>;
}

/// Talks to the runtime through the `docker` command line client.
#[derive(Debug, Clone)]
pub struct DockerCli {
    binary: String,
    timeout: Duration,
}

impl DockerCli {
    pub fn new(binary: impl Into<String>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }

    async fn run(&self, args: &[&str]) -> DiscoveryResult<String> {
        debug!(binary = %self.binary, args = ?args, "Running runtime command");
        let output = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(self.timeout, output)
            .await
            .map_err(|_| DiscoveryError::unavailable("docker", format!("'{}' timed out", args.join(" "))))?
            .map_err(|e| DiscoveryError::unavailable("docker", e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(DiscoveryError::unavailable("docker", stderr.trim()));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::new("docker", Duration::from_secs(10))
    }
}

/// Parse newline-delimited JSON, skipping lines that do not decode.
pub fn parse_json_lines<T: serde::de::DeserializeOwned>(text: &str) -> Vec<T> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .filter_map(|line| match serde_json::from_str(line) {
            Ok(value) => Some(value),
            Err(e) => {
                debug!(error = %e, "Skipping undecodable runtime line");
                None
            }
        })
        .collect()
}

/// Decode one `docker events --format '{{json .}}'` line.
pub fn parse_event(line: &str) -> Option<ContainerEvent> {
    let value: Value = serde_json::from_str(line).ok()?;
    let action = value
        .get("Action")
        .or_else(|| value.get("status"))
        .and_then(|a| a.as_str())?;
    let id = value
        .get("Actor")
        .and_then(|a| a.get("ID"))
        .or_else(|| value.get("id"))
        .and_then(|i| i.as_str())?;
    let name = value
        .get("Actor")
        .and_then(|a| a.get("Attributes"))
        .and_then(|a| a.get("name"))
        .and_then(|n| n.as_str())
        .map(str::to_string);

    // Exec events carry a suffix, e.g. "exec_start: sh".
    let action = action.split(':').next().unwrap_or(action).trim().to_string();
    Some(ContainerEvent {
        action,
        id: id.to_string(),
        name,
    })
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    async fn ping(&self) -> DiscoveryResult<()> {
        self.run(&["version", "--format", "{{.Server.Version}}"]).await.map(|_| ())
    }

    async fn list_containers(&self, all: bool) -> DiscoveryResult<Vec<String>> {
        let mut args = vec!["ps", "--no-trunc", "--format", "{{.ID}}"];
        if all {
            args.insert(1, "--all");
        }
        let output = self.run(&args).await?;
        Ok(output
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    async fn inspect_container(&self, id: &str) -> DiscoveryResult<ContainerDetails> {
        let output = self.run(&["inspect", "--type", "container", id]).await?;
        let mut details: Vec<ContainerDetails> = serde_json::from_str(&output)?;
        details
            .pop()
            .ok_or_else(|| DiscoveryError::Parse(format!("no inspect output for {}", id)))
    }

    async fn swarm_active(&self) -> DiscoveryResult<bool> {
        let output = self.run(&["info", "--format", "{{json .Swarm}}"]).await?;
        let swarm: Value = serde_json::from_str(output.trim())?;
        let active = swarm.get("LocalNodeState").and_then(|s| s.as_str()) == Some("active");
        let manager = swarm
            .get("ControlAvailable")
            .and_then(|c| c.as_bool())
            .unwrap_or(false);
        Ok(active && manager)
    }

    async fn list_swarm_services(&self) -> DiscoveryResult<Vec<SwarmService>> {
        let output = self.run(&["service", "ls", "--format", "{{json .}}"]).await?;
        Ok(parse_json_lines(&output))
    }

    async fn events(&self) -> DiscoveryResult<mpsc::Receiver<ContainerEvent>> {
        let mut child = Command::new(&self.binary)
            .args(["events", "--format", "{{json .}}", "--filter", "type=container"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| DiscoveryError::unavailable("docker", e))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| DiscoveryError::unavailable("docker", "event stream has no stdout"))?;

        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(async move {
            let _child = child;
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let Some(event) = parse_event(&line) else {
                            continue;
                        };
                        if tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!(error = %e, "Container event stream failed");
                        break;
                    }
                }
            }
            debug!("Container event stream closed");
        });

        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inspect_json_decodes() {
        let json = r#"[{
            "Id": "abc123",
            "Name": "/web",
            "Created": "2024-01-01T00:00:00Z",
            "Config": {
                "Image": "nginx:1.25",
                "Labels": {"com.docker.compose.service": "web"},
                "Env": ["PORT=80"],
                "ExposedPorts": {"80/tcp": {}},
                "Cmd": ["nginx", "-g", "daemon off;"],
                "Entrypoint": null
            },
            "State": {"Status": "running", "Running": true, "Pid": 4321,
                      "Health": {"Status": "healthy"}},
            "NetworkSettings": {
                "Ports": {"80/tcp": [{"HostIp": "0.0.0.0", "HostPort": "8080"}], "443/tcp": null},
                "Networks": {"bridge": {"IPAddress": "172.17.0.2"}}
            }
        }]"#;
        let mut details: Vec<ContainerDetails> = serde_json::from_str(json).unwrap();
        let details = details.pop().unwrap();
        assert_eq!(details.display_name(), "web");
        assert_eq!(details.label("com.docker.compose.service"), Some("web"));
        assert_eq!(details.state.pid, 4321);
        assert_eq!(details.command_line(), "nginx -g daemon off;");
        let ports = details.network_settings.ports.unwrap();
        assert_eq!(ports["80/tcp"].as_ref().unwrap()[0].host_port, "8080");
        assert!(ports["443/tcp"].is_none());
        assert_eq!(details.network_settings.networks.unwrap()["bridge"].ip_address, "172.17.0.2");
    }

    #[test]
    fn test_parse_event() {
        let event = parse_event(
            r#"{"status":"start","id":"abc","Type":"container","Action":"start",
                "Actor":{"ID":"abc","Attributes":{"name":"web","image":"nginx"}}}"#,
        )
        .unwrap();
        assert_eq!(event.action, "start");
        assert_eq!(event.id, "abc");
        assert_eq!(event.name.as_deref(), Some("web"));

        let exec = parse_event(r#"{"Action":"exec_start: sh -c ls","Actor":{"ID":"abc"}}"#).unwrap();
        assert_eq!(exec.action, "exec_start");
    }

    #[test]
    fn test_swarm_replica_counts() {
        let service = SwarmService {
            replicas: "2/3 (max 1 per node)".into(),
            ..Default::default()
        };
        assert_eq!(service.replica_counts(), Some((2, 3)));
    }

    #[test]
    fn test_parse_json_lines_skips_garbage() {
        let services: Vec<SwarmService> =
            parse_json_lines("{\"ID\":\"x\",\"Name\":\"api\"}\nnot json\n");
        assert_eq!(services.len(), 1);
        assert_eq!(services[0].name, "api");
    }
}
