//! Deciding which containers are services, and normalising them.

use std::collections::BTreeSet;

use beacon_types::{DedupKey, Endpoint, EndpointScope, HealthStatus, RawService, ServiceSource};
use serde_json::json;

use super::runtime::{ContainerDetails, SwarmService};

/// Label that forces (`true`) or suppresses (`false`) service detection.
pub const SERVICE_LABEL: &str = "beacon.service";
/// Label overriding the service name.
pub const SERVICE_NAME_LABEL: &str = "beacon.service.name";

const COMPOSE_SERVICE_LABEL: &str = "com.docker.compose.service";
const COMPOSE_PROJECT_LABEL: &str = "com.docker.compose.project";
const COMPOSE_WORKDIR_LABEL: &str = "com.docker.compose.project.working_dir";
const KUBERNETES_LABEL: &str = "io.kubernetes.container.name";

/// Type given to container-backed services, shared with compose definitions
/// so a running container and its declaration unify.
pub const CONTAINER_SERVICE_TYPE: &str = "docker-service";
pub const SWARM_SERVICE_TYPE: &str = "swarm-service";

const SERVICE_IMAGES: &[&str] = &[
    "nginx", "httpd", "traefik", "haproxy", "caddy", "envoy", "redis", "memcached", "postgres",
    "mysql", "mariadb", "mongo", "elasticsearch", "opensearch", "rabbitmq", "kafka", "zookeeper",
    "nats", "consul", "vault", "minio", "grafana", "prometheus", "keycloak", "node", "python",
    "openjdk", "tomcat", "jetty",
];

const SERVICE_COMMANDS: &[&str] = &[
    "server", "serve", "start", "uvicorn", "gunicorn", "daemon", "nginx", "httpd", "java -jar",
    "node ", "npm start", "flask run", "rails s",
];

const SERVICE_ENV_KEYS: &[&str] = &["PORT", "SERVICE_NAME", "HTTP_PORT", "LISTEN_ADDR", "SERVER_PORT"];

/// Container ports that speak HTTP by convention.
const HTTP_PORTS: &[u16] = &[80, 3000, 4000, 5000, 8000, 8008, 8080, 8081, 8888, 9000, 9090];
const HTTPS_PORTS: &[u16] = &[443, 8443];

/// Heuristic "is this a service container?" predicate.
pub fn is_service_container(details: &ContainerDetails) -> bool {
    match details.label(SERVICE_LABEL) {
        Some("false") => return false,
        Some("true") => return true,
        _ => {}
    }

    if details.label(SERVICE_NAME_LABEL).is_some()
        || details.label(COMPOSE_SERVICE_LABEL).is_some()
        || details.label(KUBERNETES_LABEL).is_some()
    {
        return true;
    }

    let has_exposed = details
        .config
        .exposed_ports
        .as_ref()
        .map_or(false, |p| !p.is_empty());
    let has_published = details
        .network_settings
        .ports
        .as_ref()
        .map_or(false, |p| p.values().any(|b| b.as_ref().map_or(false, |b| !b.is_empty())));
    if has_exposed || has_published || details.config.healthcheck.is_some() {
        return true;
    }

    let image = image_base_name(&details.config.image);
    if SERVICE_IMAGES.iter().any(|known| image == *known) {
        return true;
    }

    let command = details.command_line().to_ascii_lowercase();
    if SERVICE_COMMANDS.iter().any(|c| command.contains(c)) {
        return true;
    }

    details.config.env.iter().flatten().any(|entry| {
        entry
            .split_once('=')
            .map_or(false, |(k, _)| SERVICE_ENV_KEYS.contains(&k))
    })
}

/// `registry:5000/team/api:1.2` -> `api`
pub fn image_base_name(image: &str) -> &str {
    let without_digest = image.split('@').next().unwrap_or(image);
    let last = without_digest.rsplit('/').next().unwrap_or(without_digest);
    last.split(':').next().unwrap_or(last)
}

/// Tag portion of an image reference, when present and not `latest`.
pub fn image_tag(image: &str) -> Option<&str> {
    let without_digest = image.split('@').next().unwrap_or(image);
    let last = without_digest.rsplit('/').next().unwrap_or(without_digest);
    last.split_once(':')
        .map(|(_, tag)| tag)
        .filter(|t| !t.is_empty() && *t != "latest")
}

/// Protocol for a container port spec such as `80/tcp`.
pub fn protocol_for(port: u16, transport: &str) -> &'static str {
    if transport.eq_ignore_ascii_case("udp") {
        "udp"
    } else if HTTPS_PORTS.contains(&port) {
        "https"
    } else if HTTP_PORTS.contains(&port) {
        "http"
    } else {
        "tcp"
    }
}

fn split_port_spec(spec: &str) -> Option<(u16, &str)> {
    let (port, transport) = spec.split_once('/').unwrap_or((spec, "tcp"));
    Some((port.parse().ok()?, transport))
}

fn published_host(host_ip: &str) -> &str {
    match host_ip {
        "" | "0.0.0.0" | "::" | "[::]" => "localhost",
        other => other,
    }
}

/// Published host ports (external) plus container-network addresses
/// (internal), deduplicated.
pub fn container_endpoints(details: &ContainerDetails) -> Vec<Endpoint> {
    let mut endpoints = Vec::new();
    let mut seen: BTreeSet<(String, u16)> = BTreeSet::new();
    let mut container_ports: BTreeSet<(u16, String)> = BTreeSet::new();

    if let Some(exposed) = &details.config.exposed_ports {
        for spec in exposed.keys() {
            if let Some((port, transport)) = split_port_spec(spec) {
                container_ports.insert((port, transport.to_string()));
            }
        }
    }

    if let Some(ports) = &details.network_settings.ports {
        for (spec, bindings) in ports {
            let Some((container_port, transport)) = split_port_spec(spec) else {
                continue;
            };
            container_ports.insert((container_port, transport.to_string()));
            for binding in bindings.iter().flatten() {
                let Ok(host_port) = binding.host_port.parse::<u16>() else {
                    continue;
                };
                let host = published_host(&binding.host_ip);
                if !seen.insert((host.to_string(), host_port)) {
                    continue;
                }
                endpoints.push(
                    Endpoint::new(protocol_for(container_port, transport), host, Some(host_port))
                        .with_container_port(container_port)
                        .with_scope(EndpointScope::External),
                );
            }
        }
    }

    if let Some(networks) = &details.network_settings.networks {
        for (network, endpoint) in networks {
            if endpoint.ip_address.is_empty() {
                continue;
            }
            for (port, transport) in &container_ports {
                if !seen.insert((endpoint.ip_address.clone(), *port)) {
                    continue;
                }
                endpoints.push(
                    Endpoint::new(protocol_for(*port, transport), endpoint.ip_address.clone(), Some(*port))
                        .with_kind(format!("internal-{}", network))
                        .with_container_port(*port)
                        .with_scope(EndpointScope::Internal),
                );
            }
        }
    }

    endpoints
}

fn container_status(details: &ContainerDetails) -> String {
    match details.state.status.as_str() {
        "exited" | "dead" => "stopped".to_string(),
        "" if details.state.running => "running".to_string(),
        "" => "unknown".to_string(),
        other => other.to_string(),
    }
}

fn container_health(details: &ContainerDetails) -> Option<HealthStatus> {
    let health = details.state.health.as_ref()?;
    health.status.parse().ok()
}

/// Service name for a container: explicit label, compose service, then
/// container name.
pub fn container_service_name(details: &ContainerDetails) -> String {
    details
        .label(SERVICE_NAME_LABEL)
        .or_else(|| details.label(COMPOSE_SERVICE_LABEL))
        .map(str::to_string)
        .unwrap_or_else(|| details.display_name().to_string())
}

/// Normalise an inspected container into an observation.
pub fn container_to_service(details: &ContainerDetails) -> RawService {
    let name = container_service_name(details);
    let mut service = RawService::new(name, CONTAINER_SERVICE_TYPE, ServiceSource::Docker)
        .with_status(container_status(details))
        .with_tag("docker");

    if let Some(workdir) = details.label(COMPOSE_WORKDIR_LABEL) {
        service.location = Some(workdir.to_string());
    }
    service.health_status = container_health(details);
    service.endpoints = container_endpoints(details);
    service.version = image_tag(&details.config.image).map(str::to_string);

    let image_name = image_base_name(&details.config.image);
    if !image_name.is_empty() {
        service.tags.insert(image_name.to_string());
    }

    let meta = &mut service.metadata;
    meta.insert("container_id".into(), json!(details.id));
    meta.insert("container_name".into(), json!(details.display_name()));
    meta.insert("image".into(), json!(details.config.image));
    meta.insert("state".into(), json!(details.state.status));
    if !details.created.is_empty() {
        meta.insert("created".into(), json!(details.created));
    }
    let labels = details.labels();
    if !labels.is_empty() {
        meta.insert("labels".into(), json!(labels));
    }
    if details.state.running && details.state.pid > 0 {
        meta.insert("pid".into(), json!(details.state.pid));
    }
    if let Some(health) = &details.state.health {
        meta.insert("docker_health".into(), json!(health.status));
    }
    if let Some(networks) = &details.network_settings.networks {
        meta.insert("networks".into(), json!(networks.keys().collect::<Vec<_>>()));
    }
    if let Some(project) = details.label(COMPOSE_PROJECT_LABEL) {
        meta.insert("compose_project".into(), json!(project));
        service.tags.insert(format!("compose:{}", project));
    }
    if let Some(url) = details.label("beacon.health.endpoint") {
        service.metadata.insert("health_endpoint".into(), json!(url));
    }

    service
}

/// `"*:8080->80/tcp, *:8443->443/tcp"` -> `[(8080, 80, "tcp"), (8443, 443, "tcp")]`
pub fn parse_published_ports(ports: &str) -> Vec<(u16, u16, String)> {
    ports
        .split(',')
        .filter_map(|mapping| {
            let (published, target) = mapping.trim().split_once("->")?;
            let host_port = published.rsplit(':').next()?.parse().ok()?;
            let (target_port, transport) = split_port_spec(target.trim())?;
            Some((host_port, target_port, transport.to_string()))
        })
        .collect()
}

/// Normalise a swarm service listing.
pub fn swarm_to_service(swarm: &SwarmService) -> RawService {
    let counts = swarm.replica_counts();
    let (status, health) = match counts {
        Some((running, desired)) if desired > 0 && running >= desired => ("running", HealthStatus::Healthy),
        Some((0, _)) => ("stopped", HealthStatus::Unhealthy),
        Some((_, 0)) | None => ("unknown", HealthStatus::Unknown),
        Some(_) => ("running", HealthStatus::Unknown),
    };

    let mut service = RawService::new(swarm.name.clone(), SWARM_SERVICE_TYPE, ServiceSource::Swarm)
        .with_status(status)
        .with_tag("swarm");
    service.health_status = Some(health);
    service.version = image_tag(&swarm.image).map(str::to_string);

    for (host_port, target_port, transport) in parse_published_ports(&swarm.ports) {
        service.endpoints.push(
            Endpoint::new(protocol_for(target_port, &transport), "localhost", Some(host_port))
                .with_container_port(target_port),
        );
    }

    service.metadata.insert("swarm_service_id".into(), json!(swarm.id));
    service.metadata.insert("mode".into(), json!(swarm.mode));
    service.metadata.insert("replicas".into(), json!(swarm.replicas));
    service.metadata.insert("image".into(), json!(swarm.image));
    service
}

/// Stable dependency id for a compose service declared next to `location`.
pub fn compose_dependency_id(name: &str, location: &str) -> String {
    DedupKey::new(name, CONTAINER_SERVICE_TYPE, Some(location)).stable_id()
}
