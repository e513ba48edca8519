//! Network endpoints exposed by a service

use serde::{Deserialize, Serialize};

/// Reachability scope of an endpoint
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointScope {
    /// Reachable only from the container network / cluster
    Internal,
    /// Reachable from the host or outside
    #[default]
    External,
}

/// A single address at which a service can be reached
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    /// Wire protocol (http, https, tcp, udp)
    pub protocol: String,

    /// Host name or IP address
    pub host: String,

    /// Port, when known
    #[serde(default)]
    pub port: Option<u16>,

    /// Fully-formed URL, when meaningful for the protocol
    #[serde(default)]
    pub url: Option<String>,

    /// Logical label, e.g. "http" or "internal-redis"
    #[serde(rename = "type", default)]
    pub kind: String,

    /// Port inside the container, for published container ports
    #[serde(default)]
    pub container_port: Option<u16>,

    #[serde(default)]
    pub scope: EndpointScope,
}

impl Endpoint {
    /// Plain HTTP endpoint with a derived URL
    pub fn http(host: impl Into<String>, port: u16) -> Self {
        let host = host.into();
        Self {
            url: Some(format!("http://{}:{}", host, port)),
            protocol: "http".to_string(),
            host,
            port: Some(port),
            kind: "http".to_string(),
            container_port: None,
            scope: EndpointScope::External,
        }
    }

    /// Generic endpoint; a URL is derived for http(s) protocols only
    pub fn new(protocol: impl Into<String>, host: impl Into<String>, port: Option<u16>) -> Self {
        let protocol = protocol.into();
        let host = host.into();
        let url = match (protocol.as_str(), port) {
            ("http" | "https", Some(p)) => Some(format!("{}://{}:{}", protocol, host, p)),
            ("http" | "https", None) => Some(format!("{}://{}", protocol, host)),
            _ => None,
        };
        Self {
            kind: protocol.clone(),
            protocol,
            host,
            port,
            url,
            container_port: None,
            scope: EndpointScope::External,
        }
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = kind.into();
        self
    }

    pub fn with_scope(mut self, scope: EndpointScope) -> Self {
        self.scope = scope;
        self
    }

    pub fn with_container_port(mut self, port: u16) -> Self {
        self.container_port = Some(port);
        self
    }

    /// Whether the endpoint binds every interface
    pub fn binds_all_interfaces(&self) -> bool {
        matches!(self.host.as_str(), "0.0.0.0" | "::" | "[::]" | "*")
    }
}
