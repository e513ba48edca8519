//! Per-type field tables.

/// Required and recommended fields for one service type.
#[derive(Debug, Clone, Copy)]
pub struct TypeFields {
    pub service_types: &'static [&'static str],
    pub required: &'static [&'static str],
    pub recommended: &'static [&'static str],
}

pub const TYPE_FIELDS: &[TypeFields] = &[
    TypeFields {
        service_types: &["node"],
        required: &["name"],
        recommended: &["version", "description", "main"],
    },
    TypeFields {
        service_types: &["python"],
        required: &["name"],
        recommended: &["version", "description"],
    },
    TypeFields {
        service_types: &["docker", "docker-service", "swarm-service"],
        required: &["name"],
        recommended: &["image"],
    },
    TypeFields {
        service_types: &["mcp"],
        required: &["name"],
        recommended: &["description", "tools"],
    },
    TypeFields {
        service_types: WEB_TYPES,
        required: &["name"],
        recommended: &["version", "description"],
    },
];

/// Types that are always treated as web services.
pub const WEB_TYPES: &[&str] = &["web", "express", "flask", "fastapi", "django", "spring-boot"];

/// Types subject to the Docker port/Dockerfile rule.
pub const DOCKER_TYPES: &[&str] = &["docker", "docker-service"];

pub fn fields_for(service_type: &str) -> Option<&'static TypeFields> {
    TYPE_FIELDS
        .iter()
        .find(|t| t.service_types.contains(&service_type))
}
