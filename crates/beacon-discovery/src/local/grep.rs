//! Literal scanning of source files for listen ports, hosts and health paths.

use once_cell::sync::Lazy;
use regex::Regex;

/// Extensions of files grepped for hints.
pub const GREP_EXTENSIONS: &[&str] = &[
    "js", "mjs", "cjs", "ts", "py", "go", "rs", "java", "kt", "rb", "php", "yaml", "yml", "env",
];

static PORT_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"\.listen\(\s*(\d{2,5})\b",
        r"process\.env\.PORT\s*(?:\|\||\?\?)\s*(\d{2,5})\b",
        r#"(?:ListenAndServe|bind|Bind|Run)\(\s*"[^":]*:(\d{2,5})""#,
        r"--port[= ](\d{2,5})\b",
        r"(?i)\bport\s*[:=]\s*(\d{2,5})\b",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("valid regex"))
    .collect()
});

static HOST_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)\bhost\s*[:=]\s*['"]([A-Za-z0-9_.:\-]+)['"]"#).expect("valid regex")
});

static HEALTH_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"['"](/(?:health|healthz|healthcheck|status|ping|ready|readyz|live|livez)\b[\w/\-]*)['"]"#)
        .expect("valid regex")
});

/// Hints found in source text; the first match of each kind wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceHints {
    pub port: Option<u16>,
    pub host: Option<String>,
    pub health_path: Option<String>,
}

impl SourceHints {
    pub fn is_complete(&self) -> bool {
        self.port.is_some() && self.host.is_some() && self.health_path.is_some()
    }

    /// Fold one file's text into the hints found so far.
    pub fn scan(&mut self, text: &str) {
        if self.port.is_none() {
            self.port = PORT_PATTERNS.iter().find_map(|re| {
                re.captures(text)
                    .and_then(|c| c.get(1))
                    .and_then(|m| m.as_str().parse::<u16>().ok())
                    .filter(|p| *p > 0)
            });
        }
        if self.host.is_none() {
            self.host = HOST_PATTERN
                .captures(text)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().to_string());
        }
        if self.health_path.is_none() {
            self.health_path = HEALTH_PATTERN
                .captures(text)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_express_idioms() {
        let mut hints = SourceHints::default();
        hints.scan(
            "const app = express();\napp.get('/health', (req, res) => res.send('ok'));\napp.listen(3000);",
        );
        assert_eq!(hints.port, Some(3000));
        assert_eq!(hints.health_path.as_deref(), Some("/health"));
        assert!(hints.host.is_none());
    }

    #[test]
    fn test_python_idioms() {
        let mut hints = SourceHints::default();
        hints.scan("@app.route(\"/healthz\")\ndef h(): ...\napp.run(host=\"0.0.0.0\", port=5000)\n");
        assert_eq!(hints.port, Some(5000));
        assert_eq!(hints.host.as_deref(), Some("0.0.0.0"));
        assert_eq!(hints.health_path.as_deref(), Some("/healthz"));
    }

    #[test]
    fn test_go_listen_address() {
        let mut hints = SourceHints::default();
        hints.scan(r#"log.Fatal(http.ListenAndServe(":8081", mux))"#);
        assert_eq!(hints.port, Some(8081));
    }

    #[test]
    fn test_first_match_wins_across_files() {
        let mut hints = SourceHints::default();
        hints.scan("server.listen(4000)");
        hints.scan("app.listen(5000)");
        assert_eq!(hints.port, Some(4000));
    }
}
