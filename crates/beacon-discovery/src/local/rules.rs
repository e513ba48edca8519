//! Service-type detection rules and scoring.

use std::path::Path;

/// Score contributed by each matching marker file.
const MARKER_WEIGHT: u32 = 10;

/// Score contributed by each content indicator found in a source file.
const INDICATOR_WEIGHT: u32 = 2;

/// How one service type is recognised in a directory.
#[derive(Debug, Clone, Copy)]
pub struct TypeRule {
    pub service_type: &'static str,
    /// Exact file names.
    pub marker_files: &'static [&'static str],
    /// File name suffixes, e.g. `.service`.
    pub marker_suffixes: &'static [&'static str],
    /// Extensions of files searched for `content_indicators`.
    pub source_extensions: &'static [&'static str],
    pub content_indicators: &'static [&'static str],
}

/// Detection table. Order breaks score ties: earlier entries win.
pub const RULES: &[TypeRule] = &[
    TypeRule {
        service_type: "node",
        marker_files: &["package.json"],
        marker_suffixes: &[],
        source_extensions: &["js", "mjs", "cjs", "ts"],
        content_indicators: &["require(", "express()", "app.listen(", "http.createServer"],
    },
    TypeRule {
        service_type: "python",
        marker_files: &["pyproject.toml", "requirements.txt", "setup.py", "Pipfile"],
        marker_suffixes: &[],
        source_extensions: &["py"],
        content_indicators: &["Flask(__name__)", "FastAPI(", "uvicorn.run", "django"],
    },
    TypeRule {
        service_type: "docker",
        marker_files: &["Dockerfile"],
        marker_suffixes: &[".dockerfile"],
        source_extensions: &[],
        content_indicators: &[],
    },
    TypeRule {
        service_type: "systemd",
        marker_files: &[],
        marker_suffixes: &[".service"],
        source_extensions: &[],
        content_indicators: &[],
    },
    TypeRule {
        service_type: "mcp",
        marker_files: &["mcp.json"],
        marker_suffixes: &[],
        source_extensions: &["js", "ts", "py"],
        content_indicators: &["@modelcontextprotocol", "FastMCP", "mcp.server"],
    },
    TypeRule {
        service_type: "go",
        marker_files: &["go.mod"],
        marker_suffixes: &[],
        source_extensions: &["go"],
        content_indicators: &["net/http", "ListenAndServe"],
    },
    TypeRule {
        service_type: "rust",
        marker_files: &["Cargo.toml"],
        marker_suffixes: &[],
        source_extensions: &["rs"],
        content_indicators: &["#[tokio::main]", "TcpListener::bind", "HttpServer::new"],
    },
    TypeRule {
        service_type: "java",
        marker_files: &["pom.xml", "build.gradle", "build.gradle.kts"],
        marker_suffixes: &[],
        source_extensions: &["java", "kt"],
        content_indicators: &["@SpringBootApplication", "@RestController"],
    },
];

/// A scored candidate type for one directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Detection {
    pub service_type: &'static str,
    pub score: u32,
    /// Marker files that matched, in directory listing order.
    pub markers: Vec<String>,
}

/// Score every rule against a directory listing.
///
/// `read_source` returns the text of a source file, or `None` when it should
/// be skipped (too large, unreadable, not UTF-8).
pub fn score_directory<F>(file_names: &[String], dir: &Path, mut read_source: F) -> Option<Detection>
where
    F: FnMut(&Path) -> Option<String>,
{
    let mut best: Option<Detection> = None;

    for rule in RULES {
        let markers: Vec<String> = file_names
            .iter()
            .filter(|name| {
                rule.marker_files.contains(&name.as_str())
                    || rule.marker_suffixes.iter().any(|s| name.ends_with(s))
            })
            .cloned()
            .collect();

        // Indicators alone never qualify a directory.
        if markers.is_empty() {
            continue;
        }

        let mut score = markers.len() as u32 * MARKER_WEIGHT;

        if !rule.content_indicators.is_empty() {
            let mut found = vec![false; rule.content_indicators.len()];
            for name in file_names.iter().filter(|n| has_extension(n, rule.source_extensions)) {
                let Some(text) = read_source(&dir.join(name)) else {
                    continue;
                };
                for (i, indicator) in rule.content_indicators.iter().enumerate() {
                    if !found[i] && text.contains(indicator) {
                        found[i] = true;
                    }
                }
            }
            score += found.iter().filter(|f| **f).count() as u32 * INDICATOR_WEIGHT;
        }

        if best.as_ref().map_or(true, |b| score > b.score) {
            best = Some(Detection {
                service_type: rule.service_type,
                score,
                markers,
            });
        }
    }

    best
}

pub fn has_extension(name: &str, extensions: &[&str]) -> bool {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map_or(false, |ext| extensions.contains(&ext))
}
