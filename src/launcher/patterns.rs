//! Text heuristics over dev-server output: readiness detection, severity
//! classification and diagnostic hints.

use std::borrow::Cow;
use std::sync::LazyLock;

use regex::Regex;

use crate::log::Severity;

/// Tried in order against each output line; the first match wins.
static READINESS_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"Local:\s+https?://(?:localhost|127\.0\.0\.1):(\d+)",
        r"localhost:(\d+)",
        r"Local.*?:(\d+)",
        r"(?i)ready in.*localhost:(\d+)",
        r"(?i)dev server running at.*localhost:(\d+)",
        r"(?i)ready on.*localhost:(\d+)",
        r"(?i)started server on.*:(\d+)",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("readiness pattern compiles"))
    .collect()
});

static ANSI_ESCAPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\x1b\[[0-9;?]*[ -/]*[@-~]|\x1b\][^\x07]*\x07").expect("ansi pattern compiles")
});

pub fn strip_ansi(line: &str) -> Cow<'_, str> {
    ANSI_ESCAPE.replace_all(line, "")
}

/// Port announced by a readiness line, if any.
pub fn detect_port(line: &str) -> Option<u16> {
    READINESS_PATTERNS.iter().find_map(|pattern| {
        pattern
            .captures(line)
            .and_then(|caps| caps.get(1))
            .and_then(|port| port.as_str().parse().ok())
    })
}

pub fn loopback_url(port: u16) -> String {
    format!("http://localhost:{port}")
}

pub fn classify(line: &str) -> Severity {
    let lower = line.to_lowercase();
    if lower.contains("error") || lower.contains("failed") {
        Severity::Error
    } else if lower.contains("warn") {
        Severity::Warn
    } else {
        Severity::Info
    }
}

/// Extra guidance for well-known toolchain trouble in `line`.
pub fn hints_for(line: &str) -> Vec<(&'static str, Severity)> {
    let lower = line.to_lowercase();
    let mut hints = Vec::new();
    if line.contains("[Contextify]") || line.contains("SWC_DISABLE_MMAP") {
        hints.push((
            "SWC compilation warning detected; using fallback configuration",
            Severity::Warn,
        ));
    }
    if line.contains("WebAssembly") || lower.contains("wasm") {
        hints.push((
            "WebAssembly issue detected; some build tools may be affected",
            Severity::Warn,
        ));
    }
    if line.contains("ENOSPC") || lower.contains("no space left") {
        hints.push(("Sandbox is out of disk space; try clearing caches", Severity::Error));
    }
    if lower.contains("cors") || lower.contains("cross-origin") {
        hints.push((
            "CORS configuration active; external images are proxied",
            Severity::Info,
        ));
    }
    if line.contains("/_next/image") {
        hints.push(("Next.js image optimization fallback active", Severity::Info));
    }
    hints
}

/// Reassembles lines from arbitrarily split output chunks.
#[derive(Debug, Default)]
pub struct LineSplitter {
    partial: String,
}

impl LineSplitter {
    pub fn push(&mut self, chunk: &str) -> Vec<String> {
        self.partial.push_str(chunk);
        let mut lines = Vec::new();
        while let Some(idx) = self.partial.find(['\n', '\r']) {
            let line: String = self.partial.drain(..=idx).collect();
            let line = line.trim_end_matches(['\n', '\r']);
            if !line.is_empty() {
                lines.push(line.to_string());
            }
        }
        lines
    }

    /// Whatever is left once the stream has ended.
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.partial);
        (!rest.trim().is_empty()).then_some(rest)
    }
}
