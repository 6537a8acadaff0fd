//! Provenance for expanded shader text.
//!
//! Expanded shaders carry a header of `// @source <id> <url>` comments and
//! `#line <n> <id>` directives. Compiler diagnostics of the form
//! `ERROR: <id>:<line>: msg` are translated back to `ERROR: <url>:<line>: msg`.

use std::collections::BTreeMap;

pub const SOURCE_COMMENT: &str = "// @source ";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceMap {
    urls: BTreeMap<u32, String>,
}

/// Position in an original (pre-expansion) file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceLocation {
    pub source_id: u32,
    pub line: u32,
}

impl SourceMap {
    /// Reads the `// @source` table embedded in an expanded shader.
    pub fn from_source(source: &str) -> Self {
        let mut urls = BTreeMap::new();
        for line in source.lines() {
            let Some(rest) = line.trim_start().strip_prefix(SOURCE_COMMENT) else {
                continue;
            };
            if let Some((id, url)) = rest.trim().split_once(' ') {
                if let Ok(id) = id.parse::<u32>() {
                    urls.insert(id, url.trim().to_string());
                }
            }
        }
        Self { urls }
    }

    pub fn insert(&mut self, id: u32, url: impl Into<String>) {
        self.urls.insert(id, url.into());
    }

    pub fn url(&self, id: u32) -> Option<&str> {
        self.urls.get(&id).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }

    /// Rewrites every `ERROR|WARNING: <id>:<line>: msg` line whose id is
    /// known. Other lines pass through unchanged.
    pub fn rewrite_log(&self, log: &str) -> String {
        log.split('\n')
            .map(|line| match parse_diagnostic(line) {
                Some(diag) => match self.url(diag.source_id) {
                    Some(url) => format!("{}: {}:{}: {}", diag.severity, url, diag.line, diag.message),
                    None => line.to_string(),
                },
                None => line.to_string(),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Maps a 1-based line of the expanded text to its original position by
    /// replaying the `#line` directives above it.
    pub fn locate(source: &str, raw_line: u32) -> Option<SourceLocation> {
        let mut state: Option<SourceLocation> = None;
        for (idx, line) in source.split('\n').enumerate() {
            let current = idx as u32 + 1;
            if let Some((next_line, id)) = parse_line_directive(line) {
                let source_id = id.or(state.map(|s| s.source_id)).unwrap_or(0);
                state = Some(SourceLocation {
                    source_id,
                    line: next_line,
                });
                if current == raw_line {
                    return None;
                }
                continue;
            }
            if current == raw_line {
                return state;
            }
            if let Some(s) = state.as_mut() {
                s.line += 1;
            }
        }
        None
    }
}

/// A parsed compiler diagnostic line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic<'a> {
    pub severity: &'a str,
    pub source_id: u32,
    pub line: u32,
    pub message: &'a str,
}

/// Matches `^(ERROR|WARNING):\s*(\d+):(\d+):\s*(.*)$`.
pub fn parse_diagnostic(line: &str) -> Option<Diagnostic<'_>> {
    let (severity, rest) = line.split_once(':')?;
    if severity != "ERROR" && severity != "WARNING" {
        return None;
    }
    let rest = rest.trim_start();
    let (id, rest) = rest.split_once(':')?;
    let (line_no, rest) = rest.split_once(':')?;
    if id.is_empty() || line_no.is_empty() {
        return None;
    }
    if !id.bytes().all(|b| b.is_ascii_digit()) || !line_no.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some(Diagnostic {
        severity,
        source_id: id.parse().ok()?,
        line: line_no.parse().ok()?,
        message: rest.trim_start(),
    })
}

/// `#line <n> [<id>]` -> `(n, id)`.
pub fn parse_line_directive(line: &str) -> Option<(u32, Option<u32>)> {
    let rest = line.trim_start().strip_prefix("#line")?;
    if !rest.starts_with(|c: char| c.is_whitespace()) {
        return None;
    }
    let mut parts = rest.split_whitespace();
    let number = parts.next()?.parse().ok()?;
    let id = match parts.next() {
        Some(id) => Some(id.parse().ok()?),
        None => None,
    };
    Some((number, id))
}

/// Blanks `#line` directives while keeping the line count, for compilers
/// that do not accept them.
pub fn strip_line_directives(source: &str) -> String {
    source
        .split('\n')
        .map(|line| if parse_line_directive(line).is_some() { "" } else { line })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXPANDED: &str = "#version 300 es\n\
// @source 0 /proj/main.glsl\n\
// @source 1 /proj/a.glsl\n\
#line 2 0\n\
precision highp float;\n\
#line 1 1\n\
float a() { return 1.0; }\n\
#line 4 0\n\
void main() {}";

    #[test]
    fn test_reads_source_table() {
        let map = SourceMap::from_source(EXPANDED);
        assert_eq!(map.url(0), Some("/proj/main.glsl"));
        assert_eq!(map.url(1), Some("/proj/a.glsl"));
        assert_eq!(map.url(2), None);
    }

    #[test]
    fn test_rewrite_log_is_exact() {
        let map = SourceMap::from_source(EXPANDED);
        let log = "ERROR: 1:1: 'x' : undeclared identifier\nWARNING: 0:4: unused\nERROR: 7:3: unknown id\nnote";
        assert_eq!(
            map.rewrite_log(log),
            "ERROR: /proj/a.glsl:1: 'x' : undeclared identifier\n\
WARNING: /proj/main.glsl:4: unused\n\
ERROR: 7:3: unknown id\n\
note"
        );
    }

    #[test]
    fn test_locate_replays_directives() {
        // raw line 5 = "precision", line 2 of main
        assert_eq!(
            SourceMap::locate(EXPANDED, 5),
            Some(SourceLocation { source_id: 0, line: 2 })
        );
        assert_eq!(
            SourceMap::locate(EXPANDED, 7),
            Some(SourceLocation { source_id: 1, line: 1 })
        );
        assert_eq!(
            SourceMap::locate(EXPANDED, 9),
            Some(SourceLocation { source_id: 0, line: 4 })
        );
        assert_eq!(SourceMap::locate(EXPANDED, 1), None);
    }

    #[test]
    fn test_strip_keeps_line_count() {
        let stripped = strip_line_directives(EXPANDED);
        assert_eq!(stripped.split('\n').count(), EXPANDED.split('\n').count());
        assert!(!stripped.contains("#line"));
    }

    #[test]
    fn test_parse_diagnostic_rejects_other_lines() {
        assert!(parse_diagnostic("ERROR: foo").is_none());
        assert!(parse_diagnostic("INFO: 0:1: x").is_none());
        let d = parse_diagnostic("ERROR:0:12:  bad").unwrap();
        assert_eq!((d.source_id, d.line, d.message), (0, 12, "bad"));
    }
}
