//! `$include` resolution for project documents and `#include` expansion for
//! shader text, with `#line` source-map annotations.

use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::pin::Pin;

use serde_json::{Map, Value};

use super::schema::{is_include, INCLUDE_KEY};
use super::LoadError;
use crate::resolver::{resolve_url, TextResolver};
use crate::source_map::SOURCE_COMMENT;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, LoadError>> + 'a>>;

/// Shader text after `#include` expansion, plus the source ids it touches.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpandedSource {
    pub text: String,
    pub sources: BTreeSet<u32>,
}

/// Mutable state for one `load_project` call. Never shared between loads.
#[derive(Debug, Default)]
pub struct ResolutionContext {
    cache: HashMap<String, ExpandedSource>,
    source_ids: HashMap<String, u32>,
    urls: Vec<String>,
    include_stack: Vec<String>,
    document_stack: Vec<String>,
    fetches: usize,
}

impl ResolutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stable small id per distinct URL, in first-seen order.
    pub fn source_id(&mut self, url: &str) -> u32 {
        if let Some(id) = self.source_ids.get(url) {
            return *id;
        }
        let id = self.urls.len() as u32;
        self.urls.push(url.to_string());
        self.source_ids.insert(url.to_string(), id);
        id
    }

    pub fn url(&self, id: u32) -> Option<&str> {
        self.urls.get(id as usize).map(String::as_str)
    }

    /// Number of resolver calls made so far.
    pub fn fetches(&self) -> usize {
        self.fetches
    }

    async fn fetch<R: TextResolver + ?Sized>(&mut self, resolver: &R, url: &str) -> Result<String, LoadError> {
        self.fetches += 1;
        Ok(resolver.resolve_text(url).await?)
    }
}

/// `#include "path"` on a line of its own.
pub fn parse_include_directive(line: &str) -> Option<&str> {
    let rest = line.trim_start_matches([' ', '\t']).strip_prefix("#include")?;
    if !rest.starts_with(|c: char| c.is_whitespace()) {
        return None;
    }
    let rest = rest.trim_start().strip_prefix('"')?;
    let end = rest.find('"')?;
    let path = &rest[..end];
    if path.is_empty() || !rest[end + 1..].trim().is_empty() {
        return None;
    }
    Some(path)
}

/// Expands `#include` lines in `source`, which was fetched from `url`.
///
/// Each directive line is replaced by `#line 1 <incId>`, the included text,
/// and `#line <n> <curId>` where `n` is the line after the directive, so
/// every line keeps its original number.
pub fn expand_shader<'a, R: TextResolver + ?Sized>(
    ctx: &'a mut ResolutionContext,
    source: String,
    url: String,
    resolver: &'a R,
) -> BoxFuture<'a, ExpandedSource> {
    Box::pin(async move {
        let current = ctx.source_id(&url);
        let mut sources = BTreeSet::from([current]);
        let mut out: Vec<String> = Vec::new();
        for (idx, line) in source.split('\n').enumerate() {
            let Some(path) = parse_include_directive(line) else {
                out.push(line.to_string());
                continue;
            };
            let include_url = resolve_url(&url, path);
            if ctx.include_stack.contains(&include_url) {
                return Err(LoadError::IncludeCycle { url: include_url });
            }
            let included = include_shader(ctx, include_url.clone(), resolver).await?;
            let include_id = ctx.source_id(&include_url);
            sources.extend(included.sources.iter().copied());
            out.push(format!("#line 1 {}", include_id));
            out.push(included.text);
            out.push(format!("#line {} {}", idx + 2, current));
        }
        Ok(ExpandedSource {
            text: out.join("\n"),
            sources,
        })
    })
}

/// Fetches and expands the shader at `url`, reusing the per-load cache.
fn include_shader<'a, R: TextResolver + ?Sized>(
    ctx: &'a mut ResolutionContext,
    url: String,
    resolver: &'a R,
) -> BoxFuture<'a, ExpandedSource> {
    Box::pin(async move {
        if let Some(cached) = ctx.cache.get(&url) {
            return Ok(cached.clone());
        }
        ctx.source_id(&url);
        let text = ctx.fetch(resolver, &url).await?;
        ctx.include_stack.push(url.clone());
        let expanded = expand_shader(ctx, text, url.clone(), resolver).await;
        ctx.include_stack.pop();
        let expanded = expanded?;
        ctx.cache.insert(url, expanded.clone());
        Ok(expanded)
    })
}

/// Prepends the `// @source <id> <url>` table and the initial `#line`
/// marker. A leading `#version` line stays first.
pub fn with_source_header(ctx: &ResolutionContext, expanded: &ExpandedSource, root_url: &str) -> String {
    let root_id = ctx.source_ids.get(root_url).copied().unwrap_or(0);
    let mut header = String::new();
    for id in &expanded.sources {
        if let Some(url) = ctx.url(*id) {
            header.push_str(&format!("{}{} {}\n", SOURCE_COMMENT, id, url));
        }
    }
    let text = &expanded.text;
    match text.split_once('\n') {
        Some((first, rest)) if first.trim_start().starts_with("#version") => {
            format!("{}\n{}#line 2 {}\n{}", first, header, root_id, rest)
        }
        None if text.trim_start().starts_with("#version") => {
            format!("{}\n{}#line 2 {}\n", text, header, root_id)
        }
        _ => format!("{}#line 1 {}\n{}", header, root_id, text),
    }
}

/// Loads a shader file referenced by `$include`, fully expanded and with
/// its source header.
pub async fn load_shader<R: TextResolver + ?Sized>(
    ctx: &mut ResolutionContext,
    url: String,
    resolver: &R,
) -> Result<String, LoadError> {
    let expanded = include_shader(ctx, url.clone(), resolver).await?;
    Ok(with_source_header(ctx, &expanded, &url))
}

fn is_json_url(url: &str) -> bool {
    url.to_ascii_lowercase().ends_with(".json")
}

/// Replaces every `{"$include": path}` in `value`. JSON targets are parsed
/// and resolved relative to themselves; anything else is shader text.
pub fn resolve_value<'a, R: TextResolver + ?Sized>(
    ctx: &'a mut ResolutionContext,
    value: Value,
    base_url: &'a str,
    resolver: &'a R,
) -> BoxFuture<'a, Value> {
    Box::pin(async move {
        match value {
            v if is_include(&v) => {
                let path = v.get(INCLUDE_KEY).and_then(Value::as_str).unwrap_or_default();
                let url = resolve_url(base_url, path);
                if !is_json_url(&url) {
                    return Ok(Value::String(load_shader(ctx, url, resolver).await?));
                }
                if ctx.document_stack.contains(&url) {
                    return Err(LoadError::IncludeCycle { url });
                }
                let text = ctx.fetch(resolver, &url).await?;
                let parsed: Value = serde_json::from_str(&text).map_err(|e| LoadError::Parse {
                    url: url.clone(),
                    message: e.to_string(),
                })?;
                ctx.document_stack.push(url.clone());
                let resolved = resolve_value(ctx, parsed, &url, resolver).await;
                ctx.document_stack.pop();
                resolved
            }
            Value::Array(items) => {
                let mut resolved = Vec::with_capacity(items.len());
                for item in items {
                    resolved.push(resolve_value(ctx, item, base_url, resolver).await?);
                }
                Ok(Value::Array(resolved))
            }
            Value::Object(entries) => {
                let mut resolved = Map::with_capacity(entries.len());
                for (key, entry) in entries {
                    let entry = resolve_value(ctx, entry, base_url, resolver).await?;
                    resolved.insert(key, entry);
                }
                Ok(Value::Object(resolved))
            }
            other => Ok(other),
        }
    })
}

/// Resolves a whole project document fetched from `url`.
pub async fn resolve_document<R: TextResolver + ?Sized>(
    ctx: &mut ResolutionContext,
    document: Value,
    url: &str,
    resolver: &R,
) -> Result<Value, LoadError> {
    ctx.document_stack.push(url.to_string());
    let resolved = resolve_value(ctx, document, url, resolver).await;
    ctx.document_stack.pop();
    resolved
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::MemoryResolver;
    use crate::source_map::SourceMap;

    fn load(resolver: &MemoryResolver, url: &str) -> Result<String, LoadError> {
        let mut ctx = ResolutionContext::new();
        pollster::block_on(load_shader(&mut ctx, url.to_string(), resolver))
    }

    #[test]
    fn test_parse_include_directive() {
        assert_eq!(parse_include_directive("#include \"a.glsl\""), Some("a.glsl"));
        assert_eq!(parse_include_directive("  \t#include   \"lib/n.glsl\"  "), Some("lib/n.glsl"));
        assert_eq!(parse_include_directive("#include \"a.glsl\"\r"), Some("a.glsl"));
        assert_eq!(parse_include_directive("#include\"a.glsl\""), None);
        assert_eq!(parse_include_directive("#include <a.glsl>"), None);
        assert_eq!(parse_include_directive("#include \"\""), None);
        assert_eq!(parse_include_directive("// #include \"a.glsl\""), None);
        assert_eq!(parse_include_directive("#include \"a\" x"), None);
    }

    #[test]
    fn test_expansion_preserves_line_numbers() {
        let resolver = MemoryResolver::new()
            .with("/s/main.glsl", "line1\n#include \"common.glsl\"\nline3")
            .with("/s/common.glsl", "c1\nc2");
        let text = load(&resolver, "/s/main.glsl").unwrap();
        assert_eq!(
            text,
            "// @source 0 /s/main.glsl\n// @source 1 /s/common.glsl\n#line 1 0\n\
             line1\n#line 1 1\nc1\nc2\n#line 3 0\nline3"
        );
        let raw = text.lines().position(|l| l == "line3").unwrap() as u32 + 1;
        let loc = SourceMap::locate(&text, raw).unwrap();
        assert_eq!((loc.source_id, loc.line), (0, 3));
        let raw = text.lines().position(|l| l == "c2").unwrap() as u32 + 1;
        let loc = SourceMap::locate(&text, raw).unwrap();
        assert_eq!((loc.source_id, loc.line), (1, 2));
    }

    #[test]
    fn test_nested_include_errors_map_back_to_files() {
        let resolver = MemoryResolver::new()
            .with("/s/main.glsl", "m1\n#include \"a.glsl\"\nm3")
            .with("/s/a.glsl", "a1\n#include \"b.glsl\"\na3")
            .with("/s/b.glsl", "b1\nb2");
        let text = load(&resolver, "/s/main.glsl").unwrap();
        let map = SourceMap::from_source(&text);

        let report = |marker: &str| {
            let raw = text.lines().position(|l| l == marker).unwrap() as u32 + 1;
            let at = SourceMap::locate(&text, raw).unwrap();
            map.rewrite_log(&format!("ERROR: {}:{}: x", at.source_id, at.line))
        };
        assert_eq!(report("b2"), "ERROR: /s/b.glsl:2: x");
        assert_eq!(report("a1"), "ERROR: /s/a.glsl:1: x");
        assert_eq!(report("a3"), "ERROR: /s/a.glsl:3: x");
        assert_eq!(report("m1"), "ERROR: /s/main.glsl:1: x");
        assert_eq!(report("m3"), "ERROR: /s/main.glsl:3: x");
    }

    #[test]
    fn test_version_line_stays_first() {
        let resolver = MemoryResolver::new().with("/a.glsl", "#version 450\nvoid main() {}");
        let text = load(&resolver, "/a.glsl").unwrap();
        assert_eq!(text, "#version 450\n// @source 0 /a.glsl\n#line 2 0\nvoid main() {}");
    }

    #[test]
    fn test_include_cycle_names_url() {
        let resolver = MemoryResolver::new()
            .with("/a.glsl", "#include \"b.glsl\"")
            .with("/b.glsl", "#include \"a.glsl\"");
        match load(&resolver, "/a.glsl") {
            Err(LoadError::IncludeCycle { url }) => assert_eq!(url, "/a.glsl"),
            other => panic!("expected cycle, got {:?}", other),
        }
    }

    #[test]
    fn test_shared_include_fetched_once() {
        let resolver = MemoryResolver::new()
            .with("/a.glsl", "#include \"lib.glsl\"\n#include \"b.glsl\"")
            .with("/b.glsl", "#include \"lib.glsl\"")
            .with("/lib.glsl", "float lib() { return 1.0; }");
        let mut ctx = ResolutionContext::new();
        let text = pollster::block_on(load_shader(&mut ctx, "/a.glsl".into(), &resolver)).unwrap();
        assert_eq!(ctx.fetches(), 3);
        assert_eq!(text.matches("float lib()").count(), 2);
    }

    #[test]
    fn test_json_include_and_cycle() {
        let resolver = MemoryResolver::new()
            .with("/p/parts/blur.json", r#"{ "name": "Blur", "frag": { "$include": "../shaders/blur.glsl" } }"#)
            .with("/p/shaders/blur.glsl", "void main() {}")
            .with("/p/loop.json", r#"{ "again": { "$include": "loop.json" } }"#);
        let doc = serde_json::json!({ "blur": { "$include": "parts/blur.json" } });
        let mut ctx = ResolutionContext::new();
        let resolved =
            pollster::block_on(resolve_document(&mut ctx, doc, "/p/project.json", &resolver)).unwrap();
        assert_eq!(resolved["blur"]["name"], "Blur");
        assert!(resolved["blur"]["frag"]
            .as_str()
            .unwrap()
            .starts_with("// @source 0 /p/shaders/blur.glsl\n#line 1 0\n"));

        let doc = serde_json::json!({ "x": { "$include": "loop.json" } });
        let mut ctx = ResolutionContext::new();
        let err = pollster::block_on(resolve_document(&mut ctx, doc, "/p/project.json", &resolver)).unwrap_err();
        assert_eq!(err, LoadError::IncludeCycle { url: "/p/loop.json".into() });
    }

    #[test]
    fn test_missing_include_is_fetch_error() {
        let resolver = MemoryResolver::new().with("/a.glsl", "#include \"nope.glsl\"");
        assert!(matches!(load(&resolver, "/a.glsl"), Err(LoadError::Fetch { url, .. }) if url == "/nope.glsl"));
    }
}
