//! URL resolution and the text/bytes fetch capabilities the loader is
//! generic over.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::io::Read;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq)]
pub struct ResolveError {
    pub url: String,
    pub message: String,
}

impl ResolveError {
    pub fn new(url: &str, message: impl Into<String>) -> Self {
        Self {
            url: url.to_string(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ResolveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Failed to fetch \"{}\": {}", self.url, self.message)
    }
}

impl std::error::Error for ResolveError {}

/// Fetches the text behind an absolute URL.
pub trait TextResolver {
    fn resolve_text(&self, url: &str) -> impl Future<Output = Result<String, ResolveError>>;
}

/// Fetches raw bytes (images, video frames) behind an absolute URL.
pub trait BytesResolver {
    fn resolve_bytes(&self, url: &str) -> impl Future<Output = Result<Vec<u8>, ResolveError>>;
}

// ---------------------------------------------------------------------------
// URL handling
// ---------------------------------------------------------------------------

fn split_origin(url: &str) -> (&str, &str) {
    if let Some(scheme_end) = url.find("://") {
        let after = scheme_end + 3;
        match url[after..].find('/') {
            Some(slash) => url.split_at(after + slash),
            None => (url, ""),
        }
    } else {
        ("", url)
    }
}

fn normalize_path(path: &str) -> String {
    let absolute = path.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if parts.last().is_some_and(|p| *p != "..") {
                    parts.pop();
                } else if !absolute {
                    parts.push("..");
                }
            }
            s => parts.push(s),
        }
    }
    let joined = parts.join("/");
    if absolute {
        format!("/{}", joined)
    } else {
        joined
    }
}

pub fn has_scheme(url: &str) -> bool {
    url.contains("://")
}

/// Resolves `path` against the document at `base`, the way a browser
/// resolves a relative link.
pub fn resolve_url(base: &str, path: &str) -> String {
    if has_scheme(path) {
        let (origin, rest) = split_origin(path);
        return format!("{}{}", origin, normalize_path(if rest.is_empty() { "/" } else { rest }));
    }
    let (origin, base_path) = split_origin(base);
    let joined = if path.starts_with('/') {
        path.to_string()
    } else {
        match base_path.rfind('/') {
            Some(idx) => format!("{}{}", &base_path[..=idx], path),
            None => path.to_string(),
        }
    };
    format!("{}{}", origin, normalize_path(&joined))
}

// ---------------------------------------------------------------------------
// MemoryResolver
// ---------------------------------------------------------------------------

/// In-memory file map. Stands in for a project store, and backs tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryResolver {
    files: HashMap<String, Vec<u8>>,
}

impl MemoryResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, url: &str, contents: impl Into<Vec<u8>>) -> Self {
        self.insert(url, contents);
        self
    }

    pub fn insert(&mut self, url: &str, contents: impl Into<Vec<u8>>) {
        self.files.insert(url.to_string(), contents.into());
    }

    pub fn remove(&mut self, url: &str) -> bool {
        self.files.remove(url).is_some()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl TextResolver for MemoryResolver {
    async fn resolve_text(&self, url: &str) -> Result<String, ResolveError> {
        let bytes = self.resolve_bytes(url).await?;
        String::from_utf8(bytes).map_err(|e| ResolveError::new(url, e.to_string()))
    }
}

impl BytesResolver for MemoryResolver {
    async fn resolve_bytes(&self, url: &str) -> Result<Vec<u8>, ResolveError> {
        self.files
            .get(url)
            .cloned()
            .ok_or_else(|| ResolveError::new(url, "not found"))
    }
}

// ---------------------------------------------------------------------------
// FsResolver
// ---------------------------------------------------------------------------

/// Local files. Absolute URLs (`/x/y.json`) are taken relative to `root`
/// when one is set; `file://` is accepted.
#[derive(Debug, Clone, Default)]
pub struct FsResolver {
    root: Option<PathBuf>,
}

impl FsResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }

    pub fn path_for(&self, url: &str) -> PathBuf {
        let path = url.strip_prefix("file://").unwrap_or(url);
        match &self.root {
            Some(root) => root.join(path.trim_start_matches('/')),
            None => PathBuf::from(path),
        }
    }

    /// The loader URL for a path on disk.
    pub fn url_for(path: &Path) -> String {
        let text = path.to_string_lossy().replace('\\', "/");
        if text.starts_with('/') {
            text
        } else {
            format!("/{}", text)
        }
    }
}

impl TextResolver for FsResolver {
    async fn resolve_text(&self, url: &str) -> Result<String, ResolveError> {
        let path = self.path_for(url);
        std::fs::read_to_string(&path)
            .map_err(|e| ResolveError::new(url, format!("{}: {}", path.display(), e)))
    }
}

impl BytesResolver for FsResolver {
    async fn resolve_bytes(&self, url: &str) -> Result<Vec<u8>, ResolveError> {
        let path = self.path_for(url);
        std::fs::read(&path).map_err(|e| ResolveError::new(url, format!("{}: {}", path.display(), e)))
    }
}

// ---------------------------------------------------------------------------
// HttpResolver
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct HttpResolver {
    user_agent: String,
}

impl Default for HttpResolver {
    fn default() -> Self {
        Self {
            user_agent: format!("shadergraph/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl HttpResolver {
    pub fn new() -> Self {
        Self::default()
    }

    fn get(&self, url: &str) -> Result<ureq::Response, ResolveError> {
        ureq::get(url)
            .set("User-Agent", &self.user_agent)
            .call()
            .map_err(|e| ResolveError::new(url, e.to_string()))
    }
}

impl TextResolver for HttpResolver {
    async fn resolve_text(&self, url: &str) -> Result<String, ResolveError> {
        self.get(url)?
            .into_string()
            .map_err(|e| ResolveError::new(url, e.to_string()))
    }
}

impl BytesResolver for HttpResolver {
    async fn resolve_bytes(&self, url: &str) -> Result<Vec<u8>, ResolveError> {
        let mut bytes = Vec::new();
        self.get(url)?
            .into_reader()
            .read_to_end(&mut bytes)
            .map_err(|e| ResolveError::new(url, e.to_string()))?;
        Ok(bytes)
    }
}

// ---------------------------------------------------------------------------
// DefaultResolver
// ---------------------------------------------------------------------------

/// `http(s)://` goes over the network, everything else hits the disk.
#[derive(Debug, Clone, Default)]
pub struct DefaultResolver {
    pub fs: FsResolver,
    pub http: HttpResolver,
}

impl DefaultResolver {
    pub fn new() -> Self {
        Self::default()
    }

    fn is_http(url: &str) -> bool {
        url.starts_with("http://") || url.starts_with("https://")
    }
}

impl TextResolver for DefaultResolver {
    async fn resolve_text(&self, url: &str) -> Result<String, ResolveError> {
        if Self::is_http(url) {
            self.http.resolve_text(url).await
        } else {
            self.fs.resolve_text(url).await
        }
    }
}

impl BytesResolver for DefaultResolver {
    async fn resolve_bytes(&self, url: &str) -> Result<Vec<u8>, ResolveError> {
        if Self::is_http(url) {
            self.http.resolve_bytes(url).await
        } else {
            self.fs.resolve_bytes(url).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_relative_to_document() {
        assert_eq!(resolve_url("/proj/project.json", "shaders/a.glsl"), "/proj/shaders/a.glsl");
        assert_eq!(resolve_url("/proj/shaders/a.glsl", "../common/noise.glsl"), "/proj/common/noise.glsl");
        assert_eq!(resolve_url("/proj/shaders/a.glsl", "./b.glsl"), "/proj/shaders/b.glsl");
        assert_eq!(resolve_url("/proj/shaders/a.glsl", "/lib/x.glsl"), "/lib/x.glsl");
        assert_eq!(resolve_url("/a.json", "../../b.json"), "/b.json");
    }

    #[test]
    fn test_resolve_with_origin() {
        assert_eq!(
            resolve_url("https://host.test/p/project.json", "shaders/a.glsl"),
            "https://host.test/p/shaders/a.glsl"
        );
        assert_eq!(
            resolve_url("https://host.test/p/project.json", "/root.glsl"),
            "https://host.test/root.glsl"
        );
        assert_eq!(
            resolve_url("/p/project.json", "https://cdn.test/x/../y.glsl"),
            "https://cdn.test/y.glsl"
        );
    }

    #[test]
    fn test_memory_resolver() {
        let resolver = MemoryResolver::new().with("/a.txt", "hello");
        assert_eq!(pollster::block_on(resolver.resolve_text("/a.txt")).unwrap(), "hello");
        let err = pollster::block_on(resolver.resolve_text("/missing")).unwrap_err();
        assert_eq!(err.url, "/missing");
    }

    #[test]
    fn test_fs_resolver_root() {
        let fs = FsResolver::with_root("/tmp/project");
        assert_eq!(fs.path_for("/shaders/a.glsl"), PathBuf::from("/tmp/project/shaders/a.glsl"));
        assert_eq!(FsResolver::new().path_for("file:///x/y"), PathBuf::from("/x/y"));
    }
}
