//! shadergraph.yaml project configuration parsing.
//!
//! Names the project document and the default render settings so the CLI
//! can be run from anywhere inside a project tree without flags.

use serde::Deserialize;
use std::path::{Path, PathBuf};

pub const CONFIG_FILE: &str = "shadergraph.yaml";

#[derive(Debug, Deserialize)]
pub struct ShadergraphConfig {
    /// Project document, relative to the config file or absolute / URL.
    pub project: String,
    pub graph: Option<String>,
    #[serde(default)]
    pub render: RenderConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RenderConfig {
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default = "default_frames")]
    pub frames: u32,
    #[serde(default = "default_fps")]
    pub fps: f32,
    #[serde(default = "default_output")]
    pub output: String,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            width: default_width(),
            height: default_height(),
            frames: default_frames(),
            fps: default_fps(),
            output: default_output(),
        }
    }
}

fn default_width() -> u32 {
    1280
}
fn default_height() -> u32 {
    720
}
fn default_frames() -> u32 {
    1
}
fn default_fps() -> f32 {
    60.0
}
fn default_output() -> String {
    "frame.png".to_string()
}

#[derive(Debug)]
pub enum ConfigError {
    NotFound,
    Io(std::io::Error),
    Parse(serde_yaml::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::NotFound => write!(f, "{} not found", CONFIG_FILE),
            ConfigError::Io(e) => write!(f, "IO error reading {}: {}", CONFIG_FILE, e),
            ConfigError::Parse(e) => write!(f, "Failed to parse {}: {}", CONFIG_FILE, e),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Walk up from `start_dir` looking for `shadergraph.yaml`.
pub fn find_config(start_dir: &Path) -> Option<PathBuf> {
    let mut dir = start_dir.to_path_buf();
    loop {
        let candidate = dir.join(CONFIG_FILE);
        if candidate.exists() {
            return Some(candidate);
        }
        if !dir.pop() {
            return None;
        }
    }
}

/// Load and parse a `shadergraph.yaml` file.
pub fn load_config(path: &Path) -> Result<ShadergraphConfig, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
    parse_config(&contents)
}

pub fn parse_config(contents: &str) -> Result<ShadergraphConfig, ConfigError> {
    serde_yaml::from_str(contents).map_err(ConfigError::Parse)
}

/// Finds and loads the nearest config, `NotFound` when there is none.
pub fn discover(start_dir: &Path) -> Result<(PathBuf, ShadergraphConfig), ConfigError> {
    let path = find_config(start_dir).ok_or(ConfigError::NotFound)?;
    let config = load_config(&path)?;
    Ok((path, config))
}

impl ShadergraphConfig {
    /// The project location with relative paths taken from the config's
    /// directory. URLs pass through.
    pub fn project_location(&self, config_path: &Path) -> String {
        if crate::resolver::has_scheme(&self.project) || Path::new(&self.project).is_absolute() {
            return self.project.clone();
        }
        let dir = config_path.parent().unwrap_or_else(|| Path::new("."));
        dir.join(&self.project).to_string_lossy().to_string()
    }
}

/// Render settings after CLI flags are applied on top of the config.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct RenderOverrides {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub frames: Option<u32>,
    pub fps: Option<f32>,
    pub output: Option<String>,
}

impl RenderConfig {
    pub fn with_overrides(&self, overrides: &RenderOverrides) -> Self {
        Self {
            width: overrides.width.unwrap_or(self.width),
            height: overrides.height.unwrap_or(self.height),
            frames: overrides.frames.unwrap_or(self.frames),
            fps: overrides.fps.unwrap_or(self.fps),
            output: overrides.output.clone().unwrap_or_else(|| self.output.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_with_defaults() {
        let config = parse_config("project: project.json\n").unwrap();
        assert_eq!(config.project, "project.json");
        assert_eq!(config.graph, None);
        assert_eq!(config.render, RenderConfig::default());
    }

    #[test]
    fn test_parse_full() {
        let yaml = "project: https://example.com/p.json
graph: preview
render:
  width: 640
  height: 360
  frames: 30
  fps: 24
  output: out/last.png
";
        let config = parse_config(yaml).unwrap();
        assert_eq!(config.graph.as_deref(), Some("preview"));
        assert_eq!(config.render.width, 640);
        assert_eq!(config.render.frames, 30);
        assert_eq!(config.render.fps, 24.0);
        assert_eq!(config.render.output, "out/last.png");
        assert_eq!(
            config.project_location(Path::new("/work/shadergraph.yaml")),
            "https://example.com/p.json"
        );
    }

    #[test]
    fn test_relative_project_is_resolved_against_config_dir() {
        let config = parse_config("project: graphs/p.json").unwrap();
        let location = config.project_location(Path::new("/work/demo/shadergraph.yaml"));
        assert_eq!(PathBuf::from(location), PathBuf::from("/work/demo/graphs/p.json"));
    }

    #[test]
    fn test_overrides_win() {
        let base = RenderConfig::default();
        let merged = base.with_overrides(&RenderOverrides {
            width: Some(320),
            output: Some("a.png".into()),
            ..Default::default()
        });
        assert_eq!(merged.width, 320);
        assert_eq!(merged.height, base.height);
        assert_eq!(merged.output, "a.png");
    }

    #[test]
    fn test_missing_project_key_is_parse_error() {
        assert!(matches!(parse_config("graph: main"), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_find_config_walks_up() {
        let root = std::env::temp_dir().join(format!("shadergraph-config-{}", std::process::id()));
        let nested = root.join("a").join("b");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(root.join(CONFIG_FILE), "project: p.json\n").unwrap();
        assert_eq!(find_config(&nested), Some(root.join(CONFIG_FILE)));
        let (_, config) = discover(&nested).unwrap();
        assert_eq!(config.project, "p.json");
        std::fs::remove_dir_all(&root).unwrap();
    }
}
