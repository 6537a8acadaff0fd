//! Project documents: loading, include resolution, validation, and
//! flattening a named graph into a [`shadergraph_core::Graph`].

pub mod flatten;
pub mod includes;
pub mod schema;
pub mod slot;

use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use shadergraph_core::{
    ComponentSpec, GraphError, OrderedMap, OutputRef, PassDef, TextureFilter, UiGroup,
    UniformOverrides,
};

use crate::resolver::{ResolveError, TextResolver};

pub use flatten::build_graph;
pub use includes::{ExpandedSource, ResolutionContext};
pub use schema::validate_project;
pub use slot::{LoadSlot, LoadTicket};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum LoadError {
    Fetch { url: String, message: String },
    Parse { url: String, message: String },
    /// A shader `#include` or JSON `$include` that reaches itself.
    IncludeCycle { url: String },
    Invalid(GraphError),
    Asset { name: String, message: String },
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fetch { url, message } => write!(f, "Failed to fetch \"{}\": {}", url, message),
            Self::Parse { url, message } => {
                write!(f, "Failed to parse project JSON from \"{}\": {}", url, message)
            }
            Self::IncludeCycle { url } => write!(f, "Include cycle detected at \"{}\".", url),
            Self::Invalid(e) => write!(f, "{}", e),
            Self::Asset { name, message } => write!(f, "Failed to load asset \"{}\": {}", name, message),
        }
    }
}

impl std::error::Error for LoadError {}

impl From<GraphError> for LoadError {
    fn from(e: GraphError) -> Self {
        Self::Invalid(e)
    }
}

impl From<ResolveError> for LoadError {
    fn from(e: ResolveError) -> Self {
        Self::Fetch {
            url: e.url,
            message: e.message,
        }
    }
}

// ---------------------------------------------------------------------------
// Document types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetKind {
    Image,
    Video,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetSpec {
    #[serde(rename = "type")]
    pub kind: AssetKind,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<TextureFilter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flip_y: Option<bool>,
    #[serde(rename = "loop", default, skip_serializing_if = "Option::is_none")]
    pub looping: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub muted: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub autoplay: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plays_inline: Option<bool>,
    /// Edge length of a 3D LUT packed into this image.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lut_size: Option<f32>,
}

impl AssetSpec {
    pub fn filter(&self) -> TextureFilter {
        self.filter.unwrap_or_default()
    }
}

/// A component referenced from a graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentInstanceSource {
    pub id: String,
    pub component: String,
    #[serde(default)]
    pub bindings: OrderedMap<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uniforms: Option<UniformOverrides>,
}

/// A graph body as declared. Flattened by [`build_graph`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphSource {
    #[serde(default)]
    pub passes: Vec<PassDef>,
    #[serde(default)]
    pub components: Vec<ComponentInstanceSource>,
    pub output: OutputRef,
    #[serde(default)]
    pub ui_groups: OrderedMap<UiGroup>,
    /// Seconds added to the caller's clock.
    #[serde(default)]
    pub time_offset: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Project {
    /// URL the project document was loaded from; asset URLs resolve
    /// against it.
    pub base_url: String,
    pub shaders: OrderedMap<String>,
    pub components: OrderedMap<ComponentSpec>,
    pub assets: OrderedMap<AssetSpec>,
    pub graphs: OrderedMap<GraphSource>,
}

impl Project {
    pub fn graph_names(&self) -> impl Iterator<Item = &str> {
        self.graphs.keys().map(String::as_str)
    }

    /// The graph to use when none is named: `main` if present, else the
    /// first declared.
    pub fn default_graph(&self) -> Option<&str> {
        if self.graphs.contains_key("main") {
            return Some("main");
        }
        self.graph_names().next()
    }
}

#[derive(Deserialize)]
struct ProjectDocument {
    #[serde(default)]
    components: OrderedMap<ComponentSpec>,
    #[serde(default)]
    assets: OrderedMap<AssetSpec>,
    graphs: OrderedMap<GraphSource>,
}

// ---------------------------------------------------------------------------
// Shader references
// ---------------------------------------------------------------------------

fn shader_ref_target(value: &Value) -> Option<&str> {
    value
        .get(schema::REF_KEY)
        .and_then(Value::as_str)
        .and_then(|r| r.strip_prefix(schema::SHADER_REF_PREFIX))
}

/// Resolves `{"$ref": "shader.x"}` entries of the shader map. References
/// may point forward and may chain.
fn resolve_shader_map(raw: Option<&Value>) -> Result<OrderedMap<String>, GraphError> {
    let Some(raw) = raw.and_then(Value::as_object) else {
        return Ok(OrderedMap::new());
    };

    fn resolve<'a>(
        name: &'a str,
        raw: &'a serde_json::Map<String, Value>,
        done: &mut HashMap<&'a str, String>,
        stack: &mut HashSet<&'a str>,
    ) -> Result<String, GraphError> {
        if let Some(text) = done.get(name) {
            return Ok(text.clone());
        }
        let value = raw
            .get(name)
            .ok_or_else(|| GraphError::Reference(format!("Missing shader \"{}\".", name)))?;
        let text = match value {
            Value::String(text) => text.clone(),
            other => {
                let target = shader_ref_target(other).ok_or_else(|| {
                    GraphError::Schema(format!("Shader \"{}\" must be a string or ref.", name))
                })?;
                if !raw.contains_key(target) {
                    return Err(GraphError::Reference(format!(
                        "Shader \"{}\" references missing shader \"{}\".",
                        name, target
                    )));
                }
                if !stack.insert(name) {
                    return Err(GraphError::Cycle(format!(
                        "Shader references loop through \"{}\".",
                        name
                    )));
                }
                let text = resolve(target, raw, done, stack)?;
                stack.remove(name);
                text
            }
        };
        done.insert(name, text.clone());
        Ok(text)
    }

    let mut done = HashMap::new();
    let mut shaders = OrderedMap::new();
    for name in raw.keys() {
        let text = resolve(name, raw, &mut done, &mut HashSet::new())?;
        shaders.insert(name.clone(), text);
    }
    Ok(shaders)
}

/// Replaces `fragment: {"$ref": ...}` in every pass of `passes`.
fn inline_fragments(passes: Option<&mut Value>, shaders: &OrderedMap<String>) -> Result<(), GraphError> {
    let Some(passes) = passes.and_then(Value::as_array_mut) else {
        return Ok(());
    };
    for pass in passes {
        let Some(fragment) = pass.get_mut("fragment") else {
            continue;
        };
        if let Some(name) = shader_ref_target(fragment) {
            let text = shaders
                .get(name)
                .ok_or_else(|| GraphError::Reference(format!("Missing shader \"{}\".", name)))?;
            *fragment = Value::String(text.clone());
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Loads the project document at `url` and everything it includes.
pub async fn load_project<R: TextResolver + ?Sized>(url: &str, resolver: &R) -> Result<Project, LoadError> {
    let text = resolver.resolve_text(url).await?;
    let raw: Value = serde_json::from_str(&text).map_err(|e| LoadError::Parse {
        url: url.to_string(),
        message: e.to_string(),
    })?;

    let mut ctx = ResolutionContext::new();
    let mut document = includes::resolve_document(&mut ctx, raw, url, resolver).await?;
    validate_project(&document)?;

    let shaders = resolve_shader_map(document.get("shaders"))?;
    if let Some(components) = document.get_mut("components").and_then(Value::as_object_mut) {
        for component in components.values_mut() {
            inline_fragments(component.get_mut("passes"), &shaders)?;
        }
    }
    if let Some(graphs) = document.get_mut("graphs").and_then(Value::as_object_mut) {
        for graph in graphs.values_mut() {
            inline_fragments(graph.get_mut("passes"), &shaders)?;
        }
    }

    let parsed: ProjectDocument = serde_json::from_value(document).map_err(|e| LoadError::Parse {
        url: url.to_string(),
        message: e.to_string(),
    })?;
    for spec in parsed.components.values() {
        spec.validate()?;
    }

    tracing::info!(
        "Loaded project {}: {} graphs, {} components, {} shaders, {} assets",
        url,
        parsed.graphs.len(),
        parsed.components.len(),
        shaders.len(),
        parsed.assets.len()
    );
    Ok(Project {
        base_url: url.to_string(),
        shaders,
        components: parsed.components,
        assets: parsed.assets,
        graphs: parsed.graphs,
    })
}
