//! Command-line front ends over the loader and runtime: graph checking with
//! a printable plan, and fixed-step rendering without a window.

use std::fmt::{self, Write as _};
use std::sync::Arc;

use shadergraph_core::{Graph, GraphError};

use crate::assets::load_assets;
use crate::backend::{BackendError, RenderBackend, WgpuBackend};
use crate::project::{build_graph, load_project, LoadError, Project};
use crate::project_config::RenderConfig;
use crate::resolver::{BytesResolver, TextResolver};
use crate::runtime::{source_label, GraphRuntime, RuntimeError, RuntimeOptions};

#[derive(Debug)]
pub enum HeadlessError {
    Load(LoadError),
    Runtime(RuntimeError),
    Image(image::ImageError),
    /// The project declares no graphs.
    NoGraphs,
}

impl fmt::Display for HeadlessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Load(e) => write!(f, "{}", e),
            Self::Runtime(e) => write!(f, "{}", e),
            Self::Image(e) => write!(f, "Failed to write image: {}", e),
            Self::NoGraphs => write!(f, "Project declares no graphs"),
        }
    }
}

impl std::error::Error for HeadlessError {}

impl From<LoadError> for HeadlessError {
    fn from(e: LoadError) -> Self {
        Self::Load(e)
    }
}

impl From<GraphError> for HeadlessError {
    fn from(e: GraphError) -> Self {
        Self::Load(LoadError::Invalid(e))
    }
}

impl From<RuntimeError> for HeadlessError {
    fn from(e: RuntimeError) -> Self {
        Self::Runtime(e)
    }
}

impl From<BackendError> for HeadlessError {
    fn from(e: BackendError) -> Self {
        Self::Runtime(RuntimeError::Backend(e))
    }
}

impl From<image::ImageError> for HeadlessError {
    fn from(e: image::ImageError) -> Self {
        Self::Image(e)
    }
}

// ---------------------------------------------------------------------------
// Check
// ---------------------------------------------------------------------------

/// The graph to use: `requested`, else the project default.
pub fn graph_name<'a>(project: &'a Project, requested: Option<&'a str>) -> Result<&'a str, HeadlessError> {
    match requested {
        Some(name) => Ok(name),
        None => project.default_graph().ok_or(HeadlessError::NoGraphs),
    }
}

/// Loads the project and builds one graph (or all of them).
pub async fn check_project<R: TextResolver + ?Sized>(
    url: &str,
    graph: Option<&str>,
    all: bool,
    resolver: &R,
) -> Result<(Project, Vec<(String, Graph)>), HeadlessError> {
    let project = load_project(url, resolver).await?;
    let names: Vec<String> = if all {
        project.graph_names().map(str::to_string).collect()
    } else {
        vec![graph_name(&project, graph)?.to_string()]
    };
    if names.is_empty() {
        return Err(HeadlessError::NoGraphs);
    }
    let mut graphs = Vec::with_capacity(names.len());
    for name in names {
        let built = build_graph(&project, &name)?;
        tracing::info!("Graph \"{}\" ok: {} passes", name, built.passes.len());
        graphs.push((name, built));
    }
    Ok((project, graphs))
}

/// Human-readable execution plan.
pub fn describe(name: &str, graph: &Graph) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "graph \"{}\": {} passes -> {}{}",
        name,
        graph.passes.len(),
        graph.output,
        if graph.time_offset != 0.0 {
            format!(" (time offset {}s)", graph.time_offset)
        } else {
            String::new()
        }
    );
    for (index, node) in graph.passes.iter().enumerate() {
        let _ = writeln!(out, "  {}. {}", index + 1, node.id());
        for input in &node.resolved_inputs {
            let _ = writeln!(out, "       in  {} <- {}", input.uniform, source_label(&input.source));
        }
        for (output, desc) in &node.def.outputs {
            let uses = graph
                .usage_counts
                .iter()
                .find(|(r, _)| r.pass == node.id() && r.output == *output)
                .map_or(0, |(_, n)| *n);
            let _ = writeln!(out, "       out {} {} ({} readers)", output, desc, uses);
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Render
// ---------------------------------------------------------------------------

/// Renders `settings.frames` frames of one graph at a fixed `1 / fps` step
/// and hands the backend back for readback.
pub async fn render_with<B, R>(
    mut backend: B,
    project: &Project,
    graph: &str,
    settings: &RenderConfig,
    resolver: &R,
    debug: bool,
) -> Result<B, HeadlessError>
where
    B: RenderBackend,
    R: BytesResolver + ?Sized,
{
    let built = build_graph(project, graph)?;
    let assets = load_assets(&mut backend, project, resolver, None).await?;
    let mut runtime = GraphRuntime::new(backend, Arc::new(built), assets, RuntimeOptions { debug })?;

    let step = if settings.fps > 0.0 { 1.0 / settings.fps } else { 0.0 };
    for frame in 0..settings.frames.max(1) {
        runtime.render(frame as f32 * step, settings.width, settings.height)?;
        for info in runtime.debug_snapshot() {
            tracing::debug!(
                "frame {} pass \"{}\" at {}: {} inputs, {} outputs",
                frame,
                info.pass,
                info.render_size,
                info.inputs.len(),
                info.outputs.len()
            );
        }
    }
    let stats = runtime.pool_stats();
    tracing::info!(
        "Rendered {} frames of \"{}\" at {}x{} ({} textures created, {} pool hits)",
        settings.frames.max(1),
        graph,
        settings.width,
        settings.height,
        stats.created(),
        stats.hits
    );
    Ok(runtime.into_backend())
}

/// Renders on a surface-less wgpu device and writes the last frame to
/// `settings.output`.
pub async fn render_to_png<R>(
    project: &Project,
    graph: &str,
    settings: &RenderConfig,
    resolver: &R,
    debug: bool,
) -> Result<image::RgbaImage, HeadlessError>
where
    R: BytesResolver + ?Sized,
{
    let backend = WgpuBackend::headless()?;
    let mut backend = render_with(backend, project, graph, settings, resolver, debug).await?;
    let frame = backend.read_frame()?;
    frame.save(&settings.output)?;
    tracing::info!("Wrote {}", settings.output);
    Ok(frame)
}
