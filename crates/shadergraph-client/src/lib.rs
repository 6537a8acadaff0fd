//! shadergraph client: project loading, render backends and the graph
//! runtime, plus the pieces the command-line binary is built from.

pub mod assets;
pub mod backend;
pub mod camera;
pub mod cli;
pub mod glsl;
pub mod headless;
pub mod pool;
pub mod project;
pub mod project_config;
pub mod resolver;
pub mod runtime;
pub mod source_map;
pub mod watcher;

pub use shadergraph_core;

pub use assets::{load_assets, Asset, AssetMap, ImageAsset, RgbaFrame, VideoAsset};
pub use backend::{BackendError, NullBackend, RenderBackend, WgpuBackend};
pub use camera::CameraUniforms;
pub use pool::{PoolStats, TextureKey, TexturePool};
pub use project::{build_graph, load_project, LoadError, LoadSlot, Project};
pub use resolver::{DefaultResolver, FsResolver, HttpResolver, MemoryResolver, ResolveError};
pub use runtime::{GraphRuntime, RuntimeError, RuntimeOptions};
pub use source_map::SourceMap;
