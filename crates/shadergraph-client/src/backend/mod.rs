//! Rendering backend seam: everything the graph runtime needs from a GPU.

use std::collections::HashMap;
use std::fmt;

use shadergraph_core::{Extent, TextureFormat, UniformType, UniformValue};

use crate::pool::TextureKey;

pub mod gpu;
pub mod null;
pub mod reflect;

pub use gpu::{GpuContext, WgpuBackend};
pub use null::{DrawRecord, NullBackend};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProgramId(pub u64);

// ---------------------------------------------------------------------------
// Uniform reflection + values
// ---------------------------------------------------------------------------

/// Declared type of a program uniform, as reported by reflection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UniformKind {
    Float,
    Vec2,
    Vec3,
    Vec4,
    Texture2D,
    Other(String),
}

impl UniformKind {
    pub fn for_type(ty: UniformType) -> Self {
        match ty {
            UniformType::F1 => Self::Float,
            UniformType::F2 => Self::Vec2,
            UniformType::F3 => Self::Vec3,
            UniformType::F4 => Self::Vec4,
        }
    }

    /// Maps a GLSL type name.
    pub fn from_glsl(name: &str) -> Self {
        match name {
            "float" => Self::Float,
            "vec2" => Self::Vec2,
            "vec3" => Self::Vec3,
            "vec4" => Self::Vec4,
            "sampler2D" | "texture2D" => Self::Texture2D,
            other => Self::Other(other.to_string()),
        }
    }
}

impl fmt::Display for UniformKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Float => write!(f, "float"),
            Self::Vec2 => write!(f, "vec2"),
            Self::Vec3 => write!(f, "vec3"),
            Self::Vec4 => write!(f, "vec4"),
            Self::Texture2D => write!(f, "sampler2D"),
            Self::Other(name) => write!(f, "{}", name),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UniformData {
    Float(f32),
    Vec2([f32; 2]),
    Vec3([f32; 3]),
    Vec4([f32; 4]),
}

impl UniformData {
    pub fn kind(&self) -> UniformKind {
        match self {
            Self::Float(_) => UniformKind::Float,
            Self::Vec2(_) => UniformKind::Vec2,
            Self::Vec3(_) => UniformKind::Vec3,
            Self::Vec4(_) => UniformKind::Vec4,
        }
    }

    pub fn as_slice(&self) -> &[f32] {
        match self {
            Self::Float(v) => std::slice::from_ref(v),
            Self::Vec2(v) => v,
            Self::Vec3(v) => v,
            Self::Vec4(v) => v,
        }
    }

    pub fn from_value(ty: UniformType, value: &UniformValue) -> Option<Self> {
        if !value.matches(ty) {
            return None;
        }
        let v = value.as_slice();
        Some(match ty {
            UniformType::F1 => Self::Float(v[0]),
            UniformType::F2 => Self::Vec2([v[0], v[1]]),
            UniformType::F3 => Self::Vec3([v[0], v[1], v[2]]),
            UniformType::F4 => Self::Vec4([v[0], v[1], v[2], v[3]]),
        })
    }
}

/// A compiled program and its uniform name -> type table.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgramInfo {
    pub id: ProgramId,
    pub uniforms: HashMap<String, UniformKind>,
}

impl ProgramInfo {
    pub fn uniform_kind(&self, name: &str) -> Option<&UniformKind> {
        self.uniforms.get(name)
    }
}

// ---------------------------------------------------------------------------
// Program / draw descriptions
// ---------------------------------------------------------------------------

/// Where a program's fragment output goes.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgramTarget {
    /// One colour attachment per format, in output declaration order.
    Offscreen(Vec<TextureFormat>),
    /// The visible frame.
    Frame,
}

#[derive(Debug, Clone)]
pub struct ProgramDesc<'a> {
    pub label: &'a str,
    pub fragment: &'a str,
    pub target: ProgramTarget,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextureBinding {
    pub uniform: String,
    pub unit: u32,
    pub texture: TextureId,
}

/// One full-screen-triangle draw. An empty `targets` slice draws to the
/// frame.
#[derive(Debug, Clone)]
pub struct DrawCall<'a> {
    pub label: &'a str,
    pub program: ProgramId,
    pub targets: &'a [TextureId],
    pub extent: Extent,
    pub uniforms: &'a [(String, UniformData)],
    pub textures: &'a [TextureBinding],
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum BackendError {
    /// Program failed to compile; `log` uses `ERROR: <id>:<line>: msg` lines.
    Compile { label: String, log: String },
    Device(String),
    UnknownTexture(TextureId),
    UnknownProgram(ProgramId),
    Upload(String),
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Compile { label, log } => write!(f, "Shader compile failed for \"{}\":\n{}", label, log),
            Self::Device(msg) => write!(f, "GPU device error: {}", msg),
            Self::UnknownTexture(id) => write!(f, "Unknown texture {:?}", id),
            Self::UnknownProgram(id) => write!(f, "Unknown program {:?}", id),
            Self::Upload(msg) => write!(f, "Texture upload failed: {}", msg),
        }
    }
}

impl std::error::Error for BackendError {}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Pixel upload, the only capability asset update hooks get.
pub trait TextureUpload {
    fn upload_rgba8(&mut self, texture: TextureId, extent: Extent, pixels: &[u8]) -> Result<(), BackendError>;
}

pub trait RenderBackend: TextureUpload {
    fn compile_program(&mut self, desc: &ProgramDesc<'_>) -> Result<ProgramInfo, BackendError>;

    fn create_texture(&mut self, key: &TextureKey, label: &str) -> Result<TextureId, BackendError>;

    fn destroy_texture(&mut self, texture: TextureId);

    /// Clears to transparent black.
    fn clear_texture(&mut self, texture: TextureId) -> Result<(), BackendError>;

    fn begin_frame(&mut self, extent: Extent) -> Result<(), BackendError>;

    fn draw(&mut self, call: &DrawCall<'_>) -> Result<(), BackendError>;

    fn end_frame(&mut self) -> Result<(), BackendError>;
}
