//! naga front end for fragment programs.
//!
//! Rewrites the fragment into explicit-binding GLSL 450, parses and validates
//! it, and extracts the uniform block layout plus texture/sampler bindings
//! the GPU backend builds its bind groups from. Diagnostics come back as
//! `ERROR: <id>:<line>: msg` lines against the pre-expansion sources.
//!
//! The full-screen vertex stages go through the same front end, and the
//! varyings they write must match what each fragment reads, interpolation
//! and sampling included.

use std::collections::HashMap;

use naga::front::glsl::{Frontend, Options};
use naga::valid::{Capabilities, ValidationFlags, Validator};
use naga::{
    AddressSpace, Binding, Handle, ImageDimension, Interpolation, Sampling, ScalarKind, ShaderStage, Span, Type,
    TypeInner, VectorSize,
};

use super::{BackendError, UniformKind};
use crate::glsl::{self, VulkanGlsl, SAMPLER_SUFFIX};
use crate::source_map::{strip_line_directives, SourceMap};

/// One member of a uniform block, `offset` in bytes (std140).
#[derive(Debug, Clone, PartialEq)]
pub struct BlockMember {
    pub kind: UniformKind,
    pub offset: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UniformBlock {
    pub group: u32,
    pub binding: u32,
    pub size: u32,
    pub members: HashMap<String, BlockMember>,
}

/// A bound texture or sampler global.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceSlot {
    pub name: String,
    pub group: u32,
    pub binding: u32,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reflection {
    pub blocks: Vec<UniformBlock>,
    pub textures: Vec<ResourceSlot>,
    pub samplers: Vec<ResourceSlot>,
}

impl Reflection {
    /// Name -> kind table for every block member, texture and sampler.
    pub fn uniform_kinds(&self) -> HashMap<String, UniformKind> {
        let mut kinds = HashMap::new();
        for block in &self.blocks {
            for (name, member) in &block.members {
                kinds.insert(name.clone(), member.kind.clone());
            }
        }
        for texture in &self.textures {
            kinds.insert(texture.name.clone(), UniformKind::Texture2D);
        }
        for sampler in &self.samplers {
            kinds.insert(sampler.name.clone(), UniformKind::Other("sampler".to_string()));
        }
        kinds
    }

    /// Number of bind groups the pipeline layout needs.
    pub fn group_count(&self) -> u32 {
        let blocks = self.blocks.iter().map(|b| b.group);
        let textures = self.textures.iter().map(|t| t.group);
        let samplers = self.samplers.iter().map(|s| s.group);
        blocks.chain(textures).chain(samplers).map(|g| g + 1).max().unwrap_or(0)
    }

    /// The texture a sampler is paired with by the `<texture>Sampler` naming.
    pub fn sampler_texture<'a>(&self, sampler: &'a str) -> Option<&'a str> {
        let texture = sampler.strip_suffix(SAMPLER_SUFFIX)?;
        self.textures.iter().any(|t| t.name == texture).then_some(texture)
    }
}

/// Full-screen triangle for offscreen passes. v is flipped so that texel
/// row 0 is sampled at `vUv.y == 0`.
pub const VERTEX_OFFSCREEN: &str = "#version 450
layout(location = 0) out vec2 vUv;
void main() {
    int index = int(gl_VertexIndex);
    vec2 corner = vec2(float((index << 1) & 2), float(index & 2));
    gl_Position = vec4(corner * 2.0 - 1.0, 0.0, 1.0);
    vUv = vec2(corner.x, 1.0 - corner.y);
}
";

/// Full-screen triangle for the present pass, unflipped.
pub const VERTEX_FRAME: &str = "#version 450
layout(location = 0) out vec2 vUv;
void main() {
    int index = int(gl_VertexIndex);
    vec2 corner = vec2(float((index << 1) & 2), float(index & 2));
    gl_Position = vec4(corner * 2.0 - 1.0, 0.0, 1.0);
    vUv = corner;
}
";

/// A user-defined stage input or output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Varying {
    pub location: u32,
    pub interpolation: Option<Interpolation>,
    pub sampling: Option<Sampling>,
}

/// A fragment program ready for pipeline creation.
#[derive(Debug)]
pub struct CompiledFragment {
    /// Explicit-binding GLSL 450 text handed to the device.
    pub source: String,
    pub module: naga::Module,
    pub reflection: Reflection,
}

pub fn compile_fragment(label: &str, fragment: &str) -> Result<CompiledFragment, BackendError> {
    let converted = glsl::to_vulkan(&strip_line_directives(fragment));

    let module = Frontend::default()
        .parse(&Options::from(ShaderStage::Fragment), &converted.text)
        .map_err(|errors| BackendError::Compile {
            label: label.to_string(),
            log: errors
                .errors
                .iter()
                .map(|e| diagnostic(fragment, &converted, e.meta, &e.kind.to_string()))
                .collect::<Vec<_>>()
                .join("\n"),
        })?;

    Validator::new(ValidationFlags::all(), Capabilities::empty())
        .validate(&module)
        .map_err(|error| {
            let span = error.spans().next().map(|(span, _)| *span).unwrap_or_default();
            BackendError::Compile {
                label: label.to_string(),
                log: diagnostic(fragment, &converted, span, &error.as_inner().to_string()),
            }
        })?;

    let reflection = reflect(&module);
    tracing::trace!(
        "Reflected \"{}\": {} blocks, {} textures, {} samplers",
        label,
        reflection.blocks.len(),
        reflection.textures.len(),
        reflection.samplers.len()
    );
    Ok(CompiledFragment {
        source: converted.text,
        module,
        reflection,
    })
}

/// Parses and validates one of the built-in vertex stages.
pub fn compile_vertex(label: &str, source: &str) -> Result<naga::Module, BackendError> {
    let module = Frontend::default()
        .parse(&Options::from(ShaderStage::Vertex), source)
        .map_err(|errors| BackendError::Compile {
            label: label.to_string(),
            log: errors
                .errors
                .iter()
                .map(|e| format!("ERROR: {}", e.kind))
                .collect::<Vec<_>>()
                .join("\n"),
        })?;
    Validator::new(ValidationFlags::all(), Capabilities::empty())
        .validate(&module)
        .map_err(|error| BackendError::Compile {
            label: label.to_string(),
            log: format!("ERROR: {}", error.as_inner()),
        })?;
    Ok(module)
}

/// Location-bound values the module's entry point reads (`outputs == false`)
/// or writes (`outputs == true`).
pub fn varyings(module: &naga::Module, outputs: bool) -> Vec<Varying> {
    let mut found = Vec::new();
    let Some(entry) = module.entry_points.first() else {
        return found;
    };
    if outputs {
        if let Some(result) = &entry.function.result {
            collect_varyings(module, result.ty, result.binding.as_ref(), &mut found);
        }
    } else {
        for argument in &entry.function.arguments {
            collect_varyings(module, argument.ty, argument.binding.as_ref(), &mut found);
        }
    }
    found
}

fn collect_varyings(module: &naga::Module, ty: Handle<Type>, binding: Option<&Binding>, found: &mut Vec<Varying>) {
    match binding {
        Some(&Binding::Location {
            location,
            interpolation,
            sampling,
            ..
        }) => found.push(Varying {
            location,
            interpolation,
            sampling,
        }),
        Some(Binding::BuiltIn(_)) => {}
        None => {
            if let TypeInner::Struct { members, .. } = &module.types[ty].inner {
                for member in members {
                    collect_varyings(module, member.ty, member.binding.as_ref(), found);
                }
            }
        }
    }
}

/// Every fragment input must be written by the vertex stage with the same
/// interpolation and sampling.
pub fn check_varyings(label: &str, vertex: &naga::Module, fragment: &naga::Module) -> Result<(), BackendError> {
    let provided = varyings(vertex, true);
    for input in varyings(fragment, false) {
        if !provided.contains(&input) {
            return Err(BackendError::Compile {
                label: label.to_string(),
                log: format!(
                    "ERROR: fragment input at location {} ({:?}, {:?}) is not written by the vertex stage",
                    input.location, input.interpolation, input.sampling
                ),
            });
        }
    }
    Ok(())
}

/// Formats one diagnostic against the original (pre-rewrite) source.
fn diagnostic(original: &str, converted: &VulkanGlsl, span: Span, message: &str) -> String {
    let message = message.replace('\n', " ");
    if !span.is_defined() {
        return format!("ERROR: {}", message);
    }
    let raw = span
        .location(&converted.text)
        .line_number
        .saturating_sub(converted.line_offset);
    if raw == 0 {
        return format!("ERROR: {}", message);
    }
    match SourceMap::locate(original, raw) {
        Some(at) => format!("ERROR: {}:{}: {}", at.source_id, at.line, message),
        None => format!("ERROR: 0:{}: {}", raw, message),
    }
}

pub fn reflect(module: &naga::Module) -> Reflection {
    let mut reflection = Reflection::default();
    for (_, var) in module.global_variables.iter() {
        let Some(binding) = &var.binding else {
            continue;
        };
        let inner = &module.types[var.ty].inner;
        match (var.space, inner) {
            (AddressSpace::Uniform, TypeInner::Struct { members, span }) => {
                let members = members
                    .iter()
                    .filter_map(|m| {
                        let name = m.name.clone()?;
                        let kind = kind_of(module, &module.types[m.ty].inner);
                        Some((name, BlockMember { kind, offset: m.offset }))
                    })
                    .collect();
                reflection.blocks.push(UniformBlock {
                    group: binding.group,
                    binding: binding.binding,
                    size: *span,
                    members,
                });
            }
            (AddressSpace::Handle, TypeInner::Image { dim: ImageDimension::D2, .. }) => {
                if let Some(name) = &var.name {
                    reflection.textures.push(ResourceSlot {
                        name: name.clone(),
                        group: binding.group,
                        binding: binding.binding,
                    });
                }
            }
            (AddressSpace::Handle, TypeInner::Sampler { .. }) => {
                if let Some(name) = &var.name {
                    reflection.samplers.push(ResourceSlot {
                        name: name.clone(),
                        group: binding.group,
                        binding: binding.binding,
                    });
                }
            }
            _ => {}
        }
    }
    reflection
}

fn kind_of(module: &naga::Module, inner: &TypeInner) -> UniformKind {
    match inner {
        TypeInner::Scalar(s) if s.kind == ScalarKind::Float => UniformKind::Float,
        TypeInner::Vector { size, scalar } if scalar.kind == ScalarKind::Float => match size {
            VectorSize::Bi => UniformKind::Vec2,
            VectorSize::Tri => UniformKind::Vec3,
            VectorSize::Quad => UniformKind::Vec4,
        },
        TypeInner::Scalar(s) => UniformKind::Other(scalar_name(s.kind).to_string()),
        TypeInner::Vector { size, scalar } => {
            UniformKind::Other(format!("{}vec{}", vector_prefix(scalar.kind), *size as u8))
        }
        TypeInner::Matrix { columns, rows, .. } => {
            UniformKind::Other(format!("mat{}x{}", *columns as u8, *rows as u8))
        }
        TypeInner::Array { base, .. } => match kind_of(module, &module.types[*base].inner) {
            UniformKind::Other(name) => UniformKind::Other(format!("{}[]", name)),
            kind => UniformKind::Other(format!("{}[]", kind)),
        },
        _ => UniformKind::Other("struct".to_string()),
    }
}

fn scalar_name(kind: ScalarKind) -> &'static str {
    match kind {
        ScalarKind::Sint | ScalarKind::AbstractInt => "int",
        ScalarKind::Uint => "uint",
        ScalarKind::Bool => "bool",
        ScalarKind::Float | ScalarKind::AbstractFloat => "float",
    }
}

fn vector_prefix(kind: ScalarKind) -> &'static str {
    match kind {
        ScalarKind::Sint | ScalarKind::AbstractInt => "i",
        ScalarKind::Uint => "u",
        ScalarKind::Bool => "b",
        ScalarKind::Float | ScalarKind::AbstractFloat => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::PRESENT_FRAGMENT;

    const WEBGL_STYLE: &str = "#version 300 es
precision highp float;
uniform float uTime;
uniform vec2 uResolution;
uniform int uMode;
uniform sampler2D uSrc;
in vec2 vUv;
out vec4 fragColor;
void main() {
    vec4 c = texture(uSrc, vUv);
    fragColor = c * uTime + vec4(uResolution, float(uMode), 0.0);
}
";

    #[test]
    fn test_reflects_converted_uniforms() {
        let compiled = compile_fragment("blur", WEBGL_STYLE).unwrap();
        let r = &compiled.reflection;
        assert_eq!(r.blocks.len(), 1);
        let block = &r.blocks[0];
        assert_eq!((block.group, block.binding), (0, 0));
        assert_eq!(block.members["uTime"].kind, UniformKind::Float);
        assert_eq!(block.members["uTime"].offset, 0);
        assert_eq!(block.members["uResolution"].kind, UniformKind::Vec2);
        assert_eq!(block.members["uResolution"].offset, 8);
        assert_eq!(block.members["uMode"].kind, UniformKind::Other("int".into()));

        assert_eq!(r.textures.len(), 1);
        assert_eq!(r.textures[0].name, "uSrc");
        assert_eq!(r.samplers[0].name, "uSrcSampler");
        assert_eq!(r.sampler_texture("uSrcSampler"), Some("uSrc"));
        assert_eq!(r.group_count(), 1);

        let kinds = r.uniform_kinds();
        assert_eq!(kinds.get("uSrc"), Some(&UniformKind::Texture2D));
        assert_eq!(kinds.get("uResolution"), Some(&UniformKind::Vec2));
    }

    #[test]
    fn test_present_program_reflects_source_texture() {
        let compiled = compile_fragment("present", PRESENT_FRAGMENT).unwrap();
        assert!(compiled.reflection.blocks.is_empty());
        assert_eq!(compiled.reflection.textures[0].name, "uSrc");
    }

    #[test]
    fn test_vertex_stages_feed_fragment_varyings() {
        let offscreen = compile_vertex("offscreen", VERTEX_OFFSCREEN).unwrap();
        let frame = compile_vertex("frame", VERTEX_FRAME).unwrap();
        assert_eq!(varyings(&offscreen, true).len(), 1);
        assert_eq!(varyings(&offscreen, true), varyings(&frame, true));

        let reads_uv = "#version 300 es
precision highp float;
uniform float uTime;
in vec2 vUv;
out vec4 fragColor;
void main() { fragColor = vec4(vUv, uTime, 1.0); }
";
        for fragment in [reads_uv, PRESENT_FRAGMENT, WEBGL_STYLE] {
            let compiled = compile_fragment("uv", fragment).unwrap();
            let inputs = varyings(&compiled.module, false);
            assert_eq!(inputs.len(), 1);
            assert_eq!(inputs[0].location, 0);
            check_varyings("uv", &offscreen, &compiled.module).unwrap();
            check_varyings("uv", &frame, &compiled.module).unwrap();
        }
    }

    #[test]
    fn test_unwritten_fragment_input_is_rejected() {
        let vertex = compile_vertex("offscreen", VERTEX_OFFSCREEN).unwrap();
        let fragment = "#version 300 es
precision highp float;
in vec2 vUv;
in vec3 vNormal;
out vec4 fragColor;
void main() { fragColor = vec4(vNormal, vUv.x); }
";
        let compiled = compile_fragment("normals", fragment).unwrap();
        let err = check_varyings("normals", &vertex, &compiled.module).unwrap_err();
        let BackendError::Compile { log, .. } = err else {
            panic!("expected a compile error");
        };
        assert!(log.contains("location 1"), "{}", log);
    }

    #[test]
    fn test_errors_point_at_included_file() {
        let src = "#version 300 es
// @source 0 /p/main.glsl
// @source 1 /p/lib.glsl
#line 2 0
precision highp float;
out vec4 fragColor;
#line 1 1
float helper() { return missingThing; }
#line 4 0
void main() { fragColor = vec4(helper()); }
";
        let err = compile_fragment("main", src).unwrap_err();
        let BackendError::Compile { label, log } = err else {
            panic!("expected a compile error");
        };
        assert_eq!(label, "main");
        assert!(log.lines().any(|l| l.starts_with("ERROR: 1:1:")), "{}", log);
        let rewritten = SourceMap::from_source(src).rewrite_log(&log);
        assert!(rewritten.contains("ERROR: /p/lib.glsl:1:"), "{}", rewritten);
    }
}
