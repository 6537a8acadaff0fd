//! Per-frame executor for a built [`Graph`].
//!
//! Owns the texture pool, the persistent ping-pong buffers and the compiled
//! programs. The graph itself stays shared and immutable.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use shadergraph_core::{
    Extent, Graph, OrderedMap, OutputRef, PassNode, ResolvedSource, TextureFilter, TextureFormat,
    UniformSpec, UniformType, UniformValue,
};

use crate::assets::Asset;
use crate::backend::{
    BackendError, DrawCall, ProgramDesc, ProgramInfo, ProgramTarget, RenderBackend, TextureBinding,
    TextureId, UniformData, UniformKind,
};
use crate::camera::CameraUniforms;
use crate::pool::{PoolStats, TextureKey, TexturePool};
use crate::source_map::SourceMap;

/// Pass-through blit used to present the final output.
pub const PRESENT_FRAGMENT: &str = "#version 450
layout(location = 0) in vec2 vUv;
layout(location = 0) out vec4 fragColor;
layout(set = 0, binding = 0) uniform texture2D uSrc;
layout(set = 0, binding = 1) uniform sampler uSrcSampler;
void main() {
    fragColor = texture(sampler2D(uSrc, uSrcSampler), vUv);
}
";

pub const PRESENT_SOURCE_UNIFORM: &str = "uSrc";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeError {
    /// An input had no backing texture when its pass ran.
    MissingInput {
        pass: String,
        input: String,
        source: String,
    },
    MissingAsset { pass: String, asset: String },
    MixedOutputSize {
        pass: String,
        output: String,
        expected: Extent,
        actual: Extent,
    },
    /// The graph output was not produced this frame.
    MissingOutput(OutputRef),
    InputSizing {
        pass: String,
        output: String,
        message: String,
    },
    UnknownUniform { pass: String, uniform: String },
    UniformArity {
        pass: String,
        uniform: String,
        expected: UniformType,
    },
    Backend(BackendError),
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingInput { pass, input, source } => write!(
                f,
                "Pass \"{}\" input \"{}\" has no texture for \"{}\"",
                pass, input, source
            ),
            Self::MissingAsset { pass, asset } => {
                write!(f, "Pass \"{}\" reads asset \"{}\" which is not loaded", pass, asset)
            }
            Self::MixedOutputSize {
                pass,
                output,
                expected,
                actual,
            } => write!(
                f,
                "Pass \"{}\" output \"{}\" resolves to {} but other outputs are {}",
                pass, output, actual, expected
            ),
            Self::MissingOutput(r) => write!(f, "Graph output \"{}\" was not produced", r),
            Self::InputSizing {
                pass,
                output,
                message,
            } => write!(f, "Pass \"{}\" output \"{}\": {}", pass, output, message),
            Self::UnknownUniform { pass, uniform } => {
                write!(f, "Pass \"{}\" has no uniform \"{}\"", pass, uniform)
            }
            Self::UniformArity {
                pass,
                uniform,
                expected,
            } => write!(
                f,
                "Pass \"{}\" uniform \"{}\" expects a {} value",
                pass, uniform, expected
            ),
            Self::Backend(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for RuntimeError {}

impl From<BackendError> for RuntimeError {
    fn from(e: BackendError) -> Self {
        Self::Backend(e)
    }
}

// ---------------------------------------------------------------------------
// Debug snapshot
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct InputDebugInfo {
    pub key: String,
    pub source: String,
    pub size: Extent,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutputDebugInfo {
    pub name: String,
    pub size: Extent,
    pub format: TextureFormat,
    pub filter: TextureFilter,
    pub persistent: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PassDebugInfo {
    pub pass: String,
    pub render_size: Extent,
    pub inputs: Vec<InputDebugInfo>,
    pub outputs: Vec<OutputDebugInfo>,
}

#[derive(Debug, Clone, Default)]
pub struct RuntimeOptions {
    /// Record a [`PassDebugInfo`] per pass each frame.
    pub debug: bool,
}

// ---------------------------------------------------------------------------
// Internal state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
struct LiveTexture {
    texture: TextureId,
    key: TextureKey,
    persistent: bool,
}

/// Two-slot feedback buffer. `read` is exposed as `$prev`; draws go to
/// the other slot.
#[derive(Debug, Clone, Copy)]
struct PingPong {
    key: TextureKey,
    textures: [TextureId; 2],
    read: usize,
}

impl PingPong {
    fn read_texture(&self) -> TextureId {
        self.textures[self.read]
    }

    fn write_texture(&self) -> TextureId {
        self.textures[(self.read + 1) % 2]
    }

    fn flip(&mut self) {
        self.read = (self.read + 1) % 2;
    }
}

struct PassProgram {
    program: ProgramInfo,
    /// Live values; start as declared and change through `set_uniform`.
    uniforms: OrderedMap<UniformSpec>,
}

#[derive(Debug, Clone, Copy)]
struct FrameClock {
    time: f32,
    delta: f32,
    frame: f32,
}

struct FrameState {
    live: HashMap<OutputRef, LiveTexture>,
    usage: BTreeMap<OutputRef, u32>,
    updated_assets: HashSet<String>,
    /// Feedback buffers written this frame; flipped once the frame succeeds.
    written: Vec<OutputRef>,
    debug: Vec<PassDebugInfo>,
}

/// A declared-but-mistyped uniform found while binding.
struct Mismatch {
    name: String,
    expected: UniformKind,
    declared: UniformKind,
}

// ---------------------------------------------------------------------------
// GraphRuntime
// ---------------------------------------------------------------------------

pub struct GraphRuntime<B: RenderBackend> {
    backend: B,
    graph: Arc<Graph>,
    programs: Vec<PassProgram>,
    present: ProgramInfo,
    assets: HashMap<String, Box<dyn Asset>>,
    pool: TexturePool,
    persistent: HashMap<OutputRef, PingPong>,
    camera: CameraUniforms,
    frame_index: u64,
    last_time: Option<f32>,
    warned: HashSet<String>,
    debug_enabled: bool,
    debug_snapshot: Vec<PassDebugInfo>,
}

impl<B: RenderBackend> GraphRuntime<B> {
    /// Compiles every pass program plus the present program.
    pub fn new(
        mut backend: B,
        graph: Arc<Graph>,
        assets: HashMap<String, Box<dyn Asset>>,
        options: RuntimeOptions,
    ) -> Result<Self, RuntimeError> {
        let mut programs = Vec::with_capacity(graph.passes.len());
        for node in &graph.passes {
            for input in &node.resolved_inputs {
                if let ResolvedSource::Asset { name } = &input.source {
                    if !assets.contains_key(name) {
                        return Err(RuntimeError::MissingAsset {
                            pass: node.id().to_string(),
                            asset: name.clone(),
                        });
                    }
                }
            }
            let target = if node.def.outputs.is_empty() {
                ProgramTarget::Frame
            } else {
                ProgramTarget::Offscreen(node.def.outputs.values().map(|d| d.format).collect())
            };
            let program = backend
                .compile_program(&ProgramDesc {
                    label: node.id(),
                    fragment: &node.def.fragment,
                    target,
                })
                .map_err(|e| with_source_urls(e, &node.def.fragment))?;
            tracing::debug!(
                "Compiled pass \"{}\" ({} uniforms reflected)",
                node.id(),
                program.uniforms.len()
            );
            programs.push(PassProgram {
                program,
                uniforms: node.def.uniforms.clone(),
            });
        }
        let present = backend.compile_program(&ProgramDesc {
            label: "present",
            fragment: PRESENT_FRAGMENT,
            target: ProgramTarget::Frame,
        })?;

        tracing::info!("Graph runtime ready: {} passes", programs.len());
        Ok(Self {
            backend,
            graph,
            programs,
            present,
            assets,
            pool: TexturePool::new(),
            persistent: HashMap::new(),
            camera: CameraUniforms::default(),
            frame_index: 0,
            last_time: None,
            warned: HashSet::new(),
            debug_enabled: options.debug,
            debug_snapshot: Vec::new(),
        })
    }

    pub fn graph(&self) -> &Arc<Graph> {
        &self.graph
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    pub fn pooled_textures(&self) -> usize {
        self.pool.free_count()
    }

    pub fn debug_snapshot(&self) -> &[PassDebugInfo] {
        &self.debug_snapshot
    }

    pub fn set_debug(&mut self, enabled: bool) {
        self.debug_enabled = enabled;
        if !enabled {
            self.debug_snapshot.clear();
        }
    }

    pub fn camera(&self) -> CameraUniforms {
        self.camera
    }

    pub fn set_camera(&mut self, camera: CameraUniforms) {
        self.camera = camera;
    }

    pub fn uniform(&self, pass: &str, name: &str) -> Option<&UniformSpec> {
        let index = self.pass_index(pass)?;
        self.programs[index].uniforms.get(name)
    }

    /// Changes a declared uniform's value for subsequent frames.
    pub fn set_uniform(&mut self, pass: &str, name: &str, value: UniformValue) -> Result<(), RuntimeError> {
        let unknown = || RuntimeError::UnknownUniform {
            pass: pass.to_string(),
            uniform: name.to_string(),
        };
        let index = self.pass_index(pass).ok_or_else(unknown)?;
        let spec = self.programs[index].uniforms.get_mut(name).ok_or_else(unknown)?;
        if !value.matches(spec.ty) {
            return Err(RuntimeError::UniformArity {
                pass: pass.to_string(),
                uniform: name.to_string(),
                expected: spec.ty,
            });
        }
        spec.value = value;
        Ok(())
    }

    /// Executes every pass in plan order and presents the graph output.
    /// On error the frame is abandoned: its pooled textures are recycled
    /// and every feedback buffer keeps exposing the slot it exposed before
    /// the frame.
    pub fn render(&mut self, time: f32, width: u32, height: u32) -> Result<(), RuntimeError> {
        let frame = Extent::new(width.max(1), height.max(1));
        let graph_time = time + self.graph.time_offset;
        let delta = self.last_time.map_or(0.0, |last| (graph_time - last).max(0.0));
        self.last_time = Some(graph_time);
        let clock = FrameClock {
            time: graph_time,
            delta,
            frame: self.frame_index as f32,
        };
        self.frame_index += 1;

        let mut state = FrameState {
            live: HashMap::new(),
            usage: self.graph.usage_counts.clone(),
            updated_assets: HashSet::new(),
            written: Vec::new(),
            debug: Vec::new(),
        };

        self.backend.begin_frame(frame)?;
        let result = self.execute(frame, &clock, &mut state);
        if let Err(e) = &result {
            tracing::error!("Frame {} abandoned: {}", clock.frame, e);
        }
        self.recycle(&mut state);
        let ended = self.backend.end_frame();
        result?;
        ended?;

        for output in state.written.drain(..) {
            if let Some(pp) = self.persistent.get_mut(&output) {
                pp.flip();
            }
        }

        if self.debug_enabled {
            self.debug_snapshot = state.debug;
        }
        Ok(())
    }

    fn execute(&mut self, frame: Extent, clock: &FrameClock, state: &mut FrameState) -> Result<(), RuntimeError> {
        let graph = Arc::clone(&self.graph);
        for (index, node) in graph.passes.iter().enumerate() {
            self.run_pass(index, node, frame, clock, state)?;
        }

        let output = &graph.output;
        let live = *state
            .live
            .get(output)
            .ok_or_else(|| RuntimeError::MissingOutput(output.clone()))?;
        let textures = [TextureBinding {
            uniform: PRESENT_SOURCE_UNIFORM.to_string(),
            unit: 0,
            texture: live.texture,
        }];
        self.backend.draw(&DrawCall {
            label: "present",
            program: self.present.id,
            targets: &[],
            extent: frame,
            uniforms: &[],
            textures: &textures,
        })?;
        Ok(())
    }

    fn run_pass(
        &mut self,
        index: usize,
        node: &PassNode,
        frame: Extent,
        clock: &FrameClock,
        state: &mut FrameState,
    ) -> Result<(), RuntimeError> {
        let pass_id = node.id();

        // 1. Inputs produced this frame and external assets.
        let mut bound: Vec<Option<(TextureId, Extent)>> = vec![None; node.resolved_inputs.len()];
        for (slot, input) in node.resolved_inputs.iter().enumerate() {
            match &input.source {
                ResolvedSource::Output { pass, output } => {
                    let key = OutputRef::new(pass, output);
                    let live = state.live.get(&key).ok_or_else(|| RuntimeError::MissingInput {
                        pass: pass_id.to_string(),
                        input: input.key.clone(),
                        source: key.to_string(),
                    })?;
                    bound[slot] = Some((live.texture, live.key.extent()));
                }
                ResolvedSource::Asset { name } => {
                    let asset = self.assets.get_mut(name).ok_or_else(|| RuntimeError::MissingAsset {
                        pass: pass_id.to_string(),
                        asset: name.clone(),
                    })?;
                    if state.updated_assets.insert(name.clone()) {
                        asset.update(&mut self.backend)?;
                    }
                    bound[slot] = Some((asset.texture(), asset.size()));
                }
                ResolvedSource::Prev { .. } => {}
            }
        }

        // 2. Output sizing.
        let input_size = |key: &str| -> Option<Extent> {
            let slot = node.resolved_inputs.iter().position(|i| i.key == key)?;
            bound[slot].map(|(_, extent)| extent)
        };
        let mut render_size: Option<Extent> = None;
        let mut outputs: Vec<(&str, TextureKey, bool)> = Vec::with_capacity(node.def.outputs.len());
        for (name, desc) in &node.def.outputs {
            let size = desc
                .size
                .resolve(frame, node.def.first_input(), &input_size)
                .map_err(|e| RuntimeError::InputSizing {
                    pass: pass_id.to_string(),
                    output: name.clone(),
                    message: e.to_string(),
                })?;
            match render_size {
                None => render_size = Some(size),
                Some(expected) if expected != size => {
                    return Err(RuntimeError::MixedOutputSize {
                        pass: pass_id.to_string(),
                        output: name.clone(),
                        expected,
                        actual: size,
                    })
                }
                Some(_) => {}
            }
            outputs.push((name.as_str(), TextureKey::new(desc, size), desc.persistent));
        }
        let render_size = render_size.unwrap_or(frame);

        // 3. Feedback reads, then output acquisition.
        for (slot, input) in node.resolved_inputs.iter().enumerate() {
            if let ResolvedSource::Prev { output } = &input.source {
                let key = outputs
                    .iter()
                    .find(|(name, _, _)| *name == output)
                    .map(|(_, key, _)| *key)
                    .ok_or_else(|| RuntimeError::MissingInput {
                        pass: pass_id.to_string(),
                        input: input.key.clone(),
                        source: format!("$prev.{}", output),
                    })?;
                let pp = self.ensure_persistent(OutputRef::new(pass_id, output), key)?;
                bound[slot] = Some((pp.read_texture(), key.extent()));
            }
        }

        let mut targets = Vec::with_capacity(outputs.len());
        for (name, key, persistent) in &outputs {
            let out_ref = OutputRef::new(pass_id, *name);
            let texture = if *persistent {
                self.ensure_persistent(out_ref.clone(), *key)?.write_texture()
            } else {
                self.pool
                    .acquire(&mut self.backend, *key, &out_ref.to_string())?
            };
            state.live.insert(
                out_ref,
                LiveTexture {
                    texture,
                    key: *key,
                    persistent: *persistent,
                },
            );
            targets.push(texture);
        }

        // 4. Uniforms, textures, draw.
        let program = &self.programs[index];
        let mut uniforms: Vec<(String, UniformData)> = Vec::new();
        let mut textures: Vec<TextureBinding> = Vec::new();
        let mut mismatches: Vec<Mismatch> = Vec::new();

        let texel_base = bound
            .iter()
            .flatten()
            .next()
            .map(|(_, extent)| *extent)
            .unwrap_or(render_size);
        let camera = self.camera;
        let builtins = [
            ("uTime", UniformData::Float(clock.time)),
            ("uDeltaTime", UniformData::Float(clock.delta)),
            ("uFrame", UniformData::Float(clock.frame)),
            (
                "uResolution",
                UniformData::Vec2([render_size.width as f32, render_size.height as f32]),
            ),
            ("uAspect", UniformData::Float(render_size.aspect())),
            ("uTexelSize", UniformData::Vec2(texel_base.texel_size())),
            ("uCameraPos", UniformData::Vec3(camera.position.to_array())),
            ("uCameraTarget", UniformData::Vec3(camera.target.to_array())),
            ("uCameraUp", UniformData::Vec3(camera.up.to_array())),
            ("uCameraFov", UniformData::Float(camera.fov)),
        ];
        for (name, value) in builtins {
            if program.uniforms.contains_key(name) {
                continue;
            }
            bind_checked(&program.program, name, value, &mut uniforms, &mut mismatches);
        }

        for (name, spec) in &program.uniforms {
            if let Some(value) = UniformData::from_value(spec.ty, &spec.value) {
                bind_checked(&program.program, name, value, &mut uniforms, &mut mismatches);
            }
        }

        for (unit, (input, slot)) in node.resolved_inputs.iter().zip(&bound).enumerate() {
            let (texture, extent) = slot.ok_or_else(|| RuntimeError::MissingInput {
                pass: pass_id.to_string(),
                input: input.key.clone(),
                source: source_label(&input.source),
            })?;
            match program.program.uniform_kind(&input.uniform) {
                Some(UniformKind::Texture2D) => textures.push(TextureBinding {
                    uniform: input.uniform.clone(),
                    unit: unit as u32,
                    texture,
                }),
                Some(declared) => mismatches.push(Mismatch {
                    name: input.uniform.clone(),
                    expected: UniformKind::Texture2D,
                    declared: declared.clone(),
                }),
                None => {}
            }
            let size_name = format!("{}Size", input.uniform);
            if !program.uniforms.contains_key(&size_name) {
                let value = UniformData::Vec2([extent.width as f32, extent.height as f32]);
                bind_checked(&program.program, &size_name, value, &mut uniforms, &mut mismatches);
            }
            let texel_name = format!("{}TexelSize", input.uniform);
            if !program.uniforms.contains_key(&texel_name) {
                let value = UniformData::Vec2(extent.texel_size());
                bind_checked(&program.program, &texel_name, value, &mut uniforms, &mut mismatches);
            }
        }

        self.backend.draw(&DrawCall {
            label: pass_id,
            program: program.program.id,
            targets: &targets,
            extent: render_size,
            uniforms: &uniforms,
            textures: &textures,
        })?;

        for m in mismatches {
            let key = format!("{}:{}", pass_id, m.name);
            if self.warned.insert(key) {
                tracing::warn!(
                    "Pass \"{}\" declares \"{}\" as {} but {} is expected; not binding it",
                    pass_id,
                    m.name,
                    m.declared,
                    m.expected
                );
            }
        }

        if self.debug_enabled {
            state.debug.push(PassDebugInfo {
                pass: pass_id.to_string(),
                render_size,
                inputs: node
                    .resolved_inputs
                    .iter()
                    .zip(&bound)
                    .filter_map(|(input, slot)| {
                        slot.map(|(_, size)| InputDebugInfo {
                            key: input.key.clone(),
                            source: source_label(&input.source),
                            size,
                        })
                    })
                    .collect(),
                outputs: outputs
                    .iter()
                    .map(|(name, key, persistent)| OutputDebugInfo {
                        name: name.to_string(),
                        size: key.extent(),
                        format: key.format,
                        filter: key.filter,
                        persistent: *persistent,
                    })
                    .collect(),
            });
        }

        // 5. Queue feedback flips, release consumed inputs.
        for (name, _, persistent) in &outputs {
            if *persistent {
                state.written.push(OutputRef::new(pass_id, *name));
            }
        }
        for input in &node.resolved_inputs {
            let Some(consumed) = input.source.output_ref() else {
                continue;
            };
            let Some(count) = state.usage.get_mut(&consumed) else {
                continue;
            };
            *count = count.saturating_sub(1);
            if *count == 0 && consumed != self.graph.output {
                if let Some(live) = state.live.remove(&consumed) {
                    if !live.persistent {
                        self.pool.release(live.key, live.texture);
                    }
                }
            }
        }
        Ok(())
    }

    /// (Re)allocates the feedback pair for `output` when its shape changes.
    fn ensure_persistent(&mut self, output: OutputRef, key: TextureKey) -> Result<PingPong, RuntimeError> {
        if let Some(pp) = self.persistent.get(&output) {
            if pp.key == key {
                return Ok(*pp);
            }
        }
        if let Some(old) = self.persistent.remove(&output) {
            tracing::debug!("Persistent \"{}\" reshaped {} -> {}", output, old.key, key);
            for texture in old.textures {
                self.pool.release(old.key, texture);
            }
        }
        let label = format!("{} (persistent)", output);
        let a = self.pool.acquire(&mut self.backend, key, &label)?;
        let b = self.pool.acquire(&mut self.backend, key, &label)?;
        self.backend.clear_texture(a)?;
        self.backend.clear_texture(b)?;
        let pp = PingPong {
            key,
            textures: [a, b],
            read: 0,
        };
        self.persistent.insert(output, pp);
        Ok(pp)
    }

    /// Returns every non-persistent texture still live this frame.
    fn recycle(&mut self, state: &mut FrameState) {
        for (_, live) in state.live.drain() {
            if !live.persistent {
                self.pool.release(live.key, live.texture);
            }
        }
    }

    fn pass_index(&self, pass: &str) -> Option<usize> {
        self.graph.passes.iter().position(|p| p.id() == pass)
    }

    /// Destroys all pooled, persistent and asset textures and returns the
    /// backend.
    pub fn into_backend(mut self) -> B {
        for (_, pp) in self.persistent.drain() {
            for texture in pp.textures {
                self.backend.destroy_texture(texture);
            }
        }
        for (_, asset) in self.assets.drain() {
            self.backend.destroy_texture(asset.texture());
        }
        self.pool.clear(&mut self.backend);
        self.backend
    }
}

fn bind_checked(
    program: &ProgramInfo,
    name: &str,
    value: UniformData,
    out: &mut Vec<(String, UniformData)>,
    mismatches: &mut Vec<Mismatch>,
) {
    match program.uniform_kind(name) {
        None => {}
        Some(declared) if *declared == value.kind() => out.push((name.to_string(), value)),
        Some(declared) => mismatches.push(Mismatch {
            name: name.to_string(),
            expected: value.kind(),
            declared: declared.clone(),
        }),
    }
}

pub(crate) fn source_label(source: &ResolvedSource) -> String {
    match source {
        ResolvedSource::Output { pass, output } => format!("{}.{}", pass, output),
        ResolvedSource::Prev { output } => format!("$prev.{}", output),
        ResolvedSource::Asset { name } => format!("$asset.{}", name),
    }
}

/// Rewrites `ERROR: <id>:<line>` compile diagnostics to file names using
/// the header embedded in the fragment.
fn with_source_urls(error: BackendError, fragment: &str) -> BackendError {
    match error {
        BackendError::Compile { label, log } => BackendError::Compile {
            log: SourceMap::from_source(fragment).rewrite_log(&log),
            label,
        },
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{DrawRecord, NullBackend};
    use shadergraph_core::{GraphBuilder, PassDef, SizeSpec, TextureDesc};

    const SIMPLE: &str = "uniform float uTime;\nuniform vec2 uResolution;\nvoid main() {}";

    fn rgba8(size: SizeSpec) -> TextureDesc {
        TextureDesc::new(TextureFormat::Rgba8, size)
    }

    fn runtime(graph: Graph) -> GraphRuntime<NullBackend> {
        GraphRuntime::new(
            NullBackend::new(),
            Arc::new(graph),
            HashMap::new(),
            RuntimeOptions { debug: true },
        )
        .unwrap()
    }

    fn single_pass_graph() -> Graph {
        GraphBuilder::new()
            .add_pass(PassDef::new("solid", SIMPLE).with_output("out", rgba8(SizeSpec::Full)))
            .output(OutputRef::new("solid", "out"))
            .build()
            .unwrap()
    }

    #[test]
    fn test_single_pass_renders_and_presents() {
        let mut rt = runtime(single_pass_graph());
        rt.render(0.0, 256, 256).unwrap();
        let draws = &rt.backend().draws;
        assert_eq!(draws.len(), 2);
        assert_eq!(draws[0].label, "solid");
        assert_eq!(draws[0].extent, Extent::new(256, 256));
        assert_eq!(draws[0].uniform("uResolution"), Some(UniformData::Vec2([256.0, 256.0])));
        assert_eq!(draws[1].label, "present");
        assert!(draws[1].targets.is_empty());
        assert_eq!(draws[1].texture(PRESENT_SOURCE_UNIFORM), Some(draws[0].targets[0]));
    }

    #[test]
    fn test_pool_is_bounded_across_frames() {
        let mut rt = runtime(single_pass_graph());
        for i in 0..10 {
            rt.render(i as f32 / 60.0, 256, 256).unwrap();
        }
        assert_eq!(rt.pool_stats().created(), 1);
        assert_eq!(rt.pooled_textures(), 1);
        assert_eq!(rt.backend().live_textures(), 1);
    }

    #[test]
    fn test_time_delta_and_frame_uniforms() {
        let src = "uniform float uTime;\nuniform float uDeltaTime;\nuniform float uFrame;\nvoid main() {}";
        let graph = GraphBuilder::new()
            .add_pass(PassDef::new("p", src).with_output("out", rgba8(SizeSpec::Full)))
            .output(OutputRef::new("p", "out"))
            .time_offset(10.0)
            .build()
            .unwrap();
        let mut rt = runtime(graph);
        rt.render(1.0, 4, 4).unwrap();
        rt.render(1.5, 4, 4).unwrap();
        rt.render(1.25, 4, 4).unwrap();
        let draws: Vec<&DrawRecord> = rt.backend().draws.iter().filter(|d| d.label == "p").collect();
        assert_eq!(draws[0].uniform("uTime"), Some(UniformData::Float(11.0)));
        assert_eq!(draws[0].uniform("uDeltaTime"), Some(UniformData::Float(0.0)));
        assert_eq!(draws[1].uniform("uDeltaTime"), Some(UniformData::Float(0.5)));
        assert_eq!(draws[1].uniform("uFrame"), Some(UniformData::Float(1.0)));
        // Time going backwards clamps delta to zero.
        assert_eq!(draws[2].uniform("uDeltaTime"), Some(UniformData::Float(0.0)));
    }

    #[test]
    fn test_shared_output_released_after_both_consumers() {
        let consumer = "uniform sampler2D src;\nvoid main() {}";
        let graph = GraphBuilder::new()
            .add_pass(PassDef::new("src", SIMPLE).with_output("out", rgba8(SizeSpec::Full)))
            .add_pass(
                PassDef::new("l", consumer)
                    .with_input("src", "src.out")
                    .unwrap()
                    .with_output("out", rgba8(SizeSpec::Full)),
            )
            .add_pass(
                PassDef::new("r", consumer)
                    .with_input("src", "src.out")
                    .unwrap()
                    .with_output("out", rgba8(SizeSpec::Full)),
            )
            .add_pass(
                PassDef::new("mix", "uniform sampler2D a;\nuniform sampler2D b;\nvoid main() {}")
                    .with_input("a", "l.out")
                    .unwrap()
                    .with_input("b", "r.out")
                    .unwrap()
                    .with_output("out", rgba8(SizeSpec::Full)),
            )
            .output(OutputRef::new("mix", "out"))
            .build()
            .unwrap();
        assert_eq!(graph.usage_counts[&OutputRef::new("src", "out")], 2);

        let mut rt = runtime(graph);
        rt.render(0.0, 32, 32).unwrap();
        let draws = &rt.backend().draws;
        let src_tex = draws[0].targets[0];
        // "r" still needs src.out, so "l" cannot reuse it.
        assert_ne!(draws[1].targets[0], src_tex);
        // After "l" and "r" consumed it, "mix" gets it back from the pool.
        assert_eq!(draws[3].label, "mix");
        assert_eq!(draws[3].targets[0], src_tex);
        assert!(rt.pool_stats().hits >= 1);
    }

    #[test]
    fn test_prev_reads_last_frame_buffer() {
        let src = "uniform sampler2D uPrev;\nvoid main() {}";
        let pass = PassDef::new("fb", src)
            .with_input("uPrev", "$prev.state")
            .unwrap()
            .with_output("state", rgba8(SizeSpec::Full).persistent());
        let graph = GraphBuilder::new()
            .add_pass(pass)
            .output(OutputRef::new("fb", "state"))
            .build()
            .unwrap();
        let mut rt = runtime(graph);
        for i in 0..4 {
            rt.render(i as f32, 16, 16).unwrap();
        }
        let frames: Vec<&DrawRecord> = rt.backend().draws.iter().filter(|d| d.label == "fb").collect();
        for pair in frames.windows(2) {
            let written_before = pair[0].targets[0];
            let read_now = pair[1].texture("uPrev").unwrap();
            assert_eq!(read_now, written_before);
            assert_ne!(pair[1].targets[0], read_now);
        }
        // Fresh feedback buffers start cleared.
        assert_eq!(rt.backend().cleared.len(), 2);
        // The persistent output is never handed back to the pool.
        assert_eq!(rt.pooled_textures(), 0);
    }

    #[test]
    fn test_persistent_reallocates_on_resize() {
        let pass = PassDef::new("fb", "uniform sampler2D uPrev;\nvoid main() {}")
            .with_input("uPrev", "$prev.state")
            .unwrap()
            .with_output("state", rgba8(SizeSpec::Full).persistent());
        let graph = GraphBuilder::new()
            .add_pass(pass)
            .output(OutputRef::new("fb", "state"))
            .build()
            .unwrap();
        let mut rt = runtime(graph);
        rt.render(0.0, 16, 16).unwrap();
        rt.render(0.1, 32, 16).unwrap();
        assert_eq!(rt.backend().cleared.len(), 4);
        assert_eq!(rt.pooled_textures(), 2);
        let last = rt.backend().draws.iter().rev().find(|d| d.label == "fb").unwrap();
        assert_eq!(last.extent, Extent::new(32, 16));
    }

    #[test]
    fn test_mixed_output_sizes_fail_the_frame() {
        let pass = PassDef::new("mrt", SIMPLE)
            .with_output("a", rgba8(SizeSpec::Full))
            .with_output("b", rgba8(SizeSpec::Half));
        let graph = GraphBuilder::new()
            .add_pass(pass)
            .output(OutputRef::new("mrt", "a"))
            .build()
            .unwrap();
        let mut rt = runtime(graph);
        let err = rt.render(0.0, 64, 64).unwrap_err();
        assert!(matches!(err, RuntimeError::MixedOutputSize { .. }));
        // Nothing leaks out of an abandoned frame.
        assert_eq!(rt.pooled_textures() as u64, rt.pool_stats().created());
    }

    #[test]
    fn test_failed_frame_keeps_feedback_slots() {
        let feedback = PassDef::new("fb", "uniform sampler2D uPrev;\nvoid main() {}")
            .with_input("uPrev", "$prev.state")
            .unwrap()
            .with_output("state", rgba8(SizeSpec::Custom { width: 8, height: 8 }).persistent());
        // Both outputs agree only while the frame is 16x16.
        let mrt = PassDef::new("mrt", SIMPLE)
            .with_output("a", rgba8(SizeSpec::Full))
            .with_output("b", rgba8(SizeSpec::Custom { width: 16, height: 16 }));
        let graph = GraphBuilder::new()
            .add_pass(feedback)
            .add_pass(mrt)
            .output(OutputRef::new("mrt", "a"))
            .build()
            .unwrap();
        let mut rt = runtime(graph);

        rt.render(0.0, 16, 16).unwrap();
        let err = rt.render(0.1, 32, 32).unwrap_err();
        assert!(matches!(err, RuntimeError::MixedOutputSize { .. }));
        rt.render(0.2, 16, 16).unwrap();

        let fb: Vec<&DrawRecord> = rt.backend().draws.iter().filter(|d| d.label == "fb").collect();
        assert_eq!(fb.len(), 3);
        let written = fb[0].targets[0];
        assert_eq!(fb[1].texture("uPrev"), Some(written));
        // The abandoned write is not exposed as `$prev`.
        assert_eq!(fb[2].texture("uPrev"), Some(written));
        assert_eq!(fb[2].targets[0], fb[1].targets[0]);
    }

    #[test]
    fn test_input_sized_output_follows_input() {
        let graph = GraphBuilder::new()
            .add_pass(
                PassDef::new("big", SIMPLE)
                    .with_output("out", rgba8(SizeSpec::Custom { width: 100, height: 60 })),
            )
            .add_pass(
                PassDef::new("down", "uniform sampler2D src;\nuniform vec2 srcSize;\nuniform vec2 uTexelSize;\nvoid main() {}")
                    .with_input("src", "big.out")
                    .unwrap()
                    .with_output("out", rgba8(SizeSpec::Input { input: None, scale: Some(0.5) })),
            )
            .output(OutputRef::new("down", "out"))
            .build()
            .unwrap();
        let mut rt = runtime(graph);
        rt.render(0.0, 640, 480).unwrap();
        let down = &rt.backend().draws[1];
        assert_eq!(down.extent, Extent::new(50, 30));
        assert_eq!(down.uniform("srcSize"), Some(UniformData::Vec2([100.0, 60.0])));
        assert_eq!(down.uniform("uTexelSize"), Some(UniformData::Vec2([0.01, 1.0 / 60.0])));
        let snapshot = rt.debug_snapshot();
        assert_eq!(snapshot[1].inputs[0].source, "big.out");
        assert_eq!(snapshot[1].outputs[0].size, Extent::new(50, 30));
    }

    #[test]
    fn test_mistyped_builtin_is_skipped() {
        let src = "uniform vec3 uTime;\nuniform float uAspect;\nvoid main() {}";
        let graph = GraphBuilder::new()
            .add_pass(PassDef::new("p", src).with_output("out", rgba8(SizeSpec::Full)))
            .output(OutputRef::new("p", "out"))
            .build()
            .unwrap();
        let mut rt = runtime(graph);
        rt.render(0.0, 20, 10).unwrap();
        rt.render(0.0, 20, 10).unwrap();
        let draw = &rt.backend().draws[0];
        assert_eq!(draw.uniform("uTime"), None);
        assert_eq!(draw.uniform("uAspect"), Some(UniformData::Float(2.0)));
        assert_eq!(rt.warned.len(), 1);
    }

    #[test]
    fn test_custom_uniforms_and_set_uniform() {
        let src = "uniform vec3 uTint;\nvoid main() {}";
        let pass = PassDef::new("p", src)
            .with_output("out", rgba8(SizeSpec::Full))
            .with_uniform(
                "uTint",
                UniformSpec::new(UniformType::F3, UniformValue::Vector(vec![1.0, 0.5, 0.25])),
            );
        let graph = GraphBuilder::new()
            .add_pass(pass)
            .output(OutputRef::new("p", "out"))
            .build()
            .unwrap();
        let mut rt = runtime(graph);
        rt.render(0.0, 8, 8).unwrap();
        assert_eq!(
            rt.backend().draws[0].uniform("uTint"),
            Some(UniformData::Vec3([1.0, 0.5, 0.25]))
        );

        rt.set_uniform("p", "uTint", UniformValue::Vector(vec![0.0, 0.0, 1.0]))
            .unwrap();
        assert!(matches!(
            rt.set_uniform("p", "uTint", UniformValue::Scalar(1.0)),
            Err(RuntimeError::UniformArity { .. })
        ));
        assert!(matches!(
            rt.set_uniform("p", "uNope", UniformValue::Scalar(1.0)),
            Err(RuntimeError::UnknownUniform { .. })
        ));
        rt.render(0.1, 8, 8).unwrap();
        let last = rt.backend().draws.iter().rev().find(|d| d.label == "p").unwrap();
        assert_eq!(last.uniform("uTint"), Some(UniformData::Vec3([0.0, 0.0, 1.0])));
    }

    #[test]
    fn test_camera_uniforms_injected() {
        let src = "uniform vec3 uCameraPos;\nuniform float uCameraFov;\nvoid main() {}";
        let graph = GraphBuilder::new()
            .add_pass(PassDef::new("p", src).with_output("out", rgba8(SizeSpec::Full)))
            .output(OutputRef::new("p", "out"))
            .build()
            .unwrap();
        let mut rt = runtime(graph);
        let mut camera = CameraUniforms::default();
        camera.position = glam::Vec3::new(1.0, 2.0, 3.0);
        rt.set_camera(camera);
        rt.render(0.0, 8, 8).unwrap();
        let draw = &rt.backend().draws[0];
        assert_eq!(draw.uniform("uCameraPos"), Some(UniformData::Vec3([1.0, 2.0, 3.0])));
        assert_eq!(draw.uniform("uCameraFov"), Some(UniformData::Float(camera.fov)));
    }

    #[test]
    fn test_compile_errors_carry_file_names() {
        let graph = GraphBuilder::new()
            .add_pass(PassDef::new("p", "  \n").with_output("out", rgba8(SizeSpec::Full)))
            .output(OutputRef::new("p", "out"))
            .build()
            .unwrap();
        let result = GraphRuntime::new(NullBackend::new(), Arc::new(graph), HashMap::new(), RuntimeOptions::default());
        assert!(matches!(result, Err(RuntimeError::Backend(BackendError::Compile { .. }))));

        let err = with_source_urls(
            BackendError::Compile {
                label: "p".into(),
                log: "ERROR: 0:3: syntax error".into(),
            },
            "// @source 0 /shaders/p.glsl\n",
        );
        assert_eq!(
            err,
            BackendError::Compile {
                label: "p".into(),
                log: "ERROR: /shaders/p.glsl:3: syntax error".into()
            }
        );
    }

    #[test]
    fn test_missing_asset_rejected_up_front() {
        let graph = GraphBuilder::new()
            .add_pass(
                PassDef::new("p", SIMPLE)
                    .with_input("img", "$asset.photo")
                    .unwrap()
                    .with_output("out", rgba8(SizeSpec::Full)),
            )
            .output(OutputRef::new("p", "out"))
            .build()
            .unwrap();
        let result = GraphRuntime::new(NullBackend::new(), Arc::new(graph), HashMap::new(), RuntimeOptions::default());
        assert!(matches!(result, Err(RuntimeError::MissingAsset { .. })));
    }
}
