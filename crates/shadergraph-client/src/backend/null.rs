//! GPU-free backend that records what the runtime asks of it.

use std::collections::{HashMap, HashSet};

use shadergraph_core::Extent;

use super::{
    BackendError, DrawCall, ProgramDesc, ProgramId, ProgramInfo, RenderBackend, TextureBinding,
    TextureId, TextureUpload, UniformData,
};
use crate::glsl;
use crate::pool::TextureKey;

#[derive(Debug, Clone, PartialEq)]
pub struct DrawRecord {
    pub label: String,
    pub program: ProgramId,
    pub targets: Vec<TextureId>,
    pub extent: Extent,
    pub uniforms: Vec<(String, UniformData)>,
    pub textures: Vec<TextureBinding>,
}

impl DrawRecord {
    pub fn uniform(&self, name: &str) -> Option<UniformData> {
        self.uniforms.iter().find(|(n, _)| n == name).map(|(_, v)| *v)
    }

    pub fn texture(&self, uniform: &str) -> Option<TextureId> {
        self.textures.iter().find(|t| t.uniform == uniform).map(|t| t.texture)
    }
}

#[derive(Debug, Default)]
pub struct NullBackend {
    next_id: u64,
    textures: HashMap<TextureId, TextureKey>,
    programs: HashMap<ProgramId, String>,
    frame: Option<Extent>,
    pub draws: Vec<DrawRecord>,
    pub cleared: Vec<TextureId>,
    pub uploads: Vec<(TextureId, Extent)>,
    pub frames_completed: u64,
}

impl NullBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn live_textures(&self) -> usize {
        self.textures.len()
    }

    pub fn texture_key(&self, texture: TextureId) -> Option<TextureKey> {
        self.textures.get(&texture).copied()
    }

    pub fn program_label(&self, program: ProgramId) -> Option<&str> {
        self.programs.get(&program).map(String::as_str)
    }

    pub fn take_draws(&mut self) -> Vec<DrawRecord> {
        std::mem::take(&mut self.draws)
    }

    fn next(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

impl TextureUpload for NullBackend {
    fn upload_rgba8(&mut self, texture: TextureId, extent: Extent, pixels: &[u8]) -> Result<(), BackendError> {
        let key = self.textures.get(&texture).ok_or(BackendError::UnknownTexture(texture))?;
        if key.extent() != extent || pixels.len() != (extent.width * extent.height * 4) as usize {
            return Err(BackendError::Upload(format!(
                "{} bytes for {} into {}",
                pixels.len(),
                extent,
                key
            )));
        }
        self.uploads.push((texture, extent));
        Ok(())
    }
}

impl RenderBackend for NullBackend {
    fn compile_program(&mut self, desc: &ProgramDesc<'_>) -> Result<ProgramInfo, BackendError> {
        if desc.fragment.trim().is_empty() {
            return Err(BackendError::Compile {
                label: desc.label.to_string(),
                log: "ERROR: 0:1: empty shader source".to_string(),
            });
        }
        let id = ProgramId(self.next());
        self.programs.insert(id, desc.label.to_string());
        Ok(ProgramInfo {
            id,
            uniforms: glsl::scan_uniforms(desc.fragment),
        })
    }

    fn create_texture(&mut self, key: &TextureKey, _label: &str) -> Result<TextureId, BackendError> {
        let id = TextureId(self.next());
        self.textures.insert(id, *key);
        Ok(id)
    }

    fn destroy_texture(&mut self, texture: TextureId) {
        self.textures.remove(&texture);
    }

    fn clear_texture(&mut self, texture: TextureId) -> Result<(), BackendError> {
        if !self.textures.contains_key(&texture) {
            return Err(BackendError::UnknownTexture(texture));
        }
        self.cleared.push(texture);
        Ok(())
    }

    fn begin_frame(&mut self, extent: Extent) -> Result<(), BackendError> {
        if self.frame.is_some() {
            return Err(BackendError::Device("begin_frame called twice".to_string()));
        }
        self.frame = Some(extent);
        Ok(())
    }

    fn draw(&mut self, call: &DrawCall<'_>) -> Result<(), BackendError> {
        let frame = self
            .frame
            .ok_or_else(|| BackendError::Device("draw outside of a frame".to_string()))?;
        if !self.programs.contains_key(&call.program) {
            return Err(BackendError::UnknownProgram(call.program));
        }
        for target in call.targets {
            let key = self.textures.get(target).ok_or(BackendError::UnknownTexture(*target))?;
            if key.extent() != call.extent {
                return Err(BackendError::Device(format!(
                    "\"{}\" target {} does not match draw size {}",
                    call.label, key, call.extent
                )));
            }
        }
        if call.targets.is_empty() && call.extent != frame {
            return Err(BackendError::Device(format!(
                "\"{}\" frame draw at {} during a {} frame",
                call.label, call.extent, frame
            )));
        }
        let written: HashSet<TextureId> = call.targets.iter().copied().collect();
        for binding in call.textures {
            if !self.textures.contains_key(&binding.texture) {
                return Err(BackendError::UnknownTexture(binding.texture));
            }
            if written.contains(&binding.texture) {
                return Err(BackendError::Device(format!(
                    "\"{}\" samples {:?} while rendering to it",
                    call.label, binding.texture
                )));
            }
        }
        self.draws.push(DrawRecord {
            label: call.label.to_string(),
            program: call.program,
            targets: call.targets.to_vec(),
            extent: call.extent,
            uniforms: call.uniforms.to_vec(),
            textures: call.textures.to_vec(),
        });
        Ok(())
    }

    fn end_frame(&mut self) -> Result<(), BackendError> {
        if self.frame.take().is_none() {
            return Err(BackendError::Device("end_frame without begin_frame".to_string()));
        }
        self.frames_completed += 1;
        Ok(())
    }
}
