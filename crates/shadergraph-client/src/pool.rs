//! Shape-bucketed free list of render-target textures.

use std::collections::HashMap;
use std::fmt;

use shadergraph_core::{Extent, TextureDesc, TextureFilter, TextureFormat};

use crate::backend::{BackendError, RenderBackend, TextureId};

/// Pool bucket key: `format:WxH:filter`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureKey {
    pub format: TextureFormat,
    pub width: u32,
    pub height: u32,
    pub filter: TextureFilter,
}

impl TextureKey {
    pub fn new(desc: &TextureDesc, extent: Extent) -> Self {
        Self {
            format: desc.format,
            width: extent.width,
            height: extent.height,
            filter: desc.filter,
        }
    }

    pub fn extent(&self) -> Extent {
        Extent::new(self.width, self.height)
    }
}

impl fmt::Display for TextureKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}x{}:{}", self.format, self.width, self.height, self.filter)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Acquisitions served from the free list.
    pub hits: u64,
    /// Acquisitions that had to create a texture.
    pub misses: u64,
    pub released: u64,
}

impl PoolStats {
    pub fn created(&self) -> u64 {
        self.misses
    }
}

#[derive(Debug, Default)]
pub struct TexturePool {
    free: HashMap<TextureKey, Vec<TextureId>>,
    stats: PoolStats,
}

impl TexturePool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Most recently released texture of this shape, or a new one.
    pub fn acquire<B: RenderBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        key: TextureKey,
        label: &str,
    ) -> Result<TextureId, BackendError> {
        if let Some(texture) = self.free.get_mut(&key).and_then(Vec::pop) {
            self.stats.hits += 1;
            return Ok(texture);
        }
        let texture = backend.create_texture(&key, label)?;
        self.stats.misses += 1;
        tracing::debug!("Pool miss for {} ({}), created {:?}", key, label, texture);
        Ok(texture)
    }

    pub fn release(&mut self, key: TextureKey, texture: TextureId) {
        self.stats.released += 1;
        self.free.entry(key).or_default().push(texture);
    }

    pub fn free_count(&self) -> usize {
        self.free.values().map(Vec::len).sum()
    }

    pub fn stats(&self) -> PoolStats {
        self.stats
    }

    /// Destroys every pooled texture.
    pub fn clear<B: RenderBackend + ?Sized>(&mut self, backend: &mut B) {
        for (_, textures) in self.free.drain() {
            for texture in textures {
                backend.destroy_texture(texture);
            }
        }
    }
}
