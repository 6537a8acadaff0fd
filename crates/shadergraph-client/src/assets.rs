//! Externally owned textures referenced as `$asset.<name>`.
//!
//! Images are decoded once with the `image` crate. Videos are fed by a
//! caller-supplied [`VideoDecoder`]; the runtime calls [`Asset::update`]
//! once per frame for every asset that frame reads.

use std::collections::HashMap;

use shadergraph_core::{Extent, TextureFilter, TextureFormat};

use crate::backend::{BackendError, RenderBackend, TextureId, TextureUpload};
use crate::pool::TextureKey;
use crate::project::{AssetKind, AssetSpec, LoadError, Project};
use crate::resolver::{resolve_url, BytesResolver};

pub trait Asset {
    fn texture(&self) -> TextureId;

    fn size(&self) -> Extent;

    /// Refreshes the texture contents. Static assets do nothing.
    fn update(&mut self, _uploader: &mut dyn TextureUpload) -> Result<(), BackendError> {
        Ok(())
    }
}

/// Tightly packed RGBA8 pixels, top row first.
#[derive(Debug, Clone, PartialEq)]
pub struct RgbaFrame {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl RgbaFrame {
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> Self {
        Self {
            width,
            height,
            pixels,
        }
    }

    pub fn solid(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let pixels = rgba.repeat((width * height) as usize);
        Self::new(width, height, pixels)
    }

    pub fn extent(&self) -> Extent {
        Extent::new(self.width, self.height)
    }

    /// Reverses row order in place.
    pub fn flip_rows(&mut self) {
        let stride = self.width as usize * 4;
        let rows = self.height as usize;
        for y in 0..rows / 2 {
            let (top, bottom) = self.pixels.split_at_mut((rows - 1 - y) * stride);
            top[y * stride..(y + 1) * stride].swap_with_slice(&mut bottom[..stride]);
        }
    }
}

fn create_texture<B: RenderBackend + ?Sized>(
    backend: &mut B,
    name: &str,
    extent: Extent,
    filter: TextureFilter,
) -> Result<TextureId, BackendError> {
    let key = TextureKey {
        format: TextureFormat::Rgba8,
        width: extent.width.max(1),
        height: extent.height.max(1),
        filter,
    };
    backend.create_texture(&key, &format!("asset {}", name))
}

// ---------------------------------------------------------------------------
// Images
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct ImageAsset {
    texture: TextureId,
    size: Extent,
}

impl ImageAsset {
    /// Decodes `bytes` (any format `image` understands) and uploads it.
    pub fn from_bytes<B: RenderBackend + ?Sized>(
        backend: &mut B,
        name: &str,
        spec: &AssetSpec,
        bytes: &[u8],
    ) -> Result<Self, LoadError> {
        let decoded = image::load_from_memory(bytes).map_err(|e| LoadError::Asset {
            name: name.to_string(),
            message: e.to_string(),
        })?;
        let rgba = decoded.to_rgba8();
        let mut frame = RgbaFrame::new(rgba.width(), rgba.height(), rgba.into_raw());
        if frame.width == 0 || frame.height == 0 {
            return Err(LoadError::Asset {
                name: name.to_string(),
                message: "image has no pixels".to_string(),
            });
        }
        if spec.flip_y.unwrap_or(false) {
            frame.flip_rows();
        }
        Self::from_frame(backend, name, spec.filter(), &frame).map_err(|e| LoadError::Asset {
            name: name.to_string(),
            message: e.to_string(),
        })
    }

    pub fn from_frame<B: RenderBackend + ?Sized>(
        backend: &mut B,
        name: &str,
        filter: TextureFilter,
        frame: &RgbaFrame,
    ) -> Result<Self, BackendError> {
        let size = frame.extent();
        let texture = create_texture(backend, name, size, filter)?;
        backend.upload_rgba8(texture, size, &frame.pixels)?;
        tracing::debug!("Uploaded image asset \"{}\" ({})", name, size);
        Ok(Self { texture, size })
    }
}

impl Asset for ImageAsset {
    fn texture(&self) -> TextureId {
        self.texture
    }

    fn size(&self) -> Extent {
        self.size
    }
}

// ---------------------------------------------------------------------------
// Video
// ---------------------------------------------------------------------------

/// Source of video frames. Decoding itself is left to the embedder.
pub trait VideoDecoder {
    fn size(&self) -> Extent;

    /// The frame to show now, or `None` when nothing new is ready.
    fn next_frame(&mut self) -> Option<RgbaFrame>;
}

/// Opens a decoder for a video asset at `url`.
pub trait VideoOpener {
    fn open(&self, url: &str, spec: &AssetSpec) -> Result<Box<dyn VideoDecoder>, String>;
}

/// Pre-decoded frames played one per update.
#[derive(Debug, Clone)]
pub struct FrameSequence {
    frames: Vec<RgbaFrame>,
    next: usize,
    looping: bool,
}

impl FrameSequence {
    pub fn new(frames: Vec<RgbaFrame>, looping: bool) -> Self {
        Self {
            frames,
            next: 0,
            looping,
        }
    }
}

impl VideoDecoder for FrameSequence {
    fn size(&self) -> Extent {
        self.frames.first().map_or(Extent::new(1, 1), RgbaFrame::extent)
    }

    fn next_frame(&mut self) -> Option<RgbaFrame> {
        if self.next >= self.frames.len() {
            if !self.looping || self.frames.is_empty() {
                return None;
            }
            self.next = 0;
        }
        let frame = self.frames[self.next].clone();
        self.next += 1;
        Some(frame)
    }
}

pub struct VideoAsset {
    name: String,
    texture: TextureId,
    size: Extent,
    flip_y: bool,
    decoder: Box<dyn VideoDecoder>,
    frames_uploaded: u64,
}

impl VideoAsset {
    pub fn new<B: RenderBackend>(
        backend: &mut B,
        name: &str,
        spec: &AssetSpec,
        decoder: Box<dyn VideoDecoder>,
    ) -> Result<Self, BackendError> {
        let size = decoder.size();
        let texture = create_texture(backend, name, size, spec.filter())?;
        let mut asset = Self {
            name: name.to_string(),
            texture,
            size,
            flip_y: spec.flip_y.unwrap_or(false),
            decoder,
            frames_uploaded: 0,
        };
        asset.update(backend)?;
        Ok(asset)
    }

    pub fn frames_uploaded(&self) -> u64 {
        self.frames_uploaded
    }
}

impl Asset for VideoAsset {
    fn texture(&self) -> TextureId {
        self.texture
    }

    fn size(&self) -> Extent {
        self.size
    }

    fn update(&mut self, uploader: &mut dyn TextureUpload) -> Result<(), BackendError> {
        let Some(mut frame) = self.decoder.next_frame() else {
            return Ok(());
        };
        if frame.extent() != self.size {
            tracing::warn!(
                "Video \"{}\" produced a {} frame for a {} texture; skipping it",
                self.name,
                frame.extent(),
                self.size
            );
            return Ok(());
        }
        if self.flip_y {
            frame.flip_rows();
        }
        uploader.upload_rgba8(self.texture, self.size, &frame.pixels)?;
        self.frames_uploaded += 1;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

pub type AssetMap = HashMap<String, Box<dyn Asset>>;

/// Loads every asset the project declares. Video assets need `videos`.
pub async fn load_assets<B, R>(
    backend: &mut B,
    project: &Project,
    resolver: &R,
    videos: Option<&dyn VideoOpener>,
) -> Result<AssetMap, LoadError>
where
    B: RenderBackend,
    R: BytesResolver + ?Sized,
{
    let mut assets: AssetMap = HashMap::new();
    for (name, spec) in &project.assets {
        let url = resolve_url(&project.base_url, &spec.url);
        let asset_error = |message: String| LoadError::Asset {
            name: name.clone(),
            message,
        };
        let asset: Box<dyn Asset> = match spec.kind {
            AssetKind::Image => {
                let bytes = resolver
                    .resolve_bytes(&url)
                    .await
                    .map_err(|e| asset_error(e.to_string()))?;
                Box::new(ImageAsset::from_bytes(backend, name, spec, &bytes)?)
            }
            AssetKind::Video => {
                let opener = videos.ok_or_else(|| asset_error("no video decoder configured".to_string()))?;
                let decoder = opener.open(&url, spec).map_err(asset_error)?;
                Box::new(VideoAsset::new(backend, name, spec, decoder).map_err(|e| asset_error(e.to_string()))?)
            }
        };
        assets.insert(name.clone(), asset);
    }
    tracing::info!("Loaded {} assets", assets.len());
    Ok(assets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::NullBackend;
    use crate::resolver::MemoryResolver;
    use std::io::Cursor;

    fn png(width: u32, height: u32) -> Vec<u8> {
        let img = image::RgbaImage::from_fn(width, height, |x, y| image::Rgba([x as u8, y as u8, 0, 255]));
        let mut bytes = Vec::new();
        img.write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png).unwrap();
        bytes
    }

    fn spec(kind: AssetKind) -> AssetSpec {
        AssetSpec {
            kind,
            url: "x".into(),
            filter: Some(TextureFilter::Nearest),
            flip_y: Some(true),
            looping: None,
            muted: None,
            autoplay: None,
            plays_inline: None,
            lut_size: None,
        }
    }

    #[test]
    fn test_flip_rows() {
        let mut frame = RgbaFrame::new(1, 3, vec![1, 1, 1, 1, 2, 2, 2, 2, 3, 3, 3, 3]);
        frame.flip_rows();
        assert_eq!(frame.pixels, vec![3, 3, 3, 3, 2, 2, 2, 2, 1, 1, 1, 1]);
    }

    #[test]
    fn test_image_asset_uploads_decoded_pixels() {
        let mut backend = NullBackend::new();
        let asset = ImageAsset::from_bytes(&mut backend, "photo", &spec(AssetKind::Image), &png(4, 2)).unwrap();
        assert_eq!(asset.size(), Extent::new(4, 2));
        assert_eq!(backend.uploads, vec![(asset.texture(), Extent::new(4, 2))]);
        assert_eq!(backend.texture_key(asset.texture()).unwrap().filter, TextureFilter::Nearest);

        let err = ImageAsset::from_bytes(&mut backend, "bad", &spec(AssetKind::Image), b"nope").unwrap_err();
        assert!(matches!(err, LoadError::Asset { name, .. } if name == "bad"));
    }

    #[test]
    fn test_video_uploads_each_new_frame() {
        let mut backend = NullBackend::new();
        let frames = vec![RgbaFrame::solid(2, 2, [255, 0, 0, 255]), RgbaFrame::solid(2, 2, [0, 255, 0, 255])];
        let decoder = Box::new(FrameSequence::new(frames, false));
        let mut video = VideoAsset::new(&mut backend, "clip", &spec(AssetKind::Video), decoder).unwrap();
        assert_eq!(video.frames_uploaded(), 1);
        video.update(&mut backend).unwrap();
        video.update(&mut backend).unwrap();
        assert_eq!(video.frames_uploaded(), 2);
        assert_eq!(backend.uploads.len(), 2);
    }

    struct Sequences;

    impl VideoOpener for Sequences {
        fn open(&self, _url: &str, spec: &AssetSpec) -> Result<Box<dyn VideoDecoder>, String> {
            let frames = vec![RgbaFrame::solid(3, 1, [0; 4])];
            Ok(Box::new(FrameSequence::new(frames, spec.looping.unwrap_or(true))))
        }
    }

    #[test]
    fn test_load_assets_resolves_against_project_url() {
        let project = Project {
            base_url: "/p/project.json".into(),
            shaders: Default::default(),
            components: Default::default(),
            assets: [
                ("photo".to_string(), AssetSpec { url: "img/a.png".into(), ..spec(AssetKind::Image) }),
                ("clip".to_string(), AssetSpec { url: "v.mp4".into(), ..spec(AssetKind::Video) }),
            ]
            .into_iter()
            .collect(),
            graphs: Default::default(),
        };
        let resolver = MemoryResolver::new().with("/p/img/a.png", png(2, 2));
        let mut backend = NullBackend::new();
        let assets =
            pollster::block_on(load_assets(&mut backend, &project, &resolver, Some(&Sequences))).unwrap();
        assert_eq!(assets["photo"].size(), Extent::new(2, 2));
        assert_eq!(assets["clip"].size(), Extent::new(3, 1));

        let Err(err) = pollster::block_on(load_assets(&mut NullBackend::new(), &project, &resolver, None)) else {
            panic!("video asset without an opener should fail");
        };
        assert!(matches!(err, LoadError::Asset { name, .. } if name == "clip"));
    }
}
