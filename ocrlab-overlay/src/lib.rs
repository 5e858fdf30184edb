use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use png::{BitDepth, ColorType, Encoder};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, warn};

use ocrlab_core::{OverlayKind, Page, PageImage, PageProvider};

pub const OVERLAY_CACHE_DIR: &str = "_overlay_cache";

const HASH_PREFIX_LEN: usize = 1024;

/// Content hash for a pixel buffer, hex encoded.
///
/// Only the first 1024 bytes participate: buffers that agree on that prefix
/// share one cache entry even if they differ later.
pub fn content_hash(pixels: &[u8]) -> String {
    let prefix = &pixels[..pixels.len().min(HASH_PREFIX_LEN)];
    hex::encode(Sha256::digest(prefix))
}

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("pixel buffer is empty")]
    EmptyBuffer,
    #[error("pixel buffer does not match {width}x{height} RGBA dimensions")]
    DimensionMismatch { width: u32, height: u32 },
    #[error(transparent)]
    Png(#[from] png::EncodingError),
}

/// Pixel buffer to compressed bytes. Absence of an encoder is a tolerated,
/// not fatal, condition; callers pass `Option<&dyn PixelEncoder>`.
pub trait PixelEncoder: Send + Sync {
    fn encode(&self, image: &PageImage) -> Result<Vec<u8>, EncodeError>;
}

pub struct PngPixelEncoder;

impl PixelEncoder for PngPixelEncoder {
    fn encode(&self, image: &PageImage) -> Result<Vec<u8>, EncodeError> {
        if image.width == 0 || image.height == 0 || image.pixels.is_empty() {
            return Err(EncodeError::EmptyBuffer);
        }
        let expected = image.width as usize * image.height as usize * 4;
        if image.pixels.len() != expected {
            return Err(EncodeError::DimensionMismatch {
                width: image.width,
                height: image.height,
            });
        }

        let mut buffer = Vec::new();
        let mut encoder = Encoder::new(&mut buffer, image.width, image.height);
        encoder.set_color(ColorType::Rgba);
        encoder.set_depth(BitDepth::Eight);
        let mut writer = encoder.write_header()?;
        writer.write_image_data(&image.pixels)?;
        writer.finish()?;
        Ok(buffer)
    }
}

/// An encoded overlay ready for display: embedded data or a cached file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OverlaySource {
    DataUri(String),
    File(PathBuf),
}

/// Content-addressed overlay store under `<project_root>/_overlay_cache/`.
pub struct OverlayCache {
    root: PathBuf,
}

impl OverlayCache {
    pub fn new(project_root: &Path) -> Self {
        Self {
            root: project_root.join(OVERLAY_CACHE_DIR),
        }
    }

    pub fn entry_path(&self, hash: &str) -> PathBuf {
        self.root.join(format!("{hash}.png"))
    }

    /// Resolve an encoded representation for `image`.
    ///
    /// Inline data-URI encoding is tried first, the content-addressed file
    /// store second. `None` means no artifact could be produced; the caller
    /// hides the image rather than failing.
    pub fn resolve(
        &self,
        image: &PageImage,
        encoder: Option<&dyn PixelEncoder>,
    ) -> Option<OverlaySource> {
        if let Some(encoder) = encoder {
            match encoder.encode(image) {
                Ok(bytes) => {
                    return Some(OverlaySource::DataUri(format!(
                        "data:image/png;base64,{}",
                        BASE64.encode(&bytes)
                    )));
                }
                Err(err) => {
                    debug!("inline encode failed, trying file cache: {err}");
                }
            }
        }
        self.resolve_on_disk(image, encoder)
    }

    /// File-store tier: reuse `<hash>.png` if present, else encode and write.
    ///
    /// Writers racing on the same hash overwrite each other with identical
    /// bytes, so no locking is taken.
    pub fn resolve_on_disk(
        &self,
        image: &PageImage,
        encoder: Option<&dyn PixelEncoder>,
    ) -> Option<OverlaySource> {
        let hash = content_hash(&image.pixels);
        let path = self.entry_path(&hash);
        if path.exists() {
            debug!(path = %path.display(), "reusing cached overlay file");
            return Some(OverlaySource::File(path));
        }

        let encoder = encoder?;
        let bytes = match encoder.encode(image) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!("overlay encode failed: {err}");
                return None;
            }
        };
        if let Err(err) = fs::create_dir_all(&self.root) {
            warn!(dir = %self.root.display(), "failed to create overlay cache dir: {err}");
            return None;
        }
        if let Err(err) = fs::write(&path, &bytes) {
            warn!(path = %path.display(), "failed to write overlay cache file: {err}");
            return None;
        }
        debug!(path = %path.display(), "cached overlay file");
        Some(OverlaySource::File(path))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum OverlaySlot {
    #[default]
    Empty,
    Encoding,
    Ready(OverlaySource),
}

impl OverlaySlot {
    pub fn source(&self) -> Option<&OverlaySource> {
        match self {
            OverlaySlot::Ready(source) => Some(source),
            OverlaySlot::Empty | OverlaySlot::Encoding => None,
        }
    }

    pub fn is_visible(&self) -> bool {
        matches!(self, OverlaySlot::Ready(_))
    }
}

/// One slot per display target, refreshed from the current page's imagery.
pub struct OverlayPanel {
    cache: OverlayCache,
    slots: HashMap<OverlayKind, OverlaySlot>,
}

impl OverlayPanel {
    pub fn new(cache: OverlayCache) -> Self {
        let slots = OverlayKind::ALL
            .iter()
            .map(|kind| (*kind, OverlaySlot::Empty))
            .collect();
        Self { cache, slots }
    }

    pub fn slot(&self, kind: OverlayKind) -> &OverlaySlot {
        self.slots.get(&kind).unwrap_or(&OverlaySlot::Empty)
    }

    /// Refresh every display target from `page`.
    ///
    /// The provider's `refresh_page_images` hook runs first, best-effort;
    /// a failing hook leaves the previous buffers in place. Every call
    /// re-runs the full lookup/encode sequence; no staleness is tracked.
    pub fn update(
        &mut self,
        provider: &dyn PageProvider,
        page: Option<&mut Page>,
        encoder: Option<&dyn PixelEncoder>,
    ) {
        let Some(page) = page else {
            for slot in self.slots.values_mut() {
                *slot = OverlaySlot::Empty;
            }
            return;
        };

        if let Err(err) = provider.refresh_page_images(page) {
            warn!(page = %page.name, "failed to refresh page images: {err}");
        }

        for (kind, slot) in self.slots.iter_mut() {
            match page.image(*kind) {
                None => *slot = OverlaySlot::Empty,
                Some(image) => {
                    *slot = OverlaySlot::Encoding;
                    *slot = match self.cache.resolve(image, encoder) {
                        Some(source) => OverlaySlot::Ready(source),
                        None => OverlaySlot::Empty,
                    };
                }
            }
        }
    }
}
