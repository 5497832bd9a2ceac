use std::any::Any;

use tracing::warn;

/// A drawable surface whose ownership can be handed to the worker context.
///
/// Once a surface has been placed in a handoff message the controlling side no
/// longer holds it; the worker receives the boxed value and may downcast it to
/// the concrete type its renderer understands.
pub trait OffscreenSurface: Send + 'static {
    fn size(&self) -> (u32, u32);

    fn resize(&mut self, width: u32, height: u32);

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// CPU-backed RGBA8 surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelSurface {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl PixelSurface {
    /// Sizes past the surface limit produce an empty 0x0 surface.
    pub fn new(width: u32, height: u32) -> Self {
        let mut surface = Self {
            width: 0,
            height: 0,
            pixels: Vec::new(),
        };
        surface.resize(width, height);
        surface
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn pixels_mut(&mut self) -> &mut [u8] {
        &mut self.pixels
    }

    /// Fills every pixel with one RGBA colour.
    pub fn clear(&mut self, rgba: [u8; 4]) {
        for chunk in self.pixels.chunks_exact_mut(4) {
            chunk.copy_from_slice(&rgba);
        }
    }
}

impl OffscreenSurface for PixelSurface {
    fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn resize(&mut self, width: u32, height: u32) {
        let Some(len) = rgba_len(width, height) else {
            warn!(target: "surface", width, height, "refusing oversized surface");
            return;
        };
        self.width = width;
        self.height = height;
        self.pixels.resize(len, 0);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Largest RGBA buffer a surface or video stream may hold (16384 x 16384).
pub(crate) const MAX_RGBA_LEN: usize = 4 * 16384 * 16384;

/// Byte length of a `width` x `height` RGBA8 image, or `None` when it would
/// overflow or exceed [`MAX_RGBA_LEN`].
pub(crate) fn rgba_len(width: u32, height: u32) -> Option<usize> {
    4usize
        .checked_mul(width as usize)?
        .checked_mul(height as usize)
        .filter(|len| *len <= MAX_RGBA_LEN)
}
