//! Level-of-detail selection
//!
//! Maps projected on-screen size to a desired discard level: every discard
//! level quarters the texel count, so the level is `log4(texels / pixels)`.

use super::fetched::FetchedTexture;
use super::record::TextureCore;
use super::types::MAX_DISCARD_LEVEL;

/// Below this many pixels² a non-boosted texture is not worth more than its
/// coarsest level
const MIN_VIRTUAL_SIZE: f32 = 10.0;

/// Per-tick inputs to the LOD step
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LodParams {
    /// Texels wanted per on-screen pixel
    pub texel_ratio: f32,
    /// Relative change in virtual size needed before the level is recomputed
    pub hysteresis: f32,
    /// Global discard bias from the budget ledger
    pub discard_bias: f32,
}

impl Default for LodParams {
    fn default() -> Self {
        Self {
            texel_ratio: 1.0,
            hysteresis: 0.2,
            discard_bias: 0.0,
        }
    }
}

/// Hysteresis state for one LOD texture
#[derive(Debug, Clone, Default)]
pub struct LodController {
    texels_per_image: f32,
    /// Virtual size the cached level was computed for
    discard_virtual_size: f32,
    calculated_discard: Option<f32>,
}

impl LodController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn texels_per_image(&self) -> f32 {
        self.texels_per_image
    }

    /// Forget the cached level, e.g. after an identity reset
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn process_texture_stats(&mut self, core: &TextureCore, fetch: &mut FetchedTexture, params: &LodParams) {
        let max_discard = core.max_discard_level();
        let desired = if !core.has_dimensions() {
            MAX_DISCARD_LEVEL
        } else if core.is_dont_discard() {
            0
        } else if let Some((w, h)) = fetch.known_draw_size() {
            discard_for_draw_size(core.full_width(), core.full_height(), w, h)
        } else {
            self.discard_for_virtual_size(core, params, max_discard)
        };
        fetch.set_desired_discard_level(desired);
    }

    fn discard_for_virtual_size(&mut self, core: &TextureCore, params: &LodParams, max_discard: u8) -> u8 {
        let boost = core.boost_level();
        let virtual_size = core.max_virtual_size();
        if !boost.is_high() && virtual_size <= MIN_VIRTUAL_SIZE {
            return max_discard;
        }

        self.texels_per_image = core.full_width() as f32 * core.full_height() as f32;
        let level = match self.calculated_discard {
            Some(previous) if (virtual_size - self.discard_virtual_size).abs() < params.hysteresis * virtual_size => {
                previous
            }
            _ => {
                let pixels = virtual_size.max(1.0) * params.texel_ratio.max(f32::EPSILON);
                let level = (self.texels_per_image / pixels).ln() / 4f32.ln();
                self.discard_virtual_size = virtual_size;
                self.calculated_discard = Some(level);
                level
            }
        };

        let biased = if boost.is_high() { level } else { level + params.discard_bias };
        biased.floor().clamp(0.0, max_discard as f32) as u8
    }
}

/// Desired level for a plain fetched texture: full resolution once the size is
/// known, unless a draw size says a coarser level is enough
pub fn process_fixed_stats(core: &TextureCore, fetch: &mut FetchedTexture) {
    let desired = if !core.has_dimensions() {
        MAX_DISCARD_LEVEL
    } else if core.is_dont_discard() {
        0
    } else if let Some((w, h)) = fetch.known_draw_size() {
        discard_for_draw_size(core.full_width(), core.full_height(), w, h)
    } else {
        0
    };
    fetch.set_desired_discard_level(desired);
}

/// Coarsest level whose dimensions still cover the draw size
pub fn discard_for_draw_size(full_width: u32, full_height: u32, draw_width: u32, draw_height: u32) -> u8 {
    let max_discard = super::types::max_discard_for(full_width, full_height);
    let mut discard = 0u8;
    while discard < max_discard
        && (full_width >> (discard + 1)) >= draw_width
        && (full_height >> (discard + 1)) >= draw_height
    {
        discard += 1;
    }
    discard
}
