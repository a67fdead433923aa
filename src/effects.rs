// ============================================================================
// EFFECTS: transform callbacks, config tokens, registry, presets
// ============================================================================
//
// An effect is the pixel transform a render pass applies tile by tile.
// The engine treats it as an opaque callback with a fixed contract:
//
//   render(config, destination, source, rectangles, cancel)
//
//   * writes only inside the union of `rectangles` on `destination`;
//   * may read ANY pixel of `source` (the pass freezes the source, so
//     cross-tile reads are race-free);
//   * must tolerate concurrent invocation from multiple threads, given
//     that each invocation receives a distinct config clone and a
//     disjoint rectangle set;
//   * a cancellable effect checks `cancel` periodically and bails out
//     with an error the orchestrator recognises as a clean stop.
//
// Config tokens are cloneable value objects.  Each worker thread gets its
// own clone at dispatch time and may scribble on scratch fields freely;
// no worker ever observes another's mutations.
//
// Effects are looked up through an explicit name registry; there is no
// runtime type discovery.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::region::Rect;
use crate::renderer::CancelToken;
use crate::surface::Surface;

// ============================================================================
// Config tokens
// ============================================================================

/// Opaque, cloneable effect configuration.  Every tile invocation within a
/// pass sees the same values; workers own independent clones so scratch
/// mutation stays thread-local.
pub trait EffectConfig: Any + Send + fmt::Debug {
    fn clone_token(&self) -> Box<dyn EffectConfig>;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Downcast a config token to the concrete type an effect expects.
fn expect_config<'a, T: 'static>(
    effect: &str,
    config: &'a mut dyn EffectConfig,
) -> Result<&'a mut T, String> {
    config
        .as_any_mut()
        .downcast_mut::<T>()
        .ok_or_else(|| format!("{}: wrong config token type", effect))
}

macro_rules! impl_effect_config {
    ($ty:ty) => {
        impl EffectConfig for $ty {
            fn clone_token(&self) -> Box<dyn EffectConfig> {
                Box::new(self.clone())
            }
            fn as_any(&self) -> &dyn Any {
                self
            }
            fn as_any_mut(&mut self) -> &mut dyn Any {
                self
            }
        }
    };
}

// ============================================================================
// Effect trait
// ============================================================================

pub trait Effect: Send + Sync {
    /// Stable registry name.
    fn name(&self) -> &'static str;

    /// When true, the orchestrator forces a single worker thread no matter
    /// what the caller asked for.  A correctness override for effects whose
    /// kernels cannot run concurrently.
    fn single_threaded(&self) -> bool {
        false
    }

    /// When true, the effect promises to poll the cancel token mid-tile,
    /// so an abort does not have to wait for whole tiles to finish.
    fn cancellable(&self) -> bool {
        false
    }

    fn default_config(&self) -> Box<dyn EffectConfig>;

    /// Build a config token from `name=value` parameters (CLI / presets).
    /// Unknown keys are an error so typos do not silently no-op.
    fn config_from_params(&self, params: &EffectParams) -> Result<Box<dyn EffectConfig>, String>;

    /// Apply the transform to `rects` of `dst`, reading from `src`.
    fn render(
        &self,
        config: &mut dyn EffectConfig,
        dst: &Surface,
        src: &Surface,
        rects: &[Rect],
        cancel: &CancelToken,
    ) -> Result<(), String>;
}

// ============================================================================
// Parameters & presets
// ============================================================================

/// Flat `name -> value` effect parameters.  BTreeMap keeps serialization
/// and error listings deterministic.  Booleans are encoded as 0 / 1.
pub type EffectParams = BTreeMap<String, f32>;

/// Parse `key=value` strings (the CLI's repeated `--param` flag).
pub fn parse_params(args: &[String]) -> Result<EffectParams, String> {
    let mut params = EffectParams::new();
    for arg in args {
        let Some((key, value)) = arg.split_once('=') else {
            return Err(format!("parameter '{}' is not in key=value form", arg));
        };
        let value: f32 = value
            .trim()
            .parse()
            .map_err(|_| format!("parameter '{}' has a non-numeric value", arg))?;
        params.insert(key.trim().to_string(), value);
    }
    Ok(params)
}

fn param(params: &EffectParams, key: &str, default: f32) -> f32 {
    params.get(key).copied().unwrap_or(default)
}

fn reject_unknown_keys(effect: &str, params: &EffectParams, known: &[&str]) -> Result<(), String> {
    for key in params.keys() {
        if !known.contains(&key.as_str()) {
            return Err(format!(
                "{}: unknown parameter '{}' (expected one of: {})",
                effect,
                key,
                known.join(", ")
            ));
        }
    }
    Ok(())
}

/// A saved effect invocation: name plus parameters.  Serialized with
/// bincode into small preset files.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct EffectPreset {
    pub effect: String,
    pub params: EffectParams,
}

#[derive(Debug)]
pub enum PresetError {
    Io(std::io::Error),
    Serialize(String),
}

impl fmt::Display for PresetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PresetError::Io(e) => write!(f, "I/O error: {}", e),
            PresetError::Serialize(e) => write!(f, "Serialization error: {}", e),
        }
    }
}

impl From<std::io::Error> for PresetError {
    fn from(e: std::io::Error) -> Self {
        PresetError::Io(e)
    }
}

impl From<Box<bincode::ErrorKind>> for PresetError {
    fn from(e: Box<bincode::ErrorKind>) -> Self {
        PresetError::Serialize(e.to_string())
    }
}

pub fn save_preset(preset: &EffectPreset, path: &Path) -> Result<(), PresetError> {
    let bytes = bincode::serialize(preset)?;
    std::fs::write(path, bytes)?;
    Ok(())
}

pub fn load_preset(path: &Path) -> Result<EffectPreset, PresetError> {
    let bytes = std::fs::read(path)?;
    Ok(bincode::deserialize(&bytes)?)
}

// ============================================================================
// Registry
// ============================================================================

/// Explicit name -> constructor table for the built-in effects.
pub struct EffectRegistry {
    entries: Vec<(&'static str, fn() -> Arc<dyn Effect>)>,
}

impl EffectRegistry {
    pub fn built_in() -> Self {
        EffectRegistry {
            entries: vec![
                ("invert", || Arc::new(Invert)),
                ("desaturate", || Arc::new(Desaturate)),
                ("brightness-contrast", || Arc::new(BrightnessContrast)),
                ("pixelate", || Arc::new(Pixelate)),
                ("box-blur", || Arc::new(BoxBlur)),
                ("add-noise", || Arc::new(AddNoise)),
            ],
        }
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.entries.iter().map(|(name, _)| *name).collect()
    }

    pub fn create(&self, name: &str) -> Option<Arc<dyn Effect>> {
        self.entries
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, make)| make())
    }
}

// ============================================================================
// Shared kernels
// ============================================================================

#[inline]
fn to_u8(v: f32) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}

/// Run a per-pixel transform over `rects`: read from `src`, write the
/// result row by row into `dst`.  The closure gets coordinates plus the
/// source pixel as f32 RGBA in 0..255.
fn render_per_pixel(
    dst: &Surface,
    src: &Surface,
    rects: &[Rect],
    mut transform: impl FnMut(i32, i32, [f32; 4]) -> [f32; 4],
) {
    let mut row: Vec<u8> = Vec::new();
    for rect in rects {
        for y in rect.y..rect.bottom() {
            row.clear();
            for x in rect.x..rect.right() {
                let px = src.pixel(x, y);
                let out = transform(
                    x,
                    y,
                    [px[0] as f32, px[1] as f32, px[2] as f32, px[3] as f32],
                );
                row.extend_from_slice(&[to_u8(out[0]), to_u8(out[1]), to_u8(out[2]), to_u8(out[3])]);
            }
            dst.write_span(rect.x, y, &row);
        }
    }
}

fn hash_u32(mut x: u32) -> u32 {
    x = x.wrapping_mul(0x9E3779B9);
    x ^= x >> 16;
    x = x.wrapping_mul(0x85EBCA6B);
    x ^= x >> 13;
    x = x.wrapping_mul(0xC2B2AE35);
    x ^= x >> 16;
    x
}

/// Hash to f32 in [0, 1).
fn hash_f32(x: u32, y: u32, seed: u32) -> f32 {
    let h = hash_u32(
        x.wrapping_mul(374761393)
            .wrapping_add(y.wrapping_mul(668265263))
            .wrapping_add(seed),
    );
    (h & 0x00FF_FFFF) as f32 / 16_777_216.0
}

// ============================================================================
// ADJUSTMENT EFFECTS
// ============================================================================

// --- Invert ---

#[derive(Clone, Debug)]
pub struct InvertConfig {
    /// Also invert the alpha channel.
    pub invert_alpha: bool,
}
impl_effect_config!(InvertConfig);

pub struct Invert;

impl Effect for Invert {
    fn name(&self) -> &'static str {
        "invert"
    }

    fn default_config(&self) -> Box<dyn EffectConfig> {
        Box::new(InvertConfig {
            invert_alpha: false,
        })
    }

    fn config_from_params(&self, params: &EffectParams) -> Result<Box<dyn EffectConfig>, String> {
        reject_unknown_keys(self.name(), params, &["invert_alpha"])?;
        Ok(Box::new(InvertConfig {
            invert_alpha: param(params, "invert_alpha", 0.0) != 0.0,
        }))
    }

    fn render(
        &self,
        config: &mut dyn EffectConfig,
        dst: &Surface,
        src: &Surface,
        rects: &[Rect],
        _cancel: &CancelToken,
    ) -> Result<(), String> {
        let cfg = expect_config::<InvertConfig>(self.name(), config)?;
        let invert_alpha = cfg.invert_alpha;
        render_per_pixel(dst, src, rects, |_x, _y, [r, g, b, a]| {
            let a = if invert_alpha { 255.0 - a } else { a };
            [255.0 - r, 255.0 - g, 255.0 - b, a]
        });
        Ok(())
    }
}

// --- Desaturate (BT.709 luminance) ---

#[derive(Clone, Debug)]
pub struct DesaturateConfig;
impl_effect_config!(DesaturateConfig);

pub struct Desaturate;

impl Effect for Desaturate {
    fn name(&self) -> &'static str {
        "desaturate"
    }

    fn default_config(&self) -> Box<dyn EffectConfig> {
        Box::new(DesaturateConfig)
    }

    fn config_from_params(&self, params: &EffectParams) -> Result<Box<dyn EffectConfig>, String> {
        reject_unknown_keys(self.name(), params, &[])?;
        Ok(Box::new(DesaturateConfig))
    }

    fn render(
        &self,
        config: &mut dyn EffectConfig,
        dst: &Surface,
        src: &Surface,
        rects: &[Rect],
        _cancel: &CancelToken,
    ) -> Result<(), String> {
        expect_config::<DesaturateConfig>(self.name(), config)?;
        render_per_pixel(dst, src, rects, |_x, _y, [r, g, b, a]| {
            let lum = 0.2126 * r + 0.7152 * g + 0.0722 * b;
            [lum, lum, lum, a]
        });
        Ok(())
    }
}

// --- Brightness / Contrast ---

#[derive(Clone, Debug)]
pub struct BrightnessContrastConfig {
    /// -255 .. 255
    pub brightness: f32,
    /// -255 .. 255
    pub contrast: f32,
}
impl_effect_config!(BrightnessContrastConfig);

pub struct BrightnessContrast;

impl Effect for BrightnessContrast {
    fn name(&self) -> &'static str {
        "brightness-contrast"
    }

    fn default_config(&self) -> Box<dyn EffectConfig> {
        Box::new(BrightnessContrastConfig {
            brightness: 0.0,
            contrast: 0.0,
        })
    }

    fn config_from_params(&self, params: &EffectParams) -> Result<Box<dyn EffectConfig>, String> {
        reject_unknown_keys(self.name(), params, &["brightness", "contrast"])?;
        Ok(Box::new(BrightnessContrastConfig {
            brightness: param(params, "brightness", 0.0).clamp(-255.0, 255.0),
            contrast: param(params, "contrast", 0.0).clamp(-255.0, 255.0),
        }))
    }

    fn render(
        &self,
        config: &mut dyn EffectConfig,
        dst: &Surface,
        src: &Surface,
        rects: &[Rect],
        _cancel: &CancelToken,
    ) -> Result<(), String> {
        let cfg = expect_config::<BrightnessContrastConfig>(self.name(), config)?;
        let brightness = cfg.brightness;
        let factor = (259.0 * (cfg.contrast + 255.0)) / (255.0 * (259.0 - cfg.contrast));
        render_per_pixel(dst, src, rects, |_x, _y, [r, g, b, a]| {
            [
                factor * (r + brightness - 128.0) + 128.0,
                factor * (g + brightness - 128.0) + 128.0,
                factor * (b + brightness - 128.0) + 128.0,
                a,
            ]
        });
        Ok(())
    }
}

// ============================================================================
// DISTORT EFFECTS
// ============================================================================

// --- Pixelate ---

#[derive(Clone, Debug)]
pub struct PixelateConfig {
    pub block_size: u32,
}
impl_effect_config!(PixelateConfig);

pub struct Pixelate;

impl Effect for Pixelate {
    fn name(&self) -> &'static str {
        "pixelate"
    }

    fn default_config(&self) -> Box<dyn EffectConfig> {
        Box::new(PixelateConfig { block_size: 8 })
    }

    fn config_from_params(&self, params: &EffectParams) -> Result<Box<dyn EffectConfig>, String> {
        reject_unknown_keys(self.name(), params, &["block_size"])?;
        Ok(Box::new(PixelateConfig {
            block_size: param(params, "block_size", 8.0).max(2.0) as u32,
        }))
    }

    fn render(
        &self,
        config: &mut dyn EffectConfig,
        dst: &Surface,
        src: &Surface,
        rects: &[Rect],
        _cancel: &CancelToken,
    ) -> Result<(), String> {
        let cfg = expect_config::<PixelateConfig>(self.name(), config)?;
        let bs = cfg.block_size.max(2) as i32;
        // Blocks are anchored at the canvas origin, not the rect origin, so
        // the block grid lines up across tile boundaries.
        render_per_pixel(dst, src, rects, |x, y, _px| {
            let sx = (x.div_euclid(bs)) * bs + bs / 2;
            let sy = (y.div_euclid(bs)) * bs + bs / 2;
            let s = src.pixel_clamped(sx, sy);
            [s[0] as f32, s[1] as f32, s[2] as f32, s[3] as f32]
        });
        Ok(())
    }
}

// ============================================================================
// BLUR EFFECTS
// ============================================================================

// --- Box Blur ---

#[derive(Clone, Debug)]
pub struct BoxBlurConfig {
    pub radius: f32,
}
impl_effect_config!(BoxBlurConfig);

pub struct BoxBlur;

impl Effect for BoxBlur {
    fn name(&self) -> &'static str {
        "box-blur"
    }

    /// Blur tiles are slow enough that waiting a whole tile to abort feels
    /// sticky; the kernel polls the token between rows instead.
    fn cancellable(&self) -> bool {
        true
    }

    fn default_config(&self) -> Box<dyn EffectConfig> {
        Box::new(BoxBlurConfig { radius: 3.0 })
    }

    fn config_from_params(&self, params: &EffectParams) -> Result<Box<dyn EffectConfig>, String> {
        reject_unknown_keys(self.name(), params, &["radius"])?;
        Ok(Box::new(BoxBlurConfig {
            radius: param(params, "radius", 3.0).clamp(0.0, 100.0),
        }))
    }

    fn render(
        &self,
        config: &mut dyn EffectConfig,
        dst: &Surface,
        src: &Surface,
        rects: &[Rect],
        cancel: &CancelToken,
    ) -> Result<(), String> {
        let cfg = expect_config::<BoxBlurConfig>(self.name(), config)?;
        if cfg.radius < 0.5 {
            // Below half a pixel the kernel is the identity; just copy.
            render_per_pixel(dst, src, rects, |_x, _y, px| px);
            return Ok(());
        }
        let r = cfg.radius.ceil() as i32;
        let kernel = (2 * r + 1) as f32;
        let inv = 1.0 / (kernel * kernel);

        let mut row: Vec<u8> = Vec::new();
        for rect in rects {
            for y in rect.y..rect.bottom() {
                if cancel.is_cancelled() {
                    return Err("operation cancelled".to_string());
                }
                row.clear();
                for x in rect.x..rect.right() {
                    let mut sums = [0.0f32; 4];
                    for ky in -r..=r {
                        for kx in -r..=r {
                            // Edge pixels clamp outward, same as the rest of
                            // the blur family.
                            let s = src.pixel_clamped(x + kx, y + ky);
                            for c in 0..4 {
                                sums[c] += s[c] as f32;
                            }
                        }
                    }
                    row.extend_from_slice(&[
                        to_u8(sums[0] * inv),
                        to_u8(sums[1] * inv),
                        to_u8(sums[2] * inv),
                        to_u8(sums[3] * inv),
                    ]);
                }
                dst.write_span(rect.x, y, &row);
            }
        }
        Ok(())
    }
}

// ============================================================================
// NOISE EFFECTS
// ============================================================================

// --- Add Noise ---

#[derive(Clone, Debug)]
pub struct AddNoiseConfig {
    /// Noise strength, 0..100.
    pub amount: f32,
    /// Same offset on all three channels.
    pub monochrome: bool,
    pub seed: u32,
    /// Scratch: pixels touched by this worker's clone.  Demonstrates why
    /// workers get independent token clones.
    pub pixels_touched: u64,
}
impl_effect_config!(AddNoiseConfig);

pub struct AddNoise;

impl Effect for AddNoise {
    fn name(&self) -> &'static str {
        "add-noise"
    }

    fn default_config(&self) -> Box<dyn EffectConfig> {
        Box::new(AddNoiseConfig {
            amount: 20.0,
            monochrome: false,
            seed: 0,
            pixels_touched: 0,
        })
    }

    fn config_from_params(&self, params: &EffectParams) -> Result<Box<dyn EffectConfig>, String> {
        reject_unknown_keys(self.name(), params, &["amount", "monochrome", "seed"])?;
        Ok(Box::new(AddNoiseConfig {
            amount: param(params, "amount", 20.0).clamp(0.0, 100.0),
            monochrome: param(params, "monochrome", 0.0) != 0.0,
            seed: param(params, "seed", 0.0).max(0.0) as u32,
            pixels_touched: 0,
        }))
    }

    fn render(
        &self,
        config: &mut dyn EffectConfig,
        dst: &Surface,
        src: &Surface,
        rects: &[Rect],
        _cancel: &CancelToken,
    ) -> Result<(), String> {
        let cfg = expect_config::<AddNoiseConfig>(self.name(), config)?;
        let strength = cfg.amount * 255.0 / 100.0;
        let seed = cfg.seed;
        let monochrome = cfg.monochrome;
        let mut touched = 0u64;
        // Noise is keyed on absolute pixel coordinates, so the output is
        // identical no matter how the region was tiled.
        render_per_pixel(dst, src, rects, |x, y, [r, g, b, a]| {
            touched += 1;
            let (ux, uy) = (x as u32, y as u32);
            if monochrome {
                let n = (hash_f32(ux, uy, seed) * 2.0 - 1.0) * strength;
                [r + n, g + n, b + n, a]
            } else {
                let nr = (hash_f32(ux, uy, seed) * 2.0 - 1.0) * strength;
                let ng = (hash_f32(ux, uy, seed.wrapping_add(1)) * 2.0 - 1.0) * strength;
                let nb = (hash_f32(ux, uy, seed.wrapping_add(2)) * 2.0 - 1.0) * strength;
                [r + nr, g + ng, b + nb, a]
            }
        });
        cfg.pixels_touched += touched;
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn flat_surface(w: u32, h: u32, px: Rgba<u8>) -> Surface {
        let s = Surface::new(w, h);
        for y in 0..h as i32 {
            for x in 0..w as i32 {
                s.set_pixel(x, y, px);
            }
        }
        s
    }

    fn full_rects(s: &Surface) -> Vec<Rect> {
        vec![s.bounds()]
    }

    #[test]
    fn registry_creates_every_built_in_by_name() {
        let registry = EffectRegistry::built_in();
        for name in registry.names() {
            let effect = registry.create(name).expect("registered effect");
            assert_eq!(effect.name(), name);
        }
        assert!(registry.create("no-such-effect").is_none());
    }

    #[test]
    fn invert_flips_channels_but_not_alpha_by_default() {
        let src = flat_surface(4, 4, Rgba([10, 20, 30, 200]));
        let dst = Surface::new(4, 4);
        let effect = Invert;
        let mut cfg = effect.default_config();
        effect
            .render(cfg.as_mut(), &dst, &src, &full_rects(&src), &CancelToken::new())
            .unwrap();
        assert_eq!(dst.pixel(2, 2), Rgba([245, 235, 225, 200]));
    }

    #[test]
    fn desaturate_uses_bt709_luminance() {
        let src = flat_surface(2, 2, Rgba([255, 0, 0, 255]));
        let dst = Surface::new(2, 2);
        let effect = Desaturate;
        let mut cfg = effect.default_config();
        effect
            .render(cfg.as_mut(), &dst, &src, &full_rects(&src), &CancelToken::new())
            .unwrap();
        // 0.2126 * 255 = 54.2
        assert_eq!(dst.pixel(0, 0), Rgba([54, 54, 54, 255]));
    }

    #[test]
    fn zero_brightness_contrast_is_identity() {
        let src = flat_surface(3, 3, Rgba([77, 128, 200, 255]));
        let dst = Surface::new(3, 3);
        let effect = BrightnessContrast;
        let mut cfg = effect.default_config();
        effect
            .render(cfg.as_mut(), &dst, &src, &full_rects(&src), &CancelToken::new())
            .unwrap();
        assert_eq!(dst.pixel(1, 1), Rgba([77, 128, 200, 255]));
    }

    #[test]
    fn brightness_shifts_all_channels() {
        let src = flat_surface(2, 2, Rgba([100, 100, 100, 255]));
        let dst = Surface::new(2, 2);
        let effect = BrightnessContrast;
        let mut cfg = effect
            .config_from_params(&parse_params(&["brightness=50".to_string()]).unwrap())
            .unwrap();
        effect
            .render(cfg.as_mut(), &dst, &src, &full_rects(&src), &CancelToken::new())
            .unwrap();
        assert_eq!(dst.pixel(0, 0), Rgba([150, 150, 150, 255]));
    }

    #[test]
    fn pixelate_output_is_independent_of_tiling() {
        // Gradient source so blocks actually differ.
        let src = Surface::new(16, 16);
        for y in 0..16 {
            for x in 0..16 {
                src.set_pixel(x, y, Rgba([(x * 16) as u8, (y * 16) as u8, 0, 255]));
            }
        }
        let effect = Pixelate;

        let whole = Surface::new(16, 16);
        let mut cfg = effect.default_config();
        effect
            .render(cfg.as_mut(), &whole, &src, &[src.bounds()], &CancelToken::new())
            .unwrap();

        let tiled = Surface::new(16, 16);
        let mut cfg = effect.default_config();
        // Split mid-block on both axes.
        let rects = [
            Rect::new(0, 0, 16, 5),
            Rect::new(0, 5, 16, 6),
            Rect::new(0, 11, 16, 5),
        ];
        for r in &rects {
            effect
                .render(cfg.as_mut(), &tiled, &src, &[*r], &CancelToken::new())
                .unwrap();
        }
        assert_eq!(whole.to_rgba_image(), tiled.to_rgba_image());
    }

    #[test]
    fn box_blur_keeps_uniform_images_uniform() {
        let src = flat_surface(8, 8, Rgba([60, 120, 180, 255]));
        let dst = Surface::new(8, 8);
        let effect = BoxBlur;
        let mut cfg = effect.default_config();
        effect
            .render(cfg.as_mut(), &dst, &src, &full_rects(&src), &CancelToken::new())
            .unwrap();
        assert_eq!(dst.pixel(4, 4), Rgba([60, 120, 180, 255]));
        assert_eq!(dst.pixel(0, 0), Rgba([60, 120, 180, 255]));
    }

    #[test]
    fn box_blur_honours_a_cancelled_token() {
        let src = flat_surface(8, 8, Rgba([1, 2, 3, 255]));
        let dst = Surface::new(8, 8);
        let effect = BoxBlur;
        let mut cfg = effect.default_config();
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = effect
            .render(cfg.as_mut(), &dst, &src, &full_rects(&src), &cancel)
            .unwrap_err();
        assert!(err.contains("cancelled"));
    }

    #[test]
    fn noise_is_deterministic_per_seed_and_scratch_accumulates() {
        let src = flat_surface(8, 8, Rgba([128, 128, 128, 255]));
        let effect = AddNoise;
        let params = parse_params(&["seed=7".to_string(), "amount=40".to_string()]).unwrap();

        let a = Surface::new(8, 8);
        let mut cfg_a = effect.config_from_params(&params).unwrap();
        effect
            .render(cfg_a.as_mut(), &a, &src, &full_rects(&src), &CancelToken::new())
            .unwrap();

        let b = Surface::new(8, 8);
        let mut cfg_b = effect.config_from_params(&params).unwrap();
        effect
            .render(cfg_b.as_mut(), &b, &src, &full_rects(&src), &CancelToken::new())
            .unwrap();

        assert_eq!(a.to_rgba_image(), b.to_rgba_image());

        let scratch = cfg_a
            .as_any()
            .downcast_ref::<AddNoiseConfig>()
            .unwrap()
            .pixels_touched;
        assert_eq!(scratch, 64);

        // A different seed must actually change the output.
        let c = Surface::new(8, 8);
        let mut cfg_c = effect
            .config_from_params(&parse_params(&["seed=8".to_string(), "amount=40".to_string()]).unwrap())
            .unwrap();
        effect
            .render(cfg_c.as_mut(), &c, &src, &full_rects(&src), &CancelToken::new())
            .unwrap();
        assert_ne!(a.to_rgba_image(), c.to_rgba_image());
    }

    #[test]
    fn params_parse_and_reject_garbage() {
        let params = parse_params(&["radius=3.5".to_string()]).unwrap();
        assert_eq!(params.get("radius"), Some(&3.5));
        assert!(parse_params(&["radius".to_string()]).is_err());
        assert!(parse_params(&["radius=abc".to_string()]).is_err());
    }

    #[test]
    fn unknown_parameter_keys_are_rejected() {
        let effect = BoxBlur;
        let params = parse_params(&["radios=3".to_string()]).unwrap();
        let err = effect.config_from_params(&params).unwrap_err();
        assert!(err.contains("radios"));
    }

    #[test]
    fn preset_round_trips_through_bincode() {
        let preset = EffectPreset {
            effect: "box-blur".to_string(),
            params: parse_params(&["radius=4".to_string()]).unwrap(),
        };
        let path = std::env::temp_dir().join("renderfe_preset_test.rfp");
        save_preset(&preset, &path).unwrap();
        let loaded = load_preset(&path).unwrap();
        let _ = std::fs::remove_file(&path);
        assert_eq!(loaded, preset);
    }

    #[test]
    fn config_clone_is_independent() {
        let effect = AddNoise;
        let mut original = effect.default_config();
        let mut clone = original.clone_token();
        {
            let cfg = clone
                .as_any_mut()
                .downcast_mut::<AddNoiseConfig>()
                .unwrap();
            cfg.pixels_touched = 999;
        }
        let orig = original
            .as_any_mut()
            .downcast_mut::<AddNoiseConfig>()
            .unwrap();
        assert_eq!(orig.pixels_touched, 0);
    }
}
