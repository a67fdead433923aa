// ============================================================================
// RenderFE: tile-parallel effect rendering engine
// ============================================================================
//
// The rendering core of a raster image editor.  An effect pass splits its
// target region into scanline-fair tiles, renders tile 0 synchronously
// for instant feedback, fans the rest out across a bounded worker pool,
// and streams completion events back to the caller.  Cancellation is
// cooperative; failures aggregate to a single error surfaced at join().

#![allow(dead_code)] // API surface kept for the editor shell and scripting hosts
#![allow(clippy::too_many_arguments)]

pub mod logger;

pub mod cli;
pub mod effects;
pub mod pool;
pub mod region;
pub mod renderer;
pub mod surface;
pub mod tiles;

pub use effects::{Effect, EffectConfig, EffectParams, EffectPreset, EffectRegistry};
pub use region::{Rect, Region};
pub use renderer::{CancelToken, PassState, RenderError, RenderEvent, TileRenderer};
pub use surface::Surface;
pub use tiles::{Tile, TILES_PER_WORKER, default_tile_count, split_region};
