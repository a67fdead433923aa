// ============================================================================
// RenderFE CLI: headless batch effect processing
// ============================================================================
//
// Usage examples:
//   renderfe -i photo.png -e box-blur -p radius=6 -o blurred.png
//   renderfe -i "shots/*.jpg" -e pixelate --output-dir out/ --verbose
//   renderfe -i scan.png -e invert -r 10,10,200,150 -o out.png
//   renderfe -e add-noise -p amount=35 -p seed=7 --save-preset grain.rfp
//   renderfe -i photo.png --preset grain.rfp -o noisy.png
//
// Every file runs through the real tile engine: the target region is
// partitioned, tiles render across the worker pool, and progress arrives
// as completion events, exactly as the editor shell would drive it.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::mpsc::RecvTimeoutError;
use std::time::{Duration, Instant};

use clap::Parser;

use crate::effects::{
    load_preset, parse_params, save_preset, Effect, EffectParams, EffectPreset, EffectRegistry,
};
use crate::region::{Rect, Region};
use crate::renderer::{RenderEvent, TileRenderer};
use crate::surface::Surface;
use crate::tiles::default_tile_count;

// ============================================================================
// CLI argument definition (clap Derive)
// ============================================================================

/// RenderFE headless effect processor.
///
/// Apply tile-parallel effects to image files without an editor session.
#[derive(Parser, Debug)]
#[command(
    name = "renderfe",
    about = "RenderFE headless batch effect processor",
    long_about = "Apply tile-parallel effects to image files from the command line.\n\
                  Supports PNG, JPEG, WEBP, BMP, TGA and TIFF inputs.\n\n\
                  Example:\n  \
                  renderfe --input photo.png --effect box-blur --param radius=6 --output result.png\n  \
                  renderfe -i \"*.jpg\" -e pixelate --output-dir processed/"
)]
pub struct CliArgs {
    /// Input image file(s). Glob patterns accepted (e.g. "*.png", "shots/*.jpg").
    #[arg(short, long, num_args = 1..)]
    pub input: Vec<String>,

    /// Effect to apply (see --list-effects).
    #[arg(short, long, value_name = "NAME")]
    pub effect: Option<String>,

    /// Effect parameter as key=value.  May be repeated.
    #[arg(short, long, value_name = "KEY=VALUE")]
    pub param: Vec<String>,

    /// Target region "x,y,width,height".  May be repeated to build a
    /// multi-rectangle region.  Default: the full canvas.
    #[arg(short, long, value_name = "X,Y,W,H")]
    pub region: Vec<String>,

    /// Output file path.  Only valid for single-file input.
    /// For batch input use --output-dir instead.
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Output directory for batch processing.  Files are written with the
    /// original stem and extension.
    #[arg(long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Worker threads.  Default: the machine's available parallelism.
    #[arg(long, value_name = "N")]
    pub threads: Option<usize>,

    /// Tile count.  Default: 8 tiles per worker, capped at the image height.
    #[arg(long, value_name = "N")]
    pub tiles: Option<usize>,

    /// Load effect and parameters from a preset file.
    /// --effect and --param still override what the preset carries.
    #[arg(long, value_name = "FILE")]
    pub preset: Option<PathBuf>,

    /// Save the resolved effect and parameters to a preset file.
    /// With no inputs, saves the preset and exits.
    #[arg(long, value_name = "FILE")]
    pub save_preset: Option<PathBuf>,

    /// List the available effects and exit.
    #[arg(long)]
    pub list_effects: bool,

    /// Print per-file timing and per-tile progress.
    #[arg(short, long)]
    pub verbose: bool,
}

// ============================================================================
// Public entry point
// ============================================================================

/// Run all CLI processing and return an OS exit code.
/// `0` = all files succeeded, `1` = one or more files failed.
pub fn run(args: CliArgs) -> ExitCode {
    let registry = EffectRegistry::built_in();

    if args.list_effects {
        for name in registry.names() {
            println!("{}", name);
        }
        return ExitCode::SUCCESS;
    }

    // Resolve effect name + parameters: preset first, flags override.
    let preset = match &args.preset {
        Some(path) => match load_preset(path) {
            Ok(p) => Some(p),
            Err(e) => {
                eprintln!("error: could not load preset '{}': {}", path.display(), e);
                return ExitCode::FAILURE;
            }
        },
        None => None,
    };

    let effect_name = match args
        .effect
        .clone()
        .or_else(|| preset.as_ref().map(|p| p.effect.clone()))
    {
        Some(name) => name,
        None => {
            eprintln!("error: no effect given. Use --effect or --preset (see --list-effects).");
            return ExitCode::FAILURE;
        }
    };

    let Some(effect) = registry.create(&effect_name) else {
        eprintln!(
            "error: unknown effect '{}'. Available: {}",
            effect_name,
            registry.names().join(", ")
        );
        return ExitCode::FAILURE;
    };

    let mut params: EffectParams = preset.map(|p| p.params).unwrap_or_default();
    match parse_params(&args.param) {
        Ok(overrides) => params.extend(overrides),
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::FAILURE;
        }
    }

    // Validate the parameters once up front, before touching any files.
    if let Err(e) = effect.config_from_params(&params) {
        eprintln!("error: {}", e);
        return ExitCode::FAILURE;
    }

    if let Some(path) = &args.save_preset {
        let preset = EffectPreset {
            effect: effect_name.clone(),
            params: params.clone(),
        };
        if let Err(e) = save_preset(&preset, path) {
            eprintln!("error: could not save preset '{}': {}", path.display(), e);
            return ExitCode::FAILURE;
        }
        println!("saved preset {}", path.display());
        if args.input.is_empty() {
            return ExitCode::SUCCESS;
        }
    }

    // Resolve glob patterns / literal paths into concrete PathBufs.
    let inputs = resolve_inputs(&args.input);
    if inputs.is_empty() {
        eprintln!("error: no input files matched the given pattern(s).");
        return ExitCode::FAILURE;
    }

    // Multiple inputs require --output-dir, not --output.
    if inputs.len() > 1 && args.output.is_some() && args.output_dir.is_none() {
        eprintln!(
            "error: {} input files given but --output only accepts a single file path.\n\
             Use --output-dir to specify a destination directory for batch processing.",
            inputs.len()
        );
        return ExitCode::FAILURE;
    }

    if let Some(dir) = &args.output_dir
        && let Err(e) = std::fs::create_dir_all(dir)
    {
        eprintln!(
            "error: could not create output directory '{}': {}",
            dir.display(),
            e
        );
        return ExitCode::FAILURE;
    }

    let total = inputs.len();
    let multi = total > 1;
    let mut any_failure = false;
    let batch_start = Instant::now();

    for (idx, input_path) in inputs.iter().enumerate() {
        if multi || args.verbose {
            println!("[{}/{}] {}", idx + 1, total, input_path.display());
        }

        let output_path = match build_output_path(
            input_path,
            args.output.as_deref(),
            args.output_dir.as_deref(),
        ) {
            Some(p) => p,
            None => {
                eprintln!(
                    "  error: no output given for '{}'. Use --output or --output-dir.",
                    input_path.display()
                );
                any_failure = true;
                continue;
            }
        };

        match process_file(&args, effect.clone(), &params, input_path, &output_path) {
            Ok(()) => {
                if multi || args.verbose {
                    println!("  -> {}", output_path.display());
                }
            }
            Err(e) => {
                eprintln!("  error: {}", e);
                any_failure = true;
            }
        }
    }

    if multi || args.verbose {
        println!(
            "{} file(s) processed in {:.2}s",
            total,
            batch_start.elapsed().as_secs_f32()
        );
    }

    if any_failure {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

// ============================================================================
// Per-file pipeline
// ============================================================================

fn process_file(
    args: &CliArgs,
    effect: Arc<dyn Effect>,
    params: &EffectParams,
    input: &Path,
    output: &Path,
) -> Result<(), String> {
    let file_start = Instant::now();

    let img = image::open(input)
        .map_err(|e| format!("could not load '{}': {}", input.display(), e))?
        .to_rgba8();

    let src = Arc::new(Surface::from_rgba_image(&img));
    // The destination starts as a copy of the source so pixels outside the
    // target region keep their original values.
    let dst = Arc::new(Surface::from_rgba_image(&img));

    let target = build_target_region(&args.region, src.bounds())?;

    let threads = args.threads.unwrap_or_else(|| {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4)
    });
    let tiles = args
        .tiles
        .unwrap_or_else(|| default_tile_count(threads, img.height()));

    let config = effect.config_from_params(params)?;
    let mut renderer = TileRenderer::new(
        effect,
        config,
        dst.clone(),
        src,
        target,
        tiles,
        threads,
    )
    .map_err(|e| e.to_string())?;

    let rx = renderer.start().map_err(|e| e.to_string())?;

    // Drain completion events for live progress.  A faulted pass stops
    // producing events without a Finished, so fall back to polling the
    // pool and let join() report the outcome.
    loop {
        match rx.recv_timeout(Duration::from_millis(50)) {
            Ok(RenderEvent::TileRendered {
                tile_index,
                tile_count,
                ..
            }) => {
                if args.verbose {
                    println!("  tile {}/{} done", tile_index + 1, tile_count);
                }
            }
            Ok(RenderEvent::Finished { .. }) => break,
            Ok(RenderEvent::Starting { .. }) => {}
            Err(RecvTimeoutError::Timeout) => {
                if renderer.workers_idle() {
                    break;
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    renderer.join().map_err(|e| e.to_string())?;

    dst.to_rgba_image()
        .save(output)
        .map_err(|e| format!("could not save '{}': {}", output.display(), e))?;

    if args.verbose {
        println!(
            "  {} tiles rendered in {:.2}s",
            renderer.tile_count(),
            file_start.elapsed().as_secs_f32()
        );
    }
    Ok(())
}

// ============================================================================
// Helpers
// ============================================================================

/// Expand glob patterns and literal paths.  Patterns that match nothing
/// are reported but do not abort the batch.
fn resolve_inputs(patterns: &[String]) -> Vec<PathBuf> {
    let mut out = Vec::new();
    for pattern in patterns {
        if Path::new(pattern).exists() {
            out.push(PathBuf::from(pattern));
            continue;
        }
        match glob::glob(pattern) {
            Ok(paths) => {
                let mut matched = false;
                for entry in paths.flatten() {
                    matched = true;
                    out.push(entry);
                }
                if !matched {
                    eprintln!("warning: pattern '{}' matched no files", pattern);
                }
            }
            Err(e) => eprintln!("warning: bad pattern '{}': {}", pattern, e),
        }
    }
    out
}

/// Parse the repeated `--region x,y,w,h` flags into a region, defaulting
/// to the full canvas.
fn build_target_region(flags: &[String], canvas: Rect) -> Result<Region, String> {
    if flags.is_empty() {
        return Ok(Region::from_rect(canvas));
    }
    let mut rects = Vec::with_capacity(flags.len());
    for flag in flags {
        let parts: Vec<&str> = flag.split(',').map(str::trim).collect();
        if parts.len() != 4 {
            return Err(format!(
                "region '{}' is not in x,y,width,height form",
                flag
            ));
        }
        let mut vals = [0i32; 4];
        for (i, part) in parts.iter().enumerate() {
            vals[i] = part
                .parse()
                .map_err(|_| format!("region '{}' has a non-integer component", flag))?;
        }
        let rect = Rect::new(vals[0], vals[1], vals[2], vals[3]);
        if rect.is_empty() {
            return Err(format!("region '{}' is empty", flag));
        }
        rects.push(rect);
    }
    Ok(Region::from_rects(&rects))
}

fn build_output_path(
    input: &Path,
    output: Option<&Path>,
    output_dir: Option<&Path>,
) -> Option<PathBuf> {
    if let Some(out) = output {
        return Some(out.to_path_buf());
    }
    let dir = output_dir?;
    let name = input.file_name()?;
    Some(dir.join(name))
}

// ============================================================================
// Tests
// ============================================================================
