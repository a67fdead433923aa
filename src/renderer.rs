// ============================================================================
// RENDER ORCHESTRATOR: tile-parallel effect passes
// ============================================================================
//
// A `TileRenderer` runs one effect over one target region as a "pass":
//
//   start()  -> freeze the source, split the region into tiles, render
//               tile 0 synchronously on the calling thread, hand the
//               remaining tiles to the worker pool round-robin, return
//               the pass's event receiver;
//   abort()  -> set the cooperative cancel flag and wait for the pool to
//               go idle;
//   join()   -> wait for the pool, then surface the pass outcome: Ok for
//               success or cancellation, Err for the first recorded
//               rendering failure.
//
// Completion flows back two ways at once: a `TileRendered` event per tile
// in completion order (drives live preview invalidation), and a
// write-once per-tile region slot readable at any time by a polling
// consumer.  Tile 0 always completes first because it never leaves the
// caller's thread; everything after that races freely.
//
// Dispatch is static round-robin (worker w takes tiles w+1, w+1+W, ...):
// no shared queue, no per-tile coordination, at the price of minor load
// imbalance.  Workers fail fast individually: the first error a worker
// hits stops that worker, is recorded if no earlier error exists, and
// everything else already in flight is left to finish.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, OnceLock};

use uuid::Uuid;

use crate::effects::{Effect, EffectConfig};
use crate::pool::WorkerPool;
use crate::region::Region;
use crate::surface::Surface;
use crate::tiles::{Tile, split_region};

// ============================================================================
// Events, errors, cancellation
// ============================================================================

/// Lifecycle notifications delivered over the pass's mpsc channel.
/// `TileRendered` arrives in completion order, which for every tile past
/// tile 0 is not index order.
#[derive(Clone, Debug)]
pub enum RenderEvent {
    /// Sent once, before any tile renders.
    Starting { pass_id: Uuid, tile_count: usize },
    /// Sent once per completed tile.
    TileRendered {
        tile_index: usize,
        region: Region,
        tile_count: usize,
    },
    /// Sent once, after the last tile of a successful pass.
    Finished { pass_id: Uuid },
}

#[derive(Clone, Debug)]
pub enum RenderError {
    /// Invalid construction or pass setup; surfaced before any thread runs.
    Setup(String),
    /// The effect failed.  `inline` distinguishes the synchronous tile 0
    /// phase from the pooled worker phase.
    Render { inline: bool, message: String },
    /// Recognised clean-stop marker.  `join()` maps this to `Ok`.
    Cancelled,
}

impl std::fmt::Display for RenderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RenderError::Setup(msg) => write!(f, "render setup failed: {}", msg),
            RenderError::Render { inline: true, message } => {
                write!(f, "effect failed on the inline tile: {}", message)
            }
            RenderError::Render { inline: false, message } => {
                write!(f, "effect failed on a worker tile: {}", message)
            }
            RenderError::Cancelled => write!(f, "rendering was cancelled"),
        }
    }
}

impl std::error::Error for RenderError {}

/// Shared cooperative-cancellation flag.  One token serves both the
/// between-tile check in the worker loop and the mid-tile polling of
/// cancellable effects.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        CancelToken {
            flag: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

/// Pass lifecycle.  `Finished`, `Aborted` and `Faulted` are terminal for
/// the pass; a fresh `start()` begins a new one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PassState {
    Idle,
    Rendering,
    Finished,
    Aborted,
    Faulted,
}

// ============================================================================
// Pass-scoped shared state
// ============================================================================

/// Everything the workers of one pass share.  Pass-scoped by design: no
/// state here outlives the pass, so two passes can never bleed into each
/// other through ambient globals.
struct PassShared {
    pass_id: Uuid,
    tiles: Vec<Tile>,
    tile_count: usize,
    cancel: CancelToken,
    /// Write-once completion slots, indexed by tile.  A published slot is
    /// never mutated again, so polling readers need no lock.
    completed: Vec<OnceLock<Region>>,
    completed_count: AtomicUsize,
    /// First recorded outcome wins; later ones are logged and dropped.
    first_error: Mutex<Option<RenderError>>,
    events: Sender<RenderEvent>,
}

impl PassShared {
    /// Publish tile completion: slot first, then the event, then (from
    /// whichever worker lands last) the terminal `Finished` event.
    fn publish_tile(&self, index: usize) {
        let region = self.tiles[index].region.clone();
        if self.completed[index].set(region.clone()).is_err() {
            crate::log_warn!(
                "pass {}: tile {} published twice, ignoring",
                self.pass_id,
                index
            );
            return;
        }
        let done = self.completed_count.fetch_add(1, Ordering::AcqRel) + 1;
        let _ = self.events.send(RenderEvent::TileRendered {
            tile_index: index,
            region,
            tile_count: self.tile_count,
        });
        if done == self.tile_count {
            let _ = self.events.send(RenderEvent::Finished {
                pass_id: self.pass_id,
            });
        }
    }

    fn record_outcome(&self, outcome: RenderError) {
        let mut slot = self.first_error.lock().unwrap();
        match &*slot {
            None => *slot = Some(outcome),
            Some(_) => {
                if !matches!(outcome, RenderError::Cancelled) {
                    crate::log_warn!(
                        "pass {}: discarding later error: {}",
                        self.pass_id,
                        outcome
                    );
                }
            }
        }
    }
}

// ============================================================================
// TileRenderer
// ============================================================================

pub struct TileRenderer {
    effect: Arc<dyn Effect>,
    config: Box<dyn EffectConfig>,
    dst: Arc<Surface>,
    src: Arc<Surface>,
    target: Region,
    tile_count: usize,
    worker_threads: usize,
    pool: WorkerPool,
    shared: Option<Arc<PassShared>>,
    state: PassState,
    source_frozen: bool,
}

impl TileRenderer {
    /// Build a renderer for one effect invocation.
    ///
    /// An effect that declares itself single-threaded gets exactly one
    /// worker regardless of `worker_threads`; that is a correctness
    /// override, not a tuning decision, which is why it lives here and
    /// not with the caller.
    pub fn new(
        effect: Arc<dyn Effect>,
        config: Box<dyn EffectConfig>,
        dst: Arc<Surface>,
        src: Arc<Surface>,
        target: Region,
        tile_count: usize,
        worker_threads: usize,
    ) -> Result<Self, RenderError> {
        if tile_count == 0 {
            return Err(RenderError::Setup("tile count must be at least 1".into()));
        }
        if worker_threads == 0 {
            return Err(RenderError::Setup(
                "worker thread count must be at least 1".into(),
            ));
        }
        let worker_threads = if effect.single_threaded() {
            1
        } else {
            worker_threads
        };
        let pool = WorkerPool::new(worker_threads).map_err(RenderError::Setup)?;
        Ok(TileRenderer {
            effect,
            config,
            dst,
            src,
            target,
            tile_count,
            worker_threads,
            pool,
            shared: None,
            state: PassState::Idle,
            source_frozen: false,
        })
    }

    pub fn state(&self) -> PassState {
        self.state
    }

    pub fn tile_count(&self) -> usize {
        self.tile_count
    }

    pub fn worker_threads(&self) -> usize {
        self.worker_threads
    }

    pub fn pass_id(&self) -> Option<Uuid> {
        self.shared.as_ref().map(|s| s.pass_id)
    }

    /// (completed tiles, total tiles) for the current pass.
    pub fn progress(&self) -> (usize, usize) {
        match &self.shared {
            Some(s) => (s.completed_count.load(Ordering::Acquire), s.tile_count),
            None => (0, self.tile_count),
        }
    }

    /// Published completion region for a tile, or None while it is still
    /// in flight.  Lock-free: published slots never change.
    pub fn completed_region(&self, tile_index: usize) -> Option<Region> {
        self.shared
            .as_ref()
            .and_then(|s| s.completed.get(tile_index))
            .and_then(|slot| slot.get())
            .cloned()
    }

    /// True when no submitted worker is still running.
    pub fn workers_idle(&self) -> bool {
        self.pool.is_idle()
    }

    /// Begin a pass.  Asynchronous: returns as soon as tile 0 has rendered
    /// and the remaining tiles are submitted.  If a pass is already
    /// rendering it is aborted and joined first.
    ///
    /// The returned receiver delivers this pass's lifecycle events; the
    /// `Starting` event and tile 0's `TileRendered` are already queued on
    /// it when `start()` returns.
    pub fn start(&mut self) -> Result<Receiver<RenderEvent>, RenderError> {
        if self.state == PassState::Rendering {
            self.abort();
        }

        let pass_id = Uuid::new_v4();
        // Pass-level config copy; workers clone again at dispatch time.
        let pass_config = self.config.clone_token();

        // Freeze the source: workers read it from many threads, so nothing
        // else may mutate it until the pass settles.
        self.src.set_writable(false);
        self.source_frozen = true;

        let target = self.target.intersect_rect(&self.dst.bounds());
        let tiles = split_region(&target, self.tile_count, self.dst.bounds());

        let (tx, rx) = mpsc::channel();
        let shared = Arc::new(PassShared {
            pass_id,
            tiles,
            tile_count: self.tile_count,
            cancel: CancelToken::new(),
            completed: (0..self.tile_count).map(|_| OnceLock::new()).collect(),
            completed_count: AtomicUsize::new(0),
            first_error: Mutex::new(None),
            events: tx,
        });

        let _ = shared.events.send(RenderEvent::Starting {
            pass_id,
            tile_count: self.tile_count,
        });
        crate::log_info!(
            "pass {} starting: effect '{}', {} tiles, {} workers, {} px",
            pass_id,
            self.effect.name(),
            self.tile_count,
            self.worker_threads,
            target.area()
        );

        // Tile 0 renders synchronously on the calling thread: the caller
        // always sees some output quickly, and configuration errors surface
        // here, before any worker thread exists.
        let mut inline_config = pass_config.clone_token();
        let tile0 = &shared.tiles[0];
        if !tile0.region.is_empty() {
            if let Err(message) = self.effect.render(
                inline_config.as_mut(),
                &self.dst,
                &self.src,
                tile0.region.rects(),
                &shared.cancel,
            ) {
                self.src.set_writable(true);
                self.source_frozen = false;
                self.state = PassState::Faulted;
                // No workers were spawned; there is no pass left to join.
                self.shared = None;
                crate::log_err!("pass {} failed on the inline tile: {}", pass_id, message);
                return Err(RenderError::Render {
                    inline: true,
                    message,
                });
            }
        }
        shared.publish_tile(0);

        // Static round-robin: worker w owns tiles w+1, w+1+W, w+1+2W, ...
        for worker in 0..self.worker_threads {
            let shared = shared.clone();
            let effect = self.effect.clone();
            let dst = self.dst.clone();
            let src = self.src.clone();
            let mut config = pass_config.clone_token();
            let stride = self.worker_threads;
            self.pool.submit(move || {
                worker_loop(
                    worker,
                    stride,
                    effect.as_ref(),
                    config.as_mut(),
                    &dst,
                    &src,
                    &shared,
                );
            });
        }

        self.shared = Some(shared);
        self.state = PassState::Rendering;
        Ok(rx)
    }

    /// Request cancellation and wait until every in-flight worker has
    /// observed it and the pool is idle.  No-op on a settled pass.
    ///
    /// The flag doubles as the mid-tile token that effects declaring
    /// `cancellable()` poll, so those stop without finishing their
    /// current tile; everything else stops at the next tile boundary.
    pub fn abort(&mut self) {
        let Some(shared) = self.shared.clone() else {
            return;
        };
        if self.state != PassState::Rendering {
            return;
        }
        crate::log_info!("pass {} abort requested", shared.pass_id);
        shared.cancel.cancel();
        self.pool.drain();
        self.restore_source();

        // If every tile already landed before anyone saw the flag, the pass
        // simply finished.
        let done = shared.completed_count.load(Ordering::Acquire);
        let errored = shared.first_error.lock().unwrap().is_some();
        self.state = if done == shared.tile_count && !errored {
            PassState::Finished
        } else {
            PassState::Aborted
        };
    }

    /// Block until the pool drains, then report the pass outcome.
    /// Cancellation is a clean stop, not an error.  Safe to call more than
    /// once; the outcome is stable until the next `start()`.
    pub fn join(&mut self) -> Result<(), RenderError> {
        let Some(shared) = self.shared.clone() else {
            return Ok(());
        };
        self.pool.drain();
        self.restore_source();

        // A panic that escaped the effect counts as a rendering failure,
        // unless a real outcome was already recorded.
        for message in self.pool.take_panics() {
            shared.record_outcome(RenderError::Render {
                inline: false,
                message: format!("worker panicked: {}", message),
            });
        }

        let outcome = shared.first_error.lock().unwrap().clone();
        match outcome {
            None => {
                self.state = PassState::Finished;
                crate::log_info!("pass {} finished", shared.pass_id);
                Ok(())
            }
            Some(RenderError::Cancelled) => {
                self.state = PassState::Aborted;
                crate::log_info!("pass {} aborted", shared.pass_id);
                Ok(())
            }
            Some(err) => {
                self.state = PassState::Faulted;
                crate::log_err!("pass {} faulted: {}", shared.pass_id, err);
                Err(err)
            }
        }
    }

    /// Source writability is restored exactly once per pass, whatever the
    /// outcome.  Failures here cannot mask the primary result (the flag
    /// store is infallible by construction).
    fn restore_source(&mut self) {
        if self.source_frozen {
            self.src.set_writable(true);
            self.source_frozen = false;
        }
    }
}

impl Drop for TileRenderer {
    /// Deterministic cleanup: dropping a renderer mid-pass cancels it and
    /// waits for the workers, then thaws the source.
    fn drop(&mut self) {
        if self.state == PassState::Rendering {
            self.abort();
        }
        self.restore_source();
    }
}

/// One worker's share of a pass: its round-robin tile indices in
/// increasing order, with a cancellation check before each tile.
fn worker_loop(
    worker: usize,
    stride: usize,
    effect: &dyn Effect,
    config: &mut dyn EffectConfig,
    dst: &Surface,
    src: &Surface,
    shared: &PassShared,
) {
    let mut index = worker + 1;
    while index < shared.tile_count {
        if shared.cancel.is_cancelled() {
            shared.record_outcome(RenderError::Cancelled);
            return;
        }
        let tile = &shared.tiles[index];
        if !tile.region.is_empty() {
            if let Err(message) = effect.render(
                config,
                dst,
                src,
                tile.region.rects(),
                &shared.cancel,
            ) {
                if shared.cancel.is_cancelled() {
                    // A cancellable effect bailing out mid-tile is a clean
                    // stop, not a failure.
                    shared.record_outcome(RenderError::Cancelled);
                } else {
                    shared.record_outcome(RenderError::Render {
                        inline: false,
                        message,
                    });
                }
                return;
            }
        }
        // Empty tiles skip the effect but still publish, so progress
        // accounting always reaches tile_count.
        shared.publish_tile(index);
        index += stride;
    }
}

// ============================================================================
// Tests
// ============================================================================
