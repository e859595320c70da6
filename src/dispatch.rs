//! Chunked candidate dispatch across the worker pool.
//!
//! The index range `[0, N)` is split into one contiguous chunk per pool
//! thread. Inside a chunk a worker proceeds strictly in order; between
//! chunks the interleaving of verifier calls is unspecified. The first
//! worker whose candidate is accepted latches `found` and wins; everyone
//! else drains at the next index.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use indicatif::ProgressBar;
use rayon::prelude::*;
use rayon::ThreadPool;

use crate::bloom::SkipFilter;
use crate::status;
use crate::verify::PasswordVerifier;

/// How many indices a worker advances between stop-flag file polls.
const STOP_POLL_INTERVAL: u64 = 1000;

/// Cross-worker run state. Both flags latch exactly once: `found` through a
/// compare-exchange that picks the winning worker, `stop_requested` on the
/// first stop signal from any source.
#[derive(Default)]
pub struct SearchState {
    found: AtomicBool,
    stop_requested: AtomicBool,
}

impl SearchState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn password_found(&self) -> bool {
        self.found.load(Ordering::Acquire)
    }

    pub fn is_stopping(&self) -> bool {
        self.stop_requested.load(Ordering::Acquire)
    }

    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::Release);
    }

    fn should_exit(&self) -> bool {
        self.password_found() || self.is_stopping()
    }

    fn claim_found(&self) -> bool {
        self.found
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Everything a worker needs besides its index range.
pub struct WorkerContext<'a> {
    pub verifier: &'a dyn PasswordVerifier,
    pub state: &'a SearchState,
    pub filter: Option<&'a RwLock<SkipFilter>>,
    pub stop_flag: Option<&'a Path>,
}

/// Runs the build → filter → verify loop over `[0, total)` and returns the
/// accepted candidate from the winning worker, if any. All workers are
/// joined before this returns.
pub fn dispatch<B>(
    pool: &ThreadPool,
    total: u64,
    ctx: &WorkerContext<'_>,
    progress: &ProgressBar,
    build: B,
) -> Option<String>
where
    B: Fn(u64) -> Option<String> + Sync,
{
    if total == 0 {
        return None;
    }
    let workers = pool.current_num_threads().max(1) as u64;
    let chunk = total.div_ceil(workers);
    pool.install(|| {
        (0..workers).into_par_iter().find_map_any(|worker| {
            let start = worker * chunk;
            let end = total.min(start.saturating_add(chunk));
            run_chunk(start, end, ctx, progress, &build)
        })
    })
}

fn run_chunk<B>(
    start: u64,
    end: u64,
    ctx: &WorkerContext<'_>,
    progress: &ProgressBar,
    build: &B,
) -> Option<String>
where
    B: Fn(u64) -> Option<String> + Sync,
{
    for index in start..end {
        if index % STOP_POLL_INTERVAL == 0 {
            if let Some(flag) = ctx.stop_flag {
                if flag.exists() {
                    status::info("stop flag detected by a worker, draining");
                    ctx.state.request_stop();
                    return None;
                }
            }
        }
        if ctx.state.should_exit() {
            return None;
        }
        let Some(candidate) = build(index) else {
            progress.inc(1);
            continue;
        };
        if let Some(filter) = ctx.filter {
            if filter.read().unwrap().contains(&candidate) {
                progress.inc(1);
                continue;
            }
        }
        if ctx.verifier.test(&candidate) {
            if ctx.state.claim_found() {
                return Some(candidate);
            }
            return None;
        } else if let Some(filter) = ctx.filter {
            // Held only long enough to flip k bits.
            filter.write().unwrap().insert(&candidate);
        }
        progress.inc(1);
    }
    None
}
