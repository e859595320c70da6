//! Search orchestration: strategy selection, length loops, shuffling,
//! checkpointing, and the final skip-list save.
//!
//! The engine owns the skip filter for the whole run; workers borrow it for
//! the duration of a single dispatch. Serialization happens only here, at
//! checkpoints and at termination, never inside a worker.

use std::ffi::OsString;
use std::path::PathBuf;
use std::sync::RwLock;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use indicatif::{ProgressBar, ProgressStyle};
use rand::seq::SliceRandom;
use rand::RngCore;
use rand_mt::Mt19937GenRand64;
use rayon::ThreadPool;

use crate::bloom::SkipFilter;
use crate::config::{Config, Mode};
use crate::dispatch::{self, SearchState, WorkerContext};
use crate::enumerate;
use crate::pattern::Pattern;
use crate::status;
use crate::verify::PasswordVerifier;

/// The shuffled modes keep the whole index vector in memory; cap it at 4 GiB.
const MAX_SHUFFLE_INDICES: u64 = 4 * 1024 * 1024 * 1024 / 8;

/// How a finished run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Found(String),
    Exhausted,
    Stopped,
}

/// Result of attempting the shuffled pattern mode.
enum ShuffleAttempt {
    /// The shuffled search ran (or was stopped, or had nothing to do).
    Ran(Option<String>),
    /// Random order is unusable for this configuration; the caller falls
    /// back to ascending length order.
    Unavailable,
}

pub struct Engine<'a, V: PasswordVerifier> {
    config: &'a Config,
    verifier: &'a V,
    pool: &'a ThreadPool,
    filter: Option<RwLock<SkipFilter>>,
    /// Persistence target; present only when a filter survived launch.
    skip_file: Option<PathBuf>,
    /// Sibling `<skip_file>.stop` whose existence requests cancellation.
    stop_flag: Option<PathBuf>,
    last_checkpoint: Instant,
}

impl<'a, V: PasswordVerifier> Engine<'a, V> {
    pub fn new(
        config: &'a Config,
        verifier: &'a V,
        pool: &'a ThreadPool,
        filter: Option<SkipFilter>,
    ) -> Self {
        // Stop flag and checkpoints are anchored to the skip file, so both
        // are armed only when the filter made it through launch.
        let skip_file = if filter.is_some() {
            config.skip_file.clone()
        } else {
            None
        };
        let stop_flag = skip_file.as_ref().map(|path| {
            let mut flag = OsString::from(path.as_os_str());
            flag.push(".stop");
            PathBuf::from(flag)
        });
        Self {
            config,
            verifier,
            pool,
            filter: filter.map(RwLock::new),
            skip_file,
            stop_flag,
            last_checkpoint: Instant::now(),
        }
    }

    /// Runs the configured search to completion and performs the final save.
    pub fn run(&mut self) -> Outcome {
        let started = Instant::now();
        status::info(&format!(
            "using {} worker threads",
            self.pool.current_num_threads()
        ));

        let state = SearchState::new();
        let found = if let Some(text) = self.config.pattern.clone() {
            let pattern = Pattern::parse(&text);
            self.run_pattern(&pattern, &state)
        } else if self.config.mode == Mode::Random {
            self.run_shuffled(&state)
        } else {
            self.run_lengths(&state)
        };

        status::info(&format!(
            "search finished in {:.2} seconds",
            started.elapsed().as_secs_f64()
        ));

        let stopped = state.is_stopping();
        self.final_save(found.is_some(), stopped);

        match found {
            Some(password) => Outcome::Found(password),
            None if stopped => {
                status::info("process stopped by user request");
                Outcome::Stopped
            }
            None => {
                status::info("exhausted the search space without finding the password");
                Outcome::Exhausted
            }
        }
    }

    /// Plain search, ascending or descending length order.
    fn run_lengths(&mut self, state: &SearchState) -> Option<String> {
        let charset_size = self.config.charset.len() as u64;
        for length in length_order(self.config.min_length, self.config.max_length, self.config.mode)
        {
            if self.should_abort(state) {
                break;
            }
            let Some(count) = enumerate::combinations_for_length(charset_size, length) else {
                status::warn(&format!(
                    "combination count overflows for length {length}, skipping"
                ));
                continue;
            };
            if count == 0 {
                continue;
            }
            status::info(&format!(
                "testing passwords of length {length} ({count} combinations)"
            ));
            let progress = batch_progress(count);
            let found = {
                let ctx = self.worker_context(state);
                let charset = &self.config.charset;
                dispatch::dispatch(self.pool, count, &ctx, &progress, |i| {
                    Some(enumerate::password_at_length(i, charset, length))
                })
            };
            progress.finish_and_clear();
            status::info(&format!("worker threads joined for length {length}"));
            self.checkpoint(state);
            if found.is_some() {
                return found;
            }
        }
        None
    }

    /// Plain search in shuffled order over the whole length range.
    fn run_shuffled(&mut self, state: &SearchState) -> Option<String> {
        status::info("computing candidate counts for random order");
        let charset_size = self.config.charset.len() as u64;

        let mut prefix: u64 = 0;
        for length in 1..self.config.min_length {
            if self.should_abort(state) {
                return None;
            }
            let Some(total) = enumerate::combinations_for_length(charset_size, length)
                .and_then(|count| prefix.checked_add(count))
            else {
                status::error("candidate count below the minimum length overflows, random order unavailable");
                return None;
            };
            prefix = total;
        }

        let mut total: u64 = 0;
        for length in self.config.min_length..=self.config.max_length {
            if self.should_abort(state) {
                return None;
            }
            let Some(sum) = enumerate::combinations_for_length(charset_size, length)
                .and_then(|count| total.checked_add(count))
            else {
                status::error("candidate count in the target range overflows, random order unavailable");
                return None;
            };
            total = sum;
        }
        if total == 0 {
            status::warn("no candidates in the requested length range");
            return None;
        }
        status::info(&format!(
            "total candidates to test (lengths {} to {}): {total}",
            self.config.min_length, self.config.max_length
        ));
        if total > MAX_SHUFFLE_INDICES {
            status::error(&format!(
                "random order needs {} MiB for the index vector, over the 4096 MiB limit",
                total.saturating_mul(8) / (1024 * 1024)
            ));
            return None;
        }

        let indices = match self.shuffled_indices(total, state) {
            Some(indices) => indices,
            None => return None,
        };
        let progress = batch_progress(total);
        let found = {
            let ctx = self.worker_context(state);
            let charset = &self.config.charset;
            let max_length = self.config.max_length;
            dispatch::dispatch(self.pool, total, &ctx, &progress, |i| {
                let Some(global) = prefix.checked_add(indices[i as usize]) else {
                    status::warn(&format!(
                        "shuffled position {i} maps outside the candidate space, skipping"
                    ));
                    return None;
                };
                let password = enumerate::index_to_password(global, charset, max_length);
                if password.is_none() {
                    status::warn(&format!("no candidate for global index {global}, skipping"));
                }
                password
            })
        };
        progress.finish_and_clear();
        status::info("shuffled worker threads joined");
        self.checkpoint(state);
        found
    }

    /// Pattern-constrained search; picks between length order and shuffled
    /// order and applies the length coercions the template implies.
    fn run_pattern(&mut self, pattern: &Pattern, state: &SearchState) -> Option<String> {
        status::info("pattern matching enabled");
        let mut min_length = self.config.min_length;
        let mut max_length = self.config.max_length;

        if min_length < pattern.fixed_length() {
            status::info(&format!(
                "raised minimum length to the pattern minimum of {}",
                pattern.fixed_length()
            ));
            min_length = pattern.fixed_length();
        }
        if pattern.star_count() == 0 && max_length != pattern.fixed_length() {
            status::info(&format!(
                "pinned maximum length to {} (pattern has a fixed length)",
                pattern.fixed_length()
            ));
            max_length = pattern.fixed_length();
        }
        if max_length < min_length {
            status::info(&format!("corrected maximum length to {min_length}"));
            max_length = min_length;
        }

        let mut mode = self.config.mode;
        if mode == Mode::Random && pattern.star_count() > 1 {
            status::warn(
                "random order is unsupported for multi-star patterns, falling back to ascending",
            );
            mode = Mode::Ascending;
        }
        if mode == Mode::Random {
            match self.run_pattern_shuffled(pattern, min_length, max_length, state) {
                ShuffleAttempt::Ran(found) => return found,
                ShuffleAttempt::Unavailable => {
                    status::warn("falling back to ascending length order");
                    mode = Mode::Ascending;
                }
            }
        }
        self.run_pattern_lengths(pattern, min_length, max_length, mode, state)
    }

    /// Pattern search, one length at a time.
    fn run_pattern_lengths(
        &mut self,
        pattern: &Pattern,
        min_length: usize,
        max_length: usize,
        mode: Mode,
        state: &SearchState,
    ) -> Option<String> {
        let charset_size = self.config.charset.len() as u64;
        for length in length_order(min_length, max_length, mode) {
            if self.should_abort(state) {
                break;
            }
            let count = match pattern.combinations(charset_size, length) {
                None => {
                    status::warn(&format!(
                        "cannot count pattern candidates for length {length}, skipping"
                    ));
                    continue;
                }
                Some(0) => continue,
                Some(count) => count,
            };
            status::info(&format!(
                "testing pattern candidates of length {length} ({count} combinations)"
            ));
            let progress = batch_progress(count);
            let found = {
                let ctx = self.worker_context(state);
                let charset = &self.config.charset;
                dispatch::dispatch(self.pool, count, &ctx, &progress, |i| {
                    let password = enumerate::pattern_password_at_length(i, pattern, charset, length);
                    if password.is_none() {
                        status::warn(&format!(
                            "no pattern candidate for index {i} at length {length}, skipping"
                        ));
                    }
                    password
                })
            };
            progress.finish_and_clear();
            status::info(&format!("pattern workers joined for length {length}"));
            self.checkpoint(state);
            if found.is_some() {
                return found;
            }
        }
        None
    }

    /// Pattern search in shuffled order across the whole length range.
    fn run_pattern_shuffled(
        &mut self,
        pattern: &Pattern,
        min_length: usize,
        max_length: usize,
        state: &SearchState,
    ) -> ShuffleAttempt {
        status::info("computing candidate counts for random pattern order");
        let charset_size = self.config.charset.len() as u64;
        let mut counts: Vec<(usize, u64)> = Vec::new();
        let mut total: u64 = 0;
        for length in min_length..=max_length {
            if self.should_abort(state) {
                return ShuffleAttempt::Ran(None);
            }
            let Some(count) = pattern.combinations(charset_size, length) else {
                status::error(&format!(
                    "pattern candidate count overflows for length {length}"
                ));
                return ShuffleAttempt::Unavailable;
            };
            if count == 0 {
                continue;
            }
            let Some(sum) = total.checked_add(count) else {
                status::error("total pattern candidate count overflows");
                return ShuffleAttempt::Unavailable;
            };
            counts.push((length, count));
            total = sum;
        }
        if total == 0 {
            status::info("the pattern yields no candidates in the requested length range");
            return ShuffleAttempt::Ran(None);
        }
        status::info(&format!("total pattern candidates in range: {total}"));
        if total > MAX_SHUFFLE_INDICES {
            status::error(&format!(
                "random order needs {} MiB for the index vector, over the 4096 MiB limit",
                total.saturating_mul(8) / (1024 * 1024)
            ));
            return ShuffleAttempt::Unavailable;
        }

        let indices = match self.shuffled_indices(total, state) {
            Some(indices) => indices,
            None => return ShuffleAttempt::Ran(None),
        };
        let progress = batch_progress(total);
        let found = {
            let ctx = self.worker_context(state);
            let charset = &self.config.charset;
            dispatch::dispatch(self.pool, total, &ctx, &progress, |i| {
                let shuffled = indices[i as usize];
                let password =
                    enumerate::pattern_password_at_global_index(shuffled, pattern, charset, &counts);
                if password.is_none() {
                    status::warn(&format!(
                        "no candidate for shuffled pattern index {shuffled}, skipping"
                    ));
                }
                password
            })
        };
        progress.finish_and_clear();
        status::info("shuffled pattern workers joined");
        self.checkpoint(state);
        ShuffleAttempt::Ran(found)
    }

    /// Builds `[0, total)` and shuffles it with an MT19937-64 generator
    /// seeded from the OS entropy source (wall clock when that fails).
    /// Returns `None` when a stop arrives mid-setup.
    fn shuffled_indices(&self, total: u64, state: &SearchState) -> Option<Vec<u64>> {
        status::info(&format!("generating and shuffling {total} indices"));
        let capacity = usize::try_from(total).ok()?;
        let mut indices: Vec<u64> = Vec::with_capacity(capacity);
        indices.extend(0..total);
        if self.should_abort(state) {
            return None;
        }
        let mut rng = Mt19937GenRand64::new(entropy_seed());
        indices.shuffle(&mut rng);
        status::info("index vector shuffled");
        if self.should_abort(state) {
            return None;
        }
        Some(indices)
    }

    /// Between-batch stop check: polls the flag file, latches the request,
    /// and reports whether the run should wind down.
    fn should_abort(&self, state: &SearchState) -> bool {
        if let Some(flag) = &self.stop_flag {
            if flag.exists() && !state.is_stopping() {
                status::info("stop flag file detected");
                state.request_stop();
            }
        }
        state.password_found() || state.is_stopping()
    }

    fn worker_context<'s>(&'s self, state: &'s SearchState) -> WorkerContext<'s> {
        WorkerContext {
            verifier: self.verifier,
            state,
            filter: self.filter.as_ref(),
            stop_flag: self.stop_flag.as_deref(),
        }
    }

    /// Periodic persistence between batches; never runs while stopping (the
    /// final save covers that) and never from a worker.
    fn checkpoint(&mut self, state: &SearchState) {
        let interval = self.config.checkpoint_interval;
        if interval == 0 || state.is_stopping() {
            return;
        }
        let (Some(filter), Some(path)) = (&self.filter, &self.skip_file) else {
            return;
        };
        if self.last_checkpoint.elapsed() < Duration::from_secs(interval) {
            return;
        }
        status::info("checkpoint interval reached, saving the skip list");
        match filter.read().unwrap().save(path) {
            Ok(()) => status::info(&format!("skip list checkpoint saved to {}", path.display())),
            Err(err) => status::error(&format!("failed to save the skip list checkpoint: {err}")),
        }
        self.last_checkpoint = Instant::now();
    }

    /// Terminal persistence: only worth recording when the run found the
    /// password or was stopped early. A clean exhaustion writes nothing, so
    /// a rerun is not misled by a fully swept filter.
    fn final_save(&self, found: bool, stopped: bool) {
        let (Some(filter), Some(path)) = (&self.filter, &self.skip_file) else {
            return;
        };
        if !(found || stopped) {
            status::info("final skip list save skipped (search finished without a find or a stop)");
            return;
        }
        status::info("performing the final save of the skip list");
        match filter.read().unwrap().save(path) {
            Ok(()) => status::info(&format!("skip list saved to {}", path.display())),
            Err(err) => status::error(&format!("failed to save the final skip list state: {err}")),
        }
    }
}

fn length_order(min: usize, max: usize, mode: Mode) -> Vec<usize> {
    match mode {
        Mode::Descending => (min..=max).rev().collect(),
        _ => (min..=max).collect(),
    }
}

/// Seed from the OS entropy source, falling back to the wall clock.
fn entropy_seed() -> u64 {
    let mut bytes = [0u8; 8];
    match rand::rngs::OsRng.try_fill_bytes(&mut bytes) {
        Ok(()) => u64::from_le_bytes(bytes),
        Err(_) => SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_nanos() as u64)
            .unwrap_or(0x5DEE_CE66_D001),
    }
}

/// Progress bar for one dispatched batch; indicatif draws on stderr, which
/// keeps stdout a clean status stream.
fn batch_progress(total: u64) -> ProgressBar {
    let bar = ProgressBar::new(total);
    bar.set_style(
        ProgressStyle::with_template(
            "{spinner:.green} {percent:>3}% [{wide_bar:.cyan/blue}] ({eta} remaining)",
        )
        .expect("valid progress template"),
    );
    bar
}
