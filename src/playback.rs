//! Poke playback scheduler.
//!
//! Server updates arrive as pokes: `(base_cookie → cookie)` transitions
//! carrying last-mutation-id changes, a key/value patch, and optionally the
//! server timestamp of the frame that produced them. The scheduler buffers
//! pokes and replays them on animation ticks at the server's intended
//! pacing:
//!
//! - *Untimed* pokes (no timestamp, or originated by this client) play
//!   back as soon as possible, merged greedily with whatever is due.
//! - *Timed* pokes are scheduled through a playback offset `O` relating
//!   local wall-clock to server time, initialized with a small buffer so a
//!   burst of closely-timed pokes keeps its cadence.
//! - A poke more than the configured drift behind schedule resets `O`, so
//!   playback recovers promptly after pauses.
//!
//! Mis-chained pokes (`cookie₁ ≠ base₂`) and "unexpected base cookie"
//! apply failures drop the buffer and signal `on_out_of_order` exactly
//! once; the connection layer resyncs. Missed-poke and missed-frame
//! counters feed a periodic `missed / total` debug report.

use std::collections::{BTreeMap, VecDeque};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::error::RivuletError;
use crate::kv::Cookie;

pub type ClientId = String;

/// One key/value operation of a poke patch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum PatchOp {
    Put {
        key: String,
        value: serde_json::Value,
    },
    Del {
        key: String,
    },
}

/// A server-originated patch message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Poke {
    pub base_cookie: Cookie,
    pub cookie: Cookie,
    #[serde(default)]
    pub last_mutation_id_changes: BTreeMap<ClientId, u64>,
    #[serde(default)]
    pub patch: Vec<PatchOp>,
    /// Server frame timestamp in milliseconds, when the poke is pace-able.
    #[serde(default)]
    pub timestamp: Option<f64>,
}

/// Cumulative playback pacing counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackStats {
    pub timed_pokes: u64,
    pub missed_pokes: u64,
    pub timed_frames: u64,
    pub missed_frames: u64,
}

/// What one tick did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickOutcome {
    /// Number of buffered pokes consumed (before merging).
    pub applied_pokes: usize,
    /// The buffer was dropped and `on_out_of_order` fired.
    pub out_of_order: bool,
    /// The buffer is non-empty; the host should schedule another tick.
    pub reschedule: bool,
}

pub struct PokePlayer {
    client_id: ClientId,
    initial_buffer_ms: f64,
    max_drift_ms: f64,
    report_interval: u64,
    max_buffered: usize,
    buffer: VecDeque<Poke>,
    /// Playback offset `O`: local due time of a poke is `timestamp + O`.
    offset: Option<f64>,
    stats: PlaybackStats,
    on_out_of_order: Option<Box<dyn FnMut()>>,
}

impl PokePlayer {
    pub fn new(client_id: impl Into<ClientId>, config: &EngineConfig) -> PokePlayer {
        PokePlayer {
            client_id: client_id.into(),
            initial_buffer_ms: config.playback_initial_buffer_ms,
            max_drift_ms: config.playback_max_drift_ms,
            report_interval: config.playback_report_interval,
            max_buffered: config.max_buffered_pokes,
            buffer: VecDeque::new(),
            offset: None,
            stats: PlaybackStats::default(),
            on_out_of_order: None,
        }
    }

    pub fn set_on_out_of_order(&mut self, callback: Box<dyn FnMut()>) {
        self.on_out_of_order = Some(callback);
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn needs_tick(&self) -> bool {
        !self.buffer.is_empty()
    }

    pub fn stats(&self) -> PlaybackStats {
        self.stats
    }

    pub fn offset(&self) -> Option<f64> {
        self.offset
    }

    /// A poke is timed iff it carries a timestamp and did not originate
    /// from this client.
    pub fn is_timed(&self, poke: &Poke) -> bool {
        poke.timestamp.is_some() && !poke.last_mutation_id_changes.contains_key(&self.client_id)
    }

    /// Buffer a poke for playback. Growth past the configured cap is a
    /// protocol error: the buffer is dropped and out-of-order signaled.
    pub fn enqueue(&mut self, poke: Poke) -> Result<(), RivuletError> {
        if self.buffer.len() >= self.max_buffered {
            self.signal_out_of_order();
            return Err(RivuletError::OutOfOrder(format!(
                "poke buffer exceeded {} entries",
                self.max_buffered
            )));
        }
        self.buffer.push_back(poke);
        Ok(())
    }

    /// Drop all playback state: buffer, offset. Used on disconnect.
    pub fn disconnect(&mut self) {
        self.buffer.clear();
        self.offset = None;
    }

    /// One animation tick at local time `now_ms`. Applies whatever is due
    /// as a single merged poke through `apply`.
    pub fn tick(
        &mut self,
        now_ms: f64,
        apply: &mut dyn FnMut(Poke) -> Result<(), RivuletError>,
    ) -> Result<TickOutcome, RivuletError> {
        let mut outcome = TickOutcome::default();
        let mut frame_timed: u64 = 0;
        let mut frame_missed: u64 = 0;

        let head_timed = match self.buffer.front() {
            None => return Ok(outcome),
            Some(head) => self.is_timed(head),
        };

        if head_timed {
            let ts = match self.buffer.front() {
                Some(head) => head.timestamp.unwrap_or_default(),
                None => return Ok(outcome),
            };
            if self.offset.is_none() {
                let offset = now_ms - ts + self.initial_buffer_ms;
                self.offset = Some(offset);
                debug!(offset, "playback offset initialized");
            }
            let mut due_at = ts + self.offset.unwrap_or_default();

            // Behind schedule past the drift cap: re-derive the offset so
            // the head becomes due exactly now instead of replaying a
            // backlog at full speed forever.
            if now_ms - due_at > self.max_drift_ms {
                warn!(
                    lateness_ms = now_ms - due_at,
                    "playback drift exceeded; resetting offset"
                );
                self.offset = Some(now_ms - ts);
                due_at = now_ms;
            }

            if now_ms < due_at {
                outcome.reschedule = true;
                return Ok(outcome);
            }
            frame_timed += 1;
            if now_ms > due_at {
                frame_missed += 1;
            }
        }

        let merged = match self.buffer.pop_front() {
            Some(head) => {
                outcome.applied_pokes = 1;
                self.merge_forward(head, now_ms, &mut outcome, &mut frame_timed, &mut frame_missed)
            }
            None => return Ok(outcome),
        };

        match merged {
            Ok(poke) => match apply(poke) {
                Ok(()) => {}
                Err(e) if e.requires_resync() => {
                    // "Unexpected base cookie" from the persistence layer:
                    // signal once, do not retry the poke.
                    self.signal_out_of_order();
                    outcome.out_of_order = true;
                }
                Err(e) => return Err(e),
            },
            Err(()) => {
                // Mis-chained pokes inside the buffer.
                self.signal_out_of_order();
                outcome.out_of_order = true;
                outcome.applied_pokes = 0;
            }
        }

        if frame_timed > 0 {
            self.stats.timed_pokes += frame_timed;
            self.stats.missed_pokes += frame_missed;
            self.stats.timed_frames += 1;
            if frame_missed > 0 {
                self.stats.missed_frames += 1;
            }
            self.maybe_report();
        }

        outcome.reschedule = !self.buffer.is_empty() && !outcome.out_of_order;
        Ok(outcome)
    }

    /// Merge the popped head forward: untimed followers are due
    /// immediately; timed followers merge while due and stop the batch at
    /// the first one scheduled past `now_ms`. An untimed head that meets a
    /// timed follower initializes the offset on the way.
    fn merge_forward(
        &mut self,
        head: Poke,
        now_ms: f64,
        outcome: &mut TickOutcome,
        frame_timed: &mut u64,
        frame_missed: &mut u64,
    ) -> Result<Poke, ()> {
        let mut merged = head;
        loop {
            let take = match self.buffer.front() {
                None => break,
                Some(next) if !self.is_timed(next) => None,
                Some(next) => {
                    let ts = next.timestamp.unwrap_or_default();
                    if self.offset.is_none() {
                        self.offset = Some(now_ms - ts + self.initial_buffer_ms);
                    }
                    let due_at = ts + self.offset.unwrap_or_default();
                    if now_ms < due_at {
                        break;
                    }
                    Some(now_ms > due_at)
                }
            };
            if let Some(missed) = take {
                *frame_timed += 1;
                if missed {
                    *frame_missed += 1;
                }
            }
            let Some(next) = self.buffer.pop_front() else {
                break;
            };
            merged = merge_pokes(merged, next).map_err(|_| ())?;
            outcome.applied_pokes += 1;
        }
        Ok(merged)
    }

    fn signal_out_of_order(&mut self) {
        self.buffer.clear();
        if let Some(callback) = self.on_out_of_order.as_mut() {
            callback();
        }
    }

    fn maybe_report(&self) {
        if self.report_interval > 0 && self.stats.timed_frames.is_multiple_of(self.report_interval)
        {
            debug!(
                pokes = format!("{} / {}", self.stats.missed_pokes, self.stats.timed_pokes),
                frames = format!("{} / {}", self.stats.missed_frames, self.stats.timed_frames),
                "playback miss report"
            );
        }
    }
}

/// Merge two consecutive pokes. Their cookies must chain:
/// `(base₁ → cookie₁)` + `(cookie₁ → cookie₂)` = `(base₁ → cookie₂)`.
/// Last-mutation-id changes merge by per-client max; patches concatenate.
pub fn merge_pokes(first: Poke, second: Poke) -> Result<Poke, RivuletError> {
    if first.cookie != second.base_cookie {
        return Err(RivuletError::OutOfOrder(format!(
            "poke chain broken: {:?} != {:?}",
            first.cookie, second.base_cookie
        )));
    }
    let mut last_mutation_id_changes = first.last_mutation_id_changes;
    for (client, id) in second.last_mutation_id_changes {
        let entry = last_mutation_id_changes.entry(client).or_insert(id);
        *entry = (*entry).max(id);
    }
    let mut patch = first.patch;
    patch.extend(second.patch);
    Ok(Poke {
        base_cookie: first.base_cookie,
        cookie: second.cookie,
        last_mutation_id_changes,
        patch,
        timestamp: first.timestamp,
    })
}
