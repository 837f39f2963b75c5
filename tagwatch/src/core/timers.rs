/*!
Generation-tagged absence timers.

Each absent tag gets at most one live countdown. Every start allocates a
fresh generation number; the countdown task sends a [`TimerFire`] notice
carrying that generation back to the tracker loop, and [`TimerSupervisor::try_fire`]
only honors the notice while its generation is still the current one for the
tag. Cancelling aborts the countdown task, but that abort is best-effort
cleanup. A notice already in flight is neutralized by the generation check,
never by the abort.
*/

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

use crate::core::registry::TagId;

/// Notice delivered to the tracker loop when a countdown elapses
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerFire {
    pub tag_id: TagId,
    pub generation: u64,
}

/// One live countdown
struct TimerToken {
    generation: u64,
    duration: Duration,
    deadline: Instant,
    task: JoinHandle<()>,
}

/// Owns every live absence timer, at most one per tag identifier
pub struct TimerSupervisor {
    timers: HashMap<TagId, TimerToken>,
    next_generation: u64,
    fire_tx: mpsc::UnboundedSender<TimerFire>,
}

impl TimerSupervisor {
    /// Create a supervisor together with the receiver for its fire notices
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TimerFire>) {
        let (fire_tx, fire_rx) = mpsc::unbounded_channel();
        (
            Self {
                timers: HashMap::new(),
                next_generation: 0,
                fire_tx,
            },
            fire_rx,
        )
    }

    /// Start a countdown for a tag, superseding any timer already running.
    /// Returns the generation assigned to the new timer.
    pub fn start(&mut self, tag_id: TagId, duration: Duration) -> u64 {
        self.next_generation += 1;
        let generation = self.next_generation;
        let deadline = Instant::now() + duration;

        let fire_tx = self.fire_tx.clone();
        let fire_id = tag_id.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            // A closed receiver means the tracker already shut down
            let _ = fire_tx.send(TimerFire {
                tag_id: fire_id,
                generation,
            });
        });

        let token = TimerToken {
            generation,
            duration,
            deadline,
            task,
        };
        match self.timers.insert(tag_id.clone(), token) {
            Some(old) => {
                old.task.abort();
                debug!(
                    tag = %tag_id,
                    superseded = old.generation,
                    generation,
                    "Restarted absence timer"
                );
            }
            None => debug!(tag = %tag_id, generation, "Started absence timer"),
        }
        generation
    }

    /// Cancel the live timer for a tag. Returns whether one was running.
    /// Cancelling an id with no timer is a no-op.
    pub fn cancel(&mut self, tag_id: &TagId) -> bool {
        match self.timers.remove(tag_id) {
            Some(token) => {
                token.task.abort();
                debug!(tag = %tag_id, generation = token.generation, "Cancelled absence timer");
                true
            }
            None => false,
        }
    }

    /// Resolve a fire notice. Consumes the tag's token and returns the armed
    /// duration iff the notice's generation is still the current one;
    /// otherwise the notice is stale and the token (if any) is left alone.
    pub fn try_fire(&mut self, tag_id: &TagId, generation: u64) -> Option<Duration> {
        match self.timers.get(tag_id) {
            Some(token) if token.generation == generation => {
                self.timers.remove(tag_id).map(|token| token.duration)
            }
            _ => {
                debug!(tag = %tag_id, generation, "Discarded stale timer notice");
                None
            }
        }
    }

    /// Generation of the live timer for a tag, if one is running
    pub fn current_generation(&self, tag_id: &TagId) -> Option<u64> {
        self.timers.get(tag_id).map(|t| t.generation)
    }

    /// Instant at which the live timer for a tag will fire
    pub fn deadline(&self, tag_id: &TagId) -> Option<Instant> {
        self.timers.get(tag_id).map(|t| t.deadline)
    }

    /// Number of live timers
    pub fn armed(&self) -> usize {
        self.timers.len()
    }

    /// Abort every live countdown
    pub fn clear(&mut self) {
        for (_, token) in self.timers.drain() {
            token.task.abort();
        }
    }
}

impl Drop for TimerSupervisor {
    fn drop(&mut self) {
        self.clear();
    }
}
