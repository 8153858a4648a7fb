use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use teloxide::types::{ChatId, MessageId};

/// Minimum spacing between two progress edits of the same status message.
pub const PROGRESS_EDIT_INTERVAL: Duration = Duration::from_millis(2500);

pub type ThrottleKey = (ChatId, MessageId);

/// Bounds the rate of progress notifications per in-flight request. The
/// final state transition (uploading / failure) is edited unconditionally
/// by the orchestrator and never goes through here.
#[derive(Clone, Default)]
pub struct ProgressThrottle {
    last_emit: Arc<DashMap<ThrottleKey, Instant>>,
}

impl ProgressThrottle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check-and-record: returns true at most once per key per rolling
    /// window, and a true return has already stamped `now` for that key.
    /// The first call for a never-seen key always returns true.
    pub fn should_emit(&self, key: ThrottleKey, now: Instant) -> bool {
        match self.last_emit.entry(key) {
            Entry::Occupied(mut entry) => {
                if now.saturating_duration_since(*entry.get()) >= PROGRESS_EDIT_INTERVAL {
                    entry.insert(now);
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(now);
                true
            }
        }
    }

    /// Drop the entry for a finished request so the map stays bounded over
    /// the process lifetime.
    pub fn forget(&self, key: &ThrottleKey) {
        self.last_emit.remove(key);
    }
}
