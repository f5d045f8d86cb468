//! Repeating timers of a document, driven by an explicit clock.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use super::TimerCallback;

pub type TimerId = u32;

/// Shortest interval a timer repeats at.
const MIN_INTERVAL: Duration = Duration::from_millis(1);

struct Timer {
    callback: TimerCallback,
    interval: Duration,
    /// `None` while paused
    next_due: Option<Instant>,
}

#[derive(Default)]
pub struct TimerRegistry {
    last_id: TimerId,
    timers:  BTreeMap<TimerId, Timer>,
}

impl TimerRegistry {
    pub fn set_interval(&mut self, callback: TimerCallback, interval: Duration, now: Instant) -> TimerId {
        self.last_id = self.last_id.wrapping_add(1).max(1);
        let interval = interval.max(MIN_INTERVAL);
        self.timers.insert(self.last_id, Timer { callback, interval, next_due: Some(now + interval) });
        self.last_id
    }

    /// Stops repetition but keeps the registration.
    pub fn pause(&mut self, id: TimerId) -> bool {
        let Some(timer) = self.timers.get_mut(&id) else { return false };
        timer.next_due = None;
        true
    }

    /// Restarts a paused timer with a full interval.
    pub fn resume(&mut self, id: TimerId, now: Instant) -> bool {
        let Some(timer) = self.timers.get_mut(&id) else { return false };
        if timer.next_due.is_none() {
            timer.next_due = Some(now + timer.interval);
        }
        true
    }

    pub fn clear(&mut self, id: TimerId) -> bool { self.timers.remove(&id).is_some() }

    pub fn clear_all(&mut self) { self.timers.clear() }

    /// `Some(true)` running, `Some(false)` paused.
    pub fn is_running(&self, id: TimerId) -> Option<bool> {
        self.timers.get(&id).map(|t| t.next_due.is_some())
    }

    pub fn len(&self) -> usize { self.timers.len() }

    pub fn is_empty(&self) -> bool { self.timers.is_empty() }

    /// Callbacks of every timer due at `now`, in id order. A timer fires at
    /// most once per poll; missed periods are skipped.
    pub fn due(&mut self, now: Instant) -> Vec<TimerCallback> {
        let mut fired = Vec::new();
        for timer in self.timers.values_mut() {
            let Some(due) = timer.next_due else { continue };
            if due > now {
                continue;
            }
            let mut next = due + timer.interval;
            if next <= now {
                next = now + timer.interval;
            }
            timer.next_due = Some(next);
            fired.push(timer.callback.clone());
        }
        fired
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    fn noop() -> TimerCallback { Rc::new(|_, _| Ok(false)) }

    #[test]
    fn fires_repeatedly_and_pauses() {
        let t0 = Instant::now();
        let mut reg = TimerRegistry::default();
        let id = reg.set_interval(noop(), Duration::from_millis(100), t0);

        assert!(reg.due(t0 + Duration::from_millis(50)).is_empty());
        assert_eq!(reg.due(t0 + Duration::from_millis(100)).len(), 1);
        assert!(reg.due(t0 + Duration::from_millis(150)).is_empty());
        // several periods late: one firing only
        assert_eq!(reg.due(t0 + Duration::from_millis(1000)).len(), 1);

        assert!(reg.pause(id));
        assert_eq!(reg.is_running(id), Some(false));
        assert!(reg.due(t0 + Duration::from_secs(10)).is_empty());
        assert!(reg.resume(id, t0 + Duration::from_secs(10)));
        assert_eq!(reg.due(t0 + Duration::from_millis(10_100)).len(), 1);

        assert!(reg.clear(id));
        assert!(!reg.clear(id));
        assert!(!reg.pause(id));
        assert!(reg.is_empty());
    }
}
