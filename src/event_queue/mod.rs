//! Cooperative event scheduler of a BML document.
//!
//! Intrinsic interaction events (focus, blur, click, change) go to the
//! synchronous queue, timer firings and carousel occurrences to the
//! asynchronous one. A drain always empties the synchronous queue before
//! touching the asynchronous queue. Every dispatch is bracketed by the lock
//! counter, and a handler that replaced the document leaves it raised.

pub mod dispatcher;
pub mod timer;

use std::collections::VecDeque;
use std::rc::Rc;
use std::sync::LazyLock;
use std::time::{Duration, Instant};

use regex::Regex;
use tracing::{debug, trace};

use crate::error::HandlerError;

pub use self::dispatcher::{BeItem, BeventEvent, BeventType, EventDispatcher};
pub use self::timer::{TimerId, TimerRegistry};

static HANDLER_CALL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?P<name>[A-Za-z_][0-9A-Za-z_]*)\s*\(\s*\)\s*;?\s*$").expect("handler pattern")
});

/// Opaque element handle owned by the document layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ElementId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncEventKind {
    Focus,
    Blur,
    Click,
    Change,
}

impl SyncEventKind {
    /// Handler attribute carrying the script for this event.
    pub fn handler_attribute(self) -> &'static str {
        match self {
            SyncEventKind::Focus => "onfocus",
            SyncEventKind::Blur => "onblur",
            SyncEventKind::Click => "onclick",
            SyncEventKind::Change => "onchange",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncEvent {
    pub kind:   SyncEventKind,
    pub target: ElementId,
}

/// `document.currentEvent` as seen by scripts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CurrentEvent {
    Intrinsic(SyncEvent),
    Bevent(BeventEvent),
}

/// Document side of the scheduler.
pub trait EventHost {
    /// Runs the script function `name`. `true` when it replaced the active
    /// document.
    fn run_event_handler(&mut self, name: &str) -> bool;

    fn handler_attribute(&self, target: ElementId, attribute: &str) -> Option<String>;

    fn set_current_event(&mut self, event: Option<CurrentEvent>);
}

pub type AsyncCallback = Box<dyn FnOnce(&mut EventQueue, &mut dyn EventHost) -> Result<bool, HandlerError>>;
pub type TimerCallback = Rc<dyn Fn(&mut EventQueue, &mut dyn EventHost) -> Result<bool, HandlerError>>;

struct AsyncEntry {
    callback: AsyncCallback,
    /// dropped when the document is discarded
    local:    bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueState {
    Idle,
    /// a drain is dispatching
    Draining,
    /// the lock counter is held outside a drain, or a handler left the
    /// document
    Blocked,
}

#[derive(Default)]
pub struct EventQueue {
    sync_queue:  VecDeque<SyncEvent>,
    async_queue: VecDeque<AsyncEntry>,
    lock_count:  u32,
    draining:    bool,
    discarded:   bool,
    timers:      TimerRegistry,
}

impl EventQueue {
    pub fn new() -> Self { Self::default() }

    pub fn state(&self) -> QueueState {
        match (self.lock_count, self.draining) {
            (0, _) => QueueState::Idle,
            (_, true) => QueueState::Draining,
            _ => QueueState::Blocked,
        }
    }

    pub fn is_discarded(&self) -> bool { self.discarded }

    pub fn lock_count(&self) -> u32 { self.lock_count }

    pub fn pending(&self) -> (usize, usize) { (self.sync_queue.len(), self.async_queue.len()) }

    pub fn queue_sync_event(&mut self, event: SyncEvent) {
        if !self.discarded {
            self.sync_queue.push_back(event);
        }
    }

    /// Work tied to the current document.
    pub fn queue_async_event(&mut self, callback: AsyncCallback) {
        if !self.discarded {
            self.async_queue.push_back(AsyncEntry { callback, local: true });
        }
    }

    /// Work that survives document transitions.
    pub fn queue_global_async_event(&mut self, callback: AsyncCallback) {
        self.async_queue.push_back(AsyncEntry { callback, local: false });
    }

    pub fn lock_sync_event_queue(&mut self) { self.lock_count += 1; }

    pub fn unlock_sync_event_queue(&mut self) -> Result<(), HandlerError> {
        self.lock_count = self.lock_count.checked_sub(1).ok_or(HandlerError::LockUnderflow)?;
        Ok(())
    }

    /// Drains both queues. `Ok(true)` when a handler replaced the document;
    /// `Ok(false)` when the queues ran empty or the queue is locked.
    pub fn process_event_queue(&mut self, host: &mut dyn EventHost) -> Result<bool, HandlerError> {
        if self.discarded || self.draining {
            return Ok(false);
        }
        self.draining = true;
        let result = self.drain(host);
        self.draining = false;
        result
    }

    fn drain(&mut self, host: &mut dyn EventHost) -> Result<bool, HandlerError> {
        loop {
            if self.lock_count > 0 {
                return Ok(false);
            }
            let exit = if let Some(event) = self.sync_queue.pop_front() {
                self.lock_sync_event_queue();
                self.dispatch_sync(event, host)
            } else if let Some(entry) = self.async_queue.pop_front() {
                self.lock_sync_event_queue();
                (entry.callback)(self, host)
            } else {
                return Ok(false);
            };
            match exit {
                Ok(true) => {
                    // the document is gone; its queue stays locked
                    debug!("document replaced during event dispatch");
                    return Ok(true);
                }
                Ok(false) => self.unlock_sync_event_queue()?,
                Err(e) => {
                    self.unlock_sync_event_queue()?;
                    return Err(e);
                }
            }
        }
    }

    fn dispatch_sync(&mut self, event: SyncEvent, host: &mut dyn EventHost) -> Result<bool, HandlerError> {
        trace!(kind = ?event.kind, target = event.target.0, "sync event");
        host.set_current_event(Some(CurrentEvent::Intrinsic(event)));
        if let Some(handler) = host.handler_attribute(event.target, event.kind.handler_attribute()) {
            if self.execute_event_handler(host, &handler)? {
                return Ok(true);
            }
        }
        host.set_current_event(None);
        Ok(false)
    }

    /// Runs handler attribute text, which must be a bare `name()` call.
    /// Blank text does nothing.
    pub fn execute_event_handler(&self, host: &mut dyn EventHost, handler: &str) -> Result<bool, HandlerError> {
        if handler.trim().is_empty() {
            return Ok(false);
        }
        let Some(caps) = HANDLER_CALL.captures(handler) else {
            return Err(HandlerError::InvalidHandler(handler.to_string()));
        };
        let name = &caps["name"];
        trace!(name, "execute handler");
        Ok(host.run_event_handler(name))
    }

    /* ── timers ── */

    pub fn set_interval(&mut self, callback: TimerCallback, interval: Duration, now: Instant) -> TimerId {
        self.timers.set_interval(callback, interval, now)
    }

    pub fn pause_timer(&mut self, id: TimerId) -> bool { self.timers.pause(id) }

    pub fn resume_timer(&mut self, id: TimerId, now: Instant) -> bool { self.timers.resume(id, now) }

    pub fn clear_interval(&mut self, id: TimerId) -> bool { self.timers.clear(id) }

    pub fn timers(&self) -> &TimerRegistry { &self.timers }

    /// Queues every timer due at `now`; returns how many fired.
    pub fn poll_timers(&mut self, now: Instant) -> usize {
        if self.discarded {
            return 0;
        }
        let fired = self.timers.due(now);
        let count = fired.len();
        for callback in fired {
            self.queue_async_event(Box::new(move |queue: &mut EventQueue, host: &mut dyn EventHost| callback(queue, host)));
        }
        count
    }

    /* ── document transitions ── */

    /// Makes the queue inert until [`EventQueue::reset`]: local work and
    /// timers are cancelled, global entries stay.
    pub fn discard(&mut self) {
        self.discarded = true;
        self.clear();
    }

    pub fn reset(&mut self) {
        self.discarded = false;
        self.clear();
        self.lock_count = 0;
    }

    fn clear(&mut self) {
        self.async_queue.retain(|e| !e.local);
        self.sync_queue.clear();
        self.timers.clear_all();
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;

    /// Records handler calls; `exit_on` names a function that replaces the
    /// document.
    #[derive(Default)]
    pub(crate) struct RecordingHost {
        pub calls:      Vec<String>,
        pub attributes: HashMap<(u32, &'static str), String>,
        pub exit_on:    Option<&'static str>,
        pub current:    Vec<Option<CurrentEvent>>,
    }

    impl EventHost for RecordingHost {
        fn run_event_handler(&mut self, name: &str) -> bool {
            self.calls.push(name.to_string());
            self.exit_on == Some(name)
        }

        fn handler_attribute(&self, target: ElementId, attribute: &str) -> Option<String> {
            self.attributes.iter()
                .find(|((id, attr), _)| *id == target.0 && *attr == attribute)
                .map(|(_, v)| v.clone())
        }

        fn set_current_event(&mut self, event: Option<CurrentEvent>) {
            self.current.push(event);
        }
    }

    fn call(name: &'static str) -> AsyncCallback {
        Box::new(move |q: &mut EventQueue, h: &mut dyn EventHost| q.execute_event_handler(h, &format!("{name}();")))
    }

    fn click(id: u32) -> SyncEvent { SyncEvent { kind: SyncEventKind::Click, target: ElementId(id) } }

    #[test]
    fn sync_events_drain_before_async() {
        let mut host = RecordingHost::default();
        host.attributes.insert((1, "onclick"), "onClick1()".into());
        host.attributes.insert((2, "onclick"), " onClick2 ( ) ; ".into());
        let mut q = EventQueue::new();
        q.queue_async_event(call("timer"));
        q.queue_sync_event(click(1));
        q.queue_sync_event(click(2));

        assert_eq!(q.process_event_queue(&mut host), Ok(false));
        assert_eq!(host.calls, vec!["onClick1", "onClick2", "timer"]);
        assert_eq!(q.state(), QueueState::Idle);
        assert_eq!(q.pending(), (0, 0));
    }

    #[test]
    fn exit_stops_drain_and_keeps_lock() {
        let mut host = RecordingHost { exit_on: Some("navigate"), ..Default::default() };
        let mut q = EventQueue::new();
        q.queue_async_event(call("navigate"));
        q.queue_async_event(call("never"));
        q.queue_sync_event(click(9));                   // no handler attribute

        assert_eq!(q.process_event_queue(&mut host), Ok(true));
        assert_eq!(host.calls, vec!["navigate"]);
        assert_eq!(q.lock_count(), 1);
        assert_eq!(q.state(), QueueState::Blocked);
        assert_eq!(q.process_event_queue(&mut host), Ok(false));

        q.discard();
        q.reset();
        assert_eq!(q.state(), QueueState::Idle);
        assert_eq!(q.pending(), (0, 0));
    }

    #[test]
    fn nested_drain_is_a_no_op() {
        let mut host = RecordingHost::default();
        let mut q = EventQueue::new();
        q.queue_async_event(Box::new(|q: &mut EventQueue, h: &mut dyn EventHost| {
            assert_eq!(q.state(), QueueState::Draining);
            q.queue_async_event(call("later"));
            assert_eq!(q.process_event_queue(h), Ok(false));
            Ok(false)
        }));
        assert_eq!(q.process_event_queue(&mut host), Ok(false));
        assert_eq!(host.calls, vec!["later"]);
    }

    #[test]
    fn external_lock_blocks_drain() {
        let mut host = RecordingHost::default();
        let mut q = EventQueue::new();
        q.lock_sync_event_queue();
        q.queue_async_event(call("a"));
        assert_eq!(q.process_event_queue(&mut host), Ok(false));
        assert!(host.calls.is_empty());
        q.unlock_sync_event_queue().unwrap();
        assert_eq!(q.unlock_sync_event_queue(), Err(HandlerError::LockUnderflow));
        q.process_event_queue(&mut host).unwrap();
        assert_eq!(host.calls, vec!["a"]);
    }

    #[test]
    fn invalid_handler_is_fatal() {
        let mut host = RecordingHost::default();
        let q = EventQueue::new();
        assert_eq!(q.execute_event_handler(&mut host, "   "), Ok(false));
        assert!(matches!(
            q.execute_event_handler(&mut host, "alert('x')"),
            Err(HandlerError::InvalidHandler(_))
        ));
        assert!(q.execute_event_handler(&mut host, "f(); g()").is_err());
        assert!(host.calls.is_empty());

        let mut q = EventQueue::new();
        host.attributes.insert((1, "onclick"), "x = 1".into());
        q.queue_sync_event(click(1));
        assert!(q.process_event_queue(&mut host).is_err());
        assert_eq!(q.lock_count(), 0);
    }

    #[test]
    fn discard_keeps_global_entries() {
        let mut host = RecordingHost::default();
        let mut q = EventQueue::new();
        q.queue_async_event(call("local"));
        q.queue_global_async_event(call("global"));
        q.set_interval(Rc::new(|_: &mut EventQueue, _: &mut dyn EventHost| Ok(false)), Duration::from_secs(1), Instant::now());

        q.discard();
        q.queue_async_event(call("dropped"));
        q.queue_sync_event(click(1));
        assert_eq!(q.pending(), (0, 1));
        assert!(q.timers().is_empty());
        assert_eq!(q.process_event_queue(&mut host), Ok(false));
        assert!(host.calls.is_empty());

        q.reset();
        q.process_event_queue(&mut host).unwrap();
        assert_eq!(host.calls, vec!["global"]);
    }

    #[test]
    fn timers_fire_into_async_queue() {
        let mut host = RecordingHost::default();
        let mut q = EventQueue::new();
        let t0 = Instant::now();
        let id = q.set_interval(
            Rc::new(|q: &mut EventQueue, h: &mut dyn EventHost| q.execute_event_handler(h, "tick()")),
            Duration::from_millis(500),
            t0,
        );
        assert_eq!(q.poll_timers(t0 + Duration::from_millis(500)), 1);
        q.process_event_queue(&mut host).unwrap();
        assert!(q.pause_timer(id));
        assert_eq!(q.poll_timers(t0 + Duration::from_secs(2)), 0);
        assert!(q.resume_timer(id, t0 + Duration::from_secs(2)));
        assert_eq!(q.poll_timers(t0 + Duration::from_millis(2500)), 1);
        q.process_event_queue(&mut host).unwrap();
        assert_eq!(host.calls, vec!["tick", "tick"]);
        assert!(q.clear_interval(id));
    }
}
