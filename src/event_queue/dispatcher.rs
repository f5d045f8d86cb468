//! Broadcaster event (bevent) delivery.
//!
//! Subscriptions are the document's `beitem` elements, supplied by the host
//! as [`BeItem`] values. Matching occurrences are queued as local async
//! events; the caller drains the queue afterwards.

use tracing::debug;

use super::{CurrentEvent, ElementId, EventHost, EventQueue};
use crate::resource::locator::parse_url_ex;
use crate::resource::{ModuleLockStatus, ModuleUpdateStatus, Notification, ResourceCache, UrlContext};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BeventType {
    ModuleLocked,
    ModuleUpdated,
    TimerFired,
    DataButtonPressed,
    DataEventChanged,
    MainAudioStreamChanged,
}

/// A `beitem` element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BeItem {
    pub element:    ElementId,
    pub kind:       BeventType,
    /// `subscribe="subscribe"`
    pub subscribe:  bool,
    pub onoccur:    Option<String>,
    pub module_ref: Option<String>,
    pub es_ref:     Option<String>,
}

/// Event object exposed to the `onoccur` handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BeventEvent {
    pub kind:       BeventType,
    pub target:     ElementId,
    pub status:     i32,
    pub module_ref: String,
    pub es_ref:     String,
}

/// `/<component>[;<channel>]` audio stream reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioStream {
    pub component_id: u8,
    pub channel_id:   Option<u8>,
}

impl AudioStream {
    /// Accepts an optional `arib://<onid>.<tsid>.<sid>` prefix.
    pub fn parse(es_ref: &str) -> Option<Self> {
        let path = match es_ref.get(..7) {
            Some(scheme) if scheme.eq_ignore_ascii_case("arib://") => &es_ref[es_ref[7..].find('/')? + 7..],
            _ => es_ref,
        };
        let path = path.strip_prefix('/')?;
        let (component, channel) = match path.split_once(';') {
            Some((c, ch)) => (c, Some(ch.parse::<u8>().ok()?)),
            None => (path, None),
        };
        Some(Self { component_id: u8::from_str_radix(component, 16).ok()?, channel_id: channel })
    }

    /// Whether a subscription to `self` covers the playing stream `playing`.
    fn covers(&self, playing: &AudioStream) -> bool {
        self.component_id == playing.component_id
            && self.channel_id.is_none_or(|ch| Some(ch) == playing.channel_id)
    }
}

#[derive(Debug, Clone, Default)]
pub struct EventDispatcher {
    /// es_ref values are reported with the service prefix
    pub internet_content: bool,
}

impl EventDispatcher {
    pub fn new(internet_content: bool) -> Self { Self { internet_content } }

    fn subscribed<'a>(items: &'a [BeItem], kind: BeventType) -> impl Iterator<Item = &'a BeItem> {
        items.iter().filter(move |i| i.kind == kind && i.subscribe)
    }

    /// Queues `onoccur` of `item`; `false` when it has none.
    fn queue(queue: &mut EventQueue, item: &BeItem, event: BeventEvent) -> bool {
        let Some(onoccur) = item.onoccur.clone().filter(|h| !h.trim().is_empty()) else { return false };
        debug!(kind = ?event.kind, target = item.element.0, status = event.status, "bevent queued");
        queue.queue_async_event(Box::new(move |q: &mut EventQueue, host: &mut dyn EventHost| {
            host.set_current_event(Some(CurrentEvent::Bevent(event)));
            if q.execute_event_handler(host, &onoccur)? {
                return Ok(true);
            }
            host.set_current_event(None);
            Ok(false)
        }));
        true
    }

    fn event(kind: BeventType, item: &BeItem, status: i32) -> BeventEvent {
        BeventEvent { kind, target: item.element, status, module_ref: String::new(), es_ref: String::new() }
    }

    fn dispatch_for_module(
        &self,
        queue: &mut EventQueue,
        items: &[BeItem],
        ctx: &UrlContext<'_>,
        kind: BeventType,
        module: &str,
        status: i32,
    ) -> usize {
        let target = parse_url_ex(module, ctx);
        if target.component_id.is_none() || target.module_id.is_none() {
            return 0;
        }
        let mut queued = 0;
        for item in Self::subscribed(items, kind) {
            let Some(item_ref) = item.module_ref.as_deref().map(|r| parse_url_ex(r, ctx)) else { continue };
            if (item_ref.component_id, item_ref.module_id) != (target.component_id, target.module_id) {
                continue;
            }
            let event = BeventEvent { module_ref: module.to_string(), ..Self::event(kind, item, status) };
            queued += Self::queue(queue, item, event) as usize;
        }
        queued
    }

    pub fn dispatch_module_locked(
        &self, queue: &mut EventQueue, items: &[BeItem], ctx: &UrlContext<'_>, module: &str, status: ModuleLockStatus,
    ) -> usize {
        self.dispatch_for_module(queue, items, ctx, BeventType::ModuleLocked, module, status as i32)
    }

    pub fn dispatch_module_updated(
        &self, queue: &mut EventQueue, items: &[BeItem], ctx: &UrlContext<'_>, module: &str, status: ModuleUpdateStatus,
    ) -> usize {
        self.dispatch_for_module(queue, items, ctx, BeventType::ModuleUpdated, module, status as i32)
    }

    /// Status owed to a ModuleUpdated item that just subscribed; nothing is
    /// queued before the component's DII is known.
    pub fn subscribe_module_updated(&self, queue: &mut EventQueue, item: &BeItem, cache: &ResourceCache) -> bool {
        if item.kind != BeventType::ModuleUpdated || !item.subscribe {
            return false;
        }
        let Some(module) = item.module_ref.as_deref() else { return false };
        let target = cache.parse_url_ex(module);
        let (Some(cid), Some(mid)) = (target.component_id, target.module_id) else { return false };
        let Some(status) = cache.module_presence(cid, mid) else { return false };
        let event = BeventEvent { module_ref: module.to_string(), ..Self::event(BeventType::ModuleUpdated, item, status as i32) };
        Self::queue(queue, item, event)
    }

    pub fn dispatch_timer_fired(&self, queue: &mut EventQueue, item: &BeItem, status: i32) -> bool {
        item.subscribe && Self::queue(queue, item, Self::event(BeventType::TimerFired, item, status))
    }

    pub fn dispatch_data_button_pressed(&self, queue: &mut EventQueue, items: &[BeItem]) -> usize {
        Self::subscribed(items, BeventType::DataButtonPressed)
            .filter(|item| Self::queue(queue, item, Self::event(BeventType::DataButtonPressed, item, 0)))
            .count()
    }

    /// Items without `es_ref` see every component.
    pub fn dispatch_data_event_changed(&self, queue: &mut EventQueue, items: &[BeItem], component_id: u8) -> usize {
        let mut queued = 0;
        for item in Self::subscribed(items, BeventType::DataEventChanged) {
            let matches = item.es_ref.as_deref()
                .map_or(true, |r| AudioStream::parse(r).is_some_and(|s| s.component_id == component_id));
            if !matches {
                continue;
            }
            let event = BeventEvent { es_ref: self.es_ref(component_id, None), ..Self::event(BeventType::DataEventChanged, item, 0) };
            queued += Self::queue(queue, item, event) as usize;
        }
        queued
    }

    /// Status 1 when the referenced stream became the main audio, 0 when it
    /// stopped being it. A reference without channel id covers every channel
    /// of its component. Items without `es_ref` always get status 1.
    pub fn dispatch_main_audio_stream_changed(
        &self, queue: &mut EventQueue, items: &[BeItem], previous: AudioStream, current: AudioStream,
    ) -> usize {
        let es_ref = self.es_ref(current.component_id, current.channel_id);
        let mut queued = 0;
        for item in Self::subscribed(items, BeventType::MainAudioStreamChanged) {
            let status = match item.es_ref.as_deref() {
                None => 1,
                Some(r) => {
                    let Some(subscribed) = AudioStream::parse(r) else { continue };
                    match (subscribed.covers(&previous), subscribed.covers(&current)) {
                        (false, true) => 1,
                        (true, false) => 0,
                        _ => continue,
                    }
                }
            };
            let event = BeventEvent { es_ref: es_ref.clone(), ..Self::event(BeventType::MainAudioStreamChanged, item, status) };
            queued += Self::queue(queue, item, event) as usize;
        }
        queued
    }

    /// Bevents following a cache notification.
    pub fn on_notification(
        &self, queue: &mut EventQueue, items: &[BeItem], ctx: &UrlContext<'_>, notification: &Notification,
    ) -> usize {
        match notification {
            Notification::ModuleLocked { module_ref, status, .. } =>
                self.dispatch_module_locked(queue, items, ctx, module_ref, *status),
            Notification::ModuleUpdated { component_id, module_id, status } => {
                let module = crate::resource::module_ref(*component_id, *module_id);
                self.dispatch_module_updated(queue, items, ctx, &module, *status)
            }
            Notification::DataEventChanged { component_id, .. } =>
                self.dispatch_data_event_changed(queue, items, *component_id),
            Notification::ComponentUpdated { .. } | Notification::PmtUpdated { .. } => 0,
        }
    }

    fn es_ref(&self, component_id: u8, channel_id: Option<u8>) -> String {
        let prefix = if self.internet_content { "arib://-1.-1.-1/" } else { "/" };
        match channel_id {
            Some(ch) => format!("{prefix}{component_id:02x};{ch}"),
            None => format!("{prefix}{component_id:02x}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_queue::tests::RecordingHost;

    fn item(kind: BeventType, onoccur: &str) -> BeItem {
        BeItem {
            element:    ElementId(1),
            kind,
            subscribe:  true,
            onoccur:    Some(onoccur.to_string()),
            module_ref: None,
            es_ref:     None,
        }
    }

    fn ctx() -> UrlContext<'static> {
        UrlContext { active_document: Some("/40/0000/startup.bml"), ..Default::default() }
    }

    #[test]
    fn module_locked_matches_module_ref() {
        let items = vec![
            BeItem { module_ref: Some("/40/0001".into()), ..item(BeventType::ModuleLocked, "onLocked()") },
            BeItem { module_ref: Some("/40/0002".into()), ..item(BeventType::ModuleLocked, "other()") },
            BeItem { module_ref: Some("~/0001".into()), subscribe: false, ..item(BeventType::ModuleLocked, "unsub()") },
        ];
        let mut q = EventQueue::new();
        let d = EventDispatcher::default();
        assert_eq!(d.dispatch_module_locked(&mut q, &items, &ctx(), "/40/0001", ModuleLockStatus::Locked), 1);

        let mut host = RecordingHost::default();
        q.process_event_queue(&mut host).unwrap();
        assert_eq!(host.calls, vec!["onLocked"]);
        let Some(Some(CurrentEvent::Bevent(ev))) = host.current.first() else { panic!() };
        assert_eq!((ev.kind, ev.status, ev.module_ref.as_str()), (BeventType::ModuleLocked, 0, "/40/0001"));
        assert_eq!(host.current.last(), Some(&None));
    }

    #[test]
    fn notification_routing() {
        let items = vec![
            BeItem { module_ref: Some("/40/0003".into()), ..item(BeventType::ModuleUpdated, "upd()") },
            item(BeventType::DataEventChanged, "dec()"),
        ];
        let mut q = EventQueue::new();
        let d = EventDispatcher::default();
        let n = Notification::ModuleUpdated { component_id: 0x40, module_id: 3, status: ModuleUpdateStatus::Removed };
        assert_eq!(d.on_notification(&mut q, &items, &ctx(), &n), 1);
        assert_eq!(d.on_notification(&mut q, &items, &ctx(), &Notification::ComponentUpdated { component_id: 0x40, present: true }), 0);

        let mut host = RecordingHost::default();
        q.process_event_queue(&mut host).unwrap();
        assert_eq!(host.calls, vec!["upd"]);
        assert_eq!(d.dispatch_data_event_changed(&mut q, &items, 0x40), 1);
    }

    #[test]
    fn new_module_updated_subscription_gets_presence() {
        use crate::resource::RemoteCacheLimits;
        use crate::types::{ComponentPmt, Message, ModuleListEntry, ModuleListUpdated, PmtMessage};

        let mut cache = ResourceCache::new(RemoteCacheLimits::default(), None);
        cache.set_active_document(Some("/40/0000/startup.bml".into()));
        let sub = |m: &str| BeItem { module_ref: Some(m.into()), ..item(BeventType::ModuleUpdated, "upd()") };
        let d = EventDispatcher::default();
        let mut q = EventQueue::new();

        cache.on_message(&Message::Pmt(PmtMessage { components: vec![ComponentPmt {
            pid: 0x140, component_id: 0x40, stream_type: 0x0D, data_component_id: Some(0x0C), bxml_info: None,
        }] }));
        assert!(!d.subscribe_module_updated(&mut q, &sub("/40/0001"), &cache));
        assert!(d.subscribe_module_updated(&mut q, &sub("/50/0001"), &cache));

        cache.on_message(&Message::ModuleListUpdated(ModuleListUpdated {
            component_id:         0x40,
            modules:              vec![ModuleListEntry { id: 1, version: 0, size: 4 }],
            data_event_id:        0,
            return_to_entry_flag: None,
        }));
        assert!(d.subscribe_module_updated(&mut q, &sub("/40/0001"), &cache));
        assert!(d.subscribe_module_updated(&mut q, &sub("~/0002"), &cache));

        let mut host = RecordingHost::default();
        q.process_event_queue(&mut host).unwrap();
        let statuses: Vec<i32> = host.current.iter().flatten().map(|e| match e {
            CurrentEvent::Bevent(b) => b.status,
            CurrentEvent::Intrinsic(_) => -1,
        }).collect();
        assert_eq!(statuses, vec![1, 2, 1]);
    }

    #[test]
    fn main_audio_stream_selection() {
        let items = vec![
            BeItem { es_ref: Some("/10".into()), ..item(BeventType::MainAudioStreamChanged, "a10()") },
            BeItem { es_ref: Some("/11;1".into()), ..item(BeventType::MainAudioStreamChanged, "a11ch1()") },
            item(BeventType::MainAudioStreamChanged, "any()"),
        ];
        let d = EventDispatcher::default();
        let s = |c, ch| AudioStream { component_id: c, channel_id: ch };

        // /10 -> /11;1 : /10 unselected, /11;1 selected, bare item always
        let mut q = EventQueue::new();
        assert_eq!(d.dispatch_main_audio_stream_changed(&mut q, &items, s(0x10, None), s(0x11, Some(1))), 3);

        // channel switch inside /10 does not concern /10
        let mut q = EventQueue::new();
        assert_eq!(d.dispatch_main_audio_stream_changed(&mut q, &items, s(0x10, Some(1)), s(0x10, Some(2))), 1);

        let mut host = RecordingHost::default();
        let mut q = EventQueue::new();
        d.dispatch_main_audio_stream_changed(&mut q, &items[..2], s(0x11, Some(1)), s(0x10, None));
        q.process_event_queue(&mut host).unwrap();
        let statuses: Vec<i32> = host.current.iter().flatten().map(|e| match e {
            CurrentEvent::Bevent(b) => b.status,
            CurrentEvent::Intrinsic(_) => -1,
        }).collect();
        assert_eq!(statuses, vec![1, 0]);
    }

    #[test]
    fn audio_stream_reference_forms() {
        assert_eq!(AudioStream::parse("/10"), Some(AudioStream { component_id: 0x10, channel_id: None }));
        assert_eq!(AudioStream::parse("/11;2"), Some(AudioStream { component_id: 0x11, channel_id: Some(2) }));
        assert_eq!(AudioStream::parse("arib://-1.-1.-1/12"), Some(AudioStream { component_id: 0x12, channel_id: None }));
        assert_eq!(AudioStream::parse("12"), None);
    }

    #[test]
    fn data_button_and_timer() {
        let items = vec![item(BeventType::DataButtonPressed, "pressed()"), item(BeventType::DataButtonPressed, "")];
        let d = EventDispatcher::new(true);
        let mut q = EventQueue::new();
        assert_eq!(d.dispatch_data_button_pressed(&mut q, &items), 1);
        assert!(d.dispatch_timer_fired(&mut q, &item(BeventType::TimerFired, "fired()"), 0));
        let mut host = RecordingHost::default();
        q.process_event_queue(&mut host).unwrap();
        assert_eq!(host.calls, vec!["pressed", "fired"]);
        assert_eq!(d.es_ref(0x10, Some(1)), "arib://-1.-1.-1/10;1");
    }
}
