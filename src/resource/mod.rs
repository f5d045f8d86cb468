//! Resource cache of the data broadcasting engine.
//!
//! Holds downloaded and locked carousel modules, answers resource requests
//! from the document layer and turns protocol messages into notifications.
//! Everything here is single-threaded: shared blobs are `Rc`, deferred
//! answers are `oneshot` receivers.

pub mod remote;
pub mod locator;

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::rc::Rc;

use bytes::Bytes;
use serde::Serialize;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::error::LockError;
use crate::types::{
    ComponentPmt, CurrentTime, MediaType, Message, ModuleDownloaded, ModuleListEntry, ModuleListUpdated,
    ProgramInfo,
};

pub use self::remote::{RemoteCache, RemoteCacheLimits, RemoteFetcher, RemoteResponse};
pub use self::locator::{module_ref, ParsedUrl, ParsedUrlEx, ServiceReference, TunedService, UrlContext};

/// Status lamps of the receiver. Calls are fire-and-forget.
pub trait Indicator {
    fn set_receiving_status(&self, receiving: bool);
    fn set_networking_get_status(&self, active: bool);
    /// Driven by hosts that perform POST transfers themselves.
    fn set_networking_post_status(&self, _active: bool) {}
}

/// Module lock regimes. They never hold the same module at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockKind {
    LockModuleOnMemory,
    LockModuleOnMemoryEx,
}

impl LockKind {
    pub fn is_ex(self) -> bool { self == LockKind::LockModuleOnMemoryEx }
}

impl fmt::Display for LockKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockKind::LockModuleOnMemory => f.write_str("lockModuleOnMemory"),
            LockKind::LockModuleOnMemoryEx => f.write_str("lockModuleOnMemoryEx"),
        }
    }
}

/* ── cached data ───────────────────────────────────────────────────── */

#[derive(Debug)]
pub struct CachedFile {
    pub content_location: Option<String>,
    pub content_type:     MediaType,
    pub data:             Bytes,
    /// derived payloads keyed by transform parameters (e.g. a CLUT name)
    derived:              RefCell<HashMap<String, Bytes>>,
    revoked:              Cell<bool>,
}

impl CachedFile {
    fn new(content_location: Option<String>, content_type: MediaType, data: Bytes) -> Self {
        Self { content_location, content_type, data, derived: RefCell::default(), revoked: Cell::new(false) }
    }

    /// Memoized transform of the payload. `None` once revoked.
    pub fn derived(&self, key: &str, transform: impl FnOnce(&[u8]) -> Bytes) -> Option<Bytes> {
        if self.revoked.get() {
            return None;
        }
        let mut derived = self.derived.borrow_mut();
        Some(derived.entry(key.to_string()).or_insert_with(|| transform(&self.data)).clone())
    }

    pub fn is_revoked(&self) -> bool { self.revoked.get() }

    fn revoke(&self) {
        self.revoked.set(true);
        self.derived.borrow_mut().clear();
    }
}

#[derive(Debug)]
pub struct CachedModule {
    pub component_id:  u8,
    pub module_id:     u16,
    pub version:       u8,
    pub data_event_id: u8,
    /// keyed by lower-cased Content-Location; `None` for an unnamed module
    pub files:         HashMap<Option<String>, Rc<CachedFile>>,
    revoked:           Cell<bool>,
}

impl CachedModule {
    fn from_message(msg: &ModuleDownloaded) -> Self {
        let files = msg.files.iter()
            .map(|f| {
                let key = f.content_location.as_ref().map(|l| l.to_lowercase());
                let file = CachedFile::new(f.content_location.clone(), f.content_type.clone(), f.data.clone());
                (key, Rc::new(file))
            })
            .collect();
        Self {
            component_id:  msg.component_id,
            module_id:     msg.module_id,
            version:       msg.version,
            data_event_id: msg.data_event_id,
            files,
            revoked:       Cell::new(false),
        }
    }

    pub fn file(&self, filename: Option<&str>) -> Option<&Rc<CachedFile>> {
        self.files.get(&filename.map(str::to_lowercase))
    }

    pub fn is_revoked(&self) -> bool { self.revoked.get() }

    fn revoke(&self) {
        self.revoked.set(true);
        for file in self.files.values() {
            file.revoke();
        }
    }
}

#[derive(Debug, Clone)]
struct LockedModule {
    module:    Rc<CachedModule>,
    locked_by: LockKind,
}

/// Module list of the latest DII of a component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadComponentInfo {
    pub component_id:         u8,
    pub data_event_id:        u8,
    pub modules:              BTreeMap<u16, ModuleListEntry>,
    pub return_to_entry_flag: Option<bool>,
}

impl From<&ModuleListUpdated> for DownloadComponentInfo {
    fn from(msg: &ModuleListUpdated) -> Self {
        Self {
            component_id:         msg.component_id,
            data_event_id:        msg.data_event_id,
            modules:              msg.modules.iter().map(|m| (m.id, *m)).collect(),
            return_to_entry_flag: msg.return_to_entry_flag,
        }
    }
}

/// A resolved resource request.
#[derive(Debug, Clone)]
pub struct FetchedResource {
    pub module: Rc<CachedModule>,
    /// `None` when the request named no file
    pub file:   Option<Rc<CachedFile>>,
}

/// Answer of [`ResourceCache::fetch_resource_async`]. `Ready(None)` means
/// the resource is known to be unreachable.
#[derive(Debug)]
pub enum Fetch {
    Ready(Option<FetchedResource>),
    Pending(oneshot::Receiver<Option<FetchedResource>>),
    /// internet resource, transferred through the shared remote cache
    Remote(RemoteRequest),
}

/// An http(s) resource of internet content.
pub struct RemoteRequest {
    pub url: String,
    remote:  Rc<RemoteCache>,
}

impl RemoteRequest {
    /// `None` on transfer failure.
    pub async fn send<F: RemoteFetcher>(&self, fetcher: &F) -> Option<RemoteResponse> {
        self.remote.fetch(fetcher, &self.url).await
    }
}

impl fmt::Debug for RemoteRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteRequest").field("url", &self.url).finish_non_exhaustive()
    }
}

/// ModuleUpdated status values (TR-B14).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleUpdateStatus {
    /// version changed in the DII
    Updated           = 0,
    /// no longer listed in the DII, or the component left the PMT
    Removed           = 1,
    /// newly listed in the DII
    Listed            = 2,
    /// listed by the DII of a new data event, absent before
    ListedInNewEvent  = 4,
    /// dropped by the DII of a new data event
    DroppedInNewEvent = 5,
    /// still listed by the DII of a new data event
    KeptInNewEvent    = 6,
}

/// ModuleLocked status values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleLockStatus {
    Locked           = 0,
    DataEventChanged = -1,
    Unavailable      = -2,
}

/// Changes observed by the cache, handed to the event layer.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    DataEventChanged {
        component_id: u8,
        previous:     Option<DownloadComponentInfo>,
        current:      DownloadComponentInfo,
    },
    ModuleUpdated { component_id: u8, module_id: u16, status: ModuleUpdateStatus },
    ComponentUpdated { component_id: u8, present: bool },
    PmtUpdated { components: Vec<ComponentPmt> },
    ModuleLocked { module_ref: String, kind: LockKind, status: ModuleLockStatus },
}

#[derive(Debug, Clone)]
struct LockRequest {
    kind:          LockKind,
    module_ref:    String,
    data_event_id: Option<u8>,
}

#[derive(Debug)]
struct ModuleRequest {
    filename: Option<String>,
    lock:     Option<LockRequest>,
    sender:   Option<oneshot::Sender<Option<FetchedResource>>>,
}

/// `/cc/mmmm` entry of [`ResourceCache::locked_modules`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LockedModuleRef {
    pub module: String,
    pub is_ex:  bool,
}

/// Answer of [`ResourceCache::request_module_lock`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockRequestOutcome {
    /// locked now; a `ModuleLocked` notification has been queued
    Locked,
    /// locks when the module arrives
    Deferred,
    /// not in the PMT, or not in the DII
    NotAvailable,
}

/* ── cache ─────────────────────────────────────────────────────────── */

pub struct ResourceCache {
    indicator:            Option<Rc<dyn Indicator>>,
    remote:               Rc<RemoteCache>,
    active_document:      Option<String>,
    base_uri_directory:   Option<String>,
    internet_content:     bool,
    cached:               HashMap<u8, HashMap<u16, Rc<CachedModule>>>,
    locked:               HashMap<u8, HashMap<u16, LockedModule>>,
    download_components:  HashMap<u8, DownloadComponentInfo>,
    pmt_components:       HashMap<u8, ComponentPmt>,
    pmt_retrieved:        bool,
    requests:             HashMap<u8, HashMap<u16, Vec<ModuleRequest>>>,
    program_info:         Option<ProgramInfo>,
    program_info_waiters: Vec<oneshot::Sender<ProgramInfo>>,
    current_time:         Option<CurrentTime>,
    receiving:            bool,
    pending:              Vec<Notification>,
}

impl ResourceCache {
    pub fn new(limits: RemoteCacheLimits, indicator: Option<Rc<dyn Indicator>>) -> Self {
        Self {
            remote:               Rc::new(RemoteCache::new(limits, indicator.clone())),
            indicator,
            active_document:      None,
            base_uri_directory:   None,
            internet_content:     false,
            cached:               HashMap::new(),
            locked:               HashMap::new(),
            download_components:  HashMap::new(),
            pmt_components:       HashMap::new(),
            pmt_retrieved:        false,
            requests:             HashMap::new(),
            program_info:         None,
            program_info_waiters: Vec::new(),
            current_time:         None,
            receiving:            false,
            pending:              Vec::new(),
        }
    }

    /* ── document context ── */

    pub fn set_active_document(&mut self, document: Option<String>) { self.active_document = document; }

    pub fn active_document(&self) -> Option<&str> { self.active_document.as_deref() }

    pub fn set_base_uri_directory(&mut self, dir: Option<String>) { self.base_uri_directory = dir; }

    pub fn set_internet_content(&mut self, active: bool) { self.internet_content = active; }

    pub fn remote(&self) -> Rc<RemoteCache> { Rc::clone(&self.remote) }

    pub fn tuned_service(&self) -> TunedService {
        let info = self.program_info.as_ref();
        TunedService {
            original_network_id: info.and_then(|p| p.original_network_id),
            transport_stream_id: info.and_then(|p| p.transport_stream_id),
            service_id:          info.and_then(|p| p.service_id),
            event_id:            info.and_then(|p| p.event_id),
        }
    }

    fn url_context(&self) -> UrlContext<'_> {
        UrlContext {
            active_document:    self.active_document.as_deref(),
            base_uri_directory: self.base_uri_directory.as_deref(),
            tuned:              self.tuned_service(),
        }
    }

    pub fn parse_url(&self, url: &str) -> ParsedUrl { locator::parse_url(url, &self.url_context()) }

    pub fn parse_url_ex(&self, url: &str) -> ParsedUrlEx { locator::parse_url_ex(url, &self.url_context()) }

    pub fn parse_service_reference(&self, reference: &str) -> Option<ServiceReference> {
        locator::parse_service_reference(reference, &self.tuned_service())
    }

    /// Content ids are not transmitted by the receiver.
    pub fn data_carousel_uri(&self) -> String { locator::data_carousel_uri(&self.tuned_service(), None) }

    pub fn service_uri(&self) -> String { locator::service_uri(&self.tuned_service()) }

    pub fn event_uri(&self) -> String { locator::event_uri(&self.tuned_service()) }

    pub fn program_info(&self) -> Option<&ProgramInfo> { self.program_info.as_ref() }

    pub fn current_time_unix_millis(&self) -> Option<i64> { self.current_time.map(|t| t.time_unix_millis) }

    /* ── lookups ── */

    pub fn cached_module(&self, component_id: u8, module_id: u16) -> Option<&Rc<CachedModule>> {
        self.cached.get(&component_id)?.get(&module_id)
    }

    pub fn pmt_component(&self, component_id: u8) -> Option<&ComponentPmt> {
        self.pmt_components.get(&component_id)
    }

    pub fn download_component_info(&self, component_id: u8) -> Option<&DownloadComponentInfo> {
        self.download_components.get(&component_id)
    }

    /// DII-listed components in component id order.
    pub fn download_components(&self) -> Vec<&DownloadComponentInfo> {
        let mut components: Vec<_> = self.download_components.values().collect();
        components.sort_by_key(|c| c.component_id);
        components
    }

    pub fn cached_module_count(&self, component_id: u8) -> usize {
        self.cached.get(&component_id).map_or(0, HashMap::len)
    }

    pub fn component_exists_in_download_info(&self, component_id: u8) -> bool {
        self.download_components.contains_key(&component_id)
    }

    pub fn module_exists_in_download_info(&self, component_id: u8, module_id: u16) -> bool {
        self.download_components.get(&component_id).is_some_and(|c| c.modules.contains_key(&module_id))
    }

    /// ModuleUpdated status reported to a new subscription: `Removed` when
    /// the component is not in the PMT or the module is not in its DII,
    /// `Listed` when it is. `None` until a DII arrives.
    pub fn module_presence(&self, component_id: u8, module_id: u16) -> Option<ModuleUpdateStatus> {
        if !self.pmt_components.contains_key(&component_id) {
            return Some(ModuleUpdateStatus::Removed);
        }
        let info = self.download_components.get(&component_id)?;
        Some(if info.modules.contains_key(&module_id) { ModuleUpdateStatus::Listed } else { ModuleUpdateStatus::Removed })
    }

    pub fn module_locked_by(&self, component_id: u8, module_id: u16) -> Option<LockKind> {
        self.locked.get(&component_id)?.get(&module_id).map(|l| l.locked_by)
    }

    pub fn is_module_locked(&self, component_id: u8, module_id: u16) -> bool {
        self.module_locked_by(component_id, module_id).is_some()
    }

    pub fn locked_modules(&self) -> Vec<LockedModuleRef> {
        let mut refs: Vec<_> = self.locked.iter()
            .flat_map(|(&cid, modules)| modules.iter().map(move |(&mid, l)| LockedModuleRef {
                module: module_ref(cid, mid),
                is_ex:  l.locked_by.is_ex(),
            }))
            .collect();
        refs.sort_by(|a, b| a.module.cmp(&b.module));
        refs
    }

    /// Notifications produced since the last call.
    pub fn take_notifications(&mut self) -> Vec<Notification> { std::mem::take(&mut self.pending) }

    /* ── protocol input ── */

    /// Applies one protocol message; returns the notifications it caused.
    pub fn on_message(&mut self, msg: &Message) -> Vec<Notification> {
        match msg {
            Message::ModuleDownloaded(m) => self.on_module_downloaded(m),
            Message::ModuleListUpdated(m) => self.on_module_list_updated(m),
            Message::Pmt(p) => self.on_pmt(&p.components),
            Message::ProgramInfo(p) => {
                self.program_info = Some(p.clone());
                for tx in self.program_info_waiters.drain(..) {
                    let _ = tx.send(p.clone());
                }
                self.update_receiving_status();
            }
            Message::CurrentTime(t) => self.current_time = Some(*t),
            Message::Error(e) => warn!(message = %e.message, "error from stream side"),
            Message::EsEventUpdated(_) | Message::Pcr(_) | Message::Bit(_) => {}
        }
        self.take_notifications()
    }

    fn on_module_downloaded(&mut self, msg: &ModuleDownloaded) {
        let (cid, mid) = (msg.component_id, msg.module_id);
        if let Some(dc) = self.download_components.get(&cid) {
            if dc.data_event_id != msg.data_event_id {
                debug!(component_id = cid, module_id = mid, "module from a previous data event dropped");
                return;
            }
        }

        let module = Rc::new(CachedModule::from_message(msg));
        let previous = self.cached.entry(cid).or_default().insert(mid, Rc::clone(&module));
        info!(component_id = cid, module_id = mid, version = msg.version, files = module.files.len(), "module cached");
        if let Some(previous) = previous {
            self.release(&previous);
        }

        let Some(waiters) = self.requests.get_mut(&cid).and_then(|r| r.remove(&mid)) else { return };
        for req in waiters {
            if let Some(lock) = &req.lock {
                self.complete_lock_request(cid, mid, lock);
            }
            let file = req.filename.as_deref().map(|f| module.file(Some(f)).cloned());
            let result = match file {
                Some(None) => None,
                Some(file) => Some(FetchedResource { module: Rc::clone(&module), file }),
                None => Some(FetchedResource { module: Rc::clone(&module), file: None }),
            };
            debug!(component_id = cid, module_id = mid, filename = ?req.filename, found = result.is_some(), "fetch completed");
            if let Some(tx) = req.sender {
                let _ = tx.send(result);
            }
        }
        self.update_receiving_status();
    }

    fn complete_lock_request(&mut self, cid: u8, mid: u16, lock: &LockRequest) {
        let current_event = self.download_components.get(&cid).map(|c| c.data_event_id);
        let status = if lock.kind.is_ex() && lock.data_event_id.is_some() && current_event != lock.data_event_id {
            ModuleLockStatus::DataEventChanged
        } else if self.lock_cached_module(cid, mid, lock.kind).is_ok() {
            ModuleLockStatus::Locked
        } else {
            ModuleLockStatus::Unavailable
        };
        self.pending.push(Notification::ModuleLocked { module_ref: lock.module_ref.clone(), kind: lock.kind, status });
    }

    fn on_module_list_updated(&mut self, msg: &ModuleListUpdated) {
        let cid = msg.component_id;
        let current = DownloadComponentInfo::from(msg);
        let previous = self.download_components.insert(cid, current.clone());

        if let Some(prev) = previous.as_ref().filter(|p| p.data_event_id != current.data_event_id) {
            info!(component_id = cid, from = prev.data_event_id, to = current.data_event_id, "data event changed");
            if let Some(modules) = self.cached.remove(&cid) {
                for module in modules.values() {
                    self.release(module);
                }
            }
            self.pending.push(Notification::DataEventChanged {
                component_id: cid,
                previous:     previous.clone(),
                current:      current.clone(),
            });
            self.expire_ex_locks(cid, current.data_event_id);
        }
        for (module_id, status) in module_updates(previous.as_ref(), &current) {
            self.pending.push(Notification::ModuleUpdated { component_id: cid, module_id, status });
        }

        // requests for modules missing from the DII can never complete
        let unreachable: Vec<u16> = self.requests.get(&cid)
            .map(|r| r.keys().copied().filter(|id| !current.modules.contains_key(id)).collect())
            .unwrap_or_default();
        for mid in unreachable {
            self.fail_requests(cid, mid);
        }
        self.update_receiving_status();
    }

    /// Ex locks requested under an earlier data event resolve as
    /// `DataEventChanged`; their fetch waiters keep waiting.
    fn expire_ex_locks(&mut self, cid: u8, data_event_id: u8) {
        let Some(modules) = self.requests.get_mut(&cid) else { return };
        let mut expired = Vec::new();
        for reqs in modules.values_mut() {
            for req in reqs.iter_mut() {
                let stale = req.lock.as_ref()
                    .is_some_and(|l| l.kind.is_ex() && l.data_event_id.is_some_and(|e| e != data_event_id));
                if stale {
                    expired.extend(req.lock.take());
                }
            }
            reqs.retain(|r| r.lock.is_some() || r.sender.is_some());
        }
        modules.retain(|_, reqs| !reqs.is_empty());
        for lock in expired {
            debug!(module = %lock.module_ref, "lock request expired by data event change");
            self.pending.push(Notification::ModuleLocked {
                module_ref: lock.module_ref,
                kind:       lock.kind,
                status:     ModuleLockStatus::DataEventChanged,
            });
        }
    }

    fn on_pmt(&mut self, components: &[ComponentPmt]) {
        let next: HashMap<u8, ComponentPmt> = components.iter().map(|c| (c.component_id, c.clone())).collect();
        let removed: Vec<u8> = self.pmt_components.keys().copied().filter(|id| !next.contains_key(id)).collect();
        let added: Vec<u8> = if self.pmt_retrieved {
            next.keys().copied().filter(|id| !self.pmt_components.contains_key(id)).collect()
        } else {
            Vec::new()
        };
        self.pmt_retrieved = true;
        self.pmt_components = next;

        for &cid in &removed {
            info!(component_id = cid, "component left the PMT");
            self.unlock_component(cid);
            self.pending.push(Notification::ComponentUpdated { component_id: cid, present: false });
            if let Some(info) = self.download_components.remove(&cid) {
                for &module_id in info.modules.keys() {
                    self.pending.push(Notification::ModuleUpdated {
                        component_id: cid,
                        module_id,
                        status: ModuleUpdateStatus::Removed,
                    });
                }
            }
        }
        for &cid in &added {
            self.pending.push(Notification::ComponentUpdated { component_id: cid, present: true });
        }
        self.pending.push(Notification::PmtUpdated { components: components.to_vec() });

        let gone: Vec<u8> = self.requests.keys().copied().filter(|id| !self.pmt_components.contains_key(id)).collect();
        for cid in gone {
            let modules: Vec<u16> = self.requests.get(&cid).map(|r| r.keys().copied().collect()).unwrap_or_default();
            for mid in modules {
                self.fail_requests(cid, mid);
            }
        }
        self.update_receiving_status();
    }

    /// Resolves every waiter of a module as unreachable.
    fn fail_requests(&mut self, cid: u8, mid: u16) {
        let Some(waiters) = self.requests.get_mut(&cid).and_then(|r| r.remove(&mid)) else { return };
        warn!(component_id = cid, module_id = mid, waiters = waiters.len(), "resource unreachable");
        for req in waiters {
            if let Some(lock) = req.lock {
                self.pending.push(Notification::ModuleLocked {
                    module_ref: lock.module_ref,
                    kind:       lock.kind,
                    status:     ModuleLockStatus::Unavailable,
                });
            }
            if let Some(tx) = req.sender {
                let _ = tx.send(None);
            }
        }
    }

    fn update_receiving_status(&mut self) {
        self.requests.retain(|_, modules| !modules.is_empty());
        let receiving = !self.program_info_waiters.is_empty() || !self.requests.is_empty();
        if receiving != self.receiving {
            self.receiving = receiving;
            if let Some(indicator) = &self.indicator {
                indicator.set_receiving_status(receiving);
            }
        }
    }

    /* ── fetch ── */

    /// Locked version first, then the latest cached one.
    pub fn fetch_locked_resource(&self, url: &str) -> Option<FetchedResource> {
        let ParsedUrlEx { component_id: Some(cid), module_id: Some(mid), filename } = self.parse_url_ex(url) else {
            return None;
        };
        let module = self.locked.get(&cid).and_then(|c| c.get(&mid)).map(|l| &l.module)
            .or_else(|| self.cached_module(cid, mid))?;
        match filename {
            Some(name) => {
                let file = module.file(Some(&name))?;
                Some(FetchedResource { module: Rc::clone(module), file: Some(Rc::clone(file)) })
            }
            None => Some(FetchedResource {
                module: Rc::clone(module),
                file:   module.file(None).cloned(),
            }),
        }
    }

    /// Resolves `url` now if possible, otherwise registers a waiter. With a
    /// `lock_kind` the module is also locked once it is available. Internet
    /// content hands http(s) resources to the remote cache.
    pub fn fetch_resource_async(&mut self, url: &str, lock_kind: Option<LockKind>) -> Fetch {
        if let Some(request) = self.remote_request(url) {
            debug!(url = %request.url, "remote fetch");
            return Fetch::Remote(request);
        }
        let ParsedUrlEx { component_id: Some(cid), module_id: Some(mid), filename } = self.parse_url_ex(url) else {
            return Fetch::Ready(None);
        };
        if let Some(found) = self.fetch_locked_resource(url) {
            if let Some(kind) = lock_kind {
                let status = match self.lock_cached_module(cid, mid, kind) {
                    Ok(_) => ModuleLockStatus::Locked,
                    Err(_) => ModuleLockStatus::Unavailable,
                };
                self.pending.push(Notification::ModuleLocked { module_ref: module_ref(cid, mid), kind, status });
            }
            return Fetch::Ready(Some(found));
        }
        if self.pmt_retrieved && self.is_unreachable(cid, mid) {
            debug!(url, "resource unreachable");
            return Fetch::Ready(None);
        }

        let (tx, rx) = oneshot::channel();
        let lock = lock_kind.map(|kind| LockRequest {
            kind,
            module_ref:    module_ref(cid, mid),
            data_event_id: self.download_components.get(&cid).map(|c| c.data_event_id),
        });
        self.push_request(cid, mid, ModuleRequest { filename, lock, sender: Some(tx) });
        debug!(url, "fetch pending");
        Fetch::Pending(rx)
    }

    /// `None` unless internet content is active and `url` is an http(s)
    /// resource.
    pub fn remote_request(&self, url: &str) -> Option<RemoteRequest> {
        if !self.internet_content {
            return None;
        }
        let url = locator::resolve_remote_url(url, &self.url_context())?;
        Some(RemoteRequest { url, remote: Rc::clone(&self.remote) })
    }

    /// Cached without the file, not in the PMT, or missing from a known DII.
    fn is_unreachable(&self, cid: u8, mid: u16) -> bool {
        self.cached_module(cid, mid).is_some()
            || !self.pmt_components.contains_key(&cid)
            || self.download_components.get(&cid).is_some_and(|c| !c.modules.contains_key(&mid))
    }

    fn push_request(&mut self, cid: u8, mid: u16, req: ModuleRequest) {
        self.requests.entry(cid).or_default().entry(mid).or_default().push(req);
        self.update_receiving_status();
    }

    /// Locks `module` (a `/cc/mmmm` reference) now or when it arrives.
    pub fn request_module_lock(&mut self, module: &str, kind: LockKind) -> Result<LockRequestOutcome, LockError> {
        let ParsedUrlEx { component_id: Some(cid), module_id: Some(mid), .. } = self.parse_url_ex(module) else {
            return Ok(LockRequestOutcome::NotAvailable);
        };
        if let Some(held_by) = self.module_locked_by(cid, mid).filter(|&k| k != kind) {
            return Err(LockError::HeldByOtherRegime { component_id: cid, module_id: mid, held_by });
        }
        if !self.pmt_components.contains_key(&cid)
            || self.download_components.get(&cid).is_some_and(|c| !c.modules.contains_key(&mid))
        {
            return Ok(LockRequestOutcome::NotAvailable);
        }
        if self.lock_cached_module(cid, mid, kind).is_ok() {
            self.pending.push(Notification::ModuleLocked {
                module_ref: module_ref(cid, mid),
                kind,
                status:     ModuleLockStatus::Locked,
            });
            return Ok(LockRequestOutcome::Locked);
        }
        let lock = LockRequest {
            kind,
            module_ref:    module_ref(cid, mid),
            data_event_id: self.download_components.get(&cid).map(|c| c.data_event_id),
        };
        self.push_request(cid, mid, ModuleRequest { filename: None, lock: Some(lock), sender: None });
        Ok(LockRequestOutcome::Deferred)
    }

    /// Resolves once program information is known.
    pub fn get_program_info_async(&mut self) -> oneshot::Receiver<ProgramInfo> {
        let (tx, rx) = oneshot::channel();
        match &self.program_info {
            Some(info) => {
                let _ = tx.send(info.clone());
            }
            None => {
                self.program_info_waiters.push(tx);
                self.update_receiving_status();
            }
        }
        rx
    }

    /* ── locks ── */

    pub fn lock_cached_module(&mut self, cid: u8, mid: u16, kind: LockKind) -> Result<Rc<CachedModule>, LockError> {
        let module = self.cached_module(cid, mid).cloned()
            .ok_or(LockError::NotCached { component_id: cid, module_id: mid })?;
        let slot = self.locked.entry(cid).or_default();
        if let Some(held) = slot.get(&mid) {
            if held.locked_by != kind {
                return Err(LockError::HeldByOtherRegime { component_id: cid, module_id: mid, held_by: held.locked_by });
            }
        }
        let previous = slot.insert(mid, LockedModule { module: Rc::clone(&module), locked_by: kind });
        debug!(component_id = cid, module_id = mid, %kind, "module locked");
        if let Some(previous) = previous {
            self.release(&previous.module);
        }
        Ok(module)
    }

    /// Only a lock held by `kind` is released.
    pub fn unlock_module(&mut self, cid: u8, mid: u16, kind: LockKind) -> bool {
        let Some(slot) = self.locked.get_mut(&cid) else { return false };
        if slot.get(&mid).is_none_or(|l| l.locked_by != kind) {
            return false;
        }
        let Some(released) = slot.remove(&mid) else { return false };
        if slot.is_empty() {
            self.locked.remove(&cid);
        }
        self.release(&released.module);
        true
    }

    /// `None` releases every lock; otherwise only locks of that regime.
    pub fn unlock_modules(&mut self, kind: Option<LockKind>) {
        let mut released = Vec::new();
        for slot in self.locked.values_mut() {
            slot.retain(|_, l| {
                let keep = kind.is_some_and(|k| k != l.locked_by);
                if !keep {
                    released.push(Rc::clone(&l.module));
                }
                keep
            });
        }
        self.locked.retain(|_, slot| !slot.is_empty());
        for module in released {
            self.release(&module);
        }
    }

    fn unlock_component(&mut self, cid: u8) {
        if let Some(slot) = self.locked.remove(&cid) {
            for l in slot.into_values() {
                self.release(&l.module);
            }
        }
    }

    /// Revokes `module` unless it is still the latest cached version or
    /// held by a lock.
    fn release(&self, module: &Rc<CachedModule>) {
        let latest = self.cached_module(module.component_id, module.module_id)
            .is_some_and(|m| Rc::ptr_eq(m, module));
        let locked = self.locked.get(&module.component_id)
            .and_then(|c| c.get(&module.module_id))
            .is_some_and(|l| Rc::ptr_eq(&l.module, module));
        if !latest && !locked {
            debug!(component_id = module.component_id, module_id = module.module_id, version = module.version, "module revoked");
            module.revoke();
        }
    }

    /// Drops every cached and locked module; pending requests resolve as
    /// unreachable. PMT and DII contents stay known.
    pub fn clear_cache(&mut self) {
        let cached: Vec<Rc<CachedModule>> = self.cached.drain().flat_map(|(_, m)| m.into_values()).collect();
        let locked: Vec<Rc<CachedModule>> = self.locked.drain()
            .flat_map(|(_, m)| m.into_values().map(|l| l.module))
            .collect();
        for module in cached.iter().chain(&locked) {
            module.revoke();
        }
        let keys: Vec<(u8, u16)> = self.requests.iter()
            .flat_map(|(&cid, m)| m.keys().map(move |&mid| (cid, mid)))
            .collect();
        for (cid, mid) in keys {
            self.fail_requests(cid, mid);
        }
        self.remote.clear();
        self.update_receiving_status();
    }
}

/// ModuleUpdated statuses between two DIIs of a component. The first DII
/// reports every module as listed; a new data event adds a 4, 5 or 6
/// status after the per-module one.
fn module_updates(
    previous: Option<&DownloadComponentInfo>,
    current: &DownloadComponentInfo,
) -> Vec<(u16, ModuleUpdateStatus)> {
    let new_event = previous.is_some_and(|p| p.data_event_id != current.data_event_id);
    let mut updates = Vec::new();
    for (&id, entry) in &current.modules {
        match previous.and_then(|p| p.modules.get(&id)) {
            None => {
                updates.push((id, ModuleUpdateStatus::Listed));
                if new_event {
                    updates.push((id, ModuleUpdateStatus::ListedInNewEvent));
                }
            }
            Some(old) => {
                if old.version != entry.version {
                    updates.push((id, ModuleUpdateStatus::Updated));
                }
                if new_event {
                    updates.push((id, ModuleUpdateStatus::KeptInNewEvent));
                }
            }
        }
    }
    let dropped = previous.into_iter()
        .flat_map(|p| p.modules.keys().copied())
        .filter(|id| !current.modules.contains_key(id));
    for id in dropped {
        updates.push((id, ModuleUpdateStatus::Removed));
        if new_event {
            updates.push((id, ModuleUpdateStatus::DroppedInNewEvent));
        }
    }
    updates
}
