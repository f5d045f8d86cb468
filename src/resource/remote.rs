//! Bounded cache of internet-delivered resources.
//!
//! Concurrent requests for one URL share a single transfer. Responses that
//! may not be stored wake the waiters without a result and each of them
//! starts over, as does every waiter of a transfer whose leader is dropped.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::rc::Rc;

use bytes::Bytes;
use tokio::sync::oneshot;
use tracing::{debug, trace};

use super::Indicator;

/// Result of one GET, as handed back by the host.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteResponse {
    pub response:    Option<Bytes>,
    pub headers:     Vec<(String, String)>,
    pub status_code: Option<u16>,
}

impl RemoteResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.iter().find(|(k, _)| k.eq_ignore_ascii_case(name)).map(|(_, v)| v.as_str())
    }

    fn size(&self) -> usize { self.response.as_ref().map_or(0, Bytes::len) }

    fn is_cacheable(&self) -> bool {
        if self.status_code != Some(200) || self.response.is_none() {
            return false;
        }
        !self.header("cache-control").is_some_and(|cc| {
            let cc = cc.to_ascii_lowercase();
            cc.contains("no-store") || cc.contains("no-cache")
        })
    }
}

/// Transfer capability supplied by the host.
pub trait RemoteFetcher {
    fn get(&self, url: &str) -> impl Future<Output = RemoteResponse>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteCacheLimits {
    pub max_entries: usize,
    pub max_bytes:   usize,
}

impl Default for RemoteCacheLimits {
    fn default() -> Self {
        Self { max_entries: 64, max_bytes: 8 * 1024 * 1024 }
    }
}

#[derive(Debug)]
enum Outcome {
    Ready(RemoteResponse),
    Retry,
}

enum Entry {
    InFlight(Vec<oneshot::Sender<Outcome>>),
    Stored(RemoteResponse),
}

/// What a caller has to do for a URL.
enum Lookup {
    Hit(RemoteResponse),
    Wait(oneshot::Receiver<Outcome>),
    Lead,
}

#[derive(Default)]
struct State {
    entries:     HashMap<String, Entry>,
    /// stored entries, oldest first
    order:       VecDeque<String>,
    total_bytes: usize,
}

pub struct RemoteCache {
    limits:    RemoteCacheLimits,
    state:     RefCell<State>,
    /// transfers in progress; the networking lamp is on while non-zero
    transfers: Cell<usize>,
    indicator: Option<Rc<dyn Indicator>>,
}

/// A leading transfer. Dropped before [`Transfer::finish`] it hands the URL
/// back to its waiters.
struct Transfer<'a> {
    cache: &'a RemoteCache,
    url:   &'a str,
    armed: bool,
}

impl<'a> Transfer<'a> {
    fn start(cache: &'a RemoteCache, url: &'a str) -> Self {
        let n = cache.transfers.get();
        cache.transfers.set(n + 1);
        if n == 0 {
            cache.set_networking(true);
        }
        Self { cache, url, armed: true }
    }

    fn finish(mut self) { self.armed = false; }
}

impl Drop for Transfer<'_> {
    fn drop(&mut self) {
        let n = self.cache.transfers.get().saturating_sub(1);
        self.cache.transfers.set(n);
        if n == 0 {
            self.cache.set_networking(false);
        }
        if self.armed {
            debug!(url = self.url, "remote transfer abandoned");
            self.cache.abandon(self.url);
        }
    }
}

impl RemoteCache {
    pub fn new(limits: RemoteCacheLimits, indicator: Option<Rc<dyn Indicator>>) -> Self {
        Self { limits, state: RefCell::new(State::default()), transfers: Cell::new(0), indicator }
    }

    pub fn len(&self) -> usize { self.state.borrow().order.len() }

    pub fn is_empty(&self) -> bool { self.len() == 0 }

    pub fn total_bytes(&self) -> usize { self.state.borrow().total_bytes }

    pub fn contains(&self, url: &str) -> bool {
        matches!(self.state.borrow().entries.get(url), Some(Entry::Stored(_)))
    }

    /// Fetches `url`, from memory when possible. `None` on transfer failure.
    pub async fn fetch<F: RemoteFetcher>(&self, fetcher: &F, url: &str) -> Option<RemoteResponse> {
        loop {
            let lookup = self.lookup(url);
            match lookup {
                Lookup::Hit(res) => return Some(res),
                Lookup::Wait(rx) => match rx.await {
                    Ok(Outcome::Ready(res)) => return Some(res),
                    Ok(Outcome::Retry) | Err(_) => {
                        trace!(url, "shared transfer not stored, fetching again");
                        continue;
                    }
                },
                Lookup::Lead => {
                    let transfer = Transfer::start(self, url);
                    let res = fetcher.get(url).await;
                    transfer.finish();
                    return self.complete(url, res);
                }
            }
        }
    }

    pub fn clear(&self) {
        let mut st = self.state.borrow_mut();
        st.entries.retain(|_, e| matches!(e, Entry::InFlight(_)));
        st.order.clear();
        st.total_bytes = 0;
    }

    fn set_networking(&self, active: bool) {
        if let Some(indicator) = &self.indicator {
            indicator.set_networking_get_status(active);
        }
    }

    fn lookup(&self, url: &str) -> Lookup {
        let mut st = self.state.borrow_mut();
        match st.entries.get_mut(url) {
            Some(Entry::Stored(res)) => Lookup::Hit(res.clone()),
            Some(Entry::InFlight(waiters)) => {
                let (tx, rx) = oneshot::channel();
                waiters.push(tx);
                Lookup::Wait(rx)
            }
            None => {
                st.entries.insert(url.to_string(), Entry::InFlight(Vec::new()));
                Lookup::Lead
            }
        }
    }

    fn abandon(&self, url: &str) {
        let mut st = self.state.borrow_mut();
        if !matches!(st.entries.get(url), Some(Entry::InFlight(_))) {
            return;
        }
        if let Some(Entry::InFlight(waiters)) = st.entries.remove(url) {
            for tx in waiters {
                let _ = tx.send(Outcome::Retry);
            }
        }
    }

    fn complete(&self, url: &str, res: RemoteResponse) -> Option<RemoteResponse> {
        let mut st = self.state.borrow_mut();
        let waiters = match st.entries.remove(url) {
            Some(Entry::InFlight(waiters)) => waiters,
            _ => Vec::new(),
        };

        if res.is_cacheable() {
            st.total_bytes += res.size();
            st.order.push_back(url.to_string());
            st.entries.insert(url.to_string(), Entry::Stored(res.clone()));
            Self::evict(&mut st, &self.limits);
            for tx in waiters {
                let _ = tx.send(Outcome::Ready(res.clone()));
            }
        } else {
            debug!(url, status = ?res.status_code, "remote response not cacheable");
            for tx in waiters {
                let _ = tx.send(Outcome::Retry);
            }
        }
        res.response.is_some().then_some(res)
    }

    fn evict(st: &mut State, limits: &RemoteCacheLimits) {
        while st.order.len() > limits.max_entries || st.total_bytes > limits.max_bytes {
            let Some(oldest) = st.order.pop_front() else { break };
            if let Some(Entry::Stored(res)) = st.entries.remove(&oldest) {
                st.total_bytes -= res.size();
                trace!(url = %oldest, "remote cache entry evicted");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    struct CountingFetcher {
        calls:  Cell<usize>,
        status: u16,
        body:   &'static [u8],
    }

    impl RemoteFetcher for CountingFetcher {
        async fn get(&self, _url: &str) -> RemoteResponse {
            self.calls.set(self.calls.get() + 1);
            tokio::task::yield_now().await;
            RemoteResponse {
                response:    Some(Bytes::from_static(self.body)),
                headers:     vec![],
                status_code: Some(self.status),
            }
        }
    }

    fn fetcher(status: u16, body: &'static [u8]) -> CountingFetcher {
        CountingFetcher { calls: Cell::new(0), status, body }
    }

    /// Never answers.
    struct StalledFetcher;

    impl RemoteFetcher for StalledFetcher {
        async fn get(&self, _url: &str) -> RemoteResponse {
            std::future::pending::<RemoteResponse>().await
        }
    }

    #[derive(Default)]
    struct NetLamp(RefCell<Vec<bool>>);

    impl Indicator for NetLamp {
        fn set_receiving_status(&self, _receiving: bool) {}
        fn set_networking_get_status(&self, active: bool) { self.0.borrow_mut().push(active) }
    }

    #[tokio::test]
    async fn concurrent_requests_share_one_transfer() {
        let cache = RemoteCache::new(RemoteCacheLimits::default(), None);
        let f = fetcher(200, b"hello");
        let (a, b) = tokio::join!(cache.fetch(&f, "http://x/a"), cache.fetch(&f, "http://x/a"));
        assert_eq!(f.calls.get(), 1);
        assert_eq!(a, b);
        assert!(cache.contains("http://x/a"));

        cache.fetch(&f, "http://x/a").await;
        assert_eq!(f.calls.get(), 1);
    }

    #[tokio::test]
    async fn uncacheable_response_redrives_waiters() {
        let cache = RemoteCache::new(RemoteCacheLimits::default(), None);
        let f = fetcher(500, b"err");
        let (a, b) = tokio::join!(cache.fetch(&f, "http://x/a"), cache.fetch(&f, "http://x/a"));
        assert_eq!(f.calls.get(), 2);
        assert_eq!(a.and_then(|r| r.status_code), Some(500));
        assert!(b.is_some());
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn eviction_in_insertion_order() {
        let limits = RemoteCacheLimits { max_entries: 2, max_bytes: 8 };
        let cache = RemoteCache::new(limits, None);
        let f = fetcher(200, b"abcd");
        for url in ["http://x/1", "http://x/2", "http://x/3"] {
            cache.fetch(&f, url).await;
        }
        assert!(!cache.contains("http://x/1"));
        assert!(cache.contains("http://x/2") && cache.contains("http://x/3"));
        assert_eq!(cache.total_bytes(), 8);

        let big = fetcher(200, b"0123456789");
        cache.fetch(&big, "http://x/big").await;
        assert!(cache.is_empty());
        assert_eq!(cache.total_bytes(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_transfer_hands_url_to_waiters() {
        let lamp = Rc::new(NetLamp::default());
        let cache = RemoteCache::new(RemoteCacheLimits::default(), Some(lamp.clone() as Rc<dyn Indicator>));
        let f = fetcher(200, b"ok");
        let (stalled, waiter) = tokio::join!(
            tokio::time::timeout(Duration::from_millis(50), cache.fetch(&StalledFetcher, "http://x/a")),
            cache.fetch(&f, "http://x/a"),
        );
        assert!(stalled.is_err());
        assert_eq!(waiter.and_then(|r| r.response), Some(Bytes::from_static(b"ok")));
        assert_eq!(f.calls.get(), 1);
        assert_eq!(*lamp.0.borrow(), vec![true, false, true, false]);
    }

    #[tokio::test(start_paused = true)]
    async fn url_usable_after_timed_out_transfer() {
        let cache = RemoteCache::new(RemoteCacheLimits::default(), None);
        let stalled = tokio::time::timeout(Duration::from_millis(50), cache.fetch(&StalledFetcher, "http://x/a")).await;
        assert!(stalled.is_err());

        let f = fetcher(200, b"ok");
        let got = tokio::time::timeout(Duration::from_millis(50), cache.fetch(&f, "http://x/a")).await;
        assert_eq!(got.ok().flatten().and_then(|r| r.status_code), Some(200));
        assert!(cache.contains("http://x/a"));
    }

    #[tokio::test]
    async fn networking_lamp_spans_overlapping_transfers() {
        let lamp = Rc::new(NetLamp::default());
        let cache = RemoteCache::new(RemoteCacheLimits::default(), Some(lamp.clone() as Rc<dyn Indicator>));
        let f = fetcher(200, b"x");
        let (a, b) = tokio::join!(cache.fetch(&f, "http://x/a"), cache.fetch(&f, "http://x/b"));
        assert!(a.is_some() && b.is_some());
        assert_eq!(f.calls.get(), 2);
        assert_eq!(*lamp.0.borrow(), vec![true, false]);
    }

    #[test]
    fn no_store_is_not_cacheable() {
        let res = RemoteResponse {
            response:    Some(Bytes::from_static(b"x")),
            headers:     vec![("Cache-Control".into(), "No-Store".into())],
            status_code: Some(200),
        };
        assert!(!res.is_cacheable());
    }
}
