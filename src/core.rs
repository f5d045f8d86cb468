//! Receiver run loop: a demuxer task feeding the resource cache through a
//! channel, with protocol messages and cache snapshots printed as JSON lines.

use std::io::Write;
use std::time::Duration;

use bytes::BytesMut;
use serde::Serialize;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::{Input, Options};
use crate::constants::TS_PACKET_SIZE;
use crate::processor::{DemuxOptions, SectionDemuxer};
use crate::resource::{Indicator, LockedModuleRef, Notification, ResourceCache};
use crate::types::{ErrorMessage, Message, ProgramInfo};

/// Messages buffered between the demuxer and the cache.
const CHANNEL_CAPACITY: usize = 1024;
const UDP_BUFFER_SIZE: usize = 65_536;
const FILE_CHUNK_SIZE: usize = TS_PACKET_SIZE * 1024;

pub async fn run(opts: Options) -> anyhow::Result<()> {
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    let demux = tokio::spawn(demux_task(opts.input.clone(), opts.demux_options(), tx));

    let result = tokio::select! {
        r = cache_task(rx, &opts) => r,
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted");
            Ok(())
        }
    };
    demux.abort();
    match demux.await {
        Ok(Err(e)) => error!("input failed: {e:#}"),
        Err(e) if !e.is_cancelled() => error!("demuxer task failed: {e}"),
        _ => {}
    }
    result
}

/* ── demuxer side ──────────────────────────────────────────────────── */

async fn demux_task(input: Input, opts: DemuxOptions, tx: mpsc::Sender<Message>) -> anyhow::Result<()> {
    let mut demux = SectionDemuxer::new(opts);
    let result = match &input {
        Input::Udp { addr, iface } => read_udp(*addr, *iface, &mut demux, &tx).await,
        Input::File(path) => read_file(path, &mut demux, &tx).await,
    };
    if let Err(e) = &result {
        let _ = tx.send(Message::Error(ErrorMessage { message: format!("{e:#}") })).await;
    }
    result
}

/// `false` once the cache side is gone.
async fn forward(messages: Vec<Message>, tx: &mpsc::Sender<Message>) -> bool {
    for msg in messages {
        if tx.send(msg).await.is_err() {
            return false;
        }
    }
    true
}

async fn read_udp(
    addr: std::net::SocketAddr,
    iface: Option<std::net::Ipv4Addr>,
    demux: &mut SectionDemuxer,
    tx: &mpsc::Sender<Message>,
) -> anyhow::Result<()> {
    let sock = crate::network::bind_udp(addr, iface)?;
    info!(%addr, "listening");
    let mut buf = vec![0u8; UDP_BUFFER_SIZE];
    loop {
        let n = sock.recv(&mut buf).await?;
        if n == 0 {
            continue;
        }
        if !forward(demux.feed(&buf[..n]), tx).await {
            return Ok(());
        }
    }
}

async fn read_file(path: &std::path::Path, demux: &mut SectionDemuxer, tx: &mpsc::Sender<Message>) -> anyhow::Result<()> {
    let mut file = tokio::fs::File::open(path).await?;
    info!(path = %path.display(), "reading transport stream");
    let mut buf = BytesMut::with_capacity(FILE_CHUNK_SIZE * 2);
    loop {
        let n = file.read_buf(&mut buf).await?;
        // whole packets only; the partial tail waits for the next read
        let usable = if n == 0 { buf.len() } else { buf.len() - buf.len() % TS_PACKET_SIZE };
        let chunk = buf.split_to(usable);
        if !forward(demux.feed(&chunk), tx).await {
            return Ok(());
        }
        if n == 0 {
            debug!("end of file");
            return Ok(());
        }
        buf.reserve(FILE_CHUNK_SIZE);
    }
}

/* ── cache side ────────────────────────────────────────────────────── */

/// Logs the indicator lamps.
struct LogIndicator;

impl Indicator for LogIndicator {
    fn set_receiving_status(&self, receiving: bool) {
        debug!(receiving, "receiving status");
    }

    fn set_networking_get_status(&self, active: bool) {
        debug!(active, "networking status");
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ComponentStatus {
    component_id:   u8,
    data_event_id:  u8,
    listed_modules: usize,
    cached_modules: usize,
}

/// Periodic cache summary.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename = "cacheStatus", rename_all = "camelCase")]
struct CacheStatus<'a> {
    program_info:   Option<&'a ProgramInfo>,
    components:     Vec<ComponentStatus>,
    locked_modules: Vec<LockedModuleRef>,
}

impl<'a> CacheStatus<'a> {
    fn of(cache: &'a ResourceCache) -> Self {
        Self {
            program_info:   cache.program_info(),
            components:     cache.download_components().into_iter()
                .map(|c| ComponentStatus {
                    component_id:   c.component_id,
                    data_event_id:  c.data_event_id,
                    listed_modules: c.modules.len(),
                    cached_modules: cache.cached_module_count(c.component_id),
                })
                .collect(),
            locked_modules: cache.locked_modules(),
        }
    }
}

fn print_json(value: &impl Serialize) {
    match serde_json::to_string(value) {
        Ok(json) => {
            let mut out = std::io::stdout().lock();
            let _ = writeln!(out, "{json}");
        }
        Err(e) => warn!("serialization failed: {e}"),
    }
}

fn log_notification(n: &Notification) {
    match n {
        Notification::PmtUpdated { components } => info!(components = components.len(), "PMT updated"),
        Notification::DataEventChanged { component_id, previous, current } => info!(
            component_id,
            previous = previous.as_ref().map(|p| p.data_event_id),
            current = current.data_event_id,
            "data event changed"
        ),
        other => debug!(notification = ?other, "cache notification"),
    }
}

async fn cache_task(mut rx: mpsc::Receiver<Message>, opts: &Options) -> anyhow::Result<()> {
    let mut cache = ResourceCache::new(opts.remote_limits, Some(std::rc::Rc::new(LogIndicator)));
    let period = Duration::from_secs(opts.refresh_secs.max(1));
    let mut refresh = tokio::time::interval_at(tokio::time::Instant::now() + period, period);

    loop {
        tokio::select! {
            msg = rx.recv() => {
                let Some(msg) = msg else { break };
                if opts.json {
                    print_json(&msg);
                }
                for n in cache.on_message(&msg) {
                    log_notification(&n);
                }
            }
            _ = refresh.tick(), if opts.refresh_secs > 0 => print_json(&CacheStatus::of(&cache)),
        }
    }
    if opts.refresh_secs > 0 {
        print_json(&CacheStatus::of(&cache));
    }
    Ok(())
}
