use std::net::Ipv4Addr;
use std::path::PathBuf;

use clap::Parser;
use bml_carousel::resource::RemoteCacheLimits;
use bml_carousel::receiver::{init_logging, parse_service_id, run, Input, Options};
use tracing::error;

#[derive(Parser)]
#[clap(about = "ARIB data carousel receiver")]
struct Opt {
    /// UDP socket to bind + listen (IPv4)
    #[clap(long, default_value = "239.1.1.2:1234", conflicts_with = "file")]
    addr: String,

    /// Multicast interface address
    #[clap(long)]
    iface: Option<Ipv4Addr>,

    /// Read a TS file instead of UDP
    #[clap(long)]
    file: Option<PathBuf>,

    /// Service to follow (decimal or 0x hex); first PAT entry by default
    #[clap(long, value_parser = parse_service_id_arg)]
    service_id: Option<u16>,

    /// Print every protocol message as a JSON line
    #[clap(long, default_value_t = false)]
    json: bool,

    /// Cache status snapshot interval in seconds (0 disables)
    #[clap(long, default_value_t = 2)]
    refresh: u64,

    /// Remote resource cache entries
    #[clap(long, default_value_t = RemoteCacheLimits::default().max_entries)]
    remote_entries: usize,

    /// Remote resource cache size in bytes
    #[clap(long, default_value_t = RemoteCacheLimits::default().max_bytes)]
    remote_bytes: usize,

    /// Debug logging unless RUST_LOG is set
    #[clap(short, long, default_value_t = false)]
    verbose: bool,
}

fn parse_service_id_arg(s: &str) -> Result<u16, String> {
    parse_service_id(s).map_err(|e| e.to_string())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let opt = Opt::parse();
    init_logging(opt.verbose)?;

    let input = match opt.file {
        Some(path) => Input::File(path),
        None => Input::Udp { addr: opt.addr.parse()?, iface: opt.iface },
    };

    let result = run(Options {
        input,
        service_id:    opt.service_id,
        json:          opt.json,
        refresh_secs:  opt.refresh,
        remote_limits: RemoteCacheLimits { max_entries: opt.remote_entries, max_bytes: opt.remote_bytes },
    })
    .await;
    if let Err(e) = &result {
        error!("{e:#}");
    }
    result
}
