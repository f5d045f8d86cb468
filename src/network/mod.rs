use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tracing::info;

/// Kernel receive buffer requested for TS reception.
const RECV_BUFFER_SIZE: usize = 4 * 1024 * 1024;

/// Binds a UDP socket for TS packet reception, joining the group when
/// `addr` is multicast.
pub fn bind_udp(addr: SocketAddr, iface: Option<Ipv4Addr>) -> anyhow::Result<UdpSocket> {
    let ip = match addr.ip() {
        IpAddr::V4(v4) => v4,
        _ => anyhow::bail!("only IPv4 is supported"),
    };

    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    // best effort, the kernel may clamp it
    let _ = socket.set_recv_buffer_size(RECV_BUFFER_SIZE);
    socket.bind(&addr.into())?;

    if ip.is_multicast() {
        let iface = iface.unwrap_or(Ipv4Addr::UNSPECIFIED);
        socket.join_multicast_v4(&ip, &iface)?;
        info!(group = %ip, %iface, "joined multicast group");
    }

    socket.set_nonblocking(true)?;
    Ok(UdpSocket::from_std(socket.into())?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_ipv6() {
        assert!(bind_udp("[::1]:0".parse().unwrap(), None).is_err());
    }

    #[tokio::test]
    async fn binds_unicast() {
        let sock = bind_udp("127.0.0.1:0".parse().unwrap(), None).unwrap();
        assert!(sock.local_addr().unwrap().port() != 0);
    }
}
