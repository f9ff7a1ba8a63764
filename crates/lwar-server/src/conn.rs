// conn.rs — non-blocking UDP endpoints
//
// Two sockets: a dual-stack unicast socket for client traffic and an unbound
// multicast socket for the discovery announcement. socket2 handles the option
// setup std cannot express (IPV6_V6ONLY off, multicast hop limit); all actual
// I/O goes through std's UdpSocket.

use std::io;
use std::net::{Ipv6Addr, SocketAddr, UdpSocket};

use socket2::{Domain, Protocol, Socket, Type};

use lwar_common::address::{parse_group, Address};

use crate::config::MULTICAST_HOPS;

pub struct Endpoint {
    sock: UdpSocket,
    port: u16,
}

impl Endpoint {
    /// Bind the client-facing socket: IPv6 any-address, dual-stack,
    /// non-blocking. Pass port 0 for an ephemeral port (tests).
    pub fn bind(port: u16) -> io::Result<Endpoint> {
        let sock = Socket::new(Domain::IPV6, Type::DGRAM, Some(Protocol::UDP))?;
        sock.set_only_v6(false)?;
        sock.set_nonblocking(true)?;
        let bind_addr: SocketAddr = (Ipv6Addr::UNSPECIFIED, port).into();
        sock.bind(&bind_addr.into())?;
        let sock: UdpSocket = sock.into();
        let port = sock.local_addr()?.port();
        Ok(Endpoint { sock, port })
    }

    /// Create the discovery socket: joined to `group`, loopback enabled,
    /// hop limit 1. It only ever sends, so it stays unbound.
    pub fn multicast(group: &str) -> io::Result<Endpoint> {
        let ip: Ipv6Addr = group
            .parse()
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "bad multicast group"))?;
        let sock = Socket::new(Domain::IPV6, Type::DGRAM, Some(Protocol::UDP))?;
        sock.set_nonblocking(true)?;
        sock.set_multicast_loop_v6(true)?;
        sock.set_multicast_hops_v6(MULTICAST_HOPS)?;
        sock.join_multicast_v6(&ip, 0)?;
        let sock: UdpSocket = sock.into();
        Ok(Endpoint { sock, port: 0 })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Receive one datagram. `Ok(None)` when nothing is pending.
    pub fn recv(&self, buf: &mut [u8]) -> io::Result<Option<(usize, Address)>> {
        match self.sock.recv_from(buf) {
            Ok((n, from)) => Ok(Some((n, Address::from(from)))),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Send one datagram. A short write is reported as an error: datagrams
    /// are all-or-nothing.
    pub fn send(&self, buf: &[u8], to: &Address) -> io::Result<()> {
        let sent = self.sock.send_to(buf, to.to_socket_addr())?;
        if sent != buf.len() {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                "datagram sent only partially",
            ));
        }
        Ok(())
    }
}

/// The discovery group address for a given game port.
pub fn multicast_address(group: &str, game_port: u16) -> Option<Address> {
    parse_group(group, game_port + 1)
}
