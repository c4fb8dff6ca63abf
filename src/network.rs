//! The datagram endpoint shared by every participant role.

use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::time::Duration;

use crate::chain::Participant;
use crate::error::Result;
use crate::protocol::{Envelope, PONG};

/// Receive-buffer allowance per transaction; a single datagram must be able
/// to carry a block sealed at full capacity.
const DATAGRAM_BYTES_PER_TRANSACTION: usize = 4096;

/// Floor for the receive buffer so that admission snapshots fit regardless of
/// the configured capacity.
const MIN_BUFFER_SIZE: usize = 64 * 1024;

const PING_TIMEOUT: Duration = Duration::from_millis(100);

pub struct Endpoint {
    socket: UdpSocket,
    buffer_size: usize,
}

impl Endpoint {
    pub fn bind(addr: impl ToSocketAddrs, capacity: usize) -> Result<Endpoint> {
        let socket = UdpSocket::bind(addr)?;
        Ok(Endpoint {
            socket,
            buffer_size: (DATAGRAM_BYTES_PER_TRANSACTION * capacity).max(MIN_BUFFER_SIZE),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub fn try_clone(&self) -> Result<Endpoint> {
        Ok(Endpoint {
            socket: self.socket.try_clone()?,
            buffer_size: self.buffer_size,
        })
    }

    pub fn send(&self, envelope: &Envelope, addr: impl ToSocketAddrs) -> Result<()> {
        self.socket.send_to(&envelope.encode(), addr)?;
        Ok(())
    }

    pub fn send_raw(&self, bytes: &[u8], addr: impl ToSocketAddrs) -> Result<()> {
        self.socket.send_to(bytes, addr)?;
        Ok(())
    }

    /// Fans an envelope out to every roster endpoint, the local one included.
    /// Send failures are logged and skipped; the protocol never retries.
    pub fn broadcast(&self, envelope: &Envelope, nodes: &[Participant]) {
        let bytes = envelope.encode();
        for node in nodes {
            if let Err(err) = self
                .socket
                .send_to(&bytes, (node.address.as_str(), node.port))
            {
                log::warn!("failed to send to node {}: {err}", node.id);
            }
        }
    }

    pub fn recv(&self) -> Result<(Vec<u8>, SocketAddr)> {
        let mut buf = vec![0u8; self.buffer_size];
        let (len, from) = self.socket.recv_from(&mut buf)?;
        buf.truncate(len);
        Ok((buf, from))
    }

    /// Pings the bootstrap with a short read timeout until it answers `pong`,
    /// then restores the blocking socket. Runs until the process is
    /// interrupted if the bootstrap never comes up.
    pub fn ping_bootstrap(&self, bootstrap: SocketAddr) -> Result<()> {
        self.socket.set_read_timeout(Some(PING_TIMEOUT))?;

        let mut buf = [0u8; 128];
        loop {
            log::debug!("pinging bootstrap at {bootstrap}");
            self.send(&Envelope::Ping, bootstrap)?;

            match self.socket.recv_from(&mut buf) {
                Ok((len, from)) if from == bootstrap && &buf[..len] == PONG => break,
                Ok(_) => continue,
                Err(err)
                    if err.kind() == std::io::ErrorKind::WouldBlock
                        || err.kind() == std::io::ErrorKind::TimedOut =>
                {
                    log::debug!("bootstrap not answering, retrying");
                }
                Err(err) => return Err(err.into()),
            }
        }
        log::info!("bootstrap at {bootstrap} is up");

        self.socket.set_read_timeout(None)?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::crypto::Address;

    fn loopback_endpoint() -> Endpoint {
        Endpoint::bind("127.0.0.1:0", 5).unwrap()
    }

    #[test]
    fn send_recv_test() {
        let sender = loopback_endpoint();
        let receiver = loopback_endpoint();

        sender
            .send(&Envelope::Ping, receiver.local_addr().unwrap())
            .unwrap();

        let (bytes, from) = receiver.recv().unwrap();
        assert_eq!(Envelope::decode(&bytes).unwrap(), Envelope::Ping);
        assert_eq!(from, sender.local_addr().unwrap());
    }

    #[test]
    fn broadcast_reaches_all_nodes_test() {
        let sender = loopback_endpoint();
        let receivers = [loopback_endpoint(), loopback_endpoint()];

        let nodes: Vec<Participant> = receivers
            .iter()
            .enumerate()
            .map(|(id, endpoint)| {
                let addr = endpoint.local_addr().unwrap();
                Participant {
                    id: id as u64,
                    address: addr.ip().to_string(),
                    port: addr.port(),
                    key: Address::sentinel(),
                    balance: 0.0,
                    stake: 0.0,
                    nonce: 0,
                }
            })
            .collect();

        sender.broadcast(&Envelope::Ping, &nodes);

        for receiver in &receivers {
            let (bytes, _) = receiver.recv().unwrap();
            assert_eq!(Envelope::decode(&bytes).unwrap(), Envelope::Ping);
        }
    }

    #[test]
    fn ping_bootstrap_retries_until_pong_test() {
        let peer = loopback_endpoint();
        let bootstrap = loopback_endpoint();
        let bootstrap_addr = bootstrap.local_addr().unwrap();

        let server = std::thread::spawn(move || {
            // Let a few pings time out before answering.
            let mut buf = [0u8; 128];
            for _ in 0..3 {
                bootstrap.socket.recv_from(&mut buf).unwrap();
            }
            let (len, from) = bootstrap.socket.recv_from(&mut buf).unwrap();
            assert_eq!(
                Envelope::decode(&buf[..len]).unwrap(),
                Envelope::Ping
            );
            bootstrap.send_raw(PONG, from).unwrap();
        });

        peer.ping_bootstrap(bootstrap_addr).unwrap();
        server.join().unwrap();
    }
}
