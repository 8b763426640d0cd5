use std::io;
use std::net::SocketAddr;

use tokio::net::UdpSocket;

/// Outgoing datagram sink used by the engine.
///
/// Sends must not block; a datagram that cannot be queued right away is an
/// error, and the query it carried fails like a timeout.
pub trait Transport: Send + Sync {
    fn send_to(&self, buf: &[u8], addr: SocketAddr) -> io::Result<()>;
}

impl Transport for UdpSocket {
    fn send_to(&self, buf: &[u8], addr: SocketAddr) -> io::Result<()> {
        let sent = self.try_send_to(buf, addr)?;
        if sent != buf.len() {
            return Err(io::Error::new(io::ErrorKind::WriteZero, "short datagram write"));
        }
        Ok(())
    }
}
