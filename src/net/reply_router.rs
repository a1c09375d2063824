//! Reply demultiplexing for shared client sockets.
//!
//! Several workers may have requests in flight on one socket with distinct
//! packet ids. A single pump task reads every incoming datagram, peeks at
//! the 12-bit id in the header, and hands the bytes to whichever waiter
//! registered that id. Datagrams nobody claimed are logged and dropped —
//! UDP gives no better option.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use log::{debug, warn};
use tokio::net::UdpSocket;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::packet::Frame;

pub struct ReplyRouter {
    socket: Arc<UdpSocket>,
    waiters: Arc<DashMap<u16, oneshot::Sender<Vec<u8>>>>,
    pump: JoinHandle<()>,
}

impl ReplyRouter {
    /// Bind an ephemeral socket and start the pump.
    pub async fn bind(buffer_size: usize) -> io::Result<Self> {
        let socket = UdpSocket::bind(("0.0.0.0", 0)).await?;
        Ok(Self::new(Arc::new(socket), buffer_size))
    }

    pub fn new(socket: Arc<UdpSocket>, buffer_size: usize) -> Self {
        let waiters: Arc<DashMap<u16, oneshot::Sender<Vec<u8>>>> = Arc::new(DashMap::new());
        let pump = tokio::spawn(Self::pump(socket.clone(), waiters.clone(), buffer_size));
        Self {
            socket,
            waiters,
            pump,
        }
    }

    async fn pump(
        socket: Arc<UdpSocket>,
        waiters: Arc<DashMap<u16, oneshot::Sender<Vec<u8>>>>,
        buffer_size: usize,
    ) {
        let mut buf = vec![0u8; buffer_size.max(crate::packet::checksum::MIN_PACKET_BYTES)];
        loop {
            match socket.recv_from(&mut buf).await {
                Ok((len, peer)) => {
                    let data = buf[..len].to_vec();
                    match Frame::peek_packet_id(&data) {
                        Some(id) => {
                            if let Some((_, tx)) = waiters.remove(&id) {
                                if tx.send(data).is_err() {
                                    debug!("waiter for packet id {id} gave up before the reply");
                                }
                            } else {
                                debug!("unclaimed datagram from {peer} with packet id {id}");
                            }
                        }
                        None => debug!("runt datagram ({len} bytes) from {peer}"),
                    }
                }
                Err(e) => {
                    warn!("reply router receive failed: {e}");
                    break;
                }
            }
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Send `payload` to `target` and wait for the datagram answering
    /// `packet_id`, up to `deadline`.
    pub async fn request(
        &self,
        payload: &[u8],
        target: SocketAddr,
        packet_id: u16,
        deadline: Duration,
    ) -> io::Result<Vec<u8>> {
        let (tx, rx) = oneshot::channel();
        self.waiters.insert(packet_id & 0x0FFF, tx);

        let sent = self.socket.send_to(payload, target).await?;
        if sent != payload.len() {
            self.waiters.remove(&(packet_id & 0x0FFF));
            return Err(io::Error::new(
                io::ErrorKind::Other,
                format!("short send: {sent}/{} bytes", payload.len()),
            ));
        }

        match timeout(deadline, rx).await {
            Ok(Ok(data)) => Ok(data),
            Ok(Err(_)) => Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "reply router shut down while waiting",
            )),
            Err(_) => {
                self.waiters.remove(&(packet_id & 0x0FFF));
                Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("no reply for packet id {packet_id} within {deadline:?}"),
                ))
            }
        }
    }
}

impl Drop for ReplyRouter {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{DataFlags, Header, PacketType};

    fn query_wire(packet_id: u16) -> Vec<u8> {
        let mut header = Header::new(PacketType::QueryRequest, packet_id);
        header.flags = DataFlags::new(true, false, false, false, false);
        header.area_code = 11000;
        Frame::new(header).encode().unwrap()
    }

    #[tokio::test]
    async fn request_receives_only_its_own_id() {
        // Echo peer that answers every datagram twice: first with a foreign
        // id, then with the sender's id.
        let peer = UdpSocket::bind(("127.0.0.1", 0)).await.unwrap();
        let peer_addr = peer.local_addr().unwrap();
        tokio::spawn(async move {
            let mut buf = [0u8; 2048];
            loop {
                let (len, from) = peer.recv_from(&mut buf).await.unwrap();
                let id = Frame::peek_packet_id(&buf[..len]).unwrap();
                let foreign = query_wire((id + 1) & 0x0FFF);
                peer.send_to(&foreign, from).await.unwrap();
                peer.send_to(&buf[..len], from).await.unwrap();
            }
        });

        let router = ReplyRouter::bind(2048).await.unwrap();
        let reply = router
            .request(&query_wire(42), peer_addr, 42, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(Frame::peek_packet_id(&reply), Some(42));
    }

    #[tokio::test]
    async fn concurrent_waiters_each_get_their_reply() {
        let peer = UdpSocket::bind(("127.0.0.1", 0)).await.unwrap();
        let peer_addr = peer.local_addr().unwrap();
        tokio::spawn(async move {
            let mut buf = [0u8; 2048];
            let mut pending: Vec<(Vec<u8>, SocketAddr)> = Vec::new();
            // hold the first two requests, then answer them in reverse order
            loop {
                let (len, from) = peer.recv_from(&mut buf).await.unwrap();
                pending.push((buf[..len].to_vec(), from));
                if pending.len() == 2 {
                    for (data, addr) in pending.drain(..).rev() {
                        peer.send_to(&data, addr).await.unwrap();
                    }
                }
            }
        });

        let router = Arc::new(ReplyRouter::bind(2048).await.unwrap());
        let a = {
            let router = router.clone();
            tokio::spawn(async move {
                router
                    .request(&query_wire(100), peer_addr, 100, Duration::from_secs(5))
                    .await
            })
        };
        let b = {
            let router = router.clone();
            tokio::spawn(async move {
                router
                    .request(&query_wire(200), peer_addr, 200, Duration::from_secs(5))
                    .await
            })
        };
        let reply_a = a.await.unwrap().unwrap();
        let reply_b = b.await.unwrap().unwrap();
        assert_eq!(Frame::peek_packet_id(&reply_a), Some(100));
        assert_eq!(Frame::peek_packet_id(&reply_b), Some(200));
    }

    #[tokio::test]
    async fn deadline_expires_without_a_reply() {
        let silent = UdpSocket::bind(("127.0.0.1", 0)).await.unwrap();
        let target = silent.local_addr().unwrap();
        let router = ReplyRouter::bind(2048).await.unwrap();
        let err = router
            .request(&query_wire(7), target, 7, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }
}
