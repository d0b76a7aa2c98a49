//! In-process channel transport, the test and embedding backend.

use std::collections::HashMap;

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;

use super::{NetAddr, NetError, Rpc, Transport};

/// Bound on each peer's inbound message queue.
pub const RPC_CHANNEL_SIZE: usize = 1024;

pub struct LocalTransport {
    addr: NetAddr,
    sender: mpsc::Sender<Rpc>,
    receiver: Mutex<Option<mpsc::Receiver<Rpc>>>,
    peers: RwLock<HashMap<NetAddr, mpsc::Sender<Rpc>>>,
}

impl LocalTransport {
    pub fn new(addr: NetAddr) -> Self {
        let (sender, receiver) = mpsc::channel(RPC_CHANNEL_SIZE);
        Self {
            addr,
            sender,
            receiver: Mutex::new(Some(receiver)),
            peers: RwLock::new(HashMap::new()),
        }
    }

    /// Registers `other` as a peer of this transport (one direction; call
    /// on both sides for a duplex link).
    pub fn connect(&self, other: &LocalTransport) {
        self.peers.write().insert(other.addr.clone(), other.sender.clone());
    }

    /// Hands out the inbound message stream. Yields once; the node event
    /// loop owns it afterwards.
    pub fn consume(&self) -> Option<mpsc::Receiver<Rpc>> {
        self.receiver.lock().take()
    }
}

impl Transport for LocalTransport {
    fn address(&self) -> NetAddr {
        self.addr.clone()
    }

    fn send_message(&self, to: &NetAddr, payload: Vec<u8>) -> Result<(), NetError> {
        if *to == self.addr {
            return Ok(());
        }

        let sender = {
            let peers = self.peers.read();
            peers
                .get(to)
                .cloned()
                .ok_or_else(|| NetError::UnknownPeer { me: self.addr.clone(), to: to.clone() })?
        };

        sender
            .try_send(Rpc { from: self.addr.clone(), payload })
            .map_err(|_| NetError::SendFailed(to.clone()))
    }

    fn broadcast(&self, payload: Vec<u8>) -> Result<(), NetError> {
        let peers: Vec<NetAddr> = self.peers.read().keys().cloned().collect();
        for to in peers {
            self.send_message(&to, payload.clone())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connected_peers_exchange_messages() {
        let a = LocalTransport::new("a".into());
        let b = LocalTransport::new("b".into());
        a.connect(&b);
        b.connect(&a);

        let mut rx_b = b.consume().unwrap();
        a.send_message(&"b".into(), b"hello".to_vec()).unwrap();

        let rpc = rx_b.recv().await.unwrap();
        assert_eq!(rpc.from, "a".into());
        assert_eq!(rpc.payload, b"hello");
    }

    #[test]
    fn unknown_peer_is_an_error() {
        let a = LocalTransport::new("a".into());
        assert!(matches!(
            a.send_message(&"ghost".into(), vec![]),
            Err(NetError::UnknownPeer { .. })
        ));
    }

    #[test]
    fn send_to_self_is_a_no_op() {
        let a = LocalTransport::new("a".into());
        a.send_message(&"a".into(), b"loop".to_vec()).unwrap();
        // Nothing queued: the receiver stays empty.
        let mut rx = a.consume().unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn broadcast_reaches_every_peer() {
        let a = LocalTransport::new("a".into());
        let b = LocalTransport::new("b".into());
        let c = LocalTransport::new("c".into());
        a.connect(&b);
        a.connect(&c);

        let mut rx_b = b.consume().unwrap();
        let mut rx_c = c.consume().unwrap();
        a.broadcast(b"blk".to_vec()).unwrap();

        assert_eq!(rx_b.recv().await.unwrap().payload, b"blk");
        assert_eq!(rx_c.recv().await.unwrap().payload, b"blk");
    }

    #[test]
    fn consume_yields_only_once() {
        let a = LocalTransport::new("a".into());
        assert!(a.consume().is_some());
        assert!(a.consume().is_none());
    }
}
