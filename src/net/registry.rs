//! Bidirectional public-key / network-address map.
//!
//! Populated during initial mesh setup; looked up on every tour hop to
//! route signature requests.

use std::collections::HashMap;

use parking_lot::RwLock;

use super::{NetAddr, NetError};
use crate::crypto::PublicKey;

#[derive(Default)]
struct Inner {
    by_key: HashMap<PublicKey, NetAddr>,
    by_addr: HashMap<NetAddr, PublicKey>,
}

#[derive(Default)]
pub struct NodeRegistry {
    inner: RwLock<Inner>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, key: PublicKey, addr: NetAddr) {
        let mut inner = self.inner.write();
        inner.by_key.insert(key.clone(), addr.clone());
        inner.by_addr.insert(addr, key);
    }

    pub fn address_of(&self, key: &PublicKey) -> Result<NetAddr, NetError> {
        self.inner
            .read()
            .by_key
            .get(key)
            .cloned()
            .ok_or_else(|| NetError::UnknownPublicKey(key.short()))
    }

    pub fn key_of(&self, addr: &NetAddr) -> Result<PublicKey, NetError> {
        self.inner
            .read()
            .by_addr
            .get(addr)
            .cloned()
            .ok_or_else(|| NetError::UnknownAddress(addr.clone()))
    }

    pub fn all_nodes(&self) -> Vec<PublicKey> {
        self.inner.read().by_key.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
