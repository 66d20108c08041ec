// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::sync::Mutex;

use byteorder::{ByteOrder, LE};

use crate::common::GuestAddr;

/// Access to guest physical memory, as used by devices performing DMA.
///
/// Failed accesses (unmapped or out-of-range addresses) are reported rather
/// than faulting: reads yield `None` and writes return `false`.
pub trait GuestMemory: Send + Sync + 'static {
    fn read_bytes(&self, addr: GuestAddr, buf: &mut [u8]) -> bool;
    fn write_bytes(&self, addr: GuestAddr, buf: &[u8]) -> bool;

    fn read_u32(&self, addr: GuestAddr) -> Option<u32> {
        let mut buf = [0u8; 4];
        self.read_bytes(addr, &mut buf).then(|| LE::read_u32(&buf))
    }
    fn write_u32(&self, addr: GuestAddr, val: u32) -> bool {
        self.write_bytes(addr, &val.to_le_bytes())
    }
}

/// A single contiguous span of guest memory backed by host heap.
pub struct FlatMemory {
    base: GuestAddr,
    bytes: Mutex<Vec<u8>>,
}

impl FlatMemory {
    pub fn new(base: GuestAddr, len: usize) -> Self {
        Self { base, bytes: Mutex::new(vec![0; len]) }
    }

    pub fn len(&self) -> usize {
        self.bytes.lock().unwrap().len()
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Translate `addr..addr + len` into an index range of the backing store.
    fn span(
        &self,
        addr: GuestAddr,
        len: usize,
        total: usize,
    ) -> Option<(usize, usize)> {
        let start = usize::try_from(addr.0.checked_sub(self.base.0)?).ok()?;
        let end = start.checked_add(len)?;
        (end <= total).then_some((start, end))
    }
}

impl GuestMemory for FlatMemory {
    fn read_bytes(&self, addr: GuestAddr, buf: &mut [u8]) -> bool {
        let bytes = self.bytes.lock().unwrap();
        match self.span(addr, buf.len(), bytes.len()) {
            Some((start, end)) => {
                buf.copy_from_slice(&bytes[start..end]);
                true
            }
            None => false,
        }
    }
    fn write_bytes(&self, addr: GuestAddr, buf: &[u8]) -> bool {
        let mut bytes = self.bytes.lock().unwrap();
        let total = bytes.len();
        match self.span(addr, buf.len(), total) {
            Some((start, end)) => {
                bytes[start..end].copy_from_slice(buf);
                true
            }
            None => false,
        }
    }
}
