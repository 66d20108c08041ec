// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::ops::{Add, Range};

/// A bus read, to be satisfied by the device owning `offset`.
///
/// The device produces the result by emitting bytes into the op, in order,
/// starting from the lowest address.
pub struct ReadOp<'a> {
    buf: &'a mut [u8],
    offset: usize,
    pos: usize,
}

impl<'a> ReadOp<'a> {
    /// Create a read of `buf.len()` bytes at `op_offset`.
    pub fn from_buf(op_offset: usize, buf: &'a mut [u8]) -> Self {
        Self { buf, offset: op_offset, pos: 0 }
    }

    /// A read covering the `range` bytes of `parent`, presented to a
    /// register as though it were at `op_offset`.
    pub fn new_child<'b>(
        op_offset: usize,
        parent: &'b mut ReadOp<'_>,
        range: Range<usize>,
    ) -> ReadOp<'b> {
        ReadOp { buf: &mut parent.buf[range], offset: op_offset, pos: 0 }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn write_u32(&mut self, val: u32) {
        self.write_bytes(&val.to_le_bytes());
    }
    pub fn write_bytes(&mut self, data: &[u8]) {
        let end = self.pos + data.len();
        assert!(end <= self.len(), "read result overruns access");
        self.buf[self.pos..end].copy_from_slice(data);
        self.pos = end;
    }
    /// Complete the read with `val` in every byte not yet produced.
    pub fn fill(&mut self, val: u8) {
        self.buf[self.pos..].fill(val);
        self.pos = self.len();
    }
}

/// A bus write, to be consumed by the device owning `offset`.
pub struct WriteOp<'a> {
    buf: &'a [u8],
    offset: usize,
    pos: usize,
}

impl<'a> WriteOp<'a> {
    /// Create a write of the contents of `buf` at `op_offset`.
    pub fn from_buf(op_offset: usize, buf: &'a [u8]) -> Self {
        Self { buf, offset: op_offset, pos: 0 }
    }

    /// A write of the `range` bytes of `parent`, presented to a register as
    /// though it were at `op_offset`.
    pub fn new_child<'b>(
        op_offset: usize,
        parent: &'b WriteOp<'_>,
        range: Range<usize>,
    ) -> WriteOp<'b> {
        WriteOp { buf: &parent.buf[range], offset: op_offset, pos: 0 }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn read_u32(&mut self) -> u32 {
        let mut val = [0u8; 4];
        self.read_bytes(&mut val);
        u32::from_le_bytes(val)
    }
    pub fn read_bytes(&mut self, data: &mut [u8]) {
        let end = self.pos + data.len();
        assert!(end <= self.len(), "write source overruns access");
        data.copy_from_slice(&self.buf[self.pos..end]);
        self.pos = end;
    }
}

pub enum RWOp<'a, 'b> {
    Read(&'a mut ReadOp<'b>),
    Write(&'a mut WriteOp<'b>),
}
impl RWOp<'_, '_> {
    pub fn offset(&self) -> usize {
        match self {
            RWOp::Read(ro) => ro.offset,
            RWOp::Write(wo) => wo.offset,
        }
    }
    pub fn len(&self) -> usize {
        match self {
            RWOp::Read(ro) => ro.len(),
            RWOp::Write(wo) => wo.len(),
        }
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A physical address in the memory of the emulated machine.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub struct GuestAddr(pub u64);

impl Add<usize> for GuestAddr {
    type Output = Self;

    fn add(self, rhs: usize) -> Self::Output {
        Self(self.0.wrapping_add(rhs as u64))
    }
}
