// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::ops::Range;

use super::aspace::ASpace;
use crate::common::*;

#[derive(Debug)]
struct RegDef<ID> {
    id: ID,
    flags: Flags,
}

/// Represents a mapping of registers within an address space.
///
/// Accesses which do not line up with register boundaries are split (or
/// widened) so that the handler only ever observes whole-register operations,
/// unless the register opts out via [`Flags`].
#[derive(Debug)]
pub struct RegMap<ID> {
    len: usize,
    space: ASpace<RegDef<ID>>,
}

bitflags! {
    #[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
    pub struct Flags: u8 {
        const DEFAULT = 0;
        /// Hand partial reads to the handler as-is
        const NO_READ_EXTEND = 0b00000001;
        /// Hand partial writes to the handler as-is
        const NO_WRITE_EXTEND = 0b00000010;
        /// Widen partial writes with zeroes instead of the current contents
        const NO_READ_MOD_WRITE = 0b00000100;
        const PASSTHRU = Self::NO_READ_EXTEND.bits() |
            Self::NO_WRITE_EXTEND.bits();
    }
}

/// Portion of an access which lands on a single register.
struct RegXfer<'a, ID> {
    reg: &'a RegDef<ID>,
    reg_len: usize,
    /// Offset of the transfer within the register
    reg_offset: usize,
    /// Bytes of the original operation covered by the transfer
    op_range: Range<usize>,
}

impl<ID> RegMap<ID> {
    pub fn new(len: usize) -> Self {
        assert!(len != 0);
        Self { len, space: ASpace::new(0, len - 1) }
    }

    pub fn len(&self) -> usize {
        self.len
    }
    pub fn is_empty(&self) -> bool {
        self.space.is_empty()
    }

    pub fn define_with_flags(
        &mut self,
        start: usize,
        len: usize,
        id: ID,
        flags: Flags,
    ) {
        // Register layouts are static, so an overlap is a programming error.
        self.space.register(start, len, RegDef { id, flags }).unwrap();
    }

    pub fn process<F>(&self, op: &mut RWOp<'_, '_>, mut f: F)
    where
        F: FnMut(&ID, RWOp),
    {
        match op {
            RWOp::Read(ro) => self.read(ro, &mut f),
            RWOp::Write(wo) => self.write(wo, &mut f),
        }
    }

    pub fn read<F>(&self, ro: &mut ReadOp, f: &mut F)
    where
        F: FnMut(&ID, RWOp),
    {
        for xfer in self.transfers(ro.offset(), ro.len()) {
            let mut child =
                ReadOp::new_child(xfer.reg_offset, ro, xfer.op_range.clone());
            Self::reg_read(&xfer, &mut child, f);
        }
    }

    pub fn write<F>(&self, wo: &mut WriteOp, f: &mut F)
    where
        F: FnMut(&ID, RWOp),
    {
        for xfer in self.transfers(wo.offset(), wo.len()) {
            let mut child =
                WriteOp::new_child(xfer.reg_offset, wo, xfer.op_range.clone());
            Self::reg_write(&xfer, &mut child, f);
        }
    }

    fn reg_read<F>(xfer: &RegXfer<'_, ID>, child: &mut ReadOp, f: &mut F)
    where
        F: FnMut(&ID, RWOp),
    {
        let reg = xfer.reg;
        if child.len() == xfer.reg_len
            || reg.flags.contains(Flags::NO_READ_EXTEND)
        {
            f(&reg.id, RWOp::Read(child));
            return;
        }

        // Read the whole register and hand back the requested slice of it
        let mut scratch = vec![0; xfer.reg_len];
        f(&reg.id, RWOp::Read(&mut ReadOp::from_buf(0, &mut scratch)));
        let start = child.offset();
        child.write_bytes(&scratch[start..(start + child.len())]);
    }

    fn reg_write<F>(xfer: &RegXfer<'_, ID>, child: &mut WriteOp, f: &mut F)
    where
        F: FnMut(&ID, RWOp),
    {
        let reg = xfer.reg;
        if child.len() == xfer.reg_len
            || reg.flags.contains(Flags::NO_WRITE_EXTEND)
        {
            f(&reg.id, RWOp::Write(child));
            return;
        }

        let mut scratch = vec![0; xfer.reg_len];
        if !reg.flags.contains(Flags::NO_READ_MOD_WRITE) {
            f(&reg.id, RWOp::Read(&mut ReadOp::from_buf(0, &mut scratch)));
        }
        let start = child.offset();
        let len = child.len();
        child.read_bytes(&mut scratch[start..(start + len)]);
        f(&reg.id, RWOp::Write(&mut WriteOp::from_buf(0, &scratch)));
    }

    fn transfers(
        &self,
        offset: usize,
        len: usize,
    ) -> impl Iterator<Item = RegXfer<'_, ID>> {
        assert!(len != 0);
        let end = offset + len;
        assert!(end <= self.len);

        self.space.covered_by(offset..end).map(
            move |(reg_start, reg_len, reg)| {
                let lo = offset.max(reg_start);
                let hi = end.min(reg_start + reg_len);
                RegXfer {
                    reg,
                    reg_len,
                    reg_offset: lo - reg_start,
                    op_range: (lo - offset)..(hi - offset),
                }
            },
        )
    }
}

impl<ID: Copy + Eq> RegMap<ID> {
    /// Build a map from registers laid out back-to-back starting at offset 0.
    ///
    /// Each entry gives a register with its size and access flags.
    pub fn create_packed(
        size: usize,
        layout: impl IntoIterator<Item = (ID, usize, Flags)>,
    ) -> Self {
        let mut map = RegMap::new(size);
        let mut off = 0;
        for (id, reg_size, flags) in layout {
            map.define_with_flags(off, reg_size, id, flags);
            off += reg_size;
        }
        assert_eq!(size, off);

        map
    }
}
