// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A sparse address space of non-overlapping regions.

use std::collections::BTreeMap;
use std::ops::{Bound, RangeBounds};

use thiserror::Error;

#[derive(Debug, Error, Eq, PartialEq)]
pub enum Error {
    #[error("region {0:#x}+{1:#x} lies outside the address space")]
    OutOfRange(usize, usize),
    #[error("region {0:#x}+{1:#x} conflicts with an existing region")]
    Conflict(usize, usize),
    #[error("no region registered at {0:#x}")]
    NotFound(usize),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Regions of `[start, end]` (inclusive) associated with an item each.
#[derive(Debug)]
pub struct ASpace<T> {
    start: usize,
    end: usize,
    map: BTreeMap<usize, (usize, T)>,
}

impl<T> ASpace<T> {
    /// Create an empty space covering `start..=end`.
    pub fn new(start: usize, end: usize) -> Self {
        assert!(start <= end);
        Self { start, end, map: BTreeMap::new() }
    }

    /// Register `item` as covering `start..start + len`.
    pub fn register(
        &mut self,
        start: usize,
        len: usize,
        item: T,
    ) -> Result<()> {
        let last = match len.checked_sub(1).and_then(|l| start.checked_add(l)) {
            Some(last) if start >= self.start && last <= self.end => last,
            _ => return Err(Error::OutOfRange(start, len)),
        };
        if self.map.range(start..=last).next().is_some()
            || self.containing(start).is_some()
        {
            return Err(Error::Conflict(start, len));
        }
        self.map.insert(start, (len, item));
        Ok(())
    }

    /// Remove the region starting at `start`, returning its item.
    pub fn unregister(&mut self, start: usize) -> Result<T> {
        self.map
            .remove(&start)
            .map(|(_len, item)| item)
            .ok_or(Error::NotFound(start))
    }

    /// Find the region containing `addr`, returning `(start, len, item)`.
    pub fn region_at(&self, addr: usize) -> Result<(usize, usize, &T)> {
        self.containing(addr)
            .map(|(start, (len, item))| (start, *len, item))
            .ok_or(Error::NotFound(addr))
    }

    /// Iterate (in address order) over every region which overlaps `range`.
    pub fn covered_by<R: RangeBounds<usize>>(
        &self,
        range: R,
    ) -> impl Iterator<Item = (usize, usize, &T)> {
        let lo = match range.start_bound() {
            Bound::Included(s) => *s,
            Bound::Excluded(s) => s.saturating_add(1),
            Bound::Unbounded => self.start,
        };
        let hi = match range.end_bound() {
            Bound::Included(e) => Some(*e),
            Bound::Excluded(e) => e.checked_sub(1),
            Bound::Unbounded => Some(self.end),
        };

        // A region beginning below `lo` may still extend into the range.
        let head = self.containing(lo).filter(|(start, _)| *start < lo);
        let rest = match hi {
            Some(hi) if hi >= lo => Some(self.map.range(lo..=hi)),
            _ => None,
        };
        head.into_iter()
            .chain(rest.into_iter().flatten().map(|(s, r)| (*s, r)))
            .map(|(start, (len, item))| (start, *len, item))
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn clear(&mut self) {
        self.map.clear();
    }

    fn containing(&self, addr: usize) -> Option<(usize, &(usize, T))> {
        self.map
            .range(..=addr)
            .next_back()
            .filter(|(start, (len, _))| addr - **start < *len)
            .map(|(start, ent)| (*start, ent))
    }
}
