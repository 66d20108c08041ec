// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Interface to the endpoint list walker.
//!
//! The controller owns every register the lists are anchored by, and hands a
//! snapshot of the relevant ones to a [ListProcessor] each frame. The
//! processor walks endpoint and transfer descriptors in guest memory against
//! the attached devices, then reports where it stopped.
//!
//! See OHCI 1.0a section 6.4 (List Service Flow)

use std::sync::Arc;

use thiserror::Error;

use crate::common::GuestAddr;
use crate::hw::usb::usbdev::UsbDevice;
use crate::vmm::GuestMemory;

/// The three endpoint lists serviced each frame, in service order.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum EdList {
    /// Interrupt and isochronous EDs reached through the HCCA interrupt table
    Periodic,
    Control,
    Bulk,
}

impl EdList {
    pub const fn name(&self) -> &'static str {
        match self {
            EdList::Periodic => "periodic",
            EdList::Control => "control",
            EdList::Bulk => "bulk",
        }
    }
}

/// Parameters for servicing one list during one frame.
#[derive(Copy, Clone, Debug)]
pub struct ListRequest {
    pub list: EdList,
    /// Base of the HCCA
    pub hcca: GuestAddr,
    pub frame_number: u16,
    /// ED to start from (0 when the list is empty)
    pub current_ed: u32,
    /// Head of the done queue accumulated so far
    pub done_head: u32,
    /// Whether isochronous EDs on the periodic list may be served
    pub isochronous: bool,
    /// HcControl.CBSR
    pub control_bulk_ratio: u8,
    /// Bit-times of the frame still available for transfers
    pub budget: u16,
}

/// Position reached by a list processor, to be written back by the
/// controller.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct ListProgress {
    /// ED to resume from next frame (0 once the end of the list was reached)
    pub current_ed: u32,
    /// New head of the done queue
    pub done_head: u32,
    /// Whether the list was completed within the frame budget
    pub finished: bool,
}

#[derive(Debug, Error, Eq, PartialEq)]
pub enum ListError {
    #[error("descriptor at {0:#x} not readable")]
    Unreadable(u32),

    #[error("malformed descriptor at {0:#x}")]
    Malformed(u32),
}

/// Resources available to a list processor while it runs.
pub struct ListCtx<'a> {
    pub mem: &'a dyn GuestMemory,
    /// Devices currently attached and enabled on the root hub
    pub devices: &'a [Arc<dyn UsbDevice>],
    pub log: &'a slog::Logger,
}

pub trait ListProcessor: Send + 'static {
    fn service(
        &mut self,
        req: &ListRequest,
        ctx: &ListCtx<'_>,
    ) -> Result<ListProgress, ListError>;
}

/// A processor which performs no transfers: every list is treated as
/// immediately exhausted.
#[derive(Debug, Default)]
pub struct IdleListProcessor;

impl ListProcessor for IdleListProcessor {
    fn service(
        &mut self,
        req: &ListRequest,
        ctx: &ListCtx<'_>,
    ) -> Result<ListProgress, ListError> {
        if req.current_ed != 0 {
            slog::trace!(ctx.log, "idle list processor skipping list";
                "list" => req.list.name(),
                "ed" => req.current_ed,
            );
        }
        Ok(ListProgress {
            current_ed: 0,
            done_head: req.done_head,
            finished: true,
        })
    }
}
