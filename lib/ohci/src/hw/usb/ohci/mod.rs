// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*!
## Emulated Open Host Controller Interface (OHCI) device.

The version of the standard[^ohci-std] referenced throughout the comments in
this module is OpenHCI 1.0a. The controller exposes the standard operational
register set through a 4 KiB MMIO window and a root hub with
[NUM_PORTS] downstream ports.

[^ohci-std]: <https://www.cs.usfca.edu/~cruse/cs698s10/hcir1_0a.pdf>

```text
      guest MMIO                      FrameTimer
          |                               | one-shot, re-armed each frame
  +---------------+               +----------------+
  | OHCI_REGS     |               | frame boundary |
  | (RegMap)      |               +----------------+
  +---------------+                       |
          |                               |
  +------------------------------------------------+
  |              OhciState (one Mutex)             |
  |------------------------------------------------|
  | HcControl / HcCommandStatus / FmInterval ...   |
  | InterruptRegs (status, enable)  --> IntrPin     |
  | RootHubPort x2  <-- attach/detach (UsbDevice)  |
  | ListProcessor   --> GuestMemory (HCCA, EDs)    |
  +------------------------------------------------+
```

Walking endpoint and transfer descriptors is delegated to a
[list::ListProcessor]. The controller drives it once per frame for each enabled
list and takes care of everything visible at the register level: the frame
counter and HCCA frame number, the done queue write-back, scheduling overrun
accounting, and interrupt generation.
*/

use std::time::Duration;

use thiserror::Error;

pub mod bits;
pub mod controller;
pub mod frame;
pub mod interrupt;
pub mod list;
pub mod port;
pub mod registers;


pub use controller::{Ohci, OhciBackends};

/// Number of downstream ports on the root hub.
pub const NUM_PORTS: u8 = 2;

/// Size of the MMIO window claimed by each controller.
pub const OHCI_MMIO_LEN: usize = 0x1000;

/// BCD-encoded OpenHCI revision reported in HcRevision.
pub const OHCI_REVISION: u32 = 0x10;

/// How long a port reset is signalled before completing.
///
/// See OHCI 1.0a section 7.4.4 (PortResetStatus)
pub const PORT_RESET_DURATION: Duration = Duration::from_millis(10);

/// Full-speed USB bit rate, in bits per second.
pub const USB_BIT_RATE: u64 = 12_000_000;

/// Shortest frame (in bit-times) the frame timer will run, guarding against a
/// guest programming a degenerate FrameInterval.
pub const MIN_FRAME_INTERVAL: u16 = 1000;

/// Offsets of controller-written fields within the HCCA.
///
/// See OHCI 1.0a section 4.4.1
pub mod hcca {
    /// Interrupt ED table: 32 pointers, indexed by the low bits of the frame
    pub const INTERRUPT_TABLE: usize = 0x00;
    pub const INTERRUPT_TABLE_LEN: u16 = 32;
    /// HccaFrameNumber (16 bits) followed by HccaPad1
    pub const FRAME_NUMBER: usize = 0x80;
    pub const DONE_HEAD: usize = 0x84;
}

/// Errors returned by the host-facing controller API.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum Error {
    #[error("root hub port {0} out of range 1..={NUM_PORTS}")]
    InvalidPort(u8),

    #[error("root hub port {0} already has a device attached")]
    PortOccupied(u8),

    #[error("root hub port {0} has no device attached")]
    PortEmpty(u8),

    #[error("host controller index {0} out of range")]
    InvalidController(usize),

    #[error("host controller {0} is already installed")]
    ControllerPresent(usize),
}

/// Value produced by (or applied through) a register access, recorded for
/// the register probes.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum RegRWOpValue {
    NoOp,
    U32(u32),
}

impl RegRWOpValue {
    fn as_u64(&self) -> u64 {
        match self {
            RegRWOpValue::NoOp => 0,
            RegRWOpValue::U32(x) => *x as u64,
        }
    }
}
