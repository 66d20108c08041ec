// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Devices which may be plugged into a root hub port.

use std::sync::atomic::{AtomicU32, Ordering};

use serde::{Deserialize, Serialize};

/// Signalling rate of an attached device, as sensed by the root hub.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UsbSpeed {
    Low,
    #[default]
    Full,
}

/// A USB function attached to the root hub.
///
/// Transfers to the device are carried out by the list processor; the host
/// controller itself only observes connection state and bus resets.
pub trait UsbDevice: Send + Sync + 'static {
    fn name(&self) -> &str;
    fn speed(&self) -> UsbSpeed;

    /// Called when the root hub completes a bus reset of the device's port.
    fn bus_reset(&self) {}
}

/// A device with no functionality beyond being present on the bus.
#[derive(Debug)]
pub struct NullUsbDevice {
    name: String,
    speed: UsbSpeed,
    resets: AtomicU32,
}

impl NullUsbDevice {
    pub fn new(name: impl Into<String>, speed: UsbSpeed) -> Self {
        Self { name: name.into(), speed, resets: AtomicU32::new(0) }
    }

    /// Number of bus resets the device has seen.
    pub fn reset_count(&self) -> u32 {
        self.resets.load(Ordering::Acquire)
    }
}

impl UsbDevice for NullUsbDevice {
    fn name(&self) -> &str {
        &self.name
    }
    fn speed(&self) -> UsbSpeed {
        self.speed
    }
    fn bus_reset(&self) {
        self.resets.fetch_add(1, Ordering::AcqRel);
    }
}
