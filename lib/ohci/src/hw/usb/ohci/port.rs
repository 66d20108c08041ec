// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Root hub downstream ports.
//!
//! Each port keeps a single authoritative record of its state, and the value
//! of HcRhPortStatus is projected from it on every read.

use std::sync::Arc;
use std::time::Duration;

use crate::hw::usb::usbdev::{UsbDevice, UsbSpeed};

use super::bits::PortStatus;
use super::{Error, NUM_PORTS, PORT_RESET_DURATION};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(transparent)]
pub struct PortId(u8);

impl TryFrom<u8> for PortId {
    type Error = Error;
    fn try_from(value: u8) -> Result<Self, Self::Error> {
        if value > 0 && value <= NUM_PORTS {
            Ok(Self(value - 1))
        } else {
            Err(Error::InvalidPort(value))
        }
    }
}

impl PortId {
    pub(super) const fn from_index(index: u8) -> Self {
        assert!(index < NUM_PORTS);
        Self(index)
    }
    pub fn as_raw_id(&self) -> u8 {
        self.0 + 1
    }
    pub fn as_index(&self) -> usize {
        self.0 as usize
    }
}

bitflags! {
    /// Change indications latched by a port until cleared by the guest.
    ///
    /// Bit positions match those within HcRhPortStatus.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct PortChange: u32 {
        const CONNECT = 1 << 16;
        const ENABLE = 1 << 17;
        const SUSPEND = 1 << 18;
        const OVERCURRENT = 1 << 19;
        const RESET = 1 << 20;
    }
}

pub struct RootHubPort {
    id: PortId,
    device: Option<Arc<dyn UsbDevice>>,
    enabled: bool,
    suspended: bool,
    overcurrent: bool,
    /// Deadline at which an in-progress port reset completes
    reset_until: Option<Duration>,
    changes: PortChange,
}

impl RootHubPort {
    pub fn new(id: PortId) -> Self {
        Self {
            id,
            device: None,
            enabled: false,
            suspended: false,
            overcurrent: false,
            reset_until: None,
            changes: PortChange::empty(),
        }
    }

    pub fn id(&self) -> PortId {
        self.id
    }
    pub fn device(&self) -> Option<&Arc<dyn UsbDevice>> {
        self.device.as_ref()
    }
    pub fn is_connected(&self) -> bool {
        self.device.is_some()
    }
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
    pub fn is_overcurrent(&self) -> bool {
        self.overcurrent
    }
    pub fn changes(&self) -> PortChange {
        self.changes
    }

    /// Guest-visible HcRhPortStatus value.
    ///
    /// The root hub does not switch port power, so PPS always reads as set.
    pub fn status(&self) -> PortStatus {
        let low_speed = self
            .device
            .as_ref()
            .map_or(false, |dev| dev.speed() == UsbSpeed::Low);
        let status = PortStatus(self.changes.bits())
            .with_current_connect_status(self.is_connected())
            .with_port_enable_status(self.enabled)
            .with_port_suspend_status(self.suspended)
            .with_port_overcurrent_indicator(self.overcurrent)
            .with_port_reset_status(self.reset_until.is_some())
            .with_port_power_status(true);
        status.with_low_speed_device_attached(low_speed)
    }

    /// Return the port to its state following a controller reset.
    ///
    /// An attached device remains attached, and is reported anew.
    pub fn reset(&mut self) {
        let device = self.device.take();
        *self = Self::new(self.id);
        if device.is_some() {
            self.device = device;
            self.changes = PortChange::CONNECT;
        }
    }

    pub fn attach(&mut self, dev: Arc<dyn UsbDevice>) -> Result<(), Error> {
        if self.device.is_some() {
            return Err(Error::PortOccupied(self.id.as_raw_id()));
        }
        self.device = Some(dev);
        self.changes |= PortChange::CONNECT;
        Ok(())
    }

    pub fn detach(&mut self) -> Result<Arc<dyn UsbDevice>, Error> {
        let dev = self
            .device
            .take()
            .ok_or(Error::PortEmpty(self.id.as_raw_id()))?;
        if self.enabled {
            self.changes |= PortChange::ENABLE;
        }
        self.enabled = false;
        self.suspended = false;
        self.reset_until = None;
        self.changes |= PortChange::CONNECT;
        Ok(dev)
    }

    /// Apply a guest write to HcRhPortStatus.
    ///
    /// SetPortPower and ClearPortPower are ignored, as NoPowerSwitching is
    /// set in HcRhDescriptorA.
    ///
    /// See OHCI 1.0a section 7.4.4
    pub fn write(&mut self, wo: PortStatus, now: Duration, log: &slog::Logger) {
        // ClearPortEnable
        if wo.current_connect_status() {
            self.enabled = false;
        }
        // SetPortEnable
        if wo.port_enable_status() && self.require_connected() {
            self.enabled = true;
        }
        // SetPortSuspend
        if wo.port_suspend_status() && self.require_connected() {
            self.suspended = true;
        }
        // ClearSuspendStatus
        if wo.port_overcurrent_indicator() && self.suspended {
            self.suspended = false;
            self.changes |= PortChange::SUSPEND;
        }
        // SetPortReset
        if wo.port_reset_status() && self.require_connected() {
            if self.reset_until.is_none() {
                slog::debug!(log, "port reset"; "port" => self.id.as_raw_id());
                self.reset_until = Some(now + PORT_RESET_DURATION);
            }
        }
        let clear = PortChange::from_bits_truncate(wo.0);
        self.changes.remove(clear);
    }

    /// Writes of SetPortEnable, SetPortSuspend and SetPortReset have no effect
    /// on a disconnected port, and instead flag a connect status change.
    fn require_connected(&mut self) -> bool {
        if self.is_connected() {
            true
        } else {
            self.changes |= PortChange::CONNECT;
            false
        }
    }

    pub fn set_overcurrent(&mut self, active: bool) {
        if self.overcurrent != active {
            self.overcurrent = active;
            self.changes |= PortChange::OVERCURRENT;
        }
    }

    /// Handle resume signalling from the attached device.
    ///
    /// Returns whether the port was suspended.
    pub fn remote_wakeup(&mut self) -> bool {
        if self.suspended {
            self.suspended = false;
            self.changes |= PortChange::SUSPEND;
            true
        } else {
            false
        }
    }

    /// Complete an in-progress port reset if it has run its course.
    pub fn poll_reset(&mut self, now: Duration) {
        match self.reset_until {
            Some(deadline) if now >= deadline => {}
            _ => return,
        }
        self.reset_until = None;
        self.enabled = true;
        self.suspended = false;
        self.changes |= PortChange::RESET;
        if let Some(dev) = self.device.as_ref() {
            dev.bus_reset();
            self.changes |= PortChange::CONNECT;
        }
    }

    pub fn export(&self, now: Duration) -> migrate::RootHubPortV1 {
        migrate::RootHubPortV1 {
            enabled: self.enabled,
            suspended: self.suspended,
            overcurrent: self.overcurrent,
            reset_remaining_ns: self
                .reset_until
                .map(|deadline| deadline.saturating_sub(now).as_nanos() as u64),
            changes: self.changes.bits(),
        }
    }

    pub fn import(&mut self, data: &migrate::RootHubPortV1, now: Duration) {
        self.enabled = data.enabled;
        self.suspended = data.suspended;
        self.overcurrent = data.overcurrent;
        self.reset_until =
            data.reset_remaining_ns.map(|ns| now + Duration::from_nanos(ns));
        self.changes = PortChange::from_bits_truncate(data.changes);
    }
}

pub mod migrate {
    use serde::{Deserialize, Serialize};

    /// Port state, excluding the attached device (which is part of the
    /// machine configuration rather than controller state).
    #[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
    pub struct RootHubPortV1 {
        pub enabled: bool,
        pub suspended: bool,
        pub overcurrent: bool,
        pub reset_remaining_ns: Option<u64>,
        pub changes: u32,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::hw::usb::usbdev::NullUsbDevice;

    const NOW: Duration = Duration::from_secs(1);

    fn log() -> slog::Logger {
        slog::Logger::root(slog::Discard, slog::o!())
    }

    /// Guest write of `wo` to the port.
    fn cmd(port: &mut RootHubPort, wo: PortStatus) {
        port.write(wo, NOW, &log());
    }

    fn port_with(speed: UsbSpeed) -> (RootHubPort, Arc<NullUsbDevice>) {
        let mut port = RootHubPort::new(PortId::from_index(0));
        let dev = Arc::new(NullUsbDevice::new("kbd", speed));
        port.attach(dev.clone()).unwrap();
        (port, dev)
    }

    #[test]
    fn port_id_range() {
        assert!(PortId::try_from(0).is_err());
        assert_eq!(PortId::try_from(1).unwrap().as_index(), 0);
        assert_eq!(PortId::try_from(2).unwrap().as_raw_id(), 2);
        assert_eq!(PortId::try_from(3), Err(Error::InvalidPort(3)));
    }

    #[test]
    fn attach_sets_connect_change() {
        let (port, _dev) = port_with(UsbSpeed::Low);
        let st = port.status();
        assert!(st.current_connect_status());
        assert!(st.connect_status_change());
        assert!(st.low_speed_device_attached());
        assert!(st.port_power_status());
        assert!(!st.port_enable_status());
    }

    #[test]
    fn reset_completes_after_duration() {
        let (mut port, dev) = port_with(UsbSpeed::Full);
        // acknowledge the attach
        cmd(&mut port, PortStatus(0).with_connect_status_change(true));
        assert!(port.changes().is_empty());

        cmd(&mut port, PortStatus(0).with_port_reset_status(true));
        assert!(port.status().port_reset_status());

        port.poll_reset(NOW + PORT_RESET_DURATION / 2);
        assert!(port.status().port_reset_status());
        assert_eq!(dev.reset_count(), 0);

        port.poll_reset(NOW + PORT_RESET_DURATION);
        let st = port.status();
        assert!(!st.port_reset_status());
        assert!(st.port_enable_status());
        assert!(st.port_reset_status_change());
        assert!(st.connect_status_change());
        assert_eq!(dev.reset_count(), 1);
    }

    #[test]
    fn commands_on_empty_port_flag_connect_change() {
        let mut port = RootHubPort::new(PortId::from_index(1));
        let wo = PortStatus(0)
            .with_port_enable_status(true)
            .with_port_reset_status(true);
        cmd(&mut port, wo);
        let st = port.status();
        assert!(!st.port_enable_status());
        assert!(!st.port_reset_status());
        assert!(st.connect_status_change());
        assert!(st.port_power_status());
    }

    #[test]
    fn suspend_and_resume() {
        let (mut port, _dev) = port_with(UsbSpeed::Full);
        cmd(&mut port, PortStatus(0).with_port_enable_status(true));
        cmd(&mut port, PortStatus(0).with_port_suspend_status(true));
        assert!(port.status().port_suspend_status());

        // ClearSuspendStatus shares its bit with POCI
        cmd(&mut port, PortStatus(0).with_port_overcurrent_indicator(true));
        let st = port.status();
        assert!(!st.port_suspend_status());
        assert!(st.port_suspend_status_change());
        assert!(st.port_enable_status());
    }

    #[test]
    fn detach_reports_enable_change() {
        let (mut port, _dev) = port_with(UsbSpeed::Full);
        cmd(
            &mut port,
            PortStatus(0)
                .with_port_enable_status(true)
                .with_connect_status_change(true),
        );
        assert!(port.detach().is_ok());
        let st = port.status();
        assert!(!st.current_connect_status());
        assert!(!st.port_enable_status());
        assert!(st.connect_status_change());
        assert!(st.port_enable_status_change());
        assert_eq!(port.detach().err(), Some(Error::PortEmpty(1)));
    }

    #[test]
    fn power_commands_ignored() {
        let (mut port, _dev) = port_with(UsbSpeed::Full);
        cmd(&mut port, PortStatus(0).with_port_enable_status(true));

        // ClearPortPower shares its bit with LSDA
        cmd(&mut port, PortStatus(0).with_low_speed_device_attached(true));
        let st = port.status();
        assert!(st.port_power_status());
        assert!(st.port_enable_status());
        assert!(!st.low_speed_device_attached());

        cmd(&mut port, PortStatus(0).with_port_power_status(true));
        assert!(port.status().port_power_status());
    }
}
