// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Register layouts for the OHCI operational registers.

// Not every field is consumed by the emulation, but all are described.
#![allow(dead_code)]

use bitstruct::bitstruct;
use strum::FromRepr;

/// Reset values and guest-writable masks for the operational registers.
pub mod values {
    use super::*;
    use crate::hw::usb::ohci::NUM_PORTS;

    /// Nominal 1ms frame: 12000 bit-times, minus one.
    pub const DEFAULT_FRAME_INTERVAL: u16 = 0x2edf;

    /// Largest full-speed data packet which fits in the default frame.
    pub const DEFAULT_FS_LARGEST_DATA_PACKET: u16 = 0x2778;

    pub const FM_INTERVAL: FmInterval = FmInterval(0)
        .with_frame_interval(DEFAULT_FRAME_INTERVAL)
        .with_fs_largest_data_packet(DEFAULT_FS_LARGEST_DATA_PACKET);

    pub const LS_THRESHOLD: u32 = 0x628;

    /// Capabilities of the root hub. Ports are always powered, so the power
    /// switching mode is moot. The register is read-only.
    pub const RH_DESCRIPTOR_A: RhDescriptorA = RhDescriptorA(0)
        .with_number_downstream_ports(NUM_PORTS)
        .with_no_power_switching(true);

    pub const RH_DESCRIPTOR_B: RhDescriptorB = RhDescriptorB(0);

    pub const HC_CONTROL_MASK: u32 = 0x0000_07ff;
    pub const HC_HCCA_MASK: u32 = 0xffff_ff00;
    pub const ED_POINTER_MASK: u32 = 0xffff_fff0;
    pub const FM_INTERVAL_MASK: u32 = 0xffff_3fff;
    pub const PERIODIC_START_MASK: u32 = 0x0000_3fff;
    pub const LS_THRESHOLD_MASK: u32 = 0x0000_0fff;

    /// DeviceRemovable and PortPowerControlMask bits of the existing ports.
    pub const RH_DESCRIPTOR_B_MASK: u32 = {
        let ports = ((1u32 << NUM_PORTS) - 1) << 1;
        ports | (ports << 16)
    };
}

/// HostControllerFunctionalState (HCFS) within HcControl.
///
/// See OHCI 1.0a section 7.1.2
#[derive(FromRepr, Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum FunctionalState {
    Reset = 0,
    Resume = 1,
    Operational = 2,
    Suspend = 3,
}

impl From<u8> for FunctionalState {
    fn from(value: u8) -> Self {
        match Self::from_repr(value & 0b11) {
            Some(state) => state,
            None => unreachable!("two-bit field"),
        }
    }
}
impl From<FunctionalState> for u8 {
    fn from(state: FunctionalState) -> u8 {
        state as u8
    }
}

bitstruct! {
    /// Representation of the HcControl register.
    ///
    /// See OHCI 1.0a section 7.1.2
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct HcControl(pub u32) {
        /// ControlBulkServiceRatio (CBSR)
        ///
        /// Number of control EDs served for every bulk ED, minus one.
        pub control_bulk_ratio: u8 = 0..2;

        /// PeriodicListEnable (PLE)
        pub periodic_list_enable: bool = 2;

        /// IsochronousEnable (IE)
        ///
        /// Isochronous EDs on the periodic list are skipped while clear.
        pub isochronous_enable: bool = 3;

        /// ControlListEnable (CLE)
        pub control_list_enable: bool = 4;

        /// BulkListEnable (BLE)
        pub bulk_list_enable: bool = 5;

        /// HostControllerFunctionalState (HCFS)
        pub functional_state: FunctionalState = 6..8;

        /// InterruptRouting (IR)
        ///
        /// Routes interrupts to SMI rather than the host bus when set. Only
        /// stored: the emulation has a single interrupt line.
        pub interrupt_routing: bool = 8;

        /// RemoteWakeupConnected (RWC)
        pub remote_wakeup_connected: bool = 9;

        /// RemoteWakeupEnable (RWE)
        pub remote_wakeup_enable: bool = 10;

        reserved: u32 = 11..32;
    }
}

bitstruct! {
    /// Representation of the HcCommandStatus register.
    ///
    /// The low four bits are written as commands (write 1 to set);
    /// SchedulingOverrunCount is maintained by the controller.
    ///
    /// See OHCI 1.0a section 7.1.3
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct HcCommandStatus(pub u32) {
        /// HostControllerReset (HCR)
        pub host_controller_reset: bool = 0;

        /// ControlListFilled (CLF)
        pub control_list_filled: bool = 1;

        /// BulkListFilled (BLF)
        pub bulk_list_filled: bool = 2;

        /// OwnershipChangeRequest (OCR)
        pub ownership_change_request: bool = 3;

        reserved0: u16 = 4..16;

        /// SchedulingOverrunCount (SOC)
        pub scheduling_overrun_count: u8 = 16..18;

        reserved1: u16 = 18..32;
    }
}

impl HcCommandStatus {
    /// Bits the guest may set by writing 1.
    pub const COMMAND_MASK: u32 = 0b1111;
}

bitflags! {
    /// Bits shared by HcInterruptStatus, HcInterruptEnable and
    /// HcInterruptDisable.
    ///
    /// See OHCI 1.0a sections 7.1.4 - 7.1.6
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct Interrupts: u32 {
        /// SchedulingOverrun
        const SO = 1 << 0;
        /// WritebackDoneHead
        const WDH = 1 << 1;
        /// StartofFrame
        const SF = 1 << 2;
        /// ResumeDetected
        const RD = 1 << 3;
        /// UnrecoverableError
        const UE = 1 << 4;
        /// FrameNumberOverflow
        const FNO = 1 << 5;
        /// RootHubStatusChange
        const RHSC = 1 << 6;
        /// OwnershipChange
        const OC = 1 << 30;
        /// MasterInterruptEnable (enable/disable registers only)
        const MIE = 1 << 31;

        /// Every event which may be reported in HcInterruptStatus
        const EVENTS = Self::SO.bits() | Self::WDH.bits() | Self::SF.bits()
            | Self::RD.bits() | Self::UE.bits() | Self::FNO.bits()
            | Self::RHSC.bits() | Self::OC.bits();
    }
}

bitstruct! {
    /// Representation of the HcFmInterval register.
    ///
    /// See OHCI 1.0a section 7.3.1
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct FmInterval(pub u32) {
        /// FrameInterval (FI)
        ///
        /// Bit-times between two consecutive SOFs, minus one.
        pub frame_interval: u16 = 0..14;

        reserved: u8 = 14..16;

        /// FSLargestDataPacket (FSMPS)
        pub fs_largest_data_packet: u16 = 16..31;

        /// FrameIntervalToggle (FIT)
        ///
        /// Toggled by software whenever it loads a new FrameInterval.
        pub frame_interval_toggle: bool = 31;
    }
}

bitstruct! {
    /// Representation of the HcFmRemaining register.
    ///
    /// See OHCI 1.0a section 7.3.2
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct FmRemaining(pub u32) {
        /// FrameRemaining (FR)
        pub frame_remaining: u16 = 0..14;

        reserved: u32 = 14..31;

        /// FrameRemainingToggle (FRT)
        ///
        /// Loaded from FIT whenever FR reloads at a frame boundary.
        pub frame_remaining_toggle: bool = 31;
    }
}

bitstruct! {
    /// Representation of the HcRhDescriptorA register.
    ///
    /// See OHCI 1.0a section 7.4.1
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct RhDescriptorA(pub u32) {
        /// NumberDownstreamPorts (NDP)
        pub number_downstream_ports: u8 = 0..8;

        /// PowerSwitchingMode (PSM)
        ///
        /// Ganged (0) or per-port (1) power control.
        pub power_switching_mode: bool = 8;

        /// NoPowerSwitching (NPS)
        ///
        /// Ports are always powered while the controller is.
        pub no_power_switching: bool = 9;

        /// DeviceType (DT), always 0: the root hub is not a compound device
        pub device_type: bool = 10;

        /// OverCurrentProtectionMode (OCPM)
        ///
        /// Over-current is reported collectively (0) or per-port (1).
        pub overcurrent_protection_mode: bool = 11;

        /// NoOverCurrentProtection (NOCP)
        pub no_overcurrent_protection: bool = 12;

        reserved: u16 = 13..24;

        /// PowerOnToPowerGoodTime (POTPGT), in units of 2ms
        pub power_on_to_power_good_time: u8 = 24..32;
    }
}

bitstruct! {
    /// Representation of the HcRhDescriptorB register.
    ///
    /// See OHCI 1.0a section 7.4.2
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct RhDescriptorB(pub u32) {
        /// DeviceRemovable (DR), one bit per port starting at bit 1
        pub device_removable: u16 = 0..16;

        /// PortPowerControlMask (PPCM), one bit per port starting at bit 17
        pub port_power_control_mask: u16 = 16..32;
    }
}

bitstruct! {
    /// Representation of the HcRhStatus register.
    ///
    /// Several bits have different meanings for reads and writes; both are
    /// noted below.
    ///
    /// See OHCI 1.0a section 7.4.3
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct RhStatus(pub u32) {
        /// LocalPowerStatus (LPS) when read; ClearGlobalPower when written
        pub local_power_status: bool = 0;

        /// OverCurrentIndicator (OCI)
        pub overcurrent_indicator: bool = 1;

        reserved0: u16 = 2..15;

        /// DeviceRemoteWakeupEnable (DRWE) when read; SetRemoteWakeupEnable
        /// when written
        pub device_remote_wakeup_enable: bool = 15;

        /// LocalPowerStatusChange (LPSC) when read; SetGlobalPower when
        /// written
        pub local_power_status_change: bool = 16;

        /// OverCurrentIndicatorChange (OCIC), write 1 to clear
        pub overcurrent_indicator_change: bool = 17;

        reserved1: u16 = 18..31;

        /// ClearRemoteWakeupEnable (CRWE), write only
        pub clear_remote_wakeup_enable: bool = 31;
    }
}

bitstruct! {
    /// Representation of the HcRhPortStatus registers.
    ///
    /// The low bits are status when read and commands when written; the
    /// change bits are write-1-to-clear.
    ///
    /// See OHCI 1.0a section 7.4.4
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct PortStatus(pub u32) {
        /// CurrentConnectStatus (CCS); ClearPortEnable when written
        pub current_connect_status: bool = 0;

        /// PortEnableStatus (PES); SetPortEnable when written
        pub port_enable_status: bool = 1;

        /// PortSuspendStatus (PSS); SetPortSuspend when written
        pub port_suspend_status: bool = 2;

        /// PortOverCurrentIndicator (POCI); ClearSuspendStatus when written
        pub port_overcurrent_indicator: bool = 3;

        /// PortResetStatus (PRS); SetPortReset when written
        pub port_reset_status: bool = 4;

        reserved0: u8 = 5..8;

        /// PortPowerStatus (PPS); SetPortPower when written
        pub port_power_status: bool = 8;

        /// LowSpeedDeviceAttached (LSDA); ClearPortPower when written
        pub low_speed_device_attached: bool = 9;

        reserved1: u8 = 10..16;

        /// ConnectStatusChange (CSC)
        pub connect_status_change: bool = 16;

        /// PortEnableStatusChange (PESC)
        pub port_enable_status_change: bool = 17;

        /// PortSuspendStatusChange (PSSC)
        pub port_suspend_status_change: bool = 18;

        /// PortOverCurrentIndicatorChange (OCIC)
        pub port_overcurrent_indicator_change: bool = 19;

        /// PortResetStatusChange (PRSC)
        pub port_reset_status_change: bool = 20;

        reserved2: u16 = 21..32;
    }
}
