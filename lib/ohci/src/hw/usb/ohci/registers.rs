// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! OHCI Registers

use crate::util::regmap::{Flags, RegMap};

use super::port::PortId;
use super::{NUM_PORTS, OHCI_MMIO_LEN};

use lazy_static::lazy_static;

/// Operational registers in the controller's MMIO window.
///
/// See OHCI 1.0a Section 7 Operational Registers
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Registers {
    Reserved,

    // Control and Status Partition (7.1)
    Revision,
    Control,
    CommandStatus,
    InterruptStatus,
    InterruptEnable,
    InterruptDisable,

    // Memory Pointer Partition (7.2)
    Hcca,
    PeriodCurrentEd,
    ControlHeadEd,
    ControlCurrentEd,
    BulkHeadEd,
    BulkCurrentEd,
    DoneHead,

    // Frame Counter Partition (7.3)
    FmInterval,
    FmRemaining,
    FmNumber,
    PeriodicStart,
    LsThreshold,

    // Root Hub Partition (7.4)
    RhDescriptorA,
    RhDescriptorB,
    RhStatus,
    RhPortStatus(PortId),
}

lazy_static! {
    pub static ref OHCI_REGS: RegMap<Registers> = {
        use Registers::*;

        // Registers with write-1-to-set/clear or command semantics must not
        // have partial writes widened with their current contents.
        let cmd = Flags::NO_READ_MOD_WRITE;

        let layout = [
            (Revision, 4, Flags::DEFAULT),
            (Control, 4, Flags::DEFAULT),
            (CommandStatus, 4, cmd),
            (InterruptStatus, 4, cmd),
            (InterruptEnable, 4, cmd),
            (InterruptDisable, 4, cmd),
            (Hcca, 4, Flags::DEFAULT),
            (PeriodCurrentEd, 4, Flags::DEFAULT),
            (ControlHeadEd, 4, Flags::DEFAULT),
            (ControlCurrentEd, 4, Flags::DEFAULT),
            (BulkHeadEd, 4, Flags::DEFAULT),
            (BulkCurrentEd, 4, Flags::DEFAULT),
            (DoneHead, 4, Flags::DEFAULT),
            (FmInterval, 4, Flags::DEFAULT),
            (FmRemaining, 4, Flags::DEFAULT),
            (FmNumber, 4, Flags::DEFAULT),
            (PeriodicStart, 4, Flags::DEFAULT),
            (LsThreshold, 4, Flags::DEFAULT),
            (RhDescriptorA, 4, Flags::DEFAULT),
            (RhDescriptorB, 4, Flags::DEFAULT),
            (RhStatus, 4, cmd),
        ]
        .into_iter();

        let ports = (0..NUM_PORTS)
            .map(|i| (RhPortStatus(PortId::from_index(i)), 4, cmd));

        let used: usize =
            layout.clone().chain(ports.clone()).map(|(_, sz, _)| sz).sum();
        assert_eq!(used, RH_PORT_STATUS_BASE + 4 * NUM_PORTS as usize);

        let resv = std::iter::once(
            (Reserved, OHCI_MMIO_LEN - used, Flags::PASSTHRU),
        );

        RegMap::create_packed(OHCI_MMIO_LEN, layout.chain(ports).chain(resv))
    };
}

/// Offset of HcRhPortStatus\[1\]
pub const RH_PORT_STATUS_BASE: usize = 0x54;

impl Registers {
    /// Returns the name of the register as given in OHCI 1.0a
    pub const fn reg_name(&self) -> &'static str {
        use Registers::*;
        match self {
            Reserved => "Reserved",
            Revision => "HcRevision",
            Control => "HcControl",
            CommandStatus => "HcCommandStatus",
            InterruptStatus => "HcInterruptStatus",
            InterruptEnable => "HcInterruptEnable",
            InterruptDisable => "HcInterruptDisable",
            Hcca => "HcHCCA",
            PeriodCurrentEd => "HcPeriodCurrentED",
            ControlHeadEd => "HcControlHeadED",
            ControlCurrentEd => "HcControlCurrentED",
            BulkHeadEd => "HcBulkHeadED",
            BulkCurrentEd => "HcBulkCurrentED",
            DoneHead => "HcDoneHead",
            FmInterval => "HcFmInterval",
            FmRemaining => "HcFmRemaining",
            FmNumber => "HcFmNumber",
            PeriodicStart => "HcPeriodicStart",
            LsThreshold => "HcLSThreshold",
            RhDescriptorA => "HcRhDescriptorA",
            RhDescriptorB => "HcRhDescriptorB",
            RhStatus => "HcRhStatus",
            RhPortStatus(_) => "HcRhPortStatus",
        }
    }

    /// Index reported alongside the register name in probes.
    pub fn reg_index(&self) -> i16 {
        match self {
            Registers::RhPortStatus(port) => port.as_raw_id() as i16,
            _ => -1,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::common::{RWOp, ReadOp};

    fn decode(offset: usize) -> Vec<Registers> {
        let mut buf = [0u8; 4];
        let mut ro = ReadOp::from_buf(offset, &mut buf);
        let mut hits = Vec::new();
        OHCI_REGS.process(&mut RWOp::Read(&mut ro), |id, _| hits.push(*id));
        hits
    }

    #[test]
    fn offsets_match_layout() {
        assert_eq!(decode(0x00), vec![Registers::Revision]);
        assert_eq!(decode(0x14), vec![Registers::InterruptDisable]);
        assert_eq!(decode(0x34), vec![Registers::FmInterval]);
        assert_eq!(decode(0x50), vec![Registers::RhStatus]);
        assert_eq!(
            decode(0x58),
            vec![Registers::RhPortStatus(PortId::from_index(1))]
        );
        assert_eq!(decode(0x5c), vec![Registers::Reserved]);
        assert_eq!(decode(0xffc), vec![Registers::Reserved]);
    }

    #[test]
    fn port_registers_carry_index() {
        let port2 = Registers::RhPortStatus(PortId::from_index(1));
        assert_eq!(port2.reg_name(), "HcRhPortStatus");
        assert_eq!(port2.reg_index(), 2);
        assert_eq!(Registers::FmInterval.reg_index(), -1);
    }
}
