// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Interrupt status and enable state.
//!
//! See OHCI 1.0a sections 5.3 and 7.1.4 - 7.1.6

use super::bits::Interrupts;

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct InterruptRegs {
    /// HcInterruptStatus
    status: Interrupts,
    /// Enable bits shared by HcInterruptEnable and HcInterruptDisable
    enable: Interrupts,
}

impl InterruptRegs {
    pub fn status(&self) -> Interrupts {
        self.status
    }
    pub fn enabled(&self) -> Interrupts {
        self.enable
    }

    /// Latch `events` into HcInterruptStatus.
    pub fn set(&mut self, events: Interrupts) {
        self.status |= events & Interrupts::EVENTS;
    }

    /// Write-1-to-clear of HcInterruptStatus.
    pub fn clear_status(&mut self, val: u32) {
        self.status.remove(Interrupts::from_bits_truncate(val));
    }

    /// Write to HcInterruptEnable: 1 bits enable, 0 bits are ignored.
    pub fn enable(&mut self, val: u32) {
        self.enable |= Interrupts::from_bits_truncate(val);
    }

    /// Write to HcInterruptDisable: 1 bits disable, 0 bits are ignored.
    pub fn disable(&mut self, val: u32) {
        self.enable.remove(Interrupts::from_bits_truncate(val));
    }

    /// Level of the interrupt line implied by the current state.
    pub fn line_level(&self) -> bool {
        self.enable.contains(Interrupts::MIE)
            && self.status.intersects(self.enable & Interrupts::EVENTS)
    }

    /// Whether any enabled event besides WritebackDoneHead is pending.
    ///
    /// Reported through bit 0 of HccaDoneHead.
    pub fn other_pending(&self) -> bool {
        let others = Interrupts::EVENTS - Interrupts::WDH;
        self.status.intersects(self.enable & others)
    }

    pub(super) fn from_raw(status: u32, enable: u32) -> Self {
        Self {
            status: Interrupts::from_bits_truncate(status) & Interrupts::EVENTS,
            enable: Interrupts::from_bits_truncate(enable),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn master_enable_gates_line() {
        let mut regs = InterruptRegs::default();
        regs.enable(Interrupts::SF.bits());
        regs.set(Interrupts::SF);
        assert!(!regs.line_level());

        regs.enable(Interrupts::MIE.bits());
        assert!(regs.line_level());

        regs.disable(Interrupts::MIE.bits());
        assert!(!regs.line_level());
        assert_eq!(regs.status(), Interrupts::SF);
        assert_eq!(regs.enabled(), Interrupts::SF);
    }

    #[test]
    fn status_write_one_to_clear() {
        let mut regs = InterruptRegs::default();
        regs.set(Interrupts::SF | Interrupts::RHSC | Interrupts::WDH);
        regs.clear_status(Interrupts::SF.bits() | 0x0000_ff00);
        assert_eq!(regs.status(), Interrupts::RHSC | Interrupts::WDH);
    }

    #[test]
    fn mie_never_latched_as_status() {
        let mut regs = InterruptRegs::default();
        regs.set(Interrupts::MIE | Interrupts::UE);
        assert_eq!(regs.status(), Interrupts::UE);
    }

    #[test]
    fn other_pending_ignores_wdh() {
        let mut regs = InterruptRegs::default();
        regs.enable((Interrupts::WDH | Interrupts::SF).bits());
        regs.set(Interrupts::WDH);
        assert!(!regs.other_pending());

        // pending but not enabled
        regs.set(Interrupts::RHSC);
        assert!(!regs.other_pending());

        regs.set(Interrupts::SF);
        assert!(regs.other_pending());
    }
}
