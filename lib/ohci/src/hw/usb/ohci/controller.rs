// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Emulated OHCI Host Controller

use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use crate::common::{GuestAddr, RWOp, ReadOp, WriteOp};
use crate::hw::usb::usbdev::UsbDevice;
use crate::intr_pins::IntrPin;
use crate::lifecycle::Lifecycle;
use crate::migrate::MigrateStateError;
use crate::mmio::{self, MmioBus};
use crate::vmm::{FrameTimer, GuestMemory};

use super::bits::{self, values::*, FunctionalState, Interrupts};
use super::frame::FrameTiming;
use super::interrupt::InterruptRegs;
use super::list::{EdList, ListCtx, ListError, ListProcessor, ListRequest};
use super::port::{PortChange, PortId, RootHubPort};
use super::registers::{Registers, OHCI_REGS};
use super::*;

#[usdt::provider(provider = "ohci")]
mod probes {
    fn ohci_reset() {}
    fn ohci_reg_read(reg_name: &str, value: u64, index: i16) {}
    fn ohci_reg_write(reg_name: &str, value: u64, index: i16) {}
    fn ohci_state_change(old: u8, new: u8) {}
    fn ohci_sof(frame: u16) {}
    fn ohci_irq(asserted: u8) {}
}

/// Collaborators a controller is wired to at construction.
pub struct OhciBackends {
    pub intr_pin: Arc<dyn IntrPin>,
    pub timer: Arc<dyn FrameTimer>,
    pub mem: Arc<dyn GuestMemory>,
    pub lists: Box<dyn ListProcessor>,
}

pub struct OhciState {
    /// HcControl
    control: bits::HcControl,

    /// HcCommandStatus
    command_status: bits::HcCommandStatus,

    /// HcInterruptStatus and the merged HcInterruptEnable/Disable
    intr: InterruptRegs,

    /// HcHCCA
    hcca: u32,

    /// HcPeriodCurrentED
    period_current_ed: u32,
    /// HcControlHeadED
    control_head_ed: u32,
    /// HcControlCurrentED
    control_current_ed: u32,
    /// HcBulkHeadED
    bulk_head_ed: u32,
    /// HcBulkCurrentED
    bulk_current_ed: u32,
    /// HcDoneHead
    done_head: u32,

    /// HcFmInterval
    fm_interval: bits::FmInterval,

    /// HcFmRemaining as loaded at the last frame boundary, or as frozen when
    /// the controller last left the Operational state.
    fm_remaining: bits::FmRemaining,

    /// HcFmNumber
    fm_number: u16,

    /// HcPeriodicStart
    periodic_start: u32,
    /// HcLSThreshold
    ls_threshold: u32,

    /// HcRhDescriptorB
    rh_desc_b: bits::RhDescriptorB,

    /// HcRhStatus.DRWE
    rh_remote_wakeup_enable: bool,
    /// HcRhStatus.OCIC
    rh_overcurrent_change: bool,

    ports: [RootHubPort; NUM_PORTS as usize],

    timing: FrameTiming,

    /// Clock reading at the most recent SOF
    sof_time: Duration,

    /// Frame callbacks carrying any other generation are stale.
    timer_generation: u64,

    /// While paused, time which had elapsed in the current frame.
    paused: Option<Duration>,

    lists: Box<dyn ListProcessor>,
}

impl OhciState {
    fn new(lists: Box<dyn ListProcessor>) -> Self {
        let mut state = Self {
            control: bits::HcControl(0),
            command_status: bits::HcCommandStatus(0),
            intr: InterruptRegs::default(),
            hcca: 0,
            period_current_ed: 0,
            control_head_ed: 0,
            control_current_ed: 0,
            bulk_head_ed: 0,
            bulk_current_ed: 0,
            done_head: 0,
            fm_interval: FM_INTERVAL,
            fm_remaining: bits::FmRemaining(0),
            fm_number: 0,
            periodic_start: 0,
            ls_threshold: LS_THRESHOLD,
            rh_desc_b: RH_DESCRIPTOR_B,
            rh_remote_wakeup_enable: false,
            rh_overcurrent_change: false,
            ports: std::array::from_fn(|i| {
                RootHubPort::new(PortId::from_index(i as u8))
            }),
            timing: FrameTiming::default(),
            sof_time: Duration::ZERO,
            timer_generation: 0,
            paused: None,
            lists,
        };
        state.reset_registers();
        state
    }

    /// Restore every register to its reset value.
    ///
    /// Attached devices stay attached.
    fn reset_registers(&mut self) {
        self.control = bits::HcControl(0);
        self.command_status = bits::HcCommandStatus(0);
        self.intr = InterruptRegs::default();
        self.hcca = 0;
        self.period_current_ed = 0;
        self.control_head_ed = 0;
        self.control_current_ed = 0;
        self.bulk_head_ed = 0;
        self.bulk_current_ed = 0;
        self.done_head = 0;
        self.fm_interval = FM_INTERVAL;
        self.fm_remaining = bits::FmRemaining(0);
        self.fm_number = 0;
        self.periodic_start = 0;
        self.ls_threshold = LS_THRESHOLD;
        self.rh_desc_b = RH_DESCRIPTOR_B;
        self.rh_remote_wakeup_enable = false;
        self.rh_overcurrent_change = false;
        self.timing = FrameTiming::from_interval(self.fm_interval);
        self.sof_time = Duration::ZERO;

        self.update_ports(|ports| ports.iter_mut().for_each(|p| p.reset()));
    }

    fn functional_state(&self) -> FunctionalState {
        self.control.functional_state()
    }

    fn is_operational(&self) -> bool {
        self.functional_state() == FunctionalState::Operational
    }

    fn hcca_addr(&self) -> GuestAddr {
        GuestAddr(u64::from(self.hcca))
    }

    /// Time elapsed since the current frame began.
    fn frame_elapsed(&self, now: Duration) -> Duration {
        match self.paused {
            Some(elapsed) => elapsed,
            None => now.saturating_sub(self.sof_time),
        }
    }

    fn fm_remaining_now(&self, now: Duration) -> bits::FmRemaining {
        if self.is_operational() {
            FrameTiming::fm_remaining(
                self.fm_remaining,
                self.frame_elapsed(now),
            )
        } else {
            self.fm_remaining
        }
    }

    /// Perform an operation on the root hub ports, raising RHSC if it latched
    /// any new change indication.
    fn update_ports<R>(
        &mut self,
        f: impl FnOnce(&mut [RootHubPort]) -> R,
    ) -> R {
        let before: [PortChange; NUM_PORTS as usize] =
            std::array::from_fn(|i| self.ports[i].changes());
        let res = f(&mut self.ports);
        let raised = self
            .ports
            .iter()
            .zip(before)
            .any(|(port, old)| !(port.changes() - old).is_empty());
        if raised {
            self.intr.set(Interrupts::RHSC);
        }
        res
    }

    fn poll_ports(&mut self, now: Duration) {
        self.update_ports(|ports| {
            ports.iter_mut().for_each(|p| p.poll_reset(now))
        });
    }

    fn global_overcurrent(&self) -> bool {
        !RH_DESCRIPTOR_A.overcurrent_protection_mode()
            && self.ports.iter().any(|p| p.is_overcurrent())
    }

    fn rh_status(&self) -> bits::RhStatus {
        bits::RhStatus(0)
            .with_overcurrent_indicator(self.global_overcurrent())
            .with_device_remote_wakeup_enable(self.rh_remote_wakeup_enable)
            .with_overcurrent_indicator_change(self.rh_overcurrent_change)
    }

    /// Global power commands (LPS and LPSC) have no effect, as NPS is set.
    ///
    /// See OHCI 1.0a section 7.4.3
    fn rh_status_write(&mut self, wo: bits::RhStatus) {
        if wo.device_remote_wakeup_enable() {
            self.rh_remote_wakeup_enable = true;
        }
        if wo.clear_remote_wakeup_enable() {
            self.rh_remote_wakeup_enable = false;
        }
        if wo.overcurrent_indicator_change() {
            self.rh_overcurrent_change = false;
        }
    }

    /// Where servicing of `list` begins this frame, if it is to be serviced
    /// at all.
    ///
    /// The flag is true when the list restarts from its head because the
    /// guest set CLF or BLF.
    fn list_start(
        &mut self,
        list: EdList,
        mem: &dyn GuestMemory,
    ) -> Result<Option<(u32, bool)>, ListError> {
        let (enabled, current, head, filled) = match list {
            EdList::Periodic => {
                if !self.control.periodic_list_enable() {
                    return Ok(None);
                }
                let slot = self.fm_number % hcca::INTERRUPT_TABLE_LEN;
                let entry = self.hcca_addr()
                    + (hcca::INTERRUPT_TABLE + slot as usize * 4);
                let head = mem
                    .read_u32(entry)
                    .ok_or(ListError::Unreadable(entry.0 as u32))?;
                let head = head & ED_POINTER_MASK;
                return Ok((head != 0).then_some((head, false)));
            }
            EdList::Control => (
                self.control.control_list_enable(),
                self.control_current_ed,
                self.control_head_ed,
                self.command_status.control_list_filled(),
            ),
            EdList::Bulk => (
                self.control.bulk_list_enable(),
                self.bulk_current_ed,
                self.bulk_head_ed,
                self.command_status.bulk_list_filled(),
            ),
        };

        if !enabled {
            Ok(None)
        } else if current != 0 {
            Ok(Some((current, false)))
        } else if !filled {
            Ok(None)
        } else if head == 0 {
            self.consume_list_filled(list);
            Ok(None)
        } else {
            Ok(Some((head, true)))
        }
    }

    fn consume_list_filled(&mut self, list: EdList) {
        match list {
            EdList::Periodic => {}
            EdList::Control => {
                self.command_status.set_control_list_filled(false)
            }
            EdList::Bulk => self.command_status.set_bulk_list_filled(false),
        }
    }

    fn set_current_ed(&mut self, list: EdList, ed: u32) {
        let ed = ed & ED_POINTER_MASK;
        match list {
            EdList::Periodic => self.period_current_ed = ed,
            EdList::Control => self.control_current_ed = ed,
            EdList::Bulk => self.bulk_current_ed = ed,
        }
    }

    fn scheduling_overrun(&mut self) {
        let soc = self.command_status.scheduling_overrun_count();
        self.command_status
            .set_scheduling_overrun_count(soc.wrapping_add(1) & 0b11);
        self.intr.set(Interrupts::SO);
    }
}

pub struct Ohci {
    state: Mutex<OhciState>,
    intr_pin: Arc<dyn IntrPin>,
    timer: Arc<dyn FrameTimer>,
    mem: Arc<dyn GuestMemory>,
    this: Weak<Self>,
    log: slog::Logger,
}

impl Ohci {
    /// Create a new OHCI device, in the Reset state.
    pub fn create(backends: OhciBackends, log: slog::Logger) -> Arc<Self> {
        let OhciBackends { intr_pin, timer, mem, lists } = backends;
        let ohci = Arc::new_cyclic(|this| Self {
            state: Mutex::new(OhciState::new(lists)),
            intr_pin,
            timer,
            mem,
            this: this.clone(),
            log,
        });
        ohci.intr_pin.deassert();
        ohci
    }

    /// Claim the controller's register window on `bus` at `base`.
    pub fn attach_mmio(
        self: &Arc<Self>,
        bus: &MmioBus,
        base: usize,
    ) -> mmio::Result<()> {
        let this = Arc::downgrade(self);
        bus.register(
            base,
            OHCI_MMIO_LEN,
            Arc::new(move |_start: usize, rwo: RWOp<'_, '_>| {
                if let Some(ohci) = this.upgrade() {
                    ohci.mmio_rw(rwo);
                }
            }),
        )
    }

    /// Read the 32-bit register at `offset` within the register window.
    pub fn reg_read(&self, offset: usize) -> u32 {
        let mut buf = [0u8; 4];
        if Self::is_aligned_reg(offset) {
            let mut ro = ReadOp::from_buf(offset, &mut buf);
            self.mmio_rw(RWOp::Read(&mut ro));
        } else {
            slog::trace!(self.log, "ignoring misaligned read";
                "offset" => offset);
        }
        u32::from_le_bytes(buf)
    }

    /// Write the 32-bit register at `offset` within the register window.
    pub fn reg_write(&self, offset: usize, val: u32) {
        if Self::is_aligned_reg(offset) {
            let buf = val.to_le_bytes();
            let mut wo = WriteOp::from_buf(offset, &buf);
            self.mmio_rw(RWOp::Write(&mut wo));
        } else {
            slog::trace!(self.log, "ignoring misaligned write";
                "offset" => offset, "value" => val);
        }
    }

    fn is_aligned_reg(offset: usize) -> bool {
        offset % 4 == 0 && offset + 4 <= OHCI_MMIO_LEN
    }

    /// Handle an access of any width within the register window.
    pub fn mmio_rw(&self, mut rwo: RWOp) {
        if rwo.is_empty() || rwo.offset() + rwo.len() > OHCI_MMIO_LEN {
            slog::trace!(self.log, "ignoring out-of-range access";
                "offset" => rwo.offset(), "len" => rwo.len());
            if let RWOp::Read(ro) = rwo {
                ro.fill(0);
            }
            return;
        }
        OHCI_REGS.process(&mut rwo, |id: &Registers, rwo: RWOp<'_, '_>| {
            match rwo {
                RWOp::Read(ro) => self.read_register(*id, ro),
                RWOp::Write(wo) => self.write_register(*id, wo),
            }
        })
    }

    /// Handle read of memory-mapped host controller register
    fn read_register(&self, id: Registers, ro: &mut ReadOp) {
        use RegRWOpValue::*;
        use Registers::*;

        if id == Reserved {
            ro.fill(0);
            return;
        }

        let mut state = self.state.lock().unwrap();
        let now = self.timer.now();
        let value = match id {
            Reserved => NoOp,

            Revision => U32(OHCI_REVISION),
            Control => U32(state.control.0),
            CommandStatus => U32(state.command_status.0),
            InterruptStatus => U32(state.intr.status().bits()),
            // Both registers read back the same enable bits
            InterruptEnable | InterruptDisable => {
                U32(state.intr.enabled().bits())
            }

            Hcca => U32(state.hcca),
            PeriodCurrentEd => U32(state.period_current_ed),
            ControlHeadEd => U32(state.control_head_ed),
            ControlCurrentEd => U32(state.control_current_ed),
            BulkHeadEd => U32(state.bulk_head_ed),
            BulkCurrentEd => U32(state.bulk_current_ed),
            DoneHead => U32(state.done_head),

            FmInterval => U32(state.fm_interval.0),
            FmRemaining => U32(state.fm_remaining_now(now).0),
            FmNumber => U32(u32::from(state.fm_number)),
            PeriodicStart => U32(state.periodic_start),
            LsThreshold => U32(state.ls_threshold),

            RhDescriptorA => U32(RH_DESCRIPTOR_A.0),
            RhDescriptorB => U32(state.rh_desc_b.0),
            RhStatus => U32(state.rh_status().0),
            RhPortStatus(port) => {
                // A reset which has run its course completes before the
                // guest can observe it still in progress.
                state.poll_ports(now);
                self.update_irq(&state);
                U32(state.ports[port.as_index()].status().0)
            }
        };

        if let U32(x) = value {
            ro.write_u32(x);
        }

        let reg_name = id.reg_name();
        let reg_value = value.as_u64();
        let reg_index = id.reg_index();
        probes::ohci_reg_read!(|| (reg_name, reg_value, reg_index));
    }

    /// Handle write to memory-mapped host controller register
    fn write_register(&self, id: Registers, wo: &mut WriteOp) {
        use RegRWOpValue::*;
        use Registers::*;

        // Ignore writes to reserved space
        if id == Reserved {
            return;
        }

        let val = wo.read_u32();
        let mut state = self.state.lock().unwrap();
        let now = self.timer.now();
        let written_value = match id {
            Reserved => NoOp,

            // Read-only registers
            Revision | PeriodCurrentEd | DoneHead | FmRemaining | FmNumber
            | RhDescriptorA => {
                slog::trace!(self.log, "ignoring write to read-only register";
                    "reg" => id.reg_name(), "value" => val);
                NoOp
            }

            Control => {
                let control = bits::HcControl(val & HC_CONTROL_MASK);
                self.set_control(&mut state, control, now);
                U32(control.0)
            }
            CommandStatus => {
                let cmd = bits::HcCommandStatus(
                    val & bits::HcCommandStatus::COMMAND_MASK,
                );
                if cmd.host_controller_reset() {
                    slog::info!(self.log, "host controller reset requested");
                    self.reset_locked(&mut state);
                } else {
                    state.command_status.0 |= cmd.0;
                    if cmd.ownership_change_request() {
                        state.intr.set(Interrupts::OC);
                    }
                }
                U32(cmd.0)
            }
            InterruptStatus => {
                state.intr.clear_status(val);
                U32(val)
            }
            InterruptEnable => {
                state.intr.enable(val);
                U32(val)
            }
            InterruptDisable => {
                state.intr.disable(val);
                U32(val)
            }

            Hcca => {
                state.hcca = val & HC_HCCA_MASK;
                U32(state.hcca)
            }
            ControlHeadEd => {
                state.control_head_ed = val & ED_POINTER_MASK;
                U32(state.control_head_ed)
            }
            ControlCurrentEd => {
                state.control_current_ed = val & ED_POINTER_MASK;
                U32(state.control_current_ed)
            }
            BulkHeadEd => {
                state.bulk_head_ed = val & ED_POINTER_MASK;
                U32(state.bulk_head_ed)
            }
            BulkCurrentEd => {
                state.bulk_current_ed = val & ED_POINTER_MASK;
                U32(state.bulk_current_ed)
            }

            FmInterval => {
                // Only the length of frames yet to start changes: the
                // current countdown continues from the FR loaded at its SOF,
                // and FR/FRT are reloaded from FI/FIT at the next boundary.
                state.fm_interval = bits::FmInterval(val & FM_INTERVAL_MASK);
                state.timing = FrameTiming::from_interval(state.fm_interval);
                U32(state.fm_interval.0)
            }
            PeriodicStart => {
                state.periodic_start = val & PERIODIC_START_MASK;
                U32(state.periodic_start)
            }
            LsThreshold => {
                state.ls_threshold = val & LS_THRESHOLD_MASK;
                U32(state.ls_threshold)
            }

            RhDescriptorB => {
                state.rh_desc_b =
                    bits::RhDescriptorB(val & RH_DESCRIPTOR_B_MASK);
                U32(state.rh_desc_b.0)
            }
            RhStatus => {
                state.rh_status_write(bits::RhStatus(val));
                U32(val)
            }
            RhPortStatus(port) => {
                let log = &self.log;
                state.update_ports(|ports| {
                    let wo = bits::PortStatus(val);
                    ports[port.as_index()].write(wo, now, log)
                });
                U32(val)
            }
        };

        self.update_irq(&state);

        let reg_name = id.reg_name();
        let reg_value = written_value.as_u64();
        let reg_index = id.reg_index();
        probes::ohci_reg_write!(|| (reg_name, reg_value, reg_index));
    }

    /// Apply a guest write of HcControl, carrying out any change of
    /// HostControllerFunctionalState.
    ///
    /// See OHCI 1.0a section 5.1.2
    fn set_control(
        &self,
        state: &mut OhciState,
        control: bits::HcControl,
        now: Duration,
    ) {
        let old = state.functional_state();
        let new = control.functional_state();

        if old == FunctionalState::Operational && new != old {
            // The frame counter stops where it is
            state.fm_remaining = state.fm_remaining_now(now);
            self.disarm_frame_timer(state);
        }
        state.control = control;
        if old == new {
            return;
        }

        slog::debug!(self.log, "functional state change";
            "from" => ?old, "to" => ?new);
        probes::ohci_state_change!(|| (u8::from(old), u8::from(new)));

        match new {
            FunctionalState::Reset => self.reset_locked(state),
            FunctionalState::Operational => {
                state.sof_time = now;
                state.fm_remaining = FrameTiming::reload(state.fm_interval);
                match state.paused {
                    Some(_) => state.paused = Some(Duration::ZERO),
                    None => {
                        let delay = state.timing.frame_time();
                        self.arm_frame_timer(state, delay);
                    }
                }
            }
            FunctionalState::Suspend => {
                state.intr.clear_status(Interrupts::SF.bits());
            }
            FunctionalState::Resume => {}
        }
    }

    /// Return the controller and its root hub to their reset state.
    fn reset_locked(&self, state: &mut OhciState) {
        self.disarm_frame_timer(state);
        state.reset_registers();
        if state.paused.is_some() {
            state.paused = Some(Duration::ZERO);
        }
        slog::debug!(self.log, "controller reset");
        probes::ohci_reset!(|| ());
    }

    fn arm_frame_timer(&self, state: &mut OhciState, delay: Duration) {
        state.timer_generation = state.timer_generation.wrapping_add(1);
        let generation = state.timer_generation;
        let this = self.this.clone();
        self.timer.arm(
            delay,
            Box::new(move || {
                if let Some(ohci) = this.upgrade() {
                    ohci.frame_boundary(generation);
                }
            }),
        );
    }

    fn disarm_frame_timer(&self, state: &mut OhciState) {
        state.timer_generation = state.timer_generation.wrapping_add(1);
        self.timer.disarm();
    }

    /// Work performed at the end of each frame.
    ///
    /// See OHCI 1.0a section 6.3
    fn frame_boundary(&self, generation: u64) {
        let mut state = self.state.lock().unwrap();
        if state.timer_generation != generation
            || state.paused.is_some()
            || !state.is_operational()
        {
            return;
        }

        let now = self.timer.now();
        state.sof_time = now;
        self.start_of_frame(&mut state);
        self.service_lists(&mut state);
        self.write_done_head(&mut state);
        state.poll_ports(now);

        let delay = state.timing.frame_time();
        self.arm_frame_timer(&mut state, delay);
        self.update_irq(&state);
    }

    fn start_of_frame(&self, state: &mut OhciState) {
        let prev = state.fm_number;
        let frame = prev.wrapping_add(1);
        state.fm_number = frame;

        // HccaPad1 is always written as zero
        let addr = state.hcca_addr() + hcca::FRAME_NUMBER;
        if !self.mem.write_u32(addr, u32::from(frame)) {
            slog::debug!(self.log, "failed to write HccaFrameNumber";
                "addr" => addr.0);
        }

        let mut events = Interrupts::SF;
        if (prev ^ frame) & 0x8000 != 0 {
            events |= Interrupts::FNO;
        }
        state.intr.set(events);
        state.fm_remaining = FrameTiming::reload(state.fm_interval);

        probes::ohci_sof!(|| (frame));
    }

    /// Drive the list processor through each enabled list.
    ///
    /// See OHCI 1.0a section 6.4
    fn service_lists(&self, state: &mut OhciState) {
        let devices: Vec<Arc<dyn UsbDevice>> = state
            .ports
            .iter()
            .filter(|p| p.is_enabled())
            .filter_map(|p| p.device().cloned())
            .collect();
        let ctx = ListCtx {
            mem: self.mem.as_ref(),
            devices: &devices,
            log: &self.log,
        };

        let mut overrun = false;
        for list in [EdList::Periodic, EdList::Control, EdList::Bulk] {
            let res = state
                .list_start(list, self.mem.as_ref())
                .and_then(|start| match start {
                    None => Ok(None),
                    Some((current_ed, restart)) => {
                        let req = ListRequest {
                            list,
                            hcca: state.hcca_addr(),
                            frame_number: state.fm_number,
                            current_ed,
                            done_head: state.done_head,
                            isochronous: state.control.isochronous_enable(),
                            control_bulk_ratio: state
                                .control
                                .control_bulk_ratio(),
                            budget: state.fm_remaining.frame_remaining(),
                        };
                        let progress = state.lists.service(&req, &ctx)?;
                        Ok(Some((progress, restart)))
                    }
                });

            match res {
                Ok(None) => {}
                Ok(Some((progress, restart))) => {
                    if restart {
                        state.consume_list_filled(list);
                    }
                    state.set_current_ed(list, progress.current_ed);
                    state.done_head = progress.done_head & ED_POINTER_MASK;
                    overrun |= !progress.finished;
                }
                Err(e) => {
                    // Pointers stay put so the list is retried next frame
                    slog::warn!(self.log, "unrecoverable error servicing list";
                        "list" => list.name(),
                        "frame" => state.fm_number,
                        "error" => %e,
                    );
                    state.intr.set(Interrupts::UE);
                    break;
                }
            }
        }

        if overrun {
            state.scheduling_overrun();
        }
    }

    /// Hand the done queue back to the guest if it has consumed the last one.
    ///
    /// See OHCI 1.0a section 6.5.9
    fn write_done_head(&self, state: &mut OhciState) {
        if state.done_head == 0
            || state.intr.status().contains(Interrupts::WDH)
        {
            return;
        }
        let val = state.done_head | u32::from(state.intr.other_pending());
        let addr = state.hcca_addr() + hcca::DONE_HEAD;
        if !self.mem.write_u32(addr, val) {
            slog::debug!(self.log, "failed to write HccaDoneHead";
                "addr" => addr.0);
        }
        state.done_head = 0;
        state.intr.set(Interrupts::WDH);
    }

    fn update_irq(&self, state: &OhciState) {
        let level = state.intr.line_level();
        if level != self.intr_pin.is_asserted() {
            probes::ohci_irq!(|| (level as u8));
        }
        self.intr_pin.set_state(level);
    }

    fn with_port<R>(
        &self,
        raw_port: u8,
        f: impl FnOnce(&mut OhciState, PortId) -> R,
    ) -> Result<R, Error> {
        let port = PortId::try_from(raw_port)?;
        let mut state = self.state.lock().unwrap();
        let res = f(&mut state, port);
        self.update_irq(&state);
        Ok(res)
    }

    /// Connect `dev` to root hub port `raw_port` (1-based).
    pub fn attach(
        &self,
        raw_port: u8,
        dev: Arc<dyn UsbDevice>,
    ) -> Result<(), Error> {
        let name = dev.name().to_string();
        self.with_port(raw_port, |state, port| {
            state.update_ports(|ports| ports[port.as_index()].attach(dev))
        })??;
        slog::info!(self.log, "device attached";
            "port" => raw_port, "device" => name);
        Ok(())
    }

    /// Disconnect the device on root hub port `raw_port` (1-based).
    pub fn detach(&self, raw_port: u8) -> Result<Arc<dyn UsbDevice>, Error> {
        let dev = self.with_port(raw_port, |state, port| {
            state.update_ports(|ports| ports[port.as_index()].detach())
        })??;
        slog::info!(self.log, "device detached";
            "port" => raw_port, "device" => dev.name());
        Ok(dev)
    }

    /// Report an over-current condition starting or ending on a port.
    pub fn set_overcurrent(
        &self,
        raw_port: u8,
        active: bool,
    ) -> Result<(), Error> {
        self.with_port(raw_port, |state, port| {
            let global_before = state.global_overcurrent();
            state.update_ports(|ports| {
                ports[port.as_index()].set_overcurrent(active)
            });
            if state.global_overcurrent() != global_before {
                state.rh_overcurrent_change = true;
                state.intr.set(Interrupts::RHSC);
            }
        })?;
        slog::warn!(self.log, "port over-current";
            "port" => raw_port, "active" => active);
        Ok(())
    }

    /// Signal resume from the device on a suspended port.
    ///
    /// See OHCI 1.0a section 6.5.6
    pub fn remote_wakeup(&self, raw_port: u8) -> Result<(), Error> {
        self.with_port(raw_port, |state, port| {
            let resumed = state
                .update_ports(|ports| ports[port.as_index()].remote_wakeup());
            if resumed
                && state.functional_state() == FunctionalState::Suspend
                && state.control.remote_wakeup_enable()
            {
                state.intr.set(Interrupts::RD);
            }
        })
    }

    /// Complete any port resets which have run their course.
    pub fn poll(&self) {
        let mut state = self.state.lock().unwrap();
        state.poll_ports(self.timer.now());
        self.update_irq(&state);
    }

    pub fn functional_state(&self) -> FunctionalState {
        self.state.lock().unwrap().functional_state()
    }

    pub fn irq_asserted(&self) -> bool {
        self.intr_pin.is_asserted()
    }

    pub fn export(&self) -> migrate::OhciStateV1 {
        let state = self.state.lock().unwrap();
        let now = self.timer.now();
        let frame_elapsed = if state.is_operational() {
            state.frame_elapsed(now)
        } else {
            Duration::ZERO
        };
        migrate::OhciStateV1 {
            control: state.control.0,
            command_status: state.command_status.0,
            interrupt_status: state.intr.status().bits(),
            interrupt_enable: state.intr.enabled().bits(),
            hcca: state.hcca,
            period_current_ed: state.period_current_ed,
            control_head_ed: state.control_head_ed,
            control_current_ed: state.control_current_ed,
            bulk_head_ed: state.bulk_head_ed,
            bulk_current_ed: state.bulk_current_ed,
            done_head: state.done_head,
            fm_interval: state.fm_interval.0,
            fm_remaining: state.fm_remaining_now(now).0,
            fm_number: state.fm_number,
            periodic_start: state.periodic_start,
            ls_threshold: state.ls_threshold,
            rh_descriptor_b: state.rh_desc_b.0,
            rh_remote_wakeup_enable: state.rh_remote_wakeup_enable,
            rh_overcurrent_change: state.rh_overcurrent_change,
            frame_elapsed_ns: frame_elapsed.as_nanos() as u64,
            ports: state.ports.iter().map(|p| p.export(now)).collect(),
        }
    }

    pub fn import(
        &self,
        data: &migrate::OhciStateV1,
    ) -> Result<(), MigrateStateError> {
        if data.ports.len() != NUM_PORTS as usize {
            return Err(MigrateStateError::ImportFailed(format!(
                "OHCI: expected {} ports, got {}",
                NUM_PORTS,
                data.ports.len()
            )));
        }

        let mut state = self.state.lock().unwrap();
        let now = self.timer.now();
        self.disarm_frame_timer(&mut state);

        state.control = bits::HcControl(data.control & HC_CONTROL_MASK);
        state.command_status = bits::HcCommandStatus(data.command_status);
        state.intr = InterruptRegs::from_raw(
            data.interrupt_status,
            data.interrupt_enable,
        );
        state.hcca = data.hcca & HC_HCCA_MASK;
        state.period_current_ed = data.period_current_ed & ED_POINTER_MASK;
        state.control_head_ed = data.control_head_ed & ED_POINTER_MASK;
        state.control_current_ed = data.control_current_ed & ED_POINTER_MASK;
        state.bulk_head_ed = data.bulk_head_ed & ED_POINTER_MASK;
        state.bulk_current_ed = data.bulk_current_ed & ED_POINTER_MASK;
        state.done_head = data.done_head & ED_POINTER_MASK;
        state.fm_interval =
            bits::FmInterval(data.fm_interval & FM_INTERVAL_MASK);
        state.fm_remaining = bits::FmRemaining(data.fm_remaining);
        state.fm_number = data.fm_number;
        state.periodic_start = data.periodic_start & PERIODIC_START_MASK;
        state.ls_threshold = data.ls_threshold & LS_THRESHOLD_MASK;
        state.rh_desc_b =
            bits::RhDescriptorB(data.rh_descriptor_b & RH_DESCRIPTOR_B_MASK);
        state.rh_remote_wakeup_enable = data.rh_remote_wakeup_enable;
        state.rh_overcurrent_change = data.rh_overcurrent_change;
        state.timing = FrameTiming::from_interval(state.fm_interval);
        for (port, saved) in state.ports.iter_mut().zip(data.ports.iter()) {
            port.import(saved, now);
        }

        if state.is_operational() {
            let elapsed = Duration::from_nanos(data.frame_elapsed_ns)
                .min(state.timing.frame_time());
            state.sof_time = now.saturating_sub(elapsed);
            // Re-derive the toggle the frame began with
            let toggle = state.fm_remaining.frame_remaining_toggle();
            state.fm_remaining = FrameTiming::reload(state.fm_interval)
                .with_frame_remaining_toggle(toggle);
            match state.paused {
                Some(_) => state.paused = Some(elapsed),
                None => {
                    let delay = state.timing.frame_time() - elapsed;
                    self.arm_frame_timer(&mut state, delay);
                }
            }
        }

        self.update_irq(&state);
        Ok(())
    }
}

impl Lifecycle for Ohci {
    fn type_name(&self) -> &'static str {
        "ohci"
    }
    fn pause(&self) {
        let mut state = self.state.lock().unwrap();
        if state.paused.is_none() {
            let elapsed = if state.is_operational() {
                state.frame_elapsed(self.timer.now())
            } else {
                Duration::ZERO
            };
            state.paused = Some(elapsed);
            self.disarm_frame_timer(&mut state);
        }
    }
    fn resume(&self) {
        let mut state = self.state.lock().unwrap();
        if let Some(elapsed) = state.paused.take() {
            if state.is_operational() {
                let elapsed = elapsed.min(state.timing.frame_time());
                state.sof_time = self.timer.now().saturating_sub(elapsed);
                let delay = state.timing.frame_time() - elapsed;
                self.arm_frame_timer(&mut state, delay);
            }
        }
    }
    fn reset(&self) {
        let mut state = self.state.lock().unwrap();
        self.reset_locked(&mut state);
        self.update_irq(&state);
    }
    fn halt(&self) {
        let mut state = self.state.lock().unwrap();
        self.disarm_frame_timer(&mut state);
    }
}

impl Drop for Ohci {
    fn drop(&mut self) {
        self.timer.disarm();
    }
}

pub mod migrate {
    use serde::{Deserialize, Serialize};

    use crate::hw::usb::ohci::port::migrate::RootHubPortV1;
    use crate::migrate::{Schema, SchemaId};

    #[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
    pub struct OhciStateV1 {
        pub control: u32,
        pub command_status: u32,
        pub interrupt_status: u32,
        pub interrupt_enable: u32,
        pub hcca: u32,
        pub period_current_ed: u32,
        pub control_head_ed: u32,
        pub control_current_ed: u32,
        pub bulk_head_ed: u32,
        pub bulk_current_ed: u32,
        pub done_head: u32,
        pub fm_interval: u32,
        pub fm_remaining: u32,
        pub fm_number: u16,
        pub periodic_start: u32,
        pub ls_threshold: u32,
        pub rh_descriptor_b: u32,
        pub rh_remote_wakeup_enable: bool,
        pub rh_overcurrent_change: bool,
        /// Time into the current frame, while Operational
        pub frame_elapsed_ns: u64,
        pub ports: Vec<RootHubPortV1>,
    }

    impl Schema<'_> for OhciStateV1 {
        fn id() -> SchemaId {
            ("ohci", 1)
        }
    }
}
