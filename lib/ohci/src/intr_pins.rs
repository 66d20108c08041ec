// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::sync::{Arc, Mutex};

pub trait IntrPin: Send + Sync + 'static {
    fn assert(&self);
    fn deassert(&self);
    fn is_asserted(&self) -> bool;
    fn pulse(&self) {
        if !self.is_asserted() {
            self.assert();
            self.deassert();
        }
    }
    fn set_state(&self, is_asserted: bool) {
        if is_asserted {
            self.assert();
        } else {
            self.deassert();
        }
    }
}

/// A level-triggered interrupt line wired to a numbered input of the
/// platform interrupt controller.
pub struct IrqLine {
    irq: u8,
    state: Mutex<LineState>,
    log: slog::Logger,
}

#[derive(Default)]
struct LineState {
    asserted: bool,
    /// Number of low-to-high transitions observed
    rising_edges: u64,
}

impl IrqLine {
    pub fn new(irq: u8, log: slog::Logger) -> Arc<Self> {
        Arc::new(Self {
            irq,
            state: Mutex::new(LineState::default()),
            log: log.new(slog::o!("irq" => irq)),
        })
    }

    pub fn irq(&self) -> u8 {
        self.irq
    }

    pub fn rising_edges(&self) -> u64 {
        self.state.lock().unwrap().rising_edges
    }
}

impl IntrPin for IrqLine {
    fn assert(&self) {
        let mut state = self.state.lock().unwrap();
        if !state.asserted {
            state.asserted = true;
            state.rising_edges += 1;
            slog::trace!(self.log, "irq asserted");
        }
    }
    fn deassert(&self) {
        let mut state = self.state.lock().unwrap();
        if state.asserted {
            state.asserted = false;
            slog::trace!(self.log, "irq deasserted");
        }
    }
    fn is_asserted(&self) -> bool {
        self.state.lock().unwrap().asserted
    }
}
