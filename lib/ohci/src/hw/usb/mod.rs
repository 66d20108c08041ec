// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! USB host controller emulation.

use std::sync::{Arc, Mutex};

pub mod ohci;
pub mod usbdev;

use ohci::{Error, Ohci};

/// Number of OHCI controllers a machine may carry.
pub const MAX_HOST_CONTROLLERS: usize = 2;

/// The machine's set of host controllers, addressed by fixed index.
#[derive(Default)]
pub struct UsbHostControllers {
    slots: Mutex<[Option<Arc<Ohci>>; MAX_HOST_CONTROLLERS]>,
}

impl UsbHostControllers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `hc` as controller number `index`.
    pub fn insert(&self, index: usize, hc: Arc<Ohci>) -> Result<(), Error> {
        let mut slots = self.slots.lock().unwrap();
        match slots.get_mut(index) {
            None => Err(Error::InvalidController(index)),
            Some(Some(_)) => Err(Error::ControllerPresent(index)),
            Some(slot) => {
                *slot = Some(hc);
                Ok(())
            }
        }
    }

    pub fn get(&self, index: usize) -> Option<Arc<Ohci>> {
        self.slots.lock().unwrap().get(index).cloned().flatten()
    }

    /// Remove controller `index`, returning it if it was present.
    pub fn remove(&self, index: usize) -> Option<Arc<Ohci>> {
        self.slots.lock().unwrap().get_mut(index).and_then(Option::take)
    }

    /// All installed controllers, paired with their index.
    pub fn iter(&self) -> Vec<(usize, Arc<Ohci>)> {
        self.slots
            .lock()
            .unwrap()
            .iter()
            .enumerate()
            .filter_map(|(i, hc)| hc.as_ref().map(|hc| (i, Arc::clone(hc))))
            .collect()
    }
}
