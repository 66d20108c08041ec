// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::collections::BTreeMap;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use ohci::hw::usb::usbdev::UsbSpeed;

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Config {
    pub main: Main,

    #[serde(default = "default_controllers", rename = "controller")]
    pub controllers: Vec<Controller>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Main {
    /// Size (in bytes) of the flat guest memory backing DMA, based at 0
    #[serde(default = "default_memory")]
    pub memory: usize,

    /// Guest address at which the HCCA of each controller is placed.
    /// Successive controllers are spaced one page apart.
    #[serde(default = "default_hcca")]
    pub hcca: u32,

    /// How long to let the controllers run, in milliseconds
    #[serde(default = "default_run_ms")]
    pub run_ms: u64,
}

impl Default for Main {
    fn default() -> Self {
        Self {
            memory: default_memory(),
            hcca: default_hcca(),
            run_ms: default_run_ms(),
        }
    }
}

/// A host controller instance and what is plugged into its root hub.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Controller {
    /// Base of the controller's register window
    pub mmio_base: usize,
    pub irq: u8,

    /// Devices keyed by (1-based) root hub port number
    #[serde(default, rename = "port")]
    pub ports: BTreeMap<String, Device>,
}

/// A device attached to a root hub port.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Device {
    pub name: String,

    #[serde(default)]
    pub speed: UsbSpeed,
}

impl Controller {
    /// Attached devices with their port numbers parsed.
    pub fn devices(&self) -> anyhow::Result<Vec<(u8, &Device)>> {
        self.ports
            .iter()
            .map(|(port, dev)| {
                let num = port
                    .parse::<u8>()
                    .with_context(|| format!("bad port number {port:?}"))?;
                Ok((num, dev))
            })
            .collect()
    }
}

fn default_memory() -> usize {
    16 * 1024 * 1024
}
fn default_hcca() -> u32 {
    0x10_0000
}
fn default_run_ms() -> u64 {
    100
}

/// The pair of controllers found on the original Xbox.
fn default_controllers() -> Vec<Controller> {
    vec![
        Controller { mmio_base: 0xfed0_0000, irq: 1, ports: BTreeMap::new() },
        Controller { mmio_base: 0xfed0_8000, irq: 9, ports: BTreeMap::new() },
    ]
}

pub fn parse(path: &str) -> anyhow::Result<Config> {
    let file_data =
        std::fs::read(path).context("Failed to read given config.toml")?;
    Ok(toml::from_str::<Config>(
        std::str::from_utf8(&file_data)
            .context("config should be valid utf-8")?,
    )?)
}

pub fn default_config() -> Config {
    Config { main: Main::default(), controllers: default_controllers() }
}
