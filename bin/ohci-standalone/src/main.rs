// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use slog::{o, Drain};

use ohci::common::GuestAddr;
use ohci::hw::usb::ohci::bits::Interrupts;
use ohci::hw::usb::ohci::hcca;
use ohci::hw::usb::ohci::list::IdleListProcessor;
use ohci::hw::usb::usbdev::NullUsbDevice;
use ohci::intr_pins::IrqLine;
use ohci::lifecycle::Lifecycle;
use ohci::migrate::Payload;
use ohci::mmio::MmioBus;
use ohci::usdt::register_probes;
use ohci::vmm::{FlatMemory, GuestMemory, ThreadTimer};
use ohci::{Ohci, OhciBackends, UsbHostControllers};

mod config;

/// Offsets of the registers touched during bring-up.
mod regs {
    pub const HC_CONTROL: usize = 0x04;
    pub const HC_INTERRUPT_STATUS: usize = 0x0c;
    pub const HC_INTERRUPT_ENABLE: usize = 0x10;
    pub const HC_HCCA: usize = 0x18;
    pub const HC_FM_NUMBER: usize = 0x3c;
    pub const HC_RH_PORT_STATUS: usize = 0x54;

    /// HCFS = Operational, with periodic, control and bulk lists enabled
    pub const CONTROL_RUN: u32 = (2 << 6) | (1 << 2) | (1 << 4) | (1 << 5);
    /// SetPortReset
    pub const PORT_RESET: u32 = 1 << 4;
}

fn build_log() -> (slog::Logger, slog_async::AsyncGuard) {
    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::CompactFormat::new(decorator).build().fuse();
    let (drain, guard) = slog_async::Async::new(drain).build_with_guard();
    (slog::Logger::root(drain.fuse(), o!()), guard)
}

struct Machine {
    bus: MmioBus,
    mem: Arc<FlatMemory>,
    hcs: UsbHostControllers,
    irqs: Vec<Arc<IrqLine>>,
}

fn setup_machine(
    config: &config::Config,
    log: &slog::Logger,
) -> anyhow::Result<Machine> {
    let bus = MmioBus::new(u32::MAX as usize);
    let mem = Arc::new(FlatMemory::new(GuestAddr(0), config.main.memory));
    let hcs = UsbHostControllers::new();
    let mut irqs = Vec::new();

    for (idx, ctrl) in config.controllers.iter().enumerate() {
        let dev_log = log.new(o!("dev" => format!("ohci{idx}")));
        let timer = ThreadTimer::new(&format!("ohci{idx} frame"))
            .context("Failed to spawn frame timer")?;
        let irq = IrqLine::new(ctrl.irq, dev_log.clone());

        let hc = Ohci::create(
            OhciBackends {
                intr_pin: irq.clone(),
                timer,
                mem: mem.clone(),
                lists: Box::new(IdleListProcessor),
            },
            dev_log,
        );
        hc.attach_mmio(&bus, ctrl.mmio_base).with_context(|| {
            format!("Failed to map ohci{idx} at {:#x}", ctrl.mmio_base)
        })?;

        for (port, dev) in ctrl.devices()? {
            hc.attach(port, Arc::new(NullUsbDevice::new(&dev.name, dev.speed)))
                .with_context(|| format!("Failed to attach {}", dev.name))?;
        }

        hcs.insert(idx, hc)?;
        irqs.push(irq);
    }

    Ok(Machine { bus, mem, hcs, irqs })
}

/// Program each controller the way a minimal host driver would: place the
/// HCCA, enable interrupts, start the frame counter and reset any port with
/// a device on it.
fn bring_up(
    machine: &Machine,
    config: &config::Config,
    log: &slog::Logger,
) -> anyhow::Result<()> {
    let bus = &machine.bus;
    for (idx, ctrl) in config.controllers.iter().enumerate() {
        let base = ctrl.mmio_base;
        let hcca_addr = config.main.hcca + 0x1000 * idx as u32;
        let enable = Interrupts::MIE
            | Interrupts::SO
            | Interrupts::WDH
            | Interrupts::UE
            | Interrupts::RHSC;

        bus.handle_write(base + regs::HC_HCCA, 4, u64::from(hcca_addr))?;
        bus.handle_write(
            base + regs::HC_INTERRUPT_ENABLE,
            4,
            u64::from(enable.bits()),
        )?;
        bus.handle_write(
            base + regs::HC_CONTROL,
            4,
            u64::from(regs::CONTROL_RUN),
        )?;

        for (port, _dev) in ctrl.devices()? {
            let offset = regs::HC_RH_PORT_STATUS + 4 * (port as usize - 1);
            bus.handle_write(base + offset, 4, u64::from(regs::PORT_RESET))?;
        }
        slog::info!(log, "controller running";
            "index" => idx,
            "base" => format!("{base:#x}"),
            "hcca" => format!("{hcca_addr:#x}"),
        );
    }
    Ok(())
}

fn report(
    machine: &Machine,
    config: &config::Config,
    log: &slog::Logger,
) -> anyhow::Result<()> {
    let bus = &machine.bus;
    for ((idx, hc), irq) in machine.hcs.iter().into_iter().zip(&machine.irqs) {
        let ctrl = &config.controllers[idx];
        let base = ctrl.mmio_base;
        let hcca_addr = config.main.hcca + 0x1000 * idx as u32;

        let fm_number = bus.handle_read(base + regs::HC_FM_NUMBER, 4)?;
        let status = bus.handle_read(base + regs::HC_INTERRUPT_STATUS, 4)?;
        let mut buf = [0u8; 2];
        let hcca_frame = machine
            .mem
            .read_bytes(
                GuestAddr(u64::from(hcca_addr) + hcca::FRAME_NUMBER as u64),
                &mut buf,
            )
            .then(|| u16::from_le_bytes(buf));

        slog::info!(log, "controller summary";
            "index" => idx,
            "state" => ?hc.functional_state(),
            "frame" => fm_number,
            "hcca_frame" => ?hcca_frame,
            "intr_status" => format!("{status:#x}"),
            "irq" => irq.irq(),
            "irq_asserted" => hc.irq_asserted(),
            "irq_edges" => irq.rising_edges(),
        );
        for (port, _dev) in ctrl.devices()? {
            let offset = regs::HC_RH_PORT_STATUS + 4 * (port as usize - 1);
            let val = bus.handle_read(base + offset, 4)?;
            slog::info!(log, "port status";
                "index" => idx,
                "port" => port,
                "value" => format!("{val:#010x}"),
            );
        }
    }
    Ok(())
}

#[derive(clap::Parser)]
/// Exercise emulated OHCI controllers outside of a VM.
struct Args {
    /// Harness config file. The two Xbox controllers are used if omitted.
    #[clap(value_name = "CONFIG", action)]
    config: Option<String>,

    /// Print the state of each controller as JSON before exiting.
    #[clap(short, long, action)]
    snapshot: bool,
}

fn main() -> anyhow::Result<()> {
    let Args { config, snapshot } = Args::parse();

    // Ensure proper setup of USDT probes
    register_probes().context("Failed to setup USDT probes")?;

    let (log, _log_async_guard) = build_log();

    let config = match config {
        Some(path) => config::parse(&path)?,
        None => config::default_config(),
    };

    let machine = setup_machine(&config, &log)?;
    for (_idx, hc) in machine.hcs.iter() {
        hc.start()?;
    }
    bring_up(&machine, &config, &log)?;

    std::thread::sleep(Duration::from_millis(config.main.run_ms));

    for (_idx, hc) in machine.hcs.iter() {
        hc.poll();
        hc.pause();
    }
    report(&machine, &config, &log)?;

    if snapshot {
        for (idx, hc) in machine.hcs.iter() {
            let payload = Payload::new(hc.export());
            let json = serde_json::to_string_pretty(&payload)
                .context("Failed to serialize controller state")?;
            println!("ohci{idx}: {json}");
        }
    }

    for (idx, hc) in machine.hcs.iter() {
        hc.halt();
        machine.hcs.remove(idx);
    }
    machine.bus.clear();

    Ok(())
}
