//! Emulated USB printer.
//!
//! Usage: `usb-printer [OPTIONS] [DRIVER] [DEVICE]`, defaults are
//! `dummy_udc` and `dummy_udc.0`. See `usb-printer --help`.
//!
//! Print data from the host is written to stdout.
//!
use std::io::Write;
use std::process;
use std::thread;

use clap::Parser;
use log::{error, info};

use usbd_raw_gadget::profiles::PrinterProfile;
use usbd_raw_gadget::{init_logging, Gadget, GadgetArgs, GadgetConfig, RawGadget, Result};

/// Emulated USB printer on a raw-gadget UDC, print data goes to stdout
#[derive(Parser, Debug)]
#[command(name = "usb-printer")]
struct Cli {
    #[command(flatten)]
    gadget: GadgetArgs,

    /// IEEE 1284 device ID reported to the host
    #[arg(long, value_name = "ID")]
    device_id: Option<String>,
}

fn run(config: GadgetConfig, device_id: Option<String>) -> Result<()> {
    let (print_tx, print_rx) = crossbeam_channel::unbounded::<Vec<u8>>();
    // nothing is reported on the status endpoint
    let (_status_tx, status_rx) = crossbeam_channel::unbounded();

    thread::spawn(move || {
        let mut out = std::io::stdout();
        for data in print_rx {
            if let Err(err) = out.write_all(&data).and_then(|_| out.flush()) {
                error!("writing print data: {}", err);
                break;
            }
        }
    });

    let transport = RawGadget::open()?;
    let mut profile = PrinterProfile::new(print_tx, status_rx);
    if let Some(id) = device_id {
        profile = profile.with_device_id(&id);
    }
    let mut gadget = Gadget::new(transport, profile, config);
    gadget.start()?;
    info!("printer started");
    gadget.run()
}

fn main() {
    let cli = Cli::parse();
    init_logging();

    if let Err(err) = run(cli.gadget.into(), cli.device_id) {
        error!("{}", err);
        process::exit(1);
    }
}
