//! Emulated HID boot keyboard.
//!
//! Usage: `usb-keyboard [OPTIONS] [DRIVER] [DEVICE]`, defaults are
//! `dummy_udc` and `dummy_udc.0`. See `usb-keyboard --help`.
//!
//! Once configured, the keyboard types an `x` every `--interval`
//! milliseconds, one second by default.
//!
use std::process;
use std::thread;
use std::time::Duration;

use clap::Parser;
use crossbeam_channel::Sender;
use log::{error, info};

use usbd_raw_gadget::profiles::{key_report, KeyboardProfile};
use usbd_raw_gadget::{
    init_logging, Gadget, GadgetArgs, GadgetConfig, RawGadget, Result, SharedState,
};

const KEY_X: u8 = 0x1b;

/// Emulated HID boot keyboard on a raw-gadget UDC
#[derive(Parser, Debug)]
#[command(name = "usb-keyboard")]
struct Cli {
    #[command(flatten)]
    gadget: GadgetArgs,

    /// Milliseconds between two key presses
    #[arg(long, value_name = "MS", default_value_t = 1000)]
    interval: u64,
}

fn typist(reports: Sender<Vec<u8>>, state: SharedState, interval: Duration) {
    loop {
        thread::sleep(interval);
        if !state.is_configured() || state.is_suspended() {
            continue;
        }
        if reports.send(key_report(0, &[KEY_X])).is_err() || reports.send(key_report(0, &[])).is_err()
        {
            break;
        }
    }
}

fn run(config: GadgetConfig, interval: Duration) -> Result<()> {
    let (report_tx, report_rx) = crossbeam_channel::bounded(16);

    let transport = RawGadget::open()?;
    let mut gadget = Gadget::new(transport, KeyboardProfile::new(report_rx), config);

    let state = gadget.shared_state();
    thread::spawn(move || typist(report_tx, state, interval));

    gadget.start()?;
    info!("keyboard started");
    gadget.run()
}

fn main() {
    let cli = Cli::parse();
    init_logging();

    let interval = Duration::from_millis(cli.interval);
    if let Err(err) = run(cli.gadget.into(), interval) {
        error!("{}", err);
        process::exit(1);
    }
}
