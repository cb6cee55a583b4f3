//! Gadget settings.
//!
use crate::usbdata::UsbSpeed;
use crate::worker::WorkerPolicy;

/// UDC driver used when none is given, the dummy HCD/UDC pair.
pub const DEFAULT_DRIVER: &str = "dummy_udc";
/// UDC device used when none is given.
pub const DEFAULT_DEVICE: &str = "dummy_udc.0";

const DEFAULT_WRITE_RETRIES: u32 = 3;
const DEFAULT_MAX_TRANSFER: usize = 4096;

/// Settings for binding to a UDC and running workers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GadgetConfig {
    /// UDC driver name, e.g. `dummy_udc`.
    pub driver: String,
    /// UDC device name, e.g. `dummy_udc.0`.
    pub device: String,
    /// Requested speed.
    pub speed: UsbSpeed,
    /// Retries of a failed IN transfer before its chunk is dropped.
    pub write_retries: u32,
    /// Largest single data endpoint transfer, in bytes.
    pub max_transfer: usize,
}

impl Default for GadgetConfig {
    fn default() -> Self {
        GadgetConfig {
            driver: DEFAULT_DRIVER.to_string(),
            device: DEFAULT_DEVICE.to_string(),
            speed: UsbSpeed::High,
            write_retries: DEFAULT_WRITE_RETRIES,
            max_transfer: DEFAULT_MAX_TRANSFER,
        }
    }
}

impl GadgetConfig {
    /// Copy and set the UDC names.
    #[must_use]
    pub fn with_udc(mut self, driver: &str, device: &str) -> Self {
        self.driver = driver.to_string();
        self.device = device.to_string();
        self
    }

    /// Copy and set the speed.
    #[must_use]
    pub fn with_speed(mut self, speed: UsbSpeed) -> Self {
        self.speed = speed;
        self
    }

    /// Copy and set the IN transfer retry count.
    #[must_use]
    pub fn with_write_retries(mut self, retries: u32) -> Self {
        self.write_retries = retries;
        self
    }

    /// Copy and set the largest data endpoint transfer.
    #[must_use]
    pub fn with_max_transfer(mut self, bytes: usize) -> Self {
        self.max_transfer = bytes;
        self
    }

    pub(crate) fn worker_policy(&self) -> WorkerPolicy {
        WorkerPolicy {
            write_retries: self.write_retries,
            max_transfer: self.max_transfer,
        }
    }
}

/// Command line options shared by the gadget binaries, flatten
/// into a `clap::Parser`.
///
/// ```
/// # use clap::Parser;
/// # use usbd_raw_gadget::{GadgetArgs, GadgetConfig};
/// #[derive(Parser)]
/// struct Cli {
///     #[command(flatten)]
///     gadget: GadgetArgs,
/// }
///
/// let cli = Cli::parse_from(["usb-printer", "fe980000.usb"]);
/// let cfg = GadgetConfig::from(cli.gadget);
/// assert_eq!(cfg.driver, "fe980000.usb");
/// assert_eq!(cfg.device, "dummy_udc.0");
/// ```
#[cfg(feature = "cli")]
#[derive(clap::Args, Debug, Clone)]
pub struct GadgetArgs {
    /// UDC driver name
    #[arg(default_value = DEFAULT_DRIVER)]
    pub driver: String,

    /// UDC device name
    #[arg(default_value = DEFAULT_DEVICE)]
    pub device: String,

    /// Speed requested from the UDC
    #[arg(long, value_enum, default_value_t = UsbSpeed::High)]
    pub speed: UsbSpeed,

    /// Retries of a failed IN transfer before its data is dropped
    #[arg(long, value_name = "N", default_value_t = DEFAULT_WRITE_RETRIES)]
    pub write_retries: u32,

    /// Largest single data endpoint transfer
    #[arg(long, value_name = "BYTES", default_value_t = DEFAULT_MAX_TRANSFER)]
    pub max_transfer: usize,
}

#[cfg(feature = "cli")]
impl From<GadgetArgs> for GadgetConfig {
    fn from(args: GadgetArgs) -> Self {
        GadgetConfig {
            driver: args.driver,
            device: args.device,
            speed: args.speed,
            write_retries: args.write_retries,
            max_transfer: args.max_transfer,
        }
    }
}
