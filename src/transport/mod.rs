//! Transport Binding: the narrow operation set of the kernel
//! raw-gadget channel.
//!
//! Most operations are fatal on failure and return
//! [`GadgetError::Channel`](crate::GadgetError::Channel). Data
//! endpoint transfers are the exception, they report a
//! [`TransferError`] the caller decides about.
//!
use core::fmt;
use std::sync::Once;

use bitflags::bitflags;
use log::{debug, warn};
use nix::errno::Errno;
use nix::libc;
use nix::sys::pthread::{pthread_kill, Pthread};
use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};

use crate::event::RawEvent;
use crate::usbdata::{EndpointDescriptor, TransferType, UsbSpeed};
use crate::Result;

mod raw;
pub use raw::RawGadget;

/// Path of the raw-gadget device node.
pub const RAW_GADGET_PATH: &str = "/dev/raw-gadget";

/// Endpoint handle returned by `ep_enable`.
///
/// Becomes invalid once the endpoint is disabled, or the device
/// is reset or disconnected.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Clone, Copy)]
pub struct EndpointHandle(pub u32);

impl fmt::Display for EndpointHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ep#{}", self.0)
    }
}

/// Failure of a data endpoint transfer. Never process-fatal.
#[derive(Debug, PartialEq, Eq, Clone, Copy, thiserror::Error)]
pub enum TransferError {
    /// The endpoint was disabled, reset or disconnected while
    /// the transfer was pending.
    #[error("endpoint invalidated ({0})")]
    Invalidated(Errno),
    /// Transient failure, e.g. the host is not reading.
    #[error("transfer failed ({0})")]
    Failed(Errno),
}

impl From<Errno> for TransferError {
    fn from(errno: Errno) -> Self {
        match errno {
            Errno::ESHUTDOWN | Errno::ECONNRESET | Errno::ENODEV => {
                TransferError::Invalidated(errno)
            }
            _ => TransferError::Failed(errno),
        }
    }
}

bitflags! {
    /// Endpoint capabilities, `struct usb_raw_ep_caps`.
    #[derive(Debug, PartialEq, Eq, Clone, Copy)]
    pub struct EndpointCaps: u32 {
        /// Control transfers.
        const CONTROL = 1 << 0;
        /// Isochronous transfers.
        const ISO = 1 << 1;
        /// Bulk transfers.
        const BULK = 1 << 2;
        /// Interrupt transfers.
        const INTERRUPT = 1 << 3;
        /// IN direction.
        const DIR_IN = 1 << 4;
        /// OUT direction.
        const DIR_OUT = 1 << 5;
    }
}

/// One row of the UDC endpoint capability table.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct EndpointInfo {
    /// UDC endpoint name, e.g. `ep1in-bulk`.
    pub name: String,
    /// Fixed endpoint number, `None` when any number fits.
    pub address: Option<u8>,
    /// Supported transfer types and directions.
    pub caps: EndpointCaps,
    /// Largest wMaxPacketSize.
    pub max_packet_limit: u16,
    /// Bulk streams, superspeed only.
    pub max_streams: u16,
}

/// `USB_RAW_EP_ADDR_ANY`
pub const EP_ADDR_ANY: u32 = 0xff;

impl EndpointInfo {
    /// Whether this UDC endpoint can carry `ep`.
    pub fn supports(&self, ep: &EndpointDescriptor) -> bool {
        let kind = match ep.transfer {
            TransferType::Control => EndpointCaps::CONTROL,
            TransferType::Isochronous => EndpointCaps::ISO,
            TransferType::Bulk => EndpointCaps::BULK,
            TransferType::Interrupt => EndpointCaps::INTERRUPT,
        };
        let dir = if ep.address.is_in() {
            EndpointCaps::DIR_IN
        } else {
            EndpointCaps::DIR_OUT
        };

        if !self.caps.contains(kind | dir) {
            return false;
        }
        if ep.max_packet_size > self.max_packet_limit {
            return false;
        }
        match self.address {
            Some(num) => usize::from(num) == ep.address.index(),
            None => true,
        }
    }
}

/// Operation names, used in fatal diagnostics.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ChannelOp {
    #[allow(missing_docs)]
    Init,
    #[allow(missing_docs)]
    Run,
    #[allow(missing_docs)]
    EventFetch,
    #[allow(missing_docs)]
    Ep0Write,
    #[allow(missing_docs)]
    Ep0Read,
    #[allow(missing_docs)]
    EpEnable,
    #[allow(missing_docs)]
    EpDisable,
    #[allow(missing_docs)]
    EpWrite,
    #[allow(missing_docs)]
    EpRead,
    #[allow(missing_docs)]
    Configure,
    #[allow(missing_docs)]
    VbusDraw,
    #[allow(missing_docs)]
    EpsInfo,
    #[allow(missing_docs)]
    Ep0Stall,
    #[allow(missing_docs)]
    EpSetHalt,
    #[allow(missing_docs)]
    EpClearHalt,
    #[allow(missing_docs)]
    EpSetWedge,
}

impl fmt::Display for ChannelOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChannelOp::Init => "USB_RAW_IOCTL_INIT",
            ChannelOp::Run => "USB_RAW_IOCTL_RUN",
            ChannelOp::EventFetch => "USB_RAW_IOCTL_EVENT_FETCH",
            ChannelOp::Ep0Write => "USB_RAW_IOCTL_EP0_WRITE",
            ChannelOp::Ep0Read => "USB_RAW_IOCTL_EP0_READ",
            ChannelOp::EpEnable => "USB_RAW_IOCTL_EP_ENABLE",
            ChannelOp::EpDisable => "USB_RAW_IOCTL_EP_DISABLE",
            ChannelOp::EpWrite => "USB_RAW_IOCTL_EP_WRITE",
            ChannelOp::EpRead => "USB_RAW_IOCTL_EP_READ",
            ChannelOp::Configure => "USB_RAW_IOCTL_CONFIGURE",
            ChannelOp::VbusDraw => "USB_RAW_IOCTL_VBUS_DRAW",
            ChannelOp::EpsInfo => "USB_RAW_IOCTL_EPS_INFO",
            ChannelOp::Ep0Stall => "USB_RAW_IOCTL_EP0_STALL",
            ChannelOp::EpSetHalt => "USB_RAW_IOCTL_EP_SET_HALT",
            ChannelOp::EpClearHalt => "USB_RAW_IOCTL_EP_CLEAR_HALT",
            ChannelOp::EpSetWedge => "USB_RAW_IOCTL_EP_SET_WEDGE",
        };
        f.write_str(name)
    }
}

/// The kernel control channel, as seen by the dispatcher and
/// endpoint workers.
///
/// Every call is a single kernel operation, so the channel is
/// shared between threads without extra locking.
pub trait Transport: Send + Sync + 'static {
    /// Bind to the UDC `driver`/`device` at `speed`.
    fn init(&self, driver: &str, device: &str, speed: UsbSpeed) -> Result<()>;

    /// Start the gadget, the host can see the device after this.
    fn run(&self) -> Result<()>;

    /// Block until the next bus event.
    fn fetch_event(&self) -> Result<RawEvent>;

    /// Read the data stage of a Host-to-device control transfer.
    /// An empty `buf` acknowledges the status stage.
    fn ep0_read(&self, buf: &mut [u8]) -> Result<usize>;

    /// Write the data stage of a Device-to-host control transfer.
    fn ep0_write(&self, data: &[u8]) -> Result<usize>;

    /// Stall endpoint 0.
    fn ep0_stall(&self) -> Result<()>;

    /// Enable a non-control endpoint.
    fn ep_enable(&self, desc: &EndpointDescriptor) -> Result<EndpointHandle>;

    /// Disable an endpoint. Raw-gadget refuses this while a
    /// transfer is still queued on it, see [`Transport::ep_wake`].
    fn ep_disable(&self, ep: EndpointHandle) -> Result<()>;

    /// Make a transfer pending on `ep` in thread `worker` return
    /// early. An interrupted transfer fails with EINTR.
    ///
    /// The default sends [`WAKE_SIGNAL`] to `worker`, the kernel
    /// then dequeues the transfer. A signal that arrives before
    /// the transfer starts is lost, so callers repeat this until
    /// the worker is gone.
    fn ep_wake(&self, ep: EndpointHandle, worker: Pthread) {
        install_wake_handler();
        if let Err(err) = pthread_kill(worker, WAKE_SIGNAL) {
            debug!("{}: waking worker: {}", ep, err);
        }
    }

    /// Blocking read from an OUT endpoint.
    fn ep_read(&self, ep: EndpointHandle, buf: &mut [u8]) -> core::result::Result<usize, TransferError>;

    /// Blocking write to an IN endpoint. May fail without
    /// consequences for the rest of the device.
    fn ep_write(&self, ep: EndpointHandle, data: &[u8]) -> core::result::Result<usize, TransferError>;

    /// Tell the UDC the device is configured.
    fn configure(&self) -> Result<()>;

    /// Report the current drawn from VBUS, in mA.
    fn vbus_draw(&self, milliamps: u32) -> Result<()>;

    /// UDC endpoint capability table.
    fn eps_info(&self) -> Result<Vec<EndpointInfo>>;

    /// Halt an endpoint.
    fn ep_set_halt(&self, ep: EndpointHandle) -> Result<()>;

    /// Clear an endpoint halt.
    fn ep_clear_halt(&self, ep: EndpointHandle) -> Result<()>;

    /// Halt an endpoint, ignoring host CLEAR_FEATURE.
    fn ep_set_wedge(&self, ep: EndpointHandle) -> Result<()>;
}

/// Signal used to interrupt workers blocked in the kernel. Its
/// handler does nothing.
pub const WAKE_SIGNAL: Signal = Signal::SIGUSR1;

extern "C" fn ignore_wake(_: libc::c_int) {}

fn install_wake_handler() {
    static INSTALL: Once = Once::new();
    INSTALL.call_once(|| {
        // no SA_RESTART: the blocked ioctl must return EINTR
        let action = SigAction::new(
            SigHandler::Handler(ignore_wake),
            SaFlags::empty(),
            SigSet::empty(),
        );
        // SAFETY: the handler is empty, hence async-signal-safe.
        if let Err(err) = unsafe { sigaction(WAKE_SIGNAL, &action) } {
            warn!("installing {:?} handler: {}", WAKE_SIGNAL, err);
        }
    });
}
