#![warn(missing_docs)]
//!
//! A library for emulating USB peripherals in software on Linux,
//! through the raw-gadget kernel interface.
//!
//! ## About
//!
//! A USB Device Controller (UDC) normally sits in hardware and a
//! gadget driver in the kernel gives it a personality. The
//! raw-gadget module instead exposes the UDC to user space via
//! `/dev/raw-gadget`: the process receives bus events and SETUP
//! packets, and decides what to answer.
//!
//! This library provides the plumbing for such a process. The
//! [`Gadget`] dispatcher answers standard requests from a
//! descriptor catalog, routes class and vendor requests through a
//! table of handlers, enables endpoints on SET_CONFIGURATION and
//! runs one I/O worker thread per data endpoint.
//!
//! A device is described by implementing [`DeviceProfile`]. Two
//! profiles are included, a USB printer and a HID boot keyboard,
//! see [`profiles`].
//!
//! Together with the `dummy_hcd` module a gadget can be
//! connected to the same machine, which is handy for testing
//! host-side drivers.
//!
//! ### Supported operations
//!
//! * Standard requests: GET/SET_CONFIGURATION, GET_DESCRIPTOR,
//!   GET_STATUS, SET/CLEAR_FEATURE, GET/SET_INTERFACE
//! * Class and vendor requests with and without data stage
//! * Bulk and Interrupt endpoints
//! * Connect, Reset, Suspend, Resume and Disconnect events
//!
//! ### Not supported operations
//!
//! * Isochronous transfers
//! * Multiple gadgets per process sharing one channel
//! * ...
//!
//! ## License
//!
//! This project is licensed under [MIT License](https://opensource.org/licenses/MIT).
//!
//! ## Example
//!
//! The example defines a device with a single configuration and
//! no data endpoints. It runs against [`EmulatedChannel`], which
//! stands in for the kernel, so a scripted Host can check what the
//! device answers. With [`RawGadget::open`] instead the same
//! device is visible on a real bus.
//!
//! ```
//! use usbd_raw_gadget::prelude::*;
//!
//! struct Blinky {
//!     catalog: StaticCatalog,
//! }
//!
//! impl DeviceProfile for Blinky {
//!     fn catalog(&self) -> &dyn DescriptorCatalog {
//!         &self.catalog
//!     }
//!
//!     fn configurations(&self) -> Vec<Configuration> {
//!         vec![Configuration {
//!             value: 1,
//!             max_power_ma: 100,
//!             interfaces: vec![0],
//!             endpoints: vec![],
//!         }]
//!     }
//! }
//!
//! let device = vec![18, 1, 0, 2, 0xff, 0, 0, 64, 0x34, 0x12, 0x78, 0x56, 0, 1, 0, 0, 0, 1];
//! let profile = Blinky {
//!     catalog: StaticCatalog::new().with(descriptor_type::DEVICE, 0, device),
//! };
//!
//! let host = EmulatedChannel::new();
//! let mut gadget = Gadget::new(host.clone(), profile, GadgetConfig::default());
//! gadget.start().expect("start");
//!
//! host.push_connect();
//! host.get_descriptor(descriptor_type::DEVICE, 0, 0, 64);
//! host.set_configuration(1);
//! while host.pending_events() > 0 {
//!     gadget.step().expect("step");
//! }
//!
//! assert_eq!(host.ep0_writes()[0].len(), 18);
//! assert_eq!(gadget.state(), DeviceState::Configured);
//! ```
//!
//! USB debug logging can be enabled, for example, by running tests with:
//! `$ RUST_LOG=trace cargo test -- --nocapture`
//!

use std::io;

use nix::errno::Errno;
use thiserror::Error;

mod catalog;
mod config;
mod control;
mod emulated;
mod event;
mod gadget;
mod state;
mod usbdata;
mod worker;

pub mod profiles;
pub mod transport;

pub use catalog::{
    language_descriptor, string_descriptor, DescriptorCatalog, LookupFn, StaticCatalog,
    LANGUAGE_EN_US,
};
pub use config::{GadgetConfig, DEFAULT_DEVICE, DEFAULT_DRIVER};
#[cfg(feature = "cli")]
pub use config::GadgetArgs;
pub use control::{Configuration, DataHandler, DeviceProfile, HandlerTable, Reply, RequestHandler};
pub use emulated::{default_eps_info, EmulatedChannel, Op};
pub use event::{event_type, BusEvent, RawEvent, EVENT_HEADER_SIZE};
pub use gadget::Gadget;
pub use state::{DeviceState, SharedState};
pub use transport::{ChannelOp, EndpointHandle, RawGadget, Transport, TransferError};
pub use usbdata::{
    describe_descriptor, describe_standard_request, descriptor_type, CtrRequestType,
    DescriptorRequest, EndpointDescriptor, SetupPacket, TransferType, UsbSpeed,
    ENDPOINT_DESCRIPTOR_SIZE, SETUP_PACKET_SIZE,
};
pub use worker::{
    CancelToken, ChannelSource, EndpointIo, Sink, Source, WorkerExit, WorkerPolicy,
};

/// Prelude
pub mod prelude {
    pub use crate::catalog::{DescriptorCatalog, StaticCatalog};
    pub use crate::config::GadgetConfig;
    pub use crate::control::{Configuration, DeviceProfile, HandlerTable, Reply};
    pub use crate::emulated::EmulatedChannel;
    pub use crate::event::BusEvent;
    pub use crate::gadget::Gadget;
    pub use crate::state::DeviceState;
    pub use crate::transport::{RawGadget, Transport};
    pub use crate::usbdata::{descriptor_type, CtrRequestType, EndpointDescriptor, SetupPacket};
    pub use crate::worker::{ChannelSource, EndpointIo};
    pub use crate::{GadgetError, Result};
}

/// Fatal errors. Any of these ends the event loop.
#[derive(Debug, Error)]
pub enum GadgetError {
    /// A raw-gadget channel operation failed.
    #[error("{op} failed: {errno}")]
    Channel {
        /// Operation that failed.
        op: ChannelOp,
        /// Error reported by the kernel.
        errno: Errno,
    },
    /// The raw-gadget device node can't be opened.
    /// Usually, the `raw_gadget` module is not loaded
    /// or the process lacks permissions.
    #[error("can't open {path}: {source}")]
    Open {
        /// Device node path.
        path: String,
        /// Underlying error.
        source: io::Error,
    },
    /// UDC driver or device name does not fit the
    /// channel's fixed-size name fields.
    #[error("invalid UDC name {0:?}")]
    InvalidName(String),
    /// An endpoint worker thread can't be created.
    #[error("can't spawn endpoint worker: {0}")]
    Spawn(io::Error),
}

impl GadgetError {
    /// Errno of a failed channel operation.
    pub fn errno(&self) -> Option<Errno> {
        match self {
            GadgetError::Channel { errno, .. } => Some(*errno),
            _ => None,
        }
    }
}

/// Result for crate operations.
pub type Result<T> = core::result::Result<T, GadgetError>;

/// Initialize `env_logger` logging for a gadget process with
/// `info` level.
///
/// Level can be changed via environment variable, e.g.
/// `RUST_LOG=debug`.
#[cfg(feature = "initlog")]
pub fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_target(false)
        .try_init();
}

/// Initialize `env_logger` logging suitable for tests with
/// `debug` level.
///
/// `trace` logging level can be enabled via environment variable:
/// `RUST_LOG=trace cargo test -- --nocapture`.
#[cfg(feature = "initlog")]
pub fn init_test_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug"))
        .is_test(true)
        .format_target(false)
        .format_timestamp(None)
        .try_init();
}
