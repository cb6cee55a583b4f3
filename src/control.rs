//! Class and vendor request routing, and the `DeviceProfile`
//! trait a simulated device implements.
//!
use core::fmt;
use std::collections::BTreeMap;

use usb_device::control::RequestType;

use crate::catalog::DescriptorCatalog;
use crate::usbdata::{EndpointDescriptor, SetupPacket};
use crate::worker::EndpointIo;

/// Handles a class or vendor request.
pub type RequestHandler<P> = fn(&mut P, &SetupPacket) -> Reply<P>;

/// Receives the data stage of an accepted Host-to-device request.
pub type DataHandler<P> = fn(&mut P, &SetupPacket, &[u8]);

/// Outcome of a request: one data-stage action and one status.
pub enum Reply<P> {
    /// Device-to-host data stage, cut to `wLength`.
    Send(Vec<u8>),
    /// Read `wLength` bytes of Host-to-device data, then pass
    /// them to the handler.
    Receive(DataHandler<P>),
    /// No data stage, acknowledge.
    Ack,
    /// Reject the request.
    Stall,
}

impl<P> fmt::Debug for Reply<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Send(data) => f.debug_tuple("Send").field(data).finish(),
            Reply::Receive(_) => f.write_str("Receive"),
            Reply::Ack => f.write_str("Ack"),
            Reply::Stall => f.write_str("Stall"),
        }
    }
}

struct Entry<P> {
    name: &'static str,
    handler: RequestHandler<P>,
}

/// Maps (request class, request code) to a handler.
///
/// Standard requests never reach the table, the dispatcher
/// serves them itself.
pub struct HandlerTable<P> {
    entries: BTreeMap<(u8, u8), Entry<P>>,
    vendor_fallback: Option<RequestHandler<P>>,
}

impl<P> Default for HandlerTable<P> {
    fn default() -> Self {
        HandlerTable {
            entries: BTreeMap::new(),
            vendor_fallback: None,
        }
    }
}

impl<P> HandlerTable<P> {
    /// Empty table, every class and vendor request stalls.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a class request. `name` is used for logging.
    #[must_use]
    pub fn class(mut self, request: u8, name: &'static str, handler: RequestHandler<P>) -> Self {
        self.entries
            .insert((RequestType::Class as u8, request), Entry { name, handler });
        self
    }

    /// Add a vendor request.
    #[must_use]
    pub fn vendor(mut self, request: u8, name: &'static str, handler: RequestHandler<P>) -> Self {
        self.entries
            .insert((RequestType::Vendor as u8, request), Entry { name, handler });
        self
    }

    /// Handler for vendor requests without their own entry.
    #[must_use]
    pub fn vendor_fallback(mut self, handler: RequestHandler<P>) -> Self {
        self.vendor_fallback = Some(handler);
        self
    }

    /// Find the handler for a request.
    pub fn lookup(&self, class: RequestType, request: u8) -> Option<(&'static str, RequestHandler<P>)> {
        match class {
            RequestType::Class | RequestType::Vendor => {}
            _ => return None,
        }

        if let Some(entry) = self.entries.get(&(class as u8, request)) {
            return Some((entry.name, entry.handler));
        }

        match class {
            RequestType::Vendor => self.vendor_fallback.map(|h| ("vendor", h)),
            _ => None,
        }
    }

    /// Number of table entries, the fallback not included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `true` if the table has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A configuration the host can select with SET_CONFIGURATION.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Configuration {
    /// bConfigurationValue, non-zero.
    pub value: u8,
    /// Current drawn from VBUS when selected, in mA.
    pub max_power_ma: u32,
    /// Interface numbers.
    pub interfaces: Vec<u8>,
    /// Non-control endpoints enabled when selected.
    pub endpoints: Vec<EndpointDescriptor>,
}

/// A simulated USB device.
///
/// Provides the descriptors, the class/vendor handler table, the
/// configurations and the data behind each endpoint. Defaulted
/// methods can be overridden to customize behavior.
pub trait DeviceProfile: Send + Sized + 'static {
    /// Descriptors served for GET_DESCRIPTOR.
    fn catalog(&self) -> &dyn DescriptorCatalog;

    /// Class and vendor requests. Called once when the dispatcher
    /// is created.
    ///
    /// Default implementation has no handlers.
    fn handlers(&self) -> HandlerTable<Self> {
        HandlerTable::new()
    }

    /// All configurations of the device.
    fn configurations(&self) -> Vec<Configuration>;

    /// Configuration with `bConfigurationValue == value`, `None`
    /// stalls SET_CONFIGURATION.
    fn configuration(&self, value: u8) -> Option<Configuration> {
        self.configurations().into_iter().find(|c| c.value == value)
    }

    /// Data behind an endpoint of the configuration being
    /// selected. `None` leaves the endpoint enabled but idle.
    ///
    /// Default implementation returns `None`.
    fn endpoint_io(&mut self, ep: &EndpointDescriptor) -> Option<EndpointIo> {
        let _ = ep;
        None
    }

    /// SET_INTERFACE. Return `false` to stall.
    ///
    /// Default implementation accepts alternate setting 0 only.
    fn set_interface(&mut self, interface: u8, alt: u8) -> bool {
        let _ = interface;
        alt == 0
    }

    /// Self-powered bit of GET_STATUS.
    fn self_powered(&self) -> bool {
        false
    }

    /// Called on bus reset and disconnect, after all workers are
    /// stopped.
    fn on_reset(&mut self) {}
}
