//! Control-Transfer Dispatcher.
//!
//! Fetches bus events, serves standard requests itself, routes
//! class and vendor requests through the profile's
//! [`HandlerTable`], and owns the endpoint worker roster.
//!
//! Control transfers are handled one at a time, run to
//! completion, as endpoint 0 hardware would.
//!
use std::collections::BTreeSet;
use std::sync::Arc;

use log::{debug, info, warn};
use usb_device::control::{Recipient, Request, RequestType};
use usb_device::UsbDirection;

use crate::config::GadgetConfig;
use crate::control::{Configuration, DeviceProfile, HandlerTable, Reply};
use crate::event::BusEvent;
use crate::state::{DeviceState, SharedState};
use crate::transport::Transport;
use crate::usbdata::{describe_descriptor, describe_standard_request, SetupPacket};
use crate::worker::{WorkerExit, Workers};
use crate::Result;

type StandardHandler<T, P> = fn(&mut Gadget<T, P>, &SetupPacket) -> Result<Reply<P>>;

/// Emulated USB device bound to a transport.
pub struct Gadget<T: Transport, P: DeviceProfile> {
    transport: Arc<T>,
    profile: P,
    handlers: HandlerTable<P>,
    config: GadgetConfig,
    state: SharedState,
    workers: Workers,
    current: Option<Configuration>,
    wedged: BTreeSet<u8>,
}

impl<T: Transport, P: DeviceProfile> Gadget<T, P> {
    /// Create a dispatcher. Nothing is sent to the transport until
    /// `start()`.
    pub fn new(transport: T, profile: P, config: GadgetConfig) -> Self {
        let handlers = profile.handlers();
        debug!("{} class/vendor handlers", handlers.len());

        Gadget {
            transport: Arc::new(transport),
            profile,
            handlers,
            config,
            state: SharedState::new(),
            workers: Workers::new(),
            current: None,
            wedged: BTreeSet::new(),
        }
    }

    /// The transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// The device profile.
    pub fn profile(&self) -> &P {
        &self.profile
    }

    /// The device profile, mutable.
    pub fn profile_mut(&mut self) -> &mut P {
        &mut self.profile
    }

    /// Current lifecycle state.
    pub fn state(&self) -> DeviceState {
        self.state.state()
    }

    /// A handle to the shared device state, e.g. for device-class
    /// threads.
    pub fn shared_state(&self) -> SharedState {
        self.state.clone()
    }

    /// Addresses of enabled endpoints.
    pub fn enabled_endpoints(&self) -> Vec<u8> {
        self.workers.enabled()
    }

    /// Addresses of endpoints with a running worker.
    pub fn running_workers(&self) -> Vec<u8> {
        self.workers.running()
    }

    /// Bind to the UDC and start the gadget.
    pub fn start(&mut self) -> Result<()> {
        info!(
            "binding to {} ({}), speed {:?}",
            self.config.driver, self.config.device, self.config.speed
        );
        self.transport
            .init(&self.config.driver, &self.config.device, self.config.speed)?;
        self.transport.run()?;
        self.state.reset(DeviceState::Powered);
        Ok(())
    }

    /// Process events until a fatal error.
    pub fn run(&mut self) -> Result<()> {
        loop {
            self.step()?;
        }
    }

    /// Fetch, decode and handle one event.
    pub fn step(&mut self) -> Result<BusEvent> {
        let event = self.transport.fetch_event()?.decode();
        self.handle_event(event)?;
        Ok(event)
    }

    /// Handle one bus event.
    pub fn handle_event(&mut self, event: BusEvent) -> Result<()> {
        debug!("event: {}", event);

        match event {
            BusEvent::Connect => {
                // a worker left from the previous session must not
                // see a reused endpoint handle
                self.stop_workers()?;
                self.check_endpoints()?;
                self.state.reset(DeviceState::Default);
                info!("connected");
            }
            BusEvent::Control(setup) => self.handle_control(&setup)?,
            BusEvent::Suspend => {
                self.state.set_suspended(true);
                info!("suspended");
            }
            BusEvent::Resume => {
                self.state.set_suspended(false);
                info!("resumed");
            }
            BusEvent::Reset => {
                self.stop_workers()?;
                self.state.reset(DeviceState::Default);
                self.profile.on_reset();
                info!("bus reset");
            }
            BusEvent::Disconnect => {
                self.stop_workers()?;
                self.state.reset(DeviceState::Unattached);
                self.profile.on_reset();
                info!("disconnected");
            }
            BusEvent::Unknown { kind, length } => {
                warn!("ignoring unknown event {} ({} bytes)", kind, length);
            }
            BusEvent::Malformed { kind, length } => {
                warn!("ignoring malformed event {} ({} bytes)", kind, length);
            }
        }

        Ok(())
    }

    /// Stop all endpoint workers, disable their endpoints and
    /// forget the selected configuration.
    pub fn stop(&mut self) -> Result<Vec<(u8, WorkerExit)>> {
        self.current = None;
        self.wedged.clear();
        self.workers.stop_all(self.transport.as_ref())
    }

    fn stop_workers(&mut self) -> Result<()> {
        self.stop().map(|_| ())
    }

    /// Halt an enabled endpoint on behalf of the device class.
    /// Returns `false` if the endpoint is not enabled.
    pub fn halt_endpoint(&mut self, address: u8) -> Result<bool> {
        match self.workers.handle(address) {
            Some(handle) => {
                self.transport.ep_set_halt(handle)?;
                self.state.set_halted(address, true);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Halt an endpoint so that a host CLEAR_FEATURE(ENDPOINT_HALT)
    /// does not resume it. Returns `false` if the endpoint is not
    /// enabled.
    pub fn wedge_endpoint(&mut self, address: u8) -> Result<bool> {
        match self.workers.handle(address) {
            Some(handle) => {
                self.transport.ep_set_wedge(handle)?;
                self.state.set_halted(address, true);
                self.wedged.insert(address);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Clear a halt or wedge set by the device class.
    pub fn unhalt_endpoint(&mut self, address: u8) -> Result<bool> {
        match self.workers.handle(address) {
            Some(handle) => {
                self.transport.ep_clear_halt(handle)?;
                self.state.set_halted(address, false);
                self.wedged.remove(&address);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn check_endpoints(&self) -> Result<()> {
        let eps = self.transport.eps_info()?;
        for info in eps.iter() {
            debug!(
                "udc {}: address {:?}, caps {:?}, maxpacket {}, streams {}",
                info.name, info.address, info.caps, info.max_packet_limit, info.max_streams
            );
        }

        for cfg in self.profile.configurations() {
            for ep in cfg.endpoints.iter() {
                if !eps.iter().any(|info| info.supports(ep)) {
                    warn!(
                        "configuration {}: no UDC endpoint can carry 0x{:02x} ({:?})",
                        cfg.value,
                        ep.address_byte(),
                        ep.transfer
                    );
                }
            }
        }
        Ok(())
    }

    fn handle_control(&mut self, setup: &SetupPacket) -> Result<()> {
        let reply = match setup.request_class() {
            RequestType::Standard => {
                debug!("  req = {}", describe_standard_request(setup.request()));
                match Self::standard_handler(setup.request()) {
                    Some(handler) => handler(self, setup)?,
                    None => Reply::Stall,
                }
            }
            class => match self.handlers.lookup(class, setup.request()) {
                Some((name, handler)) => {
                    debug!("  req = {} ({:?})", name, class);
                    handler(&mut self.profile, setup)
                }
                None => {
                    debug!("  req = unknown 0x{:02x} ({:?})", setup.request(), class);
                    Reply::Stall
                }
            },
        };

        self.complete(setup, reply)
    }

    /// Run the data and status stages of `reply`.
    fn complete(&mut self, setup: &SetupPacket, reply: Reply<P>) -> Result<()> {
        match (reply, setup.direction()) {
            (Reply::Send(data), UsbDirection::In) => {
                let len = data.len().min(setup.length() as usize);
                let sent = self.transport.ep0_write(&data[..len])?;
                debug!("  sent {} of {} bytes", sent, data.len());
            }
            (Reply::Ack, UsbDirection::In) => {
                self.transport.ep0_write(&[])?;
            }
            (Reply::Ack, UsbDirection::Out) => {
                // a data stage nobody asked for is read and dropped
                let mut buf = vec![0u8; setup.length() as usize];
                let len = self.transport.ep0_read(&mut buf)?;
                if len > 0 {
                    debug!("  dropped {} bytes of data stage", len);
                }
            }
            (Reply::Receive(handler), UsbDirection::Out) => {
                let mut buf = vec![0u8; setup.length() as usize];
                let len = self.transport.ep0_read(&mut buf)?;
                debug!("  received {} bytes", len);
                handler(&mut self.profile, setup, &buf[..len]);
            }
            (Reply::Stall, _) => self.stall(setup)?,
            (reply, dir) => {
                warn!("{:?} reply to a {:?} request", reply, dir);
                self.stall(setup)?;
            }
        }
        Ok(())
    }

    fn stall(&self, setup: &SetupPacket) -> Result<()> {
        warn!("stalling: {}", setup);
        self.transport.ep0_stall()
    }

    fn standard_handler(request: u8) -> Option<StandardHandler<T, P>> {
        let handler: StandardHandler<T, P> = match request {
            Request::GET_STATUS => Self::get_status,
            Request::CLEAR_FEATURE => Self::clear_feature,
            Request::SET_FEATURE => Self::set_feature,
            Request::GET_DESCRIPTOR => Self::get_descriptor,
            Request::GET_CONFIGURATION => Self::get_configuration,
            Request::SET_CONFIGURATION => Self::set_configuration,
            Request::GET_INTERFACE => Self::get_interface,
            Request::SET_INTERFACE => Self::set_interface,
            _ => return None,
        };
        Some(handler)
    }

    fn has_interface(&self, interface: u8) -> bool {
        self.state.is_configured()
            && self
                .current
                .as_ref()
                .is_some_and(|cfg| cfg.interfaces.contains(&interface))
    }

    fn get_descriptor(&mut self, setup: &SetupPacket) -> Result<Reply<P>> {
        if setup.direction() != UsbDirection::In {
            return Ok(Reply::Stall);
        }

        let req = setup.descriptor_request();
        debug!(
            "  desc = {} #{}, lang 0x{:04x}",
            describe_descriptor(req.kind),
            req.index,
            req.language
        );

        Ok(match self.profile.catalog().lookup(&req) {
            Some(bytes) => Reply::Send(bytes.into_owned()),
            None => {
                warn!(
                    "no {} descriptor #{} (0x{:02x})",
                    describe_descriptor(req.kind),
                    req.index,
                    req.kind
                );
                Reply::Stall
            }
        })
    }

    fn get_configuration(&mut self, setup: &SetupPacket) -> Result<Reply<P>> {
        if setup.direction() != UsbDirection::In {
            return Ok(Reply::Stall);
        }
        Ok(Reply::Send(vec![self.state.configuration()]))
    }

    fn set_configuration(&mut self, setup: &SetupPacket) -> Result<Reply<P>> {
        if setup.direction() != UsbDirection::Out {
            return Ok(Reply::Stall);
        }

        let value = (setup.value() & 0xff) as u8;
        if value == 0 {
            self.stop_workers()?;
            self.state.set_configuration(0);
            info!("configuration cleared");
            return Ok(Reply::Ack);
        }

        let config = match self.profile.configuration(value) {
            Some(config) => config,
            None => {
                warn!("no configuration {}", value);
                return Ok(Reply::Stall);
            }
        };

        // selecting a configuration again starts it over
        self.stop_workers()?;

        let mut enabled = Vec::with_capacity(config.endpoints.len());
        for ep in config.endpoints.iter() {
            let handle = self.transport.ep_enable(ep)?;
            enabled.push((*ep, handle));
        }

        self.transport.vbus_draw(config.max_power_ma)?;
        self.transport.configure()?;
        self.state.set_configuration(value);

        let policy = self.config.worker_policy();
        for (ep, handle) in enabled {
            let io = self.profile.endpoint_io(&ep);
            self.workers
                .start(&self.transport, &self.state, ep, handle, io, policy)?;
        }

        info!(
            "configuration {} selected, {} endpoints",
            value,
            config.endpoints.len()
        );
        self.current = Some(config);
        Ok(Reply::Ack)
    }

    fn get_interface(&mut self, setup: &SetupPacket) -> Result<Reply<P>> {
        let interface = (setup.index() & 0xff) as u8;
        if setup.direction() != UsbDirection::In || !self.has_interface(interface) {
            return Ok(Reply::Stall);
        }
        Ok(Reply::Send(vec![self.state.alt_setting(interface)]))
    }

    fn set_interface(&mut self, setup: &SetupPacket) -> Result<Reply<P>> {
        let interface = (setup.index() & 0xff) as u8;
        let alt = (setup.value() & 0xff) as u8;

        if setup.direction() != UsbDirection::Out || !self.has_interface(interface) {
            return Ok(Reply::Stall);
        }
        if !self.profile.set_interface(interface, alt) {
            return Ok(Reply::Stall);
        }

        self.state.set_alt_setting(interface, alt);
        Ok(Reply::Ack)
    }

    fn get_status(&mut self, setup: &SetupPacket) -> Result<Reply<P>> {
        if setup.direction() != UsbDirection::In {
            return Ok(Reply::Stall);
        }

        let status: u16 = match setup.recipient() {
            Recipient::Device => {
                let mut status = 0;
                if self.profile.self_powered() {
                    status |= 1 << 0;
                }
                if self.state.remote_wakeup() {
                    status |= 1 << 1;
                }
                status
            }
            Recipient::Interface => {
                if !self.has_interface((setup.index() & 0xff) as u8) {
                    return Ok(Reply::Stall);
                }
                0
            }
            Recipient::Endpoint => {
                let address = (setup.index() & 0xff) as u8;
                if address & 0x7f == 0 {
                    0
                } else if self.workers.handle(address).is_some() {
                    u16::from(self.state.is_halted(address))
                } else {
                    return Ok(Reply::Stall);
                }
            }
            _ => return Ok(Reply::Stall),
        };

        Ok(Reply::Send(status.to_le_bytes().to_vec()))
    }

    fn clear_feature(&mut self, setup: &SetupPacket) -> Result<Reply<P>> {
        self.feature(setup, false)
    }

    fn set_feature(&mut self, setup: &SetupPacket) -> Result<Reply<P>> {
        self.feature(setup, true)
    }

    fn feature(&mut self, setup: &SetupPacket, set: bool) -> Result<Reply<P>> {
        if setup.direction() != UsbDirection::Out {
            return Ok(Reply::Stall);
        }

        match (setup.recipient(), setup.value()) {
            (Recipient::Device, Request::FEATURE_DEVICE_REMOTE_WAKEUP) => {
                self.state.set_remote_wakeup(set);
                Ok(Reply::Ack)
            }
            (Recipient::Endpoint, Request::FEATURE_ENDPOINT_HALT) => {
                let address = (setup.index() & 0xff) as u8;
                if address & 0x7f == 0 {
                    return Ok(Reply::Ack);
                }
                let handle = match self.workers.handle(address) {
                    Some(handle) => handle,
                    None => return Ok(Reply::Stall),
                };

                if set {
                    self.transport.ep_set_halt(handle)?;
                    self.state.set_halted(address, true);
                } else if self.wedged.contains(&address) {
                    debug!("  ep 0x{:02x} is wedged, staying halted", address);
                } else {
                    self.transport.ep_clear_halt(handle)?;
                    self.state.set_halted(address, false);
                }
                Ok(Reply::Ack)
            }
            _ => Ok(Reply::Stall),
        }
    }
}

impl<T: Transport, P: DeviceProfile> Drop for Gadget<T, P> {
    fn drop(&mut self) {
        if let Err(err) = self.workers.stop_all(self.transport.as_ref()) {
            warn!("stopping workers: {}", err);
        }
    }
}
