//! An implementation of `Transport` which plays the Host and the
//! kernel side of the raw-gadget channel in-process.
//!
//! Events and control data stages are scripted, endpoint data is
//! exchanged through per-endpoint queues, and every control
//! operation is recorded so tests can check what the dispatcher
//! did.
//!
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use log::trace;
use nix::errno::Errno;
use nix::sys::pthread::Pthread;
use usb_device::control::Request;

use crate::event::{event_type, RawEvent};
use crate::transport::{
    ChannelOp, EndpointCaps, EndpointHandle, EndpointInfo, Transport, TransferError,
};
use crate::usbdata::{CtrRequestType, EndpointDescriptor, SetupPacket, UsbSpeed};
use crate::{GadgetError, Result};

/// A control operation the dispatcher performed.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum Op {
    /// `init(driver, device, speed)`
    Init {
        /// UDC driver.
        driver: String,
        /// UDC device.
        device: String,
        /// Speed.
        speed: UsbSpeed,
    },
    /// `run()`
    Run,
    /// Data sent on endpoint 0.
    Ep0Write(Vec<u8>),
    /// Bytes read from endpoint 0, zero for a status ACK.
    Ep0Read(usize),
    /// Endpoint 0 stalled.
    Ep0Stall,
    /// Endpoint enabled, by address.
    EpEnable(u8),
    /// Endpoint disabled.
    EpDisable(EndpointHandle),
    /// `configure()`
    Configure,
    /// `vbus_draw(mA)`
    VbusDraw(u32),
    /// Endpoint halted.
    EpSetHalt(EndpointHandle),
    /// Endpoint halt cleared.
    EpClearHalt(EndpointHandle),
    /// Endpoint wedged.
    EpSetWedge(EndpointHandle),
}

/// Simulated endpoint with queues in both directions.
struct EndpointImpl {
    address: u8,
    enabled: bool,
    to_host: VecDeque<Vec<u8>>,
    from_host: VecDeque<Vec<u8>>,
    fail_writes: u32,
    /// Threads blocked in `ep_read`.
    readers: u32,
    /// Set by `ep_wake`, fails the next wait with EINTR.
    woken: bool,
    refuse_disable: bool,
}

impl EndpointImpl {
    fn new(address: u8) -> Self {
        EndpointImpl {
            address,
            enabled: true,
            to_host: VecDeque::new(),
            from_host: VecDeque::new(),
            fail_writes: 0,
            readers: 0,
            woken: false,
            refuse_disable: false,
        }
    }
}

#[derive(Default)]
struct ChannelImpl {
    /// Scripted events, each SETUP with its OUT data stage.
    events: VecDeque<(RawEvent, Option<Vec<u8>>)>,
    /// Data stage of the last fetched SETUP, until read.
    data_stage: Option<Vec<u8>>,
    ops: Vec<Op>,
    endpoints: BTreeMap<u32, EndpointImpl>,
    next_handle: u32,
    eps_info: Vec<EndpointInfo>,
    pending_failures: BTreeMap<u8, u32>,
}

impl ChannelImpl {
    /// Most recently enabled endpoint at `address`.
    fn endpoint_mut(&mut self, address: u8) -> Option<&mut EndpointImpl> {
        self.endpoints
            .values_mut()
            .rev()
            .find(|ep| ep.address == address)
    }
}

#[derive(Default)]
struct Shared {
    channel: Mutex<ChannelImpl>,
    changed: Condvar,
}

/// In-process raw-gadget channel.
///
/// Cloning gives another handle to the same channel, keep one in
/// the test while the dispatcher owns the other.
#[derive(Clone)]
pub struct EmulatedChannel {
    shared: Arc<Shared>,
}

impl Default for EmulatedChannel {
    fn default() -> Self {
        Self::new()
    }
}

/// Endpoint table of a dummy UDC: endpoints 1..=15 in both
/// directions, any transfer type.
pub fn default_eps_info() -> Vec<EndpointInfo> {
    let any = EndpointCaps::BULK | EndpointCaps::INTERRUPT | EndpointCaps::ISO;
    (1..=15u8)
        .flat_map(|num| {
            [
                EndpointInfo {
                    name: format!("ep{}in", num),
                    address: Some(num),
                    caps: any | EndpointCaps::DIR_IN,
                    max_packet_limit: 1024,
                    max_streams: 0,
                },
                EndpointInfo {
                    name: format!("ep{}out", num),
                    address: Some(num),
                    caps: any | EndpointCaps::DIR_OUT,
                    max_packet_limit: 1024,
                    max_streams: 0,
                },
            ]
        })
        .collect()
}

impl EmulatedChannel {
    /// Empty channel with the default endpoint table.
    pub fn new() -> Self {
        let channel = ChannelImpl {
            next_handle: 1,
            eps_info: default_eps_info(),
            ..ChannelImpl::default()
        };
        EmulatedChannel {
            shared: Arc::new(Shared {
                channel: Mutex::new(channel),
                changed: Condvar::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ChannelImpl> {
        self.shared
            .channel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the UDC endpoint table.
    pub fn set_eps_info(&self, eps: Vec<EndpointInfo>) {
        self.lock().eps_info = eps;
    }

    /// Queue a raw event record.
    pub fn push_event(&self, event: RawEvent) {
        self.lock().events.push_back((event, None));
    }

    /// Queue an event without payload, e.g. `event_type::RESET`.
    pub fn push_bus_event(&self, kind: u32) {
        self.push_event(RawEvent::new(kind, &[]));
    }

    /// Queue a SETUP packet. `data` is the Host-to-device data
    /// stage, if any. It belongs to this request only: whatever
    /// the device leaves unread is gone once the next event is
    /// fetched.
    pub fn push_setup(&self, setup: SetupPacket, data: Option<&[u8]>) {
        self.lock()
            .events
            .push_back((RawEvent::control(setup), data.map(<[u8]>::to_vec)));
    }

    /// Queue a connect event.
    pub fn push_connect(&self) {
        self.push_bus_event(event_type::CONNECT);
    }

    /// Queue a Device-to-host control request.
    pub fn control_read(&self, reqt: CtrRequestType, req: u8, value: u16, index: u16, length: u16) {
        self.push_setup(SetupPacket::new(reqt, req, value, index, length), None);
    }

    /// Queue a Host-to-device control request with `data` as the
    /// data stage.
    pub fn control_write(&self, reqt: CtrRequestType, req: u8, value: u16, index: u16, data: &[u8]) {
        let setup = SetupPacket::new(reqt, req, value, index, data.len() as u16);
        let data = if data.is_empty() { None } else { Some(data) };
        self.push_setup(setup, data);
    }

    /// Standard Device Request: GET_STATUS (0x00)
    pub fn device_get_status(&self) {
        self.control_read(CtrRequestType::to_host(), Request::GET_STATUS, 0, 0, 2);
    }

    /// Standard Endpoint Request: GET_STATUS (0x00)
    pub fn endpoint_get_status(&self, endpoint: u8) {
        self.control_read(
            CtrRequestType::to_host().endpoint(),
            Request::GET_STATUS,
            0,
            endpoint as u16,
            2,
        );
    }

    /// Standard Device Request: SET_FEATURE (0x03)
    pub fn device_set_feature(&self, feature: u16) {
        self.control_write(CtrRequestType::to_device(), Request::SET_FEATURE, feature, 0, &[]);
    }

    /// Standard Endpoint Request: SET_FEATURE (0x03)
    pub fn endpoint_set_feature(&self, endpoint: u8, feature: u16) {
        self.control_write(
            CtrRequestType::to_device().endpoint(),
            Request::SET_FEATURE,
            feature,
            endpoint as u16,
            &[],
        );
    }

    /// Standard Endpoint Request: CLEAR_FEATURE (0x01)
    pub fn endpoint_clear_feature(&self, endpoint: u8, feature: u16) {
        self.control_write(
            CtrRequestType::to_device().endpoint(),
            Request::CLEAR_FEATURE,
            feature,
            endpoint as u16,
            &[],
        );
    }

    /// Standard Device Request: GET_DESCRIPTOR (0x06)
    pub fn get_descriptor(&self, dtype: u8, dindex: u8, lang_id: u16, length: u16) {
        let typeindex: u16 = ((dtype as u16) << 8) | dindex as u16;
        self.control_read(
            CtrRequestType::to_host(),
            Request::GET_DESCRIPTOR,
            typeindex,
            lang_id,
            length,
        );
    }

    /// Standard Device Request: GET_CONFIGURATION (0x08)
    pub fn get_configuration(&self) {
        self.control_read(CtrRequestType::to_host(), Request::GET_CONFIGURATION, 0, 0, 1);
    }

    /// Standard Device Request: SET_CONFIGURATION (0x09)
    pub fn set_configuration(&self, configuration: u8) {
        self.control_write(
            CtrRequestType::to_device(),
            Request::SET_CONFIGURATION,
            configuration as u16,
            0,
            &[],
        );
    }

    /// Standard Interface Request: GET_INTERFACE (0x0a)
    pub fn get_interface(&self, interface: u8) {
        self.control_read(
            CtrRequestType::to_host().interface(),
            Request::GET_INTERFACE,
            0,
            interface as u16,
            1,
        );
    }

    /// Standard Interface Request: SET_INTERFACE (0x0b)
    pub fn set_interface(&self, interface: u8, alt_setting: u8) {
        self.control_write(
            CtrRequestType::to_device().interface(),
            Request::SET_INTERFACE,
            alt_setting as u16,
            interface as u16,
            &[],
        );
    }

    /// Number of events not fetched yet.
    pub fn pending_events(&self) -> usize {
        self.lock().events.len()
    }

    /// All recorded operations.
    pub fn ops(&self) -> Vec<Op> {
        self.lock().ops.clone()
    }

    /// Forget recorded operations.
    pub fn clear_ops(&self) {
        self.lock().ops.clear();
    }

    /// Data sent on endpoint 0, in order.
    pub fn ep0_writes(&self) -> Vec<Vec<u8>> {
        self.lock()
            .ops
            .iter()
            .filter_map(|op| match op {
                Op::Ep0Write(data) => Some(data.clone()),
                _ => None,
            })
            .collect()
    }

    /// Number of endpoint 0 stalls.
    pub fn stalls(&self) -> usize {
        self.lock()
            .ops
            .iter()
            .filter(|op| **op == Op::Ep0Stall)
            .count()
    }

    /// Addresses of currently enabled endpoints.
    pub fn enabled_endpoints(&self) -> Vec<u8> {
        self.lock()
            .endpoints
            .values()
            .filter(|ep| ep.enabled)
            .map(|ep| ep.address)
            .collect()
    }

    /// Host sends `data` to the OUT endpoint at `address`.
    /// Returns `false` if the endpoint is not enabled.
    pub fn host_send(&self, address: u8, data: &[u8]) -> bool {
        let mut ch = self.lock();
        let sent = match ch.endpoint_mut(address) {
            Some(ep) if ep.enabled => {
                ep.from_host.push_back(data.to_vec());
                true
            }
            _ => false,
        };
        self.shared.changed.notify_all();
        sent
    }

    /// Host takes the next transfer written to the IN endpoint at
    /// `address`, waiting up to `timeout`.
    pub fn host_receive(&self, address: u8, timeout: Duration) -> Option<Vec<u8>> {
        let deadline = Instant::now() + timeout;
        let mut ch = self.lock();

        loop {
            if let Some(data) = ch.endpoint_mut(address).and_then(|ep| ep.to_host.pop_front()) {
                return Some(data);
            }

            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            ch = self
                .shared
                .changed
                .wait_timeout(ch, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Make the next `count` writes to the IN endpoint at `address`
    /// fail with EAGAIN, as if the host was not reading. Applies to
    /// an endpoint enabled later, too.
    pub fn fail_writes(&self, address: u8, count: u32) {
        let mut ch = self.lock();
        match ch.endpoint_mut(address) {
            Some(ep) if ep.enabled => ep.fail_writes = count,
            _ => {
                ch.pending_failures.insert(address, count);
            }
        }
    }

    /// Number of threads blocked reading the OUT endpoint at
    /// `address`.
    pub fn pending_reads(&self, address: u8) -> u32 {
        self.lock()
            .endpoint_mut(address)
            .map_or(0, |ep| ep.readers)
    }

    /// Make every disable of the endpoint currently enabled at
    /// `address` fail with EIO.
    pub fn refuse_disable(&self, address: u8) {
        if let Some(ep) = self.lock().endpoint_mut(address) {
            ep.refuse_disable = true;
        }
    }

    fn record(&self, op: Op) {
        trace!("emulated: {:?}", op);
        self.lock().ops.push(op);
    }
}

impl Transport for EmulatedChannel {
    fn init(&self, driver: &str, device: &str, speed: UsbSpeed) -> Result<()> {
        self.record(Op::Init {
            driver: driver.to_string(),
            device: device.to_string(),
            speed,
        });
        Ok(())
    }

    fn run(&self) -> Result<()> {
        self.record(Op::Run);
        Ok(())
    }

    fn fetch_event(&self) -> Result<RawEvent> {
        let mut ch = self.lock();
        let (event, data) = ch.events.pop_front().ok_or(GadgetError::Channel {
            op: ChannelOp::EventFetch,
            errno: Errno::ENODATA,
        })?;
        if let Some(stale) = ch.data_stage.take() {
            trace!("emulated: dropping {} unread data stage bytes", stale.len());
        }
        ch.data_stage = data;
        Ok(event)
    }

    fn ep0_read(&self, buf: &mut [u8]) -> Result<usize> {
        let len = {
            let mut ch = self.lock();
            // a zero-length status read leaves the data stage alone
            match ch.data_stage.take() {
                Some(data) if !buf.is_empty() => {
                    let len = data.len().min(buf.len());
                    buf[..len].copy_from_slice(&data[..len]);
                    len
                }
                other => {
                    ch.data_stage = other;
                    0
                }
            }
        };
        self.record(Op::Ep0Read(len));
        Ok(len)
    }

    fn ep0_write(&self, data: &[u8]) -> Result<usize> {
        self.record(Op::Ep0Write(data.to_vec()));
        Ok(data.len())
    }

    fn ep0_stall(&self) -> Result<()> {
        self.record(Op::Ep0Stall);
        Ok(())
    }

    fn ep_enable(&self, desc: &EndpointDescriptor) -> Result<EndpointHandle> {
        let address = desc.address_byte();
        let handle = {
            let mut ch = self.lock();
            if ch.endpoint_mut(address).is_some_and(|ep| ep.enabled) {
                return Err(GadgetError::Channel {
                    op: ChannelOp::EpEnable,
                    errno: Errno::EBUSY,
                });
            }
            let handle = ch.next_handle;
            ch.next_handle += 1;
            let mut ep = EndpointImpl::new(address);
            ep.fail_writes = ch.pending_failures.remove(&address).unwrap_or(0);
            ch.endpoints.insert(handle, ep);
            handle
        };
        self.record(Op::EpEnable(address));
        Ok(EndpointHandle(handle))
    }

    fn ep_disable(&self, ep: EndpointHandle) -> Result<()> {
        {
            let mut ch = self.lock();
            // like raw-gadget, refuse while a transfer is queued
            let errno = match ch.endpoints.get_mut(&ep.0) {
                Some(e) if e.enabled && e.refuse_disable => Some(Errno::EIO),
                Some(e) if e.enabled && e.readers > 0 => Some(Errno::EBUSY),
                Some(e) if e.enabled => {
                    e.enabled = false;
                    None
                }
                _ => Some(Errno::EINVAL),
            };
            if let Some(errno) = errno {
                return Err(GadgetError::Channel {
                    op: ChannelOp::EpDisable,
                    errno,
                });
            }
        }
        self.shared.changed.notify_all();
        self.record(Op::EpDisable(ep));
        Ok(())
    }

    fn ep_read(&self, ep: EndpointHandle, buf: &mut [u8]) -> core::result::Result<usize, TransferError> {
        let mut ch = self.lock();
        loop {
            let e = match ch.endpoints.get_mut(&ep.0) {
                Some(e) if e.enabled => e,
                _ => return Err(TransferError::Invalidated(Errno::ESHUTDOWN)),
            };

            if let Some(data) = e.from_host.pop_front() {
                let len = data.len().min(buf.len());
                buf[..len].copy_from_slice(&data[..len]);
                return Ok(len);
            }
            if e.woken {
                e.woken = false;
                return Err(TransferError::Failed(Errno::EINTR));
            }

            e.readers += 1;
            ch = self
                .shared
                .changed
                .wait(ch)
                .unwrap_or_else(PoisonError::into_inner);
            if let Some(e) = ch.endpoints.get_mut(&ep.0) {
                e.readers -= 1;
            }
        }
    }

    fn ep_write(&self, ep: EndpointHandle, data: &[u8]) -> core::result::Result<usize, TransferError> {
        let mut ch = self.lock();
        let e = match ch.endpoints.get_mut(&ep.0) {
            Some(e) if e.enabled => e,
            _ => return Err(TransferError::Invalidated(Errno::ESHUTDOWN)),
        };

        if e.fail_writes > 0 {
            e.fail_writes -= 1;
            return Err(TransferError::Failed(Errno::EAGAIN));
        }

        e.to_host.push_back(data.to_vec());
        drop(ch);
        self.shared.changed.notify_all();
        Ok(data.len())
    }

    fn ep_wake(&self, ep: EndpointHandle, _worker: Pthread) {
        if let Some(e) = self.lock().endpoints.get_mut(&ep.0) {
            e.woken = true;
        }
        self.shared.changed.notify_all();
    }

    fn configure(&self) -> Result<()> {
        self.record(Op::Configure);
        Ok(())
    }

    fn vbus_draw(&self, milliamps: u32) -> Result<()> {
        self.record(Op::VbusDraw(milliamps));
        Ok(())
    }

    fn eps_info(&self) -> Result<Vec<EndpointInfo>> {
        Ok(self.lock().eps_info.clone())
    }

    fn ep_set_halt(&self, ep: EndpointHandle) -> Result<()> {
        self.record(Op::EpSetHalt(ep));
        Ok(())
    }

    fn ep_clear_halt(&self, ep: EndpointHandle) -> Result<()> {
        self.record(Op::EpClearHalt(ep));
        Ok(())
    }

    fn ep_set_wedge(&self, ep: EndpointHandle) -> Result<()> {
        self.record(Op::EpSetWedge(ep));
        Ok(())
    }
}
