//! `Transport` over the Linux USB Raw Gadget interface.
//!
//! See: <https://github.com/xairy/raw-gadget>
//!
//! Header: <https://github.com/torvalds/linux/blob/master/include/uapi/linux/usb/raw_gadget.h>
//!
use std::fs::{File, OpenOptions};
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::Path;

use log::debug;
use nix::libc::c_int;
use nix::sys::ioctl::ioctl_param_type;

use super::{
    ChannelOp, EndpointCaps, EndpointHandle, EndpointInfo, Transport, TransferError, EP_ADDR_ANY,
    RAW_GADGET_PATH,
};
use crate::event::RawEvent;
use crate::usbdata::{descriptor_type, EndpointDescriptor, UsbSpeed, ENDPOINT_DESCRIPTOR_SIZE};
use crate::{GadgetError, Result};

const UDC_NAME_LENGTH_MAX: usize = 128;
const EPS_NUM_MAX: usize = 30;
const EP_NAME_MAX: usize = 16;
const EVENT_DATA_MAX: usize = 256;

#[repr(C)]
pub struct Init {
    driver_name: [u8; UDC_NAME_LENGTH_MAX],
    device_name: [u8; UDC_NAME_LENGTH_MAX],
    speed: u8,
}

fn udc_name(name: &str) -> Result<[u8; UDC_NAME_LENGTH_MAX]> {
    let bytes = name.as_bytes();
    // room for the terminating NUL
    if bytes.len() >= UDC_NAME_LENGTH_MAX || bytes.contains(&0) {
        return Err(GadgetError::InvalidName(name.to_string()));
    }
    let mut out = [0u8; UDC_NAME_LENGTH_MAX];
    out[..bytes.len()].copy_from_slice(bytes);
    Ok(out)
}

impl Init {
    fn new(driver: &str, device: &str, speed: UsbSpeed) -> Result<Self> {
        Ok(Self {
            driver_name: udc_name(driver)?,
            device_name: udc_name(device)?,
            speed: speed as u8,
        })
    }
}

/// `struct usb_raw_event` without the payload, it sizes the
/// ioctl number.
#[repr(C)]
pub struct EventHeader {
    kind: u32,
    length: u32,
}

#[repr(C)]
struct EventBuf {
    header: EventHeader,
    data: [u8; EVENT_DATA_MAX],
}

/// `struct usb_raw_ep_io` without the payload.
#[repr(C)]
pub struct EpIoHeader {
    ep: u16,
    flags: u16,
    length: u32,
}

const EP_IO_HEADER_SIZE: usize = std::mem::size_of::<EpIoHeader>();

/// `struct usb_raw_ep_io` followed by `len` payload bytes,
/// kept in `u32` words so the header stays aligned.
struct EpIoBuf {
    words: Vec<u32>,
    len: usize,
}

impl EpIoBuf {
    fn new(ep: u16, len: usize) -> Self {
        let mut io = EpIoBuf {
            words: vec![0; (EP_IO_HEADER_SIZE + len).div_ceil(4)],
            len,
        };
        let bytes = io.bytes_mut();
        bytes[0..2].copy_from_slice(&ep.to_ne_bytes());
        bytes[4..8].copy_from_slice(&(len as u32).to_ne_bytes());
        io
    }

    fn with_data(ep: u16, data: &[u8]) -> Self {
        let mut io = EpIoBuf::new(ep, data.len());
        io.data_mut().copy_from_slice(data);
        io
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        let len = self.words.len() * 4;
        // SAFETY: `words` owns `len` initialized bytes and u8 has no
        // alignment requirement.
        unsafe { std::slice::from_raw_parts_mut(self.words.as_mut_ptr().cast::<u8>(), len) }
    }

    fn data_mut(&mut self) -> &mut [u8] {
        let len = self.len;
        &mut self.bytes_mut()[EP_IO_HEADER_SIZE..EP_IO_HEADER_SIZE + len]
    }

    fn as_mut_ptr(&mut self) -> *mut EpIoHeader {
        self.words.as_mut_ptr().cast()
    }
}

/// `struct usb_endpoint_descriptor`, including the audio
/// extension bytes the kernel structure carries.
#[repr(C, packed)]
pub struct UsbEndpointDescriptor {
    b_length: u8,
    b_descriptor_type: u8,
    b_endpoint_address: u8,
    bm_attributes: u8,
    w_max_packet_size: u16,
    b_interval: u8,
    b_refresh: u8,
    b_synch_address: u8,
}

impl From<&EndpointDescriptor> for UsbEndpointDescriptor {
    fn from(desc: &EndpointDescriptor) -> Self {
        UsbEndpointDescriptor {
            b_length: ENDPOINT_DESCRIPTOR_SIZE,
            b_descriptor_type: descriptor_type::ENDPOINT,
            b_endpoint_address: desc.address_byte(),
            bm_attributes: desc.transfer as u8,
            w_max_packet_size: desc.max_packet_size.to_le(),
            b_interval: desc.interval,
            b_refresh: 0,
            b_synch_address: 0,
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct EpInfoRaw {
    name: [u8; EP_NAME_MAX],
    addr: u32,
    caps: u32,
    maxpacket_limit: u16,
    max_streams: u16,
    reserved: u32,
}

#[repr(C)]
pub struct EpsInfo {
    eps: [EpInfoRaw; EPS_NUM_MAX],
}

impl From<&EpInfoRaw> for EndpointInfo {
    fn from(raw: &EpInfoRaw) -> Self {
        let end = raw.name.iter().position(|&b| b == 0).unwrap_or(EP_NAME_MAX);
        EndpointInfo {
            name: String::from_utf8_lossy(&raw.name[..end]).into_owned(),
            address: if raw.addr == EP_ADDR_ANY {
                None
            } else {
                Some(raw.addr as u8)
            },
            caps: EndpointCaps::from_bits_truncate(raw.caps),
            max_packet_limit: raw.maxpacket_limit,
            max_streams: raw.max_streams,
        }
    }
}

mod ioctl {
    use super::{EpIoHeader, EpsInfo, EventHeader, Init, UsbEndpointDescriptor};

    const MAGIC: u8 = b'U';

    nix::ioctl_write_ptr!(init, MAGIC, 0, Init);
    nix::ioctl_none!(run, MAGIC, 1);
    nix::ioctl_read!(event_fetch, MAGIC, 2, EventHeader);
    nix::ioctl_write_ptr!(ep0_write, MAGIC, 3, EpIoHeader);
    nix::ioctl_readwrite!(ep0_read, MAGIC, 4, EpIoHeader);
    nix::ioctl_write_ptr!(ep_enable, MAGIC, 5, UsbEndpointDescriptor);
    nix::ioctl_write_int!(ep_disable, MAGIC, 6);
    nix::ioctl_write_ptr!(ep_write, MAGIC, 7, EpIoHeader);
    nix::ioctl_readwrite!(ep_read, MAGIC, 8, EpIoHeader);
    nix::ioctl_none!(configure, MAGIC, 9);
    nix::ioctl_write_int!(vbus_draw, MAGIC, 10);
    nix::ioctl_read!(eps_info, MAGIC, 11, EpsInfo);
    nix::ioctl_none!(ep0_stall, MAGIC, 12);
    nix::ioctl_write_int!(ep_set_halt, MAGIC, 13);
    nix::ioctl_write_int!(ep_clear_halt, MAGIC, 14);
    nix::ioctl_write_int!(ep_set_wedge, MAGIC, 15);
}

fn check(op: ChannelOp, res: nix::Result<c_int>) -> Result<c_int> {
    res.map_err(|errno| GadgetError::Channel { op, errno })
}

/// The `/dev/raw-gadget` channel.
pub struct RawGadget {
    file: File,
}

impl RawGadget {
    /// Open `/dev/raw-gadget`.
    pub fn open() -> Result<Self> {
        Self::open_path(RAW_GADGET_PATH)
    }

    /// Open a raw-gadget node at a non-default path.
    pub fn open_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|source| GadgetError::Open {
                path: path.display().to_string(),
                source,
            })?;

        Ok(Self { file })
    }

    fn fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }

    fn ep_ctl(
        &self,
        op: ChannelOp,
        ep: EndpointHandle,
        f: unsafe fn(c_int, ioctl_param_type) -> nix::Result<c_int>,
    ) -> Result<()> {
        // SAFETY: the argument is passed by value.
        check(op, unsafe { f(self.fd(), ep.0 as ioctl_param_type) }).map(|_| ())
    }
}

impl Transport for RawGadget {
    fn init(&self, driver: &str, device: &str, speed: UsbSpeed) -> Result<()> {
        let arg = Init::new(driver, device, speed)?;
        // SAFETY: `arg` is a valid `struct usb_raw_init`.
        check(ChannelOp::Init, unsafe { ioctl::init(self.fd(), &arg) })?;
        Ok(())
    }

    fn run(&self) -> Result<()> {
        // SAFETY: no argument.
        check(ChannelOp::Run, unsafe { ioctl::run(self.fd()) })?;
        Ok(())
    }

    fn fetch_event(&self) -> Result<RawEvent> {
        let mut buf = EventBuf {
            header: EventHeader {
                kind: 0,
                length: EVENT_DATA_MAX as u32,
            },
            data: [0; EVENT_DATA_MAX],
        };
        let ptr = (&mut buf as *mut EventBuf).cast::<EventHeader>();
        // SAFETY: `header.length` tells the kernel how many payload
        // bytes follow the header in `buf`.
        check(ChannelOp::EventFetch, unsafe {
            ioctl::event_fetch(self.fd(), ptr)
        })?;

        let len = (buf.header.length as usize).min(EVENT_DATA_MAX);
        Ok(RawEvent::new(buf.header.kind, &buf.data[..len]))
    }

    fn ep0_read(&self, buf: &mut [u8]) -> Result<usize> {
        let mut io = EpIoBuf::new(0, buf.len());
        // SAFETY: `io` holds a header followed by `buf.len()` bytes.
        let rv = check(ChannelOp::Ep0Read, unsafe {
            ioctl::ep0_read(self.fd(), io.as_mut_ptr())
        })?;
        let len = (rv as usize).min(buf.len());
        buf[..len].copy_from_slice(&io.data_mut()[..len]);
        Ok(len)
    }

    fn ep0_write(&self, data: &[u8]) -> Result<usize> {
        let mut io = EpIoBuf::with_data(0, data);
        // SAFETY: `io` holds a header followed by `data.len()` bytes.
        let rv = check(ChannelOp::Ep0Write, unsafe {
            ioctl::ep0_write(self.fd(), io.as_mut_ptr())
        })?;
        Ok(rv as usize)
    }

    fn ep0_stall(&self) -> Result<()> {
        // SAFETY: no argument.
        check(ChannelOp::Ep0Stall, unsafe { ioctl::ep0_stall(self.fd()) })?;
        Ok(())
    }

    fn ep_enable(&self, desc: &EndpointDescriptor) -> Result<EndpointHandle> {
        let raw = UsbEndpointDescriptor::from(desc);
        // SAFETY: `raw` is a valid `struct usb_endpoint_descriptor`.
        let rv = check(ChannelOp::EpEnable, unsafe {
            ioctl::ep_enable(self.fd(), &raw)
        })?;
        debug!("ep 0x{:02x} enabled as #{}", desc.address_byte(), rv);
        Ok(EndpointHandle(rv as u32))
    }

    fn ep_disable(&self, ep: EndpointHandle) -> Result<()> {
        self.ep_ctl(ChannelOp::EpDisable, ep, ioctl::ep_disable)
    }

    fn ep_read(&self, ep: EndpointHandle, buf: &mut [u8]) -> core::result::Result<usize, TransferError> {
        let mut io = EpIoBuf::new(ep.0 as u16, buf.len());
        // SAFETY: `io` holds a header followed by `buf.len()` bytes.
        let rv = unsafe { ioctl::ep_read(self.fd(), io.as_mut_ptr()) }?;
        let len = (rv as usize).min(buf.len());
        buf[..len].copy_from_slice(&io.data_mut()[..len]);
        Ok(len)
    }

    fn ep_write(&self, ep: EndpointHandle, data: &[u8]) -> core::result::Result<usize, TransferError> {
        let mut io = EpIoBuf::with_data(ep.0 as u16, data);
        // SAFETY: `io` holds a header followed by `data.len()` bytes.
        let rv = unsafe { ioctl::ep_write(self.fd(), io.as_mut_ptr()) }?;
        Ok(rv as usize)
    }

    fn configure(&self) -> Result<()> {
        // SAFETY: no argument.
        check(ChannelOp::Configure, unsafe { ioctl::configure(self.fd()) })?;
        Ok(())
    }

    fn vbus_draw(&self, milliamps: u32) -> Result<()> {
        // SAFETY: the argument is passed by value.
        check(ChannelOp::VbusDraw, unsafe {
            ioctl::vbus_draw(self.fd(), milliamps as ioctl_param_type)
        })?;
        Ok(())
    }

    fn eps_info(&self) -> Result<Vec<EndpointInfo>> {
        let mut info = EpsInfo {
            eps: [EpInfoRaw {
                name: [0; EP_NAME_MAX],
                addr: 0,
                caps: 0,
                maxpacket_limit: 0,
                max_streams: 0,
                reserved: 0,
            }; EPS_NUM_MAX],
        };
        // SAFETY: `info` is a valid `struct usb_raw_eps_info`.
        let num = check(ChannelOp::EpsInfo, unsafe {
            ioctl::eps_info(self.fd(), &mut info)
        })?;

        let num = (num as usize).min(EPS_NUM_MAX);
        Ok(info.eps[..num].iter().map(EndpointInfo::from).collect())
    }

    fn ep_set_halt(&self, ep: EndpointHandle) -> Result<()> {
        self.ep_ctl(ChannelOp::EpSetHalt, ep, ioctl::ep_set_halt)
    }

    fn ep_clear_halt(&self, ep: EndpointHandle) -> Result<()> {
        self.ep_ctl(ChannelOp::EpClearHalt, ep, ioctl::ep_clear_halt)
    }

    fn ep_set_wedge(&self, ep: EndpointHandle) -> Result<()> {
        self.ep_ctl(ChannelOp::EpSetWedge, ep, ioctl::ep_set_wedge)
    }
}
