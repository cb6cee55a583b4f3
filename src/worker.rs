//! Endpoint I/O Workers.
//!
//! One thread per enabled non-control endpoint. IN workers pull
//! chunks from a [`Source`] and write them to the endpoint, OUT
//! workers read from the endpoint and hand data to a [`Sink`].
//! Workers stop when cancelled, when their endpoint is
//! invalidated, or when their source runs dry.
//!
use std::collections::BTreeMap;
use std::os::unix::thread::JoinHandleExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError};
use log::{debug, error, info, warn};
use nix::errno::Errno;
use usb_device::UsbDirection;

use crate::state::SharedState;
use crate::transport::{EndpointHandle, Transport, TransferError};
use crate::usbdata::EndpointDescriptor;
use crate::{GadgetError, Result};

/// Stop flag shared between the dispatcher and one worker.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// A token that is not cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the worker to stop.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// `true` once `cancel()` was called.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Device-class data for an IN endpoint.
///
/// Implementations may block, but must return `None` soon after
/// `cancel` is cancelled so the worker can be joined.
pub trait Source: Send {
    /// Next chunk to send. `None` ends the worker.
    fn next_chunk(&mut self, cancel: &CancelToken) -> Option<Vec<u8>>;
}

impl<F> Source for F
where
    F: FnMut(&CancelToken) -> Option<Vec<u8>> + Send,
{
    fn next_chunk(&mut self, cancel: &CancelToken) -> Option<Vec<u8>> {
        self(cancel)
    }
}

/// Device-class consumer of an OUT endpoint.
pub trait Sink: Send {
    /// Data received from the host.
    fn deliver(&mut self, data: &[u8]);
}

impl<F> Sink for F
where
    F: FnMut(&[u8]) + Send,
{
    fn deliver(&mut self, data: &[u8]) {
        self(data)
    }
}

const CHANNEL_POLL_INTERVAL: Duration = Duration::from_millis(50);
const WAKE_INTERVAL: Duration = Duration::from_millis(10);
const SLOW_STOP: Duration = Duration::from_secs(1);

/// A [`Source`] fed through a channel.
///
/// Waits for chunks in short slices so cancellation is noticed.
/// The worker ends when every sender is dropped.
pub struct ChannelSource {
    rx: Receiver<Vec<u8>>,
    poll: Duration,
}

impl ChannelSource {
    /// Wrap a receiver.
    pub fn new(rx: Receiver<Vec<u8>>) -> Self {
        ChannelSource {
            rx,
            poll: CHANNEL_POLL_INTERVAL,
        }
    }
}

impl Source for ChannelSource {
    fn next_chunk(&mut self, cancel: &CancelToken) -> Option<Vec<u8>> {
        while !cancel.is_cancelled() {
            match self.rx.recv_timeout(self.poll) {
                Ok(chunk) => return Some(chunk),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return None,
            }
        }
        None
    }
}

/// What a worker does with its endpoint.
pub enum EndpointIo {
    /// Device-to-host data.
    In(Box<dyn Source>),
    /// Host-to-device data.
    Out(Box<dyn Sink>),
}

impl EndpointIo {
    /// IN worker from any source.
    pub fn source(source: impl Source + 'static) -> Self {
        EndpointIo::In(Box::new(source))
    }

    /// OUT worker from any sink.
    pub fn sink(sink: impl Sink + 'static) -> Self {
        EndpointIo::Out(Box::new(sink))
    }

    fn direction(&self) -> UsbDirection {
        match self {
            EndpointIo::In(_) => UsbDirection::In,
            EndpointIo::Out(_) => UsbDirection::Out,
        }
    }
}

/// Why a worker ended.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum WorkerExit {
    /// Stopped by the dispatcher.
    Cancelled,
    /// The source returned `None`.
    SourceDone,
    /// The endpoint went away under a pending transfer.
    Invalidated,
    /// An OUT transfer failed.
    ReadFailed(Errno),
    /// The worker thread panicked.
    Panicked,
}

/// Retry and buffer limits of workers.
#[derive(Debug, Clone, Copy)]
pub struct WorkerPolicy {
    /// Retries of a failed IN transfer before the chunk is dropped.
    pub write_retries: u32,
    /// Largest single transfer.
    pub max_transfer: usize,
}

struct Running {
    cancel: CancelToken,
    thread: JoinHandle<WorkerExit>,
}

impl Running {
    /// Wake the cancelled worker until it returns, then join it.
    fn join<T: Transport>(self, transport: &T, address: u8, handle: EndpointHandle) -> WorkerExit {
        let started = Instant::now();
        let mut warned = false;

        while !self.thread.is_finished() {
            transport.ep_wake(handle, self.thread.as_pthread_t());
            thread::sleep(WAKE_INTERVAL);
            if !warned && started.elapsed() > SLOW_STOP {
                warn!("ep 0x{:02x}: worker is slow to stop", address);
                warned = true;
            }
        }
        self.thread.join().unwrap_or(WorkerExit::Panicked)
    }
}

struct EnabledEndpoint {
    handle: EndpointHandle,
    worker: Option<Running>,
}

/// The authoritative list of enabled endpoints and their
/// workers, keyed by endpoint address.
#[derive(Default)]
pub struct Workers {
    endpoints: Mutex<BTreeMap<u8, EnabledEndpoint>>,
}

impl Workers {
    /// Empty roster.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<u8, EnabledEndpoint>> {
        self.endpoints.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Addresses of enabled endpoints.
    pub fn enabled(&self) -> Vec<u8> {
        self.lock().keys().copied().collect()
    }

    /// Addresses of endpoints with a live worker thread.
    pub fn running(&self) -> Vec<u8> {
        self.lock()
            .iter()
            .filter(|(_, ep)| {
                ep.worker
                    .as_ref()
                    .is_some_and(|w| !w.thread.is_finished())
            })
            .map(|(addr, _)| *addr)
            .collect()
    }

    /// Handle of an enabled endpoint.
    pub fn handle(&self, address: u8) -> Option<EndpointHandle> {
        self.lock().get(&address).map(|ep| ep.handle)
    }

    /// Record an enabled endpoint and start its worker, if any.
    ///
    /// The caller must have stopped any previous user of
    /// `desc.address`.
    pub(crate) fn start<T: Transport>(
        &self,
        transport: &Arc<T>,
        state: &SharedState,
        desc: EndpointDescriptor,
        handle: EndpointHandle,
        io: Option<EndpointIo>,
        policy: WorkerPolicy,
    ) -> Result<()> {
        let address = desc.address_byte();

        let worker = match io {
            Some(io) => {
                if io.direction() != desc.direction() {
                    warn!(
                        "ep 0x{:02x}: worker direction does not match the endpoint, not started",
                        address
                    );
                    None
                } else {
                    Some(spawn(transport, state, desc, handle, io, policy)?)
                }
            }
            None => None,
        };

        let old = self
            .lock()
            .insert(address, EnabledEndpoint { handle, worker });
        debug_assert!(old.is_none(), "endpoint 0x{:02x} enabled twice", address);
        Ok(())
    }

    /// Cancel every worker, join the threads and disable every
    /// endpoint. Returns how each worker ended.
    ///
    /// All workers are joined and all endpoints get a disable
    /// attempt even when some disable fails; the first such
    /// failure is returned afterwards.
    pub(crate) fn stop_all<T: Transport>(&self, transport: &T) -> Result<Vec<(u8, WorkerExit)>> {
        let endpoints = std::mem::take(&mut *self.lock());

        for ep in endpoints.values() {
            if let Some(w) = &ep.worker {
                w.cancel.cancel();
            }
        }

        // An endpoint with a queued transfer refuses to go away,
        // those are retried once their worker is joined.
        let mut busy = Vec::new();
        for (address, ep) in endpoints.iter() {
            debug!("ep 0x{:02x}: disabling {}", address, ep.handle);
            if let Err(err) = transport.ep_disable(ep.handle) {
                debug!("ep 0x{:02x}: disable deferred: {}", address, err);
                busy.push((*address, ep.handle));
            }
        }

        let mut exits = Vec::new();
        for (address, ep) in endpoints {
            if let Some(w) = ep.worker {
                let exit = w.join(transport, address, ep.handle);
                info!("ep 0x{:02x}: worker stopped: {:?}", address, exit);
                exits.push((address, exit));
            }
        }

        let mut failed = None;
        for (address, handle) in busy {
            if let Err(err) = transport.ep_disable(handle) {
                error!("ep 0x{:02x}: disable failed: {}", address, err);
                failed.get_or_insert(err);
            }
        }

        match failed {
            Some(err) => Err(err),
            None => Ok(exits),
        }
    }
}

fn spawn<T: Transport>(
    transport: &Arc<T>,
    state: &SharedState,
    desc: EndpointDescriptor,
    handle: EndpointHandle,
    io: EndpointIo,
    policy: WorkerPolicy,
) -> Result<Running> {
    let cancel = CancelToken::new();
    let ctx = WorkerCtx {
        transport: Arc::clone(transport),
        state: state.clone(),
        address: desc.address_byte(),
        handle,
        cancel: cancel.clone(),
        policy: WorkerPolicy {
            max_transfer: policy.max_transfer.max(desc.max_packet_size as usize).max(1),
            ..policy
        },
    };

    let thread = thread::Builder::new()
        .name(format!("ep-0x{:02x}", ctx.address))
        .spawn(move || match io {
            EndpointIo::In(source) => ctx.run_in(source),
            EndpointIo::Out(sink) => ctx.run_out(sink),
        })
        .map_err(GadgetError::Spawn)?;

    info!("ep 0x{:02x}: worker started on {}", desc.address_byte(), handle);
    Ok(Running { cancel, thread })
}

struct WorkerCtx<T> {
    transport: Arc<T>,
    state: SharedState,
    address: u8,
    handle: EndpointHandle,
    cancel: CancelToken,
    policy: WorkerPolicy,
}

impl<T: Transport> WorkerCtx<T> {
    fn stopped(&self, exit: WorkerExit) -> WorkerExit {
        if self.cancel.is_cancelled() {
            WorkerExit::Cancelled
        } else {
            exit
        }
    }

    fn run_in(&self, mut source: Box<dyn Source>) -> WorkerExit {
        loop {
            if self.cancel.is_cancelled() {
                return WorkerExit::Cancelled;
            }

            let chunk = match source.next_chunk(&self.cancel) {
                Some(chunk) => chunk,
                None => return self.stopped(WorkerExit::SourceDone),
            };

            // an empty chunk is sent as a zero-length packet
            let parts: Vec<&[u8]> = if chunk.is_empty() {
                vec![&chunk[..]]
            } else {
                chunk.chunks(self.policy.max_transfer).collect()
            };
            for part in parts {
                if let Err(exit) = self.send(part) {
                    return exit;
                }
            }
        }
    }

    /// Write one transfer, retrying transient failures. A chunk
    /// that keeps failing is dropped.
    fn send(&self, data: &[u8]) -> core::result::Result<(), WorkerExit> {
        let mut attempt = 0;

        loop {
            if self.cancel.is_cancelled() {
                return Err(WorkerExit::Cancelled);
            }
            if self.state.is_suspended() {
                debug!("ep 0x{:02x}: writing while suspended", self.address);
            }

            match self.transport.ep_write(self.handle, data) {
                Ok(len) => {
                    if len < data.len() {
                        warn!(
                            "ep 0x{:02x}: short write, {} of {} bytes",
                            self.address,
                            len,
                            data.len()
                        );
                    } else {
                        debug!("ep 0x{:02x}: wrote {} bytes", self.address, len);
                    }
                    return Ok(());
                }
                Err(TransferError::Invalidated(errno)) => {
                    debug!("ep 0x{:02x}: write aborted: {}", self.address, errno);
                    return Err(self.stopped(WorkerExit::Invalidated));
                }
                Err(TransferError::Failed(Errno::EINTR)) => {
                    // woken without being cancelled, try again
                    continue;
                }
                Err(TransferError::Failed(errno)) => {
                    if self.cancel.is_cancelled() {
                        return Err(WorkerExit::Cancelled);
                    }
                    if attempt >= self.policy.write_retries {
                        warn!(
                            "ep 0x{:02x}: dropping {} bytes after {} attempts: {}",
                            self.address,
                            data.len(),
                            attempt + 1,
                            errno
                        );
                        return Ok(());
                    }
                    attempt += 1;
                    warn!(
                        "ep 0x{:02x}: write failed ({}), retry {}/{}",
                        self.address, errno, attempt, self.policy.write_retries
                    );
                }
            }
        }
    }

    fn run_out(&self, mut sink: Box<dyn Sink>) -> WorkerExit {
        let mut buf = vec![0u8; self.policy.max_transfer];

        loop {
            if self.cancel.is_cancelled() {
                return WorkerExit::Cancelled;
            }
            if self.state.is_suspended() {
                debug!("ep 0x{:02x}: reading while suspended", self.address);
            }

            match self.transport.ep_read(self.handle, &mut buf) {
                Ok(len) => {
                    debug!("ep 0x{:02x}: read {} bytes", self.address, len);
                    sink.deliver(&buf[..len]);
                }
                Err(_) if self.cancel.is_cancelled() => return WorkerExit::Cancelled,
                Err(TransferError::Failed(Errno::EINTR)) => continue,
                Err(TransferError::Invalidated(errno)) => {
                    debug!("ep 0x{:02x}: read aborted: {}", self.address, errno);
                    return WorkerExit::Invalidated;
                }
                Err(TransferError::Failed(errno)) => {
                    error!("ep 0x{:02x}: read failed: {}", self.address, errno);
                    return WorkerExit::ReadFailed(errno);
                }
            }
        }
    }
}
