//! Device state shared between the dispatcher and endpoint
//! workers.
//!
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Device lifecycle, as seen by the dispatcher.
///
/// SET_ADDRESS is handled by the kernel, so `Addressed` is only
/// entered when a configuration is cleared with
/// SET_CONFIGURATION(0).
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default)]
pub enum DeviceState {
    /// Not connected to a host.
    #[default]
    Unattached,
    /// Gadget is running, no host yet.
    Powered,
    /// After connect or bus reset.
    Default,
    /// Address assigned, no configuration.
    Addressed,
    /// SET_CONFIGURATION with a non-zero value succeeded.
    Configured,
    /// Bus suspended.
    Suspended,
}

#[derive(Debug, Default)]
struct Inner {
    state: DeviceState,
    suspended: bool,
    configuration: u8,
    remote_wakeup: bool,
    halted: BTreeSet<u8>,
    alt_settings: BTreeMap<u8, u8>,
}

/// Shared, synchronized device state.
///
/// Updates are rare (configuration changes, resets) so one
/// coarse lock covers everything.
#[derive(Debug, Clone, Default)]
pub struct SharedState {
    inner: Arc<Mutex<Inner>>,
}

impl SharedState {
    /// Fresh state, `Unattached`.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current lifecycle state. Reports `Suspended` while the bus
    /// is suspended.
    pub fn state(&self) -> DeviceState {
        let inner = self.lock();
        if inner.suspended {
            DeviceState::Suspended
        } else {
            inner.state
        }
    }

    /// State ignoring suspension.
    pub fn base_state(&self) -> DeviceState {
        self.lock().state
    }

    /// `true` once SET_CONFIGURATION selected a configuration.
    pub fn is_configured(&self) -> bool {
        self.lock().state == DeviceState::Configured
    }

    /// `true` while the bus is suspended.
    pub fn is_suspended(&self) -> bool {
        self.lock().suspended
    }

    /// Current configuration value, 0 if not configured.
    pub fn configuration(&self) -> u8 {
        self.lock().configuration
    }

    /// Remote wakeup enabled by the host.
    pub fn remote_wakeup(&self) -> bool {
        self.lock().remote_wakeup
    }

    /// Endpoint halted by SET_FEATURE(ENDPOINT_HALT).
    pub fn is_halted(&self, address: u8) -> bool {
        self.lock().halted.contains(&address)
    }

    /// Alternate setting of an interface.
    pub fn alt_setting(&self, interface: u8) -> u8 {
        self.lock()
            .alt_settings
            .get(&interface)
            .copied()
            .unwrap_or(0)
    }

    pub(crate) fn set_suspended(&self, suspended: bool) {
        self.lock().suspended = suspended;
    }

    pub(crate) fn set_remote_wakeup(&self, enabled: bool) {
        self.lock().remote_wakeup = enabled;
    }

    pub(crate) fn set_halted(&self, address: u8, halted: bool) {
        let mut inner = self.lock();
        if halted {
            inner.halted.insert(address);
        } else {
            inner.halted.remove(&address);
        }
    }

    pub(crate) fn set_alt_setting(&self, interface: u8, alt: u8) {
        self.lock().alt_settings.insert(interface, alt);
    }

    /// Select `value`: non-zero means `Configured`, zero goes back
    /// to `Addressed`. Halts and alternate settings start over.
    pub(crate) fn set_configuration(&self, value: u8) {
        let mut inner = self.lock();
        inner.configuration = value;
        inner.state = if value == 0 {
            DeviceState::Addressed
        } else {
            DeviceState::Configured
        };
        inner.halted.clear();
        inner.alt_settings.clear();
    }

    /// Forget everything and enter `state`.
    pub(crate) fn reset(&self, state: DeviceState) {
        *self.lock() = Inner {
            state,
            ..Inner::default()
        };
    }
}
