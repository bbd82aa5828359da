//! # Devices
//!
//! A [`Device`] wraps one open kernel connection together with the tables
//! that keep buffer objects unique on it.
//!
//! Devices are deduplicated per connection through a [`DeviceRegistry`].
//! The registry and the buffer tables only hold weak references; the last
//! [`Device`] clone (every live buffer object holds one) tears the entry down.

use core::fmt;
use std::sync::{Arc, Weak};

use etna_core::{ConnectionId, FlinkName, GemHandle};
use etna_drm::KernelGateway;
use hashbrown::HashMap;
use spin::{Lazy, Mutex};

use crate::bo::BoInner;

type DeviceTable = Mutex<HashMap<ConnectionId, Weak<DeviceInner>>>;

static GLOBAL: Lazy<DeviceRegistry> = Lazy::new(DeviceRegistry::new);

// =============================================================================
// DEVICE REGISTRY
// =============================================================================

/// Connection → device table
///
/// At most one live [`Device`] exists per connection id in one registry.
pub struct DeviceRegistry {
    table: Arc<DeviceTable>,
}

impl DeviceRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            table: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// The process-wide registry
    pub fn global() -> &'static DeviceRegistry {
        &GLOBAL
    }

    /// Device for `gateway`'s connection, created on first use
    ///
    /// When a device already exists for the connection id, it is returned
    /// and `gateway` is dropped.
    pub fn open(&self, gateway: Arc<dyn KernelGateway>) -> Device {
        let id = gateway.connection_id();
        let mut table = self.table.lock();

        if let Some(inner) = table.get(&id).and_then(Weak::upgrade) {
            return Device { inner };
        }

        log::debug!("new device for connection {}", id.0);
        let inner = Arc::new(DeviceInner {
            gateway,
            id,
            tables: Mutex::new(BoTables::default()),
            registry: Arc::clone(&self.table),
        });
        table.insert(id, Arc::downgrade(&inner));
        Device { inner }
    }

    /// Look up the live device for a connection id
    pub fn get(&self, id: ConnectionId) -> Option<Device> {
        let table = self.table.lock();
        table
            .get(&id)
            .and_then(Weak::upgrade)
            .map(|inner| Device { inner })
    }

    /// Number of live devices
    pub fn len(&self) -> usize {
        self.table
            .lock()
            .values()
            .filter(|w| w.strong_count() > 0)
            .count()
    }

    /// Whether no device is live
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for DeviceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceRegistry")
            .field("devices", &self.table.lock().len())
            .finish()
    }
}

// =============================================================================
// BUFFER TABLES
// =============================================================================

/// Weak back references from kernel identifiers to live buffer objects
#[derive(Default)]
pub(crate) struct BoTables {
    pub(crate) handles: HashMap<GemHandle, Weak<BoInner>>,
    pub(crate) names: HashMap<FlinkName, Weak<BoInner>>,
}

// =============================================================================
// DEVICE
// =============================================================================

pub(crate) struct DeviceInner {
    gateway: Arc<dyn KernelGateway>,
    id: ConnectionId,
    /// Held across every import and every final handle close
    pub(crate) tables: Mutex<BoTables>,
    registry: Arc<DeviceTable>,
}

impl Drop for DeviceInner {
    fn drop(&mut self) {
        let me: *const DeviceInner = self;
        let mut table = self.registry.lock();
        // A fresh device may already have replaced our entry.
        if table.get(&self.id).is_some_and(|w| w.as_ptr() == me) {
            table.remove(&self.id);
        }
        log::debug!("device for connection {} closed", self.id.0);
    }
}

/// One open connection to the kernel driver
///
/// Cloning shares the device.
#[derive(Clone)]
pub struct Device {
    pub(crate) inner: Arc<DeviceInner>,
}

impl Device {
    /// Device for `gateway` from the process-wide registry
    pub fn open(gateway: Arc<dyn KernelGateway>) -> Self {
        DeviceRegistry::global().open(gateway)
    }

    /// Kernel connection
    #[inline]
    pub fn gateway(&self) -> &dyn KernelGateway {
        &*self.inner.gateway
    }

    /// Connection id
    #[inline]
    pub fn connection_id(&self) -> ConnectionId {
        self.inner.id
    }

    /// Whether two values refer to the same device
    pub fn ptr_eq(&self, other: &Device) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Number of live buffer objects registered on this device
    pub fn live_bos(&self) -> usize {
        self.inner
            .tables
            .lock()
            .handles
            .values()
            .filter(|w| w.strong_count() > 0)
            .count()
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("connection", &self.inner.id.0)
            .field("gateway", &self.inner.gateway)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use etna_drm::SimGpu;

    #[test]
    fn test_same_connection_same_device() {
        let gpu = SimGpu::single_core();
        let file: Arc<dyn KernelGateway> = Arc::new(gpu.open());
        let registry = DeviceRegistry::new();

        let a = registry.open(Arc::clone(&file));
        let b = registry.open(Arc::clone(&file));
        assert!(a.ptr_eq(&b));
        assert_eq!(registry.len(), 1);

        let other = registry.open(Arc::new(gpu.open()));
        assert!(!other.ptr_eq(&a));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_last_clone_removes_entry() {
        let gpu = SimGpu::single_core();
        let registry = DeviceRegistry::new();
        let dev = registry.open(Arc::new(gpu.open()));
        let id = dev.connection_id();
        let clone = dev.clone();

        drop(dev);
        assert!(registry.get(id).is_some());
        drop(clone);
        assert!(registry.get(id).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_reopen_after_close() {
        let gpu = SimGpu::single_core();
        let file: Arc<dyn KernelGateway> = Arc::new(gpu.open());
        let registry = DeviceRegistry::new();

        let first = registry.open(Arc::clone(&file));
        drop(first);
        let second = registry.open(Arc::clone(&file));
        assert_eq!(registry.len(), 1);
        assert_eq!(second.connection_id(), file.connection_id());
    }

    #[test]
    fn test_concurrent_open() {
        let gpu = SimGpu::single_core();
        let file: Arc<dyn KernelGateway> = Arc::new(gpu.open());
        let registry = Arc::new(DeviceRegistry::new());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let file = Arc::clone(&file);
                std::thread::spawn(move || registry.open(file))
            })
            .collect();
        let devices: Vec<Device> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(devices.iter().all(|d| d.ptr_eq(&devices[0])));
    }
}
