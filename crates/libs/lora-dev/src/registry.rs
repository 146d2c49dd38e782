//! Table of live radio interfaces.
//!
//! The registry is the only owner of [`Interface`] objects. Everything
//! outside it (sockets, the notifier, drivers) refers to an
//! interface by its stable index and resolves it per operation, so an
//! interface can be unregistered while others still hold its index.
//! Registration, removal, and link transitions are serialized by an
//! admin mutex, which is what guarantees every subscriber sees
//! `Added → (LinkUp/LinkDown)* → Removed` per interface; lookups only
//! take the table's read lock.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use crate::buffer::PacketBuffer;
use crate::config::DeviceConfig;
use crate::engine::TransmitEngine;
use crate::error::DeviceError;
use crate::event::{LifecycleEvent, LifecycleNotifier, LinkChange};
use crate::transceiver::Transceiver;

/// Hardware family tag of an interface. Sockets only bind to
/// interfaces of their own family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HardwareKind {
    /// Raw LoRa modulation, the family this stack speaks.
    Lora,
    /// LoRaWAN-framed devices; registered by some drivers but not
    /// addressable through this socket family.
    LoraWan,
}

/// Interface counters, mirrored from the transmit engine and the
/// receive injection path.
#[derive(Debug, Default)]
pub struct LinkStats {
    pub tx_packets: AtomicU64,
    pub tx_bytes: AtomicU64,
    pub tx_errors: AtomicU64,
    pub rx_packets: AtomicU64,
    pub rx_bytes: AtomicU64,
    pub rx_dropped: AtomicU64,
}

/// Point-in-time copy of [`LinkStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkStatsSnapshot {
    pub tx_packets: u64,
    pub tx_bytes: u64,
    pub tx_errors: u64,
    pub rx_packets: u64,
    pub rx_bytes: u64,
    pub rx_dropped: u64,
}

impl LinkStats {
    pub fn snapshot(&self) -> LinkStatsSnapshot {
        LinkStatsSnapshot {
            tx_packets: self.tx_packets.load(Ordering::Relaxed),
            tx_bytes: self.tx_bytes.load(Ordering::Relaxed),
            tx_errors: self.tx_errors.load(Ordering::Relaxed),
            rx_packets: self.rx_packets.load(Ordering::Relaxed),
            rx_bytes: self.rx_bytes.load(Ordering::Relaxed),
            rx_dropped: self.rx_dropped.load(Ordering::Relaxed),
        }
    }
}

/// One registered radio interface.
pub struct Interface {
    ifindex: u32,
    name: String,
    kind: HardwareKind,
    mtu: usize,
    link_up: AtomicBool,
    stats: Arc<LinkStats>,
    engine: TransmitEngine,
}

impl Interface {
    pub fn ifindex(&self) -> u32 {
        self.ifindex
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> HardwareKind {
        self.kind
    }

    pub fn mtu(&self) -> usize {
        self.mtu
    }

    /// Administrative link state.
    pub fn is_up(&self) -> bool {
        self.link_up.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> LinkStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn engine(&self) -> &TransmitEngine {
        &self.engine
    }
}

/// Inbound frames leave the device layer through this seam; the socket
/// layer installs its datagram dispatcher here.
pub trait FrameSink: Send + Sync {
    fn deliver(&self, ifindex: u32, payload: Vec<u8>);
}

struct RegistryInner {
    config: DeviceConfig,
    devices: RwLock<HashMap<u32, Arc<Interface>>>,
    // Serializes register/unregister/set_link and their event emission.
    admin: Mutex<()>,
    next_ifindex: AtomicU32,
    notifier: LifecycleNotifier,
    sink: RwLock<Option<Arc<dyn FrameSink>>>,
}

/// Cheaply clonable handle to the interface table.
#[derive(Clone)]
pub struct DeviceRegistry {
    inner: Arc<RegistryInner>,
}

impl DeviceRegistry {
    pub fn new(config: DeviceConfig) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                config,
                devices: RwLock::new(HashMap::new()),
                admin: Mutex::new(()),
                next_ifindex: AtomicU32::new(1),
                notifier: LifecycleNotifier::new(),
                sink: RwLock::new(None),
            }),
        }
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.inner.config
    }

    pub fn notifier(&self) -> &LifecycleNotifier {
        &self.inner.notifier
    }

    /// Routes inbound (and echoed loopback) frames; replaces any
    /// previously installed sink.
    pub fn set_frame_sink(&self, sink: Arc<dyn FrameSink>) {
        *self.inner.sink.write().expect("sink lock poisoned") = Some(sink);
    }

    /// Registers a transceiver as a new interface, administratively
    /// down. `name` may contain `%d`, replaced by the first free
    /// ordinal (`"lora%d"` becomes `lora0`, `lora1`, ...). `mtu`
    /// defaults to the configured device MTU.
    ///
    /// On error nothing is left behind: no entry, no event.
    pub fn register(
        &self,
        name: &str,
        kind: HardwareKind,
        mtu: Option<usize>,
        driver: Box<dyn Transceiver>,
    ) -> Result<u32, DeviceError> {
        let inner = &self.inner;
        let _admin = inner.admin.lock().expect("admin lock poisoned");

        let name = {
            let devices = inner.devices.read().expect("device table poisoned");
            if devices.len() >= inner.config.max_interfaces {
                return Err(DeviceError::Exhausted(inner.config.max_interfaces));
            }
            expand_ifname(name, &devices)?
        };

        // Updated only under the admin lock; left at MAX once reached
        // so the counter can never wrap back to reusable indexes.
        let ifindex = inner.next_ifindex.load(Ordering::Relaxed);
        if ifindex == u32::MAX {
            return Err(DeviceError::Exhausted(inner.config.max_interfaces));
        }
        inner.next_ifindex.store(ifindex + 1, Ordering::Relaxed);

        let stats = Arc::new(LinkStats::default());
        let echo = {
            let weak = Arc::downgrade(inner);
            Arc::new(move |frame: PacketBuffer| {
                if let Some(inner) = weak.upgrade() {
                    inner.inject(frame.ifindex(), frame.into_payload());
                }
            })
        };
        let mtu = mtu.unwrap_or(inner.config.default_mtu);
        let engine = TransmitEngine::new(name.clone(), mtu, driver, stats.clone(), echo);

        let iface = Arc::new(Interface {
            ifindex,
            name: name.clone(),
            kind,
            mtu,
            link_up: AtomicBool::new(false),
            stats,
            engine,
        });

        inner
            .devices
            .write()
            .expect("device table poisoned")
            .insert(ifindex, iface);

        log::info!("dev({}): registered, ifindex={} mtu={}", name, ifindex, mtu);
        // Emitted after the table guard is released: callbacks may look
        // the interface up.
        inner.notifier.emit(LifecycleEvent { change: LinkChange::Added, ifindex, kind });

        Ok(ifindex)
    }

    /// Removes an interface. Idempotent; unknown indexes are a no-op.
    ///
    /// `Removed` is emitted while the entry is still resolvable so
    /// subscribers can read its attributes from the callback.
    pub fn unregister(&self, ifindex: u32) {
        let inner = &self.inner;
        let _admin = inner.admin.lock().expect("admin lock poisoned");

        let Some(iface) = lookup_in(&inner.devices, ifindex) else {
            return;
        };

        iface.engine.close();
        iface.link_up.store(false, Ordering::Release);

        inner.notifier.emit(LifecycleEvent {
            change: LinkChange::Removed,
            ifindex,
            kind: iface.kind,
        });

        inner
            .devices
            .write()
            .expect("device table poisoned")
            .remove(&ifindex);

        log::info!("dev({}): unregistered, ifindex={}", iface.name, ifindex);
    }

    pub fn lookup(&self, ifindex: u32) -> Option<Arc<Interface>> {
        lookup_in(&self.inner.devices, ifindex)
    }

    /// Changes the administrative link state, opening or closing the
    /// transmit engine accordingly. Unchanged state is a no-op and
    /// emits nothing.
    pub fn set_link(&self, ifindex: u32, up: bool) -> Result<(), DeviceError> {
        let inner = &self.inner;
        let _admin = inner.admin.lock().expect("admin lock poisoned");

        let iface = lookup_in(&inner.devices, ifindex).ok_or(DeviceError::NotFound(ifindex))?;
        if iface.is_up() == up {
            return Ok(());
        }

        let change = if up {
            iface.engine.open()?;
            iface.link_up.store(true, Ordering::Release);
            LinkChange::LinkUp
        } else {
            iface.engine.close();
            iface.link_up.store(false, Ordering::Release);
            LinkChange::LinkDown
        };

        log::info!("dev({}): link {}", iface.name, if up { "up" } else { "down" });
        inner.notifier.emit(LifecycleEvent { change, ifindex, kind: iface.kind });
        Ok(())
    }

    /// Injects a received frame from a driver (the receive half of the
    /// driver contract).
    pub fn deliver_frame(&self, ifindex: u32, payload: &[u8]) -> Result<(), DeviceError> {
        if self.lookup(ifindex).is_none() {
            return Err(DeviceError::NotFound(ifindex));
        }
        self.inner.inject(ifindex, payload.to_vec());
        Ok(())
    }
}

impl RegistryInner {
    /// Receive-path tail shared by driver injection and loopback echo.
    fn inject(&self, ifindex: u32, payload: Vec<u8>) {
        let Some(iface) = lookup_in(&self.devices, ifindex) else {
            return;
        };

        let sink = self.sink.read().expect("sink lock poisoned").clone();
        match sink {
            Some(sink) => {
                iface.stats.rx_packets.fetch_add(1, Ordering::Relaxed);
                iface.stats.rx_bytes.fetch_add(payload.len() as u64, Ordering::Relaxed);
                sink.deliver(ifindex, payload);
            }
            None => {
                iface.stats.rx_dropped.fetch_add(1, Ordering::Relaxed);
                log::debug!("dev({}): frame dropped, no sink installed", iface.name);
            }
        }
    }
}

fn lookup_in(
    devices: &RwLock<HashMap<u32, Arc<Interface>>>,
    ifindex: u32,
) -> Option<Arc<Interface>> {
    devices.read().expect("device table poisoned").get(&ifindex).cloned()
}

/// Expands a `%d` name template to the first unused ordinal and
/// rejects duplicate literal names.
fn expand_ifname(
    template: &str,
    devices: &HashMap<u32, Arc<Interface>>,
) -> Result<String, DeviceError> {
    let taken = |candidate: &str| devices.values().any(|iface| iface.name == candidate);

    if template.contains("%d") {
        for ordinal in 0..u32::MAX {
            let candidate = template.replacen("%d", &ordinal.to_string(), 1);
            if !taken(&candidate) {
                return Ok(candidate);
            }
        }
        Err(DeviceError::NameInUse(template.to_string()))
    } else if taken(template) {
        Err(DeviceError::NameInUse(template.to_string()))
    } else {
        Ok(template.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transceiver::{DriverError, IrqFlags, OpMode};

    struct NullTransceiver;

    impl Transceiver for NullTransceiver {
        fn set_mode(&mut self, _mode: OpMode) -> Result<(), DriverError> {
            Ok(())
        }
        fn arm_tx_interrupt(&mut self) -> Result<(), DriverError> {
            Ok(())
        }
        fn write_frame(&mut self, _frame: &[u8]) -> Result<(), DriverError> {
            Ok(())
        }
        fn read_clear_irq(&mut self) -> Result<IrqFlags, DriverError> {
            Ok(IrqFlags::default())
        }
    }

    fn registry() -> DeviceRegistry {
        DeviceRegistry::new(DeviceConfig::default())
    }

    #[test]
    fn name_template_allocates_ordinals() {
        let registry = registry();
        let a = registry
            .register("lora%d", HardwareKind::Lora, None, Box::new(NullTransceiver))
            .expect("register");
        let b = registry
            .register("lora%d", HardwareKind::Lora, None, Box::new(NullTransceiver))
            .expect("register");

        assert_eq!(registry.lookup(a).expect("a").name(), "lora0");
        assert_eq!(registry.lookup(b).expect("b").name(), "lora1");
        assert_ne!(a, b);
    }

    #[test]
    fn duplicate_literal_name_is_rejected() {
        let registry = registry();
        registry
            .register("lora0", HardwareKind::Lora, None, Box::new(NullTransceiver))
            .expect("register");
        let err = registry
            .register("lora0", HardwareKind::Lora, None, Box::new(NullTransceiver))
            .expect_err("duplicate");
        assert!(matches!(err, DeviceError::NameInUse(name) if name == "lora0"));
    }

    #[test]
    fn default_mtu_comes_from_config() {
        let registry = registry();
        let ifindex = registry
            .register("lora%d", HardwareKind::Lora, None, Box::new(NullTransceiver))
            .expect("register");
        assert_eq!(registry.lookup(ifindex).expect("iface").mtu(), crate::LORA_MTU);

        let wide = registry
            .register("wide%d", HardwareKind::Lora, Some(222), Box::new(NullTransceiver))
            .expect("register");
        assert_eq!(registry.lookup(wide).expect("iface").mtu(), 222);
    }

    #[test]
    fn table_capacity_is_enforced() {
        let registry = DeviceRegistry::new(DeviceConfig {
            max_interfaces: 1,
            ..DeviceConfig::default()
        });
        registry
            .register("lora%d", HardwareKind::Lora, None, Box::new(NullTransceiver))
            .expect("register");
        let err = registry
            .register("lora%d", HardwareKind::Lora, None, Box::new(NullTransceiver))
            .expect_err("full");
        assert!(matches!(err, DeviceError::Exhausted(1)));
    }

    #[test]
    fn unregister_is_idempotent() {
        let registry = registry();
        let ifindex = registry
            .register("lora%d", HardwareKind::Lora, None, Box::new(NullTransceiver))
            .expect("register");

        registry.unregister(ifindex);
        assert!(registry.lookup(ifindex).is_none());
        // Second removal of the same index must be a silent no-op.
        registry.unregister(ifindex);
    }

    #[test]
    fn index_counter_exhaustion_is_terminal() {
        let registry = registry();
        registry.inner.next_ifindex.store(u32::MAX, Ordering::Relaxed);

        // Every attempt past the last index fails; the counter must
        // not wrap back to the wildcard index 0.
        for _ in 0..2 {
            let err = registry
                .register("lora%d", HardwareKind::Lora, None, Box::new(NullTransceiver))
                .expect_err("counter exhausted");
            assert!(matches!(err, DeviceError::Exhausted(_)));
        }
        assert!(registry.lookup(0).is_none());
    }

    #[test]
    fn indexes_are_never_reused() {
        let registry = registry();
        let first = registry
            .register("lora%d", HardwareKind::Lora, None, Box::new(NullTransceiver))
            .expect("register");
        registry.unregister(first);
        let second = registry
            .register("lora%d", HardwareKind::Lora, None, Box::new(NullTransceiver))
            .expect("register");
        assert!(second > first);
    }
}
