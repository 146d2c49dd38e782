//! Datagram sockets and their binding to radio interfaces.
//!
//! A socket never stores a live interface reference, only the bound
//! index, resolved against the registry per operation. The lifecycle
//! callback and the public API share one state mutex; the callback
//! only flips state and records a sticky error under it, so it can run
//! on whatever thread performs the registry transition. Teardown
//! unsubscribes *first* (which waits out any in-flight callback) and
//! only then releases socket state, so a callback can never touch a
//! half-destroyed socket.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::Notify;
use tokio::time::Instant;

use lora_dev::{
    DeviceRegistry, FrameSink, HardwareKind, LifecycleEvent, LinkChange, PacketBuffer,
    SubscriptionId, TransmitError,
};

use crate::addr::LoraAddr;
use crate::error::SocketError;

/// Socket-layer tunables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SocketConfig {
    /// Datagrams buffered per socket before inbound frames are dropped.
    pub rx_queue_depth: usize,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self { rx_queue_depth: 64 }
    }
}

/// How `send` behaves when the transmit engine pushes back.
#[derive(Debug, Clone, Copy, Default)]
pub struct SendOptions {
    /// Suspend until the engine accepts instead of returning
    /// `WouldBlock`.
    pub blocking: bool,
    /// Give up after this long when blocking.
    pub timeout: Option<Duration>,
    /// Mark the frame as a self-addressed test frame, echoed back to
    /// this stack's receive path on transmit completion.
    pub loopback: bool,
}

impl SendOptions {
    pub fn blocking(timeout: Option<Duration>) -> Self {
        Self { blocking: true, timeout, ..Self::default() }
    }
}

/// One received datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datagram {
    /// Interface the frame arrived on.
    pub source: LoraAddr,
    pub payload: Vec<u8>,
}

struct SocketState {
    ifindex: u32,
    bound: bool,
    pending_error: Option<SocketError>,
    rx_queue: VecDeque<Datagram>,
}

struct SocketShared {
    state: Mutex<SocketState>,
    rx_ready: Notify,
    rx_queue_depth: usize,
}

impl SocketShared {
    fn new(config: &SocketConfig) -> Self {
        Self {
            state: Mutex::new(SocketState {
                ifindex: 0,
                bound: false,
                pending_error: None,
                rx_queue: VecDeque::new(),
            }),
            rx_ready: Notify::new(),
            rx_queue_depth: config.rx_queue_depth,
        }
    }

    /// Lifecycle callback body. Runs on the registry's emitting thread;
    /// records state only, never blocks on hardware or unwinds.
    fn handle_event(&self, event: &LifecycleEvent) {
        if event.kind != HardwareKind::Lora {
            return;
        }

        let mut state = self.state.lock().expect("socket state poisoned");
        if !state.bound || state.ifindex == 0 || state.ifindex != event.ifindex {
            return;
        }

        match event.change {
            LinkChange::Removed => {
                log::debug!("socket: bound interface {} removed", event.ifindex);
                state.ifindex = 0;
                state.bound = false;
                state.pending_error = Some(SocketError::DeviceGone);
            }
            LinkChange::LinkDown => {
                // Binding survives; the link may come back up.
                state.pending_error = Some(SocketError::LinkDown);
            }
            LinkChange::Added | LinkChange::LinkUp => return,
        }
        drop(state);
        self.rx_ready.notify_waiters();
    }

    /// Inbound frame offer from the dispatcher.
    fn offer(&self, ifindex: u32, payload: &[u8]) {
        let mut state = self.state.lock().expect("socket state poisoned");
        let wants = state.bound && (state.ifindex == ifindex || state.ifindex == 0);
        if !wants {
            return;
        }

        if state.rx_queue.len() >= self.rx_queue_depth {
            log::debug!("socket: rx queue full, dropping frame from ifindex {}", ifindex);
            return;
        }

        state.rx_queue.push_back(Datagram {
            source: LoraAddr::new(ifindex),
            payload: payload.to_vec(),
        });
        drop(state);
        self.rx_ready.notify_waiters();
    }

    fn take_pending(&self) -> Option<SocketError> {
        self.state.lock().expect("socket state poisoned").pending_error.take()
    }
}

/// Fans inbound frames out to every open socket; installed as the
/// registry's frame sink.
#[derive(Default)]
struct DatagramDispatcher {
    sockets: Mutex<Vec<Weak<SocketShared>>>,
}

impl DatagramDispatcher {
    fn attach(&self, socket: Weak<SocketShared>) {
        let mut sockets = self.sockets.lock().expect("dispatcher poisoned");
        sockets.retain(|entry| entry.strong_count() > 0);
        sockets.push(socket);
    }
}

impl FrameSink for DatagramDispatcher {
    fn deliver(&self, ifindex: u32, payload: Vec<u8>) {
        let sockets: Vec<Arc<SocketShared>> = {
            let sockets = self.sockets.lock().expect("dispatcher poisoned");
            sockets.iter().filter_map(Weak::upgrade).collect()
        };
        for socket in sockets {
            socket.offer(ifindex, &payload);
        }
    }
}

/// The socket layer over one device registry.
pub struct LoraStack {
    registry: DeviceRegistry,
    config: SocketConfig,
    dispatcher: Arc<DatagramDispatcher>,
}

impl LoraStack {
    /// Wires the datagram dispatcher into `registry`'s receive path.
    pub fn new(registry: DeviceRegistry, config: SocketConfig) -> Self {
        let dispatcher = Arc::new(DatagramDispatcher::default());
        registry.set_frame_sink(dispatcher.clone());
        Self { registry, config, dispatcher }
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    /// Opens an unbound socket subscribed to interface lifecycle
    /// events.
    pub fn open(&self) -> LoraSocket {
        let shared = Arc::new(SocketShared::new(&self.config));
        self.dispatcher.attach(Arc::downgrade(&shared));

        let subscription = {
            let shared = shared.clone();
            self.registry
                .notifier()
                .subscribe(move |event| shared.handle_event(event))
        };

        LoraSocket { registry: self.registry.clone(), shared, subscription }
    }
}

/// An application endpoint: zero or one bound interface, a sticky
/// error slot, and a receive queue.
///
/// `close` consumes the socket, so no `send`/`bind` can run
/// concurrently with teardown by construction.
pub struct LoraSocket {
    registry: DeviceRegistry,
    shared: Arc<SocketShared>,
    subscription: SubscriptionId,
}

impl LoraSocket {
    /// Binds to the interface in `addr`, or to the wildcard when the
    /// index is 0. Rebinding to the current interface is a no-op
    /// success.
    ///
    /// Binding to an administratively-down interface succeeds, with a
    /// sticky `LinkDown` recorded for the next operation.
    pub fn bind(&self, addr: LoraAddr) -> Result<(), SocketError> {
        let mut state = self.shared.state.lock().expect("socket state poisoned");
        if state.bound && state.ifindex == addr.ifindex {
            return Ok(());
        }

        let mut bound_while_down = false;
        if addr.ifindex != 0 {
            let iface = self
                .registry
                .lookup(addr.ifindex)
                .ok_or(SocketError::NoSuchDevice)?;
            if iface.kind() != HardwareKind::Lora {
                return Err(SocketError::WrongHardwareKind);
            }
            bound_while_down = !iface.is_up();
            state.ifindex = iface.ifindex();
        } else {
            state.ifindex = 0;
        }
        state.bound = true;
        if bound_while_down {
            // Recorded under the same lock as the binding so a removal
            // racing this bind can never be masked; it still surfaces
            // only on the next operation. A condition already recorded
            // (removal of the previous binding) takes precedence.
            state.pending_error.get_or_insert(SocketError::LinkDown);
        }
        drop(state);

        if bound_while_down {
            self.shared.rx_ready.notify_waiters();
        }
        Ok(())
    }

    /// The bound address; wildcard when unbound.
    pub fn local_addr(&self) -> LoraAddr {
        let state = self.shared.state.lock().expect("socket state poisoned");
        LoraAddr::new(state.ifindex)
    }

    /// There is no peer concept on this socket family.
    pub fn peer_addr(&self) -> Result<LoraAddr, SocketError> {
        Err(SocketError::NotSupported)
    }

    /// Takes the sticky error recorded by the lifecycle callback, if
    /// any.
    pub fn take_error(&self) -> Option<SocketError> {
        self.shared.take_pending()
    }

    /// Sends one datagram to `dest`, or to the bound interface when no
    /// destination is supplied. Returns the number of bytes accepted,
    /// which is always the full payload.
    pub async fn send(
        &self,
        payload: &[u8],
        dest: Option<LoraAddr>,
        options: SendOptions,
    ) -> Result<usize, SocketError> {
        let ifindex = {
            let mut state = self.shared.state.lock().expect("socket state poisoned");
            if let Some(error) = state.pending_error.take() {
                return Err(error);
            }
            match dest {
                Some(addr) => addr.ifindex,
                None => state.ifindex,
            }
        };

        if ifindex == 0 {
            return Err(SocketError::DestinationRequired);
        }

        let iface = self.registry.lookup(ifindex).ok_or(SocketError::NoRoute(ifindex))?;
        if payload.len() > iface.mtu() {
            return Err(SocketError::MessageTooLarge { len: payload.len(), mtu: iface.mtu() });
        }

        let mut frame = PacketBuffer::new(payload);
        frame.set_ifindex(iface.ifindex());
        frame.set_loopback(options.loopback);

        let deadline = options.timeout.map(|timeout| Instant::now() + timeout);
        loop {
            // Register for the wakeup before attempting, so a
            // completion between attempt and wait is not lost.
            let ready = iface.engine().readiness();

            match iface.engine().transmit(frame) {
                Ok(()) => return Ok(payload.len()),
                Err(TransmitError::Busy(returned)) => {
                    if !options.blocking {
                        return Err(SocketError::WouldBlock);
                    }
                    frame = returned;
                    match deadline {
                        Some(deadline) => {
                            let now = Instant::now();
                            if now >= deadline
                                || tokio::time::timeout(deadline - now, ready).await.is_err()
                            {
                                return Err(SocketError::WouldBlock);
                            }
                        }
                        None => ready.await,
                    }
                }
                Err(TransmitError::Closed(_)) => {
                    // Engine went away under us; prefer the sticky
                    // cause when the callback already recorded one.
                    return Err(self.take_error().unwrap_or(SocketError::LinkDown));
                }
                Err(TransmitError::Oversize { len, mtu }) => {
                    return Err(SocketError::MessageTooLarge { len, mtu });
                }
            }
        }
    }

    /// Awaits the next inbound datagram. Sticky errors recorded while
    /// waiting (or before) are delivered here too.
    pub async fn recv(&self) -> Result<Datagram, SocketError> {
        loop {
            let ready = self.shared.rx_ready.notified();
            {
                let mut state = self.shared.state.lock().expect("socket state poisoned");
                if let Some(error) = state.pending_error.take() {
                    return Err(error);
                }
                if let Some(datagram) = state.rx_queue.pop_front() {
                    return Ok(datagram);
                }
            }
            ready.await;
        }
    }

    /// Tears the socket down: cancels the lifecycle subscription
    /// (waiting out any callback currently running against this
    /// socket), then drops all state.
    pub fn close(self) {
        // Drop does the actual work; taking `self` by value keeps any
        // concurrent use from compiling.
    }
}

impl Drop for LoraSocket {
    fn drop(&mut self) {
        // Unsubscribe before touching state: after this returns no
        // callback can observe the socket again.
        self.registry.notifier().unsubscribe(self.subscription);

        let mut state = self.shared.state.lock().expect("socket state poisoned");
        state.ifindex = 0;
        state.bound = false;
        state.rx_queue.clear();
    }
}
