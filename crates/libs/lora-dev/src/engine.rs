//! Per-interface asynchronous transmit pipeline.
//!
//! Exactly one frame is in flight per interface. `transmit` claims the
//! slot synchronously and hands the frame to a background task; the
//! task performs the register writes and, when the driver raises the
//! completion interrupt, finishes the frame and frees the slot. A
//! frame rejected while the slot is occupied is handed back to the
//! caller, never queued; backpressure belongs to the caller.
//!
//! All hardware access, submission and completion alike, happens
//! under one register mutex, and both run on the same task so an
//! interrupt can never interleave with a half-written frame.

use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};

use tokio::sync::futures::Notified;
use tokio::sync::mpsc;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::buffer::PacketBuffer;
use crate::error::{DeviceError, TransmitError};
use crate::registry::LinkStats;
use crate::transceiver::{OpMode, Transceiver};

/// Completed loopback frames are re-injected through this hook (the
/// registry wires it to its receive path).
pub(crate) type EchoFn = Arc<dyn Fn(PacketBuffer) + Send + Sync>;

/// The single in-flight tracking state.
#[derive(Debug, Clone, Copy)]
struct TxSlot {
    len: usize,
}

enum EngineMsg {
    Submit(PacketBuffer),
    Interrupt,
}

struct EngineHandle {
    queue: mpsc::UnboundedSender<EngineMsg>,
    cancel: CancellationToken,
}

struct EngineShared {
    name: String,
    mtu: usize,
    regs: Mutex<Box<dyn Transceiver>>,
    slot: Mutex<Option<TxSlot>>,
    ready: Notify,
    stats: Arc<LinkStats>,
    echo: EchoFn,
}

/// Transmit engine of one registered interface.
///
/// Opened and closed by the registry when the link goes
/// administratively up or down; those transitions are serialized by
/// the registry, so `open`/`close` never race each other.
pub struct TransmitEngine {
    shared: Arc<EngineShared>,
    running: Mutex<Option<EngineHandle>>,
}

impl TransmitEngine {
    pub(crate) fn new(
        name: String,
        mtu: usize,
        driver: Box<dyn Transceiver>,
        stats: Arc<LinkStats>,
        echo: EchoFn,
    ) -> Self {
        Self {
            shared: Arc::new(EngineShared {
                name,
                mtu,
                regs: Mutex::new(driver),
                slot: Mutex::new(None),
                ready: Notify::new(),
                stats,
                echo,
            }),
            running: Mutex::new(None),
        }
    }

    /// Accepts `frame` for transmission, or hands it back.
    ///
    /// Returns immediately; completion is reported through the
    /// interface statistics and [`TransmitEngine::readiness`].
    pub fn transmit(&self, frame: PacketBuffer) -> Result<(), TransmitError> {
        let len = frame.len();
        if len > self.shared.mtu {
            return Err(TransmitError::Oversize { len, mtu: self.shared.mtu });
        }

        let running = self.running.lock().expect("engine lock poisoned");
        let Some(handle) = running.as_ref() else {
            return Err(TransmitError::Closed(frame));
        };

        {
            let mut slot = self.shared.slot.lock().expect("slot lock poisoned");
            if slot.is_some() {
                return Err(TransmitError::Busy(frame));
            }
            *slot = Some(TxSlot { len });
        }

        log::debug!("dev({}): transmit {} bytes", self.shared.name, len);
        if let Err(rejected) = handle.queue.send(EngineMsg::Submit(frame)) {
            // Task already gone; undo the claim.
            self.shared.slot.lock().expect("slot lock poisoned").take();
            let EngineMsg::Submit(frame) = rejected.0 else { unreachable!() };
            return Err(TransmitError::Closed(frame));
        }
        Ok(())
    }

    /// Completion interrupt entry point. Safe to call from any thread;
    /// the cause is read back on the engine task. Interrupts raised on
    /// a closed engine are dropped.
    pub fn interrupt(&self) {
        let running = self.running.lock().expect("engine lock poisoned");
        if let Some(handle) = running.as_ref() {
            let _ = handle.queue.send(EngineMsg::Interrupt);
        }
    }

    /// A future that resolves when the transmit slot frees up (on
    /// completion or submission failure). Create it *before* calling
    /// [`TransmitEngine::transmit`] to avoid missing the wakeup.
    pub fn readiness(&self) -> Notified<'_> {
        self.shared.ready.notified()
    }

    /// True while a frame occupies the slot.
    pub fn is_busy(&self) -> bool {
        self.shared.slot.lock().expect("slot lock poisoned").is_some()
    }

    /// Puts the hardware into standby and starts the submission task.
    /// Must run inside a tokio runtime.
    pub(crate) fn open(&self) -> Result<(), DeviceError> {
        let mut running = self.running.lock().expect("engine lock poisoned");
        if running.is_some() {
            return Ok(());
        }

        self.shared
            .regs
            .lock()
            .expect("register lock poisoned")
            .set_mode(OpMode::Standby)?;

        let (queue, inbox) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        tokio::spawn(run(self.shared.clone(), inbox, cancel.clone()));
        *running = Some(EngineHandle { queue, cancel });

        log::debug!("dev({}): engine open", self.shared.name);
        Ok(())
    }

    /// Stops the submission task, forces the hardware to sleep, and
    /// accounts a still-occupied slot as a transmit error.
    pub(crate) fn close(&self) {
        let handle = self.running.lock().expect("engine lock poisoned").take();
        let Some(handle) = handle else { return };

        handle.cancel.cancel();

        if let Err(err) = self
            .shared
            .regs
            .lock()
            .expect("register lock poisoned")
            .set_mode(OpMode::Sleep)
        {
            log::warn!("dev({}): sleep on close failed: {}", self.shared.name, err);
        }

        let aborted = self.shared.slot.lock().expect("slot lock poisoned").take();
        if aborted.is_some() {
            self.shared.stats.tx_errors.fetch_add(1, Ordering::Relaxed);
            log::debug!("dev({}): dropped in-flight frame on close", self.shared.name);
        }
        // Wake blocked senders so they observe the closed engine.
        self.shared.ready.notify_waiters();
        log::debug!("dev({}): engine closed", self.shared.name);
    }
}

async fn run(
    shared: Arc<EngineShared>,
    mut inbox: mpsc::UnboundedReceiver<EngineMsg>,
    cancel: CancellationToken,
) {
    // The frame between hardware submission and the completion IRQ.
    let mut in_flight: Option<PacketBuffer> = None;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            msg = inbox.recv() => {
                let Some(msg) = msg else { break };
                match msg {
                    EngineMsg::Submit(frame) => in_flight = shared.submit(frame),
                    EngineMsg::Interrupt => shared.complete(&mut in_flight),
                }
            }
        }
    }
}

impl EngineShared {
    /// Hardware submission step. Returns the frame now in flight, or
    /// `None` when submission failed and the slot was released.
    fn submit(&self, frame: PacketBuffer) -> Option<PacketBuffer> {
        let result = {
            let mut regs = self.regs.lock().expect("register lock poisoned");
            regs.arm_tx_interrupt()
                .and_then(|()| regs.write_frame(frame.payload()))
                .and_then(|()| regs.set_mode(OpMode::Transmit))
        };

        match result {
            Ok(()) => Some(frame),
            Err(err) => {
                // No completion interrupt will come for this frame.
                log::warn!("dev({}): submission failed: {}", self.name, err);
                self.stats.tx_errors.fetch_add(1, Ordering::Relaxed);
                self.slot.lock().expect("slot lock poisoned").take();
                self.ready.notify_waiters();
                None
            }
        }
    }

    /// Completion step, driven by the hardware interrupt.
    fn complete(&self, in_flight: &mut Option<PacketBuffer>) {
        let flags = {
            let mut regs = self.regs.lock().expect("register lock poisoned");
            regs.read_clear_irq()
        };

        let flags = match flags {
            Ok(flags) => flags,
            Err(err) => {
                log::warn!("dev({}): irq readback failed: {}", self.name, err);
                return;
            }
        };

        if !flags.tx_done {
            log::debug!("dev({}): ignoring irq cause 0x{:02x}", self.name, flags.raw);
            return;
        }

        let Some(frame) = in_flight.take() else {
            log::debug!("dev({}): tx-done with no frame in flight", self.name);
            return;
        };

        // The slot remembers the length committed at submission.
        let slot = self.slot.lock().expect("slot lock poisoned").take();
        let len = slot.map_or_else(|| frame.len(), |slot| slot.len);
        self.stats.tx_packets.fetch_add(1, Ordering::Relaxed);
        self.stats.tx_bytes.fetch_add(len as u64, Ordering::Relaxed);

        log::debug!("dev({}): tx complete, {} bytes", self.name, len);

        if frame.is_loopback() {
            (self.echo)(frame);
        }

        self.ready.notify_waiters();
    }
}
