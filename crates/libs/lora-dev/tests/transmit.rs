//! Transmit engine behavior against a scripted mock transceiver.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use lora_dev::{
    DeviceConfig, DeviceRegistry, DriverError, HardwareKind, Interface, IrqFlags, OpMode,
    PacketBuffer, Transceiver, TransmitError,
};

#[derive(Default)]
struct MockState {
    mode: Option<OpMode>,
    armed: u32,
    frames: Vec<Vec<u8>>,
    fail_write: bool,
    irq: IrqFlags,
}

#[derive(Clone, Default)]
struct MockTransceiver {
    state: Arc<Mutex<MockState>>,
}

impl MockTransceiver {
    fn state(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().expect("mock state")
    }
}

impl Transceiver for MockTransceiver {
    fn set_mode(&mut self, mode: OpMode) -> Result<(), DriverError> {
        self.state().mode = Some(mode);
        Ok(())
    }

    fn arm_tx_interrupt(&mut self) -> Result<(), DriverError> {
        self.state().armed += 1;
        Ok(())
    }

    fn write_frame(&mut self, frame: &[u8]) -> Result<(), DriverError> {
        let mut state = self.state();
        if state.fail_write {
            return Err(DriverError::new("spi write failed"));
        }
        state.frames.push(frame.to_vec());
        Ok(())
    }

    fn read_clear_irq(&mut self) -> Result<IrqFlags, DriverError> {
        Ok(std::mem::take(&mut self.state().irq))
    }
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    panic!("condition not reached within 1s");
}

fn up_interface(registry: &DeviceRegistry, mock: &MockTransceiver) -> Arc<Interface> {
    let ifindex = registry
        .register("lora%d", HardwareKind::Lora, None, Box::new(mock.clone()))
        .expect("register");
    registry.set_link(ifindex, true).expect("link up");
    registry.lookup(ifindex).expect("iface")
}

#[tokio::test]
async fn submit_then_interrupt_completes_the_frame() {
    let registry = DeviceRegistry::new(DeviceConfig::default());
    let mock = MockTransceiver::default();
    let iface = up_interface(&registry, &mock);

    let payload = vec![0xAB; 36];
    let mut frame = PacketBuffer::new(&payload);
    frame.set_ifindex(iface.ifindex());
    iface.engine().transmit(frame).expect("accepted");
    assert!(iface.engine().is_busy());

    wait_until(|| mock.state().frames.len() == 1).await;
    assert_eq!(mock.state().frames[0], payload);
    assert_eq!(mock.state().mode, Some(OpMode::Transmit));
    assert_eq!(mock.state().armed, 1);

    mock.state().irq = IrqFlags::tx_done();
    iface.engine().interrupt();

    wait_until(|| iface.stats().tx_packets == 1).await;
    let stats = iface.stats();
    assert_eq!(stats.tx_bytes, 36);
    assert_eq!(stats.tx_errors, 0);
    assert!(!iface.engine().is_busy());
}

#[tokio::test]
async fn second_transmit_while_busy_is_rejected() {
    let registry = DeviceRegistry::new(DeviceConfig::default());
    let mock = MockTransceiver::default();
    let iface = up_interface(&registry, &mock);

    iface.engine().transmit(PacketBuffer::new(&[1; 10])).expect("accepted");
    let err = iface
        .engine()
        .transmit(PacketBuffer::new(&[2; 10]))
        .expect_err("slot occupied");

    let TransmitError::Busy(returned) = err else {
        panic!("expected Busy, got {err:?}");
    };
    assert_eq!(returned.payload(), &[2; 10]);

    // The occupied slot still belongs to the first frame.
    wait_until(|| mock.state().frames.len() == 1).await;
    mock.state().irq = IrqFlags::tx_done();
    iface.engine().interrupt();
    wait_until(|| iface.stats().tx_packets == 1).await;
    assert_eq!(iface.stats().tx_bytes, 10);
}

#[tokio::test]
async fn oversize_frame_is_rejected_without_touching_the_slot() {
    let registry = DeviceRegistry::new(DeviceConfig::default());
    let mock = MockTransceiver::default();
    let iface = up_interface(&registry, &mock);

    let err = iface
        .engine()
        .transmit(PacketBuffer::new(&vec![0; 37]))
        .expect_err("over mtu");
    assert!(matches!(err, TransmitError::Oversize { len: 37, mtu: 36 }));
    assert!(!iface.engine().is_busy());

    // A valid frame still goes straight through.
    iface.engine().transmit(PacketBuffer::new(&[0; 36])).expect("accepted");
}

#[tokio::test]
async fn submission_failure_frees_the_slot_and_counts_an_error() {
    let registry = DeviceRegistry::new(DeviceConfig::default());
    let mock = MockTransceiver::default();
    let iface = up_interface(&registry, &mock);

    mock.state().fail_write = true;
    iface.engine().transmit(PacketBuffer::new(&[3; 12])).expect("accepted");

    wait_until(|| iface.stats().tx_errors == 1).await;
    assert_eq!(iface.stats().tx_packets, 0);
    assert!(!iface.engine().is_busy());

    // The engine recovers for the next frame.
    mock.state().fail_write = false;
    iface.engine().transmit(PacketBuffer::new(&[4; 12])).expect("accepted");
    wait_until(|| mock.state().frames.len() == 1).await;
}

#[tokio::test]
async fn unrecognized_interrupt_cause_is_ignored() {
    let registry = DeviceRegistry::new(DeviceConfig::default());
    let mock = MockTransceiver::default();
    let iface = up_interface(&registry, &mock);

    iface.engine().transmit(PacketBuffer::new(&[5; 8])).expect("accepted");
    wait_until(|| mock.state().frames.len() == 1).await;

    // Spurious cause: not tx-done.
    mock.state().irq = IrqFlags { tx_done: false, raw: 0x40 };
    iface.engine().interrupt();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(iface.stats().tx_packets, 0);
    assert!(iface.engine().is_busy());

    // The real completion still lands afterwards.
    mock.state().irq = IrqFlags::tx_done();
    iface.engine().interrupt();
    wait_until(|| iface.stats().tx_packets == 1).await;
}

#[tokio::test]
async fn close_with_frame_in_flight_counts_a_transmit_error() {
    let registry = DeviceRegistry::new(DeviceConfig::default());
    let mock = MockTransceiver::default();
    let iface = up_interface(&registry, &mock);

    iface.engine().transmit(PacketBuffer::new(&[6; 16])).expect("accepted");
    wait_until(|| mock.state().frames.len() == 1).await;

    registry.set_link(iface.ifindex(), false).expect("link down");

    assert_eq!(iface.stats().tx_errors, 1);
    assert_eq!(iface.stats().tx_packets, 0);
    assert!(!iface.engine().is_busy());
    assert_eq!(mock.state().mode, Some(OpMode::Sleep));
}

#[tokio::test]
async fn transmit_on_a_down_interface_reports_closed() {
    let registry = DeviceRegistry::new(DeviceConfig::default());
    let mock = MockTransceiver::default();
    let ifindex = registry
        .register("lora%d", HardwareKind::Lora, None, Box::new(mock))
        .expect("register");
    let iface = registry.lookup(ifindex).expect("iface");

    let err = iface
        .engine()
        .transmit(PacketBuffer::new(&[7; 4]))
        .expect_err("engine closed");
    assert!(matches!(err, TransmitError::Closed(_)));
}

#[tokio::test]
async fn open_puts_the_hardware_into_standby() {
    let registry = DeviceRegistry::new(DeviceConfig::default());
    let mock = MockTransceiver::default();
    let ifindex = registry
        .register("lora%d", HardwareKind::Lora, None, Box::new(mock.clone()))
        .expect("register");

    registry.set_link(ifindex, true).expect("link up");
    assert_eq!(mock.state().mode, Some(OpMode::Standby));
}
