// Device lifecycle against scripted hardware drivers
use can_pdo_monitor::{
    Device, DeviceConfig, DeviceState, Frame, HardwareBus, HardwareDevice, MonitorError, Result,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Driver replaying a fixed list of frames and recording bus calls
struct ScriptedBus {
    frames: VecDeque<Result<Frame>>,
    calls: Arc<Mutex<Vec<&'static str>>>,
}

impl ScriptedBus {
    fn new(frames: Vec<Result<Frame>>) -> (Self, Arc<Mutex<Vec<&'static str>>>) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let bus = Self {
            frames: frames.into(),
            calls: Arc::clone(&calls),
        };
        (bus, calls)
    }
}

impl HardwareBus for ScriptedBus {
    fn bus_on(&mut self) -> Result<()> {
        self.calls.lock().unwrap().push("bus_on");
        Ok(())
    }

    fn bus_off(&mut self) -> Result<()> {
        self.calls.lock().unwrap().push("bus_off");
        Ok(())
    }

    fn flush_rx(&mut self) -> Result<()> {
        self.calls.lock().unwrap().push("flush_rx");
        Ok(())
    }

    fn read(&mut self, timeout: Duration) -> Result<Option<Frame>> {
        match self.frames.pop_front() {
            Some(result) => result.map(Some),
            None => {
                thread::sleep(timeout);
                Ok(None)
            }
        }
    }
}

/// Driver whose read blocks until released
struct StuckBus {
    release: Arc<AtomicBool>,
}

impl HardwareBus for StuckBus {
    fn bus_on(&mut self) -> Result<()> {
        Ok(())
    }

    fn bus_off(&mut self) -> Result<()> {
        Ok(())
    }

    fn flush_rx(&mut self) -> Result<()> {
        Ok(())
    }

    fn read(&mut self, _timeout: Duration) -> Result<Option<Frame>> {
        while !self.release.load(Ordering::SeqCst) {
            thread::sleep(Duration::from_millis(1));
        }
        Ok(None)
    }
}

fn frame(id: u32) -> Result<Frame> {
    Frame::new(id, &[id as u8], Duration::from_millis(id as u64))
}

fn wait_for_received<D: Device>(device: &D, count: u64) {
    for _ in 0..200 {
        if device.stats().received >= count {
            return;
        }
        thread::sleep(Duration::from_millis(5));
    }
    panic!("device did not receive {} frames", count);
}

#[test]
fn test_overflow_reported_once_and_queue_keeps_oldest() {
    init_logging();

    let (bus, _calls) = ScriptedBus::new(vec![frame(1), frame(2), frame(3)]);
    let config = DeviceConfig::new().with_queue_capacity(2);
    let device = HardwareDevice::with_config(bus, config);

    device.start().unwrap();
    wait_for_received(&device, 3);
    // Let the acquisition thread finish reporting the last push
    thread::sleep(Duration::from_millis(50));

    let errors = device.drain_errors();
    assert_eq!(errors.len(), 1);
    assert!(matches!(
        errors[0],
        MonitorError::FrameQueueOverflow { id: 3, capacity: 2 }
    ));

    assert_eq!(device.get_frame(Duration::from_secs(1)).unwrap().id(), 1);
    assert_eq!(device.get_frame(Duration::from_secs(1)).unwrap().id(), 2);
    assert!(matches!(
        device.get_frame(Duration::from_millis(20)),
        Err(MonitorError::Timeout(_))
    ));

    let stats = device.stats();
    assert_eq!(stats.dropped, 1);
    assert_eq!(stats.queued, 0);

    device.stop().unwrap();
}

#[test]
fn test_bus_calls_follow_lifecycle() {
    init_logging();

    let (bus, calls) = ScriptedBus::new(Vec::new());
    let device = HardwareDevice::new(bus).with_read_timeout(Duration::from_millis(2));

    device.start().unwrap();
    assert_eq!(device.state(), DeviceState::Running);
    device.stop().unwrap();
    assert_eq!(device.state(), DeviceState::Idle);

    assert_eq!(
        *calls.lock().unwrap(),
        vec!["flush_rx", "bus_on", "bus_off", "flush_rx"]
    );
}

#[test]
fn test_driver_errors_are_reported_and_reading_continues() {
    init_logging();

    let failure = Err(MonitorError::InvalidFrame("corrupt frame".to_string()));
    let (bus, _calls) = ScriptedBus::new(vec![failure, frame(7)]);
    let device = HardwareDevice::new(bus).with_read_timeout(Duration::from_millis(2));

    device.start().unwrap();
    let received = device.get_frame(Duration::from_secs(1)).unwrap();
    device.stop().unwrap();

    assert_eq!(received.id(), 7);
    let errors = device.drain_errors();
    assert_eq!(errors.len(), 1);
    assert!(matches!(errors[0], MonitorError::Hardware(_)));
}

#[test]
fn test_stuck_driver_stop_times_out_then_recovers() {
    init_logging();

    let release = Arc::new(AtomicBool::new(false));
    let bus = StuckBus {
        release: Arc::clone(&release),
    };
    let config = DeviceConfig::new().with_stop_grace(Duration::from_millis(50));
    let device = HardwareDevice::with_config(bus, config);

    device.start().unwrap();
    thread::sleep(Duration::from_millis(10));

    assert!(matches!(device.stop(), Err(MonitorError::ThreadClose(_))));
    assert_eq!(device.state(), DeviceState::StopRequested);
    assert!(matches!(device.start(), Err(MonitorError::StopPending(_))));

    release.store(true, Ordering::SeqCst);
    device.stop().unwrap();
    assert_eq!(device.state(), DeviceState::Idle);

    // Restartable after a clean stop
    device.start().unwrap();
    device.stop().unwrap();
}
