//! Virtual bus device
//!
//! Generates PDO frames without hardware. Identifiers are emitted in a fixed
//! cycle at a configured total frame rate, in bursts paced by elapsed time to
//! roughly mimic a real adapter that is drained every few milliseconds.
//!
//! Payloads follow the default PDO layout: the first identifier carries two
//! singles (a 1 Hz sine "wave generator" and a cycle counter), every other
//! identifier carries four 7Q8 values derived from the same wave.

use super::queue::{RateMeter, RATE_WINDOW};
use super::{enqueue, Device, DeviceCore, DeviceState, FrameQueue, QueueStats};
use crate::codec::{encode_7q8, encode_single, FIXED_7Q8_MAX, FIXED_7Q8_MIN};
use crate::config::{DeviceConfig, VirtualConfig};
use crate::types::{Frame, MonitorError, Result};
use crate::worker::ErrorReporter;
use std::f64::consts::TAU;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// Amplitude of the synthesised wave
const WAVE_AMPLITUDE: f64 = 100.0;

/// Frequency of the synthesised wave in Hz
const WAVE_FREQUENCY: f64 = 1.0;

pub struct VirtualDevice {
    core: DeviceCore,
    config: VirtualConfig,
}

impl VirtualDevice {
    /// Virtual device with the default 4-PDO cycle at 1 kHz
    pub fn new() -> Self {
        Self {
            core: DeviceCore::new("virtual", DeviceConfig::default()),
            config: VirtualConfig::default(),
        }
    }

    pub fn with_config(config: VirtualConfig, device_config: DeviceConfig) -> Result<Self> {
        if config.ids.is_empty() {
            return Err(MonitorError::InvalidFormat(
                "virtual device needs at least one identifier".to_string(),
            ));
        }
        if config.frame_rate == 0 {
            return Err(MonitorError::InvalidFormat(
                "virtual device frame rate must be positive".to_string(),
            ));
        }

        Ok(Self {
            core: DeviceCore::new("virtual", device_config),
            config,
        })
    }

    pub fn config(&self) -> &VirtualConfig {
        &self.config
    }
}

impl Default for VirtualDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl Device for VirtualDevice {
    fn start(&self) -> Result<()> {
        let config = self.config.clone();
        self.core.start_with(
            || Ok(()),
            Box::new(move |running: &AtomicBool, queue: &FrameQueue, errors: &ErrorReporter| {
                generate_loop(&config, running, queue, errors)
            }),
        )
    }

    fn stop(&self) -> Result<()> {
        self.core.stop_with(|| Ok(()))
    }

    fn get_frame(&self, timeout: Duration) -> Result<Frame> {
        self.core.queue().pop(timeout)
    }

    fn clear_queue(&self) {
        self.core.queue().clear();
    }

    fn state(&self) -> DeviceState {
        self.core.state()
    }

    fn stats(&self) -> QueueStats {
        self.core.queue().stats()
    }

    fn drain_errors(&self) -> Vec<MonitorError> {
        self.core.errors().drain()
    }
}

fn generate_loop(
    config: &VirtualConfig,
    running: &AtomicBool,
    queue: &FrameQueue,
    errors: &ErrorReporter,
) {
    let interval = config.burst_interval();
    let rate = config.frame_rate as f64;
    // Cap catch-up after a stall to a few bursts
    let max_burst = ((rate * interval.as_secs_f64()).ceil() as u64).max(1) * 4;

    let start = Instant::now();
    let mut sent: u64 = 0;
    let mut meter = RateMeter::new(RATE_WINDOW);

    log::debug!(
        "Virtual frame generation started: {} ids at {} frames/s",
        config.ids.len(),
        config.frame_rate
    );

    while running.load(Ordering::SeqCst) {
        queue.update_rate(&mut meter);
        let target = (start.elapsed().as_secs_f64() * rate) as u64;
        if sent >= target {
            thread::sleep(interval);
            continue;
        }

        let burst = (target - sent).min(max_burst);
        for _ in 0..burst {
            match synthesize(&config.ids, sent, config.frame_rate, start.elapsed()) {
                Ok(frame) => enqueue(queue, errors, frame),
                Err(e) => errors.report(e),
            }
            sent += 1;
        }
    }

    log::debug!("Virtual frame generation stopped after {} frames", sent);
}

/// Build the `frame_number`-th frame of the cycle
pub(crate) fn synthesize(
    ids: &[u32],
    frame_number: u64,
    frame_rate: u32,
    timestamp: Duration,
) -> Result<Frame> {
    let position = (frame_number % ids.len() as u64) as usize;
    let cycle = frame_number / ids.len() as u64;
    let cycle_rate = frame_rate as f64 / ids.len() as f64;
    let t = cycle as f64 / cycle_rate;
    let wave = WAVE_AMPLITUDE * (TAU * WAVE_FREQUENCY * t).sin();

    let mut payload = [0u8; 8];
    if position == 0 {
        payload[..4].copy_from_slice(&encode_single(wave as f32));
        payload[4..].copy_from_slice(&encode_single(cycle as f32));
    } else {
        let values = [
            wave / position as f64,
            -wave / position as f64,
            (cycle % 256) as f64 / 2.0,
            position as f64,
        ];
        for (slot, value) in payload.chunks_exact_mut(2).zip(values) {
            slot.copy_from_slice(&encode_7q8(value.clamp(FIXED_7Q8_MIN, FIXED_7Q8_MAX))?);
        }
    }

    Frame::new(ids[position], &payload, timestamp)
}
