//! Call-counting control channel used by tests across the crate.

use super::control::{DeviceControl, DeviceInfo};
use crate::error::ControlError;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Fails the first `fail_power_on` power-on requests, then succeeds.
pub struct MockControl {
    pub fail_power_on: u32,
    pub power_on_calls: AtomicU32,
    pub power_off_calls: AtomicU32,
    pub brightness_calls: AtomicU32,
    pub brightness: AtomicU32,
    pub info_calls: AtomicU32,
    /// How long each power-off request takes.
    pub power_off_delay: Duration,
}

impl MockControl {
    pub fn new(fail_power_on: u32) -> Arc<Self> {
        Arc::new(Self {
            fail_power_on,
            power_on_calls: AtomicU32::new(0),
            power_off_calls: AtomicU32::new(0),
            brightness_calls: AtomicU32::new(0),
            brightness: AtomicU32::new(0),
            info_calls: AtomicU32::new(0),
            power_off_delay: Duration::ZERO,
        })
    }

    /// A controller that takes `delay` to answer a power-off.
    pub fn slow_power_off(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            fail_power_on: 0,
            power_on_calls: AtomicU32::new(0),
            power_off_calls: AtomicU32::new(0),
            brightness_calls: AtomicU32::new(0),
            brightness: AtomicU32::new(0),
            info_calls: AtomicU32::new(0),
            power_off_delay: delay,
        })
    }
}

impl DeviceControl for MockControl {
    fn power_on(&self) -> Result<(), ControlError> {
        let n = self.power_on_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if n <= self.fail_power_on {
            return Err(ControlError::Status(503));
        }
        Ok(())
    }

    fn power_off(&self) -> Result<(), ControlError> {
        if !self.power_off_delay.is_zero() {
            thread::sleep(self.power_off_delay);
        }
        self.power_off_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn set_brightness(&self, value: u8) -> Result<(), ControlError> {
        self.brightness.store(value as u32, Ordering::SeqCst);
        self.brightness_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn info(&self) -> Result<DeviceInfo, ControlError> {
        self.info_calls.fetch_add(1, Ordering::SeqCst);
        Ok(DeviceInfo {
            name: "mock".into(),
            led_count: 3,
        })
    }
}
