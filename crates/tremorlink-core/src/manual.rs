//! Manual actuator control
//!
//! Lets the operator drive the actuator level directly instead of replaying
//! a signal.

use tracing::{info, warn};

use crate::protocol::{DeviceCommand, ProtocolError};
use crate::session::DeviceSink;

/// Actuator level at rest
pub const MANUAL_RESET_VALUE: u8 = 128;

/// Clamp an arbitrary level into the actuator range
pub fn clamp_level(level: f64) -> u8 {
    if level.is_nan() {
        return MANUAL_RESET_VALUE;
    }
    level.round().clamp(0.0, 255.0) as u8
}

pub struct ManualControl<D: DeviceSink> {
    device: D,
    value: u8,
    active: bool,
}

impl<D: DeviceSink> ManualControl<D> {
    pub fn new(device: D) -> Self {
        Self {
            device,
            value: MANUAL_RESET_VALUE,
            active: false,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn value(&self) -> u8 {
        self.value
    }

    /// Take control of the actuator at the current level
    pub fn start(&mut self) -> Result<(), ProtocolError> {
        if !self.device.is_open() {
            warn!("Cannot start manual control: device not connected");
            return Err(ProtocolError::NotConnected);
        }
        self.device.send(
            &DeviceCommand::StartManualControl { value: self.value }.into(),
        )?;
        self.active = true;
        info!("Manual control started at {}", self.value);
        Ok(())
    }

    /// Change the level; sent immediately while active
    pub fn set(&mut self, value: u8) -> Result<(), ProtocolError> {
        self.value = value;
        if self.active {
            self.device
                .send(&DeviceCommand::ManualControl { value }.into())?;
        }
        Ok(())
    }

    /// Back to the rest level
    pub fn reset(&mut self) -> Result<(), ProtocolError> {
        self.set(MANUAL_RESET_VALUE)
    }

    /// Release control. Only sends when active and connected.
    pub fn stop(&mut self) -> Result<(), ProtocolError> {
        if !self.active {
            return Ok(());
        }
        self.active = false;
        if self.device.is_open() {
            self.device.send(&DeviceCommand::StopManualControl.into())?;
        }
        info!("Manual control stopped");
        Ok(())
    }

    pub fn toggle(&mut self) -> Result<(), ProtocolError> {
        if self.active {
            self.stop()
        } else {
            self.start()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::OutboundMessage;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Device {
        open: AtomicBool,
        sent: Mutex<Vec<OutboundMessage>>,
    }

    impl DeviceSink for Device {
        fn is_open(&self) -> bool {
            self.open.load(Ordering::SeqCst)
        }

        fn send(&self, message: &OutboundMessage) -> Result<(), ProtocolError> {
            self.sent.lock().unwrap().push(message.clone());
            Ok(())
        }
    }

    fn sent(device: &Device) -> Vec<OutboundMessage> {
        device.sent.lock().unwrap().clone()
    }

    #[test]
    fn test_manual_session() {
        let device = Arc::new(Device::default());
        device.open.store(true, Ordering::SeqCst);
        let mut manual = ManualControl::new(Arc::clone(&device));

        manual.set(40).unwrap();
        assert!(sent(&device).is_empty());

        manual.start().unwrap();
        manual.set(200).unwrap();
        manual.reset().unwrap();
        manual.stop().unwrap();
        manual.stop().unwrap();

        let expected: Vec<OutboundMessage> = vec![
            DeviceCommand::StartManualControl { value: 40 }.into(),
            DeviceCommand::ManualControl { value: 200 }.into(),
            DeviceCommand::ManualControl { value: 128 }.into(),
            DeviceCommand::StopManualControl.into(),
        ];
        assert_eq!(sent(&device), expected);
    }

    #[test]
    fn test_start_requires_connection() {
        let device = Arc::new(Device::default());
        let mut manual = ManualControl::new(Arc::clone(&device));
        assert!(matches!(manual.toggle(), Err(ProtocolError::NotConnected)));
        assert!(!manual.is_active());
        assert!(sent(&device).is_empty());
    }

    #[test]
    fn test_clamp_level() {
        assert_eq!(clamp_level(-5.0), 0);
        assert_eq!(clamp_level(300.0), 255);
        assert_eq!(clamp_level(99.6), 100);
        assert_eq!(clamp_level(f64::NAN), 128);
    }
}
