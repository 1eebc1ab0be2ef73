//! Smart plug control and switch effects.

use super::{EffectRegistry, SwitchEffect};
use crate::error::ControlError;
use crate::model::SwitchApiType;
use crate::protocol::control::HTTP;
use log::warn;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

pub trait SwitchControl: Send + Sync {
    fn turn_on(&self) -> Result<(), ControlError>;
    fn turn_off(&self) -> Result<(), ControlError>;
}

/// Athom plug running ESPHome's REST API.
pub struct AthomSwitch {
    base_url: String,
}

impl AthomSwitch {
    pub fn new(ip_address: &str, api_type: SwitchApiType) -> Self {
        let component = match api_type {
            SwitchApiType::AthomType1 => "smart_plug_v2",
            SwitchApiType::AthomType2 => "switch",
        };
        Self {
            base_url: format!("http://{}/switch/{}", ip_address, component),
        }
    }

    pub fn url(&self, action: &str) -> String {
        format!("{}/{}", self.base_url, action)
    }

    fn post(&self, action: &str) -> Result<(), ControlError> {
        let res = HTTP.post(self.url(action)).send()?;
        if !res.status().is_success() {
            return Err(ControlError::Status(res.status().as_u16()));
        }
        Ok(())
    }
}

impl SwitchControl for AthomSwitch {
    fn turn_on(&self) -> Result<(), ControlError> {
        self.post("turn_on")
    }

    fn turn_off(&self) -> Result<(), ControlError> {
        self.post("turn_off")
    }
}

pub fn register_builtins(registry: &mut EffectRegistry) {
    registry.register_switch("turnOffThenOn", |_props, control| Ok(Box::new(TurnOffThenOn::new(control))));
}

/// Plug off while the event is active, back on once it ends.
pub struct TurnOffThenOn {
    control: Arc<dyn SwitchControl>,
    pending: Option<JoinHandle<()>>,
}

impl TurnOffThenOn {
    pub fn new(control: Arc<dyn SwitchControl>) -> Self {
        Self { control, pending: None }
    }
}

impl SwitchEffect for TurnOffThenOn {
    fn start(&mut self) {
        let control = Arc::clone(&self.control);
        self.pending = Some(thread::spawn(move || {
            if let Err(e) = control.turn_off() {
                warn!("[SWITCH] turn_off failed: {}", e);
            }
        }));
    }

    fn stop(&mut self) {
        let control = Arc::clone(&self.control);
        let previous = self.pending.take();
        thread::spawn(move || {
            // Keep off/on ordered on the device.
            if let Some(handle) = previous {
                let _ = handle.join();
            }
            if let Err(e) = control.turn_on() {
                warn!("[SWITCH] turn_on failed: {}", e);
            }
        });
    }
}
