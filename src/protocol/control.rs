//! Out-of-band control channel to a WLED controller (JSON HTTP API).

use crate::error::ControlError;
use once_cell::sync::Lazy;
use reqwest::blocking::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

/// One HTTP client for every device; reqwest pools connections internally.
pub(crate) static HTTP: Lazy<Client> = Lazy::new(|| {
    Client::builder()
        .timeout(Duration::from_secs(2))
        .build()
        .unwrap_or_else(|_| Client::new())
});

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    #[serde(default)]
    pub name: String,
    pub led_count: u32,
}

#[derive(Deserialize)]
struct RawInfo {
    #[serde(default)]
    name: String,
    leds: RawLeds,
}

#[derive(Deserialize)]
struct RawLeds {
    count: u32,
}

/// Request/response calls that sit beside the pixel stream.
pub trait DeviceControl: Send + Sync {
    fn power_on(&self) -> Result<(), ControlError>;
    fn power_off(&self) -> Result<(), ControlError>;
    fn set_brightness(&self, value: u8) -> Result<(), ControlError>;
    fn info(&self) -> Result<DeviceInfo, ControlError>;
}

pub struct WledControl {
    base_url: String,
}

impl WledControl {
    pub fn new(host: &str) -> Self {
        Self {
            base_url: format!("http://{}", host),
        }
    }

    fn post_state(&self, body: serde_json::Value) -> Result<(), ControlError> {
        let res = HTTP.post(format!("{}/json/state", self.base_url)).json(&body).send()?;
        if !res.status().is_success() {
            return Err(ControlError::Status(res.status().as_u16()));
        }
        Ok(())
    }
}

impl DeviceControl for WledControl {
    fn power_on(&self) -> Result<(), ControlError> {
        self.post_state(json!({ "on": true }))
    }

    fn power_off(&self) -> Result<(), ControlError> {
        self.post_state(json!({ "on": false }))
    }

    fn set_brightness(&self, value: u8) -> Result<(), ControlError> {
        self.post_state(json!({ "bri": value }))
    }

    fn info(&self) -> Result<DeviceInfo, ControlError> {
        let res = HTTP.get(format!("{}/json/info", self.base_url)).send()?;
        if !res.status().is_success() {
            return Err(ControlError::Status(res.status().as_u16()));
        }
        let raw: RawInfo = res.json()?;
        Ok(DeviceInfo {
            name: raw.name,
            led_count: raw.leds.count,
        })
    }
}
