//! Effect plug-in contract and the registry that maps `effectDefinitionId`
//! to a constructor.
//!
//! A string effect gets a [`PixelTarget`] plus an [`EffectContext`] every
//! tick. A switch effect is started when its event becomes active and stopped
//! when the owning instance is dropped.

pub mod string;
pub mod switch;

use crate::pixels::PixelTarget;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::Arc;

pub use switch::{AthomSwitch, SwitchControl};

/// Per-tick view of where an effect sits inside its event.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EffectContext {
    /// Frames since the event's start frame.
    pub effect_frame: u32,
    /// Position in the event span, `0.0..1.0`.
    pub effect_playback_ratio: f32,
    /// Loop count of the owning sequence; a change means the sequence restarted.
    pub loop_count: u32,
    /// Tick period.
    pub frame_ms: f32,
}

pub trait StringEffect: Send {
    fn render(&mut self, target: &mut dyn PixelTarget, ctx: &EffectContext) -> anyhow::Result<()>;
}

pub trait SwitchEffect: Send {
    fn start(&mut self);
    fn stop(&mut self);
}

pub type StringEffectFactory = Box<dyn Fn(&serde_json::Value) -> anyhow::Result<Box<dyn StringEffect>> + Send + Sync>;
pub type SwitchEffectFactory =
    Box<dyn Fn(&serde_json::Value, Arc<dyn SwitchControl>) -> anyhow::Result<Box<dyn SwitchEffect>> + Send + Sync>;

/// Deserialize effect props, treating a missing/null value as all defaults.
pub fn parse_props<T: DeserializeOwned + Default>(props: &serde_json::Value) -> anyhow::Result<T> {
    if props.is_null() {
        return Ok(T::default());
    }
    Ok(serde_json::from_value(props.clone())?)
}

#[derive(Default)]
pub struct EffectRegistry {
    string_effects: HashMap<String, StringEffectFactory>,
    switch_effects: HashMap<String, SwitchEffectFactory>,
}

impl EffectRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the reference effects.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        string::register_builtins(&mut registry);
        switch::register_builtins(&mut registry);
        registry
    }

    pub fn register_string<F>(&mut self, id: &str, factory: F)
    where
        F: Fn(&serde_json::Value) -> anyhow::Result<Box<dyn StringEffect>> + Send + Sync + 'static,
    {
        self.string_effects.insert(id.to_string(), Box::new(factory));
    }

    pub fn register_switch<F>(&mut self, id: &str, factory: F)
    where
        F: Fn(&serde_json::Value, Arc<dyn SwitchControl>) -> anyhow::Result<Box<dyn SwitchEffect>> + Send + Sync + 'static,
    {
        self.switch_effects.insert(id.to_string(), Box::new(factory));
    }

    /// `None` when the id is unknown.
    pub fn create_string(&self, id: &str, props: &serde_json::Value) -> Option<anyhow::Result<Box<dyn StringEffect>>> {
        self.string_effects.get(id).map(|factory| factory(props))
    }

    pub fn create_switch(
        &self,
        id: &str,
        props: &serde_json::Value,
        control: Arc<dyn SwitchControl>,
    ) -> Option<anyhow::Result<Box<dyn SwitchEffect>>> {
        self.switch_effects.get(id).map(|factory| factory(props, control))
    }

    pub fn has_string(&self, id: &str) -> bool {
        self.string_effects.contains_key(id)
    }

    pub fn has_switch(&self, id: &str) -> bool {
        self.switch_effects.contains_key(id)
    }
}
