//! Frame-by-frame evaluation of a sequence into live effect instances.
//!
//! The evaluator keeps one [`RuntimeEffectInstance`] per active event id.
//! An instance survives for as long as its event stays active, so plug-ins
//! can carry state from frame to frame. When the active id list is unchanged
//! and the sequence has not been edited, nothing is built or dropped.

use crate::effects::{EffectContext, EffectRegistry, StringEffect, SwitchControl, SwitchEffect};
use crate::model::{AppliesTo, Event, EventKind, Sequence};
use crate::pixels::PixelTarget;
use log::{debug, warn};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_INSTANCE_ID: AtomicU64 = AtomicU64::new(1);

/// Resolves an event's `appliesTo` into concrete device targets.
pub trait TargetCatalog {
    /// Ids of string devices (physical or virtual) an event draws into.
    fn string_targets(&self, applies_to: &AppliesTo) -> Vec<String>;
    fn switch_targets(&self, applies_to: &AppliesTo) -> Vec<(String, Arc<dyn SwitchControl>)>;
}

/// Pixel surfaces by device id.
pub trait RenderTargets {
    /// Runs `f` against the target; returns `false` when the id is unknown.
    fn with_target(&mut self, id: &str, f: &mut dyn FnMut(&mut dyn PixelTarget)) -> bool;
}

/// Playback cursor within one sequence.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Playhead {
    pub frame: u32,
    pub loop_count: u32,
}

impl Playhead {
    /// Steps one frame. Returns `true` when the playhead wrapped back to 0.
    pub fn advance(&mut self, num_frames: u32) -> bool {
        self.frame += 1;
        if self.frame >= num_frames {
            self.frame = 0;
            self.loop_count += 1;
            return true;
        }
        false
    }
}

pub struct RuntimeEffectInstance {
    instance_id: u64,
    event: Event,
    string_effects: Vec<(String, Box<dyn StringEffect>)>,
    switch_effects: Vec<Box<dyn SwitchEffect>>,
}

impl RuntimeEffectInstance {
    fn build(event: &Event, registry: &EffectRegistry, catalog: &dyn TargetCatalog) -> Self {
        let mut instance = Self {
            instance_id: NEXT_INSTANCE_ID.fetch_add(1, Ordering::Relaxed),
            event: event.clone(),
            string_effects: Vec::new(),
            switch_effects: Vec::new(),
        };
        instance.attach(registry, catalog);
        instance
    }

    /// Construct plug-in state for every target of the current event snapshot.
    fn attach(&mut self, registry: &EffectRegistry, catalog: &dyn TargetCatalog) {
        let event = &self.event;
        let def = event.effect_definition_id.as_str();

        match event.kind {
            EventKind::StringEffect => {
                if !registry.has_string(def) {
                    warn!("[TIMELINE] Unknown string effect '{}' on event {}", def, event.id);
                    return;
                }
                for target in catalog.string_targets(&event.applies_to) {
                    match registry.create_string(def, &event.props) {
                        Some(Ok(effect)) => self.string_effects.push((target, effect)),
                        Some(Err(e)) => {
                            warn!("[TIMELINE] Could not build '{}' for event {}: {}", def, event.id, e);
                            return;
                        }
                        None => return,
                    }
                }
            }
            EventKind::SwitchEffect => {
                if !registry.has_switch(def) {
                    warn!("[TIMELINE] Unknown switch effect '{}' on event {}", def, event.id);
                    return;
                }
                for (switch_id, control) in catalog.switch_targets(&event.applies_to) {
                    match registry.create_switch(def, &event.props, control) {
                        Some(Ok(mut effect)) => {
                            debug!("[TIMELINE] Starting '{}' on switch {}", def, switch_id);
                            effect.start();
                            self.switch_effects.push(effect);
                        }
                        Some(Err(e)) => {
                            warn!("[TIMELINE] Could not build '{}' for event {}: {}", def, event.id, e);
                            return;
                        }
                        None => return,
                    }
                }
            }
        }
    }

    fn detach(&mut self) {
        self.string_effects.clear();
        for mut effect in self.switch_effects.drain(..) {
            effect.stop();
        }
    }

    /// Take the latest authored version of the event. Plug-in state is only
    /// rebuilt when something that shapes it changed.
    fn refresh(&mut self, event: &Event, registry: &EffectRegistry, catalog: &dyn TargetCatalog) {
        let reshaped = event.effect_definition_id != self.event.effect_definition_id
            || event.kind != self.event.kind
            || event.props != self.event.props
            || event.applies_to != self.event.applies_to;
        self.event = event.clone();
        if reshaped {
            self.detach();
            self.attach(registry, catalog);
        }
    }

    pub fn instance_id(&self) -> u64 {
        self.instance_id
    }

    pub fn event(&self) -> &Event {
        &self.event
    }

    pub fn event_id(&self) -> &str {
        &self.event.id
    }

    /// Target ids that currently have string plug-in state.
    pub fn string_targets(&self) -> impl Iterator<Item = &str> {
        self.string_effects.iter().map(|(id, _)| id.as_str())
    }

    pub fn context(&self, frame: u32, loop_count: u32, frame_ms: f32) -> EffectContext {
        let effect_frame = frame.saturating_sub(self.event.start_frame);
        let span = self.event.span().max(1);
        EffectContext {
            effect_frame,
            effect_playback_ratio: effect_frame as f32 / span as f32,
            loop_count,
            frame_ms,
        }
    }

    fn render(&mut self, ctx: &EffectContext, targets: &mut dyn RenderTargets) {
        let event_id = &self.event.id;
        for (target_id, effect) in self.string_effects.iter_mut() {
            let mut result = Ok(());
            let found = targets.with_target(target_id, &mut |surface: &mut dyn PixelTarget| {
                result = effect.render(surface, ctx);
            });
            if !found {
                debug!("[TIMELINE] Target {} for event {} is gone", target_id, event_id);
            }
            if let Err(e) = result {
                warn!("[TIMELINE] Effect on event {} failed for {}: {}", event_id, target_id, e);
            }
        }
    }
}

impl Drop for RuntimeEffectInstance {
    fn drop(&mut self) {
        self.detach();
    }
}

#[derive(Default)]
pub struct TimelineEvaluator {
    instances: Vec<RuntimeEffectInstance>,
    active_ids: Vec<String>,
    sequence: Option<(String, u64)>,
}

impl TimelineEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update_active_effects(
        &mut self,
        sequence: Option<&Sequence>,
        frame: u32,
        registry: &EffectRegistry,
        catalog: &dyn TargetCatalog,
    ) -> &[RuntimeEffectInstance] {
        let Some(sequence) = sequence else {
            self.clear();
            return &self.instances;
        };

        let same_sequence = matches!(&self.sequence, Some((id, _)) if *id == sequence.id);
        if !same_sequence {
            self.clear();
        }
        let edited = !matches!(&self.sequence, Some((_, rev)) if *rev == sequence.revision);
        self.sequence = Some((sequence.id.clone(), sequence.revision));

        let active: Vec<&Event> = sequence.events().filter(|e| e.is_active_at(frame)).collect();
        let unchanged = !edited
            && active.len() == self.active_ids.len()
            && active.iter().zip(&self.active_ids).all(|(e, id)| e.id == *id);
        if unchanged {
            return &self.instances;
        }

        let mut previous: HashMap<String, RuntimeEffectInstance> = self
            .instances
            .drain(..)
            .map(|instance| (instance.event.id.clone(), instance))
            .collect();

        for event in &active {
            let instance = match previous.remove(&event.id) {
                Some(mut existing) => {
                    if edited {
                        existing.refresh(event, registry, catalog);
                    }
                    existing
                }
                None => {
                    debug!("[TIMELINE] Event {} active at frame {}", event.id, frame);
                    RuntimeEffectInstance::build(event, registry, catalog)
                }
            };
            self.instances.push(instance);
        }
        self.active_ids = active.iter().map(|e| e.id.clone()).collect();

        for id in previous.keys() {
            debug!("[TIMELINE] Event {} ended at frame {}", id, frame);
        }
        drop(previous);

        &self.instances
    }

    /// Let every active effect draw, in track order.
    pub fn render(&mut self, frame: u32, loop_count: u32, frame_ms: f32, targets: &mut dyn RenderTargets) {
        for instance in self.instances.iter_mut() {
            let ctx = instance.context(frame, loop_count, frame_ms);
            instance.render(&ctx, targets);
        }
    }

    pub fn instances(&self) -> &[RuntimeEffectInstance] {
        &self.instances
    }

    /// Drop every instance (stopping switch effects).
    pub fn clear(&mut self) {
        self.instances.clear();
        self.active_ids.clear();
        self.sequence = None;
    }
}

/// One sequence played standalone: its playhead plus the evaluator.
#[derive(Default)]
pub struct SequenceRuntime {
    pub playhead: Playhead,
    pub evaluator: TimelineEvaluator,
    sequence_id: Option<String>,
}

impl SequenceRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sequence_id(&self) -> Option<&str> {
        self.sequence_id.as_deref()
    }

    /// Switch to another sequence, starting at frame 0 with a fresh loop count.
    pub fn set_sequence(&mut self, sequence_id: Option<&str>) {
        self.start(sequence_id, 0);
    }

    /// Switch to another sequence at frame 0, carrying over a known loop count.
    pub fn start(&mut self, sequence_id: Option<&str>, loop_count: u32) {
        self.sequence_id = sequence_id.map(str::to_string);
        self.playhead = Playhead { frame: 0, loop_count };
        self.evaluator.clear();
    }

    pub fn advance(&mut self, sequence: &Sequence) -> bool {
        self.playhead.advance(sequence.num_frames)
    }

    pub fn evaluate(
        &mut self,
        sequence: Option<&Sequence>,
        registry: &EffectRegistry,
        catalog: &dyn TargetCatalog,
    ) -> &[RuntimeEffectInstance] {
        self.evaluator
            .update_active_effects(sequence, self.playhead.frame, registry, catalog)
    }

    pub fn render(&mut self, frame_ms: f32, targets: &mut dyn RenderTargets) {
        let Playhead { frame, loop_count } = self.playhead;
        self.evaluator.render(frame, loop_count, frame_ms, targets);
    }
}
