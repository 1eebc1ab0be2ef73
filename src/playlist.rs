//! Walks a playlist's sequences in order, looping forever.

use crate::effects::EffectRegistry;
use crate::model::{Playlist, Sequence};
use crate::project::Project;
use crate::timeline::{RenderTargets, RuntimeEffectInstance, SequenceRuntime, TargetCatalog};
use log::{info, warn};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerState {
    Stopped,
    Playing,
}

pub struct PlaylistPlayer {
    playlist_id: String,
    current_index: Option<usize>,
    state: PlayerState,
    runtime: SequenceRuntime,
    /// Loop counts survive moving between entries so effects can tell a
    /// replay from a first play.
    loop_counts: HashMap<String, u32>,
    warned_unresolved: bool,
}

impl PlaylistPlayer {
    pub fn new(playlist_id: &str) -> Self {
        Self {
            playlist_id: playlist_id.to_string(),
            current_index: None,
            state: PlayerState::Stopped,
            runtime: SequenceRuntime::new(),
            loop_counts: HashMap::new(),
            warned_unresolved: false,
        }
    }

    pub fn playlist_id(&self) -> &str {
        &self.playlist_id
    }

    pub fn state(&self) -> PlayerState {
        self.state
    }

    pub fn is_playing(&self) -> bool {
        self.state == PlayerState::Playing
    }

    pub fn current_index(&self) -> Option<usize> {
        self.current_index
    }

    pub fn runtime(&self) -> &SequenceRuntime {
        &self.runtime
    }

    pub fn loop_count(&self, sequence_id: &str) -> u32 {
        if self.runtime.sequence_id() == Some(sequence_id) {
            return self.runtime.playhead.loop_count;
        }
        self.loop_counts.get(sequence_id).copied().unwrap_or(0)
    }

    pub fn play(&mut self) {
        if self.current_index.is_none() {
            self.current_index = Some(0);
        }
        self.state = PlayerState::Playing;
        info!("[PLAYLIST] Playing {} from entry {:?}", self.playlist_id, self.current_index);
    }

    pub fn pause(&mut self) {
        self.state = PlayerState::Stopped;
    }

    pub fn stop(&mut self) {
        self.state = PlayerState::Stopped;
    }

    fn playlist<'a>(&self, project: &'a Project) -> Option<&'a Playlist> {
        project.playlist(&self.playlist_id)
    }

    /// The sequence under `current_index`, if it still resolves.
    pub fn current_sequence<'a>(&self, project: &'a Project) -> Option<&'a Sequence> {
        let playlist = self.playlist(project)?;
        let id = playlist.sequence_ids.get(self.current_index?)?;
        project.sequence(id)
    }

    /// Make sure the runtime is bound to the current entry, resetting the
    /// playhead when the entry changed.
    fn sync_runtime(&mut self, project: &Project) -> Option<String> {
        let playlist = self.playlist(project)?;
        if playlist.sequence_ids.is_empty() {
            return None;
        }
        let index = match self.current_index {
            Some(i) if i < playlist.sequence_ids.len() => i,
            _ => 0,
        };
        self.current_index = Some(index);

        let sequence_id = playlist.sequence_ids[index].clone();
        if self.runtime.sequence_id() != Some(sequence_id.as_str()) {
            self.enter(&sequence_id);
        }
        Some(sequence_id)
    }

    fn enter(&mut self, sequence_id: &str) {
        if let Some(previous) = self.runtime.sequence_id() {
            self.loop_counts.insert(previous.to_string(), self.runtime.playhead.loop_count);
        }
        let loop_count = self.loop_counts.get(sequence_id).copied().unwrap_or(0);
        self.runtime.start(Some(sequence_id), loop_count);
    }

    /// Step the current sequence by one frame, moving to the next entry when
    /// it wraps. Returns `true` when the entry changed.
    pub fn advance_frame(&mut self, project: &Project) -> bool {
        if !self.is_playing() {
            return false;
        }
        let Some(sequence_id) = self.sync_runtime(project) else {
            return false;
        };
        let Some(sequence) = project.sequence(&sequence_id) else {
            if !self.warned_unresolved {
                warn!("[PLAYLIST] Sequence {} in playlist {} does not exist", sequence_id, self.playlist_id);
                self.warned_unresolved = true;
            }
            return false;
        };
        self.warned_unresolved = false;

        if !self.runtime.advance(sequence) {
            return false;
        }

        let Some(len) = self.playlist(project).map(|p| p.sequence_ids.len()) else {
            return false;
        };
        let next = self.current_index.map_or(0, |i| (i + 1) % len);
        self.current_index = Some(next);
        if let Some(next_id) = self.playlist(project).and_then(|p| p.sequence_ids.get(next)).cloned() {
            info!("[PLAYLIST] {} finished, moving to {} (entry {})", sequence_id, next_id, next);
            // Remember the wrap before leaving, even when the next entry is the same sequence.
            self.loop_counts.insert(sequence_id.clone(), self.runtime.playhead.loop_count);
            let loop_count = self.loop_counts.get(&next_id).copied().unwrap_or(0);
            self.runtime.start(Some(&next_id), loop_count);
        }
        true
    }

    /// Re-evaluate active effects for the current frame.
    pub fn evaluate(
        &mut self,
        project: &Project,
        registry: &EffectRegistry,
        catalog: &dyn TargetCatalog,
    ) -> &[RuntimeEffectInstance] {
        let resolved = if self.is_playing() {
            self.sync_runtime(project);
            self.current_sequence(project)
        } else {
            None
        };
        self.runtime.evaluate(resolved, registry, catalog)
    }

    pub fn render(&mut self, frame_ms: f32, targets: &mut dyn RenderTargets) {
        if self.is_playing() {
            self.runtime.render(frame_ms, targets);
        }
    }

    /// One playback tick: advance, evaluate, render.
    pub fn tick(
        &mut self,
        project: &Project,
        registry: &EffectRegistry,
        catalog: &dyn TargetCatalog,
        targets: &mut dyn RenderTargets,
        frame_ms: f32,
    ) {
        self.advance_frame(project);
        self.evaluate(project, registry, catalog);
        self.render(frame_ms, targets);
    }
}
