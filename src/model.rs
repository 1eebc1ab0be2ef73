use crate::error::TimelineError;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

pub const DEFAULT_DDP_PORT: u16 = 4048;
pub const DEFAULT_FRAMERATE: u32 = 60;

fn default_port() -> u16 {
    DEFAULT_DDP_PORT
}

fn default_brightness() -> u8 {
    255
}

fn default_framerate() -> u32 {
    DEFAULT_FRAMERATE
}

/// A physical WLED string reachable over DDP.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StringDevice {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub ip_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub led_count: u32,
    #[serde(default = "default_brightness")]
    pub brightness: u8,
}

impl StringDevice {
    /// Host/port pair; a change here means the connection must be rebuilt.
    pub fn identity(&self) -> (&str, u16) {
        (&self.ip_address, self.port)
    }
}

/// Partial update for a string device; `None` fields are left untouched.
#[derive(Default, Clone, Debug)]
pub struct StringUpdate {
    pub name: Option<String>,
    pub led_count: Option<u32>,
    pub ip_address: Option<String>,
    pub port: Option<u16>,
    pub brightness: Option<u8>,
}

impl StringDevice {
    pub fn apply(&mut self, update: StringUpdate) {
        if let Some(name) = update.name {
            self.name = name;
        }
        if let Some(led_count) = update.led_count {
            self.led_count = led_count;
        }
        if let Some(ip) = update.ip_address {
            self.ip_address = ip;
        }
        if let Some(port) = update.port {
            self.port = port;
        }
        if let Some(brightness) = update.brightness {
            self.brightness = brightness;
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Segment {
    pub node_id: String,
    pub from_index: u32,
    pub to_index: u32,
}

impl Segment {
    /// Number of LEDs covered; reversed segments count the same as forward ones.
    /// Saturates at `u32::MAX` for a segment spanning the whole index range.
    pub fn len(&self) -> u32 {
        self.from_index.abs_diff(self.to_index).saturating_add(1)
    }

    /// Physical indices covered, ascending, clipped to `0..led_count`.
    pub fn clipped_range(&self, led_count: u32) -> std::ops::Range<u32> {
        let low = self.from_index.min(self.to_index);
        let high = self.from_index.max(self.to_index);
        let end = high.saturating_add(1).min(led_count);
        low.min(end)..end
    }

    pub fn is_reversed(&self) -> bool {
        self.from_index > self.to_index
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VirtualStringDevice {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub segments: Vec<Segment>,
}

impl VirtualStringDevice {
    pub fn led_count(&self) -> u32 {
        self.segments.iter().fold(0u32, |total, s| total.saturating_add(s.len()))
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SwitchApiType {
    #[default]
    AthomType1,
    AthomType2,
}

/// HTTP smart plug toggled by switch effects.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SwitchDevice {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub ip_address: String,
    #[serde(default)]
    pub api_type: SwitchApiType,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    StringEffect,
    SwitchEffect,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "kind")]
pub enum AppliesTo {
    #[serde(rename = "all_nodes")]
    AllNodes,
    #[serde(rename = "nodes")]
    Nodes {
        #[serde(rename = "nodeIds")]
        node_ids: Vec<String>,
    },
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: String,
    pub start_frame: u32,
    /// Exclusive.
    pub end_frame: u32,
    pub kind: EventKind,
    pub effect_definition_id: String,
    pub applies_to: AppliesTo,
    #[serde(default)]
    pub props: serde_json::Value,
}

impl Event {
    pub fn is_active_at(&self, frame: u32) -> bool {
        frame >= self.start_frame && frame < self.end_frame
    }

    pub fn span(&self) -> u32 {
        self.end_frame.saturating_sub(self.start_frame)
    }
}

#[derive(Default, Clone, Debug)]
pub struct EventUpdate {
    pub start_frame: Option<u32>,
    pub end_frame: Option<u32>,
    pub effect_definition_id: Option<String>,
    pub kind: Option<EventKind>,
    pub applies_to: Option<AppliesTo>,
    pub props: Option<serde_json::Value>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Track {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub events: Vec<Event>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Sequence {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub num_frames: u32,
    #[serde(default)]
    pub tracks: Vec<Track>,
    /// Bumped on every authored mutation so runtimes can refresh cached event data.
    #[serde(skip)]
    pub revision: u64,
}

fn check_range(start: u32, end: u32) -> Result<(), TimelineError> {
    if start >= end {
        return Err(TimelineError::InvalidEventRange { start, end });
    }
    Ok(())
}

/// `<prefix>-<millis>-<7 random chars>`, unique enough for authored ids.
pub fn generate_id(prefix: &str) -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(7)
        .map(|c| (c as char).to_ascii_lowercase())
        .collect();
    format!("{}-{}-{}", prefix, millis, suffix)
}

impl Sequence {
    fn track_index(&self, track_id: &str) -> Result<usize, TimelineError> {
        self.tracks
            .iter()
            .position(|t| t.id == track_id)
            .ok_or_else(|| TimelineError::TrackNotFound {
                sequence_id: self.id.clone(),
                track_id: track_id.to_string(),
            })
    }

    fn track_mut(&mut self, track_id: &str) -> Result<&mut Track, TimelineError> {
        let idx = self.track_index(track_id)?;
        Ok(&mut self.tracks[idx])
    }

    fn touch(&mut self) {
        self.revision = self.revision.wrapping_add(1);
    }

    /// Events in render order: track order, then insertion order.
    pub fn events(&self) -> impl Iterator<Item = &Event> {
        self.tracks.iter().flat_map(|t| t.events.iter())
    }

    pub fn find_event(&self, event_id: &str) -> Option<&Event> {
        self.events().find(|e| e.id == event_id)
    }

    /// Appends a track, generating an id and "Track N" name when none is given.
    pub fn add_track(&mut self, track: Option<Track>) -> String {
        let track = track.unwrap_or_else(|| Track {
            id: generate_id("track"),
            name: format!("Track {}", self.tracks.len() + 1),
            events: Vec::new(),
        });
        let id = track.id.clone();
        self.tracks.push(track);
        self.touch();
        id
    }

    pub fn remove_track(&mut self, track_id: &str) {
        if let Some(idx) = self.tracks.iter().position(|t| t.id == track_id) {
            self.tracks.remove(idx);
            self.touch();
        }
    }

    pub fn rename_track(&mut self, track_id: &str, name: &str) -> Result<(), TimelineError> {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            return Err(TimelineError::EmptyTrackName(track_id.to_string()));
        }
        self.track_mut(track_id)?.name = trimmed.to_string();
        self.touch();
        Ok(())
    }

    /// Copies a track (with fresh event ids) directly after the original. Returns the new track id.
    pub fn duplicate_track(&mut self, track_id: &str) -> Result<String, TimelineError> {
        let idx = self.track_index(track_id)?;
        let original = &self.tracks[idx];

        let base_name = format!("{} Copy", original.name);
        let mut name = base_name.clone();
        let mut suffix = 2;
        while self.tracks.iter().any(|t| t.name == name) {
            name = format!("{} {}", base_name, suffix);
            suffix += 1;
        }

        let events = original
            .events
            .iter()
            .map(|e| Event {
                id: generate_id("event"),
                ..e.clone()
            })
            .collect();

        let new_id = generate_id("track");
        self.tracks.insert(
            idx + 1,
            Track {
                id: new_id.clone(),
                name,
                events,
            },
        );
        self.touch();
        Ok(new_id)
    }

    pub fn reorder_track(&mut self, track_id: &str, target_index: usize) -> Result<(), TimelineError> {
        let current = self.track_index(track_id)?;
        if current == target_index {
            return Ok(());
        }
        let track = self.tracks.remove(current);
        let target = target_index.min(self.tracks.len());
        self.tracks.insert(target, track);
        self.touch();
        Ok(())
    }

    pub fn add_event(&mut self, track_id: &str, event: Event) -> Result<(), TimelineError> {
        check_range(event.start_frame, event.end_frame)?;
        self.track_mut(track_id)?.events.push(event);
        self.touch();
        Ok(())
    }

    pub fn update_event(&mut self, track_id: &str, event_id: &str, update: EventUpdate) -> Result<(), TimelineError> {
        let track = self.track_mut(track_id)?;
        let event = track
            .events
            .iter_mut()
            .find(|e| e.id == event_id)
            .ok_or_else(|| TimelineError::EventNotFound {
                track_id: track_id.to_string(),
                event_id: event_id.to_string(),
            })?;

        let start = update.start_frame.unwrap_or(event.start_frame);
        let end = update.end_frame.unwrap_or(event.end_frame);
        check_range(start, end)?;

        event.start_frame = start;
        event.end_frame = end;
        if let Some(def) = update.effect_definition_id {
            event.effect_definition_id = def;
        }
        if let Some(kind) = update.kind {
            event.kind = kind;
        }
        if let Some(applies_to) = update.applies_to {
            event.applies_to = applies_to;
        }
        if let Some(props) = update.props {
            event.props = props;
        }
        self.touch();
        Ok(())
    }

    pub fn remove_event(&mut self, track_id: &str, event_id: &str) -> Result<(), TimelineError> {
        let track = self.track_mut(track_id)?;
        if let Some(idx) = track.events.iter().position(|e| e.id == event_id) {
            track.events.remove(idx);
            self.touch();
        }
        Ok(())
    }

    /// Moves an event to the end of another track, optionally retiming it.
    pub fn move_event(
        &mut self,
        source_track_id: &str,
        target_track_id: &str,
        event_id: &str,
        start_frame: Option<u32>,
        end_frame: Option<u32>,
    ) -> Result<(), TimelineError> {
        let source = self.track_index(source_track_id)?;
        let event_idx = self.tracks[source]
            .events
            .iter()
            .position(|e| e.id == event_id)
            .ok_or_else(|| TimelineError::EventNotFound {
                track_id: source_track_id.to_string(),
                event_id: event_id.to_string(),
            })?;
        let target = self.track_index(target_track_id)?;

        let event = &self.tracks[source].events[event_idx];
        let start = start_frame.unwrap_or(event.start_frame);
        let end = end_frame.unwrap_or(event.end_frame);
        check_range(start, end)?;

        let mut event = self.tracks[source].events.remove(event_idx);
        event.start_frame = start;
        event.end_frame = end;
        self.tracks[target].events.push(event);
        self.touch();
        Ok(())
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Playlist {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub sequence_ids: Vec<String>,
}

impl Playlist {
    pub fn add_sequence(&mut self, sequence_id: &str) {
        self.sequence_ids.push(sequence_id.to_string());
    }

    /// Removes the first occurrence only; duplicates are allowed in a playlist.
    pub fn remove_sequence(&mut self, sequence_id: &str) {
        if let Some(idx) = self.sequence_ids.iter().position(|s| s == sequence_id) {
            self.sequence_ids.remove(idx);
        }
    }

    pub fn remove_sequence_by_index(&mut self, index: usize) {
        if index < self.sequence_ids.len() {
            self.sequence_ids.remove(index);
        }
    }

    pub fn reorder_sequences(&mut self, old_index: usize, new_index: usize) {
        let len = self.sequence_ids.len();
        if old_index == new_index || old_index >= len || new_index >= len {
            return;
        }
        let moved = self.sequence_ids.remove(old_index);
        self.sequence_ids.insert(new_index, moved);
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProjectSettings {
    #[serde(default = "default_framerate")]
    pub default_framerate: u32,
}

impl Default for ProjectSettings {
    fn default() -> Self {
        Self {
            default_framerate: DEFAULT_FRAMERATE,
        }
    }
}
