//! The project document: devices, sequences and playlists, loaded from and
//! saved to a JSON file.
//!
//! Authored edits go through the methods on [`Project`] so every change is
//! announced on [`Project::changes`].

use crate::error::TimelineError;
use crate::model::{
    Event, EventUpdate, Playlist, ProjectSettings, Sequence, StringDevice, StringUpdate, SwitchDevice, Track,
    VirtualStringDevice,
};
use crate::signal::Signal;
use anyhow::{Context, Result};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProjectChange {
    Sequence(String),
    Playlist(String),
    String(String),
}

#[derive(Serialize, Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub settings: ProjectSettings,
    #[serde(default)]
    pub strings: Vec<StringDevice>,
    #[serde(default)]
    pub virtual_strings: Vec<VirtualStringDevice>,
    #[serde(default)]
    pub switches: Vec<SwitchDevice>,
    #[serde(default)]
    pub sequences: Vec<Sequence>,
    #[serde(default)]
    pub playlists: Vec<Playlist>,
    #[serde(skip)]
    pub changes: Signal<ProjectChange>,
}

pub fn load(path: &Path) -> Result<Project> {
    let json = fs::read_to_string(path).with_context(|| format!("Failed to read project at {:?}", path))?;
    let project: Project = serde_json::from_str(&json).with_context(|| format!("Invalid project JSON in {:?}", path))?;
    info!(
        "[PROJECT] Loaded '{}' ({} strings, {} virtual, {} switches, {} sequences, {} playlists)",
        project.name,
        project.strings.len(),
        project.virtual_strings.len(),
        project.switches.len(),
        project.sequences.len(),
        project.playlists.len()
    );
    Ok(project)
}

pub fn save(path: &Path, project: &Project) -> Result<()> {
    let json = serde_json::to_string_pretty(project)?;
    fs::write(path, json).with_context(|| format!("Failed to write project to {:?}", path))?;
    debug!("[PROJECT] Saved to {:?}", path);
    Ok(())
}

impl Project {
    pub fn sequence(&self, id: &str) -> Option<&Sequence> {
        self.sequences.iter().find(|s| s.id == id)
    }

    pub fn playlist(&self, id: &str) -> Option<&Playlist> {
        self.playlists.iter().find(|p| p.id == id)
    }

    pub fn string(&self, id: &str) -> Option<&StringDevice> {
        self.strings.iter().find(|s| s.id == id)
    }

    pub fn virtual_string(&self, id: &str) -> Option<&VirtualStringDevice> {
        self.virtual_strings.iter().find(|v| v.id == id)
    }

    fn sequence_mut(&mut self, id: &str) -> Result<&mut Sequence, TimelineError> {
        self.sequences
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| TimelineError::SequenceNotFound(id.to_string()))
    }

    fn playlist_mut(&mut self, id: &str) -> Result<&mut Playlist, TimelineError> {
        self.playlists
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or_else(|| TimelineError::PlaylistNotFound(id.to_string()))
    }

    /// Run an edit against one sequence and announce it.
    fn edit_sequence<T>(
        &mut self,
        sequence_id: &str,
        edit: impl FnOnce(&mut Sequence) -> Result<T, TimelineError>,
    ) -> Result<T, TimelineError> {
        let out = edit(self.sequence_mut(sequence_id)?)?;
        self.changes.dispatch(&ProjectChange::Sequence(sequence_id.to_string()));
        Ok(out)
    }

    fn edit_playlist(&mut self, playlist_id: &str, edit: impl FnOnce(&mut Playlist)) -> Result<(), TimelineError> {
        edit(self.playlist_mut(playlist_id)?);
        self.changes.dispatch(&ProjectChange::Playlist(playlist_id.to_string()));
        Ok(())
    }

    pub fn add_track(&mut self, sequence_id: &str, track: Option<Track>) -> Result<String, TimelineError> {
        self.edit_sequence(sequence_id, |s| Ok(s.add_track(track)))
    }

    pub fn remove_track(&mut self, sequence_id: &str, track_id: &str) -> Result<(), TimelineError> {
        self.edit_sequence(sequence_id, |s| {
            s.remove_track(track_id);
            Ok(())
        })
    }

    pub fn rename_track(&mut self, sequence_id: &str, track_id: &str, name: &str) -> Result<(), TimelineError> {
        self.edit_sequence(sequence_id, |s| s.rename_track(track_id, name))
    }

    pub fn duplicate_track(&mut self, sequence_id: &str, track_id: &str) -> Result<String, TimelineError> {
        self.edit_sequence(sequence_id, |s| s.duplicate_track(track_id))
    }

    pub fn reorder_track(&mut self, sequence_id: &str, track_id: &str, target_index: usize) -> Result<(), TimelineError> {
        self.edit_sequence(sequence_id, |s| s.reorder_track(track_id, target_index))
    }

    pub fn add_event(&mut self, sequence_id: &str, track_id: &str, event: Event) -> Result<(), TimelineError> {
        self.edit_sequence(sequence_id, |s| s.add_event(track_id, event))
    }

    pub fn update_event(
        &mut self,
        sequence_id: &str,
        track_id: &str,
        event_id: &str,
        update: EventUpdate,
    ) -> Result<(), TimelineError> {
        self.edit_sequence(sequence_id, |s| s.update_event(track_id, event_id, update))
    }

    pub fn remove_event(&mut self, sequence_id: &str, track_id: &str, event_id: &str) -> Result<(), TimelineError> {
        self.edit_sequence(sequence_id, |s| s.remove_event(track_id, event_id))
    }

    pub fn move_event(
        &mut self,
        sequence_id: &str,
        source_track_id: &str,
        target_track_id: &str,
        event_id: &str,
        start_frame: Option<u32>,
        end_frame: Option<u32>,
    ) -> Result<(), TimelineError> {
        self.edit_sequence(sequence_id, |s| {
            s.move_event(source_track_id, target_track_id, event_id, start_frame, end_frame)
        })
    }

    pub fn add_sequence_to_playlist(&mut self, playlist_id: &str, sequence_id: &str) -> Result<(), TimelineError> {
        if self.sequence(sequence_id).is_none() {
            return Err(TimelineError::SequenceNotFound(sequence_id.to_string()));
        }
        self.edit_playlist(playlist_id, |p| p.add_sequence(sequence_id))
    }

    pub fn remove_sequence_from_playlist(&mut self, playlist_id: &str, sequence_id: &str) -> Result<(), TimelineError> {
        self.edit_playlist(playlist_id, |p| p.remove_sequence(sequence_id))
    }

    pub fn reorder_playlist(&mut self, playlist_id: &str, old_index: usize, new_index: usize) -> Result<(), TimelineError> {
        self.edit_playlist(playlist_id, |p| p.reorder_sequences(old_index, new_index))
    }

    pub fn update_string(&mut self, string_id: &str, update: StringUpdate) -> Result<(), TimelineError> {
        let device = self
            .strings
            .iter_mut()
            .find(|s| s.id == string_id)
            .ok_or_else(|| TimelineError::DeviceNotFound(string_id.to_string()))?;
        device.apply(update);
        self.changes.dispatch(&ProjectChange::String(string_id.to_string()));
        Ok(())
    }
}

/// Reloads the project when its file's modification time changes.
pub struct ProjectWatcher {
    path: PathBuf,
    last_modified: Option<SystemTime>,
}

impl ProjectWatcher {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            last_modified: modified(path),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `Ok(Some(project))` when the file changed and parsed.
    pub fn poll(&mut self) -> Result<Option<Project>> {
        let current = modified(&self.path);
        if current == self.last_modified {
            return Ok(None);
        }
        self.last_modified = current;
        if current.is_none() {
            return Ok(None);
        }
        info!("[PROJECT] {:?} changed on disk, reloading", self.path);
        load(&self.path).map(Some)
    }
}

fn modified(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AppliesTo, EventKind};
    use serde_json::json;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    fn create_test_project() -> Project {
        serde_json::from_value(json!({
            "id": "proj",
            "name": "Backyard",
            "strings": [
                { "id": "s1", "name": "Fence", "ipAddress": "10.0.0.2", "ledCount": 100 }
            ],
            "virtualStrings": [
                { "id": "v1", "segments": [ { "nodeId": "s1", "fromIndex": 0, "toIndex": 49 } ] }
            ],
            "switches": [
                { "id": "sw1", "ipAddress": "10.0.0.9", "apiType": "athom_type2" }
            ],
            "sequences": [
                { "id": "seq1", "name": "Intro", "numFrames": 120, "tracks": [ { "id": "t1", "name": "Lead", "events": [] } ] }
            ],
            "playlists": [
                { "id": "pl1", "name": "Night", "sequenceIds": ["seq1"] }
            ]
        }))
        .unwrap()
    }

    fn record_changes(project: &mut Project) -> Arc<Mutex<Vec<ProjectChange>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        project.changes.subscribe(move |c| sink.lock().unwrap().push(c.clone()));
        seen
    }

    #[test]
    fn test_document_defaults() {
        let project = create_test_project();
        assert_eq!(project.settings.default_framerate, 60);
        assert_eq!(project.strings[0].port, 4048);
        assert_eq!(project.strings[0].brightness, 255);
        assert_eq!(project.virtual_string("v1").unwrap().led_count(), 50);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("project.json");
        let project = create_test_project();

        save(&path, &project).unwrap();
        let loaded = load(&path).unwrap();
        assert_eq!(loaded.strings, project.strings);
        assert_eq!(loaded.sequences, project.sequences);
        assert_eq!(loaded.playlists, project.playlists);
    }

    #[test]
    fn test_load_reports_bad_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(load(&path).is_err());
        assert!(load(&dir.path().join("missing.json")).is_err());
    }

    #[test]
    fn test_mutations_dispatch_changes() {
        let mut project = create_test_project();
        let seen = record_changes(&mut project);

        let track = project.add_track("seq1", None).unwrap();
        let event = Event {
            id: "e1".into(),
            start_frame: 0,
            end_frame: 30,
            kind: EventKind::StringEffect,
            effect_definition_id: "setColor".into(),
            applies_to: AppliesTo::AllNodes,
            props: json!({}),
        };
        project.add_event("seq1", &track, event).unwrap();
        project.move_event("seq1", &track, "t1", "e1", None, Some(60)).unwrap();
        project.reorder_playlist("pl1", 0, 0).unwrap();
        project.update_string("s1", StringUpdate { led_count: Some(120), ..Default::default() }).unwrap();

        assert_eq!(project.sequence("seq1").unwrap().tracks[0].events[0].end_frame, 60);
        assert_eq!(project.strings[0].led_count, 120);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                ProjectChange::Sequence("seq1".into()),
                ProjectChange::Sequence("seq1".into()),
                ProjectChange::Sequence("seq1".into()),
                ProjectChange::Playlist("pl1".into()),
                ProjectChange::String("s1".into()),
            ]
        );
    }

    #[test]
    fn test_failed_mutations_do_not_dispatch() {
        let mut project = create_test_project();
        let seen = record_changes(&mut project);

        assert_eq!(project.add_track("nope", None), Err(TimelineError::SequenceNotFound("nope".into())));
        assert!(matches!(project.rename_track("seq1", "t9", "x"), Err(TimelineError::TrackNotFound { .. })));
        assert_eq!(
            project.add_sequence_to_playlist("pl1", "ghost"),
            Err(TimelineError::SequenceNotFound("ghost".into()))
        );
        assert_eq!(
            project.add_sequence_to_playlist("nope", "seq1"),
            Err(TimelineError::PlaylistNotFound("nope".into()))
        );
        assert_eq!(
            project.update_string("zzz", StringUpdate::default()),
            Err(TimelineError::DeviceNotFound("zzz".into()))
        );
        assert!(seen.lock().unwrap().is_empty(), "No change should be announced for a rejected edit");
    }

    #[test]
    fn test_playlist_edits() {
        let mut project = create_test_project();
        project.add_sequence_to_playlist("pl1", "seq1").unwrap();
        project.remove_sequence_from_playlist("pl1", "seq1").unwrap();
        assert_eq!(project.playlist("pl1").unwrap().sequence_ids, vec!["seq1"]);
    }

    #[test]
    fn test_watcher_picks_up_changes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("project.json");
        let mut project = create_test_project();
        save(&path, &project).unwrap();

        let mut watcher = ProjectWatcher::new(&path);
        assert!(watcher.poll().unwrap().is_none(), "Unchanged file does not reload");

        project.name = "Front yard".into();
        save(&path, &project).unwrap();
        let file = fs::File::options().write(true).open(&path).unwrap();
        file.set_modified(SystemTime::now() + Duration::from_secs(10)).unwrap();

        let reloaded = watcher.poll().unwrap().expect("modified file should reload");
        assert_eq!(reloaded.name, "Front yard");
        assert!(watcher.poll().unwrap().is_none());
    }
}
