//! The tick loop. Each tick runs to completion on one thread:
//! drain injected frames, advance, evaluate, render, dispatch.

use crate::devices::{DeviceRegistry, DispatchReport};
use crate::effects::EffectRegistry;
use crate::playlist::PlaylistPlayer;
use crate::project::{Project, ProjectChange, ProjectWatcher};
use log::{debug, error, info, warn};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// How often the project file is checked for changes while running.
const WATCH_INTERVAL: Duration = Duration::from_secs(1);

/// Frame rates outside `1..=MAX_FPS` are clamped.
pub const MAX_FPS: u32 = 1000;

/// Fixed-timestep accumulator: real elapsed time in, whole frames out.
#[derive(Debug, Clone, Copy)]
pub struct FrameClock {
    frame_duration: Duration,
    accumulator: Duration,
}

impl FrameClock {
    pub fn new(fps: u32) -> Self {
        Self {
            frame_duration: Duration::from_secs(1) / fps.clamp(1, MAX_FPS),
            accumulator: Duration::ZERO,
        }
    }

    pub fn frame_duration(&self) -> Duration {
        self.frame_duration
    }

    pub fn remainder(&self) -> Duration {
        self.accumulator
    }

    /// Adds `elapsed` and returns how many whole frames are now due; the
    /// fractional rest carries over to the next call.
    pub fn frames_due(&mut self, elapsed: Duration) -> u32 {
        self.accumulator += elapsed;
        let frames = self.accumulator.as_nanos() / self.frame_duration.as_nanos();
        let frames = u32::try_from(frames).unwrap_or(u32::MAX);
        self.accumulator -= self.frame_duration * frames;
        frames
    }
}

/// A frame for one device supplied from outside the timeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InjectedFrame {
    pub device_id: String,
    pub rgb: Vec<u8>,
}

/// Cloneable handle for pushing frames into a running scheduler.
#[derive(Clone)]
pub struct FrameInjector {
    tx: Sender<InjectedFrame>,
}

impl FrameInjector {
    /// Returns `false` once the scheduler is gone.
    pub fn inject(&self, device_id: &str, rgb: Vec<u8>) -> bool {
        self.tx
            .send(InjectedFrame {
                device_id: device_id.to_string(),
                rgb,
            })
            .is_ok()
    }
}

pub enum Mode {
    /// Play a playlist from the project.
    Playback(PlaylistPlayer),
    /// No local timeline; only injected frames are sent.
    Listen,
}

pub struct Scheduler {
    project: Project,
    devices: DeviceRegistry,
    effects: EffectRegistry,
    mode: Mode,
    clock: FrameClock,
    fps_override: Option<u32>,
    injector_tx: Sender<InjectedFrame>,
    injector_rx: Receiver<InjectedFrame>,
    watcher: Option<ProjectWatcher>,
    /// Set by the project's change signal when a string device was edited.
    devices_dirty: Arc<AtomicBool>,
    is_shut_down: bool,
}

fn watch_devices(project: &mut Project, dirty: &Arc<AtomicBool>) {
    let dirty = Arc::clone(dirty);
    project.changes.subscribe(move |change| {
        if let ProjectChange::String(_) = change {
            dirty.store(true, Ordering::SeqCst);
        }
    });
}

impl Scheduler {
    /// Takes ownership of the project and device registry, reconciling
    /// devices immediately.
    pub fn new(mut project: Project, mut devices: DeviceRegistry, effects: EffectRegistry, mode: Mode) -> Self {
        devices.reconcile(&project);
        let devices_dirty = Arc::new(AtomicBool::new(false));
        watch_devices(&mut project, &devices_dirty);
        let clock = FrameClock::new(project.settings.default_framerate);
        let (injector_tx, injector_rx) = mpsc::channel();
        Self {
            project,
            devices,
            effects,
            mode,
            clock,
            fps_override: None,
            injector_tx,
            injector_rx,
            watcher: None,
            devices_dirty,
            is_shut_down: false,
        }
    }

    pub fn with_fps(mut self, fps: u32) -> Self {
        self.fps_override = Some(fps);
        self.clock = FrameClock::new(fps);
        self
    }

    pub fn with_watcher(mut self, watcher: ProjectWatcher) -> Self {
        self.watcher = Some(watcher);
        self
    }

    pub fn fps(&self) -> u32 {
        self.fps_override
            .unwrap_or(self.project.settings.default_framerate)
            .clamp(1, MAX_FPS)
    }

    pub fn injector(&self) -> FrameInjector {
        FrameInjector {
            tx: self.injector_tx.clone(),
        }
    }

    pub fn project(&self) -> &Project {
        &self.project
    }

    /// For authored edits; the next tick picks them up, reconnecting devices
    /// whose configuration changed.
    pub fn project_mut(&mut self) -> &mut Project {
        &mut self.project
    }

    pub fn devices(&self) -> &DeviceRegistry {
        &self.devices
    }

    pub fn mode(&self) -> &Mode {
        &self.mode
    }

    pub fn player_mut(&mut self) -> Option<&mut PlaylistPlayer> {
        match &mut self.mode {
            Mode::Playback(player) => Some(player),
            Mode::Listen => None,
        }
    }

    /// Swap in a freshly loaded project and bring devices in line with it.
    pub fn replace_project(&mut self, mut project: Project) {
        // Revisions are not persisted; carry them over so running effects see edits.
        for sequence in project.sequences.iter_mut() {
            if let Some(old) = self.project.sequence(&sequence.id) {
                let edited = old.tracks != sequence.tracks || old.num_frames != sequence.num_frames;
                sequence.revision = old.revision.wrapping_add(edited as u64);
            }
        }
        watch_devices(&mut project, &self.devices_dirty);
        let old_fps = self.fps();
        self.project = project;
        self.devices.reconcile(&self.project);
        let new_fps = self.fps();
        if new_fps != old_fps {
            info!("[SCHEDULER] Frame rate changed {} -> {}", old_fps, new_fps);
            self.clock = FrameClock::new(new_fps);
        }
    }

    /// Re-run device reconciliation after in-place project edits.
    pub fn reconcile(&mut self) {
        self.devices.reconcile(&self.project);
    }

    /// Copy queued frames into their buffers. Returns the devices that got one.
    fn drain_injected(&mut self) -> HashSet<String> {
        let mut injected = HashSet::new();
        while let Ok(frame) = self.injector_rx.try_recv() {
            if self.devices.inject(&frame.device_id, &frame.rgb) {
                injected.insert(frame.device_id);
            } else {
                debug!("[SCHEDULER] Dropping injected frame for unknown device {}", frame.device_id);
            }
        }
        injected
    }

    /// One full frame. In listen mode only devices with a freshly injected
    /// frame are sent.
    pub fn tick(&mut self) -> DispatchReport {
        if self.is_shut_down {
            return DispatchReport::default();
        }
        if self.devices_dirty.swap(false, Ordering::SeqCst) {
            self.devices.reconcile(&self.project);
        }
        let injected = self.drain_injected();

        let frame_ms = self.clock.frame_duration().as_secs_f32() * 1000.0;
        match &mut self.mode {
            Mode::Playback(player) => {
                player.advance_frame(&self.project);
                player.evaluate(&self.project, &self.effects, &self.devices);
                player.render(frame_ms, &mut self.devices);
                self.devices.dispatch()
            }
            Mode::Listen => self.devices.dispatch_only(&injected),
        }
    }

    /// Tick at the configured rate until `shutdown` is set, then shut down.
    pub fn run(&mut self, shutdown: &AtomicBool) {
        info!("[SCHEDULER] Running at {} fps", self.fps());
        let mut last = Instant::now();
        let mut last_watch = Instant::now();

        while !shutdown.load(Ordering::SeqCst) {
            let now = Instant::now();
            let due = self.clock.frames_due(now - last);
            last = now;

            if due as u128 * self.clock.frame_duration().as_nanos() > Duration::from_secs(1).as_nanos() {
                warn!("[SCHEDULER] Running {} frames behind", due);
            }
            for _ in 0..due {
                self.tick();
            }

            if last_watch.elapsed() >= WATCH_INTERVAL {
                last_watch = Instant::now();
                self.poll_watcher();
            }

            let wait = self.clock.frame_duration().saturating_sub(self.clock.remainder());
            thread::sleep(wait.min(Duration::from_millis(50)));
        }

        self.shutdown();
    }

    fn poll_watcher(&mut self) {
        let Some(watcher) = self.watcher.as_mut() else {
            return;
        };
        match watcher.poll() {
            Ok(Some(project)) => self.replace_project(project),
            Ok(None) => {}
            Err(e) => error!("[SCHEDULER] Reload of {:?} failed: {:#}", watcher.path(), e),
        }
    }

    /// Stop effects and close every device. Idempotent.
    pub fn shutdown(&mut self) {
        if self.is_shut_down {
            return;
        }
        self.is_shut_down = true;
        info!("[SCHEDULER] Shutting down");
        if let Mode::Playback(player) = &mut self.mode {
            player.stop();
            player.evaluate(&self.project, &self.effects, &self.devices);
        }
        self.devices.close_all();
    }

    pub fn is_shut_down(&self) -> bool {
        self.is_shut_down
    }
}
