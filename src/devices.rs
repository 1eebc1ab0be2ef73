//! Live device state: one pixel buffer and protocol client per physical
//! string, plus the virtual string and switch tables.
//!
//! [`DeviceRegistry::reconcile`] is the only place clients are created or
//! torn down. Everything else reads the registry as it stands.

use crate::effects::{AthomSwitch, SwitchControl};
use crate::model::{AppliesTo, Segment, StringDevice, SwitchDevice};
use crate::pixels::{PixelBuffer, PixelTarget};
use crate::project::Project;
use crate::protocol::{Backoff, Delivery, ProtocolClient, WledControl};
use crate::timeline::{RenderTargets, TargetCatalog};
use crate::virtual_string::{BufferStore, VirtualTarget};
use log::{debug, info, warn};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::thread;

/// Builds transport objects for configured devices.
pub trait ClientFactory: Send {
    fn string_client(&self, device: &StringDevice) -> ProtocolClient;
    fn switch_control(&self, device: &SwitchDevice) -> Arc<dyn SwitchControl>;
}

/// WLED over DDP for strings, Athom HTTP for switches.
#[derive(Default)]
pub struct WledClientFactory {
    pub backoff: Backoff,
}

impl ClientFactory for WledClientFactory {
    fn string_client(&self, device: &StringDevice) -> ProtocolClient {
        let control = Arc::new(WledControl::new(&device.ip_address));
        ProtocolClient::new(&device.ip_address, device.port, control, self.backoff).with_led_count(device.led_count)
    }

    fn switch_control(&self, device: &SwitchDevice) -> Arc<dyn SwitchControl> {
        Arc::new(AthomSwitch::new(&device.ip_address, device.api_type))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub sent: usize,
    pub skipped: usize,
    pub failed: usize,
}

pub struct PhysicalDevice {
    config: StringDevice,
    buffer: PixelBuffer,
    client: ProtocolClient,
}

impl PhysicalDevice {
    pub fn config(&self) -> &StringDevice {
        &self.config
    }

    pub fn buffer(&self) -> &PixelBuffer {
        &self.buffer
    }

    pub fn client(&self) -> &ProtocolClient {
        &self.client
    }
}

impl BufferStore for HashMap<String, PhysicalDevice> {
    fn buffer(&self, device_id: &str) -> Option<&PixelBuffer> {
        self.get(device_id).map(|d| &d.buffer)
    }

    fn buffer_mut(&mut self, device_id: &str) -> Option<&mut PixelBuffer> {
        self.get_mut(device_id).map(|d| &mut d.buffer)
    }
}

struct SwitchEntry {
    config: SwitchDevice,
    control: Arc<dyn SwitchControl>,
}

pub struct DeviceRegistry {
    factory: Box<dyn ClientFactory>,
    physical: HashMap<String, PhysicalDevice>,
    /// Project order, used for `all_nodes` and dispatch.
    order: Vec<String>,
    virtuals: HashMap<String, Vec<Segment>>,
    switches: Vec<(String, SwitchEntry)>,
}

impl DeviceRegistry {
    pub fn new(factory: Box<dyn ClientFactory>) -> Self {
        Self {
            factory,
            physical: HashMap::new(),
            order: Vec::new(),
            virtuals: HashMap::new(),
            switches: Vec::new(),
        }
    }

    /// Bring live devices in line with the project's configuration. Never
    /// waits on a device: power-offs of removed or moved clients finish in
    /// the background.
    pub fn reconcile(&mut self, project: &Project) {
        let wanted: HashSet<&str> = project.strings.iter().map(|s| s.id.as_str()).collect();
        let stale: Vec<String> = self
            .physical
            .keys()
            .filter(|id| !wanted.contains(id.as_str()))
            .cloned()
            .collect();
        for id in stale {
            if let Some(mut device) = self.physical.remove(&id) {
                info!("[DEVICES] Removing {}", id);
                // Dropping the handle detaches the teardown thread.
                let _ = device.client.close();
            }
        }

        for config in &project.strings {
            match self.physical.get_mut(&config.id) {
                None => {
                    info!(
                        "[DEVICES] Adding {} ({} LEDs at {}:{})",
                        config.id, config.led_count, config.ip_address, config.port
                    );
                    let mut client = self.factory.string_client(config);
                    client.ensure_connected();
                    self.physical.insert(
                        config.id.clone(),
                        PhysicalDevice {
                            config: config.clone(),
                            buffer: PixelBuffer::new(config.led_count),
                            client,
                        },
                    );
                }
                Some(device) => {
                    if device.config.identity() != config.identity() {
                        info!(
                            "[DEVICES] {} moved from {}:{} to {}:{}, reconnecting",
                            config.id, device.config.ip_address, device.config.port, config.ip_address, config.port
                        );
                        // Sends stop now; the replacement handshakes only after the old power-off.
                        let teardown = device.client.close();
                        device.client = self.factory.string_client(config).replacing(teardown);
                        device.client.ensure_connected();
                    }
                    if device.config.led_count != config.led_count {
                        debug!("[DEVICES] {} resized {} -> {}", config.id, device.config.led_count, config.led_count);
                        device.buffer.resize(config.led_count);
                    }
                    if device.config.brightness != config.brightness && device.client.is_connected() {
                        let control = device.client.control();
                        let id = config.id.clone();
                        let value = config.brightness;
                        thread::spawn(move || {
                            if let Err(e) = control.set_brightness(value) {
                                warn!("[DEVICES] Brightness update for {} failed: {}", id, e);
                            }
                        });
                    }
                    device.config = config.clone();
                }
            }
        }
        self.order = project.strings.iter().map(|s| s.id.clone()).collect();

        self.virtuals = project
            .virtual_strings
            .iter()
            .map(|v| (v.id.clone(), v.segments.clone()))
            .collect();

        let mut previous: HashMap<String, SwitchEntry> = self.switches.drain(..).collect();
        for config in &project.switches {
            let entry = match previous.remove(&config.id) {
                Some(entry) if entry.config == *config => entry,
                _ => SwitchEntry {
                    config: config.clone(),
                    control: self.factory.switch_control(config),
                },
            };
            self.switches.push((config.id.clone(), entry));
        }
    }

    pub fn device(&self, id: &str) -> Option<&PhysicalDevice> {
        self.physical.get(id)
    }

    pub fn client(&self, id: &str) -> Option<&ProtocolClient> {
        self.physical.get(id).map(|d| &d.client)
    }

    pub fn buffer(&self, id: &str) -> Option<&PixelBuffer> {
        self.physical.get(id).map(|d| &d.buffer)
    }

    pub fn device_ids(&self) -> &[String] {
        &self.order
    }

    /// Overwrite a physical buffer with externally supplied bytes.
    pub fn inject(&mut self, device_id: &str, rgb: &[u8]) -> bool {
        match self.physical.get_mut(device_id) {
            Some(device) => {
                device.buffer.copy_from(rgb);
                true
            }
            None => false,
        }
    }

    /// Send every connected device's buffer. Never blocks on a device.
    pub fn dispatch(&self) -> DispatchReport {
        self.dispatch_where(|_| true)
    }

    /// Send only the listed devices' buffers, in project order.
    pub fn dispatch_only(&self, ids: &HashSet<String>) -> DispatchReport {
        self.dispatch_where(|id| ids.contains(id))
    }

    fn dispatch_where(&self, include: impl Fn(&str) -> bool) -> DispatchReport {
        let mut report = DispatchReport::default();
        for id in self.order.iter().filter(|id| include(id.as_str())) {
            let Some(device) = self.physical.get(id) else {
                continue;
            };
            if !device.client.is_connected() {
                report.skipped += 1;
                continue;
            }
            match device.client.send(device.buffer.bytes()) {
                Ok(Delivery::Sent) => report.sent += 1,
                Ok(Delivery::Dropped) => report.skipped += 1,
                Err(e) => {
                    report.failed += 1;
                    warn!("[DEVICES] Send to {} failed: {}", id, e);
                }
            }
        }
        report
    }

    /// Close every client and wait for the power-offs to finish. Safe to
    /// call repeatedly.
    pub fn close_all(&mut self) {
        let teardowns: Vec<_> = self
            .physical
            .values_mut()
            .filter_map(|device| device.client.close())
            .collect();
        for teardown in teardowns {
            let _ = teardown.join();
        }
    }
}

impl TargetCatalog for DeviceRegistry {
    fn string_targets(&self, applies_to: &AppliesTo) -> Vec<String> {
        match applies_to {
            AppliesTo::AllNodes => self.order.clone(),
            AppliesTo::Nodes { node_ids } => node_ids
                .iter()
                .filter(|id| self.physical.contains_key(*id) || self.virtuals.contains_key(*id))
                .cloned()
                .collect(),
        }
    }

    fn switch_targets(&self, applies_to: &AppliesTo) -> Vec<(String, Arc<dyn SwitchControl>)> {
        self.switches
            .iter()
            .filter(|(id, _)| match applies_to {
                AppliesTo::AllNodes => true,
                AppliesTo::Nodes { node_ids } => node_ids.contains(id),
            })
            .map(|(id, entry)| (id.clone(), Arc::clone(&entry.control)))
            .collect()
    }
}

impl RenderTargets for DeviceRegistry {
    fn with_target(&mut self, id: &str, f: &mut dyn FnMut(&mut dyn PixelTarget)) -> bool {
        if let Some(device) = self.physical.get_mut(id) {
            f(&mut device.buffer);
            return true;
        }
        if let Some(segments) = self.virtuals.get(id) {
            let mut target = VirtualTarget::new(segments, &mut self.physical);
            f(&mut target);
            return true;
        }
        false
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::effects::switch::tests::RecordingSwitch;
    use crate::model::VirtualStringDevice;
    use crate::protocol::mock::MockControl;
    use crate::protocol::ClientState;
    use std::net::UdpSocket;
    use std::sync::atomic::Ordering;
    use std::sync::Mutex;
    use std::time::{Duration, Instant};

    /// Hands out mock-backed clients and remembers each control it built.
    #[derive(Default, Clone)]
    pub(crate) struct MockFactory {
        pub controls: Arc<Mutex<Vec<Arc<MockControl>>>>,
        pub fail_power_on: u32,
    }

    impl ClientFactory for MockFactory {
        fn string_client(&self, device: &StringDevice) -> ProtocolClient {
            let control = MockControl::new(self.fail_power_on);
            self.controls.lock().unwrap().push(control.clone());
            let backoff = Backoff {
                base: Duration::from_millis(5),
                max: Duration::from_millis(20),
            };
            ProtocolClient::new(&device.ip_address, device.port, control, backoff)
        }

        fn switch_control(&self, _device: &SwitchDevice) -> Arc<dyn SwitchControl> {
            Arc::new(RecordingSwitch::default())
        }
    }

    fn create_test_receiver() -> (UdpSocket, u16) {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        socket.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        let port = socket.local_addr().unwrap().port();
        (socket, port)
    }

    fn create_test_string(id: &str, port: u16, led_count: u32) -> StringDevice {
        StringDevice {
            id: id.into(),
            name: id.into(),
            ip_address: "127.0.0.1".into(),
            port,
            led_count,
            brightness: 255,
        }
    }

    fn wait_until(mut check: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(3);
        while Instant::now() < deadline {
            if check() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        false
    }

    #[test]
    fn test_identity_change_closes_old_client_once() {
        let (_rx_a, port_a) = create_test_receiver();
        let (rx_b, port_b) = create_test_receiver();
        let factory = MockFactory::default();
        let controls = factory.controls.clone();
        let mut registry = DeviceRegistry::new(Box::new(factory));

        let mut project = Project::default();
        project.strings.push(create_test_string("s1", port_a, 3));
        registry.reconcile(&project);
        assert!(wait_until(|| registry.client("s1").unwrap().is_connected()));

        project.strings[0].port = port_b;
        registry.reconcile(&project);
        registry.reconcile(&project);

        let controls = controls.lock().unwrap().clone();
        assert_eq!(controls.len(), 2, "One replacement client for one identity change");
        assert_eq!(registry.client("s1").unwrap().port(), port_b);

        assert!(wait_until(|| registry.client("s1").unwrap().is_connected()));
        assert_eq!(controls[0].power_off_calls.load(Ordering::SeqCst), 1, "Old client powered off exactly once");
        assert_eq!(controls[1].power_off_calls.load(Ordering::SeqCst), 0);
        assert_eq!(registry.dispatch().sent, 1);
        let mut buf = [0u8; 32];
        let (n, _) = rx_b.recv_from(&mut buf).unwrap();
        assert_eq!(n, 10 + 9, "Frame goes to the new port");
    }

    #[test]
    fn test_removed_device_is_closed() {
        let (_rx, port) = create_test_receiver();
        let factory = MockFactory::default();
        let controls = factory.controls.clone();
        let mut registry = DeviceRegistry::new(Box::new(factory));

        let mut project = Project::default();
        project.strings.push(create_test_string("s1", port, 3));
        registry.reconcile(&project);

        project.strings.clear();
        registry.reconcile(&project);
        assert!(registry.client("s1").is_none());
        assert!(registry.device_ids().is_empty());
        let control = controls.lock().unwrap()[0].clone();
        assert!(wait_until(|| control.power_off_calls.load(Ordering::SeqCst) == 1));
    }

    /// Hands out controls whose power-off takes a while to answer.
    struct SlowOffFactory;

    impl ClientFactory for SlowOffFactory {
        fn string_client(&self, device: &StringDevice) -> ProtocolClient {
            let control = MockControl::slow_power_off(Duration::from_millis(800));
            let backoff = Backoff {
                base: Duration::from_millis(5),
                max: Duration::from_millis(20),
            };
            ProtocolClient::new(&device.ip_address, device.port, control, backoff)
        }

        fn switch_control(&self, _device: &SwitchDevice) -> Arc<dyn SwitchControl> {
            Arc::new(RecordingSwitch::default())
        }
    }

    #[test]
    fn test_reconcile_does_not_wait_for_slow_devices() {
        let (_rx_a, port_a) = create_test_receiver();
        let (_rx_b, port_b) = create_test_receiver();
        let mut registry = DeviceRegistry::new(Box::new(SlowOffFactory));
        let mut project = Project::default();
        project.strings.push(create_test_string("gone", port_a, 3));
        project.strings.push(create_test_string("moved", port_a, 3));
        registry.reconcile(&project);
        assert!(wait_until(|| registry.client("moved").unwrap().is_connected()));

        project.strings.remove(0);
        project.strings[0].port = port_b;
        let started = Instant::now();
        registry.reconcile(&project);
        assert!(
            started.elapsed() < Duration::from_millis(300),
            "Removal and re-addressing must not block on power-off"
        );
        assert!(registry.client("gone").is_none());
        assert_eq!(registry.client("moved").unwrap().port(), port_b);
    }

    #[test]
    fn test_dispatch_only_sends_listed_devices() {
        let (rx_a, port_a) = create_test_receiver();
        let (rx_b, port_b) = create_test_receiver();
        rx_b.set_read_timeout(Some(Duration::from_millis(100))).unwrap();
        let mut registry = DeviceRegistry::new(Box::new(MockFactory::default()));
        let mut project = Project::default();
        project.strings.push(create_test_string("a", port_a, 1));
        project.strings.push(create_test_string("b", port_b, 1));
        registry.reconcile(&project);
        assert!(wait_until(|| registry.client("a").unwrap().is_connected()
            && registry.client("b").unwrap().is_connected()));

        let only_a: HashSet<String> = ["a".to_string()].into_iter().collect();
        assert_eq!(registry.dispatch_only(&only_a), DispatchReport { sent: 1, skipped: 0, failed: 0 });
        assert_eq!(registry.dispatch_only(&HashSet::new()), DispatchReport::default());

        let mut buf = [0u8; 32];
        assert!(rx_a.recv_from(&mut buf).is_ok());
        assert!(rx_b.recv_from(&mut buf).is_err(), "Unlisted device gets nothing");
    }

    #[test]
    fn test_led_count_change_resizes_buffer() {
        let (_rx, port) = create_test_receiver();
        let mut registry = DeviceRegistry::new(Box::new(MockFactory::default()));
        let mut project = Project::default();
        project.strings.push(create_test_string("s1", port, 3));
        registry.reconcile(&project);
        registry.inject("s1", &[1, 2, 3]);

        project.strings[0].led_count = 5;
        registry.reconcile(&project);
        let buffer = registry.buffer("s1").unwrap();
        assert_eq!(buffer.bytes().len(), 15);
        assert_eq!(buffer.get_pixel(0), [1, 2, 3], "Resize keeps existing pixels");
    }

    #[test]
    fn test_brightness_change_goes_to_control_channel() {
        let (_rx, port) = create_test_receiver();
        let factory = MockFactory::default();
        let controls = factory.controls.clone();
        let mut registry = DeviceRegistry::new(Box::new(factory));
        let mut project = Project::default();
        project.strings.push(create_test_string("s1", port, 3));
        registry.reconcile(&project);
        assert!(wait_until(|| registry.client("s1").unwrap().is_connected()));

        project.strings[0].brightness = 42;
        registry.reconcile(&project);
        let control = controls.lock().unwrap()[0].clone();
        assert!(wait_until(|| control.brightness_calls.load(Ordering::SeqCst) == 1));
        assert_eq!(control.brightness.load(Ordering::SeqCst), 42);
    }

    #[test]
    fn test_dispatch_skips_unconnected_devices() {
        let (rx, port) = create_test_receiver();
        let factory = MockFactory::default();
        let mut registry = DeviceRegistry::new(Box::new(factory));
        let mut project = Project::default();
        project.strings.push(create_test_string("up", port, 2));
        registry.reconcile(&project);
        assert!(wait_until(|| registry.client("up").unwrap().is_connected()));

        // A second registry whose controller never answers.
        let mut stuck = DeviceRegistry::new(Box::new(MockFactory {
            fail_power_on: u32::MAX,
            ..Default::default()
        }));
        let mut other = Project::default();
        other.strings.push(create_test_string("down", port, 2));
        stuck.reconcile(&other);
        assert_eq!(stuck.client("down").unwrap().state(), ClientState::Connecting);
        assert_eq!(stuck.dispatch(), DispatchReport { sent: 0, skipped: 1, failed: 0 });

        registry.inject("up", &[9, 8, 7, 6, 5, 4]);
        assert_eq!(registry.dispatch(), DispatchReport { sent: 1, skipped: 0, failed: 0 });
        let mut buf = [0u8; 32];
        let (n, _) = rx.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[10..n], &[9, 8, 7, 6, 5, 4]);
    }

    #[test]
    fn test_virtual_target_writes_through() {
        let (_rx, port) = create_test_receiver();
        let mut registry = DeviceRegistry::new(Box::new(MockFactory::default()));
        let mut project = Project::default();
        project.strings.push(create_test_string("a", port, 4));
        project.strings.push(create_test_string("b", port, 4));
        project.virtual_strings.push(VirtualStringDevice {
            id: "v".into(),
            name: "Arch".into(),
            segments: vec![
                Segment { node_id: "a".into(), from_index: 2, to_index: 3 },
                Segment { node_id: "b".into(), from_index: 1, to_index: 0 },
            ],
        });
        registry.reconcile(&project);

        assert!(registry.with_target("v", &mut |t: &mut dyn PixelTarget| {
            assert_eq!(t.led_count(), 4);
            t.set_pixel(0, 1, 1, 1);
            t.set_pixel(2, 2, 2, 2);
        }));
        assert!(!registry.with_target("ghost", &mut |_t: &mut dyn PixelTarget| {}));

        assert_eq!(registry.buffer("a").unwrap().get_pixel(2), [1, 1, 1]);
        assert_eq!(registry.buffer("b").unwrap().get_pixel(1), [2, 2, 2], "Reversed segment starts at its from index");
    }

    #[test]
    fn test_target_catalog() {
        let (_rx, port) = create_test_receiver();
        let mut registry = DeviceRegistry::new(Box::new(MockFactory::default()));
        let mut project = Project::default();
        project.strings.push(create_test_string("a", port, 1));
        project.strings.push(create_test_string("b", port, 1));
        project.virtual_strings.push(VirtualStringDevice { id: "v".into(), name: String::new(), segments: vec![] });
        project.switches.push(SwitchDevice {
            id: "sw".into(),
            name: String::new(),
            ip_address: "10.0.0.9".into(),
            api_type: Default::default(),
        });
        registry.reconcile(&project);

        assert_eq!(registry.string_targets(&AppliesTo::AllNodes), vec!["a", "b"]);
        assert_eq!(
            registry.string_targets(&AppliesTo::Nodes { node_ids: vec!["v".into(), "nope".into(), "a".into()] }),
            vec!["v", "a"],
            "Unknown ids are dropped, order is kept"
        );
        assert_eq!(registry.switch_targets(&AppliesTo::AllNodes).len(), 1);
        assert!(registry.switch_targets(&AppliesTo::Nodes { node_ids: vec!["a".into()] }).is_empty());
    }
}
