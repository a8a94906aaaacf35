//! An in-memory [`Platform`] with scripted bus devices and raw HID nodes.

use std::{
    collections::{HashMap, VecDeque},
    convert::Infallible,
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use hidpp::{channel::RawHidDevice, session::SessionConfig};
use parking_lot::Mutex;

use super::{Action, HotplugEvent, Platform, PlatformError, Subsystem, WatchSignals};
use crate::handle::{DeviceIdentity, HandleError, NodeHandle, OpenNodeGuard};

/// The HID++ collections of a Logitech receiver interface.
const HIDPP_DESCRIPTOR: &[u8] = &[
    0x06, 0x00, 0xff, // Usage Page (Vendor Page 0xff00)
    0x09, 0x01, // Usage (1)
    0xa1, 0x01, // Collection (Application)
    0x85, 0x10, // .Report ID (0x10)
    0x75, 0x08, // .Report Size (8)
    0x95, 0x06, // .Report Count (6)
    0x15, 0x00, // .Logical Minimum (0)
    0x26, 0xff, 0x00, // .Logical Maximum (255)
    0x09, 0x01, // .Usage (1)
    0x81, 0x00, // .Input (Data,Arr,Abs)
    0x09, 0x01, // .Usage (1)
    0x91, 0x00, // .Output (Data,Arr,Abs)
    0xc0, // End Collection
    0x06, 0x00, 0xff, // Usage Page (Vendor Page 0xff00)
    0x09, 0x02, // Usage (2)
    0xa1, 0x01, // Collection (Application)
    0x85, 0x11, // .Report ID (0x11)
    0x75, 0x08, // .Report Size (8)
    0x95, 0x13, // .Report Count (19)
    0x15, 0x00, // .Logical Minimum (0)
    0x26, 0xff, 0x00, // .Logical Maximum (255)
    0x09, 0x02, // .Usage (2)
    0x81, 0x00, // .Input (Data,Arr,Abs)
    0x09, 0x02, // .Usage (2)
    0x91, 0x00, // .Output (Data,Arr,Abs)
    0xc0, // End Collection
];

const MOUSE_DESCRIPTOR: &[u8] = &[
    0x05, 0x01, // Usage Page (Generic Desktop)
    0x09, 0x02, // Usage (Mouse)
    0xa1, 0x01, // Collection (Application)
    0x05, 0x09, // .Usage Page (Button)
    0x19, 0x01, // .Usage Minimum (1)
    0x29, 0x03, // .Usage Maximum (3)
    0x15, 0x00, // .Logical Minimum (0)
    0x25, 0x01, // .Logical Maximum (1)
    0x75, 0x01, // .Report Size (1)
    0x95, 0x03, // .Report Count (3)
    0x81, 0x02, // .Input (Data,Var,Abs)
    0x75, 0x05, // .Report Size (5)
    0x95, 0x01, // .Report Count (1)
    0x81, 0x03, // .Input (Cnst,Var,Abs)
    0xc0, // End Collection
];

pub(crate) fn fast_config() -> SessionConfig {
    SessionConfig {
        timeout: Duration::from_millis(50),
        ..SessionConfig::default()
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum FakeNodeKind {
    /// Answers like a receiver, with HID++1.0 errors.
    Receiver,

    /// Answers like a HID++2.0 device with protocol 4.2.
    Satellite,

    /// A boot mouse interface without vendor collections.
    Mouse,

    /// Fails to open with a permission error.
    Denied,
}

struct FakeBus {
    vendor: u16,
    product: u16,
    children: Vec<usize>,
}

#[derive(Default)]
struct FakeState {
    nodes: Vec<(u16, FakeNodeKind)>,
    buses: Vec<FakeBus>,
}

pub(crate) struct FakePlatform {
    tag: String,
    state: Mutex<FakeState>,
    events: HashMap<Subsystem, (flume::Sender<HotplugEvent>, flume::Receiver<HotplugEvent>)>,
    stopped: Arc<AtomicUsize>,
    failing_watch: Option<Subsystem>,
}

impl FakePlatform {
    /// Creates an empty platform; `tag` keeps node paths unique across tests
    /// sharing the open-path registry.
    pub fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_string(),
            state: Mutex::new(FakeState::default()),
            events: [Subsystem::Usb, Subsystem::Hidraw]
                .into_iter()
                .map(|subsystem| (subsystem, flume::unbounded()))
                .collect(),
            stopped: Arc::new(AtomicUsize::new(0)),
            failing_watch: None,
        }
    }

    /// Makes watching `subsystem` fail before the subscription is live.
    pub fn with_failing_watch(mut self, subsystem: Subsystem) -> Self {
        self.failing_watch = Some(subsystem);
        self
    }

    pub fn add_node(&self, product: u16, kind: FakeNodeKind) -> usize {
        let mut state = self.state.lock();
        state.nodes.push((product, kind));
        state.nodes.len() - 1
    }

    pub fn node_path(&self, node: usize) -> PathBuf {
        PathBuf::from(format!("/dev/fake-{}/hidraw{node}", self.tag))
    }

    pub fn plug_bus(&self, vendor: u16, product: u16, children: &[usize]) -> usize {
        let mut state = self.state.lock();
        state.buses.push(FakeBus {
            vendor,
            product,
            children: children.to_vec(),
        });
        state.buses.len() - 1
    }

    /// Plugs a receiver interface followed by `satellites` paired devices.
    pub fn plug_receiver(&self, product: u16, satellites: u16) -> usize {
        let mut children = vec![self.add_node(product, FakeNodeKind::Receiver)];
        for i in 0..satellites {
            children.push(self.add_node(0x4000 + i, FakeNodeKind::Satellite));
        }
        self.plug_bus(0x046d, product, &children)
    }

    pub fn attach(&self, bus: usize, node: usize) {
        self.state.lock().buses[bus].children.push(node);
    }

    fn bus_syspath(&self, bus: usize) -> PathBuf {
        PathBuf::from(format!("/sys/fake-{}/usb{bus}", self.tag))
    }

    pub fn bus_event(&self, bus: usize, action: Action) -> HotplugEvent {
        let state = self.state.lock();
        let FakeBus {
            vendor, product, ..
        } = state.buses[bus];

        HotplugEvent {
            action,
            subsystem: Subsystem::Usb,
            devnode: Some(PathBuf::from(format!("/dev/bus/usb/fake-{}/{bus:03}", self.tag))),
            syspath: self.bus_syspath(bus),
            properties: HashMap::from([(
                "PRODUCT".to_string(),
                format!("{vendor:x}/{product:x}/111"),
            )]),
        }
    }

    pub fn node_event(&self, node: usize, action: Action) -> HotplugEvent {
        HotplugEvent {
            action,
            subsystem: Subsystem::Hidraw,
            devnode: Some(self.node_path(node)),
            syspath: PathBuf::from(format!("/sys/fake-{}/hidraw{node}", self.tag)),
            properties: HashMap::new(),
        }
    }

    /// Delivers an event to the worker watching its subsystem.
    pub fn emit(&self, event: HotplugEvent) {
        if let Some((tx, _)) = self.events.get(&event.subsystem) {
            let _ = tx.send(event);
        }
    }

    /// Counts watchers that returned.
    pub fn stopped_watchers(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.stopped)
    }
}

impl Platform for FakePlatform {
    type Node = FakeNode;

    fn bus_devices(&self) -> Result<Vec<HotplugEvent>, PlatformError> {
        let count = self.state.lock().buses.len();
        Ok((0..count).map(|bus| self.bus_event(bus, Action::Add)).collect())
    }

    fn raw_children(&self, bus: &HotplugEvent) -> Result<Vec<PathBuf>, PlatformError> {
        let state = self.state.lock();
        let children = (0..state.buses.len())
            .find(|&i| self.bus_syspath(i) == bus.syspath)
            .map(|i| state.buses[i].children.clone())
            .unwrap_or_default();

        Ok(children.into_iter().map(|node| self.node_path(node)).collect())
    }

    fn open(&self, path: &Path) -> Result<Self::Node, HandleError> {
        let (index, (product, kind)) = {
            let state = self.state.lock();
            let index = (0..state.nodes.len())
                .find(|&i| self.node_path(i) == path)
                .ok_or_else(|| {
                    HandleError::from_io(path, std::io::Error::from(std::io::ErrorKind::NotFound))
                })?;
            (index, state.nodes[index])
        };

        if kind == FakeNodeKind::Denied {
            return Err(HandleError::PermissionDenied(path.to_path_buf()));
        }

        Ok(FakeNode {
            guard: OpenNodeGuard::acquire(path)?,
            name: format!("Fake node {index}"),
            identity: DeviceIdentity::usb(0x046d, product),
            kind,
            pending: VecDeque::new(),
        })
    }

    fn watch(
        &self,
        subsystem: Subsystem,
        signals: WatchSignals,
        on_event: &mut dyn FnMut(HotplugEvent),
    ) -> Result<(), PlatformError> {
        if self.failing_watch == Some(subsystem) {
            return Err(PlatformError::Backend("netlink refused".to_string()));
        }

        let events = self.events.get(&subsystem).map(|(_, rx)| rx.clone());

        if signals.armed() {
            while let Some(events) = &events {
                if signals.should_stop() {
                    break;
                }
                match events.recv_timeout(Duration::from_millis(10)) {
                    Ok(event) => on_event(event),
                    Err(flume::RecvTimeoutError::Timeout) => {}
                    Err(flume::RecvTimeoutError::Disconnected) => break,
                }
            }
        }

        self.stopped.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub(crate) struct FakeNode {
    guard: OpenNodeGuard,
    name: String,
    identity: DeviceIdentity,
    kind: FakeNodeKind,
    pending: VecDeque<Vec<u8>>,
}

impl FakeNode {
    fn reply(&self, req: &[u8]) -> Option<Vec<u8>> {
        match self.kind {
            FakeNodeKind::Receiver => Some(vec![0x10, req[1], 0x8f, req[2], req[3], 0x01, 0x00]),
            FakeNodeKind::Satellite => {
                let mut reply = req.to_vec();
                if req[2] == 0x00 && req[3] >> 4 == 0x1 {
                    reply[4] = 0x04;
                    reply[5] = 0x02;
                }
                Some(reply)
            },
            FakeNodeKind::Mouse | FakeNodeKind::Denied => None,
        }
    }
}

impl RawHidDevice for FakeNode {
    type Error = Infallible;

    fn read_report(&mut self, _: Duration) -> Result<Vec<u8>, Self::Error> {
        Ok(self.pending.pop_front().unwrap_or_default())
    }

    fn write_report(&mut self, src: &[u8]) -> Result<usize, Self::Error> {
        if let Some(reply) = self.reply(src) {
            self.pending.push_back(reply);
        }
        Ok(src.len())
    }
}

impl NodeHandle for FakeNode {
    fn path(&self) -> &Path {
        self.guard.path()
    }

    fn display_name(&self) -> &str {
        &self.name
    }

    fn identity(&self) -> DeviceIdentity {
        self.identity
    }

    fn report_descriptor(&self) -> &[u8] {
        match self.kind {
            FakeNodeKind::Mouse => MOUSE_DESCRIPTOR,
            _ => HIDPP_DESCRIPTOR,
        }
    }
}
