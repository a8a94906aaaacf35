//! Hotplug-driven discovery of HID++ nodes.
//!
//! Two workers listen for hotplug events, one for bus devices (receivers and
//! wired devices) and one for raw HID nodes. Bus `add` events populate the
//! [`DeviceTree`], raw HID `remove` events prune it.

pub mod known;
pub mod tree;

#[cfg(test)]
mod testing;

use std::{
    cell::Cell,
    collections::HashMap,
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
    thread::{self, JoinHandle},
};

use hidpp::{
    descriptor::{self, ReportSupport},
    session::{ProtocolSession, SessionConfig, TreePosition},
};
use itertools::Itertools;
use parking_lot::{Mutex, MutexGuard};
use thiserror::Error;
use tracing::{debug, error, info, trace, warn};

use self::{
    known::{KnownDevice, KnownDeviceTable},
    tree::{DeviceNode, DeviceTree, InsertOutcome, NodeSnapshot, RemoveOutcome},
};
use crate::handle::{DeviceIdentity, HandleError, NodeHandle};

/// The kind of change a hotplug event reports.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Action {
    Add,
    Remove,
    Change,
    Other,
}

/// The device class a hotplug subscription listens to.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Subsystem {
    /// Bus devices, i.e. receivers and wired devices.
    Usb,

    /// Raw HID nodes.
    Hidraw,
}

impl Subsystem {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Usb => "usb",
            Self::Hidraw => "hidraw",
        }
    }
}

impl fmt::Display for Subsystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single hotplug notification.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct HotplugEvent {
    pub action: Action,
    pub subsystem: Subsystem,

    /// The device node, if the device has one.
    pub devnode: Option<PathBuf>,

    /// The platform-specific location of the device, used to enumerate its
    /// children.
    pub syspath: PathBuf,

    pub properties: HashMap<String, String>,
}

impl HotplugEvent {
    /// The `vendor/product/version` identity string of a bus device.
    pub fn product(&self) -> Option<&str> {
        self.properties.get("PRODUCT").map(String::as_str)
    }
}

/// Represents an error raised by the hotplug or enumeration facility of a
/// [`Platform`].
#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("I/O error")]
    Io(#[from] std::io::Error),

    #[error("hotplug backend error: {0}")]
    Backend(String),
}

/// Synchronizes a hotplug worker with the engine that spawned it.
///
/// Every worker reports to the engine exactly once: `true` when its
/// subscription is live, `false` when the signals are dropped unarmed.
pub struct WatchSignals {
    armed: flume::Sender<bool>,
    reported: Cell<bool>,
    start: flume::Receiver<()>,
    stop: flume::Receiver<()>,
}

impl WatchSignals {
    /// Reports that the subscription is live, then waits until the engine
    /// finished its initial replay.
    ///
    /// Returns `false` if the engine is shutting down.
    pub fn armed(&self) -> bool {
        if !self.reported.replace(true) {
            let _ = self.armed.send(true);
        }
        let _ = self.start.recv();
        !self.should_stop()
    }

    /// Whether the engine asked the worker to return.
    pub fn should_stop(&self) -> bool {
        matches!(
            self.stop.try_recv(),
            Ok(()) | Err(flume::TryRecvError::Disconnected)
        )
    }
}

impl Drop for WatchSignals {
    fn drop(&mut self) {
        if !self.reported.get() {
            let _ = self.armed.send(false);
        }
    }
}

/// The operating system facilities discovery is built on.
pub trait Platform: Send + Sync + 'static {
    type Node: NodeHandle;

    /// Lists the bus devices currently present as synthetic `add` events.
    fn bus_devices(&self) -> Result<Vec<HotplugEvent>, PlatformError>;

    /// Lists the raw HID nodes below a bus device.
    fn raw_children(&self, bus: &HotplugEvent) -> Result<Vec<PathBuf>, PlatformError>;

    /// Opens a raw HID node.
    fn open(&self, path: &Path) -> Result<Self::Node, HandleError>;

    /// Delivers hotplug events of one subsystem to `on_event` until
    /// [`WatchSignals::should_stop`] turns true.
    ///
    /// Implementations must call [`WatchSignals::armed`] once the
    /// subscription is live and before delivering the first event. Returning
    /// without arming reports the subscription as failed.
    fn watch(
        &self,
        subsystem: Subsystem,
        signals: WatchSignals,
        on_event: &mut dyn FnMut(HotplugEvent),
    ) -> Result<(), PlatformError>;
}

/// Represents an error that occurred when populating the tree from a bus
/// device.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("could not query the platform")]
    Platform(#[from] PlatformError),

    /// Indicates that none of the vendor-capable children of a bus device
    /// matched its identity.
    #[error("no root node below `{}` (children: {})", .bus.display(), .children.iter().map(|c| c.display()).join(", "))]
    MissingRootForReceiver { bus: PathBuf, children: Vec<PathBuf> },

    #[error("could not spawn hotplug worker")]
    Spawn(#[source] std::io::Error),
}

type Session<P> = ProtocolSession<<P as Platform>::Node>;

struct Shared<P: Platform> {
    platform: P,
    known: KnownDeviceTable,
    config: SessionConfig,
    tree: Mutex<DeviceTree<P::Node>>,
}

/// A node accepted into the tree, probed but not yet inserted.
struct Accepted<P: Platform> {
    path: PathBuf,
    display_name: String,
    node_identity: DeviceIdentity,
    session: Session<P>,
}

impl<P: Platform> Accepted<P> {
    fn into_node(self) -> DeviceNode<P::Node> {
        DeviceNode::new(
            self.path,
            self.display_name,
            self.node_identity,
            Arc::new(self.session),
        )
    }
}

impl<P: Platform> Shared<P> {
    fn handle_event(&self, event: &HotplugEvent) {
        let swept = self.tree.lock().sweep();
        for path in swept {
            info!(path = %path.display(), "removed node pending removal");
        }

        match event.subsystem {
            Subsystem::Usb => self.handle_bus_event(event),
            Subsystem::Hidraw => self.handle_node_event(event),
        }
    }

    fn handle_bus_event(&self, event: &HotplugEvent) {
        if event.action != Action::Add || event.devnode.is_none() {
            return;
        }
        let Some(product) = event.product() else {
            return;
        };

        for known in self.known.matching(product) {
            if let Err(err) = self.populate_from(event, known) {
                error!(bus = %event.syspath.display(), "{err}");
            }
        }
    }

    fn handle_node_event(&self, event: &HotplugEvent) {
        if event.action != Action::Remove {
            return;
        }
        let Some(path) = &event.devnode else {
            return;
        };

        match self.tree.lock().remove(path) {
            RemoveOutcome::NotPresent => {
                trace!(path = %path.display(), "ignoring removal of untracked node");
            },
            RemoveOutcome::Deferred => {
                info!(path = %path.display(), "node removed, waiting for its children");
            },
            RemoveOutcome::Removed(removed) => {
                for path in removed {
                    info!(path = %path.display(), "removed node");
                }
            },
        }
    }

    /// Enumerates the raw HID children of a known bus device and inserts the
    /// vendor-capable ones.
    ///
    /// Returns the number of inserted nodes.
    fn populate_from(&self, event: &HotplugEvent, known: &KnownDevice) -> Result<usize, DiscoveryError> {
        let mut root: Option<Accepted<P>> = None;
        let mut tracked_root: Option<PathBuf> = None;
        let mut satellites = Vec::new();

        for path in self.platform.raw_children(event)? {
            {
                let tree = self.tree.lock();
                if let Some(node) = tree.get(&path) {
                    if !node.is_pending_removal()
                        && node.parent().is_none()
                        && node.identity() == known.identity
                    {
                        tracked_root = Some(path.clone());
                    }
                    trace!(path = %path.display(), "node already tracked");
                    continue;
                }
            }

            let node = match self.platform.open(&path) {
                Ok(node) => node,
                Err(err @ HandleError::PermissionDenied(_)) => {
                    warn!(path = %path.display(), "{err}, skipping");
                    continue;
                },
                Err(err @ HandleError::AlreadyOpen(_)) => {
                    debug!(path = %path.display(), "{err}, skipping");
                    continue;
                },
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "could not open node, skipping");
                    continue;
                },
            };

            if !descriptor::has_vendor_page(node.report_descriptor()) {
                trace!(path = %path.display(), "no vendor usage page");
                continue;
            }

            if node.identity() != known.identity {
                satellites.push(node);
            } else if root.is_none() {
                root = Some(self.accept(node, TreePosition::Root));
            } else {
                warn!(path = %path.display(), "second node matching {}, skipping", known.identity);
            }
        }

        let mut inserted = 0;
        let root_path = match (root, tracked_root) {
            (Some(root), _) => {
                let path = root.path.clone();
                info!(
                    path = %path.display(),
                    identity = %known.identity,
                    state = %root.session.state(),
                    "found {}",
                    known.name
                );
                if self.tree.lock().insert(root.into_node(), None) == Ok(InsertOutcome::Inserted) {
                    inserted += 1;
                }
                path
            },
            (None, Some(path)) => path,
            (None, None) => {
                return Err(DiscoveryError::MissingRootForReceiver {
                    bus: event.syspath.clone(),
                    children: satellites
                        .iter()
                        .map(|node| node.path().to_path_buf())
                        .collect(),
                });
            },
        };

        // Probing goes through the receiver, keep it outside the tree lock.
        let accepted: Vec<_> = satellites
            .into_iter()
            .map(|node| self.accept(node, TreePosition::Satellite))
            .collect();

        let mut tree = self.tree.lock();
        for satellite in accepted {
            let path = satellite.path.clone();
            let state = satellite.session.state();
            match tree.insert(satellite.into_node(), Some(&root_path)) {
                Ok(InsertOutcome::Inserted) => {
                    inserted += 1;
                    info!(path = %path.display(), parent = %root_path.display(), %state, "found satellite");
                },
                Ok(InsertOutcome::AlreadyPresent) => {}
                Err(err) => warn!(path = %path.display(), "{err}"),
            }
        }

        Ok(inserted)
    }

    /// Wraps a vendor-capable node into a probed session.
    fn accept(&self, node: P::Node, position: TreePosition) -> Accepted<P> {
        // The vendor page gate already passed, so fall back to trying both
        // report kinds when the descriptor says nothing usable.
        let support = match descriptor::report_support(node.report_descriptor()) {
            Ok(support) if support.any() => support,
            Ok(_) => ReportSupport::ALL,
            Err(err) => {
                debug!(path = %node.path().display(), error = %err, "could not parse report descriptor");
                ReportSupport::ALL
            },
        };

        let path = node.path().to_path_buf();
        let display_name = node.display_name().to_string();
        let node_identity = node.identity();
        let session = ProtocolSession::open(node, position, support, self.config);
        debug!(path = %path.display(), state = %session.state(), "probed node");

        Accepted {
            path,
            display_name,
            node_identity,
            session,
        }
    }

    fn replay(&self) -> Result<(), DiscoveryError> {
        for event in self.platform.bus_devices()? {
            self.handle_bus_event(&event);
        }
        Ok(())
    }
}

/// Discovers HID++ nodes and keeps a [`DeviceTree`] of them.
///
/// Dropping the engine stops and joins its hotplug workers and closes every
/// node no longer referenced elsewhere.
pub struct Discovery<P: Platform> {
    shared: Arc<Shared<P>>,
    stop: Option<flume::Sender<()>>,
    workers: Vec<JoinHandle<()>>,
}

impl<P: Platform> Discovery<P> {
    /// Populates the tree from the bus devices currently present, without
    /// listening for hotplug events.
    pub fn populate(
        platform: P,
        known: KnownDeviceTable,
        config: SessionConfig,
    ) -> Result<Self, DiscoveryError> {
        let discovery = Self::new(platform, known, config);
        discovery.shared.replay()?;
        Ok(discovery)
    }

    /// Starts both hotplug workers and populates the tree.
    ///
    /// The workers subscribe before the initial replay and handle their first
    /// event after it, so no device plugged in meanwhile is missed.
    pub fn start(
        platform: P,
        known: KnownDeviceTable,
        config: SessionConfig,
    ) -> Result<Self, DiscoveryError> {
        let mut discovery = Self::new(platform, known, config);

        let (stop_tx, stop_rx) = flume::bounded(0);
        let (armed_tx, armed_rx) = flume::unbounded();
        let (start_tx, start_rx) = flume::bounded::<()>(0);
        discovery.stop = Some(stop_tx);

        for subsystem in [Subsystem::Usb, Subsystem::Hidraw] {
            let signals = WatchSignals {
                armed: armed_tx.clone(),
                reported: Cell::new(false),
                start: start_rx.clone(),
                stop: stop_rx.clone(),
            };
            let shared = Arc::clone(&discovery.shared);

            let worker = thread::Builder::new()
                .name(format!("hotplug-{subsystem}"))
                .spawn(move || {
                    let result = shared.platform.watch(subsystem, signals, &mut |event| {
                        shared.handle_event(&event)
                    });
                    if let Err(err) = result {
                        error!(%subsystem, error = %err, "hotplug worker failed");
                    }
                })
                .map_err(DiscoveryError::Spawn)?;
            discovery.workers.push(worker);
        }
        drop(armed_tx);

        let mut failed = 0;
        for _ in 0..discovery.workers.len() {
            match armed_rx.recv() {
                Ok(true) => {}
                Ok(false) => failed += 1,
                Err(_) => break,
            }
        }
        if failed > 0 {
            warn!(failed, "hotplug workers did not subscribe, live events may be missed");
        }

        let result = discovery.shared.replay();
        drop(start_tx);
        result?;

        Ok(discovery)
    }

    fn new(platform: P, known: KnownDeviceTable, config: SessionConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                platform,
                known,
                config,
                tree: Mutex::new(DeviceTree::new()),
            }),
            stop: None,
            workers: Vec::new(),
        }
    }

    /// Locks the tree.
    ///
    /// Hotplug handling blocks while the guard is held; do not perform
    /// protocol I/O with it.
    pub fn tree(&self) -> MutexGuard<'_, DeviceTree<P::Node>> {
        self.shared.tree.lock()
    }

    pub fn snapshot(&self) -> Vec<NodeSnapshot> {
        self.tree().snapshot()
    }

    /// Returns the session of a tracked node, for I/O outside the tree lock.
    pub fn session(&self, path: &Path) -> Option<Arc<Session<P>>> {
        self.tree().get(path).map(|node| Arc::clone(node.session()))
    }

    /// Handles a hotplug event as if a worker had received it.
    pub fn handle_event(&self, event: &HotplugEvent) {
        self.shared.handle_event(event);
    }

    pub fn platform(&self) -> &P {
        &self.shared.platform
    }
}

impl<P: Platform> Drop for Discovery<P> {
    fn drop(&mut self) {
        drop(self.stop.take());

        for worker in self.workers.drain(..) {
            let name = worker.thread().name().unwrap_or_default().to_string();
            if worker.join().is_err() {
                error!(worker = %name, "hotplug worker panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use hidpp::session::ProtocolState;
    use tracing_test::traced_test;

    use super::{testing::*, *};

    fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn receiver_with_satellite_forms_a_two_level_tree() {
        let platform = FakePlatform::new("e2e");
        platform.plug_receiver(0xc53f, 1);

        let discovery = Discovery::populate(platform, KnownDeviceTable::builtin(), fast_config()).unwrap();
        let tree = discovery.tree();

        assert_eq!(tree.len(), 2);
        let root_path = discovery.platform().node_path(0);
        let satellite_path = discovery.platform().node_path(1);

        let root = tree.get(&root_path).unwrap();
        assert_eq!(root.parent(), None);
        assert_eq!(root.session().position(), TreePosition::Root);

        let satellite = tree.get(&satellite_path).unwrap();
        assert_eq!(satellite.parent(), Some(root_path.as_path()));
        assert_eq!(satellite.session().position(), TreePosition::Satellite);
    }

    #[test]
    fn probe_states_depend_on_position() {
        let platform = FakePlatform::new("probe");
        platform.plug_receiver(0xc53f, 1);

        let discovery = Discovery::populate(platform, KnownDeviceTable::builtin(), fast_config()).unwrap();
        let snapshot = discovery.snapshot();

        assert_eq!(
            snapshot[0].state,
            ProtocolState::Online(hidpp::protocol::ProtocolVersion::V10)
        );
        assert_eq!(
            snapshot[0].children[0].state,
            ProtocolState::Online(hidpp::protocol::ProtocolVersion::V20 {
                protocol_num: 4,
                target_sw: 2
            })
        );
    }

    #[test]
    fn unknown_bus_devices_are_ignored() {
        let platform = FakePlatform::new("unknown");
        platform.plug_bus(0x1d6b, 0x0002, &[]);

        let discovery = Discovery::populate(platform, KnownDeviceTable::builtin(), fast_config()).unwrap();
        assert!(discovery.tree().is_empty());
    }

    #[test]
    fn nodes_without_vendor_page_are_not_tracked() {
        let platform = FakePlatform::new("mouse");
        let receiver = platform.add_node(0xc53f, FakeNodeKind::Receiver);
        let mouse = platform.add_node(0xc53f, FakeNodeKind::Mouse);
        platform.plug_bus(0x046d, 0xc53f, &[receiver, mouse]);

        let discovery = Discovery::populate(platform, KnownDeviceTable::builtin(), fast_config()).unwrap();
        let tree = discovery.tree();

        assert_eq!(tree.len(), 1);
        assert!(tree.get(&discovery.platform().node_path(mouse)).is_none());
    }

    #[test]
    #[traced_test]
    fn permission_denied_nodes_are_skipped() {
        let platform = FakePlatform::new("denied");
        let receiver = platform.add_node(0xc53f, FakeNodeKind::Receiver);
        let locked = platform.add_node(0x4082, FakeNodeKind::Denied);
        let satellite = platform.add_node(0x407f, FakeNodeKind::Satellite);
        platform.plug_bus(0x046d, 0xc53f, &[receiver, locked, satellite]);

        let discovery = Discovery::populate(platform, KnownDeviceTable::builtin(), fast_config()).unwrap();

        assert_eq!(discovery.tree().len(), 2);
        assert!(logs_contain("permission denied"));
    }

    #[test]
    #[traced_test]
    fn satellites_without_root_are_not_inserted() {
        let platform = FakePlatform::new("orphan");
        let satellite = platform.add_node(0x407f, FakeNodeKind::Satellite);
        platform.plug_bus(0x046d, 0xc53f, &[satellite]);

        let discovery = Discovery::populate(platform, KnownDeviceTable::builtin(), fast_config()).unwrap();

        assert!(discovery.tree().is_empty());
        assert!(logs_contain("no root node"));
    }

    #[test]
    fn replaying_a_bus_add_is_idempotent() {
        let platform = FakePlatform::new("replay");
        platform.plug_receiver(0xc53f, 2);

        let discovery = Discovery::populate(platform, KnownDeviceTable::builtin(), fast_config()).unwrap();
        assert_eq!(discovery.tree().len(), 3);

        for event in discovery.platform().bus_devices().unwrap() {
            discovery.handle_event(&event);
        }
        assert_eq!(discovery.tree().len(), 3);
        assert_eq!(discovery.tree().roots().count(), 1);
    }

    #[test]
    fn satellite_appearing_later_joins_tracked_root() {
        let platform = FakePlatform::new("late");
        let receiver = platform.add_node(0xc53f, FakeNodeKind::Receiver);
        let bus = platform.plug_bus(0x046d, 0xc53f, &[receiver]);

        let discovery = Discovery::populate(platform, KnownDeviceTable::builtin(), fast_config()).unwrap();
        assert_eq!(discovery.tree().len(), 1);

        let satellite = discovery.platform().add_node(0x407f, FakeNodeKind::Satellite);
        discovery.platform().attach(bus, satellite);
        discovery.handle_event(&discovery.platform().bus_event(bus, Action::Add));

        let tree = discovery.tree();
        assert_eq!(tree.len(), 2);
        assert_eq!(
            tree.get(&discovery.platform().node_path(satellite)).unwrap().parent(),
            Some(discovery.platform().node_path(receiver).as_path())
        );
    }

    #[test]
    fn removal_events_prune_the_tree_lazily() {
        let platform = FakePlatform::new("prune");
        platform.plug_receiver(0xc53f, 2);

        let discovery = Discovery::populate(platform, KnownDeviceTable::builtin(), fast_config()).unwrap();
        let platform = discovery.platform();

        discovery.handle_event(&platform.node_event(0, Action::Remove));
        assert_eq!(discovery.tree().len(), 3);
        assert!(!discovery.tree().is_live(&platform.node_path(0)));

        discovery.handle_event(&platform.node_event(1, Action::Remove));
        discovery.handle_event(&platform.node_event(2, Action::Remove));
        assert!(discovery.tree().is_empty());
    }

    #[test]
    fn removed_nodes_are_closed() {
        let platform = FakePlatform::new("close");
        platform.plug_receiver(0xc53f, 0);

        let discovery = Discovery::populate(platform, KnownDeviceTable::builtin(), fast_config()).unwrap();
        let path = discovery.platform().node_path(0);
        assert!(matches!(
            discovery.platform().open(&path),
            Err(HandleError::AlreadyOpen(_))
        ));

        discovery.handle_event(&discovery.platform().node_event(0, Action::Remove));
        assert!(discovery.platform().open(&path).is_ok());
    }

    #[test]
    fn sessions_are_usable_outside_the_tree_lock() {
        let platform = FakePlatform::new("session");
        platform.plug_receiver(0xc53f, 1);

        let discovery = Discovery::populate(platform, KnownDeviceTable::builtin(), fast_config()).unwrap();
        let session = discovery.session(&discovery.platform().node_path(1)).unwrap();

        let _tree = discovery.tree();
        assert_eq!(session.root().ping(0x5a).unwrap(), 0x5a);
    }

    #[test]
    fn workers_deliver_live_events() {
        let platform = FakePlatform::new("live");
        platform.plug_receiver(0xc53f, 1);

        let discovery = Discovery::start(platform, KnownDeviceTable::builtin(), fast_config()).unwrap();
        assert_eq!(discovery.tree().len(), 2);

        let platform = discovery.platform();
        let wired = platform.add_node(0xc33c, FakeNodeKind::Receiver);
        let bus = platform.plug_bus(0x046d, 0xc33c, &[wired]);
        platform.emit(platform.bus_event(bus, Action::Add));
        assert!(wait_until(|| discovery.tree().len() == 3));

        platform.emit(platform.node_event(wired, Action::Remove));
        assert!(wait_until(|| discovery.tree().len() == 2));
    }

    #[test]
    fn start_returns_when_a_worker_fails_to_subscribe() {
        let platform = FakePlatform::new("failing-watch").with_failing_watch(Subsystem::Usb);
        platform.plug_receiver(0xc53f, 1);

        let (tx, rx) = flume::bounded(1);
        thread::spawn(move || {
            let _ = tx.send(Discovery::start(platform, KnownDeviceTable::builtin(), fast_config()));
        });
        let discovery = rx
            .recv_timeout(Duration::from_secs(5))
            .expect("start did not return")
            .unwrap();
        assert_eq!(discovery.tree().len(), 2);

        // The raw-node worker stays live.
        let platform = discovery.platform();
        platform.emit(platform.node_event(1, Action::Remove));
        assert!(wait_until(|| discovery.tree().len() == 1));
    }

    #[test]
    fn dropping_the_engine_joins_workers() {
        let platform = FakePlatform::new("drop");
        let discovery = Discovery::start(platform, KnownDeviceTable::builtin(), fast_config()).unwrap();
        let stopped = discovery.platform().stopped_watchers();

        drop(discovery);
        assert_eq!(stopped.load(std::sync::atomic::Ordering::SeqCst), 2);
    }
}
