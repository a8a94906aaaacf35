//! The Linux platform: udev for enumeration and hotplug, hidraw for I/O.

mod hidraw;

use std::{
    collections::HashMap,
    os::fd::AsRawFd,
    path::{Path, PathBuf},
    time::Duration,
};

pub use hidraw::HidrawNode;
use tracing::{debug, trace};

use crate::{
    discovery::{Action, HotplugEvent, Platform, PlatformError, Subsystem, WatchSignals},
    handle::HandleError,
};

/// How often hotplug workers check whether they should stop.
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(200);

impl From<libudev::Error> for PlatformError {
    fn from(err: libudev::Error) -> Self {
        Self::Backend(err.to_string())
    }
}

/// Discovery facilities of a Linux host.
///
/// udev objects are not thread-safe, so every call creates its own context.
#[derive(Clone, Copy, Default, Debug)]
pub struct UdevPlatform;

impl UdevPlatform {
    pub fn new() -> Self {
        Self
    }
}

fn syspath_of(device: &libudev::Device) -> PathBuf {
    let devpath = device
        .property_value("DEVPATH")
        .map(|value| value.to_string_lossy().into_owned())
        .unwrap_or_default();
    PathBuf::from(format!("/sys{devpath}"))
}

fn to_event(action: Action, subsystem: Subsystem, device: &libudev::Device) -> HotplugEvent {
    HotplugEvent {
        action,
        subsystem,
        devnode: device.devnode().map(Path::to_path_buf),
        syspath: syspath_of(device),
        properties: device
            .properties()
            .map(|property| {
                (
                    property.name().to_string_lossy().into_owned(),
                    property.value().to_string_lossy().into_owned(),
                )
            })
            .collect::<HashMap<_, _>>(),
    }
}

impl Platform for UdevPlatform {
    type Node = HidrawNode;

    fn bus_devices(&self) -> Result<Vec<HotplugEvent>, PlatformError> {
        let context = libudev::Context::new()?;
        let mut enumerator = libudev::Enumerator::new(&context)?;
        enumerator.match_subsystem(Subsystem::Usb.as_str())?;

        Ok(enumerator
            .scan_devices()?
            .map(|device| to_event(Action::Add, Subsystem::Usb, &device))
            .collect())
    }

    fn raw_children(&self, bus: &HotplugEvent) -> Result<Vec<PathBuf>, PlatformError> {
        let context = libudev::Context::new()?;
        let parent = libudev::Device::from_syspath(&context, &bus.syspath)?;

        let mut enumerator = libudev::Enumerator::new(&context)?;
        enumerator.match_parent(&parent)?;
        enumerator.match_subsystem(Subsystem::Hidraw.as_str())?;

        let children: Vec<PathBuf> = enumerator
            .scan_devices()?
            .filter_map(|device| device.devnode().map(Path::to_path_buf))
            .collect();
        trace!(bus = %bus.syspath.display(), count = children.len(), "enumerated hidraw children");

        Ok(children)
    }

    fn open(&self, path: &Path) -> Result<Self::Node, HandleError> {
        HidrawNode::open(path)
    }

    fn watch(
        &self,
        subsystem: Subsystem,
        signals: WatchSignals,
        on_event: &mut dyn FnMut(HotplugEvent),
    ) -> Result<(), PlatformError> {
        let context = libudev::Context::new()?;
        let mut monitor = libudev::Monitor::new(&context)?;
        monitor.match_subsystem(subsystem.as_str())?;
        let mut socket = monitor.listen()?;
        debug!(%subsystem, "listening for hotplug events");

        if !signals.armed() {
            return Ok(());
        }

        while !signals.should_stop() {
            if !hidraw::poll_readable(socket.as_raw_fd(), STOP_POLL_INTERVAL)? {
                continue;
            }

            while let Some(event) = socket.receive_event() {
                let action = match event.event_type() {
                    libudev::EventType::Add => Action::Add,
                    libudev::EventType::Remove => Action::Remove,
                    libudev::EventType::Change => Action::Change,
                    libudev::EventType::Unknown => Action::Other,
                };
                trace!(%subsystem, ?action, "hotplug event");
                on_event(to_event(action, subsystem, event.device()));
            }
        }

        debug!(%subsystem, "stopped listening for hotplug events");
        Ok(())
    }
}
