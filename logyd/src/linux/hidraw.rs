//! Raw HID nodes backed by `/dev/hidraw*`.

use std::{
    fs::{File, OpenOptions},
    io::{self, Read, Write},
    os::{
        fd::{AsRawFd, RawFd},
        unix::fs::OpenOptionsExt,
    },
    path::Path,
    time::Duration,
};

use hidpp::{
    channel::{MAX_TRANSFER_SIZE, RawHidDevice},
    descriptor::MAX_REPORT_DESCRIPTOR_LENGTH,
};
use tracing::trace;

use crate::handle::{DeviceIdentity, HandleError, NodeHandle, OpenNodeGuard};

const HIDRAW_IOCTL_TYPE: u8 = b'H';
const HIDIOC_NR_GRDESC_SIZE: u8 = 0x01;
const HIDIOC_NR_GRDESC: u8 = 0x02;
const HIDIOC_NR_GRRAWINFO: u8 = 0x03;
const HIDIOC_NR_GRRAWNAME: u8 = 0x04;

const IOC_NRBITS: u32 = 8;
const IOC_TYPEBITS: u32 = 8;
const IOC_SIZEBITS: u32 = 14;
const IOC_NRSHIFT: u32 = 0;
const IOC_TYPESHIFT: u32 = IOC_NRSHIFT + IOC_NRBITS;
const IOC_SIZESHIFT: u32 = IOC_TYPESHIFT + IOC_TYPEBITS;
const IOC_DIRSHIFT: u32 = IOC_SIZESHIFT + IOC_SIZEBITS;
const IOC_READ: u32 = 2;

const MAX_NAME_LENGTH: usize = 256;

#[repr(C)]
#[derive(Clone, Copy, Default)]
struct HidrawDevInfo {
    bustype: u32,
    vendor: i16,
    product: i16,
}

#[repr(C)]
struct HidrawReportDescriptor {
    size: u32,
    value: [u8; MAX_REPORT_DESCRIPTOR_LENGTH],
}

const fn ioctl_code(direction: u32, kind: u8, nr: u8, size: usize) -> libc::c_ulong {
    ((direction << IOC_DIRSHIFT)
        | ((kind as u32) << IOC_TYPESHIFT)
        | ((nr as u32) << IOC_NRSHIFT)
        | ((size as u32) << IOC_SIZESHIFT)) as libc::c_ulong
}

const fn ior<T>(nr: u8) -> libc::c_ulong {
    ioctl_code(IOC_READ, HIDRAW_IOCTL_TYPE, nr, std::mem::size_of::<T>())
}

const HIDIOCGRAWINFO: libc::c_ulong = ior::<HidrawDevInfo>(HIDIOC_NR_GRRAWINFO);
const HIDIOCGRDESCSIZE: libc::c_ulong = ior::<libc::c_int>(HIDIOC_NR_GRDESC_SIZE);
const HIDIOCGRDESC: libc::c_ulong = ior::<HidrawReportDescriptor>(HIDIOC_NR_GRDESC);
const HIDIOCGRAWNAME: libc::c_ulong = ioctl_code(
    IOC_READ,
    HIDRAW_IOCTL_TYPE,
    HIDIOC_NR_GRRAWNAME,
    MAX_NAME_LENGTH,
);

/// An open `/dev/hidraw*` node.
///
/// Closing the node releases its path in the open-path registry.
pub struct HidrawNode {
    // Declared first so the file is closed before the path is released.
    file: File,
    guard: OpenNodeGuard,
    name: String,
    identity: DeviceIdentity,
    descriptor: Vec<u8>,
}

impl HidrawNode {
    /// Opens a node non-blocking and reads its identity, name and report
    /// descriptor.
    pub fn open(path: &Path) -> Result<Self, HandleError> {
        let guard = OpenNodeGuard::acquire(path)?;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(path)
            .map_err(|err| HandleError::from_io(path, err))?;
        let fd = file.as_raw_fd();

        let identity = raw_info(fd).map_err(|err| HandleError::from_io(path, err))?;
        let name = raw_name(fd).unwrap_or_default();
        let descriptor = report_descriptor(fd).map_err(|err| HandleError::from_io(path, err))?;

        trace!(
            path = %path.display(),
            %identity,
            name,
            descriptor_length = descriptor.len(),
            "opened hidraw node"
        );

        Ok(Self {
            file,
            guard,
            name,
            identity,
            descriptor,
        })
    }
}

fn raw_info(fd: RawFd) -> io::Result<DeviceIdentity> {
    let mut info = HidrawDevInfo::default();
    if unsafe { libc::ioctl(fd, HIDIOCGRAWINFO, &mut info) } < 0 {
        return Err(io::Error::last_os_error());
    }

    Ok(DeviceIdentity {
        bus: info.bustype as u8,
        vendor: u16::from_ne_bytes(info.vendor.to_ne_bytes()),
        product: u16::from_ne_bytes(info.product.to_ne_bytes()),
    })
}

fn raw_name(fd: RawFd) -> io::Result<String> {
    let mut buf = [0u8; MAX_NAME_LENGTH];
    let len = unsafe { libc::ioctl(fd, HIDIOCGRAWNAME, buf.as_mut_ptr()) };
    if len < 0 {
        return Err(io::Error::last_os_error());
    }

    let len = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    Ok(String::from_utf8_lossy(&buf[..len]).into_owned())
}

fn report_descriptor(fd: RawFd) -> io::Result<Vec<u8>> {
    let mut size: libc::c_int = 0;
    if unsafe { libc::ioctl(fd, HIDIOCGRDESCSIZE, &mut size) } < 0 {
        return Err(io::Error::last_os_error());
    }

    let mut descriptor = Box::new(HidrawReportDescriptor {
        size: size.clamp(0, MAX_REPORT_DESCRIPTOR_LENGTH as libc::c_int) as u32,
        value: [0; MAX_REPORT_DESCRIPTOR_LENGTH],
    });
    if unsafe { libc::ioctl(fd, HIDIOCGRDESC, &mut *descriptor) } < 0 {
        return Err(io::Error::last_os_error());
    }

    let len = (descriptor.size as usize).min(MAX_REPORT_DESCRIPTOR_LENGTH);
    Ok(descriptor.value[..len].to_vec())
}

/// Waits until `fd` is readable.
///
/// Returns `false` if `timeout` elapsed first or the wait was interrupted.
pub(super) fn poll_readable(fd: RawFd, timeout: Duration) -> io::Result<bool> {
    let mut pfd = libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    };
    let millis = timeout.as_millis().min(libc::c_int::MAX as u128) as libc::c_int;

    match unsafe { libc::poll(&mut pfd, 1, millis) } {
        rc if rc < 0 => {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(false);
            }
            Err(err)
        },
        0 => Ok(false),
        _ => Ok(true),
    }
}

impl RawHidDevice for HidrawNode {
    type Error = io::Error;

    fn read_report(&mut self, timeout: Duration) -> Result<Vec<u8>, Self::Error> {
        if !poll_readable(self.file.as_raw_fd(), timeout)? {
            return Ok(Vec::new());
        }

        let mut buf = [0u8; MAX_TRANSFER_SIZE];
        match self.file.read(&mut buf) {
            Ok(len) => Ok(buf[..len].to_vec()),
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => Ok(Vec::new()),
            Err(err) => Err(err),
        }
    }

    fn write_report(&mut self, src: &[u8]) -> Result<usize, Self::Error> {
        self.file.write(src)
    }
}

impl NodeHandle for HidrawNode {
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
        &self.descriptor
    }
}
