//! Implements serialized access to a raw HID transport.
//!
//! A [`LockedChannel`] owns a [`RawHidDevice`] and hands it out to exactly one
//! [`Transaction`] at a time, so a request and its response are never
//! interleaved with another caller's traffic on the same node.

use std::{error::Error, mem, time::Duration};

use parking_lot::Mutex;
use thiserror::Error;
use tracing::trace;

use crate::protocol;

/// The maximum amount of bytes transferred by a single raw read or write.
pub const MAX_TRANSFER_SIZE: usize = 64;

/// The upper bound of stale reports discarded by [`Transaction::drain`].
const MAX_DRAINED_REPORTS: usize = 64;

/// Represents an arbitrary raw HID node that is both readable and writable.
///
/// Reads block for at most the given timeout and return an empty buffer if
/// nothing arrived in time.
pub trait RawHidDevice: Send + 'static {
    /// An implementation-specific error type.
    type Error: Error + Send + Sync + 'static;

    /// Reads up to [`MAX_TRANSFER_SIZE`] bytes from the node.
    ///
    /// The returned buffer may contain several concatenated reports or a
    /// partial trailing fragment if the transport batches data.
    fn read_report(&mut self, timeout: Duration) -> Result<Vec<u8>, Self::Error>;

    /// Writes a raw report to the node.
    ///
    /// Returns the exact amount of written bytes on success.
    fn write_report(&mut self, src: &[u8]) -> Result<usize, Self::Error>;
}

struct ChannelState<T> {
    device: T,

    /// Bytes of a previous raw read that belong to reports not yet handed out.
    remainder: Vec<u8>,
}

/// Wraps a raw HID node so that only one transaction uses it at a time.
pub struct LockedChannel<T: RawHidDevice> {
    state: Mutex<ChannelState<T>>,
}

impl<T: RawHidDevice> LockedChannel<T> {
    pub fn new(device: T) -> Self {
        Self {
            state: Mutex::new(ChannelState {
                device,
                remainder: Vec::new(),
            }),
        }
    }

    /// Acquires exclusive access to the node for the duration of `f`.
    ///
    /// Blocks until any other transaction has finished. The lock is released
    /// when `f` returns or unwinds.
    pub fn with_transaction<R>(&self, f: impl FnOnce(&mut Transaction<'_, T>) -> R) -> R {
        let mut guard = self.state.lock();
        let mut transaction = Transaction { state: &mut *guard };

        f(&mut transaction)
    }

    /// Consumes the channel, returning the underlying node.
    pub fn into_inner(self) -> T {
        self.state.into_inner().device
    }
}

/// Exclusive read/write access to a node, handed out by
/// [`LockedChannel::with_transaction`].
pub struct Transaction<'a, T: RawHidDevice> {
    state: &'a mut ChannelState<T>,
}

impl<T: RawHidDevice> Transaction<'_, T> {
    /// The underlying node.
    pub fn device(&self) -> &T {
        &self.state.device
    }

    /// Writes a raw report to the node.
    pub fn write(&mut self, data: &[u8]) -> Result<usize, ChannelError<T::Error>> {
        if data.len() > MAX_TRANSFER_SIZE {
            return Err(ChannelError::ReportTooLarge(data.len()));
        }

        trace!(data = ?data, "writing report");
        Ok(self.state.device.write_report(data)?)
    }

    /// Reads the next report.
    ///
    /// Buffered bytes left over by a previous read are served first. If the
    /// data starts with a HID++ report ID and is longer than that report,
    /// exactly one report is returned and the rest is kept for the next call.
    ///
    /// Returns an empty buffer if nothing arrived within `timeout`.
    pub fn read(&mut self, timeout: Duration) -> Result<Vec<u8>, ChannelError<T::Error>> {
        let mut data = if self.state.remainder.is_empty() {
            self.state.device.read_report(timeout)?
        } else {
            mem::take(&mut self.state.remainder)
        };

        if let Some(size) = data.first().copied().and_then(protocol::report_size) {
            if data.len() > size {
                self.state.remainder = data.split_off(size);
            }
        }

        trace!(data = ?data, buffered = self.state.remainder.len(), "read report");
        Ok(data)
    }

    /// Whether bytes of a previous read are waiting to be handed out.
    pub fn has_buffered(&self) -> bool {
        !self.state.remainder.is_empty()
    }

    /// Discards all buffered bytes.
    pub fn clear_buffer(&mut self) {
        self.state.remainder.clear();
    }

    /// Discards the buffer and any reports the node delivers within `timeout`.
    ///
    /// Returns the amount of discarded reads.
    pub fn drain(&mut self, timeout: Duration) -> Result<usize, ChannelError<T::Error>> {
        self.clear_buffer();

        let mut drained = 0;
        while drained < MAX_DRAINED_REPORTS {
            if self.state.device.read_report(timeout)?.is_empty() {
                break;
            }
            drained += 1;
        }

        if drained > 0 {
            trace!(drained, "discarded stale reports");
        }
        Ok(drained)
    }
}

/// Represents an error that occurred when interacting with a raw HID channel.
#[derive(Debug, Error)]
pub enum ChannelError<T: Error> {
    /// Indicates that the concrete implementation of [`RawHidDevice`] returned
    /// an error of type [`RawHidDevice::Error`].
    #[error("the HID node implementation returned an error")]
    Implementation(#[from] T),

    /// Indicates that a report does not fit into a single transfer.
    #[error("a report of {0} bytes exceeds the maximum transfer size")]
    ReportTooLarge(usize),
}
