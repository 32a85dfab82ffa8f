//! Transport bridge
//!
//! Mediates between the transport's single event-processing thread and the
//! application: the read-completion handler postprocesses inbound data,
//! invokes the application callbacks and re-arms the persistent read
//! transfer; the cancellation handshake lets the application thread stop the
//! reader and block until the event thread has acknowledged the cancelled
//! transfer. Also home of the shared partial-write loop.
//!
//! Threading contract: all per-port mutable reader state lives behind one
//! mutex. The completion handler runs under it on the event thread; the
//! application's read callback therefore must not call back into
//! `stop_reader` from the event thread, and `stop_reader` itself must never
//! be called on the event thread, or the cancellation wait cannot be
//! satisfied.

use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use log::{debug, trace, warn};

use crate::error::{Result, UsbSerialError};
use crate::port::SerialPort;
use crate::transport::{
    CompletionHandler, DeviceIdentity, ReadTransfer, TransferStatus, UsbTransport,
};

pub(crate) const DEFAULT_CONTROL_TIMEOUT: Duration = Duration::from_millis(1000);
pub(crate) const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(200);
/// Zero means unlimited, as in the underlying transport
pub(crate) const WRITE_TIMEOUT: Duration = Duration::ZERO;

pub(crate) const READ_BUFFER_SIZE: usize = 256;

/// Application callback receiving inbound data
pub type ReadCallback = Box<dyn FnMut(&[u8]) + Send>;
/// Application callback receiving terminal read-transfer statuses
pub type ErrorCallback = Box<dyn FnMut(TransferStatus) + Send>;

/// In-place transform applied to inbound data before the read callback.
/// Returns the number of bytes remaining after the transform.
pub type ReadPostprocessor = fn(&DeviceIdentity, &mut [u8]) -> usize;

struct ReaderState {
    read_cb: ReadCallback,
    error_cb: Option<ErrorCallback>,
    /// Sticky: once set, the port never reads again
    read_error: bool,
    cancel_acked: bool,
}

/// Reader-side state shared between the port and the completion handler
pub(crate) struct ReaderShared {
    state: Mutex<ReaderState>,
    cancel_signal: Condvar,
}

impl ReaderShared {
    pub(crate) fn new(read_cb: ReadCallback, error_cb: Option<ErrorCallback>) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(ReaderState {
                read_cb,
                error_cb,
                read_error: false,
                cancel_acked: false,
            }),
            cancel_signal: Condvar::new(),
        })
    }

    pub(crate) fn read_error(&self) -> bool {
        self.state.lock().unwrap().read_error
    }
}

/// Build the completion handler for a port's persistent read transfer.
///
/// Runs on the event thread, under the port lock:
/// data completions are postprocessed, delivered and re-armed; a cancelled
/// completion signals the waiting `stop_reader`; anything else sets the
/// sticky error flag, signals the waiter and notifies the error callback.
fn completion_handler(
    transport: Arc<dyn UsbTransport>,
    reader: Arc<ReaderShared>,
    identity: DeviceIdentity,
    postprocessor: Option<ReadPostprocessor>,
) -> CompletionHandler {
    Box::new(move |transfer, status, data| {
        let mut state = reader.state.lock().unwrap();
        match status {
            TransferStatus::Completed | TransferStatus::TimedOut => {
                let mut count = data.len();
                if count > 0 {
                    if let Some(postprocess) = postprocessor {
                        count = postprocess(&identity, data);
                    }
                }
                if count > 0 {
                    trace!("read completion: {} bytes", count);
                    (state.read_cb)(&data[..count]);
                }
                if let Err(err) = transport.submit_read(transfer) {
                    warn!("failed to re-arm read transfer: {}", err);
                    state.read_error = true;
                    reader.cancel_signal.notify_one();
                    if let Some(error_cb) = state.error_cb.as_mut() {
                        error_cb(TransferStatus::Error);
                    }
                }
            }
            TransferStatus::Cancelled => {
                trace!("read transfer cancellation acknowledged");
                state.cancel_acked = true;
                reader.cancel_signal.notify_one();
            }
            other => {
                warn!("read transfer failed: {:?}", other);
                state.read_error = true;
                reader.cancel_signal.notify_one();
                if let Some(error_cb) = state.error_cb.as_mut() {
                    error_cb(other);
                }
            }
        }
    })
}

/// Allocate and submit a port's persistent read transfer.
pub(crate) fn start_reader(
    port: &mut SerialPort,
    endpoint: u8,
    postprocessor: Option<ReadPostprocessor>,
) -> Result<()> {
    if port.read_transfer().is_some() {
        return Err(UsbSerialError::IllegalState);
    }

    let handler = completion_handler(
        Arc::clone(port.transport()),
        Arc::clone(port.reader()),
        *port.device_identity(),
        postprocessor,
    );
    let transfer = ReadTransfer::new(endpoint, DEFAULT_READ_TIMEOUT, READ_BUFFER_SIZE, handler);

    port.transport().submit_read(&transfer)?;
    port.set_read_transfer(transfer);
    debug!("reader started on endpoint 0x{:02x}", endpoint);
    Ok(())
}

/// Stop a port's reader: cancel the in-flight transfer, wait for the
/// acknowledgment and release the transfer object.
pub(crate) fn stop_reader(port: &mut SerialPort) -> Result<()> {
    let transfer = port
        .take_read_transfer()
        .ok_or(UsbSerialError::IllegalState)?;
    let ret = cancel_read_sync(port.transport(), port.reader(), &transfer);
    debug!("reader stopped on endpoint 0x{:02x}", transfer.endpoint());
    ret
}

/// Blocking cancellation handshake.
///
/// If the sticky error flag is already set the transfer is dead and no
/// cancellation is needed. Otherwise request cancellation and wait for the
/// event thread to acknowledge it, releasing the lock while waiting. A
/// `NotFound` from the transport means the completion handler re-armed the
/// transfer between our request and its delivery; drop the lock so the event
/// thread can make progress, then try again.
fn cancel_read_sync(
    transport: &Arc<dyn UsbTransport>,
    reader: &ReaderShared,
    transfer: &Arc<ReadTransfer>,
) -> Result<()> {
    loop {
        let mut state = reader.state.lock().unwrap();
        if state.read_error {
            return Ok(());
        }
        match transport.cancel_read(transfer) {
            Ok(()) => {
                while !state.cancel_acked && !state.read_error {
                    state = reader.cancel_signal.wait(state).unwrap();
                }
                state.cancel_acked = false;
                return Ok(());
            }
            Err(rusb::Error::NotFound) => {
                debug!("read transfer already completed, retrying cancellation");
                drop(state);
                std::thread::yield_now();
            }
            Err(err) => return Err(err.into()),
        }
    }
}

/// Synchronous bulk write of the whole buffer.
///
/// Partial transfers continue with the remaining bytes until everything is
/// sent; a timed-out chunk that moved data is treated the same way. A chunk
/// that moves nothing is a hard failure. Zero-length writes succeed without
/// touching the transport.
pub(crate) fn bulk_write_all(
    transport: &dyn UsbTransport,
    endpoint: u8,
    data: &[u8],
) -> Result<()> {
    if data.is_empty() {
        return Ok(());
    }

    let mut remaining = data;
    loop {
        let out = transport.bulk_out(endpoint, remaining, WRITE_TIMEOUT)?;
        let written = out.written.min(remaining.len());
        if written == remaining.len() {
            return Ok(());
        }
        if written == 0 {
            let err = if out.timed_out {
                rusb::Error::Timeout
            } else {
                rusb::Error::Io
            };
            return Err(err.into());
        }
        trace!(
            "partial bulk write on 0x{:02x}: {} of {} bytes",
            endpoint,
            written,
            remaining.len()
        );
        remaining = &remaining[written..];
    }
}
