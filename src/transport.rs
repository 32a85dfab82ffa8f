//! USB transport boundary
//!
//! The serial drivers are written against the [`UsbTransport`] trait rather
//! than a concrete USB stack. A transport supplies synchronous control and
//! bulk transfers, descriptor facts for driver dispatch and endpoint
//! discovery, and asynchronous bulk-in reads with a single event-processing
//! thread delivering all completions.
//!
//! The bundled [`RusbTransport`](crate::backend::RusbTransport) implements
//! this trait on top of a `rusb::DeviceHandle`. Tests implement it with an
//! in-memory fake.
//!
//! Error space: transport methods report plain [`rusb::Error`] values, which
//! the library passes through verbatim inside
//! [`UsbSerialError::Usb`](crate::UsbSerialError::Usb).

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Result type for transport operations
pub type TransportResult<T> = std::result::Result<T, rusb::Error>;

/// Device descriptor facts needed for driver dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub vendor_id: u16,
    pub product_id: u16,
    pub device_class: u8,
    pub device_subclass: u8,
    /// Maximum packet size of endpoint zero (bMaxPacketSize0)
    pub max_packet_size: u8,
}

/// One endpoint of an interface, as enumerable facts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointInfo {
    pub address: u8,
    pub direction: rusb::Direction,
    pub transfer_type: rusb::TransferType,
}

/// One interface of the active configuration
#[derive(Debug, Clone)]
pub struct InterfaceInfo {
    pub number: u8,
    pub endpoints: Vec<EndpointInfo>,
}

/// Completion status of an asynchronous read transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStatus {
    /// Transfer completed, possibly with data
    Completed,
    /// Transfer timed out, possibly after moving some data
    TimedOut,
    /// Transfer was cancelled on request
    Cancelled,
    /// Endpoint stalled
    Stall,
    /// Device disconnected
    NoDevice,
    /// Device sent more data than the buffer holds
    Overflow,
    /// Any other transfer failure
    Error,
}

/// Outcome of a synchronous bulk OUT transfer
///
/// A timeout is not necessarily fatal: the transfer may have moved part of
/// the buffer before expiring, so the written count is always reported.
#[derive(Debug, Clone, Copy)]
pub struct BulkOut {
    pub written: usize,
    pub timed_out: bool,
}

/// Completion callback for an asynchronous read transfer.
///
/// Invoked on the transport's event-processing thread with the transfer
/// itself (so the callback can resubmit it), the completion status and the
/// bytes received. The slice is empty for anything but `Completed` and
/// `TimedOut` completions.
pub type CompletionHandler =
    Box<dyn FnMut(&Arc<ReadTransfer>, TransferStatus, &mut [u8]) + Send>;

const STATE_IDLE: u8 = 0;
const STATE_SUBMITTED: u8 = 1;
const STATE_CANCELLING: u8 = 2;

/// One in-flight asynchronous bulk-in transfer.
///
/// A `ReadTransfer` pairs a fixed-size inbound buffer with a completion
/// handler and a submission state. Continuous streaming reads reuse one
/// transfer object: the completion handler resubmits it instead of
/// allocating a new one per read.
///
/// The state helpers ([`mark_submitted`](Self::mark_submitted),
/// [`request_cancel`](Self::request_cancel), [`complete`](Self::complete))
/// exist for transport implementations; library users never touch them.
pub struct ReadTransfer {
    endpoint: u8,
    timeout: Duration,
    buffer: Mutex<Box<[u8]>>,
    handler: Mutex<CompletionHandler>,
    state: AtomicU8,
}

impl ReadTransfer {
    /// Create a transfer for the given bulk-in endpoint
    pub fn new(
        endpoint: u8,
        timeout: Duration,
        buffer_size: usize,
        handler: CompletionHandler,
    ) -> Arc<Self> {
        Arc::new(Self {
            endpoint,
            timeout,
            buffer: Mutex::new(vec![0u8; buffer_size].into_boxed_slice()),
            handler: Mutex::new(handler),
            state: AtomicU8::new(STATE_IDLE),
        })
    }

    /// Bulk-in endpoint address this transfer reads from
    pub fn endpoint(&self) -> u8 {
        self.endpoint
    }

    /// Per-submission timeout
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Size of the inbound buffer
    pub fn buffer_size(&self) -> usize {
        self.buffer.lock().unwrap().len()
    }

    /// Run `f` on the inbound buffer. Transport implementations use this to
    /// fill the buffer before calling [`complete`](Self::complete).
    pub fn with_buffer<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        let mut buffer = self.buffer.lock().unwrap();
        f(&mut buffer)
    }

    /// Mark the transfer submitted. Fails if it is already in flight.
    pub fn mark_submitted(&self) -> bool {
        self.state
            .compare_exchange(
                STATE_IDLE,
                STATE_SUBMITTED,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Return the transfer to idle without completing it (submission failed
    /// downstream of [`mark_submitted`](Self::mark_submitted)).
    pub fn unmark_submitted(&self) {
        self.state.store(STATE_IDLE, Ordering::Release);
    }

    /// Request cancellation of an in-flight transfer. Returns `false` if the
    /// transfer is not currently submitted, in which case the transport must
    /// report [`rusb::Error::NotFound`].
    pub fn request_cancel(&self) -> bool {
        self.state
            .compare_exchange(
                STATE_SUBMITTED,
                STATE_CANCELLING,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Whether cancellation has been requested since the last submission
    pub fn cancel_requested(&self) -> bool {
        self.state.load(Ordering::Acquire) == STATE_CANCELLING
    }

    /// Deliver a completion: return the transfer to idle and invoke its
    /// handler on the calling thread (the transport's event thread).
    ///
    /// If cancellation was requested while the transfer was in flight, the
    /// delivered status is forced to [`TransferStatus::Cancelled`] and any
    /// received data is dropped, so an accepted cancellation request is
    /// acknowledged by exactly one cancellation completion.
    pub fn complete(transfer: &Arc<ReadTransfer>, status: TransferStatus, actual: usize) {
        let prior = transfer.state.swap(STATE_IDLE, Ordering::AcqRel);
        let (status, actual) = if prior == STATE_CANCELLING {
            (TransferStatus::Cancelled, 0)
        } else {
            (status, actual)
        };
        let mut buffer = transfer.buffer.lock().unwrap();
        let actual = actual.min(buffer.len());
        let mut handler = transfer.handler.lock().unwrap();
        (*handler)(transfer, status, &mut buffer[..actual]);
    }
}

impl std::fmt::Debug for ReadTransfer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadTransfer")
            .field("endpoint", &format_args!("0x{:02x}", self.endpoint))
            .field("timeout", &self.timeout)
            .field("state", &self.state.load(Ordering::Relaxed))
            .finish()
    }
}

/// Boundary contract with the USB transport collaborator.
///
/// Implementations must deliver every read completion on one
/// event-processing thread, and must tolerate
/// [`submit_read`](Self::submit_read) being called from inside a completion
/// handler (that is how streaming reads re-arm themselves).
pub trait UsbTransport: Send + Sync {
    /// Descriptor facts of the attached device
    fn device_identity(&self) -> TransportResult<DeviceIdentity>;

    /// Interfaces and endpoints of the active configuration
    fn interfaces(&self) -> TransportResult<Vec<InterfaceInfo>>;

    /// Claim an interface for exclusive use
    fn claim_interface(&self, number: u8) -> TransportResult<()>;

    /// Release a previously claimed interface
    fn release_interface(&self, number: u8) -> TransportResult<()>;

    /// Synchronous control OUT transfer; returns the byte count transferred
    fn control_out(
        &self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        data: &[u8],
        timeout: Duration,
    ) -> TransportResult<usize>;

    /// Synchronous bulk OUT transfer; a zero timeout means unlimited
    fn bulk_out(&self, endpoint: u8, data: &[u8], timeout: Duration) -> TransportResult<BulkOut>;

    /// Submit an asynchronous bulk-in read. The completion handler fires on
    /// the transport's event thread.
    fn submit_read(&self, transfer: &Arc<ReadTransfer>) -> TransportResult<()>;

    /// Request cancellation of an in-flight read. Returns
    /// [`rusb::Error::NotFound`] if the transfer is not currently submitted
    /// (it may have completed and not yet been resubmitted); the caller is
    /// expected to retry. An `Ok` return guarantees a later
    /// [`TransferStatus::Cancelled`] completion.
    fn cancel_read(&self, transfer: &Arc<ReadTransfer>) -> TransportResult<()>;
}
