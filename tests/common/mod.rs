#![allow(dead_code)]

//! In-memory transport fake for integration tests
//!
//! `MockTransport` implements `UsbTransport` without hardware. Control and
//! bulk transfers are recorded (with optional injected failures and a
//! configurable per-call write chunk limit); asynchronous reads are served
//! by an event thread that pairs the submitted transfer with data or
//! statuses fed in by the test, and that emulates the transport's
//! cancellation semantics: an accepted cancellation is acknowledged by
//! exactly one cancelled completion, a transfer that is not in flight
//! reports `NotFound`.

use std::collections::VecDeque;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, Weak};
use std::thread::JoinHandle;
use std::time::Duration;

use usbserial::transport::TransportResult;
use usbserial::{
    BulkOut, DeviceIdentity, EndpointInfo, InterfaceInfo, ReadTransfer, TransferStatus,
    UsbTransport,
};

const TICK: Duration = Duration::from_millis(5);

#[derive(Debug, Clone)]
pub struct ControlCall {
    pub request_type: u8,
    pub request: u8,
    pub value: u16,
    pub index: u16,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct BulkCall {
    pub endpoint: u8,
    pub len: usize,
}

pub enum Feed {
    Data(Vec<u8>),
    Status(TransferStatus),
}

enum Msg {
    Submit(Arc<ReadTransfer>),
    Feed(Feed),
    Shutdown,
}

#[derive(Default)]
struct MockState {
    identity: Option<DeviceIdentity>,
    interfaces: Vec<InterfaceInfo>,
    control_calls: Vec<ControlCall>,
    bulk_calls: Vec<BulkCall>,
    claimed: Vec<u8>,
    released: Vec<u8>,
    cancel_requests: usize,
    last_transfer: Option<Weak<ReadTransfer>>,
    /// 1-based index of the control call that should fail, if any
    fail_control_at: Option<usize>,
    /// Maximum bytes accepted per bulk OUT call
    write_chunk: Option<usize>,
}

pub struct MockTransport {
    state: Mutex<MockState>,
    events: Sender<Msg>,
    event_thread: Mutex<Option<JoinHandle<()>>>,
}

impl MockTransport {
    pub fn new(identity: DeviceIdentity) -> Arc<Self> {
        let (events, receiver) = mpsc::channel();
        let event_thread = std::thread::Builder::new()
            .name("mock-usb-events".into())
            .spawn(move || event_loop(receiver))
            .expect("failed to spawn mock event thread");

        Arc::new(Self {
            state: Mutex::new(MockState {
                identity: Some(identity),
                ..MockState::default()
            }),
            events,
            event_thread: Mutex::new(Some(event_thread)),
        })
    }

    pub fn set_interfaces(&self, interfaces: Vec<InterfaceInfo>) {
        self.state.lock().unwrap().interfaces = interfaces;
    }

    pub fn fail_control_at(&self, call_number: usize) {
        self.state.lock().unwrap().fail_control_at = Some(call_number);
    }

    pub fn set_write_chunk(&self, chunk: usize) {
        self.state.lock().unwrap().write_chunk = Some(chunk);
    }

    /// Inject inbound data, as if the device had sent it
    pub fn feed(&self, data: Vec<u8>) {
        self.events.send(Msg::Feed(Feed::Data(data))).unwrap();
    }

    /// Inject a terminal transfer status
    pub fn feed_status(&self, status: TransferStatus) {
        self.events.send(Msg::Feed(Feed::Status(status))).unwrap();
    }

    pub fn control_calls(&self) -> Vec<ControlCall> {
        self.state.lock().unwrap().control_calls.clone()
    }

    pub fn bulk_calls(&self) -> Vec<BulkCall> {
        self.state.lock().unwrap().bulk_calls.clone()
    }

    pub fn claimed(&self) -> Vec<u8> {
        self.state.lock().unwrap().claimed.clone()
    }

    pub fn released(&self) -> Vec<u8> {
        self.state.lock().unwrap().released.clone()
    }

    pub fn cancel_requests(&self) -> usize {
        self.state.lock().unwrap().cancel_requests
    }

    pub fn last_transfer(&self) -> Option<Weak<ReadTransfer>> {
        self.state.lock().unwrap().last_transfer.clone()
    }
}

fn event_loop(receiver: Receiver<Msg>) {
    let mut pending: Option<Arc<ReadTransfer>> = None;
    let mut feeds: VecDeque<Feed> = VecDeque::new();

    loop {
        match receiver.recv_timeout(TICK) {
            Ok(Msg::Shutdown) => break,
            Ok(Msg::Submit(transfer)) => pending = Some(transfer),
            Ok(Msg::Feed(feed)) => feeds.push_back(feed),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }

        let Some(transfer) = pending.take() else {
            continue;
        };

        if transfer.cancel_requested() {
            ReadTransfer::complete(&transfer, TransferStatus::Cancelled, 0);
            continue;
        }

        match feeds.pop_front() {
            Some(Feed::Data(data)) => {
                let actual = transfer.with_buffer(|buffer| {
                    let actual = data.len().min(buffer.len());
                    buffer[..actual].copy_from_slice(&data[..actual]);
                    actual
                });
                // The completion handler resubmits through submit_read,
                // which queues a fresh Submit message.
                ReadTransfer::complete(&transfer, TransferStatus::Completed, actual);
            }
            Some(Feed::Status(status)) => {
                ReadTransfer::complete(&transfer, status, 0);
            }
            None => {
                // Nothing from the device within this transfer's window
                std::thread::sleep(TICK);
                ReadTransfer::complete(&transfer, TransferStatus::TimedOut, 0);
            }
        }
    }
}

impl UsbTransport for MockTransport {
    fn device_identity(&self) -> TransportResult<DeviceIdentity> {
        self.state
            .lock()
            .unwrap()
            .identity
            .ok_or(rusb::Error::NoDevice)
    }

    fn interfaces(&self) -> TransportResult<Vec<InterfaceInfo>> {
        Ok(self.state.lock().unwrap().interfaces.clone())
    }

    fn claim_interface(&self, number: u8) -> TransportResult<()> {
        self.state.lock().unwrap().claimed.push(number);
        Ok(())
    }

    fn release_interface(&self, number: u8) -> TransportResult<()> {
        self.state.lock().unwrap().released.push(number);
        Ok(())
    }

    fn control_out(
        &self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        data: &[u8],
        _timeout: Duration,
    ) -> TransportResult<usize> {
        let mut state = self.state.lock().unwrap();
        state.control_calls.push(ControlCall {
            request_type,
            request,
            value,
            index,
            data: data.to_vec(),
        });
        if state.fail_control_at == Some(state.control_calls.len()) {
            return Err(rusb::Error::Io);
        }
        Ok(data.len())
    }

    fn bulk_out(&self, endpoint: u8, data: &[u8], _timeout: Duration) -> TransportResult<BulkOut> {
        let mut state = self.state.lock().unwrap();
        let written = match state.write_chunk {
            Some(chunk) => chunk.min(data.len()),
            None => data.len(),
        };
        state.bulk_calls.push(BulkCall {
            endpoint,
            len: written,
        });
        Ok(BulkOut {
            written,
            timed_out: false,
        })
    }

    fn submit_read(&self, transfer: &Arc<ReadTransfer>) -> TransportResult<()> {
        if !transfer.mark_submitted() {
            return Err(rusb::Error::Busy);
        }
        self.state.lock().unwrap().last_transfer = Some(Arc::downgrade(transfer));
        if self
            .events
            .send(Msg::Submit(Arc::clone(transfer)))
            .is_err()
        {
            transfer.unmark_submitted();
            return Err(rusb::Error::Other);
        }
        Ok(())
    }

    fn cancel_read(&self, transfer: &Arc<ReadTransfer>) -> TransportResult<()> {
        self.state.lock().unwrap().cancel_requests += 1;
        if transfer.request_cancel() {
            Ok(())
        } else {
            Err(rusb::Error::NotFound)
        }
    }
}

impl Drop for MockTransport {
    fn drop(&mut self) {
        let _ = self.events.send(Msg::Shutdown);
        if let Some(thread) = self.event_thread.lock().unwrap().take() {
            let _ = thread.join();
        }
    }
}

pub fn ftdi_identity() -> DeviceIdentity {
    DeviceIdentity {
        vendor_id: 0x0403,
        product_id: 0x6001, // FT232R
        device_class: 0,
        device_subclass: 0,
        max_packet_size: 64,
    }
}

pub fn silabs_identity() -> DeviceIdentity {
    DeviceIdentity {
        vendor_id: 0x10c4,
        product_id: 0xea60, // CP2102
        device_class: 0,
        device_subclass: 0,
        max_packet_size: 64,
    }
}

pub fn cdc_identity() -> DeviceIdentity {
    DeviceIdentity {
        vendor_id: 0x9999,
        product_id: 0x0001,
        device_class: 0x02,
        device_subclass: 0x02,
        max_packet_size: 64,
    }
}

pub fn unsupported_identity() -> DeviceIdentity {
    DeviceIdentity {
        vendor_id: 0x1234,
        product_id: 0x5678,
        device_class: 0xff,
        device_subclass: 0x00,
        max_packet_size: 64,
    }
}

pub fn cdc_interfaces() -> Vec<InterfaceInfo> {
    vec![
        InterfaceInfo {
            number: 0,
            endpoints: vec![EndpointInfo {
                address: 0x81,
                direction: rusb::Direction::In,
                transfer_type: rusb::TransferType::Bulk,
            }],
        },
        InterfaceInfo {
            number: 1,
            endpoints: vec![
                EndpointInfo {
                    address: 0x83,
                    direction: rusb::Direction::In,
                    transfer_type: rusb::TransferType::Interrupt,
                },
                EndpointInfo {
                    address: 0x02,
                    direction: rusb::Direction::Out,
                    transfer_type: rusb::TransferType::Bulk,
                },
            ],
        },
    ]
}
