//! rusb-backed transport
//!
//! [`RusbTransport`] implements [`UsbTransport`] on top of an opened
//! `rusb::DeviceHandle`. Synchronous control and bulk transfers map
//! directly onto the handle; asynchronous reads are served by one
//! dedicated event-processing thread, which performs the blocking bulk
//! reads and synthesizes {completed, timed-out, cancelled} completions,
//! since rusb exposes no asynchronous transfer API of its own.
//!
//! All completions for all transfers submitted through one transport are
//! delivered on that single thread, which is what the read pipeline's
//! locking discipline relies on.
//!
//! The device handle lives behind an `RwLock`: transfers share it for
//! reading while interface claims (which rusb requires `&mut` for) take
//! the write side. Claims only happen while no reader is running, so the
//! write lock never contends with a streaming read in correct usage.

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, RwLock};
use std::thread::JoinHandle;
use std::time::Duration;

use log::{debug, warn};
use rusb::{DeviceHandle, UsbContext};

use crate::error::{Result, UsbSerialError};
use crate::transport::{
    BulkOut, DeviceIdentity, EndpointInfo, InterfaceInfo, ReadTransfer, TransferStatus,
    TransportResult, UsbTransport,
};

enum EventCommand {
    Submit(Arc<ReadTransfer>),
    Shutdown,
}

/// [`UsbTransport`] implementation over a `rusb::DeviceHandle`
pub struct RusbTransport<T: UsbContext> {
    handle: Arc<RwLock<DeviceHandle<T>>>,
    commands: Sender<EventCommand>,
    event_thread: Option<JoinHandle<()>>,
}

impl<T: UsbContext + 'static> RusbTransport<T> {
    /// Wrap an opened device handle and start the event-processing thread.
    ///
    /// Device enumeration and opening stay with the caller; the transport
    /// neither resets nor closes the device beyond dropping the handle.
    pub fn new(handle: DeviceHandle<T>) -> Result<Self> {
        let handle = Arc::new(RwLock::new(handle));
        let (commands, receiver) = mpsc::channel();

        let thread_handle = Arc::clone(&handle);
        let event_thread = std::thread::Builder::new()
            .name("usbserial-events".into())
            .spawn(move || event_loop(thread_handle, receiver))
            .map_err(|_| UsbSerialError::ResourceAllocFailed)?;

        Ok(Self {
            handle,
            commands,
            event_thread: Some(event_thread),
        })
    }
}

fn event_loop<T: UsbContext>(
    handle: Arc<RwLock<DeviceHandle<T>>>,
    receiver: Receiver<EventCommand>,
) {
    debug!("USB event thread started");
    while let Ok(command) = receiver.recv() {
        match command {
            EventCommand::Shutdown => break,
            EventCommand::Submit(transfer) => process_read(&handle, &transfer),
        }
    }
    debug!("USB event thread stopped");
}

fn process_read<T: UsbContext>(handle: &Arc<RwLock<DeviceHandle<T>>>, transfer: &Arc<ReadTransfer>) {
    if transfer.cancel_requested() {
        ReadTransfer::complete(transfer, TransferStatus::Cancelled, 0);
        return;
    }

    let result = {
        let guard = handle.read().unwrap();
        transfer.with_buffer(|buffer| guard.read_bulk(transfer.endpoint(), buffer, transfer.timeout()))
    };

    let (status, actual) = match result {
        Ok(actual) => (TransferStatus::Completed, actual),
        Err(rusb::Error::Timeout) => (TransferStatus::TimedOut, 0),
        Err(rusb::Error::Pipe) => (TransferStatus::Stall, 0),
        Err(rusb::Error::NoDevice) => (TransferStatus::NoDevice, 0),
        Err(rusb::Error::Overflow) => (TransferStatus::Overflow, 0),
        Err(err) => {
            warn!("bulk read on 0x{:02x} failed: {}", transfer.endpoint(), err);
            (TransferStatus::Error, 0)
        }
    };

    ReadTransfer::complete(transfer, status, actual);
}

impl<T: UsbContext> UsbTransport for RusbTransport<T> {
    fn device_identity(&self) -> TransportResult<DeviceIdentity> {
        let guard = self.handle.read().unwrap();
        let descriptor = guard.device().device_descriptor()?;
        Ok(DeviceIdentity {
            vendor_id: descriptor.vendor_id(),
            product_id: descriptor.product_id(),
            device_class: descriptor.class_code(),
            device_subclass: descriptor.sub_class_code(),
            max_packet_size: descriptor.max_packet_size(),
        })
    }

    fn interfaces(&self) -> TransportResult<Vec<InterfaceInfo>> {
        let guard = self.handle.read().unwrap();
        let config = guard.device().active_config_descriptor()?;

        let mut interfaces = Vec::with_capacity(config.num_interfaces() as usize);
        for interface in config.interfaces() {
            // Only the first alternate setting matters for serial bridges
            let Some(descriptor) = interface.descriptors().next() else {
                continue;
            };
            let endpoints = descriptor
                .endpoint_descriptors()
                .map(|endpoint| EndpointInfo {
                    address: endpoint.address(),
                    direction: endpoint.direction(),
                    transfer_type: endpoint.transfer_type(),
                })
                .collect();
            interfaces.push(InterfaceInfo {
                number: descriptor.interface_number(),
                endpoints,
            });
        }
        Ok(interfaces)
    }

    fn claim_interface(&self, number: u8) -> TransportResult<()> {
        let mut guard = self.handle.write().unwrap();
        if guard.kernel_driver_active(number).unwrap_or(false) {
            guard.detach_kernel_driver(number)?;
        }
        guard.claim_interface(number)
    }

    fn release_interface(&self, number: u8) -> TransportResult<()> {
        self.handle.write().unwrap().release_interface(number)
    }

    fn control_out(
        &self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        data: &[u8],
        timeout: Duration,
    ) -> TransportResult<usize> {
        self.handle
            .read()
            .unwrap()
            .write_control(request_type, request, value, index, data, timeout)
    }

    fn bulk_out(&self, endpoint: u8, data: &[u8], timeout: Duration) -> TransportResult<BulkOut> {
        match self.handle.read().unwrap().write_bulk(endpoint, data, timeout) {
            Ok(written) => Ok(BulkOut {
                written,
                timed_out: false,
            }),
            // rusb reports a timed-out transfer without its byte count
            Err(rusb::Error::Timeout) => Ok(BulkOut {
                written: 0,
                timed_out: true,
            }),
            Err(err) => Err(err),
        }
    }

    fn submit_read(&self, transfer: &Arc<ReadTransfer>) -> TransportResult<()> {
        if !transfer.mark_submitted() {
            return Err(rusb::Error::Busy);
        }
        if self
            .commands
            .send(EventCommand::Submit(Arc::clone(transfer)))
            .is_err()
        {
            transfer.unmark_submitted();
            return Err(rusb::Error::Other);
        }
        Ok(())
    }

    fn cancel_read(&self, transfer: &Arc<ReadTransfer>) -> TransportResult<()> {
        if transfer.request_cancel() {
            Ok(())
        } else {
            Err(rusb::Error::NotFound)
        }
    }
}

impl<T: UsbContext> Drop for RusbTransport<T> {
    fn drop(&mut self) {
        let _ = self.commands.send(EventCommand::Shutdown);
        if let Some(thread) = self.event_thread.take() {
            let _ = thread.join();
        }
    }
}
