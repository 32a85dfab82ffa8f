//! Serial port lifecycle
//!
//! A [`SerialPort`] is one addressable serial channel of an opened USB
//! device. Opening a port resolves the device to a chipset driver, claims
//! the USB interface(s) and applies the requested baud rate with 8/N/1
//! framing; from then on the port exposes line configuration, synchronous
//! writes, the asynchronous read pipeline and buffer purges.
//!
//! Thread contract: operations on one port must be serialized by the
//! caller. [`stop_reader`](SerialPort::stop_reader) blocks until the
//! transport's event thread acknowledges the cancelled read transfer and
//! therefore must never be called from that thread (nor from inside the
//! read callback).

use std::sync::Arc;

use log::debug;

use crate::bridge::{ErrorCallback, ReadCallback, ReaderShared};
use crate::driver::{DriverState, SerialDriver};
use crate::error::{Result, UsbSerialError};
use crate::line::LineConfig;
use crate::registry;
use crate::transport::{DeviceIdentity, ReadTransfer, UsbTransport};

/// One serial port of a USB-to-serial adapter
pub struct SerialPort {
    transport: Arc<dyn UsbTransport>,
    driver: &'static dyn SerialDriver,
    identity: DeviceIdentity,
    port_index: u8,
    reader: Arc<ReaderShared>,
    driver_state: Option<DriverState>,
    read_transfer: Option<Arc<ReadTransfer>>,
}

impl SerialPort {
    /// Open one port of the device behind `transport`.
    ///
    /// Resolves the device to a driver, claims its interface(s) and applies
    /// `baud` with 8/N/1 framing. On failure everything acquired along the
    /// way is released again; no half-initialized port is ever returned.
    ///
    /// `read_cb` receives inbound data once
    /// [`start_reader`](Self::start_reader) is called; it runs on the
    /// transport's event thread. `error_cb`, if given, is notified of
    /// terminal read-transfer failures on the same thread.
    pub fn open(
        transport: Arc<dyn UsbTransport>,
        port_index: u8,
        baud: u32,
        read_cb: ReadCallback,
        error_cb: Option<ErrorCallback>,
    ) -> Result<SerialPort> {
        let identity = transport.device_identity()?;
        let driver =
            registry::resolve_identity(&identity).ok_or(UsbSerialError::UnsupportedDevice)?;

        let mut port = SerialPort {
            transport,
            driver,
            identity,
            port_index,
            reader: ReaderShared::new(read_cb, error_cb),
            driver_state: None,
            read_transfer: None,
        };

        driver.port_init(&mut port)?;

        if let Err(err) = driver.set_line_config(&port, &LineConfig::with_baud(baud)) {
            // Undo the interface claims before surfacing the error
            let _ = driver.port_deinit(&mut port);
            return Err(err);
        }

        debug!(
            "opened {} port {} ({:04x}:{:04x}) at {} baud",
            port.short_name(),
            port_index,
            identity.vendor_id,
            identity.product_id,
            baud
        );
        Ok(port)
    }

    /// Short name of the matched chipset (e.g. "FT232R", "CP2102", "CDC")
    pub fn short_name(&self) -> &'static str {
        self.driver.short_name(&self.identity)
    }

    /// Descriptor facts of the underlying device
    pub fn device_identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    /// Zero-based index of this port on the device
    pub fn port_index(&self) -> u8 {
        self.port_index
    }

    /// Apply a complete line configuration
    pub fn set_line_config(&self, config: &LineConfig) -> Result<()> {
        self.driver.set_line_config(self, config)
    }

    /// Set the baud rate, keeping 8/N/1 framing
    pub fn set_baud_rate(&self, baud: u32) -> Result<()> {
        self.set_line_config(&LineConfig::with_baud(baud))
    }

    /// Start the continuous read pipeline. Data arrives through the read
    /// callback until [`stop_reader`](Self::stop_reader) is called or a
    /// transport error stops the pipeline for good.
    pub fn start_reader(&mut self) -> Result<()> {
        if self.reader.read_error() {
            // A failed reader is terminal; the port must be re-created
            return Err(UsbSerialError::IllegalState);
        }
        let driver = self.driver;
        driver.start_reader(self)
    }

    /// Stop the read pipeline.
    ///
    /// Blocks until the in-flight read transfer is confirmed cancelled; it
    /// is guaranteed that the read callback is not invoked again after this
    /// returns. Must not be called on the transport's event thread.
    pub fn stop_reader(&mut self) -> Result<()> {
        let driver = self.driver;
        driver.stop_reader(self)
    }

    /// Synchronously write `data` to the port, blocking until every byte
    /// has been handed to the device
    pub fn write(&self, data: &[u8]) -> Result<()> {
        self.driver.write(self, data)
    }

    /// Purge the device's receive and/or transmit buffers. At least one of
    /// `rx` and `tx` must be set. Drivers without purge support report
    /// [`UsbSerialError::UnsupportedOperation`].
    pub fn purge(&self, rx: bool, tx: bool) -> Result<()> {
        if !rx && !tx {
            return Err(UsbSerialError::InvalidParameter);
        }
        self.driver.purge(self, rx, tx)
    }

    /// Close the port, releasing its USB interfaces.
    ///
    /// The reader must be stopped first; a still-active reader is stopped
    /// on a best-effort basis.
    pub fn close(mut self) -> Result<()> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<()> {
        let driver = self.driver;
        if self.read_transfer.is_some() {
            let _ = driver.stop_reader(self);
        }
        if self.driver_state.is_none() {
            return Ok(());
        }
        debug!("closing {} port {}", self.short_name(), self.port_index);
        driver.port_deinit(self)
    }

    pub(crate) fn transport(&self) -> &Arc<dyn UsbTransport> {
        &self.transport
    }

    pub(crate) fn reader(&self) -> &Arc<ReaderShared> {
        &self.reader
    }

    pub(crate) fn driver_state(&self) -> Option<&DriverState> {
        self.driver_state.as_ref()
    }

    pub(crate) fn set_driver_state(&mut self, state: DriverState) {
        self.driver_state = Some(state);
    }

    pub(crate) fn take_driver_state(&mut self) -> Option<DriverState> {
        self.driver_state.take()
    }

    pub(crate) fn read_transfer(&self) -> Option<&Arc<ReadTransfer>> {
        self.read_transfer.as_ref()
    }

    pub(crate) fn set_read_transfer(&mut self, transfer: Arc<ReadTransfer>) {
        self.read_transfer = Some(transfer);
    }

    pub(crate) fn take_read_transfer(&mut self) -> Option<Arc<ReadTransfer>> {
        self.read_transfer.take()
    }
}

impl Drop for SerialPort {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}

impl std::fmt::Debug for SerialPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialPort")
            .field("device", &self.short_name())
            .field(
                "id",
                &format_args!(
                    "{:04x}:{:04x}",
                    self.identity.vendor_id, self.identity.product_id
                ),
            )
            .field("port_index", &self.port_index)
            .field("reading", &self.read_transfer.is_some())
            .finish()
    }
}
