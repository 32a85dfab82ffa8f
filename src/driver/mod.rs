//! Chipset driver API
//!
//! Each supported UART-bridge chipset family implements [`SerialDriver`]:
//! device matching, naming, port counts, and the five port operations. The
//! dispatch logic lives in [`registry`](crate::registry); drivers delegate
//! their reader and write paths to [`bridge`](crate::bridge).

pub(crate) mod cdc;
pub(crate) mod ftdi;
pub(crate) mod silabs;

use crate::bridge::ReadPostprocessor;
use crate::error::Result;
use crate::line::LineConfig;
use crate::port::SerialPort;
use crate::transport::DeviceIdentity;

/// Driver-private per-port state.
///
/// Exclusively owned by the port: created by the matched driver's
/// `port_init`, destroyed by its `port_deinit`. Modeled as a tagged variant
/// so the port can hold any family's state without dynamic allocation.
pub(crate) enum DriverState {
    Ftdi(ftdi::FtdiState),
    Silabs(silabs::SilabsState),
    Cdc(cdc::CdcState),
}

/// One chipset family's protocol implementation.
///
/// Registry entries are shared and immutable; everything mutable lives in
/// the port's [`DriverState`].
pub(crate) trait SerialDriver: Send + Sync {
    /// Authoritative match on vendor/product identifiers
    fn supports_vid_pid(&self, vendor_id: u16, product_id: u16) -> bool;

    /// Fallback match on USB device class/subclass, for generic-class
    /// chipsets. Most drivers only match by vendor/product.
    fn supports_class(&self, _device_class: u8, _device_subclass: u8) -> bool {
        false
    }

    /// Short human-readable device name
    fn short_name(&self, identity: &DeviceIdentity) -> &'static str;

    /// Expected serial port count for the given device
    fn ports_count(&self, vendor_id: u16, product_id: u16) -> u8;

    /// Claim USB interface(s), discover endpoints and install the driver
    /// state. On failure every claimed interface must be released again.
    fn port_init(&self, port: &mut SerialPort) -> Result<()>;

    /// Release interfaces and destroy the driver state
    fn port_deinit(&self, port: &mut SerialPort) -> Result<()>;

    /// Apply a line configuration through chipset control transfers
    fn set_line_config(&self, port: &SerialPort, config: &LineConfig) -> Result<()>;

    /// Start the continuous read pipeline
    fn start_reader(&self, port: &mut SerialPort) -> Result<()>;

    /// Stop the read pipeline, blocking until the in-flight transfer is
    /// confirmed cancelled
    fn stop_reader(&self, port: &mut SerialPort) -> Result<()>;

    /// Synchronously write the whole buffer to the port
    fn write(&self, port: &SerialPort, data: &[u8]) -> Result<()>;

    /// Purge the device's receive and/or transmit buffers
    fn purge(&self, port: &SerialPort, rx: bool, tx: bool) -> Result<()>;

    /// Transform applied to inbound data before it reaches the application
    fn read_postprocessor(&self) -> Option<ReadPostprocessor> {
        None
    }
}
