//! USB-to-serial adapter library for Rust
//!
//! This crate classifies an attached USB device, selects a chipset-specific
//! driver and exposes a uniform serial port interface — line configuration,
//! synchronous writes, a continuous asynchronous read pipeline and buffer
//! purges — regardless of which UART-bridge chipset sits behind the USB
//! connection.
//!
//! # Supported chipsets
//!
//! - FTDI FT232R, FT2232, FT4232H, FT231X (matched by vendor/product)
//! - Silicon Labs CP2102, CP2105, CP2108, CP2110 (matched by vendor/product)
//! - CDC-ACM class devices and the Prolific PL2303
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use usbserial::{RusbTransport, SerialPort};
//!
//! fn main() -> usbserial::Result<()> {
//!     let handle = rusb::open_device_with_vid_pid(0x0403, 0x6001)
//!         .ok_or(usbserial::UsbSerialError::NoSuchDevice)?;
//!     let transport = Arc::new(RusbTransport::new(handle)?);
//!
//!     let mut port = SerialPort::open(
//!         transport,
//!         0,
//!         9600,
//!         Box::new(|data| println!("RX {} bytes", data.len())),
//!         None,
//!     )?;
//!
//!     port.write(b"AT\r\n")?;
//!
//!     port.start_reader()?;
//!     std::thread::sleep(std::time::Duration::from_secs(1));
//!     port.stop_reader()?;
//!
//!     port.close()
//! }
//! ```
//!
//! # Threading
//!
//! Each transport owns a single event-processing thread on which all read
//! completions — and therefore all read and error callbacks — are
//! delivered. Operations on one port must be serialized by the caller, and
//! [`SerialPort::stop_reader`] must not be called from the event thread: it
//! blocks until that thread acknowledges the cancelled read transfer.

pub mod backend;
mod bridge;
mod driver;
pub mod error;
pub mod line;
mod port;
mod registry;
pub mod transport;

// Re-export main types at crate root
pub use backend::RusbTransport;
pub use bridge::{ErrorCallback, ReadCallback};
pub use error::{Result, UsbSerialError};
pub use line::{DataBits, LineConfig, Parity, StopBits};
pub use port::SerialPort;
pub use registry::{device_short_name, is_device_supported, ports_count};
pub use transport::{
    BulkOut, DeviceIdentity, EndpointInfo, InterfaceInfo, ReadTransfer, TransferStatus,
    UsbTransport,
};
