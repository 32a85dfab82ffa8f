//! Error types for the usbserial library
//!
//! This module defines the error types used throughout the library
//! for handling USB communication and serial protocol errors.

use thiserror::Error;

/// Result type alias for usbserial operations
pub type Result<T> = std::result::Result<T, UsbSerialError>;

/// Error types for usbserial operations
#[derive(Error, Debug)]
pub enum UsbSerialError {
    /// USB error reported by the transport layer
    #[error("USB error: {0}")]
    Usb(#[from] rusb::Error),

    /// Operation not supported by the matched driver or device
    #[error("Unsupported operation")]
    UnsupportedOperation,

    /// Operation invoked outside the port lifecycle's allowed order
    #[error("Illegal state")]
    IllegalState,

    /// Null or contradictory arguments
    #[error("Invalid parameter")]
    InvalidParameter,

    /// Memory or synchronization primitive allocation failure
    #[error("Resource allocation failed")]
    ResourceAllocFailed,

    /// The USB device handle does not refer to a device
    #[error("No such device")]
    NoSuchDevice,

    /// No driver matches the device's vendor/product or class/subclass
    #[error("Unsupported device")]
    UnsupportedDevice,

    /// The requested baud rate is not exactly achievable on this chipset
    #[error("Unsupported baud rate: {baud}")]
    UnsupportedBaudRate { baud: u32 },

    /// Port index out of range for the device
    #[error("Invalid port index: {index}")]
    InvalidPortIndex { index: u8 },

    /// Control transfer reported success but moved the wrong byte count
    #[error("Control command failed: expected {expected} bytes, transferred {actual}")]
    ControlCommandFailed { expected: usize, actual: usize },
}

impl UsbSerialError {
    /// Check if this error is a timeout error
    pub fn is_timeout(&self) -> bool {
        matches!(self, UsbSerialError::Usb(rusb::Error::Timeout))
    }

    /// Check if this error originates in the USB transport layer
    pub fn is_usb_error(&self) -> bool {
        matches!(self, UsbSerialError::Usb(_))
    }
}
