//! CDC-ACM and Prolific PL2303 driver
//!
//! Generic CDC-ACM devices are matched by class/subclass (including the
//! out-of-spec subclass 0 that Arduino-compatible devices report); the
//! PL2303 is matched by vendor/product. Bulk endpoints are discovered from
//! the active configuration descriptor rather than derived from the port
//! index, and may live on one or two interfaces. Line parameters go out as
//! the standard 7-byte SET_LINE_CODING payload. Purge is only available as
//! a Prolific vendor command.

use log::debug;

use crate::bridge::{self, DEFAULT_CONTROL_TIMEOUT};
use crate::driver::{DriverState, SerialDriver};
use crate::error::{Result, UsbSerialError};
use crate::line::{LineConfig, Parity, StopBits};
use crate::port::SerialPort;
use crate::transport::DeviceIdentity;

pub(crate) const ARDUINO_VENDOR_ID: u16 = 0x2341;
pub(crate) const PROLIFIC_VENDOR_ID: u16 = 0x067b;

pub(crate) const PROLIFIC_PRODUCT_ID_PL2303: u16 = 0x2303;

pub(crate) const CDC_DEVICE_CLASS: u8 = 0x02;
pub(crate) const CDC_ACM_DEVICE_SUBCLASS: u8 = 0x02;

/// Class request, interface recipient, host-to-device
const CDC_ACM_REQTYPE: u8 = 0x21;

const CDC_SET_LINE_CODING_REQUEST_CODE: u8 = 0x20;

const PROLIFIC_VENDOR_OUT_REQTYPE: u8 = 0x40;

const PROLIFIC_VENDOR_WRITE_REQUEST_CODE: u8 = 0x01;

const PROLIFIC_FLUSH_RX_VALUE: u16 = 0x08;
const PROLIFIC_FLUSH_TX_VALUE: u16 = 0x09;

/// Driver-private port state: discovered endpoints and the interfaces that
/// carry them
pub(crate) struct CdcState {
    read_endpoint: u8,
    write_endpoint: u8,
    read_interface: u8,
    write_interface: u8,
}

fn prolific_vendor_out(port: &SerialPort, value: u16, index: u16, data: &[u8]) -> Result<()> {
    let written = port.transport().control_out(
        PROLIFIC_VENDOR_OUT_REQTYPE,
        PROLIFIC_VENDOR_WRITE_REQUEST_CODE,
        value,
        index,
        data,
        DEFAULT_CONTROL_TIMEOUT,
    )?;
    if written != data.len() {
        return Err(UsbSerialError::ControlCommandFailed {
            expected: data.len(),
            actual: written,
        });
    }
    Ok(())
}

/// Build the 7-byte CDC line coding payload: dwDTERate (LE32), bCharFormat,
/// bParityType, bDataBits.
fn encode_line_coding(config: &LineConfig) -> [u8; 7] {
    let char_format: u8 = match config.stop_bits {
        StopBits::One => 0,
        StopBits::OnePointFive => 1,
        StopBits::Two => 2,
    };
    let parity_type: u8 = match config.parity {
        Parity::None => 0,
        Parity::Odd => 1,
        Parity::Even => 2,
        Parity::Mark => 3,
        Parity::Space => 4,
    };

    let mut data = [0u8; 7];
    data[..4].copy_from_slice(&config.baud.to_le_bytes());
    data[4] = char_format;
    data[5] = parity_type;
    data[6] = config.data_bits.bits();
    data
}

fn state(port: &SerialPort) -> Result<&CdcState> {
    match port.driver_state() {
        Some(DriverState::Cdc(state)) => Ok(state),
        _ => Err(UsbSerialError::IllegalState),
    }
}

pub(crate) struct CdcDriver;

impl SerialDriver for CdcDriver {
    fn supports_vid_pid(&self, vendor_id: u16, product_id: u16) -> bool {
        vendor_id == PROLIFIC_VENDOR_ID && product_id == PROLIFIC_PRODUCT_ID_PL2303
    }

    fn supports_class(&self, device_class: u8, device_subclass: u8) -> bool {
        // Arduino-compatible devices report 0 as subclass,
        // which is against the CDC specification :-||
        device_class == CDC_DEVICE_CLASS
            && (device_subclass == CDC_ACM_DEVICE_SUBCLASS || device_subclass == 0)
    }

    fn short_name(&self, identity: &DeviceIdentity) -> &'static str {
        if identity.vendor_id == PROLIFIC_VENDOR_ID
            && identity.product_id == PROLIFIC_PRODUCT_ID_PL2303
        {
            return "PL2303";
        }

        match identity.vendor_id {
            ARDUINO_VENDOR_ID => "Arduino",
            _ => "CDC",
        }
    }

    fn ports_count(&self, _vendor_id: u16, _product_id: u16) -> u8 {
        // Are there any multiport CDC/ACM or Prolific devices out there?
        1
    }

    fn port_init(&self, port: &mut SerialPort) -> Result<()> {
        let mut read_endpoint = None;
        let mut write_endpoint = None;

        for interface in port.transport().interfaces()? {
            for endpoint in &interface.endpoints {
                if endpoint.transfer_type != rusb::TransferType::Bulk {
                    continue;
                }
                match endpoint.direction {
                    rusb::Direction::In => {
                        if read_endpoint.is_none() {
                            read_endpoint = Some((endpoint.address, interface.number));
                        }
                    }
                    rusb::Direction::Out => {
                        if write_endpoint.is_none() {
                            write_endpoint = Some((endpoint.address, interface.number));
                        }
                    }
                }
            }
        }

        let (read_endpoint, read_interface) =
            read_endpoint.ok_or(UsbSerialError::UnsupportedDevice)?;
        let (write_endpoint, write_interface) =
            write_endpoint.ok_or(UsbSerialError::UnsupportedDevice)?;
        debug!(
            "CDC endpoints: in 0x{:02x} (interface {}), out 0x{:02x} (interface {})",
            read_endpoint, read_interface, write_endpoint, write_interface
        );

        port.transport().claim_interface(read_interface)?;
        if write_interface != read_interface {
            if let Err(err) = port.transport().claim_interface(write_interface) {
                let _ = port.transport().release_interface(read_interface);
                return Err(err.into());
            }
        }

        port.set_driver_state(DriverState::Cdc(CdcState {
            read_endpoint,
            write_endpoint,
            read_interface,
            write_interface,
        }));
        Ok(())
    }

    fn port_deinit(&self, port: &mut SerialPort) -> Result<()> {
        let state = match port.take_driver_state() {
            Some(DriverState::Cdc(state)) => state,
            _ => return Err(UsbSerialError::IllegalState),
        };

        let ret = port
            .transport()
            .release_interface(state.read_interface)
            .map_err(UsbSerialError::from);
        if state.write_interface != state.read_interface {
            let write_ret = port
                .transport()
                .release_interface(state.write_interface)
                .map_err(UsbSerialError::from);
            return ret.and(write_ret);
        }
        ret
    }

    fn set_line_config(&self, port: &SerialPort, config: &LineConfig) -> Result<()> {
        state(port)?;

        let data = encode_line_coding(config);
        let written = port.transport().control_out(
            CDC_ACM_REQTYPE,
            CDC_SET_LINE_CODING_REQUEST_CODE,
            0,
            0,
            &data,
            DEFAULT_CONTROL_TIMEOUT,
        )?;
        if written != data.len() {
            return Err(UsbSerialError::ControlCommandFailed {
                expected: data.len(),
                actual: written,
            });
        }
        Ok(())
    }

    fn start_reader(&self, port: &mut SerialPort) -> Result<()> {
        let read_endpoint = state(port)?.read_endpoint;
        bridge::start_reader(port, read_endpoint, None)
    }

    fn stop_reader(&self, port: &mut SerialPort) -> Result<()> {
        state(port)?;
        bridge::stop_reader(port)
    }

    fn write(&self, port: &SerialPort, data: &[u8]) -> Result<()> {
        let write_endpoint = state(port)?.write_endpoint;
        bridge::bulk_write_all(port.transport().as_ref(), write_endpoint, data)
    }

    fn purge(&self, port: &SerialPort, rx: bool, tx: bool) -> Result<()> {
        state(port)?;

        if port.device_identity().vendor_id != PROLIFIC_VENDOR_ID {
            return Err(UsbSerialError::UnsupportedOperation);
        }

        let rx_ret = if rx {
            prolific_vendor_out(port, PROLIFIC_FLUSH_RX_VALUE, 0, &[])
        } else {
            Ok(())
        };
        let tx_ret = if tx {
            prolific_vendor_out(port, PROLIFIC_FLUSH_TX_VALUE, 0, &[])
        } else {
            Ok(())
        };

        rx_ret.and(tx_ret)
    }
}
