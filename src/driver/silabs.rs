//! Silicon Labs CP210x driver
//!
//! CP210x bridges are configured through host-to-device vendor requests
//! addressed to the port's interface via wIndex. Port init enables the
//! UART, raises DTR/RTS and programs a default baud divisor; line
//! configuration is an 8-byte payload carrying the raw little-endian baud
//! rate and one byte each for parity, flow control, data bits and stop
//! bits.

use crate::bridge::{self, DEFAULT_CONTROL_TIMEOUT};
use crate::driver::{DriverState, SerialDriver};
use crate::error::{Result, UsbSerialError};
use crate::line::{DataBits, LineConfig, Parity, StopBits};
use crate::port::SerialPort;
use crate::transport::DeviceIdentity;

pub(crate) const SILABS_VENDOR_ID: u16 = 0x10c4;

pub(crate) const SILABS_PRODUCT_ID_CP2102: u16 = 0xea60;
pub(crate) const SILABS_PRODUCT_ID_CP2105: u16 = 0xea70;
pub(crate) const SILABS_PRODUCT_ID_CP2108: u16 = 0xea71;
pub(crate) const SILABS_PRODUCT_ID_CP2110: u16 = 0xea80;

const SILABS_HOST_TO_DEVICE_REQTYPE: u8 = 0x41;

const SILABS_IFC_REQUEST_CODE: u8 = 0x00;
const SILABS_BAUDDIV_REQUEST_CODE: u8 = 0x01;
const SILABS_MHS_REQUEST_CODE: u8 = 0x07;
const SILABS_BAUDRATE_REQUEST_CODE: u8 = 0x1e;
const SILABS_FLUSH_REQUEST_CODE: u8 = 0x12;

const SILABS_IFC_UART_ENABLE_VALUE: u16 = 0x0001;

const SILABS_MHS_MCR_DTR_VALUE: u16 = 0x0001;
const SILABS_MHS_MCR_RTS_VALUE: u16 = 0x0002;
const SILABS_MHS_CTRL_DTR_VALUE: u16 = 0x0100;
const SILABS_MHS_CTRL_RTS_VALUE: u16 = 0x0200;

const SILABS_FLUSH_RX_VALUE: u16 = 0x0a;
const SILABS_FLUSH_TX_VALUE: u16 = 0x05;

const SILABS_BAUDDIV_GEN_FREQ_VALUE: u32 = 0x384000;

const SILABS_DEFAULT_BAUD_RATE: u32 = 9600;

fn read_endpoint(port_index: u8) -> u8 {
    0x81 + port_index
}

fn write_endpoint(port_index: u8) -> u8 {
    0x01 + port_index
}

/// Driver-private port state (the CP210x driver keeps nothing beyond the
/// fact that the port is initialized)
pub(crate) struct SilabsState;

fn set_config(port: &SerialPort, request_code: u8, value: u16) -> Result<()> {
    port.transport().control_out(
        SILABS_HOST_TO_DEVICE_REQTYPE,
        request_code,
        value,
        u16::from(port.port_index()),
        &[],
        DEFAULT_CONTROL_TIMEOUT,
    )?;
    Ok(())
}

/// Build the 8-byte line-configuration payload.
///
/// Layout: baud as LE32, then parity, flow control, data bits and stop
/// bits, one byte each. 1.5 stop bits is only legal with 5 data bits; 2
/// stop bits is never legal with 5 data bits.
fn encode_line_config(config: &LineConfig) -> Result<[u8; 8]> {
    let parity_byte: u8 = match config.parity {
        Parity::None => 0,
        Parity::Odd => 1,
        Parity::Even => 2,
        Parity::Mark => 3,
        Parity::Space => 4,
    };

    // Hardware flow control not supported (yet)
    let flow_control_byte: u8 = 0;

    let data_bits_byte = config.data_bits.bits();

    let stop_bits_byte: u8 = match config.stop_bits {
        StopBits::One => 0,
        StopBits::OnePointFive => {
            if config.data_bits != DataBits::Five {
                return Err(UsbSerialError::UnsupportedOperation);
            }
            1
        }
        StopBits::Two => {
            if config.data_bits == DataBits::Five {
                return Err(UsbSerialError::UnsupportedOperation);
            }
            1
        }
    };

    let mut data = [0u8; 8];
    data[..4].copy_from_slice(&config.baud.to_le_bytes());
    data[4] = parity_byte;
    data[5] = flow_control_byte;
    data[6] = data_bits_byte;
    data[7] = stop_bits_byte;
    Ok(data)
}

fn state(port: &SerialPort) -> Result<&SilabsState> {
    match port.driver_state() {
        Some(DriverState::Silabs(state)) => Ok(state),
        _ => Err(UsbSerialError::IllegalState),
    }
}

pub(crate) struct SilabsDriver;

impl SerialDriver for SilabsDriver {
    fn supports_vid_pid(&self, vendor_id: u16, product_id: u16) -> bool {
        vendor_id == SILABS_VENDOR_ID
            && matches!(
                product_id,
                SILABS_PRODUCT_ID_CP2102
                    | SILABS_PRODUCT_ID_CP2105
                    | SILABS_PRODUCT_ID_CP2108
                    | SILABS_PRODUCT_ID_CP2110
            )
    }

    fn short_name(&self, identity: &DeviceIdentity) -> &'static str {
        match identity.product_id {
            SILABS_PRODUCT_ID_CP2102 => "CP2102",
            SILABS_PRODUCT_ID_CP2105 => "CP2105",
            SILABS_PRODUCT_ID_CP2108 => "CP2108",
            SILABS_PRODUCT_ID_CP2110 => "CP2110",
            _ => "CP21XX",
        }
    }

    fn ports_count(&self, _vendor_id: u16, product_id: u16) -> u8 {
        match product_id {
            SILABS_PRODUCT_ID_CP2102 | SILABS_PRODUCT_ID_CP2110 => 1,
            SILABS_PRODUCT_ID_CP2105 => 2,
            SILABS_PRODUCT_ID_CP2108 => 4,
            _ => 0,
        }
    }

    fn port_init(&self, port: &mut SerialPort) -> Result<()> {
        port.transport().claim_interface(port.port_index())?;

        let init = (|| -> Result<()> {
            set_config(port, SILABS_IFC_REQUEST_CODE, SILABS_IFC_UART_ENABLE_VALUE)?;
            set_config(
                port,
                SILABS_MHS_REQUEST_CODE,
                SILABS_MHS_MCR_DTR_VALUE
                    | SILABS_MHS_MCR_RTS_VALUE
                    | SILABS_MHS_CTRL_DTR_VALUE
                    | SILABS_MHS_CTRL_RTS_VALUE,
            )?;
            set_config(
                port,
                SILABS_BAUDDIV_REQUEST_CODE,
                (SILABS_BAUDDIV_GEN_FREQ_VALUE / SILABS_DEFAULT_BAUD_RATE) as u16,
            )
        })();
        if let Err(err) = init {
            let _ = port.transport().release_interface(port.port_index());
            return Err(err);
        }

        port.set_driver_state(DriverState::Silabs(SilabsState));
        Ok(())
    }

    fn port_deinit(&self, port: &mut SerialPort) -> Result<()> {
        if port.take_driver_state().is_none() {
            return Err(UsbSerialError::IllegalState);
        }
        port.transport().release_interface(port.port_index())?;
        Ok(())
    }

    fn set_line_config(&self, port: &SerialPort, config: &LineConfig) -> Result<()> {
        state(port)?;

        let data = encode_line_config(config)?;
        let written = port.transport().control_out(
            SILABS_HOST_TO_DEVICE_REQTYPE,
            SILABS_BAUDRATE_REQUEST_CODE,
            0,
            u16::from(port.port_index()),
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
        state(port)?;
        let endpoint = read_endpoint(port.port_index());
        bridge::start_reader(port, endpoint, None)
    }

    fn stop_reader(&self, port: &mut SerialPort) -> Result<()> {
        state(port)?;
        bridge::stop_reader(port)
    }

    fn write(&self, port: &SerialPort, data: &[u8]) -> Result<()> {
        state(port)?;
        bridge::bulk_write_all(
            port.transport().as_ref(),
            write_endpoint(port.port_index()),
            data,
        )
    }

    fn purge(&self, port: &SerialPort, rx: bool, tx: bool) -> Result<()> {
        state(port)?;

        let value = (if rx { SILABS_FLUSH_RX_VALUE } else { 0 })
            | (if tx { SILABS_FLUSH_TX_VALUE } else { 0 });
        set_config(port, SILABS_FLUSH_REQUEST_CODE, value)
    }
}
