//! FTDI FT232R/FT2232/FT4232H/FT231X driver
//!
//! FTDI bridges are configured through vendor control requests. Baud rates
//! are produced by dividing a 24 MHz reference clock; the divisor carries
//! three fractional bits encoded through a lookup table, and multi-port
//! parts fold a per-port control index into the high byte of the index
//! word. Inbound bulk data is prefixed with two modem-status bytes per USB
//! packet, which are stripped before delivery.

use crate::bridge::{self, ReadPostprocessor, DEFAULT_CONTROL_TIMEOUT};
use crate::driver::{DriverState, SerialDriver};
use crate::error::{Result, UsbSerialError};
use crate::line::{LineConfig, Parity, StopBits};
use crate::port::SerialPort;
use crate::transport::DeviceIdentity;

pub(crate) const FTDI_VENDOR_ID: u16 = 0x0403;

pub(crate) const FTDI_PRODUCT_ID_FT232R: u16 = 0x6001;
pub(crate) const FTDI_PRODUCT_ID_FT2232: u16 = 0x6010;
pub(crate) const FTDI_PRODUCT_ID_FT4232H: u16 = 0x6011;
pub(crate) const FTDI_PRODUCT_ID_FT231X: u16 = 0x6015;

const FTDI_SIO_REQUEST_RESET: u8 = 0;
const FTDI_SIO_REQUEST_SET_BAUD_RATE: u8 = 3;
const FTDI_SIO_REQUEST_SET_LINE_CONFIG: u8 = 4;

const FTDI_SIO_RESET: u16 = 0;
const FTDI_SIO_RESET_PURGE_RX: u16 = 1;
const FTDI_SIO_RESET_PURGE_TX: u16 = 2;

/// Vendor request, device recipient, host-to-device
const FTDI_DEVICE_OUT_REQTYPE: u8 = 0x40;

const FTDI_MODEM_STATUS_BYTES_COUNT: usize = 2;

const FTDI_REFERENCE_CLOCK: u32 = 24_000_000;

const FTDI_PARITY_SHIFT: u16 = 8;
const FTDI_STOP_BITS_SHIFT: u16 = 11;

const FTDI_PARITY_NONE: u16 = 0x00 << FTDI_PARITY_SHIFT;
const FTDI_PARITY_ODD: u16 = 0x01 << FTDI_PARITY_SHIFT;
const FTDI_PARITY_EVEN: u16 = 0x02 << FTDI_PARITY_SHIFT;
const FTDI_PARITY_MARK: u16 = 0x03 << FTDI_PARITY_SHIFT;
const FTDI_PARITY_SPACE: u16 = 0x04 << FTDI_PARITY_SHIFT;

const FTDI_STOP_BITS_1: u16 = 0x00 << FTDI_STOP_BITS_SHIFT;
const FTDI_STOP_BITS_1_5: u16 = 0x01 << FTDI_STOP_BITS_SHIFT;
const FTDI_STOP_BITS_2: u16 = 0x02 << FTDI_STOP_BITS_SHIFT;

fn read_endpoint(port_index: u8) -> u8 {
    0x81 + 2 * port_index
}

fn write_endpoint(port_index: u8) -> u8 {
    0x02 + 2 * port_index
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FtdiDeviceType {
    Ft2232,
    Ft4232h,
    Other,
}

/// Driver-private port state
pub(crate) struct FtdiState {
    device_type: FtdiDeviceType,
    /// wIndex routing value: port number + 1 on multi-port parts, 0 otherwise
    control_index: u16,
}

struct FtdiBaud {
    best_baud: u32,
    index: u16,
    value: u16,
}

/// Find the closest achievable baud rate and its wire encoding.
///
/// Algorithm derived from libftdi: the divisor is expressed in eighths of a
/// bit period, clamped into the legal range, and the better of `divisor`
/// and `divisor + 1` is kept. The three fractional bits are encoded through
/// a fixed lookup table, with two legacy special cases for 3 MBaud and
/// 2 MBaud.
fn convert_baud_rate(baud: u32, device_type: FtdiDeviceType, control_index: u16) -> FtdiBaud {
    const FRAC_CODE: [u32; 8] = [0, 3, 2, 4, 1, 5, 6, 7];

    let divisor = FTDI_REFERENCE_CLOCK / baud;
    let mut best_divisor = 0u32;
    let mut best_baud = 0u32;
    let mut best_diff = 0u32;

    for i in 0..2u32 {
        let mut try_divisor = divisor + i;

        if try_divisor <= 8 {
            // Round up to the minimum supported divisor
            try_divisor = 8;
        } else if try_divisor < 12 {
            try_divisor = 12;
        } else if divisor < 16 {
            try_divisor = 16;
        } else if try_divisor > 0x1FFFF {
            try_divisor = 0x1FFFF;
        }

        // Estimated baud rate, rounded to the nearest integer
        let estimate = (FTDI_REFERENCE_CLOCK + try_divisor / 2) / try_divisor;
        let diff = estimate.abs_diff(baud);

        if i == 0 || diff < best_diff {
            best_divisor = try_divisor;
            best_baud = estimate;
            best_diff = diff;
            if diff == 0 {
                break;
            }
        }
    }

    let mut encoded = (best_divisor >> 3) | (FRAC_CODE[(best_divisor & 7) as usize] << 14);
    if encoded == 1 {
        encoded = 0; // 3 MBaud
    } else if encoded == 0x4001 {
        encoded = 1; // 2 MBaud (BM-series only)
    }

    let value = (encoded & 0xFFFF) as u16;
    let index = match device_type {
        FtdiDeviceType::Ft2232 | FtdiDeviceType::Ft4232h => {
            (((encoded >> 8) & 0xFF00) as u16) | control_index
        }
        FtdiDeviceType::Other => ((encoded >> 16) & 0xFFFF) as u16,
    };

    FtdiBaud {
        best_baud,
        index,
        value,
    }
}

/// Strip the two modem-status bytes FTDI prepends to every USB packet,
/// compacting the payload bytes leftward in place. Returns the payload
/// length.
fn strip_modem_status(identity: &DeviceIdentity, data: &mut [u8]) -> usize {
    let max_packet_size = identity.max_packet_size as usize;
    if max_packet_size == 0 {
        return data.len();
    }

    let mut skip = FTDI_MODEM_STATUS_BYTES_COUNT;
    let mut i = FTDI_MODEM_STATUS_BYTES_COUNT;
    while i < data.len() {
        if i % max_packet_size == 0 {
            skip += FTDI_MODEM_STATUS_BYTES_COUNT;
            i += 1;
        } else {
            data[i - skip] = data[i];
        }
        i += 1;
    }

    data.len().saturating_sub(skip)
}

fn reset_ctrl(port: &SerialPort, sio: u16, control_index: u16) -> Result<()> {
    port.transport().control_out(
        FTDI_DEVICE_OUT_REQTYPE,
        FTDI_SIO_REQUEST_RESET,
        sio,
        control_index,
        &[],
        DEFAULT_CONTROL_TIMEOUT,
    )?;
    Ok(())
}

fn state(port: &SerialPort) -> Result<&FtdiState> {
    match port.driver_state() {
        Some(DriverState::Ftdi(state)) => Ok(state),
        _ => Err(UsbSerialError::IllegalState),
    }
}

pub(crate) struct FtdiDriver;

impl SerialDriver for FtdiDriver {
    fn supports_vid_pid(&self, vendor_id: u16, product_id: u16) -> bool {
        vendor_id == FTDI_VENDOR_ID
            && matches!(
                product_id,
                FTDI_PRODUCT_ID_FT232R
                    | FTDI_PRODUCT_ID_FT2232
                    | FTDI_PRODUCT_ID_FT4232H
                    | FTDI_PRODUCT_ID_FT231X
            )
    }

    fn short_name(&self, identity: &DeviceIdentity) -> &'static str {
        match identity.product_id {
            FTDI_PRODUCT_ID_FT232R => "FT232R",
            FTDI_PRODUCT_ID_FT2232 => "FT2232",
            FTDI_PRODUCT_ID_FT4232H => "FT4232H",
            FTDI_PRODUCT_ID_FT231X => "FT231X",
            _ => "FTDI",
        }
    }

    fn ports_count(&self, _vendor_id: u16, product_id: u16) -> u8 {
        match product_id {
            FTDI_PRODUCT_ID_FT232R | FTDI_PRODUCT_ID_FT231X => 1,
            FTDI_PRODUCT_ID_FT2232 => 2,
            FTDI_PRODUCT_ID_FT4232H => 4,
            _ => 0,
        }
    }

    fn port_init(&self, port: &mut SerialPort) -> Result<()> {
        let port_index = port.port_index();
        let (device_type, control_index) = match port.device_identity().product_id {
            FTDI_PRODUCT_ID_FT2232 => (FtdiDeviceType::Ft2232, u16::from(port_index) + 1),
            FTDI_PRODUCT_ID_FT4232H => (FtdiDeviceType::Ft4232h, u16::from(port_index) + 1),
            _ => {
                if port_index != 0 {
                    return Err(UsbSerialError::InvalidPortIndex { index: port_index });
                }
                (FtdiDeviceType::Other, 0)
            }
        };

        port.transport().claim_interface(port_index)?;

        if let Err(err) = reset_ctrl(port, FTDI_SIO_RESET, control_index) {
            let _ = port.transport().release_interface(port_index);
            return Err(err);
        }

        port.set_driver_state(DriverState::Ftdi(FtdiState {
            device_type,
            control_index,
        }));
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
        let state = state(port)?;

        if config.baud == 0 {
            return Err(UsbSerialError::InvalidParameter);
        }

        let converted = convert_baud_rate(config.baud, state.device_type, state.control_index);
        if config.baud != converted.best_baud {
            return Err(UsbSerialError::UnsupportedBaudRate { baud: config.baud });
        }

        let mut line_value = u16::from(config.data_bits.bits());
        line_value |= match config.stop_bits {
            StopBits::One => FTDI_STOP_BITS_1,
            StopBits::OnePointFive => FTDI_STOP_BITS_1_5,
            StopBits::Two => FTDI_STOP_BITS_2,
        };
        line_value |= match config.parity {
            Parity::None => FTDI_PARITY_NONE,
            Parity::Odd => FTDI_PARITY_ODD,
            Parity::Even => FTDI_PARITY_EVEN,
            Parity::Mark => FTDI_PARITY_MARK,
            Parity::Space => FTDI_PARITY_SPACE,
        };

        port.transport().control_out(
            FTDI_DEVICE_OUT_REQTYPE,
            FTDI_SIO_REQUEST_SET_BAUD_RATE,
            converted.value,
            converted.index,
            &[],
            DEFAULT_CONTROL_TIMEOUT,
        )?;

        port.transport().control_out(
            FTDI_DEVICE_OUT_REQTYPE,
            FTDI_SIO_REQUEST_SET_LINE_CONFIG,
            line_value,
            state.control_index,
            &[],
            DEFAULT_CONTROL_TIMEOUT,
        )?;

        Ok(())
    }

    fn start_reader(&self, port: &mut SerialPort) -> Result<()> {
        state(port)?;
        let endpoint = read_endpoint(port.port_index());
        bridge::start_reader(port, endpoint, self.read_postprocessor())
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
        let state = state(port)?;

        let rx_ret = if rx {
            reset_ctrl(port, FTDI_SIO_RESET_PURGE_RX, state.control_index)
        } else {
            Ok(())
        };
        let tx_ret = if tx {
            reset_ctrl(port, FTDI_SIO_RESET_PURGE_TX, state.control_index)
        } else {
            Ok(())
        };

        rx_ret.and(tx_ret)
    }

    fn read_postprocessor(&self) -> Option<ReadPostprocessor> {
        Some(strip_modem_status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(max_packet_size: u8) -> DeviceIdentity {
        DeviceIdentity {
            vendor_id: FTDI_VENDOR_ID,
            product_id: FTDI_PRODUCT_ID_FT232R,
            device_class: 0,
            device_subclass: 0,
            max_packet_size,
        }
    }

    #[test]
    fn test_3mbaud_special_case() {
        let baud = convert_baud_rate(3_000_000, FtdiDeviceType::Other, 0);
        assert_eq!(baud.best_baud, 3_000_000);
        assert_eq!(baud.value, 0);
        assert_eq!(baud.index, 0);
    }

    #[test]
    fn test_1500000_is_exact() {
        let baud = convert_baud_rate(1_500_000, FtdiDeviceType::Other, 0);
        assert_eq!(baud.best_baud, 1_500_000);
        // divisor 16, no fractional bits
        assert_eq!(baud.value, 2);
        assert_eq!(baud.index, 0);
    }

    #[test]
    fn test_9600_is_exact() {
        let baud = convert_baud_rate(9600, FtdiDeviceType::Other, 0);
        assert_eq!(baud.best_baud, 9600);
    }

    #[test]
    fn test_unreachable_rate_is_not_reported_exact() {
        // 24 MHz / 115200 is not an integer number of eighths
        let baud = convert_baud_rate(115_200, FtdiDeviceType::Other, 0);
        assert_ne!(baud.best_baud, 115_200);
    }

    #[test]
    fn test_multiport_index_carries_control_index() {
        let baud = convert_baud_rate(9600, FtdiDeviceType::Ft2232, 2);
        assert_eq!(baud.best_baud, 9600);
        assert_eq!(baud.index & 0x00FF, 2);
    }

    #[test]
    fn test_strip_modem_status_two_packets() {
        let max_packet_size = 64usize;
        let mut data = Vec::new();
        for packet in 0..2u8 {
            data.extend_from_slice(&[0x01, 0x60]);
            for i in 0..(max_packet_size - 2) {
                data.push(packet.wrapping_mul(100).wrapping_add(i as u8));
            }
        }
        assert_eq!(data.len(), 2 * max_packet_size);

        let mut expected = Vec::new();
        for packet in 0..2u8 {
            for i in 0..(max_packet_size - 2) {
                expected.push(packet.wrapping_mul(100).wrapping_add(i as u8));
            }
        }

        let count = strip_modem_status(&identity(max_packet_size as u8), &mut data);
        assert_eq!(count, 2 * (max_packet_size - 2));
        assert_eq!(&data[..count], &expected[..]);
    }

    #[test]
    fn test_strip_modem_status_single_short_packet() {
        let mut data = vec![0x01, 0x60, 0xAA, 0xBB, 0xCC];
        let count = strip_modem_status(&identity(64), &mut data);
        assert_eq!(count, 3);
        assert_eq!(&data[..count], &[0xAA, 0xBB, 0xCC]);
    }

    #[test]
    fn test_strip_modem_status_header_only() {
        let mut data = vec![0x01, 0x60];
        let count = strip_modem_status(&identity(64), &mut data);
        assert_eq!(count, 0);
    }

    #[test]
    fn test_strip_modem_status_undersized_buffer() {
        let mut data = vec![0x01];
        let count = strip_modem_status(&identity(64), &mut data);
        assert_eq!(count, 0);
    }

    #[test]
    fn test_endpoints_stride_by_two() {
        assert_eq!(read_endpoint(0), 0x81);
        assert_eq!(write_endpoint(0), 0x02);
        assert_eq!(read_endpoint(1), 0x83);
        assert_eq!(write_endpoint(1), 0x04);
    }
}
