//! Port lifecycle, dispatch and synchronous-path tests against the mock
//! transport.

mod common;

use std::sync::Arc;

use common::{
    cdc_identity, cdc_interfaces, ftdi_identity, silabs_identity, unsupported_identity,
    MockTransport,
};
use usbserial::{SerialPort, UsbSerialError};

fn open_port(transport: Arc<MockTransport>, baud: u32) -> usbserial::Result<SerialPort> {
    SerialPort::open(transport, 0, baud, Box::new(|_| {}), None)
}

#[test]
fn open_unsupported_device_fails_without_side_effects() {
    let transport = MockTransport::new(unsupported_identity());
    let result = open_port(Arc::clone(&transport), 9600);
    assert!(matches!(result, Err(UsbSerialError::UnsupportedDevice)));
    assert!(transport.claimed().is_empty());
    assert!(transport.control_calls().is_empty());
}

#[test]
fn open_ftdi_claims_resets_and_configures() {
    let transport = MockTransport::new(ftdi_identity());
    let port = open_port(Arc::clone(&transport), 9600).unwrap();
    assert_eq!(port.short_name(), "FT232R");

    assert_eq!(transport.claimed(), vec![0]);

    let calls = transport.control_calls();
    assert_eq!(calls.len(), 3);
    // SIO reset, then baud rate, then line config
    assert_eq!(calls[0].request, 0);
    assert_eq!(calls[1].request, 3);
    assert_eq!(calls[2].request, 4);
    // 9600 baud: divisor 2500 = 312 + 4/8, fractional code 1
    assert_eq!(calls[1].value, 0x4138);
    assert_eq!(calls[1].index, 0);
    // 8 data bits, no parity, 1 stop bit
    assert_eq!(calls[2].value, 0x0008);

    port.close().unwrap();
    assert_eq!(transport.released(), vec![0]);
}

#[test]
fn open_silabs_runs_init_sequence() {
    let transport = MockTransport::new(silabs_identity());
    let port = open_port(Arc::clone(&transport), 115_200).unwrap();
    assert_eq!(port.short_name(), "CP2102");

    let calls = transport.control_calls();
    assert_eq!(calls.len(), 4);
    // UART enable, modem handshake, default baud divisor, line config
    assert_eq!((calls[0].request, calls[0].value), (0x00, 0x0001));
    assert_eq!((calls[1].request, calls[1].value), (0x07, 0x0303));
    assert_eq!((calls[2].request, calls[2].value), (0x01, 384));
    assert_eq!(calls[3].request, 0x1e);
    assert_eq!(&calls[3].data[..4], &115_200u32.to_le_bytes());

    port.close().unwrap();
}

#[test]
fn open_cdc_discovers_endpoints_and_claims_both_interfaces() {
    let transport = MockTransport::new(cdc_identity());
    transport.set_interfaces(cdc_interfaces());

    let port = open_port(Arc::clone(&transport), 9600).unwrap();
    assert_eq!(port.short_name(), "CDC");
    assert_eq!(transport.claimed(), vec![0, 1]);

    let calls = transport.control_calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].request_type, 0x21);
    assert_eq!(calls[0].request, 0x20);
    assert_eq!(calls[0].data.len(), 7);

    port.close().unwrap();
    assert_eq!(transport.released(), vec![0, 1]);
}

#[test]
fn open_cdc_without_bulk_endpoints_is_unsupported() {
    let transport = MockTransport::new(cdc_identity());
    let result = open_port(Arc::clone(&transport), 9600);
    assert!(matches!(result, Err(UsbSerialError::UnsupportedDevice)));
    assert!(transport.claimed().is_empty());
}

#[test]
fn failed_init_releases_the_claimed_interface() {
    let transport = MockTransport::new(ftdi_identity());
    transport.fail_control_at(1); // the SIO reset
    let result = open_port(Arc::clone(&transport), 9600);
    assert!(result.is_err());
    assert_eq!(transport.claimed(), transport.released());
}

#[test]
fn failed_line_config_releases_the_claimed_interface() {
    let transport = MockTransport::new(ftdi_identity());
    transport.fail_control_at(2); // the baud-rate command
    let result = open_port(Arc::clone(&transport), 9600);
    assert!(result.is_err());
    assert_eq!(transport.claimed(), vec![0]);
    assert_eq!(transport.released(), vec![0]);
}

#[test]
fn unreachable_baud_rate_is_rejected_exactly() {
    // 115200 is not an integer number of clock eighths on FTDI parts
    let transport = MockTransport::new(ftdi_identity());
    let result = open_port(Arc::clone(&transport), 115_200);
    assert!(matches!(
        result,
        Err(UsbSerialError::UnsupportedBaudRate { baud: 115_200 })
    ));
    // only the reset went out, and the claim was undone
    assert_eq!(transport.control_calls().len(), 1);
    assert_eq!(transport.claimed(), transport.released());
}

#[test]
fn write_is_chunked_until_complete() {
    let transport = MockTransport::new(ftdi_identity());
    transport.set_write_chunk(4);
    let port = open_port(Arc::clone(&transport), 9600).unwrap();

    port.write(&[0u8; 10]).unwrap();

    let calls = transport.bulk_calls();
    assert_eq!(calls.len(), 3);
    assert_eq!(calls.iter().map(|c| c.len).sum::<usize>(), 10);
    assert!(calls.iter().all(|c| c.endpoint == 0x02));
}

#[test]
fn zero_length_write_issues_no_transfer() {
    let transport = MockTransport::new(ftdi_identity());
    let port = open_port(Arc::clone(&transport), 9600).unwrap();

    port.write(&[]).unwrap();
    assert!(transport.bulk_calls().is_empty());
}

#[test]
fn purge_requires_a_direction() {
    let transport = MockTransport::new(ftdi_identity());
    let port = open_port(Arc::clone(&transport), 9600).unwrap();
    assert!(matches!(
        port.purge(false, false),
        Err(UsbSerialError::InvalidParameter)
    ));
}

#[test]
fn ftdi_purge_issues_reset_commands() {
    let transport = MockTransport::new(ftdi_identity());
    let port = open_port(Arc::clone(&transport), 9600).unwrap();
    let before = transport.control_calls().len();

    port.purge(true, true).unwrap();

    let calls = transport.control_calls();
    assert_eq!(calls.len(), before + 2);
    assert_eq!((calls[before].request, calls[before].value), (0, 1));
    assert_eq!((calls[before + 1].request, calls[before + 1].value), (0, 2));
}

#[test]
fn silabs_purge_combines_flush_values() {
    let transport = MockTransport::new(silabs_identity());
    let port = open_port(Arc::clone(&transport), 9600).unwrap();
    let before = transport.control_calls().len();

    port.purge(true, true).unwrap();

    let calls = transport.control_calls();
    assert_eq!((calls[before].request, calls[before].value), (0x12, 0x0f));
}

#[test]
fn cdc_purge_is_unsupported_off_prolific_hardware() {
    let transport = MockTransport::new(cdc_identity());
    transport.set_interfaces(cdc_interfaces());
    let port = open_port(Arc::clone(&transport), 9600).unwrap();
    assert!(matches!(
        port.purge(true, false),
        Err(UsbSerialError::UnsupportedOperation)
    ));
}

#[test]
fn multi_port_device_uses_strided_endpoints() {
    let mut identity = ftdi_identity();
    identity.product_id = 0x6010; // FT2232
    let transport = MockTransport::new(identity);
    let t: Arc<dyn usbserial::UsbTransport> = transport.clone();
    let port = SerialPort::open(t, 1, 9600, Box::new(|_| {}), None).unwrap();
    assert_eq!(port.short_name(), "FT2232");
    assert_eq!(transport.claimed(), vec![1]);

    // control index (port 1 -> 2) rides in the request index words
    let calls = transport.control_calls();
    assert_eq!(calls[0].index, 2);
    assert_eq!(calls[1].index & 0x00ff, 2);

    port.write(&[1, 2, 3]).unwrap();
    assert_eq!(transport.bulk_calls()[0].endpoint, 0x04);
}

#[test]
fn single_port_ftdi_rejects_nonzero_index() {
    let transport = MockTransport::new(ftdi_identity());
    let t: Arc<dyn usbserial::UsbTransport> = transport.clone();
    let result = SerialPort::open(t, 1, 9600, Box::new(|_| {}), None);
    assert!(matches!(
        result,
        Err(UsbSerialError::InvalidPortIndex { index: 1 })
    ));
    assert!(transport.claimed().is_empty());
}

#[test]
fn registry_queries_work_without_a_device() {
    assert!(usbserial::is_device_supported(0x0403, 0x6001, 0, 0));
    assert_eq!(
        usbserial::device_short_name(0x10c4, 0xea70, 0, 0),
        Some("CP2105")
    );
    assert_eq!(usbserial::ports_count(0x0403, 0x6011, 0, 0), 4);
    assert!(!usbserial::is_device_supported(0x1234, 0x5678, 0xff, 0));
}
