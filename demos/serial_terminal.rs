//! Serial terminal demo
//!
//! This demo shows basic usage of the usbserial library:
//! - Finding a supported USB-to-serial adapter
//! - Opening a port at a given baud rate
//! - Streaming received data to stdout
//! - Writing to the port

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use usbserial::{RusbTransport, SerialPort, UsbSerialError};

fn main() {
    // Initialize logging
    env_logger::init();

    if let Err(e) = run() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run() -> usbserial::Result<()> {
    // Find the first supported adapter
    let mut handle = None;
    for device in rusb::devices().map_err(UsbSerialError::from)?.iter() {
        let Ok(descriptor) = device.device_descriptor() else {
            continue;
        };
        if usbserial::is_device_supported(
            descriptor.vendor_id(),
            descriptor.product_id(),
            descriptor.class_code(),
            descriptor.sub_class_code(),
        ) {
            let name = usbserial::device_short_name(
                descriptor.vendor_id(),
                descriptor.product_id(),
                descriptor.class_code(),
                descriptor.sub_class_code(),
            )
            .unwrap_or("?");
            println!(
                "Found {} ({:04x}:{:04x})",
                name,
                descriptor.vendor_id(),
                descriptor.product_id()
            );
            handle = Some(device.open().map_err(UsbSerialError::from)?);
            break;
        }
    }

    let Some(handle) = handle else {
        println!("No supported USB-to-serial adapter found");
        return Ok(());
    };

    let transport = Arc::new(RusbTransport::new(handle)?);

    let mut port = SerialPort::open(
        transport,
        0,
        9600,
        Box::new(|data| {
            let mut stdout = std::io::stdout();
            let _ = stdout.write_all(data);
            let _ = stdout.flush();
        }),
        Some(Box::new(|status| {
            eprintln!("read error: {:?}", status);
        })),
    )?;
    println!("Opened {} port 0 at 9600 baud", port.short_name());

    port.write(b"hello\r\n")?;

    println!("Reading for 10 seconds (press Ctrl+C to abort)...");
    port.start_reader()?;
    std::thread::sleep(Duration::from_secs(10));
    port.stop_reader()?;

    port.close()
}
