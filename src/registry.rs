//! Driver registry and dispatch
//!
//! A fixed, ordered list of chipset drivers built at compile time and never
//! mutated. Resolution runs two passes over the list: vendor/product
//! predicates first (authoritative — some chipsets mis-report generic
//! class codes), class/subclass predicates second as the fallback for
//! generic-compliant devices. The first match in registration order wins.

use crate::driver::cdc::CdcDriver;
use crate::driver::ftdi::FtdiDriver;
use crate::driver::silabs::SilabsDriver;
use crate::driver::SerialDriver;
use crate::transport::DeviceIdentity;

static DRIVERS: [&dyn SerialDriver; 3] = [&FtdiDriver, &SilabsDriver, &CdcDriver];

pub(crate) fn resolve(
    vendor_id: u16,
    product_id: u16,
    device_class: u8,
    device_subclass: u8,
) -> Option<&'static dyn SerialDriver> {
    DRIVERS
        .iter()
        .copied()
        .find(|driver| driver.supports_vid_pid(vendor_id, product_id))
        .or_else(|| {
            DRIVERS
                .iter()
                .copied()
                .find(|driver| driver.supports_class(device_class, device_subclass))
        })
}

pub(crate) fn resolve_identity(identity: &DeviceIdentity) -> Option<&'static dyn SerialDriver> {
    resolve(
        identity.vendor_id,
        identity.product_id,
        identity.device_class,
        identity.device_subclass,
    )
}

/// Check whether a USB device is supported by one of the drivers
pub fn is_device_supported(
    vendor_id: u16,
    product_id: u16,
    device_class: u8,
    device_subclass: u8,
) -> bool {
    resolve(vendor_id, product_id, device_class, device_subclass).is_some()
}

/// Short device name for a supported device, `None` otherwise
pub fn device_short_name(
    vendor_id: u16,
    product_id: u16,
    device_class: u8,
    device_subclass: u8,
) -> Option<&'static str> {
    let driver = resolve(vendor_id, product_id, device_class, device_subclass)?;
    Some(driver.short_name(&DeviceIdentity {
        vendor_id,
        product_id,
        device_class,
        device_subclass,
        max_packet_size: 0,
    }))
}

/// Expected serial port count for a device; zero when the device is
/// unsupported
pub fn ports_count(
    vendor_id: u16,
    product_id: u16,
    device_class: u8,
    device_subclass: u8,
) -> u8 {
    match resolve(vendor_id, product_id, device_class, device_subclass) {
        Some(driver) => driver.ports_count(vendor_id, product_id),
        None => 0,
    }
}
