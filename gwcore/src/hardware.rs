//! Hardware-type codes reported in detail acknowledgements.
//!
//! Static data only; the gateway knows many more codes than listed here and
//! unknown codes simply have no display name.

use crate::types::DeviceCategory;

/// Sorted by code for binary search.
static HARDWARE_TYPES: &[(u8, &str, DeviceCategory)] = &[
    (0x01, "Bus coupler", DeviceCategory::Module),
    (0x02, "IP gateway", DeviceCategory::Module),
    (0x03, "Power supply 640 mA", DeviceCategory::Module),
    (0x10, "Binary input 4-fold", DeviceCategory::Sensor),
    (0x11, "Binary input 8-fold", DeviceCategory::Sensor),
    (0x12, "Push button 2-fold", DeviceCategory::Sensor),
    (0x13, "Push button 4-fold", DeviceCategory::Sensor),
    (0x14, "Push button 6-fold with LCD", DeviceCategory::Sensor),
    (0x18, "Motion detector", DeviceCategory::Sensor),
    (0x19, "Presence detector", DeviceCategory::Sensor),
    (0x1A, "Weather station", DeviceCategory::Sensor),
    (0x1B, "Rain sensor", DeviceCategory::Sensor),
    (0x1C, "Brightness sensor", DeviceCategory::Sensor),
    (0x1D, "CO2 sensor", DeviceCategory::Sensor),
    (0x1E, "Water meter interface", DeviceCategory::Sensor),
    (0x1F, "DCF77 clock receiver", DeviceCategory::Sensor),
    (0x20, "Switch actuator 8-fold", DeviceCategory::Actor),
    (0x21, "Switch actuator 4-fold", DeviceCategory::Actor),
    (0x22, "Switch actuator 16-fold", DeviceCategory::Actor),
    (0x24, "Dimmer actuator 2-fold", DeviceCategory::Actor),
    (0x25, "Dimmer actuator 4-fold", DeviceCategory::Actor),
    (0x26, "DALI gateway", DeviceCategory::Actor),
    (0x28, "Audio player", DeviceCategory::Actor),
    (0x29, "LCD display", DeviceCategory::Actor),
    (0x2A, "GSM modem", DeviceCategory::Actor),
    (0x30, "Blind actuator 4-fold", DeviceCategory::Cover),
    (0x31, "Blind actuator 8-fold", DeviceCategory::Cover),
    (0x32, "Roller shutter actuator", DeviceCategory::Cover),
    (0x40, "Room thermostat", DeviceCategory::Climate),
    (0x41, "Heating actuator 6-fold", DeviceCategory::Climate),
    (0x42, "Temperature sensor 4-fold", DeviceCategory::Climate),
    (0x43, "Humidity and temperature sensor", DeviceCategory::Climate),
    (0x50, "Alarm central", DeviceCategory::Alarm),
    (0x51, "Smoke detector interface", DeviceCategory::Alarm),
    (0x52, "Glass break sensor", DeviceCategory::Alarm),
    (0x60, "RFID access reader", DeviceCategory::RfReader),
    (0x61, "RF receiver 868 MHz", DeviceCategory::RfReader),
    (0x62, "Key card switch", DeviceCategory::RfReader),
];

fn lookup(code: u8) -> Option<&'static (u8, &'static str, DeviceCategory)> {
    HARDWARE_TYPES
        .binary_search_by_key(&code, |(c, _, _)| *c)
        .ok()
        .map(|idx| &HARDWARE_TYPES[idx])
}

pub fn hardware_name(code: u8) -> Option<&'static str> {
    lookup(code).map(|(_, name, _)| *name)
}

pub fn hardware_category(code: u8) -> Option<DeviceCategory> {
    lookup(code).map(|(_, _, category)| *category)
}
