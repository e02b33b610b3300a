//! Device identity.
//!
//! Turns the kernel's hardware identifier (`uname` machine field, e.g.
//! `iPhone14,5`) into a marketing name for reports. Simulators report the
//! host architecture instead, so for those the simulated model is read from
//! `SIMULATOR_MODEL_IDENTIFIER`. Nothing here feeds detection.

use std::fmt;
use std::io;

/// Returned when an identifier is not in the table.
pub const UNKNOWN_DEVICE: &str = "Unknown Device";

/// Returned when a simulator names a model that is not in the table.
pub const UNKNOWN_SIMULATOR_DEVICE: &str = "Unknown Simulator Device";

/// Environment variable a simulator sets to the model it emulates.
pub const SIMULATOR_MODEL_VAR: &str = "SIMULATOR_MODEL_IDENTIFIER";

/// Identifiers reported when running on a simulator.
const SIMULATOR_IDENTIFIERS: [&str; 2] = ["x86_64", "arm64"];

static DEVICE_MODELS: &[(&str, &str)] = &[
    // iPhone
    ("iPhone1,1", "iPhone"),
    ("iPhone1,2", "iPhone 3G"),
    ("iPhone2,1", "iPhone 3GS"),
    ("iPhone3,1", "iPhone 4"),
    ("iPhone3,2", "iPhone 4"),
    ("iPhone3,3", "iPhone 4"),
    ("iPhone4,1", "iPhone 4s"),
    ("iPhone5,1", "iPhone 5 (GSM)"),
    ("iPhone5,2", "iPhone 5 (CDMA)"),
    ("iPhone5,3", "iPhone 5c (GSM)"),
    ("iPhone5,4", "iPhone 5c (Global)"),
    ("iPhone6,1", "iPhone 5s (GSM)"),
    ("iPhone6,2", "iPhone 5s (Global)"),
    ("iPhone7,1", "iPhone 6 Plus"),
    ("iPhone7,2", "iPhone 6"),
    ("iPhone8,1", "iPhone 6s"),
    ("iPhone8,2", "iPhone 6s Plus"),
    ("iPhone8,4", "iPhone SE (1st gen)"),
    ("iPhone9,1", "iPhone 7 (CDMA)"),
    ("iPhone9,3", "iPhone 7 (GSM)"),
    ("iPhone9,2", "iPhone 7 Plus (CDMA)"),
    ("iPhone9,4", "iPhone 7 Plus (GSM)"),
    ("iPhone10,1", "iPhone 8 (CDMA)"),
    ("iPhone10,4", "iPhone 8 (GSM)"),
    ("iPhone10,2", "iPhone 8 Plus (CDMA)"),
    ("iPhone10,5", "iPhone 8 Plus (GSM)"),
    ("iPhone10,3", "iPhone X (CDMA)"),
    ("iPhone10,6", "iPhone X (GSM)"),
    ("iPhone11,2", "iPhone XS"),
    ("iPhone11,4", "iPhone XS Max"),
    ("iPhone11,6", "iPhone XS Max (China)"),
    ("iPhone11,8", "iPhone XR"),
    ("iPhone12,1", "iPhone 11"),
    ("iPhone12,3", "iPhone 11 Pro"),
    ("iPhone12,5", "iPhone 11 Pro Max"),
    ("iPhone12,8", "iPhone SE (2nd gen)"),
    ("iPhone13,1", "iPhone 12 mini"),
    ("iPhone13,2", "iPhone 12"),
    ("iPhone13,3", "iPhone 12 Pro"),
    ("iPhone13,4", "iPhone 12 Pro Max"),
    ("iPhone14,2", "iPhone 13 Pro"),
    ("iPhone14,3", "iPhone 13 Pro Max"),
    ("iPhone14,4", "iPhone 13 mini"),
    ("iPhone14,5", "iPhone 13"),
    ("iPhone14,6", "iPhone SE (3rd gen)"),
    ("iPhone14,7", "iPhone 14"),
    ("iPhone14,8", "iPhone 14 Plus"),
    ("iPhone15,2", "iPhone 14 Pro"),
    ("iPhone15,3", "iPhone 14 Pro Max"),
    ("iPhone15,4", "iPhone 15"),
    ("iPhone15,5", "iPhone 15 Plus"),
    ("iPhone16,1", "iPhone 15 Pro"),
    ("iPhone16,2", "iPhone 15 Pro Max"),
    // iPad
    ("iPad1,1", "iPad (1st gen)"),
    ("iPad2,1", "iPad 2 (Wi-Fi)"),
    ("iPad2,2", "iPad 2 (GSM)"),
    ("iPad2,3", "iPad 2 (CDMA)"),
    ("iPad2,4", "iPad 2 (Mid 2012)"),
    ("iPad3,1", "iPad (3rd gen)"),
    ("iPad3,2", "iPad (3rd gen)"),
    ("iPad3,3", "iPad (3rd gen)"),
    ("iPad3,4", "iPad (4th gen)"),
    ("iPad3,5", "iPad (4th gen)"),
    ("iPad3,6", "iPad (4th gen)"),
    ("iPad4,1", "iPad Air (Wi-Fi)"),
    ("iPad4,2", "iPad Air (Cellular)"),
    ("iPad4,3", "iPad Air (China)"),
    ("iPad5,3", "iPad Air 2 (Wi-Fi)"),
    ("iPad5,4", "iPad Air 2 (Cellular)"),
    ("iPad6,11", "iPad (5th gen)"),
    ("iPad6,12", "iPad (5th gen)"),
    ("iPad7,5", "iPad (6th gen)"),
    ("iPad7,6", "iPad (6th gen)"),
    ("iPad7,11", "iPad (7th gen)"),
    ("iPad7,12", "iPad (7th gen)"),
    ("iPad11,6", "iPad (8th gen)"),
    ("iPad11,7", "iPad (8th gen)"),
    ("iPad12,1", "iPad (9th gen)"),
    ("iPad12,2", "iPad (9th gen)"),
    ("iPad13,18", "iPad Air (5th gen)"),
    ("iPad13,19", "iPad Air (5th gen)"),
    ("iPad14,1", "iPad mini (6th gen)"),
    ("iPad14,2", "iPad mini (6th gen)"),
    ("iPad13,1", "iPad Pro 11\" (3rd gen)"),
    ("iPad13,2", "iPad Pro 11\" (3rd gen)"),
    ("iPad13,4", "iPad Pro 12.9\" (5th gen)"),
    ("iPad13,5", "iPad Pro 12.9\" (5th gen)"),
    // iPod touch
    ("iPod1,1", "iPod touch (1st gen)"),
    ("iPod2,1", "iPod touch (2nd gen)"),
    ("iPod3,1", "iPod touch (3rd gen)"),
    ("iPod4,1", "iPod touch (4th gen)"),
    ("iPod5,1", "iPod touch (5th gen)"),
    ("iPod7,1", "iPod touch (6th gen)"),
    ("iPod9,1", "iPod touch (7th gen)"),
    // Simulator
    ("x86_64", "Simulator"),
    ("arm64", "Simulator"),
];

fn lookup(identifier: &str) -> Option<&'static str> {
    DEVICE_MODELS
        .iter()
        .find(|(id, _)| *id == identifier)
        .map(|(_, name)| *name)
}

/// Display name of the hardware model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity(String);

impl DeviceIdentity {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_known(&self) -> bool {
        self.0 != UNKNOWN_DEVICE && self.0 != UNKNOWN_SIMULATOR_DEVICE
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Resolve a hardware identifier, consulting `simulator_model` when the
/// identifier is a simulator architecture.
pub fn resolve_identity(identifier: &str, simulator_model: Option<&str>) -> DeviceIdentity {
    if SIMULATOR_IDENTIFIERS.contains(&identifier) {
        if let Some(model) = simulator_model {
            return DeviceIdentity(lookup(model).unwrap_or(UNKNOWN_SIMULATOR_DEVICE).to_string());
        }
    }
    DeviceIdentity(lookup(identifier).unwrap_or(UNKNOWN_DEVICE).to_string())
}

/// Decode a fixed-size, NUL-terminated ASCII field. Stops at the first NUL
/// or at the end of the buffer; non-ASCII bytes are dropped.
pub fn decode_identifier(raw: &[libc::c_char]) -> String {
    raw.iter()
        .map(|&c| c as u8)
        .take_while(|&b| b != 0)
        .filter(u8::is_ascii)
        .map(char::from)
        .collect()
}

/// Hardware identifier of the running machine.
pub fn machine_identifier() -> io::Result<String> {
    // SAFETY: utsname is plain old data; uname fills it or fails.
    let mut info: libc::utsname = unsafe { std::mem::zeroed() };
    if unsafe { libc::uname(&mut info) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(decode_identifier(&info.machine))
}

/// Resolves the current hardware identity.
pub trait DeviceIdentityProvider {
    fn current(&self) -> DeviceIdentity;
}

/// Reads `uname` and the simulator environment variable.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemDevice;

impl DeviceIdentityProvider for SystemDevice {
    fn current(&self) -> DeviceIdentity {
        match machine_identifier() {
            Ok(identifier) => {
                let simulated = std::env::var(SIMULATOR_MODEL_VAR).ok();
                resolve_identity(&identifier, simulated.as_deref())
            }
            Err(err) => {
                tracing::warn!(error = %err, "uname failed");
                DeviceIdentity(UNKNOWN_DEVICE.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_identifier() {
        assert_eq!(resolve_identity("iPhone14,5", None).as_str(), "iPhone 13");
        assert_eq!(resolve_identity("iPad13,4", None).as_str(), "iPad Pro 12.9\" (5th gen)");
    }

    #[test]
    fn test_unknown_identifier() {
        let identity = resolve_identity("iPhone99,9", None);
        assert_eq!(identity.as_str(), UNKNOWN_DEVICE);
        assert!(!identity.is_known());
    }

    #[test]
    fn test_simulator_uses_environment_model() {
        assert_eq!(resolve_identity("arm64", Some("iPhone14,5")).as_str(), "iPhone 13");
        assert_eq!(resolve_identity("x86_64", Some("iPhone16,2")).as_str(), "iPhone 15 Pro Max");
        assert_eq!(resolve_identity("arm64", Some("iPhone99,9")).as_str(), UNKNOWN_SIMULATOR_DEVICE);
        assert_eq!(resolve_identity("arm64", None).as_str(), "Simulator");
    }

    #[test]
    fn test_simulator_model_ignored_on_hardware() {
        assert_eq!(resolve_identity("iPhone12,1", Some("iPhone14,5")).as_str(), "iPhone 11");
    }

    #[test]
    fn test_decode_identifier_stops_at_nul() {
        let mut raw = [0 as libc::c_char; 16];
        for (slot, byte) in raw.iter_mut().zip(b"iPhone14,5\0junk") {
            *slot = *byte as libc::c_char;
        }
        assert_eq!(decode_identifier(&raw), "iPhone14,5");

        let full = [b'a' as libc::c_char; 4];
        assert_eq!(decode_identifier(&full), "aaaa");
    }

    #[test]
    fn test_machine_identifier_is_readable() {
        let identifier = machine_identifier().unwrap();
        assert!(!identifier.is_empty());
        assert!(!SystemDevice.current().as_str().is_empty());
    }
}
