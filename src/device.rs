//! Typed façade over [`Session`] (spec §2's "thin adapter", supplemented
//! with the concrete method names and settings entries the original SDK's
//! `DeviceBase`/`Device` split exposes).

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::time::Duration;

use serde_json::{json, Value};

use crate::error::{SessionError, SessionResult};
use crate::location::Location;
use crate::session::Session;

/// Thin wrapper pairing a [`Location`] with the [`Session`] connected to
/// it, matching `DeviceBase`.
pub struct DeviceBase {
    location: Location,
    session: Session,
}

impl DeviceBase {
    pub fn new(location: Location) -> Self {
        Self {
            location,
            session: Session::new(),
        }
    }

    pub fn location(&self) -> Location {
        self.location
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.session.set_timeout(timeout);
    }

    pub fn open(&mut self) -> SessionResult<()> {
        self.session.open(self.location)
    }

    pub fn is_opened(&self) -> bool {
        self.session.is_opened()
    }

    pub fn close(&mut self) {
        self.session.close();
    }

    /// `device/queryInfo` with `category: "status"`, read for `mode`.
    pub fn query_boot_mode(&self) -> SessionResult<String> {
        let info = self.query_info("status")?;
        info.get("mode")
            .cloned()
            .ok_or(SessionError::ProtocolError)
    }

    /// Fire-and-forget: the device resets before it could reply (spec §7).
    pub fn reboot(&self) {
        let mut request = Session::create_empty_request();
        request["method"] = json!(methods::DEVICE_REBOOT);
        let _ = self.session.execute_no_reply(request);
    }

    /// Fire-and-forget, same rationale as `reboot`.
    pub fn reboot_to_bootloader(&self) {
        let mut request = Session::create_empty_request();
        request["method"] = json!(methods::DEVICE_REBOOT_TO_BOOTLOADER);
        let _ = self.session.execute_no_reply(request);
    }

    pub fn enter_low_power(&self) -> SessionResult<()> {
        let mut request = Session::create_empty_request();
        request["method"] = json!(methods::DEVICE_ENTER_LOW_POWER);
        self.session.execute(request).map(|_| ())
    }

    pub fn exit_low_power(&self) -> SessionResult<()> {
        let mut request = Session::create_empty_request();
        request["method"] = json!(methods::DEVICE_EXIT_LOW_POWER);
        self.session.execute(request).map(|_| ())
    }

    pub fn read_timestamp(&self) -> SessionResult<u32> {
        let mut request = Session::create_empty_request();
        request["method"] = json!(methods::DEVICE_READ_TIMESTAMP);
        let result = self.session.execute(request)?;
        result
            .as_u64()
            .map(|v| v as u32)
            .ok_or(SessionError::ProtocolError)
    }

    pub fn reset_timestamp(&self) -> SessionResult<()> {
        let mut request = Session::create_empty_request();
        request["method"] = json!(methods::DEVICE_RESET_TIMESTAMP);
        self.session.execute(request).map(|_| ())
    }

    fn query_info(&self, category: &str) -> SessionResult<HashMap<String, String>> {
        let mut request = Session::create_empty_request();
        request["method"] = json!(methods::DEVICE_QUERY_INFO);
        request["params"] = json!({ "category": category });
        let result = self.session.execute(request)?;
        let map = result
            .as_object()
            .ok_or(SessionError::ProtocolError)?
            .iter()
            .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
            .collect();
        Ok(map)
    }

    pub(crate) fn session(&self) -> &Session {
        &self.session
    }
}

/// JSON-RPC method names used by the façade (spec §6).
pub mod methods {
    pub const DEVICE_QUERY_INFO: &str = "device/queryInfo";
    pub const DEVICE_ENTER_LOW_POWER: &str = "device/enterLowPower";
    pub const DEVICE_EXIT_LOW_POWER: &str = "device/exitLowPower";
    pub const DEVICE_READ_TIMESTAMP: &str = "device/readTimestamp";
    pub const DEVICE_RESET_TIMESTAMP: &str = "device/resetTimestamp";
    pub const DEVICE_REBOOT: &str = "device/reboot";
    pub const DEVICE_REBOOT_TO_BOOTLOADER: &str = "device/rebootToBootloader";
    pub const SETTINGS_READ: &str = "settings/read";
    pub const SETTINGS_WRITE: &str = "settings/write";
    pub const SETTINGS_PERSIST: &str = "settings/persist";
    pub const SCAN_START_MEASUREMENT: &str = "scan/startMeasurement";
    pub const SCAN_STOP_MEASUREMENT: &str = "scan/stopMeasurement";
    pub const SCAN_START_STREAMING: &str = "scan/startStreaming";
    pub const SCAN_STOP_STREAMING: &str = "scan/stopStreaming";
    /// Firmware-update orchestration is an external collaborator (Non-goal);
    /// only the method names it would call through are named here.
    pub const FIRMWARE_BEGIN_UPDATE: &str = "firmware/beginUpdate";
    pub const FIRMWARE_WRITE_DATA: &str = "firmware/writeData";
    pub const FIRMWARE_VERIFY_HASH: &str = "firmware/verifyHash";
    pub const FIRMWARE_END_UPDATE: &str = "firmware/endUpdate";
    pub const FIRMWARE_COMMIT_UPDATE: &str = "firmware/commitUpdate";
}

/// A rangefinder device: `DeviceBase` plus scan control, properties, and
/// settings (spec §2).
pub struct Device {
    base: DeviceBase,
}

impl Device {
    pub fn new(location: Location) -> Self {
        Self {
            base: DeviceBase::new(location),
        }
    }

    pub fn location(&self) -> Location {
        self.base.location()
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.base.set_timeout(timeout);
    }

    pub fn open(&mut self) -> SessionResult<()> {
        self.base.open()
    }

    pub fn is_opened(&self) -> bool {
        self.base.is_opened()
    }

    pub fn close(&mut self) {
        self.base.close();
    }

    pub fn reboot(&self) {
        self.base.reboot();
    }

    pub fn properties(&self) -> Properties<'_> {
        Properties { base: &self.base }
    }

    pub fn settings(&self) -> Settings<'_> {
        Settings { base: &self.base }
    }

    pub fn start_measurement(&self) -> SessionResult<()> {
        let mut request = Session::create_empty_request();
        request["method"] = json!(methods::SCAN_START_MEASUREMENT);
        self.base.session().execute(request).map(|_| ())
    }

    pub fn stop_measurement(&self) -> SessionResult<()> {
        let mut request = Session::create_empty_request();
        request["method"] = json!(methods::SCAN_STOP_MEASUREMENT);
        self.base.session().execute(request).map(|_| ())
    }

    pub fn start_streaming(&self) -> SessionResult<()> {
        let mut request = Session::create_empty_request();
        request["method"] = json!(methods::SCAN_START_STREAMING);
        self.base.session().execute(request).map(|_| ())
    }

    pub fn stop_streaming(&self) -> SessionResult<()> {
        let mut request = Session::create_empty_request();
        request["method"] = json!(methods::SCAN_STOP_STREAMING);
        self.base.session().execute(request).map(|_| ())
    }

    /// Opens the UDP data channel the reassembler reads scan packets from
    /// (spec §4.6/§4.7).
    pub fn open_data_channel(
        &self,
        device_address: Ipv4Addr,
        bind_port: u16,
        device_port: u16,
    ) -> SessionResult<()> {
        self.base
            .session()
            .open_data_channel(device_address, bind_port, device_port)
    }
}

/// Read-only device identity/version/status properties
/// (`Device::Properties` in the original).
pub struct Properties<'a> {
    base: &'a DeviceBase,
}

impl Properties<'_> {
    pub const IDENTITY_MODEL_NAME: &'static str = "identity.modelName";
    pub const IDENTITY_SERIAL_NUMBER: &'static str = "identity.serialNumber";
    pub const VERSION_FIRMWARE: &'static str = "version.firmware";

    /// `entry_name` is one of the `IDENTITY_*`/`VERSION_*` constants; the
    /// prefix before the first `.` selects the `device/queryInfo` category.
    pub fn get(&self, entry_name: &str) -> SessionResult<String> {
        let category = entry_name
            .split('.')
            .next()
            .ok_or(SessionError::InvalidParams)?;
        let info = self.base.query_info(category)?;
        let field = entry_name
            .split_once('.')
            .map(|(_, rest)| rest)
            .unwrap_or(entry_name);
        info.get(field).cloned().ok_or(SessionError::NotSupported)
    }
}

/// Read/write/persist device configuration (`Device::Settings` in the
/// original).
pub struct Settings<'a> {
    base: &'a DeviceBase,
}

impl Settings<'_> {
    pub const ENTRY_RANGEFINDER_ECHO_MODE: &'static str = "rangefinder.echoMode";
    pub const ENTRY_SCAN_RESOLUTION: &'static str = "scan.resolution";
    pub const ENTRY_SCAN_ANGULAR_FOV: &'static str = "scan.angularFov";
    pub const ENTRY_SCAN_FREQUENCY: &'static str = "scan.frequency";
    pub const ENTRY_FILTERS_SHADOW_FILTER_ENABLED: &'static str = "filters.shadowFilter.enabled";
    pub const ENTRY_FILTERS_SHADOW_FILTER_STRENGTH: &'static str = "filters.shadowFilter.strength";
    pub const ENTRY_CONNECTIVITY_ETHERNET_IPV4_ADDRESS: &'static str =
        "connectivity.ethernet.ipv4Address";
    pub const ENTRY_CONNECTIVITY_ETHERNET_IPV4_SUBNET: &'static str =
        "connectivity.ethernet.ipv4Subnet";
    pub const ENTRY_TRANSPORT_ETHERNET_DATA_CHANNEL_TARGET_ADDRESS: &'static str =
        "transport.ethernet.dataChannelTarget.address";
    pub const ENTRY_TRANSPORT_ETHERNET_DATA_CHANNEL_TARGET_PORT: &'static str =
        "transport.ethernet.dataChannelTarget.port";

    pub fn read(&self, entry_name: &str) -> SessionResult<Value> {
        let mut request = Session::create_empty_request();
        request["method"] = json!(methods::SETTINGS_READ);
        request["params"] = json!({ "entry": entry_name });
        self.base.session().execute(request)
    }

    pub fn write(&self, entry_name: &str, value: Value) -> SessionResult<()> {
        let mut request = Session::create_empty_request();
        request["method"] = json!(methods::SETTINGS_WRITE);
        request["params"] = json!({ "entry": entry_name, "value": value });
        self.base.session().execute(request).map(|_| ())
    }

    pub fn persist(&self, entry_name: &str) -> SessionResult<()> {
        let mut request = Session::create_empty_request();
        request["method"] = json!(methods::SETTINGS_PERSIST);
        request["params"] = json!({ "entry": entry_name });
        self.base.session().execute(request).map(|_| ())
    }

    /// Typed read of `ENTRY_RANGEFINDER_ECHO_MODE`.
    pub fn read_echo_mode(&self) -> SessionResult<EchoMode> {
        let value = self.read(Self::ENTRY_RANGEFINDER_ECHO_MODE)?;
        value
            .as_i64()
            .and_then(EchoMode::from_ordinal)
            .ok_or(SessionError::ProtocolError)
    }

    /// Typed write of `ENTRY_RANGEFINDER_ECHO_MODE`.
    pub fn write_echo_mode(&self, mode: EchoMode) -> SessionResult<()> {
        self.write(Self::ENTRY_RANGEFINDER_ECHO_MODE, json!(mode.ordinal()))
    }

    /// Typed read of `ENTRY_SCAN_RESOLUTION`.
    pub fn read_scan_resolution(&self) -> SessionResult<ScanResolution> {
        let value = self.read(Self::ENTRY_SCAN_RESOLUTION)?;
        value
            .as_i64()
            .and_then(ScanResolution::from_ordinal)
            .ok_or(SessionError::ProtocolError)
    }

    /// Typed write of `ENTRY_SCAN_RESOLUTION`.
    pub fn write_scan_resolution(&self, resolution: ScanResolution) -> SessionResult<()> {
        self.write(Self::ENTRY_SCAN_RESOLUTION, json!(resolution.ordinal()))
    }

    /// Typed read of `ENTRY_SCAN_ANGULAR_FOV`.
    pub fn read_angular_fov(&self) -> SessionResult<AngularFov> {
        let value = self.read(Self::ENTRY_SCAN_ANGULAR_FOV)?;
        value
            .as_i64()
            .and_then(AngularFov::from_ordinal)
            .ok_or(SessionError::ProtocolError)
    }

    /// Typed write of `ENTRY_SCAN_ANGULAR_FOV`.
    pub fn write_angular_fov(&self, fov: AngularFov) -> SessionResult<()> {
        self.write(Self::ENTRY_SCAN_ANGULAR_FOV, json!(fov.ordinal()))
    }
}

/// `Device::Settings::echo_mode_t`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EchoMode {
    SingleFirst,
    SingleStrongest,
    SingleLast,
    Dual,
}

impl EchoMode {
    fn ordinal(self) -> i64 {
        match self {
            EchoMode::SingleFirst => 0,
            EchoMode::SingleStrongest => 1,
            EchoMode::SingleLast => 2,
            EchoMode::Dual => 3,
        }
    }

    fn from_ordinal(value: i64) -> Option<Self> {
        match value {
            0 => Some(EchoMode::SingleFirst),
            1 => Some(EchoMode::SingleStrongest),
            2 => Some(EchoMode::SingleLast),
            3 => Some(EchoMode::Dual),
            _ => None,
        }
    }
}

/// `scan_resolution_t` (`data_types.h`); `Device::Settings` pairs this with
/// [`AngularFov`] to describe the sensor's angular sampling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanResolution {
    Res120k,
    Res90k,
    Res60k,
    Res30k,
    Res15k,
}

impl ScanResolution {
    fn ordinal(self) -> i64 {
        match self {
            ScanResolution::Res120k => 0,
            ScanResolution::Res90k => 1,
            ScanResolution::Res60k => 2,
            ScanResolution::Res30k => 3,
            ScanResolution::Res15k => 4,
        }
    }

    fn from_ordinal(value: i64) -> Option<Self> {
        match value {
            0 => Some(ScanResolution::Res120k),
            1 => Some(ScanResolution::Res90k),
            2 => Some(ScanResolution::Res60k),
            3 => Some(ScanResolution::Res30k),
            4 => Some(ScanResolution::Res15k),
            _ => None,
        }
    }
}

/// `angular_fov_t` (`data_types.h`): the sensor's angular field of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AngularFov {
    Fov270Deg,
    Fov360Deg,
}

impl AngularFov {
    fn ordinal(self) -> i64 {
        match self {
            AngularFov::Fov270Deg => 0,
            AngularFov::Fov360Deg => 1,
        }
    }

    fn from_ordinal(value: i64) -> Option<Self> {
        match value {
            0 => Some(AngularFov::Fov270Deg),
            1 => Some(AngularFov::Fov360Deg),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn device_not_opened_reports_closed() {
        let device = Device::new(Location::network(Ipv4Addr::new(10, 0, 0, 5), 6543));
        assert!(!device.is_opened());
    }

    #[test]
    fn settings_entry_constants_match_original_naming() {
        assert_eq!(Settings::ENTRY_SCAN_RESOLUTION, "scan.resolution");
        assert_eq!(Settings::ENTRY_SCAN_ANGULAR_FOV, "scan.angularFov");
        assert_eq!(
            Settings::ENTRY_TRANSPORT_ETHERNET_DATA_CHANNEL_TARGET_PORT,
            "transport.ethernet.dataChannelTarget.port"
        );
    }

    #[test]
    fn scan_resolution_ordinals_round_trip_including_120k() {
        for resolution in [
            ScanResolution::Res120k,
            ScanResolution::Res90k,
            ScanResolution::Res60k,
            ScanResolution::Res30k,
            ScanResolution::Res15k,
        ] {
            assert_eq!(ScanResolution::from_ordinal(resolution.ordinal()), Some(resolution));
        }
    }

    #[test]
    fn angular_fov_ordinals_round_trip() {
        assert_eq!(
            AngularFov::from_ordinal(AngularFov::Fov270Deg.ordinal()),
            Some(AngularFov::Fov270Deg)
        );
        assert_eq!(
            AngularFov::from_ordinal(AngularFov::Fov360Deg.ordinal()),
            Some(AngularFov::Fov360Deg)
        );
        assert_eq!(AngularFov::from_ordinal(2), None);
    }

    #[test]
    fn echo_mode_ordinals_round_trip() {
        for mode in [
            EchoMode::SingleFirst,
            EchoMode::SingleStrongest,
            EchoMode::SingleLast,
            EchoMode::Dual,
        ] {
            assert_eq!(EchoMode::from_ordinal(mode.ordinal()), Some(mode));
        }
    }
}
