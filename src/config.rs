/// Runtime configuration for both capture pipelines.
///
/// [`ScanConfig`] is the host-facing configuration surface (JSON via
/// `serde_json_core`). [`SharedConfig`] is the subset the frame and GAP
/// callbacks read on every delivery: plain atomic scalars owned by the
/// lifecycle coordinator, written only from its context and read from
/// the driver-owned callback contexts.
use core::sync::atomic::{AtomicBool, AtomicI8, AtomicU16, Ordering};

use serde::{Deserialize, Serialize};

use crate::channel::{CHANNEL_MAP_ALL, CHANNEL_MAX};
use crate::filter::FilterSettings;

/// Default RSSI admission threshold in dBm. 0 disables the stage.
pub const DEFAULT_RSSI_THRESHOLD: i8 = -80;

/// Default WiFi channel rotation interval in 10 ms ticks (50 → 500 ms).
pub const DEFAULT_CHANNEL_SWITCH_INTERVAL: u16 = 50;

/// Default BLE scan cycle duration in seconds.
pub const DEFAULT_BLE_SCAN_TIME: u16 = 1;

/// Default BLE scan window in milliseconds.
pub const DEFAULT_BLE_SCAN_WINDOW: u16 = 80;

/// Default BLE scan interval in milliseconds.
pub const DEFAULT_BLE_SCAN_INTERVAL: u16 = 80;

/// Regulatory locale. Narrows the set of channels the rotation may tune.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CountryCode {
    /// ETSI plan, channels 1-13.
    Eu,
    /// FCC plan, channels 1-11.
    Us,
    /// TELEC plan, channels 1-14.
    Jp,
}

impl CountryCode {
    /// Bitmap of legal channels under this plan (bit 0 = channel 1).
    pub const fn channel_map(self) -> u16 {
        match self {
            CountryCode::Eu => (1 << 13) - 1,
            CountryCode::Us => (1 << 11) - 1,
            CountryCode::Jp => CHANNEL_MAP_ALL,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            CountryCode::Eu => "EU",
            CountryCode::Us => "US",
            CountryCode::Jp => "JP",
        }
    }
}

/// Capture configuration for one observation run.
///
/// Deserializable so a host/provisioning layer can push it as JSON;
/// every field falls back to the compiled-in default when absent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// BLE scan cycle duration handed to the driver, in seconds. The scan
    /// re-arms itself after each cycle, so this only bounds one cycle.
    pub ble_scan_time: u16,
    /// BLE scan window in milliseconds (listening time per interval).
    pub ble_scan_window: u16,
    /// BLE scan interval in milliseconds. Reserved: the effective interval
    /// is derived from `ble_scan_time` so one inquiry cycle spans the full
    /// scan duration (see `ScanParameters`).
    pub ble_scan_interval: u16,
    /// RSSI admission threshold in dBm; 0 disables the threshold stage.
    pub rssi_threshold: i8,
    /// WiFi channel bitmap, bit 0 = channel 1. An empty map is treated as
    /// all channels enabled.
    pub channel_map: u16,
    /// WiFi channel rotation period in 10 ms ticks; 0 disables rotation.
    pub wifi_channel_switch_interval: u16,
    /// Reject BLE advertisers with random / resolvable-random addresses
    /// (fixed-function beacons and peripherals, not carried devices).
    pub vendor_filter: bool,
    /// Tag advertisements carrying the exposure-notification service
    /// signature with a distinct origin.
    pub match_signature: bool,
    /// Regulatory locale for the WiFi channel plan.
    pub country: CountryCode,
}

impl ScanConfig {
    pub const fn new() -> Self {
        Self {
            ble_scan_time: DEFAULT_BLE_SCAN_TIME,
            ble_scan_window: DEFAULT_BLE_SCAN_WINDOW,
            ble_scan_interval: DEFAULT_BLE_SCAN_INTERVAL,
            rssi_threshold: DEFAULT_RSSI_THRESHOLD,
            channel_map: CHANNEL_MAP_ALL,
            wifi_channel_switch_interval: DEFAULT_CHANNEL_SWITCH_INTERVAL,
            vendor_filter: false,
            match_signature: false,
            country: CountryCode::Eu,
        }
    }

    /// Channel bitmap clamped to the legal plan for the configured locale.
    pub fn legal_channel_map(&self) -> u16 {
        self.channel_map & self.country.channel_map()
    }

    /// Parse a configuration document pushed by the host side. Absent
    /// fields keep their compiled-in defaults.
    pub fn from_json(payload: &[u8]) -> Result<Self, serde_json_core::de::Error> {
        serde_json_core::from_slice(payload).map(|(cfg, _)| cfg)
    }

    /// Render the active configuration for echo and diagnostics.
    /// Returns the number of bytes written.
    pub fn to_json(&self, buf: &mut [u8]) -> Result<usize, serde_json_core::ser::Error> {
        serde_json_core::to_slice(self, buf)
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Filter state shared with the per-frame callbacks.
///
/// Single-writer: only the lifecycle coordinator stores; the WiFi frame
/// callback, the GAP event callback, and the rotation timer load. All
/// fields are atomic-width scalars, so readers always see a value that
/// was valid at some point — no transaction is needed.
#[derive(Debug)]
pub struct SharedConfig {
    rssi_threshold: AtomicI8,
    channel_map: AtomicU16,
    vendor_filter: AtomicBool,
    match_signature: AtomicBool,
}

impl SharedConfig {
    pub const fn new() -> Self {
        Self {
            rssi_threshold: AtomicI8::new(DEFAULT_RSSI_THRESHOLD),
            channel_map: AtomicU16::new(CHANNEL_MAP_ALL),
            vendor_filter: AtomicBool::new(false),
            match_signature: AtomicBool::new(false),
        }
    }

    pub fn from_config(cfg: &ScanConfig) -> Self {
        let shared = Self::new();
        shared.set_rssi_threshold(cfg.rssi_threshold);
        shared.set_channel_map(cfg.legal_channel_map());
        shared.set_vendor_filter(cfg.vendor_filter);
        shared.set_match_signature(cfg.match_signature);
        shared
    }

    pub fn rssi_threshold(&self) -> i8 {
        self.rssi_threshold.load(Ordering::Relaxed)
    }

    pub fn set_rssi_threshold(&self, dbm: i8) {
        self.rssi_threshold.store(dbm, Ordering::Relaxed);
    }

    pub fn channel_map(&self) -> u16 {
        self.channel_map.load(Ordering::Relaxed)
    }

    pub fn set_channel_map(&self, map: u16) {
        self.channel_map.store(map, Ordering::Relaxed);
    }

    pub fn vendor_filter(&self) -> bool {
        self.vendor_filter.load(Ordering::Relaxed)
    }

    pub fn set_vendor_filter(&self, enabled: bool) {
        self.vendor_filter.store(enabled, Ordering::Relaxed);
    }

    pub fn match_signature(&self) -> bool {
        self.match_signature.load(Ordering::Relaxed)
    }

    pub fn set_match_signature(&self, enabled: bool) {
        self.match_signature.store(enabled, Ordering::Relaxed);
    }

    /// Snapshot of the admission-filter stages for one callback pass.
    pub fn filter_snapshot(&self) -> FilterSettings {
        FilterSettings {
            rssi_threshold: self.rssi_threshold(),
            vendor_filter: self.vendor_filter(),
            match_signature: self.match_signature(),
        }
    }
}

impl Default for SharedConfig {
    fn default() -> Self {
        Self::new()
    }
}
