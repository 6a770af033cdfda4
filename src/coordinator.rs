/// Radio lifecycle coordinator.
///
/// Owns both capture state machines, the configuration, and the shared
/// filter state the callbacks read. Start/stop are idempotent; the BLE
/// path carries the RF coexistence preference (toward BT while BLE
/// scans, back to WiFi when it stops). The coordinator is also the
/// single writer of [`SharedConfig`] — the runtime setters below are the
/// only mutation path once capture is running.
use log::info;

use crate::ble::BleScanner;
use crate::config::{CountryCode, ScanConfig, SharedConfig};
use crate::radio::{BleRadio, Fatal, FrameDescriptor, GapEvent, WifiRadio};
use crate::sink::ObservationSink;
use crate::wifi::WifiSniffer;

pub struct Coordinator<W: WifiRadio, B: BleRadio> {
    config: ScanConfig,
    shared: SharedConfig,
    wifi: WifiSniffer<W>,
    ble: BleScanner<B>,
}

impl<W: WifiRadio, B: BleRadio> Coordinator<W, B> {
    pub fn new(config: ScanConfig, wifi_driver: W, ble_driver: B) -> Self {
        Self {
            shared: SharedConfig::from_config(&config),
            config,
            wifi: WifiSniffer::new(wifi_driver),
            ble: BleScanner::new(ble_driver),
        }
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    pub fn shared(&self) -> &SharedConfig {
        &self.shared
    }

    pub fn wifi_active(&self) -> bool {
        self.wifi.is_active()
    }

    pub fn ble_active(&self) -> bool {
        self.ble.is_active()
    }

    // ── Lifecycle ──────────────────────────────────────────────────

    pub fn start_wifi(&mut self) -> Result<(), Fatal<W::Error>> {
        self.wifi.start(&self.config)
    }

    pub fn stop_wifi(&mut self) -> Result<(), Fatal<W::Error>> {
        self.wifi.stop()
    }

    pub fn start_ble(&mut self) -> Result<(), Fatal<B::Error>> {
        self.ble.start(&self.config)
    }

    pub fn stop_ble(&mut self) -> Result<(), Fatal<B::Error>> {
        self.ble.stop()
    }

    // ── Callback entry points (driver-owned contexts) ───────────────

    pub fn on_wifi_frame(&self, frame: &FrameDescriptor<'_>, sink: &impl ObservationSink) {
        self.wifi.on_frame(frame, &self.shared, sink);
    }

    pub fn on_gap_event(
        &mut self,
        event: GapEvent<'_>,
        sink: &impl ObservationSink,
    ) -> Result<(), Fatal<B::Error>> {
        self.ble.on_gap_event(event, &self.shared, sink)
    }

    /// Rotation timer tick. Returns the channel now active.
    pub fn rotate_wifi_channel(&mut self) -> Result<u8, Fatal<W::Error>> {
        self.wifi.rotate(&self.shared)
    }

    /// Period the adapter's rotation timer should run at, if any.
    pub fn wifi_rotation_period_ms(&self) -> Option<u32> {
        self.wifi.rotation_period_ms()
    }

    // ── Runtime configuration (single writer) ───────────────────────

    /// Update the RSSI admission threshold; 0 disables the stage.
    /// Visible to the very next frame on either radio.
    pub fn set_rssi_threshold(&mut self, dbm: i8) {
        self.config.rssi_threshold = dbm;
        self.shared.set_rssi_threshold(dbm);
        info!("rssi threshold set to {dbm}");
    }

    /// Replace the channel bitmap. The effective map is clamped to the
    /// configured locale's legal plan.
    pub fn set_channel_map(&mut self, map: u16) {
        self.config.channel_map = map;
        self.shared.set_channel_map(self.config.legal_channel_map());
    }

    /// Switch the regulatory locale, re-clamping the channel bitmap.
    /// Takes full effect for radio init at the next WiFi start.
    pub fn set_country(&mut self, country: CountryCode) {
        self.config.country = country;
        self.shared.set_channel_map(self.config.legal_channel_map());
        info!("country set to {}", country.as_str());
    }

    pub fn set_vendor_filter(&mut self, enabled: bool) {
        self.config.vendor_filter = enabled;
        self.shared.set_vendor_filter(enabled);
    }

    pub fn set_signature_matching(&mut self, enabled: bool) {
        self.config.match_signature = enabled;
        self.shared.set_match_signature(enabled);
    }
}
