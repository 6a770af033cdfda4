/// Frame admission filter — the per-frame predicate applied inside both
/// capture callbacks.
///
/// Pure functions over borrowed frame descriptors and a settings
/// snapshot; no driver types, no allocation, no blocking. Stages run in
/// a fixed order and short-circuit on the first rejection:
/// 1. signal strength (optional),
/// 2. address class (radio-specific),
/// 3. protocol signature (BLE only, optional — tags, never rejects).
use ieee80211::GenericFrame;

use crate::radio::{AdvReport, BleAddrType, FrameDescriptor};
use crate::sink::{Observation, Origin};

/// Service-data prefix of the BLE exposure-notification service
/// (AD type 0x16, service UUID 0xFD6F little-endian).
pub const ENS_SIGNATURE: [u8; 3] = [0x16, 0x6f, 0xfd];

/// Snapshot of the independently toggleable filter stages, taken once
/// per callback from the shared configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterSettings {
    /// Minimum RSSI in dBm; 0 disables the stage.
    pub rssi_threshold: i8,
    /// Reject random / resolvable-random BLE advertiser addresses.
    pub vendor_filter: bool,
    /// Scan BLE advertisement payloads for [`ENS_SIGNATURE`].
    pub match_signature: bool,
}

impl FilterSettings {
    pub const fn new() -> Self {
        Self {
            rssi_threshold: 0,
            vendor_filter: false,
            match_signature: false,
        }
    }
}

impl Default for FilterSettings {
    fn default() -> Self {
        Self::new()
    }
}

/// True if the locally-administered bit (bit 1 of the first octet) is
/// set. Only randomized-looking addresses are useful signals of a
/// carried device; vendor-burned infrastructure addresses are not.
#[inline]
pub fn is_locally_administered(addr: &[u8; 6]) -> bool {
    addr[0] & 0b10 != 0
}

/// Evaluate one overheard 802.11 frame.
///
/// Returns the observation to forward, or `None` when any enabled stage
/// rejects it. Malformed or truncated frames are rejected silently.
pub fn admit_wifi(frame: &FrameDescriptor<'_>, settings: &FilterSettings) -> Option<Observation> {
    if settings.rssi_threshold != 0 && frame.rssi < settings.rssi_threshold {
        return None;
    }

    let addr = transmitter_address(frame.data)?;
    if !is_locally_administered(&addr) {
        return None;
    }

    Some(Observation {
        addr,
        origin: Origin::Wifi,
    })
}

/// Evaluate one BLE advertisement report.
pub fn admit_ble(report: &AdvReport<'_>, settings: &FilterSettings) -> Option<Observation> {
    if settings.rssi_threshold != 0 && report.rssi < settings.rssi_threshold {
        return None;
    }

    if settings.vendor_filter
        && matches!(report.addr_type, BleAddrType::Random | BleAddrType::RpaRandom)
    {
        return None;
    }

    // Signature absence is not rejection, only a different origin tag.
    let origin = if settings.match_signature && contains_ens_signature(report.adv_data) {
        Origin::BleSignature
    } else {
        Origin::Ble
    };

    Some(Observation {
        addr: report.addr,
        origin,
    })
}

/// Extract the transmitter address (Address 2) from a raw 802.11 frame.
/// Frames too short to carry it parse as `None` and are discarded.
fn transmitter_address(data: &[u8]) -> Option<[u8; 6]> {
    let frame = GenericFrame::new(data, false).ok()?;
    frame.address_2().map(|mac| mac.0)
}

fn contains_ens_signature(adv_data: &[u8]) -> bool {
    adv_data.len() >= ENS_SIGNATURE.len()
        && adv_data
            .windows(ENS_SIGNATURE.len())
            .any(|w| w == ENS_SIGNATURE)
}
