/// Counting engine boundary.
///
/// An accepted frame is reduced to an [`Observation`] and handed to an
/// [`ObservationSink`] synchronously from the capture callback. The sink
/// must therefore be safe at interrupt/high-priority context: no
/// blocking, no allocation. The channel-backed implementation below is
/// the hand-off the firmware uses; a full queue drops the observation,
/// since frames are best-effort by nature.
use embassy_sync::blocking_mutex::raw::{CriticalSectionRawMutex, RawMutex};
use embassy_sync::channel::Channel;

/// Which capture path produced an observation. The counting engine may
/// weight exposure-notification advertisers differently, hence the
/// distinct BLE tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Wifi,
    Ble,
    BleSignature,
}

impl Origin {
    pub const fn as_str(self) -> &'static str {
        match self {
            Origin::Wifi => "wifi",
            Origin::Ble => "ble",
            Origin::BleSignature => "ble_ens",
        }
    }
}

/// A single accepted sighting: the sender's hardware address and the
/// capture path it arrived on. Forwarded by value and never retained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Observation {
    pub addr: [u8; 6],
    pub origin: Origin,
}

/// Ingestion entry point of the external counting/deduplication engine.
///
/// Invoked concurrently from both radio contexts; implementations must
/// not block and must tolerate bursts by shedding load.
pub trait ObservationSink {
    fn record_observation(&self, obs: Observation);
}

/// Depth of the default observation hand-off queue.
pub const OBSERVATION_QUEUE_DEPTH: usize = 16;

/// Bounded hand-off channel between the capture callbacks and the task
/// that feeds the counting engine.
pub type ObservationChannel =
    Channel<CriticalSectionRawMutex, Observation, OBSERVATION_QUEUE_DEPTH>;

impl<M: RawMutex, const N: usize> ObservationSink for Channel<M, Observation, N> {
    fn record_observation(&self, obs: Observation) {
        // Non-blocking by contract; shed when the drain task falls behind.
        let _ = self.try_send(obs);
    }
}

/// "AA:BB:CC:DD:EE:FF"
pub type AddrString = heapless::String<18>;

/// Format a hardware address for logs and diagnostics.
pub fn format_addr(addr: &[u8; 6]) -> AddrString {
    use core::fmt::Write;
    let mut s = AddrString::new();
    let _ = write!(
        s,
        "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
        addr[0], addr[1], addr[2], addr[3], addr[4], addr[5]
    );
    s
}
