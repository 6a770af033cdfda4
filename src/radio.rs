/// Driver boundary — the traits the capture state machines drive and the
/// descriptors the driver adapters deliver back into them.
///
/// The radio firmware owns the execution contexts: it invokes
/// `on_frame` / `on_gap_event` on the state machines, and the state
/// machines command it through these traits. Firmware adapters implement
/// them over the real radio stacks; tests implement them over recording
/// mocks, which is what makes the pipeline testable without hardware.
use core::fmt;

use crate::ble::ScanParameters;
use crate::config::CountryCode;

/// Which radio a fault originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioKind {
    Wifi,
    Ble,
}

impl RadioKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            RadioKind::Wifi => "wifi",
            RadioKind::Ble => "ble",
        }
    }
}

/// A failed driver call.
///
/// There is no recovery path below the driver layer: a radio that refuses
/// a lifecycle or scan command has no degraded mode. Callers propagate
/// this with `?` and the outermost layer halts the device on it. It is a
/// distinct category from filter-logic conditions (malformed frames,
/// empty channel maps), which are handled locally and never surface here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fatal<E> {
    pub radio: RadioKind,
    pub op: &'static str,
    pub source: E,
}

impl<E> Fatal<E> {
    pub(crate) fn wifi(op: &'static str, source: E) -> Self {
        Self { radio: RadioKind::Wifi, op, source }
    }

    pub(crate) fn ble(op: &'static str, source: E) -> Self {
        Self { radio: RadioKind::Ble, op, source }
    }
}

impl<E: fmt::Debug> fmt::Display for Fatal<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "fatal {} driver fault in {}: {:?}",
            self.radio.as_str(),
            self.op,
            self.source
        )
    }
}

/// Frame classes delivered by the promiscuous receiver.
///
/// The capture pipeline wants management and data frames; control frames
/// carry no useful transmitter identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameKinds {
    pub management: bool,
    pub data: bool,
    pub control: bool,
}

impl FrameKinds {
    pub const MGMT_AND_DATA: Self = Self {
        management: true,
        data: true,
        control: false,
    };
}

/// Cooperative RF front-end scheduling hint. Both radios share the
/// antenna; this biases the driver's airtime arbitration, it is not an
/// exclusivity lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoexPreference {
    Bt,
    Wifi,
}

/// BLE advertiser address classes as the controller reports them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BleAddrType {
    Public,
    Random,
    RpaPublic,
    RpaRandom,
}

impl BleAddrType {
    pub const fn as_str(self) -> &'static str {
        match self {
            BleAddrType::Public => "public",
            BleAddrType::Random => "random",
            BleAddrType::RpaPublic => "rpa_public",
            BleAddrType::RpaRandom => "rpa_random",
        }
    }
}

/// One overheard 802.11 frame, valid for a single callback invocation.
#[derive(Debug, Clone, Copy)]
pub struct FrameDescriptor<'a> {
    pub rssi: i8,
    pub channel: u8,
    /// Raw frame bytes starting at the frame control field.
    pub data: &'a [u8],
}

/// One BLE advertisement report, valid for a single callback invocation.
#[derive(Debug, Clone, Copy)]
pub struct AdvReport<'a> {
    pub addr: [u8; 6],
    pub addr_type: BleAddrType,
    pub rssi: i8,
    /// Raw advertisement data (AD structures).
    pub adv_data: &'a [u8],
}

/// GAP events the BLE driver adapter feeds into the scan state machine.
#[derive(Debug, Clone, Copy)]
pub enum GapEvent<'a> {
    /// The stack applied the scan parameters; scanning may begin.
    ScanParamSetComplete,
    /// The driver-imposed scan duration elapsed.
    InquiryComplete,
    /// A single peer advertisement was received.
    InquiryResult(AdvReport<'a>),
}

/// WiFi radio lifecycle and promiscuous receive control.
pub trait WifiRadio {
    type Error: fmt::Debug;

    /// Bring the radio up configured for promiscuous receive: country
    /// plan, frame-class filter, and the frame delivery path armed.
    fn start(&mut self, country: CountryCode, kinds: FrameKinds) -> Result<(), Self::Error>;

    /// Switch monitor mode on or off.
    fn set_promiscuous(&mut self, enabled: bool) -> Result<(), Self::Error>;

    /// Tune the receiver to `channel` (1-14).
    fn set_channel(&mut self, channel: u8) -> Result<(), Self::Error>;

    /// Stop the radio and release its resources.
    fn stop(&mut self) -> Result<(), Self::Error>;
}

/// BLE controller/host lifecycle and passive scan control.
pub trait BleRadio {
    type Error: fmt::Debug;

    /// Power on the controller and host stack.
    fn enable(&mut self) -> Result<(), Self::Error>;

    /// Apply scan parameters. The driver acknowledges asynchronously with
    /// [`GapEvent::ScanParamSetComplete`].
    fn set_scan_params(&mut self, params: &ScanParameters) -> Result<(), Self::Error>;

    /// Begin one passive scan cycle of `duration_s` seconds. Completion is
    /// reported asynchronously with [`GapEvent::InquiryComplete`].
    fn start_scanning(&mut self, duration_s: u16) -> Result<(), Self::Error>;

    /// Tear down the host stack and controller.
    fn disable(&mut self) -> Result<(), Self::Error>;

    /// Bias the shared RF front end toward one radio.
    fn set_coex_preference(&mut self, pref: CoexPreference) -> Result<(), Self::Error>;
}
