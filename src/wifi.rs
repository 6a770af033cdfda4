/// WiFi promiscuous capture state machine.
///
/// Owns the promiscuous-mode lifecycle and the armed/disarmed state of
/// the frame path. The driver adapter delivers every overheard frame to
/// [`WifiSniffer::on_frame`], which runs at interrupt/high-priority
/// context and must stay short and non-blocking; a periodic timer in the
/// adapter drives [`WifiSniffer::rotate`].
use core::sync::atomic::{AtomicBool, Ordering};

use log::{debug, info, trace};

use crate::channel::ChannelCursor;
use crate::config::{ScanConfig, SharedConfig};
use crate::filter;
use crate::radio::{Fatal, FrameDescriptor, FrameKinds, WifiRadio};
use crate::sink::{format_addr, ObservationSink};

pub struct WifiSniffer<D: WifiRadio> {
    driver: D,
    /// Gate for the frame path. Cleared before any teardown driver call,
    /// so an in-flight callback can never reach the sink once `stop`
    /// has begun — the driver is not assumed to quiesce atomically.
    armed: AtomicBool,
    active: bool,
    cursor: ChannelCursor,
    rotation_period_ms: Option<u32>,
}

impl<D: WifiRadio> WifiSniffer<D> {
    pub fn new(driver: D) -> Self {
        Self {
            driver,
            armed: AtomicBool::new(false),
            active: false,
            cursor: ChannelCursor::new(),
            rotation_period_ms: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Rotation period derived at start (`channel_switch_interval` 10 ms
    /// ticks × 10), or `None` when rotation is disabled or stopped. The
    /// adapter polls this to run its timer.
    pub fn rotation_period_ms(&self) -> Option<u32> {
        self.rotation_period_ms
    }

    /// Configure the radio for promiscuous receive and arm the frame
    /// path. Management and data frames only; control frames carry no
    /// useful transmitter identity. A no-op while already active.
    pub fn start(&mut self, cfg: &ScanConfig) -> Result<(), Fatal<D::Error>> {
        if self.active {
            debug!("wifi sniffer already active, start ignored");
            return Ok(());
        }

        self.driver
            .start(cfg.country, FrameKinds::MGMT_AND_DATA)
            .map_err(|e| Fatal::wifi("start", e))?;
        self.driver
            .set_promiscuous(true)
            .map_err(|e| Fatal::wifi("set_promiscuous", e))?;

        self.cursor = ChannelCursor::new();
        self.rotation_period_ms = (cfg.wifi_channel_switch_interval > 0)
            .then(|| u32::from(cfg.wifi_channel_switch_interval) * 10);

        self.armed.store(true, Ordering::SeqCst);
        self.active = true;
        info!(
            "wifi sniffer started, country {}, rotation {:?} ms",
            cfg.country.as_str(),
            self.rotation_period_ms
        );
        Ok(())
    }

    /// Disarm the frame path, stop rotation, leave monitor mode, stop
    /// the radio. After this returns no further frame reaches the sink,
    /// even one the driver had already buffered. A no-op while inactive.
    pub fn stop(&mut self) -> Result<(), Fatal<D::Error>> {
        if !self.active {
            debug!("wifi sniffer not active, stop ignored");
            return Ok(());
        }

        // Frame path first, teardown second.
        self.armed.store(false, Ordering::SeqCst);
        self.rotation_period_ms = None;

        self.driver
            .set_promiscuous(false)
            .map_err(|e| Fatal::wifi("set_promiscuous", e))?;
        self.driver.stop().map_err(|e| Fatal::wifi("stop", e))?;

        self.active = false;
        info!("wifi sniffer stopped");
        Ok(())
    }

    /// Per-frame entry point, invoked by the driver adapter for every
    /// overheard frame. ISR-safe: one atomic load, the admission filter,
    /// and a non-blocking sink call.
    pub fn on_frame(
        &self,
        frame: &FrameDescriptor<'_>,
        shared: &SharedConfig,
        sink: &impl ObservationSink,
    ) {
        if !self.armed.load(Ordering::SeqCst) {
            return;
        }

        let settings = shared.filter_snapshot();
        if let Some(obs) = filter::admit_wifi(frame, &settings) {
            trace!("wifi frame admitted from {}", format_addr(&obs.addr));
            sink.record_observation(obs);
        }
    }

    /// Rotation timer tick: advance to the next enabled channel and tune
    /// the radio to it. Returns the channel now active. Ticks arriving
    /// after `stop` (the timer and the stop path race) are ignored.
    pub fn rotate(&mut self, shared: &SharedConfig) -> Result<u8, Fatal<D::Error>> {
        if !self.active {
            return Ok(self.cursor.current());
        }
        let ch = self.cursor.advance(shared.channel_map());
        self.driver
            .set_channel(ch)
            .map_err(|e| Fatal::wifi("set_channel", e))?;
        trace!("wifi rotated to channel {ch}");
        Ok(ch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CountryCode;
    use crate::sink::Observation;
    use std::cell::RefCell;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Op {
        Start,
        Promiscuous(bool),
        Channel(u8),
        Stop,
    }

    #[derive(Default)]
    struct MockWifi {
        ops: Vec<Op>,
        fail_next: bool,
    }

    impl WifiRadio for MockWifi {
        type Error = &'static str;

        fn start(&mut self, _country: CountryCode, kinds: FrameKinds) -> Result<(), Self::Error> {
            assert_eq!(kinds, FrameKinds::MGMT_AND_DATA);
            if self.fail_next {
                return Err("init refused");
            }
            self.ops.push(Op::Start);
            Ok(())
        }

        fn set_promiscuous(&mut self, enabled: bool) -> Result<(), Self::Error> {
            self.ops.push(Op::Promiscuous(enabled));
            Ok(())
        }

        fn set_channel(&mut self, channel: u8) -> Result<(), Self::Error> {
            self.ops.push(Op::Channel(channel));
            Ok(())
        }

        fn stop(&mut self) -> Result<(), Self::Error> {
            self.ops.push(Op::Stop);
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        seen: RefCell<Vec<Observation>>,
    }

    impl ObservationSink for RecordingSink {
        fn record_observation(&self, obs: Observation) {
            self.seen.borrow_mut().push(obs);
        }
    }

    fn beacon_frame(transmitter: [u8; 6]) -> [u8; 24] {
        let mut frame = [0u8; 24];
        frame[0] = 0x80;
        frame[4..10].copy_from_slice(&[0xFF; 6]);
        frame[10..16].copy_from_slice(&transmitter);
        frame[16..22].copy_from_slice(&transmitter);
        frame
    }

    fn descriptor<'a>(data: &'a [u8], rssi: i8) -> FrameDescriptor<'a> {
        FrameDescriptor {
            rssi,
            channel: 1,
            data,
        }
    }

    #[test]
    fn start_enables_promiscuous_mode() {
        let mut sniffer = WifiSniffer::new(MockWifi::default());
        sniffer.start(&ScanConfig::new()).unwrap();
        assert!(sniffer.is_active());
        assert_eq!(sniffer.driver.ops, vec![Op::Start, Op::Promiscuous(true)]);
    }

    #[test]
    fn start_is_idempotent() {
        let mut sniffer = WifiSniffer::new(MockWifi::default());
        sniffer.start(&ScanConfig::new()).unwrap();
        sniffer.start(&ScanConfig::new()).unwrap();
        assert_eq!(sniffer.driver.ops, vec![Op::Start, Op::Promiscuous(true)]);
    }

    #[test]
    fn stop_is_idempotent_and_ordered() {
        let mut sniffer = WifiSniffer::new(MockWifi::default());
        sniffer.start(&ScanConfig::new()).unwrap();
        sniffer.stop().unwrap();
        sniffer.stop().unwrap();
        assert_eq!(
            sniffer.driver.ops,
            vec![Op::Start, Op::Promiscuous(true), Op::Promiscuous(false), Op::Stop]
        );
    }

    #[test]
    fn start_fault_is_fatal_and_named() {
        let driver = MockWifi {
            fail_next: true,
            ..MockWifi::default()
        };
        let mut sniffer = WifiSniffer::new(driver);
        let fault = sniffer.start(&ScanConfig::new()).unwrap_err();
        assert_eq!(fault.op, "start");
        assert_eq!(fault.source, "init refused");
        assert!(!sniffer.is_active());
    }

    #[test]
    fn admitted_frame_reaches_sink() {
        let mut sniffer = WifiSniffer::new(MockWifi::default());
        sniffer.start(&ScanConfig::new()).unwrap();
        let shared = SharedConfig::new();
        shared.set_rssi_threshold(0);
        let sink = RecordingSink::default();

        let frame = beacon_frame([0x02, 0x11, 0x22, 0x33, 0x44, 0x55]);
        sniffer.on_frame(&descriptor(&frame, -40), &shared, &sink);

        let seen = sink.seen.borrow();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].addr, [0x02, 0x11, 0x22, 0x33, 0x44, 0x55]);
    }

    #[test]
    fn threshold_rejection_never_reaches_sink() {
        let mut sniffer = WifiSniffer::new(MockWifi::default());
        sniffer.start(&ScanConfig::new()).unwrap();
        let shared = SharedConfig::new();
        shared.set_rssi_threshold(-80);
        let sink = RecordingSink::default();

        let frame = beacon_frame([0x02, 0x11, 0x22, 0x33, 0x44, 0x55]);
        sniffer.on_frame(&descriptor(&frame, -85), &shared, &sink);
        assert!(sink.seen.borrow().is_empty());
    }

    #[test]
    fn no_ingestion_after_stop_returns() {
        let mut sniffer = WifiSniffer::new(MockWifi::default());
        sniffer.start(&ScanConfig::new()).unwrap();
        sniffer.stop().unwrap();

        // A frame the driver had buffered before stop completed
        let shared = SharedConfig::new();
        shared.set_rssi_threshold(0);
        let sink = RecordingSink::default();
        let frame = beacon_frame([0x02, 0x11, 0x22, 0x33, 0x44, 0x55]);
        sniffer.on_frame(&descriptor(&frame, -40), &shared, &sink);
        assert!(sink.seen.borrow().is_empty());
    }

    #[test]
    fn frames_before_start_are_ignored() {
        let sniffer = WifiSniffer::new(MockWifi::default());
        let shared = SharedConfig::new();
        let sink = RecordingSink::default();
        let frame = beacon_frame([0x02, 0x11, 0x22, 0x33, 0x44, 0x55]);
        sniffer.on_frame(&descriptor(&frame, -40), &shared, &sink);
        assert!(sink.seen.borrow().is_empty());
    }

    #[test]
    fn rotation_period_derives_from_interval() {
        let mut sniffer = WifiSniffer::new(MockWifi::default());
        let mut cfg = ScanConfig::new();
        cfg.wifi_channel_switch_interval = 50;
        sniffer.start(&cfg).unwrap();
        assert_eq!(sniffer.rotation_period_ms(), Some(500));
        sniffer.stop().unwrap();
        assert_eq!(sniffer.rotation_period_ms(), None);
    }

    #[test]
    fn zero_interval_disables_rotation() {
        let mut sniffer = WifiSniffer::new(MockWifi::default());
        let mut cfg = ScanConfig::new();
        cfg.wifi_channel_switch_interval = 0;
        sniffer.start(&cfg).unwrap();
        assert_eq!(sniffer.rotation_period_ms(), None);
    }

    #[test]
    fn rotate_tunes_only_mapped_channels() {
        let mut sniffer = WifiSniffer::new(MockWifi::default());
        sniffer.start(&ScanConfig::new()).unwrap();
        let shared = SharedConfig::new();
        shared.set_channel_map(0b0000_0100_0010_0001); // 1, 6, 11

        assert_eq!(sniffer.rotate(&shared).unwrap(), 6);
        assert_eq!(sniffer.rotate(&shared).unwrap(), 11);
        assert_eq!(sniffer.rotate(&shared).unwrap(), 1);
        assert_eq!(
            &sniffer.driver.ops[2..],
            &[Op::Channel(6), Op::Channel(11), Op::Channel(1)]
        );
    }

    #[test]
    fn rotate_after_stop_does_not_touch_driver() {
        let mut sniffer = WifiSniffer::new(MockWifi::default());
        sniffer.start(&ScanConfig::new()).unwrap();
        sniffer.stop().unwrap();
        let ops_before = sniffer.driver.ops.len();
        let shared = SharedConfig::new();
        sniffer.rotate(&shared).unwrap();
        assert_eq!(sniffer.driver.ops.len(), ops_before);
    }
}
