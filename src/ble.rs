/// BLE passive scan state machine.
///
/// The most failure-sensitive part of the pipeline is the re-arm
/// contract: every completed scan cycle must immediately issue the next
/// scan-start request, otherwise coverage silently gaps. The driver
/// adapter feeds GAP events into [`BleScanner::on_gap_event`] from the
/// BLE stack's own context; the scanner answers with driver commands.
use log::{debug, info, trace};

use crate::config::{ScanConfig, SharedConfig};
use crate::filter;
use crate::radio::{BleRadio, CoexPreference, Fatal, GapEvent};
use crate::sink::{format_addr, ObservationSink};

/// Duration of one 0.625 ms radio tick, expressed as µs per tick.
const TICK_US: u32 = 625;

/// Passive-only discovery; scan requests would announce our presence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanType {
    Passive,
    Active,
}

/// Advertisement acceptance policy applied by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanFilterPolicy {
    /// Accept every advertiser.
    AllowAll,
    /// Whitelist plus directed RPA advertising only. Broadcast-style
    /// advertisers (beacons) never reach the host in this mode, which is
    /// what the vendor filter wants.
    AllowWhitelist,
}

/// Scan parameters in radio time units, computed once at start and
/// immutable for the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanParameters {
    pub scan_type: ScanType,
    pub filter_policy: ScanFilterPolicy,
    /// Inquiry cadence in 0.625 ms ticks, derived from the scan time so
    /// one cycle spans the full configured duration.
    pub interval: u16,
    /// Listening window in 0.625 ms ticks.
    pub window: u16,
    /// Report every packet; de-duplication belongs to the counting
    /// engine, not the controller.
    pub filter_duplicates: bool,
}

impl ScanParameters {
    pub fn from_config(cfg: &ScanConfig) -> Self {
        Self {
            scan_type: ScanType::Passive,
            filter_policy: if cfg.vendor_filter {
                ScanFilterPolicy::AllowWhitelist
            } else {
                ScanFilterPolicy::AllowAll
            },
            interval: ticks(u32::from(cfg.ble_scan_time) * 10),
            window: ticks(u32::from(cfg.ble_scan_window)),
            filter_duplicates: false,
        }
    }
}

/// Milliseconds to 0.625 ms ticks, saturating at the 16-bit field width.
fn ticks(ms: u32) -> u16 {
    (ms * 1000 / TICK_US).min(u32::from(u16::MAX)) as u16
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BleScanState {
    /// Never started.
    Idle,
    /// Parameters submitted, waiting for the stack to acknowledge.
    Starting,
    /// A scan cycle is running.
    Scanning,
    /// Between cycles, re-issuing the scan-start request.
    Restarting,
    /// Stopped after an active session.
    Stopped,
}

pub struct BleScanner<D: BleRadio> {
    driver: D,
    state: BleScanState,
    /// Cycle duration re-used for every re-arm, seconds.
    scan_time: u16,
}

impl<D: BleRadio> BleScanner<D> {
    pub fn new(driver: D) -> Self {
        Self {
            driver,
            state: BleScanState::Idle,
            scan_time: 0,
        }
    }

    pub fn state(&self) -> BleScanState {
        self.state
    }

    #[cfg(test)]
    pub(crate) fn driver(&self) -> &D {
        &self.driver
    }

    pub fn is_active(&self) -> bool {
        matches!(
            self.state,
            BleScanState::Starting | BleScanState::Scanning | BleScanState::Restarting
        )
    }

    /// Bias the front end toward BT, bring the stack up, and submit the
    /// scan parameters. Scanning begins once the stack acknowledges with
    /// [`GapEvent::ScanParamSetComplete`]. A no-op while already active.
    pub fn start(&mut self, cfg: &ScanConfig) -> Result<(), Fatal<D::Error>> {
        if self.is_active() {
            debug!("ble scanner already active, start ignored");
            return Ok(());
        }

        let params = ScanParameters::from_config(cfg);
        self.scan_time = cfg.ble_scan_time;

        self.driver
            .set_coex_preference(CoexPreference::Bt)
            .map_err(|e| Fatal::ble("set_coex_preference", e))?;
        self.driver.enable().map_err(|e| Fatal::ble("enable", e))?;
        self.driver
            .set_scan_params(&params)
            .map_err(|e| Fatal::ble("set_scan_params", e))?;

        self.state = BleScanState::Starting;
        info!(
            "ble scanner starting, interval {} window {} ticks, cycle {} s",
            params.interval, params.window, self.scan_time
        );
        Ok(())
    }

    /// GAP event entry point, invoked by the driver adapter on the BLE
    /// stack's context. Must not block; events arriving outside an
    /// active session are dropped.
    pub fn on_gap_event(
        &mut self,
        event: GapEvent<'_>,
        shared: &SharedConfig,
        sink: &impl ObservationSink,
    ) -> Result<(), Fatal<D::Error>> {
        if !self.is_active() {
            trace!("gap event outside active session dropped");
            return Ok(());
        }

        match event {
            GapEvent::ScanParamSetComplete => {
                if self.state != BleScanState::Starting {
                    debug!("unexpected scan-param acknowledgment in {:?}", self.state);
                    return Ok(());
                }
                self.state = BleScanState::Scanning;
                self.driver
                    .start_scanning(self.scan_time)
                    .map_err(|e| Fatal::ble("start_scanning", e))?;
                info!("ble scan running");
            }
            GapEvent::InquiryComplete => {
                // The one deliberate retry-forever loop: re-arm at once,
                // any gap between cycles is lost coverage.
                self.state = BleScanState::Restarting;
                self.driver
                    .start_scanning(self.scan_time)
                    .map_err(|e| Fatal::ble("start_scanning", e))?;
                self.state = BleScanState::Scanning;
                trace!("ble scan re-armed");
            }
            GapEvent::InquiryResult(report) => {
                let settings = shared.filter_snapshot();
                if let Some(obs) = filter::admit_ble(&report, &settings) {
                    trace!(
                        "ble advertiser admitted {} ({})",
                        format_addr(&obs.addr),
                        report.addr_type.as_str()
                    );
                    sink.record_observation(obs);
                }
            }
        }
        Ok(())
    }

    /// Tear the stack down and hand the front end back to WiFi. Runs
    /// once per active session; a second call is a guarded no-op.
    pub fn stop(&mut self) -> Result<(), Fatal<D::Error>> {
        if !self.is_active() {
            debug!("ble scanner not active, stop ignored");
            return Ok(());
        }

        // Leave the active states before teardown so a buffered
        // InquiryComplete cannot re-arm a dying session.
        self.state = BleScanState::Stopped;

        self.driver.disable().map_err(|e| Fatal::ble("disable", e))?;
        self.driver
            .set_coex_preference(CoexPreference::Wifi)
            .map_err(|e| Fatal::ble("set_coex_preference", e))?;

        info!("ble scanner stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::radio::{AdvReport, BleAddrType};
    use crate::sink::Observation;
    use std::cell::RefCell;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Op {
        Coex(CoexPreference),
        Enable,
        SetParams(ScanParameters),
        StartScanning(u16),
        Disable,
    }

    #[derive(Default)]
    struct MockBle {
        ops: Vec<Op>,
        fail_scan_start: bool,
    }

    impl BleRadio for MockBle {
        type Error = &'static str;

        fn enable(&mut self) -> Result<(), Self::Error> {
            self.ops.push(Op::Enable);
            Ok(())
        }

        fn set_scan_params(&mut self, params: &ScanParameters) -> Result<(), Self::Error> {
            self.ops.push(Op::SetParams(*params));
            Ok(())
        }

        fn start_scanning(&mut self, duration_s: u16) -> Result<(), Self::Error> {
            if self.fail_scan_start {
                return Err("controller busy");
            }
            self.ops.push(Op::StartScanning(duration_s));
            Ok(())
        }

        fn disable(&mut self) -> Result<(), Self::Error> {
            self.ops.push(Op::Disable);
            Ok(())
        }

        fn set_coex_preference(&mut self, pref: CoexPreference) -> Result<(), Self::Error> {
            self.ops.push(Op::Coex(pref));
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

    fn scan_starts(ops: &[Op]) -> usize {
        ops.iter()
            .filter(|op| matches!(op, Op::StartScanning(_)))
            .count()
    }

    fn report<'a>(addr_type: BleAddrType, adv_data: &'a [u8]) -> AdvReport<'a> {
        AdvReport {
            addr: [0xDA, 0x01, 0x02, 0x03, 0x04, 0x05],
            addr_type,
            rssi: -50,
            adv_data,
        }
    }

    // ── ScanParameters ──────────────────────────────────────────────

    #[test]
    fn parameters_use_native_ticks() {
        let mut cfg = ScanConfig::new();
        cfg.ble_scan_time = 1; // 1 s cycle → 10 ms × 1 / 0.625 ms
        cfg.ble_scan_window = 80;
        let params = ScanParameters::from_config(&cfg);
        assert_eq!(params.interval, 16);
        assert_eq!(params.window, 128);
        assert_eq!(params.scan_type, ScanType::Passive);
        assert!(!params.filter_duplicates);
    }

    #[test]
    fn vendor_filter_selects_whitelist_policy() {
        let mut cfg = ScanConfig::new();
        cfg.vendor_filter = true;
        assert_eq!(
            ScanParameters::from_config(&cfg).filter_policy,
            ScanFilterPolicy::AllowWhitelist
        );
        cfg.vendor_filter = false;
        assert_eq!(
            ScanParameters::from_config(&cfg).filter_policy,
            ScanFilterPolicy::AllowAll
        );
    }

    #[test]
    fn tick_conversion_saturates() {
        assert_eq!(ticks(0), 0);
        assert_eq!(ticks(100), 160);
        assert_eq!(ticks(1_000_000), u16::MAX);
    }

    // ── Lifecycle ───────────────────────────────────────────────────

    #[test]
    fn start_sequences_coex_enable_params() {
        let mut scanner = BleScanner::new(MockBle::default());
        scanner.start(&ScanConfig::new()).unwrap();
        assert_eq!(scanner.state(), BleScanState::Starting);
        assert!(matches!(
            scanner.driver.ops.as_slice(),
            [Op::Coex(CoexPreference::Bt), Op::Enable, Op::SetParams(_)]
        ));
    }

    #[test]
    fn start_is_idempotent() {
        let mut scanner = BleScanner::new(MockBle::default());
        scanner.start(&ScanConfig::new()).unwrap();
        let ops = scanner.driver.ops.len();
        scanner.start(&ScanConfig::new()).unwrap();
        assert_eq!(scanner.driver.ops.len(), ops);
    }

    #[test]
    fn stop_disables_and_yields_front_end_to_wifi() {
        let mut scanner = BleScanner::new(MockBle::default());
        scanner.start(&ScanConfig::new()).unwrap();
        scanner.stop().unwrap();
        assert_eq!(scanner.state(), BleScanState::Stopped);
        assert_eq!(
            &scanner.driver.ops[3..],
            &[Op::Disable, Op::Coex(CoexPreference::Wifi)]
        );
        // Second stop is a guarded no-op
        scanner.stop().unwrap();
        assert_eq!(scanner.driver.ops.len(), 5);
    }

    #[test]
    fn session_can_restart_after_stop() {
        let mut scanner = BleScanner::new(MockBle::default());
        scanner.start(&ScanConfig::new()).unwrap();
        scanner.stop().unwrap();
        scanner.start(&ScanConfig::new()).unwrap();
        assert_eq!(scanner.state(), BleScanState::Starting);
    }

    // ── Re-arm contract ─────────────────────────────────────────────

    #[test]
    fn param_ack_issues_first_scan_start() {
        let mut scanner = BleScanner::new(MockBle::default());
        let mut cfg = ScanConfig::new();
        cfg.ble_scan_time = 3;
        scanner.start(&cfg).unwrap();

        let shared = SharedConfig::new();
        let sink = RecordingSink::default();
        scanner
            .on_gap_event(GapEvent::ScanParamSetComplete, &shared, &sink)
            .unwrap();
        assert_eq!(scanner.state(), BleScanState::Scanning);
        assert!(scanner.driver.ops.contains(&Op::StartScanning(3)));
    }

    #[test]
    fn n_inquiry_completions_mean_n_plus_one_scan_starts() {
        let mut scanner = BleScanner::new(MockBle::default());
        scanner.start(&ScanConfig::new()).unwrap();
        let shared = SharedConfig::new();
        let sink = RecordingSink::default();
        scanner
            .on_gap_event(GapEvent::ScanParamSetComplete, &shared, &sink)
            .unwrap();

        let n = 7;
        for _ in 0..n {
            scanner
                .on_gap_event(GapEvent::InquiryComplete, &shared, &sink)
                .unwrap();
            assert_eq!(scanner.state(), BleScanState::Scanning);
        }
        assert_eq!(scan_starts(&scanner.driver.ops), n + 1);
    }

    #[test]
    fn rearm_fault_is_fatal() {
        let mut scanner = BleScanner::new(MockBle::default());
        scanner.start(&ScanConfig::new()).unwrap();
        let shared = SharedConfig::new();
        let sink = RecordingSink::default();
        scanner
            .on_gap_event(GapEvent::ScanParamSetComplete, &shared, &sink)
            .unwrap();

        scanner.driver.fail_scan_start = true;
        let fault = scanner
            .on_gap_event(GapEvent::InquiryComplete, &shared, &sink)
            .unwrap_err();
        assert_eq!(fault.op, "start_scanning");
    }

    #[test]
    fn events_after_stop_do_not_rearm() {
        let mut scanner = BleScanner::new(MockBle::default());
        scanner.start(&ScanConfig::new()).unwrap();
        let shared = SharedConfig::new();
        let sink = RecordingSink::default();
        scanner
            .on_gap_event(GapEvent::ScanParamSetComplete, &shared, &sink)
            .unwrap();
        scanner.stop().unwrap();

        let starts = scan_starts(&scanner.driver.ops);
        scanner
            .on_gap_event(GapEvent::InquiryComplete, &shared, &sink)
            .unwrap();
        assert_eq!(scan_starts(&scanner.driver.ops), starts);
        assert_eq!(scanner.state(), BleScanState::Stopped);
    }

    // ── Result ingestion ────────────────────────────────────────────

    #[test]
    fn inquiry_result_flows_through_filter_to_sink() {
        let mut scanner = BleScanner::new(MockBle::default());
        scanner.start(&ScanConfig::new()).unwrap();
        let shared = SharedConfig::new();
        shared.set_rssi_threshold(0);
        shared.set_match_signature(true);
        let sink = RecordingSink::default();
        scanner
            .on_gap_event(GapEvent::ScanParamSetComplete, &shared, &sink)
            .unwrap();

        let ens = [0x03, 0x16, 0x6f, 0xfd];
        scanner
            .on_gap_event(
                GapEvent::InquiryResult(report(BleAddrType::Public, &ens)),
                &shared,
                &sink,
            )
            .unwrap();
        scanner
            .on_gap_event(
                GapEvent::InquiryResult(report(BleAddrType::Public, &[0x02, 0x01, 0x06])),
                &shared,
                &sink,
            )
            .unwrap();

        let seen = sink.seen.borrow();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].origin, crate::sink::Origin::BleSignature);
        assert_eq!(seen[1].origin, crate::sink::Origin::Ble);
    }

    #[test]
    fn results_before_start_are_dropped() {
        let mut scanner = BleScanner::new(MockBle::default());
        let shared = SharedConfig::new();
        let sink = RecordingSink::default();
        scanner
            .on_gap_event(
                GapEvent::InquiryResult(report(BleAddrType::Public, &[])),
                &shared,
                &sink,
            )
            .unwrap();
        assert!(sink.seen.borrow().is_empty());
    }
}
