//! paxscan firmware — ESP32 dual-radio passive observation front end.
//!
//! Thin adapter layer: esp-radio's promiscuous sniffer and trouble-host's
//! passive scanner are wired to the portable capture state machines in
//! the `paxscan` library. Accepted observations land in a bounded channel
//! drained by the counting-engine hand-off task.
//!
//! Radio driver failures are terminal here: the coordinator surfaces them
//! as fatal faults and this binary halts on them (panic → esp-backtrace),
//! since a radio that refuses to initialize has no degraded mode.

#![no_std]
#![no_main]

extern crate alloc;

use esp_backtrace as _;

esp_bootloader_esp_idf::esp_app_desc!();

use core::cell::{Cell, RefCell};

use critical_section::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_time::{Duration, Timer};
use esp_hal::interrupt::software::SoftwareInterruptControl;
use esp_hal::timer::timg::TimerGroup;
use static_cell::StaticCell;

use trouble_host::prelude::*;
use trouble_host::scan::ScanConfig as BleScanConfig;

use paxscan::ble::ScanParameters;
use paxscan::config::ScanConfig as CaptureConfig;
use paxscan::config::CountryCode;
use paxscan::coordinator::Coordinator;
use paxscan::radio::{
    AdvReport, BleAddrType, BleRadio, CoexPreference, FrameDescriptor, FrameKinds, GapEvent,
    WifiRadio,
};
use paxscan::sink::{format_addr, ObservationChannel};

// ── Driver adapters ─────────────────────────────────────────────────

#[derive(Debug)]
enum WifiDriverError {
    Driver(esp_radio::wifi::WifiError),
    Channel(i32),
}

/// WiFi driver adapter over esp-radio's controller and sniffer
/// interfaces. The controller handle stays here so `stop` can power the
/// radio down, not merely leave monitor mode.
struct EspWifiRadio {
    controller: esp_radio::wifi::WifiController<'static>,
    sniffer: esp_radio::wifi::sniffer::Sniffer,
}

impl WifiRadio for EspWifiRadio {
    type Error = WifiDriverError;

    fn start(&mut self, _country: CountryCode, _kinds: FrameKinds) -> Result<(), Self::Error> {
        // Already running right after esp_radio::wifi::new; only a
        // restart after stop() has to bring the driver back up.
        if !self.controller.is_started().map_err(WifiDriverError::Driver)? {
            self.controller.start().map_err(WifiDriverError::Driver)?;
        }
        // esp-radio's sniffer has no frame-class mask setter; the
        // admission path discards what the hardware filter would have.
        self.sniffer.set_receive_cb(sniffer_callback);
        Ok(())
    }

    fn set_promiscuous(&mut self, enabled: bool) -> Result<(), Self::Error> {
        self.sniffer
            .set_promiscuous_mode(enabled)
            .map_err(WifiDriverError::Driver)
    }

    fn set_channel(&mut self, channel: u8) -> Result<(), Self::Error> {
        match unsafe { esp_wifi_set_channel(channel, 0) } {
            0 => Ok(()),
            code => Err(WifiDriverError::Channel(code)),
        }
    }

    fn stop(&mut self) -> Result<(), Self::Error> {
        self.controller.stop().map_err(WifiDriverError::Driver)
    }
}

// FFI binding for WiFi channel control.
// The symbol is linked via esp-radio's WiFi driver.
unsafe extern "C" {
    fn esp_wifi_set_channel(primary: u8, second: u32) -> i32;
}

#[derive(Debug)]
enum BleDriverError {
    CommandQueueFull,
}

/// BLE driver adapter: scan commands are queued to the async BLE task,
/// which drives trouble-host and answers with GAP messages.
struct EspBleRadio;

impl BleRadio for EspBleRadio {
    type Error = BleDriverError;

    fn enable(&mut self) -> Result<(), Self::Error> {
        // Controller and host stack are built in main before capture
        // starts; nothing to bring up per session.
        Ok(())
    }

    fn set_scan_params(&mut self, params: &ScanParameters) -> Result<(), Self::Error> {
        critical_section::with(|cs| SCAN_PARAMS.borrow(cs).set(Some(*params)));
        // The stack acknowledges asynchronously, as the GAP contract
        // expects.
        GAP_EVENTS
            .try_send(GapMsg::ParamsApplied)
            .map_err(|_| BleDriverError::CommandQueueFull)
    }

    fn start_scanning(&mut self, duration_s: u16) -> Result<(), Self::Error> {
        SCAN_CYCLES
            .try_send(ScanCycleRequest { duration_s })
            .map_err(|_| BleDriverError::CommandQueueFull)
    }

    fn disable(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }

    fn set_coex_preference(&mut self, pref: CoexPreference) -> Result<(), Self::Error> {
        // esp-radio arbitrates WiFi/BT airtime itself; the hint is
        // advisory on this platform.
        log::debug!("coex preference -> {pref:?}");
        Ok(())
    }
}

// ── Static channels and shared state ────────────────────────────────

type Coord = Coordinator<EspWifiRadio, EspBleRadio>;

/// Owned GAP message (adv payload copied out of the report iterator).
enum GapMsg {
    ParamsApplied,
    CycleComplete,
    Report {
        addr: [u8; 6],
        addr_type: BleAddrType,
        rssi: i8,
        data: heapless::Vec<u8, 62>,
    },
}

/// One requested passive scan cycle.
struct ScanCycleRequest {
    duration_s: u16,
}

/// The coordinator, shared between the ISR frame callback, embassy
/// tasks, and main. ISR-visible, so it lives behind a critical section.
static COORDINATOR: Mutex<RefCell<Option<Coord>>> = Mutex::new(RefCell::new(None));

/// Scan parameters handed from the adapter to the BLE scan future.
static SCAN_PARAMS: Mutex<Cell<Option<ScanParameters>>> = Mutex::new(Cell::new(None));

/// Accepted observations on their way to the counting engine.
static OBSERVATIONS: ObservationChannel = Channel::new();

/// GAP messages from the BLE stack context into the event pump.
static GAP_EVENTS: Channel<CriticalSectionRawMutex, GapMsg, 8> = Channel::new();

/// Scan-cycle requests from the state machine to the BLE scan future.
static SCAN_CYCLES: Channel<CriticalSectionRawMutex, ScanCycleRequest, 2> = Channel::new();

// ── WiFi sniffer callback (ISR context) ─────────────────────────────

/// Called from ISR context by the esp-radio sniffer for every overheard
/// frame. Short and non-blocking: admission filter + channel try_send.
fn sniffer_callback(pkt: esp_radio::wifi::sniffer::PromiscuousPkt<'_>) {
    let frame = FrameDescriptor {
        rssi: pkt.rx_cntl.rssi as i8,
        channel: pkt.rx_cntl.channel as u8,
        data: pkt.data,
    };
    critical_section::with(|cs| {
        if let Some(coord) = COORDINATOR.borrow_ref(cs).as_ref() {
            coord.on_wifi_frame(&frame, &OBSERVATIONS);
        }
    });
}

// ── BLE advertisement reports ───────────────────────────────────────

/// EventHandler for advertisement reports from the trouble-host runner.
/// Called synchronously from the runner — must not block.
struct ScanEventHandler;

impl EventHandler for ScanEventHandler {
    fn on_adv_reports(&self, mut it: LeAdvReportsIter<'_>) {
        while let Some(Ok(report)) = it.next() {
            let Ok(addr) = report.addr.raw().try_into() else {
                continue;
            };
            let addr_type = if report.addr_kind == AddrKind::RANDOM {
                BleAddrType::Random
            } else {
                BleAddrType::Public
            };
            let mut data = heapless::Vec::new();
            let take = report.data.len().min(data.capacity());
            let _ = data.extend_from_slice(&report.data[..take]);
            let _ = GAP_EVENTS.try_send(GapMsg::Report {
                addr,
                addr_type,
                rssi: report.rssi,
                data,
            });
        }
    }
}

// ── Channel rotation task ───────────────────────────────────────────

/// Periodic WiFi channel rotation. The period comes from the coordinator
/// and disappears while the sniffer is stopped.
#[embassy_executor::task]
async fn channel_rotation_task() {
    loop {
        let period = critical_section::with(|cs| {
            COORDINATOR
                .borrow_ref(cs)
                .as_ref()
                .and_then(|c| c.wifi_rotation_period_ms())
        });
        let Some(period) = period else {
            Timer::after(Duration::from_millis(500)).await;
            continue;
        };
        Timer::after(Duration::from_millis(u64::from(period))).await;
        let rotated = critical_section::with(|cs| {
            COORDINATOR
                .borrow_ref_mut(cs)
                .as_mut()
                .map(|c| c.rotate_wifi_channel())
        });
        if let Some(Err(fault)) = rotated {
            panic!("{fault}");
        }
    }
}

// ── Entry point ─────────────────────────────────────────────────────

#[esp_rtos::main]
async fn main(spawner: embassy_executor::Spawner) {
    esp_println::logger::init_logger_from_env();

    let peripherals = esp_hal::init(esp_hal::Config::default());

    // Heap for the BLE + WiFi coex stacks. ESP32 is tighter on DRAM.
    #[cfg(feature = "esp32")]
    {
        esp_alloc::heap_allocator!(size: 64 * 1024);
    }
    #[cfg(not(feature = "esp32"))]
    {
        esp_alloc::heap_allocator!(size: 128 * 1024);
    }

    let timg0 = TimerGroup::new(peripherals.TIMG0);
    let sw_int = SoftwareInterruptControl::new(peripherals.SW_INTERRUPT);
    esp_rtos::start(timg0.timer0, sw_int.software_interrupt0);

    let capture_config = CaptureConfig::new();
    log::info!(
        "paxscan starting, rssi threshold {} dBm, channel map {:#06x}, country {}",
        capture_config.rssi_threshold,
        capture_config.channel_map,
        capture_config.country.as_str()
    );

    // BLE must be initialized BEFORE WiFi for coexistence to work.
    let connector =
        esp_radio::ble::controller::BleConnector::new(peripherals.BT, Default::default())
            .expect("BLE connector init failed");

    let (wifi_controller, wifi_interfaces) =
        esp_radio::wifi::new(peripherals.WIFI, Default::default()).expect("WiFi init failed");

    let coordinator = Coordinator::new(
        capture_config,
        EspWifiRadio {
            controller: wifi_controller,
            sniffer: wifi_interfaces.sniffer,
        },
        EspBleRadio,
    );
    critical_section::with(|cs| {
        COORDINATOR.borrow_ref_mut(cs).replace(coordinator);
    });

    // Bring both capture pipelines up. Driver refusal here is terminal.
    critical_section::with(|cs| {
        let mut coord = COORDINATOR.borrow_ref_mut(cs);
        let coord = coord.as_mut().expect("coordinator installed");
        coord.start_wifi().unwrap_or_else(|e| panic!("{e}"));
        coord.start_ble().unwrap_or_else(|e| panic!("{e}"));
    });

    spawner.spawn(channel_rotation_task()).unwrap();
    log::info!("wifi sniffer armed, channel rotation running");

    let controller: ExternalController<_, 20> = ExternalController::new(connector);

    static HOST_RESOURCES: StaticCell<HostResources<DefaultPacketPool, 1, 2>> = StaticCell::new();
    let resources = HOST_RESOURCES.init(HostResources::new());

    let address = Address::random([0xfe, 0x5c, 0x09, 0x31, 0xd2, 0x70]);
    let stack = trouble_host::new(controller, resources).set_random_address(address);
    let Host {
        central,
        mut runner,
        ..
    } = stack.build();

    log::info!("ble stack built, passive scan cycles begin");

    let scan_handler = ScanEventHandler;

    let _ = embassy_futures::join::join4(
        // ── Runner: drives the BLE stack, delivers adv reports ───────
        async {
            loop {
                if let Err(e) = runner.run_with_handler(&scan_handler).await {
                    log::error!("BLE runner error: {:?}", e);
                    Timer::after(Duration::from_secs(1)).await;
                }
            }
        },
        // ── Scan cycles: one passive scan per state-machine request ──
        async {
            let mut scanner = trouble_host::scan::Scanner::new(central);
            loop {
                let req = SCAN_CYCLES.receive().await;
                let params = critical_section::with(|cs| SCAN_PARAMS.borrow(cs).get());

                let mut config = BleScanConfig::default();
                config.active = false;
                config.timeout = Duration::from_secs(u64::from(req.duration_s));
                if let Some(p) = params {
                    config.interval = Duration::from_micros(u64::from(p.interval) * 625);
                    config.window = Duration::from_micros(u64::from(p.window) * 625);
                }

                match scanner.scan(&config).await {
                    Ok(session) => {
                        // Reports flow through ScanEventHandler while the
                        // session lives; the cycle ends with its duration.
                        Timer::after(Duration::from_secs(u64::from(req.duration_s))).await;
                        drop(session);
                        let _ = GAP_EVENTS.try_send(GapMsg::CycleComplete);
                    }
                    Err(e) => panic!("ble scan start failed: {e:?}"),
                }
            }
        },
        // ── GAP pump: stack context events into the state machine ────
        async {
            loop {
                let msg = GAP_EVENTS.receive().await;
                let result = critical_section::with(|cs| {
                    let mut coord = COORDINATOR.borrow_ref_mut(cs);
                    let Some(coord) = coord.as_mut() else {
                        return Ok(());
                    };
                    match &msg {
                        GapMsg::ParamsApplied => {
                            coord.on_gap_event(GapEvent::ScanParamSetComplete, &OBSERVATIONS)
                        }
                        GapMsg::CycleComplete => {
                            coord.on_gap_event(GapEvent::InquiryComplete, &OBSERVATIONS)
                        }
                        GapMsg::Report {
                            addr,
                            addr_type,
                            rssi,
                            data,
                        } => coord.on_gap_event(
                            GapEvent::InquiryResult(AdvReport {
                                addr: *addr,
                                addr_type: *addr_type,
                                rssi: *rssi,
                                adv_data: data.as_slice(),
                            }),
                            &OBSERVATIONS,
                        ),
                    }
                });
                if let Err(fault) = result {
                    panic!("{fault}");
                }
            }
        },
        // ── Counting engine hand-off ─────────────────────────────────
        async {
            loop {
                let obs = OBSERVATIONS.receive().await;
                // Ingestion point of the external counting/deduplication
                // engine; logged until that engine is wired in.
                log::info!(
                    "observation {} via {}",
                    format_addr(&obs.addr),
                    obs.origin.as_str()
                );
            }
        },
    )
    .await;
}
