//! paxscan — dual-radio passive capture core for people counting.
//!
//! Places a WiFi radio into promiscuous receive and a BLE radio into
//! passive scan, filters the frames the radio firmware delivers, and
//! forwards accepted hardware addresses to an external counting engine.
//! All radio access goes through the driver traits in [`radio`], so this
//! crate contains no platform dependencies and is testable on any host
//! with `cargo test`. The ESP32 firmware binary (`src/main.rs`, behind
//! the chip features) is a thin consumer that wires the real radios to
//! these state machines.
//!
//! Module layers, leaf first:
//! - [`channel`], [`filter`], [`config`] — pure logic, no driver types.
//! - [`radio`], [`sink`] — the consumed driver boundary and the produced
//!   counting-engine boundary.
//! - [`wifi`], [`ble`] — the per-radio capture state machines.
//! - [`coordinator`] — uniform start/stop lifecycle over both radios.

#![cfg_attr(not(test), no_std)]

pub mod ble;
pub mod channel;
pub mod config;
pub mod coordinator;
pub mod filter;
pub mod radio;
pub mod sink;
pub mod wifi;
