//! Per-frame effect ordering and the shared application state.
//!
//! `user_message` is the single entry point for every frame that passed
//! CRC, whether it came from the demodulator or from the raw network
//! input: count it, feed the fleet, feed the SBS and raw outputs, print.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use modes_core::decode::{self, me_description, CAPABILITY_STR, FLIGHT_STATUS_STR};
use modes_core::sbs;
use modes_core::types::{df_name, hex_decode, hex_encode, icao_to_string, ModeSMessage, Unit};
use modes_core::{IcaoCache, Stats, Tracker};

use crate::config::Settings;
use crate::net::{NetHub, Service};

/// Maximum raw input record length between `*` and `;`.
const MAX_RAW_HEX: usize = 28;

/// Heartbeat record some feeders send on connect.
const RAW_HEARTBEAT: &str = "*0000;";

/// Snapshots of the aircraft JSON kept for the web front-end.
pub const HISTORY_KEEP: usize = 120;

/// Everything the services share.
pub struct App {
    pub settings: Settings,
    pub tracker: Mutex<Tracker>,
    pub icao: Mutex<IcaoCache>,
    pub stats: Mutex<Stats>,
    pub net: NetHub,
    pub exit: AtomicBool,
    /// Data requests served over HTTP; presence of a web client.
    pub http_requests: AtomicU64,
    /// Rolling aircraft-JSON history served as /data/history_N.json.
    pub history: Mutex<Vec<serde_json::Value>>,
}

impl App {
    /// True when anything downstream consumes tracker state.
    fn tracking_wanted(&self) -> bool {
        self.settings.cli.interactive
            || self.net.stats(Service::SbsOut).accepted > 0
            || self.http_requests.load(Ordering::Relaxed) > 0
    }

    /// Append the current extended aircraft JSON to the history ring.
    pub fn snapshot_history(&self, now_ms: u64) {
        let snapshot = self.tracker.lock().unwrap().aircraft_json(true, now_ms);
        let mut history = self.history.lock().unwrap();
        history.push(snapshot);
        if history.len() > HISTORY_KEEP {
            let excess = history.len() - HISTORY_KEEP;
            history.drain(..excess);
        }
    }
}

/// Unix time in milliseconds.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock before epoch")
        .as_millis() as u64
}

/// Unix time in seconds.
pub fn now_secs() -> u64 {
    now_ms() / 1000
}

/// Route one CRC-verified message to every consumer.
pub fn user_message(app: &App, mm: &ModeSMessage) {
    let total = {
        let mut stats = app.stats.lock().unwrap();
        stats.messages_total += 1;
        stats.messages_total
    };

    let max = app.settings.cli.max_messages;
    if max > 0 && total >= max {
        app.exit.store(true, Ordering::Relaxed);
    }

    // Track aircraft in interactive mode or when SBS/HTTP clients exist.
    if app.tracking_wanted() {
        let mut tracker = app.tracker.lock().unwrap();
        if let Some(a) = tracker.receive(mm, now_ms()) {
            if app.net.sbs_clients() > 0 {
                if let Some(line) = sbs::sbs_message(mm, a) {
                    app.net.send_sbs(line.into_bytes());
                }
            }
        }
    }

    // In non-interactive mode, display messages on standard output.
    if !app.settings.cli.interactive && !app.settings.cli.silent {
        if app.settings.cli.only_addr {
            println!("{}", icao_to_string(mm.addr()));
        } else if app.settings.cli.raw {
            print!("{}", mm.raw_line());
        } else {
            display_message(mm);
        }
    }

    // Feed the raw output clients. Active mode has none.
    if (app.settings.cli.net || app.settings.cli.net_only) && !app.settings.cli.net_active {
        app.net.send_raw(mm.raw_line().into_bytes());
    }
}

// ---------------------------------------------------------------------------
// Network input records
// ---------------------------------------------------------------------------

/// Handle one line from the raw input service: `*HEX;`.
///
/// Invalid records are counted and dropped, never propagated.
pub fn process_raw_line(app: &App, line: &str) {
    let line = line.trim_end_matches('\r');

    if line == RAW_HEARTBEAT {
        app.stats.lock().unwrap().heartbeat_raw += 1;
        return;
    }

    let hex = line.trim();
    if hex.len() < 2 {
        app.stats.lock().unwrap().empty_raw += 1;
        return;
    }

    let Some(end) = hex.find(';') else {
        app.stats.lock().unwrap().unrecognized_raw += 1;
        return;
    };
    if !hex.starts_with('*') {
        app.stats.lock().unwrap().unrecognized_raw += 1;
        return;
    }

    let inner = &hex[1..end];
    if inner.len() > MAX_RAW_HEX {
        app.stats.lock().unwrap().unrecognized_raw += 1;
        return;
    }
    let Some(bytes) = hex_decode(inner) else {
        app.stats.lock().unwrap().unrecognized_raw += 1;
        return;
    };
    if bytes.is_empty() {
        app.stats.lock().unwrap().empty_raw += 1;
        return;
    }

    let mm = {
        let mut icao = app.icao.lock().unwrap();
        let mut stats = app.stats.lock().unwrap();
        stats.good_raw += 1;
        decode::decode_message(
            &bytes,
            app.settings.cli.aggressive,
            &mut icao,
            &mut stats,
            now_secs(),
        )
    };

    if mm.crc_ok {
        user_message(app, &mm);
    }
}

/// Handle one line from the SBS input service. Wire format only.
pub fn process_sbs_line(app: &App, line: &str) {
    let mut stats = app.stats.lock().unwrap();
    if sbs::recognize_sbs_line(line) {
        stats.good_sbs += 1;
    } else {
        stats.unrecognized_sbs += 1;
    }
}

// ---------------------------------------------------------------------------
// Stdout display
// ---------------------------------------------------------------------------

/// Pretty-print one decoded message, roughly one block per frame.
pub fn display_message(mm: &ModeSMessage) {
    println!("*{};", hex_encode(mm.payload()));
    print!("CRC: {:06x}", mm.crc);
    if mm.crc_ok {
        println!(" (ok)");
    } else {
        println!(" (wrong)");
    }
    if let Some(bit) = mm.error_bit {
        if bit < 112 {
            println!("Single bit error fixed, bit {bit}");
        } else {
            println!("Two bit error fixed, bits {} and {}", bit & 0xFF, bit >> 8);
        }
    }
    if mm.phase_corrected {
        println!("Phase corrected");
    }

    println!("DF {}: {}.", mm.df, df_name(mm.df));

    match mm.df {
        0 | 16 => {
            println!("  Altitude       : {} {}", mm.altitude, unit_str(mm.unit));
            println!("  ICAO Address   : {}", icao_to_string(mm.addr()));
        }
        4 | 20 | 5 | 21 => {
            println!(
                "  Flight Status  : {}",
                FLIGHT_STATUS_STR[mm.flight_status as usize]
            );
            println!("  DR             : {}", mm.dr_status);
            println!("  UM             : {}", mm.um_status);
            if mm.df == 4 || mm.df == 20 {
                println!("  Altitude       : {} {}", mm.altitude, unit_str(mm.unit));
            } else {
                println!("  Squawk         : {}", mm.identity);
            }
            println!("  ICAO Address   : {}", icao_to_string(mm.addr()));
        }
        11 => {
            println!("  Capability     : {}", CAPABILITY_STR[mm.ca as usize]);
            println!("  ICAO Address   : {}", icao_to_string(mm.addr()));
        }
        17 => {
            println!("  Capability     : {}", CAPABILITY_STR[mm.ca as usize]);
            println!("  ICAO Address   : {}", icao_to_string(mm.addr()));
            println!(
                "  Extended Squitter Type {} Sub {}: {}",
                mm.me_type,
                mm.me_subtype,
                me_description(mm.me_type, mm.me_subtype)
            );
            match (mm.me_type, mm.me_subtype) {
                (1..=4, _) => {
                    println!("    Identification : {}", mm.flight);
                }
                (9..=18, _) => {
                    println!("    F flag   : {}", if mm.odd_flag { "odd" } else { "even" });
                    println!("    T flag   : {}", if mm.utc_flag { "UTC" } else { "non-UTC" });
                    println!("    Altitude : {} {}", mm.altitude, unit_str(mm.unit));
                    println!("    Latitude : {} (not decoded)", mm.raw_latitude);
                    println!("    Longitude: {} (not decoded)", mm.raw_longitude);
                }
                (19, 1..=2) => {
                    println!("    EW velocity       : {}", mm.ew_velocity);
                    println!("    NS velocity       : {}", mm.ns_velocity);
                    println!("    Speed             : {} kt", mm.velocity);
                    println!("    Heading           : {}", mm.heading);
                    println!("    Vertical rate     : {}", mm.vert_rate);
                }
                (19, 3..=4) => {
                    println!("    Heading status: {}", mm.heading_is_valid);
                    println!("    Heading: {}", mm.heading);
                }
                _ => {}
            }
        }
        df => {
            println!("  DF {df} not decoded.");
        }
    }
    println!();
}

fn unit_str(unit: Unit) -> &'static str {
    match unit {
        Unit::Feet => "feet",
        Unit::Meters => "meters",
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
