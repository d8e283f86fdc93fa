//! Interactive fleet view: a table of the live aircraft, refreshed from
//! the background tick.
//!
//! Planes appear as soon as their first message arrives and are shown one
//! final time after their TTL expires, so a disappearing aircraft is
//! visible leaving rather than silently gone.

use std::io::Write;

use comfy_table::{Cell, Table};

use modes_core::track::{Shown, Tracker};
use modes_core::types::icao_to_string;

/// Meters per kilometer / per nautical mile, for the distance column.
const METERS_PER_KM: f64 = 1000.0;
const METERS_PER_NM: f64 = 1852.0;

/// Distance to home as a display string, empty when unknown.
pub fn format_distance(meters: f64, metric: bool) -> String {
    if meters <= 0.0 {
        return String::new();
    }
    let divisor = if metric { METERS_PER_KM } else { METERS_PER_NM };
    format!("{:.1}", meters / divisor)
}

/// Render the fleet table.
pub fn render(tracker: &Tracker, metric: bool, now_ms: u64) -> String {
    let unit = if metric { "km" } else { "Nm" };

    let mut table = Table::new();
    table.set_header(vec![
        "ICAO".to_string(),
        "Flight".to_string(),
        "Squawk".to_string(),
        "Altitude".to_string(),
        "Speed".to_string(),
        "Hdg".to_string(),
        "Lat".to_string(),
        "Lon".to_string(),
        format!("Dist ({unit})"),
        "Country".to_string(),
        "Msgs".to_string(),
        "Seen".to_string(),
    ]);

    for a in tracker.iter() {
        if a.show == Shown::None {
            continue;
        }
        let (lat, lon) = match a.position {
            Some(pos) => (format!("{:.4}", pos.lat), format!("{:.4}", pos.lon)),
            None => (String::new(), String::new()),
        };
        let heading = if a.heading_is_valid {
            a.heading.to_string()
        } else {
            String::new()
        };
        let squawk = if a.identity != 0 {
            format!("{:04}", a.identity)
        } else {
            String::new()
        };
        let seen = format!("{}s", now_ms.saturating_sub(a.seen_last) / 1000);
        let marker = match a.show {
            Shown::FirstTime => "+",
            Shown::LastTime => "-",
            _ => "",
        };

        table.add_row(vec![
            Cell::new(format!("{}{}", marker, icao_to_string(a.addr))),
            Cell::new(&a.flight),
            Cell::new(squawk),
            Cell::new(a.altitude),
            Cell::new(a.speed),
            Cell::new(heading),
            Cell::new(lat),
            Cell::new(lon),
            Cell::new(format_distance(a.distance, metric)),
            Cell::new(a.country.unwrap_or("")),
            Cell::new(a.messages),
            Cell::new(seen),
        ]);
    }

    table.to_string()
}

/// Clear the terminal and draw the current fleet.
pub fn show(tracker: &Tracker, metric: bool, now_ms: u64) {
    let mut out = std::io::stdout().lock();
    // Home + clear to end of screen
    let _ = write!(out, "\x1b[H\x1b[2J");
    let _ = writeln!(
        out,
        "modes-rx: {} aircraft tracked ({} seen this run)",
        tracker.len(),
        tracker.unique_aircraft
    );
    let _ = writeln!(out, "{}", render(tracker, metric, now_ms));
    let _ = out.flush();
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use modes_core::track::INTERACTIVE_TTL_MS;
    use modes_core::types::ModeSMessage;
    use modes_core::{IcaoCache, Stats};

    fn decode(hex: &str) -> ModeSMessage {
        let raw = modes_core::hex_decode(hex).unwrap();
        let mut cache = IcaoCache::new(1 << 10);
        let mut stats = Stats::new();
        modes_core::decode_message(&raw, false, &mut cache, &mut stats, 1)
    }

    #[test]
    fn test_format_distance() {
        assert_eq!(format_distance(0.0, true), "");
        assert_eq!(format_distance(1852.0, false), "1.0");
        assert_eq!(format_distance(2500.0, true), "2.5");
    }

    #[test]
    fn test_render_contains_aircraft() {
        let mut tracker = Tracker::new(None, INTERACTIVE_TTL_MS);
        tracker.receive(&decode("8D4840D6202CC371C32CE0576098"), 1000);

        let out = render(&tracker, false, 4000);
        assert!(out.contains("4840D6"));
        assert!(out.contains("KLM1023"));
        assert!(out.contains("Netherlands"));
        assert!(out.contains("3s"));
        // New aircraft carries the first-time marker until a tick
        assert!(out.contains("+4840D6"));
    }

    #[test]
    fn test_render_normal_after_tick() {
        let mut tracker = Tracker::new(None, INTERACTIVE_TTL_MS);
        tracker.receive(&decode("8D4840D6202CC371C32CE0576098"), 1000);
        tracker.tick(1250);

        let out = render(&tracker, false, 1250);
        assert!(out.contains("4840D6"));
        assert!(!out.contains("+4840D6"));
    }

    #[test]
    fn test_render_leaving_marker() {
        let mut tracker = Tracker::new(None, INTERACTIVE_TTL_MS);
        tracker.receive(&decode("8D4840D6202CC371C32CE0576098"), 0);
        tracker.tick(250);
        tracker.tick(INTERACTIVE_TTL_MS + 500);

        let out = render(&tracker, false, INTERACTIVE_TTL_MS + 500);
        assert!(out.contains("-4840D6"), "expired plane shows the leaving marker");
    }

    #[test]
    fn test_render_empty_fleet() {
        let tracker = Tracker::new(None, INTERACTIVE_TTL_MS);
        let out = render(&tracker, true, 0);
        assert!(out.contains("Dist (km)"));
    }
}
