//! The live aircraft fleet: per-address state, CPR pairing, TTL eviction.
//!
//! Keyed by ICAO address with an insertion-ordered index. Rendering is
//! decoupled from eviction through the show state: a plane that went
//! silent is displayed one last time before its record is dropped.

use std::collections::HashMap;

use serde_json::{json, Value};

use crate::cpr::{self, Cartesian, Position};
use crate::icao;
use crate::types::{icao_to_string, ModeSMessage};

/// Milliseconds without a message before an aircraft leaves the fleet.
pub const INTERACTIVE_TTL_MS: u64 = 60_000;

/// Maximum age difference of a CPR pair (10 minutes).
///
/// A wrong relative decode would require the aircraft to travel 260 NM in
/// the validity window, impossible below Mach 2.3 over the ground.
pub const CPR_PAIR_MAX_AGE_MS: u64 = 10 * 60 * 1000;

/// Display lifecycle of an aircraft record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shown {
    FirstTime,
    Normal,
    LastTime,
    None,
}

/// One record per observed ICAO address.
#[derive(Debug, Clone)]
pub struct Aircraft {
    pub addr: u32,
    /// Flight number with trailing spaces stripped.
    pub flight: String,
    pub altitude: i32,
    /// Ground speed in knots from the velocity components.
    pub speed: u32,
    pub heading: i32,
    pub heading_is_valid: bool,
    /// Squawk code, base-10 rendering of the octal digits.
    pub identity: u32,
    /// Tick-time (ms) of the first and most recent message.
    pub seen_first: u64,
    pub seen_last: u64,
    pub messages: u32,
    pub show: Shown,

    /// Signal levels of the last four messages.
    pub sig_levels: [f64; 4],
    sig_idx: usize,

    // CPR scratch, one half of a pair each.
    pub odd_cpr_lat: i32,
    pub odd_cpr_lon: i32,
    pub odd_cpr_time: u64,
    pub even_cpr_lat: i32,
    pub even_cpr_lon: i32,
    pub even_cpr_time: u64,

    /// Position resolved from a CPR pair.
    pub position: Option<Position>,
    /// Dead-reckoned position and the tick it was advanced to.
    pub est_position: Option<Position>,
    pub est_seen_last: u64,
    /// Great-circle distance to the home position, meters.
    pub distance: f64,
    pub est_distance: f64,

    pub country: Option<&'static str>,
}

impl Aircraft {
    fn new(addr: u32, now_ms: u64) -> Self {
        Aircraft {
            addr,
            flight: String::new(),
            altitude: 0,
            speed: 0,
            heading: 0,
            heading_is_valid: false,
            identity: 0,
            seen_first: now_ms,
            seen_last: now_ms,
            messages: 0,
            show: Shown::FirstTime,
            sig_levels: [0.0; 4],
            sig_idx: 0,
            odd_cpr_lat: 0,
            odd_cpr_lon: 0,
            odd_cpr_time: 0,
            even_cpr_lat: 0,
            even_cpr_lon: 0,
            even_cpr_time: 0,
            position: None,
            est_position: None,
            est_seen_last: 0,
            distance: 0.0,
            est_distance: 0.0,
            country: icao::lookup_country(addr),
        }
    }

    /// Mean signal level over the ring.
    pub fn avg_sig_level(&self) -> f64 {
        self.sig_levels.iter().sum::<f64>() / self.sig_levels.len() as f64
    }
}

/// The fleet of currently tracked aircraft.
pub struct Tracker {
    aircraft: HashMap<u32, Aircraft>,
    /// Insertion order, for stable iteration and JSON output.
    order: Vec<u32>,
    home_pos: Option<Position>,
    home_pos_cart: Option<Cartesian>,
    pub interactive_ttl_ms: u64,
    /// Unique addresses ever seen.
    pub unique_aircraft: u64,
}

impl Tracker {
    pub fn new(home_pos: Option<Position>, interactive_ttl_ms: u64) -> Self {
        Tracker {
            aircraft: HashMap::new(),
            order: Vec::new(),
            home_pos,
            home_pos_cart: home_pos.map(cpr::spherical_to_cartesian),
            interactive_ttl_ms,
            unique_aircraft: 0,
        }
    }

    pub fn home_pos(&self) -> Option<Position> {
        self.home_pos
    }

    pub fn len(&self) -> usize {
        self.aircraft.len()
    }

    pub fn is_empty(&self) -> bool {
        self.aircraft.is_empty()
    }

    pub fn get(&self, addr: u32) -> Option<&Aircraft> {
        self.aircraft.get(&addr)
    }

    /// Aircraft in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Aircraft> {
        self.order.iter().filter_map(|addr| self.aircraft.get(addr))
    }

    /// Feed one CRC-verified message into the fleet.
    ///
    /// Returns the updated record so the caller can build SBS output from
    /// the accumulated state (speed, heading, resolved position).
    pub fn receive(&mut self, mm: &ModeSMessage, now_ms: u64) -> Option<&Aircraft> {
        if !mm.crc_ok {
            return None;
        }

        let addr = mm.addr();
        if !self.aircraft.contains_key(&addr) {
            self.aircraft.insert(addr, Aircraft::new(addr, now_ms));
            self.order.push(addr);
            self.unique_aircraft += 1;
        }

        let home_pos = self.home_pos;
        let a = self.aircraft.get_mut(&addr).expect("just inserted");

        a.seen_last = now_ms;
        a.messages += 1;
        a.sig_levels[a.sig_idx] = mm.sig_level;
        a.sig_idx = (a.sig_idx + 1) & (a.sig_levels.len() - 1);

        match mm.df {
            5 | 21 => {
                a.identity = mm.identity;
            }
            0 | 4 | 20 => {
                a.altitude = mm.altitude;
            }
            17 => match mm.me_type {
                1..=4 => {
                    a.flight = mm.flight.trim_end().to_string();
                }
                9..=18 | 20..=22 => {
                    a.altitude = mm.altitude;
                    if mm.odd_flag {
                        a.odd_cpr_lat = mm.raw_latitude;
                        a.odd_cpr_lon = mm.raw_longitude;
                        a.odd_cpr_time = now_ms;
                    } else {
                        a.even_cpr_lat = mm.raw_latitude;
                        a.even_cpr_lon = mm.raw_longitude;
                        a.even_cpr_time = now_ms;
                    }

                    let have_pair = a.even_cpr_time > 0 && a.odd_cpr_time > 0;
                    let t_diff = a.even_cpr_time.abs_diff(a.odd_cpr_time);
                    if have_pair && t_diff <= CPR_PAIR_MAX_AGE_MS {
                        if let Some(pos) = cpr::decode_cpr(
                            a.even_cpr_lat,
                            a.even_cpr_lon,
                            a.even_cpr_time,
                            a.odd_cpr_lat,
                            a.odd_cpr_lon,
                            a.odd_cpr_time,
                        ) {
                            a.position = Some(pos);
                            set_home_distance(a, home_pos);
                        }
                    }
                }
                19 if mm.me_subtype == 1 || mm.me_subtype == 2 => {
                    a.speed = mm.velocity;
                    a.heading = mm.heading;
                    a.heading_is_valid = mm.heading_is_valid;
                }
                _ => {}
            },
            _ => {}
        }

        self.aircraft.get(&addr)
    }

    /// Advance the show states and evict silent aircraft.
    ///
    /// Called from the periodic render tick. An expired plane is shown one
    /// final time (`LastTime`) before the next tick removes it.
    pub fn tick(&mut self, now_ms: u64) {
        let ttl = self.interactive_ttl_ms;
        let mut removed = false;

        for a in self.aircraft.values_mut() {
            match a.show {
                Shown::FirstTime => a.show = Shown::Normal,
                Shown::Normal => {
                    if now_ms.saturating_sub(a.seen_last) > ttl {
                        a.show = Shown::LastTime;
                    }
                }
                Shown::LastTime | Shown::None => {
                    a.show = Shown::None;
                    removed = true;
                }
            }
        }

        if removed {
            self.aircraft.retain(|_, a| a.show != Shown::None);
            let aircraft = &self.aircraft;
            self.order.retain(|addr| aircraft.contains_key(addr));
        }

        self.update_estimates(now_ms);
    }

    /// Dead-reckon every aircraft from its last confirmed position.
    fn update_estimates(&mut self, now_ms: u64) {
        let (Some(home), Some(home_cart)) = (self.home_pos, self.home_pos_cart) else {
            return;
        };

        for a in self.aircraft.values_mut() {
            if a.speed == 0 || !a.heading_is_valid {
                continue;
            }
            let Some(est) = a.est_position else { continue };
            if a.est_seen_last < a.seen_last {
                // A fresher real message exists; wait for the next CPR fix.
                continue;
            }

            // Heading into [-180, 180) before converting to radians
            let mut heading_deg = a.heading as f64;
            if a.heading >= 180 {
                heading_deg -= 360.0;
            }
            let heading = heading_deg.to_radians();

            // knots to meters traveled over the elapsed milliseconds
            let elapsed_ms = now_ms.saturating_sub(a.est_seen_last);
            let distance = 0.001852 * a.speed as f64 * elapsed_ms as f64;
            a.est_seen_last = now_ms;

            let mut cpos = cpr::spherical_to_cartesian(est);
            cpos.x += distance * heading.sin();
            cpos.y += distance * heading.cos();

            let new_est = cpr::cartesian_to_spherical(cpos);
            a.est_position = Some(new_est);

            let gc = cpr::great_circle_dist(new_est, home);
            let cart = cpr::cartesian_distance(cpos, home_cart);
            a.est_distance = cpr::closest_to(a.est_distance, gc, cart);
        }
    }

    /// Build the aircraft JSON array served over HTTP.
    ///
    /// The basic form carries what the map needs; the extended form adds
    /// the bookkeeping fields.
    pub fn aircraft_json(&self, extended: bool, now_ms: u64) -> Value {
        let entries: Vec<Value> = self
            .iter()
            .filter(|a| a.position.is_some())
            .map(|a| {
                let pos = a.position.expect("filtered");
                let mut entry = json!({
                    "hex": icao_to_string(a.addr),
                    "flight": a.flight,
                    "lat": pos.lat,
                    "lon": pos.lon,
                    "altitude": a.altitude,
                    "track": a.heading,
                    "speed": a.speed,
                });
                if extended {
                    let obj = entry.as_object_mut().expect("object literal");
                    obj.insert("messages".into(), json!(a.messages));
                    obj.insert(
                        "seen".into(),
                        json!(now_ms.saturating_sub(a.seen_last) / 1000),
                    );
                    obj.insert("distance".into(), json!(a.distance));
                    obj.insert("sig_level".into(), json!(a.avg_sig_level()));
                    obj.insert("country".into(), json!(a.country));
                }
                entry
            })
            .collect();
        Value::Array(entries)
    }
}

/// Refresh the distance to home after a position fix.
fn set_home_distance(a: &mut Aircraft, home_pos: Option<Position>) {
    let (Some(home), Some(pos)) = (home_pos, a.position) else {
        return;
    };

    let distance = cpr::great_circle_dist(pos, home);
    if distance != 0.0 {
        a.distance = distance;
    }

    a.est_position = a.position;
    if a.even_cpr_time > 0 && a.odd_cpr_time > 0 {
        a.est_seen_last = a.even_cpr_time.max(a.odd_cpr_time);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::icao::IcaoCache;
    use crate::stats::Stats;
    use crate::types::hex_decode;

    fn decode(hex: &str) -> ModeSMessage {
        let raw = hex_decode(hex).unwrap();
        let mut cache = IcaoCache::new(1 << 10);
        let mut stats = Stats::new();
        crate::decode::decode_message(&raw, false, &mut cache, &mut stats, 1000)
    }

    fn make_tracker() -> Tracker {
        Tracker::new(None, INTERACTIVE_TTL_MS)
    }

    #[test]
    fn test_new_aircraft_created() {
        let mut tracker = make_tracker();
        let mm = decode("8D4840D6202CC371C32CE0576098");
        let a = tracker.receive(&mm, 1000).expect("record");
        assert_eq!(a.addr, 0x4840D6);
        assert_eq!(a.flight, "KLM1023");
        assert_eq!(a.messages, 1);
        assert_eq!(a.show, Shown::FirstTime);
        assert_eq!(a.country, Some("Netherlands"));
        assert_eq!(tracker.len(), 1);
        assert_eq!(tracker.unique_aircraft, 1);
    }

    #[test]
    fn test_no_duplicate_addresses() {
        let mut tracker = make_tracker();
        let mm = decode("8D4840D6202CC371C32CE0576098");
        tracker.receive(&mm, 1000);
        tracker.receive(&mm, 2000);
        assert_eq!(tracker.len(), 1);
        assert_eq!(tracker.get(0x4840D6).unwrap().messages, 2);
        assert_eq!(tracker.get(0x4840D6).unwrap().seen_first, 1000);
        assert_eq!(tracker.get(0x4840D6).unwrap().seen_last, 2000);
    }

    #[test]
    fn test_bad_crc_ignored() {
        let mut tracker = make_tracker();
        let mut mm = decode("8D4840D6202CC371C32CE0576098");
        mm.crc_ok = false;
        assert!(tracker.receive(&mm, 1000).is_none());
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_cpr_pairing_resolves_position() {
        let mut tracker = make_tracker();

        let even = decode("8D40621D58C382D690C8AC2863A7");
        tracker.receive(&even, 1000);
        assert!(tracker.get(0x40621D).unwrap().position.is_none());

        let odd = decode("8D40621D58C386435CC412692AD6");
        let a = tracker.receive(&odd, 11_000).unwrap();
        let pos = a.position.expect("pair resolves");
        assert!((pos.lat - 52.26578).abs() < 0.001);
        assert!((pos.lon - 3.93892).abs() < 0.001);
        assert_eq!(a.altitude, 38000);
    }

    #[test]
    fn test_cpr_pair_too_old_is_discarded() {
        let mut tracker = make_tracker();

        let even = decode("8D40621D58C382D690C8AC2863A7");
        tracker.receive(&even, 1000);

        // Eleven minutes later: the pair is stale, position stays unset.
        let odd = decode("8D40621D58C386435CC412692AD6");
        let a = tracker.receive(&odd, 1000 + 11 * 60 * 1000).unwrap();
        assert!(a.position.is_none());
    }

    #[test]
    fn test_velocity_updates_speed_and_heading() {
        let mut tracker = make_tracker();
        let mm = decode("8D485020994409940838175B284F");
        let a = tracker.receive(&mm, 1000).unwrap();
        assert_eq!(a.speed, 160);
        assert_eq!(a.heading, 184);
        assert!(a.heading_is_valid);
    }

    #[test]
    fn test_identity_from_df5() {
        let mut tracker = make_tracker();
        let mut mm = ModeSMessage::default();
        mm.df = 5;
        mm.bits = 56;
        mm.crc_ok = true;
        mm.aa = [0x4B, 0x96, 0x96];
        mm.identity = 7500;
        let a = tracker.receive(&mm, 1000).unwrap();
        assert_eq!(a.identity, 7500);
    }

    #[test]
    fn test_show_state_machine_and_eviction() {
        let mut tracker = make_tracker();
        let mm = decode("8D4840D6202CC371C32CE0576098");
        tracker.receive(&mm, 0);

        // First render tick
        tracker.tick(250);
        assert_eq!(tracker.get(0x4840D6).unwrap().show, Shown::Normal);

        // Still inside the TTL
        tracker.tick(60_000);
        assert_eq!(tracker.get(0x4840D6).unwrap().show, Shown::Normal);

        // TTL expired: shown one last time
        tracker.tick(60_250);
        assert_eq!(tracker.get(0x4840D6).unwrap().show, Shown::LastTime);

        // Next tick removes the record
        tracker.tick(60_500);
        assert!(tracker.get(0x4840D6).is_none());
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_fresh_message_resets_ttl() {
        let mut tracker = make_tracker();
        let mm = decode("8D4840D6202CC371C32CE0576098");
        tracker.receive(&mm, 0);
        tracker.tick(250);

        tracker.receive(&mm, 59_000);
        tracker.tick(61_000); // only 2s since last message
        assert_eq!(tracker.get(0x4840D6).unwrap().show, Shown::Normal);
    }

    #[test]
    fn test_signal_level_ring_wraps() {
        let mut tracker = make_tracker();
        let mut mm = decode("8D4840D6202CC371C32CE0576098");
        for i in 0..6 {
            mm.sig_level = i as f64;
            tracker.receive(&mm, 1000 + i);
        }
        let a = tracker.get(0x4840D6).unwrap();
        // Ring holds the last four values: 2, 3, 4, 5
        assert_eq!(a.avg_sig_level(), (2.0 + 3.0 + 4.0 + 5.0) / 4.0);
    }

    #[test]
    fn test_home_distance_set_on_fix() {
        // Home position near the known CPR result.
        let home = Position { lat: 52.0, lon: 4.0 };
        let mut tracker = Tracker::new(Some(home), INTERACTIVE_TTL_MS);

        tracker.receive(&decode("8D40621D58C382D690C8AC2863A7"), 1000);
        let a = tracker
            .receive(&decode("8D40621D58C386435CC412692AD6"), 2000)
            .unwrap();

        // ~30 km from 52.0/4.0 to 52.266/3.939
        assert!(a.distance > 20_000.0 && a.distance < 40_000.0, "{}", a.distance);
        assert!(a.est_position.is_some());
    }

    #[test]
    fn test_dead_reckoning_advances_estimate() {
        let home = Position { lat: 52.0, lon: 4.0 };
        let mut tracker = Tracker::new(Some(home), INTERACTIVE_TTL_MS);

        // Position fix then a velocity message
        tracker.receive(&decode("8D40621D58C382D690C8AC2863A7"), 1000);
        tracker.receive(&decode("8D40621D58C386435CC412692AD6"), 2000);
        let mut vel = decode("8D485020994409940838175B284F");
        vel.aa = [0x40, 0x62, 0x1D];
        tracker.receive(&vel, 2000);

        let before = tracker.get(0x40621D).unwrap().est_position.unwrap();

        // One minute at 160 kts heading 184: the estimate moves west of
        // the last fix (longitude is exact through the cartesian frame).
        tracker.tick(62_000);
        let a = tracker.get(0x40621D).unwrap();
        let after = a.est_position.unwrap();
        assert!(after.lon < before.lon, "heading 184 drifts the estimate west");
        assert!(a.est_distance > 0.0);
        assert_eq!(a.est_seen_last, 62_000);
    }

    #[test]
    fn test_aircraft_json_shapes() {
        let mut tracker = make_tracker();
        tracker.receive(&decode("8D40621D58C382D690C8AC2863A7"), 1000);
        tracker.receive(&decode("8D40621D58C386435CC412692AD6"), 2000);
        // No position yet for this one: filtered out
        tracker.receive(&decode("8D4840D6202CC371C32CE0576098"), 2000);

        let basic = tracker.aircraft_json(false, 5000);
        let arr = basic.as_array().unwrap();
        assert_eq!(arr.len(), 1);
        assert_eq!(arr[0]["hex"], "40621D");
        assert_eq!(arr[0]["altitude"], 38000);
        assert!(arr[0].get("messages").is_none());

        let extended = tracker.aircraft_json(true, 5000);
        let arr = extended.as_array().unwrap();
        assert_eq!(arr[0]["messages"], 2);
        assert_eq!(arr[0]["seen"], 3);
    }
}
