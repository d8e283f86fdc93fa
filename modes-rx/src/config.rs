//! CLI and environment configuration.

use std::path::PathBuf;

use clap::Parser;

use modes_core::cpr::Position;
use modes_core::ModesError;

/// Default service ports.
pub const RAW_OUT_PORT: u16 = 30002;
pub const RAW_IN_PORT: u16 = 30001;
pub const SBS_OUT_PORT: u16 = 30003;
pub const SBS_IN_PORT: u16 = 30004;
pub const HTTP_PORT: u16 = 8080;

/// Timeout for outbound connections in active mode, milliseconds.
pub const CONNECT_TIMEOUT_MS: u64 = 5_000;

/// Environment variable holding the receiver position as `<lat>,<lon>`.
pub const HOMEPOS_ENV: &str = "DUMP1090_HOMEPOS";

#[derive(Parser, Debug)]
#[command(
    name = "modes-rx",
    version,
    about = "1090 MHz Mode S / ADS-B receiver, decoder and network service"
)]
pub struct Cli {
    /// Read raw I/Q samples from this file instead of a device ("-" for stdin)
    #[arg(long)]
    pub infile: Option<PathBuf>,

    /// Replay the input file this many extra times (requires --infile)
    #[arg(long = "loop", default_value_t = 0)]
    pub loops: u64,

    /// Throttle file input to the real sample rate
    #[arg(long)]
    pub throttle: bool,

    /// More CPU, more messages: retry two-bit CRC repair on DF17
    #[arg(long)]
    pub aggressive: bool,

    /// Seconds without a message before an aircraft is dropped
    #[arg(long, default_value_t = 60)]
    pub interactive_ttl: u64,

    /// Interactive fleet view instead of per-message output
    #[arg(long, short = 'i')]
    pub interactive: bool,

    /// No per-message output (network modes)
    #[arg(long)]
    pub silent: bool,

    /// Print frames in the raw `*HEX;` form only
    #[arg(long)]
    pub raw: bool,

    /// Print only the ICAO address of each frame
    #[arg(long)]
    pub only_addr: bool,

    /// Filter near-silence from stdin I/Q to stdout, then exit.
    /// The value is the amplitude level below which samples count as noise.
    #[arg(long)]
    pub strip: Option<i32>,

    /// Use metric units for distances
    #[arg(long)]
    pub metric: bool,

    /// Enable the network services
    #[arg(long)]
    pub net: bool,

    /// Network services without a sample source
    #[arg(long)]
    pub net_only: bool,

    /// Open outbound connections instead of listening (raw/SBS input)
    #[arg(long)]
    pub net_active: bool,

    /// host:port to connect to in active mode (repeatable; raw input)
    #[arg(long = "connect")]
    pub connect: Vec<String>,

    #[arg(long, default_value_t = RAW_OUT_PORT)]
    pub net_ro_port: u16,

    #[arg(long, default_value_t = RAW_IN_PORT)]
    pub net_ri_port: u16,

    #[arg(long, default_value_t = SBS_OUT_PORT)]
    pub net_so_port: u16,

    #[arg(long, default_value_t = SBS_IN_PORT)]
    pub net_si_port: u16,

    #[arg(long, default_value_t = HTTP_PORT)]
    pub net_http_port: u16,

    /// Page "GET /" redirects to
    #[arg(long, default_value = "gmap.html")]
    pub web_page: String,

    /// Directory the HTTP server serves static files from
    #[arg(long, default_value = "web_root")]
    pub web_root: PathBuf,

    /// Stop after this many decoded messages (0 = no limit)
    #[arg(long, default_value_t = 0)]
    pub max_messages: u64,

    /// Sample rate in Hz
    #[arg(long, default_value_t = 2_000_000)]
    pub sample_rate: u32,

    /// Centre frequency in Hz
    #[arg(long, default_value_t = 1_090_000_000)]
    pub freq: u32,
}

/// Resolved runtime settings.
#[derive(Debug)]
pub struct Settings {
    pub cli: Cli,
    /// Receiver position from `DUMP1090_HOMEPOS`, if set and valid.
    pub home_pos: Option<Position>,
}

impl Settings {
    pub fn from_cli(cli: Cli) -> Result<Self, ModesError> {
        let home_pos = match std::env::var(HOMEPOS_ENV) {
            Ok(val) => Some(parse_home_pos(&val)?),
            Err(_) => None,
        };
        Ok(Settings { cli, home_pos })
    }

    /// Network stack wanted at all.
    pub fn net_enabled(&self) -> bool {
        self.cli.net || self.cli.net_only || self.cli.net_active
    }
}

/// Parse `<lat>,<lon>` with basic validity bounds.
pub fn parse_home_pos(val: &str) -> Result<Position, ModesError> {
    let err = || ModesError::InvalidHomePos(val.to_string());

    let (lat, lon) = val.trim().split_once(',').ok_or_else(err)?;
    let lat: f64 = lat.trim().parse().map_err(|_| err())?;
    let lon: f64 = lon.trim().parse().map_err(|_| err())?;

    if lat.abs() > 90.0 || lon.abs() > 180.0 {
        return Err(err());
    }
    Ok(Position { lat, lon })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
