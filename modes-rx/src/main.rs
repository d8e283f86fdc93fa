//! modes-rx: 1090 MHz Mode S receiver, decoder and network service.
//!
//! Wiring: a producer thread fills sample windows, the decoder thread
//! turns them into messages, and the tokio runtime carries the network
//! services, the HTTP server and the 250 ms background tick.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use comfy_table::{Cell, Table};
use crossbeam_channel::bounded;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use modes_core::demod::{self, MAG_LEN};
use modes_core::magnitude;
use modes_core::track::Tracker;
use modes_core::types::icao_to_string;
use modes_core::{IcaoCache, Stats};

mod config;
mod http;
mod interactive;
mod net;
mod router;
mod source;

use config::{Cli, Settings};
use net::Service;
use router::App;

/// Background tick period (fleet eviction, estimates).
const TICK_MS: u64 = 250;

/// Interval between aircraft-history snapshots.
const HISTORY_SNAPSHOT_MS: u64 = 30_000;

fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(cli) {
        error!("{e:#}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let settings = Settings::from_cli(cli).context("invalid configuration")?;

    // Strip mode is a plain stdin-to-stdout filter.
    if let Some(level) = settings.cli.strip {
        let stdin = std::io::stdin().lock();
        let stdout = std::io::stdout().lock();
        source::strip_filter(stdin, stdout, level).context("strip mode")?;
        return Ok(());
    }

    if !magnitude::self_test() {
        anyhow::bail!("magnitude table self-test failed");
    }

    if settings.cli.infile.is_none() && !settings.cli.net_only && !settings.cli.net_active {
        anyhow::bail!("no sample source: pass --infile <file>, --net-only or --net-active");
    }

    if let Some(pos) = settings.home_pos {
        info!("receiver position {:.6}, {:.6}", pos.lat, pos.lon);
    }
    debug!(
        sample_rate = settings.cli.sample_rate,
        freq = settings.cli.freq,
        "tuned"
    );

    let ttl_ms = settings.cli.interactive_ttl * 1000;
    let app = Arc::new(App {
        tracker: Mutex::new(Tracker::new(settings.home_pos, ttl_ms)),
        icao: Mutex::new(IcaoCache::default()),
        stats: Mutex::new(Stats::new()),
        net: net::NetHub::new(),
        exit: AtomicBool::new(false),
        http_requests: AtomicU64::new(0),
        history: Mutex::new(Vec::new()),
        settings,
    });

    // Producer and decoder live on plain threads; everything network-y
    // runs on the tokio runtime below.
    let (decoder_handle, producer_handle) = start_decode_pipeline(&app);

    let runtime = tokio::runtime::Runtime::new().context("start tokio runtime")?;
    runtime.block_on(run_services(app.clone()))?;

    // Runtime is done: make sure both threads see the exit flag and wind
    // down before the stats dump.
    app.exit.store(true, Ordering::Relaxed);
    if let Some(handle) = producer_handle {
        match handle.join() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("sample source: {e}"),
            Err(_) => error!("sample source thread panicked"),
        }
    }
    if let Some(handle) = decoder_handle {
        let _ = handle.join();
    }

    print_final_stats(&app);
    Ok(())
}

type ThreadHandle<T> = std::thread::JoinHandle<T>;

/// Start the sample producer and the decoder thread, when there is a
/// sample source at all.
fn start_decode_pipeline(
    app: &Arc<App>,
) -> (Option<ThreadHandle<()>>, Option<ThreadHandle<std::io::Result<()>>>) {
    let Some(infile) = app.settings.cli.infile.clone() else {
        return (None, None);
    };

    let (tx, rx) = bounded::<Vec<u8>>(source::CHANNEL_DEPTH);
    let exit_flag = Arc::new(AtomicBool::new(false));

    let file_source = source::FileSource::new(
        &infile,
        app.settings.cli.loops,
        app.settings.cli.throttle,
    );
    let producer = source::spawn(file_source, tx, exit_flag.clone());

    let app = app.clone();
    let decoder = std::thread::Builder::new()
        .name("demod".into())
        .spawn(move || {
            let mut mag = vec![0u16; MAG_LEN];
            for window in rx.iter() {
                if app.exit.load(Ordering::Relaxed) {
                    break;
                }

                magnitude::compute_magnitude_vector(&window, &mut mag);

                // The decoder owns the magnitude buffer; the ICAO cache
                // and stats are shared with the raw network input.
                let mut icao = app.icao.lock().unwrap();
                let mut stats = app.stats.lock().unwrap();
                let mut messages = Vec::new();
                demod::detect_modes(
                    &mut mag,
                    app.settings.cli.aggressive,
                    &mut icao,
                    &mut stats,
                    router::now_secs(),
                    &mut |mm| messages.push(mm),
                );
                drop(stats);
                drop(icao);

                for mm in &messages {
                    router::user_message(&app, mm);
                }
            }
            // Decoder done (input exhausted or exit): stop the producer
            // and let the services wind down.
            exit_flag.store(true, Ordering::Relaxed);
            app.exit.store(true, Ordering::Relaxed);
        })
        .expect("spawn decoder thread");

    (Some(decoder), Some(producer))
}

/// Network services, HTTP, background tick; returns when the exit flag
/// is set (Ctrl-C, fatal connect error, input exhausted, max-messages).
async fn run_services(app: Arc<App>) -> anyhow::Result<()> {
    if app.settings.net_enabled() {
        if app.settings.cli.net_active {
            let targets = app.settings.cli.connect.clone();
            net::connect_active(app.clone(), &targets).await?;
        } else {
            tokio::spawn(net::serve_output(
                app.clone(),
                Service::RawOut,
                app.settings.cli.net_ro_port,
            ));
            tokio::spawn(net::serve_raw_input(app.clone(), app.settings.cli.net_ri_port));
            tokio::spawn(net::serve_output(
                app.clone(),
                Service::SbsOut,
                app.settings.cli.net_so_port,
            ));
            tokio::spawn(net::serve_sbs_input(app.clone(), app.settings.cli.net_si_port));
        }
        tokio::spawn(http::serve(app.clone(), app.settings.cli.net_http_port));
    }

    // Background tick: fleet eviction, estimates, display, exit polling.
    let mut tick = tokio::time::interval(Duration::from_millis(TICK_MS));
    let mut last_snapshot = router::now_ms();
    loop {
        tokio::select! {
            _ = tick.tick() => {
                if app.exit.load(Ordering::Relaxed) {
                    return Ok(());
                }
                let now = router::now_ms();
                {
                    let mut tracker = app.tracker.lock().unwrap();
                    tracker.tick(now);
                    if app.settings.cli.interactive {
                        interactive::show(&tracker, app.settings.cli.metric, now);
                    }
                }
                if app.settings.net_enabled()
                    && now.saturating_sub(last_snapshot) >= HISTORY_SNAPSHOT_MS
                {
                    app.snapshot_history(now);
                    last_snapshot = now;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("caught SIGINT, shutting down");
                app.exit.store(true, Ordering::Relaxed);
                return Ok(());
            }
        }
    }
}

/// Final statistics dump, one table plus the unrecognized-ME histogram
/// and any service errors.
fn print_final_stats(app: &App) {
    let stats = app.stats.lock().unwrap();
    let tracker = app.tracker.lock().unwrap();

    let mut table = Table::new();
    table.set_header(vec!["Counter", "Value"]);
    for (name, value) in [
        ("Valid preambles", stats.valid_preamble),
        ("Demodulated", stats.demodulated),
        ("Good CRC", stats.good_crc),
        ("Bad CRC", stats.bad_crc),
        ("Fixed", stats.fixed),
        ("  single bit", stats.single_bit_fix),
        ("  two bits", stats.two_bits_fix),
        ("Phase corrected", stats.out_of_phase),
        ("Messages routed", stats.messages_total),
        ("Raw input: good", stats.good_raw),
        ("Raw input: empty", stats.empty_raw),
        ("Raw input: unrecognized", stats.unrecognized_raw),
        ("Raw input: heartbeats", stats.heartbeat_raw),
        ("SBS input: good", stats.good_sbs),
        ("SBS input: unrecognized", stats.unrecognized_sbs),
        ("Unique aircraft", tracker.unique_aircraft),
    ] {
        table.add_row(vec![Cell::new(name), Cell::new(value)]);
    }
    eprintln!("{table}");

    let unrecognized = stats.unrecognized_me_entries();
    if !unrecognized.is_empty() {
        eprintln!("Unrecognized ME types:");
        for (me_type, me_subtype, count) in unrecognized {
            eprintln!("  {me_type}/{me_subtype}: {count}");
        }
    }

    if app.settings.net_enabled() {
        for service in Service::ALL {
            let s = app.net.stats(service);
            if s.accepted > 0 || s.last_err.is_some() {
                eprintln!(
                    "{}: {} accepted, {} removed, {} bytes in, {} bytes out{}",
                    service.describe(),
                    s.accepted,
                    s.removed,
                    s.bytes_in,
                    s.bytes_out,
                    s.last_err
                        .as_deref()
                        .map(|e| format!(", last error: {e}"))
                        .unwrap_or_default(),
                );
            }
        }
    }

    if tracker.len() > 0 {
        let mut fleet = Table::new();
        fleet.set_header(vec!["ICAO", "Flight", "Altitude", "Speed", "Msgs"]);
        for a in tracker.iter() {
            fleet.add_row(vec![
                Cell::new(icao_to_string(a.addr)),
                Cell::new(&a.flight),
                Cell::new(a.altitude),
                Cell::new(a.speed),
                Cell::new(a.messages),
            ]);
        }
        eprintln!("{fleet}");
    }
}
