use std::env;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use bridge6502::bus::sim::SimPins;
use bridge6502::{
    debug_flags, shutdown, Bridge, BusEngine, Dispatcher, EngineTiming, FileSettingsStore, Link,
    TcpTransport,
};

struct Options {
    rom: Option<PathBuf>,
    rom_base: usize,
    run: bool,
}

fn parse_addr(s: &str) -> Option<usize> {
    let s = s.trim();
    match s.strip_prefix("0x").or_else(|| s.strip_prefix('$')) {
        Some(hex) => usize::from_str_radix(hex, 16).ok(),
        None => s.parse().ok(),
    }
}

fn usage(program: &str) {
    eprintln!(
        "Usage: {} [--listen ADDR] [--settings PATH] [--rom FILE] [--rom-base ADDR] [--run]",
        program
    );
    eprintln!("Environment: BRIDGE_LISTEN, BRIDGE_SETTINGS, BRIDGE_SETTLE_NS, BRIDGE_RESYNC, QUIET");
}

fn value_of(args: &[String], i: usize) -> &str {
    match args.get(i + 1) {
        Some(v) => v,
        None => {
            eprintln!("{} requires a value", args[i]);
            process::exit(2);
        }
    }
}

// Flags override the environment, so this runs before any debug_flags read.
fn parse_args() -> Options {
    let args: Vec<String> = env::args().collect();
    let program = args.first().map(String::as_str).unwrap_or("bridge6502");
    let mut opts = Options {
        rom: None,
        rom_base: 0,
        run: false,
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => {
                usage(program);
                process::exit(0);
            }
            "--listen" => {
                env::set_var("BRIDGE_LISTEN", value_of(&args, i));
                i += 2;
            }
            "--settings" => {
                env::set_var("BRIDGE_SETTINGS", value_of(&args, i));
                i += 2;
            }
            "--rom" => {
                opts.rom = Some(PathBuf::from(value_of(&args, i)));
                i += 2;
            }
            "--rom-base" => {
                let v = value_of(&args, i);
                opts.rom_base = match parse_addr(v) {
                    Some(a) => a,
                    None => {
                        eprintln!("--rom-base: bad address {:?}", v);
                        process::exit(2);
                    }
                };
                i += 2;
            }
            "--run" => {
                opts.run = true;
                i += 1;
            }
            s => {
                eprintln!("Unknown option: {}", s);
                usage(program);
                process::exit(2);
            }
        }
    }
    opts
}

fn main() {
    let opts = parse_args();
    let default_level = if debug_flags::quiet() { "warn" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    shutdown::install();
    run_bridge(opts);

    let code = shutdown::exit_code();
    if code != 0 {
        process::exit(code);
    }
}

fn run_bridge(opts: Options) {
    let bridge = Bridge::new();

    let settings_path = debug_flags::settings_path();
    let dispatcher = match Dispatcher::new(
        Arc::clone(&bridge),
        FileSettingsStore::new(&settings_path),
    ) {
        Ok(d) => d,
        Err(e) => {
            log::error!("cannot load settings from {}: {}", settings_path, e);
            shutdown::fail(1);
            return;
        }
    };

    if let Some(path) = &opts.rom {
        let loaded = std::fs::read(path)
            .map_err(|e| e.to_string())
            .and_then(|data| {
                bridge
                    .memory
                    .rom
                    .load(opts.rom_base, &data)
                    .map(|_| data.len())
                    .map_err(|e| e.to_string())
            });
        match loaded {
            Ok(n) => log::info!(
                "loaded {} bytes from {} at {:04X}",
                n,
                path.display(),
                opts.rom_base
            ),
            Err(e) => {
                log::error!("cannot load ROM {}: {}", path.display(), e);
                shutdown::fail(1);
                return;
            }
        }
    }

    let listen = debug_flags::listen_addr();
    let transport = match TcpTransport::bind(&listen, dispatcher.settings().baud_rate) {
        Ok(t) => t,
        Err(e) => {
            log::error!("cannot listen on {}: {}", listen, e);
            shutdown::fail(1);
            return;
        }
    };

    // No target hardware on a host build: a simulated CPU fetches from the
    // reset vector onward.
    let start = u16::from_le_bytes([bridge.memory.fetch(0xFFFC), bridge.memory.fetch(0xFFFD)]);
    let engine = {
        let bridge = Arc::clone(&bridge);
        std::thread::Builder::new()
            .name("bus-engine".into())
            .spawn(move || {
                let mut engine =
                    BusEngine::new(SimPins::free_running(start), bridge, EngineTiming::from_env());
                engine.run(shutdown::keep_running);
            })
    };
    let engine = match engine {
        Ok(handle) => handle,
        Err(e) => {
            log::error!("cannot start bus engine: {}", e);
            shutdown::fail(1);
            return;
        }
    };

    if opts.run {
        bridge.control.set_clock(true);
    }
    if !debug_flags::quiet() {
        println!(
            "{} on {} (reset vector {:04X})",
            dispatcher.settings().name,
            listen,
            start
        );
    }

    let mut link = Link::new(transport, dispatcher, debug_flags::resync_policy());
    while !shutdown::should_quit() {
        match link.poll() {
            Ok(0) => std::thread::sleep(Duration::from_millis(1)),
            Ok(_) => {}
            Err(e) => {
                log::warn!("link error: {}", e);
                std::thread::sleep(Duration::from_millis(10));
            }
        }
    }

    let (frames, errors) = link.counts();
    log::info!("shutting down after {} frames ({} rejected)", frames, errors);
    shutdown::request_quit();
    if engine.join().is_err() {
        log::error!("bus engine thread panicked");
        shutdown::fail(1);
    }
}
