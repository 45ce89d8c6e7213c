use super::transport::{LoopbackTransport, TcpTransport};
use super::*;
use crate::bridge::Bridge;
use crate::bus::sim::{SimCycle, SimPins};
use crate::bus::{BusEngine, EngineTiming};
use crate::hex;
use crate::memory::ROM_SIZE;
use crate::settings::MemorySettingsStore;
use std::io::Write;
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn link() -> Link<LoopbackTransport, MemorySettingsStore> {
    let dispatcher = Dispatcher::new(Bridge::new(), MemorySettingsStore::new()).unwrap();
    Link::new(LoopbackTransport::new(), dispatcher, ResyncPolicy::Always)
}

fn exchange(link: &mut Link<LoopbackTransport, MemorySettingsStore>, input: &[u8]) -> String {
    link.transport_mut().push_input(input);
    link.poll().unwrap();
    String::from_utf8(link.transport_mut().take_output()).unwrap()
}

#[test]
fn test_awake_handshake() {
    let mut link = link();
    assert_eq!(exchange(&mut link, b"?{AWAKE,0}"), "!{AWAKE,0}");
    assert_eq!(link.transport().flushes(), 1);
}

#[test]
fn test_idle_poll_sends_nothing() {
    let mut link = link();
    assert_eq!(link.poll().unwrap(), 0);
    link.transport_mut().push_input(b"?{AWA");
    assert_eq!(link.poll().unwrap(), 0);
    assert_eq!(exchange(&mut link, b"KE,0}"), "!{AWAKE,0}");
}

#[test]
fn test_oversized_frame_yields_single_error() {
    let mut link = link();
    let mut input = b"!{ROMLW,600}0000,".to_vec();
    input.extend(std::iter::repeat(b'A').take(583));
    assert_eq!(exchange(&mut link, &input), "!{ERROR,2}-2");
    assert_eq!(exchange(&mut link, b"?{AWAKE,0}"), "!{AWAKE,0}");
    assert_eq!(link.counts(), (1, 1));
}

#[test]
fn test_malformed_header_then_recovery() {
    let mut link = link();
    assert_eq!(
        exchange(&mut link, b"?{AWAKE,zz}?{AWAKE,0}"),
        "!{ERROR,2}-4!{AWAKE,0}"
    );
}

#[test]
fn test_baud_change_reopens_after_reply() {
    let mut link = link();
    assert_eq!(exchange(&mut link, b"?{SETT,9}BAUD,9600"), "!{SETTING,9}BAUD,9600");
    assert_eq!(link.transport().reopens(), &[9600]);
    assert_eq!(link.dispatcher().settings().baud_rate, 9600);
}

#[test]
fn test_rom_load_round_trip() {
    let mut link = link();
    assert_eq!(
        exchange(&mut link, b"!{ROMLW,13}FFFC,0080EAEA"),
        "!{ROMLW,14}Wrote 4 bytes."
    );
    assert_eq!(exchange(&mut link, b"?{ROMLR,6}FFFC,4"), "!{ROMLR,8}0080EAEA");
}

#[test]
fn test_back_to_back_frames_each_get_a_reply() {
    let mut link = link();
    let out = exchange(&mut link, b"?{CLOCK,1}1?{CLOCK,1}0?{SETTING,4}RAMS");
    assert_eq!(out, "!{CLOCK,1}1!{CLOCK,1}0!{SETTING,9}RAMS,2048");
}

#[test]
fn test_pulse_write_then_ram_read() {
    let mut link = link();
    let bridge = Arc::clone(link.dispatcher().bridge());
    let mut engine = BusEngine::new(
        SimPins::scripted(vec![SimCycle::write(0x0042, 0xC3)]),
        Arc::clone(&bridge),
        EngineTiming {
            settle: Duration::ZERO,
        },
    );

    assert_eq!(exchange(&mut link, b"?{CLOCKPULSE,0}"), "!{CLOCKPULSE,0}");
    assert!(engine.run_cycle().is_some());
    assert_eq!(engine.run_cycle(), None);
    assert_eq!(exchange(&mut link, b"?{RAMLR,6}0042,1"), "!{RAMLR,2}C3");
}

#[test]
fn test_ram_clear_while_engine_runs() {
    let bridge = Bridge::new();
    let dispatcher = Dispatcher::new(Arc::clone(&bridge), MemorySettingsStore::new()).unwrap();
    let mut link = Link::new(LoopbackTransport::new(), dispatcher, ResyncPolicy::Always);
    bridge.memory.ram.load(0, &[0x77; 0x800]).unwrap();

    let stop = Arc::new(AtomicBool::new(false));
    let handle = {
        let bridge = Arc::clone(&bridge);
        let stop = Arc::clone(&stop);
        std::thread::spawn(move || {
            let mut engine = BusEngine::new(
                SimPins::free_running(0x8000),
                bridge,
                EngineTiming {
                    settle: Duration::ZERO,
                },
            );
            engine.run(|| !stop.load(Ordering::SeqCst));
        })
    };

    bridge.control.set_clock(true);
    assert_eq!(
        exchange(&mut link, b"!{RAMCLR,0}"),
        "!{RAMCLR,19}Cleared 2048 bytes."
    );
    assert!(bridge.control.clock_enabled());
    assert!(bridge
        .memory
        .ram
        .read_range(0, 0x800)
        .unwrap()
        .iter()
        .all(|&b| b == 0));

    stop.store(true, Ordering::SeqCst);
    handle.join().unwrap();
}

fn engine_for(
    link: &Link<LoopbackTransport, MemorySettingsStore>,
    script: Vec<SimCycle>,
) -> BusEngine<SimPins> {
    BusEngine::new(
        SimPins::scripted(script),
        Arc::clone(link.dispatcher().bridge()),
        EngineTiming {
            settle: Duration::ZERO,
        },
    )
}

fn request(action: &str, payload: &str) -> Vec<u8> {
    format!("?{{{},{}}}{}", action, payload.len(), payload).into_bytes()
}

#[test]
fn test_every_value_written_on_the_bus_reads_back() {
    let mut link = link();
    let edges = [0x0000u16, 0x0001, 0x0400, 0x07FE, 0x07FF];
    let script = edges
        .iter()
        .flat_map(|&addr| (0..=255u8).map(move |v| SimCycle::write(addr, v)))
        .collect();
    let mut engine = engine_for(&link, script);

    for &addr in &edges {
        for v in 0..=255u8 {
            assert_eq!(exchange(&mut link, b"?{CLOCKPULSE,0}"), "!{CLOCKPULSE,0}");
            assert!(engine.run_cycle().is_some());
            let read = request("RAMLR", &format!("{},1", hex::word_to_hex4(addr)));
            assert_eq!(exchange(&mut link, &read), format!("!{{RAMLR,2}}{:02X}", v));
        }
    }
}

#[test]
fn test_rom_load_round_trips_across_addresses_and_lengths() {
    let mut link = link();
    // 253 bytes is the most one ROMLW payload carries.
    let addresses = [0x0000usize, 0x0001, 0x7FFF, 0xFF00, ROM_SIZE - 253, 0xFFF0];
    let lengths = [1usize, 2, 16, 100, 253];

    for (i, &addr) in addresses.iter().enumerate() {
        for &len in &lengths {
            let data: Vec<u8> = (0..len).map(|k| (k * 7 + addr + i) as u8).collect();
            let mut pairs: String = data.iter().map(|&b| hex::byte_to_hex2(b)).collect();
            if len % 2 == 0 {
                pairs = pairs.to_lowercase();
            }
            let payload = format!("{},{}", hex::word_to_hex4(addr as u16), pairs);
            let load = format!("!{{ROMLW,{}}}{}", payload.len(), payload);
            let read = request("ROMLR", &format!("{},{}", hex::word_to_hex4(addr as u16), len));

            if addr + len > ROM_SIZE {
                assert_eq!(exchange(&mut link, load.as_bytes()), "!{ERROR,2}-3");
                assert_eq!(exchange(&mut link, &read), "!{ERROR,2}-3");
                continue;
            }
            let wrote = format!("Wrote {} bytes.", len);
            assert_eq!(
                exchange(&mut link, load.as_bytes()),
                format!("!{{ROMLW,{}}}{}", wrote.len(), wrote)
            );
            // Same digits back, always upper-case.
            assert_eq!(
                exchange(&mut link, &read),
                format!("!{{ROMLR,{}}}{}", len * 2, pairs.to_uppercase())
            );
        }
    }
}

#[test]
fn test_slow_clock_pushes_bus_samples() {
    let mut link = link();
    let mut engine = engine_for(
        &link,
        vec![SimCycle::write(0x0042, 0xC3), SimCycle::read(0x0042)],
    );
    assert_eq!(
        exchange(&mut link, b"?{SETT,10}TICK,10000"),
        "!{SETTING,10}TICK,10000"
    );
    assert_eq!(exchange(&mut link, b"?{CLOCKPULSE,0}"), "!{CLOCKPULSE,0}");
    assert!(engine.run_cycle().is_some());
    assert_eq!(exchange(&mut link, b""), "!{6502,10}0042,C3,01");
    assert_eq!(exchange(&mut link, b""), "");

    assert_eq!(exchange(&mut link, b"?{SETT,6}TICK,0"), "!{SETTING,6}TICK,0");
    assert_eq!(exchange(&mut link, b"?{CLOCKPULSE,0}"), "!{CLOCKPULSE,0}");
    assert!(engine.run_cycle().is_some());
    assert_eq!(exchange(&mut link, b""), "");
    assert_eq!(exchange(&mut link, b"?{6502,0}"), "!{6502,10}0042,C3,11");
}

#[test]
fn test_new_host_does_not_inherit_partial_frame() {
    let dispatcher = Dispatcher::new(Bridge::new(), MemorySettingsStore::new()).unwrap();
    let mut link = Link::new(LoopbackTransport::new(), dispatcher, ResyncPolicy::HeaderOnly);
    assert_eq!(exchange(&mut link, b"!{ROMLW,13}FFFC,00"), "");
    link.transport_mut().reconnect();
    assert_eq!(exchange(&mut link, b"?{AWAKE,0}"), "!{AWAKE,0}");
    assert_eq!(link.dispatcher().bridge().memory.rom.get(0xFFFC), Some(0));
}

#[test]
fn test_host_that_stops_reading_cannot_stall_poll() {
    let transport = TcpTransport::bind("127.0.0.1:0", 115_200).unwrap();
    let addr = transport.local_addr().unwrap();
    let dispatcher = Dispatcher::new(Bridge::new(), MemorySettingsStore::new()).unwrap();
    let mut link = Link::new(transport, dispatcher, ResyncPolicy::Always);

    let done = Arc::new(AtomicBool::new(false));
    let host = {
        let done = Arc::clone(&done);
        std::thread::spawn(move || {
            let mut stream = TcpStream::connect(addr).unwrap();
            for _ in 0..60_000 {
                if stream.write_all(b"?{ROMLR,8}0000,256").is_err() {
                    break;
                }
            }
            // Stay connected so only the bridge can end the session.
            while !done.load(Ordering::SeqCst) {
                std::thread::sleep(Duration::from_millis(5));
            }
        })
    };

    let deadline = Instant::now() + Duration::from_secs(10);
    let dropped = loop {
        let started = Instant::now();
        let _ = link.poll();
        assert!(started.elapsed() < Duration::from_secs(1));
        if link.transport().session() >= 1 && !link.transport().is_connected() {
            break true;
        }
        if Instant::now() > deadline {
            break false;
        }
    };
    done.store(true, Ordering::SeqCst);
    host.join().unwrap();
    assert!(dropped);
    assert!(link.counts().0 > 0);
}
