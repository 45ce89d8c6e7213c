use std::env;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::process;
use std::time::Duration;

use bridge6502::hex;
use bridge6502::link::frame::{Frame, FrameKind, FrameParser, PAYLOAD_CAPACITY};
use bridge6502::{debug_flags, BankId};

// Memory dump client for a running bridge.
// Usage:
//   cargo run --bin dump_ram -- --bank ram --start 0x0000 --len 0x0200
// Also from the environment: BRIDGE_LISTEN, DUMP_START, DUMP_LEN

// Bytes per request; keeps each reply within one payload-sized read.
const CHUNK: usize = PAYLOAD_CAPACITY / 2;

fn parse_u32_hex_or_dec(s: &str) -> Option<u32> {
    let s = s.trim();
    if let Some(stripped) = s.strip_prefix("0x") {
        u32::from_str_radix(stripped, 16).ok()
    } else {
        s.parse().ok()
    }
}

struct Args {
    addr: String,
    bank: BankId,
    start: u32,
    len: u32,
    nonzero_only: bool,
}

fn parse_args() -> Args {
    let mut args = env::args().skip(1);
    let mut addr: Option<String> = None;
    let mut bank = BankId::Ram;
    let mut start: Option<u32> = None;
    let mut len: Option<u32> = None;
    let mut nonzero_only = false;

    while let Some(a) = args.next() {
        match a.as_str() {
            "--addr" | "--connect" => addr = args.next(),
            "--bank" => {
                bank = match args.next().as_deref() {
                    Some("ram") | Some("RAM") => BankId::Ram,
                    Some("rom") | Some("ROM") => BankId::Rom,
                    other => {
                        eprintln!("--bank expects ram or rom, got {:?}", other);
                        process::exit(2);
                    }
                }
            }
            "--start" => start = args.next().as_deref().and_then(parse_u32_hex_or_dec),
            "--len" | "--length" => len = args.next().as_deref().and_then(parse_u32_hex_or_dec),
            "--nonzero" | "--nz" => nonzero_only = true,
            other => {
                eprintln!("Unknown option: {}", other);
                process::exit(2);
            }
        }
    }

    let from_env = |key: &str| env::var(key).ok().and_then(|s| parse_u32_hex_or_dec(&s));
    Args {
        addr: addr.unwrap_or_else(debug_flags::listen_addr),
        bank,
        start: start.or_else(|| from_env("DUMP_START")).unwrap_or(0x0000),
        len: len.or_else(|| from_env("DUMP_LEN")).unwrap_or(0x0200),
        nonzero_only,
    }
}

fn request(
    stream: &mut TcpStream,
    parser: &mut FrameParser,
    frame: &Frame,
) -> Result<Frame, String> {
    stream
        .write_all(&frame.encode())
        .map_err(|e| format!("send failed: {}", e))?;
    let mut buf = [0u8; 512];
    loop {
        let n = stream
            .read(&mut buf)
            .map_err(|e| format!("receive failed: {}", e))?;
        if n == 0 {
            return Err("bridge closed the connection".into());
        }
        for &b in &buf[..n] {
            match parser.push(b) {
                Some(Ok(reply)) => return Ok(reply),
                Some(Err(e)) => return Err(format!("bad reply: {}", e)),
                None => {}
            }
        }
    }
}

fn fetch(args: &Args) -> Result<Vec<u8>, String> {
    let bank_len = match args.bank {
        BankId::Ram => bridge6502::RAM_SIZE,
        BankId::Rom => bridge6502::ROM_SIZE,
    };
    let start = args.start as usize;
    if start >= bank_len {
        return Err(format!(
            "{} start 0x{:04X} is outside {} size (0x{:05X})",
            args.bank.name(),
            start,
            args.bank.name(),
            bank_len
        ));
    }
    let end = (start + args.len as usize).min(bank_len);

    let mut stream =
        TcpStream::connect(&args.addr).map_err(|e| format!("connect {}: {}", args.addr, e))?;
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .map_err(|e| e.to_string())?;
    let mut parser = FrameParser::default();
    let action = match args.bank {
        BankId::Ram => "RAMLR",
        BankId::Rom => "ROMLR",
    };

    let mut data = Vec::with_capacity(end - start);
    let mut addr = start;
    while addr < end {
        let count = (end - addr).min(CHUNK);
        let payload = format!("{},{}", hex::word_to_hex4(addr as u16), count);
        let reply = request(
            &mut stream,
            &mut parser,
            &Frame::new(FrameKind::Request, action, payload),
        )?;
        if reply.action != action {
            return Err(format!(
                "{} at {:04X} failed: {}{}",
                action,
                addr,
                reply.action,
                reply.payload_str().map(|s| format!(" {}", s)).unwrap_or_default()
            ));
        }
        let bytes = hex::decode_pairs(&reply.payload).map_err(|e| e.to_string())?;
        if bytes.len() != count {
            return Err(format!("short reply: {} of {} bytes", bytes.len(), count));
        }
        data.extend(bytes);
        addr += count;
    }
    Ok(data)
}

fn main() {
    env_logger::init();
    let args = parse_args();
    let data = match fetch(&args) {
        Ok(d) => d,
        Err(e) => {
            eprintln!("{}", e);
            process::exit(1);
        }
    };

    println!(
        "{} dump: start=0x{:04X} len=0x{:04X}{}",
        args.bank.name(),
        args.start,
        data.len(),
        if args.nonzero_only { " [nonzero only]" } else { "" }
    );
    for (i, line) in data.chunks(16).enumerate() {
        if args.nonzero_only && line.iter().all(|&b| b == 0) {
            continue;
        }
        print!("{:04X}:", args.start as usize + i * 16);
        for b in line {
            print!(" {:02X}", b);
        }
        println!();
    }
}
