//! Environment-driven runtime knobs, each read once.

use std::sync::OnceLock;

use crate::link::frame::ResyncPolicy;

fn env_flag(key: &str, default: bool) -> bool {
    std::env::var(key)
        .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "on" | "ON"))
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(default)
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

pub fn quiet() -> bool {
    static ON: OnceLock<bool> = OnceLock::new();
    *ON.get_or_init(|| env_flag("QUIET", false))
}

// Level-shifter settle time between enabling a buffer and sampling it.
pub fn settle_ns() -> u64 {
    static V: OnceLock<u64> = OnceLock::new();
    *V.get_or_init(|| env_u64("BRIDGE_SETTLE_NS", 100))
}

pub fn listen_addr() -> String {
    static V: OnceLock<String> = OnceLock::new();
    V.get_or_init(|| env_string("BRIDGE_LISTEN", "127.0.0.1:6502"))
        .clone()
}

pub fn settings_path() -> String {
    static V: OnceLock<String> = OnceLock::new();
    V.get_or_init(|| env_string("BRIDGE_SETTINGS", "bridge6502.settings"))
        .clone()
}

// "header" lets payloads carry '!'/'?' verbatim; anything else keeps the
// always-resync behaviour.
pub fn resync_policy() -> ResyncPolicy {
    static V: OnceLock<ResyncPolicy> = OnceLock::new();
    *V.get_or_init(|| {
        match env_string("BRIDGE_RESYNC", "always")
            .to_ascii_lowercase()
            .as_str()
        {
            "header" | "header-only" => ResyncPolicy::HeaderOnly,
            _ => ResyncPolicy::Always,
        }
    })
}
