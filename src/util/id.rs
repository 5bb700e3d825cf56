use std::time::{Duration, SystemTime};

const ALPHABET: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Short, mostly-unique run id composed from time and pid.
pub fn create_run_id() -> String {
    let now = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_secs(0));
    let pid = std::process::id() as u128;
    let mix = now.as_nanos() ^ pid;
    // last 40 bits are plenty for a per-host throwaway name
    base36((mix & 0xff_ffff_ffff) as u64)
}

fn base36(mut v: u64) -> String {
    if v == 0 {
        return "0".to_string();
    }
    let mut s = String::new();
    while v > 0 {
        s.push(ALPHABET[(v % 36) as usize] as char);
        v /= 36;
    }
    s.chars().rev().collect()
}

/// Container name for a validation sandbox; docker names allow `[a-zA-Z0-9][a-zA-Z0-9_.-]`.
pub fn sandbox_container_name(run_id: &str) -> String {
    format!("derivebox-check-{run_id}")
}
