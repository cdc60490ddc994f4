//! Coarse resident-memory sampling for the `process_memory_bytes` gauge.

/// Resident set size of the current process in bytes.
///
/// Reads `VmRSS` from `/proc/self/status`. Returns `None` where procfs is
/// unavailable; callers skip the recording in that case.
pub fn resident_bytes() -> Option<u64> {
    let status = std::fs::read_to_string("/proc/self/status").ok()?;
    parse_vm_rss(&status)
}

fn parse_vm_rss(status: &str) -> Option<u64> {
    let line = status.lines().find(|l| l.starts_with("VmRSS:"))?;
    let mut fields = line["VmRSS:".len()..].split_whitespace();
    let value: u64 = fields.next()?.parse().ok()?;
    match fields.next() {
        Some("kB") | None => value.checked_mul(1024),
        Some(_) => None,
    }
}
