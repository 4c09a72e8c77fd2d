/// `delay(attempts, base, cap) = min(base^attempts, cap)`.
///
/// `attempts` is the count *after* incrementing on failure, so the first
/// retry is computed with `attempts = 1`. Integer arithmetic, no jitter:
/// growth must stay monotonic up to the cap, and the simplest way to
/// guarantee that is to not add any in the first place.
pub fn delay_seconds(attempts: i64, base: i64, cap: i64) -> i64 {
    let attempts = attempts.max(1) as u32;
    let raw = base.checked_pow(attempts).unwrap_or(i64::MAX);
    raw.min(cap).max(0)
}
