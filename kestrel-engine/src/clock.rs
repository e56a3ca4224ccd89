//! Monotonic microsecond clock.

use std::sync::OnceLock;
use std::time::Instant;

static ANCHOR: OnceLock<Instant> = OnceLock::new();

/// Returns microseconds of monotonic time, anchored at the first call in
/// this process. Wall-clock adjustments never affect it.
pub fn mono_us() -> u64 {
    ANCHOR.get_or_init(Instant::now).elapsed().as_micros() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn never_goes_backwards() {
        let a = mono_us();
        let b = mono_us();
        assert!(b >= a);
    }
}
