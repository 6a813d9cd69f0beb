use core::time::Duration;

use crate::sys::utick;


// parse integers at compile time, panics (at compile time) on anything
// that isn't a plain decimal number
pub(crate) const fn parse_const_utick(s: &str) -> utick {
    let mut v: utick = 0;
    let s = s.as_bytes();

    let mut i = 0;
    while i < s.len() {
        if s[i] >= b'0' && s[i] <= b'9' {
            v = v*10 + (s[i] - b'0') as utick;
        } else {
            panic!("invalid compile-time utick");
        }
        i += 1;
    }

    v
}

// Duration <-> utick, saturating since a Duration can be much larger than
// anything we can schedule
#[inline]
pub(crate) fn duration_to_ticks(d: Duration) -> utick {
    utick::try_from(d.as_micros()).unwrap_or(utick::MAX)
}

#[inline]
pub(crate) fn ticks_to_duration(ticks: utick) -> Duration {
    Duration::from_micros(ticks)
}
