//! Opportunistic parsing of the encoder's stderr stats stream.
//!
//! ffmpeg interleaves stats lines like
//! `size=     256kB time=00:01:23.45 bitrate= 983.0kbits/s speed=30x`
//! with free-form diagnostics. Parsing is best-effort by design: a line
//! without a usable marker is simply not progress, never an error.

/// Extract the transcoded position in seconds from a stats line, if it
/// carries one.
pub fn parse_encode_progress(line: &str) -> Option<f64> {
    let rest = line.split("time=").nth(1)?;
    let token = rest.trim_start().split_whitespace().next()?;
    parse_clock(token)
}

/// Parse an `HH:MM:SS.cc` clock value. ffmpeg emits `N/A` and huge
/// negative clocks before the first frame lands; both count as "no
/// progress yet".
fn parse_clock(token: &str) -> Option<f64> {
    if token.starts_with('-') {
        return None;
    }

    let mut parts = token.split(':');
    let hours: f64 = parts.next()?.parse().ok()?;
    let minutes: f64 = parts.next()?.parse().ok()?;
    let seconds: f64 = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }

    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}
