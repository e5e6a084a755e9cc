//! `HH:MM:SS[.mmm]` timecode parsing, formatting and shifting.
//!
//! Nothing in this module fails loudly: unparsable input yields `None`
//! (from [`parse`]) or is passed through untouched (from [`shift`]), because
//! these functions run while a recording is live.

/// The session-start timecode.
pub const ZERO: &str = "00:00:00";

const MS_PER_SECOND: u64 = 1_000;
const MS_PER_MINUTE: u64 = 60 * MS_PER_SECOND;
const MS_PER_HOUR: u64 = 60 * MS_PER_MINUTE;

/// Parses `H+:MM:SS` or `H+:MM:SS.fff` into seconds.
///
/// Hours may have any number of digits; minutes and seconds must be two
/// digits below 60 and the fraction, when present, exactly three digits.
pub fn parse(text: &str) -> Option<f64> {
    let mut parts = text.trim().split(':');
    let (hours, minutes, seconds) = (parts.next()?, parts.next()?, parts.next()?);
    if parts.next().is_some() {
        return None;
    }

    let hours: u64 = digits(hours, None)?;
    let minutes: u64 = digits(minutes, Some(2))?;
    let (whole, millis) = match seconds.split_once('.') {
        Some((whole, fraction)) => (whole, digits(fraction, Some(3))?),
        None => (seconds, 0),
    };
    let whole: u64 = digits(whole, Some(2))?;
    if minutes >= 60 || whole >= 60 {
        return None;
    }

    let total_ms = hours
        .checked_mul(MS_PER_HOUR)?
        .checked_add(minutes * MS_PER_MINUTE + whole * MS_PER_SECOND + millis)?;
    #[expect(
        clippy::cast_precision_loss,
        reason = "timecodes never approach 2^52 milliseconds"
    )]
    let seconds = total_ms as f64 / 1_000.0;
    Some(seconds)
}

/// Parses an all-ASCII-digit field, optionally of an exact width.
fn digits(field: &str, width: Option<usize>) -> Option<u64> {
    if field.is_empty() || !field.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if width.is_some_and(|w| field.len() != w) {
        return None;
    }
    field.parse().ok()
}

/// Formats seconds as `HH:MM:SS`, or `HH:MM:SS.fff` when the value has a
/// non-zero millisecond part.
///
/// The value is rounded to the nearest millisecond first. Negative values
/// carry a leading `-`; a value that rounds to zero never does.
pub fn format(seconds: f64) -> String {
    let total_ms = round_to_millis(seconds);
    let sign = if total_ms < 0 { "-" } else { "" };
    let total_ms = total_ms.unsigned_abs();

    let hours = total_ms / MS_PER_HOUR;
    let minutes = (total_ms % MS_PER_HOUR) / MS_PER_MINUTE;
    let second_ms = total_ms % MS_PER_MINUTE;
    let (secs, millis) = (second_ms / MS_PER_SECOND, second_ms % MS_PER_SECOND);

    if millis == 0 {
        format!("{sign}{hours:02}:{minutes:02}:{secs:02}")
    } else {
        format!("{sign}{hours:02}:{minutes:02}:{secs:02}.{millis:03}")
    }
}

#[expect(
    clippy::cast_possible_truncation,
    reason = "saturating float-to-int conversion is the intended clamp"
)]
fn round_to_millis(seconds: f64) -> i64 {
    if seconds.is_finite() {
        (seconds * 1_000.0).round() as i64
    } else {
        0
    }
}

/// Adds `offset_seconds` to a timecode.
///
/// Unparsable timecodes are returned unchanged.
pub fn shift(text: &str, offset_seconds: f64) -> String {
    parse(text).map_or_else(|| text.to_string(), |base| format(base + offset_seconds))
}

/// Shifts a timecode, keeping the original when the shift would pin a
/// non-zero marker to the session start.
///
/// Without this, a negative offset collapses several early markers onto
/// `00:00:00`.
pub fn shift_preserving_nonzero(text: &str, offset_seconds: f64) -> String {
    let shifted = shift(text, offset_seconds);
    if shifted == ZERO && !text.is_empty() && text != ZERO {
        return text.to_string();
    }
    shifted
}

/// Tolerant clean-up of a logged timecode before shifting.
///
/// - `H:M:S` with unpadded digit fields is zero-padded;
/// - any other well-formed timecode is re-rendered canonically;
/// - a bare non-negative number is read as whole seconds (truncated);
/// - everything else becomes `00:00:00`.
pub fn normalize(text: &str) -> String {
    let text = text.trim();
    if text.is_empty() {
        return ZERO.to_string();
    }

    let parts: Vec<&str> = text.split(':').collect();
    if parts.len() == 3
        && parts
            .iter()
            .all(|p| !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit()))
    {
        return format!("{:0>2}:{:0>2}:{:0>2}", parts[0], parts[1], parts[2]);
    }

    if let Some(seconds) = parse(text) {
        return format(seconds);
    }

    match text.parse::<f64>() {
        Ok(seconds) if seconds.is_finite() && seconds >= 0.0 => format(seconds.trunc()),
        _ => ZERO.to_string(),
    }
}
