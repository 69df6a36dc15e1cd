//! Transform parameter derivation
//!
//! Turns the optional, untrusted `width` and `quality` form values into a
//! [`TransformParameters`] that is always within the encoder's safe range.

pub const DEFAULT_WIDTH: u32 = 800;
pub const MIN_WIDTH: u32 = 100;
pub const MAX_WIDTH: u32 = 4000;

pub const DEFAULT_QUALITY: u8 = 80;
pub const MIN_QUALITY: u8 = 1;
pub const MAX_QUALITY: u8 = 100;

/// Bounded transform parameters, fixed for the lifetime of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransformParameters {
    /// Target horizontal size in pixels, in `[100, 4000]`
    pub width: u32,
    /// Lossy encoder quality, in `[1, 100]`
    pub quality: u8,
}

impl Default for TransformParameters {
    fn default() -> Self {
        Self {
            width: DEFAULT_WIDTH,
            quality: DEFAULT_QUALITY,
        }
    }
}

impl TransformParameters {
    /// Derive parameters from raw form values.
    ///
    /// Parse, then clamp: an absent or unparsable value becomes the default
    /// (800 / 80), and the result is bounded into `[100, 4000]` for width and
    /// `[1, 100]` for quality. Never fails.
    pub fn derive(raw_width: Option<&str>, raw_quality: Option<&str>) -> Self {
        let width = raw_width
            .and_then(parse_leading_int)
            .unwrap_or(DEFAULT_WIDTH as i64);
        let quality = raw_quality
            .and_then(parse_leading_int)
            .unwrap_or(DEFAULT_QUALITY as i64);

        Self {
            width: clamp_width(width),
            quality: clamp_quality(quality),
        }
    }
}

/// Parse an optional sign followed by a leading run of ASCII digits.
///
/// Surrounding whitespace is ignored and anything after the digits is dropped,
/// so `" 640px"` parses as 640. Magnitudes beyond `i64` saturate. Returns `None`
/// when no digit follows the optional sign.
pub fn parse_leading_int(raw: &str) -> Option<i64> {
    let s = raw.trim();
    let (negative, digits) = match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };

    let run: &str = {
        let end = digits
            .bytes()
            .position(|b| !b.is_ascii_digit())
            .unwrap_or(digits.len());
        &digits[..end]
    };
    if run.is_empty() {
        return None;
    }

    let magnitude = run.bytes().fold(0i64, |acc, b| {
        acc.saturating_mul(10).saturating_add(i64::from(b - b'0'))
    });
    Some(if negative { -magnitude } else { magnitude })
}

fn clamp_width(width: i64) -> u32 {
    width.clamp(MIN_WIDTH as i64, MAX_WIDTH as i64) as u32
}

fn clamp_quality(quality: i64) -> u8 {
    quality.clamp(MIN_QUALITY as i64, MAX_QUALITY as i64) as u8
}

/// Public function to derive transform parameters from raw request values
pub fn clamp_parameters(raw_width: Option<&str>, raw_quality: Option<&str>) -> TransformParameters {
    TransformParameters::derive(raw_width, raw_quality)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(300))]

        #[test]
        fn prop_any_text_stays_in_range(
            raw_width in proptest::option::of(".{0,24}"),
            raw_quality in proptest::option::of(".{0,24}"),
        ) {
            let params = clamp_parameters(raw_width.as_deref(), raw_quality.as_deref());
            prop_assert!((MIN_WIDTH..=MAX_WIDTH).contains(&params.width));
            prop_assert!((MIN_QUALITY..=MAX_QUALITY).contains(&params.quality));
        }

        #[test]
        fn prop_any_integer_stays_in_range(w in any::<i64>(), q in any::<i64>()) {
            let params = clamp_parameters(Some(&w.to_string()), Some(&q.to_string()));
            prop_assert!((MIN_WIDTH..=MAX_WIDTH).contains(&params.width));
            prop_assert!((MIN_QUALITY..=MAX_QUALITY).contains(&params.quality));
        }

        #[test]
        fn prop_in_range_values_pass_through(w in 100u32..=4000, q in 1u8..=100) {
            let params = clamp_parameters(Some(&w.to_string()), Some(&q.to_string()));
            prop_assert_eq!(params, TransformParameters { width: w, quality: q });
        }

        #[test]
        fn prop_huge_digit_runs_saturate_to_max(digits in "[1-9][0-9]{25,40}") {
            let params = clamp_parameters(Some(&digits), Some(&digits));
            prop_assert_eq!(params.width, MAX_WIDTH);
            prop_assert_eq!(params.quality, MAX_QUALITY);
        }
    }

    #[test]
    fn test_absent_values_use_defaults() {
        let params = clamp_parameters(None, None);
        assert_eq!(params, TransformParameters { width: 800, quality: 80 });
        assert_eq!(params, TransformParameters::default());
    }

    #[test]
    fn test_non_numeric_values_use_defaults() {
        let params = clamp_parameters(Some("wide"), Some("best"));
        assert_eq!(params, TransformParameters { width: 800, quality: 80 });

        let params = clamp_parameters(Some(""), Some("   "));
        assert_eq!(params, TransformParameters { width: 800, quality: 80 });
    }

    #[test]
    fn test_below_minimum_is_raised() {
        assert_eq!(clamp_parameters(Some("50"), None).width, 100);
        assert_eq!(clamp_parameters(Some("-300"), None).width, 100);
        assert_eq!(clamp_parameters(Some("0"), None).width, 100);
        assert_eq!(clamp_parameters(None, Some("0")).quality, 1);
        assert_eq!(clamp_parameters(None, Some("-5")).quality, 1);
    }

    #[test]
    fn test_above_maximum_is_lowered() {
        assert_eq!(clamp_parameters(None, Some("150")).quality, 100);
        assert_eq!(clamp_parameters(Some("10000"), None).width, 4000);
    }

    #[test]
    fn test_parse_leading_int() {
        assert_eq!(parse_leading_int("640"), Some(640));
        assert_eq!(parse_leading_int(" 640px"), Some(640));
        assert_eq!(parse_leading_int("+12"), Some(12));
        assert_eq!(parse_leading_int("-12.9"), Some(-12));
        assert_eq!(parse_leading_int("3.5e2"), Some(3));
        assert_eq!(parse_leading_int("px640"), None);
        assert_eq!(parse_leading_int("-"), None);
        assert_eq!(parse_leading_int(""), None);
        assert_eq!(
            parse_leading_int("99999999999999999999999"),
            Some(i64::MAX)
        );
        assert_eq!(
            parse_leading_int("-99999999999999999999999"),
            Some(-i64::MAX)
        );
    }
}
