//! Number-format classification.
//!
//! A numeric cell carries no type information of its own; whether it is a
//! date is decided by the number format attached to its style. This module
//! classifies format codes (built-in ids and custom strings) so the cell
//! resolver can tell serial dates from plain numbers.

/// Shape of a number format, as far as cell typing is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FormatKind {
    /// Anything that is not a date/time format: general, currency, text, ...
    #[default]
    Other,
    /// Date, time or combined date-time format ("yyyy-mm-dd", "h:mm AM/PM")
    DateTime,
    /// Elapsed-time format ("[h]:mm:ss"); has no calendar anchor
    TimeDelta,
}

/// One entry of the style-index → number-format table.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NumberFormat {
    /// Raw format code, when the style referenced a custom `numFmt`
    pub code: Option<String>,
    /// Classified shape of the format
    pub kind: FormatKind,
}

impl NumberFormat {
    /// True if numeric literals under this format are serial dates.
    pub fn is_datetime(&self) -> bool {
        self.kind == FormatKind::DateTime
    }
}

/// Classify a custom format code by walking its first section.
///
/// Escapes (`\` and `_`), quoted literals and bracketed color/condition
/// blocks hide their contents from the scan; an unbracketed day/month/hour/
/// year/second code makes the format a date, while a bracket opening on an
/// h/m/s run makes it an elapsed time.
pub fn detect_number_format(code: &str) -> FormatKind {
    let mut escape = false;
    let mut quoted = false;
    let mut depth = 0u8;
    let mut meridiem = false;
    let mut elapsed = false;
    let mut prev = ' ';

    for c in code.chars() {
        match (c, escape, quoted, meridiem, depth) {
            (_, true, ..) => escape = false,
            ('_' | '\\', ..) => escape = true,
            ('"', _, true, _, _) => quoted = false,
            (_, _, true, _, _) => (),
            ('"', ..) => quoted = true,
            // only the first section of a multi-part format decides
            (';', ..) => return FormatKind::Other,
            ('[', ..) => depth += 1,
            (']', .., 1) if elapsed => return FormatKind::TimeDelta,
            (']', ..) => depth = depth.saturating_sub(1),
            ('a' | 'A', _, _, false, 0) => meridiem = true,
            ('p' | 'm' | '/' | 'P' | 'M', _, _, true, 0) => return FormatKind::DateTime,
            ('d' | 'm' | 'h' | 'y' | 's' | 'D' | 'M' | 'H' | 'Y' | 'S', _, _, false, 0) => {
                return FormatKind::DateTime
            }
            _ => {
                if !(elapsed && c.eq_ignore_ascii_case(&prev)) {
                    elapsed = prev == '[' && matches!(c, 'm' | 'h' | 's' | 'M' | 'H' | 'S');
                }
            }
        }
        prev = c;
    }

    FormatKind::Other
}

/// Classify one of the built-in (id-only, no code string) number formats.
pub fn builtin_format_by_code(code: u16) -> FormatKind {
    match code {
        // 14 mm-dd-yy .. 22 m/d/yy h:mm, 45 mm:ss, 47 mmss.0
        14..=22 | 45 | 47 => FormatKind::DateTime,
        // 46 [h]:mm:ss
        46 => FormatKind::TimeDelta,
        _ => FormatKind::Other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    // Format codes drawn from openpyxl's number-style test suite (MIT).
    #[rstest]
    #[case("DD/MM/YY", FormatKind::DateTime)]
    #[case("H:MM:SS;@", FormatKind::DateTime)]
    #[case("yyyy-mm-dd", FormatKind::DateTime)]
    #[case("m\"M\"d\"D\";@", FormatKind::DateTime)]
    #[case("[$-404]e\"\\xfc\"m\"\\xfc\"d\"\\xfc\"", FormatKind::DateTime)]
    #[case("h:mm:ss AM/PM", FormatKind::DateTime)]
    #[case("m:mm", FormatKind::DateTime)]
    #[case("ha/p\\\\m", FormatKind::DateTime)]
    #[case("[h]:mm:ss", FormatKind::TimeDelta)]
    #[case("[h]", FormatKind::TimeDelta)]
    #[case("[ss]", FormatKind::TimeDelta)]
    #[case("[s].000", FormatKind::TimeDelta)]
    #[case("[m]:mm", FormatKind::TimeDelta)]
    #[case("[Blue]\\+[h]:mm;[Red]\\-[h]:mm;[Green][h]:mm", FormatKind::TimeDelta)]
    #[case("[>=100][Magenta][s].00", FormatKind::TimeDelta)]
    #[case("General", FormatKind::Other)]
    #[case("0.00%", FormatKind::Other)]
    #[case("#,##0\\ [$\\u20bd-46D]", FormatKind::Other)]
    #[case("\"$\"#,##0_);[Red](\"$\"#,##0)", FormatKind::Other)]
    #[case("\\Y000000", FormatKind::Other)]
    #[case("#,##0.0####\" YMD\"", FormatKind::Other)]
    #[case("0_ ;[Red]\\-0\\ ", FormatKind::Other)]
    #[case("[>=100][Magenta]General", FormatKind::Other)]
    fn detects_custom_codes(#[case] code: &str, #[case] expected: FormatKind) {
        assert_eq!(detect_number_format(code), expected, "format {code:?}");
    }

    #[test]
    fn builtin_ids() {
        assert_eq!(builtin_format_by_code(14), FormatKind::DateTime);
        assert_eq!(builtin_format_by_code(22), FormatKind::DateTime);
        assert_eq!(builtin_format_by_code(46), FormatKind::TimeDelta);
        assert_eq!(builtin_format_by_code(0), FormatKind::Other);
        assert_eq!(builtin_format_by_code(44), FormatKind::Other);
        assert_eq!(builtin_format_by_code(49), FormatKind::Other);
    }
}
