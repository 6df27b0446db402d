//! Integer-centavo money handling. Amounts travel as minor units end to end;
//! floats only appear at the AI-provider boundary and are converted once.

/// Combine an integer part and an optional fraction part (as written in
/// Brazilian notation, e.g. "1.234" + "56") into minor units.
/// The integer part may carry '.' thousand separators; the fraction part is
/// one or two digits.
pub fn minor_from_parts(integer: &str, fraction: Option<&str>) -> Option<i64> {
    let digits: String = integer.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return None;
    }
    let whole: i64 = digits.parse().ok()?;

    let cents = match fraction {
        None | Some("") => 0,
        Some(f) if f.len() == 1 => f.parse::<i64>().ok()? * 10,
        Some(f) if f.len() == 2 => f.parse::<i64>().ok()?,
        Some(_) => return None,
    };

    whole.checked_mul(100)?.checked_add(cents)
}

/// Convert a currency-unit float (as returned by the AI provider) into
/// minor units, rejecting negatives and non-finite values.
pub fn minor_from_float(amount: f64) -> Option<i64> {
    if !amount.is_finite() || amount < 0.0 {
        return None;
    }
    let minor = (amount * 100.0).round();
    if minor > i64::MAX as f64 {
        return None;
    }
    Some(minor as i64)
}

/// Format minor units as "R$ 1.234,56".
pub fn format_brl(minor: i64) -> String {
    let negative = minor < 0;
    let abs = minor.unsigned_abs();
    let whole = abs / 100;
    let cents = abs % 100;

    let digits = whole.to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push('.');
        }
        grouped.push(ch);
    }

    let sign = if negative { "-" } else { "" };
    format!("{sign}R$ {grouped},{cents:02}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_integers() {
        assert_eq!(minor_from_parts("50", None), Some(5_000));
        assert_eq!(minor_from_parts("0", None), Some(0));
    }

    #[test]
    fn parses_fraction_digits() {
        assert_eq!(minor_from_parts("50", Some("30")), Some(5_030));
        assert_eq!(minor_from_parts("10", Some("5")), Some(1_050));
        assert_eq!(minor_from_parts("1.234", Some("56")), Some(123_456));
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(minor_from_parts("", None), None);
        assert_eq!(minor_from_parts("..", None), None);
        assert_eq!(minor_from_parts("10", Some("123")), None);
    }

    #[test]
    fn float_conversion_rounds_to_cents() {
        assert_eq!(minor_from_float(50.0), Some(5_000));
        assert_eq!(minor_from_float(10.555), Some(1_056));
        assert_eq!(minor_from_float(-1.0), None);
        assert_eq!(minor_from_float(f64::NAN), None);
    }

    #[test]
    fn formats_with_grouping() {
        assert_eq!(format_brl(5_000), "R$ 50,00");
        assert_eq!(format_brl(123_456), "R$ 1.234,56");
        assert_eq!(format_brl(100_000_000), "R$ 1.000.000,00");
        assert_eq!(format_brl(-5_030), "-R$ 50,30");
        assert_eq!(format_brl(5), "R$ 0,05");
    }
}
