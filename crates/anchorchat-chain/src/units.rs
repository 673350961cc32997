//! Native-unit conversions: wei integers, `0x` quantities, decimal ether strings.

pub const WEI_PER_ETHER: u128 = 1_000_000_000_000_000_000;

/// Format wei as a decimal ether string with no trailing zeros, keeping at
/// least one fractional digit: `0` → `"0.0"`, `4.2e14` → `"0.00042"`.
pub fn format_ether(wei: u128) -> String {
    let whole = wei / WEI_PER_ETHER;
    let frac = wei % WEI_PER_ETHER;
    if frac == 0 {
        return format!("{whole}.0");
    }
    let frac = format!("{frac:018}");
    format!("{whole}.{}", frac.trim_end_matches('0'))
}

/// Parse a JSON-RPC hex quantity (`"0x1a"`).
pub fn parse_quantity(raw: &str) -> Result<u128, String> {
    let digits = raw
        .strip_prefix("0x")
        .or_else(|| raw.strip_prefix("0X"))
        .ok_or_else(|| format!("quantity '{raw}' is missing 0x prefix"))?;
    if digits.is_empty() {
        return Ok(0);
    }
    u128::from_str_radix(digits, 16).map_err(|e| format!("bad quantity '{raw}': {e}"))
}

pub fn to_quantity(value: u128) -> String {
    format!("0x{value:x}")
}

/// True when `s` is a well-formed non-negative decimal strictly greater than zero.
pub fn is_positive_decimal(s: &str) -> bool {
    let s = s.trim();
    let mut seen_digit = false;
    let mut seen_dot = false;
    let mut nonzero = false;

    for c in s.chars() {
        match c {
            '0' => seen_digit = true,
            '1'..='9' => {
                seen_digit = true;
                nonzero = true;
            }
            '.' if !seen_dot => seen_dot = true,
            _ => return false,
        }
    }

    seen_digit && nonzero
}
