//! Size module - Human-readable size strings ("2G", "512M")

use super::error::{Error, Result};

const KIB: u64 = 1024;

/// Parse a size such as `2G`, `512MB`, `1.5g` or `100` into bytes.
///
/// Units are binary multiples; a missing unit or `B` means bytes.
pub fn parse_size(size: &str) -> Result<u64> {
    let size = size.trim().to_uppercase();
    if size.is_empty() {
        return Err(Error::InvalidSize("size cannot be empty".into()));
    }

    let split = size
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(size.len());
    let (number, unit) = size.split_at(split);

    let number: f64 = number
        .parse()
        .map_err(|_| Error::InvalidSize(size.clone()))?;

    let multiplier = match unit.trim() {
        "" | "B" => 1,
        "K" | "KB" => KIB,
        "M" | "MB" => KIB.pow(2),
        "G" | "GB" => KIB.pow(3),
        "T" | "TB" => KIB.pow(4),
        other => return Err(Error::InvalidSize(format!("unknown unit: {}", other))),
    };

    let bytes = number * multiplier as f64;
    if !bytes.is_finite() || bytes > u64::MAX as f64 {
        return Err(Error::InvalidSize(size));
    }
    Ok(bytes as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_units() {
        assert_eq!(parse_size("2G").unwrap(), 2 * 1024 * 1024 * 1024);
        assert_eq!(parse_size("512M").unwrap(), 512 * 1024 * 1024);
        assert_eq!(parse_size("512mb").unwrap(), 512 * 1024 * 1024);
        assert_eq!(parse_size("4K").unwrap(), 4096);
        assert_eq!(parse_size("1T").unwrap(), 1024u64.pow(4));
        assert_eq!(parse_size("100").unwrap(), 100);
        assert_eq!(parse_size("100B").unwrap(), 100);
        assert_eq!(parse_size(" 1.5G ").unwrap(), 3 * 512 * 1024 * 1024);
    }

    #[test]
    fn rejects_bad_input() {
        assert!(matches!(parse_size(""), Err(Error::InvalidSize(_))));
        assert!(matches!(parse_size("   "), Err(Error::InvalidSize(_))));
        assert!(matches!(parse_size("7X"), Err(Error::InvalidSize(_))));
        assert!(matches!(parse_size("G"), Err(Error::InvalidSize(_))));
        assert!(matches!(parse_size("1.2.3M"), Err(Error::InvalidSize(_))));
    }
}
