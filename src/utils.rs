use tokio::time::Duration;

/// Parses a duration string such as "200ms", "30s", "1m30s", "1.5h" or "3d".
///
/// A duration is one or more `<number><unit>` segments. Numbers may carry a
/// fractional part. Supported units:
/// - `ns` nanoseconds
/// - `us` / `µs` microseconds
/// - `ms` milliseconds
/// - `s` seconds
/// - `m` minutes
/// - `h` hours
/// - `d` days
pub fn parse_duration_string(s: &str) -> Result<Duration, String> {
    let s = s.trim();

    if s.is_empty() {
        return Err("Duration string cannot be empty".to_string());
    }

    let mut total_nanos: f64 = 0.0;
    let mut rest = s;

    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        let value_str = &rest[..number_len];

        let value: f64 = match value_str.parse() {
            Ok(v) if !value_str.is_empty() => v,
            _ => {
                return Err(format!(
                    "Invalid numeric value in duration: '{}'",
                    value_str
                ))
            }
        };

        rest = &rest[number_len..];
        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let unit = &rest[..unit_len];
        rest = &rest[unit_len..];

        let nanos_per_unit: f64 = match unit {
            "ns" => 1.0,
            "us" | "µs" => 1_000.0,
            "ms" => 1_000_000.0,
            "s" => 1_000_000_000.0,
            "m" => 60.0 * 1_000_000_000.0,
            "h" => 60.0 * 60.0 * 1_000_000_000.0,
            "d" => 24.0 * 60.0 * 60.0 * 1_000_000_000.0,
            "" => {
                return Err(format!(
                    "Missing duration unit after '{}'. Use 'ns', 'us', 'ms', 's', 'm', 'h', or 'd'.",
                    value_str
                ))
            }
            other => {
                return Err(format!(
                    "Unknown duration unit: '{}'. Use 'ns', 'us', 'ms', 's', 'm', 'h', or 'd'.",
                    other
                ))
            }
        };

        total_nanos += value * nanos_per_unit;
    }

    if !total_nanos.is_finite() || total_nanos > u64::MAX as f64 {
        return Err(format!("Duration '{}' is out of range", s));
    }

    Ok(Duration::from_nanos(total_nanos.round() as u64))
}

/// Parses a comma-separated header string with support for escaped commas.
///
/// Use `\,` to include a literal comma in a header value.
/// Example: "Connection:keep-alive,Keep-Alive:timeout=5\,max=200"
pub fn parse_headers_with_escapes(headers_str: &str) -> Vec<String> {
    let mut headers = Vec::new();
    let mut current_header = String::new();
    let mut chars = headers_str.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '\\' => {
                if chars.peek() == Some(&',') {
                    current_header.push(',');
                    chars.next();
                } else {
                    current_header.push('\\');
                }
            }
            ',' => {
                if !current_header.trim().is_empty() {
                    headers.push(current_header.clone());
                }
                current_header.clear();
            }
            _ => {
                current_header.push(ch);
            }
        }
    }

    if !current_header.trim().is_empty() {
        headers.push(current_header);
    }

    headers
}
