/// 把字节数格式化成人类可读的形式
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KiB", "MiB", "GiB", "TiB"];
    if bytes < 1024 {
        return format!("{} B", bytes);
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit + 1 < UNITS.len() {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", value, UNITS[unit])
}

/// 文本原样返回，二进制内容返回前 `limit` 字节的十六进制
pub fn preview(data: &[u8], limit: usize) -> String {
    match std::str::from_utf8(data) {
        Ok(text) if !text.chars().any(|c| c.is_control() && c != '\n' && c != '\t') => {
            text.to_string()
        }
        _ => {
            let mut hex = data
                .iter()
                .take(limit)
                .map(|b| format!("{:02x}", b))
                .collect::<Vec<_>>()
                .join(" ");
            if data.len() > limit {
                hex.push_str(&format!(" ... ({} more bytes)", data.len() - limit));
            }
            hex
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_are_scaled() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(1023), "1023 B");
        assert_eq!(format_bytes(1024), "1.0 KiB");
        assert_eq!(format_bytes(256 * 1024), "256.0 KiB");
        assert_eq!(format_bytes(3 * 1024 * 1024 / 2), "1.5 MiB");
    }

    #[test]
    fn text_is_kept_and_binary_is_hex() {
        assert_eq!(preview(b"hello\nworld", 8), "hello\nworld");
        assert_eq!(preview(&[0, 1, 0xff], 8), "00 01 ff");
        assert_eq!(preview(&[0; 5], 2), "00 00 ... (3 more bytes)");
    }
}
