//! Display strings for field values.

/// 1920 -> "1 920"
pub fn thousands(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(' ');
        }
        out.push(c);
    }
    out
}

pub fn duration(ms: u64) -> String {
    let hours = ms / 3_600_000;
    let minutes = (ms / 60_000) % 60;
    let seconds = (ms / 1000) % 60;
    let millis = ms % 1000;
    if hours > 0 {
        format!("{} h {} min", hours, minutes)
    } else if minutes > 0 {
        format!("{} min {} s", minutes, seconds)
    } else if seconds > 0 {
        format!("{} s {} ms", seconds, millis)
    } else {
        format!("{} ms", millis)
    }
}

pub fn bitrate(bps: u64) -> String {
    if bps < 1000 {
        format!("{} b/s", bps)
    } else if bps < 10_000_000 {
        format!("{} kb/s", thousands((bps + 500) / 1000))
    } else {
        format!("{:.1} Mb/s", bps as f64 / 1_000_000.0)
    }
}

pub fn pixels(n: u32) -> String {
    format!("{} pixels", thousands(n as u64))
}

pub fn sample_rate(hz: u32) -> String {
    if hz < 1000 {
        format!("{} Hz", hz)
    } else {
        format!("{:.1} kHz", hz as f64 / 1000.0)
    }
}

pub fn channels(n: u32) -> String {
    if n == 1 {
        "1 channel".to_string()
    } else {
        format!("{} channels", n)
    }
}

pub fn frame_rate(num: u32, den: u32) -> String {
    if den == 0 {
        return String::new();
    }
    let fps = num as f64 / den as f64;
    if den == 1 || num % den == 0 {
        format!("{:.3} FPS", fps)
    } else {
        format!("{:.3} ({}/{}) FPS", fps, num, den)
    }
}

pub fn file_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KiB", "MiB", "GiB", "TiB"];
    if bytes < 1024 {
        return format!("{} Bytes", bytes);
    }
    let mut value = bytes as f64;
    let mut unit = "Bytes";
    for u in UNITS {
        if value < 1024.0 {
            break;
        }
        value /= 1024.0;
        unit = u;
    }
    if value < 10.0 {
        format!("{:.2} {}", value, unit)
    } else if value < 100.0 {
        format!("{:.1} {}", value, unit)
    } else {
        format!("{:.0} {}", value, unit)
    }
}

pub fn bit_depth(bits: u32) -> String {
    format!("{} bits", bits)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_numbers() {
        assert_eq!(thousands(1920), "1 920");
        assert_eq!(thousands(1_234_567), "1 234 567");
        assert_eq!(thousands(12), "12");
        assert_eq!(pixels(1080), "1 080 pixels");
    }

    #[test]
    fn formats_durations() {
        assert_eq!(duration(3_725_000), "1 h 2 min");
        assert_eq!(duration(125_400), "2 min 5 s");
        assert_eq!(duration(5_120), "5 s 120 ms");
        assert_eq!(duration(40), "40 ms");
    }

    #[test]
    fn formats_rates() {
        assert_eq!(bitrate(192_000), "192 kb/s");
        assert_eq!(bitrate(1_509_400), "1 509 kb/s");
        assert_eq!(bitrate(24_500_000), "24.5 Mb/s");
        assert_eq!(sample_rate(44_100), "44.1 kHz");
        assert_eq!(frame_rate(30000, 1001), "29.970 (30000/1001) FPS");
        assert_eq!(frame_rate(25, 1), "25.000 FPS");
        assert_eq!(channels(6), "6 channels");
    }

    #[test]
    fn formats_sizes() {
        assert_eq!(file_size(512), "512 Bytes");
        assert_eq!(file_size(1536), "1.50 KiB");
        assert_eq!(file_size(200 * 1024 * 1024), "200 MiB");
    }
}
