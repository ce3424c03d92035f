pub mod address;
pub mod chat;
pub mod requests;
pub mod store;
pub mod tokens;

use std::time::Duration;

pub fn format_duration(duration: Duration) -> String {
    let mut duration = duration;
    let mut result = String::new();
    let mut components = 0;
    const MAX_COMPONENTS: usize = 2;
    if duration.as_secs() >= 86400 && components < MAX_COMPONENTS {
        result.push_str(&format!("{}d ", duration.as_secs() / 86400));
        duration = Duration::from_secs(duration.as_secs() % 86400);
        components += 1;
    }
    if duration.as_secs() >= 3600 && components < MAX_COMPONENTS {
        result.push_str(&format!("{}h ", duration.as_secs() / 3600));
        duration = Duration::from_secs(duration.as_secs() % 3600);
        components += 1;
    }
    if duration.as_secs() >= 60 && components < MAX_COMPONENTS {
        result.push_str(&format!("{}m ", duration.as_secs() / 60));
        duration = Duration::from_secs(duration.as_secs() % 60);
        components += 1;
    }
    if duration.as_secs() > 0 && components < MAX_COMPONENTS {
        result.push_str(&format!("{}s", duration.as_secs()));
        components += 1;
    }
    if components == 0 {
        result.push_str("in less than a second");
    }
    result.trim_end().to_string()
}

/// Parses `1h30m`, `45m`, `2d`. A bare number is not accepted.
pub fn parse_duration(input: &str) -> Option<Duration> {
    let mut total = Duration::default();
    let mut number = String::new();

    for ch in input.trim().chars() {
        if ch.is_ascii_digit() {
            number.push(ch);
        } else {
            let value: u64 = number.parse().ok()?;
            number.clear();
            total += match ch {
                'd' => Duration::from_secs(value * 24 * 60 * 60),
                'h' => Duration::from_secs(value * 60 * 60),
                'm' => Duration::from_secs(value * 60),
                's' => Duration::from_secs(value),
                _ => return None,
            };
        }
    }

    if !number.is_empty() || total.is_zero() {
        return None;
    }

    Some(total)
}
