pub const TON_DECIMALS: u32 = 9;

/// Growth labels, highest threshold first. Thresholds are absolute percentages.
pub const GROWTH_LADDER: &[(f64, &str)] = &[
    (300.0, "🌘🌘🌘"),
    (150.0, "🌘"),
    (50.0, "🚀"),
    (10.0, "⬆️"),
    (0.0, "🔺"),
];

/// Drop labels, highest threshold first. Thresholds are absolute percentages.
pub const DROP_LADDER: &[(f64, &str)] = &[
    (98.0, "🤡🤡🤡"),
    (80.0, "🤡"),
    (40.0, "💩"),
    (0.0, "🔻"),
];

/// First label whose threshold is reached. The ladder must be sorted descending.
pub fn ladder_label(ladder: &[(f64, &'static str)], value: f64) -> Option<&'static str> {
    ladder
        .iter()
        .find(|(threshold, _)| value >= *threshold)
        .map(|(_, label)| *label)
}

/// Converts an amount of nanoTON into USD using a TON/USD quote.
pub fn nano_ton_to_usd(nano: f64, ton_usd: f64) -> f64 {
    nano / 10f64.powi(TON_DECIMALS as i32) * ton_usd
}

fn format_number(num: f64, precision: usize) -> String {
    let formatted = format!("{num:.precision$}");

    let parts: Vec<&str> = formatted.split('.').collect();
    let int_part = parts[0];

    let mut result = String::new();

    let (num_str, is_negative) = if let Some(int_part) = int_part.strip_prefix('-') {
        (int_part, true)
    } else {
        (int_part, false)
    };

    for (count, digit) in num_str.chars().rev().enumerate() {
        if count != 0 && count % 3 == 0 {
            result.insert(0, ',');
        }
        result.insert(0, digit);
    }

    if is_negative {
        result.insert(0, '-');
    }

    if parts.len() > 1 {
        result.push('.');
        result.push_str(parts[1]);
    }

    format!("${result}")
}

pub fn format_usd_amount(amount: f64) -> String {
    format_number(
        amount,
        (3 - amount.log10().clamp(-20.0, 3.0) as isize) as usize,
    )
}

/// Short form for table columns: `$950`, `$12.3K`, `$4.56M`, `$1.2B`.
pub fn format_compact_usd(amount: f64) -> String {
    if !amount.is_finite() {
        return "?".to_string();
    }
    let abs = amount.abs();
    let (value, suffix) = if abs >= 1e9 {
        (amount / 1e9, "B")
    } else if abs >= 1e6 {
        (amount / 1e6, "M")
    } else if abs >= 1e3 {
        (amount / 1e3, "K")
    } else {
        return format!("${amount:.0}");
    };
    let s = if value.abs() >= 100.0 {
        format!("{value:.0}")
    } else if value.abs() >= 10.0 {
        format!("{value:.1}")
    } else {
        format!("{value:.2}")
    };
    let s = if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.')
    } else {
        &s
    };
    format!("${s}{suffix}")
}

/// `change_percent` is already a percentage (`6.0` means +6%).
pub fn format_price_change(change_percent: f64) -> String {
    let abs = change_percent.abs();
    match change_percent.partial_cmp(&0f64) {
        Some(std::cmp::Ordering::Greater) => format!(
            "+{abs:.2}% {emoji}",
            emoji = ladder_label(GROWTH_LADDER, abs).unwrap_or_default()
        ),
        Some(std::cmp::Ordering::Less) => format!(
            "-{abs:.2}% {emoji}",
            emoji = ladder_label(DROP_LADDER, abs).unwrap_or_default()
        ),
        Some(std::cmp::Ordering::Equal) => "Same 😐".to_string(),
        None => "Unknown 🥴".to_string(),
    }
}
