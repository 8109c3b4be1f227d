use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use std::collections::BTreeMap;

use crate::model::Usage;

pub fn parse_cpu_millicores(value: &str) -> Option<u64> {
    let raw = value.trim();
    if raw.is_empty() {
        return None;
    }

    let (number, multiplier) = if let Some(number) = raw.strip_suffix('m') {
        (number, 1.0)
    } else if let Some(number) = raw.strip_suffix('u') {
        (number, 0.001)
    } else if let Some(number) = raw.strip_suffix('n') {
        (number, 0.000001)
    } else {
        (raw, 1000.0)
    };

    let numeric = number.parse::<f64>().ok()?;
    let millicores = (numeric * multiplier).round();
    if !millicores.is_finite() || millicores < 0.0 {
        return None;
    }
    Some(millicores as u64)
}

pub fn parse_memory_bytes(value: &str) -> Option<u64> {
    const BINARY_UNITS: [(&str, f64); 6] = [
        ("Ei", 1_152_921_504_606_846_976.0),
        ("Pi", 1_125_899_906_842_624.0),
        ("Ti", 1_099_511_627_776.0),
        ("Gi", 1_073_741_824.0),
        ("Mi", 1_048_576.0),
        ("Ki", 1_024.0),
    ];
    const DECIMAL_UNITS: [(&str, f64); 7] = [
        ("E", 1_000_000_000_000_000_000.0),
        ("P", 1_000_000_000_000_000.0),
        ("T", 1_000_000_000_000.0),
        ("G", 1_000_000_000.0),
        ("M", 1_000_000.0),
        ("K", 1_000.0),
        ("k", 1_000.0),
    ];

    let raw = value.trim();
    if raw.is_empty() {
        return None;
    }

    let scaled = BINARY_UNITS
        .iter()
        .chain(DECIMAL_UNITS.iter())
        .find_map(|(suffix, multiplier)| {
            raw.strip_suffix(suffix)
                .map(|number| (number, *multiplier))
        });
    let (number, multiplier) = match scaled {
        Some(found) => found,
        None => match raw.strip_suffix('m') {
            Some(number) => (number, 0.001),
            None => (raw, 1.0),
        },
    };

    let numeric = number.parse::<f64>().ok()?;
    let bytes = (numeric * multiplier).round();
    if !bytes.is_finite() || bytes < 0.0 {
        return None;
    }
    Some(bytes as u64)
}

/// Reads `cpu` and `memory` out of a resource list. Keys that are missing or
/// unparsable count as zero.
pub fn usage_from_resource_list(list: &BTreeMap<String, Quantity>) -> Usage {
    Usage {
        cpu_millis: list
            .get("cpu")
            .and_then(|quantity| parse_cpu_millicores(&quantity.0))
            .unwrap_or(0),
        memory_bytes: list
            .get("memory")
            .and_then(|quantity| parse_memory_bytes(&quantity.0))
            .unwrap_or(0),
    }
}

pub fn storage_bytes(list: Option<&BTreeMap<String, Quantity>>) -> u64 {
    list.and_then(|list| list.get("storage"))
        .and_then(|quantity| parse_memory_bytes(&quantity.0))
        .unwrap_or(0)
}

pub fn format_cpu_millicores(value: u64) -> String {
    if value >= 1000 {
        let whole = value / 1000;
        let decimal = ((value % 1000) + 50) / 100;
        if decimal == 0 {
            format!("{whole}c")
        } else if decimal >= 10 {
            format!("{}c", whole + 1)
        } else {
            format!("{whole}.{decimal}c")
        }
    } else {
        format!("{value}m")
    }
}

pub fn format_bytes_compact(bytes: u64) -> String {
    const UNITS: [(&str, u64); 6] = [
        ("Ei", 1_152_921_504_606_846_976),
        ("Pi", 1_125_899_906_842_624),
        ("Ti", 1_099_511_627_776),
        ("Gi", 1_073_741_824),
        ("Mi", 1_048_576),
        ("Ki", 1_024),
    ];

    if bytes == 0 {
        return "0B".to_string();
    }

    for (suffix, unit) in UNITS {
        if bytes >= unit {
            let whole = bytes / unit;
            let decimal = ((bytes % unit) * 10) / unit;
            if decimal == 0 {
                return format!("{whole}{suffix}");
            }
            return format!("{whole}.{decimal}{suffix}");
        }
    }

    format!("{bytes}B")
}

pub fn format_elapsed_seconds(seconds: i64) -> String {
    if seconds >= 86_400 {
        return format!("{}d", seconds / 86_400);
    }

    if seconds >= 3_600 {
        return format!("{}h", seconds / 3_600);
    }

    if seconds >= 60 {
        return format!("{}m", seconds / 60);
    }

    format!("{seconds}s")
}

/// Whole percent of `used` against `total`, capped at 100. `None` when the
/// denominator is zero.
pub fn percent(used: u64, total: u64) -> Option<u64> {
    if total == 0 {
        return None;
    }
    Some(used.saturating_mul(100).saturating_div(total).min(100))
}
