use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;

static TEMPLATE_VAR: Lazy<Regex> = Lazy::new(|| Regex::new(r"^#[a-z_]+#$").unwrap());

pub const DEFAULT_COUNTRY_CODE: &str = "61";
pub const DEFAULT_TRUNK_PREFIX: char = '0';

/// Subscriber numbers are nine digits once the trunk prefix is dropped.
const SUBSCRIBER_DIGITS: usize = 9;

/// True when `value` is a placeholder the telephony provider failed to
/// substitute, e.g. `#recording_url#`.
pub fn is_unresolved_template_var(value: &str) -> bool {
    TEMPLATE_VAR.is_match(value)
}

/// Returns the trimmed value unless it is blank or an unresolved placeholder.
pub fn resolved(value: Option<&str>) -> Option<&str> {
    let value = value?.trim();
    if value.is_empty() || is_unresolved_template_var(value) {
        None
    } else {
        Some(value)
    }
}

/// Converts `SS`, `MM:SS` or `HH:MM:SS` into seconds. Anything else is 0.
pub fn parse_call_duration(raw: &str) -> u64 {
    let value = raw.trim();
    if value.is_empty() || is_unresolved_template_var(value) {
        return 0;
    }
    if let Ok(secs) = value.parse::<u64>() {
        return secs;
    }
    if let Ok(secs) = value.parse::<f64>() {
        return if secs.is_finite() && secs >= 0.0 {
            secs.floor() as u64
        } else {
            0
        };
    }

    let parts = value
        .split(':')
        .map(|part| part.trim().parse::<u64>().ok())
        .collect::<Option<Vec<u64>>>();
    let (hours, minutes, seconds) = match parts.as_deref() {
        Some(&[minutes, seconds]) => (0, minutes, seconds),
        Some(&[hours, minutes, seconds]) => (hours, minutes, seconds),
        _ => return 0,
    };
    hours
        .checked_mul(3600)
        .and_then(|h| minutes.checked_mul(60).and_then(|m| h.checked_add(m)))
        .and_then(|hm| hm.checked_add(seconds))
        .unwrap_or(0)
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PhoneFormat {
    pub country_code: String,
    pub trunk_prefix: char,
}

impl Default for PhoneFormat {
    fn default() -> Self {
        Self {
            country_code: DEFAULT_COUNTRY_CODE.to_string(),
            trunk_prefix: DEFAULT_TRUNK_PREFIX,
        }
    }
}

impl PhoneFormat {
    /// Rewrites domestic shapes into E.164. Unrecognised input is returned
    /// untouched so that a bad number never stops the pipeline.
    pub fn format(&self, raw: &str) -> String {
        let cleaned: String = raw
            .chars()
            .filter(|c| c.is_ascii_digit() || *c == '+')
            .collect();
        if cleaned.is_empty() {
            return raw.to_string();
        }
        if cleaned.starts_with('+') {
            return cleaned;
        }

        let digits = cleaned.len();
        if digits == SUBSCRIBER_DIGITS + 1 && cleaned.starts_with(self.trunk_prefix) {
            return format!("+{}{}", self.country_code, &cleaned[1..]);
        }
        if digits == self.country_code.len() + SUBSCRIBER_DIGITS
            && cleaned.starts_with(&self.country_code)
        {
            return format!("+{}", cleaned);
        }
        if digits == SUBSCRIBER_DIGITS {
            return format!("+{}{}", self.country_code, cleaned);
        }
        raw.to_string()
    }

    /// Compares two raw numbers after formatting both.
    pub fn same_number(&self, a: &str, b: &str) -> bool {
        let (a, b) = (self.format(a), self.format(b));
        !a.is_empty() && a == b
    }
}

pub fn format_phone_number(raw: &str) -> String {
    PhoneFormat::default().format(raw)
}

/// `john.smith` -> `John Smith`, falling back to the numeric agent id.
pub fn agent_display_name(username: Option<&str>, agent_id: Option<&str>) -> String {
    if let Some(username) = resolved(username) {
        let name = username
            .split(|c: char| c == '.' || c == '_' || c == '-' || c.is_whitespace())
            .filter(|part| !part.is_empty())
            .map(|part| {
                let mut chars = part.chars();
                match chars.next() {
                    Some(first) => {
                        first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase()
                    }
                    None => String::new(),
                }
            })
            .collect::<Vec<_>>()
            .join(" ");
        if !name.is_empty() {
            return name;
        }
    }
    match resolved(agent_id) {
        Some(id) => format!("Agent {}", id),
        None => "Unknown Agent".to_string(),
    }
}
