use chrono::{DateTime, Duration, LocalResult, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::warn;

/// Platform timezone of the telephony provider. Naive timestamps in webhooks
/// are wall-clock times in this zone, not the agent's or the customer's.
pub const DEFAULT_SOURCE_TIMEZONE: &str = "America/New_York";

static NAIVE_DATETIME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d{4}-\d{2}-\d{2})[T ](\d{2}:\d{2}:\d{2})").unwrap()
});

const FALLBACK_FORMATS: &[&str] = &["%m/%d/%Y %H:%M:%S", "%m/%d/%Y %H:%M", "%Y-%m-%d %H:%M"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimestampResolver {
    source_tz: Tz,
}

impl Default for TimestampResolver {
    fn default() -> Self {
        Self {
            source_tz: chrono_tz::America::New_York,
        }
    }
}

impl TimestampResolver {
    pub fn new(source_tz: Tz) -> Self {
        Self { source_tz }
    }

    pub fn from_name(name: &str) -> anyhow::Result<Self> {
        let source_tz: Tz = name
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid source timezone {}: {}", name, e))?;
        Ok(Self { source_tz })
    }

    pub fn source_tz(&self) -> Tz {
        self.source_tz
    }

    /// Resolves a provider timestamp to UTC. Never fails: unparseable input
    /// falls back to the current instant.
    pub fn resolve(&self, raw: &str) -> DateTime<Utc> {
        self.try_resolve(raw).unwrap_or_else(|| {
            warn!(raw, tz = %self.source_tz, "unparseable call timestamp, using current time");
            Utc::now()
        })
    }

    pub fn try_resolve(&self, raw: &str) -> Option<DateTime<Utc>> {
        let value = raw.trim();
        if value.is_empty() {
            return None;
        }
        if let Some(instant) = parse_epoch(value) {
            return Some(instant);
        }
        if let Ok(instant) = DateTime::parse_from_rfc3339(value) {
            return Some(instant.with_timezone(&Utc));
        }
        if let Some(caps) = NAIVE_DATETIME.captures(value) {
            let naive = NaiveDateTime::parse_from_str(
                &format!("{} {}", &caps[1], &caps[2]),
                "%Y-%m-%d %H:%M:%S",
            )
            .ok()?;
            return Some(self.localize(naive));
        }
        if let Ok(instant) = DateTime::parse_from_rfc2822(value) {
            return Some(instant.with_timezone(&Utc));
        }
        FALLBACK_FORMATS
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
            .map(|naive| self.localize(naive))
    }

    /// Interprets `naive` as wall-clock time in the source zone.
    pub fn localize(&self, naive: NaiveDateTime) -> DateTime<Utc> {
        match self.source_tz.from_local_datetime(&naive) {
            LocalResult::Single(local) => local.with_timezone(&Utc),
            LocalResult::Ambiguous(earliest, _) => earliest.with_timezone(&Utc),
            LocalResult::None => {
                // spring-forward gap: the wall clock skipped this hour
                let shifted = naive + Duration::hours(1);
                match self.source_tz.from_local_datetime(&shifted) {
                    LocalResult::Single(local) | LocalResult::Ambiguous(local, _) => {
                        local.with_timezone(&Utc)
                    }
                    LocalResult::None => Utc.from_utc_datetime(&naive),
                }
            }
        }
    }
}

fn parse_epoch(value: &str) -> Option<DateTime<Utc>> {
    if !value.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let number: i64 = value.parse().ok()?;
    match value.len() {
        10 => DateTime::from_timestamp(number, 0),
        13 => DateTime::from_timestamp_millis(number),
        _ => None,
    }
}
