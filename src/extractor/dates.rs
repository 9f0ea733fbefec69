//! Publication date recovery from markup fragments and feed fields.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

static TIME_TAG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)<time[^>]*datetime=["']([^"']+)["'][^>]*>"#).expect("valid time tag regex")
});

static ISO_DATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\d{4}-\d{2}-\d{2}(?:T\d{2}:\d{2}:\d{2}(?:\.\d{3})?Z?)?)").expect("valid iso regex")
});

static MONTH_NAME_DATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(?:(?P<m1>Jan|Feb|Mar|Apr|May|Jun|Jul|Aug|Sep|Oct|Nov|Dec)[a-z]*\s+(?P<d1>\d{1,2}),?\s+(?P<y1>\d{4})|(?P<d2>\d{1,2})\s+(?P<m2>Jan|Feb|Mar|Apr|May|Jun|Jul|Aug|Sep|Oct|Nov|Dec)[a-z]*\s+(?P<y2>\d{4}))",
    )
    .expect("valid month-name regex")
});

/// Find a publication date in an HTML fragment.
///
/// Tries, in order, a `<time datetime>` attribute, an ISO-8601 substring and
/// an English month-name date ("Oct 8, 2025", "8 October 2025"). Only the
/// first match of each pattern is considered; an unparseable match falls
/// through to the next pattern.
pub fn extract_date(fragment: &str) -> Option<DateTime<Utc>> {
    if let Some(date) = TIME_TAG
        .captures(fragment)
        .and_then(|c| parse_loose_date(&c[1]))
    {
        return Some(date);
    }
    if let Some(date) = ISO_DATE
        .captures(fragment)
        .and_then(|c| parse_loose_date(&c[1]))
    {
        return Some(date);
    }
    MONTH_NAME_DATE.captures(fragment).and_then(|c| {
        let (month, day, year) = match (c.name("m1"), c.name("m2")) {
            (Some(m), _) => (m.as_str(), c.name("d1")?, c.name("y1")?),
            (None, Some(m)) => (m.as_str(), c.name("d2")?, c.name("y2")?),
            (None, None) => return None,
        };
        let date = NaiveDate::from_ymd_opt(
            year.as_str().parse().ok()?,
            month_number(month)?,
            day.as_str().parse().ok()?,
        )?;
        Some(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0)?))
    })
}

/// Parse the date formats feeds and `datetime` attributes use in practice:
/// RFC 2822, RFC 3339, and offset-less ISO forms (read as UTC).
pub fn parse_loose_date(raw: &str) -> Option<DateTime<Utc>> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
}

fn month_number(name: &str) -> Option<u32> {
    let prefix: String = name.chars().take(3).collect::<String>().to_ascii_lowercase();
    let n = match prefix.as_str() {
        "jan" => 1,
        "feb" => 2,
        "mar" => 3,
        "apr" => 4,
        "may" => 5,
        "jun" => 6,
        "jul" => 7,
        "aug" => 8,
        "sep" => 9,
        "oct" => 10,
        "nov" => 11,
        "dec" => 12,
        _ => return None,
    };
    Some(n)
}
