//! Rule-based time reference parser
//!
//! Scans a note body for temporal expressions and resolves them against the
//! capture date. Matchers run in priority order and claim byte spans, so
//! "in 3 days" is one relative reference rather than a relative plus a
//! duration.
//!
//! Each match becomes one [`TimeReference`]: the verbatim span, the resolved
//! instant (or None when the expression has no single instant), and a kind.
//! Clock times anchor to the nearest preceding day reference in the text,
//! falling back to the capture date.

use std::sync::OnceLock;

use chrono::{DateTime, Datelike, Duration, Months, NaiveDate, TimeZone, Utc, Weekday};
use regex::Regex;

use crate::note::{TimeKind, TimeReference};

// ============================================================================
// PUBLIC ENTRY POINT
// ============================================================================

/// Parse every temporal expression in `text`, anchored at `current_date`.
/// Results are in text order.
pub fn parse_time_references(text: &str, current_date: DateTime<Utc>) -> Vec<TimeReference> {
    let today = current_date.date_naive();
    let mut claimed: Vec<(usize, usize)> = Vec::new();
    let mut matches: Vec<RawMatch> = Vec::new();

    collect_recurring(text, today, &mut claimed, &mut matches);
    collect_relative(text, current_date, today, &mut claimed, &mut matches);
    collect_absolute_dates(text, today, &mut claimed, &mut matches);
    collect_clock_times(text, &mut claimed, &mut matches);
    collect_durations(text, &mut claimed, &mut matches);

    matches.sort_by_key(|m| m.start);

    // Anchor clock times to the nearest preceding day reference
    let mut out = Vec::with_capacity(matches.len());
    for i in 0..matches.len() {
        let mut reference = matches[i].reference.clone();
        if let Some((hour, minute)) = matches[i].clock {
            let anchor = matches[..i]
                .iter()
                .rev()
                .find_map(|m| m.day_anchor)
                .unwrap_or(today);
            reference.parsed = anchor
                .and_hms_opt(hour, minute, 0)
                .map(|dt| Utc.from_utc_datetime(&dt));
        }
        out.push(reference);
    }
    out
}

// ============================================================================
// MATCH COLLECTION
// ============================================================================

struct RawMatch {
    start: usize,
    end: usize,
    reference: TimeReference,
    /// Date this match pins down, used to anchor later clock times
    day_anchor: Option<NaiveDate>,
    /// Unanchored wall-clock time, resolved in the final pass
    clock: Option<(u32, u32)>,
}

fn overlaps(claimed: &[(usize, usize)], start: usize, end: usize) -> bool {
    claimed.iter().any(|&(s, e)| start < e && s < end)
}

fn claim(
    claimed: &mut Vec<(usize, usize)>,
    matches: &mut Vec<RawMatch>,
    start: usize,
    end: usize,
    raw: RawMatch,
) {
    if !overlaps(claimed, start, end) {
        claimed.push((start, end));
        matches.push(raw);
    }
}

macro_rules! cached_regex {
    ($name:ident, $pattern:expr) => {
        fn $name() -> &'static Regex {
            static RE: OnceLock<Regex> = OnceLock::new();
            RE.get_or_init(|| Regex::new($pattern).expect("valid time regex"))
        }
    };
}

cached_regex!(
    re_every,
    r"(?i)\bevery\s+(monday|tuesday|wednesday|thursday|friday|saturday|sunday|day|week|month|morning|evening|night)\b"
);
cached_regex!(re_periodic, r"(?i)\b(daily|weekly|monthly)\b");
cached_regex!(
    re_in_amount,
    r"(?i)\bin\s+(\d+|a|an)\s+(minute|hour|day|week|month)s?\b"
);
cached_regex!(
    re_next_this,
    r"(?i)\b(next|this)\s+(monday|tuesday|wednesday|thursday|friday|saturday|sunday|week|month)\b"
);
cached_regex!(re_day_word, r"(?i)\b(today|tonight|tomorrow|yesterday)\b");
cached_regex!(
    re_weekday,
    r"(?i)\b(monday|tuesday|wednesday|thursday|friday|saturday|sunday)\b"
);
cached_regex!(re_iso_date, r"\b(\d{4})-(\d{2})-(\d{2})\b");
cached_regex!(
    re_month_day,
    r"(?i)\b(january|february|march|april|may|june|july|august|september|october|november|december|jan|feb|mar|apr|jun|jul|aug|sep|sept|oct|nov|dec)\.?\s+(\d{1,2})(?:st|nd|rd|th)?(?:,?\s+(\d{4}))?\b"
);
cached_regex!(
    re_day_month,
    r"(?i)\b(\d{1,2})(?:st|nd|rd|th)?\s+(?:of\s+)?(january|february|march|april|may|june|july|august|september|october|november|december|jan|feb|mar|apr|jun|jul|aug|sep|sept|oct|nov|dec)\b"
);
cached_regex!(re_clock_hm, r"(?i)\b(\d{1,2}):(\d{2})\s*(am|pm)?\b");
cached_regex!(re_clock_h, r"(?i)\b(\d{1,2})\s*(am|pm)\b");
cached_regex!(
    re_for_amount,
    r"(?i)\bfor\s+(\d+|a|an)\s+(minute|hour|day|week|month)s?\b"
);
cached_regex!(re_bare_amount, r"(?i)\b(\d+)\s+(minute|hour|day|week|month)s?\b");

fn collect_recurring(
    text: &str,
    today: NaiveDate,
    claimed: &mut Vec<(usize, usize)>,
    matches: &mut Vec<RawMatch>,
) {
    for cap in re_every().captures_iter(text) {
        let whole = cap.get(0).unwrap();
        let cue = cap[1].to_lowercase();
        // "every Friday" resolves to its next occurrence; period cues have
        // no single instant
        let parsed = parse_weekday(&cue)
            .map(|wd| next_weekday(today, wd, true))
            .map(midnight_utc);
        claim(
            claimed,
            matches,
            whole.start(),
            whole.end(),
            RawMatch {
                start: whole.start(),
                end: whole.end(),
                reference: TimeReference {
                    original: whole.as_str().to_string(),
                    parsed,
                    kind: TimeKind::Recurring,
                },
                day_anchor: None,
                clock: None,
            },
        );
    }
    for cap in re_periodic().captures_iter(text) {
        let whole = cap.get(0).unwrap();
        claim(
            claimed,
            matches,
            whole.start(),
            whole.end(),
            RawMatch {
                start: whole.start(),
                end: whole.end(),
                reference: TimeReference {
                    original: whole.as_str().to_string(),
                    parsed: None,
                    kind: TimeKind::Recurring,
                },
                day_anchor: None,
                clock: None,
            },
        );
    }
}

fn collect_relative(
    text: &str,
    current: DateTime<Utc>,
    today: NaiveDate,
    claimed: &mut Vec<(usize, usize)>,
    matches: &mut Vec<RawMatch>,
) {
    for cap in re_in_amount().captures_iter(text) {
        let whole = cap.get(0).unwrap();
        let qty = parse_quantity(&cap[1]);
        let unit = cap[2].to_lowercase();
        let (parsed, anchor) = match unit.as_str() {
            "minute" => (Some(current + Duration::minutes(qty)), None),
            "hour" => (Some(current + Duration::hours(qty)), None),
            "day" => {
                let date = today + Duration::days(qty);
                (Some(midnight_utc(date)), Some(date))
            }
            "week" => {
                let date = today + Duration::weeks(qty);
                (Some(midnight_utc(date)), Some(date))
            }
            "month" => {
                let date = today
                    .checked_add_months(Months::new(qty.max(0) as u32))
                    .unwrap_or(today);
                (Some(midnight_utc(date)), Some(date))
            }
            _ => (None, None),
        };
        claim(
            claimed,
            matches,
            whole.start(),
            whole.end(),
            RawMatch {
                start: whole.start(),
                end: whole.end(),
                reference: TimeReference {
                    original: whole.as_str().to_string(),
                    parsed,
                    kind: TimeKind::Relative,
                },
                day_anchor: anchor,
                clock: None,
            },
        );
    }

    for cap in re_next_this().captures_iter(text) {
        let whole = cap.get(0).unwrap();
        let strict = cap[1].to_lowercase() == "next";
        let target = cap[2].to_lowercase();
        let date = match target.as_str() {
            "week" => Some(today + Duration::weeks(1)),
            "month" => today.checked_add_months(Months::new(1)),
            other => parse_weekday(other).map(|wd| next_weekday(today, wd, strict)),
        };
        claim(
            claimed,
            matches,
            whole.start(),
            whole.end(),
            RawMatch {
                start: whole.start(),
                end: whole.end(),
                reference: TimeReference {
                    original: whole.as_str().to_string(),
                    parsed: date.map(midnight_utc),
                    kind: TimeKind::Relative,
                },
                day_anchor: date,
                clock: None,
            },
        );
    }

    for cap in re_day_word().captures_iter(text) {
        let whole = cap.get(0).unwrap();
        let date = match cap[1].to_lowercase().as_str() {
            "today" | "tonight" => today,
            "tomorrow" => today + Duration::days(1),
            "yesterday" => today - Duration::days(1),
            _ => today,
        };
        claim(
            claimed,
            matches,
            whole.start(),
            whole.end(),
            RawMatch {
                start: whole.start(),
                end: whole.end(),
                reference: TimeReference {
                    original: whole.as_str().to_string(),
                    parsed: Some(midnight_utc(date)),
                    kind: TimeKind::Relative,
                },
                day_anchor: Some(date),
                clock: None,
            },
        );
    }

    // Bare weekday names ("see you Friday") resolve like "this <weekday>"
    for cap in re_weekday().captures_iter(text) {
        let whole = cap.get(0).unwrap();
        let Some(weekday) = parse_weekday(&cap[1].to_lowercase()) else {
            continue;
        };
        let date = next_weekday(today, weekday, false);
        claim(
            claimed,
            matches,
            whole.start(),
            whole.end(),
            RawMatch {
                start: whole.start(),
                end: whole.end(),
                reference: TimeReference {
                    original: whole.as_str().to_string(),
                    parsed: Some(midnight_utc(date)),
                    kind: TimeKind::Relative,
                },
                day_anchor: Some(date),
                clock: None,
            },
        );
    }
}

fn collect_absolute_dates(
    text: &str,
    today: NaiveDate,
    claimed: &mut Vec<(usize, usize)>,
    matches: &mut Vec<RawMatch>,
) {
    for cap in re_iso_date().captures_iter(text) {
        let whole = cap.get(0).unwrap();
        let date = NaiveDate::from_ymd_opt(
            cap[1].parse().unwrap_or(0),
            cap[2].parse().unwrap_or(0),
            cap[3].parse().unwrap_or(0),
        );
        push_absolute_date(claimed, matches, whole.start(), whole.end(), whole.as_str(), date);
    }

    for cap in re_month_day().captures_iter(text) {
        let whole = cap.get(0).unwrap();
        let month = parse_month(&cap[1]);
        let day: u32 = cap[2].parse().unwrap_or(0);
        let year: i32 = cap
            .get(3)
            .and_then(|y| y.as_str().parse().ok())
            .unwrap_or(today.year());
        let date = month.and_then(|m| NaiveDate::from_ymd_opt(year, m, day));
        push_absolute_date(claimed, matches, whole.start(), whole.end(), whole.as_str(), date);
    }

    for cap in re_day_month().captures_iter(text) {
        let whole = cap.get(0).unwrap();
        let day: u32 = cap[1].parse().unwrap_or(0);
        let month = parse_month(&cap[2]);
        let date = month.and_then(|m| NaiveDate::from_ymd_opt(today.year(), m, day));
        push_absolute_date(claimed, matches, whole.start(), whole.end(), whole.as_str(), date);
    }
}

fn push_absolute_date(
    claimed: &mut Vec<(usize, usize)>,
    matches: &mut Vec<RawMatch>,
    start: usize,
    end: usize,
    original: &str,
    date: Option<NaiveDate>,
) {
    claim(
        claimed,
        matches,
        start,
        end,
        RawMatch {
            start,
            end,
            reference: TimeReference {
                original: original.to_string(),
                parsed: date.map(midnight_utc),
                kind: TimeKind::Absolute,
            },
            day_anchor: date,
            clock: None,
        },
    );
}

fn collect_clock_times(
    text: &str,
    claimed: &mut Vec<(usize, usize)>,
    matches: &mut Vec<RawMatch>,
) {
    for cap in re_clock_hm().captures_iter(text) {
        let whole = cap.get(0).unwrap();
        let hour: u32 = cap[1].parse().unwrap_or(99);
        let minute: u32 = cap[2].parse().unwrap_or(99);
        let meridiem = cap.get(3).map(|m| m.as_str().to_lowercase());
        let Some(hour) = resolve_hour(hour, meridiem.as_deref()) else {
            continue;
        };
        if minute > 59 {
            continue;
        }
        push_clock(claimed, matches, whole.start(), whole.end(), whole.as_str(), hour, minute);
    }

    for cap in re_clock_h().captures_iter(text) {
        let whole = cap.get(0).unwrap();
        let hour: u32 = cap[1].parse().unwrap_or(99);
        let meridiem = cap[2].to_lowercase();
        let Some(hour) = resolve_hour(hour, Some(&meridiem)) else {
            continue;
        };
        push_clock(claimed, matches, whole.start(), whole.end(), whole.as_str(), hour, 0);
    }
}

fn push_clock(
    claimed: &mut Vec<(usize, usize)>,
    matches: &mut Vec<RawMatch>,
    start: usize,
    end: usize,
    original: &str,
    hour: u32,
    minute: u32,
) {
    claim(
        claimed,
        matches,
        start,
        end,
        RawMatch {
            start,
            end,
            reference: TimeReference {
                original: original.to_string(),
                parsed: None,
                kind: TimeKind::Absolute,
            },
            day_anchor: None,
            clock: Some((hour, minute)),
        },
    );
}

fn collect_durations(
    text: &str,
    claimed: &mut Vec<(usize, usize)>,
    matches: &mut Vec<RawMatch>,
) {
    for regex in [re_for_amount(), re_bare_amount()] {
        for cap in regex.captures_iter(text) {
            let whole = cap.get(0).unwrap();
            claim(
                claimed,
                matches,
                whole.start(),
                whole.end(),
                RawMatch {
                    start: whole.start(),
                    end: whole.end(),
                    reference: TimeReference {
                        original: whole.as_str().to_string(),
                        parsed: None,
                        kind: TimeKind::Duration,
                    },
                    day_anchor: None,
                    clock: None,
                },
            );
        }
    }
}

// ============================================================================
// RESOLUTION HELPERS
// ============================================================================

fn midnight_utc(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0).expect("midnight exists"))
}

fn parse_quantity(s: &str) -> i64 {
    match s.to_lowercase().as_str() {
        "a" | "an" => 1,
        other => other.parse().unwrap_or(0),
    }
}

fn parse_weekday(s: &str) -> Option<Weekday> {
    match s {
        "monday" => Some(Weekday::Mon),
        "tuesday" => Some(Weekday::Tue),
        "wednesday" => Some(Weekday::Wed),
        "thursday" => Some(Weekday::Thu),
        "friday" => Some(Weekday::Fri),
        "saturday" => Some(Weekday::Sat),
        "sunday" => Some(Weekday::Sun),
        _ => None,
    }
}

/// Next occurrence of `weekday` from `today`. With `strict`, today itself
/// never counts ("next Friday" on a Friday is a week out).
fn next_weekday(today: NaiveDate, weekday: Weekday, strict: bool) -> NaiveDate {
    let current = today.weekday().num_days_from_monday() as i64;
    let target = weekday.num_days_from_monday() as i64;
    let mut ahead = (target - current).rem_euclid(7);
    if ahead == 0 && strict {
        ahead = 7;
    }
    today + Duration::days(ahead)
}

fn parse_month(s: &str) -> Option<u32> {
    match s.to_lowercase().as_str() {
        "january" | "jan" => Some(1),
        "february" | "feb" => Some(2),
        "march" | "mar" => Some(3),
        "april" | "apr" => Some(4),
        "may" => Some(5),
        "june" | "jun" => Some(6),
        "july" | "jul" => Some(7),
        "august" | "aug" => Some(8),
        "september" | "sep" | "sept" => Some(9),
        "october" | "oct" => Some(10),
        "november" | "nov" => Some(11),
        "december" | "dec" => Some(12),
        _ => None,
    }
}

/// 12h hours need a meridiem; 0-23 stands alone
fn resolve_hour(hour: u32, meridiem: Option<&str>) -> Option<u32> {
    match meridiem {
        Some("am") => match hour {
            12 => Some(0),
            1..=11 => Some(hour),
            _ => None,
        },
        Some("pm") => match hour {
            12 => Some(12),
            1..=11 => Some(hour + 12),
            _ => None,
        },
        _ => (hour <= 23).then_some(hour),
    }
}

// ============================================================================
// TESTS
// ============================================================================
