//! Collection date consistency checks.
//!
//! `eventDate` and the atomic `year`/`month`/`day` fields are each read as a
//! closed date interval; the record is consistent when the intervals overlap.

use async_trait::async_trait;
use chrono::{Datelike, NaiveDate, Utc};
use kurator_types::record::terms;
use kurator_types::{Record, StageError, StageKind};

use crate::stage::{Validator, Verdict};

/// Inclusive date interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateSpan {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateSpan {
    fn overlaps(self, other: Self) -> bool {
        self.start <= other.end && other.start <= self.end
    }
}

fn last_day_of_month(year: i32, month: u32) -> Option<NaiveDate> {
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)?.pred_opt()
}

fn span_of(year: i32, month: Option<u32>, day: Option<u32>) -> Option<DateSpan> {
    match (month, day) {
        (None, None) => Some(DateSpan {
            start: NaiveDate::from_ymd_opt(year, 1, 1)?,
            end: NaiveDate::from_ymd_opt(year, 12, 31)?,
        }),
        (Some(m), None) => Some(DateSpan {
            start: NaiveDate::from_ymd_opt(year, m, 1)?,
            end: last_day_of_month(year, m)?,
        }),
        (Some(m), Some(d)) => {
            let date = NaiveDate::from_ymd_opt(year, m, d)?;
            Some(DateSpan {
                start: date,
                end: date,
            })
        }
        (None, Some(_)) => None,
    }
}

fn parse_single(raw: &str) -> Option<DateSpan> {
    // Datetimes are read at day precision.
    let date_part = raw.split('T').next()?.trim();
    let parts: Vec<&str> = date_part.split('-').collect();
    let year: i32 = match parts.first() {
        Some(y) if y.len() == 4 => y.parse().ok()?,
        _ => return None,
    };
    let component = |i: usize| -> Option<Option<u32>> {
        match parts.get(i) {
            None => Some(None),
            Some(p) if (1..=2).contains(&p.len()) => p.parse().ok().map(Some),
            Some(_) => None,
        }
    };
    if parts.len() > 3 {
        return None;
    }
    span_of(year, component(1)?, component(2)?)
}

/// Parse an `eventDate`: `YYYY`, `YYYY-MM`, `YYYY-MM-DD`, an ISO datetime, or
/// a `start/end` range of those.
#[must_use]
pub fn parse_event_date(raw: &str) -> Option<DateSpan> {
    let raw = raw.trim();
    match raw.split_once('/') {
        Some((from, to)) => {
            let from = parse_single(from)?;
            let to = parse_single(to)?;
            (from.start <= to.end).then_some(DateSpan {
                start: from.start,
                end: to.end,
            })
        }
        None => parse_single(raw),
    }
}

fn parse_component(record: &Record, term: &str) -> Result<Option<u32>, String> {
    record
        .field(term)
        .map(|raw| {
            raw.trim()
                .parse::<u32>()
                .map_err(|_| format!("{term} '{raw}' is not a number"))
        })
        .transpose()
}

pub struct EventDateValidator {
    service: String,
    today: Option<NaiveDate>,
}

impl EventDateValidator {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            today: None,
        }
    }

    /// Fix the reference date used for the no-future-dates rule.
    #[must_use]
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = Some(today);
        self
    }

    fn today(&self) -> NaiveDate {
        self.today.unwrap_or_else(|| Utc::now().date_naive())
    }

    fn check(&self, record: &mut Record) -> Result<Verdict, String> {
        let year = parse_component(record, terms::YEAR)?;
        let month = parse_component(record, terms::MONTH)?;
        let day = parse_component(record, terms::DAY)?;

        let atomic = match year {
            Some(y) => {
                let y = i32::try_from(y).map_err(|_| format!("year {y} is out of range"))?;
                Some(span_of(y, month, day).ok_or_else(|| {
                    format!(
                        "year/month/day {y}/{}/{} is not a calendar date",
                        month.map_or("-".to_string(), |m| m.to_string()),
                        day.map_or("-".to_string(), |d| d.to_string()),
                    )
                })?)
            }
            None if month.is_some() || day.is_some() => {
                return Err("month or day given without a year".to_string());
            }
            None => None,
        };

        let today = self.today();
        match (record.field(terms::EVENT_DATE).map(str::to_string), atomic) {
            (Some(raw), atomic) => {
                let span = parse_event_date(&raw)
                    .ok_or_else(|| format!("eventDate '{raw}' is not a recognised date"))?;
                if span.start > today {
                    return Err(format!("eventDate '{raw}' is in the future"));
                }
                if let Some(atomic) = atomic {
                    if !span.overlaps(atomic) {
                        return Err(format!(
                            "eventDate '{raw}' is inconsistent with year/month/day"
                        ));
                    }
                }
                Ok(Verdict::Pass(format!("eventDate '{raw}' is consistent")))
            }
            (None, Some(atomic)) => {
                if atomic.start > today {
                    return Err("year/month/day is in the future".to_string());
                }
                let built = match (month, day) {
                    (Some(_), Some(_)) => atomic.start.format("%Y-%m-%d").to_string(),
                    (Some(_), None) => atomic.start.format("%Y-%m").to_string(),
                    _ => atomic.start.year().to_string(),
                };
                record.set_field(terms::EVENT_DATE, built.clone());
                Ok(Verdict::Amend(format!(
                    "eventDate '{built}' built from year/month/day"
                )))
            }
            (None, None) => Ok(Verdict::Pass("no collection date to validate".to_string())),
        }
    }
}

#[async_trait]
impl Validator for EventDateValidator {
    fn kind(&self) -> StageKind {
        StageKind::EventDate
    }

    fn service(&self) -> &str {
        &self.service
    }

    async fn validate(&self, record: &mut Record) -> Result<Verdict, StageError> {
        Ok(self.check(record).unwrap_or_else(Verdict::Reject))
    }
}
