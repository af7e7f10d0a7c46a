//! Japanese public holiday table.
//!
//! Covers fixed-date holidays, "Happy Monday" holidays (nth Monday of a month),
//! the vernal/autumnal equinox approximation valid for 1980-2099, and substitute
//! holidays for holidays falling on a Sunday.

use chrono::{Datelike, NaiveDate, Weekday};

const FIXED: &[(u32, u32, &str)] = &[
    (1, 1, "New Year's Day"),
    (2, 11, "National Foundation Day"),
    (2, 23, "Emperor's Birthday"),
    (4, 29, "Showa Day"),
    (5, 3, "Constitution Memorial Day"),
    (5, 4, "Greenery Day"),
    (5, 5, "Children's Day"),
    (8, 11, "Mountain Day"),
    (11, 3, "Culture Day"),
    (11, 23, "Labor Thanksgiving Day"),
];

/// (month, nth Monday, name)
const HAPPY_MONDAYS: &[(u32, u8, &str)] = &[
    (1, 2, "Coming of Age Day"),
    (7, 3, "Marine Day"),
    (9, 3, "Respect for the Aged Day"),
    (10, 2, "Sports Day"),
];

pub fn is_holiday(date: NaiveDate) -> bool {
    holiday_name(date).is_some()
}

pub fn is_weekend(date: NaiveDate) -> bool {
    matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

pub fn is_business_day(date: NaiveDate) -> bool {
    !is_weekend(date) && !is_holiday(date)
}

pub fn holiday_name(date: NaiveDate) -> Option<&'static str> {
    base_holiday(date).or_else(|| is_substitute_holiday(date).then_some("Substitute Holiday"))
}

fn base_holiday(date: NaiveDate) -> Option<&'static str> {
    let (year, month, day) = (date.year(), date.month(), date.day());

    if let Some((_, _, name)) = FIXED.iter().find(|(m, d, _)| *m == month && *d == day) {
        return Some(*name);
    }

    for (m, nth, name) in HAPPY_MONDAYS {
        if *m == month && NaiveDate::from_weekday_of_month_opt(year, month, Weekday::Mon, *nth) == Some(date) {
            return Some(*name);
        }
    }

    if month == 3 && Some(day) == vernal_equinox_day(year) {
        return Some("Vernal Equinox Day");
    }
    if month == 9 && Some(day) == autumnal_equinox_day(year) {
        return Some("Autumnal Equinox Day");
    }

    None
}

/// A weekday becomes a holiday when the run of holidays right before it started on a Sunday.
fn is_substitute_holiday(date: NaiveDate) -> bool {
    if base_holiday(date).is_some() {
        return false;
    }
    let mut cursor = date.pred_opt();
    while let Some(day) = cursor {
        if base_holiday(day).is_none() {
            return false;
        }
        if day.weekday() == Weekday::Sun {
            return true;
        }
        cursor = day.pred_opt();
    }
    false
}

fn vernal_equinox_day(year: i32) -> Option<u32> {
    equinox_day(year, 20.8431)
}

fn autumnal_equinox_day(year: i32) -> Option<u32> {
    equinox_day(year, 23.2488)
}

fn equinox_day(year: i32, base: f64) -> Option<u32> {
    if !(1980..=2099).contains(&year) {
        return None;
    }
    let elapsed = (year - 1980) as f64;
    let day = base + 0.242194 * elapsed - (elapsed / 4.0).floor();
    Some(day.floor() as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn fixed_dates() {
        assert_eq!(holiday_name(d(2025, 1, 1)), Some("New Year's Day"));
        assert!(is_holiday(d(2025, 11, 3)));
        assert!(!is_holiday(d(2025, 11, 4)));
    }

    #[test]
    fn happy_mondays_2025() {
        assert_eq!(holiday_name(d(2025, 1, 13)), Some("Coming of Age Day"));
        assert_eq!(holiday_name(d(2025, 7, 21)), Some("Marine Day"));
        assert_eq!(holiday_name(d(2025, 9, 15)), Some("Respect for the Aged Day"));
        assert_eq!(holiday_name(d(2025, 10, 13)), Some("Sports Day"));
        assert!(!is_holiday(d(2025, 1, 6)));
    }

    #[test]
    fn equinox_approximation() {
        assert!(is_holiday(d(2024, 3, 20)));
        assert!(is_holiday(d(2024, 9, 22)));
        assert!(is_holiday(d(2025, 3, 20)));
        assert!(is_holiday(d(2025, 9, 23)));
        assert!(!is_holiday(d(2025, 3, 21)));
    }

    #[test]
    fn substitute_after_sunday_holiday() {
        // Nov 23 2025 is a Sunday.
        assert_eq!(holiday_name(d(2025, 11, 24)), Some("Substitute Holiday"));
        // Golden Week 2025: May 4 (Sun), May 5 (Mon) -> May 6 is the substitute.
        assert!(is_holiday(d(2025, 5, 6)));
        assert!(!is_holiday(d(2025, 5, 7)));
    }

    #[test]
    fn weekends_are_not_business_days() {
        assert!(!is_business_day(d(2031, 3, 1)));
        assert!(!is_business_day(d(2031, 3, 2)));
        assert!(is_business_day(d(2031, 3, 3)));
    }
}
