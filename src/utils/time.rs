use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, TimeZone, Utc};

pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Wall-clock time in the organisation's zone, as a UTC instant.
pub fn at_local(offset: &FixedOffset, day: NaiveDate, time: NaiveTime) -> Option<DateTime<Utc>> {
    offset
        .from_local_datetime(&day.and_time(time))
        .single()
        .map(|dt| dt.with_timezone(&Utc))
}

pub fn local_date(offset: &FixedOffset, instant: DateTime<Utc>) -> NaiveDate {
    instant.with_timezone(offset).date_naive()
}

pub fn to_local_rfc3339(offset: &FixedOffset, instant: DateTime<Utc>) -> String {
    instant.with_timezone(offset).to_rfc3339()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_nine_am_in_tokyo_is_midnight_utc() {
        let tokyo = FixedOffset::east_opt(9 * 3600).unwrap();
        let day = NaiveDate::from_ymd_opt(2031, 3, 4).unwrap();
        let instant = at_local(&tokyo, day, NaiveTime::from_hms_opt(9, 0, 0).unwrap()).unwrap();
        assert_eq!(instant.to_rfc3339(), "2031-03-04T00:00:00+00:00");
        assert_eq!(local_date(&tokyo, instant), day);
        assert_eq!(to_local_rfc3339(&tokyo, instant), "2031-03-04T09:00:00+09:00");
    }
}
