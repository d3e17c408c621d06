use chrono::{Datelike, Duration, NaiveDate, Weekday};

/// This is the standard way of converting a date to a string in timescript. Used both for
/// history file names and for built-in date commands.
pub fn date_to_record_name(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// Most recent occurrence of `weekday` strictly before `today`. When today is that weekday
/// the result is a week ago.
pub fn last_weekday(today: NaiveDate, weekday: Weekday) -> NaiveDate {
    let current = today.weekday().num_days_from_sunday() as i64;
    let target = weekday.num_days_from_sunday() as i64;
    let mut days_since = (current - target + 7) % 7;
    if days_since == 0 {
        days_since = 7;
    }
    today - Duration::days(days_since)
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, Weekday};

    use super::{date_to_record_name, last_weekday};

    // 2025-06-11 is a Wednesday
    fn wednesday() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 11).unwrap()
    }

    #[test]
    fn last_weekday_goes_back_to_previous_occurrence() {
        assert_eq!(
            last_weekday(wednesday(), Weekday::Mon),
            NaiveDate::from_ymd_opt(2025, 6, 9).unwrap()
        );
        assert_eq!(
            last_weekday(wednesday(), Weekday::Tue),
            NaiveDate::from_ymd_opt(2025, 6, 10).unwrap()
        );
        assert_eq!(
            last_weekday(wednesday(), Weekday::Thu),
            NaiveDate::from_ymd_opt(2025, 6, 5).unwrap()
        );
    }

    #[test]
    fn last_weekday_on_same_day_is_a_week_ago() {
        assert_eq!(
            last_weekday(wednesday(), Weekday::Wed),
            NaiveDate::from_ymd_opt(2025, 6, 4).unwrap()
        );
    }

    #[test]
    fn record_name_is_iso_date() {
        assert_eq!(date_to_record_name(wednesday()), "2025-06-11");
    }
}
