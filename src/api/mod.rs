use chrono::{Datelike, Months, NaiveDate};

pub mod consumers;
pub mod usage;

/// Identity of the logged-in user, as reported by the userinfo endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserInfo {
    pub user_id: String,
    pub org_id: String,
}

/// One metering point under the organization's shipping address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection {
    pub market_segment: String,
    pub connection_id: String,
}

/// Inclusive range of calendar days.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    /// The whole calendar month containing `day`.
    pub fn month_of(day: NaiveDate) -> Self {
        let start = day.with_day(1).unwrap_or(day);
        let end = start
            .checked_add_months(Months::new(1))
            .and_then(|next_month| next_month.pred_opt())
            .unwrap_or(day);
        DateRange { start, end }
    }

    pub fn days(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        let end = self.end;
        self.start.iter_days().take_while(move |day| *day <= end)
    }

    pub(crate) fn to_query_string(&self) -> Vec<(String, String)> {
        vec![
            ("startDate".to_string(), self.start.to_string()),
            ("endDate".to_string(), self.end.to_string()),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    #[test]
    fn days_is_inclusive_on_both_ends() {
        let range = DateRange {
            start: date("2024-03-30"),
            end: date("2024-04-02"),
        };
        let days: Vec<NaiveDate> = range.days().collect();
        assert_eq!(
            days,
            vec![
                date("2024-03-30"),
                date("2024-03-31"),
                date("2024-04-01"),
                date("2024-04-02"),
            ]
        );
    }

    #[test]
    fn single_day_range_yields_one_day() {
        let range = DateRange {
            start: date("2024-03-10"),
            end: date("2024-03-10"),
        };
        assert_eq!(range.days().count(), 1);
    }

    #[test]
    fn month_of_covers_the_whole_month() {
        let range = DateRange::month_of(date("2024-02-13"));
        assert_eq!(range.start, date("2024-02-01"));
        assert_eq!(range.end, date("2024-02-29"));
    }

    #[test]
    fn query_string_uses_iso_dates() {
        let range = DateRange {
            start: date("2024-03-01"),
            end: date("2024-03-31"),
        };
        assert_eq!(
            range.to_query_string(),
            vec![
                ("startDate".to_string(), "2024-03-01".to_string()),
                ("endDate".to_string(), "2024-03-31".to_string()),
            ]
        );
    }
}
