//! Calendar generation.

use covtrack_model::DateKey;

/// Produces the ordered days the reconciler expects to hold.
pub trait CalendarGenerator: Send + Sync {
    /// Every day from `earliest` through `today`, inclusive and ascending.
    /// Empty when `earliest` is after `today`.
    fn all_dates_from(&self, earliest: DateKey, today: DateKey) -> Vec<DateKey>;
}

/// One key per calendar day.
#[derive(Debug, Clone, Copy, Default)]
pub struct DailyCalendar;

impl CalendarGenerator for DailyCalendar {
    fn all_dates_from(&self, earliest: DateKey, today: DateKey) -> Vec<DateKey> {
        let span = earliest.days_until(&today);
        if span < 0 {
            return Vec::new();
        }

        let mut dates = Vec::with_capacity(span as usize + 1);
        let mut current = Some(earliest);
        while let Some(date) = current {
            if date > today {
                break;
            }
            dates.push(date);
            current = date.next_day();
        }
        dates
    }
}
