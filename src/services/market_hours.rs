use chrono::{DateTime, Datelike, Timelike, Utc, Weekday};
use chrono_tz::Tz;
use std::time::Duration;

/// Exchange timezone for the Indian equity market.
pub const MARKET_TIMEZONE: Tz = chrono_tz::Asia::Kolkata;

const SECONDS_PER_DAY: i64 = 86_400;

/// Trading session configuration for NSE
pub struct MarketHours {
    pub open_minute_of_day: u32,  // 555 for 9:15 AM
    pub close_minute_of_day: u32, // 930 for 3:30 PM
    pub weekdays_only: bool,
}

impl Default for MarketHours {
    fn default() -> Self {
        Self {
            open_minute_of_day: 9 * 60 + 15,
            close_minute_of_day: 15 * 60 + 30,
            weekdays_only: true,
        }
    }
}

/// Check if the market is open right now (exchange-local wall clock).
pub fn is_market_open() -> bool {
    is_open_at(Utc::now().with_timezone(&MARKET_TIMEZONE))
}

/// Check if the market is open at the given exchange-local time.
pub fn is_open_at(now_local: DateTime<Tz>) -> bool {
    let config = MarketHours::default();

    if config.weekdays_only {
        match now_local.weekday() {
            Weekday::Sat | Weekday::Sun => return false,
            _ => {}
        }
    }

    let minute_of_day = now_local.hour() * 60 + now_local.minute();
    minute_of_day >= config.open_minute_of_day && minute_of_day < config.close_minute_of_day
}

pub fn now_in_market_tz() -> DateTime<Tz> {
    Utc::now().with_timezone(&MARKET_TIMEZONE)
}

/// Delay until the next daily occurrence of `hour:minute` exchange time.
///
/// If the wall clock is exactly at the target, the next occurrence is
/// tomorrow (a run that just fired must not refire immediately).
pub fn delay_until_daily(hour: u32, minute: u32) -> Duration {
    delay_until_daily_at(now_in_market_tz(), hour, minute)
}

pub fn delay_until_daily_at(now_local: DateTime<Tz>, hour: u32, minute: u32) -> Duration {
    let seconds_now =
        (now_local.hour() * 3600 + now_local.minute() * 60 + now_local.second()) as i64;
    let seconds_target = (hour * 3600 + minute * 60) as i64;

    let mut delta = seconds_target - seconds_now;
    if delta <= 0 {
        delta += SECONDS_PER_DAY;
    }

    Duration::from_secs(delta as u64)
}

/// Delay until the next weekly occurrence of `weekday` at `hour:minute`
/// exchange time.
pub fn delay_until_weekly(weekday: Weekday, hour: u32, minute: u32) -> Duration {
    delay_until_weekly_at(now_in_market_tz(), weekday, hour, minute)
}

pub fn delay_until_weekly_at(
    now_local: DateTime<Tz>,
    weekday: Weekday,
    hour: u32,
    minute: u32,
) -> Duration {
    let seconds_now =
        (now_local.hour() * 3600 + now_local.minute() * 60 + now_local.second()) as i64;
    let seconds_target = (hour * 3600 + minute * 60) as i64;

    let days_ahead = (weekday.num_days_from_monday() as i64
        - now_local.weekday().num_days_from_monday() as i64)
        .rem_euclid(7);

    let mut delta = days_ahead * SECONDS_PER_DAY + seconds_target - seconds_now;
    if delta <= 0 {
        delta += 7 * SECONDS_PER_DAY;
    }

    Duration::from_secs(delta as u64)
}
