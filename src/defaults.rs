use chrono::{NaiveTime, Weekday};

pub const DEFAULT_MAX_STOPS_PER_BATCH: usize = 10;
pub const DEFAULT_SERVICE_MINUTES_PER_STOP: u32 = 5;
pub const DEFAULT_ROUTING_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_GEOCODING_TIMEOUT_SECS: u64 = 5;
pub const DEFAULT_MAX_CONCURRENT_REQUESTS: usize = 4;

pub fn default_route_start() -> NaiveTime {
    NaiveTime::from_hms_opt(9, 0, 0).expect("valid static route start")
}

pub fn default_delivery_weekdays() -> Vec<Weekday> {
    vec![Weekday::Tue, Weekday::Fri]
}
