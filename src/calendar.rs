//! Trading calendar interface (spec §4.8, §6): `is_trading_day`,
//! `last_trading_day`, `infer_market_from_symbol`. Grounded in
//! `core/data_collector/calendar.py`'s market-to-exchange mapping, with a
//! lightweight weekday-based calendar standing in for the pandas-market-
//! calendars dependency the Python source reaches for (this crate treats
//! holiday calendars as an external collaborator, per spec §1).

use chrono::{Datelike, Days, NaiveDate, Weekday};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Market {
    Us,
    Cn,
}

impl Market {
    /// Exchange code used by the mapped calendar (Shanghai for CN, NYSE for US).
    pub fn exchange_code(&self) -> &'static str {
        match self {
            Market::Us => "XNYS",
            Market::Cn => "XSHG",
        }
    }

    pub fn from_str_loose(s: &str) -> Option<Market> {
        match s.trim().to_uppercase().as_str() {
            "US" => Some(Market::Us),
            "CN" | "CN_A" => Some(Market::Cn),
            _ => None,
        }
    }
}

pub trait TradingCalendar: Send + Sync {
    fn is_trading_day(&self, market: &str, date: NaiveDate) -> bool;
    fn last_trading_day(&self, market: &str, date: NaiveDate) -> NaiveDate;
}

/// Weekday-only calendar: trading days are Mon-Fri. Unknown markets are
/// treated permissively (always a trading day) per spec §6.
pub struct WeekdayCalendar;

impl TradingCalendar for WeekdayCalendar {
    fn is_trading_day(&self, market: &str, date: NaiveDate) -> bool {
        if Market::from_str_loose(market).is_none() {
            return true;
        }
        !matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
    }

    fn last_trading_day(&self, market: &str, date: NaiveDate) -> NaiveDate {
        if Market::from_str_loose(market).is_none() {
            return date;
        }
        let mut cursor = date;
        while matches!(cursor.weekday(), Weekday::Sat | Weekday::Sun) {
            cursor = cursor.checked_sub_days(Days::new(1)).unwrap_or(cursor);
        }
        cursor
    }
}

/// Infers the market from a unified symbol's prefix (spec §3 symbol forms).
pub fn infer_market_from_symbol(symbol: &str) -> Option<Market> {
    let s = symbol.trim().to_uppercase();
    if s.starts_with("US:") {
        return Some(Market::Us);
    }
    if s.starts_with("CN:") || s.starts_with("SH") || s.starts_with("SZ") || s.starts_with("BJ") {
        return Some(Market::Cn);
    }
    if s == "GLOBAL:VIX" {
        return Some(Market::Us);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn unknown_market_is_permissive() {
        let cal = WeekdayCalendar;
        let saturday = d(2025, 9, 13);
        assert!(cal.is_trading_day("ZZZ", saturday));
    }

    #[test]
    fn weekend_is_not_a_trading_day_for_known_markets() {
        let cal = WeekdayCalendar;
        let saturday = d(2025, 9, 13);
        assert!(!cal.is_trading_day("US", saturday));
        assert_eq!(cal.last_trading_day("US", saturday), d(2025, 9, 12));
    }

    #[test]
    fn infers_market_from_symbol_prefix() {
        assert_eq!(infer_market_from_symbol("US:SPY"), Some(Market::Us));
        assert_eq!(infer_market_from_symbol("SH600519"), Some(Market::Cn));
        assert_eq!(infer_market_from_symbol("GLOBAL:VIX"), Some(Market::Us));
        assert_eq!(infer_market_from_symbol("XX:FOO"), None);
    }
}
