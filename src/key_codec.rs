//! Pure total functions from domain identifiers to partition/sort/index
//! keys (spec §4.1). No I/O. `#` is the segment separator; null or empty
//! segments are dropped, mirroring `core/database/keys.py::_concat`.

use chrono::NaiveDate;

fn concat(parts: &[Option<&str>]) -> String {
    parts
        .iter()
        .filter_map(|p| *p)
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("#")
}

/// Primary partition key for stock-level (equity/ETF/etc.) entities.
pub fn pk_stock(symbol: &str) -> String {
    concat(&[Some("STOCK"), Some(symbol)])
}

/// Primary partition key for index-level entities, kept distinct from
/// `pk_stock` so the two entity families never collide in one table.
pub fn pk_index(symbol: &str) -> String {
    concat(&[Some("INDEX"), Some(symbol)])
}

/// Sort key for metadata entities, e.g. `META#CATALOG`.
pub fn sk_meta(entity_type: &str, timestamp_iso: Option<&str>) -> String {
    concat(&[Some("META"), Some(entity_type), timestamp_iso])
}

/// Sort key for a quote row on a given calendar date, e.g. `QUOTE#2025-08-08`.
/// Lexicographic ordering of ISO dates is chronological by construction.
pub fn sk_quote_date(d: NaiveDate) -> String {
    concat(&[Some("QUOTE"), Some(&d.format("%Y-%m-%d").to_string())])
}

/// `bySymbol` GSI partition key.
pub fn gsi1pk_symbol(symbol: &str) -> String {
    concat(&[Some("SYMBOL"), Some(symbol)])
}

/// `bySymbol` GSI sort key for symbol-entity timeline queries.
pub fn gsi1sk_entity(entity: &str, timestamp_iso: Option<&str>) -> String {
    concat(&[Some("ENTITY"), Some(entity), timestamp_iso])
}

/// `byMarketStatus` GSI partition key.
pub fn gsi2pk_market_status(market: &str, status: &str) -> String {
    concat(&[Some("MARKET"), Some(market), Some("STATUS"), Some(status)])
}

/// `byMarketStatus` GSI sort key for market-status entity timeline queries.
pub fn gsi2sk_entity(entity: &str, timestamp_iso: Option<&str>) -> String {
    concat(&[Some("ENTITY"), Some(entity), timestamp_iso])
}

/// Score index sort key: `<zero-padded-score>#<symbol>`. Padding width is
/// fixed at 9 characters (5 integer digits + `.` + 3 decimals) so lexical
/// comparison agrees with numeric comparison across the full nonnegative
/// range used by Company scores.
pub fn score_sort_key(score: f64, symbol: &str) -> String {
    format!("{:09.3}#{}", score.max(0.0), symbol)
}

/// The bare padded-score prefix (no symbol) used for `>=` range scans.
pub fn score_prefix(min_score: f64) -> String {
    format!("{:09.3}#", min_score.max(0.0))
}
