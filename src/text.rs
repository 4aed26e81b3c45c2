//! Plain string helpers used by the extractor and the orchestrator.

/// Collapses every run of whitespace (newlines included) into one ASCII space and trims.
pub fn clean_string(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Returns the amount part of a price cell: the text before `currency_symbol`, trimmed.
/// Without the symbol the whole (trimmed) text is the amount.
pub fn split_price<'a>(raw_price: &'a str, currency_symbol: &str) -> &'a str {
    if currency_symbol.is_empty() {
        return raw_price.trim();
    }
    raw_price
        .split(currency_symbol)
        .next()
        .unwrap_or_default()
        .trim()
}

/// First `limit` characters of `body` followed by `...`, or `empty body`.
pub fn excerpt(body: &str, limit: usize) -> String {
    if body.is_empty() {
        return "empty body".to_string();
    }
    let head: String = body.chars().take(limit).collect();
    format!("{head}...")
}
