//! Query-string parsing and encoding.

use rustc_hash::FxHashMap;

/// Parse a query string (with or without the leading `?`) into a map.
/// Later duplicates win.
pub fn parse_query(query: &str) -> FxHashMap<String, String> {
    let query = query.strip_prefix('?').unwrap_or(query);
    let mut out = FxHashMap::default();
    for pair in query.split('&').filter(|p| !p.is_empty()) {
        let (key, value) = match pair.split_once('=') {
            Some((k, v)) => (k, v),
            None => (pair, ""),
        };
        let key = urlencoding::decode(key)
            .map(|s| s.into_owned())
            .unwrap_or_else(|_| key.to_string());
        let value = urlencoding::decode(value)
            .map(|s| s.into_owned())
            .unwrap_or_else(|_| value.to_string());
        out.insert(key, value);
    }
    out
}

/// Encode a map as a query string without the leading `?`. Keys are
/// sorted so encodings are stable.
pub fn encode_query(params: &FxHashMap<String, String>) -> String {
    let mut keys: Vec<&String> = params.keys().collect();
    keys.sort();
    keys.iter()
        .map(|key| {
            format!(
                "{}={}",
                urlencoding::encode(key),
                urlencoding::encode(&params[*key])
            )
        })
        .collect::<Vec<_>>()
        .join("&")
}
