//! Small helpers shared by the store, the sync engine, and the clients.

const MAX_ERROR_TEXT_CHARS: usize = 180;

/// Current wall-clock time as Unix milliseconds; every stored timestamp uses it.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Trimmed text, or `None` for missing or blank input (notes, URLs, tokens).
pub fn normalize_text_option(value: Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|trimmed| !trimmed.is_empty())
        .map(str::to_string)
}

/// Whether a configured backend URL has an HTTP(S) scheme.
pub fn is_http_url(value: &str) -> bool {
    ["http://", "https://"]
        .iter()
        .any(|scheme| value.starts_with(scheme))
}

/// Server error bodies are cut down before they reach logs and summaries.
pub fn compact_text(value: &str) -> String {
    value.trim().chars().take(MAX_ERROR_TEXT_CHARS).collect()
}

/// Round to `decimals` places, halves away from zero.
pub fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10_f64.powi(i32::try_from(decimals).unwrap_or(i32::MAX));
    (value * factor).round() / factor
}
