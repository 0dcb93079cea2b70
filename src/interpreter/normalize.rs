use url::Url;

/// Turn what a user typed after "go to" into an absolute url.
/// A missing scheme becomes https and a bare word gets `.com`.
pub fn normalize_url(raw: &str) -> String {
    let trimmed = raw
        .trim()
        .trim_matches(|c| c == '"' || c == '\'')
        .trim_end_matches(|c| c == '.' || c == ',');

    let absolute = if trimmed.contains("://") || trimmed.starts_with("about:") {
        trimmed.to_string()
    } else if trimmed.contains('.') || trimmed.starts_with("localhost") {
        format!("https://{}", trimmed)
    } else {
        format!("https://{}.com", trimmed)
    };

    match Url::parse(&absolute) {
        Ok(url) => url.to_string(),
        Err(_) => absolute,
    }
}

/// CSS-looking strings are used as selectors rather than visible text.
pub fn looks_like_selector(value: &str) -> bool {
    let value = value.trim();
    value.starts_with('#')
        || value.starts_with('.')
        || value.starts_with('[')
        || value.contains("[name=")
        || value.contains(" > ")
}
