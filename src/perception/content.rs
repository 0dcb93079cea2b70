use scraper::{ElementRef, Html, Selector};

const MAIN_CONTENT_SELECTORS: &[&str] = &[
    "main",
    "[role=\"main\"]",
    "article",
    "#content",
    ".content",
    "#main",
    ".main",
    "section",
];

const NEVER_TEXT: &[&str] = &["script", "style", "noscript", "template", "head"];
const PAGE_CHROME: &[&str] = &["header", "footer", "nav"];

/// Text of the page's main content area, one text run per line. Falls back
/// to the body without header, footer and navigation.
pub fn extract_main_content(html: &str) -> String {
    let document = Html::parse_document(html);

    for raw in MAIN_CONTENT_SELECTORS {
        let Ok(selector) = Selector::parse(raw) else {
            continue;
        };
        if let Some(element) = document.select(&selector).next() {
            return visible_text(element, NEVER_TEXT);
        }
    }

    let skip: Vec<&str> = NEVER_TEXT.iter().chain(PAGE_CHROME).copied().collect();
    match Selector::parse("body") {
        Ok(body) => document
            .select(&body)
            .next()
            .map(|el| visible_text(el, &skip))
            .unwrap_or_default(),
        Err(_) => String::new(),
    }
}

fn visible_text(root: ElementRef, skip: &[&str]) -> String {
    let mut lines = Vec::new();
    for node in root.descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let hidden = node.ancestors().any(|ancestor| {
            ancestor
                .value()
                .as_element()
                .map(|el| skip.contains(&el.name()))
                .unwrap_or(false)
        });
        let trimmed = text.trim();
        if !hidden && !trimmed.is_empty() {
            lines.push(trimmed.to_string());
        }
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefers_main_element() {
        let html = r#"<html><body>
            <header>Site header</header>
            <main><h1>Laptops</h1><script>var x = 1;</script><p>Cheapest first</p></main>
            <footer>Footer</footer>
        </body></html>"#;
        assert_eq!(extract_main_content(html), "Laptops\nCheapest first");
    }

    #[test]
    fn test_body_fallback_drops_page_chrome() {
        let html = r#"<html><head><title>T</title></head><body>
            <nav><a href="/">Home</a></nav>
            <div>Hello <b>world</b></div>
            <footer>Footer</footer>
        </body></html>"#;
        assert_eq!(extract_main_content(html), "Hello\nworld");
    }

    #[test]
    fn test_empty_document() {
        assert_eq!(extract_main_content(""), "");
    }
}
