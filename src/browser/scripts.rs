// scripts evaluated in the page, each returns a JSON-serialisable value

/// Installs a MutationObserver on first use and reports how long the DOM has
/// been quiet.
pub fn generate_stability_probe_script() -> &'static str {
    r#"
    (() => {
        if (!window.__webpilotObserver) {
            window.__webpilotMutations = 0;
            window.__webpilotLastMutation = Date.now();
            window.__webpilotObserver = new MutationObserver(() => {
                window.__webpilotMutations += 1;
                window.__webpilotLastMutation = Date.now();
            });
            window.__webpilotObserver.observe(document, {
                subtree: true, childList: true, attributes: true, characterData: true
            });
        }
        return {
            ready_state: document.readyState,
            mutation_count: window.__webpilotMutations,
            quiet_ms: Date.now() - window.__webpilotLastMutation
        };
    })()
    "#
}

pub fn generate_enumeration_script() -> &'static str {
    r#"
    (() => {
        const cssPath = (el) => {
            const parts = [];
            while (el && el.nodeType === 1 && el !== document.documentElement) {
                let part = el.tagName.toLowerCase();
                const parent = el.parentElement;
                if (parent) {
                    const same = Array.from(parent.children).filter(c => c.tagName === el.tagName);
                    if (same.length > 1) {
                        part += ':nth-of-type(' + (same.indexOf(el) + 1) + ')';
                    }
                }
                parts.unshift(part);
                el = parent;
            }
            return 'html > ' + parts.join(' > ');
        };
        const query = 'a[href], button, [role="button"], [role="link"], input:not([type="hidden"]), '
            + 'textarea, select, [onclick], [contenteditable="true"]';
        const vh = window.innerHeight;
        const vw = window.innerWidth;
        const docHeight = document.documentElement.scrollHeight;
        const elements = Array.from(document.querySelectorAll(query)).map(el => {
            const r = el.getBoundingClientRect();
            const style = window.getComputedStyle(el);
            const visible = r.width > 0 && r.height > 0
                && style.visibility !== 'hidden'
                && style.display !== 'none'
                && parseFloat(style.opacity || '1') > 0;
            const top = r.top + window.scrollY;
            const isButtonInput = el.tagName === 'INPUT' && (el.type === 'submit' || el.type === 'button');
            return {
                tag: el.tagName.toLowerCase(),
                role_attr: el.getAttribute('role'),
                input_type: el.getAttribute('type'),
                text: (el.innerText || el.textContent || '').trim().replace(/\s+/g, ' ').substring(0, 200),
                id: el.id || null,
                test_id: el.getAttribute('data-testid'),
                name: el.getAttribute('name'),
                aria_label: el.getAttribute('aria-label'),
                placeholder: el.getAttribute('placeholder'),
                value: isButtonInput ? el.value : null,
                href: el.getAttribute('href'),
                css_path: cssPath(el),
                visible: visible,
                in_viewport: r.bottom > 0 && r.right > 0 && r.top < vh && r.left < vw,
                scroll_reachable: top >= 0 && top < docHeight && r.left >= 0 && r.left < vw,
                x: r.left,
                y: top,
                width: r.width,
                height: r.height
            };
        });
        return {
            url: location.href,
            title: document.title,
            mutation_count: window.__webpilotMutations || 0,
            elements: elements
        };
    })()
    "#
}

/// Page outline returned by `extract data`.
pub fn generate_outline_script() -> &'static str {
    r#"
    (() => {
        const text = el => (el.innerText || el.textContent || '').trim();
        const buttons = Array.from(document.querySelectorAll(
            'button, [role="button"], .btn, input[type="button"], input[type="submit"]'
        )).map(el => ({
            text: text(el) || el.value || '',
            visible: el.offsetParent !== null,
            disabled: el.disabled || false
        })).filter(b => b.text !== '');
        const links = Array.from(document.querySelectorAll('a[href]')).map(el => ({
            text: text(el),
            href: el.href,
            visible: el.offsetParent !== null
        })).filter(l => l.text !== '');
        const formFields = Array.from(document.querySelectorAll('input:not([type="hidden"]), textarea, select'))
            .map(el => ({
                type: el.type || el.tagName.toLowerCase(),
                name: el.name || '',
                id: el.id || '',
                placeholder: el.placeholder || '',
                label: el.labels && el.labels.length > 0 ? text(el.labels[0]) : '',
                value: el.value || '',
                disabled: el.disabled || false
            }));
        const sections = Array.from(document.querySelectorAll(
            'main, [role="main"], article, section, .content, #content, .main, #main'
        )).map(el => ({
            tag: el.tagName.toLowerCase(),
            id: el.id || '',
            classes: Array.from(el.classList).join(' '),
            text_sample: text(el).substring(0, 100),
            children_count: el.children.length
        }));
        const navigation = Array.from(document.querySelectorAll(
            'nav, [role="navigation"], .nav, #nav, .navigation, #navigation, .menu, #menu'
        )).map(el => ({
            tag: el.tagName.toLowerCase(),
            id: el.id || '',
            items: Array.from(el.querySelectorAll('a, button')).map(text).filter(t => t !== '')
        }));
        return {
            metadata: { url: location.href, title: document.title },
            buttons: buttons,
            links: links,
            form_fields: formFields,
            content_sections: sections,
            navigation: navigation
        };
    })()
    "#
}

pub fn generate_find_text_script(needle: &str) -> String {
    // serde_json quoting keeps the needle a plain string literal
    let literal = serde_json::to_string(needle).unwrap_or_else(|_| "\"\"".to_string());
    format!(
        r#"
    ((needle) => {{
        const wanted = needle.toLowerCase();
        const walker = document.createTreeWalker(document.body, NodeFilter.SHOW_TEXT);
        let node;
        while ((node = walker.nextNode())) {{
            if (node.textContent.toLowerCase().includes(wanted)) {{
                const range = document.createRange();
                range.selectNode(node);
                const selection = window.getSelection();
                selection.removeAllRanges();
                selection.addRange(range);
                try {{ node.parentNode.scrollIntoView({{ block: 'center' }}); }} catch (e) {{}}
                return true;
            }}
        }}
        return false;
    }})({})
    "#,
        literal
    )
}

pub fn generate_clear_field_script(selector: &str) -> String {
    let literal = serde_json::to_string(selector).unwrap_or_else(|_| "\"\"".to_string());
    format!(
        "(() => {{ const el = document.querySelector({}); if (el && 'value' in el) {{ el.value = ''; }} return !!el; }})()",
        literal
    )
}

pub fn generate_exists_script(selector: &str) -> String {
    let literal = serde_json::to_string(selector).unwrap_or_else(|_| "\"\"".to_string());
    format!("document.querySelector({}) !== null", literal)
}

pub fn generate_scroll_script(dy: i64) -> String {
    format!("window.scrollBy(0, {}); true", dy)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_needle_is_escaped() {
        let script = generate_find_text_script("it's \"quoted\"");
        assert!(script.contains(r#"("it's \"quoted\"")"#));
    }

    #[test]
    fn test_selector_is_escaped() {
        let script = generate_exists_script("input[name='q']");
        assert_eq!(script, r#"document.querySelector("input[name='q']") !== null"#);
    }
}
