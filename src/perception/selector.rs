use std::collections::HashMap;

use crate::browser::RawElement;
use crate::types::ElementRole;

fn is_css_ident(value: &str) -> bool {
    let mut chars = value.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

fn quoted(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Selector candidates for one element, most preferred first. The
/// structural path always comes last.
pub fn candidates(el: &RawElement) -> Vec<String> {
    let mut out = Vec::new();
    if let Some(id) = el.id.as_deref().filter(|id| is_css_ident(id)) {
        out.push(format!("#{}", id));
    }
    if let Some(test_id) = el.test_id.as_deref().filter(|v| !v.is_empty()) {
        out.push(format!("[data-testid=\"{}\"]", quoted(test_id)));
    }
    if let Some(name) = el.name.as_deref().filter(|v| !v.is_empty()) {
        out.push(format!("{}[name=\"{}\"]", el.tag, quoted(name)));
    }
    if let Some(label) = el.aria_label.as_deref().filter(|v| !v.is_empty()) {
        out.push(format!("[aria-label=\"{}\"]", quoted(label)));
    }
    out.push(el.css_path.clone());
    out
}

/// Pick for each element the first candidate no other enumerated element
/// shares, falling back to its structural path.
pub fn assign_selectors(elements: &[RawElement]) -> Vec<String> {
    let all: Vec<Vec<String>> = elements.iter().map(candidates).collect();
    let mut usage: HashMap<&str, usize> = HashMap::new();
    for list in &all {
        for candidate in list {
            *usage.entry(candidate.as_str()).or_default() += 1;
        }
    }
    all.iter()
        .zip(elements)
        .map(|(list, el)| {
            list.iter()
                .find(|c| usage.get(c.as_str()).copied() == Some(1))
                .cloned()
                .unwrap_or_else(|| el.css_path.clone())
        })
        .collect()
}

pub fn role_of(el: &RawElement) -> ElementRole {
    let input_type = el.input_type.as_deref().unwrap_or("text").to_lowercase();
    match (el.tag.as_str(), el.role_attr.as_deref()) {
        (_, Some("button")) => ElementRole::Button,
        (_, Some("link")) => ElementRole::Link,
        (_, Some("checkbox")) | (_, Some("radio")) => ElementRole::Checkbox,
        (_, Some("textbox")) | (_, Some("searchbox")) | (_, Some("combobox")) => ElementRole::TextInput,
        ("a", _) => ElementRole::Link,
        ("button", _) => ElementRole::Button,
        ("textarea", _) => ElementRole::TextArea,
        ("select", _) => ElementRole::Select,
        ("input", _) => match input_type.as_str() {
            "submit" | "button" | "reset" | "image" => ElementRole::Button,
            "checkbox" | "radio" => ElementRole::Checkbox,
            _ => ElementRole::TextInput,
        },
        _ => ElementRole::Other,
    }
}

/// aria-label, placeholder, name or button value, first one present.
pub fn label_of(el: &RawElement) -> Option<String> {
    [&el.aria_label, &el.placeholder, &el.value, &el.name]
        .into_iter()
        .flatten()
        .map(|s| s.trim())
        .find(|s| !s.is_empty())
        .map(String::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(tag: &str, path: &str) -> RawElement {
        RawElement {
            tag: tag.to_string(),
            css_path: path.to_string(),
            visible: true,
            in_viewport: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_selector_preference_order() {
        let mut with_id = raw("button", "html > body > button:nth-of-type(1)");
        with_id.id = Some("login".to_string());
        with_id.test_id = Some("login-btn".to_string());

        let mut with_test_id = raw("button", "html > body > button:nth-of-type(2)");
        with_test_id.test_id = Some("signup".to_string());

        let mut with_name = raw("input", "html > body > input");
        with_name.name = Some("q".to_string());

        let mut with_label = raw("a", "html > body > a");
        with_label.aria_label = Some("Home".to_string());

        let selectors = assign_selectors(&[with_id, with_test_id, with_name, with_label]);
        assert_eq!(selectors[0], "#login");
        assert_eq!(selectors[1], "[data-testid=\"signup\"]");
        assert_eq!(selectors[2], "input[name=\"q\"]");
        assert_eq!(selectors[3], "[aria-label=\"Home\"]");
    }

    #[test]
    fn test_colliding_attributes_fall_back_to_path() {
        let mut a = raw("input", "html > body > form:nth-of-type(1) > input");
        a.name = Some("q".to_string());
        let mut b = raw("input", "html > body > form:nth-of-type(2) > input");
        b.name = Some("q".to_string());

        let selectors = assign_selectors(&[a, b]);
        assert_eq!(selectors[0], "html > body > form:nth-of-type(1) > input");
        assert_eq!(selectors[1], "html > body > form:nth-of-type(2) > input");
    }

    #[test]
    fn test_unsafe_id_is_skipped() {
        let mut el = raw("div", "html > body > div");
        el.id = Some("123:abc".to_string());
        assert_eq!(candidates(&el), vec!["html > body > div".to_string()]);
    }

    #[test]
    fn test_roles() {
        let mut submit = raw("input", "p");
        submit.input_type = Some("submit".to_string());
        assert_eq!(role_of(&submit), ElementRole::Button);
        assert_eq!(role_of(&raw("input", "p")), ElementRole::TextInput);
        let mut div_button = raw("div", "p");
        div_button.role_attr = Some("button".to_string());
        assert_eq!(role_of(&div_button), ElementRole::Button);
    }
}
