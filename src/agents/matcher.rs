use crate::config::MatchingConfig;
use crate::types::{ElementRole, InteractiveElement, PageState, Target};

/// What the resolved element will be used for; decides which roles qualify.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Purpose {
    Click,
    Type,
    Submit,
}

impl Purpose {
    fn accepts(self, role: ElementRole) -> bool {
        match self {
            Purpose::Click => role.is_clickable(),
            Purpose::Type => role.is_editable(),
            Purpose::Submit => role == ElementRole::Button,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchStage {
    Exact,
    Substring,
    EditDistance,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ElementMatch<'a> {
    pub element: &'a InteractiveElement,
    pub stage: MatchStage,
}

/// DOM-only element resolution against one [`PageState`].
#[derive(Debug, Clone)]
pub struct ElementMatcher {
    max_edit_distance: usize,
    edit_distance_ratio: f64,
}

impl ElementMatcher {
    pub fn new(config: &MatchingConfig) -> Self {
        Self {
            max_edit_distance: config.max_edit_distance,
            edit_distance_ratio: config.edit_distance_ratio,
        }
    }

    /// Exact first, then fuzzy.
    pub fn resolve<'a>(&self, page: &'a PageState, target: &Target, purpose: Purpose) -> Option<ElementMatch<'a>> {
        self.exact(page, target, purpose)
            .map(|element| ElementMatch {
                element,
                stage: MatchStage::Exact,
            })
            .or_else(|| self.fuzzy(page, target, purpose))
    }

    /// Selector equality, or case-insensitive equality with any name of a
    /// compatible element.
    pub fn exact<'a>(&self, page: &'a PageState, target: &Target, purpose: Purpose) -> Option<&'a InteractiveElement> {
        match target {
            Target::Selector(selector) => page.element_by_selector(selector),
            Target::Text(text) => {
                let wanted = text.trim().to_lowercase();
                compatible(page, purpose).find(|el| el.names().any(|name| name.trim().to_lowercase() == wanted))
            }
        }
    }

    /// Substring containment, then bounded edit distance. Selectors are
    /// never matched approximately.
    pub fn fuzzy<'a>(&self, page: &'a PageState, target: &Target, purpose: Purpose) -> Option<ElementMatch<'a>> {
        let Target::Text(text) = target else {
            return None;
        };
        let wanted = text.trim().to_lowercase();
        if wanted.is_empty() {
            return None;
        }

        let substring = compatible(page, purpose)
            .filter_map(|el| {
                el.names()
                    .map(|name| name.trim().to_lowercase())
                    .filter(|name| contains_either_way(name, &wanted))
                    .map(|name| name.len().abs_diff(wanted.len()))
                    .min()
                    .map(|gap| (gap, el))
            })
            .min_by_key(|(gap, _)| *gap);
        if let Some((_, element)) = substring {
            return Some(ElementMatch {
                element,
                stage: MatchStage::Substring,
            });
        }

        let bound = self.distance_bound(&wanted);
        if bound == 0 {
            return None;
        }
        compatible(page, purpose)
            .filter_map(|el| {
                el.names()
                    .map(|name| levenshtein(&name.trim().to_lowercase(), &wanted))
                    .min()
                    .filter(|distance| *distance <= bound)
                    .map(|distance| (distance, el))
            })
            .min_by_key(|(distance, _)| *distance)
            .map(|(_, element)| ElementMatch {
                element,
                stage: MatchStage::EditDistance,
            })
    }

    fn distance_bound(&self, wanted: &str) -> usize {
        let relative = (wanted.chars().count() as f64 * self.edit_distance_ratio).floor() as usize;
        relative.min(self.max_edit_distance)
    }
}

fn compatible(page: &PageState, purpose: Purpose) -> impl Iterator<Item = &InteractiveElement> {
    page.elements.iter().filter(move |el| purpose.accepts(el.role))
}

/// Short names like "Go" only match when they contain the whole target.
fn contains_either_way(name: &str, wanted: &str) -> bool {
    name.contains(wanted) || (name.chars().count() >= 3 && wanted.contains(name))
}

fn levenshtein(a: &str, b: &str) -> usize {
    let a_chars: Vec<char> = a.chars().collect();
    let b_chars: Vec<char> = b.chars().collect();
    let n = b_chars.len();

    let mut prev_row: Vec<usize> = (0..=n).collect();
    let mut curr_row = vec![0usize; n + 1];

    for (i, a_ch) in a_chars.iter().enumerate() {
        curr_row[0] = i + 1;
        for (j, b_ch) in b_chars.iter().enumerate() {
            let cost = usize::from(a_ch != b_ch);
            curr_row[j + 1] = (prev_row[j + 1] + 1).min(curr_row[j] + 1).min(prev_row[j] + cost);
        }
        std::mem::swap(&mut prev_row, &mut curr_row);
    }

    prev_row[n]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::types::BoundingBox;

    fn element(role: ElementRole, text: &str, label: Option<&str>, selector: &str) -> InteractiveElement {
        InteractiveElement {
            role,
            tag: "x".to_string(),
            text: text.to_string(),
            label: label.map(String::from),
            selector: selector.to_string(),
            bbox: BoundingBox::default(),
        }
    }

    fn page() -> PageState {
        PageState {
            elements: vec![
                element(ElementRole::Link, "Home", None, "#home"),
                element(ElementRole::Button, "Add to Cart", None, "#add"),
                element(ElementRole::TextInput, "", Some("Email address"), "#email"),
                element(ElementRole::Button, "Checkout", None, "#checkout"),
            ],
            ..PageState::blank()
        }
    }

    fn matcher() -> ElementMatcher {
        ElementMatcher::new(&Config::default().matching)
    }

    #[test]
    fn test_exact_text_and_selector() {
        let page = page();
        let m = matcher();
        let hit = m.resolve(&page, &Target::Text("add to cart".into()), Purpose::Click).unwrap();
        assert_eq!(hit.element.selector, "#add");
        assert_eq!(hit.stage, MatchStage::Exact);

        let hit = m.resolve(&page, &Target::Selector("#checkout".into()), Purpose::Click).unwrap();
        assert_eq!(hit.element.text, "Checkout");
        assert!(m.resolve(&page, &Target::Selector("#nope".into()), Purpose::Click).is_none());
    }

    #[test]
    fn test_roles_must_be_compatible() {
        let page = page();
        let m = matcher();
        // the email field is not clickable, but it is typeable
        assert!(m.exact(&page, &Target::Text("Email address".into()), Purpose::Click).is_none());
        let hit = m.resolve(&page, &Target::Text("email".into()), Purpose::Type).unwrap();
        assert_eq!(hit.element.selector, "#email");
        assert_eq!(hit.stage, MatchStage::Substring);
        assert!(m.resolve(&page, &Target::Text("Home".into()), Purpose::Submit).is_none());
    }

    #[test]
    fn test_fuzzy_stages() {
        let page = page();
        let m = matcher();
        let hit = m.resolve(&page, &Target::Text("the Add to Cart button".into()), Purpose::Click).unwrap();
        assert_eq!(hit.element.selector, "#add");
        assert_eq!(hit.stage, MatchStage::Substring);

        let hit = m.resolve(&page, &Target::Text("Chekout".into()), Purpose::Click).unwrap();
        assert_eq!(hit.element.selector, "#checkout");
        assert_eq!(hit.stage, MatchStage::EditDistance);

        assert!(m.resolve(&page, &Target::Text("Sign In".into()), Purpose::Click).is_none());
    }

    #[test]
    fn test_levenshtein() {
        assert_eq!(levenshtein("kitten", "sitting"), 3);
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("same", "same"), 0);
    }
}
