use serde_json::Value;

use crate::interpreter::normalize::{looks_like_selector, normalize_url};
use crate::types::{Intent, ScrollDirection, Target, WaitFor, DEFAULT_SCROLL_AMOUNT};

fn text_field<'a>(value: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .filter_map(|key| value.get(*key).and_then(Value::as_str))
        .map(str::trim)
        .find(|s| !s.is_empty())
}

fn target_from(value: &Value, text_keys: &[&str]) -> Option<Target> {
    if let Some(selector) = text_field(value, &["selector", "css"]) {
        return Some(Target::Selector(selector.to_string()));
    }
    text_field(value, text_keys).map(|text| {
        if looks_like_selector(text) {
            Target::Selector(text.to_string())
        } else {
            Target::Text(text.to_string())
        }
    })
}

/// Decode one model-produced action object. The tag is read from
/// `action` or `intent`; both the intent names and the older action
/// vocabulary (`smart_click`, `fill_form`, ...) are accepted.
pub fn intent_from_value(value: &Value) -> Option<Intent> {
    let tag = text_field(value, &["action", "intent"])?.to_lowercase();
    let intent = match tag.as_str() {
        "navigate" | "go_to" | "goto" | "open" => Intent::Navigate {
            url: normalize_url(text_field(value, &["url", "target"])?),
        },
        "navigate_and_search" => Intent::Search {
            query: text_field(value, &["query", "text"])?.to_string(),
            site: text_field(value, &["url", "site"]).map(normalize_url),
        },
        "search" => Intent::Search {
            query: text_field(value, &["query", "text"])?.to_string(),
            site: text_field(value, &["site", "url"]).map(normalize_url),
        },
        "click" | "smart_click" => Intent::Click {
            target: target_from(value, &["text", "description", "target"])?,
        },
        "click_selector" => Intent::Click {
            target: Target::Selector(text_field(value, &["selector", "css"])?.to_string()),
        },
        "type" | "fill_form" | "type_text" | "fill" => Intent::Type {
            value: text_field(value, &["value", "text"])?.to_string(),
            field: target_from(value, &["field", "target", "description"])?,
        },
        "submit" | "submit_form" => Intent::Submit {
            target: target_from(value, &["text", "description"]),
        },
        "scroll" => {
            let direction = match text_field(value, &["direction"]) {
                Some(d) if d.eq_ignore_ascii_case("up") => ScrollDirection::Up,
                _ => ScrollDirection::Down,
            };
            let amount = value
                .get("amount")
                .and_then(Value::as_u64)
                .and_then(|n| u32::try_from(n).ok())
                .unwrap_or(DEFAULT_SCROLL_AMOUNT);
            Intent::Scroll { direction, amount }
        }
        "select_first_item" | "select_first" => Intent::SelectFirst {
            filter: text_field(value, &["query_terms", "filter", "query"]).map(String::from),
        },
        "find_text" | "find" => Intent::FindText {
            text: text_field(value, &["query", "text"])?.to_string(),
        },
        "wait" => match value.get("seconds").and_then(Value::as_u64) {
            Some(secs) => Intent::Wait(WaitFor::Seconds(secs)),
            None => match text_field(value, &["selector"]) {
                Some(selector) => Intent::Wait(WaitFor::Selector(selector.to_string())),
                None => Intent::Wait(WaitFor::Seconds(1)),
            },
        },
        "extract" | "extract_data" => Intent::Extract,
        "screenshot" | "take_screenshot" => Intent::Screenshot,
        "analyze" | "analyze_page" => Intent::Analyze {
            question: text_field(value, &["question", "query"]).map(String::from),
        },
        "back" | "go_back" => Intent::Back,
        "forward" | "go_forward" => Intent::Forward,
        "refresh" | "reload" => Intent::Refresh,
        "plan" => Intent::PlanGoal {
            goal: text_field(value, &["goal", "task"])?.to_string(),
        },
        "execute_plan" => Intent::ExecutePlan,
        _ => return None,
    };
    Some(intent)
}

/// Steps of a decomposition reply: `{"steps": [...]}` or a bare array.
/// Entries that do not decode are dropped.
pub fn intents_from_plan(value: &Value) -> Vec<Intent> {
    let steps: &[Value] = match value {
        Value::Array(items) => items.as_slice(),
        Value::Object(_) => match value.get("steps").or_else(|| value.get("plan")) {
            Some(Value::Array(items)) => items.as_slice(),
            _ => &[],
        },
        _ => &[],
    };
    steps.iter().filter_map(intent_from_value).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_action_aliases() {
        assert_eq!(
            intent_from_value(&json!({"action": "navigate_and_search", "url": "amazon.com", "query": "laptop"})),
            Some(Intent::Search {
                query: "laptop".to_string(),
                site: Some("https://amazon.com/".to_string())
            })
        );
        assert_eq!(
            intent_from_value(&json!({"action": "smart_click", "description": "Add to Cart"})),
            Some(Intent::Click { target: Target::Text("Add to Cart".to_string()) })
        );
        assert_eq!(
            intent_from_value(&json!({"action": "fill_form", "value": "me@x.io", "field": "#email"})),
            Some(Intent::Type {
                value: "me@x.io".to_string(),
                field: Target::Selector("#email".to_string())
            })
        );
        assert_eq!(
            intent_from_value(&json!({"intent": "scroll", "direction": "up"})),
            Some(Intent::Scroll { direction: ScrollDirection::Up, amount: 300 })
        );
        assert_eq!(intent_from_value(&json!({"action": "extract_data"})), Some(Intent::Extract));
        assert_eq!(intent_from_value(&json!({"action": "dance"})), None);
        assert_eq!(intent_from_value(&json!({"action": "click"})), None);
    }

    #[test]
    fn test_scroll_amount_out_of_range_uses_default() {
        assert_eq!(
            intent_from_value(&json!({"action": "scroll", "direction": "down", "amount": 5_000_000_000u64})),
            Some(Intent::Scroll { direction: ScrollDirection::Down, amount: DEFAULT_SCROLL_AMOUNT })
        );
        assert_eq!(
            intent_from_value(&json!({"action": "scroll", "amount": 800})),
            Some(Intent::Scroll { direction: ScrollDirection::Down, amount: 800 })
        );
    }

    #[test]
    fn test_plan_shapes() {
        let wrapped = json!({"steps": [{"action": "search", "query": "x"}, {"action": "bogus"}, {"action": "extract"}]});
        assert_eq!(intents_from_plan(&wrapped).len(), 2);
        let bare = json!([{"action": "back"}]);
        assert_eq!(intents_from_plan(&bare), vec![Intent::Back]);
        assert!(intents_from_plan(&json!("nope")).is_empty());
    }
}
