use regex::{Captures, Regex};

use crate::error::{AgentError, Result};
use crate::interpreter::normalize::{looks_like_selector, normalize_url};
use crate::types::{Intent, ScrollDirection, Target, WaitFor, DEFAULT_SCROLL_AMOUNT};

/// What the grammar may consult besides the text itself.
#[derive(Debug, Clone, Default)]
pub struct ReferenceContext {
    pub last_target: Option<Target>,
    pub has_active_plan: bool,
}

type Build = fn(&Captures, &ReferenceContext) -> Option<Intent>;

/// Fixed command grammar. Whole-command keywords are checked first, then
/// the patterns in order; the first pattern that matches decides.
pub struct Grammar {
    rules: Vec<(Regex, Build)>,
}

const PATTERNS: &[(&str, Build)] = &[
    (r"^go\s+to\s+(\S+)\s+and\s+search\s+for\s+(.+)$", site_search),
    (r"^on\s+(\S+)\s+search\s+for\s+(.+)$", site_search),
    (r"^search\s+(?:for\s+)?(.+)$", search),
    (r"^(?:go\s+to|open|visit|navigate\s+to)\s+(.+)$", navigate),
    (
        r#"^click\s+(?:on\s+)?(?:the\s+)?(?:element\s+with\s+)?(?:selector|css)\s+["']?(.+?)["']?$"#,
        click_selector,
    ),
    (
        r#"^click\s+(?:on\s+)?(?:the\s+)?(?:button\s+|link\s+)?(?:with\s+text\s+)?["']?(.+?)["']?$"#,
        click,
    ),
    (r"^select\s+(?:the\s+)?first\s+(?:item|result)(?:\s+with\s+(.+))?$", select_first),
    (
        r#"^(?:type|enter)\s+(?:"([^"]+)"|'([^']+)'|(.+?))\s+in(?:to)?\s+(?:the\s+)?["']?(.+?)["']?(?:\s+field)?$"#,
        type_text,
    ),
    (r#"^submit\s+["']?(.+?)["']?$"#, submit),
    (r"^scroll\s+(up|down)(?:\s+(?:by\s+)?(\d+))?(?:\s*(?:px|pixels))?$", scroll),
    (r#"^find\s+(?:text\s+)?["']?(.+?)["']?(?:\s+on\s+(?:the\s+)?page)?$"#, find_text),
    (r"^wait\s+for\s+(.+)$", wait_for),
    (r"^wait\s+(\d+)(?:\s*(?:s|secs?|seconds?))?$", wait_seconds),
    (r"^(?:analyze|analyse)\s+(.+)$", analyze),
    (r"^plan\s*:?\s+(.+)$", plan),
];

fn keyword(lowered: &str) -> Option<Intent> {
    let intent = match lowered {
        "back" | "go back" => Intent::Back,
        "forward" | "go forward" => Intent::Forward,
        "refresh" | "reload" => Intent::Refresh,
        "submit" | "submit form" => Intent::Submit { target: None },
        "screenshot" | "take screenshot" | "take a screenshot" | "capture" => Intent::Screenshot,
        "analyze" | "analyse" | "analyze page" | "what's on this page" | "what is on this page" => {
            Intent::Analyze { question: None }
        }
        "extract" | "extract data" | "extract info" | "get data" => Intent::Extract,
        "execute plan" | "run plan" | "execute task" | "run task" | "execute the plan" | "run the plan" => {
            Intent::ExecutePlan
        }
        "help" | "commands" | "usage" => Intent::Help,
        "exit" | "quit" | "close" => Intent::Exit,
        _ => return None,
    };
    Some(intent)
}

fn capture(caps: &Captures, i: usize) -> Option<String> {
    caps.get(i)
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty())
}

/// "it" stands for the last referenced element.
fn target(raw: String, ctx: &ReferenceContext) -> Option<Target> {
    if raw.eq_ignore_ascii_case("it") {
        return ctx.last_target.clone();
    }
    if looks_like_selector(&raw) {
        Some(Target::Selector(raw))
    } else {
        Some(Target::Text(raw))
    }
}

fn site_search(caps: &Captures, _: &ReferenceContext) -> Option<Intent> {
    Some(Intent::Search {
        query: capture(caps, 2)?,
        site: Some(normalize_url(&capture(caps, 1)?)),
    })
}

fn search(caps: &Captures, _: &ReferenceContext) -> Option<Intent> {
    Some(Intent::Search {
        query: capture(caps, 1)?,
        site: None,
    })
}

fn navigate(caps: &Captures, _: &ReferenceContext) -> Option<Intent> {
    Some(Intent::Navigate {
        url: normalize_url(&capture(caps, 1)?),
    })
}

fn click_selector(caps: &Captures, _: &ReferenceContext) -> Option<Intent> {
    Some(Intent::Click {
        target: Target::Selector(capture(caps, 1)?),
    })
}

fn click(caps: &Captures, ctx: &ReferenceContext) -> Option<Intent> {
    Some(Intent::Click {
        target: target(capture(caps, 1)?, ctx)?,
    })
}

fn select_first(caps: &Captures, _: &ReferenceContext) -> Option<Intent> {
    Some(Intent::SelectFirst {
        filter: capture(caps, 1),
    })
}

fn type_text(caps: &Captures, ctx: &ReferenceContext) -> Option<Intent> {
    let value = capture(caps, 1)
        .or_else(|| capture(caps, 2))
        .or_else(|| capture(caps, 3))?;
    Some(Intent::Type {
        value,
        field: target(capture(caps, 4)?, ctx)?,
    })
}

fn submit(caps: &Captures, ctx: &ReferenceContext) -> Option<Intent> {
    Some(Intent::Submit {
        target: Some(target(capture(caps, 1)?, ctx)?),
    })
}

fn scroll(caps: &Captures, _: &ReferenceContext) -> Option<Intent> {
    let direction = if capture(caps, 1)?.eq_ignore_ascii_case("up") {
        ScrollDirection::Up
    } else {
        ScrollDirection::Down
    };
    let amount = capture(caps, 2)
        .and_then(|n| n.parse().ok())
        .unwrap_or(DEFAULT_SCROLL_AMOUNT);
    Some(Intent::Scroll { direction, amount })
}

fn find_text(caps: &Captures, _: &ReferenceContext) -> Option<Intent> {
    Some(Intent::FindText {
        text: capture(caps, 1)?,
    })
}

fn wait_for(caps: &Captures, _: &ReferenceContext) -> Option<Intent> {
    Some(Intent::Wait(WaitFor::Selector(capture(caps, 1)?)))
}

fn wait_seconds(caps: &Captures, _: &ReferenceContext) -> Option<Intent> {
    Some(Intent::Wait(WaitFor::Seconds(capture(caps, 1)?.parse().ok()?)))
}

fn analyze(caps: &Captures, _: &ReferenceContext) -> Option<Intent> {
    Some(Intent::Analyze {
        question: capture(caps, 1),
    })
}

fn plan(caps: &Captures, _: &ReferenceContext) -> Option<Intent> {
    Some(Intent::PlanGoal {
        goal: capture(caps, 1)?,
    })
}

impl Grammar {
    pub fn new() -> Result<Self> {
        let rules = PATTERNS
            .iter()
            .map(|(pattern, build)| {
                Regex::new(&format!("(?i){}", pattern))
                    .map(|re| (re, *build))
                    .map_err(|e| AgentError::Config(format!("bad grammar pattern {}: {}", pattern, e)))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { rules })
    }

    /// `None` when nothing applies, so the caller can escalate. A reference
    /// that cannot be resolved ("click it" before any click) is also `None`.
    pub fn parse(&self, text: &str, ctx: &ReferenceContext) -> Option<Intent> {
        let text = text.trim().trim_end_matches(|c| c == '.' || c == '!');
        let lowered = text.to_lowercase();

        if lowered == "plan" {
            return ctx.has_active_plan.then_some(Intent::ExecutePlan);
        }
        if let Some(intent) = keyword(&lowered) {
            return Some(intent);
        }

        self.rules
            .iter()
            .find_map(|(re, build)| re.captures(text).map(|caps| build(&caps, ctx)))
            .flatten()
    }
}
