use serde::{Deserialize, Serialize};

/// Prompt templates sent to the external model. Placeholders in braces are
/// substituted with [`render`].
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct PromptTemplates {
    pub classifier: String,
    pub planner: String,
    pub replanner: String,
    pub vision: String,
    pub goal_check: String,
}

const CLASSIFIER: &str = r#"You classify a browser-automation command into exactly one intent.
Known intents: {capabilities}.
Current page: {url} ({title}).
Command: "{command}"

Reply with ONE JSON object and nothing else, for example
{"intent":"navigate","url":"https://example.com"}
{"intent":"click","text":"Sign in"}
{"intent":"type","value":"hello","field":"Search"}
{"intent":"scroll","direction":"down","amount":300}
{"intent":"search","query":"wireless headphones"}
If the command matches none of them reply {"intent":"unknown"}."#;

const PLANNER: &str = r#"You are an expert browser automation planner. Break the task into specific, executable steps.

TASK: {goal}

Current page:
{page}

Available actions: {capabilities}.
Parameters: navigate(url), search(query, optional site), click(text or selector), type(value, field),
submit(optional text), scroll(direction, amount), select_first_item(optional filter), find_text(query),
wait(seconds or selector), back, forward, refresh, extract, screenshot, analyze(optional question).

Take the most direct path. Finish with an extract step when the task asks for information.
Reply with JSON only: {"steps":[{"action":"search","query":"..."},{"action":"extract"}]}"#;

const REPLANNER: &str = r#"A browser automation plan hit a failure and needs a new route to its goal.

TASK: {goal}

Steps completed so far:
{completed}

Failed step: {failed}
Error: {error}

Current page:
{page}

Available actions: {capabilities}.
Return the remaining steps from the current page as JSON only:
{"steps":[{"action":"...", ...}]}"#;

const VISION: &str = r#"You are analyzing a screenshot of a web page for a browser automation agent.

Page URL: {url}
Page title: {title}

Interactive elements found in the DOM:
{elements}

Content extract:
{content}

{history}

Question: {question}

Reply with JSON only:
{"summary":"what this page is for","elements":[{"description":"...","text":"visible text","selector":"css or null","confidence":0.0}],"suggested_intents":["click \"...\""]}
List elements most relevant to the question first."#;

const GOAL_CHECK: &str = r#"TASK: {goal}

The agent is on {url} ({title}) and just obtained:
{payload}

Is the task complete? Reply with JSON only: {"satisfied":true} or {"satisfied":false}"#;

impl Default for PromptTemplates {
    fn default() -> Self {
        Self {
            classifier: CLASSIFIER.to_string(),
            planner: PLANNER.to_string(),
            replanner: REPLANNER.to_string(),
            vision: VISION.to_string(),
            goal_check: GOAL_CHECK.to_string(),
        }
    }
}

/// Substitute `{name}` placeholders. Unknown placeholders are left as-is so
/// literal JSON braces in a template survive.
pub fn render(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = template.to_string();
    for (name, value) in vars {
        out = out.replace(&format!("{{{}}}", name), value);
    }
    out
}
