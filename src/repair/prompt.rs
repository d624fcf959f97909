//! Repair conversation rendering

use super::RepairContext;
use crate::backend_executor::ChatMessage;
use minijinja::{Environment, UndefinedBehavior, context};
use serde::Serialize;

/// Instructions sent as the system message unless overridden
pub const DEFAULT_SYSTEM_PROMPT: &str = r#"You are part of an automated repair tool. A script or test file fails when it is run.
You will receive the file with line numbers, the arguments it was run with, the failure output,
and the source of the local files it imports. Work out why it fails and fix the file.

Reply with a JSON array of edits to that one file and nothing else. Each edit is an object:

  {"operation": "Replace", "line": 4, "content": "    return a + b"}
  {"operation": "Delete", "line": 7}
  {"operation": "InsertAfter", "line": 2, "content": "import math"}

Line numbers always refer to the file exactly as you received it, before any edit.
"content" replaces or inserts a whole line, including its indentation, without a trailing newline.
Use several InsertAfter edits on the same line to insert several lines.

You may add objects of the form {"explanation": "..."} to explain the change.
If you name the file, put {"file": "<path>"} as the last element of the array.

Example:

[
  {"explanation": "add() subtracted its arguments"},
  {"operation": "Replace", "line": 4, "content": "    return a + b"},
  {"file": "calculator.py"}
]
"#;

/// User message template; `source` is already line-numbered
pub const DEFAULT_USER_TEMPLATE: &str = r#"The file {{ target }} fails when run.

Here is {{ target }} with line numbers:

{{ source }}
{% if args %}
It was run with these arguments: {{ args | join(" ") }}
{% endif %}
Here is the failure output:

{{ signal }}
{% for file in related %}
Code from {{ file.path }}:

{{ file.content }}
{% endfor %}{% for doc in documents %}
Reference document {{ doc.path }}:

{{ doc.content }}
{% endfor %}
Reply with the JSON array of edits."#;

/// Sent after a reply that held no usable JSON
pub const CORRECTIVE_MESSAGE: &str = "Your response could not be parsed as JSON. \
Please restate your last message as pure JSON: an array of edit objects, with no prose.";

/// Prefix each line with its 1-based number, `N: line`
pub fn number_lines(source: &str) -> String {
    source
        .lines()
        .enumerate()
        .map(|(i, line)| format!("{}: {}", i + 1, line))
        .collect::<Vec<_>>()
        .join("\n")
}

#[derive(Serialize)]
struct FileView {
    path: String,
    content: String,
}

/// Renders the system and user messages for a repair request
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    system_prompt: String,
    user_template: String,
}

impl Default for PromptBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_SYSTEM_PROMPT, DEFAULT_USER_TEMPLATE)
    }
}

impl PromptBuilder {
    pub fn new(system_prompt: impl Into<String>, user_template: impl Into<String>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            user_template: user_template.into(),
        }
    }

    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = system_prompt.into();
        self
    }

    pub fn with_user_template(mut self, user_template: impl Into<String>) -> Self {
        self.user_template = user_template.into();
        self
    }

    /// Opening `[system, user]` pair of the conversation
    pub fn render(&self, ctx: &RepairContext) -> Result<Vec<ChatMessage>, minijinja::Error> {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        env.add_template("repair", &self.user_template)?;

        let related: Vec<FileView> = ctx
            .related
            .iter()
            .map(|(path, content)| FileView {
                path: path.display().to_string(),
                content: number_lines(content),
            })
            .collect();
        let documents: Vec<FileView> = ctx
            .documents
            .iter()
            .map(|(path, content)| FileView {
                path: path.display().to_string(),
                content: content.trim_end().to_string(),
            })
            .collect();

        let user = env.get_template("repair")?.render(context! {
            target => ctx.target.display().to_string(),
            source => number_lines(&ctx.source),
            args => ctx.args,
            signal => ctx.signal.text,
            related => related,
            documents => documents,
        })?;

        Ok(vec![
            ChatMessage::system(self.system_prompt.clone()),
            ChatMessage::user(user),
        ])
    }
}
