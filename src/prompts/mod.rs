//! Prompt text for every LLM interaction.
//!
//! System prompts are constants in [`system`]. User prompts are Tera
//! templates rendered through [`Prompts`].

pub mod system;

pub use system::{
    CHECK_SYSTEM_PROMPT, COMMAND_SYSTEM_PROMPT, REPLACE_SYSTEM_PROMPT,
    REPLACE_THINK_SYSTEM_PROMPT,
};

use serde::Serialize;
use tera::{Context, Tera};

const ISSUE_TEMPLATE: &str = r#"# {{ title }}

{{ description }}
{%- if comments %}

## Discussion
{%- for comment in comments %}
{{ comment.author }}: {{ comment.body }}
{%- endfor %}
{%- endif %}
"#;

const CHECK_TEMPLATE: &str = r#"ORIGINAL:
{{ original }}
MODIFIED:
{{ modified }}
OBJECTIVE:
{{ objective }}"#;

const REPLACE_TEMPLATE: &str = r#"### CONTEXT ###
{{ context }}
### INSTRUCTIONS ###
{{ instructions }}
### ORIGINAL FILE ###
{{ filename }}:
{{ original }}
### THINKING ###"#;

const QUALITY_FIX_TEMPLATE: &str = r#"The following problems were reported by static analysis and the test suite.
Fix them without changing the intended behaviour of the code.

{{ findings }}"#;

const GENERATE_TEMPLATE: &str = r#"Objective:
{{ objective }}

Available files: {{ files | join(sep=", ") }}"#;

/// A comment rendered into an issue prompt.
#[derive(Debug, Clone, Serialize)]
pub struct PromptComment<'a> {
    pub author: &'a str,
    pub body: &'a str,
}

/// Compiled user prompt templates.
pub struct Prompts {
    tera: Tera,
}

impl Prompts {
    pub fn new() -> Result<Self, tera::Error> {
        let mut tera = Tera::default();
        tera.add_raw_templates(vec![
            ("issue", ISSUE_TEMPLATE),
            ("check", CHECK_TEMPLATE),
            ("replace", REPLACE_TEMPLATE),
            ("quality_fix", QUALITY_FIX_TEMPLATE),
            ("generate", GENERATE_TEMPLATE),
        ])?;
        Ok(Self { tera })
    }

    /// Objective text for an issue, including authorized discussion.
    pub fn issue(
        &self,
        title: &str,
        description: &str,
        comments: &[PromptComment<'_>],
    ) -> Result<String, tera::Error> {
        let mut context = Context::new();
        context.insert("title", title);
        context.insert("description", description);
        context.insert("comments", comments);
        Ok(self.tera.render("issue", &context)?.trim_end().to_string())
    }

    /// Opening prompt of a change-application session.
    ///
    /// Identical inputs render identical text so memoized sessions replay.
    pub fn generate(&self, objective: &str, files: &[&str]) -> Result<String, tera::Error> {
        let mut context = Context::new();
        context.insert("objective", objective);
        context.insert("files", files);
        self.tera.render("generate", &context)
    }

    /// Opening prompt of a verification session.
    pub fn check(
        &self,
        original: &str,
        modified: &str,
        objective: &str,
    ) -> Result<String, tera::Error> {
        let mut context = Context::new();
        context.insert("original", original);
        context.insert("modified", modified);
        context.insert("objective", objective);
        self.tera.render("check", &context)
    }

    /// Planning request for a single-file rewrite.
    pub fn replace(
        &self,
        context_text: &str,
        instructions: &str,
        filename: &str,
        original: &str,
    ) -> Result<String, tera::Error> {
        let mut context = Context::new();
        context.insert("context", context_text);
        context.insert("instructions", instructions);
        context.insert("filename", filename);
        context.insert("original", original);
        self.tera.render("replace", &context)
    }

    /// Objective asking the agent to fix reported findings.
    pub fn quality_fix(&self, findings: &str) -> Result<String, tera::Error> {
        let mut context = Context::new();
        context.insert("findings", findings);
        self.tera.render("quality_fix", &context)
    }
}
