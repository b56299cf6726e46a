//! Commands that read and rewrite files in the session overlay.

use tracing::warn;

use super::CommandContext;
use crate::error::CommandError;
use crate::prompts::{REPLACE_SYSTEM_PROMPT, REPLACE_THINK_SYSTEM_PROMPT};
use crate::session::{FileMap, SessionState};

/// Prefix every line with its 1-based number.
pub fn add_line_numbers(content: &str) -> String {
    content
        .split('\n')
        .enumerate()
        .map(|(i, line)| format!("{}: {}", i + 1, line))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Render the requested files with line numbers.
pub fn list_files(files: &FileMap, requested: &[String]) -> String {
    requested
        .iter()
        .map(|name| match files.get(name) {
            Some(content) => format!("{}:\n{}\n", name, add_line_numbers(content)),
            None => format!("File {} does not exist.\n", name),
        })
        .collect()
}

/// Paths whose content contains `query`, ignoring case, in path order.
pub fn search(files: &FileMap, query: &str) -> Vec<String> {
    let needle = query.to_lowercase();
    files
        .iter()
        .filter(|(_, content)| content.to_lowercase().contains(&needle))
        .map(|(path, _)| path.clone())
        .collect()
}

pub fn render_search(query: &str, matches: &[String]) -> String {
    if matches.is_empty() {
        format!("No files contain \"{}\".", query)
    } else {
        format!("Files containing \"{}\":\n{}", query, matches.join("\n"))
    }
}

pub fn delete_file(files: &mut FileMap, filename: &str) -> Result<String, CommandError> {
    if files.remove(filename).is_none() {
        return Err(CommandError::FileNotFound {
            action: "delete",
            path: filename.to_string(),
        });
    }
    Ok(format!("File {} has been deleted.", filename))
}

/// Remove a surrounding markdown code fence, if the model added one.
pub fn strip_code_fences(text: &str) -> String {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return text.to_string();
    };
    let Some(body) = rest.strip_suffix("```") else {
        return text.to_string();
    };
    // Drop the language tag on the opening line.
    let body = match body.find('\n') {
        Some(idx) => &body[idx + 1..],
        None => "",
    };
    let mut out = body.trim_end_matches('\n').to_string();
    out.push('\n');
    out
}

/// Rewrite `filename` from natural-language instructions.
///
/// The model first plans the change and then writes the whole new file.
/// Files the configured formatter handles are formatted; a formatter failure
/// keeps the unformatted text.
pub async fn replace_file(
    state: &mut SessionState,
    ctx: &CommandContext<'_>,
    filename: &str,
    instructions: &str,
) -> Result<String, CommandError> {
    let original = state.files.get(filename).cloned().unwrap_or_default();
    let planning = ctx
        .prompts
        .replace(&state.scratch, instructions, filename, &original)?;
    let thinking = ctx
        .gateway
        .complete_text(&planning, REPLACE_THINK_SYSTEM_PROMPT)
        .await?;

    let writing = format!("{}\n{}\n### NEW FILE ###", planning, thinking);
    let body = ctx
        .gateway
        .complete_text(&writing, REPLACE_SYSTEM_PROMPT)
        .await?;
    let mut content = strip_code_fences(&body);

    if let Some(formatter) = ctx.formatter.filter(|f| f.applies_to(filename)) {
        match formatter.format(&content).await {
            Ok(formatted) => content = formatted,
            Err(e) => warn!(file = %filename, error = %e, "Formatter failed, keeping unformatted file"),
        }
    }

    state.files.insert(filename.to_string(), content);
    Ok(format!("File {} has been replaced.", filename))
}
