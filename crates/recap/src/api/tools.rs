//! Target model description and tool-schema normalization.
//!
//! The summarization call carries the conversation's tool list so the
//! replayed tool calls stay well-formed for the provider, even though
//! `tool_choice` is `"none"`. Providers reject whole requests over a single
//! bad tool entry, so every entry is checked here and invalid ones are
//! dropped with a warning.

use crate::ToolDef;
use std::collections::HashSet;
use tracing::warn;

/// Maximum tool-name length accepted by every supported provider.
pub const MAX_TOOL_NAME_LEN: usize = 64;

/// OpenAI rejects function descriptions longer than this.
pub const OPENAI_MAX_DESCRIPTION_CHARS: usize = 1024;

/// Provider family of a model, as far as tool-schema rules are concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelFamily {
    OpenAi,
    Anthropic,
    Gemini,
    Other,
}

impl ModelFamily {
    /// Classify an OpenRouter-style model id (`vendor/name`) by its name
    /// segment.
    pub fn from_model_id(model_id: &str) -> Self {
        let name = model_id
            .rsplit('/')
            .next()
            .unwrap_or(model_id)
            .to_ascii_lowercase();
        if name.starts_with("claude") {
            ModelFamily::Anthropic
        } else if name.starts_with("gemini") {
            ModelFamily::Gemini
        } else if name.starts_with("gpt")
            || ["o1", "o3", "o4"]
                .iter()
                .any(|p| name == *p || name.starts_with(&format!("{p}-")))
        {
            ModelFamily::OpenAi
        } else {
            ModelFamily::Other
        }
    }
}

/// The endpoint a compaction is performed for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelInfo {
    pub id: String,
    pub family: ModelFamily,
    /// Prompt budget of the target model, in tokens.
    pub max_prompt_tokens: usize,
}

impl ModelInfo {
    pub fn new(id: impl Into<String>, max_prompt_tokens: usize) -> Self {
        let id = id.into();
        Self {
            family: ModelFamily::from_model_id(&id),
            id,
            max_prompt_tokens,
        }
    }
}

/// Validate and adapt `tools` for `family`. Invalid entries are logged and
/// dropped; the first entry wins when names collide.
pub fn normalize_tools(tools: &[ToolDef], family: ModelFamily) -> Vec<ToolDef> {
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(tools.len());
    for tool in tools {
        let name = tool.function.name.as_str();
        if let Err(reason) = check_tool(tool, family) {
            warn!("Dropping tool '{name}' from summarization request: {reason}");
            continue;
        }
        if !seen.insert(name) {
            warn!("Dropping tool '{name}' from summarization request: duplicate name");
            continue;
        }

        let mut tool = tool.clone();
        if family == ModelFamily::OpenAi
            && tool.function.description.chars().count() > OPENAI_MAX_DESCRIPTION_CHARS
        {
            tool.function.description = tool
                .function
                .description
                .chars()
                .take(OPENAI_MAX_DESCRIPTION_CHARS)
                .collect();
        }
        out.push(tool);
    }
    out
}

fn check_tool(tool: &ToolDef, family: ModelFamily) -> Result<(), String> {
    let name = &tool.function.name;
    if name.is_empty() {
        return Err("empty name".into());
    }
    if name.len() > MAX_TOOL_NAME_LEN {
        return Err(format!("name longer than {MAX_TOOL_NAME_LEN} characters"));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err("name must match [a-zA-Z0-9_-]".into());
    }

    let params = &tool.function.parameters;
    if !params.is_object() {
        return Err("parameters schema is not an object".into());
    }
    if let Some(t) = params.get("type")
        && t != "object"
    {
        return Err(format!("parameters schema has type {t}, expected \"object\""));
    }
    jsonschema::validator_for(params).map_err(|e| format!("invalid parameters schema: {e}"))?;

    if family == ModelFamily::Gemini && tool.function.description.trim().is_empty() {
        return Err("empty description".into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tool(name: &str, description: &str) -> ToolDef {
        ToolDef::new(
            name,
            description,
            json!({"type": "object", "properties": {"path": {"type": "string"}}}),
        )
    }

    fn names(tools: &[ToolDef]) -> Vec<&str> {
        tools.iter().map(|t| t.function.name.as_str()).collect()
    }

    #[test]
    fn classifies_model_families() {
        assert_eq!(
            ModelFamily::from_model_id("anthropic/claude-sonnet-4"),
            ModelFamily::Anthropic
        );
        assert_eq!(ModelFamily::from_model_id("openai/gpt-4o"), ModelFamily::OpenAi);
        assert_eq!(ModelFamily::from_model_id("openai/o3-mini"), ModelFamily::OpenAi);
        assert_eq!(
            ModelFamily::from_model_id("google/gemini-2.5-pro"),
            ModelFamily::Gemini
        );
        assert_eq!(ModelFamily::from_model_id("z-ai/glm-5"), ModelFamily::Other);
        assert_eq!(ModelFamily::from_model_id("claude-3-haiku"), ModelFamily::Anthropic);
        assert_eq!(ModelFamily::from_model_id("acme/o1ympus"), ModelFamily::Other);
    }

    #[test]
    fn drops_invalid_entries() {
        let mut bad_params = tool("bad_params", "x");
        bad_params.function.parameters = json!("string");
        let mut wrong_type = tool("wrong_type", "x");
        wrong_type.function.parameters = json!({"type": "array"});
        let mut bad_schema = tool("bad_schema", "x");
        bad_schema.function.parameters = json!({"type": "object", "properties": 5});

        let tools = vec![
            tool("read_file", "Read a file"),
            tool("", "empty"),
            tool("has space", "x"),
            tool(&"a".repeat(65), "long"),
            bad_params,
            wrong_type,
            bad_schema,
            tool("read_file", "duplicate"),
            tool("grep", "Search"),
        ];
        let out = normalize_tools(&tools, ModelFamily::Anthropic);
        assert_eq!(names(&out), vec!["read_file", "grep"]);
        assert_eq!(out[0].function.description, "Read a file");
    }

    #[test]
    fn gemini_drops_empty_descriptions() {
        let tools = vec![tool("a", ""), tool("b", "  "), tool("c", "ok")];
        assert_eq!(names(&normalize_tools(&tools, ModelFamily::Gemini)), vec!["c"]);
        assert_eq!(normalize_tools(&tools, ModelFamily::Other).len(), 3);
    }

    #[test]
    fn openai_clips_descriptions() {
        let tools = vec![tool("a", &"d".repeat(2000))];
        let out = normalize_tools(&tools, ModelFamily::OpenAi);
        assert_eq!(
            out[0].function.description.chars().count(),
            OPENAI_MAX_DESCRIPTION_CHARS
        );
        let out = normalize_tools(&tools, ModelFamily::Anthropic);
        assert_eq!(out[0].function.description.len(), 2000);
    }

    #[test]
    fn model_info_derives_family() {
        let info = ModelInfo::new("google/gemini-2.5-flash", 1_000_000);
        assert_eq!(info.family, ModelFamily::Gemini);
        assert_eq!(info.max_prompt_tokens, 1_000_000);
    }
}
