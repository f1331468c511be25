use serde_json::Value;
use synapse_core::domain::process::ProcessConfiguration;
use tera::{Context, Tera};

use crate::error::GenerationError;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RenderedPrompt {
    pub system: String,
    pub user: String,
}

/// Builds the system/user prompt pair for a version's configuration.
///
/// Template fields may reference caller input as `{{ input.field }}`.
#[derive(Clone, Copy, Debug, Default)]
pub struct PromptRenderer;

impl PromptRenderer {
    pub fn render(
        &self,
        configuration: &ProcessConfiguration,
        input: &Value,
    ) -> Result<RenderedPrompt, GenerationError> {
        let mut context = Context::new();
        context.insert("input", input);

        let prompt = &configuration.prompt;
        let mut system = render_field(&prompt.system_instructions, &context)?;
        system.push_str("\n\nGoal: ");
        system.push_str(&render_field(&prompt.goal, &context)?);
        if let Some(extra) = &prompt.additional_instructions {
            let extra = render_field(extra, &context)?;
            if !extra.trim().is_empty() {
                system.push_str("\n\nAdditional instructions:\n");
                system.push_str(&extra);
            }
        }
        system.push_str("\n\nRespond with a single JSON value that matches this schema:\n");
        system.push_str(&configuration.output_schema.describe());

        let input_json =
            serde_json::to_string_pretty(input).unwrap_or_else(|_| input.to_string());
        let user = format!("Input:\n{input_json}");

        Ok(RenderedPrompt { system, user })
    }
}

fn render_field(template: &str, context: &Context) -> Result<String, GenerationError> {
    // Plain text skips the template engine so literal braces survive.
    if !template.contains("{{") && !template.contains("{%") {
        return Ok(template.to_string());
    }
    Tera::one_off(template, context, false)
        .map_err(|error| GenerationError::PromptRender(describe_tera_error(&error)))
}

fn describe_tera_error(error: &tera::Error) -> String {
    let mut message = error.to_string();
    let mut source = std::error::Error::source(error);
    while let Some(inner) = source {
        message.push_str(": ");
        message.push_str(&inner.to_string());
        source = inner.source();
    }
    message
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use synapse_core::domain::process::{
        CachePolicy, GenerationParams, ProcessConfiguration, PromptTemplate,
    };
    use synapse_core::schema::SchemaNode;

    use super::PromptRenderer;
    use crate::error::GenerationError;

    fn configuration(goal: &str) -> ProcessConfiguration {
        ProcessConfiguration {
            prompt: PromptTemplate {
                goal: goal.to_string(),
                system_instructions: "You are a triage assistant. Output like {\"a\": 1}.".to_string(),
                additional_instructions: Some("Be terse.".to_string()),
            },
            generation: GenerationParams::default(),
            input_schema: SchemaNode::from_json(&json!({"type": "object", "properties": {}}))
                .expect("input schema"),
            output_schema: SchemaNode::from_json(&json!({
                "type": "object",
                "properties": { "category": { "type": "string" } },
                "required": ["category"]
            }))
            .expect("output schema"),
            cache: CachePolicy::default(),
        }
    }

    #[test]
    fn renders_input_placeholders_and_schema() {
        let rendered = PromptRenderer
            .render(&configuration("Classify ticket from {{ input.customer }}"), &json!({"customer": "Acme"}))
            .expect("render");

        assert!(rendered.system.contains("Goal: Classify ticket from Acme"));
        assert!(rendered.system.contains("{\"a\": 1}"), "literal braces are kept");
        assert!(rendered.system.contains("Be terse."));
        assert!(rendered.system.contains("\"required\""));
        assert!(rendered.user.contains("\"customer\": \"Acme\""));
    }

    #[test]
    fn missing_placeholder_value_is_a_render_error() {
        let error = PromptRenderer
            .render(&configuration("Hello {{ input.missing }}"), &json!({}))
            .expect_err("undefined variable");
        assert!(matches!(error, GenerationError::PromptRender(_)));
    }
}
