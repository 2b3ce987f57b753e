//! Generation (chat completion) service abstraction.
//!
//! The pipeline uses the generation service in three instruction modes:
//! answering from context, rewriting the question into search queries
//! (structured JSON output), and writing a hypothetical answer for HyDE.

use async_trait::async_trait;

use crate::error::ServiceError;

/// One completion request.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub model: String,
    /// System-level instruction describing the task.
    pub instruction: String,
    /// The user turn.
    pub input: String,
    pub temperature: f32,
    /// Ask the backend for a JSON object instead of free text.
    pub json_output: bool,
}

impl GenerationRequest {
    pub fn text(
        model: impl Into<String>,
        instruction: impl Into<String>,
        input: impl Into<String>,
        temperature: f32,
    ) -> Self {
        Self {
            model: model.into(),
            instruction: instruction.into(),
            input: input.into(),
            temperature,
            json_output: false,
        }
    }

    pub fn json(
        model: impl Into<String>,
        instruction: impl Into<String>,
        input: impl Into<String>,
        temperature: f32,
    ) -> Self {
        Self {
            json_output: true,
            ..Self::text(model, instruction, input, temperature)
        }
    }
}

/// A backend that completes a prompt into free-form text.
#[async_trait]
pub trait GenerationService: Send + Sync {
    async fn complete(&self, request: &GenerationRequest) -> Result<String, ServiceError>;
}
