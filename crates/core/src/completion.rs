//! Streaming Completion Client
//!
//! The engine consumes text completions through a single abstract seam: a
//! system prompt, one user message, and a token budget in; an async sequence
//! of text chunks out. The default implementation targets any
//! OpenAI-compatible chat-completion API.

use anyhow::Result;
use async_openai::{
    Client,
    config::OpenAIConfig,
    error::OpenAIError,
    types::{
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs,
    },
};
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use std::pin::Pin;

/// A stream of text chunks from the completion service.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<String, OpenAIError>> + Send>>;

/// A generic client for streaming text completions.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Opens a streaming completion for one system prompt and user message,
    /// constrained to `max_tokens` output tokens.
    async fn stream(
        &self,
        system_prompt: &str,
        user_message: &str,
        max_tokens: u32,
    ) -> Result<ChunkStream>;
}

/// An implementation of `CompletionClient` for any OpenAI-compatible API.
pub struct OpenAICompatibleClient {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAICompatibleClient {
    /// Creates a client from an API configuration (key and optional base
    /// URL) and a chat model identifier, e.g. "gpt-4o-mini".
    pub fn new(config: OpenAIConfig, model: String) -> Self {
        Self {
            client: Client::with_config(config),
            model,
        }
    }
}

#[async_trait]
impl CompletionClient for OpenAICompatibleClient {
    async fn stream(
        &self,
        system_prompt: &str,
        user_message: &str,
        max_tokens: u32,
    ) -> Result<ChunkStream> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(vec![
                ChatCompletionRequestSystemMessageArgs::default()
                    .content(system_prompt)
                    .build()?
                    .into(),
                ChatCompletionRequestUserMessageArgs::default()
                    .content(user_message)
                    .build()?
                    .into(),
            ])
            .max_completion_tokens(max_tokens)
            .stream(true)
            .build()?;

        let stream = self.client.chat().create_stream(request).await?;

        Ok(Box::pin(stream.filter_map(|result| async {
            match result {
                Ok(response) => {
                    let choice = response.choices.first()?;
                    match &choice.delta.content {
                        Some(content) if !content.is_empty() => Some(Ok(content.clone())),
                        _ => None,
                    }
                }
                Err(e) => Some(Err(e)),
            }
        })))
    }
}

/// Drains a chunk stream into a single string. Returns the transport error
/// if any chunk fails; partial output is dropped with it.
pub async fn collect_stream(mut stream: ChunkStream) -> Result<String, OpenAIError> {
    let mut out = String::new();
    while let Some(chunk) = stream.next().await {
        out.push_str(&chunk?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_collect_stream_concatenates_chunks() {
        let stream: ChunkStream = Box::pin(futures::stream::iter(vec![
            Ok("Fully correct! ".to_string()),
            Ok("Blood carries oxygen.".to_string()),
        ]));

        let text = collect_stream(stream).await.unwrap();
        assert_eq!(text, "Fully correct! Blood carries oxygen.");
    }

    #[tokio::test]
    async fn test_collect_stream_surfaces_transport_error() {
        let stream: ChunkStream = Box::pin(futures::stream::iter(vec![
            Ok("partial".to_string()),
            Err(OpenAIError::StreamError("connection dropped".to_string())),
        ]));

        assert!(collect_stream(stream).await.is_err());
    }
}
