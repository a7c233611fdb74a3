use std::error::Error as StdError;

use serde::Deserialize;
use thiserror::Error;

pub type BoxError = Box<dyn StdError + Send + Sync>;

pub const DEFAULT_CONTEXT_SIZE: u32 = 4096;
pub const DEFAULT_THREADS: u32 = 6;
pub const DEFAULT_GPU_LAYERS: u32 = 0;

#[derive(Error, Debug)]
pub enum EngineFailure {
  #[error("engine returned no completion choices")]
  NoChoices,

  #[error("prompt needs {required} tokens but the context window holds {n_ctx}")]
  ContextOverflow { required: usize, n_ctx: u32 },

  #[error("engine request failed")]
  Backend {
    #[source]
    source: BoxError,
  },

  #[error("engine panicked: {message}")]
  Panicked { message: String },
}

impl EngineFailure {
  pub fn backend<E: Into<BoxError>>(source: E) -> Self {
    EngineFailure::Backend {
      source: source.into(),
    }
  }
}

#[derive(Error, Debug)]
pub enum LocalChatError {
  #[error("invalid input: {reason}")]
  InvalidInput { reason: String },

  #[error("failed to load model '{model}'")]
  ModelLoadError {
    model: String,
    #[source]
    source: BoxError,
  },

  #[error("generation failed")]
  EngineError {
    #[source]
    source: EngineFailure,
  },
}

impl LocalChatError {
  pub fn invalid_input(reason: impl Into<String>) -> Self {
    LocalChatError::InvalidInput {
      reason: reason.into(),
    }
  }
}

impl From<EngineFailure> for LocalChatError {
  fn from(source: EngineFailure) -> Self {
    LocalChatError::EngineError { source }
  }
}

/// Flattens an error and its chain of sources into one line, the form
/// failures are shown to the user in.
pub fn describe(err: &(dyn StdError + 'static)) -> String {
  let mut message = err.to_string();
  let mut source = err.source();
  while let Some(cause) = source {
    message.push_str(": ");
    message.push_str(&cause.to_string());
    source = cause.source();
  }
  message
}

/// Tuning parameters handed to the engine when a model is bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineParams {
  pub n_ctx: u32,
  pub n_threads: u32,
  pub n_gpu_layers: u32,
}

impl Default for EngineParams {
  fn default() -> Self {
    EngineParams {
      n_ctx: DEFAULT_CONTEXT_SIZE,
      n_threads: DEFAULT_THREADS,
      n_gpu_layers: DEFAULT_GPU_LAYERS,
    }
  }
}

impl EngineParams {
  pub fn validate(&self) -> Result<(), BoxError> {
    if self.n_ctx == 0 {
      return Err("context window (n_ctx) must be greater than zero".into());
    }
    if self.n_threads == 0 {
      return Err("thread count (n_threads) must be greater than zero".into());
    }
    Ok(())
  }
}

/// Everything the engine needs for one completion. Built from a session
/// snapshot and thrown away after the call.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
  pub prompt: String,
  pub max_tokens: u32,
  pub temperature: f32,
  pub stop: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Completion {
  #[serde(default)]
  pub choices: Vec<Choice>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Choice {
  pub text: String,
}

impl Completion {
  pub fn from_text(text: impl Into<String>) -> Self {
    Completion {
      choices: vec![Choice { text: text.into() }],
    }
  }

  pub fn first_text(&self) -> Option<&str> {
    self.choices.first().map(|choice| choice.text.as_str())
  }
}

pub trait Engine: Send {
  fn complete(&mut self, request: &GenerationRequest) -> Result<Completion, EngineFailure>;
}

/// An engine that can bind itself to a model identifier. Loading is slow
/// and must happen off the interactive thread.
pub trait LoadEngine: Engine + Sized + 'static {
  type Config: Clone + Send + 'static;

  fn load(model: &str, params: &EngineParams, config: &Self::Config) -> Result<Self, BoxError>;
}
