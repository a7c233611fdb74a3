use std::ops::RangeInclusive;

use localchat_engine_interface::{GenerationRequest, LocalChatError};

use crate::session::Session;

pub const DEFAULT_MAX_TOKENS: u32 = 256;
pub const DEFAULT_TEMPERATURE: f32 = 0.7;

/// Bounds offered to the user when tuning a conversation.
pub const MAX_TOKENS_RANGE: RangeInclusive<u32> = 16..=4096;
pub const TEMPERATURE_RANGE: RangeInclusive<f32> = 0.0..=2.0;

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationOptions {
  pub max_tokens: u32,
  pub temperature: f32,
  /// `None` means "stop at the session's own turn labels".
  pub stop: Option<Vec<String>>,
}

impl Default for GenerationOptions {
  fn default() -> Self {
    GenerationOptions {
      max_tokens: DEFAULT_MAX_TOKENS,
      temperature: DEFAULT_TEMPERATURE,
      stop: None,
    }
  }
}

impl GenerationOptions {
  pub fn validate(&self) -> Result<(), LocalChatError> {
    if self.max_tokens == 0 {
      return Err(LocalChatError::invalid_input("max_tokens must be greater than zero"));
    }
    if !TEMPERATURE_RANGE.contains(&self.temperature) {
      return Err(LocalChatError::invalid_input(format!(
        "temperature {} is outside {:?}",
        self.temperature, TEMPERATURE_RANGE
      )));
    }
    Ok(())
  }

  /// Snapshots `session` into the request the engine will see.
  pub fn request_for(&self, session: &Session) -> Result<GenerationRequest, LocalChatError> {
    self.validate()?;

    let stop = match &self.stop {
      Some(stop) => stop.clone(),
      None => session.format().stop_sequences(),
    };

    Ok(GenerationRequest {
      prompt: session.render_prompt(),
      max_tokens: self.max_tokens,
      temperature: self.temperature,
      stop,
    })
  }
}
