use std::sync::Arc;

use tokio::sync::mpsc::UnboundedSender;

use crate::client::InferenceClient;

pub type TaskId = u64;

/// Terminal outcome of one generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationResult {
  Success(String),
  Failure(String),
}

impl GenerationResult {
  /// Fires exactly one of the two callbacks. Call it from the context that
  /// owns the interface, never from a worker.
  pub fn dispatch<T, S, F>(self, on_success: S, on_failure: F) -> T
  where
    S: FnOnce(String) -> T,
    F: FnOnce(String) -> T,
  {
    match self {
      GenerationResult::Success(text) => on_success(text),
      GenerationResult::Failure(message) => on_failure(message),
    }
  }
}

/// Everything background work reports back to the interactive context.
#[derive(Debug)]
pub enum ChatEvent {
  ModelLoaded {
    model: String,
    client: Arc<InferenceClient>,
  },
  ModelLoadFailed {
    model: String,
    message: String,
  },
  GenerationFinished {
    task: TaskId,
    result: GenerationResult,
  },
}

pub(crate) fn post(events: &UnboundedSender<ChatEvent>, event: ChatEvent) {
  if let Err(err) = events.send(event) {
    log::warn!("Nobody is listening for {:?}", err.0);
  }
}
