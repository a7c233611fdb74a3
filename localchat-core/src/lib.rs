mod client;
mod controller;
mod events;
mod options;
mod session;
mod task;

pub use client::InferenceClient;
pub use controller::{ChatController, ControllerError, Notice};
pub use events::{ChatEvent, GenerationResult, TaskId};
pub use options::{
  GenerationOptions, DEFAULT_MAX_TOKENS, DEFAULT_TEMPERATURE, MAX_TOKENS_RANGE, TEMPERATURE_RANGE,
};
pub use session::{PromptFormat, Role, Session, Turn, DEFAULT_SYSTEM_INSTRUCTION};
pub use task::{GenerationTask, TaskHandle, TaskState};
