use std::{sync::Arc, thread};

use localchat_engine_interface::{describe, EngineParams, LoadEngine, LocalChatError};
use thiserror::Error;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

use crate::{
  client::InferenceClient,
  events::{post, ChatEvent, TaskId},
  options::{GenerationOptions, MAX_TOKENS_RANGE, TEMPERATURE_RANGE},
  session::Session,
  task::{GenerationTask, TaskHandle},
};

#[derive(Error, Debug)]
pub enum ControllerError {
  #[error("a reply is still being generated")]
  Busy,

  #[error("a model is still loading")]
  Loading,

  #[error("no model loaded, load a GGUF model first")]
  NoModel,

  #[error(transparent)]
  Chat(#[from] LocalChatError),
}

/// What the interface should show after an event has been applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
  ModelReady { model: String },
  ModelFailed { model: String, message: String },
  Reply(String),
  GenerationFailed(String),
  Ignored,
}

/// Owns the conversation and decides when background work may start. Every
/// method runs on the interactive context; workers only talk back through
/// the event channel handed out by [`ChatController::new`].
pub struct ChatController {
  session: Session,
  options: GenerationOptions,
  params: EngineParams,
  client: Option<Arc<InferenceClient>>,
  in_flight: Option<TaskHandle>,
  loading: Option<String>,
  next_task: TaskId,
  events: UnboundedSender<ChatEvent>,
}

impl ChatController {
  pub fn new(
    session: Session,
    options: GenerationOptions,
    params: EngineParams,
  ) -> (ChatController, UnboundedReceiver<ChatEvent>) {
    let (events, receiver) = unbounded_channel();
    let controller = ChatController {
      session,
      options,
      params,
      client: None,
      in_flight: None,
      loading: None,
      next_task: 0,
      events,
    };
    (controller, receiver)
  }

  pub fn session(&self) -> &Session {
    &self.session
  }

  pub fn options(&self) -> &GenerationOptions {
    &self.options
  }

  pub fn model(&self) -> Option<&str> {
    self.client.as_ref().map(|client| client.model())
  }

  pub fn is_busy(&self) -> bool {
    self.in_flight.is_some()
  }

  pub fn is_loading(&self) -> bool {
    self.loading.is_some()
  }

  /// Binds an already loaded client, replacing any previous one.
  pub fn attach(&mut self, client: Arc<InferenceClient>) {
    self.client = Some(client);
  }

  /// Loads `model` on a background thread. The result comes back as a
  /// `ModelLoaded` or `ModelLoadFailed` event.
  pub fn load_model<E: LoadEngine>(
    &mut self,
    model: &str,
    config: E::Config,
  ) -> Result<(), ControllerError> {
    if self.is_busy() {
      return Err(ControllerError::Busy);
    }
    if self.is_loading() {
      return Err(ControllerError::Loading);
    }

    let model = model.trim().to_string();
    let params = self.params;
    let events = self.events.clone();
    let worker_model = model.clone();

    thread::Builder::new()
      .name("model-loader".to_string())
      .spawn(move || {
        let event = match InferenceClient::load::<E>(&worker_model, params, &config) {
          Ok(client) => ChatEvent::ModelLoaded {
            model: worker_model,
            client: Arc::new(client),
          },
          Err(err) => ChatEvent::ModelLoadFailed {
            model: worker_model,
            message: describe(&err),
          },
        };
        post(&events, event);
      })
      .map_err(|err| LocalChatError::ModelLoadError {
        model: model.clone(),
        source: Box::new(err),
      })?;

    self.loading = Some(model);
    Ok(())
  }

  /// Records the user's message and starts generating a reply. Refused
  /// while another reply or a model load is pending.
  pub fn send(&mut self, text: &str) -> Result<TaskId, ControllerError> {
    let text = text.trim();
    if text.is_empty() {
      return Err(LocalChatError::invalid_input("message is empty").into());
    }
    if self.is_busy() {
      return Err(ControllerError::Busy);
    }
    if self.is_loading() {
      return Err(ControllerError::Loading);
    }
    let client = self.client.clone().ok_or(ControllerError::NoModel)?;

    // validate before touching the session so a bad setting leaves it intact
    self.options.validate()?;
    self.session.add_user_message(text)?;
    let request = self.options.request_for(&self.session)?;

    self.next_task += 1;
    let id = self.next_task;
    log::debug!("Starting generation task {} against {}", id, client.model());

    let handle = GenerationTask::new(id, client, request).start(self.events.clone());
    self.in_flight = Some(handle);
    Ok(id)
  }

  /// Applies one event drained from the channel.
  pub fn handle_event(&mut self, event: ChatEvent) -> Notice {
    match event {
      ChatEvent::ModelLoaded { model, client } => {
        log::info!("Model {} is ready", model);
        self.loading = None;
        self.client = Some(client);
        Notice::ModelReady { model }
      }
      ChatEvent::ModelLoadFailed { model, message } => {
        log::warn!("Loading {} failed: {}", model, message);
        self.loading = None;
        self.client = None;
        Notice::ModelFailed { model, message }
      }
      ChatEvent::GenerationFinished { task, result } => {
        match &self.in_flight {
          Some(handle) if handle.id() == task => {}
          _ => {
            log::warn!("Ignoring result of stale generation task {}", task);
            return Notice::Ignored;
          }
        }
        self.in_flight = None;

        let session = &mut self.session;
        result.dispatch(
          |text| {
            session.add_assistant_message(text.clone());
            Notice::Reply(text)
          },
          Notice::GenerationFailed,
        )
      }
    }
  }

  /// Forgets the dialogue but keeps the system instruction.
  pub fn clear(&mut self) -> Result<(), ControllerError> {
    if self.is_busy() {
      return Err(ControllerError::Busy);
    }
    self.session.reset();
    Ok(())
  }

  pub fn set_system_instruction(&mut self, instruction: &str) {
    self.session.set_system_instruction(instruction.trim());
  }

  pub fn set_max_tokens(&mut self, max_tokens: u32) -> Result<(), ControllerError> {
    if !MAX_TOKENS_RANGE.contains(&max_tokens) {
      return Err(
        LocalChatError::invalid_input(format!(
          "max tokens must be within {:?}",
          MAX_TOKENS_RANGE
        ))
        .into(),
      );
    }
    self.options.max_tokens = max_tokens;
    Ok(())
  }

  pub fn set_temperature(&mut self, temperature: f32) -> Result<(), ControllerError> {
    if !TEMPERATURE_RANGE.contains(&temperature) {
      return Err(
        LocalChatError::invalid_input(format!(
          "temperature must be within {:?}",
          TEMPERATURE_RANGE
        ))
        .into(),
      );
    }
    self.options.temperature = temperature;
    Ok(())
  }
}
