use std::{
  any::Any,
  panic::{self, AssertUnwindSafe},
  sync::{Arc, Mutex, PoisonError},
  thread::{self, JoinHandle},
};

use localchat_engine_interface::{describe, EngineFailure, GenerationRequest, LocalChatError};
use tokio::sync::mpsc::UnboundedSender;

use crate::{
  client::InferenceClient,
  events::{post, ChatEvent, GenerationResult, TaskId},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
  Created,
  Running,
  Completed,
  Failed,
}

impl TaskState {
  pub fn is_terminal(&self) -> bool {
    matches!(self, TaskState::Completed | TaskState::Failed)
  }
}

type SharedState = Arc<Mutex<TaskState>>;

fn read_state(state: &SharedState) -> TaskState {
  *state.lock().unwrap_or_else(PoisonError::into_inner)
}

fn set_state(id: TaskId, state: &SharedState, next: TaskState) {
  let mut current = state.lock().unwrap_or_else(PoisonError::into_inner);
  log::debug!("Generation task {} {:?} -> {:?}", id, *current, next);
  *current = next;
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
  if let Some(message) = payload.downcast_ref::<String>() {
    message.clone()
  } else if let Some(message) = payload.downcast_ref::<&'static str>() {
    (*message).to_string()
  } else {
    "unknown panic".to_string()
  }
}

/// One `execute` call on a worker thread. Single use: `start` consumes the
/// task, and exactly one `GenerationFinished` event is posted for it.
pub struct GenerationTask {
  id: TaskId,
  client: Arc<InferenceClient>,
  request: GenerationRequest,
  state: SharedState,
}

impl GenerationTask {
  pub fn new(id: TaskId, client: Arc<InferenceClient>, request: GenerationRequest) -> GenerationTask {
    GenerationTask {
      id,
      client,
      request,
      state: Arc::new(Mutex::new(TaskState::Created)),
    }
  }

  pub fn id(&self) -> TaskId {
    self.id
  }

  pub fn state(&self) -> TaskState {
    read_state(&self.state)
  }

  /// Hands the request to a worker thread and returns at once. The outcome
  /// arrives on `events`.
  pub fn start(self, events: UnboundedSender<ChatEvent>) -> TaskHandle {
    let GenerationTask {
      id,
      client,
      request,
      state,
    } = self;

    set_state(id, &state, TaskState::Running);

    let worker_state = state.clone();
    let worker_events = events.clone();
    let spawned = thread::Builder::new()
      .name(format!("generation-{id}"))
      .spawn(move || run(id, &client, &request, &worker_state, &worker_events));

    let worker = match spawned {
      Ok(worker) => Some(worker),
      Err(err) => {
        log::warn!("Could not spawn worker for generation task {}: {}", id, err);
        set_state(id, &state, TaskState::Failed);
        post(
          &events,
          ChatEvent::GenerationFinished {
            task: id,
            result: GenerationResult::Failure(format!("could not start generation: {err}")),
          },
        );
        None
      }
    };

    TaskHandle { id, state, worker }
  }
}

fn run(
  id: TaskId,
  client: &InferenceClient,
  request: &GenerationRequest,
  state: &SharedState,
  events: &UnboundedSender<ChatEvent>,
) {
  let outcome = panic::catch_unwind(AssertUnwindSafe(|| client.execute(request)));

  let result = match outcome {
    Ok(Ok(text)) => GenerationResult::Success(text),
    Ok(Err(err)) => GenerationResult::Failure(describe(&err)),
    Err(payload) => {
      let err = LocalChatError::from(EngineFailure::Panicked {
        message: panic_message(payload),
      });
      GenerationResult::Failure(describe(&err))
    }
  };

  let next = match &result {
    GenerationResult::Success(_) => TaskState::Completed,
    GenerationResult::Failure(message) => {
      log::warn!("Generation task {} failed: {}", id, message);
      TaskState::Failed
    }
  };
  set_state(id, state, next);

  post(events, ChatEvent::GenerationFinished { task: id, result });
}

/// Observer for a started task.
#[derive(Debug)]
pub struct TaskHandle {
  id: TaskId,
  state: SharedState,
  worker: Option<JoinHandle<()>>,
}

impl TaskHandle {
  pub fn id(&self) -> TaskId {
    self.id
  }

  pub fn state(&self) -> TaskState {
    read_state(&self.state)
  }

  /// Blocks until the worker exits and returns the final state.
  pub fn join(mut self) -> TaskState {
    if let Some(worker) = self.worker.take() {
      if worker.join().is_err() {
        log::warn!("Worker for generation task {} panicked", self.id);
      }
    }
    self.state()
  }
}
