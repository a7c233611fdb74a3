use std::sync::{Mutex, PoisonError};

use localchat_engine_interface::{
  BoxError, Engine, EngineFailure, EngineParams, GenerationRequest, LoadEngine, LocalChatError,
};

use crate::{options::GenerationOptions, session::Session};

/// One bound model. Calls into the engine are serialised by the inner lock,
/// so a shared client never runs two completions at once.
pub struct InferenceClient {
  model: String,
  params: EngineParams,
  engine: Mutex<Box<dyn Engine>>,
}

impl std::fmt::Debug for InferenceClient {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("InferenceClient")
      .field("model", &self.model)
      .field("params", &self.params)
      .finish_non_exhaustive()
  }
}

impl InferenceClient {
  /// Binds `model` with engine `E`. Slow; keep it off the interactive
  /// thread.
  pub fn load<E: LoadEngine>(
    model: &str,
    params: EngineParams,
    config: &E::Config,
  ) -> Result<InferenceClient, LocalChatError> {
    let load_error = |source: BoxError| LocalChatError::ModelLoadError {
      model: model.to_string(),
      source,
    };

    if model.trim().is_empty() {
      return Err(load_error("model identifier is empty".into()));
    }
    params.validate().map_err(load_error)?;

    log::info!(
      "Loading model {} (n_ctx={}, n_threads={}, n_gpu_layers={})",
      model,
      params.n_ctx,
      params.n_threads,
      params.n_gpu_layers
    );
    let engine = E::load(model, &params, config).map_err(load_error)?;
    log::info!("Model {} loaded", model);

    Ok(InferenceClient::from_engine(model, params, engine))
  }

  pub fn from_engine(
    model: impl Into<String>,
    params: EngineParams,
    engine: impl Engine + 'static,
  ) -> InferenceClient {
    InferenceClient {
      model: model.into(),
      params,
      engine: Mutex::new(Box::new(engine)),
    }
  }

  pub fn model(&self) -> &str {
    &self.model
  }

  /// Renders `session` and returns the model's trimmed reply.
  pub fn generate(
    &self,
    session: &Session,
    options: &GenerationOptions,
  ) -> Result<String, LocalChatError> {
    let request = options.request_for(session)?;
    self.execute(&request)
  }

  /// Runs one completion for an already rendered request. Never retries.
  pub fn execute(&self, request: &GenerationRequest) -> Result<String, LocalChatError> {
    log::debug!(
      "Generating up to {} tokens from a {} byte prompt, stop={:?}",
      request.max_tokens,
      request.prompt.len(),
      request.stop
    );

    // a panic inside an earlier call poisons the lock, but the engine is
    // still usable for the next request
    let completion = {
      let mut engine = self.engine.lock().unwrap_or_else(PoisonError::into_inner);
      engine.complete(request)?
    };

    let text = completion.first_text().ok_or(EngineFailure::NoChoices)?;
    let reply = text.trim().to_string();

    log::info!("Produced response {:?}", reply);
    Ok(reply)
  }
}

#[cfg(test)]
pub(crate) mod tests {
  use std::sync::{Arc, Mutex};

  use localchat_engine_interface::Completion;

  use super::*;

  /// Replays scripted completions and remembers every request it saw.
  #[derive(Clone, Default)]
  pub(crate) struct StubEngine {
    pub replies: Arc<Mutex<Vec<Result<Completion, String>>>>,
    pub seen: Arc<Mutex<Vec<GenerationRequest>>>,
  }

  impl StubEngine {
    pub(crate) fn replying(replies: Vec<Result<Completion, String>>) -> StubEngine {
      StubEngine {
        replies: Arc::new(Mutex::new(replies)),
        seen: Default::default(),
      }
    }

    pub(crate) fn requests(&self) -> Vec<GenerationRequest> {
      self.seen.lock().unwrap().clone()
    }
  }

  impl Engine for StubEngine {
    fn complete(&mut self, request: &GenerationRequest) -> Result<Completion, EngineFailure> {
      self.seen.lock().unwrap().push(request.clone());
      let mut replies = self.replies.lock().unwrap();
      if replies.is_empty() {
        return Ok(Completion::from_text(request.stop.join("|")));
      }
      replies.remove(0).map_err(EngineFailure::backend)
    }
  }

  impl LoadEngine for StubEngine {
    type Config = Option<String>;

    fn load(model: &str, _params: &EngineParams, config: &Self::Config) -> Result<Self, BoxError> {
      match config {
        Some(reason) => Err(format!("{model}: {reason}").into()),
        None => Ok(StubEngine::default()),
      }
    }
  }

  /// Panics on its first call, answers normally afterwards.
  #[derive(Default)]
  pub(crate) struct FlakyEngine {
    calls: usize,
  }

  impl Engine for FlakyEngine {
    fn complete(&mut self, _request: &GenerationRequest) -> Result<Completion, EngineFailure> {
      self.calls += 1;
      if self.calls == 1 {
        panic!("kv cache exploded");
      }
      Ok(Completion::from_text(" recovered "))
    }
  }

  fn client(engine: StubEngine) -> InferenceClient {
    InferenceClient::from_engine("stub.gguf", EngineParams::default(), engine)
  }

  #[test]
  fn generate_trims_the_first_choice() {
    let engine = StubEngine::replying(vec![Ok(Completion::from_text(" Hi there! "))]);
    let mut session = Session::default();
    session.add_user_message("Hello").unwrap();

    let reply = client(engine.clone())
      .generate(&session, &GenerationOptions::default())
      .unwrap();

    assert_eq!(reply, "Hi there!");
    let seen = engine.requests();
    assert_eq!(seen.len(), 1);
    assert_eq!(
      seen[0].prompt,
      "System: You are a helpful AI assistant.\n\nUser: Hello\nAssistant: "
    );
  }

  #[test]
  fn default_stop_sequences_reach_the_engine() {
    // with nothing scripted the stub echoes the stop set it received
    let engine = StubEngine::default();
    let reply = client(engine)
      .generate(&Session::default(), &GenerationOptions::default())
      .unwrap();

    let mut stops = reply.split('|').collect::<Vec<_>>();
    stops.sort();
    assert_eq!(stops, ["Assistant:", "System:", "User:"]);
  }

  #[test]
  fn empty_choices_fail_closed() {
    let engine = StubEngine::replying(vec![Ok(Completion::default())]);
    let err = client(engine)
      .generate(&Session::default(), &GenerationOptions::default())
      .unwrap_err();

    assert!(matches!(
      err,
      LocalChatError::EngineError {
        source: EngineFailure::NoChoices
      }
    ));
  }

  #[test]
  fn engine_errors_are_not_retried() {
    let engine = StubEngine::replying(vec![
      Err("boom".to_string()),
      Ok(Completion::from_text("late")),
    ]);
    let err = client(engine.clone())
      .generate(&Session::default(), &GenerationOptions::default())
      .unwrap_err();

    assert!(matches!(err, LocalChatError::EngineError { .. }));
    assert_eq!(engine.requests().len(), 1);
  }

  #[test]
  fn engine_survives_a_panicking_call() {
    let client = InferenceClient::from_engine(
      "flaky.gguf",
      EngineParams::default(),
      FlakyEngine::default(),
    );
    let session = Session::default();
    let options = GenerationOptions::default();

    let first = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
      client.generate(&session, &options)
    }));
    assert!(first.is_err());

    assert_eq!(client.generate(&session, &options).unwrap(), "recovered");
  }

  #[test]
  fn load_rejects_bad_tuning_and_engine_failures() {
    let bad_params = EngineParams {
      n_ctx: 0,
      ..Default::default()
    };
    let err = InferenceClient::load::<StubEngine>("model.gguf", bad_params, &None).unwrap_err();
    assert!(matches!(err, LocalChatError::ModelLoadError { .. }));

    let err = InferenceClient::load::<StubEngine>("  ", EngineParams::default(), &None).unwrap_err();
    assert!(matches!(err, LocalChatError::ModelLoadError { .. }));

    let err = InferenceClient::load::<StubEngine>(
      "missing.gguf",
      EngineParams::default(),
      &Some("no such file".to_string()),
    )
    .unwrap_err();
    match err {
      LocalChatError::ModelLoadError { model, source } => {
        assert_eq!(model, "missing.gguf");
        assert_eq!(source.to_string(), "missing.gguf: no such file");
      }
      other => panic!("unexpected error {other:?}"),
    }

    let client =
      InferenceClient::load::<StubEngine>("model.gguf", EngineParams::default(), &None).unwrap();
    assert_eq!(client.model(), "model.gguf");
  }
}
