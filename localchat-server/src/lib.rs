//! Engine backed by a locally running inference server, e.g. llama.cpp's
//! `llama-server`, that exposes the OpenAI-style `/v1/completions` API.
//!
//! The server owns the loaded GGUF weights. Binding checks that the server is
//! reachable and actually serves the requested model; every completion is
//! one blocking HTTP round trip.

use std::{
  path::{Path, PathBuf},
  time::Duration,
};

use localchat_engine_interface::{
  BoxError, Completion, Engine, EngineFailure, EngineParams, GenerationRequest, LoadEngine,
};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use tokenizers::Tokenizer;

pub const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:8080";

#[derive(Debug, Clone)]
pub struct ServerConfig {
  pub base_url: String,
  /// `tokenizer.json` matching the served model. When set, prompts are
  /// measured against the context window before they are sent.
  pub tokenizer_path: Option<PathBuf>,
  /// `None` waits for the server indefinitely.
  pub request_timeout: Option<Duration>,
}

impl Default for ServerConfig {
  fn default() -> Self {
    ServerConfig {
      base_url: DEFAULT_SERVER_URL.to_string(),
      tokenizer_path: None,
      request_timeout: None,
    }
  }
}

#[derive(Serialize)]
struct CompletionBody<'a> {
  model: &'a str,
  prompt: &'a str,
  max_tokens: u32,
  temperature: f32,
  stop: &'a [String],
  stream: bool,
}

#[derive(Deserialize)]
struct ModelList {
  #[serde(default)]
  data: Vec<ModelEntry>,
}

#[derive(Deserialize)]
struct ModelEntry {
  id: String,
}

/// Servers usually report the path they were started with, users usually
/// type the file name. Either matches.
fn same_model(listed: &str, requested: &str) -> bool {
  if listed == requested {
    return true;
  }
  match (
    Path::new(listed).file_name(),
    Path::new(requested).file_name(),
  ) {
    (Some(listed), Some(requested)) => listed == requested,
    _ => false,
  }
}

fn fits_context(prompt_tokens: usize, max_tokens: u32, n_ctx: u32) -> Result<(), EngineFailure> {
  let required = prompt_tokens + max_tokens as usize;
  if required > n_ctx as usize {
    return Err(EngineFailure::ContextOverflow { required, n_ctx });
  }
  Ok(())
}

pub struct ServerEngine {
  http: Client,
  base_url: String,
  model: String,
  n_ctx: u32,
  tokenizer: Option<Tokenizer>,
}

impl ServerEngine {
  pub fn connect(
    model: &str,
    params: &EngineParams,
    config: &ServerConfig,
  ) -> Result<ServerEngine, BoxError> {
    let base_url = config.base_url.trim_end_matches('/').to_string();
    let http = Client::builder().timeout(config.request_timeout).build()?;

    let tokenizer = match &config.tokenizer_path {
      Some(path) => Some(
        Tokenizer::from_file(path)
          .map_err(|e| format!("could not read tokenizer {}: {}", path.display(), e))?,
      ),
      None => None,
    };

    log::debug!("Listing models served at {}", base_url);
    let listed: ModelList = http
      .get(format!("{base_url}/v1/models"))
      .send()?
      .error_for_status()?
      .json()?;

    let served = match listed.data.iter().find(|entry| same_model(&entry.id, model)) {
      Some(entry) => entry.id.clone(),
      None => {
        let available = listed
          .data
          .iter()
          .map(|entry| entry.id.as_str())
          .collect::<Vec<_>>()
          .join(", ");
        return Err(
          format!("{base_url} does not serve this model (available: [{available}])").into(),
        );
      }
    };

    // threads and GPU offload are decided when the server process starts
    log::debug!(
      "Server {} serves {}; n_threads={} and n_gpu_layers={} are managed by the server",
      base_url,
      served,
      params.n_threads,
      params.n_gpu_layers
    );

    Ok(ServerEngine {
      http,
      base_url,
      model: served,
      n_ctx: params.n_ctx,
      tokenizer,
    })
  }

  fn check_context(&self, request: &GenerationRequest) -> Result<(), EngineFailure> {
    let tokenizer = match &self.tokenizer {
      Some(tokenizer) => tokenizer,
      None => return Ok(()),
    };
    let encoding = tokenizer
      .encode(request.prompt.clone(), false)
      .map_err(EngineFailure::backend)?;

    log::debug!("Prompt is {} tokens", encoding.get_ids().len());
    fits_context(encoding.get_ids().len(), request.max_tokens, self.n_ctx)
  }
}

impl Engine for ServerEngine {
  fn complete(&mut self, request: &GenerationRequest) -> Result<Completion, EngineFailure> {
    self.check_context(request)?;

    let body = CompletionBody {
      model: &self.model,
      prompt: &request.prompt,
      max_tokens: request.max_tokens,
      temperature: request.temperature,
      stop: &request.stop,
      stream: false,
    };

    self
      .http
      .post(format!("{}/v1/completions", self.base_url))
      .json(&body)
      .send()
      .and_then(|response| response.error_for_status())
      .and_then(|response| response.json::<Completion>())
      .map_err(EngineFailure::backend)
  }
}

impl LoadEngine for ServerEngine {
  type Config = ServerConfig;

  fn load(model: &str, params: &EngineParams, config: &ServerConfig) -> Result<Self, BoxError> {
    ServerEngine::connect(model, params, config)
  }
}
