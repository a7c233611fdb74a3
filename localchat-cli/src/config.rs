use std::{env, path::PathBuf, str::FromStr, time::Duration};

use anyhow::{anyhow, Context, Result};
use localchat_core::{
  GenerationOptions, DEFAULT_MAX_TOKENS, DEFAULT_SYSTEM_INSTRUCTION, DEFAULT_TEMPERATURE,
  MAX_TOKENS_RANGE, TEMPERATURE_RANGE,
};
use localchat_engine_interface::{
  EngineParams, DEFAULT_CONTEXT_SIZE, DEFAULT_GPU_LAYERS, DEFAULT_THREADS,
};
use localchat_server::{ServerConfig, DEFAULT_SERVER_URL};

#[derive(Debug, Clone)]
pub struct ChatConfig {
  pub model: Option<String>,
  pub server: ServerConfig,
  pub params: EngineParams,
  pub options: GenerationOptions,
  pub system_prompt: String,
}

impl ChatConfig {
  pub fn from_env() -> Result<ChatConfig> {
    ChatConfig::from_lookup(|name| env::var(name).ok())
  }

  fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<ChatConfig> {
    let var = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

    let parsed = |name: &str, default: u32| -> Result<u32> {
      match var(name) {
        None => Ok(default),
        Some(raw) => parse(name, &raw),
      }
    };

    let max_tokens = parsed("MAX_TOKENS", DEFAULT_MAX_TOKENS)?;
    if !MAX_TOKENS_RANGE.contains(&max_tokens) {
      return Err(anyhow!(
        "MAX_TOKENS={} is outside {:?}",
        max_tokens,
        MAX_TOKENS_RANGE
      ));
    }

    let temperature = match var("TEMPERATURE") {
      None => DEFAULT_TEMPERATURE,
      Some(raw) => parse::<f32>("TEMPERATURE", &raw)?,
    };
    if !TEMPERATURE_RANGE.contains(&temperature) {
      return Err(anyhow!(
        "TEMPERATURE={} is outside {:?}",
        temperature,
        TEMPERATURE_RANGE
      ));
    }

    let request_timeout = match var("REQUEST_TIMEOUT_SECS") {
      None => None,
      Some(raw) => Some(Duration::from_secs(parse("REQUEST_TIMEOUT_SECS", &raw)?)),
    };

    Ok(ChatConfig {
      model: var("MODEL_PATH"),
      server: ServerConfig {
        base_url: var("LOCALCHAT_SERVER_URL").unwrap_or_else(|| DEFAULT_SERVER_URL.to_string()),
        tokenizer_path: var("TOKENIZER_PATH").map(PathBuf::from),
        request_timeout,
      },
      params: EngineParams {
        n_ctx: parsed("N_CTX", DEFAULT_CONTEXT_SIZE)?,
        n_threads: parsed("N_THREADS", DEFAULT_THREADS)?,
        n_gpu_layers: parsed("N_GPU_LAYERS", DEFAULT_GPU_LAYERS)?,
      },
      options: GenerationOptions {
        max_tokens,
        temperature,
        stop: None,
      },
      system_prompt: var("SYSTEM_PROMPT")
        .map(|prompt| prompt.trim().to_string())
        .unwrap_or_else(|| DEFAULT_SYSTEM_INSTRUCTION.to_string()),
    })
  }
}

fn parse<T>(name: &str, raw: &str) -> Result<T>
where
  T: FromStr,
  T::Err: std::error::Error + Send + Sync + 'static,
{
  raw
    .trim()
    .parse::<T>()
    .with_context(|| format!("{name} is set to {raw:?}, which is not a valid number"))
}
