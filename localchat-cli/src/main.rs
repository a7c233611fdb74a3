mod commands;
mod config;

use std::io::{self, Write};

use anyhow::{Context, Result};
use localchat_core::{ChatController, ControllerError, Notice, Session};
use localchat_server::{ServerConfig, ServerEngine};
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::{
  commands::{Command, HELP},
  config::ChatConfig,
};

fn prompt() {
  print!("> ");
  io::stdout().flush().ok();
}

fn report(err: ControllerError) {
  match err {
    ControllerError::Busy => println!("Still generating, please wait for the reply."),
    other => println!("Error: {other}"),
  }
}

fn show(notice: Notice) {
  match notice {
    Notice::ModelReady { model } => println!("Model loaded: {model}"),
    Notice::ModelFailed { model, message } => println!("Error loading {model}: {message}"),
    Notice::Reply(text) => println!("Assistant: {text}"),
    Notice::GenerationFailed(message) => println!("Generation error: {message}"),
    Notice::Ignored => return,
  }
  prompt();
}

fn print_history(session: &Session) {
  let format = session.format();
  println!("System: {}", session.system_instruction());
  for turn in session.turns() {
    println!("{}: {}", format.label(turn.role()), turn.content());
  }
}

/// Returns `false` once the user asks to leave.
fn handle_line(controller: &mut ChatController, server: &ServerConfig, line: &str) -> bool {
  let outcome = match commands::parse(line) {
    Command::Send("") => Ok(()),
    Command::Send(text) => controller.send(text).map(|task| {
      log::debug!("Generation task {} started", task);
    }),
    Command::Load("") => {
      println!("Usage: /load <model>");
      Ok(())
    }
    Command::Load(model) => controller
      .load_model::<ServerEngine>(model, server.clone())
      .map(|_| println!("Loading {model}...")),
    Command::System(text) => {
      controller.set_system_instruction(text);
      println!("System: {}", controller.session().system_instruction());
      Ok(())
    }
    Command::Clear => controller.clear().map(|_| {
      println!("Conversation cleared.");
      println!("System: {}", controller.session().system_instruction());
    }),
    Command::MaxTokens(raw) => match raw.parse::<u32>() {
      Ok(max_tokens) => controller.set_max_tokens(max_tokens),
      Err(_) => {
        println!("Usage: /max_tokens <number>");
        Ok(())
      }
    },
    Command::Temperature(raw) => match raw.parse::<f32>() {
      Ok(temperature) => controller.set_temperature(temperature),
      Err(_) => {
        println!("Usage: /temperature <number>");
        Ok(())
      }
    },
    Command::History => {
      print_history(controller.session());
      Ok(())
    }
    Command::Help => {
      println!("{HELP}");
      Ok(())
    }
    Command::Quit => return false,
    Command::Unknown(name) => {
      println!("Unknown command {name}, try /help");
      Ok(())
    }
  };

  if let Err(err) = outcome {
    report(err);
  }
  if !controller.is_busy() && !controller.is_loading() {
    prompt();
  }
  true
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
  env_logger::init();

  let config = ChatConfig::from_env().with_context(|| "Invalid configuration")?;
  log::debug!("Starting with {:?}", config);

  let (mut controller, mut events) = ChatController::new(
    Session::new(config.system_prompt.clone()),
    config.options.clone(),
    config.params,
  );

  println!("System: {}", controller.session().system_instruction());
  match &config.model {
    Some(model) => {
      controller
        .load_model::<ServerEngine>(model, config.server.clone())
        .with_context(|| format!("Unable to start loading {model}"))?;
      println!("Loading {model}...");
    }
    None => {
      println!("No model loaded, use /load <model> (see /help)");
      prompt();
    }
  }

  let mut lines = BufReader::new(tokio::io::stdin()).lines();
  loop {
    tokio::select! {
      line = lines.next_line() => {
        let line = line.with_context(|| "Failed to read from stdin")?;
        match line {
          Some(line) => {
            if !handle_line(&mut controller, &config.server, &line) {
              break;
            }
          }
          None => break,
        }
      }
      Some(event) = events.recv() => show(controller.handle_event(event)),
    }
  }

  Ok(())
}
