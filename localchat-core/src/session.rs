use localchat_engine_interface::LocalChatError;

pub const DEFAULT_SYSTEM_INSTRUCTION: &str = "You are a helpful AI assistant.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
  System,
  User,
  Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
  role: Role,
  content: String,
}

impl Turn {
  pub fn role(&self) -> Role {
    self.role
  }

  pub fn content(&self) -> &str {
    &self.content
  }
}

/// Turn delimiters used when a session is flattened into a prompt. The same
/// labels double as the default stop sequences, so the two cannot drift.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptFormat {
  pub system_label: String,
  pub user_label: String,
  pub assistant_label: String,
  pub separator: String,
}

impl Default for PromptFormat {
  fn default() -> Self {
    PromptFormat {
      system_label: "System".to_string(),
      user_label: "User".to_string(),
      assistant_label: "Assistant".to_string(),
      separator: ":".to_string(),
    }
  }
}

impl PromptFormat {
  pub fn label(&self, role: Role) -> &str {
    match role {
      Role::System => &self.system_label,
      Role::User => &self.user_label,
      Role::Assistant => &self.assistant_label,
    }
  }

  /// `"User:"`-style prefixes for every role, in the order the engine is
  /// most likely to run into them.
  pub fn stop_sequences(&self) -> Vec<String> {
    [Role::User, Role::Assistant, Role::System]
      .iter()
      .map(|role| format!("{}{}", self.label(*role), self.separator))
      .collect()
  }

  fn line(&self, role: Role, text: &str) -> String {
    format!("{}{} {}", self.label(role), self.separator, text)
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Session {
  system_instruction: String,
  turns: Vec<Turn>,
  format: PromptFormat,
}

impl Default for Session {
  fn default() -> Self {
    Session::new(DEFAULT_SYSTEM_INSTRUCTION)
  }
}

impl Session {
  pub fn new(system_instruction: impl Into<String>) -> Session {
    Session {
      system_instruction: system_instruction.into(),
      turns: vec![],
      format: PromptFormat::default(),
    }
  }

  pub fn with_format(mut self, format: PromptFormat) -> Session {
    self.format = format;
    self
  }

  pub fn system_instruction(&self) -> &str {
    &self.system_instruction
  }

  pub fn set_system_instruction(&mut self, instruction: impl Into<String>) {
    self.system_instruction = instruction.into();
  }

  pub fn turns(&self) -> &[Turn] {
    &self.turns
  }

  pub fn format(&self) -> &PromptFormat {
    &self.format
  }

  /// Drops every turn. The system instruction and prompt format survive.
  pub fn reset(&mut self) {
    log::debug!("Resetting session with {} turns", self.turns.len());
    self.turns.clear();
  }

  /// Records a user turn verbatim. Content that is empty once whitespace is
  /// trimmed is rejected and the session is left as it was.
  pub fn add_user_message(&mut self, content: impl Into<String>) -> Result<(), LocalChatError> {
    let content = content.into();
    if content.trim().is_empty() {
      return Err(LocalChatError::invalid_input("message is empty"));
    }
    self.turns.push(Turn {
      role: Role::User,
      content,
    });
    Ok(())
  }

  /// Model output is stored as-is, the empty string included.
  pub fn add_assistant_message(&mut self, content: impl Into<String>) {
    self.turns.push(Turn {
      role: Role::Assistant,
      content: content.into(),
    });
  }

  /// Flattens the dialogue into the text the engine continues from:
  ///
  /// ```text
  /// System: <instruction>
  ///
  /// User: <content>
  /// Assistant: <content>
  /// Assistant:
  /// ```
  ///
  /// The trailing assistant label is left open for the model to fill in.
  pub fn render_prompt(&self) -> String {
    let mut prompt = self.format.line(Role::System, &self.system_instruction);
    prompt.push_str("\n\n");
    for turn in &self.turns {
      prompt.push_str(&self.format.line(turn.role, &turn.content));
      prompt.push('\n');
    }
    prompt.push_str(&self.format.line(Role::Assistant, ""));
    prompt
  }
}
