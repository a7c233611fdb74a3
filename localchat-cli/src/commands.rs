#[derive(Debug, PartialEq)]
pub enum Command<'a> {
  Send(&'a str),
  Load(&'a str),
  System(&'a str),
  Clear,
  MaxTokens(&'a str),
  Temperature(&'a str),
  History,
  Help,
  Quit,
  Unknown(&'a str),
}

pub const HELP: &str = r#"Type a message and press enter to chat. Commands:
  /load <model>         bind a model served by the inference server
  /system <text>        replace the system instruction
  /clear                forget the conversation
  /max_tokens <n>       reply length limit (16-4096)
  /temperature <t>      sampling temperature (0.0-2.0)
  /history              print the conversation so far
  /help                 show this message
  /quit                 exit"#;

pub fn parse(line: &str) -> Command<'_> {
  let line = line.trim();
  if !line.starts_with('/') {
    return Command::Send(line);
  }

  let (name, rest) = match line.split_once(char::is_whitespace) {
    Some((name, rest)) => (name, rest.trim()),
    None => (line, ""),
  };

  match name {
    "/load" => Command::Load(rest),
    "/system" => Command::System(rest),
    "/clear" => Command::Clear,
    "/max_tokens" => Command::MaxTokens(rest),
    "/temperature" => Command::Temperature(rest),
    "/history" => Command::History,
    "/help" => Command::Help,
    "/quit" | "/exit" => Command::Quit,
    _ => Command::Unknown(name),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn plain_text_is_a_message() {
    assert_eq!(parse("  Hello there \n"), Command::Send("Hello there"));
    assert_eq!(parse(""), Command::Send(""));
  }

  #[test]
  fn commands_take_the_rest_of_the_line() {
    assert_eq!(parse("/load  /models/llama 3.gguf "), Command::Load("/models/llama 3.gguf"));
    assert_eq!(parse("/system Be brief."), Command::System("Be brief."));
    assert_eq!(parse("/max_tokens 512"), Command::MaxTokens("512"));
    assert_eq!(parse("/temperature"), Command::Temperature(""));
    assert_eq!(parse("/clear"), Command::Clear);
    assert_eq!(parse("/exit"), Command::Quit);
    assert_eq!(parse("/frobnicate now"), Command::Unknown("/frobnicate"));
  }
}
