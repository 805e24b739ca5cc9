use huddle_types::{ChannelId, MessageId};

pub const HELP: &str = "\
commands:
  <text>               send a message
  /edit <id> <text>    edit one of your messages
  /delete <id>         delete one of your messages
  /older               load older history
  /channel <id>        switch channel
  /channels            list channels
  /join <id>           become a member of a channel
  /leave <id>          leave a channel
  /typing              tell the channel you are typing
  /retry               retry a failed history load
  /who                 show who is online
  /quit";

/// One line of user input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Send(String),
    Edit { id: MessageId, content: String },
    Delete(MessageId),
    Older,
    Channel(ChannelId),
    Channels,
    Join(ChannelId),
    Leave(ChannelId),
    Typing,
    Retry,
    Who,
    Help,
    Quit,
    Empty,
}

/// Parse a line. `Err` carries a usage hint.
pub fn parse(line: &str) -> Result<Input, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(Input::Empty);
    }
    let Some(command) = line.strip_prefix('/') else {
        return Ok(Input::Send(line.to_string()));
    };

    let (name, rest) = command.split_once(' ').unwrap_or((command, ""));
    let rest = rest.trim();
    let arg = |usage: &str| {
        if rest.is_empty() {
            Err(format!("usage: {}", usage))
        } else {
            Ok(rest.to_string())
        }
    };

    match name {
        "edit" => {
            let (id, content) = rest.split_once(' ').ok_or("usage: /edit <id> <text>")?;
            Ok(Input::Edit {
                id: MessageId::from(id),
                content: content.trim().to_string(),
            })
        }
        "delete" => arg("/delete <id>").map(|id| Input::Delete(id.into())),
        "older" => Ok(Input::Older),
        "channel" => arg("/channel <id>").map(|id| Input::Channel(id.into())),
        "channels" => Ok(Input::Channels),
        "join" => arg("/join <id>").map(|id| Input::Join(id.into())),
        "leave" => arg("/leave <id>").map(|id| Input::Leave(id.into())),
        "typing" => Ok(Input::Typing),
        "retry" => Ok(Input::Retry),
        "who" => Ok(Input::Who),
        "help" => Ok(Input::Help),
        "quit" | "exit" => Ok(Input::Quit),
        other => Err(format!("unknown command /{} (try /help)", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_is_a_message() {
        assert_eq!(parse("  hello world "), Ok(Input::Send("hello world".into())));
        assert_eq!(parse("   "), Ok(Input::Empty));
    }

    #[test]
    fn test_commands() {
        assert_eq!(
            parse("/edit m1 fixed typo"),
            Ok(Input::Edit {
                id: MessageId::from("m1"),
                content: "fixed typo".into()
            })
        );
        assert_eq!(parse("/delete m1"), Ok(Input::Delete(MessageId::from("m1"))));
        assert_eq!(parse("/channel general"), Ok(Input::Channel(ChannelId::from("general"))));
        assert_eq!(parse("/older"), Ok(Input::Older));
        assert_eq!(parse("/exit"), Ok(Input::Quit));
    }

    #[test]
    fn test_missing_arguments() {
        assert!(parse("/edit m1").is_err());
        assert!(parse("/delete").unwrap_err().contains("usage"));
        assert!(parse("/nope").unwrap_err().contains("/nope"));
    }
}
