use chat_proto::{ApplicationMessage, ReactionKind};

use super::error::CliError;

/// One parsed line of user input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatCommand {
    Say(ApplicationMessage),
    /// React to `id`, or to the last received message when `id` is `None`.
    React {
        id: Option<String>,
        reaction: ReactionKind,
    },
    Reactions,
    Status,
    Connect(String),
    Disconnect,
    Help,
    Quit,
}

pub const HELP: &str = "\
commands:
  <text>                  send a message (a Tenor link is sent as a GIF)
  //<text>                send text that starts with '/'
  /react <reaction>       react to the last received message
  /react <id> <reaction>  react to a specific message id
  /reactions              list available reactions
  /status                 show connection status
  /connect <peer>         call a peer
  /disconnect             hang up and return to idle
  /help                   show this help
  /quit                   leave";

/// Parses a line typed at the prompt. Blank lines yield `Ok(None)`.
pub fn parse_line(line: &str) -> Result<Option<ChatCommand>, CliError> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }

    if let Some(escaped) = trimmed.strip_prefix("//") {
        return Ok(ApplicationMessage::from_input(&format!("/{escaped}")).map(ChatCommand::Say));
    }

    let Some(body) = trimmed.strip_prefix('/') else {
        return Ok(ApplicationMessage::from_input(trimmed).map(ChatCommand::Say));
    };

    let mut parts = body.split_whitespace();
    let name = parts.next().unwrap_or_default();
    let args: Vec<&str> = parts.collect();

    let command = match (name, args.as_slice()) {
        ("react", [reaction]) => ChatCommand::React {
            id: None,
            reaction: parse_reaction(reaction)?,
        },
        ("react", [id, reaction]) => ChatCommand::React {
            id: Some((*id).to_string()),
            reaction: parse_reaction(reaction)?,
        },
        ("react", _) => {
            return Err(CliError::InvalidArgument(
                "usage: /react [id] <reaction>".into(),
            ));
        }
        ("reactions", []) => ChatCommand::Reactions,
        ("status", []) => ChatCommand::Status,
        ("connect", [peer]) => ChatCommand::Connect((*peer).to_string()),
        ("connect", _) => {
            return Err(CliError::InvalidArgument("usage: /connect <peer>".into()));
        }
        ("disconnect", []) => ChatCommand::Disconnect,
        ("help", _) => ChatCommand::Help,
        ("quit" | "exit", []) => ChatCommand::Quit,
        (other, _) => {
            return Err(CliError::InvalidArgument(format!(
                "unknown command '/{other}'; try /help"
            )));
        }
    };
    Ok(Some(command))
}

fn parse_reaction(raw: &str) -> Result<ReactionKind, CliError> {
    raw.parse::<ReactionKind>()
        .map_err(|err| CliError::InvalidArgument(err.to_string()))
}
