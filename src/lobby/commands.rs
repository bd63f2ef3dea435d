//! Command parsing: chat text to verb and arguments
//!
//! Ordinary verbs match as prefixes, so `!addduel` joins `duel` and
//! `!whoever` asks for status. Operator commands are only considered when the
//! caller is authorized and the text starts with `!`. Anything unrecognised is
//! not a command.

use crate::types::{ParticipantId, QueueName};
use crate::utils::words;
use once_cell::sync::Lazy;
use regex::Regex;

/// A recognised command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Join the named queues, or the default queue when empty
    Join(Vec<QueueName>),
    /// Leave the named queues, or every queue when empty
    Leave(Vec<QueueName>),
    /// Show every queue
    Status,
    /// Operator: remove a participant from every queue
    ForceRemove(ParticipantId),
    /// Operator: report this channel's identifier
    ChannelIdentity,
    /// Operator: report the operator role identifier
    RoleIdentity,
}

#[derive(Clone, Copy)]
enum Verb {
    Join,
    Leave,
    Status,
}

static ORDINARY_COMMANDS: Lazy<Vec<(Regex, Verb)>> = Lazy::new(|| {
    [
        (r"^!add\s*(.*)", Verb::Join),
        (r"^\+\+", Verb::Join),
        (r"^\+(.+)", Verb::Join),
        (r"^!remove\s*(.*)", Verb::Leave),
        (r"^--", Verb::Leave),
        (r"^-(.+)", Verb::Leave),
        (r"^!who", Verb::Status),
        (r"^\?\?", Verb::Status),
    ]
    .into_iter()
    .map(|(pattern, verb)| (Regex::new(pattern).expect("command pattern is valid"), verb))
    .collect()
});

static MENTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<@!?(\d+)>").expect("mention pattern is valid"));

/// Parse chat text into a command
pub fn parse(text: &str, authorized: bool) -> Option<Command> {
    let content = text.trim().to_lowercase();

    if authorized {
        if let Some(command) = parse_operator(&content) {
            return Some(command);
        }
    }

    parse_ordinary(&content)
}

fn parse_operator(content: &str) -> Option<Command> {
    let rest = content.strip_prefix('!')?;
    let (verb, args) = match rest.split_once(' ') {
        Some((verb, args)) => (verb, args.trim()),
        None => (rest, ""),
    };

    match verb {
        "pickuphere" => Some(Command::ChannelIdentity),
        "pickuproles" => Some(Command::RoleIdentity),
        "opremove" => MENTION
            .captures(args)
            .map(|caps| Command::ForceRemove(caps[1].to_string())),
        _ => None,
    }
}

fn parse_ordinary(content: &str) -> Option<Command> {
    ORDINARY_COMMANDS.iter().find_map(|(pattern, verb)| {
        let caps = pattern.captures(content)?;
        let args = caps.get(1).map(|m| words(m.as_str())).unwrap_or_default();
        Some(match verb {
            Verb::Join => Command::Join(args),
            Verb::Leave => Command::Leave(args),
            Verb::Status => Command::Status,
        })
    })
}
