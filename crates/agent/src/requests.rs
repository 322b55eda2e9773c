use maimai_core::domain::status::StatusField;
use maimai_core::domain::user::Polarity;

pub const COMMAND_PREFIX: char = '/';

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    Reset,
    Ping,
    SwitchPersona(String),
    ListPersonas,
    /// Adapt the persona to the style of the quoted sample text.
    AdaptPersona(String),
}

impl Command {
    /// Parses a slash command. Unknown commands, a bare `/persona` and a
    /// bare `/adapt` are not commands.
    pub fn parse(text: &str) -> Option<Self> {
        let rest = text.trim().strip_prefix(COMMAND_PREFIX)?;
        let (name, argument) = match rest.split_once(char::is_whitespace) {
            Some((name, argument)) => (name, argument.trim()),
            None => (rest, ""),
        };

        match name.to_ascii_lowercase().as_str() {
            "reset" => Some(Self::Reset),
            "ping" => Some(Self::Ping),
            "personas" => Some(Self::ListPersonas),
            "persona" => argument
                .split_whitespace()
                .next()
                .map(|id| Self::SwitchPersona(id.to_ascii_lowercase())),
            "adapt" if !argument.is_empty() => Some(Self::AdaptPersona(argument.to_owned())),
            _ => None,
        }
    }

    pub fn action_key(&self) -> &'static str {
        match self {
            Self::Reset => "command.reset",
            Self::Ping => "command.ping",
            Self::SwitchPersona(_) => "command.switch_persona",
            Self::ListPersonas => "command.list_personas",
            Self::AdaptPersona(_) => "command.adapt_persona",
        }
    }
}

/// What an admitted message asks for, decided once before any handling.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RequestKind {
    Command(Command),
    Introspect(StatusField),
    Feedback { polarity: Polarity, marker: String },
    Chat(String),
}

impl RequestKind {
    /// Classifies a wake-word-stripped body. Commands win, then status
    /// questions, then feedback markers; everything else is chat.
    pub fn parse(body: &str) -> Self {
        let body = body.trim();
        if let Some(command) = Command::parse(body) {
            return Self::Command(command);
        }
        if let Some(field) = StatusField::from_question(body) {
            return Self::Introspect(field);
        }
        if let Some(polarity) = Polarity::from_prefix(body) {
            return Self::Feedback { polarity, marker: body.to_owned() };
        }
        Self::Chat(body.to_owned())
    }

    pub fn action_key(&self) -> &'static str {
        match self {
            Self::Command(command) => command.action_key(),
            Self::Introspect(_) => "request.introspect",
            Self::Feedback { .. } => "request.feedback",
            Self::Chat(_) => "request.chat",
        }
    }
}

#[cfg(test)]
mod tests {
    use maimai_core::domain::status::StatusField;
    use maimai_core::domain::user::Polarity;

    use super::{Command, RequestKind};

    #[test]
    fn slash_commands_parse_with_arguments() {
        assert_eq!(Command::parse("/reset"), Some(Command::Reset));
        assert_eq!(Command::parse("  /PING  "), Some(Command::Ping));
        assert_eq!(Command::parse("/personas"), Some(Command::ListPersonas));
        assert_eq!(
            Command::parse("/persona Caring"),
            Some(Command::SwitchPersona("caring".to_owned()))
        );
        assert_eq!(Command::parse("/persona"), None);
        assert_eq!(
            Command::parse("/Adapt  您好，请问 退款流程？ "),
            Some(Command::AdaptPersona("您好，请问 退款流程？".to_owned()))
        );
        assert_eq!(Command::parse("/adapt   "), None);
        assert_eq!(Command::parse("/unknown"), None);
        assert_eq!(Command::parse("reset"), None);
    }

    #[test]
    fn introspection_takes_precedence_over_feedback() {
        assert_eq!(
            RequestKind::parse("👍 你在想什么"),
            RequestKind::Introspect(StatusField::Thinking)
        );
    }

    #[test]
    fn feedback_keeps_the_raw_marker_text() {
        assert_eq!(
            RequestKind::parse("👎 太长了"),
            RequestKind::Feedback { polarity: Polarity::Negative, marker: "👎 太长了".to_owned() }
        );
    }

    #[test]
    fn plain_text_is_chat() {
        let chat = RequestKind::parse("  今天吃什么  ");
        assert_eq!(chat, RequestKind::Chat("今天吃什么".to_owned()));
        assert_eq!(chat.action_key(), "request.chat");
        assert_eq!(
            RequestKind::parse("/adapt 哈哈哈 好耶").action_key(),
            "command.adapt_persona"
        );
    }
}
