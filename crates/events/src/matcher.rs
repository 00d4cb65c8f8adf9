use regex::Regex;

use crate::event::Event;

/// Predicate a listener applies to an event before it is invoked.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Matcher {
    /// Every event.
    #[default]
    Any,
    /// Regular expression searched in the message text.
    Pattern(String),
    /// Literal prefix of the message text.
    Prefix(String),
    /// Exact command name of a parsed command.
    Command(String),
}

/// A matcher with its pattern compiled once at registration.
#[derive(Debug, Clone)]
pub(crate) enum Compiled {
    Any,
    Pattern(Regex),
    Prefix(String),
    Command(String),
}

impl Matcher {
    pub(crate) fn compile(&self) -> Result<Compiled, regex::Error> {
        Ok(match self {
            Self::Any => Compiled::Any,
            Self::Pattern(p) => Compiled::Pattern(Regex::new(p)?),
            Self::Prefix(p) => Compiled::Prefix(p.clone()),
            Self::Command(c) => Compiled::Command(c.clone()),
        })
    }
}

impl Compiled {
    pub(crate) fn matches(&self, event: &Event) -> bool {
        match self {
            Self::Any => true,
            Self::Pattern(re) => event.text().is_some_and(|t| re.is_match(t)),
            Self::Prefix(p) => event.text().is_some_and(|t| t.starts_with(p.as_str())),
            Self::Command(name) => matches!(event, Event::Command(c) if c.name == *name),
        }
    }
}
