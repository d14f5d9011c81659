use crate::{AgentError, History};
use regex::{Regex, RegexBuilder};

/// Decides whether a run reached its goal.
pub trait SuccessProbe: Send + Sync {
    fn check(&self, history: &History) -> bool;
}

impl<F> SuccessProbe for F
where
    F: Fn(&History) -> bool + Send + Sync,
{
    fn check(&self, history: &History) -> bool {
        self(history)
    }
}

/// Looks for a pattern in the latest assistant message.
#[derive(Clone, Debug)]
pub struct FlagPatternProbe {
    pattern: Regex,
}

impl FlagPatternProbe {
    pub fn new(pattern: &str) -> Result<Self, AgentError> {
        let pattern = Regex::new(pattern).map_err(|error| {
            AgentError::invalid_configuration(format!("invalid success pattern: {error}"))
        })?;
        Ok(Self { pattern })
    }

    /// Matches `flag{...}` and `ctf{...}` tokens, any case.
    pub fn ctf_default() -> Result<Self, AgentError> {
        let pattern = RegexBuilder::new(r"\b(?:flag|ctf)\{[^}\s]+\}")
            .case_insensitive(true)
            .build()
            .map_err(|error| {
                AgentError::invalid_configuration(format!("invalid success pattern: {error}"))
            })?;
        Ok(Self { pattern })
    }

    pub fn find<'a>(&self, text: &'a str) -> Option<&'a str> {
        self.pattern.find(text).map(|found| found.as_str())
    }
}

impl SuccessProbe for FlagPatternProbe {
    fn check(&self, history: &History) -> bool {
        history
            .last_assistant()
            .is_some_and(|message| self.pattern.is_match(message.text()))
    }
}
