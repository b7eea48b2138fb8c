use std::error::Error as StdError;
use std::fmt::{self, Display};

use toolrelay_model::ModelProviderError;

/// The error type for a failed conversation turn.
#[derive(Debug)]
pub enum Error {
    /// The model provider failed to serve a request.
    Model(Box<dyn ModelProviderError>),
    /// The model kept calling tools for the given number of rounds
    /// without giving an answer.
    ToolRoundLimitReached(u32),
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Model(err) => write!(f, "model request failed: {err}"),
            Error::ToolRoundLimitReached(rounds) => {
                write!(f, "no answer after {rounds} rounds of tool calls")
            }
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Error::Model(err) => Some(err.as_ref()),
            Error::ToolRoundLimitReached(_) => None,
        }
    }
}

impl From<Box<dyn ModelProviderError>> for Error {
    #[inline]
    fn from(err: Box<dyn ModelProviderError>) -> Self {
        Error::Model(err)
    }
}
