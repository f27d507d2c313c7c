//! Authentication values exchanged with backends.

use std::collections::HashMap;

use crate::error::HandlerError;
use crate::metadata::AuthenticatedMetadata;

/// Outcome of one authentication attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthResponse {
    /// The credentials were accepted.
    Success,
    /// The credentials were rejected.
    Failure,
    /// The backend could not decide, for example because an upstream
    /// service is down.
    Unavailable,
}

impl AuthResponse {
    /// Lowercase name used in logs.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Unavailable => "unavailable",
        }
    }
}

/// Result returned by the authentication hooks.
#[derive(Debug)]
pub struct AuthResult {
    /// The decision.
    pub response: AuthResponse,
    /// Metadata to carry forward into the connection.
    pub metadata: AuthenticatedMetadata,
    /// Why the attempt failed, for the log.
    pub reason: Option<HandlerError>,
}

impl AuthResult {
    /// An accepted attempt.
    #[must_use]
    pub const fn success(metadata: AuthenticatedMetadata) -> Self {
        Self {
            response: AuthResponse::Success,
            metadata,
            reason: None,
        }
    }

    /// A rejected attempt.
    #[must_use]
    pub const fn failure(metadata: AuthenticatedMetadata) -> Self {
        Self {
            response: AuthResponse::Failure,
            metadata,
            reason: None,
        }
    }

    /// An attempt the backend could not decide.
    #[must_use]
    pub const fn unavailable(metadata: AuthenticatedMetadata) -> Self {
        Self {
            response: AuthResponse::Unavailable,
            metadata,
            reason: None,
        }
    }

    /// Attach a reason.
    #[must_use]
    pub fn with_reason(mut self, reason: impl Into<HandlerError>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

/// A client public key in OpenSSH `authorized_keys` format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKey {
    authorized_key: String,
}

impl PublicKey {
    /// Wrap a key line such as `ssh-ed25519 AAAAC3Nza...`.
    pub fn new(authorized_key: impl Into<String>) -> Self {
        Self {
            authorized_key: authorized_key.into(),
        }
    }

    /// The key in `authorized_keys` format.
    #[must_use]
    pub fn authorized_key(&self) -> &str {
        &self.authorized_key
    }

    /// The key algorithm, e.g. `ssh-ed25519`.
    #[must_use]
    pub fn algorithm(&self) -> &str {
        self.authorized_key
            .split_whitespace()
            .next()
            .unwrap_or_default()
    }

    /// Whether this key appears in an `authorized_keys` document. Options
    /// and comments are ignored.
    #[must_use]
    pub fn is_listed_in(&self, authorized_keys: &str) -> bool {
        let mut ours = self.authorized_key.split_whitespace();
        let (Some(algorithm), Some(blob)) = (ours.next(), ours.next()) else {
            return false;
        };
        authorized_keys.lines().any(|line| {
            let mut fields = line.split_whitespace().skip_while(|f| *f != algorithm);
            fields.next().is_some() && fields.next() == Some(blob)
        })
    }
}

/// One keyboard-interactive prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyboardInteractiveQuestion {
    /// Identifier the answer is keyed by. Empty to key by the question text.
    pub id: String,
    /// Prompt shown to the user.
    pub question: String,
    /// Whether the user's typing should be echoed.
    pub echo_response: bool,
}

impl KeyboardInteractiveQuestion {
    /// A hidden-input question keyed by its text.
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            question: question.into(),
            echo_response: false,
        }
    }

    /// Key the answer by `id` instead of the question text.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Echo the user's typing.
    #[must_use]
    pub const fn echo(mut self, echo: bool) -> Self {
        self.echo_response = echo;
        self
    }

    fn key(&self) -> &str {
        if self.id.is_empty() { &self.question } else { &self.id }
    }
}

/// Answers to the previous keyboard-interactive challenge.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyboardInteractiveAnswers {
    answers: HashMap<String, String>,
}

impl KeyboardInteractiveAnswers {
    /// Pair client responses with the questions they answer, in order.
    /// Extra responses are dropped; unanswered questions stay absent.
    #[must_use]
    pub fn new(
        questions: &[KeyboardInteractiveQuestion],
        responses: impl IntoIterator<Item = String>,
    ) -> Self {
        let answers = questions
            .iter()
            .zip(responses)
            .map(|(question, answer)| (question.key().to_string(), answer))
            .collect();
        Self { answers }
    }

    /// The answer to `question`.
    #[must_use]
    pub fn get(&self, question: &KeyboardInteractiveQuestion) -> Option<&str> {
        self.get_by_key(question.key())
    }

    /// The answer stored under a question id, or question text for questions
    /// without an id.
    #[must_use]
    pub fn get_by_key(&self, key: &str) -> Option<&str> {
        self.answers.get(key).map(String::as_str)
    }

    /// Number of answers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.answers.len()
    }

    /// Whether there are no answers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.answers.is_empty()
    }
}

/// What a keyboard-interactive hook wants to happen next.
#[derive(Debug)]
pub enum KeyboardInteractiveStep {
    /// Ask the client these questions, then call the hook again with the
    /// answers.
    Challenge {
        /// Instruction text shown above the prompts.
        instruction: String,
        /// The prompts.
        questions: Vec<KeyboardInteractiveQuestion>,
    },
    /// Authentication is decided.
    Done(AuthResult),
}
