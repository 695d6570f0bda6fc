use thiserror::Error;

use crate::scoring::BallotError;

/// Reasons a lifecycle operation on a voting session can be turned down.
///
/// Everything except [`SessionError::Database`] is an expected outcome of user input and maps to a
/// page the visitor should be sent to instead.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session, game or player not found")]
    NotFound,
    #[error("voting for this session is closed")]
    AlreadyClosed,
    #[error("this player has already voted in this session")]
    DuplicateVote,
    #[error("this player is not a participant of this session")]
    NotAParticipant,
    #[error("invalid ballot: {0}")]
    InvalidBallot(#[from] BallotError),
    #[error("a session needs at least one participant")]
    NoParticipants,
    #[error(transparent)]
    Database(#[from] diesel::result::Error),
}

impl SessionError {
    /// Query-string code understood by the voting page, for errors that send the voter back to it.
    pub fn code(&self) -> Option<&'static str> {
        match self {
            SessionError::DuplicateVote => Some("already_voted"),
            SessionError::NotAParticipant => Some("not_participant"),
            SessionError::InvalidBallot(_) => Some("invalid_ballot"),
            _ => None,
        }
    }

    /// Where a visitor acting on `session_id` goes after this error, or `None` for faults.
    pub fn redirect_path(&self, session_id: i32) -> Option<String> {
        match self {
            SessionError::NotFound | SessionError::NoParticipants => Some("/".to_string()),
            SessionError::AlreadyClosed => Some("/stats".to_string()),
            SessionError::DuplicateVote
            | SessionError::NotAParticipant
            | SessionError::InvalidBallot(_) => self
                .code()
                .map(|code| format!("/vote/{}?error={}", session_id, code)),
            SessionError::Database(_) => None,
        }
    }
}

/// Turns `Error::NotFound` from a `.first()` lookup into the domain error.
pub(crate) fn not_found_to_domain(err: diesel::result::Error) -> SessionError {
    match err {
        diesel::result::Error::NotFound => SessionError::NotFound,
        other => SessionError::Database(other),
    }
}
