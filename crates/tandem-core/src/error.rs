use thiserror::Error;

/// Terminal pairing failures. Surfaced to the user verbatim, never retried.
#[derive(Debug, Error)]
pub enum PairingError {
    #[error("no such pairing code")]
    NotFound,

    #[error("a code cannot be redeemed by its issuer")]
    SelfPairing,

    #[error("pairing code already redeemed")]
    CodeConsumed,

    #[error("pairing code expired")]
    CodeExpired,

    #[error("account is already in an active couple")]
    AlreadyPaired,

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

/// Terminal timeline failures.
#[derive(Debug, Error)]
pub enum TimelineError {
    #[error("entry attachment is incomplete")]
    IncompleteAttachment,

    #[error("no such couple")]
    NoSuchCouple,

    #[error("account is not a member of this couple")]
    NotAMember,

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}
