use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    /// The introspection endpoint answered, but the token is not usable:
    /// inactive, expired, or not bound to a user.
    #[error("token rejected")]
    Rejected,

    /// The introspection endpoint could not be reached.
    #[error("introspection transport error: {0}")]
    Transport(String),

    /// The introspection endpoint answered with something unusable.
    #[error("invalid introspection response: {0}")]
    InvalidResponse(String),
}
