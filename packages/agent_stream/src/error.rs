use thiserror::Error;

/// Why an inbound payload could not be turned into an [`Envelope`](crate::Envelope).
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Binary payload that is not valid UTF-8.
    #[error("payload is not valid UTF-8")]
    NotUtf8,

    /// Not parseable as JSON, or the entity fields have the wrong shape.
    #[error("malformed payload: {0}")]
    Json(#[from] serde_json::Error),

    /// Valid JSON, but not an object.
    #[error("payload is not a JSON object")]
    NotAnObject,

    /// Object without an `entity` member.
    #[error("payload has no entity")]
    MissingEntity,

    /// Entity object without a `type` tag.
    #[error("entity has no type tag")]
    MissingTag,
}

pub type Result<T, E = DecodeError> = std::result::Result<T, E>;
