use uuid::Uuid;

pub trait IdGenerator: Send + Sync {
    fn next_id(&self) -> String;
}

/// Random v4 UUIDs, rendered as 36-char lowercase hyphenated hex.
///
/// Ids double as bearer tokens for respond/cancel, so they come from the
/// uuid crate's CSPRNG-backed generator.
#[derive(Debug, Default, Clone, Copy)]
pub struct UuidV4Ids;

impl IdGenerator for UuidV4Ids {
    fn next_id(&self) -> String {
        Uuid::new_v4().hyphenated().to_string()
    }
}
