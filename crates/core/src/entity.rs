//! Entity trait: identity + continuity across state changes.

/// Entity marker + minimal interface.
///
/// Storage backends key their tables by `Entity::Id`, so every persisted record
/// (master data, documents, users, roles) implements this.
pub trait Entity {
    /// Strongly-typed entity identifier.
    type Id: Copy + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the entity identifier.
    fn id(&self) -> &Self::Id;
}
