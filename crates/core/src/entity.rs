//! Entity trait: identity + soft retirement.

/// Entity marker + minimal interface.
pub trait Entity {
    /// Strongly-typed entity identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the entity identifier.
    fn id(&self) -> &Self::Id;
}

/// Rows that are soft-retired instead of deleted.
///
/// Retired rows stay in storage for audit but every lookup treats them as absent.
pub trait Retirable {
    fn is_retired(&self) -> bool;
}

/// Keep only the rows that have not been retired.
pub fn active<T, I>(rows: I) -> impl Iterator<Item = T>
where
    T: Retirable,
    I: IntoIterator<Item = T>,
{
    rows.into_iter().filter(|r| !r.is_retired())
}
