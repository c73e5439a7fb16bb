//! Parties master data (manufacturers, distributors, pharmacies...).
//!
//! Pure domain logic: validation and state changes only, no IO.

pub mod party;

pub use party::{ContactInfo, NewParty, Party, PartyType, UpdateParty};
