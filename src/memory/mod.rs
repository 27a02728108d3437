// src/memory/mod.rs
// Layered user-memory store: a base record per memory plus one typed
// extension row (identity, experience, preference) or a many-to-many
// context row linking several base records.

pub mod base;
pub mod layers;
pub mod model;
pub mod search;
pub mod store;
pub mod types;

#[cfg(test)]
mod model_tests;

pub use store::UserMemoryStore;
pub use types::{
    ContextMemory, ExperienceMemory, IdentityMemory, IdentityType, MemoryLayer, MergeStrategy,
    Patch, PreferenceMemory, Relationship, SearchLimits, SearchOptions, SearchResults, UserMemory,
};
