//! Shared request/response models, configuration and the collaborator traits
//! the crawler core is embedded between.

pub mod interface;
pub mod model;
