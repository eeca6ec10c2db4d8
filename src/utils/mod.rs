//! Process bootstrap helpers.

pub mod bootstrap;
pub mod retry;
