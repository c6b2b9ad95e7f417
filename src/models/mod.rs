//! Domain model module declarations.

pub mod launch;
pub mod state;
