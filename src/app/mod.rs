//! Application runtime composition modules.

pub(crate) mod commands;
pub(crate) mod progress;
pub(crate) mod runtime;
pub(crate) mod settings;
