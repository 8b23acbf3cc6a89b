pub mod audio;
pub mod backend;
pub mod command;
pub mod controller;
pub mod error;
pub mod intent;
pub mod runtime;
pub mod settings;
pub mod store;
pub mod web;

#[cfg(test)]
mod testing;

pub use command::ConsoleCommand;
pub use runtime::{AudioRuntime, CommandOutcome, Console};
pub use settings::ConsoleConfig;
pub use store::{ConsoleState, PlayerState, Source, Store};
