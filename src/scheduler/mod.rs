pub mod trigger;

pub use trigger::{TriggerClient, TriggerOptions};
