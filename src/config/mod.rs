//! Gateway Configuration Module
//!
//! ## Loading Order
//!
//! 1. Explicit path (`--config`) or the `OPENDOOR_CONFIG` environment variable
//! 2. `opendoor.toml` in the current working directory
//! 3. Built-in defaults (see [`defaults`])
//!
//! Environment overrides (`PORT`, `SUPABASE_URL`, `MQTT_BROKER_URL`, ...) are
//! applied on top of whichever file was used, then the result is validated.
//!
//! The config is passed by value into the components that need it; there is
//! no process-global instance.

mod gateway_config;
pub mod defaults;

pub use gateway_config::*;
