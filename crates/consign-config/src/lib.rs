//! Carrier configuration for consign.
//!
//! Configuration storage is external; adapters only see a key-value lookup
//! ([`ConfigSource`]) plus a decrypt-on-read hook for secrets
//! ([`SecretDecryptor`]). [`CarrierSettings`] puts both together for one
//! carrier and applies the fixed key resolution order:
//!
//! 1. `carriers.<code>.<environment>.<field>`
//! 2. `carriers.<code>.<field>`
//! 3. legacy `<CODE>_<FIELD>`, with a `_TEST` suffix in sandbox
//!
//! The environment itself is read from `carriers.<code>.environment`, then
//! `<CODE>_ENVIRONMENT`, and defaults to sandbox.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use consign_config::{CarrierSettings, Environment, MapSource, PlainSecrets};
//!
//! let source = MapSource::new()
//!     .with("carriers.gls.environment", "production")
//!     .with("GLS_URL", "https://gls.example/ws");
//! let settings = CarrierSettings::new("gls", Arc::new(source), Arc::new(PlainSecrets));
//!
//! let view = settings.view().unwrap();
//! assert_eq!(view.environment(), Environment::Production);
//! assert_eq!(view.require("url").unwrap(), "https://gls.example/ws");
//! ```

mod carrier;
mod secrets;
mod source;

pub use carrier::{CarrierSettings, Environment, SettingsError, SettingsView};
pub use secrets::{PassphraseDecryptor, PlainSecrets, SecretDecryptor};
pub use source::{ConfigSource, EnvSource, Layered, MapSource, TomlSource};
