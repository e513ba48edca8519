//! # Beacon Validator - Service Record Validation
//!
//! [`ServiceValidator::validate`] runs five checks on every record:
//!
//! 1. **Structure**: `id`, `name`, `type` present; `location` present for
//!    filesystem-backed sources; well-known metadata fields correctly typed
//! 2. **Type**: per-type required/recommended fields, the Docker
//!    ports-or-build-file rule, web host/port syntax
//! 3. **Configuration**: name charset, loose semver, location exists
//! 4. **Security**: sensitive metadata keys and values, all-interface bindings
//! 5. **Dependencies**: well-formed list, no self-dependency
//!
//! With `check_health` set, a probe chosen from the record is run as well.
//! Issues make a record invalid; warnings do so only in strict mode.
//! [`ServiceValidator::validate_all`] additionally flags dependency cycles.

#![deny(unsafe_code)]

pub mod checks;
pub mod config;
pub mod cycles;
pub mod error;
pub mod rules;
pub mod validator;

pub use checks::{Findings, SensitiveMatcher};
pub use config::ValidatorConfig;
pub use cycles::find_dependency_cycles;
pub use error::{ValidatorError, ValidatorResult};
pub use validator::ServiceValidator;
