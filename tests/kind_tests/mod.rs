//! Integration tests for helmenv
//!
//! Tests are organized by the story they tell:
//!
//! - `environment_lifecycle`: an environment is created, its chart deployed,
//!   its pods labeled and reached through forwarded ports, then torn down
//! - `persistence`: a persistent environment is reloaded by a second run that
//!   still controls the forwarder processes of the first
//!
//! # Running These Tests
//!
//! ```bash
//! cargo test --test kind -- --ignored --nocapture
//! ```

mod environment_lifecycle;
mod helpers;
mod persistence;
