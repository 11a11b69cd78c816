//! Integration test support for the Keel engine. See `tests/` for the suites.

pub mod helpers;
