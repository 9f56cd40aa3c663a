//! Shared test crate for the workspace. The tests live under `tests/`.
