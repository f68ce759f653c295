//! Cross-crate integration tests for murmur; see `tests/`.
