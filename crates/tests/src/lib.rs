//! Cross-crate integration tests for soundpath.

#[cfg(test)]
mod routing_integration;
