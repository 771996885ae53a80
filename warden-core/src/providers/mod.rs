//! Production `ThreatBrain` implementations.
//!
//! Currently a single backend: a local Ollama server. The trait seam keeps
//! the pipeline testable without one.

pub mod ollama;

pub use ollama::OllamaBrain;
