// Model resolution, prompt caching and fault recovery around the Gemini
// transcription backend.

pub mod cache;
pub mod catalog;
pub mod client;
pub mod faults;
pub mod retry;
pub mod transcriber;
