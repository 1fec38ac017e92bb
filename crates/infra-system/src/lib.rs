// Scribe Infrastructure - System Adapters
// Implements: Transcriber

pub mod subprocess_transcriber;

pub use subprocess_transcriber::{SubprocessTranscriber, TranscriberConfig};
