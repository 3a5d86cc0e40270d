pub mod assembler;
pub mod charts;
pub mod config;
pub mod parser;
pub mod pipeline;
pub mod quality;
pub mod server;
pub mod storage;
pub mod utils;
pub mod writer;

pub use pipeline::{Artifact, Copilot, PublicationJob, PublicationReport};
pub use utils::{CopilotError, CopilotResult};
