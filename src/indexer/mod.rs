//! The indexing pipeline: walking, parsing, extraction, resolution and the
//! orchestrator that ties them to the store and the analysis gateway.

pub mod extractor;
pub mod orchestrator;
pub mod parser;
pub mod progress;
pub mod resolver;
pub mod walker;

pub use extractor::{EntityExtractor, FileExtraction};
pub use orchestrator::{IndexOutcome, Orchestrator, ANALYSIS_FAILED_MARKER};
pub use progress::{IndexingProgress, ProgressSnapshot};
pub use resolver::DependencyResolver;
pub use walker::FileWalker;
