//! scriba-gen: multimodal lecture alignment and incremental note generation
//!
//! Merges transcript segments, keyframes and document chunks into one
//! timeline, generates a LaTeX document unit by unit with a generative model,
//! and keeps every intermediate artifact in a session cache so the document
//! can be edited and questioned without reprocessing the inputs.

pub mod error;
pub mod events;
pub mod model;
pub mod pipeline;
pub mod session;

pub use crate::error::{PipelineError, PipelineResult};
pub use crate::events::{EventBus, PipelineEvent};
pub use crate::pipeline::types::{
    Document, DocumentChunk, DocumentType, EditTarget, Keyframe, RawSource, TranscriptSegment,
};
pub use crate::session::Session;
