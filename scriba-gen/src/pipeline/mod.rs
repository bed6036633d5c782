//! Alignment and incremental generation pipeline
//!
//! Stages, leaves first:
//! - `normalizer`: adapter records → evidence items
//! - `aligner`: per-source evidence → one ordered timeline
//! - `style_extractor`: prior document → style profile
//! - `chunk_planner`: timeline → bounded generation units
//! - `orchestrator`: units → document, one model request per unit
//! - `session_cache`, `editor`, `tutor`: post-build access to the results

pub mod aligner;
pub mod chunk_planner;
pub mod editor;
pub mod normalizer;
pub mod orchestrator;
pub mod prompts;
pub mod session_cache;
pub mod style_extractor;
pub mod tutor;
pub mod types;
pub mod validator;
