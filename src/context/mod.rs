//! Context assembly for model requests
//!
//! Combines:
//! - The fixed system instruction
//! - The last K turns of session history
//! - An optional single web-search snippet for trigger-word questions

mod assembler;

pub use assembler::{AssembledContext, ContextAssembler};
