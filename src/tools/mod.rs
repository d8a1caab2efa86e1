//! Tools available to the assistant
//!
//! Only web search is exposed; it feeds the context assembler.

mod search;

pub use search::{SearchProvider, SearchResult, SearchService, WebSearchTool};
