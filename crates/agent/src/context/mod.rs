//! Context assembly for the system preamble.
//!
//! | Section | Source | Limit |
//! |---------|--------|-------|
//! | Project files | Host-supplied `{path, content}` | N files, char cap each |
//! | Relevant code | Ranked retrieval hits | M snippets, char cap each |
//! | Symbol index | Index summary (fallback) | K names per kind |

pub mod assembler;

pub use assembler::{
    AssembledContext, AssemblyInput, AssemblyMetadata, ContextAssembler, ContextCaps,
    DEFAULT_SYSTEM_PROMPT, ProjectFile, RetrievedSnippet, SupplementSection, SymbolKindSummary,
    SymbolSummary,
};
