//! Preamble assembly from project context.
//!
//! Builds the system-role text for a turn from three sources, in order:
//!
//! 1. **Project files**: the first N files, each cut to a character cap
//! 2. **Retrieved snippets**: ranked search hits, each cut to its own cap
//! 3. **Symbol index**: counts and a few names per kind, used only when no
//!    snippets were retrieved
//!
//! # Determinism
//!
//! Assembly is a pure function of its inputs and caps: identical inputs
//! produce byte-identical text. Nothing here reads the clock, the file
//! system or the network.

use kiln_config::{CallClass, ContextConfig};
use serde::{Deserialize, Serialize};

/// Instructions that open every preamble.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are Kiln, a coding assistant embedded in the \
user's editor. Answer concisely and use the project context below. To create a file call \
`create_file`; to change an existing file call `edit_file` with its full new content.";

/// Marker appended to content cut at its cap.
pub const TRUNCATION_MARKER: &str = "...";

// ── Inputs ────────────────────────────────────────────────────────────────

/// A project file supplied by the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectFile {
    /// Path relative to the project root.
    pub path: String,
    pub content: String,
}

impl ProjectFile {
    pub fn new(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
        }
    }
}

/// Symbols of one kind found by the code index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolKindSummary {
    /// e.g. "function", "struct", "class"
    pub kind: String,
    pub count: usize,
    /// Representative names, most relevant first.
    pub names: Vec<String>,
}

/// Summary of the project's symbol index.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SymbolSummary {
    pub kinds: Vec<SymbolKindSummary>,
}

impl SymbolSummary {
    pub fn is_empty(&self) -> bool {
        self.kinds.iter().all(|k| k.count == 0 && k.names.is_empty())
    }
}

/// A ranked retrieval hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedSnippet {
    pub path: String,
    pub content: String,
    /// Relevance score, higher is better.
    pub score: f32,
}

/// Size limits for one assembly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextCaps {
    pub max_files: usize,
    pub file_char_cap: usize,
    pub max_snippets: usize,
    pub snippet_char_cap: usize,
    pub symbol_names_per_kind: usize,
}

impl ContextCaps {
    /// Caps for a call class, taken from configuration.
    pub fn for_class(config: &ContextConfig, class: CallClass) -> Self {
        Self {
            max_files: config.max_files(class),
            file_char_cap: config.file_char_cap,
            max_snippets: config.max_snippets,
            snippet_char_cap: config.snippet_char_cap,
            symbol_names_per_kind: config.symbol_names_per_kind,
        }
    }
}

impl Default for ContextCaps {
    fn default() -> Self {
        Self::for_class(&ContextConfig::default(), CallClass::Chat)
    }
}

/// Everything one assembly reads.
#[derive(Debug, Clone, Copy, Default)]
pub struct AssemblyInput<'a> {
    /// Project files, in the host's preferred order.
    pub files: &'a [ProjectFile],
    /// Symbol index summary, if the index is available.
    pub symbols: Option<&'a SymbolSummary>,
    /// Retrieval results, ranked by the retrieval service.
    pub snippets: &'a [RetrievedSnippet],
}

// ── Output ────────────────────────────────────────────────────────────────

/// Which section follows the project files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SupplementSection {
    Snippets,
    SymbolSummary,
    None,
}

/// What went into the preamble.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssemblyMetadata {
    pub files_included: usize,
    pub files_total: usize,
    pub files_truncated: usize,
    pub snippets_included: usize,
    pub snippets_total: usize,
    pub snippets_truncated: usize,
    pub supplement: SupplementSection,
    /// Length of the preamble in characters.
    pub chars: usize,
}

/// The assembled preamble plus metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct AssembledContext {
    pub preamble: String,
    pub metadata: AssemblyMetadata,
}

// ── Assembler ─────────────────────────────────────────────────────────────

/// The context assembler. Stateless; create one and reuse it.
#[derive(Debug, Clone)]
pub struct ContextAssembler {
    caps: ContextCaps,
    system_prompt: String,
}

impl ContextAssembler {
    pub fn new(caps: ContextCaps) -> Self {
        Self {
            caps,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }

    /// Replace the instructions at the top of the preamble.
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn caps(&self) -> &ContextCaps {
        &self.caps
    }

    /// Assemble the preamble.
    pub fn assemble(&self, input: &AssemblyInput<'_>) -> AssembledContext {
        let mut sections: Vec<String> = vec![self.system_prompt.clone()];

        // ── Project files ──────────────────────────────────────────────────
        let (files_section, files_included, files_truncated) = self.render_files(input.files);
        if let Some(section) = files_section {
            sections.push(section);
        }

        // ── Snippets, or the symbol summary when there are none ────────────
        let (snippet_section, snippets_included, snippets_truncated) =
            self.render_snippets(input.snippets);

        let supplement = if let Some(section) = snippet_section {
            sections.push(section);
            SupplementSection::Snippets
        } else if let Some(section) = input.symbols.and_then(|s| self.render_symbols(s)) {
            sections.push(section);
            SupplementSection::SymbolSummary
        } else {
            SupplementSection::None
        };

        let preamble = sections.join("\n\n");
        let chars = preamble.chars().count();

        AssembledContext {
            preamble,
            metadata: AssemblyMetadata {
                files_included,
                files_total: input.files.len(),
                files_truncated,
                snippets_included,
                snippets_total: input.snippets.len(),
                snippets_truncated,
                supplement,
                chars,
            },
        }
    }

    fn render_files(&self, files: &[ProjectFile]) -> (Option<String>, usize, usize) {
        if files.is_empty() || self.caps.max_files == 0 {
            return (None, 0, 0);
        }

        let mut section = String::from("[Project Files]\n");
        let mut included = 0;
        let mut truncated = 0;

        for file in files.iter().take(self.caps.max_files) {
            let (content, cut) = truncate_chars(&file.content, self.caps.file_char_cap);
            if cut {
                truncated += 1;
            }
            section.push_str(&format!("--- {} ---\n{}\n", file.path, content));
            included += 1;
        }

        (Some(section.trim_end().to_string()), included, truncated)
    }

    fn render_snippets(&self, snippets: &[RetrievedSnippet]) -> (Option<String>, usize, usize) {
        if snippets.is_empty() || self.caps.max_snippets == 0 {
            return (None, 0, 0);
        }

        // Stable: equal scores keep the retrieval service's order
        let mut ranked: Vec<&RetrievedSnippet> = snippets.iter().collect();
        ranked.sort_by(|a, b| b.score.total_cmp(&a.score));

        let mut section = String::from("[Relevant Code]\n");
        let mut included = 0;
        let mut truncated = 0;

        for snippet in ranked.into_iter().take(self.caps.max_snippets) {
            let (content, cut) = truncate_chars(&snippet.content, self.caps.snippet_char_cap);
            if cut {
                truncated += 1;
            }
            section.push_str(&format!(
                "--- {} (score {:.2}) ---\n{}\n",
                snippet.path, snippet.score, content
            ));
            included += 1;
        }

        (Some(section.trim_end().to_string()), included, truncated)
    }

    fn render_symbols(&self, summary: &SymbolSummary) -> Option<String> {
        if summary.is_empty() {
            return None;
        }

        let mut section = String::from("[Symbol Index]\n");
        for kind in &summary.kinds {
            let names: Vec<&str> = kind
                .names
                .iter()
                .take(self.caps.symbol_names_per_kind)
                .map(String::as_str)
                .collect();
            if names.is_empty() {
                section.push_str(&format!("{} ({})\n", kind.kind, kind.count));
            } else {
                section.push_str(&format!("{} ({}): {}\n", kind.kind, kind.count, names.join(", ")));
            }
        }

        Some(section.trim_end().to_string())
    }
}

/// Keep at most `cap` characters, appending the marker when content was cut.
fn truncate_chars(content: &str, cap: usize) -> (String, bool) {
    match content.char_indices().nth(cap) {
        Some((byte_end, _)) => (format!("{}{}", &content[..byte_end], TRUNCATION_MARKER), true),
        None => (content.to_string(), false),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn caps() -> ContextCaps {
        ContextCaps {
            max_files: 2,
            file_char_cap: 10,
            max_snippets: 2,
            snippet_char_cap: 8,
            symbol_names_per_kind: 2,
        }
    }

    fn files() -> Vec<ProjectFile> {
        vec![
            ProjectFile::new("src/main.rs", "fn main() {}"),
            ProjectFile::new("Cargo.toml", "[package]"),
            ProjectFile::new("README.md", "never shown"),
        ]
    }

    fn symbols() -> SymbolSummary {
        SymbolSummary {
            kinds: vec![
                SymbolKindSummary {
                    kind: "function".into(),
                    count: 14,
                    names: vec!["main".into(), "parse".into(), "render".into()],
                },
                SymbolKindSummary {
                    kind: "struct".into(),
                    count: 3,
                    names: vec![],
                },
            ],
        }
    }

    fn snippets() -> Vec<RetrievedSnippet> {
        vec![
            RetrievedSnippet {
                path: "src/b.rs".into(),
                content: "short".into(),
                score: 0.4,
            },
            RetrievedSnippet {
                path: "src/a.rs".into(),
                content: "pub fn long_function_name() {}".into(),
                score: 0.9,
            },
            RetrievedSnippet {
                path: "src/c.rs".into(),
                content: "dropped".into(),
                score: 0.1,
            },
        ]
    }

    #[test]
    fn system_prompt_always_first() {
        let assembled = ContextAssembler::new(caps()).assemble(&AssemblyInput::default());
        assert_eq!(assembled.preamble, DEFAULT_SYSTEM_PROMPT);
        assert_eq!(assembled.metadata.supplement, SupplementSection::None);
    }

    #[test]
    fn files_capped_and_truncated() {
        let files = files();
        let assembled = ContextAssembler::new(caps()).assemble(&AssemblyInput {
            files: &files,
            ..Default::default()
        });

        assert!(assembled.preamble.contains("--- src/main.rs ---\nfn main() ...\n"));
        assert!(assembled.preamble.contains("--- Cargo.toml ---\n[package]"));
        assert!(!assembled.preamble.contains("README.md"));
        assert_eq!(assembled.metadata.files_included, 2);
        assert_eq!(assembled.metadata.files_total, 3);
        assert_eq!(assembled.metadata.files_truncated, 1);
    }

    #[test]
    fn snippets_replace_symbol_summary() {
        let files = files();
        let summary = symbols();
        let snippets = snippets();
        let assembled = ContextAssembler::new(caps()).assemble(&AssemblyInput {
            files: &files,
            symbols: Some(&summary),
            snippets: &snippets,
        });

        assert_eq!(assembled.metadata.supplement, SupplementSection::Snippets);
        assert!(!assembled.preamble.contains("[Symbol Index]"));

        // Highest score first, capped at two, each cut to its own cap
        let a = assembled.preamble.find("src/a.rs (score 0.90)").unwrap();
        let b = assembled.preamble.find("src/b.rs (score 0.40)").unwrap();
        assert!(a < b);
        assert!(assembled.preamble.contains("pub fn l..."));
        assert!(!assembled.preamble.contains("src/c.rs"));
        assert_eq!(assembled.metadata.snippets_included, 2);
        assert_eq!(assembled.metadata.snippets_truncated, 1);
    }

    #[test]
    fn symbol_summary_is_the_fallback() {
        let summary = symbols();
        let assembled = ContextAssembler::new(caps()).assemble(&AssemblyInput {
            symbols: Some(&summary),
            ..Default::default()
        });

        assert_eq!(assembled.metadata.supplement, SupplementSection::SymbolSummary);
        assert!(assembled.preamble.contains("function (14): main, parse\n"));
        assert!(assembled.preamble.ends_with("struct (3)"));
        assert!(!assembled.preamble.contains("render"));
    }

    #[test]
    fn section_order_is_files_then_supplement() {
        let files = files();
        let snippets = snippets();
        let assembled = ContextAssembler::new(caps()).assemble(&AssemblyInput {
            files: &files,
            symbols: None,
            snippets: &snippets,
        });
        let files_at = assembled.preamble.find("[Project Files]").unwrap();
        let code_at = assembled.preamble.find("[Relevant Code]").unwrap();
        assert!(files_at < code_at);
    }

    #[test]
    fn deterministic_assembly() {
        let files = files();
        let summary = symbols();
        let snippets = snippets();
        let input = AssemblyInput {
            files: &files,
            symbols: Some(&summary),
            snippets: &snippets,
        };

        let assembler = ContextAssembler::new(caps());
        let first = assembler.assemble(&input);
        for _ in 0..5 {
            let again = ContextAssembler::new(caps()).assemble(&input);
            assert_eq!(again.preamble.as_bytes(), first.preamble.as_bytes());
            assert_eq!(again.metadata, first.metadata);
        }
    }

    #[test]
    fn truncation_counts_characters_not_bytes() {
        let (cut, truncated) = truncate_chars("héllo wörld", 4);
        assert_eq!(cut, "héll...");
        assert!(truncated);

        let (whole, truncated) = truncate_chars("abc", 3);
        assert_eq!(whole, "abc");
        assert!(!truncated);
    }

    #[test]
    fn caps_follow_call_class() {
        let config = ContextConfig::default();
        assert_eq!(ContextCaps::for_class(&config, CallClass::Chat).max_files, 5);
        assert_eq!(ContextCaps::for_class(&config, CallClass::Generation).max_files, 10);
    }

    #[test]
    fn custom_system_prompt() {
        let assembled = ContextAssembler::new(caps())
            .with_system_prompt("Review only.")
            .assemble(&AssemblyInput::default());
        assert_eq!(assembled.preamble, "Review only.");
    }
}
