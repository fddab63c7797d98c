//! Language support: tree-sitter grammars plus per-language extraction.

pub mod php;
pub mod python;

use std::collections::HashMap;

use crate::error::{IndexerError, Result};
use crate::metrics::LanguageRules;
use crate::store::{EntityKind, RawReference, Visibility};

/// A declaration pulled out of a parsed source file, together with the raw
/// references found inside it. Not yet persisted, not yet resolved.
#[derive(Debug, Clone)]
pub struct ExtractedEntity {
    pub kind: EntityKind,
    pub name: String,
    pub full_qualified_name: String,
    pub start_line: u32,
    pub end_line: u32,
    pub visibility: Visibility,
    pub code: String,
    pub references: Vec<RawReference>,
}

pub trait LanguageGrammar: Send + Sync {
    fn name(&self) -> &'static str;
    fn file_extensions(&self) -> &[&'static str];
    fn language(&self) -> tree_sitter::Language;
    fn rules(&self) -> &'static dyn LanguageRules;
    /// Walks a parsed tree and returns every declaration in source order.
    fn extract(&self, tree: &tree_sitter::Tree, source: &str) -> Vec<ExtractedEntity>;
}

pub struct LanguageRegistry {
    languages: HashMap<&'static str, Box<dyn LanguageGrammar>>,
    extension_map: HashMap<&'static str, &'static str>,
}

impl LanguageRegistry {
    pub fn new() -> Self {
        let mut registry = Self {
            languages: HashMap::new(),
            extension_map: HashMap::new(),
        };
        registry.register(Box::new(php::PhpGrammar));
        registry.register(Box::new(python::PythonGrammar));
        registry
    }

    fn register(&mut self, grammar: Box<dyn LanguageGrammar>) {
        let name = grammar.name();
        for ext in grammar.file_extensions() {
            self.extension_map.insert(ext, name);
        }
        self.languages.insert(name, grammar);
    }

    pub fn get(&self, name: &str) -> Result<&dyn LanguageGrammar> {
        self.languages
            .get(name)
            .map(|g| g.as_ref())
            .ok_or_else(|| IndexerError::UnsupportedLanguage(name.to_string()))
    }

    pub fn for_extension(&self, ext: &str) -> Option<&dyn LanguageGrammar> {
        self.extension_map
            .get(ext)
            .and_then(|name| self.languages.get(name))
            .map(|g| g.as_ref())
    }

    pub fn supported(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.languages.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

impl Default for LanguageRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Text of a node, empty if the range is somehow invalid.
pub(crate) fn node_text(node: tree_sitter::Node<'_>, source: &str) -> String {
    node.utf8_text(source.as_bytes())
        .unwrap_or_default()
        .to_string()
}

pub(crate) fn line_of(node: tree_sitter::Node<'_>) -> u32 {
    node.start_position().row as u32 + 1
}

pub(crate) fn end_line_of(node: tree_sitter::Node<'_>) -> u32 {
    node.end_position().row as u32 + 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_knows_both_languages() {
        let registry = LanguageRegistry::new();
        assert_eq!(registry.supported(), vec!["php", "python"]);
        assert!(registry.get("php").is_ok());
        assert!(registry.get("ruby").is_err());
    }

    #[test]
    fn test_extension_lookup() {
        let registry = LanguageRegistry::new();
        assert_eq!(registry.for_extension("php").unwrap().name(), "php");
        assert_eq!(registry.for_extension("py").unwrap().name(), "python");
        assert!(registry.for_extension("rb").is_none());
    }
}
