//! Thin wrapper around a tree-sitter parser bound to one grammar.

use crate::error::{IndexerError, Result};
use crate::languages::LanguageGrammar;

pub struct SourceParser {
    parser: tree_sitter::Parser,
}

impl SourceParser {
    pub fn new(grammar: &dyn LanguageGrammar) -> Result<Self> {
        let mut parser = tree_sitter::Parser::new();
        parser
            .set_language(&grammar.language())
            .map_err(|e| IndexerError::Parse(e.to_string()))?;
        Ok(Self { parser })
    }

    pub fn parse(&mut self, source: &str) -> Result<tree_sitter::Tree> {
        self.parser
            .parse(source, None)
            .ok_or_else(|| IndexerError::Parse("parser produced no tree".to_string()))
    }
}
