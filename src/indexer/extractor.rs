//! Per-file extraction: parse, pull declarations, note partial parses.

use xxhash_rust::xxh3::xxh3_64;

use crate::error::Result;
use crate::languages::{ExtractedEntity, LanguageGrammar};

use super::parser::SourceParser;

/// Everything extraction learns about one file.
pub struct FileExtraction {
    pub content_hash: u64,
    pub entities: Vec<ExtractedEntity>,
    /// Set when the parse tree contains error nodes. Extraction still ran,
    /// declarations outside the broken region are kept.
    pub parse_warning: Option<String>,
}

pub struct EntityExtractor<'a> {
    grammar: &'a dyn LanguageGrammar,
    parser: SourceParser,
}

impl<'a> EntityExtractor<'a> {
    pub fn new(grammar: &'a dyn LanguageGrammar) -> Result<Self> {
        Ok(Self {
            grammar,
            parser: SourceParser::new(grammar)?,
        })
    }

    pub fn extract(&mut self, source: &str) -> Result<FileExtraction> {
        let tree = self.parser.parse(source)?;
        let parse_warning = if tree.root_node().has_error() {
            Some("syntax errors, extraction may be partial".to_string())
        } else {
            None
        };
        let entities = self.grammar.extract(&tree, source);
        Ok(FileExtraction {
            content_hash: xxh3_64(source.as_bytes()),
            entities,
            parse_warning,
        })
    }
}

pub fn content_hash(bytes: &[u8]) -> u64 {
    xxh3_64(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::languages::php::PhpGrammar;

    #[test]
    fn test_extraction_is_deterministic() {
        let mut extractor = EntityExtractor::new(&PhpGrammar).unwrap();
        let source = "<?php\nclass A { public function f() {} }\n";
        let first = extractor.extract(source).unwrap();
        let second = extractor.extract(source).unwrap();
        assert_eq!(first.content_hash, second.content_hash);
        assert_eq!(first.entities.len(), second.entities.len());
        assert!(first.parse_warning.is_none());
    }

    #[test]
    fn test_partial_parse_keeps_good_declarations() {
        let mut extractor = EntityExtractor::new(&PhpGrammar).unwrap();
        let source = "<?php\nfunction ok() {}\nclass Broken {{{\n";
        let extraction = extractor.extract(source).unwrap();
        assert!(extraction.parse_warning.is_some());
        assert!(extraction.entities.iter().any(|e| e.name == "ok"));
    }
}
