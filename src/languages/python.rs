//! Python extraction: classes, functions, methods and module constants.

use tree_sitter::Node;

use crate::metrics::{LanguageRules, PythonRules};
use crate::store::{EntityKind, RawReference, ReferenceKind, Visibility};

use super::{end_line_of, line_of, node_text, ExtractedEntity, LanguageGrammar};

pub struct PythonGrammar;

static RULES: PythonRules = PythonRules;

impl LanguageGrammar for PythonGrammar {
    fn name(&self) -> &'static str {
        "python"
    }

    fn file_extensions(&self) -> &[&'static str] {
        &["py"]
    }

    fn language(&self) -> tree_sitter::Language {
        tree_sitter_python::LANGUAGE.into()
    }

    fn rules(&self) -> &'static dyn LanguageRules {
        &RULES
    }

    fn extract(&self, tree: &tree_sitter::Tree, source: &str) -> Vec<ExtractedEntity> {
        let mut extractor = PythonExtractor {
            source,
            file_imports: Vec::new(),
            entities: Vec::new(),
        };
        extractor.scan_module(tree.root_node());
        extractor.entities
    }
}

struct PythonExtractor<'a> {
    source: &'a str,
    file_imports: Vec<RawReference>,
    entities: Vec<ExtractedEntity>,
}

impl<'a> PythonExtractor<'a> {
    fn scan_module(&mut self, root: Node<'_>) {
        let mut cursor = root.walk();
        let children: Vec<Node> = root.named_children(&mut cursor).collect();
        drop(cursor);
        for child in children {
            match child.kind() {
                "import_statement" | "import_from_statement" => self.collect_imports(child),
                "class_definition" => self.class_def(child, child),
                "function_definition" => self.function_def(child, child, None),
                "decorated_definition" => self.decorated(child, None),
                "expression_statement" => self.module_constant(child),
                _ => {}
            }
        }
    }

    fn decorated(&mut self, node: Node<'_>, class_name: Option<&str>) {
        let Some(inner) = node.child_by_field_name("definition") else {
            return;
        };
        match inner.kind() {
            "class_definition" => self.class_def(inner, node),
            "function_definition" => self.function_def(inner, node, class_name),
            _ => {}
        }
    }

    fn collect_imports(&mut self, node: Node<'_>) {
        let line = line_of(node);
        match node.kind() {
            "import_statement" => {
                let mut cursor = node.walk();
                for child in node.named_children(&mut cursor) {
                    let target = match child.kind() {
                        "dotted_name" => node_text(child, self.source),
                        "aliased_import" => child
                            .child_by_field_name("name")
                            .map(|n| node_text(n, self.source))
                            .unwrap_or_default(),
                        _ => continue,
                    };
                    if !target.is_empty() {
                        self.file_imports.push(RawReference {
                            kind: ReferenceKind::Import,
                            target,
                            line,
                        });
                    }
                }
            }
            "import_from_statement" => {
                let module = node
                    .child_by_field_name("module_name")
                    .map(|n| node_text(n, self.source))
                    .unwrap_or_default();
                let mut cursor = node.walk();
                let mut saw_name = false;
                for child in node.named_children(&mut cursor) {
                    if Some(child) == node.child_by_field_name("module_name") {
                        continue;
                    }
                    let imported = match child.kind() {
                        "dotted_name" => node_text(child, self.source),
                        "aliased_import" => child
                            .child_by_field_name("name")
                            .map(|n| node_text(n, self.source))
                            .unwrap_or_default(),
                        "wildcard_import" => "*".to_string(),
                        _ => continue,
                    };
                    if imported.is_empty() {
                        continue;
                    }
                    saw_name = true;
                    let target = if module.is_empty() || imported == "*" {
                        if imported == "*" {
                            module.clone()
                        } else {
                            imported
                        }
                    } else {
                        format!("{module}.{imported}")
                    };
                    if !target.is_empty() {
                        self.file_imports.push(RawReference {
                            kind: ReferenceKind::Import,
                            target,
                            line,
                        });
                    }
                }
                if !saw_name && !module.is_empty() {
                    self.file_imports.push(RawReference {
                        kind: ReferenceKind::Import,
                        target: module,
                        line,
                    });
                }
            }
            _ => {}
        }
    }

    /// `outer` differs from `node` when a decorator wraps the definition.
    fn class_def(&mut self, node: Node<'_>, outer: Node<'_>) {
        let Some(name_node) = node.child_by_field_name("name") else {
            return;
        };
        let name = node_text(name_node, self.source);

        let mut refs = self.file_imports.clone();
        if let Some(supers) = node.child_by_field_name("superclasses") {
            let mut cursor = supers.walk();
            for base in supers.named_children(&mut cursor) {
                if matches!(base.kind(), "identifier" | "attribute") {
                    refs.push(RawReference {
                        kind: ReferenceKind::Extends,
                        target: node_text(base, self.source),
                        line: line_of(base),
                    });
                }
            }
        }

        self.entities.push(ExtractedEntity {
            kind: EntityKind::Class,
            name: name.clone(),
            full_qualified_name: name.clone(),
            start_line: line_of(outer),
            end_line: end_line_of(outer),
            visibility: visibility_of(&name),
            code: node_text(outer, self.source),
            references: refs,
        });

        let Some(body) = node.child_by_field_name("body") else {
            return;
        };
        let mut cursor = body.walk();
        let children: Vec<Node> = body.named_children(&mut cursor).collect();
        drop(cursor);
        for child in children {
            match child.kind() {
                "function_definition" => self.function_def(child, child, Some(&name)),
                "decorated_definition" => self.decorated(child, Some(&name)),
                "expression_statement" => self.constant_in(child, Some(&name)),
                _ => {}
            }
        }
    }

    fn function_def(&mut self, node: Node<'_>, outer: Node<'_>, class_name: Option<&str>) {
        let Some(name_node) = node.child_by_field_name("name") else {
            return;
        };
        let name = node_text(name_node, self.source);
        let (kind, fqn) = match class_name {
            Some(class) => (EntityKind::Method, format!("{class}.{name}")),
            None => (EntityKind::Function, name.clone()),
        };

        let references = match node.child_by_field_name("body") {
            Some(body) => self.refs_in(body),
            None => Vec::new(),
        };
        let mut references = references;
        if class_name.is_none() {
            let mut all = self.file_imports.clone();
            all.extend(references);
            references = all;
        }

        self.entities.push(ExtractedEntity {
            kind,
            visibility: visibility_of(&name),
            name,
            full_qualified_name: fqn,
            start_line: line_of(outer),
            end_line: end_line_of(outer),
            code: node_text(outer, self.source),
            references,
        });
    }

    fn module_constant(&mut self, node: Node<'_>) {
        self.constant_in(node, None);
    }

    /// `UPPER_CASE = ...` assignments are treated as constants.
    fn constant_in(&mut self, stmt: Node<'_>, class_name: Option<&str>) {
        let Some(assignment) = stmt.named_child(0).filter(|n| n.kind() == "assignment") else {
            return;
        };
        let Some(left) = assignment.child_by_field_name("left") else {
            return;
        };
        if left.kind() != "identifier" {
            return;
        }
        let name = node_text(left, self.source);
        let is_constant = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
            && name.chars().any(|c| c.is_ascii_uppercase());
        if !is_constant {
            return;
        }
        let fqn = match class_name {
            Some(class) => format!("{class}.{name}"),
            None => name.clone(),
        };
        self.entities.push(ExtractedEntity {
            kind: EntityKind::Constant,
            name,
            full_qualified_name: fqn,
            start_line: line_of(stmt),
            end_line: end_line_of(stmt),
            visibility: Visibility::Public,
            code: node_text(stmt, self.source),
            references: Vec::new(),
        });
    }

    fn refs_in(&mut self, node: Node<'_>) -> Vec<RawReference> {
        let mut refs = Vec::new();
        self.visit(node, &mut refs);
        refs
    }

    fn visit(&mut self, node: Node<'_>, refs: &mut Vec<RawReference>) {
        if node.kind() == "call" {
            if let Some(function) = node.child_by_field_name("function") {
                match function.kind() {
                    "identifier" => {
                        let target = node_text(function, self.source);
                        // Capitalized bare calls are almost always
                        // constructor invocations.
                        let kind = if target.chars().next().is_some_and(|c| c.is_uppercase()) {
                            ReferenceKind::Instantiates
                        } else {
                            ReferenceKind::Calls
                        };
                        refs.push(RawReference {
                            kind,
                            target,
                            line: line_of(node),
                        });
                    }
                    "attribute" => {
                        if let Some(attr) = function.child_by_field_name("attribute") {
                            refs.push(RawReference {
                                kind: ReferenceKind::Calls,
                                target: node_text(attr, self.source),
                                line: line_of(node),
                            });
                        }
                    }
                    _ => {}
                }
            }
        }
        let mut cursor = node.walk();
        let children: Vec<Node> = node.named_children(&mut cursor).collect();
        drop(cursor);
        for child in children {
            // Nested defs keep their own references.
            if matches!(child.kind(), "function_definition" | "class_definition") {
                continue;
            }
            self.visit(child, refs);
        }
    }
}

fn visibility_of(name: &str) -> Visibility {
    let dunder = name.starts_with("__") && name.ends_with("__");
    if name.starts_with('_') && !dunder {
        Visibility::Private
    } else {
        Visibility::Public
    }
}
