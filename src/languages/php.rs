//! PHP extraction: namespaces, classes, interfaces, traits, enums, methods,
//! functions, constants and anonymous functions.

use tree_sitter::Node;

use crate::metrics::{LanguageRules, PhpRules};
use crate::store::{EntityKind, RawReference, ReferenceKind, Visibility};

use super::{end_line_of, line_of, node_text, ExtractedEntity, LanguageGrammar};

pub struct PhpGrammar;

static RULES: PhpRules = PhpRules;

impl LanguageGrammar for PhpGrammar {
    fn name(&self) -> &'static str {
        "php"
    }

    fn file_extensions(&self) -> &[&'static str] {
        &["php"]
    }

    fn language(&self) -> tree_sitter::Language {
        tree_sitter_php::LANGUAGE_PHP.into()
    }

    fn rules(&self) -> &'static dyn LanguageRules {
        &RULES
    }

    fn extract(&self, tree: &tree_sitter::Tree, source: &str) -> Vec<ExtractedEntity> {
        let mut extractor = PhpExtractor {
            source,
            namespace: String::new(),
            file_imports: Vec::new(),
            entities: Vec::new(),
        };
        extractor.scan_block(tree.root_node());
        extractor.entities
    }
}

struct PhpExtractor<'a> {
    source: &'a str,
    namespace: String,
    /// `use` imports at file scope, attached to every top-level declaration.
    file_imports: Vec<RawReference>,
    entities: Vec<ExtractedEntity>,
}

impl<'a> PhpExtractor<'a> {
    fn scan_block(&mut self, node: Node<'_>) {
        let mut cursor = node.walk();
        let children: Vec<Node> = node.named_children(&mut cursor).collect();
        drop(cursor);
        for child in children {
            match child.kind() {
                "namespace_definition" => {
                    if let Some(name) = child.child_by_field_name("name") {
                        self.namespace = node_text(name, self.source);
                    }
                    // Braced namespace syntax nests its declarations.
                    if let Some(body) = child.child_by_field_name("body") {
                        self.scan_block(body);
                    }
                }
                "namespace_use_declaration" => self.collect_imports(child),
                "class_declaration" => self.class_like(child, EntityKind::Class),
                "interface_declaration" => self.class_like(child, EntityKind::Interface),
                "trait_declaration" => self.class_like(child, EntityKind::Trait),
                "enum_declaration" => self.enum_decl(child),
                "function_definition" => self.function(child),
                "const_declaration" => self.constants(child, None),
                _ => {}
            }
        }
    }

    fn collect_imports(&mut self, node: Node<'_>) {
        let mut cursor = node.walk();
        for child in node.named_children(&mut cursor) {
            if child.kind() == "namespace_use_clause" {
                if let Some(name) = child.named_child(0) {
                    self.file_imports.push(RawReference {
                        kind: ReferenceKind::Import,
                        target: node_text(name, self.source),
                        line: line_of(child),
                    });
                }
            }
        }
    }

    /// Pulls the type names out of an extends / implements / trait-use
    /// clause.
    fn type_list(&self, node: Node<'_>, kind: ReferenceKind, refs: &mut Vec<RawReference>) {
        let mut cursor = node.walk();
        for child in node.named_children(&mut cursor) {
            if matches!(child.kind(), "name" | "qualified_name") {
                refs.push(RawReference {
                    kind,
                    target: node_text(child, self.source),
                    line: line_of(child),
                });
            }
        }
    }

    fn class_like(&mut self, node: Node<'_>, kind: EntityKind) {
        let Some(name_node) = node.child_by_field_name("name") else {
            return;
        };
        let name = node_text(name_node, self.source);
        let fqn = self.qualify(&name);

        let mut refs = self.file_imports.clone();
        {
            let mut cursor = node.walk();
            for child in node.named_children(&mut cursor) {
                match child.kind() {
                    "base_clause" => self.type_list(child, ReferenceKind::Extends, &mut refs),
                    "class_interface_clause" => {
                        self.type_list(child, ReferenceKind::Implements, &mut refs)
                    }
                    _ => {}
                }
            }
        }
        if let Some(body) = node.child_by_field_name("body") {
            let mut cursor = body.walk();
            for child in body.named_children(&mut cursor) {
                if child.kind() == "use_declaration" {
                    self.type_list(child, ReferenceKind::Uses, &mut refs);
                }
            }
        }

        self.entities.push(ExtractedEntity {
            kind,
            name,
            full_qualified_name: fqn.clone(),
            start_line: line_of(node),
            end_line: end_line_of(node),
            visibility: Visibility::Public,
            code: node_text(node, self.source),
            references: refs,
        });

        if let Some(body) = node.child_by_field_name("body") {
            self.members(body, &fqn);
        }
    }

    fn enum_decl(&mut self, node: Node<'_>) {
        let Some(name_node) = node.child_by_field_name("name") else {
            return;
        };
        let name = node_text(name_node, self.source);
        let fqn = self.qualify(&name);

        let mut refs = self.file_imports.clone();
        {
            let mut cursor = node.walk();
            for child in node.named_children(&mut cursor) {
                if child.kind() == "class_interface_clause" {
                    self.type_list(child, ReferenceKind::Implements, &mut refs);
                }
            }
        }
        self.entities.push(ExtractedEntity {
            kind: EntityKind::Class,
            name,
            full_qualified_name: fqn.clone(),
            start_line: line_of(node),
            end_line: end_line_of(node),
            visibility: Visibility::Public,
            code: node_text(node, self.source),
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
                "enum_case" => {
                    if let Some(case_name) = child.child_by_field_name("name") {
                        let case = node_text(case_name, self.source);
                        self.entities.push(ExtractedEntity {
                            kind: EntityKind::EnumCase,
                            full_qualified_name: format!("{fqn}::{case}"),
                            name: case,
                            start_line: line_of(child),
                            end_line: end_line_of(child),
                            visibility: Visibility::Public,
                            code: node_text(child, self.source),
                            references: Vec::new(),
                        });
                    }
                }
                "method_declaration" => self.method(child, &fqn),
                _ => {}
            }
        }
    }

    fn members(&mut self, body: Node<'_>, class_fqn: &str) {
        let mut cursor = body.walk();
        let children: Vec<Node> = body.named_children(&mut cursor).collect();
        drop(cursor);
        for child in children {
            match child.kind() {
                "method_declaration" => self.method(child, class_fqn),
                "const_declaration" => self.constants(child, Some(class_fqn)),
                _ => {}
            }
        }
    }

    fn method(&mut self, node: Node<'_>, class_fqn: &str) {
        let Some(name_node) = node.child_by_field_name("name") else {
            return;
        };
        let name = node_text(name_node, self.source);
        let fqn = format!("{class_fqn}::{name}");

        let mut visibility = Visibility::Public;
        {
            let mut cursor = node.walk();
            for child in node.named_children(&mut cursor) {
                if child.kind() == "visibility_modifier" {
                    visibility = Visibility::from_str(&node_text(child, self.source))
                        .unwrap_or_default();
                }
            }
        }

        let references = match node.child_by_field_name("body") {
            Some(body) => self.refs_in(body, &fqn),
            None => Vec::new(),
        };
        self.entities.push(ExtractedEntity {
            kind: EntityKind::Method,
            name,
            full_qualified_name: fqn,
            start_line: line_of(node),
            end_line: end_line_of(node),
            visibility,
            code: node_text(node, self.source),
            references,
        });
    }

    fn function(&mut self, node: Node<'_>) {
        let Some(name_node) = node.child_by_field_name("name") else {
            return;
        };
        let name = node_text(name_node, self.source);
        let fqn = self.qualify(&name);

        let mut references = self.file_imports.clone();
        if let Some(body) = node.child_by_field_name("body") {
            references.extend(self.refs_in(body, &fqn));
        }
        self.entities.push(ExtractedEntity {
            kind: EntityKind::Function,
            name,
            full_qualified_name: fqn,
            start_line: line_of(node),
            end_line: end_line_of(node),
            visibility: Visibility::Public,
            code: node_text(node, self.source),
            references,
        });
    }

    fn constants(&mut self, node: Node<'_>, scope: Option<&str>) {
        let mut cursor = node.walk();
        let elements: Vec<Node> = node
            .named_children(&mut cursor)
            .filter(|c| c.kind() == "const_element")
            .collect();
        drop(cursor);
        for element in elements {
            let Some(name_node) = element.named_child(0) else {
                continue;
            };
            let name = node_text(name_node, self.source);
            let fqn = match scope {
                Some(class) => format!("{class}::{name}"),
                None => self.qualify(&name),
            };
            self.entities.push(ExtractedEntity {
                kind: EntityKind::Constant,
                name,
                full_qualified_name: fqn,
                start_line: line_of(element),
                end_line: end_line_of(element),
                visibility: Visibility::Public,
                code: node_text(element, self.source),
                references: Vec::new(),
            });
        }
    }

    /// Collects call and instantiation references inside a body. Anonymous
    /// functions become entities of their own and keep their inner
    /// references.
    fn refs_in(&mut self, node: Node<'_>, scope: &str) -> Vec<RawReference> {
        let mut refs = Vec::new();
        self.visit(node, scope, &mut refs);
        refs
    }

    fn visit(&mut self, node: Node<'_>, scope: &str, refs: &mut Vec<RawReference>) {
        match node.kind() {
            "function_call_expression" => {
                if let Some(f) = node.child_by_field_name("function") {
                    if matches!(f.kind(), "name" | "qualified_name") {
                        refs.push(RawReference {
                            kind: ReferenceKind::Calls,
                            target: node_text(f, self.source),
                            line: line_of(node),
                        });
                    }
                }
            }
            "member_call_expression" => {
                if let Some(name) = node.child_by_field_name("name") {
                    refs.push(RawReference {
                        kind: ReferenceKind::Calls,
                        target: node_text(name, self.source),
                        line: line_of(node),
                    });
                }
            }
            "scoped_call_expression" => {
                if let Some(target) = node.child_by_field_name("scope") {
                    let text = node_text(target, self.source);
                    if !matches!(text.as_str(), "self" | "static" | "parent") {
                        refs.push(RawReference {
                            kind: ReferenceKind::Calls,
                            target: text,
                            line: line_of(node),
                        });
                    }
                }
            }
            "object_creation_expression" => {
                let mut cursor = node.walk();
                let class_node = node
                    .named_children(&mut cursor)
                    .find(|c| matches!(c.kind(), "name" | "qualified_name"));
                drop(cursor);
                if let Some(class_node) = class_node {
                    refs.push(RawReference {
                        kind: ReferenceKind::Instantiates,
                        target: node_text(class_node, self.source),
                        line: line_of(node),
                    });
                }
            }
            // Grammar versions differ on the node name for closures.
            "anonymous_function_creation_expression" | "anonymous_function" | "arrow_function" => {
                self.emit_closure(node, scope);
                return;
            }
            _ => {}
        }
        let mut cursor = node.walk();
        let children: Vec<Node> = node.named_children(&mut cursor).collect();
        drop(cursor);
        for child in children {
            self.visit(child, scope, refs);
        }
    }

    fn emit_closure(&mut self, node: Node<'_>, scope: &str) {
        let line = line_of(node);
        let name = format!("{{closure:{line}}}");
        let fqn = if scope.is_empty() {
            name.clone()
        } else {
            format!("{scope}::{name}")
        };
        let mut refs = Vec::new();
        if let Some(body) = node.child_by_field_name("body") {
            self.visit(body, &fqn, &mut refs);
        }
        self.entities.push(ExtractedEntity {
            kind: EntityKind::Closure,
            name,
            full_qualified_name: fqn,
            start_line: line,
            end_line: end_line_of(node),
            visibility: Visibility::Public,
            code: node_text(node, self.source),
            references: refs,
        });
    }

    fn qualify(&self, name: &str) -> String {
        if self.namespace.is_empty() {
            name.to_string()
        } else {
            format!("{}\\{name}", self.namespace)
        }
    }
}
