//! Structural entity extraction using tree-sitter.
//!
//! One file in, one [`FileNode`] out: exports, imports, classes,
//! functions, variables, and call sites, recovered by matching AST node
//! kinds per language. Extraction failure never aborts a scan — the node
//! comes back with empty structural fields and an error note instead.

use std::collections::HashMap;

use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::debug;
use tree_sitter::{Language, Node, Parser};

use crate::graph::{
    ClassInfo, FileKind, FileNode, FunctionInfo, ImportKind, ImportRelation, VariableInfo,
    VariableScope,
};

/// Errors that can occur while setting up extraction. Per-file parse
/// failures are not errors; they land on the node as an extraction note.
#[derive(Error, Debug)]
pub enum ExtractorError {
    #[error("Grammar error: {0}")]
    Grammar(#[from] tree_sitter::LanguageError),
}

/// Sha256 hex digest of a text, used for content change detection.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

/// Extracts structural entities from source files.
///
/// Parsers are built once at construction from a fixed language table and
/// reused across files.
pub struct EntityExtractor {
    parsers: HashMap<&'static str, Parser>,
}

impl EntityExtractor {
    /// Build parsers for every supported language.
    pub fn new() -> Result<Self, ExtractorError> {
        let grammars: [(&'static str, Language); 5] = [
            ("rust", tree_sitter_rust::LANGUAGE.into()),
            ("python", tree_sitter_python::LANGUAGE.into()),
            ("javascript", tree_sitter_javascript::LANGUAGE.into()),
            ("typescript", tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into()),
            ("go", tree_sitter_go::LANGUAGE.into()),
        ];

        let mut parsers = HashMap::new();
        for (name, language) in grammars {
            let mut parser = Parser::new();
            parser.set_language(&language)?;
            parsers.insert(name, parser);
        }

        Ok(Self { parsers })
    }

    /// Whether full grammar parsing is available for a language.
    pub fn supports(&self, language: &str) -> bool {
        self.parsers.contains_key(language)
    }

    /// Extract a populated [`FileNode`] from file content.
    ///
    /// On parse failure the node carries an `extraction_error` note and
    /// empty structural fields; on unsupported languages only a heuristic
    /// import scan runs.
    pub fn extract(
        &mut self,
        rel_path: &str,
        kind: FileKind,
        language: &str,
        content: &str,
    ) -> FileNode {
        let mut node = FileNode::new(rel_path, kind, language)
            .with_content(content.len() as u64, content_hash(content));

        let Some(parser) = self.parsers.get_mut(language) else {
            node.imports = fallback_imports(content);
            return node;
        };

        let tree = match parser.parse(content, None) {
            Some(tree) => tree,
            None => {
                node.extraction_error = Some("tree-sitter parse returned no tree".to_string());
                return node;
            }
        };

        let ctx = Ctx {
            source: content,
            language,
        };
        collect_top_level(&ctx, tree.root_node(), &mut node);
        merge_rust_impls(&ctx, tree.root_node(), &mut node);
        collect_local_variables(&ctx, tree.root_node(), &mut node.variables);
        if language == "go" {
            let exported: Vec<String> = node
                .declared_function_names()
                .map(str::to_string)
                .chain(node.classes.iter().map(|c| c.name.clone()))
                .filter(|n| n.chars().next().is_some_and(char::is_uppercase))
                .collect();
            node.exports = exported;
        }

        debug!(
            "Extracted {}: {} functions, {} classes, {} imports",
            rel_path,
            node.functions.len(),
            node.classes.len(),
            node.imports.len()
        );
        node
    }
}

struct Ctx<'a> {
    source: &'a str,
    language: &'a str,
}

impl<'a> Ctx<'a> {
    fn text(&self, node: Node) -> &'a str {
        &self.source[node.byte_range()]
    }

    fn field_text(&self, node: Node, field: &str) -> Option<String> {
        node.child_by_field_name(field)
            .map(|n| self.text(n).to_string())
    }
}

fn named_children<'t>(node: Node<'t>) -> Vec<Node<'t>> {
    let mut cursor = node.walk();
    node.named_children(&mut cursor).collect()
}

fn children<'t>(node: Node<'t>) -> Vec<Node<'t>> {
    let mut cursor = node.walk();
    node.children(&mut cursor).collect()
}

fn line_span(node: Node) -> (usize, usize) {
    (
        node.start_position().row + 1,
        node.end_position().row + 1,
    )
}

/// Walk the module-level statements of a file.
fn collect_top_level(ctx: &Ctx, root: Node, out: &mut FileNode) {
    for child in named_children(root) {
        collect_statement(ctx, child, out, false);
    }
}

fn collect_statement(ctx: &Ctx, node: Node, out: &mut FileNode, exported: bool) {
    match node.kind() {
        // Imports
        "use_declaration" => {
            if let Some(import) = parse_rust_use(ctx, node) {
                out.imports.push(import);
            }
        }
        "import_statement" if ctx.language == "python" => {
            out.imports.extend(parse_python_import(ctx, node));
        }
        "import_from_statement" => {
            if let Some(import) = parse_python_from_import(ctx, node) {
                out.imports.push(import);
            }
        }
        "import_statement" => {
            if let Some(import) = parse_js_import(ctx, node) {
                out.imports.push(import);
            }
        }
        "import_declaration" => {
            out.imports.extend(parse_go_imports(ctx, node));
        }

        // Functions
        "function_item" | "function_declaration" | "function_definition" => {
            let func = parse_function(ctx, node);
            if exported || has_visibility_modifier(node) || ctx.language == "python" {
                out.exports.push(func.name.clone());
            }
            out.functions.push(func);
        }
        "method_declaration" if ctx.language == "go" => {
            attach_go_method(ctx, node, out);
        }

        // Classes
        "struct_item" | "enum_item" => {
            let class = parse_rust_struct(ctx, node);
            if has_visibility_modifier(node) {
                out.exports.push(class.name.clone());
            }
            out.classes.push(class);
        }
        "trait_item" => {
            let class = parse_rust_trait(ctx, node);
            if has_visibility_modifier(node) {
                out.exports.push(class.name.clone());
            }
            out.classes.push(class);
        }
        "class_definition" => {
            let class = parse_python_class(ctx, node, out);
            out.exports.push(class.name.clone());
            out.classes.push(class);
        }
        "class_declaration" => {
            let class = parse_js_class(ctx, node);
            if exported {
                out.exports.push(class.name.clone());
            }
            out.classes.push(class);
        }
        "interface_declaration" => {
            let class = parse_ts_interface(ctx, node);
            if exported {
                out.exports.push(class.name.clone());
            }
            out.classes.push(class);
        }
        "type_declaration" if ctx.language == "go" => {
            for spec in named_children(node) {
                if spec.kind() == "type_spec" {
                    if let Some(class) = parse_go_type_spec(ctx, spec) {
                        out.classes.push(class);
                    }
                }
            }
        }

        // Variables
        "const_item" | "static_item" => {
            if let Some(name) = ctx.field_text(node, "name") {
                if has_visibility_modifier(node) {
                    out.exports.push(name.clone());
                }
                out.variables.push(VariableInfo {
                    name,
                    line: line_span(node).0,
                    scope: VariableScope::Global,
                });
            }
        }
        "lexical_declaration" | "variable_declaration" => {
            collect_js_declarators(ctx, node, out, VariableScope::Global, exported);
        }
        "var_declaration" | "const_declaration" if ctx.language == "go" => {
            for spec in named_children(node) {
                if let Some(name) = ctx.field_text(spec, "name") {
                    out.variables.push(VariableInfo {
                        name,
                        line: line_span(spec).0,
                        scope: VariableScope::Global,
                    });
                }
            }
        }
        "expression_statement" if ctx.language == "python" => {
            for expr in named_children(node) {
                if expr.kind() == "assignment" {
                    if let Some(left) = expr.child_by_field_name("left") {
                        if left.kind() == "identifier" {
                            out.variables.push(VariableInfo {
                                name: ctx.text(left).to_string(),
                                line: line_span(expr).0,
                                scope: VariableScope::Global,
                            });
                        }
                    }
                }
                collect_calls(ctx, expr, &mut out.top_level_calls);
            }
        }

        // Wrappers
        "export_statement" => {
            for child in named_children(node) {
                match child.kind() {
                    "export_clause" => {
                        for spec in named_children(child) {
                            if let Some(name) = ctx.field_text(spec, "name") {
                                out.exports.push(name);
                            }
                        }
                    }
                    _ => collect_statement(ctx, child, out, true),
                }
            }
        }
        "decorated_definition" => {
            for child in named_children(node) {
                collect_statement(ctx, child, out, exported);
            }
        }
        "mod_item" => {
            if let Some(body) = node.child_by_field_name("body") {
                for child in named_children(body) {
                    collect_statement(ctx, child, out, exported);
                }
            }
        }
        "impl_item" => {
            // Handled by merge_rust_impls once all structs are known.
        }

        // Everything else at top level may still contain call sites
        // (`import { foo } from './a'; foo();` style entry code).
        _ => {
            collect_calls(ctx, node, &mut out.top_level_calls);
        }
    }
}

/// Whether a rust item carries a `pub` modifier.
fn has_visibility_modifier(node: Node) -> bool {
    children(node)
        .iter()
        .any(|c| c.kind() == "visibility_modifier")
}

// ---------------------------------------------------------------------------
// Imports
// ---------------------------------------------------------------------------

fn parse_rust_use(ctx: &Ctx, node: Node) -> Option<ImportRelation> {
    let argument = node.child_by_field_name("argument")?;
    let line = line_span(node).0;

    let (specifier, symbols) = match argument.kind() {
        "scoped_use_list" => {
            let path = ctx.field_text(argument, "path").unwrap_or_default();
            let symbols = argument
                .child_by_field_name("list")
                .map(|list| {
                    named_children(list)
                        .iter()
                        .map(|n| ctx.text(*n).to_string())
                        .collect()
                })
                .unwrap_or_default();
            (path, symbols)
        }
        "scoped_identifier" => {
            let symbol = ctx.field_text(argument, "name").unwrap_or_default();
            (ctx.text(argument).to_string(), vec![symbol])
        }
        "use_as_clause" => {
            let path = ctx.field_text(argument, "path").unwrap_or_default();
            (path, Vec::new())
        }
        _ => (ctx.text(argument).to_string(), Vec::new()),
    };

    Some(ImportRelation {
        specifier,
        kind: ImportKind::Import,
        symbols,
        line,
    })
}

fn parse_python_import(ctx: &Ctx, node: Node) -> Vec<ImportRelation> {
    let line = line_span(node).0;
    named_children(node)
        .iter()
        .filter_map(|child| {
            let specifier = match child.kind() {
                "dotted_name" => ctx.text(*child).to_string(),
                "aliased_import" => ctx.field_text(*child, "name")?,
                _ => return None,
            };
            Some(ImportRelation {
                specifier,
                kind: ImportKind::Import,
                symbols: Vec::new(),
                line,
            })
        })
        .collect()
}

fn parse_python_from_import(ctx: &Ctx, node: Node) -> Option<ImportRelation> {
    let module = node.child_by_field_name("module_name")?;
    let specifier = ctx.text(module).to_string();
    let symbols = named_children(node)
        .iter()
        .skip(1)
        .filter(|n| matches!(n.kind(), "dotted_name" | "identifier" | "aliased_import"))
        .map(|n| match n.kind() {
            "aliased_import" => ctx.field_text(*n, "name").unwrap_or_default(),
            _ => ctx.text(*n).to_string(),
        })
        .collect();

    Some(ImportRelation {
        specifier,
        kind: ImportKind::Import,
        symbols,
        line: line_span(node).0,
    })
}

fn parse_js_import(ctx: &Ctx, node: Node) -> Option<ImportRelation> {
    let source = node.child_by_field_name("source")?;
    let specifier = strip_quotes(ctx.text(source));
    let mut symbols = Vec::new();

    for child in named_children(node) {
        if child.kind() == "import_clause" {
            for clause_child in named_children(child) {
                match clause_child.kind() {
                    "identifier" => symbols.push(ctx.text(clause_child).to_string()),
                    "named_imports" => {
                        for spec in named_children(clause_child) {
                            if let Some(name) = ctx.field_text(spec, "name") {
                                symbols.push(name);
                            }
                        }
                    }
                    "namespace_import" => {
                        for id in named_children(clause_child) {
                            if id.kind() == "identifier" {
                                symbols.push(ctx.text(id).to_string());
                            }
                        }
                    }
                    _ => {}
                }
            }
        }
    }

    Some(ImportRelation {
        specifier,
        kind: ImportKind::Import,
        symbols,
        line: line_span(node).0,
    })
}

fn parse_go_imports(ctx: &Ctx, node: Node) -> Vec<ImportRelation> {
    let mut specs = Vec::new();
    let mut stack = named_children(node);
    while let Some(child) = stack.pop() {
        match child.kind() {
            "import_spec" => {
                if let Some(path) = child.child_by_field_name("path") {
                    specs.push(ImportRelation {
                        specifier: strip_quotes(ctx.text(path)),
                        kind: ImportKind::Import,
                        symbols: Vec::new(),
                        line: line_span(child).0,
                    });
                }
            }
            "import_spec_list" => stack.extend(named_children(child)),
            _ => {}
        }
    }
    specs
}

fn strip_quotes(text: &str) -> String {
    text.trim_matches(|c| c == '"' || c == '\'' || c == '`').to_string()
}

/// Line-based import scan for languages without a grammar.
fn fallback_imports(content: &str) -> Vec<ImportRelation> {
    let mut imports = Vec::new();
    for (i, line) in content.lines().enumerate() {
        let trimmed = line.trim();
        let (specifier, kind) = if let Some(rest) = trimmed.strip_prefix("#include") {
            (
                rest.trim().trim_matches(|c| c == '<' || c == '>' || c == '"').to_string(),
                ImportKind::Include,
            )
        } else if let Some(rest) = trimmed.strip_prefix("import ") {
            (
                rest.split_whitespace().next().unwrap_or("").trim_matches(';').to_string(),
                ImportKind::Reference,
            )
        } else {
            continue;
        };

        if !specifier.is_empty() {
            imports.push(ImportRelation {
                specifier,
                kind,
                symbols: Vec::new(),
                line: i + 1,
            });
        }
    }
    imports
}

// ---------------------------------------------------------------------------
// Functions
// ---------------------------------------------------------------------------

fn parse_function(ctx: &Ctx, node: Node) -> FunctionInfo {
    let (line_start, line_end) = line_span(node);
    let name = ctx.field_text(node, "name").unwrap_or_default();
    let params = node
        .child_by_field_name("parameters")
        .map(|p| param_names(ctx, p))
        .unwrap_or_default();
    let return_type = return_type_of(ctx, node);

    let mut complexity = 1u32;
    let mut calls = Vec::new();
    if let Some(body) = node.child_by_field_name("body") {
        complexity += count_branches(ctx, body);
        collect_calls(ctx, body, &mut calls);
    }

    FunctionInfo {
        name,
        line_start,
        line_end,
        params,
        return_type,
        complexity,
        calls,
    }
}

fn return_type_of(ctx: &Ctx, node: Node) -> Option<String> {
    let field = if ctx.language == "go" {
        "result"
    } else {
        "return_type"
    };
    let text = ctx.field_text(node, field)?;
    let cleaned = text.trim_start_matches(':').trim().to_string();
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned)
    }
}

fn param_names(ctx: &Ctx, params: Node) -> Vec<String> {
    let mut names = Vec::new();
    for child in named_children(params) {
        match child.kind() {
            "identifier" => names.push(ctx.text(child).to_string()),
            "self_parameter" => names.push("self".to_string()),
            // rust `pattern: Type`, ts `pattern: Type`
            "parameter" | "required_parameter" | "optional_parameter" => {
                if let Some(pattern) = child
                    .child_by_field_name("pattern")
                    .or_else(|| child.child_by_field_name("name"))
                {
                    names.push(ctx.text(pattern).to_string());
                }
            }
            // python `x: int`, `x=1`
            "typed_parameter" | "typed_default_parameter" | "default_parameter" => {
                if let Some(name) = child
                    .child_by_field_name("name")
                    .or_else(|| named_children(child).into_iter().next())
                {
                    names.push(ctx.text(name).to_string());
                }
            }
            // go `a, b int`
            "parameter_declaration" => {
                for id in named_children(child) {
                    if id.kind() == "identifier" {
                        names.push(ctx.text(id).to_string());
                    }
                }
            }
            _ => {}
        }
    }
    names
}

/// Branching constructs per language; each occurrence adds one to the
/// base complexity of 1.
fn branch_kinds(language: &str) -> &'static [&'static str] {
    match language {
        "rust" => &[
            "if_expression",
            "while_expression",
            "loop_expression",
            "for_expression",
            "match_arm",
        ],
        "python" => &[
            "if_statement",
            "elif_clause",
            "for_statement",
            "while_statement",
            "except_clause",
            "conditional_expression",
            "case_clause",
        ],
        "javascript" | "typescript" => &[
            "if_statement",
            "for_statement",
            "for_in_statement",
            "while_statement",
            "do_statement",
            "switch_case",
            "catch_clause",
            "ternary_expression",
        ],
        "go" => &[
            "if_statement",
            "for_statement",
            "expression_case",
            "type_case",
            "communication_case",
        ],
        _ => &[],
    }
}

fn count_branches(ctx: &Ctx, body: Node) -> u32 {
    let kinds = branch_kinds(ctx.language);
    let mut count = 0u32;
    let mut stack = vec![body];
    while let Some(node) = stack.pop() {
        let kind = node.kind();
        if kinds.contains(&kind) {
            count += 1;
        }
        if kind == "binary_expression" {
            if let Some(op) = node.child_by_field_name("operator") {
                if matches!(ctx.text(op), "&&" | "||") {
                    count += 1;
                }
            }
        }
        if kind == "boolean_operator" {
            count += 1;
        }
        stack.extend(named_children(node));
    }
    count
}

fn collect_calls(ctx: &Ctx, node: Node, out: &mut Vec<String>) {
    let mut stack = vec![node];
    while let Some(current) = stack.pop() {
        match current.kind() {
            "call_expression" | "call" => {
                if let Some(function) = current.child_by_field_name("function") {
                    if let Some(name) = callee_name(ctx, function) {
                        out.push(name);
                    }
                }
            }
            "new_expression" => {
                if let Some(constructor) = current.child_by_field_name("constructor") {
                    out.push(ctx.text(constructor).to_string());
                }
            }
            _ => {}
        }
        // Do not descend into nested declarations; their calls belong to
        // the inner function.
        if !matches!(
            current.kind(),
            "function_item" | "function_declaration" | "function_definition" | "method_definition"
        ) || current == node
        {
            stack.extend(named_children(current));
        }
    }
}

fn callee_name(ctx: &Ctx, function: Node) -> Option<String> {
    match function.kind() {
        "identifier" | "field_identifier" => Some(ctx.text(function).to_string()),
        "scoped_identifier" => ctx.field_text(function, "name"),
        "field_expression" => ctx.field_text(function, "field"),
        "member_expression" => ctx.field_text(function, "property"),
        "selector_expression" => ctx.field_text(function, "field"),
        "attribute" => ctx.field_text(function, "attribute"),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Classes
// ---------------------------------------------------------------------------

fn parse_rust_struct(ctx: &Ctx, node: Node) -> ClassInfo {
    let (line_start, line_end) = line_span(node);
    let name = ctx.field_text(node, "name").unwrap_or_default();
    let mut properties = Vec::new();

    if let Some(body) = node.child_by_field_name("body") {
        for child in named_children(body) {
            match child.kind() {
                "field_declaration" | "enum_variant" => {
                    if let Some(field_name) = ctx.field_text(child, "name") {
                        properties.push(field_name);
                    }
                }
                _ => {}
            }
        }
    }

    ClassInfo {
        name,
        line_start,
        line_end,
        properties,
        ..ClassInfo::default()
    }
}

fn parse_rust_trait(ctx: &Ctx, node: Node) -> ClassInfo {
    let (line_start, line_end) = line_span(node);
    let name = ctx.field_text(node, "name").unwrap_or_default();
    let mut methods = Vec::new();

    if let Some(body) = node.child_by_field_name("body") {
        for child in named_children(body) {
            if matches!(child.kind(), "function_item" | "function_signature_item") {
                methods.push(parse_function(ctx, child));
            }
        }
    }

    ClassInfo {
        name,
        line_start,
        line_end,
        is_interface: true,
        methods,
        ..ClassInfo::default()
    }
}

/// Fold `impl` blocks into their struct's class entry: methods, and the
/// trait name for `impl Trait for Type`.
fn merge_rust_impls(ctx: &Ctx, root: Node, out: &mut FileNode) {
    if ctx.language != "rust" {
        return;
    }

    for node in named_children(root) {
        if node.kind() != "impl_item" {
            continue;
        }
        let Some(type_name) = ctx.field_text(node, "type") else {
            continue;
        };
        let type_name = strip_generics(&type_name);
        let trait_name = ctx.field_text(node, "trait").map(|t| strip_generics(&t));

        let mut methods = Vec::new();
        if let Some(body) = node.child_by_field_name("body") {
            for child in named_children(body) {
                if child.kind() == "function_item" {
                    methods.push(parse_function(ctx, child));
                }
            }
        }

        let class = match out.classes.iter_mut().find(|c| c.name == type_name) {
            Some(class) => class,
            None => {
                // impl for a type declared elsewhere; track it so the
                // methods are still indexed.
                let (line_start, line_end) = line_span(node);
                out.classes.push(ClassInfo {
                    name: type_name.clone(),
                    line_start,
                    line_end,
                    ..ClassInfo::default()
                });
                out.classes.last_mut().unwrap()
            }
        };

        if let Some(trait_name) = trait_name {
            if !class.implements.contains(&trait_name) {
                class.implements.push(trait_name);
            }
        }
        class.methods.extend(methods);
    }
}

fn strip_generics(name: &str) -> String {
    name.split('<').next().unwrap_or(name).trim().to_string()
}

fn parse_python_class(ctx: &Ctx, node: Node, out: &mut FileNode) -> ClassInfo {
    let (line_start, line_end) = line_span(node);
    let name = ctx.field_text(node, "name").unwrap_or_default();
    let mut class = ClassInfo {
        name,
        line_start,
        line_end,
        ..ClassInfo::default()
    };

    if let Some(superclasses) = node.child_by_field_name("superclasses") {
        let bases: Vec<String> = named_children(superclasses)
            .iter()
            .filter(|n| matches!(n.kind(), "identifier" | "attribute"))
            .map(|n| ctx.text(*n).to_string())
            .collect();
        let mut bases = bases.into_iter();
        class.extends = bases.next();
        class.implements = bases.collect();
    }

    if let Some(body) = node.child_by_field_name("body") {
        for child in named_children(body) {
            match child.kind() {
                "function_definition" => class.methods.push(parse_function(ctx, child)),
                "decorated_definition" => {
                    for inner in named_children(child) {
                        if inner.kind() == "function_definition" {
                            class.methods.push(parse_function(ctx, inner));
                        }
                    }
                }
                "expression_statement" => {
                    for expr in named_children(child) {
                        if expr.kind() == "assignment" {
                            if let Some(left) = expr.child_by_field_name("left") {
                                if left.kind() == "identifier" {
                                    let prop = ctx.text(left).to_string();
                                    out.variables.push(VariableInfo {
                                        name: prop.clone(),
                                        line: line_span(expr).0,
                                        scope: VariableScope::Class,
                                    });
                                    class.properties.push(prop);
                                }
                            }
                        }
                    }
                }
                _ => {}
            }
        }
    }

    class
}

fn parse_js_class(ctx: &Ctx, node: Node) -> ClassInfo {
    let (line_start, line_end) = line_span(node);
    let name = ctx.field_text(node, "name").unwrap_or_default();
    let mut class = ClassInfo {
        name,
        line_start,
        line_end,
        ..ClassInfo::default()
    };

    for child in named_children(node) {
        if child.kind() == "class_heritage" {
            // javascript: `extends Expr`; typescript: extends_clause and
            // implements_clause children.
            for clause in named_children(child) {
                match clause.kind() {
                    "extends_clause" => {
                        class.extends = named_children(clause)
                            .first()
                            .map(|n| strip_generics(ctx.text(*n)));
                    }
                    "implements_clause" => {
                        class.implements = named_children(clause)
                            .iter()
                            .map(|n| strip_generics(ctx.text(*n)))
                            .collect();
                    }
                    _ => {
                        if class.extends.is_none() {
                            class.extends = Some(strip_generics(ctx.text(clause)));
                        }
                    }
                }
            }
        }
    }

    if let Some(body) = node.child_by_field_name("body") {
        for child in named_children(body) {
            match child.kind() {
                "method_definition" => class.methods.push(parse_function(ctx, child)),
                "field_definition" | "public_field_definition" | "property_definition" => {
                    if let Some(prop) = ctx
                        .field_text(child, "property")
                        .or_else(|| ctx.field_text(child, "name"))
                    {
                        class.properties.push(prop);
                    }
                }
                _ => {}
            }
        }
    }

    class
}

fn parse_ts_interface(ctx: &Ctx, node: Node) -> ClassInfo {
    let (line_start, line_end) = line_span(node);
    let name = ctx.field_text(node, "name").unwrap_or_default();
    let mut class = ClassInfo {
        name,
        line_start,
        line_end,
        is_interface: true,
        ..ClassInfo::default()
    };

    for child in named_children(node) {
        if child.kind() == "extends_type_clause" || child.kind() == "extends_clause" {
            class.implements = named_children(child)
                .iter()
                .map(|n| strip_generics(ctx.text(*n)))
                .collect();
        }
    }

    if let Some(body) = node.child_by_field_name("body") {
        for child in named_children(body) {
            match child.kind() {
                "property_signature" => {
                    if let Some(prop) = ctx.field_text(child, "name") {
                        class.properties.push(prop);
                    }
                }
                "method_signature" => {
                    let mut method = FunctionInfo {
                        name: ctx.field_text(child, "name").unwrap_or_default(),
                        complexity: 1,
                        ..FunctionInfo::default()
                    };
                    let (start, end) = line_span(child);
                    method.line_start = start;
                    method.line_end = end;
                    if let Some(params) = child.child_by_field_name("parameters") {
                        method.params = param_names(ctx, params);
                    }
                    class.methods.push(method);
                }
                _ => {}
            }
        }
    }

    class
}

fn parse_go_type_spec(ctx: &Ctx, spec: Node) -> Option<ClassInfo> {
    let name = ctx.field_text(spec, "name")?;
    let type_node = spec.child_by_field_name("type")?;
    let (line_start, line_end) = line_span(spec);

    let mut class = ClassInfo {
        name,
        line_start,
        line_end,
        ..ClassInfo::default()
    };

    match type_node.kind() {
        "struct_type" => {
            let mut stack = named_children(type_node);
            while let Some(node) = stack.pop() {
                match node.kind() {
                    "field_declaration" => {
                        for id in named_children(node) {
                            if id.kind() == "field_identifier" {
                                class.properties.push(ctx.text(id).to_string());
                            }
                        }
                    }
                    "field_declaration_list" => stack.extend(named_children(node)),
                    _ => {}
                }
            }
        }
        "interface_type" => {
            class.is_interface = true;
            let mut stack = named_children(type_node);
            while let Some(node) = stack.pop() {
                if matches!(node.kind(), "method_spec" | "method_elem") {
                    let method = FunctionInfo {
                        name: ctx.field_text(node, "name").unwrap_or_default(),
                        line_start: line_span(node).0,
                        line_end: line_span(node).1,
                        complexity: 1,
                        ..FunctionInfo::default()
                    };
                    class.methods.push(method);
                }
            }
        }
        _ => return None,
    }

    Some(class)
}

/// Attach a go method to the class entry of its receiver type.
fn attach_go_method(ctx: &Ctx, node: Node, out: &mut FileNode) {
    let method = parse_function(ctx, node);

    let receiver_type = node.child_by_field_name("receiver").and_then(|receiver| {
        let mut stack = named_children(receiver);
        while let Some(n) = stack.pop() {
            match n.kind() {
                "type_identifier" => return Some(ctx.text(n).to_string()),
                _ => stack.extend(named_children(n)),
            }
        }
        None
    });

    match receiver_type
        .and_then(|t| out.classes.iter_mut().find(|c| c.name == t))
    {
        Some(class) => class.methods.push(method),
        None => out.functions.push(method),
    }
}

const FUNCTION_KINDS: &[&str] = &[
    "function_item",
    "function_declaration",
    "function_definition",
    "method_definition",
    "method_declaration",
];

const BLOCK_KINDS: &[&str] = &["block", "statement_block"];

/// Collect variable declarations inside function bodies. Declarations
/// directly under a body are function-scoped; anything nested in a
/// further block is block-scoped.
fn collect_local_variables(ctx: &Ctx, root: Node, out: &mut Vec<VariableInfo>) {
    fn walk(ctx: &Ctx, node: Node, out: &mut Vec<VariableInfo>, in_function: bool, depth: usize) {
        for child in named_children(node) {
            let kind = child.kind();

            if FUNCTION_KINDS.contains(&kind) {
                if let Some(body) = child.child_by_field_name("body") {
                    walk(ctx, body, out, true, 0);
                }
                continue;
            }

            if in_function {
                let scope = if depth == 0 {
                    VariableScope::Function
                } else {
                    VariableScope::Block
                };
                match kind {
                    "let_declaration" => {
                        if let Some(pattern) = child.child_by_field_name("pattern") {
                            if pattern.kind() == "identifier" {
                                out.push(VariableInfo {
                                    name: ctx.text(pattern).to_string(),
                                    line: line_span(child).0,
                                    scope,
                                });
                            }
                        }
                    }
                    "variable_declarator" => {
                        if let Some(name) = child.child_by_field_name("name") {
                            if name.kind() == "identifier" {
                                out.push(VariableInfo {
                                    name: ctx.text(name).to_string(),
                                    line: line_span(child).0,
                                    scope,
                                });
                            }
                        }
                    }
                    "assignment" if ctx.language == "python" => {
                        if let Some(left) = child.child_by_field_name("left") {
                            if left.kind() == "identifier" {
                                out.push(VariableInfo {
                                    name: ctx.text(left).to_string(),
                                    line: line_span(child).0,
                                    scope,
                                });
                            }
                        }
                    }
                    "short_var_declaration" => {
                        if let Some(left) = child.child_by_field_name("left") {
                            for id in named_children(left) {
                                if id.kind() == "identifier" {
                                    out.push(VariableInfo {
                                        name: ctx.text(id).to_string(),
                                        line: line_span(child).0,
                                        scope,
                                    });
                                }
                            }
                        }
                    }
                    _ => {}
                }
            }

            let next_depth = if in_function && BLOCK_KINDS.contains(&kind) {
                depth + 1
            } else {
                depth
            };
            walk(ctx, child, out, in_function, next_depth);
        }
    }

    walk(ctx, root, out, false, 0);
}

fn collect_js_declarators(
    ctx: &Ctx,
    node: Node,
    out: &mut FileNode,
    scope: VariableScope,
    exported: bool,
) {
    for child in named_children(node) {
        if child.kind() != "variable_declarator" {
            continue;
        }
        if let Some(name) = ctx.field_text(child, "name") {
            if exported {
                out.exports.push(name.clone());
            }
            out.variables.push(VariableInfo {
                name,
                line: line_span(child).0,
                scope,
            });
        }
        if let Some(value) = child.child_by_field_name("value") {
            // `const x = require('y')`
            if value.kind() == "call_expression" {
                let is_require = value
                    .child_by_field_name("function")
                    .map(|f| ctx.text(f) == "require")
                    .unwrap_or(false);
                if is_require {
                    if let Some(args) = value.child_by_field_name("arguments") {
                        if let Some(arg) = named_children(args).first() {
                            out.imports.push(ImportRelation {
                                specifier: strip_quotes(ctx.text(*arg)),
                                kind: ImportKind::Require,
                                symbols: Vec::new(),
                                line: line_span(value).0,
                            });
                            continue;
                        }
                    }
                }
            }
            collect_calls(ctx, value, &mut out.top_level_calls);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::FileKind;

    fn extract(language: &str, path: &str, source: &str) -> FileNode {
        let mut extractor = EntityExtractor::new().unwrap();
        extractor.extract(path, FileKind::File, language, source)
    }

    #[test]
    fn extracts_typescript_imports_and_calls() {
        let node = extract(
            "typescript",
            "src/b.ts",
            "import { foo, bar } from './a';\nfoo();\n",
        );

        assert_eq!(node.imports.len(), 1);
        assert_eq!(node.imports[0].specifier, "./a");
        assert_eq!(node.imports[0].symbols, ["foo", "bar"]);
        assert_eq!(node.top_level_calls, ["foo"]);
    }

    #[test]
    fn extracts_typescript_class_with_heritage() {
        let source = r#"
export class AuthService extends BaseService implements Service {
    private token: string;

    login(user: string, password: string): boolean {
        if (user && password) {
            return this.verify(user);
        }
        return false;
    }
}
"#;
        let node = extract("typescript", "src/auth.ts", source);
        assert_eq!(node.classes.len(), 1);
        let class = &node.classes[0];
        assert_eq!(class.name, "AuthService");
        assert_eq!(class.extends.as_deref(), Some("BaseService"));
        assert_eq!(class.implements, ["Service"]);
        assert_eq!(class.methods.len(), 1);
        let login = &class.methods[0];
        assert_eq!(login.params, ["user", "password"]);
        // Base 1 + if + &&.
        assert_eq!(login.complexity, 3);
        assert!(login.calls.contains(&"verify".to_string()));
        assert!(node.exports.contains(&"AuthService".to_string()));
    }

    #[test]
    fn extracts_rust_entities() {
        let source = r#"
use std::collections::HashMap;
use crate::graph::FileNode;

pub struct Store {
    data: HashMap<String, String>,
}

impl Store {
    pub fn get(&self, key: &str) -> Option<String> {
        if key.is_empty() {
            return None;
        }
        self.lookup(key)
    }
}

pub fn helper(input: u32) -> u32 {
    match input {
        0 => 0,
        1 => 1,
        _ => input * 2,
    }
}
"#;
        let node = extract("rust", "src/store.rs", source);

        assert_eq!(node.imports.len(), 2);
        assert!(node
            .imports
            .iter()
            .any(|i| i.specifier == "crate::graph::FileNode"));

        let store = node.classes.iter().find(|c| c.name == "Store").unwrap();
        assert_eq!(store.properties, ["data"]);
        assert_eq!(store.methods.len(), 1);
        assert!(store.methods[0].calls.contains(&"lookup".to_string()));

        let helper = node.functions.iter().find(|f| f.name == "helper").unwrap();
        // Base 1 + three match arms.
        assert_eq!(helper.complexity, 4);
        assert_eq!(helper.return_type.as_deref(), Some("u32"));
        assert!(node.exports.contains(&"helper".to_string()));
    }

    #[test]
    fn extracts_python_class_and_scopes() {
        let source = r#"
import os
from .utils import slugify

VERSION = "1.0"

class Page:
    title = ""

    def render(self, depth):
        if depth > 0:
            return slugify(self.title)
        return ""

def top():
    return os.getcwd()
"#;
        let node = extract("python", "site/page.py", source);

        assert!(node.imports.iter().any(|i| i.specifier == "os"));
        let from_import = node.imports.iter().find(|i| i.specifier == ".utils").unwrap();
        assert_eq!(from_import.symbols, ["slugify"]);

        assert!(node
            .variables
            .iter()
            .any(|v| v.name == "VERSION" && v.scope == VariableScope::Global));
        assert!(node
            .variables
            .iter()
            .any(|v| v.name == "title" && v.scope == VariableScope::Class));

        let page = &node.classes[0];
        assert_eq!(page.name, "Page");
        assert_eq!(page.methods[0].name, "render");
        assert!(page.methods[0].calls.contains(&"slugify".to_string()));
    }

    #[test]
    fn extracts_go_struct_and_methods() {
        let source = r#"
package store

import "fmt"

type Cache struct {
    items map[string]string
}

func (c *Cache) Get(key string) string {
    if v, ok := c.items[key]; ok {
        return v
    }
    return ""
}

func NewCache() *Cache {
    fmt.Println("new cache")
    return &Cache{}
}
"#;
        let node = extract("go", "store/cache.go", source);

        assert!(node.imports.iter().any(|i| i.specifier == "fmt"));
        let cache = node.classes.iter().find(|c| c.name == "Cache").unwrap();
        assert_eq!(cache.properties, ["items"]);
        assert_eq!(cache.methods.len(), 1);
        assert_eq!(cache.methods[0].name, "Get");

        assert!(node.exports.contains(&"NewCache".to_string()));
        assert!(node.exports.contains(&"Cache".to_string()));
    }

    #[test]
    fn unsupported_language_falls_back_to_import_scan() {
        let node = extract("unknown", "main.c", "#include <stdio.h>\nint main() {}\n");
        assert_eq!(node.imports.len(), 1);
        assert_eq!(node.imports[0].specifier, "stdio.h");
        assert_eq!(node.imports[0].kind, ImportKind::Include);
        assert!(node.functions.is_empty());
        assert!(node.extraction_error.is_none());
    }

    #[test]
    fn classifies_local_variable_scopes() {
        let source = r#"
const TOP = 1;

function work(flag) {
    const local = 2;
    if (flag) {
        const inner = 3;
        return inner;
    }
    return local;
}
"#;
        let node = extract("javascript", "src/scopes.js", source);

        let scope_of = |name: &str| {
            node.variables
                .iter()
                .find(|v| v.name == name)
                .map(|v| v.scope)
        };
        assert_eq!(scope_of("TOP"), Some(VariableScope::Global));
        assert_eq!(scope_of("local"), Some(VariableScope::Function));
        assert_eq!(scope_of("inner"), Some(VariableScope::Block));
    }

    #[test]
    fn content_hash_is_stable() {
        let a = content_hash("same text");
        let b = content_hash("same text");
        let c = content_hash("other text");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn require_call_becomes_require_import() {
        let node = extract(
            "javascript",
            "src/app.js",
            "const express = require('express');\nconst app = express();\n",
        );
        let require = node
            .imports
            .iter()
            .find(|i| i.kind == ImportKind::Require)
            .unwrap();
        assert_eq!(require.specifier, "express");
        assert!(node.top_level_calls.contains(&"express".to_string()));
    }
}
