//! Walk the syntax tree of one Swift source file to discover mutation sites.
//!
//! Discovery is pure: the same source text always yields the same sequence of
//! sites, emitted in document order with ties broken by the fixed order in
//! which each handler emits its variants. The walker carries an explicit
//! stack of enclosing function return types so typed return defaults need no
//! global state.
//!
//! Operator tokens are matched by their token text (tree-sitter anonymous
//! nodes are named after the text they match), with the parent node kind used
//! to separate, say, a binary minus from a prefix sign or a generic
//! angle-bracket from a comparison.

use anyhow::Context as _;
use tree_sitter::{Node, Parser, Point};
use tracing::trace;

use crate::mutant::{MutationOperator, MutationSite};
use crate::span::LineColumn;
use crate::Result;

use MutationOperator::*;

/// Discover all mutation sites in `source`, in deterministic order.
///
/// `file_name` is used only for error messages. The identity filter is not
/// applied here; callers run [crate::mutant::discard_identity_sites] on the
/// result.
pub fn discover(source: &str, file_name: &str) -> Result<Vec<MutationSite>> {
    let mut parser = Parser::new();
    parser
        .set_language(&tree_sitter_swift::LANGUAGE.into())
        .context("load Swift grammar")?;
    let tree = parser
        .parse(source, None)
        .with_context(|| format!("failed to parse {file_name}"))?;
    let mut visitor = DiscoveryVisitor {
        source,
        sites: Vec::new(),
        return_stack: Vec::new(),
        literal_pool: collect_literal_pool(tree.root_node(), source),
        decl_initializer_depth: 0,
    };
    visitor.visit(tree.root_node());
    Ok(visitor.sites)
}

struct DiscoveryVisitor<'s> {
    source: &'s str,

    /// Sites accumulated so far, in emission order.
    sites: Vec<MutationSite>,

    /// Default replacement value for the return type of each enclosing
    /// function, innermost last. Closures push `None`.
    return_stack: Vec<Option<&'static str>>,

    /// Identifier-like string literal contents from this file, in document
    /// order, for the tailored literal swap.
    literal_pool: Vec<String>,

    /// Nonzero while inside a property declaration's initializer, where
    /// statement-level deletions must not be generated.
    decl_initializer_depth: u32,
}

impl<'s> DiscoveryVisitor<'s> {
    /// The source text of a node; tied to the source, not to `self`, so it
    /// can be held across site collection.
    fn text(&self, node: Node<'_>) -> &'s str {
        let source: &'s str = self.source;
        &source[node.byte_range()]
    }

    fn push_site(
        &mut self,
        operator: MutationOperator,
        start: usize,
        end: usize,
        position: Point,
        mutated: String,
    ) {
        let original = self.source[start..end].to_owned();
        trace!(?operator, start, %original, %mutated, "collect site");
        let lc = LineColumn::from(position);
        self.sites.push(MutationSite {
            operator,
            line: lc.line,
            column: lc.column,
            byte_offset: start,
            byte_length: end - start,
            original,
            mutated,
        });
    }

    fn push_node_site(&mut self, operator: MutationOperator, node: Node<'_>, mutated: String) {
        self.push_site(
            operator,
            node.start_byte(),
            node.end_byte(),
            node.start_position(),
            mutated,
        );
    }

    fn visit(&mut self, node: Node<'_>) {
        if node.child_count() == 0 {
            self.visit_token(node);
            return;
        }
        let kind = node.kind();
        match kind {
            "function_declaration" => return self.visit_function(node),
            "lambda_literal" => return self.visit_closure(node),
            "boolean_literal" => return self.visit_boolean(node),
            "integer_literal" => return self.visit_integer(node),
            "line_string_literal" => self.visit_string_literal(node),
            "guard_statement" => self.visit_single_condition(node, GuardNegate),
            "if_statement" | "while_statement" => self.visit_single_condition(node, ConditionNegate),
            "call_expression" => self.visit_call(node),
            "statements" => self.visit_statements(node),
            k if k.contains("ternary") => self.visit_ternary(node),
            k if k.contains("property_declaration") => return self.visit_property(node),
            _ => {}
        }
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            self.visit(child);
        }
    }

    /// Handle a leaf node: either a named literal the grammar lexes in one
    /// piece, or an anonymous keyword/operator token.
    fn visit_token(&mut self, node: Node<'_>) {
        match node.kind() {
            "boolean_literal" => self.visit_boolean(node),
            "integer_literal" => self.visit_integer(node),
            "line_string_literal" => self.visit_string_literal(node),
            "true" | "false" if !node.is_named() => self.visit_boolean(node),
            "return" => self.visit_return(node),
            "break" | "continue" => self.visit_loop_control(node),
            "defer" => self.visit_defer(node),
            "try" | "try?" | "try!" | "try_operator" => self.visit_try(node),
            "as" | "as?" | "as!" => self.visit_cast(node),
            "?." => self.push_node_site(OptionalChaining, node, "!.".to_owned()),
            _ => self.visit_operator_token(node),
        }
    }

    fn visit_operator_token(&mut self, node: Node<'_>) {
        let token = self.text(node);
        if node.kind() != token {
            return; // named leaf (identifier, string fragment, ...)
        }
        let parent_kind = node.parent().map_or("", |p| p.kind());
        if parent_kind.contains("prefix") {
            match token {
                "!" => self.push_node_site(UnaryRemoval, node, String::new()),
                "~" => self.push_node_site(Bitwise, node, String::new()),
                "+" => self.push_node_site(UnarySign, node, "-".to_owned()),
                "-" => self.push_node_site(UnarySign, node, "+".to_owned()),
                _ => {}
            }
            return;
        }
        match token {
            "?" => return self.visit_question(node, parent_kind),
            "??" => return self.visit_nil_coalescing(node, parent_kind),
            _ => {}
        }
        if !expression_context(parent_kind) {
            return;
        }
        let (replacement, operator) = match token {
            "+" => ("-", Arithmetic),
            "-" => ("+", Arithmetic),
            "*" => ("/", Arithmetic),
            "/" => ("*", Arithmetic),
            "%" => ("*", Arithmetic),
            ">" => (">=", Comparison),
            ">=" => (">", Comparison),
            "<" => ("<=", Comparison),
            "<=" => ("<", Comparison),
            "==" => ("!=", Comparison),
            "!=" => ("==", Comparison),
            "&&" => ("||", Logical),
            "||" => ("&&", Logical),
            "&" => ("|", Bitwise),
            "|" => ("&", Bitwise),
            "^" => ("&", Bitwise),
            "<<" => (">>", Bitwise),
            ">>" => ("<<", Bitwise),
            "..<" => ("...", Range),
            "..." => ("..<", Range),
            "+=" => ("-=", CompoundAssignment),
            "-=" => ("+=", CompoundAssignment),
            "*=" => ("/=", CompoundAssignment),
            "/=" => ("*=", CompoundAssignment),
            "&=" => ("|=", CompoundAssignment),
            "|=" => ("&=", CompoundAssignment),
            "<<=" => (">>=", CompoundAssignment),
            ">>=" => ("<<=", CompoundAssignment),
            _ => return,
        };
        self.push_node_site(operator, node, replacement.to_owned());
    }

    /// A lone `?` token is optional chaining when a `.` follows directly;
    /// the `?` of a ternary is excluded by its parent kind, and optional
    /// type annotations never have a `.` suffix.
    fn visit_question(&mut self, node: Node<'_>, parent_kind: &str) {
        if parent_kind.contains("ternary") {
            return;
        }
        let start = node.start_byte();
        if self.source.as_bytes().get(start + 1) == Some(&b'.') {
            self.push_site(
                OptionalChaining,
                start,
                start + 2,
                node.start_position(),
                "!.".to_owned(),
            );
        }
    }

    /// `lhs ?? rhs` mutates to just `rhs`, and to `(lhs)!`.
    fn visit_nil_coalescing(&mut self, node: Node<'_>, parent_kind: &str) {
        if !(parent_kind.contains("coalescing") || expression_context(parent_kind)) {
            return;
        }
        let Some(parent) = node.parent() else { return };
        let mut cursor = parent.walk();
        let operands: Vec<Node> = parent.named_children(&mut cursor).collect();
        let [lhs, rhs] = operands[..] else { return };
        let rhs_text = self.text(rhs).to_owned();
        let lhs_text = self.text(lhs).to_owned();
        self.push_node_site(NilCoalescing, parent, rhs_text);
        self.push_node_site(NilCoalescing, parent, format!("({lhs_text})!"));
    }

    fn visit_try(&mut self, node: Node<'_>) {
        let end = node.end_byte();
        match self.text(node) {
            "try" => {
                // Some grammar versions lex the suffix as a separate token;
                // in that case the compound token path handles the swap.
                match self.source.as_bytes().get(end) {
                    Some(b'?') | Some(b'!') => {}
                    _ => {
                        self.push_node_site(TryMutation, node, "try?".to_owned());
                        self.push_node_site(TryMutation, node, "try!".to_owned());
                    }
                }
            }
            "try?" => self.push_node_site(TryMutation, node, "try!".to_owned()),
            "try!" => self.push_node_site(TryMutation, node, "try?".to_owned()),
            _ => {}
        }
    }

    fn visit_cast(&mut self, node: Node<'_>) {
        match self.text(node) {
            // A plain `as` cast emits nothing.
            "as?" => self.push_node_site(CastStrength, node, "as!".to_owned()),
            "as!" => self.push_node_site(CastStrength, node, "as?".to_owned()),
            _ => {}
        }
    }

    fn visit_boolean(&mut self, node: Node<'_>) {
        let mutated = match self.text(node) {
            "true" => "false",
            "false" => "true",
            _ => return,
        };
        self.push_node_site(Boolean, node, mutated.to_owned());
    }

    fn visit_integer(&mut self, node: Node<'_>) {
        let text = self.text(node);
        match text {
            "0" => self.push_node_site(Constant, node, "1".to_owned()),
            "1" => self.push_node_site(Constant, node, "0".to_owned()),
            _ => {
                let lower = text.to_ascii_lowercase();
                if lower.starts_with("0x") || lower.starts_with("0b") || lower.starts_with("0o") {
                    return;
                }
                let digits: String = text.chars().filter(|c| *c != '_').collect();
                let Ok(value) = digits.parse::<u64>() else {
                    return;
                };
                if let Some(up) = value.checked_add(1) {
                    self.push_node_site(ConstantBoundary, node, up.to_string());
                }
                if value > 0 {
                    self.push_node_site(ConstantBoundary, node, (value - 1).to_string());
                }
            }
        }
    }

    fn visit_string_literal(&mut self, node: Node<'_>) {
        let mut cursor = node.walk();
        if node
            .named_children(&mut cursor)
            .any(|c| c.kind().contains("interpolation"))
        {
            return;
        }
        let text = self.text(node);
        if text.len() < 2 || !text.starts_with('"') || !text.ends_with('"') {
            return;
        }
        if text == "\"\"" {
            return; // already the empty-string target
        }
        self.push_node_site(StringLiteral, node, "\"\"".to_owned());
        let content = &text[1..text.len() - 1];
        if is_identifier_like(content) {
            let pooled = self
                .literal_pool
                .iter()
                .find(|pooled| pooled.as_str() != content)
                .cloned();
            if let Some(other) = pooled {
                let mutated = format!("\"{other}\"");
                self.push_node_site(TailoredIdentifierLiteral, node, mutated);
            }
        }
    }

    /// `cond ? a : b` becomes `cond ? b : a`.
    fn visit_ternary(&mut self, node: Node<'_>) {
        let mut cursor = node.walk();
        let parts: Vec<Node> = node.named_children(&mut cursor).collect();
        if parts.len() < 3 {
            return;
        }
        let (cond, then_arm, else_arm) = (parts[0], parts[1], parts[2]);
        let mutated = format!(
            "{} ? {} : {}",
            self.text(cond),
            self.text(else_arm),
            self.text(then_arm)
        );
        self.push_node_site(TernarySwap, node, mutated);
    }

    /// Negate the condition of a guard/if/while that has exactly one plain
    /// boolean clause. Bindings, availability checks and multi-clause
    /// conditions are left alone, as are conditions already starting with `!`
    /// (those are covered by unary removal).
    fn visit_single_condition(&mut self, node: Node<'_>, operator: MutationOperator) {
        let mut conditions = Vec::new();
        let mut cursor = node.walk();
        for child in node.named_children(&mut cursor) {
            let kind = child.kind();
            if kind == "statements" || kind.ends_with("_block") || kind == "if_statement" {
                break; // reached the body or an else-branch
            }
            conditions.push(child);
        }
        let [condition] = conditions[..] else { return };
        let kind = condition.kind();
        if kind.contains("binding") || kind.contains("availability") || kind.contains("pattern") {
            return;
        }
        let text = self.text(condition);
        if text.starts_with('!') {
            return;
        }
        let mutated = format!("!({text})");
        self.push_node_site(operator, condition, mutated);
    }

    fn visit_call(&mut self, node: Node<'_>) {
        let Some(callee) = node.named_child(0) else {
            return;
        };
        match callee.kind() {
            "simple_identifier" => match self.text(callee) {
                "min" => self.push_node_site(StdlibSemantic, callee, "max".to_owned()),
                "max" => self.push_node_site(StdlibSemantic, callee, "min".to_owned()),
                "Task" => self.push_node_site(ConcurrencyContext, callee, "Task.detached".to_owned()),
                _ => {}
            },
            k if k.contains("navigation") => {
                let callee_text = self.text(callee);
                if callee_text == "Task.detached" {
                    self.push_node_site(ConcurrencyContext, callee, "Task".to_owned());
                } else if callee_text.ends_with(".min") || callee_text.ends_with(".max") {
                    if let Some(name) = last_simple_identifier(callee) {
                        let mutated = match self.text(name) {
                            "min" => "max",
                            "max" => "min",
                            _ => return,
                        };
                        self.push_node_site(StdlibSemantic, name, mutated.to_owned());
                    }
                }
            }
            _ => {}
        }
    }

    /// Emit statement-level deletions for the direct children of a statement
    /// list: assignments, and calls optionally wrapped in `try`/`await`.
    /// Declarations and comparisons used as statements stay.
    fn visit_statements(&mut self, node: Node<'_>) {
        if self.decl_initializer_depth > 0 {
            return;
        }
        let mut cursor = node.walk();
        for stmt in node.named_children(&mut cursor) {
            match stmt.kind() {
                "assignment" => self.push_node_site(StatementDeletion, stmt, String::new()),
                "call_expression" => self.push_node_site(VoidCallRemoval, stmt, String::new()),
                k if k.contains("try") || k.contains("await") => {
                    if unwraps_to_call(stmt) {
                        self.push_node_site(VoidCallRemoval, stmt, String::new());
                    }
                }
                _ => {}
            }
        }
    }

    fn visit_return(&mut self, node: Node<'_>) {
        let Some(parent) = node.parent() else { return };
        let mut cursor = parent.walk();
        let value = parent
            .named_children(&mut cursor)
            .find(|c| c.start_byte() >= node.end_byte());
        let Some(value) = value else {
            return; // a bare `return` in a Void context
        };
        let start = node.start_byte();
        let end = value.end_byte();
        let position = node.start_position();
        self.push_site(ReturnValue, start, end, position, "return".to_owned());
        if let Some(default) = self.return_stack.last().copied().flatten() {
            if self.text(value) != default {
                self.push_site(
                    TypedReturnDefault,
                    start,
                    end,
                    position,
                    format!("return {default}"),
                );
            }
        }
    }

    /// `continue` <-> `break`, but only when the transfer targets a loop.
    /// The ancestor walk stops at the nearest loop, switch, or function
    /// boundary, whichever comes first.
    fn visit_loop_control(&mut self, node: Node<'_>) {
        let mut ancestor = node.parent();
        let targets_loop = loop {
            let Some(a) = ancestor else { break false };
            let kind = a.kind();
            if kind == "for_statement"
                || kind == "while_statement"
                || kind.contains("repeat")
            {
                break true;
            }
            if kind.contains("switch") {
                break false;
            }
            if kind == "function_declaration" || kind == "lambda_literal" {
                break false;
            }
            ancestor = a.parent();
        };
        if !targets_loop {
            return;
        }
        let mutated = match node.kind() {
            "continue" => "break",
            "break" => "continue",
            _ => return,
        };
        self.push_node_site(LoopControl, node, mutated.to_owned());
    }

    /// Remove a whole `defer { ... }` statement.
    fn visit_defer(&mut self, node: Node<'_>) {
        let span_end = match node.parent() {
            Some(p) if p.start_byte() == node.start_byte() && p.kind() != "statements" => {
                p.end_byte()
            }
            _ => match node.next_sibling() {
                Some(block) => block.end_byte(),
                None => return,
            },
        };
        self.push_site(
            DeferRemoval,
            node.start_byte(),
            span_end,
            node.start_position(),
            String::new(),
        );
    }

    fn visit_function(&mut self, node: Node<'_>) {
        let default = self.function_return_default(node);
        self.return_stack.push(default);
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            self.visit(child);
        }
        self.return_stack.pop();
    }

    fn visit_closure(&mut self, node: Node<'_>) {
        // A closure body is a fresh context: typed return defaults do not
        // apply, and statement deletion is allowed again.
        self.return_stack.push(None);
        let saved_depth = std::mem::take(&mut self.decl_initializer_depth);
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            self.visit(child);
        }
        self.decl_initializer_depth = saved_depth;
        self.return_stack.pop();
    }

    fn visit_property(&mut self, node: Node<'_>) {
        self.decl_initializer_depth += 1;
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            self.visit(child);
        }
        self.decl_initializer_depth -= 1;
    }

    /// The declared return type of a function, as the default value to return
    /// in its place, if the type is in the table of defaults.
    fn function_return_default(&self, node: Node<'_>) -> Option<&'static str> {
        let mut cursor = node.walk();
        let mut saw_arrow = false;
        for child in node.children(&mut cursor) {
            if saw_arrow && child.is_named() {
                return classify_return_type(self.text(child), child.kind());
            }
            if child.kind() == "->" {
                saw_arrow = true;
            }
        }
        None
    }
}

fn classify_return_type(text: &str, kind: &str) -> Option<&'static str> {
    let t = text.trim();
    if kind.contains("optional") || t.ends_with('?') || t.ends_with('!') {
        return Some("nil");
    }
    match t {
        "Bool" => Some("false"),
        "String" => Some("\"\""),
        "Int" | "Int8" | "Int16" | "Int32" | "Int64" | "UInt" | "UInt8" | "UInt16" | "UInt32"
        | "UInt64" | "Double" | "Float" | "Float16" | "CGFloat" => Some("0"),
        _ => None,
    }
}

/// True when an operator token's parent puts it in expression position,
/// rather than in a type, generic argument list, or parameter list.
fn expression_context(parent_kind: &str) -> bool {
    parent_kind.ends_with("_expression")
        || parent_kind.ends_with("_operation")
        || parent_kind.contains("range")
        || parent_kind.contains("binary")
        || parent_kind == "assignment"
}

fn is_identifier_like(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Does this statement, once `try`/`await` wrappers are stripped, end in a
/// plain call?
fn unwraps_to_call(node: Node<'_>) -> bool {
    let kind = node.kind();
    if kind == "call_expression" {
        return true;
    }
    if kind.contains("try") || kind.contains("await") {
        let count = node.named_child_count();
        if count > 0 {
            if let Some(inner) = node.named_child(count - 1) {
                return unwraps_to_call(inner);
            }
        }
    }
    false
}

fn last_simple_identifier(node: Node<'_>) -> Option<Node<'_>> {
    let mut found: Option<Node> = None;
    let mut stack = vec![node];
    while let Some(n) = stack.pop() {
        if n.kind() == "simple_identifier"
            && found.map_or(true, |f| n.start_byte() > f.start_byte())
        {
            found = Some(n);
        }
        let mut cursor = n.walk();
        for child in n.children(&mut cursor) {
            stack.push(child);
        }
    }
    found
}

/// First pass: gather identifier-like string literal contents, in document
/// order, deduplicated.
fn collect_literal_pool(root: Node<'_>, source: &str) -> Vec<String> {
    let mut pool: Vec<String> = Vec::new();
    let mut stack = vec![root];
    let mut ordered = Vec::new();
    while let Some(node) = stack.pop() {
        ordered.push(node);
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            stack.push(child);
        }
    }
    // The explicit stack yields nodes in reverse sibling order; sort by
    // position to restore document order.
    ordered.sort_by_key(|n| n.start_byte());
    for node in ordered {
        if node.kind() != "line_string_literal" {
            continue;
        }
        let mut cursor = node.walk();
        if node
            .named_children(&mut cursor)
            .any(|c| c.kind().contains("interpolation"))
        {
            continue;
        }
        let text = &source[node.byte_range()];
        if text.len() < 2 || !text.starts_with('"') || !text.ends_with('"') {
            continue;
        }
        let content = &text[1..text.len() - 1];
        if is_identifier_like(content) && !pool.iter().any(|p| p.as_str() == content) {
            pool.push(content.to_owned());
        }
    }
    pool
}

#[cfg(test)]
mod test {
    use indoc::indoc;
    use itertools::Itertools;
    use pretty_assertions::assert_eq;

    use super::*;

    fn sites_for(source: &str) -> Vec<MutationSite> {
        crate::mutant::discard_identity_sites(discover(source, "Test.swift").unwrap())
    }

    fn with_operator(sites: &[MutationSite], operator: MutationOperator) -> Vec<&MutationSite> {
        sites.iter().filter(|s| s.operator == operator).collect()
    }

    /// Every emitted site must address the bytes it claims to replace.
    fn assert_ranges_hold(source: &str, sites: &[MutationSite]) {
        for site in sites {
            assert_eq!(
                &source[site.byte_offset..site.byte_offset + site.byte_length],
                site.original,
                "byte range mismatch for {site:?}"
            );
            assert_ne!(site.original, site.mutated, "identity site {site:?}");
        }
    }

    #[test]
    fn arithmetic_swap_in_function_body() {
        let source = indoc! {r#"
            func add(a: Int, b: Int) -> Int {
                return a + b
            }
        "#};
        let sites = sites_for(source);
        assert_ranges_hold(source, &sites);
        let plus = with_operator(&sites, Arithmetic);
        assert_eq!(plus.len(), 1);
        assert_eq!(plus[0].original, "+");
        assert_eq!(plus[0].mutated, "-");
        assert_eq!(plus[0].line, 2);
    }

    #[test]
    fn return_value_and_typed_default() {
        let source = indoc! {r#"
            func add(a: Int, b: Int) -> Int {
                return a + b
            }
        "#};
        let sites = sites_for(source);
        let returns = with_operator(&sites, ReturnValue);
        assert_eq!(returns.len(), 1);
        assert_eq!(returns[0].original, "return a + b");
        assert_eq!(returns[0].mutated, "return");
        let defaults = with_operator(&sites, TypedReturnDefault);
        assert_eq!(defaults.len(), 1);
        assert_eq!(defaults[0].mutated, "return 0");
    }

    #[test]
    fn typed_default_not_emitted_when_textually_equal() {
        let source = indoc! {r#"
            func zero() -> Int {
                return 0
            }
        "#};
        let sites = sites_for(source);
        assert_eq!(with_operator(&sites, ReturnValue).len(), 1);
        assert_eq!(with_operator(&sites, TypedReturnDefault).len(), 0);
    }

    #[test]
    fn boolean_literal_swaps() {
        let source = indoc! {r#"
            func enabled() -> Bool {
                let flag = true
                return flag
            }
        "#};
        let sites = sites_for(source);
        assert_ranges_hold(source, &sites);
        let booleans = with_operator(&sites, Boolean);
        assert_eq!(booleans.len(), 1);
        assert_eq!((booleans[0].original.as_str(), booleans[0].mutated.as_str()), ("true", "false"));
        // return flag -> return / return false
        assert_eq!(with_operator(&sites, TypedReturnDefault)[0].mutated, "return false");
    }

    #[test]
    fn integer_constants_and_boundaries() {
        let source = indoc! {r#"
            func f() {
                let a = 0
                let b = 1
                let c = 7
                let d = 0xFF
            }
        "#};
        let sites = sites_for(source);
        assert_ranges_hold(source, &sites);
        let constants = with_operator(&sites, Constant);
        assert_eq!(
            constants
                .iter()
                .map(|s| (s.original.as_str(), s.mutated.as_str()))
                .collect_vec(),
            [("0", "1"), ("1", "0")]
        );
        let boundaries = with_operator(&sites, ConstantBoundary);
        assert_eq!(
            boundaries
                .iter()
                .map(|s| (s.original.as_str(), s.mutated.as_str()))
                .collect_vec(),
            [("7", "8"), ("7", "6")],
            "hex literals are excluded"
        );
    }

    #[test]
    fn comparison_and_logical_swaps() {
        let source = indoc! {r#"
            func check(a: Int, b: Int, p: Bool, q: Bool) -> Bool {
                return a < b && p || q
            }
        "#};
        let sites = sites_for(source);
        assert_ranges_hold(source, &sites);
        let cmp = with_operator(&sites, Comparison);
        assert_eq!(cmp.len(), 1);
        assert_eq!((cmp[0].original.as_str(), cmp[0].mutated.as_str()), ("<", "<="));
        let logical: Vec<_> = with_operator(&sites, Logical)
            .iter()
            .map(|s| (s.original.clone(), s.mutated.clone()))
            .collect();
        assert!(logical.contains(&("&&".into(), "||".into())));
        assert!(logical.contains(&("||".into(), "&&".into())));
    }

    #[test]
    fn compound_assignment_swap() {
        let source = indoc! {r#"
            func bump(total: inout Int, x: Int) {
                total += x
            }
        "#};
        let sites = sites_for(source);
        let compound = with_operator(&sites, CompoundAssignment);
        assert_eq!(compound.len(), 1);
        assert_eq!(
            (compound[0].original.as_str(), compound[0].mutated.as_str()),
            ("+=", "-=")
        );
        // The assignment statement itself is also deletable.
        let deletions = with_operator(&sites, StatementDeletion);
        assert_eq!(deletions.len(), 1);
        assert_eq!(deletions[0].original, "total += x");
        assert_eq!(deletions[0].mutated, "");
    }

    #[test]
    fn guard_condition_negated_once() {
        let source = indoc! {r#"
            func positive(x: Int) -> Bool {
                guard x > 0 else {
                    return false
                }
                return true
            }
        "#};
        let sites = sites_for(source);
        assert_ranges_hold(source, &sites);
        let guards = with_operator(&sites, GuardNegate);
        assert_eq!(guards.len(), 1);
        assert_eq!(guards[0].original, "x > 0");
        assert_eq!(guards[0].mutated, "!(x > 0)");
    }

    #[test]
    fn multi_clause_conditions_are_not_negated() {
        let source = indoc! {r#"
            func f(a: Bool, b: Bool) {
                if a, b {
                    work()
                }
            }
        "#};
        let sites = sites_for(source);
        assert_eq!(with_operator(&sites, ConditionNegate).len(), 0);
    }

    #[test]
    fn already_negated_condition_is_skipped() {
        let source = indoc! {r#"
            func f(a: Bool) {
                if !a {
                    work()
                }
            }
        "#};
        let sites = sites_for(source);
        assert_eq!(with_operator(&sites, ConditionNegate).len(), 0);
        // The prefix bang itself is still removable.
        let removals = with_operator(&sites, UnaryRemoval);
        assert_eq!(removals.len(), 1);
        assert_eq!(removals[0].original, "!");
        assert_eq!(removals[0].mutated, "");
    }

    #[test]
    fn string_literal_to_empty_and_tailored_swap() {
        let source = indoc! {r#"
            func keys() -> [String] {
                let first = "alpha"
                let second = "beta"
                let spaced = "not an identifier"
                return [first, second, spaced]
            }
        "#};
        let sites = sites_for(source);
        assert_ranges_hold(source, &sites);
        let empties = with_operator(&sites, StringLiteral);
        assert_eq!(empties.len(), 3);
        assert!(empties.iter().all(|s| s.mutated == "\"\""));
        let tailored = with_operator(&sites, TailoredIdentifierLiteral);
        assert_eq!(
            tailored
                .iter()
                .map(|s| (s.original.as_str(), s.mutated.as_str()))
                .collect_vec(),
            [("\"alpha\"", "\"beta\""), ("\"beta\"", "\"alpha\"")],
            "each identifier literal swaps to the first distinct pool member"
        );
    }

    #[test]
    fn empty_string_literal_is_not_emitted() {
        let source = indoc! {r#"
            func f() -> String {
                let nothing = ""
                return nothing
            }
        "#};
        let sites = sites_for(source);
        assert_eq!(with_operator(&sites, StringLiteral).len(), 0);
    }

    #[test]
    fn try_marker_mutations() {
        let source = indoc! {r#"
            func load() throws -> Int {
                let value = try decode()
                return value
            }
        "#};
        let sites = sites_for(source);
        assert_ranges_hold(source, &sites);
        let tries = with_operator(&sites, TryMutation);
        assert_eq!(
            tries
                .iter()
                .map(|s| s.mutated.as_str())
                .collect_vec(),
            ["try?", "try!"]
        );
        assert!(tries.iter().all(|s| s.original == "try"));
    }

    #[test]
    fn nil_coalescing_mutations() {
        let source = indoc! {r#"
            func name(given: String?) -> String {
                return given ?? "anonymous"
            }
        "#};
        let sites = sites_for(source);
        assert_ranges_hold(source, &sites);
        let coalescing = with_operator(&sites, NilCoalescing);
        assert_eq!(coalescing.len(), 2);
        assert_eq!(coalescing[0].mutated, "\"anonymous\"");
        assert_eq!(coalescing[1].mutated, "(given)!");
        assert!(coalescing.iter().all(|s| s.original.contains("??")));
    }

    #[test]
    fn ternary_arms_swap() {
        let source = indoc! {r#"
            func pick(flag: Bool, a: Int, b: Int) -> Int {
                return flag ? a : b
            }
        "#};
        let sites = sites_for(source);
        let ternary = with_operator(&sites, TernarySwap);
        assert_eq!(ternary.len(), 1);
        assert_eq!(ternary[0].mutated, "flag ? b : a");
    }

    #[test]
    fn min_max_call_rename() {
        let source = indoc! {r#"
            func clamp(a: Int, b: Int) -> Int {
                return min(a, b)
            }
        "#};
        let sites = sites_for(source);
        let stdlib = with_operator(&sites, StdlibSemantic);
        assert_eq!(stdlib.len(), 1);
        assert_eq!((stdlib[0].original.as_str(), stdlib[0].mutated.as_str()), ("min", "max"));
    }

    #[test]
    fn loop_control_inside_loop_but_not_switch() {
        let source = indoc! {r#"
            func scan(xs: [Int]) {
                for x in xs {
                    if x == 0 {
                        continue
                    }
                    switch x {
                    case 1:
                        break
                    default:
                        break
                    }
                }
            }
        "#};
        let sites = sites_for(source);
        let controls = with_operator(&sites, LoopControl);
        assert_eq!(controls.len(), 1, "breaks inside the switch must not count");
        assert_eq!((controls[0].original.as_str(), controls[0].mutated.as_str()), ("continue", "break"));
    }

    #[test]
    fn void_call_and_defer_removal() {
        let source = indoc! {r#"
            func run() {
                defer {
                    finish()
                }
                work()
            }
        "#};
        let sites = sites_for(source);
        assert_ranges_hold(source, &sites);
        let defers = with_operator(&sites, DeferRemoval);
        assert_eq!(defers.len(), 1);
        assert!(defers[0].original.starts_with("defer"));
        assert_eq!(defers[0].mutated, "");
        let calls = with_operator(&sites, VoidCallRemoval);
        assert!(calls.iter().any(|s| s.original == "work()"));
    }

    #[test]
    fn discovery_is_deterministic() {
        let source = indoc! {r#"
            func mix(a: Int, b: Int, flag: Bool) -> Int {
                let label = "total"
                var total = a
                if flag {
                    total += b
                }
                log(label)
                return total > 0 ? total : 0
            }
        "#};
        let first = discover(source, "Test.swift").unwrap();
        let second = discover(source, "Test.swift").unwrap();
        assert_eq!(first, second);
        assert!(!first.is_empty());
        assert_ranges_hold(source, &crate::mutant::discard_identity_sites(first));
    }

    #[test]
    fn site_at_offset_zero_mutates_the_file_prefix() {
        // Top-level code: the first token of the file is mutable.
        let source = "print(\"boot\")\n";
        let sites = sites_for(source);
        let strings = with_operator(&sites, StringLiteral);
        assert_eq!(strings.len(), 1);
        let mutated = strings[0].apply(source);
        assert_eq!(mutated, "print(\"\")\n");
    }
}
