//! Mutation sites: a typed edit to a byte range of one Swift source file.

use std::borrow::Cow;

use console::{style, StyledObject};
use serde::{Deserialize, Serialize};
use similar::TextDiff;
use strum::Display;

use crate::span::splice;

/// The closed set of mutation families the discoverer can emit.
///
/// Serialized names are part of the JSON report format.
#[derive(Clone, Copy, Debug, Display, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum MutationOperator {
    Arithmetic,
    Comparison,
    Logical,
    Bitwise,
    CompoundAssignment,
    Range,
    Boolean,
    Constant,
    ConstantBoundary,
    UnaryRemoval,
    UnarySign,
    ReturnValue,
    TypedReturnDefault,
    GuardNegate,
    ConditionNegate,
    TryMutation,
    CastStrength,
    OptionalChaining,
    TernarySwap,
    StringLiteral,
    NilCoalescing,
    StdlibSemantic,
    ConcurrencyContext,
    TailoredIdentifierLiteral,
    StatementDeletion,
    VoidCallRemoval,
    DeferRemoval,
    LoopControl,
}

/// A single candidate edit within one source file.
///
/// Invariant: the byte range `[byte_offset, byte_offset + byte_length)` of
/// the file this site was discovered in decodes to `original`, and
/// `original != mutated` once the identity filter has run.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct MutationSite {
    #[serde(rename = "mutationOperator")]
    pub operator: MutationOperator,

    /// 1-based line of the start of the site.
    pub line: u32,

    /// 1-based column of the start of the site.
    pub column: u32,

    #[serde(rename = "utf8Offset")]
    pub byte_offset: usize,

    #[serde(rename = "utf8Length")]
    pub byte_length: usize,

    #[serde(rename = "originalText")]
    pub original: String,

    #[serde(rename = "mutatedText")]
    pub mutated: String,
}

impl MutationSite {
    /// Return the whole file with this site's edit applied.
    ///
    /// An out-of-range site returns the input unchanged (see [splice]).
    pub fn apply(&self, source: &str) -> String {
        splice(source, self.byte_offset, self.byte_length, &self.mutated)
    }

    /// Describe the change briefly, not including the location.
    pub fn describe_change(&self) -> String {
        self.styled_parts()
            .into_iter()
            .map(|x| x.force_styling(false).to_string())
            .collect()
    }

    /// One-line description with coloring, like
    /// `Sources/App/Math.swift:3:13: replace + with -`.
    pub fn to_styled_string(&self, file: &str) -> String {
        let mut v = vec![format!("{file}:{}:{}: ", self.line, self.column)];
        v.extend(self.styled_parts().into_iter().map(|x| x.to_string()));
        v.join("")
    }

    fn styled_parts(&self) -> Vec<StyledObject<String>> {
        fn s<S: ToString>(s: S) -> StyledObject<String> {
            style(s.to_string())
        }
        let mut v: Vec<StyledObject<String>> = Vec::new();
        if self.mutated.is_empty() {
            v.push(s("delete "));
            v.push(s(squash_lines(&self.original)).yellow());
        } else {
            v.push(s("replace "));
            v.push(s(squash_lines(&self.original)).yellow());
            v.push(s(" with "));
            v.push(s(squash_lines(&self.mutated)).bright().yellow());
        }
        v.push(s(" ("));
        v.push(s(self.operator).cyan());
        v.push(s(")"));
        v
    }

    /// Return a unified diff of the whole file against the mutated file.
    pub fn diff(&self, file: &str, source: &str) -> String {
        let mutated_code = self.apply(source);
        let new_label = self.describe_change().replace('\n', " ");
        TextDiff::from_lines(source, &mutated_code)
            .unified_diff()
            .context_radius(4)
            .header(file, &new_label)
            .to_string()
    }
}

/// The equivalence filter: drop sites whose replacement text equals the text
/// they replace. Everything else is conservatively kept.
pub fn discard_identity_sites(sites: Vec<MutationSite>) -> Vec<MutationSite> {
    sites.into_iter().filter(|s| s.original != s.mutated).collect()
}

/// Combine multiple lines to one, removing indentation following a newline.
fn squash_lines(s: &str) -> Cow<'_, str> {
    if s.contains('\n') {
        let mut r = String::new();
        let mut in_indent = false;
        for c in s.chars() {
            match c {
                ' ' | '\t' | '\n' if in_indent => (),
                '\n' => {
                    if !r.ends_with(' ') {
                        r.push(' ');
                    }
                    in_indent = true;
                }
                c => {
                    in_indent = false;
                    r.push(c);
                }
            }
        }
        Cow::Owned(r)
    } else {
        Cow::Borrowed(s)
    }
}
