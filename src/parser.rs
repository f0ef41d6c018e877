//! Structured text parser.
//!
//! Converts hierarchically blocked, line-oriented command output (status
//! dumps and the like) into a nested key-value tree, driven purely by an
//! ordered list of regular expressions — one per nesting depth. Depth 0 is
//! the outermost block tag, the final depth is the leaf `key: value`
//! pattern. Only the pattern list changes per command; the algorithm never
//! hard-codes a specific grammar.
//!
//! Parsing is lenient by design: malformed input never errors. Lines that
//! match no pattern, or leaf lines outside any open block, are dropped —
//! but every drop is reported back as a [`SkippedLine`] diagnostic so the
//! data loss is observable rather than silent.

use std::collections::BTreeMap;
use std::fmt;

use regex::{Captures, Regex};
use tracing::debug;

/// Interior node map of a parse tree.
pub type ParseMap = BTreeMap<String, ParseNode>;

/// One node of the parse tree: either a leaf value or a nested block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseNode {
    Value(String),
    Block(ParseMap),
}

impl ParseNode {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParseNode::Value(value) => Some(value),
            ParseNode::Block(_) => None,
        }
    }

    pub fn as_block(&self) -> Option<&ParseMap> {
        match self {
            ParseNode::Block(map) => Some(map),
            ParseNode::Value(_) => None,
        }
    }

    pub fn get(&self, key: &str) -> Option<&ParseNode> {
        self.as_block().and_then(|map| map.get(key))
    }
}

impl From<&ParseNode> for serde_json::Value {
    fn from(node: &ParseNode) -> Self {
        match node {
            ParseNode::Value(value) => serde_json::Value::String(value.clone()),
            ParseNode::Block(map) => tree_to_json(map),
        }
    }
}

/// Convert a parse tree into JSON for storage or reporting.
pub fn tree_to_json(map: &ParseMap) -> serde_json::Value {
    serde_json::Value::Object(
        map.iter()
            .map(|(key, node)| (key.clone(), serde_json::Value::from(node)))
            .collect(),
    )
}

/// Why a line was dropped during parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// No pattern at any depth matched the line.
    NoPatternMatched,
    /// A leaf line appeared without an open block at every intermediate
    /// depth, so it belongs to nothing.
    LeafOutsideBlock,
    /// The matched pattern did not produce the expected capture groups.
    MissingCapture,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::NoPatternMatched => write!(f, "no pattern matched"),
            SkipReason::LeafOutsideBlock => write!(f, "leaf line outside any open block"),
            SkipReason::MissingCapture => write!(f, "pattern captured no usable groups"),
        }
    }
}

/// Diagnostic for a dropped input line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedLine {
    /// 1-based line number in the original text.
    pub line_no: usize,
    pub text: String,
    pub reason: SkipReason,
}

/// Result of one `parse` call: the root mapping plus drop diagnostics.
#[derive(Debug, Clone, Default)]
pub struct ParseOutcome {
    pub tree: ParseMap,
    pub skipped: Vec<SkippedLine>,
}

type LineNormalizer = Box<dyn Fn(&str) -> String + Send + Sync>;
type LeafDecomposer = Box<dyn Fn(&Captures) -> Option<(String, String)> + Send + Sync>;

/// Stack-based parser over an ordered list of nesting-level patterns.
///
/// The parser holds no mutable state between calls: `parse` builds its
/// stack locally, so one instance is freely reusable.
pub struct TextParser {
    patterns: Vec<Regex>,
    normalize: LineNormalizer,
    decompose: LeafDecomposer,
}

impl TextParser {
    /// Build a parser from patterns ordered outermost-first. The final
    /// pattern is the leaf `key: value` matcher; every earlier pattern must
    /// capture the block tag as its first group.
    pub fn new<P: AsRef<str>>(patterns: &[P]) -> Result<Self, regex::Error> {
        let compiled = patterns
            .iter()
            .map(|pattern| Regex::new(pattern.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            patterns: compiled,
            normalize: Box::new(|line| line.trim().to_string()),
            decompose: Box::new(default_decompose),
        })
    }

    /// Replace the per-line normalizer (default: trim whitespace).
    pub fn with_normalizer(
        mut self,
        normalize: impl Fn(&str) -> String + Send + Sync + 'static,
    ) -> Self {
        self.normalize = Box::new(normalize);
        self
    }

    /// Replace the leaf decomposer (default: first two capture groups,
    /// trimmed).
    pub fn with_leaf_decomposer(
        mut self,
        decompose: impl Fn(&Captures) -> Option<(String, String)> + Send + Sync + 'static,
    ) -> Self {
        self.decompose = Box::new(decompose);
        self
    }

    /// Parse a body of text into a nested mapping. Blank lines (after
    /// normalization) are discarded; everything else either lands in the
    /// tree or shows up in `skipped`.
    pub fn parse(&self, text: &str) -> ParseOutcome {
        let mut tree = ParseMap::new();
        let mut skipped = Vec::new();
        // Block tag path from the root to the innermost open block; its
        // length is the current open depth.
        let mut open: Vec<String> = Vec::new();

        let leaf_depth = self.patterns.len().saturating_sub(1);

        for (index, raw_line) in text.lines().enumerate() {
            let line_no = index + 1;
            let line = (self.normalize)(raw_line);
            if line.is_empty() {
                continue;
            }

            let matched = self
                .patterns
                .iter()
                .enumerate()
                .find_map(|(depth, pattern)| {
                    pattern.captures(&line).map(|caps| (depth, caps))
                });

            let Some((depth, caps)) = matched else {
                debug!(line_no, line = %line, "no pattern matched");
                skipped.push(SkippedLine {
                    line_no,
                    text: line,
                    reason: SkipReason::NoPatternMatched,
                });
                continue;
            };

            if depth == leaf_depth && !self.patterns.is_empty() && leaf_depth > 0 {
                // Leaf line: only attaches when a block tag is open at
                // every intermediate depth.
                if open.len() != leaf_depth {
                    skipped.push(SkippedLine {
                        line_no,
                        text: line,
                        reason: SkipReason::LeafOutsideBlock,
                    });
                    continue;
                }
                match (self.decompose)(&caps) {
                    Some((key, value)) => {
                        block_at(&mut tree, &open).insert(key, ParseNode::Value(value));
                    }
                    None => skipped.push(SkippedLine {
                        line_no,
                        text: line,
                        reason: SkipReason::MissingCapture,
                    }),
                }
            } else if depth == leaf_depth {
                // Degenerate single-pattern list: there is no depth at
                // which a leaf could attach.
                skipped.push(SkippedLine {
                    line_no,
                    text: line,
                    reason: SkipReason::LeafOutsideBlock,
                });
            } else {
                // Block tag line.
                let Some(tag) = caps.get(1).map(|m| m.as_str().trim().to_string()) else {
                    skipped.push(SkippedLine {
                        line_no,
                        text: line,
                        reason: SkipReason::MissingCapture,
                    });
                    continue;
                };
                // Shallower than the open stack: close blocks back to this
                // depth. Same depth: close the current sibling. Deeper:
                // nest one level down.
                if depth < open.len() {
                    open.truncate(depth);
                }
                // Repeated tag at the same level: last write wins — the
                // fresh block replaces whatever was there.
                block_at(&mut tree, &open).insert(tag.clone(), ParseNode::Block(ParseMap::new()));
                open.push(tag);
            }
        }

        ParseOutcome { tree, skipped }
    }
}

fn default_decompose(caps: &Captures) -> Option<(String, String)> {
    let key = caps.get(1)?.as_str().trim().to_string();
    let value = caps.get(2)?.as_str().trim().to_string();
    Some((key, value))
}

/// Descend to the block addressed by `path`, creating levels as needed.
fn block_at<'a>(root: &'a mut ParseMap, path: &[String]) -> &'a mut ParseMap {
    let mut current = root;
    for key in path {
        let node = current
            .entry(key.clone())
            .or_insert_with(|| ParseNode::Block(ParseMap::new()));
        if !matches!(node, ParseNode::Block(_)) {
            *node = ParseNode::Block(ParseMap::new());
        }
        current = match node {
            ParseNode::Block(map) => map,
            ParseNode::Value(_) => unreachable!("replaced above"),
        };
    }
    current
}
