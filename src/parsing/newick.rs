//! Newick tree reading and writing.
//!
//! The parser accepts rooted, arbitrarily multifurcating trees with labels on
//! any node, optional branch lengths, single-quoted labels (`''` escapes a
//! quote) and `[...]` comments, which are skipped. Underscores are kept
//! literally rather than read as spaces.
//!
//! Both directions are iterative, so very deep (caterpillar) trees cannot
//! exhaust the call stack.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::core::tree::{NodeId, Tree};
use crate::parsing::{read_to_string, ParseError};

/// Characters that force a label to be quoted on output.
const SPECIAL_CHARS: &[char] = &[' ', '\t', '\n', '\r', ',', ';', '(', ')', ':', '[', ']', '\''];

/// Read a (possibly gzipped) Newick file containing one tree.
///
/// # Errors
///
/// Returns `ParseError::Io` if the file cannot be read or
/// `ParseError::InvalidNewick` if its content is malformed.
pub fn read_tree_file(path: &Path) -> Result<Tree, ParseError> {
    let content = read_to_string(path)?;
    parse_newick_str(&content)
}

/// Write a tree as a single Newick line.
///
/// # Errors
///
/// Returns `ParseError::Io` if the file cannot be created or written.
pub fn write_tree_file(tree: &Tree, path: &Path) -> Result<(), ParseError> {
    let file = File::create(path).map_err(|e| ParseError::io(path, e))?;
    let mut writer = BufWriter::new(file);
    writeln!(writer, "{}", to_newick(tree))
        .and_then(|()| writer.flush())
        .map_err(|e| ParseError::io(path, e))
}

/// Parse a single Newick tree terminated by `;`.
///
/// # Errors
///
/// Returns `ParseError::InvalidNewick` with the byte offset of the problem.
pub fn parse_newick_str(text: &str) -> Result<Tree, ParseError> {
    NewickReader::new(text).parse()
}

struct NewickReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> NewickReader<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            bytes: text.as_bytes(),
            pos: 0,
        }
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError::InvalidNewick {
            position: self.pos,
            message: message.into(),
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn consume_if(&mut self, byte: u8) -> bool {
        if self.peek() == Some(byte) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn skip_comment_and_whitespace(&mut self) -> Result<(), ParseError> {
        loop {
            match self.peek() {
                Some(b) if b.is_ascii_whitespace() => self.pos += 1,
                Some(b'[') => {
                    let start = self.pos;
                    match self.bytes[start..].iter().position(|&b| b == b']') {
                        Some(offset) => self.pos = start + offset + 1,
                        None => return Err(self.error("Unterminated comment")),
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    fn parse(mut self) -> Result<Tree, ParseError> {
        let mut tree = Tree::new();
        let root = tree.root();

        self.skip_comment_and_whitespace()?;
        if self.peek().is_none() {
            return Err(self.error("Empty input"));
        }

        if self.consume_if(b'(') {
            self.parse_children(&mut tree, root)?;
        }
        self.parse_label_and_length(&mut tree, root)?;

        self.skip_comment_and_whitespace()?;
        if !self.consume_if(b';') {
            let found = self.peek().map(char::from);
            return Err(self.error(format!("Expected ';' at end of tree but found {found:?}")));
        }
        self.skip_comment_and_whitespace()?;
        if self.peek().is_some() {
            return Err(self.error("Unexpected content after end of tree"));
        }

        Ok(tree)
    }

    /// Parse everything between an already consumed `(` of `top` and its
    /// matching `)`, including nested clades.
    fn parse_children(&mut self, tree: &mut Tree, top: NodeId) -> Result<(), ParseError> {
        let mut open = vec![top];

        while let Some(&parent) = open.last() {
            // one child of `parent`
            self.skip_comment_and_whitespace()?;
            if self.consume_if(b'(') {
                let child = tree.add_child(parent, None, None);
                open.push(child);
                continue;
            }
            let leaf = tree.add_child(parent, None, None);
            self.parse_label_and_length(tree, leaf)?;

            // close as many clades as end here
            loop {
                self.skip_comment_and_whitespace()?;
                if self.consume_if(b',') {
                    break;
                }
                if self.consume_if(b')') {
                    let Some(closed) = open.pop() else {
                        return Err(self.error("Unbalanced ')'"));
                    };
                    if open.is_empty() {
                        // `closed` is `top`; its label is read by the caller
                        return Ok(());
                    }
                    self.parse_label_and_length(tree, closed)?;
                    continue;
                }
                let found = self.peek().map(char::from);
                return Err(self.error(format!("Expected ',' or ')' but found {found:?}")));
            }
        }

        Ok(())
    }

    fn parse_label_and_length(&mut self, tree: &mut Tree, id: NodeId) -> Result<(), ParseError> {
        self.skip_comment_and_whitespace()?;
        let label = self.parse_label()?;
        if !label.is_empty() {
            tree[id].label = Some(label);
        }

        self.skip_comment_and_whitespace()?;
        if self.consume_if(b':') {
            self.skip_comment_and_whitespace()?;
            tree[id].branch_length = Some(self.parse_branch_length()?);
        }
        Ok(())
    }

    fn parse_label(&mut self) -> Result<String, ParseError> {
        if self.consume_if(b'\'') {
            let mut label = Vec::new();
            loop {
                match self.peek() {
                    None => return Err(self.error("Unterminated quoted label")),
                    Some(b'\'') => {
                        self.pos += 1;
                        if self.consume_if(b'\'') {
                            label.push(b'\'');
                        } else {
                            break;
                        }
                    }
                    Some(b) => {
                        label.push(b);
                        self.pos += 1;
                    }
                }
            }
            return String::from_utf8(label).map_err(|_| self.error("Label is not valid UTF-8"));
        }

        let start = self.pos;
        while let Some(b) = self.peek() {
            if b.is_ascii_whitespace() || b"(),:;[]".contains(&b) {
                break;
            }
            self.pos += 1;
        }
        std::str::from_utf8(&self.bytes[start..self.pos])
            .map(str::to_string)
            .map_err(|_| self.error("Label is not valid UTF-8"))
    }

    fn parse_branch_length(&mut self) -> Result<f64, ParseError> {
        let start = self.pos;
        while let Some(b) = self.peek() {
            if !(b.is_ascii_digit() || b"+-.eE".contains(&b)) {
                break;
            }
            self.pos += 1;
        }
        let text = std::str::from_utf8(&self.bytes[start..self.pos]).unwrap_or_default();
        let length: f64 = text
            .parse()
            .map_err(|_| self.error(format!("Invalid branch length '{text}'")))?;
        if !length.is_finite() || length < 0.0 {
            return Err(self.error(format!("Branch length must be non-negative: {text}")));
        }
        Ok(length)
    }
}

/// Serialize a tree to a Newick string terminated by `;`.
///
/// Labels are quoted only when they contain Newick-special characters;
/// underscores are written as-is.
#[must_use]
pub fn to_newick(tree: &Tree) -> String {
    let mut newick = String::new();
    // (node, index of next child to emit)
    let mut stack: Vec<(NodeId, usize)> = vec![(tree.root(), 0)];

    while let Some(top) = stack.last_mut() {
        let (id, next) = *top;
        let children = tree[id].children();

        if children.is_empty() {
            push_label_and_length(&mut newick, tree, id);
            stack.pop();
            continue;
        }

        if next == 0 {
            newick.push('(');
        }
        if next < children.len() {
            if next > 0 {
                newick.push(',');
            }
            top.1 += 1;
            stack.push((children[next], 0));
        } else {
            newick.push(')');
            push_label_and_length(&mut newick, tree, id);
            stack.pop();
        }
    }

    newick.push(';');
    newick
}

fn push_label_and_length(newick: &mut String, tree: &Tree, id: NodeId) {
    let node = &tree[id];
    if let Some(label) = node.label() {
        newick.push_str(&escape_label(label));
    }
    if let Some(length) = node.branch_length {
        newick.push(':');
        newick.push_str(&length.to_string());
    }
}

/// Quote a label if it contains Newick-special characters.
#[must_use]
pub fn escape_label(label: &str) -> String {
    if label.contains(SPECIAL_CHARS) {
        format!("'{}'", label.replace('\'', "''"))
    } else {
        label.to_string()
    }
}
