use super::parsers::{is_block_comment_end, is_block_comment_start, is_line_comment_start};

#[derive(Clone, Copy)]
pub(super) enum State {
    Normal,
    /// Inside a `'literal'`, `"identifier"` or `[identifier]`; holds the closing byte.
    Quoted(u8),
    LineComment,
    BlockComment(u32),
}

/// Iterates the bytes of a batch that sit outside literals, quoted identifiers and comments.
///
/// Only ASCII bytes are ever acted on, so every yielded index is a char boundary.
pub(super) struct TopLevel<'a> {
    bytes: &'a [u8],
    idx: usize,
    state: State,
}

impl<'a> TopLevel<'a> {
    pub(super) fn new(sql: &'a str) -> Self {
        Self {
            bytes: sql.as_bytes(),
            idx: 0,
            state: State::Normal,
        }
    }
}

impl Iterator for TopLevel<'_> {
    type Item = (usize, u8);

    fn next(&mut self) -> Option<Self::Item> {
        while self.idx < self.bytes.len() {
            let idx = self.idx;
            let b = self.bytes[idx];
            self.idx += 1;
            match self.state {
                State::Normal => match b {
                    b'\'' | b'"' => self.state = State::Quoted(b),
                    b'[' => self.state = State::Quoted(b']'),
                    _ if is_line_comment_start(self.bytes, idx) => {
                        self.state = State::LineComment;
                        self.idx += 1;
                    }
                    _ if is_block_comment_start(self.bytes, idx) => {
                        self.state = State::BlockComment(1);
                        self.idx += 1;
                    }
                    _ => return Some((idx, b)),
                },
                State::Quoted(close) => {
                    if b == close {
                        if self.bytes.get(idx + 1) == Some(&close) {
                            self.idx += 1; // doubled quote is an escape
                        } else {
                            self.state = State::Normal;
                        }
                    }
                }
                State::LineComment => {
                    if b == b'\n' {
                        self.state = State::Normal;
                    }
                }
                State::BlockComment(depth) => {
                    if is_block_comment_start(self.bytes, idx) {
                        self.state = State::BlockComment(depth + 1);
                        self.idx += 1;
                    } else if is_block_comment_end(self.bytes, idx) {
                        self.state = if depth == 1 {
                            State::Normal
                        } else {
                            State::BlockComment(depth - 1)
                        };
                        self.idx += 1;
                    }
                }
            }
        }
        None
    }
}

pub(super) fn scan_digits(bytes: &[u8], start: usize) -> Option<(usize, &str)> {
    let mut idx = start;
    while idx < bytes.len() && bytes[idx].is_ascii_digit() {
        idx += 1;
    }
    if idx == start {
        None
    } else {
        std::str::from_utf8(&bytes[start..idx])
            .ok()
            .map(|digits| (idx, digits))
    }
}
