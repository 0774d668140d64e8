use super::scanner::TopLevel;

pub(super) fn is_line_comment_start(bytes: &[u8], idx: usize) -> bool {
    bytes.get(idx) == Some(&b'-') && bytes.get(idx + 1) == Some(&b'-')
}

pub(super) fn is_block_comment_start(bytes: &[u8], idx: usize) -> bool {
    bytes.get(idx) == Some(&b'/') && bytes.get(idx + 1) == Some(&b'*')
}

pub(super) fn is_block_comment_end(bytes: &[u8], idx: usize) -> bool {
    bytes.get(idx) == Some(&b'*') && bytes.get(idx + 1) == Some(&b'/')
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// Words outside literals and comments, in order.
pub(super) fn top_level_words(sql: &str) -> Vec<&str> {
    let mut words = Vec::new();
    let mut start: Option<usize> = None;
    let mut last = 0;
    for (idx, b) in TopLevel::new(sql) {
        let contiguous = start.is_some() && idx == last + 1;
        if is_word_byte(b) {
            if !contiguous {
                if let Some(s) = start {
                    words.push(&sql[s..=last]);
                }
                start = Some(idx);
            }
        } else if let Some(s) = start.take() {
            words.push(&sql[s..=last]);
        }
        last = idx;
    }
    if let Some(s) = start {
        words.push(&sql[s..=last]);
    }
    words
}
