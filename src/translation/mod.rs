use std::borrow::Cow;

mod parsers;
mod scanner;

use parsers::top_level_words;
use scanner::{TopLevel, scan_digits};

/// How to resolve placeholder translation for a call relative to the connection default.
///
/// # Examples
/// ```rust
/// use mssql_middleware::prelude::*;
///
/// let options = QueryOptions::default()
///     .with_translation(TranslationMode::ForceOff);
/// # let _ = options;
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TranslationMode {
    /// Follow the connection's `translate_placeholders` setting.
    #[default]
    ConnectionDefault,
    /// Force translation on, regardless of the connection default.
    ForceOn,
    /// Force translation off, regardless of the connection default.
    ForceOff,
}

impl TranslationMode {
    #[must_use]
    pub fn resolve(self, connection_default: bool) -> bool {
        match self {
            TranslationMode::ConnectionDefault => connection_default,
            TranslationMode::ForceOn => true,
            TranslationMode::ForceOff => false,
        }
    }
}

/// Per-call options for query paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueryOptions {
    pub translation: TranslationMode,
}

impl QueryOptions {
    #[must_use]
    pub fn with_translation(mut self, translation: TranslationMode) -> Self {
        self.translation = translation;
        self
    }
}

/// Rewrite ODBC-style `?` placeholders to SQL Server's `@P1..@Pn`.
///
/// Bare `?` marks are numbered left to right; `?N` keeps its explicit index. Placeholders inside
/// string literals, quoted or bracketed identifiers and comments are left alone. Returns a
/// borrowed `Cow` when nothing changed.
#[must_use]
pub fn translate_placeholders(sql: &str, enabled: bool) -> Cow<'_, str> {
    if !enabled {
        return Cow::Borrowed(sql);
    }
    let bytes = sql.as_bytes();
    let mut out: Option<String> = None;
    let mut copied = 0;
    let mut next = 1usize;

    for (idx, b) in TopLevel::new(sql) {
        if b != b'?' || idx < copied {
            continue;
        }
        let buf = out.get_or_insert_with(|| String::with_capacity(sql.len() + 8));
        buf.push_str(&sql[copied..idx]);
        buf.push_str("@P");
        if let Some((digits_end, digits)) = scan_digits(bytes, idx + 1) {
            buf.push_str(digits);
            copied = digits_end;
        } else {
            buf.push_str(&next.to_string());
            next += 1;
            copied = idx + 1;
        }
    }

    match out {
        Some(mut buf) => {
            buf.push_str(&sql[copied..]);
            Cow::Owned(buf)
        }
        None => Cow::Borrowed(sql),
    }
}

/// Number of parameters a batch expects: the highest `@Pn` index or the count of bare `?` marks.
#[must_use]
pub fn count_placeholders(sql: &str) -> usize {
    let bytes = sql.as_bytes();
    let mut bare = 0usize;
    let mut highest = 0usize;
    for (idx, b) in TopLevel::new(sql) {
        match b {
            b'?' => match scan_digits(bytes, idx + 1) {
                Some((_, digits)) => highest = highest.max(digits.parse().unwrap_or(0)),
                None => bare += 1,
            },
            b'@' if matches!(bytes.get(idx + 1), Some(b'P' | b'p'))
                && (idx == 0 || bytes[idx - 1] != b'@') =>
            {
                if let Some((digits_end, digits)) = scan_digits(bytes, idx + 2) {
                    let is_word_end = bytes
                        .get(digits_end)
                        .is_none_or(|c| !(c.is_ascii_alphanumeric() || *c == b'_'));
                    if is_word_end {
                        highest = highest.max(digits.parse().unwrap_or(0));
                    }
                }
            }
            _ => {}
        }
    }
    highest.max(bare)
}

/// Split a batch on top-level `;`, dropping empty statements.
#[must_use]
pub fn split_statements(sql: &str) -> Vec<&str> {
    let mut statements = Vec::new();
    let mut start = 0;
    for (idx, b) in TopLevel::new(sql) {
        if b == b';' {
            statements.push(&sql[start..idx]);
            start = idx + 1;
        }
    }
    statements.push(&sql[start..]);
    statements
        .into_iter()
        .map(str::trim)
        .filter(|stmt| !stmt.is_empty())
        .collect()
}

fn is_go_line(line: &str) -> bool {
    line.trim().trim_end_matches(';').trim_end().eq_ignore_ascii_case("GO")
}

/// Split a script into batches on `GO` separator lines.
#[must_use]
pub fn split_go_batches(script: &str) -> Vec<String> {
    let mut batches = Vec::new();
    let mut current = String::new();
    for line in script.lines() {
        if is_go_line(line) {
            batches.push(std::mem::take(&mut current));
        } else {
            current.push_str(line);
            current.push('\n');
        }
    }
    batches.push(current);
    batches
        .into_iter()
        .map(|batch| batch.trim().to_string())
        .filter(|batch| !batch.is_empty())
        .collect()
}

/// Quote an identifier with brackets, escaping `]`.
#[must_use]
pub fn quote_ident(name: &str) -> String {
    format!("[{}]", name.replace(']', "]]"))
}

/// Strip one level of bracket or double-quote quoting from an identifier part.
#[must_use]
pub fn unquote_ident(part: &str) -> String {
    let part = part.trim();
    if let Some(inner) = part.strip_prefix('[').and_then(|p| p.strip_suffix(']')) {
        return inner.replace("]]", "]");
    }
    if let Some(inner) = part.strip_prefix('"').and_then(|p| p.strip_suffix('"')) {
        return inner.replace("\"\"", "\"");
    }
    part.to_string()
}

/// Split a possibly qualified object name (`schema.table`, `[my.schema].[t]`) into unquoted
/// parts.
#[must_use]
pub fn split_qualified(name: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut start = 0;
    for (idx, b) in TopLevel::new(name) {
        if b == b'.' {
            parts.push(unquote_ident(&name[start..idx]));
            start = idx + 1;
        }
    }
    parts.push(unquote_ident(&name[start..]));
    parts
}

/// Whether any statement in the batch produces a rowset.
///
/// A statement returns rows when it starts with `SELECT`, `WITH` or `EXEC`, or carries an
/// `OUTPUT` clause. `INSERT ... SELECT` and `SELECT ... INTO` are counted as row-returning.
#[must_use]
pub fn returns_rows(sql: &str) -> bool {
    split_statements(sql).into_iter().any(|stmt| {
        let words = top_level_words(stmt);
        let leads = words.first().is_some_and(|w| {
            ["SELECT", "WITH", "EXEC", "EXECUTE"]
                .iter()
                .any(|k| w.eq_ignore_ascii_case(k))
        });
        leads
            || words.iter().any(|w| {
                w.eq_ignore_ascii_case("OUTPUT") || w.eq_ignore_ascii_case("SELECT")
            })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbers_bare_placeholders() {
        let sql = "select * from t where a = ? and b = ?";
        let res = translate_placeholders(sql, true);
        assert_eq!(res, "select * from t where a = @P1 and b = @P2");
    }

    #[test]
    fn keeps_explicit_indexes() {
        let res = translate_placeholders("insert into t values(?2, ?1)", true);
        assert_eq!(res, "insert into t values(@P2, @P1)");
    }

    #[test]
    fn skips_inside_literals_brackets_and_comments() {
        let sql = "select '?', [a?b] -- ?\n/* ? */ from t where a = ?";
        let res = translate_placeholders(sql, true);
        assert_eq!(res, "select '?', [a?b] -- ?\n/* ? */ from t where a = @P1");
    }

    #[test]
    fn leaves_non_ascii_text_intact() {
        let res = translate_placeholders("select N'héllo ?', ? as naïve", true);
        assert_eq!(res, "select N'héllo ?', @P1 as naïve");
    }

    #[test]
    fn respects_disabled_flag() {
        let sql = "select * from t where a = ?";
        let res = translate_placeholders(sql, false);
        assert!(matches!(res, Cow::Borrowed(_)));
        assert_eq!(res, sql);
    }

    #[test]
    fn translation_mode_resolution() {
        assert!(TranslationMode::ForceOn.resolve(false));
        assert!(!TranslationMode::ForceOff.resolve(true));
        assert!(TranslationMode::ConnectionDefault.resolve(true));
        assert!(!TranslationMode::ConnectionDefault.resolve(false));
    }

    #[test]
    fn counts_placeholders_both_styles() {
        assert_eq!(count_placeholders("select ?, ?, ?"), 3);
        assert_eq!(count_placeholders("select @P1, @P2, @P1"), 2);
        assert_eq!(count_placeholders("select @Price, @@SPID, '@P9'"), 0);
        assert_eq!(count_placeholders("select 1"), 0);
    }

    #[test]
    fn splits_statements_on_top_level_semicolons() {
        let stmts = split_statements("insert into t values('a;b'); select 1 ; ;");
        assert_eq!(stmts, vec!["insert into t values('a;b')", "select 1"]);
    }

    #[test]
    fn splits_go_batches() {
        let script = "create table t(a int)\nGO\ninsert into t values(1)\n  go  \nselect * from t\n";
        let batches = split_go_batches(script);
        assert_eq!(
            batches,
            vec!["create table t(a int)", "insert into t values(1)", "select * from t"]
        );
    }

    #[test]
    fn quotes_and_unquotes_identifiers() {
        assert_eq!(quote_ident("odd]name"), "[odd]]name]");
        assert_eq!(unquote_ident("[odd]]name]"), "odd]name");
        assert_eq!(unquote_ident("plain"), "plain");
    }

    #[test]
    fn splits_qualified_names_outside_brackets() {
        assert_eq!(split_qualified("dbo.employee"), vec!["dbo", "employee"]);
        assert_eq!(split_qualified("[my.schema].[t]"), vec!["my.schema", "t"]);
        assert_eq!(split_qualified("t"), vec!["t"]);
    }

    #[test]
    fn classifies_row_returning_batches() {
        assert!(returns_rows("select 1"));
        assert!(returns_rows("insert into t values(1); select * from t"));
        assert!(returns_rows("  with c as (select 1 a) select * from c"));
        assert!(returns_rows("insert into t output inserted.id values(1)"));
        assert!(returns_rows("exec sp_who"));
        assert!(!returns_rows("insert into t values(1); update t set a = 2"));
        assert!(!returns_rows("insert into t values('select')"));
        assert!(!returns_rows("-- select\ndelete from t"));
    }
}
