//! Result windowing for query templates.
//!
//! Templates are plain SQL with `?` positional markers. Windowing a template
//! must not shift the ordinal of any of those markers, so the clause injected
//! here carries its limit and offset as literal numbers:
//!
//! 1. every existing `?` is escaped to `??`
//! 2. the dialect clause is spliced in with single `?` markers
//! 3. each single `?` is replaced, in order, by its numeric value
//! 4. `??` is unescaped back to `?`
//!
//! Trailing comments and semicolons are cut before the clause is appended,
//! so a template ending in `-- note` is still windowed. Everything in this
//! module is pure string work.

use crate::db::dialect::{DialectDescriptor, PaginationStrategy};
use serde::{Deserialize, Serialize};

/// A result window: skip `first_result` rows, return at most `max_results`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Pageable {
    pub first_result: u32,
    pub max_results: u32,
}

impl Pageable {
    pub fn new(first_result: u32, max_results: u32) -> Self {
        Self {
            first_result,
            max_results,
        }
    }

    fn has_offset(&self) -> bool {
        self.first_result > 0
    }
}

/// Window `sql` using the dialect's pagination strategy.
pub fn paginate(sql: &str, pageable: &Pageable, dialect: &DialectDescriptor) -> String {
    paginate_with(sql, pageable, dialect.pagination)
}

/// Window `sql` using an explicit pagination strategy.
pub fn paginate_with(sql: &str, pageable: &Pageable, strategy: PaginationStrategy) -> String {
    let end = code_span(sql).map_or(0, |(_, end)| end);
    let escaped = sql[..end].replace('?', "??");

    let (spliced, values) = match strategy {
        PaginationStrategy::LimitOffset => {
            if pageable.has_offset() {
                (
                    format!("{} limit ? offset ?", escaped),
                    vec![pageable.max_results, pageable.first_result],
                )
            } else {
                (format!("{} limit ?", escaped), vec![pageable.max_results])
            }
        }
        PaginationStrategy::OffsetCommaLimit => {
            if pageable.has_offset() {
                (
                    format!("{} limit ?, ?", escaped),
                    vec![pageable.first_result, pageable.max_results],
                )
            } else {
                (format!("{} limit ?", escaped), vec![pageable.max_results])
            }
        }
        PaginationStrategy::FirstSkip => {
            let clause = if pageable.has_offset() {
                " first ? skip ?"
            } else {
                " first ?"
            };
            match insert_after_select(&escaped, clause) {
                Some(spliced) if pageable.has_offset() => {
                    (spliced, vec![pageable.max_results, pageable.first_result])
                }
                Some(spliced) => (spliced, vec![pageable.max_results]),
                None => {
                    tracing::debug!("Statement does not start with SELECT, leaving it unwindowed");
                    (escaped, Vec::new())
                }
            }
        }
    };

    substitute_single_markers(&spliced, &values).replace("??", "?")
}

/// Insert `clause` directly after a leading `select` keyword.
fn insert_after_select(sql: &str, clause: &str) -> Option<String> {
    let (leading, _) = code_span(sql)?;
    let keyword_end = leading + "select".len();
    let keyword = sql.get(leading..keyword_end)?;
    if !keyword.eq_ignore_ascii_case("select") {
        return None;
    }
    if let Some(next) = sql[keyword_end..].chars().next() {
        if next.is_alphanumeric() || next == '_' {
            return None;
        }
    }
    Some(format!("{}{}{}", &sql[..keyword_end], clause, &sql[keyword_end..]))
}

/// Replace each run of exactly one `?` with the next value, in order.
fn substitute_single_markers(sql: &str, values: &[u32]) -> String {
    let mut out = String::with_capacity(sql.len() + values.len() * 4);
    let mut values = values.iter();
    let mut chars = sql.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '?' {
            out.push(c);
            continue;
        }
        let mut run = 1;
        while chars.peek() == Some(&'?') {
            chars.next();
            run += 1;
        }
        if run == 1 {
            match values.next() {
                Some(v) => out.push_str(&v.to_string()),
                None => out.push('?'),
            }
        } else {
            out.extend(std::iter::repeat_n('?', run));
        }
    }
    out
}

/// Where a character of a statement sits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Region {
    Code,
    /// Inside a `'...'` literal or a `"..."` identifier.
    Quoted,
    /// Inside `-- ...` up to the end of the line, or `/* ... */`.
    Comment,
}

/// Walk `sql` once, tagging every character with its region.
fn scan(sql: &str, mut visit: impl FnMut(usize, char, Region)) {
    let mut chars = sql.char_indices().peekable();
    let mut quote: Option<char> = None;

    while let Some((idx, c)) = chars.next() {
        if let Some(open) = quote {
            visit(idx, c, Region::Quoted);
            if c == open {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' => {
                quote = Some(c);
                visit(idx, c, Region::Quoted);
            }
            '-' if chars.peek().is_some_and(|&(_, next)| next == '-') => {
                visit(idx, c, Region::Comment);
                while let Some((i, n)) = chars.next_if(|&(_, n)| n != '\n') {
                    visit(i, n, Region::Comment);
                }
            }
            '/' if chars.peek().is_some_and(|&(_, next)| next == '*') => {
                visit(idx, c, Region::Comment);
                if let Some((i, star)) = chars.next() {
                    visit(i, star, Region::Comment);
                }
                let mut prev = '\0';
                for (i, n) in chars.by_ref() {
                    visit(i, n, Region::Comment);
                    if prev == '*' && n == '/' {
                        break;
                    }
                    prev = n;
                }
            }
            _ => visit(idx, c, Region::Code),
        }
    }
}

/// Byte range from the first to the last character that is neither a
/// comment, whitespace nor a `;`.
fn code_span(sql: &str) -> Option<(usize, usize)> {
    let mut span: Option<(usize, usize)> = None;
    scan(sql, |idx, c, region| {
        let significant = match region {
            Region::Comment => false,
            Region::Quoted => true,
            Region::Code => !c.is_whitespace() && c != ';',
        };
        if significant {
            let end = idx + c.len_utf8();
            span = Some(span.map_or((idx, end), |(start, _)| (start, end)));
        }
    });
    span
}

/// The statement with leading and trailing comments, whitespace and `;` cut.
pub fn statement_body(sql: &str) -> &str {
    match code_span(sql) {
        Some((start, end)) => &sql[start..end],
        None => "",
    }
}

/// Visit every `?` marker outside quoted text and comments.
fn for_each_placeholder(sql: &str, mut on_marker: impl FnMut(usize)) {
    scan(sql, |idx, c, region| {
        if c == '?' && region == Region::Code {
            on_marker(idx);
        }
    });
}

/// Number of positional `?` markers in `sql`.
pub fn count_placeholders(sql: &str) -> usize {
    let mut count = 0;
    for_each_placeholder(sql, |_| count += 1);
    count
}

/// Rewrite `?` markers as `$1..$n` for drivers that use numbered parameters.
pub fn number_placeholders(sql: &str) -> String {
    rewrite_placeholders(sql, |n| format!("${}", n))
}

/// Replace each `?` marker with `render(ordinal)`, ordinals starting at 1.
pub(crate) fn rewrite_placeholders(sql: &str, render: impl Fn(usize) -> String) -> String {
    let mut positions = Vec::new();
    for_each_placeholder(sql, |idx| positions.push(idx));
    if positions.is_empty() {
        return sql.to_string();
    }

    let mut out = String::with_capacity(sql.len() + positions.len() * 2);
    let mut last = 0;
    for (n, idx) in positions.iter().enumerate() {
        out.push_str(&sql[last..*idx]);
        out.push_str(&render(n + 1));
        last = idx + 1;
    }
    out.push_str(&sql[last..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::dialect::DialectDescriptor;

    const SEARCH: &str = r#"SELECT id, username FROM spp_partner_oidc WHERE "username" ILIKE (?) or "email" ILIKE (?) or "full_name" ILIKE (?)"#;

    #[test]
    fn test_limit_offset_without_placeholders() {
        let sql = paginate(
            "SELECT id FROM partners",
            &Pageable::new(0, 10),
            &DialectDescriptor::postgres(),
        );
        assert_eq!(sql, "SELECT id FROM partners limit 10");
    }

    #[test]
    fn test_limit_offset_keeps_original_markers() {
        let sql = paginate(SEARCH, &Pageable::new(20, 10), &DialectDescriptor::postgres());
        assert!(sql.ends_with("ILIKE (?) limit 10 offset 20"));
        assert_eq!(count_placeholders(&sql), 3);
        assert_eq!(
            sql.replace(" limit 10 offset 20", ""),
            SEARCH,
            "original statement must be untouched"
        );
    }

    #[test]
    fn test_mysql_offset_first() {
        let sql = paginate(
            "SELECT id FROM partners WHERE username = ?",
            &Pageable::new(5, 25),
            &DialectDescriptor::mysql(),
        );
        assert_eq!(sql, "SELECT id FROM partners WHERE username = ? limit 5, 25");

        let sql = paginate(
            "SELECT id FROM partners",
            &Pageable::new(0, 25),
            &DialectDescriptor::mysql(),
        );
        assert_eq!(sql, "SELECT id FROM partners limit 25");
    }

    #[test]
    fn test_first_skip_leading_clause() {
        let sql = paginate_with(
            "SELECT id FROM partners WHERE username = ?",
            &Pageable::new(3, 7),
            PaginationStrategy::FirstSkip,
        );
        assert_eq!(sql, "SELECT first 7 skip 3 id FROM partners WHERE username = ?");

        let sql = paginate_with(
            "  select id from partners",
            &Pageable::new(0, 7),
            PaginationStrategy::FirstSkip,
        );
        assert_eq!(sql, "  select first 7 id from partners");
    }

    #[test]
    fn test_first_skip_non_select_is_untouched() {
        let sql = paginate_with(
            "WITH p AS (SELECT id FROM partners) SELECT id FROM p WHERE id = ?",
            &Pageable::new(3, 7),
            PaginationStrategy::FirstSkip,
        );
        assert_eq!(sql, "WITH p AS (SELECT id FROM partners) SELECT id FROM p WHERE id = ?");
    }

    #[test]
    fn test_empty_window_is_valid() {
        let sql = paginate(
            "SELECT id FROM partners WHERE id = ?",
            &Pageable::new(0, 0),
            &DialectDescriptor::sqlite(),
        );
        assert_eq!(sql, "SELECT id FROM partners WHERE id = ? limit 0");
    }

    #[test]
    fn test_adjacent_markers_survive() {
        // `?|` style operators and doubled markers must round-trip
        let sql = paginate(
            "SELECT id FROM t WHERE tags ?| array['a'] AND x = ?? AND y = ?",
            &Pageable::new(1, 2),
            &DialectDescriptor::postgres(),
        );
        assert_eq!(
            sql,
            "SELECT id FROM t WHERE tags ?| array['a'] AND x = ?? AND y = ? limit 2 offset 1"
        );
    }

    #[test]
    fn test_trailing_semicolon_is_dropped() {
        let sql = paginate(
            "SELECT id FROM partners;  ",
            &Pageable::new(0, 3),
            &DialectDescriptor::postgres(),
        );
        assert_eq!(sql, "SELECT id FROM partners limit 3");
    }

    #[test]
    fn test_count_placeholders_skips_quotes() {
        assert_eq!(count_placeholders("SELECT 1"), 0);
        assert_eq!(count_placeholders(SEARCH), 3);
        assert_eq!(
            count_placeholders(r#"SELECT '?' AS q, "a?b" FROM t WHERE x = ?"#),
            1
        );
        assert_eq!(count_placeholders("SELECT 'it''s ?' FROM t WHERE x = ?"), 1);
    }

    #[test]
    fn test_count_placeholders_skips_comments() {
        assert_eq!(count_placeholders("SELECT id FROM p WHERE u = ? -- who?"), 1);
        assert_eq!(
            count_placeholders("SELECT id /* any ? here */ FROM p WHERE u = ? AND e = ?"),
            2
        );
        assert_eq!(count_placeholders("SELECT id FROM p -- a?\nWHERE u = ?"), 1);
        // A dash inside a literal does not open a comment
        assert_eq!(count_placeholders("SELECT '--' FROM p WHERE u = ?"), 1);
    }

    #[test]
    fn test_trailing_line_comment_does_not_swallow_window() {
        let sql = paginate(
            "SELECT id FROM partners WHERE username LIKE ? -- match partners",
            &Pageable::new(0, 10),
            &DialectDescriptor::sqlite(),
        );
        assert_eq!(sql, "SELECT id FROM partners WHERE username LIKE ? limit 10");

        let sql = paginate(
            "SELECT id FROM partners; -- all of them\n",
            &Pageable::new(4, 2),
            &DialectDescriptor::mysql(),
        );
        assert_eq!(sql, "SELECT id FROM partners limit 4, 2");
    }

    #[test]
    fn test_trailing_block_comment_is_cut() {
        let sql = paginate(
            "SELECT id FROM partners /* ordered by the view */",
            &Pageable::new(1, 5),
            &DialectDescriptor::postgres(),
        );
        assert_eq!(sql, "SELECT id FROM partners limit 5 offset 1");
    }

    #[test]
    fn test_first_skip_after_leading_comment() {
        let sql = paginate_with(
            "-- partners\nSELECT id FROM partners",
            &Pageable::new(0, 7),
            PaginationStrategy::FirstSkip,
        );
        assert_eq!(sql, "-- partners\nSELECT first 7 id FROM partners");
    }

    #[test]
    fn test_statement_body() {
        assert_eq!(
            statement_body("  /* v2 */ SELECT id FROM p WHERE u = '--x'; -- done\n"),
            "SELECT id FROM p WHERE u = '--x'"
        );
        assert_eq!(statement_body("-- nothing"), "");
    }

    #[test]
    fn test_number_placeholders() {
        assert_eq!(
            number_placeholders(r#"SELECT id FROM t WHERE "a" = ? OR b = '?' OR c = ?"#),
            r#"SELECT id FROM t WHERE "a" = $1 OR b = '?' OR c = $2"#
        );
        assert_eq!(number_placeholders("SELECT 1"), "SELECT 1");
    }

    #[test]
    fn test_window_values_never_become_placeholders() {
        for first in [0u32, 1, 10, 1000] {
            for max in [0u32, 1, 50] {
                for dialect in [
                    DialectDescriptor::postgres(),
                    DialectDescriptor::mysql(),
                    DialectDescriptor::sqlite(),
                ] {
                    let sql = paginate(SEARCH, &Pageable::new(first, max), &dialect);
                    assert_eq!(count_placeholders(&sql), 3, "{}", sql);
                }
            }
        }
    }
}
