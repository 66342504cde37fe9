//! Splits a multi-statement source into individual `;`-terminated
//! statements, in one pass over an in-memory string.

/// Strips `#`-to-end-of-line comments (outside quotes) and splits on `;`
/// (also outside quotes). A statement with no terminating `;` at end of
/// input is discarded — a statement only yields once its separator is seen.
pub fn split_statements(source: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut in_quote = false;
    let mut chars = source.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '#' && !in_quote {
            while let Some(&next) = chars.peek() {
                if next == '\n' {
                    break;
                }
                chars.next();
            }
            continue;
        }
        if c == '"' {
            in_quote = !in_quote;
        }
        current.push(c);
        if c == ';' && !in_quote {
            let trimmed = current.trim();
            if !trimmed.is_empty() {
                statements.push(trimmed.to_string());
            }
            current.clear();
        }
    }
    statements
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_multiple_statements() {
        let stmts = split_statements("CREATE TABLE t (id INT);\nINSERT INTO t VALUES (1);");
        assert_eq!(stmts, vec!["CREATE TABLE t (id INT);", "INSERT INTO t VALUES (1);"]);
    }

    #[test]
    fn strips_hash_comments_outside_quotes() {
        let stmts = split_statements("SELECT * FROM t; # trailing remark\nDROP TABLE t;");
        assert_eq!(stmts.len(), 2);
        assert!(!stmts.iter().any(|s| s.contains("remark")));
    }

    #[test]
    fn preserves_separators_inside_quoted_strings() {
        let stmts = split_statements(r#"INSERT INTO t VALUES ("a;b#c");"#);
        assert_eq!(stmts.len(), 1);
        assert!(stmts[0].contains("a;b#c"));
    }

    #[test]
    fn discards_trailing_statement_without_terminator() {
        let stmts = split_statements("SELECT * FROM t;\nDROP TABLE t");
        assert_eq!(stmts.len(), 1);
    }
}
