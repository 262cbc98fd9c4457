use iq_error::{IqError, Result};
use once_cell::sync::Lazy;
use regex::Regex;

static FORBIDDEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(INSERT|UPDATE|DELETE|DROP|ALTER|CREATE|TRUNCATE|MERGE|GRANT|REVOKE|ATTACH|DETACH|COPY|CALL|EXEC|EXECUTE|VACUUM|RENAME|LOCK|INTO)\b",
    )
    .expect("forbidden keyword pattern")
});

const ALLOWED_LEADING: &[&str] = &["SELECT", "WITH", "SHOW", "DESCRIBE", "DESC", "EXPLAIN"];

/// Removes markdown code fences and trailing semicolons from model output.
pub fn strip_sql_fences(sql: &str) -> String {
    let mut lines: Vec<&str> = sql.trim().lines().collect();
    if lines.first().is_some_and(|l| l.trim_start().starts_with("```")) {
        lines.remove(0);
    }
    if lines.last().is_some_and(|l| l.trim() == "```") {
        lines.pop();
    }
    let joined = lines.join("\n").replace("```", "");
    let mut out = joined.trim();
    while let Some(rest) = out.strip_suffix(';') {
        out = rest.trim_end();
    }
    out.to_string()
}

/// Replaces quoted literals, quoted identifiers and comments with spaces so
/// keyword and separator checks only see SQL structure.
fn mask_literals(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut chars = sql.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\'' | '"' | '`' => {
                out.push(' ');
                for inner in chars.by_ref() {
                    if inner == c {
                        break;
                    }
                    out.push(' ');
                }
                out.push(' ');
            }
            '-' if chars.peek() == Some(&'-') => {
                for inner in chars.by_ref() {
                    if inner == '\n' {
                        out.push('\n');
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = ' ';
                for inner in chars.by_ref() {
                    if prev == '*' && inner == '/' {
                        break;
                    }
                    prev = inner;
                }
                out.push(' ');
            }
            c => out.push(c),
        }
    }
    out
}

/// Validates that `sql` is a single read-only statement and returns it cleaned.
pub fn ensure_read_only(sql: &str) -> Result<String> {
    let cleaned = strip_sql_fences(sql);
    if cleaned.is_empty() {
        return Err(IqError::SqlValidation {
            reason: "empty SQL statement".to_string(),
        });
    }

    let masked = mask_literals(&cleaned);
    if masked.contains(';') {
        return Err(IqError::SqlValidation {
            reason: "multiple statements are not allowed".to_string(),
        });
    }

    let leading = masked
        .split(|c: char| c.is_whitespace() || c == '(')
        .find(|w| !w.is_empty())
        .unwrap_or_default()
        .to_ascii_uppercase();
    if !ALLOWED_LEADING.contains(&leading.as_str()) {
        return Err(IqError::SqlValidation {
            reason: format!("only read-only queries are allowed, got '{leading}'"),
        });
    }

    if let Some(m) = FORBIDDEN.find(&masked) {
        return Err(IqError::SqlValidation {
            reason: format!("statement contains forbidden keyword '{}'", m.as_str().to_ascii_uppercase()),
        });
    }

    Ok(cleaned)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fenced_select_is_cleaned() {
        let sql = "```sql\nSELECT SUM(amount) AS total_sales FROM sales;\n```";
        assert_eq!(
            ensure_read_only(sql).unwrap(),
            "SELECT SUM(amount) AS total_sales FROM sales"
        );
    }

    #[test]
    fn writes_are_rejected() {
        for sql in [
            "DELETE FROM sales",
            "UPDATE sales SET amount = 0",
            "DROP TABLE sales",
            "WITH x AS (SELECT 1) DELETE FROM sales",
        ] {
            let err = ensure_read_only(sql).unwrap_err();
            assert!(matches!(err, IqError::SqlValidation { .. }), "{sql}");
        }
    }

    #[test]
    fn select_into_targets_are_rejected() {
        for sql in [
            "SELECT * INTO archived_sales FROM sales",
            "SELECT region, amount FROM sales INTO OUTFILE '/tmp/sales.csv'",
            "select * from sales into dumpfile '/tmp/x'",
        ] {
            let err = ensure_read_only(sql).unwrap_err();
            assert!(matches!(err, IqError::SqlValidation { .. }), "{sql}");
        }
        assert!(ensure_read_only("SELECT 'insert into' AS hint FROM sales").is_ok());
    }

    #[test]
    fn stacked_statements_are_rejected() {
        assert!(ensure_read_only("SELECT 1; DROP TABLE sales").is_err());
        assert!(ensure_read_only("SELECT 1;;").is_ok());
    }

    #[test]
    fn keywords_inside_literals_and_identifiers_are_fine() {
        assert!(ensure_read_only("SELECT 'drop; delete' AS note FROM t").is_ok());
        assert!(ensure_read_only("SELECT \"update\", created_at, last_update FROM t").is_ok());
        assert!(ensure_read_only("WITH recent AS (SELECT * FROM orders) SELECT COUNT(*) FROM recent").is_ok());
    }

    #[test]
    fn blank_input_is_rejected() {
        assert!(ensure_read_only("```sql\n```").is_err());
    }
}
