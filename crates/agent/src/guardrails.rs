//! Read-only enforcement for model-written SQL.

const WRITE_KEYWORDS: &[&str] = &[
    "INSERT", "UPDATE", "DELETE", "DROP", "ALTER", "CREATE", "REPLACE", "UPSERT", "ATTACH",
    "DETACH", "PRAGMA", "VACUUM", "REINDEX", "TRUNCATE", "GRANT", "REVOKE", "MERGE",
];

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GuardrailDecision {
    Allow { statement: String },
    Deny { reason_code: &'static str, user_message: String },
    Degrade { statement: String, reason_code: &'static str },
}

impl GuardrailDecision {
    /// Statement that may be executed, if any.
    pub fn statement(&self) -> Option<&str> {
        match self {
            Self::Allow { statement } | Self::Degrade { statement, .. } => Some(statement),
            Self::Deny { .. } => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SqlGuardrailPolicy {
    pub row_limit: u32,
}

impl Default for SqlGuardrailPolicy {
    fn default() -> Self {
        Self { row_limit: 10 }
    }
}

impl SqlGuardrailPolicy {
    pub fn new(row_limit: u32) -> Self {
        Self { row_limit: row_limit.max(1) }
    }

    pub fn evaluate(&self, sql: &str) -> GuardrailDecision {
        let statement = strip_fences(sql).trim().trim_end_matches(|c: char| c == ';' || c.is_whitespace());
        if statement.is_empty() {
            return deny("empty_statement", "The generated query was empty.");
        }

        let scan = match scan(statement) {
            Ok(scan) => scan,
            Err(reason_code) => {
                return deny(reason_code, "The generated query could not be checked safely.")
            }
        };
        if scan.has_separator {
            return deny("multiple_statements", "Only a single query can be run at a time.");
        }
        if !matches!(scan.words.first().map(String::as_str), Some("SELECT" | "WITH")) {
            return deny("not_read_only", "Only read-only SELECT queries can be run.");
        }
        if let Some(keyword) =
            scan.words.iter().find(|word| WRITE_KEYWORDS.contains(&word.as_str()))
        {
            return deny("write_keyword", format!("Queries may not use {keyword}."));
        }

        if scan.words.iter().any(|word| word == "LIMIT") {
            GuardrailDecision::Allow { statement: statement.to_string() }
        } else {
            GuardrailDecision::Degrade {
                statement: format!("{statement} LIMIT {}", self.row_limit),
                reason_code: "limit_appended",
            }
        }
    }
}

fn deny(reason_code: &'static str, user_message: impl Into<String>) -> GuardrailDecision {
    GuardrailDecision::Deny { reason_code, user_message: user_message.into() }
}

fn strip_fences(sql: &str) -> &str {
    let trimmed = sql.trim();
    let Some(body) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = body.strip_suffix("```").unwrap_or(body);
    let body = body.trim_start();
    body.strip_prefix("sqlite")
        .or_else(|| body.strip_prefix("sql"))
        .or_else(|| body.strip_prefix("SQL"))
        .unwrap_or(body)
}

struct Scan {
    /// Upper-cased bare words outside string literals and quoted identifiers.
    words: Vec<String>,
    has_separator: bool,
}

fn scan(statement: &str) -> Result<Scan, &'static str> {
    let mut words = Vec::new();
    let mut has_separator = false;
    let mut current = String::new();
    let mut chars = statement.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch.is_ascii_alphanumeric() || ch == '_' {
            current.push(ch.to_ascii_uppercase());
            continue;
        }
        if !current.is_empty() {
            words.push(std::mem::take(&mut current));
        }
        match ch {
            '\'' | '"' | '`' => {
                let mut closed = false;
                while let Some(next) = chars.next() {
                    if next == ch {
                        if chars.peek() == Some(&ch) {
                            chars.next();
                            continue;
                        }
                        closed = true;
                        break;
                    }
                }
                if !closed {
                    return Err("unterminated_literal");
                }
            }
            '-' if chars.peek() == Some(&'-') => return Err("comment_not_allowed"),
            '/' if chars.peek() == Some(&'*') => return Err("comment_not_allowed"),
            ';' => has_separator = true,
            _ => {}
        }
    }
    if !current.is_empty() {
        words.push(current);
    }
    Ok(Scan { words, has_separator })
}

#[cfg(test)]
mod tests {
    use super::{GuardrailDecision, SqlGuardrailPolicy};

    #[test]
    fn select_with_limit_is_allowed() {
        let decision = SqlGuardrailPolicy::default()
            .evaluate("SELECT title, price FROM items ORDER BY price ASC LIMIT 5;");
        assert_eq!(
            decision,
            GuardrailDecision::Allow {
                statement: "SELECT title, price FROM items ORDER BY price ASC LIMIT 5".to_string()
            }
        );
    }

    #[test]
    fn missing_limit_is_degraded_with_row_limit() {
        let decision = SqlGuardrailPolicy::new(10).evaluate(
            "```sql\nWITH cheap AS (SELECT * FROM items WHERE price < 30) SELECT COUNT(*) FROM cheap\n```",
        );
        let GuardrailDecision::Degrade { statement, reason_code } = decision else {
            panic!("expected degrade");
        };
        assert_eq!(reason_code, "limit_appended");
        assert!(statement.starts_with("WITH cheap AS"));
        assert!(statement.ends_with("FROM cheap LIMIT 10"));
    }

    #[test]
    fn writes_and_stacked_statements_are_denied() {
        let policy = SqlGuardrailPolicy::default();
        let cases = [
            ("DELETE FROM reviews", "not_read_only"),
            ("SELECT 1; DROP TABLE items", "multiple_statements"),
            ("WITH x AS (DELETE FROM items RETURNING *) SELECT * FROM x", "write_keyword"),
            ("SELECT * FROM items -- LIMIT 5", "comment_not_allowed"),
            ("SELECT 'unterminated FROM items", "unterminated_literal"),
            ("   ", "empty_statement"),
        ];
        for (sql, expected) in cases {
            match policy.evaluate(sql) {
                GuardrailDecision::Deny { reason_code, .. } => {
                    assert_eq!(reason_code, expected, "{sql}")
                }
                other => panic!("{sql} should be denied, got {other:?}"),
            }
        }
    }

    #[test]
    fn keywords_inside_literals_are_ignored() {
        let decision = SqlGuardrailPolicy::default()
            .evaluate("SELECT title FROM items WHERE title LIKE '%drop; delete%' LIMIT 3");
        assert!(matches!(decision, GuardrailDecision::Allow { .. }));
        assert!(decision.statement().is_some_and(|sql| sql.contains("'%drop; delete%'")));
    }
}
