//! Statement checks applied before any model-authored SQL reaches the
//! analytics database.

const MUTATING_KEYWORDS: &[&str] = &[
    "insert", "update", "delete", "upsert", "merge", "drop", "create", "alter",
    "truncate", "attach", "detach", "pragma", "vacuum", "reindex", "analyze", "grant", "revoke",
    "begin", "commit", "rollback", "savepoint", "release",
];

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GuardrailDecision {
    Allow,
    Deny { reason_code: &'static str, user_message: String },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueryGuard {
    pub default_row_limit: u32,
    pub max_row_limit: u32,
}

impl Default for QueryGuard {
    fn default() -> Self {
        Self { default_row_limit: 5, max_row_limit: 100 }
    }
}

impl QueryGuard {
    pub fn new(default_row_limit: u32, max_row_limit: u32) -> Self {
        Self { default_row_limit, max_row_limit: max_row_limit.max(default_row_limit) }
    }

    pub fn evaluate(&self, sql: &str) -> GuardrailDecision {
        let statement = sql.trim().trim_end_matches(';').trim();
        if statement.is_empty() {
            return deny("empty_query", "The query is empty.");
        }

        let scrubbed = strip_string_literals(statement);
        if scrubbed.contains(';') {
            return deny("multiple_statements", "Only a single SQL statement is allowed.");
        }
        if scrubbed.contains("--") || scrubbed.contains("/*") {
            return deny("comment_not_allowed", "SQL comments are not allowed in queries.");
        }

        let lowered = scrubbed.to_ascii_lowercase();
        let words = tokenize(&lowered);
        match words.first().map(String::as_str) {
            Some("select" | "with") => {}
            _ => return deny("not_a_select", "Only SELECT or WITH queries are allowed."),
        }

        if let Some(keyword) = words.iter().find(|word| MUTATING_KEYWORDS.contains(&word.as_str()))
        {
            return GuardrailDecision::Deny {
                reason_code: "mutating_statement",
                user_message: format!(
                    "The keyword `{keyword}` is not permitted; the database is read-only."
                ),
            };
        }

        if selects_all_columns(&lowered) {
            return deny(
                "select_star",
                "Select only the columns relevant to the question instead of `*`.",
            );
        }

        GuardrailDecision::Allow
    }

    /// Rows to return: the requested count (or the default) capped at the
    /// hard maximum, never less than one.
    pub fn effective_limit(&self, requested: Option<u32>) -> u32 {
        requested.unwrap_or(self.default_row_limit).min(self.max_row_limit).max(1)
    }

    /// Wraps an allowed statement so the database returns at most `limit + 1`
    /// rows; the extra row signals truncation.
    pub fn bounded(&self, sql: &str, limit: u32) -> String {
        let statement = sql.trim().trim_end_matches(';').trim();
        format!("SELECT * FROM ({statement}) LIMIT {}", u64::from(limit) + 1)
    }
}

fn deny(reason_code: &'static str, message: &str) -> GuardrailDecision {
    GuardrailDecision::Deny { reason_code, user_message: message.to_string() }
}

fn strip_string_literals(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut quote: Option<char> = None;
    for ch in sql.chars() {
        match quote {
            Some(open) if ch == open => {
                quote = None;
                out.push(ch);
            }
            Some(_) => {}
            None if ch == '\'' || ch == '"' || ch == '`' => {
                quote = Some(ch);
                out.push(ch);
            }
            None => out.push(ch),
        }
    }
    out
}

fn tokenize(sql: &str) -> Vec<String> {
    sql.split(|ch: char| !(ch.is_ascii_alphanumeric() || ch == '_'))
        .filter(|word| !word.is_empty())
        .map(str::to_string)
        .collect()
}

/// `*` used as a projection: directly after SELECT/DISTINCT/ALL, after a
/// comma, or qualified as `alias.*`. `COUNT(*)` is fine.
fn selects_all_columns(lowered: &str) -> bool {
    lowered.match_indices('*').any(|(offset, _)| {
        let before = lowered[..offset].trim_end();
        before.ends_with(',')
            || before.ends_with('.')
            || ["select", "distinct", "all"].iter().any(|word| ends_with_word(before, word))
    })
}

fn ends_with_word(text: &str, word: &str) -> bool {
    text.strip_suffix(word).is_some_and(|head| {
        head.chars().last().map_or(true, |ch| !(ch.is_ascii_alphanumeric() || ch == '_'))
    })
}

#[cfg(test)]
mod tests {
    use super::{GuardrailDecision, QueryGuard};

    fn reason(decision: GuardrailDecision) -> &'static str {
        match decision {
            GuardrailDecision::Deny { reason_code, .. } => reason_code,
            GuardrailDecision::Allow => "allow",
        }
    }

    #[test]
    fn focused_select_is_allowed() {
        let guard = QueryGuard::default();
        assert_eq!(
            guard.evaluate("SELECT period, SUM(revenue) FROM products GROUP BY period;"),
            GuardrailDecision::Allow
        );
        assert_eq!(
            guard.evaluate(
                "WITH m AS (SELECT period, COUNT(*) AS n FROM products GROUP BY period) \
                 SELECT period, n FROM m"
            ),
            GuardrailDecision::Allow
        );
    }

    #[test]
    fn mutating_and_multi_statement_sql_is_denied() {
        let guard = QueryGuard::default();
        assert_eq!(reason(guard.evaluate("DELETE FROM products")), "not_a_select");
        assert_eq!(
            reason(guard.evaluate("SELECT 1; DROP TABLE products")),
            "multiple_statements"
        );
        assert_eq!(
            reason(guard.evaluate(
                "WITH x AS (SELECT 1) INSERT INTO products (product_id) SELECT 1 FROM x"
            )),
            "mutating_statement"
        );
        assert_eq!(reason(guard.evaluate("SELECT 1 -- hi")), "comment_not_allowed");
    }

    #[test]
    fn keywords_inside_string_literals_do_not_trip_the_guard() {
        let guard = QueryGuard::default();
        assert_eq!(
            guard.evaluate("SELECT product_name FROM products WHERE category = 'update; drop'"),
            GuardrailDecision::Allow
        );
    }

    #[test]
    fn select_star_is_rejected_but_count_star_is_not() {
        let guard = QueryGuard::default();
        assert_eq!(reason(guard.evaluate("SELECT * FROM products")), "select_star");
        assert_eq!(reason(guard.evaluate("select p.* from products p")), "select_star");
        assert_eq!(
            guard.evaluate("SELECT COUNT(*) FROM products"),
            GuardrailDecision::Allow
        );
    }

    #[test]
    fn limits_default_and_cap() {
        let guard = QueryGuard::new(5, 100);
        assert_eq!(guard.effective_limit(None), 5);
        assert_eq!(guard.effective_limit(Some(20)), 20);
        assert_eq!(guard.effective_limit(Some(1_000)), 100);
        assert_eq!(guard.effective_limit(Some(0)), 1);
        assert_eq!(
            guard.bounded("SELECT period FROM products;", 5),
            "SELECT * FROM (SELECT period FROM products) LIMIT 6"
        );
    }
}
