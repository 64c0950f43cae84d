//! AST-based SQL guard (§7). Verifies that a user-scoped statement carries a
//! `user_id` predicate before it is allowed to execute, using `sqlparser`
//! for a proper AST walk instead of a regex/token scan. A statement that
//! fails this guard is rejected, never rewritten — patching a missing
//! filter in after the fact is exactly the failure mode this guard exists
//! to rule out.

use sqlparser::ast::{BinaryOperator, Expr, ObjectName, SetExpr, Statement, TableFactor};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;

use companion_core::GatewayError;

const USER_ID_COLUMN: &str = "user_id";

/// Parses `sql` and verifies the guard, returning a `SecurityError` when the
/// statement does not carry a `user_id` predicate (SELECT/UPDATE/DELETE) or
/// column (INSERT).
pub fn validate_user_id_present(sql: &str) -> Result<(), GatewayError> {
    let statements = Parser::parse_sql(&PostgreSqlDialect {}, sql)
        .map_err(|err| GatewayError::SecurityError(format!("unparsable SQL: {err}")))?;

    if statements.is_empty() {
        return Err(GatewayError::SecurityError("empty SQL statement".to_string()));
    }

    for statement in &statements {
        check_statement(statement)?;
    }
    Ok(())
}

fn check_statement(statement: &Statement) -> Result<(), GatewayError> {
    match statement {
        Statement::Query(query) => {
            if let SetExpr::Select(select) = query.body.as_ref() {
                let has_predicate = select
                    .selection
                    .as_ref()
                    .map(expr_references_user_id_equality)
                    .unwrap_or(false);
                if !has_predicate {
                    return Err(missing_predicate_error("SELECT"));
                }
            }
            Ok(())
        }
        Statement::Update { selection, .. } => {
            let has_predicate = selection.as_ref().map(expr_references_user_id_equality).unwrap_or(false);
            if has_predicate { Ok(()) } else { Err(missing_predicate_error("UPDATE")) }
        }
        Statement::Delete(delete) => {
            let has_predicate = delete.selection.as_ref().map(expr_references_user_id_equality).unwrap_or(false);
            if has_predicate { Ok(()) } else { Err(missing_predicate_error("DELETE")) }
        }
        Statement::Insert(insert) => {
            let has_column = insert
                .columns
                .iter()
                .any(|ident| ident.value.eq_ignore_ascii_case(USER_ID_COLUMN));
            if has_column { Ok(()) } else { Err(missing_predicate_error("INSERT")) }
        }
        // Any other statement kind (CREATE, ALTER, ...) is never issued
        // through the user-scoped path; reject defensively rather than
        // silently allow.
        other => Err(GatewayError::SecurityError(format!(
            "statement kind not permitted on the user-scoped query path: {other}"
        ))),
    }
}

fn missing_predicate_error(kind: &str) -> GatewayError {
    GatewayError::SecurityError(format!("{kind} statement missing a user_id predicate"))
}

/// Walks a WHERE expression tree looking for a `user_id = <value>` or
/// `user_id IN (...)` / `<table>.user_id = ...` comparison, including inside
/// AND/OR combinations.
fn expr_references_user_id_equality(expr: &Expr) -> bool {
    match expr {
        Expr::BinaryOp { left, op, right } => match op {
            BinaryOperator::And | BinaryOperator::Or => {
                expr_references_user_id_equality(left) || expr_references_user_id_equality(right)
            }
            BinaryOperator::Eq => is_user_id_ident(left) || is_user_id_ident(right),
            _ => false,
        },
        Expr::InList { expr, .. } => is_user_id_ident(expr),
        Expr::InSubquery { expr, .. } => is_user_id_ident(expr),
        Expr::Nested(inner) => expr_references_user_id_equality(inner),
        Expr::IsNotNull(inner) | Expr::IsNull(inner) => is_user_id_ident(inner),
        _ => false,
    }
}

fn is_user_id_ident(expr: &Expr) -> bool {
    match expr {
        Expr::Identifier(ident) => ident.value.eq_ignore_ascii_case(USER_ID_COLUMN),
        Expr::CompoundIdentifier(parts) => parts
            .last()
            .map(|ident| ident.value.eq_ignore_ascii_case(USER_ID_COLUMN))
            .unwrap_or(false),
        _ => false,
    }
}

/// Heuristic complexity check (`WITH`, `UNION`, subquery-in-select):
/// complex queries route through `execute_admin_query` rather than the
/// guarded path, since the guard's single-statement WHERE walk cannot
/// reason about them.
pub fn is_complex_query(sql: &str) -> bool {
    let upper = sql.to_uppercase();
    upper.contains("WITH ") || upper.contains("UNION") || upper.contains("(SELECT")
}

/// Table name referenced by a simple `FROM` clause, used for diagnostics and
/// logging only — never for authorization decisions.
pub fn first_table_name(statement: &Statement) -> Option<String> {
    if let Statement::Query(query) = statement {
        if let SetExpr::Select(select) = query.body.as_ref() {
            if let Some(table_with_joins) = select.from.first() {
                if let TableFactor::Table { name, .. } = &table_with_joins.relation {
                    return Some(object_name_to_string(name));
                }
            }
        }
    }
    None
}

fn object_name_to_string(name: &ObjectName) -> String {
    name.0
        .iter()
        .map(|part| part.to_string())
        .collect::<Vec<_>>()
        .join(".")
}

/// Always fails: rewriting a query to inject a missing filter is exactly
/// the anti-pattern this guard replaces (§9). Kept as an explicit,
/// loudly-failing stub so a future caller cannot silently reintroduce it.
pub fn inject_user_filter(_sql: &str, _user_id: &str) -> Result<String, GatewayError> {
    Err(GatewayError::SecurityError(
        "inject_user_filter is not supported; use parameterized user-scoped queries".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn select_with_user_id_predicate_passes() {
        assert!(validate_user_id_present("SELECT * FROM quirks WHERE user_id = 'u1'").is_ok());
    }

    #[test]
    fn select_without_user_id_predicate_fails() {
        let err = validate_user_id_present("SELECT * FROM quirks WHERE name = 'stubborn'").unwrap_err();
        assert!(matches!(err, GatewayError::SecurityError(_)));
    }

    #[test]
    fn select_with_compound_identifier_passes() {
        assert!(validate_user_id_present("SELECT * FROM quirks q WHERE q.user_id = 'u1' AND q.active = true").is_ok());
    }

    #[test]
    fn update_without_predicate_fails() {
        let err = validate_user_id_present("UPDATE quirks SET strength = 0.5").unwrap_err();
        assert!(matches!(err, GatewayError::SecurityError(_)));
    }

    #[test]
    fn delete_with_in_list_passes() {
        assert!(validate_user_id_present("DELETE FROM interactions WHERE user_id IN ('u1', 'u2')").is_ok());
    }

    #[test]
    fn insert_with_user_id_column_passes() {
        assert!(validate_user_id_present(
            "INSERT INTO interactions (user_id, session_id) VALUES ('u1', 's1')"
        )
        .is_ok());
    }

    #[test]
    fn insert_without_user_id_column_fails() {
        let err = validate_user_id_present("INSERT INTO interactions (session_id) VALUES ('s1')").unwrap_err();
        assert!(matches!(err, GatewayError::SecurityError(_)));
    }

    #[test]
    fn unparsable_sql_fails() {
        assert!(validate_user_id_present("SELEKT * FRUM quirks").is_err());
    }

    #[test]
    fn inject_user_filter_always_errors() {
        assert!(inject_user_filter("SELECT * FROM quirks", "u1").is_err());
    }

    #[test]
    fn complex_query_detection() {
        assert!(is_complex_query("WITH recent AS (SELECT 1) SELECT * FROM recent"));
        assert!(is_complex_query("SELECT * FROM a UNION SELECT * FROM b"));
        assert!(!is_complex_query("SELECT * FROM quirks WHERE user_id = 'u1'"));
    }
}
