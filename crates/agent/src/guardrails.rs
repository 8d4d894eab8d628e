//! Pre-execution checks on model-generated SQL.
//!
//! The reasoning model writes free-text queries. Before one reaches the store
//! it is parsed with the SQLite dialect and must be a single read-only query
//! whose every table reference, including those inside subqueries, CTE bodies
//! and table-valued function arguments, resolves to an allow-listed knowledge
//! table or an in-scope CTE. The store adds `PRAGMA query_only` on top, so
//! this guard is the first of two layers.

use std::collections::BTreeSet;
use std::ops::ControlFlow;

use boilerbrain_core::errors::DiagnosticError;
use sqlparser::ast::{Query, SetExpr, Statement, TableFactor, Visit, Visitor};
use sqlparser::dialect::SQLiteDialect;
use sqlparser::parser::Parser;

/// Table-valued functions that only read their arguments.
const TABLE_FUNCTIONS: &[&str] = &["json_each", "json_tree"];

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GuardrailDecision {
    Allow,
    Deny { reason_code: &'static str, user_message: String },
}

impl GuardrailDecision {
    pub fn into_result(self) -> Result<(), DiagnosticError> {
        match self {
            Self::Allow => Ok(()),
            Self::Deny { reason_code, user_message } => Err(DiagnosticError::QueryRejected {
                reason_code: reason_code.to_string(),
                message: user_message,
            }),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueryGuard {
    allowed_tables: BTreeSet<String>,
}

impl QueryGuard {
    pub fn new<I, S>(allowed_tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            allowed_tables: allowed_tables
                .into_iter()
                .map(|table| table.as_ref().to_ascii_lowercase())
                .collect(),
        }
    }

    pub fn evaluate(&self, sql: &str) -> GuardrailDecision {
        let statements = match Parser::parse_sql(&SQLiteDialect {}, sql) {
            Ok(statements) => statements,
            Err(error) => {
                return GuardrailDecision::Deny {
                    reason_code: "invalid_sql",
                    user_message: format!("The generated query could not be parsed: {error}"),
                };
            }
        };

        let query = match statements.as_slice() {
            [] => return deny("empty_query", "The generated query was empty."),
            [Statement::Query(query)] => query,
            [_] => {
                return deny(
                    "not_a_select",
                    "Only SELECT queries can be run against the knowledge base.",
                );
            }
            _ => return deny("multiple_statements", "Only a single query statement is allowed."),
        };

        let mut walker = TableWalker { allowed_tables: &self.allowed_tables, scopes: Vec::new() };
        match query.visit(&mut walker) {
            ControlFlow::Break(decision) => decision,
            ControlFlow::Continue(()) => GuardrailDecision::Allow,
        }
    }

    pub fn check(&self, sql: &str) -> Result<(), DiagnosticError> {
        self.evaluate(sql).into_result()
    }
}

fn deny(reason_code: &'static str, user_message: &str) -> GuardrailDecision {
    GuardrailDecision::Deny { reason_code, user_message: user_message.to_string() }
}

fn table_not_allowed(table: &str) -> GuardrailDecision {
    GuardrailDecision::Deny {
        reason_code: "table_not_allowed",
        user_message: format!("Table `{table}` is not available for diagnostics."),
    }
}

/// CTE names introduced by one `WITH` clause.
///
/// Inside the body of CTE `i` only the earlier names are visible, plus its own
/// name when the clause is `RECURSIVE`. The query owning the clause sees all
/// of them.
struct CteScope {
    owner: usize,
    names: Vec<String>,
    bodies: Vec<usize>,
    recursive: bool,
    visible: usize,
}

impl CteScope {
    fn visible_names(&self) -> &[String] {
        &self.names[..self.visible.min(self.names.len())]
    }
}

struct TableWalker<'a> {
    allowed_tables: &'a BTreeSet<String>,
    scopes: Vec<CteScope>,
}

impl TableWalker<'_> {
    fn is_visible_cte(&self, name: &str) -> bool {
        self.scopes.iter().any(|scope| scope.visible_names().iter().any(|cte| cte == name))
    }

    fn check_relation(&self, parts: &[String]) -> ControlFlow<GuardrailDecision> {
        let display = parts.join(".");
        match parts {
            [name] if self.is_visible_cte(name) => ControlFlow::Continue(()),
            [name] => self.check_table(name, &display),
            [schema, name] if schema == "main" => self.check_table(name, &display),
            _ => ControlFlow::Break(table_not_allowed(&display)),
        }
    }

    fn check_table(&self, name: &str, display: &str) -> ControlFlow<GuardrailDecision> {
        if self.allowed_tables.contains(name) {
            ControlFlow::Continue(())
        } else {
            ControlFlow::Break(table_not_allowed(display))
        }
    }
}

fn address(query: &Query) -> usize {
    query as *const Query as usize
}

fn lowered(parts: &[sqlparser::ast::Ident]) -> Vec<String> {
    parts.iter().map(|part| part.value.to_ascii_lowercase()).collect()
}

/// `TABLE name` bodies name a relation without going through a table factor.
fn bare_table_name(body: &SetExpr) -> Option<String> {
    match body {
        SetExpr::Table(table) => Some(table.table_name.clone().unwrap_or_default()),
        SetExpr::SetOperation { left, right, .. } => {
            bare_table_name(left).or_else(|| bare_table_name(right))
        }
        _ => None,
    }
}

impl Visitor for TableWalker<'_> {
    type Break = GuardrailDecision;

    fn pre_visit_query(&mut self, query: &Query) -> ControlFlow<Self::Break> {
        let current = address(query);
        if let Some(scope) = self.scopes.last_mut() {
            if let Some(index) = scope.bodies.iter().position(|body| *body == current) {
                scope.visible = if scope.recursive { index + 1 } else { index };
            }
        }

        if let Some(table) = bare_table_name(&query.body) {
            return ControlFlow::Break(table_not_allowed(&table));
        }

        if let Some(with) = &query.with {
            self.scopes.push(CteScope {
                owner: current,
                names: with
                    .cte_tables
                    .iter()
                    .map(|cte| cte.alias.name.value.to_ascii_lowercase())
                    .collect(),
                bodies: with.cte_tables.iter().map(|cte| address(&cte.query)).collect(),
                recursive: with.recursive,
                visible: 0,
            });
        }
        ControlFlow::Continue(())
    }

    fn post_visit_query(&mut self, query: &Query) -> ControlFlow<Self::Break> {
        let current = address(query);
        if self.scopes.last().is_some_and(|scope| scope.owner == current) {
            self.scopes.pop();
        }
        if let Some(scope) = self.scopes.last_mut() {
            if scope.bodies.contains(&current) {
                scope.visible = scope.names.len();
            }
        }
        ControlFlow::Continue(())
    }

    fn pre_visit_statement(&mut self, statement: &Statement) -> ControlFlow<Self::Break> {
        let keyword = statement.to_string();
        let keyword = keyword.split_whitespace().next().unwrap_or_default().to_uppercase();
        ControlFlow::Break(GuardrailDecision::Deny {
            reason_code: "write_statement",
            user_message: format!("Queries may not contain `{keyword}`."),
        })
    }

    fn pre_visit_table_factor(&mut self, factor: &TableFactor) -> ControlFlow<Self::Break> {
        match factor {
            TableFactor::Table { name, args: None, .. } => self.check_relation(&lowered(&name.0)),
            TableFactor::Table { name, args: Some(_), .. }
            | TableFactor::Function { name, .. } => {
                let parts = lowered(&name.0);
                match parts.as_slice() {
                    [function] if TABLE_FUNCTIONS.contains(&function.as_str()) => {
                        ControlFlow::Continue(())
                    }
                    _ => ControlFlow::Break(table_not_allowed(&parts.join("."))),
                }
            }
            TableFactor::Derived { .. } | TableFactor::NestedJoin { .. } => {
                ControlFlow::Continue(())
            }
            other => ControlFlow::Break(table_not_allowed(&other.to_string())),
        }
    }
}
