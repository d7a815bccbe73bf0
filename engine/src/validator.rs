//! Static validation of the restricted SQL dialect.
//!
//! Queries are checked against the dialect rules before anything reaches
//! the execution engine, so a flawed query is rejected with the specific
//! rule it violates instead of an opaque planner error. The caller is a
//! budget-limited language model; precise rejections are what let it
//! revise a query within very few attempts.
//!
//! Rules, in the order they are checked:
//! 1. the only base relation is `self` (CTE names extend the scope),
//! 2. no nested subqueries anywhere; composition is `WITH ... AS` only,
//! 3. no joins, explicit or comma-separated,
//! 4. UNION branches carry explicit aliases and identical output names,
//! 5. column references exist in the active schema, case-sensitive,
//! 6. aggregates beside plain columns require a matching GROUP BY.

use sqlparser::ast::{
    Expr, FunctionArg, FunctionArgExpr, FunctionArguments, GroupByExpr, Query, Select, SelectItem,
    SetExpr, Statement, TableFactor, WindowType,
};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;
use thiserror::Error;

use crate::domain::Schema;

/// The reserved relation name standing for the active dataset.
pub const TABLE_NAME: &str = "self";

const AGGREGATE_FUNCTIONS: &[&str] = &[
    "avg", "count", "first", "last", "max", "median", "min", "stddev", "sum", "quantile_cont",
    "quantile_disc", "variance",
];

/// A violated dialect rule. Carried verbatim back to the query author.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    #[error("query must be a single SELECT statement: {0}")]
    Malformed(String),

    #[error("unknown table `{0}`: the only base relation is `self`")]
    UnknownTable(String),

    #[error("nested subqueries are not allowed: compose with a WITH <name> AS (...) chain")]
    IllegalSubquery,

    #[error("joins are not allowed: the dialect reads from a single relation")]
    IllegalJoin,

    #[error("missing alias: {0}")]
    MissingAlias(String),

    #[error("unknown column `{0}`: column names are case-sensitive and must match the schema")]
    UnknownColumn(String),

    #[error("aggregate alongside non-aggregated column `{0}` requires it in GROUP BY")]
    MissingGroupBy(String),
}

/// Checks `query` against the dialect rules for `schema`. Returns the
/// first violated rule, in rule order, so feedback stays deterministic.
pub fn validate(query: &str, schema: &Schema) -> Result<(), Rejection> {
    let query = parse_single_query(query)?;
    check_relations(&query, &mut Vec::new())?;
    check_subqueries(&query)?;
    check_joins(&query)?;
    check_union_aliases(&query, &Env::default(), schema)?;
    check_columns(&query, &Env::default(), schema)?;
    check_grouping(&query)?;
    Ok(())
}

fn parse_single_query(sql: &str) -> Result<Query, Rejection> {
    let mut statements = Parser::parse_sql(&GenericDialect {}, sql)
        .map_err(|e| Rejection::Malformed(e.to_string()))?;
    if statements.len() != 1 {
        return Err(Rejection::Malformed(format!(
            "expected one statement, found {}",
            statements.len()
        )));
    }
    match statements.remove(0) {
        Statement::Query(query) => Ok(*query),
        other => Err(Rejection::Malformed(format!(
            "only SELECT queries are accepted, found {}",
            statement_kind(&other)
        ))),
    }
}

fn statement_kind(statement: &Statement) -> &'static str {
    match statement {
        Statement::Insert(_) => "INSERT",
        Statement::Update { .. } => "UPDATE",
        Statement::Delete(_) => "DELETE",
        Statement::CreateTable(_) => "CREATE TABLE",
        Statement::Drop { .. } => "DROP",
        _ => "a non-SELECT statement",
    }
}

// Rule 1: base relations.

fn check_relations(query: &Query, in_scope: &mut Vec<String>) -> Result<(), Rejection> {
    let depth = in_scope.len();
    if let Some(with) = &query.with {
        for cte in &with.cte_tables {
            check_relations(&cte.query, in_scope)?;
            in_scope.push(cte.alias.name.value.clone());
        }
    }
    check_relations_body(&query.body, in_scope)?;
    in_scope.truncate(depth);
    Ok(())
}

fn check_relations_body(body: &SetExpr, in_scope: &mut Vec<String>) -> Result<(), Rejection> {
    match body {
        SetExpr::Select(select) => {
            for table in &select.from {
                check_table_factor(&table.relation, in_scope)?;
                for join in &table.joins {
                    check_table_factor(&join.relation, in_scope)?;
                }
            }
            Ok(())
        }
        SetExpr::SetOperation { left, right, .. } => {
            check_relations_body(left, in_scope)?;
            check_relations_body(right, in_scope)
        }
        SetExpr::Query(inner) => check_relations(inner, in_scope),
        _ => Ok(()),
    }
}

fn check_table_factor(factor: &TableFactor, in_scope: &[String]) -> Result<(), Rejection> {
    if let TableFactor::Table { name, .. } = factor {
        let parts = &name.0;
        let named = parts.len() == 1
            && (parts[0].value == TABLE_NAME || in_scope.contains(&parts[0].value));
        if !named {
            return Err(Rejection::UnknownTable(name.to_string()));
        }
    }
    // Derived tables and nested joins are reported by later rules.
    Ok(())
}

// Rule 2: subqueries.

fn check_subqueries(query: &Query) -> Result<(), Rejection> {
    each_select(query, &mut |select| {
        for table in &select.from {
            if matches!(table.relation, TableFactor::Derived { .. }) {
                return Err(Rejection::IllegalSubquery);
            }
        }
        for expr in select_exprs(select) {
            let mut found = false;
            walk_expr(expr, &mut |e| {
                if matches!(
                    e,
                    Expr::Subquery(_) | Expr::Exists { .. } | Expr::InSubquery { .. }
                ) {
                    found = true;
                }
            });
            if found {
                return Err(Rejection::IllegalSubquery);
            }
        }
        Ok(())
    })
}

// Rule 3: joins.

fn check_joins(query: &Query) -> Result<(), Rejection> {
    each_select(query, &mut |select| {
        if select.from.len() > 1 {
            return Err(Rejection::IllegalJoin);
        }
        for table in &select.from {
            if !table.joins.is_empty() || matches!(table.relation, TableFactor::NestedJoin { .. })
            {
                return Err(Rejection::IllegalJoin);
            }
        }
        Ok(())
    })
}

// Rule 4: union branch aliases.
//
// CTEs always carry a name syntactically and derived tables are already
// rejected, so what remains is set operations: every branch column must
// be explicitly named and the name lists must agree across branches.

fn check_union_aliases(query: &Query, env: &Env, schema: &Schema) -> Result<(), Rejection> {
    let mut env = env.clone();
    if let Some(with) = &query.with {
        for cte in &with.cte_tables {
            check_union_aliases(&cte.query, &env, schema)?;
            let outputs = outputs_of_query(&cte.query, &env, schema);
            env.push((cte.alias.name.value.clone(), named_only(&outputs)));
        }
    }
    check_union_aliases_body(&query.body, &env, schema)
}

fn check_union_aliases_body(body: &SetExpr, env: &Env, schema: &Schema) -> Result<(), Rejection> {
    if let SetExpr::SetOperation { left, right, .. } = body {
        check_union_aliases_body(left, env, schema)?;
        check_union_aliases_body(right, env, schema)?;

        let left_names = branch_names(left, env, schema)?;
        let right_names = branch_names(right, env, schema)?;
        if left_names != right_names {
            return Err(Rejection::MissingAlias(format!(
                "UNION branches must produce identical column names, found [{}] vs [{}]",
                left_names.join(", "),
                right_names.join(", ")
            )));
        }
    }
    Ok(())
}

fn branch_names(branch: &SetExpr, env: &Env, schema: &Schema) -> Result<Vec<String>, Rejection> {
    let outputs = outputs_of_body(branch, env, schema);
    outputs
        .into_iter()
        .map(|name| {
            name.ok_or_else(|| {
                Rejection::MissingAlias(
                    "every UNION branch column must carry an explicit AS alias".to_string(),
                )
            })
        })
        .collect()
}

// Rule 5: column existence, scope-aware.

fn check_columns(query: &Query, env: &Env, schema: &Schema) -> Result<(), Rejection> {
    let mut env = env.clone();
    if let Some(with) = &query.with {
        for cte in &with.cte_tables {
            check_columns(&cte.query, &env, schema)?;
            let outputs = outputs_of_query(&cte.query, &env, schema);
            env.push((cte.alias.name.value.clone(), named_only(&outputs)));
        }
    }
    let (outputs, source) = check_columns_body(&query.body, &env, schema)?;
    if let Some(order_by) = &query.order_by {
        // ORDER BY may name source columns or projection aliases.
        let mut allowed = source;
        allowed.extend(named_only(&outputs));
        for order_expr in &order_by.exprs {
            check_expr_idents(&order_expr.expr, &allowed)?;
        }
    }
    Ok(())
}

fn check_columns_body(
    body: &SetExpr,
    env: &Env,
    schema: &Schema,
) -> Result<(Vec<Option<String>>, Vec<String>), Rejection> {
    match body {
        SetExpr::Select(select) => check_columns_select(select, env, schema),
        SetExpr::SetOperation { left, right, .. } => {
            let (outputs, source) = check_columns_body(left, env, schema)?;
            check_columns_body(right, env, schema)?;
            Ok((outputs, source))
        }
        SetExpr::Query(inner) => {
            check_columns(inner, env, schema)?;
            let outputs = outputs_of_query(inner, env, schema);
            let names = named_only(&outputs);
            Ok((outputs, names))
        }
        _ => Ok((Vec::new(), Vec::new())),
    }
}

fn check_columns_select(
    select: &Select,
    env: &Env,
    schema: &Schema,
) -> Result<(Vec<Option<String>>, Vec<String>), Rejection> {
    let source = source_columns(select, env, schema);
    let mut outputs = Vec::new();

    for item in &select.projection {
        match item {
            SelectItem::ExprWithAlias { expr, alias } => {
                check_expr_idents(expr, &source)?;
                outputs.push(Some(alias.value.clone()));
            }
            SelectItem::UnnamedExpr(expr) => {
                check_expr_idents(expr, &source)?;
                outputs.push(passthrough_name(expr));
            }
            SelectItem::Wildcard(_) | SelectItem::QualifiedWildcard(..) => {
                outputs.extend(source.iter().cloned().map(Some));
            }
        }
    }

    let aliases = named_only(&outputs);
    if let Some(selection) = &select.selection {
        check_expr_idents(selection, &source)?;
    }
    if let GroupByExpr::Expressions(exprs, _) = &select.group_by {
        let mut allowed = source.clone();
        allowed.extend(aliases.iter().cloned());
        for expr in exprs {
            check_expr_idents(expr, &allowed)?;
        }
    }
    if let Some(having) = &select.having {
        let mut allowed = source.clone();
        allowed.extend(aliases.iter().cloned());
        check_expr_idents(having, &allowed)?;
    }

    Ok((outputs, source))
}

fn check_expr_idents(expr: &Expr, allowed: &[String]) -> Result<(), Rejection> {
    let mut unknown: Option<String> = None;
    walk_expr(expr, &mut |e| {
        if unknown.is_some() {
            return;
        }
        match e {
            Expr::Identifier(ident) => {
                if !allowed.iter().any(|name| *name == ident.value) {
                    unknown = Some(ident.value.clone());
                }
            }
            Expr::CompoundIdentifier(parts) => {
                // Qualified as `alias.column`; the single-relation dialect
                // only needs the trailing column segment checked.
                if let Some(last) = parts.last() {
                    if !allowed.iter().any(|name| *name == last.value) {
                        unknown = Some(last.value.clone());
                    }
                }
            }
            _ => {}
        }
    });
    match unknown {
        Some(name) => Err(Rejection::UnknownColumn(name)),
        None => Ok(()),
    }
}

// Rule 6: grouping.

fn check_grouping(query: &Query) -> Result<(), Rejection> {
    each_select(query, &mut |select| {
        let mut has_aggregate = false;
        let mut bare_columns: Vec<String> = Vec::new();

        for item in &select.projection {
            let expr = match item {
                SelectItem::ExprWithAlias { expr, .. } | SelectItem::UnnamedExpr(expr) => expr,
                SelectItem::Wildcard(_) | SelectItem::QualifiedWildcard(..) => {
                    bare_columns.push("*".to_string());
                    continue;
                }
            };
            match expr {
                Expr::Identifier(ident) => bare_columns.push(ident.value.clone()),
                Expr::CompoundIdentifier(parts) => {
                    if let Some(last) = parts.last() {
                        bare_columns.push(last.value.clone());
                    }
                }
                _ => {
                    if contains_aggregate(expr) {
                        has_aggregate = true;
                    }
                }
            }
        }
        if let Some(having) = &select.having {
            if contains_aggregate(having) {
                has_aggregate = true;
            }
        }

        if !has_aggregate || bare_columns.is_empty() {
            return Ok(());
        }

        let grouped = match &select.group_by {
            GroupByExpr::All(_) => return Ok(()),
            GroupByExpr::Expressions(exprs, _) => {
                let mut names = Vec::new();
                for expr in exprs {
                    match expr {
                        Expr::Identifier(ident) => names.push(ident.value.clone()),
                        Expr::CompoundIdentifier(parts) => {
                            if let Some(last) = parts.last() {
                                names.push(last.value.clone());
                            }
                        }
                        _ => {}
                    }
                }
                names
            }
        };
        for column in &bare_columns {
            if !grouped.contains(column) {
                return Err(Rejection::MissingGroupBy(column.clone()));
            }
        }
        Ok(())
    })
}

fn contains_aggregate(expr: &Expr) -> bool {
    let mut found = false;
    walk_expr(expr, &mut |e| {
        if let Expr::Function(func) = e {
            // Window invocations carry OVER and do not imply grouping.
            if func.over.is_none() {
                if let Some(ident) = func.name.0.last() {
                    if AGGREGATE_FUNCTIONS.contains(&ident.value.to_ascii_lowercase().as_str()) {
                        found = true;
                    }
                }
            }
        }
    });
    found
}

// Scope bookkeeping shared by rules 4 and 5.

/// Relations visible to a query body: CTE name to its output columns.
type Env = Vec<(String, Vec<String>)>;

fn named_only(outputs: &[Option<String>]) -> Vec<String> {
    outputs.iter().flatten().cloned().collect()
}

fn source_columns(select: &Select, env: &Env, schema: &Schema) -> Vec<String> {
    let Some(table) = select.from.first() else {
        return Vec::new();
    };
    if let TableFactor::Table { name, .. } = &table.relation {
        if let [ident] = name.0.as_slice() {
            if ident.value == TABLE_NAME {
                return schema.names().iter().map(|n| n.to_string()).collect();
            }
            if let Some((_, columns)) = env.iter().rev().find(|(n, _)| *n == ident.value) {
                return columns.clone();
            }
        }
    }
    Vec::new()
}

/// Output column names a query produces, without validating anything;
/// `None` marks an expression column with no explicit alias.
fn outputs_of_query(query: &Query, env: &Env, schema: &Schema) -> Vec<Option<String>> {
    let mut env = env.clone();
    if let Some(with) = &query.with {
        for cte in &with.cte_tables {
            let outputs = outputs_of_query(&cte.query, &env, schema);
            env.push((cte.alias.name.value.clone(), named_only(&outputs)));
        }
    }
    outputs_of_body(&query.body, &env, schema)
}

fn outputs_of_body(body: &SetExpr, env: &Env, schema: &Schema) -> Vec<Option<String>> {
    match body {
        SetExpr::Select(select) => {
            let source = source_columns(select, env, schema);
            let mut outputs = Vec::new();
            for item in &select.projection {
                match item {
                    SelectItem::ExprWithAlias { alias, .. } => {
                        outputs.push(Some(alias.value.clone()))
                    }
                    SelectItem::UnnamedExpr(expr) => outputs.push(passthrough_name(expr)),
                    SelectItem::Wildcard(_) | SelectItem::QualifiedWildcard(..) => {
                        outputs.extend(source.iter().cloned().map(Some));
                    }
                }
            }
            outputs
        }
        SetExpr::SetOperation { left, .. } => outputs_of_body(left, env, schema),
        SetExpr::Query(inner) => outputs_of_query(inner, env, schema),
        _ => Vec::new(),
    }
}

fn passthrough_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.clone()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|ident| ident.value.clone()),
        _ => None,
    }
}

// AST traversal helpers.

fn each_select(
    query: &Query,
    f: &mut impl FnMut(&Select) -> Result<(), Rejection>,
) -> Result<(), Rejection> {
    if let Some(with) = &query.with {
        for cte in &with.cte_tables {
            each_select(&cte.query, f)?;
        }
    }
    each_select_body(&query.body, f)
}

fn each_select_body(
    body: &SetExpr,
    f: &mut impl FnMut(&Select) -> Result<(), Rejection>,
) -> Result<(), Rejection> {
    match body {
        SetExpr::Select(select) => f(select),
        SetExpr::SetOperation { left, right, .. } => {
            each_select_body(left, f)?;
            each_select_body(right, f)
        }
        SetExpr::Query(inner) => each_select(inner, f),
        _ => Ok(()),
    }
}

/// Expressions reachable from a SELECT without entering nested queries.
fn select_exprs(select: &Select) -> Vec<&Expr> {
    let mut exprs = Vec::new();
    for item in &select.projection {
        match item {
            SelectItem::ExprWithAlias { expr, .. } | SelectItem::UnnamedExpr(expr) => {
                exprs.push(expr)
            }
            _ => {}
        }
    }
    if let Some(selection) = &select.selection {
        exprs.push(selection);
    }
    if let GroupByExpr::Expressions(group_exprs, _) = &select.group_by {
        exprs.extend(group_exprs.iter());
    }
    if let Some(having) = &select.having {
        exprs.push(having);
    }
    exprs
}

/// Depth-first walk over an expression tree, visiting every node the
/// dialect can produce. Unhandled exotic variants are left unvisited
/// rather than guessed at.
fn walk_expr<'a>(expr: &'a Expr, f: &mut impl FnMut(&'a Expr)) {
    f(expr);
    match expr {
        Expr::BinaryOp { left, right, .. } => {
            walk_expr(left, f);
            walk_expr(right, f);
        }
        Expr::UnaryOp { expr, .. }
        | Expr::Nested(expr)
        | Expr::IsNull(expr)
        | Expr::IsNotNull(expr)
        | Expr::IsTrue(expr)
        | Expr::IsNotTrue(expr)
        | Expr::IsFalse(expr)
        | Expr::IsNotFalse(expr)
        | Expr::IsUnknown(expr)
        | Expr::IsNotUnknown(expr) => walk_expr(expr, f),
        Expr::IsDistinctFrom(left, right) | Expr::IsNotDistinctFrom(left, right) => {
            walk_expr(left, f);
            walk_expr(right, f);
        }
        Expr::AnyOp { left, right, .. } | Expr::AllOp { left, right, .. } => {
            walk_expr(left, f);
            walk_expr(right, f);
        }
        Expr::InList { expr, list, .. } => {
            walk_expr(expr, f);
            for item in list {
                walk_expr(item, f);
            }
        }
        Expr::InSubquery { expr, .. } => walk_expr(expr, f),
        Expr::Between {
            expr, low, high, ..
        } => {
            walk_expr(expr, f);
            walk_expr(low, f);
            walk_expr(high, f);
        }
        Expr::Like { expr, pattern, .. }
        | Expr::ILike { expr, pattern, .. }
        | Expr::SimilarTo { expr, pattern, .. } => {
            walk_expr(expr, f);
            walk_expr(pattern, f);
        }
        Expr::Cast { expr, .. } => walk_expr(expr, f),
        Expr::Extract { expr, .. } => walk_expr(expr, f),
        Expr::Ceil { expr, .. } | Expr::Floor { expr, .. } => walk_expr(expr, f),
        Expr::Position { expr, r#in } => {
            walk_expr(expr, f);
            walk_expr(r#in, f);
        }
        Expr::Substring {
            expr,
            substring_from,
            substring_for,
            ..
        } => {
            walk_expr(expr, f);
            if let Some(from) = substring_from {
                walk_expr(from, f);
            }
            if let Some(len) = substring_for {
                walk_expr(len, f);
            }
        }
        Expr::Trim {
            expr, trim_what, ..
        } => {
            walk_expr(expr, f);
            if let Some(what) = trim_what {
                walk_expr(what, f);
            }
        }
        Expr::Collate { expr, .. } => walk_expr(expr, f),
        Expr::Case {
            operand,
            conditions,
            results,
            else_result,
            ..
        } => {
            if let Some(operand) = operand {
                walk_expr(operand, f);
            }
            for condition in conditions {
                walk_expr(condition, f);
            }
            for result in results {
                walk_expr(result, f);
            }
            if let Some(else_result) = else_result {
                walk_expr(else_result, f);
            }
        }
        Expr::Tuple(items) => {
            for item in items {
                walk_expr(item, f);
            }
        }
        Expr::Function(func) => {
            if let FunctionArguments::List(list) = &func.args {
                for arg in &list.args {
                    let arg_expr = match arg {
                        FunctionArg::Named { arg, .. } => arg,
                        FunctionArg::Unnamed(arg) => arg,
                        _ => continue,
                    };
                    if let FunctionArgExpr::Expr(expr) = arg_expr {
                        walk_expr(expr, f);
                    }
                }
            }
            if let Some(filter) = &func.filter {
                walk_expr(filter, f);
            }
            if let Some(WindowType::WindowSpec(spec)) = &func.over {
                for expr in &spec.partition_by {
                    walk_expr(expr, f);
                }
                for order in &spec.order_by {
                    walk_expr(&order.expr, f);
                }
            }
        }
        _ => {}
    }
}
