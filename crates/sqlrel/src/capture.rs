use std::collections::{BTreeSet, HashSet};
use std::ops::ControlFlow;

use sqlparser::ast;

use crate::catalog::{normalize_ident, normalize_object_name};

/// Names of the objects a statement reads and writes, as written in the
/// statement.
///
/// Unquoted names are lowercased. Common table expression names are not
/// objects and are never captured.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentifierCapture {
    pub selects: BTreeSet<String>,
    pub inserts: BTreeSet<String>,
    pub updates: BTreeSet<String>,
    pub deletes: BTreeSet<String>,
}

impl IdentifierCapture {
    pub fn from_statement(statement: &ast::Statement) -> Self {
        let mut capture = IdentifierCapture::default();
        capture.scan_statement(statement);
        capture
    }

    pub fn is_empty(&self) -> bool {
        self.selects.is_empty()
            && self.inserts.is_empty()
            && self.updates.is_empty()
            && self.deletes.is_empty()
    }

    fn scan_statement(&mut self, statement: &ast::Statement) {
        let ctes = HashSet::new();
        match statement {
            ast::Statement::Query(query) => self.scan_query(query, &ctes),
            ast::Statement::Insert {
                table_name, source, ..
            } => {
                self.inserts.insert(normalize_object_name(table_name));
                if let Some(source) = source {
                    self.scan_query(source, &ctes);
                }
            }
            ast::Statement::Update {
                table,
                from,
                selection,
                assignments,
                ..
            } => {
                match &table.relation {
                    ast::TableFactor::Table { name, .. } => {
                        self.updates.insert(normalize_object_name(name));
                    }
                    other => self.scan_table_factor(other, &ctes),
                }
                for join in &table.joins {
                    self.scan_table_factor(&join.relation, &ctes);
                }
                if let Some(from) = from {
                    self.scan_table_with_joins(from, &ctes);
                }
                if let Some(selection) = selection {
                    self.scan_expr(selection, &ctes);
                }
                for assignment in assignments {
                    self.scan_expr(&assignment.value, &ctes);
                }
            }
            ast::Statement::Delete {
                from, selection, ..
            } => {
                for table in from {
                    match &table.relation {
                        ast::TableFactor::Table { name, .. } => {
                            self.deletes.insert(normalize_object_name(name));
                        }
                        other => self.scan_table_factor(other, &ctes),
                    }
                    for join in &table.joins {
                        self.scan_table_factor(&join.relation, &ctes);
                    }
                }
                if let Some(selection) = selection {
                    self.scan_expr(selection, &ctes);
                }
            }
            ast::Statement::Explain { statement, .. } => self.scan_statement(statement),
            _ => (),
        }
    }

    fn scan_query(&mut self, query: &ast::Query, outer_ctes: &HashSet<String>) {
        let mut ctes = outer_ctes.clone();
        if let Some(with) = &query.with {
            for cte in &with.cte_tables {
                // Later CTEs may reference earlier ones, and a recursive CTE may
                // reference itself.
                ctes.insert(normalize_ident(&cte.alias.name));
                self.scan_query(&cte.query, &ctes);
            }
        }
        self.scan_set_expr(&query.body, &ctes);
        for order_by in &query.order_by {
            self.scan_expr(&order_by.expr, &ctes);
        }
    }

    fn scan_set_expr(&mut self, set_expr: &ast::SetExpr, ctes: &HashSet<String>) {
        match set_expr {
            ast::SetExpr::Select(select) => {
                for table in &select.from {
                    self.scan_table_with_joins(table, ctes);
                }
                for item in &select.projection {
                    match item {
                        ast::SelectItem::UnnamedExpr(expr)
                        | ast::SelectItem::ExprWithAlias { expr, .. } => {
                            self.scan_expr(expr, ctes)
                        }
                        _ => (),
                    }
                }
                if let Some(selection) = &select.selection {
                    self.scan_expr(selection, ctes);
                }
                if let Some(having) = &select.having {
                    self.scan_expr(having, ctes);
                }
            }
            ast::SetExpr::Query(query) => self.scan_query(query, ctes),
            ast::SetExpr::SetOperation { left, right, .. } => {
                self.scan_set_expr(left, ctes);
                self.scan_set_expr(right, ctes);
            }
            ast::SetExpr::Values(values) => {
                for row in &values.rows {
                    for expr in row {
                        self.scan_expr(expr, ctes);
                    }
                }
            }
            _ => (),
        }
    }

    fn scan_table_with_joins(&mut self, table: &ast::TableWithJoins, ctes: &HashSet<String>) {
        self.scan_table_factor(&table.relation, ctes);
        for join in &table.joins {
            self.scan_table_factor(&join.relation, ctes);
            if let Some(expr) = join_condition(&join.join_operator) {
                self.scan_expr(expr, ctes);
            }
        }
    }

    fn scan_table_factor(&mut self, factor: &ast::TableFactor, ctes: &HashSet<String>) {
        match factor {
            ast::TableFactor::Table { name, .. } => {
                let name = normalize_object_name(name);
                if !ctes.contains(&name) {
                    self.selects.insert(name);
                }
            }
            ast::TableFactor::Derived { subquery, .. } => self.scan_query(subquery, ctes),
            ast::TableFactor::NestedJoin {
                table_with_joins, ..
            } => self.scan_table_with_joins(table_with_joins, ctes),
            _ => (),
        }
    }

    /// Capture tables read by subqueries nested in an expression.
    ///
    /// Only the outermost subqueries are collected here. Deeper ones are
    /// reached through [`Self::scan_query`] so they see the CTEs in scope.
    fn scan_expr(&mut self, expr: &ast::Expr, ctes: &HashSet<String>) {
        let mut collector = SubqueryCollector::default();
        let _ = ast::Visit::visit(expr, &mut collector);
        for query in collector.subqueries {
            self.scan_query(&query, ctes);
        }
    }
}

/// Collects subqueries directly nested in an expression, skipping those
/// inside another subquery.
#[derive(Debug, Default)]
struct SubqueryCollector {
    depth: usize,
    subqueries: Vec<ast::Query>,
}

impl ast::Visitor for SubqueryCollector {
    type Break = ();

    fn pre_visit_query(&mut self, _query: &ast::Query) -> ControlFlow<()> {
        self.depth += 1;
        ControlFlow::Continue(())
    }

    fn post_visit_query(&mut self, _query: &ast::Query) -> ControlFlow<()> {
        self.depth -= 1;
        ControlFlow::Continue(())
    }

    fn pre_visit_expr(&mut self, expr: &ast::Expr) -> ControlFlow<()> {
        if self.depth == 0 {
            match expr {
                ast::Expr::Subquery(q)
                | ast::Expr::Exists { subquery: q, .. }
                | ast::Expr::InSubquery { subquery: q, .. } => {
                    self.subqueries.push(q.as_ref().clone())
                }
                _ => (),
            }
        }
        ControlFlow::Continue(())
    }
}

fn join_condition(op: &ast::JoinOperator) -> Option<&ast::Expr> {
    match op {
        ast::JoinOperator::Inner(ast::JoinConstraint::On(expr))
        | ast::JoinOperator::LeftOuter(ast::JoinConstraint::On(expr))
        | ast::JoinOperator::RightOuter(ast::JoinConstraint::On(expr))
        | ast::JoinOperator::FullOuter(ast::JoinConstraint::On(expr)) => Some(expr),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::{SqlDialect, parse_statement};

    fn capture(sql: &str) -> IdentifierCapture {
        IdentifierCapture::from_statement(&parse_statement(sql, SqlDialect::Postgres).unwrap())
    }

    fn set(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn select_with_join_and_subquery() {
        let c = capture(
            "SELECT * FROM Orders o JOIN customers c ON o.cid = c.id \
             WHERE o.id IN (SELECT order_id FROM returns)",
        );
        assert_eq!(set(&["customers", "orders", "returns"]), c.selects);
        assert!(c.inserts.is_empty());
    }

    #[test]
    fn ctes_are_not_objects() {
        let c = capture("WITH recent AS (SELECT * FROM orders) SELECT * FROM recent");
        assert_eq!(set(&["orders"]), c.selects);
    }

    #[test]
    fn ctes_in_nested_subqueries_are_not_objects() {
        let c = capture(
            "SELECT * FROM t WHERE a IN \
             (WITH c AS (SELECT a FROM u) SELECT a FROM c WHERE a IN (SELECT a FROM c))",
        );
        assert_eq!(set(&["t", "u"]), c.selects);

        let c = capture(
            "SELECT * FROM t WHERE EXISTS \
             (SELECT 1 FROM u WHERE u.a IN (SELECT a FROM v WHERE v.b = (SELECT MAX(b) FROM w)))",
        );
        assert_eq!(set(&["t", "u", "v", "w"]), c.selects);
    }

    #[test]
    fn quoted_names_keep_case() {
        let c = capture("SELECT * FROM \"MyTable\"");
        assert_eq!(set(&["MyTable"]), c.selects);
    }

    #[test]
    fn modifications() {
        let c = capture("INSERT INTO archive SELECT * FROM orders");
        assert_eq!(set(&["archive"]), c.inserts);
        assert_eq!(set(&["orders"]), c.selects);

        let c = capture("UPDATE orders SET total = 0 WHERE id IN (SELECT id FROM bad)");
        assert_eq!(set(&["orders"]), c.updates);
        assert_eq!(set(&["bad"]), c.selects);

        let c = capture("DELETE FROM orders WHERE total < 0");
        assert_eq!(set(&["orders"]), c.deletes);
        assert!(c.selects.is_empty());
    }
}
