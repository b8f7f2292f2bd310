use std::collections::HashSet;
use std::ops::{ControlFlow, Range};

use sqlparser::ast;
use tracing::trace;

use crate::catalog::{
    Catalog, ResolvedTableReference, TableDef, TableKind, TableReference, normalize_ident,
    normalize_object_name, require_table,
};
use crate::errors::{Result, SqlRelError, internal, unsupported, validation};
use crate::expr::{BinaryOperator, ScalarExpr, UnaryOperator};
use crate::functions::OperatorTable;
use crate::parse::{SqlDialect, parse_statement};
use crate::plan::{
    Aggregate, AggregateCall, AggregateFunction, Filter, Join, JoinType, LogicalPlan,
    ModifyOperation, Project, Scan, Sort, SortKey, TableModify, Values,
};
use crate::types::{DataType, Field, ScalarValue};

/// Binds parsed statements against a catalog, producing validated logical
/// plans.
#[derive(Clone)]
pub struct Planner<'a> {
    catalog: &'a dyn Catalog,
    functions: &'a OperatorTable,
    /// Database unqualified names resolve in.
    database: String,
    /// Views currently being expanded, outermost first.
    view_path: Vec<String>,
}

impl std::fmt::Debug for Planner<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Planner")
            .field("database", &self.database)
            .field("view_path", &self.view_path)
            .finish_non_exhaustive()
    }
}

impl<'a> Planner<'a> {
    pub fn new(
        catalog: &'a dyn Catalog,
        functions: &'a OperatorTable,
        database: impl Into<String>,
    ) -> Self {
        Planner {
            catalog,
            functions,
            database: database.into(),
            view_path: Vec::new(),
        }
    }

    /// Plan a single statement.
    pub fn plan_statement(&self, statement: &ast::Statement) -> Result<LogicalPlan> {
        let plan = match statement {
            ast::Statement::Query(query) => self.plan_query(query, &CteScope::default())?,
            ast::Statement::Insert {
                table_name,
                columns,
                source,
                ..
            } => self.plan_insert(table_name, columns, source.as_deref())?,
            ast::Statement::Update {
                table,
                assignments,
                from,
                selection,
                ..
            } => self.plan_update(table, assignments, from.as_ref(), selection.as_ref())?,
            ast::Statement::Delete {
                from, selection, ..
            } => self.plan_delete(from, selection.as_ref())?,
            ast::Statement::Explain { statement, .. } => self.plan_statement(statement)?,
            other => return Err(unsupported!("statement: {other}")),
        };

        // Computes types for every operator, surfacing type errors.
        plan.output_fields()?;
        Ok(plan)
    }

    fn plan_query(&self, query: &ast::Query, outer: &CteScope) -> Result<LogicalPlan> {
        let mut ctes = outer.clone();
        if let Some(with) = &query.with {
            if with.recursive {
                return Err(unsupported!("recursive common table expressions"));
            }
            for cte in &with.cte_tables {
                let plan = self.plan_query(&cte.query, &ctes)?;
                let plan = rename_output(plan, &cte.alias.columns)?;
                ctes.push(normalize_ident(&cte.alias.name), plan);
            }
        }

        let select = match query.body.as_ref() {
            ast::SetExpr::Select(select) => self.plan_select(select, &ctes)?,
            ast::SetExpr::Query(query) => SelectPlan::opaque(self.plan_query(query, &ctes)?),
            ast::SetExpr::Values(values) => SelectPlan::opaque(self.plan_values(values)?),
            other => return Err(unsupported!("set expression: {other}")),
        };

        self.plan_order_limit(select, query)
    }

    fn plan_order_limit(&self, select: SelectPlan, query: &ast::Query) -> Result<LogicalPlan> {
        let SelectPlan {
            mut plan,
            exprs,
            sort_scope,
        } = select;

        let fields = plan.output_fields()?;
        let visible = fields.len();
        let mut keys = Vec::with_capacity(query.order_by.len());
        for order_by in &query.order_by {
            let index = match resolve_order_by(&order_by.expr, &fields, &exprs)? {
                Some(index) => index,
                None => match (&sort_scope, &mut plan) {
                    // Sort on an expression that isn't selected by carrying it
                    // as an extra column through the projection.
                    (Some(scope), LogicalPlan::Project(project)) => {
                        let expr = self.bind_expr(&order_by.expr, &ExprScope::Plain(scope))?;
                        project.exprs.push(expr);
                        project.names.push(format!("EXPR${}", project.names.len()));
                        project.exprs.len() - 1
                    }
                    _ => {
                        return Err(validation!(
                            "ORDER BY expression '{}' is not in the select list",
                            order_by.expr
                        ));
                    }
                },
            };
            let descending = order_by.asc == Some(false);
            keys.push(SortKey {
                index,
                descending,
                nulls_first: order_by.nulls_first.unwrap_or(descending),
            });
        }

        let fetch = query.limit.as_ref().map(parse_count).transpose()?;
        let offset = query
            .offset
            .as_ref()
            .map(|offset| parse_count(&offset.value))
            .transpose()?;

        if keys.is_empty() && fetch.is_none() && offset.is_none() {
            return Ok(plan);
        }

        let width = plan.num_columns()?;
        let mut plan = LogicalPlan::Sort(Sort {
            keys,
            offset,
            fetch,
            input: Box::new(plan),
        });

        if width > visible {
            plan = LogicalPlan::Project(Project {
                exprs: (0..visible).map(ScalarExpr::column).collect(),
                names: fields.iter().map(|f| f.name.clone()).collect(),
                input: Box::new(plan),
            });
        }

        Ok(plan)
    }

    fn plan_select(&self, select: &ast::Select, ctes: &CteScope) -> Result<SelectPlan> {
        let distinct = match &select.distinct {
            None => false,
            Some(ast::Distinct::Distinct) => true,
            Some(ast::Distinct::On(_)) => return Err(unsupported!("DISTINCT ON")),
        };

        let (mut plan, scope) = if select.from.is_empty() {
            let values = LogicalPlan::Values(Values {
                fields: Vec::new(),
                rows: vec![Vec::new()],
            });
            (values, Scope::default())
        } else {
            self.plan_from(&select.from, ctes)?
        };

        if let Some(selection) = &select.selection {
            let condition = self.bind_expr(selection, &ExprScope::Plain(&scope))?;
            check_predicate(&condition, &scope.fields(), "WHERE")?;
            plan = LogicalPlan::Filter(Filter {
                condition,
                input: Box::new(plan),
            });
        }

        let group_exprs = match &select.group_by {
            ast::GroupByExpr::Expressions(exprs) => exprs.clone(),
            ast::GroupByExpr::All => return Err(unsupported!("GROUP BY ALL")),
        };
        let aggregates = collect_aggregates(select)?;

        let mut select_plan =
            if !group_exprs.is_empty() || !aggregates.is_empty() || select.having.is_some() {
                self.plan_grouped_select(select, plan, &scope, &group_exprs, &aggregates)?
            } else {
                self.plan_projection(select, plan, scope)?
            };

        if distinct {
            let width = select_plan.plan.num_columns()?;
            select_plan.plan = LogicalPlan::Aggregate(Aggregate {
                group_keys: (0..width).collect(),
                aggregates: Vec::new(),
                input: Box::new(select_plan.plan),
            });
            select_plan.sort_scope = None;
        }

        Ok(select_plan)
    }

    /// Plan the select list of a query without aggregation.
    fn plan_projection(
        &self,
        select: &ast::Select,
        input: LogicalPlan,
        scope: Scope,
    ) -> Result<SelectPlan> {
        let mut exprs = Vec::new();
        let mut names = Vec::new();
        let mut item_exprs = Vec::new();

        for item in &select.projection {
            match item {
                ast::SelectItem::UnnamedExpr(expr) => {
                    exprs.push(self.bind_expr(expr, &ExprScope::Plain(&scope))?);
                    names.push(derive_name(expr, names.len()));
                    item_exprs.push(Some(expr.clone()));
                }
                ast::SelectItem::ExprWithAlias { expr, alias } => {
                    exprs.push(self.bind_expr(expr, &ExprScope::Plain(&scope))?);
                    names.push(normalize_ident(alias));
                    item_exprs.push(Some(expr.clone()));
                }
                ast::SelectItem::Wildcard(_) => {
                    if scope.is_empty() {
                        return Err(validation!("SELECT * requires a FROM clause"));
                    }
                    for (idx, col) in scope.columns.iter().enumerate() {
                        exprs.push(ScalarExpr::column(idx));
                        names.push(col.field.name.clone());
                        item_exprs.push(None);
                    }
                }
                ast::SelectItem::QualifiedWildcard(name, _) => {
                    let qualifier = qualifier_name(name)?;
                    let range = scope.qualified_columns(&qualifier)?;
                    for idx in range {
                        exprs.push(ScalarExpr::column(idx));
                        names.push(scope.columns[idx].field.name.clone());
                        item_exprs.push(None);
                    }
                }
            }
        }

        Ok(SelectPlan {
            plan: LogicalPlan::Project(Project {
                exprs,
                names,
                input: Box::new(input),
            }),
            exprs: item_exprs,
            sort_scope: Some(scope),
        })
    }

    /// Plan a select with GROUP BY, aggregates or HAVING.
    ///
    /// Group expressions and aggregate arguments are computed by a projection
    /// below the aggregate. The select list and HAVING are then bound against
    /// the aggregate output.
    fn plan_grouped_select(
        &self,
        select: &ast::Select,
        input: LogicalPlan,
        scope: &Scope,
        group_exprs: &[ast::Expr],
        aggregates: &[ast::Expr],
    ) -> Result<SelectPlan> {
        let plain = ExprScope::Plain(scope);
        let input_fields = scope.fields();

        let mut pre_exprs = Vec::new();
        let mut pre_names = Vec::new();
        for expr in group_exprs {
            let bound = self.bind_expr(expr, &plain)?;
            pre_names.push(match bound.as_column() {
                Some(idx) => input_fields[idx].name.clone(),
                None => format!("$f{}", pre_names.len()),
            });
            pre_exprs.push(bound);
        }

        let mut calls = Vec::with_capacity(aggregates.len());
        for (i, expr) in aggregates.iter().enumerate() {
            let ast::Expr::Function(func) = expr else {
                return Err(internal!("expected aggregate function, got {expr}"));
            };
            let name = normalize_object_name(&func.name);
            let function = AggregateFunction::from_name(&name)
                .ok_or_else(|| internal!("not an aggregate: {name}"))?;

            let mut args = Vec::new();
            let mut arg_type = None;
            for arg in &func.args {
                match arg {
                    ast::FunctionArg::Unnamed(ast::FunctionArgExpr::Expr(e)) => {
                        let bound = self.bind_expr(e, &plain)?;
                        arg_type = Some(bound.datatype(&input_fields)?);
                        args.push(pre_exprs.len());
                        pre_names.push(format!("$f{}", pre_names.len()));
                        pre_exprs.push(bound);
                    }
                    ast::FunctionArg::Unnamed(ast::FunctionArgExpr::Wildcard)
                        if function == AggregateFunction::Count => {}
                    other => {
                        return Err(unsupported!("aggregate argument: {other}"));
                    }
                }
            }
            match (function, args.len()) {
                (AggregateFunction::Count, 0 | 1) | (_, 1) => (),
                _ => {
                    return Err(validation!(
                        "Invalid number of arguments to function '{}'. Was expecting 1 arguments",
                        function
                    ));
                }
            }
            if arg_type.is_some_and(|t| !t.is_numeric() && t != DataType::Any && t != DataType::Null)
                && matches!(function, AggregateFunction::Sum | AggregateFunction::Avg)
            {
                return Err(validation!(
                    "Cannot apply '{function}' to arguments of type <{}>",
                    arg_type.unwrap_or(DataType::Any)
                ));
            }

            calls.push(AggregateCall {
                function,
                args,
                distinct: func.distinct,
                name: format!("EXPR${}", group_exprs.len() + i),
                return_type: function.return_type(arg_type),
            });
        }

        let mut plan = LogicalPlan::Aggregate(Aggregate {
            group_keys: (0..group_exprs.len()).collect(),
            aggregates: calls,
            input: Box::new(LogicalPlan::Project(Project {
                exprs: pre_exprs,
                names: pre_names,
                input: Box::new(input),
            })),
        });

        let agg_fields = plan.output_fields()?;
        let grouped = ExprScope::Grouped(GroupedScope {
            groups: group_exprs,
            aggregates,
            fields: &agg_fields,
        });

        if let Some(having) = &select.having {
            let condition = self.bind_expr(having, &grouped)?;
            check_predicate(&condition, &agg_fields, "HAVING")?;
            plan = LogicalPlan::Filter(Filter {
                condition,
                input: Box::new(plan),
            });
        }

        let mut exprs = Vec::new();
        let mut names = Vec::new();
        let mut item_exprs = Vec::new();
        for item in &select.projection {
            let (expr, name) = match item {
                ast::SelectItem::UnnamedExpr(expr) => (expr, derive_name(expr, names.len())),
                ast::SelectItem::ExprWithAlias { expr, alias } => (expr, normalize_ident(alias)),
                ast::SelectItem::Wildcard(_) | ast::SelectItem::QualifiedWildcard(..) => {
                    return Err(validation!("'*' is not allowed in an aggregate query"));
                }
            };
            exprs.push(self.bind_expr(expr, &grouped)?);
            names.push(name);
            item_exprs.push(Some(expr.clone()));
        }

        Ok(SelectPlan {
            plan: LogicalPlan::Project(Project {
                exprs,
                names,
                input: Box::new(plan),
            }),
            exprs: item_exprs,
            sort_scope: None,
        })
    }

    fn plan_from(
        &self,
        froms: &[ast::TableWithJoins],
        ctes: &CteScope,
    ) -> Result<(LogicalPlan, Scope)> {
        let mut froms = froms.iter();
        let leftmost = froms
            .next()
            .ok_or_else(|| internal!("missing from item"))?;
        let (mut plan, mut scope) = self.plan_from_item(leftmost, ctes)?;

        for right in froms {
            let (right_plan, right_scope) = self.plan_from_item(right, ctes)?;
            plan = LogicalPlan::Join(Join {
                join_type: JoinType::Inner,
                condition: ScalarExpr::boolean(true),
                left: Box::new(plan),
                right: Box::new(right_plan),
            });
            scope.append(right_scope)?;
        }

        Ok((plan, scope))
    }

    fn plan_from_item(
        &self,
        table: &ast::TableWithJoins,
        ctes: &CteScope,
    ) -> Result<(LogicalPlan, Scope)> {
        let (mut plan, mut scope) = self.plan_from_table(&table.relation, ctes)?;

        for join in &table.joins {
            let (right, right_scope) = self.plan_from_table(&join.relation, ctes)?;
            let (join_type, constraint) = match &join.join_operator {
                ast::JoinOperator::Inner(c) => (JoinType::Inner, Some(c)),
                ast::JoinOperator::LeftOuter(c) => (JoinType::Left, Some(c)),
                ast::JoinOperator::RightOuter(c) => (JoinType::Right, Some(c)),
                ast::JoinOperator::FullOuter(c) => (JoinType::Full, Some(c)),
                ast::JoinOperator::CrossJoin => (JoinType::Inner, None),
                other => return Err(unsupported!("join operator: {other:?}")),
            };

            let left_width = scope.len();
            scope.append(right_scope)?;

            let condition = match constraint {
                None | Some(ast::JoinConstraint::None) => ScalarExpr::boolean(true),
                Some(ast::JoinConstraint::On(expr)) => {
                    let condition = self.bind_expr(expr, &ExprScope::Plain(&scope))?;
                    check_predicate(&condition, &scope.fields(), "ON")?;
                    condition
                }
                Some(ast::JoinConstraint::Using(idents)) => {
                    let mut conditions = Vec::with_capacity(idents.len());
                    for ident in idents {
                        let name = normalize_ident(ident);
                        let left = scope.resolve_in(0..left_width, &name)?;
                        let right = scope.resolve_in(left_width..scope.len(), &name)?;
                        conditions.push(ScalarExpr::binary(
                            BinaryOperator::Eq,
                            ScalarExpr::column(left),
                            ScalarExpr::column(right),
                        ));
                    }
                    ScalarExpr::and_all(conditions).unwrap_or(ScalarExpr::boolean(true))
                }
                Some(ast::JoinConstraint::Natural) => return Err(unsupported!("NATURAL JOIN")),
            };

            plan = LogicalPlan::Join(Join {
                join_type,
                condition,
                left: Box::new(plan),
                right: Box::new(right),
            });
        }

        Ok((plan, scope))
    }

    fn plan_from_table(
        &self,
        table: &ast::TableFactor,
        ctes: &CteScope,
    ) -> Result<(LogicalPlan, Scope)> {
        match table {
            ast::TableFactor::Table { name, alias, .. } => {
                let reference = TableReference::try_from(name)?;
                let qualifier = alias
                    .as_ref()
                    .map(|a| normalize_ident(&a.name))
                    .unwrap_or_else(|| reference.base().to_string());

                let cte = match &reference {
                    TableReference::Unqualified { base } => ctes.get(base).cloned(),
                    TableReference::Qualified { .. } => None,
                };
                let plan = match cte {
                    Some(plan) => plan,
                    None => {
                        let resolved = reference.resolve_with_default(&self.database);
                        let def = require_table(self.catalog, &resolved)?;
                        self.plan_table_def(resolved, def)?
                    }
                };
                let plan = match alias {
                    Some(alias) => rename_output(plan, &alias.columns)?,
                    None => plan,
                };

                let scope = Scope::from_fields(Some(qualifier), plan.output_fields()?);
                Ok((plan, scope))
            }
            ast::TableFactor::Derived {
                lateral,
                subquery,
                alias,
            } => {
                if *lateral {
                    return Err(unsupported!("LATERAL"));
                }
                let plan = self.plan_query(subquery, ctes)?;
                let (plan, qualifier) = match alias {
                    Some(alias) => (
                        rename_output(plan, &alias.columns)?,
                        Some(normalize_ident(&alias.name)),
                    ),
                    None => (plan, None),
                };
                let scope = Scope::from_fields(qualifier, plan.output_fields()?);
                Ok((plan, scope))
            }
            ast::TableFactor::NestedJoin {
                table_with_joins,
                alias,
            } => {
                let (plan, mut scope) = self.plan_from_item(table_with_joins, ctes)?;
                if let Some(alias) = alias {
                    scope.requalify(normalize_ident(&alias.name));
                }
                Ok((plan, scope))
            }
            other => Err(unsupported!("table factor: {other}")),
        }
    }

    fn plan_table_def(
        &self,
        resolved: ResolvedTableReference,
        def: TableDef,
    ) -> Result<LogicalPlan> {
        match &def.kind {
            TableKind::Table => Ok(LogicalPlan::Scan(Scan {
                fields: def.fields(),
                table: resolved,
            })),
            TableKind::View { definition } => self.expand_view(resolved, definition, &def),
        }
    }

    /// Inline a view's definition, detecting views that reference themselves.
    fn expand_view(
        &self,
        view: ResolvedTableReference,
        definition: &str,
        def: &TableDef,
    ) -> Result<LogicalPlan> {
        let key = view.to_string();
        if self.view_path.contains(&key) {
            let mut cycle = self.view_path.clone();
            cycle.push(key);
            return Err(SqlRelError::ViewCycle(cycle));
        }
        trace!(view = %key, depth = self.view_path.len(), "expanding view");

        let mut child = self.clone();
        child.database = view.database.clone();
        child.view_path.push(key.clone());

        let statement = parse_statement(definition, SqlDialect::Generic)?;
        let ast::Statement::Query(query) = statement else {
            return Err(validation!("View '{key}' is not defined by a query"));
        };
        let plan = child.plan_query(&query, &CteScope::default())?;

        if def.columns.is_empty() {
            return Ok(plan);
        }
        let names: Vec<_> = def.columns.iter().map(|c| c.name.clone()).collect();
        rename_output_names(plan, names)
    }

    fn plan_values(&self, values: &ast::Values) -> Result<LogicalPlan> {
        let empty = Scope::default();
        let mut rows = Vec::with_capacity(values.rows.len());
        for row in &values.rows {
            let mut literals = Vec::with_capacity(row.len());
            for expr in row {
                match self.bind_expr(expr, &ExprScope::Plain(&empty))? {
                    ScalarExpr::Literal { value } => literals.push(value),
                    other => return Err(unsupported!("non-constant VALUES item: {other}")),
                }
            }
            rows.push(literals);
        }

        let width = rows.first().map(|r| r.len()).unwrap_or(0);
        if rows.iter().any(|r| r.len() != width) {
            return Err(validation!("VALUES rows must all have the same number of columns"));
        }

        let fields = (0..width)
            .map(|col| {
                let datatype = rows
                    .iter()
                    .map(|r| r[col].datatype())
                    .find(|t| *t != DataType::Null)
                    .unwrap_or(DataType::Null);
                let nullable = rows.iter().any(|r| r[col] == ScalarValue::Null);
                Field::new(format!("EXPR${col}"), datatype, nullable)
            })
            .collect();

        Ok(LogicalPlan::Values(Values { fields, rows }))
    }

    fn resolve_target(
        &self,
        name: &ast::ObjectName,
        verb: &str,
    ) -> Result<(ResolvedTableReference, TableDef)> {
        let resolved = TableReference::try_from(name)?.resolve_with_default(&self.database);
        let def = require_table(self.catalog, &resolved)?;
        if def.is_view() {
            return Err(validation!("Cannot {verb} view '{resolved}'"));
        }
        Ok((resolved, def))
    }

    fn plan_insert(
        &self,
        table_name: &ast::ObjectName,
        columns: &[ast::Ident],
        source: Option<&ast::Query>,
    ) -> Result<LogicalPlan> {
        let (table, def) = self.resolve_target(table_name, "insert into")?;
        let source = source.ok_or_else(|| unsupported!("INSERT without a source query"))?;
        let input = self.plan_query(source, &CteScope::default())?;
        let source_width = input.num_columns()?;
        let target = def.fields();

        let input = if columns.is_empty() {
            if source_width != target.len() {
                return Err(validation!(
                    "Number of INSERT target columns ({}) does not equal number of source items ({})",
                    target.len(),
                    source_width
                ));
            }
            input
        } else {
            let names: Vec<_> = columns.iter().map(normalize_ident).collect();
            if names.len() != source_width {
                return Err(validation!(
                    "Number of INSERT target columns ({}) does not equal number of source items ({})",
                    names.len(),
                    source_width
                ));
            }
            if let Some(unknown) = names.iter().find(|n| !target.iter().any(|f| &f.name == *n)) {
                return Err(validation!("Unknown target column '{unknown}'"));
            }
            let exprs = target
                .iter()
                .map(|field| match names.iter().position(|n| n == &field.name) {
                    Some(pos) => Ok(ScalarExpr::column(pos)),
                    None if field.nullable => Ok(ScalarExpr::literal(ScalarValue::Null)),
                    None => Err(validation!(
                        "Column '{}' has no default value and does not allow NULLs",
                        field.name
                    )),
                })
                .collect::<Result<Vec<_>>>()?;
            LogicalPlan::Project(Project {
                exprs,
                names: target.iter().map(|f| f.name.clone()).collect(),
                input: Box::new(input),
            })
        };

        Ok(LogicalPlan::TableModify(TableModify {
            table,
            operation: ModifyOperation::Insert,
            update_columns: Vec::new(),
            input: Box::new(input),
        }))
    }

    fn plan_update(
        &self,
        table: &ast::TableWithJoins,
        assignments: &[ast::Assignment],
        from: Option<&ast::TableWithJoins>,
        selection: Option<&ast::Expr>,
    ) -> Result<LogicalPlan> {
        if from.is_some() || !table.joins.is_empty() {
            return Err(unsupported!("UPDATE with joins"));
        }
        let ast::TableFactor::Table { name, alias, .. } = &table.relation else {
            return Err(unsupported!("UPDATE target: {}", table.relation));
        };
        let (resolved, def) = self.resolve_target(name, "update")?;
        let (mut plan, scope) =
            self.modify_source(resolved.clone(), &def, alias.as_ref(), selection)?;

        let fields = def.fields();
        let mut exprs: Vec<_> = (0..fields.len()).map(ScalarExpr::column).collect();
        let mut names: Vec<_> = fields.iter().map(|f| f.name.clone()).collect();
        let mut update_columns = Vec::with_capacity(assignments.len());
        for assignment in assignments {
            let column = assignment
                .id
                .last()
                .map(normalize_ident)
                .ok_or_else(|| internal!("empty assignment target"))?;
            if !fields.iter().any(|f| f.name == column) {
                return Err(validation!("Unknown target column '{column}'"));
            }
            exprs.push(self.bind_expr(&assignment.value, &ExprScope::Plain(&scope))?);
            names.push(format!("EXPR${}", names.len()));
            update_columns.push(column);
        }

        plan = LogicalPlan::Project(Project {
            exprs,
            names,
            input: Box::new(plan),
        });

        Ok(LogicalPlan::TableModify(TableModify {
            table: resolved,
            operation: ModifyOperation::Update,
            update_columns,
            input: Box::new(plan),
        }))
    }

    fn plan_delete(
        &self,
        from: &[ast::TableWithJoins],
        selection: Option<&ast::Expr>,
    ) -> Result<LogicalPlan> {
        let relation = match from {
            [table] if table.joins.is_empty() => &table.relation,
            _ => return Err(unsupported!("DELETE from multiple tables")),
        };
        let ast::TableFactor::Table { name, alias, .. } = relation else {
            return Err(unsupported!("DELETE target: {relation}"));
        };
        let (resolved, def) = self.resolve_target(name, "delete from")?;
        let (plan, _) = self.modify_source(resolved.clone(), &def, alias.as_ref(), selection)?;

        Ok(LogicalPlan::TableModify(TableModify {
            table: resolved,
            operation: ModifyOperation::Delete,
            update_columns: Vec::new(),
            input: Box::new(plan),
        }))
    }

    /// Scan of a modified table, filtered by the statement's WHERE clause.
    fn modify_source(
        &self,
        table: ResolvedTableReference,
        def: &TableDef,
        alias: Option<&ast::TableAlias>,
        selection: Option<&ast::Expr>,
    ) -> Result<(LogicalPlan, Scope)> {
        let qualifier = alias
            .map(|a| normalize_ident(&a.name))
            .unwrap_or_else(|| table.base.clone());
        let fields = def.fields();
        let scope = Scope::from_fields(Some(qualifier), fields.clone());
        let mut plan = LogicalPlan::Scan(Scan { table, fields });

        if let Some(selection) = selection {
            let condition = self.bind_expr(selection, &ExprScope::Plain(&scope))?;
            check_predicate(&condition, &scope.fields(), "WHERE")?;
            plan = LogicalPlan::Filter(Filter {
                condition,
                input: Box::new(plan),
            });
        }

        Ok((plan, scope))
    }

    /// Bind an AST expression to a scalar expression over the scope's columns.
    fn bind_expr(&self, expr: &ast::Expr, scope: &ExprScope<'_>) -> Result<ScalarExpr> {
        if let ExprScope::Grouped(grouped) = scope {
            if let Some(idx) = grouped.groups.iter().position(|g| g == expr) {
                return Ok(ScalarExpr::column(idx));
            }
            if let Some(idx) = grouped.aggregates.iter().position(|a| a == expr) {
                return Ok(ScalarExpr::column(grouped.groups.len() + idx));
            }
        }

        Ok(match expr {
            ast::Expr::Identifier(ident) => match scope {
                ExprScope::Plain(scope) => {
                    ScalarExpr::column(scope.resolve(None, &normalize_ident(ident))?)
                }
                ExprScope::Grouped(_) => {
                    return Err(validation!("Expression '{ident}' is not being grouped"));
                }
            },
            ast::Expr::CompoundIdentifier(idents) => match (scope, idents.as_slice()) {
                (ExprScope::Plain(scope), [qualifier, column]) => {
                    let qualifier = normalize_ident(qualifier);
                    ScalarExpr::column(scope.resolve(Some(&qualifier), &normalize_ident(column))?)
                }
                (ExprScope::Grouped(_), [_, _]) => {
                    return Err(validation!("Expression '{expr}' is not being grouped"));
                }
                _ => return Err(unsupported!("compound identifier: {expr}")),
            },
            ast::Expr::Value(value) => ScalarExpr::literal(bind_value(value)?),
            ast::Expr::Nested(inner) => self.bind_expr(inner, scope)?,
            ast::Expr::BinaryOp { left, op, right } => {
                let op = bind_binary_operator(op)?;
                ScalarExpr::binary(op, self.bind_expr(left, scope)?, self.bind_expr(right, scope)?)
            }
            ast::Expr::UnaryOp { op, expr: inner } => match op {
                ast::UnaryOperator::Plus => self.bind_expr(inner, scope)?,
                ast::UnaryOperator::Not => ScalarExpr::Unary {
                    op: UnaryOperator::Not,
                    expr: Box::new(self.bind_expr(inner, scope)?),
                },
                ast::UnaryOperator::Minus => match self.bind_expr(inner, scope)? {
                    ScalarExpr::Literal {
                        value: ScalarValue::Int64(n),
                    } => ScalarExpr::literal(ScalarValue::Int64(-n)),
                    ScalarExpr::Literal {
                        value: ScalarValue::Float64(n),
                    } => ScalarExpr::literal(ScalarValue::Float64(-n)),
                    bound => ScalarExpr::Unary {
                        op: UnaryOperator::Negate,
                        expr: Box::new(bound),
                    },
                },
                other => return Err(unsupported!("unary operator: {other}")),
            },
            ast::Expr::IsNull(inner) => ScalarExpr::IsNull {
                expr: Box::new(self.bind_expr(inner, scope)?),
                negated: false,
            },
            ast::Expr::IsNotNull(inner) => ScalarExpr::IsNull {
                expr: Box::new(self.bind_expr(inner, scope)?),
                negated: true,
            },
            ast::Expr::IsTrue(inner) => ScalarExpr::IsTrue {
                expr: Box::new(self.bind_expr(inner, scope)?),
                negated: false,
            },
            ast::Expr::IsNotTrue(inner) => ScalarExpr::IsTrue {
                expr: Box::new(self.bind_expr(inner, scope)?),
                negated: true,
            },
            ast::Expr::IsFalse(inner) => ScalarExpr::is_true(ScalarExpr::Unary {
                op: UnaryOperator::Not,
                expr: Box::new(self.bind_expr(inner, scope)?),
            }),
            ast::Expr::Like {
                negated,
                expr: inner,
                pattern,
                escape_char,
            } => {
                if escape_char.is_some() {
                    return Err(unsupported!("LIKE with ESCAPE"));
                }
                ScalarExpr::Like {
                    expr: Box::new(self.bind_expr(inner, scope)?),
                    pattern: Box::new(self.bind_expr(pattern, scope)?),
                    negated: *negated,
                }
            }
            ast::Expr::Between {
                expr: inner,
                negated,
                low,
                high,
            } => {
                let value = self.bind_expr(inner, scope)?;
                let between = ScalarExpr::and(
                    ScalarExpr::binary(
                        BinaryOperator::GtEq,
                        value.clone(),
                        self.bind_expr(low, scope)?,
                    ),
                    ScalarExpr::binary(BinaryOperator::LtEq, value, self.bind_expr(high, scope)?),
                );
                negate_if(between, *negated)
            }
            ast::Expr::InList {
                expr: inner,
                list,
                negated,
            } => {
                let value = self.bind_expr(inner, scope)?;
                let mut any = None;
                for item in list {
                    let eq = ScalarExpr::binary(
                        BinaryOperator::Eq,
                        value.clone(),
                        self.bind_expr(item, scope)?,
                    );
                    any = Some(match any {
                        None => eq,
                        Some(prev) => ScalarExpr::binary(BinaryOperator::Or, prev, eq),
                    });
                }
                let any = any.ok_or_else(|| validation!("IN list must not be empty"))?;
                negate_if(any, *negated)
            }
            ast::Expr::Function(func) => self.bind_function(func, scope)?,
            ast::Expr::Subquery(_) | ast::Expr::Exists { .. } | ast::Expr::InSubquery { .. } => {
                return Err(unsupported!("subquery expressions"));
            }
            other => return Err(unsupported!("expression: {other}")),
        })
    }

    fn bind_function(&self, func: &ast::Function, scope: &ExprScope<'_>) -> Result<ScalarExpr> {
        if func.over.is_some() {
            return Err(unsupported!("window functions"));
        }
        let name = normalize_object_name(&func.name).to_ascii_lowercase();
        if AggregateFunction::from_name(&name).is_some() {
            return Err(validation!(
                "Aggregate expression '{func}' is illegal in this clause"
            ));
        }

        let mut args = Vec::with_capacity(func.args.len());
        for arg in &func.args {
            match arg {
                ast::FunctionArg::Unnamed(ast::FunctionArgExpr::Expr(e)) => {
                    args.push(self.bind_expr(e, scope)?)
                }
                other => return Err(unsupported!("function argument: {other}")),
            }
        }

        let fields = scope.fields();
        let types = args
            .iter()
            .map(|arg| arg.datatype(&fields))
            .collect::<Result<Vec<_>>>()?;
        let return_type = self.functions.resolve_scalar(&name, &types)?;

        Ok(ScalarExpr::Call {
            name,
            args,
            return_type,
        })
    }
}

/// Output of planning a select body, with what's needed to resolve ORDER BY.
struct SelectPlan {
    plan: LogicalPlan,
    /// Select item expression for each output column, if written explicitly.
    exprs: Vec<Option<ast::Expr>>,
    /// Scope the top projection was bound in, if sort expressions may be added
    /// to it.
    sort_scope: Option<Scope>,
}

impl SelectPlan {
    fn opaque(plan: LogicalPlan) -> Self {
        SelectPlan {
            plan,
            exprs: Vec::new(),
            sort_scope: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct CteScope {
    ctes: Vec<(String, LogicalPlan)>,
}

impl CteScope {
    fn push(&mut self, name: String, plan: LogicalPlan) {
        self.ctes.push((name, plan));
    }

    fn get(&self, name: &str) -> Option<&LogicalPlan> {
        self.ctes
            .iter()
            .rev()
            .find(|(n, _)| n == name)
            .map(|(_, plan)| plan)
    }
}

#[derive(Debug, Clone)]
struct ScopeColumn {
    qualifier: Option<String>,
    field: Field,
}

/// Columns visible to expressions, in input order.
#[derive(Debug, Clone, Default)]
struct Scope {
    columns: Vec<ScopeColumn>,
}

impl Scope {
    fn from_fields(qualifier: Option<String>, fields: Vec<Field>) -> Scope {
        Scope {
            columns: fields
                .into_iter()
                .map(|field| ScopeColumn {
                    qualifier: qualifier.clone(),
                    field,
                })
                .collect(),
        }
    }

    fn len(&self) -> usize {
        self.columns.len()
    }

    fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    fn fields(&self) -> Vec<Field> {
        self.columns.iter().map(|c| c.field.clone()).collect()
    }

    fn qualifiers(&self) -> HashSet<&str> {
        self.columns
            .iter()
            .filter_map(|c| c.qualifier.as_deref())
            .collect()
    }

    /// Append another scope to the right of this one. Errors if there's any
    /// duplicate table references.
    fn append(&mut self, other: Scope) -> Result<()> {
        let existing = self.qualifiers();
        if let Some(dup) = other.qualifiers().into_iter().find(|q| existing.contains(q)) {
            return Err(validation!("Duplicate relation name '{dup}' in FROM clause"));
        }
        self.columns.extend(other.columns);
        Ok(())
    }

    fn requalify(&mut self, qualifier: String) {
        for col in &mut self.columns {
            col.qualifier = Some(qualifier.clone());
        }
    }

    fn resolve(&self, qualifier: Option<&str>, name: &str) -> Result<usize> {
        if let Some(qualifier) = qualifier {
            if !self.qualifiers().contains(qualifier) {
                return Err(validation!("Table '{qualifier}' not found"));
            }
        }
        let mut matches = self.columns.iter().enumerate().filter(|(_, c)| {
            c.field.name == name && qualifier.is_none_or(|q| c.qualifier.as_deref() == Some(q))
        });
        match (matches.next(), matches.next()) {
            (Some((idx, _)), None) => Ok(idx),
            (Some(_), Some(_)) => Err(validation!("Column '{name}' is ambiguous")),
            (None, _) => match qualifier {
                Some(q) => Err(validation!("Column '{name}' not found in table '{q}'")),
                None => Err(validation!("Column '{name}' not found in any table")),
            },
        }
    }

    fn resolve_in(&self, range: Range<usize>, name: &str) -> Result<usize> {
        let start = range.start;
        let mut matches = self.columns[range]
            .iter()
            .enumerate()
            .filter(|(_, c)| c.field.name == name);
        match (matches.next(), matches.next()) {
            (Some((idx, _)), None) => Ok(start + idx),
            (Some(_), Some(_)) => Err(validation!("Column '{name}' is ambiguous")),
            (None, _) => Err(validation!("Column '{name}' not found in any table")),
        }
    }

    fn qualified_columns(&self, qualifier: &str) -> Result<Vec<usize>> {
        let cols: Vec<_> = self
            .columns
            .iter()
            .enumerate()
            .filter(|(_, c)| c.qualifier.as_deref() == Some(qualifier))
            .map(|(idx, _)| idx)
            .collect();
        if cols.is_empty() {
            return Err(validation!("Unknown identifier '{qualifier}'"));
        }
        Ok(cols)
    }
}

/// Scope expressions are bound in after aggregation.
struct GroupedScope<'b> {
    groups: &'b [ast::Expr],
    aggregates: &'b [ast::Expr],
    /// Output of the aggregate: group columns followed by aggregate values.
    fields: &'b [Field],
}

enum ExprScope<'b> {
    Plain(&'b Scope),
    Grouped(GroupedScope<'b>),
}

impl ExprScope<'_> {
    fn fields(&self) -> Vec<Field> {
        match self {
            ExprScope::Plain(scope) => scope.fields(),
            ExprScope::Grouped(grouped) => grouped.fields.to_vec(),
        }
    }
}

/// Find every distinct aggregate call in the select list and HAVING clause.
fn collect_aggregates(select: &ast::Select) -> Result<Vec<ast::Expr>> {
    let mut aggregates: Vec<ast::Expr> = Vec::new();
    let mut visit = |expr: &ast::Expr| {
        if let ast::Expr::Function(func) = expr {
            let name = normalize_object_name(&func.name);
            if AggregateFunction::from_name(&name).is_some() {
                if func.over.is_some() {
                    return ControlFlow::Break(());
                }
                if !aggregates.contains(expr) {
                    aggregates.push(expr.clone());
                }
            }
        }
        ControlFlow::Continue(())
    };

    let mut flow = ControlFlow::Continue(());
    for item in &select.projection {
        if flow.is_break() {
            break;
        }
        flow = match item {
            ast::SelectItem::UnnamedExpr(expr) | ast::SelectItem::ExprWithAlias { expr, .. } => {
                ast::visit_expressions(expr, &mut visit)
            }
            _ => ControlFlow::Continue(()),
        };
    }
    if let Some(having) = &select.having {
        if flow.is_continue() {
            flow = ast::visit_expressions(having, &mut visit);
        }
    }
    if flow.is_break() {
        return Err(unsupported!("window functions"));
    }

    Ok(aggregates)
}

fn check_predicate(condition: &ScalarExpr, input: &[Field], clause: &str) -> Result<()> {
    let datatype = condition.datatype(input)?;
    if !datatype.is_boolean_like() {
        return Err(validation!(
            "{clause} clause must be a condition, got expression of type {datatype}"
        ));
    }
    Ok(())
}

fn negate_if(expr: ScalarExpr, negated: bool) -> ScalarExpr {
    if negated {
        ScalarExpr::Unary {
            op: UnaryOperator::Not,
            expr: Box::new(expr),
        }
    } else {
        expr
    }
}

fn derive_name(expr: &ast::Expr, position: usize) -> String {
    match expr {
        ast::Expr::Identifier(ident) => normalize_ident(ident),
        ast::Expr::CompoundIdentifier(idents) => idents
            .last()
            .map(normalize_ident)
            .unwrap_or_else(|| format!("EXPR${position}")),
        _ => format!("EXPR${position}"),
    }
}

fn qualifier_name(name: &ast::ObjectName) -> Result<String> {
    name.0
        .last()
        .map(normalize_ident)
        .ok_or_else(|| internal!("empty qualified wildcard"))
}

fn bind_value(value: &ast::Value) -> Result<ScalarValue> {
    Ok(match value {
        ast::Value::Number(s, _) => ScalarValue::parse_number(s)
            .ok_or_else(|| validation!("Failed to parse number '{s}'"))?,
        ast::Value::SingleQuotedString(s) => ScalarValue::Utf8(s.clone()),
        ast::Value::Boolean(b) => ScalarValue::Boolean(*b),
        ast::Value::Null => ScalarValue::Null,
        other => return Err(unsupported!("literal: {other}")),
    })
}

fn bind_binary_operator(op: &ast::BinaryOperator) -> Result<BinaryOperator> {
    Ok(match op {
        ast::BinaryOperator::Plus => BinaryOperator::Plus,
        ast::BinaryOperator::Minus => BinaryOperator::Minus,
        ast::BinaryOperator::Multiply => BinaryOperator::Multiply,
        ast::BinaryOperator::Divide => BinaryOperator::Divide,
        ast::BinaryOperator::Modulo => BinaryOperator::Modulo,
        ast::BinaryOperator::StringConcat => BinaryOperator::StringConcat,
        ast::BinaryOperator::Eq => BinaryOperator::Eq,
        ast::BinaryOperator::NotEq => BinaryOperator::NotEq,
        ast::BinaryOperator::Lt => BinaryOperator::Lt,
        ast::BinaryOperator::LtEq => BinaryOperator::LtEq,
        ast::BinaryOperator::Gt => BinaryOperator::Gt,
        ast::BinaryOperator::GtEq => BinaryOperator::GtEq,
        ast::BinaryOperator::And => BinaryOperator::And,
        ast::BinaryOperator::Or => BinaryOperator::Or,
        other => return Err(unsupported!("binary operator: {other}")),
    })
}

/// Resolve an ORDER BY item against the select output.
///
/// Returns `None` if the item isn't part of the select list.
fn resolve_order_by(
    expr: &ast::Expr,
    fields: &[Field],
    select_exprs: &[Option<ast::Expr>],
) -> Result<Option<usize>> {
    if let ast::Expr::Value(ast::Value::Number(s, _)) = expr {
        let ordinal: usize = s
            .parse()
            .map_err(|_| validation!("Invalid ORDER BY ordinal '{s}'"))?;
        if ordinal == 0 || ordinal > fields.len() {
            return Err(validation!("Ordinal out of range: {ordinal}"));
        }
        return Ok(Some(ordinal - 1));
    }
    if let Some(idx) = select_exprs.iter().position(|e| e.as_ref() == Some(expr)) {
        return Ok(Some(idx));
    }
    if let ast::Expr::Identifier(ident) = expr {
        let name = normalize_ident(ident);
        if let Some(idx) = fields.iter().position(|f| f.name == name) {
            return Ok(Some(idx));
        }
    }
    Ok(None)
}

fn parse_count(expr: &ast::Expr) -> Result<u64> {
    match expr {
        ast::Expr::Value(ast::Value::Number(s, _)) => s
            .parse()
            .map_err(|_| validation!("Invalid row count '{s}'")),
        other => Err(unsupported!("non-constant row count: {other}")),
    }
}

/// Rename the output columns of a plan according to an alias column list.
fn rename_output(plan: LogicalPlan, columns: &[ast::Ident]) -> Result<LogicalPlan> {
    if columns.is_empty() {
        return Ok(plan);
    }
    rename_output_names(plan, columns.iter().map(normalize_ident).collect())
}

fn rename_output_names(plan: LogicalPlan, names: Vec<String>) -> Result<LogicalPlan> {
    let fields = plan.output_fields()?;
    if fields.len() != names.len() {
        return Err(validation!(
            "List of column aliases must have same degree as table; table has {} columns, alias list has {}",
            fields.len(),
            names.len()
        ));
    }
    if fields.iter().zip(names.iter()).all(|(f, n)| &f.name == n) {
        return Ok(plan);
    }
    Ok(LogicalPlan::Project(Project {
        exprs: (0..names.len()).map(ScalarExpr::column).collect(),
        names,
        input: Box::new(plan),
    }))
}
