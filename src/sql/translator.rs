//! Statement lowering.
//!
//! Turns a parsed [`Statement`] into a [`CompiledCommand`]. SELECT becomes an
//! aggregation pipeline whose stages run in a fixed order:
//!
//! 1. `$match` for WHERE conjuncts over the primary table
//! 2. `$lookup` + `$unwind` per JOIN, then `$match` for conjuncts over joined tables
//! 3. `$group`, HAVING `$match` and a flattening `$project` when grouping
//! 4. otherwise `$project` (or `$addFields` for `*, expr`) from the select list
//! 5. `$sort`, `$skip`, `$limit`

use std::collections::HashSet;

use serde_json::{json, Map, Value};

use super::ast::{
    BinaryOp, DeleteStatement, Expr, InsertSource, InsertStatement, JoinClause, JoinType,
    OrderByItem, SelectItem, SelectStatement, Statement, TableRef, UpdateStatement,
};
use super::binder::{ParamBinder, Params};
use super::command::{CompiledCommand, Pipeline, TransactionDirective};
use super::expr::{describe, is_constant, FieldResolver, GroupScope, Scope};
use super::filter::flatten;
use super::functions::FunctionTable;
use super::registry::{TableEntry, TableRegistry};
use crate::config::CompilerConfig;
use crate::error::{CompileError, CompileResult};

/// Lowering state for a single statement.
pub(crate) struct Translator<'a> {
    pub(super) registry: &'a dyn TableRegistry,
    pub(super) functions: &'a FunctionTable,
    pub(super) config: &'a CompilerConfig,
    pub(super) binder: ParamBinder<'a>,
}

/// Default output field of an aggregate without an alias: `count`,
/// `sum_price`, ...
fn aggregate_name(call: &Expr) -> String {
    match call {
        Expr::Function { name, args } => {
            let name = name.to_ascii_lowercase();
            match args.as_slice() {
                [Expr::Field(field)] => format!("{}_{}", name, field.leaf()),
                _ => name,
            }
        }
        other => describe(other),
    }
}

fn unique_name(base: String, seen: &mut HashSet<String>) -> String {
    let mut name = base.clone();
    let mut n = 2;
    while !seen.insert(name.clone()) {
        name = format!("{}_{}", base, n);
        n += 1;
    }
    name
}

/// Output field name of each select item.
pub(crate) fn output_names(columns: &[SelectItem]) -> Vec<String> {
    let mut seen = HashSet::new();
    columns
        .iter()
        .enumerate()
        .map(|(i, item)| {
            let base = match (&item.alias, &item.expr) {
                (Some(alias), _) => alias.clone(),
                (None, Expr::Field(field)) => field.leaf().to_string(),
                (None, call) if call.is_aggregate_call() => aggregate_name(call),
                (None, Expr::Function { name, .. }) => name.to_ascii_lowercase(),
                (None, Expr::Wildcard) => "*".to_string(),
                _ => format!("expr_{}", i + 1),
            };
            unique_name(base, &mut seen)
        })
        .collect()
}

/// Aggregate calls inside `expr`, outermost first.
fn collect_aggregates<'e>(expr: &'e Expr, out: &mut Vec<&'e Expr>) {
    match expr {
        call if call.is_aggregate_call() => out.push(call),
        Expr::Function { args, .. } => args.iter().for_each(|arg| collect_aggregates(arg, out)),
        Expr::BinaryOp { left, right, .. } => {
            collect_aggregates(left, out);
            collect_aggregates(right, out);
        }
        Expr::UnaryOp { operand, .. } => collect_aggregates(operand, out),
        _ => {}
    }
}

/// Sets `value` at a dotted path, creating intermediate documents.
fn set_path(doc: &mut Map<String, Value>, path: &str, value: Value) {
    match path.split_once('.') {
        Some((head, rest)) => {
            let child = doc
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !child.is_object() {
                *child = Value::Object(Map::new());
            }
            if let Value::Object(child) = child {
                set_path(child, rest, value);
            }
        }
        None => {
            doc.insert(path.to_string(), value);
        }
    }
}

/// A non-negative integer row count, if `value` is one.
fn row_count(value: &Value) -> Option<u64> {
    if let Some(n) = value.as_u64() {
        return Some(n);
    }
    value
        .as_f64()
        .filter(|f| f.is_finite() && *f >= 0.0 && f.fract() == 0.0)
        .map(|f| f as u64)
}

impl<'a> Translator<'a> {
    pub fn new(
        registry: &'a dyn TableRegistry,
        functions: &'a FunctionTable,
        config: &'a CompilerConfig,
        params: &'a Params,
    ) -> Self {
        Self {
            registry,
            functions,
            config,
            binder: ParamBinder::new(params),
        }
    }

    pub fn translate(&mut self, statement: &Statement) -> CompileResult<CompiledCommand> {
        let command = match statement {
            Statement::Select(select) => CompiledCommand::Select(self.translate_select(select)?),
            Statement::Insert(insert) => self.translate_insert(insert)?,
            Statement::Update(update) => self.translate_update(update)?,
            Statement::Delete(delete) => self.translate_delete(delete)?,
            Statement::Begin => CompiledCommand::TransactionControl {
                directive: TransactionDirective::Begin,
            },
            Statement::Commit => CompiledCommand::TransactionControl {
                directive: TransactionDirective::Commit,
            },
            Statement::Rollback => CompiledCommand::TransactionControl {
                directive: TransactionDirective::Rollback,
            },
        };
        Ok(command)
    }

    /// Checks that every supplied positional value was used, when configured to.
    pub fn finish(&self) -> CompileResult<()> {
        self.binder.finish(self.config.strict_positional)
    }

    fn scope_for(&self, table: &TableRef) -> CompileResult<Scope> {
        let entry = self.registry.resolve(&table.name)?;
        Ok(Scope::new(table, entry))
    }

    fn where_filter(
        &mut self,
        where_clause: Option<&Expr>,
        scope: &Scope,
    ) -> CompileResult<Value> {
        match where_clause {
            Some(expr) => self.compile_filter(expr, scope),
            None => Ok(json!({})),
        }
    }

    /// Lowers the given conjuncts, or nothing when there are none.
    fn conjunction(&mut self, conjuncts: &[&Expr], scope: &Scope) -> CompileResult<Option<Value>> {
        match conjuncts {
            [] => Ok(None),
            [single] => self.compile_filter(single, scope).map(Some),
            many => {
                let compiled = many
                    .iter()
                    .map(|c| self.compile_filter(c, scope))
                    .collect::<CompileResult<Vec<_>>>()?;
                Ok(Some(json!({ "$and": compiled })))
            }
        }
    }

    // ==================== SELECT ====================

    pub(crate) fn translate_select(&mut self, select: &SelectStatement) -> CompileResult<Pipeline> {
        let mut scope = self.scope_for(&select.from)?;
        for join in &select.joins {
            let entry = self.registry.resolve(&join.table.name)?;
            scope.add_join(&join.table, entry)?;
        }
        let primary = scope.primary().entry.clone();
        let mut pipeline = Vec::new();

        // Conjuncts over the primary table filter before the joins multiply rows
        let mut conjuncts = Vec::new();
        if let Some(where_clause) = &select.where_clause {
            flatten(where_clause, BinaryOp::And, &mut conjuncts);
        }
        let (late, early): (Vec<&Expr>, Vec<&Expr>) = conjuncts
            .into_iter()
            .partition(|c| scope.references_join(c));

        if let Some(filter) = self.conjunction(&early, &scope)? {
            pipeline.push(json!({ "$match": filter }));
        }
        for (i, join) in select.joins.iter().enumerate() {
            pipeline.extend(self.join_stages(join, i + 1, &scope)?);
        }
        if let Some(filter) = self.conjunction(&late, &scope)? {
            pipeline.push(json!({ "$match": filter }));
        }

        let grouped = !select.group_by.is_empty()
            || select.having.is_some()
            || select.columns.iter().any(|c| c.expr.contains_aggregate());
        if grouped {
            self.group_stages(select, &scope, &mut pipeline)?;
        } else {
            self.projection_stages(select, &scope, &mut pipeline)?;
        }

        if let Some(offset) = &select.offset {
            if let Some(n) = self.row_count_stage("OFFSET", offset)? {
                pipeline.push(json!({ "$skip": n }));
            }
        }
        if let Some(limit) = &select.limit {
            if let Some(n) = self.row_count_stage("LIMIT", limit)? {
                pipeline.push(json!({ "$limit": n }));
            }
        }

        let pipeline = Pipeline {
            collection: primary.collection,
            pipeline,
            index_hints: primary.index_hints,
        };
        tracing::debug!(
            collection = %pipeline.collection,
            stages = ?pipeline.stage_names(),
            "lowered SELECT"
        );
        Ok(pipeline)
    }

    fn row_count_stage(&mut self, clause: &str, expr: &Expr) -> CompileResult<Option<u64>> {
        let value = self.binder.bind(expr)?;
        let count = row_count(&value);
        if count.is_none() {
            tracing::debug!(clause, value = %value, "row count is not a non-negative integer; stage omitted");
        }
        Ok(count)
    }

    fn join_stages(
        &self,
        join: &JoinClause,
        index: usize,
        scope: &Scope,
    ) -> CompileResult<[Value; 2]> {
        let joined = scope.table(index).ok_or_else(|| {
            CompileError::UnresolvedTable(join.table.name.clone())
        })?;
        let on = &join.on;
        let (foreign, local) = match (scope.index_of(&on.left), scope.index_of(&on.right)) {
            (Some(l), r) if l == index && r != Some(index) => (&on.left, &on.right),
            (l, Some(r)) if r == index && l != Some(index) => (&on.right, &on.left),
            _ => {
                return Err(CompileError::UnsupportedFeature(format!(
                    "join condition must compare a column of {} with a column of an earlier table",
                    joined.binding
                )));
            }
        };
        if scope.index_of(local).is_some_and(|i| i > index) {
            return Err(CompileError::UnsupportedFeature(format!(
                "join on {} references a table joined later",
                joined.binding
            )));
        }

        let local_field = scope.field_path(local)?;
        let foreign_field = joined.entry.stored_path(&foreign.name);
        let preserve = join.join_type == JoinType::Left;
        Ok([
            json!({
                "$lookup": {
                    "from": joined.entry.collection,
                    "localField": local_field,
                    "foreignField": foreign_field,
                    "as": joined.binding,
                }
            }),
            json!({
                "$unwind": {
                    "path": format!("${}", joined.binding),
                    "preserveNullAndEmptyArrays": preserve,
                }
            }),
        ])
    }

    /// `$project` / `$addFields` and `$sort` for an ungrouped SELECT.
    fn projection_stages(
        &mut self,
        select: &SelectStatement,
        scope: &Scope,
        pipeline: &mut Vec<Value>,
    ) -> CompileResult<()> {
        let names = output_names(&select.columns);
        let has_wildcard = select.columns.iter().any(|c| c.expr == Expr::Wildcard);

        let mut fields = Map::new();
        for (item, name) in select.columns.iter().zip(&names) {
            if item.expr == Expr::Wildcard {
                continue;
            }
            let value = match &item.expr {
                Expr::Field(field) => {
                    let path = scope.field_path(field)?;
                    if path == *name {
                        if has_wildcard {
                            continue;
                        }
                        json!(1)
                    } else {
                        Value::String(format!("${}", path))
                    }
                }
                e if is_constant(e) => json!({ "$literal": self.binder.bind(e)? }),
                e => self.compile_expr(e, scope)?,
            };
            fields.insert(name.clone(), value);
        }

        let stage = if has_wildcard {
            (!fields.is_empty()).then(|| json!({ "$addFields": fields }))
        } else {
            if !fields.contains_key("_id") {
                let mut project = Map::new();
                project.insert("_id".to_string(), json!(0));
                project.extend(fields);
                fields = project;
            }
            Some(json!({ "$project": fields }))
        };

        if select.order_by.is_empty() {
            pipeline.extend(stage);
            return Ok(());
        }

        // Sort after the projection when every key survives it
        let projected: Option<Vec<String>> = select
            .order_by
            .iter()
            .map(|item| sort_output_name(&item.expr, &select.columns, &names, scope))
            .collect();
        match projected {
            Some(keys) => {
                pipeline.extend(stage);
                pipeline.push(sort_stage(keys, &select.order_by));
            }
            _ => {
                let mut keys = Vec::with_capacity(select.order_by.len());
                for item in &select.order_by {
                    let expr = resolve_alias(&item.expr, &select.columns, &names);
                    keys.push(self.sort_source_path(expr, scope)?);
                }
                pipeline.push(sort_stage(keys, &select.order_by));
                pipeline.extend(stage);
            }
        }
        Ok(())
    }

    fn sort_source_path(&self, expr: &Expr, resolver: &dyn FieldResolver) -> CompileResult<String> {
        match expr {
            Expr::Field(field) => resolver.field_path(field),
            call if call.is_aggregate_call() => resolver.aggregate_path(call),
            other => Err(CompileError::UnsupportedFeature(format!(
                "ORDER BY {} must name a column or a select-list alias",
                describe(other)
            ))),
        }
    }

    /// `$group`, HAVING `$match`, flattening `$project` and `$sort`.
    fn group_stages(
        &mut self,
        select: &SelectStatement,
        scope: &Scope,
        pipeline: &mut Vec<Value>,
    ) -> CompileResult<()> {
        if select.columns.iter().any(|c| c.expr == Expr::Wildcard) {
            return Err(CompileError::UnsupportedFeature(
                "SELECT * cannot be combined with GROUP BY or aggregates".to_string(),
            ));
        }
        let names = output_names(&select.columns);
        let mut groups = GroupScope::new(scope);

        let mut keys = Map::new();
        let mut key_names = HashSet::new();
        for field in &select.group_by {
            let path = scope.field_path(field)?;
            let key = unique_name(field.leaf().to_string(), &mut key_names);
            keys.insert(key.clone(), Value::String(format!("${}", path)));
            groups.add_key(path, key);
        }

        let mut accumulators = Map::new();
        let mut hidden = 0;
        for (item, name) in select.columns.iter().zip(&names) {
            if item.expr.is_aggregate_call() {
                // `_id` is the group key inside `$group`; park the value and rename it on output
                let field = if name == "_id" {
                    hidden += 1;
                    format!("__agg_{}", hidden)
                } else {
                    name.clone()
                };
                accumulators.insert(field.clone(), self.compile_aggregate(&item.expr, scope)?);
                groups.add_aggregate(item.expr.clone(), field);
                continue;
            }
            let mut nested = Vec::new();
            collect_aggregates(&item.expr, &mut nested);
            for call in nested {
                if groups.has_aggregate(call) {
                    continue;
                }
                hidden += 1;
                let name = format!("__agg_{}", hidden);
                accumulators.insert(name.clone(), self.compile_aggregate(call, scope)?);
                groups.add_aggregate(call.clone(), name);
            }
            if let (Expr::Field(field), Some(alias)) = (&item.expr, &item.alias) {
                let key = groups.key_for(field)?.map(str::to_string);
                if let Some(key) = key {
                    groups.add_key_alias(alias.clone(), key);
                }
            }
        }

        let mut group = Map::new();
        group.insert(
            "_id".to_string(),
            if keys.is_empty() { Value::Null } else { Value::Object(keys) },
        );
        group.extend(accumulators);
        pipeline.push(json!({ "$group": group }));

        if let Some(having) = &select.having {
            let filter = self.compile_filter(having, &groups)?;
            pipeline.push(json!({ "$match": filter }));
        }

        let mut project = Map::new();
        project.insert("_id".to_string(), json!(0));
        for (item, name) in select.columns.iter().zip(&names) {
            let value = if item.expr.is_aggregate_call() {
                let field = groups.aggregate_path(&item.expr)?;
                if field == *name {
                    json!(1)
                } else {
                    Value::String(format!("${}", field))
                }
            } else if is_constant(&item.expr) {
                json!({ "$literal": self.binder.bind(&item.expr)? })
            } else {
                self.compile_expr(&item.expr, &groups)?
            };
            project.insert(name.clone(), value);
        }

        let sort_keys: Option<Vec<String>> = select
            .order_by
            .iter()
            .map(|item| sort_output_name(&item.expr, &select.columns, &names, scope))
            .collect();
        match sort_keys {
            Some(keys) => {
                pipeline.push(json!({ "$project": project }));
                if !keys.is_empty() {
                    pipeline.push(sort_stage(keys, &select.order_by));
                }
            }
            None => {
                let mut keys = Vec::with_capacity(select.order_by.len());
                for item in &select.order_by {
                    keys.push(self.sort_source_path(&item.expr, &groups)?);
                }
                pipeline.push(sort_stage(keys, &select.order_by));
                pipeline.push(json!({ "$project": project }));
            }
        }
        Ok(())
    }

    // ==================== INSERT / UPDATE / DELETE ====================

    fn translate_insert(&mut self, insert: &InsertStatement) -> CompileResult<CompiledCommand> {
        let entry = self.registry.resolve(&insert.table)?;
        let command = match &insert.source {
            InsertSource::Values(rows) => {
                let documents = rows
                    .iter()
                    .map(|row| self.insert_document(&entry, insert.columns.as_deref(), row))
                    .collect::<CompileResult<Vec<_>>>()?;
                tracing::debug!(collection = %entry.collection, documents = documents.len(), "lowered INSERT");
                CompiledCommand::Insert {
                    collection: entry.collection,
                    documents,
                    query: None,
                }
            }
            InsertSource::Select(select) => {
                let mut query = self.translate_select(select)?;
                if let Some(columns) = &insert.columns {
                    if select.columns.iter().any(|c| c.expr == Expr::Wildcard) {
                        return Err(CompileError::UnsupportedFeature(
                            "INSERT with a column list cannot take SELECT *".to_string(),
                        ));
                    }
                    let names = output_names(&select.columns);
                    if names.len() != columns.len() {
                        return Err(CompileError::Parse(format!(
                            "INSERT names {} columns but SELECT produces {}",
                            columns.len(),
                            names.len()
                        )));
                    }
                    let mut project = Map::new();
                    project.insert("_id".to_string(), json!(0));
                    for (column, name) in columns.iter().zip(&names) {
                        project.insert(entry.stored_path(column), Value::String(format!("${}", name)));
                    }
                    query.pipeline.push(json!({ "$project": project }));
                }
                tracing::debug!(collection = %entry.collection, source = %query.collection, "lowered INSERT ... SELECT");
                CompiledCommand::Insert {
                    collection: entry.collection,
                    documents: Vec::new(),
                    query: Some(query),
                }
            }
        };
        Ok(command)
    }

    fn insert_document(
        &mut self,
        entry: &TableEntry,
        columns: Option<&[String]>,
        row: &[Expr],
    ) -> CompileResult<Value> {
        let mut document = Map::new();
        match columns {
            Some(columns) => {
                if columns.len() != row.len() {
                    return Err(CompileError::Parse(format!(
                        "INSERT names {} columns but a row has {} values",
                        columns.len(),
                        row.len()
                    )));
                }
                for (column, expr) in columns.iter().zip(row) {
                    let value = self.binder.bind(expr)?;
                    set_path(&mut document, &entry.stored_path(column), value);
                }
            }
            None => {
                let value = match row {
                    [param @ (Expr::Positional(_) | Expr::Named(_))] => self.binder.bind(param)?,
                    _ => {
                        return Err(CompileError::UnsupportedFeature(
                            "INSERT without a column list takes a single document parameter"
                                .to_string(),
                        ));
                    }
                };
                let fields = match value {
                    Value::Object(fields) => fields,
                    other => {
                        return Err(CompileError::Binding(format!(
                            "INSERT document parameter must be an object, got {}",
                            other
                        )));
                    }
                };
                for (name, value) in fields {
                    document.insert(entry.stored_path(&name), value);
                }
            }
        }
        Ok(Value::Object(document))
    }

    fn translate_update(&mut self, update: &UpdateStatement) -> CompileResult<CompiledCommand> {
        let scope = self.scope_for(&TableRef {
            name: update.table.clone(),
            alias: None,
        })?;
        let entry = &scope.primary().entry;

        let mut assignments = Map::new();
        for (column, expr) in &update.assignments {
            let value = self.binder.bind(expr)?;
            assignments.insert(entry.stored_path(column), value);
        }
        let filter = self.where_filter(update.where_clause.as_ref(), &scope)?;
        tracing::debug!(collection = %entry.collection, fields = assignments.len(), "lowered UPDATE");

        Ok(CompiledCommand::Update {
            collection: entry.collection.clone(),
            filter,
            assignments,
        })
    }

    fn translate_delete(&mut self, delete: &DeleteStatement) -> CompileResult<CompiledCommand> {
        let scope = self.scope_for(&TableRef {
            name: delete.table.clone(),
            alias: None,
        })?;
        let filter = self.where_filter(delete.where_clause.as_ref(), &scope)?;
        let collection = scope.primary().entry.collection.clone();
        tracing::debug!(collection = %collection, "lowered DELETE");
        Ok(CompiledCommand::Delete { collection, filter })
    }
}

/// Replaces a bare select-list alias with the aliased expression.
fn resolve_alias<'e>(expr: &'e Expr, columns: &'e [SelectItem], names: &[String]) -> &'e Expr {
    if let Expr::Field(field) = expr {
        if field.table.is_none() {
            if let Some((item, _)) = columns
                .iter()
                .zip(names)
                .find(|(item, name)| item.alias.is_some() && **name == field.name)
            {
                return &item.expr;
            }
        }
    }
    expr
}

/// Output field an ORDER BY key refers to, if it is in the select list.
fn sort_output_name(
    expr: &Expr,
    columns: &[SelectItem],
    names: &[String],
    scope: &Scope,
) -> Option<String> {
    if let Some((_, name)) = columns.iter().zip(names).find(|(item, _)| item.expr == *expr) {
        return Some(name.clone());
    }
    let Expr::Field(field) = expr else {
        return None;
    };
    if field.table.is_none() && names.iter().any(|name| *name == field.name) {
        return Some(field.name.clone());
    }
    let path = scope.field_path(field).ok()?;
    columns.iter().zip(names).find_map(|(item, name)| match &item.expr {
        Expr::Field(other) if scope.field_path(other).ok().as_deref() == Some(path.as_str()) => {
            Some(name.clone())
        }
        _ => None,
    })
}

fn sort_stage(keys: Vec<String>, items: &[OrderByItem]) -> Value {
    let mut sort = Map::new();
    for (key, item) in keys.into_iter().zip(items) {
        sort.insert(key, json!(if item.descending { -1 } else { 1 }));
    }
    json!({ "$sort": sort })
}
