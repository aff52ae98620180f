//! SQL to logical plan compilation.
//!
//! [`compile`] lowers an annotated SQL tree ([`crate::ast`]) into a
//! [`LogicalPlan`]. Lowering is a stateful walk threading one mutable
//! [`Compiler`] value: the in-scope field names, a stack of table contexts,
//! a fresh-name counter, and the memo of the active `GROUP BY`.
//!
//! A `SELECT` lowers in clause order - FROM, WHERE, GROUP BY, HAVING, the
//! select record, squash, ORDER BY, DISTINCT, OFFSET, LIMIT, synthetic
//! pruning - with each step bound by a fresh `Let` so later steps reference
//! the prior as `Free`.

// Allow the long select-lowering function
#![allow(clippy::too_many_lines)]

mod like;

use indexmap::IndexMap;
use tracing::{debug, trace};

use mangrove_core::{Data, FieldPath, Leaf};

use crate::ast::{
    AstNode, Attr, BinaryOp, DistinctKind, ExprKind, Projection, Select, SqlRelation, UnaryOp,
};
use crate::error::{SemanticError, SemanticResult};
use crate::plan::logical::{Function, LogicalPlan};

/// Compiles an annotated SQL tree into a logical plan.
///
/// Every compilation step is fallible and short-circuits at the first
/// error; on success the returned plan is a closed tree (every `Free` is
/// bound by an enclosing `Let`).
pub fn compile(node: &AstNode) -> SemanticResult<LogicalPlan> {
    let mut compiler = Compiler::default();
    let plan = compiler.compile_node(node)?;
    debug!("compiled {} fresh bindings", compiler.name_counter);
    Ok(plan)
}

/// The table context a relation establishes for expressions over it.
#[derive(Debug, Clone)]
struct TableContext {
    /// The term identifiers project from when resolved via the field list.
    root: LogicalPlan,
    /// The record of all columns; for joins, the concatenation of both
    /// sides.
    full: LogicalPlan,
    /// Addressable relations by alias or basename. On joins the union of
    /// both sides, left side winning duplicates.
    subtables: IndexMap<String, LogicalPlan>,
}

/// The memo of the active `GROUP BY`.
#[derive(Debug, Clone)]
struct Grouping {
    /// Reference to the grouped step.
    source: LogicalPlan,
    /// The compiled keys, rewritten to reference `source`.
    keys: Vec<LogicalPlan>,
}

/// Compiler state, threaded by exclusive reference through lowering.
#[derive(Debug, Default)]
struct Compiler {
    /// Known-in-scope column names; used to disambiguate identifiers from
    /// subtable references.
    fields: Vec<String>,
    /// Stack of table contexts, innermost last.
    context: Vec<TableContext>,
    /// Monotonic counter feeding [`Compiler::fresh_name`].
    name_counter: u64,
    /// The active `GROUP BY`, if any.
    grouping: Option<Grouping>,
}

impl Compiler {
    /// Emits a fresh `tmp{n}` name.
    ///
    /// User identifiers are never of that exact form (validator
    /// precondition), so fresh names cannot collide.
    fn fresh_name(&mut self) -> String {
        let n = self.name_counter;
        self.name_counter += 1;
        format!("tmp{n}")
    }

    fn table_ctx(&self) -> SemanticResult<&TableContext> {
        self.context.last().ok_or(SemanticError::CompiledTableMissing)
    }

    fn root_table(&self) -> SemanticResult<LogicalPlan> {
        Ok(self.table_ctx()?.root.clone())
    }

    fn subtable(&self, name: &str) -> SemanticResult<LogicalPlan> {
        let ctx = self.table_ctx()?;
        ctx.subtables
            .get(name)
            .cloned()
            .ok_or_else(|| SemanticError::CompiledSubtableMissing(name.to_string()))
    }

    /// Runs `f` with `ctx` pushed; the context is popped on the way out.
    fn contextual<T>(&mut self, ctx: TableContext, f: impl FnOnce(&mut Self) -> T) -> T {
        self.context.push(ctx);
        let out = f(self);
        self.context.pop();
        out
    }

    /// Runs `f` with the field list swapped in; the old list is restored on
    /// the way out.
    fn with_fields<T>(&mut self, fields: Vec<String>, f: impl FnOnce(&mut Self) -> T) -> T {
        let saved = std::mem::replace(&mut self.fields, fields);
        let out = f(self);
        self.fields = saved;
        out
    }

    /// Probes a compilation attempt: evaluates `f` and restores the full
    /// compiler state afterwards, fresh-name counter included, so nothing
    /// the probe did is observable.
    fn look_ahead<T>(&mut self, f: impl FnOnce(&mut Self) -> T) -> T {
        let saved =
            (self.fields.clone(), self.context.clone(), self.name_counter, self.grouping.clone());
        let out = f(self);
        (self.fields, self.context, self.name_counter, self.grouping) = saved;
        out
    }

    // ========== Expressions ==========

    fn compile_node(&mut self, node: &AstNode) -> SemanticResult<LogicalPlan> {
        match &node.kind {
            ExprKind::Select(select) => self.compile_select(select),
            ExprKind::Literal(d) => Ok(LogicalPlan::Constant(d.clone())),
            ExprKind::Ident(name) => self.compile_ident(name, &node.attr),
            ExprKind::Binop { op, lhs, rhs } => {
                let lhs = self.compile_node(lhs)?;
                let rhs = self.compile_node(rhs)?;
                Ok(binop_function(*op).of(vec![lhs, rhs]))
            }
            ExprKind::Unop { op, expr } => {
                let expr = self.compile_node(expr)?;
                Ok(unop_function(*op).of(vec![expr]))
            }
            ExprKind::InvokeFunction { name, args } => self.compile_invoke(node, name, args),
            ExprKind::Like { expr, pattern, escape } => {
                self.compile_like(expr, pattern, escape.as_deref())
            }
            ExprKind::Between { expr, low, high } => {
                let expr = self.compile_node(expr)?;
                let low = self.compile_node(low)?;
                let high = self.compile_node(high)?;
                Ok(Function::Between.of(vec![expr, low, high]))
            }
            ExprKind::Case { operand, when_then, otherwise } => {
                self.compile_case(operand.as_deref(), when_then, otherwise.as_deref())
            }
            ExprKind::Splice(inner) => match inner {
                None => Ok(self.table_ctx()?.full.clone()),
                Some(expr) => self.compile_node(expr),
            },
            ExprKind::SetLiteral(items) => {
                let data = items
                    .iter()
                    .map(|item| {
                        item.as_literal()
                            .cloned()
                            .ok_or_else(|| SemanticError::ExpectedLiteral("set element".into()))
                    })
                    .collect::<SemanticResult<Vec<_>>>()?;
                Ok(LogicalPlan::Constant(Data::set(data)))
            }
            ExprKind::ArrayLiteral(items) => {
                if let Some(data) =
                    items.iter().map(AstNode::as_literal).collect::<Option<Vec<_>>>()
                {
                    return Ok(LogicalPlan::Constant(Data::Arr(
                        data.into_iter().cloned().collect(),
                    )));
                }
                let compiled = items
                    .iter()
                    .map(|item| self.compile_node(item))
                    .collect::<SemanticResult<Vec<_>>>()?;
                Ok(LogicalPlan::make_array_n(compiled))
            }
        }
    }

    /// Resolves an identifier against the field list, falling back to the
    /// provenance annotation.
    fn compile_ident(&mut self, name: &str, attr: &Attr) -> SemanticResult<LogicalPlan> {
        if self.fields.iter().any(|f| f == name) {
            let root = self.root_table()?;
            return Ok(Function::ObjectProject.of(vec![root, LogicalPlan::str(name)]));
        }
        let relation = self.relation_name(name, attr)?;
        let key = basename(&relation);
        let table = self.subtable(key)?;
        if key == name {
            // A table-qualified reference: the whole row of the relation.
            Ok(table)
        } else {
            Ok(Function::ObjectProject.of(vec![table, LogicalPlan::str(name)]))
        }
    }

    /// Picks the relation an identifier belongs to from its provenance.
    fn relation_name(&self, ident: &str, attr: &Attr) -> SemanticResult<String> {
        let relations = attr.provenance.relations();
        match relations.as_slice() {
            [] => Err(SemanticError::NoTableDefined(ident.to_string())),
            [only] => Ok((*only).to_string()),
            several => {
                let matching: Vec<&&str> =
                    several.iter().filter(|r| basename(r) == ident).collect();
                match matching.as_slice() {
                    [only] => Ok((**only).to_string()),
                    _ => Err(SemanticError::AmbiguousReference(ident.to_string())),
                }
            }
        }
    }

    fn compile_invoke(
        &mut self,
        node: &AstNode,
        name: &str,
        args: &[AstNode],
    ) -> SemanticResult<LogicalPlan> {
        let func = node
            .attr
            .func
            .or_else(|| Function::by_name(name))
            .ok_or_else(|| SemanticError::FunctionNotBound(name.to_string()))?;
        let compiled = args
            .iter()
            .map(|arg| {
                // COUNT(*) and friends aggregate a constant per row.
                if func.is_aggregation() && matches!(arg.kind, ExprKind::Splice(None)) {
                    Ok(LogicalPlan::int(1))
                } else {
                    self.compile_node(arg)
                }
            })
            .collect::<SemanticResult<Vec<_>>>()?;
        Ok(func.of(compiled))
    }

    fn compile_like(
        &mut self,
        expr: &AstNode,
        pattern: &AstNode,
        escape: Option<&AstNode>,
    ) -> SemanticResult<LogicalPlan> {
        let compiled = self.compile_node(expr)?;
        let Some(Data::Str(pattern)) = pattern.as_literal() else {
            return Err(SemanticError::ExpectedLiteral("LIKE pattern".into()));
        };
        let escape = match escape {
            None => None,
            Some(node) => {
                let Some(Data::Str(esc)) = node.as_literal() else {
                    return Err(SemanticError::ExpectedLiteral("LIKE escape".into()));
                };
                let mut chars = esc.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => Some(c),
                    _ => {
                        return Err(SemanticError::generic(format!(
                            "LIKE escape must be a single character, got {esc:?}"
                        )))
                    }
                }
            }
        };
        let regex = like::regex_for_like(pattern, escape);
        Ok(Function::Search.of(vec![compiled, LogicalPlan::str(regex)]))
    }

    /// Desugars both CASE forms into nested conditionals.
    fn compile_case(
        &mut self,
        operand: Option<&AstNode>,
        when_then: &[(AstNode, AstNode)],
        otherwise: Option<&AstNode>,
    ) -> SemanticResult<LogicalPlan> {
        let operand = operand.map(|o| self.compile_node(o)).transpose()?;
        let mut acc = match otherwise {
            Some(e) => self.compile_node(e)?,
            None => LogicalPlan::Constant(Data::Null),
        };
        for (when, then) in when_then.iter().rev() {
            let when = self.compile_node(when)?;
            let then = self.compile_node(then)?;
            let test = match &operand {
                Some(op) => Function::Eq.of(vec![op.clone(), when]),
                None => when,
            };
            acc = Function::Cond.of(vec![test, then, acc]);
        }
        Ok(acc)
    }

    // ========== Relations ==========

    fn compile_relation(&mut self, relation: &SqlRelation) -> SemanticResult<LogicalPlan> {
        match relation {
            SqlRelation::Table { name, .. } => Ok(LogicalPlan::Read(read_path(name))),
            SqlRelation::Subquery { select, .. } => self.compile_node(select),
            SqlRelation::Join { left, right, kind, clause } => {
                let left_term = self.compile_relation(left)?;
                let right_term = self.compile_relation(right)?;
                let left_name = self.fresh_name();
                let right_name = self.fresh_name();
                let left_free = LogicalPlan::free(&left_name);
                let right_free = LogicalPlan::free(&right_name);

                // The ON clause sees both sides as addressable subtables.
                let clause_ctx = {
                    let left_ctx = self.table_context(&left_free, left)?;
                    let right_ctx = self.table_context(&right_free, right)?;
                    merge_contexts(left_ctx, right_ctx)
                };
                let clause_plan =
                    self.contextual(clause_ctx, |compiler| compiler.compile_node(clause))?;

                let func = match kind {
                    crate::ast::JoinKind::Inner => Function::InnerJoin,
                    crate::ast::JoinKind::LeftOuter => Function::LeftOuterJoin,
                    crate::ast::JoinKind::RightOuter => Function::RightOuterJoin,
                    crate::ast::JoinKind::FullOuter => Function::FullOuterJoin,
                };
                Ok(LogicalPlan::let_in(
                    left_name,
                    left_term,
                    LogicalPlan::let_in(
                        right_name,
                        right_term,
                        func.of(vec![left_free, right_free, clause_plan]),
                    ),
                ))
            }
        }
    }

    /// Builds the table context a relation establishes, addressing into
    /// `joined`.
    fn table_context(
        &self,
        joined: &LogicalPlan,
        relation: &SqlRelation,
    ) -> SemanticResult<TableContext> {
        match relation {
            SqlRelation::Table { name, alias } => {
                let key = alias.clone().unwrap_or_else(|| basename(name).to_string());
                Ok(TableContext {
                    root: joined.clone(),
                    full: joined.clone(),
                    subtables: std::iter::once((key, joined.clone())).collect(),
                })
            }
            SqlRelation::Subquery { alias, .. } => Ok(TableContext {
                root: joined.clone(),
                full: joined.clone(),
                subtables: std::iter::once((alias.clone(), joined.clone())).collect(),
            }),
            SqlRelation::Join { left, right, .. } => {
                let left_ctx = self.table_context(
                    &Function::ObjectProject.of(vec![joined.clone(), LogicalPlan::str("left")]),
                    left,
                )?;
                let right_ctx = self.table_context(
                    &Function::ObjectProject.of(vec![joined.clone(), LogicalPlan::str("right")]),
                    right,
                )?;
                let mut ctx = merge_contexts(left_ctx, right_ctx);
                ctx.root = joined.clone();
                Ok(ctx)
            }
        }
    }

    // ========== SELECT lowering ==========

    fn compile_select(&mut self, select: &Select) -> SemanticResult<LogicalPlan> {
        // Groupings are per-select; save and restore around the lowering.
        let saved_grouping = self.grouping.take();
        let result = self.compile_select_inner(select);
        self.grouping = saved_grouping;
        result
    }

    fn compile_select_inner(&mut self, select: &Select) -> SemanticResult<LogicalPlan> {
        trace!(projections = select.projections.len(), "lowering select");

        let names: Vec<String> = select
            .projections
            .iter()
            .enumerate()
            .map(|(i, p)| projection_name(p, i))
            .collect();
        let synthetic: Vec<String> = select
            .projections
            .iter()
            .zip(&names)
            .filter(|(p, _)| p.expr.attr.synthetic.is_some())
            .map(|(_, name)| name.clone())
            .collect();

        let mut chain: Vec<(String, LogicalPlan)> = Vec::new();
        let mut pushed_ctx = false;

        // 1. FROM
        let mut current: Option<LogicalPlan> = None;
        if let Some(relation) = &select.relation {
            let term = self.compile_relation(relation)?;
            let free = self.bind_step(&mut chain, term);
            let ctx = self.table_context(&free, relation)?;
            self.context.push(ctx);
            pushed_ctx = true;
            current = Some(free);
        }

        let result = self.select_steps(select, &names, &synthetic, &mut chain, current);

        if pushed_ctx {
            self.context.pop();
        }
        Ok(fold_lets(chain, result?))
    }

    fn select_steps(
        &mut self,
        select: &Select,
        names: &[String],
        synthetic: &[String],
        chain: &mut Vec<(String, LogicalPlan)>,
        mut current: Option<LogicalPlan>,
    ) -> SemanticResult<LogicalPlan> {
        // 2. WHERE
        if let Some(filter) = &select.filter {
            let input = current.clone().ok_or(SemanticError::CompiledTableMissing)?;
            let predicate = self.compile_node(filter)?;
            current = Some(self.bind_step(chain, Function::Filter.of(vec![input, predicate])));
        }

        // 3. GROUP BY - memoize the source and key set for the
        // grouped-reference rewrite.
        if let Some(group_by) = &select.group_by {
            let input = current.clone().ok_or(SemanticError::CompiledTableMissing)?;
            let keys = group_by
                .keys
                .iter()
                .map(|k| self.compile_node(k))
                .collect::<SemanticResult<Vec<_>>>()?;
            let term =
                Function::GroupBy.of(vec![input, LogicalPlan::make_array_n(keys.clone())]);
            let grouped = self.bind_step(chain, term);
            let root = self.root_table()?;
            let rewritten = keys.iter().map(|k| k.substitute(&root, &grouped)).collect();
            self.grouping = Some(Grouping { source: grouped.clone(), keys: rewritten });
            current = Some(grouped);
        }

        // 4. HAVING
        if let Some(having) = select.group_by.as_ref().and_then(|g| g.having.as_ref()) {
            let input = current.clone().ok_or(SemanticError::CompiledTableMissing)?;
            let predicate = self.compile_grouped(having)?;
            current = Some(self.bind_step(chain, Function::Filter.of(vec![input, predicate])));
        }

        // 5. SELECT record
        let record = self.build_record(select, names, current.as_ref())?;
        let Some(_) = &select.relation else {
            // Without a FROM clause the record is the result.
            return Ok(record);
        };
        current = Some(self.bind_step(chain, record));

        // 6. Squash the nested join shape onto a single level.
        let squash_input = current.clone().ok_or(SemanticError::CompiledTableMissing)?;
        current = Some(self.bind_step(chain, Function::Squash.of(vec![squash_input])));

        // 7. ORDER BY - keys resolve against the output record first, so
        // the select-list names (synthetic sort keys included) are in
        // scope; a key that does not resolve there falls back to the
        // table context. The attempt runs under `look_ahead` so a failed
        // probe leaves no trace in the compiler state.
        if let Some(order_by) = &select.order_by {
            let input = current.clone().ok_or(SemanticError::CompiledTableMissing)?;
            let mut key_plans = Vec::with_capacity(order_by.keys.len());
            for (_, key) in &order_by.keys {
                let resolves_against_output = self.look_ahead(|compiler| {
                    compiler
                        .with_output_fields(&input, names, |compiler| compiler.compile_node(key))
                        .is_ok()
                });
                let plan = if resolves_against_output {
                    self.with_output_fields(&input, names, |compiler| {
                        compiler.compile_node(key)
                    })?
                } else {
                    self.compile_node(key)?
                };
                key_plans.push(plan);
            }
            let tokens = order_by
                .keys
                .iter()
                .map(|(order, _)| LogicalPlan::str(order.token()))
                .collect();
            let term = Function::OrderBy.of(vec![
                input,
                LogicalPlan::make_array_n(key_plans),
                LogicalPlan::make_array_n(tokens),
            ]);
            current = Some(self.bind_step(chain, term));
        }

        // 8. DISTINCT / DISTINCT BY - synthetic sort keys must not
        // influence distinctness.
        if let Some(kind) = &select.distinct {
            let input = current.clone().ok_or(SemanticError::CompiledTableMissing)?;
            let term = match kind {
                DistinctKind::Distinct => {
                    if synthetic.is_empty() {
                        Function::Distinct.of(vec![input])
                    } else {
                        let key = delete_fields(input.clone(), synthetic);
                        Function::DistinctBy.of(vec![input, key])
                    }
                }
                DistinctKind::DistinctBy(keys) => {
                    let key_plans = self.with_output_fields(&input, names, |compiler| {
                        keys.iter()
                            .map(|k| compiler.compile_node(k))
                            .collect::<SemanticResult<Vec<_>>>()
                    })?;
                    Function::DistinctBy.of(vec![input, LogicalPlan::make_array_n(key_plans)])
                }
            };
            current = Some(self.bind_step(chain, term));
        }

        // 9. OFFSET
        if let Some(n) = select.offset {
            let input = current.clone().ok_or(SemanticError::CompiledTableMissing)?;
            let term = Function::Drop.of(vec![input, int_constant(n)?]);
            current = Some(self.bind_step(chain, term));
        }

        // 10. LIMIT
        if let Some(n) = select.limit {
            let input = current.clone().ok_or(SemanticError::CompiledTableMissing)?;
            let term = Function::Take.of(vec![input, int_constant(n)?]);
            current = Some(self.bind_step(chain, term));
        }

        // 11. Prune synthetic fields from the user-visible result.
        let mut result = current.ok_or(SemanticError::CompiledTableMissing)?;
        if !synthetic.is_empty() {
            result = delete_fields(result, synthetic);
        }
        Ok(result)
    }

    /// Builds the select record from the projection list.
    fn build_record(
        &mut self,
        select: &Select,
        names: &[String],
        table: Option<&LogicalPlan>,
    ) -> SemanticResult<LogicalPlan> {
        let mut pieces: Vec<LogicalPlan> = Vec::new();
        for (proj, name) in select.projections.iter().zip(names) {
            // Unnamed splices merge whole records into the projection.
            if proj.alias.is_none() {
                if let ExprKind::Splice(inner) = &proj.expr.kind {
                    let merged = match inner {
                        None => self.table_ctx()?.full.clone(),
                        Some(expr) => self.compile_grouped(expr)?,
                    };
                    pieces.push(merged);
                    continue;
                }
            }
            let mut compiled = self.compile_grouped(&proj.expr)?;
            if matches!(compiled, LogicalPlan::Constant(_)) {
                // Constant projections survive downstream set operations
                // only when tied to the table's rows.
                if let Some(table) = table {
                    compiled = Function::Constantly.of(vec![compiled, table.clone()]);
                }
            }
            pieces
                .push(Function::MakeObject.of(vec![LogicalPlan::str(name.clone()), compiled]));
        }

        let mut iter = pieces.into_iter();
        let Some(first) = iter.next() else {
            return Ok(LogicalPlan::Constant(Data::obj([])));
        };
        Ok(iter.fold(first, |acc, piece| Function::ObjectConcat.of(vec![acc, piece])))
    }

    /// Compiles an expression, then applies the grouped-reference rewrite:
    /// references to the table root become references to the grouped
    /// source, and expressions equal to a grouping key are wrapped in
    /// `arbitrary` (a grouped non-aggregated column is one-of-the-values).
    fn compile_grouped(&mut self, node: &AstNode) -> SemanticResult<LogicalPlan> {
        let compiled = self.compile_node(node)?;
        let Some(grouping) = &self.grouping else {
            return Ok(compiled);
        };
        let Ok(root) = self.root_table() else {
            return Ok(compiled);
        };
        let rewritten = compiled.substitute(&root, &grouping.source);
        Ok(wrap_grouped_keys(&rewritten, &grouping.keys))
    }

    /// Runs `f` with the output record in scope: the field list holds the
    /// select-list names and identifiers project from `record`.
    fn with_output_fields<T>(
        &mut self,
        record: &LogicalPlan,
        names: &[String],
        f: impl FnOnce(&mut Self) -> T,
    ) -> T {
        let ctx = TableContext {
            root: record.clone(),
            full: record.clone(),
            subtables: IndexMap::new(),
        };
        self.contextual(ctx, |compiler| compiler.with_fields(names.to_vec(), f))
    }

    /// Binds `term` as a fresh step and returns the `Free` later steps
    /// reference it by.
    fn bind_step(
        &mut self,
        chain: &mut Vec<(String, LogicalPlan)>,
        term: LogicalPlan,
    ) -> LogicalPlan {
        let name = self.fresh_name();
        let free = LogicalPlan::free(&name);
        chain.push((name, term));
        free
    }
}

/// Wraps maximal subtrees equal to a grouping key in `arbitrary`, without
/// descending into aggregations or subqueries.
fn wrap_grouped_keys(plan: &LogicalPlan, keys: &[LogicalPlan]) -> LogicalPlan {
    if keys.contains(plan) {
        return Function::Arbitrary.of(vec![plan.clone()]);
    }
    match plan {
        LogicalPlan::Invoke { func, .. } if func.is_aggregation() => plan.clone(),
        LogicalPlan::Invoke { func, args } => LogicalPlan::Invoke {
            func: *func,
            args: args.iter().map(|arg| wrap_grouped_keys(arg, keys)).collect(),
        },
        other => other.clone(),
    }
}

/// Folds bound steps into nested `Let`s around `body`. A body that is just
/// the reference to the last step collapses into that step's term.
fn fold_lets(mut chain: Vec<(String, LogicalPlan)>, body: LogicalPlan) -> LogicalPlan {
    if let LogicalPlan::Free(name) = &body {
        if chain.last().map(|(last, _)| last == name).unwrap_or(false) {
            if let Some((_, term)) = chain.pop() {
                return fold_lets(chain, term);
            }
        }
    }
    chain
        .into_iter()
        .rev()
        .fold(body, |acc, (name, term)| LogicalPlan::let_in(name, term, acc))
}

fn merge_contexts(left: TableContext, right: TableContext) -> TableContext {
    let full = Function::ObjectConcat.of(vec![left.full.clone(), right.full]);
    let mut subtables = left.subtables;
    for (key, term) in right.subtables {
        subtables.entry(key).or_insert(term);
    }
    TableContext { root: full.clone(), full, subtables }
}

fn delete_fields(mut term: LogicalPlan, names: &[String]) -> LogicalPlan {
    for name in names {
        term = Function::DeleteField.of(vec![term, LogicalPlan::str(name.clone())]);
    }
    term
}

fn int_constant(n: u64) -> SemanticResult<LogicalPlan> {
    let n = i64::try_from(n)
        .map_err(|_| SemanticError::generic(format!("row count {n} out of range")))?;
    Ok(LogicalPlan::int(n))
}

fn projection_name(proj: &Projection, index: usize) -> String {
    if let Some(alias) = &proj.alias {
        return alias.clone();
    }
    match &proj.expr.kind {
        ExprKind::Ident(name) => name.clone(),
        _ => format!("c{index}"),
    }
}

/// The last path segment of a relation name such as `/db/zips`.
fn basename(name: &str) -> &str {
    name.rsplit('/').next().unwrap_or(name)
}

/// A relation name as a read path: `/db/zips` reads `db.zips`.
fn read_path(name: &str) -> FieldPath {
    let leaves: Vec<Leaf> =
        name.split('/').filter(|s| !s.is_empty()).map(Leaf::name).collect();
    FieldPath::from_leaves(leaves).unwrap_or_else(|| FieldPath::name(name))
}

fn binop_function(op: BinaryOp) -> Function {
    match op {
        BinaryOp::And => Function::And,
        BinaryOp::Or => Function::Or,
        BinaryOp::Eq => Function::Eq,
        BinaryOp::Neq => Function::Neq,
        BinaryOp::Lt => Function::Lt,
        BinaryOp::Lte => Function::Lte,
        BinaryOp::Gt => Function::Gt,
        BinaryOp::Gte => Function::Gte,
        BinaryOp::Plus => Function::Add,
        BinaryOp::Minus => Function::Subtract,
        BinaryOp::Mult => Function::Multiply,
        BinaryOp::Div => Function::Divide,
        BinaryOp::Mod => Function::Modulo,
        BinaryOp::Concat => Function::Concat,
    }
}

fn unop_function(op: UnaryOp) -> Function {
    match op {
        UnaryOp::Not => Function::Not,
        UnaryOp::Neg => Function::Negate,
        UnaryOp::IsNull => Function::IsNull,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{GroupBy, OrderBy, OrderType, Provenance};

    fn zips_ident(name: &str) -> AstNode {
        AstNode::ident(name).with_provenance(Provenance::relation("zips"))
    }

    /// Peels nested lets into (bindings, body).
    fn unroll(plan: &LogicalPlan) -> (Vec<(&str, &LogicalPlan)>, &LogicalPlan) {
        let mut bindings = Vec::new();
        let mut cursor = plan;
        while let LogicalPlan::Let { name, binding, body } = cursor {
            bindings.push((name.as_str(), binding.as_ref()));
            cursor = body;
        }
        (bindings, cursor)
    }

    #[test]
    fn select_column_from_table() {
        // SELECT city FROM zips
        let select = Select::new(vec![Projection::new(zips_ident("city"))])
            .from(SqlRelation::table("zips"));
        let plan = compile(&AstNode::select(select)).unwrap();

        let (bindings, body) = unroll(&plan);
        assert_eq!(bindings.len(), 2);
        assert_eq!(bindings[0].1, &LogicalPlan::read("zips"));

        // The record step projects `city` out of the table step.
        let record = bindings[1].1;
        let from_free = LogicalPlan::free(bindings[0].0);
        assert_eq!(
            record,
            &Function::MakeObject.of(vec![
                LogicalPlan::str("city"),
                Function::ObjectProject.of(vec![from_free, LogicalPlan::str("city")]),
            ])
        );

        // The body squashes the record step.
        assert_eq!(body, &Function::Squash.of(vec![LogicalPlan::free(bindings[1].0)]));
    }

    #[test]
    fn select_star_merges_the_full_table() {
        // SELECT * FROM zips WHERE city = 'BOSTON'
        let predicate = AstNode::binop(
            BinaryOp::Eq,
            zips_ident("city"),
            AstNode::literal("BOSTON"),
        );
        let select = Select::new(vec![Projection::new(AstNode::splice_all())])
            .from(SqlRelation::table("zips"))
            .filter(predicate);
        let plan = compile(&AstNode::select(select)).unwrap();

        let (bindings, _) = unroll(&plan);
        let from_free = LogicalPlan::free(bindings[0].0);
        assert_eq!(
            bindings[1].1,
            &Function::Filter.of(vec![
                from_free.clone(),
                Function::Eq.of(vec![
                    Function::ObjectProject.of(vec![from_free.clone(), LogicalPlan::str("city")]),
                    LogicalPlan::str("BOSTON"),
                ]),
            ])
        );
        // The record for `*` is the full table context, not a MakeObject.
        assert_eq!(bindings[2].1, &from_free);
    }

    #[test]
    fn group_by_wraps_keys_in_arbitrary() {
        // SELECT a, COUNT(*) FROM t GROUP BY a
        let t_ident = |name: &str| {
            AstNode::ident(name).with_provenance(Provenance::relation("t"))
        };
        let select = Select {
            distinct: None,
            projections: vec![
                Projection::new(t_ident("a")),
                Projection::new(AstNode::invoke("count", vec![AstNode::splice_all()])),
            ],
            relation: Some(SqlRelation::table("t")),
            filter: None,
            group_by: Some(GroupBy { keys: vec![t_ident("a")], having: None }),
            order_by: None,
            offset: None,
            limit: None,
        };
        let plan = compile(&AstNode::select(select)).unwrap();

        let (bindings, _) = unroll(&plan);
        let from_free = LogicalPlan::free(bindings[0].0);
        let project_a =
            Function::ObjectProject.of(vec![from_free.clone(), LogicalPlan::str("a")]);

        // Group step: GroupBy(t, MakeArrayN(a)).
        assert_eq!(
            bindings[1].1,
            &Function::GroupBy.of(vec![
                from_free,
                Function::MakeArray.of(vec![project_a]),
            ])
        );

        // Record step: a → Arbitrary(a'), c1 → Count(1), with references
        // rewritten onto the grouped step.
        let grouped_free = LogicalPlan::free(bindings[1].0);
        let grouped_a =
            Function::ObjectProject.of(vec![grouped_free, LogicalPlan::str("a")]);
        assert_eq!(
            bindings[2].1,
            &Function::ObjectConcat.of(vec![
                Function::MakeObject.of(vec![
                    LogicalPlan::str("a"),
                    Function::Arbitrary.of(vec![grouped_a]),
                ]),
                Function::MakeObject.of(vec![
                    LogicalPlan::str("c1"),
                    Function::Count.of(vec![LogicalPlan::int(1)]),
                ]),
            ])
        );
    }

    #[test]
    fn like_lowers_to_anchored_search() {
        // SELECT * FROM t WHERE name LIKE 'A\_%' ESCAPE '\'
        let like = AstNode::new(ExprKind::Like {
            expr: Box::new(
                AstNode::ident("name").with_provenance(Provenance::relation("t")),
            ),
            pattern: Box::new(AstNode::literal("A\\_%")),
            escape: Some(Box::new(AstNode::literal("\\"))),
        });
        let select = Select::new(vec![Projection::new(AstNode::splice_all())])
            .from(SqlRelation::table("t"))
            .filter(like);
        let plan = compile(&AstNode::select(select)).unwrap();

        let (bindings, _) = unroll(&plan);
        let from_free = LogicalPlan::free(bindings[0].0);
        assert_eq!(
            bindings[1].1,
            &Function::Filter.of(vec![
                from_free.clone(),
                Function::Search.of(vec![
                    Function::ObjectProject.of(vec![from_free, LogicalPlan::str("name")]),
                    LogicalPlan::str("^A_.*$"),
                ]),
            ])
        );
    }

    #[test]
    fn like_requires_literal_pattern_and_short_escape() {
        let mk = |pattern: AstNode, escape: Option<AstNode>| {
            let like = AstNode::new(ExprKind::Like {
                expr: Box::new(AstNode::literal("x")),
                pattern: Box::new(pattern),
                escape: escape.map(Box::new),
            });
            compile(&like)
        };

        assert!(matches!(
            mk(AstNode::ident("p"), None),
            Err(SemanticError::ExpectedLiteral(_))
        ));
        assert!(matches!(
            mk(AstNode::literal("a%"), Some(AstNode::literal("xy"))),
            Err(SemanticError::Generic(_))
        ));
        assert!(mk(AstNode::literal("a%"), Some(AstNode::literal("x"))).is_ok());
    }

    #[test]
    fn identifier_resolution_errors() {
        let unknown = AstNode::ident("ghost");
        let select = Select::new(vec![Projection::new(unknown)])
            .from(SqlRelation::table("zips"));
        assert!(matches!(
            compile(&AstNode::select(select)),
            Err(SemanticError::NoTableDefined(_))
        ));

        let ambiguous = AstNode::ident("x").with_provenance(
            Provenance::relation("a").and(Provenance::relation("b")),
        );
        let select = Select::new(vec![Projection::new(ambiguous)]).from(SqlRelation::join(
            SqlRelation::table("a"),
            SqlRelation::table("b"),
            crate::ast::JoinKind::Inner,
            AstNode::literal(true),
        ));
        assert!(matches!(
            compile(&AstNode::select(select)),
            Err(SemanticError::AmbiguousReference(_))
        ));
    }

    #[test]
    fn ambiguity_disambiguates_by_relation_basename() {
        // `zips` resolves even though provenance names two relations,
        // because exactly one basename matches the identifier.
        let qualified = AstNode::ident("zips").with_provenance(
            Provenance::relation("/db/zips").and(Provenance::relation("/db/people")),
        );
        let select = Select::new(vec![Projection::new(qualified)]).from(SqlRelation::join(
            SqlRelation::table("/db/zips"),
            SqlRelation::table("/db/people"),
            crate::ast::JoinKind::Inner,
            AstNode::literal(true),
        ));
        let plan = compile(&AstNode::select(select)).unwrap();
        // Table-qualified reference: the record holds the whole subtable.
        let (bindings, _) = unroll(&plan);
        assert!(bindings.iter().any(|(_, term)| {
            matches!(term, LogicalPlan::Invoke { func: Function::MakeObject, .. })
        }));
    }

    #[test]
    fn join_binds_both_sides() {
        let clause = AstNode::binop(
            BinaryOp::Eq,
            AstNode::ident("id").with_provenance(Provenance::relation("a")),
            AstNode::ident("owner").with_provenance(Provenance::relation("b")),
        );
        let select = Select::new(vec![Projection::new(AstNode::splice_all())]).from(
            SqlRelation::join(
                SqlRelation::table("a"),
                SqlRelation::table("b"),
                crate::ast::JoinKind::LeftOuter,
                clause,
            ),
        );
        let plan = compile(&AstNode::select(select)).unwrap();

        let (bindings, _) = unroll(&plan);
        // The FROM step is itself a nested Let binding both sides.
        let (join_bindings, join_body) = unroll(bindings[0].1);
        assert_eq!(join_bindings.len(), 2);
        assert_eq!(join_bindings[0].1, &LogicalPlan::read("a"));
        assert_eq!(join_bindings[1].1, &LogicalPlan::read("b"));
        match join_body {
            LogicalPlan::Invoke { func: Function::LeftOuterJoin, args } => {
                assert_eq!(args[0], LogicalPlan::free(join_bindings[0].0));
                assert_eq!(args[1], LogicalPlan::free(join_bindings[1].0));
            }
            other => panic!("expected a join invocation, got {other}"),
        }
    }

    #[test]
    fn order_by_resolves_output_names_and_emits_tokens() {
        let select = Select::new(vec![Projection::new(zips_ident("city"))])
            .from(SqlRelation::table("zips"))
            .order_by(vec![(OrderType::Desc, AstNode::ident("city"))]);
        let plan = compile(&AstNode::select(select)).unwrap();

        // Steps: from, record, squash; the order step is the body.
        let (bindings, body) = unroll(&plan);
        let args = match body {
            LogicalPlan::Invoke { func: Function::OrderBy, args } => args,
            other => panic!("expected order_by at the tail, got {}", other),
        };
        // Keys project from the squash step, not the raw table.
        let squash_free = LogicalPlan::free(bindings[2].0);
        assert_eq!(args[0], squash_free);
        assert_eq!(
            args[1],
            Function::MakeArray.of(vec![Function::ObjectProject
                .of(vec![squash_free.clone(), LogicalPlan::str("city")])])
        );
        assert_eq!(
            args[2],
            Function::MakeArray.of(vec![LogicalPlan::str("DESC")])
        );
    }

    #[test]
    fn order_by_falls_back_to_the_table_for_unprojected_keys() {
        // ORDER BY pop, where pop is neither projected nor injected as a
        // synthetic sort key: the output-record probe fails and the key
        // resolves against the table context instead.
        let select = Select::new(vec![Projection::new(zips_ident("city"))])
            .from(SqlRelation::table("zips"))
            .order_by(vec![(OrderType::Asc, zips_ident("pop"))]);
        let plan = compile(&AstNode::select(select)).unwrap();

        let (bindings, body) = unroll(&plan);
        let args = match body {
            LogicalPlan::Invoke { func: Function::OrderBy, args } => args,
            other => panic!("expected order_by at the tail, got {other}"),
        };
        let from_free = LogicalPlan::free(bindings[0].0);
        assert_eq!(
            args[1],
            Function::MakeArray.of(vec![
                Function::ObjectProject.of(vec![from_free, LogicalPlan::str("pop")])
            ])
        );
        // The failed probe must not advance the fresh-name counter: the
        // step bindings stay densely numbered.
        let names: Vec<&str> = bindings.iter().map(|(name, _)| *name).collect();
        assert_eq!(names, vec!["tmp0", "tmp1", "tmp2"]);
    }

    #[test]
    fn distinct_strips_synthetic_sort_keys() {
        // SELECT DISTINCT city FROM zips ORDER BY pop - the analyzer adds a
        // synthetic `pop` projection for the sort key.
        let select = Select {
            distinct: Some(DistinctKind::Distinct),
            projections: vec![
                Projection::new(zips_ident("city")),
                Projection::aliased(zips_ident("pop").synthetic_sort_key(), "__sort0"),
            ],
            relation: Some(SqlRelation::table("zips")),
            filter: None,
            group_by: None,
            order_by: Some(OrderBy {
                keys: vec![(OrderType::Asc, AstNode::ident("__sort0"))],
            }),
            offset: None,
            limit: None,
        };
        let plan = compile(&AstNode::select(select)).unwrap();
        let (bindings, body) = unroll(&plan);

        // Distinctness is computed on the synthetic-stripped row.
        let distinct_step = bindings
            .iter()
            .chain(std::iter::once(&("", body)))
            .find_map(|(_, term)| match term {
                LogicalPlan::Invoke { func: Function::DistinctBy, args } => Some(args),
                _ => None,
            })
            .expect("a distinct_by step");
        match &distinct_step[1] {
            LogicalPlan::Invoke { func: Function::DeleteField, args } => {
                assert_eq!(args[1], LogicalPlan::str("__sort0"));
            }
            other => panic!("expected a delete_field key, got {}", other),
        }

        // The final body prunes the synthetic field.
        match body {
            LogicalPlan::Invoke { func: Function::DeleteField, args } => {
                assert_eq!(args[1], LogicalPlan::str("__sort0"));
            }
            other => panic!("expected pruning, got {}", other),
        }
    }

    #[test]
    fn offset_and_limit_lower_to_drop_and_take() {
        let select = Select::new(vec![Projection::new(zips_ident("city"))])
            .from(SqlRelation::table("zips"))
            .offset(20)
            .limit(10);
        let plan = compile(&AstNode::select(select)).unwrap();
        let (bindings, body) = unroll(&plan);

        let drop_args = bindings
            .iter()
            .find_map(|(_, term)| match term {
                LogicalPlan::Invoke { func: Function::Drop, args } => Some(args),
                _ => None,
            })
            .expect("a drop step");
        assert_eq!(drop_args[1], LogicalPlan::int(20));

        match body {
            LogicalPlan::Invoke { func: Function::Take, args } => {
                assert_eq!(args[1], LogicalPlan::int(10));
            }
            other => panic!("expected take at the tail, got {}", other),
        }
    }

    #[test]
    fn constant_projection_is_wrapped_in_constantly() {
        let select = Select::new(vec![Projection::aliased(AstNode::literal(1i64), "one")])
            .from(SqlRelation::table("zips"));
        let plan = compile(&AstNode::select(select)).unwrap();
        let (bindings, _) = unroll(&plan);
        let from_free = LogicalPlan::free(bindings[0].0);
        assert_eq!(
            bindings[1].1,
            &Function::MakeObject.of(vec![
                LogicalPlan::str("one"),
                Function::Constantly.of(vec![LogicalPlan::int(1), from_free]),
            ])
        );
    }

    #[test]
    fn case_desugars_to_nested_conds() {
        let case = AstNode::new(ExprKind::Case {
            operand: Some(Box::new(AstNode::literal(2i64))),
            when_then: vec![
                (AstNode::literal(1i64), AstNode::literal("one")),
                (AstNode::literal(2i64), AstNode::literal("two")),
            ],
            otherwise: None,
        });
        let plan = compile(&case).unwrap();
        assert_eq!(
            plan,
            Function::Cond.of(vec![
                Function::Eq.of(vec![LogicalPlan::int(2), LogicalPlan::int(1)]),
                LogicalPlan::str("one"),
                Function::Cond.of(vec![
                    Function::Eq.of(vec![LogicalPlan::int(2), LogicalPlan::int(2)]),
                    LogicalPlan::str("two"),
                    LogicalPlan::Constant(Data::Null),
                ]),
            ])
        );
    }

    #[test]
    fn set_literal_requires_literal_elements() {
        let bad = AstNode::new(ExprKind::SetLiteral(vec![AstNode::ident("x")]));
        assert!(matches!(compile(&bad), Err(SemanticError::ExpectedLiteral(_))));

        let good = AstNode::new(ExprKind::SetLiteral(vec![
            AstNode::literal(1i64),
            AstNode::literal(2i64),
        ]));
        assert_eq!(
            compile(&good).unwrap(),
            LogicalPlan::Constant(Data::Set(vec![Data::int(1), Data::int(2)]))
        );
    }

    #[test]
    fn set_literals_are_order_and_duplicate_insensitive() {
        let compile_set = |elems: Vec<i64>| {
            let nodes = elems.into_iter().map(AstNode::literal).collect();
            compile(&AstNode::new(ExprKind::SetLiteral(nodes))).unwrap()
        };

        // {2, 1} and {1, 2} denote the same set.
        assert_eq!(compile_set(vec![2, 1]), compile_set(vec![1, 2]));
        // {1, 1, 2} collapses to {1, 2}.
        assert_eq!(compile_set(vec![1, 1, 2]), compile_set(vec![1, 2]));
        assert_ne!(compile_set(vec![1, 2]), compile_set(vec![1, 3]));
    }

    #[test]
    fn fresh_names_are_monotonic() {
        let mut compiler = Compiler::default();
        assert_eq!(compiler.fresh_name(), "tmp0");
        assert_eq!(compiler.fresh_name(), "tmp1");
        compiler.look_ahead(|c| {
            assert_eq!(c.fresh_name(), "tmp2");
        });
        // look_ahead restores the counter along with the rest of the state.
        assert_eq!(compiler.fresh_name(), "tmp2");
    }
}
