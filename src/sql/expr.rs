//! Lowered expression AST.
//!
//! sqlparser's `Expr` has well over a hundred variants. The analysis only
//! needs to know a handful of things about an expression: which columns it
//! references, whether it is a bare column, whether it aggregates, whether it
//! generates rows, and which subqueries it embeds. Expressions are lowered
//! into this closed enum so every consumer can match exhaustively.

use std::collections::HashSet;
use std::fmt;
use std::sync::LazyLock;

use super::scope::ScopeId;

/// Aggregate function names.
static AGGREGATE_FUNCTIONS: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
    [
        "any_value",
        "approx_count_distinct",
        "approx_distinct",
        "approx_percentile",
        "array_agg",
        "avg",
        "bit_and",
        "bit_or",
        "bool_and",
        "bool_or",
        "collect_list",
        "collect_set",
        "corr",
        "count",
        "count_if",
        "covar_pop",
        "covar_samp",
        "every",
        "first",
        "group_concat",
        "json_agg",
        "last",
        "listagg",
        "max",
        "max_by",
        "median",
        "min",
        "min_by",
        "mode",
        "percentile_cont",
        "percentile_disc",
        "stddev",
        "stddev_pop",
        "stddev_samp",
        "string_agg",
        "sum",
        "var_pop",
        "var_samp",
        "variance",
    ]
    .into_iter()
    .collect()
});

/// Table-generating (row-multiplying) function names.
static TABLE_GENERATING_FUNCTIONS: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
    [
        "explode",
        "explode_outer",
        "flatten",
        "generate_series",
        "inline",
        "inline_outer",
        "json_array_elements",
        "json_each",
        "jsonb_array_elements",
        "posexplode",
        "posexplode_outer",
        "unnest",
    ]
    .into_iter()
    .collect()
});

/// A column reference, optionally qualified by a source alias.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ColumnRef {
    /// Source alias (or table name) the column is qualified with.
    pub table: Option<String>,
    /// Column name
    pub name: String,
}

impl ColumnRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            table: None,
            name: name.into(),
        }
    }

    pub fn qualified(table: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            table: Some(table.into()),
            name: name.into(),
        }
    }
}

impl fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.table {
            Some(table) => write!(f, "{}.{}", table, self.name),
            None => f.write_str(&self.name),
        }
    }
}

/// How a function call behaves with respect to rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionKind {
    /// One value per input row.
    Scalar,
    /// Collapses rows (`sum`, `count`, ...).
    Aggregate,
    /// Evaluated over a window (`... OVER (...)`).
    Window { aggregate: bool },
    /// Produces several rows per input row (`unnest`, `explode`, ...).
    TableGenerating,
}

impl FunctionKind {
    /// Classify a function by its (lower-cased) name and whether it has an
    /// `OVER` clause.
    pub fn classify(name: &str, windowed: bool) -> Self {
        let base = name.rsplit('.').next().unwrap_or(name);
        let aggregate = AGGREGATE_FUNCTIONS.contains(base);
        if windowed {
            FunctionKind::Window { aggregate }
        } else if TABLE_GENERATING_FUNCTIONS.contains(base) {
            FunctionKind::TableGenerating
        } else if aggregate {
            FunctionKind::Aggregate
        } else {
            FunctionKind::Scalar
        }
    }

    pub fn is_aggregate(&self) -> bool {
        matches!(
            self,
            FunctionKind::Aggregate | FunctionKind::Window { aggregate: true }
        )
    }
}

/// A function call.
#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    pub name: String,
    pub kind: FunctionKind,
    pub args: Vec<Expr>,
    /// Expressions from `FILTER (WHERE ...)`, `PARTITION BY` and window `ORDER BY`.
    pub modifiers: Vec<Expr>,
}

/// An expression the lowering does not model in detail.
///
/// Keeps the rendered SQL plus the column references and subqueries found
/// at its top level.
#[derive(Debug, Clone, PartialEq)]
pub struct Opaque {
    pub sql: String,
    pub args: Vec<Expr>,
    pub aggregate: bool,
    pub table_generating: bool,
}

/// Lowered SQL expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Column(ColumnRef),
    Literal(String),
    /// `*` or `t.*`
    Star { qualifier: Option<String> },
    Function(Function),
    Binary {
        op: String,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Unary {
        op: String,
        expr: Box<Expr>,
    },
    Cast {
        expr: Box<Expr>,
        data_type: String,
    },
    Case {
        operand: Option<Box<Expr>>,
        branches: Vec<(Expr, Expr)>,
        else_result: Option<Box<Expr>>,
    },
    /// A subquery, lowered into its own scope.
    Subquery(ScopeId),
    Opaque(Opaque),
}

impl Expr {
    /// The column this expression is, if it is nothing but a column reference.
    pub fn as_column(&self) -> Option<&ColumnRef> {
        match self {
            Expr::Column(col) => Some(col),
            _ => None,
        }
    }

    pub fn is_star(&self) -> bool {
        matches!(self, Expr::Star { .. })
    }

    /// Visit this expression and every nested expression, pre-order.
    ///
    /// Does not descend into subqueries; those are separate scopes.
    pub fn walk<'a>(&'a self, f: &mut impl FnMut(&'a Expr)) {
        f(self);
        match self {
            Expr::Column(_) | Expr::Literal(_) | Expr::Star { .. } | Expr::Subquery(_) => {}
            Expr::Function(func) => {
                for arg in func.args.iter().chain(&func.modifiers) {
                    arg.walk(f);
                }
            }
            Expr::Binary { left, right, .. } => {
                left.walk(f);
                right.walk(f);
            }
            Expr::Unary { expr, .. } | Expr::Cast { expr, .. } => expr.walk(f),
            Expr::Case {
                operand,
                branches,
                else_result,
            } => {
                if let Some(op) = operand {
                    op.walk(f);
                }
                for (condition, result) in branches {
                    condition.walk(f);
                    result.walk(f);
                }
                if let Some(else_expr) = else_result {
                    else_expr.walk(f);
                }
            }
            Expr::Opaque(opaque) => {
                for arg in &opaque.args {
                    arg.walk(f);
                }
            }
        }
    }

    /// Visit every column reference mutably.
    pub fn for_each_column_mut(&mut self, f: &mut impl FnMut(&mut ColumnRef)) {
        match self {
            Expr::Column(col) => f(col),
            Expr::Literal(_) | Expr::Star { .. } | Expr::Subquery(_) => {}
            Expr::Function(func) => {
                for arg in func.args.iter_mut().chain(func.modifiers.iter_mut()) {
                    arg.for_each_column_mut(f);
                }
            }
            Expr::Binary { left, right, .. } => {
                left.for_each_column_mut(f);
                right.for_each_column_mut(f);
            }
            Expr::Unary { expr, .. } | Expr::Cast { expr, .. } => expr.for_each_column_mut(f),
            Expr::Case {
                operand,
                branches,
                else_result,
            } => {
                if let Some(op) = operand {
                    op.for_each_column_mut(f);
                }
                for (condition, result) in branches {
                    condition.for_each_column_mut(f);
                    result.for_each_column_mut(f);
                }
                if let Some(else_expr) = else_result {
                    else_expr.for_each_column_mut(f);
                }
            }
            Expr::Opaque(opaque) => {
                for arg in &mut opaque.args {
                    arg.for_each_column_mut(f);
                }
            }
        }
    }

    /// All column references, in order of appearance.
    pub fn columns(&self) -> Vec<&ColumnRef> {
        let mut columns = Vec::new();
        self.walk(&mut |e| {
            if let Expr::Column(col) = e {
                columns.push(col);
            }
        });
        columns
    }

    /// All subqueries embedded in this expression.
    pub fn subqueries(&self) -> Vec<ScopeId> {
        let mut scopes = Vec::new();
        self.walk(&mut |e| {
            if let Expr::Subquery(id) = e {
                scopes.push(*id);
            }
        });
        scopes
    }

    /// Does any part of this expression aggregate rows?
    pub fn contains_aggregate(&self) -> bool {
        let mut found = false;
        self.walk(&mut |e| match e {
            Expr::Function(func) if func.kind.is_aggregate() => found = true,
            Expr::Opaque(opaque) if opaque.aggregate => found = true,
            _ => {}
        });
        found
    }

    /// Does any part of this expression generate rows?
    pub fn contains_table_function(&self) -> bool {
        let mut found = false;
        self.walk(&mut |e| match e {
            Expr::Function(func) if func.kind == FunctionKind::TableGenerating => found = true,
            Expr::Opaque(opaque) if opaque.table_generating => found = true,
            _ => {}
        });
        found
    }
}

/// Canonical rendering, used to compare expressions across versions.
impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Column(col) => write!(f, "{col}"),
            Expr::Literal(text) => f.write_str(text),
            Expr::Star { qualifier: Some(q) } => write!(f, "{q}.*"),
            Expr::Star { qualifier: None } => f.write_str("*"),
            Expr::Function(func) => {
                write!(f, "{}(", func.name)?;
                write_list(f, &func.args)?;
                f.write_str(")")?;
                if !func.modifiers.is_empty() {
                    f.write_str(" [")?;
                    write_list(f, &func.modifiers)?;
                    f.write_str("]")?;
                }
                if matches!(func.kind, FunctionKind::Window { .. }) {
                    f.write_str(" OVER")?;
                }
                Ok(())
            }
            Expr::Binary { op, left, right } => write!(f, "({left} {op} {right})"),
            Expr::Unary { op, expr } => write!(f, "({op} {expr})"),
            Expr::Cast { expr, data_type } => write!(f, "CAST({expr} AS {data_type})"),
            Expr::Case {
                operand,
                branches,
                else_result,
            } => {
                f.write_str("CASE")?;
                if let Some(op) = operand {
                    write!(f, " {op}")?;
                }
                for (condition, result) in branches {
                    write!(f, " WHEN {condition} THEN {result}")?;
                }
                if let Some(else_expr) = else_result {
                    write!(f, " ELSE {else_expr}")?;
                }
                f.write_str(" END")
            }
            Expr::Subquery(id) => write!(f, "(subquery {id})"),
            Expr::Opaque(opaque) => {
                // Column qualification may have changed since `sql` was captured.
                f.write_str(&opaque.sql)?;
                if !opaque.args.is_empty() {
                    f.write_str(" {")?;
                    write_list(f, &opaque.args)?;
                    f.write_str("}")?;
                }
                Ok(())
            }
        }
    }
}

fn write_list(f: &mut fmt::Formatter<'_>, exprs: &[Expr]) -> fmt::Result {
    for (i, expr) in exprs.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{expr}")?;
    }
    Ok(())
}
