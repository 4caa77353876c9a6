//! Runs a parsed catalog query over a synthesized table with polars.

use polars::prelude::*;
use regex::Regex;

use super::functions::{self, SessionInfo};
use super::metadata::CatalogSnapshot;
use super::query as q;
use super::registry::{ColumnDef, SystemTable};
use super::types;
use crate::backend::{ColumnMeta, RowSet, TypedValue};
use crate::error::{GatewayError, GatewayResult};

fn polars_err(e: PolarsError) -> GatewayError { GatewayError::catalog(e.to_string()) }

/// Convert a SQL LIKE pattern to an anchored regex: `%` -> `.*`, `_` -> `.`.
pub fn sql_like_to_regex(pat: &str) -> String {
    let mut out = String::from("^");
    for c in pat.chars() {
        match c {
            '%' => out.push_str(".*"),
            '_' => out.push('.'),
            '.' | '+' | '*' | '?' | '(' | ')' | '|' | '{' | '}' | '[' | ']' | '^' | '$' | '\\' => {
                out.push('\\');
                out.push(c);
            }
            _ => out.push(c),
        }
    }
    out.push('$');
    out
}

struct Ctx<'a> {
    table: Option<&'a dyn SystemTable>,
    snap: &'a CatalogSnapshot,
    session: &'a SessionInfo,
}

impl<'a> Ctx<'a> {
    fn column(&self, name: &str) -> GatewayResult<&'static ColumnDef> {
        self.table
            .and_then(|t| t.column(name))
            .ok_or_else(|| GatewayError::catalog(format!("column \"{}\" does not exist", name)))
    }

    fn resolve(&self, v: &q::Value) -> GatewayResult<q::Value> {
        Ok(match v {
            q::Value::RegClass(name) => match self.snap.resolve_relation(name) {
                Some(oid) => q::Value::Int(oid as i64),
                None => return Err(GatewayError::catalog(format!("relation \"{}\" does not exist", name))),
            },
            q::Value::RegNamespace(name) => q::Value::Int(self.snap.namespace_oid(&name.to_lowercase()) as i64),
            q::Value::Local(name) => match functions::evaluate(name, &[], self.session) {
                Some((tv, _)) => q::Value::from_param(&tv),
                None => return Err(GatewayError::catalog(format!("function {}() is not available", name))),
            },
            q::Value::List(items) => q::Value::List(items.iter().map(|i| self.resolve(i)).collect::<GatewayResult<_>>()?),
            other => other.clone(),
        })
    }

    fn predicate(&self, p: &q::Predicate) -> GatewayResult<Expr> {
        Ok(match p {
            q::Predicate::Compare { column, op, value } => {
                let def = self.column(column)?;
                self.compare(def, *op, &self.resolve(value)?)
            }
            q::Predicate::InList { column, values, negated } => {
                let def = self.column(column)?;
                let mut expr: Option<Expr> = None;
                for v in values {
                    let e = self.compare(def, q::CompareOp::Eq, &self.resolve(v)?);
                    expr = Some(match expr {
                        Some(acc) => acc.or(e),
                        None => e,
                    });
                }
                let expr = expr.unwrap_or_else(|| lit(false));
                if *negated { expr.not() } else { expr }
            }
            q::Predicate::Like { column, pattern, negated, case_insensitive } => {
                let def = self.column(column)?;
                let Some(pat) = self.resolve(pattern)?.as_key() else { return Ok(lit(false)) };
                let mut regex_text = sql_like_to_regex(&pat);
                if *case_insensitive {
                    regex_text.insert_str(0, "(?i)");
                }
                let re = match Regex::new(&regex_text) {
                    Ok(r) => r,
                    Err(_) => return Ok(lit(false)),
                };
                let pred = col(def.name).cast(DataType::String).map(
                    move |c: Column| {
                        let s = c.as_materialized_series();
                        let ca = s.str()?;
                        let vals: Vec<Option<bool>> = ca.into_iter().map(|v| v.map(|v| re.is_match(v))).collect();
                        Ok(Series::new("_like_pred".into(), vals).into_column())
                    },
                    |_schema, _field| Ok(Field::new("_like_pred".into(), DataType::Boolean)),
                );
                if *negated { pred.not() } else { pred }
            }
            q::Predicate::IsNull { column, negated } => {
                let def = self.column(column)?;
                if *negated { col(def.name).is_not_null() } else { col(def.name).is_null() }
            }
            q::Predicate::And(ps) => {
                let mut it = ps.iter();
                let first = it.next().map(|p| self.predicate(p)).transpose()?.unwrap_or_else(|| lit(true));
                it.try_fold(first, |acc, p| Ok::<_, GatewayError>(acc.and(self.predicate(p)?)))?
            }
            q::Predicate::Or(ps) => {
                let mut it = ps.iter();
                let first = it.next().map(|p| self.predicate(p)).transpose()?.unwrap_or_else(|| lit(false));
                it.try_fold(first, |acc, p| Ok::<_, GatewayError>(acc.or(self.predicate(p)?)))?
            }
            q::Predicate::Not(p) => self.predicate(p)?.not(),
            q::Predicate::Constant(b) => lit(*b),
        })
    }

    fn compare(&self, def: &ColumnDef, op: q::CompareOp, value: &q::Value) -> Expr {
        let c = col(def.name);
        match def.coltype.dtype() {
            DataType::Boolean => {
                let b = match value {
                    q::Value::Bool(b) => Some(*b),
                    q::Value::Int(i) => Some(*i != 0),
                    q::Value::Text(t) => match t.to_ascii_lowercase().as_str() {
                        "t" | "true" | "1" | "yes" | "on" => Some(true),
                        "f" | "false" | "0" | "no" | "off" => Some(false),
                        _ => None,
                    },
                    _ => None,
                };
                match (b, op) {
                    (Some(b), q::CompareOp::Eq) => c.eq(lit(b)),
                    (Some(b), q::CompareOp::NotEq) => c.neq(lit(b)),
                    _ => lit(false),
                }
            }
            DataType::Int32 | DataType::Int64 => {
                let Some(n) = value.as_f64() else { return lit(false) };
                let c = c.cast(DataType::Float64);
                match op {
                    q::CompareOp::Eq => c.eq(lit(n)),
                    q::CompareOp::NotEq => c.neq(lit(n)),
                    q::CompareOp::Lt => c.lt(lit(n)),
                    q::CompareOp::LtEq => c.lt_eq(lit(n)),
                    q::CompareOp::Gt => c.gt(lit(n)),
                    q::CompareOp::GtEq => c.gt_eq(lit(n)),
                }
            }
            _ => {
                let Some(key) = value.as_key() else { return lit(false) };
                let c = c.cast(DataType::String);
                match op {
                    q::CompareOp::Eq => c.eq(lit(key)),
                    q::CompareOp::NotEq => c.neq(lit(key)),
                    q::CompareOp::Lt => c.lt(lit(key)),
                    q::CompareOp::LtEq => c.lt_eq(lit(key)),
                    q::CompareOp::Gt => c.gt(lit(key)),
                    q::CompareOp::GtEq => c.gt_eq(lit(key)),
                }
            }
        }
    }

    /// Result type of a select expression, known before any row exists.
    fn operand_type(&self, op: &q::Operand) -> GatewayResult<i32> {
        Ok(match op {
            q::Operand::Column(c) => self.column(c)?.coltype.type_oid(),
            q::Operand::Value(v) => match v {
                q::Value::Int(_) => types::INT4,
                q::Value::Float(_) => types::FLOAT8,
                q::Value::Bool(_) => types::BOOL,
                q::Value::RegClass(_) | q::Value::RegNamespace(_) => types::OID,
                q::Value::Local(name) => functions::evaluate(name, &[], self.session).map(|r| r.1).unwrap_or(types::TEXT),
                _ => types::TEXT,
            },
            q::Operand::Call(name, _) => match name.as_str() {
                "format_type" | "pg_get_constraintdef" | "pg_get_indexdef" | "pg_get_expr" | "regclass_name" => types::TEXT,
                "coalesce" => types::TEXT,
                other => match functions::evaluate(other, &[TypedValue::text("")], self.session) {
                    Some((_, oid)) => oid,
                    None => return Err(GatewayError::catalog(format!("function {}() is not supported in catalog queries", other))),
                },
            },
        })
    }

    fn operand_value(&self, op: &q::Operand, df: Option<&DataFrame>, row: usize) -> GatewayResult<TypedValue> {
        match op {
            q::Operand::Column(c) => {
                let def = self.column(c)?;
                match df {
                    Some(df) => cell(df, def.name, row),
                    None => Ok(TypedValue::Null),
                }
            }
            q::Operand::Value(v) => Ok(to_typed(&self.resolve(v)?)),
            q::Operand::Call(name, args) => {
                let args: Vec<TypedValue> = args.iter().map(|a| self.operand_value(a, df, row)).collect::<GatewayResult<_>>()?;
                let oid_arg = |i: usize| -> Option<u32> {
                    match args.get(i)? {
                        TypedValue::Int(n) => u32::try_from(*n).ok(),
                        TypedValue::Text(t) => t.trim().parse().ok(),
                        _ => None,
                    }
                };
                Ok(match name.as_str() {
                    "format_type" => match oid_arg(0) {
                        Some(oid) => {
                            let typmod = match args.get(1) {
                                Some(TypedValue::Int(m)) => *m as i32,
                                _ => -1,
                            };
                            TypedValue::Text(types::format_type(oid as i32, typmod))
                        }
                        None => TypedValue::Null,
                    },
                    "pg_get_constraintdef" => oid_arg(0).and_then(|o| self.snap.constraint_def(o)).map(TypedValue::Text).unwrap_or(TypedValue::Null),
                    "pg_get_indexdef" => oid_arg(0).and_then(|o| self.snap.index_def(o)).map(TypedValue::Text).unwrap_or(TypedValue::Null),
                    "regclass_name" => match oid_arg(0) {
                        Some(o) => self.snap.relation_name(o).map(TypedValue::Text).unwrap_or_else(|| TypedValue::Text(o.to_string())),
                        None => TypedValue::Null,
                    },
                    // defaults are stored as expression text already
                    "pg_get_expr" => args.first().cloned().unwrap_or(TypedValue::Null),
                    "coalesce" => args.into_iter().find(|a| !a.is_null()).unwrap_or(TypedValue::Null),
                    other => match functions::evaluate(other, &args, self.session) {
                        Some((v, _)) => v,
                        None => return Err(GatewayError::catalog(format!("function {}() is not supported in catalog queries", other))),
                    },
                })
            }
        }
    }
}

fn to_typed(v: &q::Value) -> TypedValue {
    match v {
        q::Value::Null | q::Value::List(_) => TypedValue::Null,
        q::Value::Bool(b) => TypedValue::Bool(*b),
        q::Value::Int(i) => TypedValue::Int(*i),
        q::Value::Float(f) => TypedValue::Float(*f),
        q::Value::Text(s) | q::Value::Local(s) | q::Value::RegClass(s) | q::Value::RegNamespace(s) => TypedValue::Text(s.clone()),
    }
}

fn cell(df: &DataFrame, name: &str, row: usize) -> GatewayResult<TypedValue> {
    let column = df.column(name).map_err(polars_err)?;
    Ok(match column.as_materialized_series().get(row).map_err(polars_err)? {
        AnyValue::Null => TypedValue::Null,
        AnyValue::Boolean(b) => TypedValue::Bool(b),
        AnyValue::Int32(i) => TypedValue::Int(i as i64),
        AnyValue::Int64(i) => TypedValue::Int(i),
        AnyValue::UInt32(i) => TypedValue::Int(i as i64),
        AnyValue::Float64(f) => TypedValue::Float(f),
        AnyValue::String(s) => TypedValue::Text(s.to_string()),
        AnyValue::StringOwned(s) => TypedValue::Text(s.to_string()),
        other => TypedValue::Text(other.to_string()),
    })
}

enum Output<'q> {
    Column(&'static ColumnDef),
    Count,
    Computed(&'q q::Operand),
}

pub(crate) fn evaluate(
    query: &q::CatalogQuery,
    table: Option<&dyn SystemTable>,
    snap: &CatalogSnapshot,
    session: &SessionInfo,
) -> GatewayResult<RowSet> {
    let ctx = Ctx { table, snap, session };

    let mut outputs: Vec<(ColumnMeta, Output)> = Vec::new();
    for item in &query.items {
        match item {
            q::SelectItem::Star => {
                let t = table.ok_or_else(|| GatewayError::catalog("SELECT * needs a FROM clause"))?;
                for def in t.columns() {
                    outputs.push((ColumnMeta::new(def.name, def.coltype.type_oid()), Output::Column(def)));
                }
            }
            q::SelectItem::CountStar { .. } => outputs.push((ColumnMeta::new(item.label(), types::INT8), Output::Count)),
            q::SelectItem::Expr { operand: q::Operand::Column(c), .. } if table.is_some() => {
                let def = ctx.column(c)?;
                outputs.push((ColumnMeta::new(item.label(), def.coltype.type_oid()), Output::Column(def)));
            }
            q::SelectItem::Expr { operand, .. } => {
                outputs.push((ColumnMeta::new(item.label(), ctx.operand_type(operand)?), Output::Computed(operand)));
            }
        }
    }
    let aggregate = outputs.iter().any(|(_, o)| matches!(o, Output::Count));
    if aggregate && outputs.iter().any(|(_, o)| matches!(o, Output::Column(_))) {
        return Err(GatewayError::catalog("count(*) cannot be mixed with plain columns without GROUP BY"));
    }
    let columns: Vec<ColumnMeta> = outputs.iter().map(|(m, _)| m.clone()).collect();

    let Some(t) = table else {
        // FROM-less: one row, unless the filter says otherwise
        let keep = match &query.filter {
            Some(q::Predicate::Constant(b)) => *b,
            Some(_) => return Err(GatewayError::catalog("WHERE without FROM only supports constants")),
            None => true,
        };
        let mut rs = RowSet::with_columns(columns);
        if keep && query.offset == 0 && query.limit != Some(0) {
            let row = outputs
                .iter()
                .map(|(_, o)| match o {
                    Output::Computed(op) => ctx.operand_value(op, None, 0),
                    Output::Count => Ok(TypedValue::Int(1)),
                    Output::Column(_) => Ok(TypedValue::Null),
                })
                .collect::<GatewayResult<Vec<_>>>()?;
            rs.rows.push(row);
        }
        return Ok(rs);
    };

    let mut lf = t.build(snap).unwrap_or_else(|| super::registry::build_empty(t.columns())).lazy();
    if let Some(pred) = &query.filter {
        lf = lf.filter(ctx.predicate(pred)?);
    }
    let mut df = lf.collect().map_err(polars_err)?;

    if aggregate {
        let count = df.height() as i64;
        let mut rs = RowSet::with_columns(columns);
        if query.offset == 0 && query.limit != Some(0) {
            let row = outputs
                .iter()
                .map(|(_, o)| match o {
                    Output::Count => Ok(TypedValue::Int(count)),
                    Output::Computed(op) => ctx.operand_value(op, None, 0),
                    Output::Column(_) => Ok(TypedValue::Null),
                })
                .collect::<GatewayResult<Vec<_>>>()?;
            rs.rows.push(row);
        }
        return Ok(rs);
    }

    if !query.order_by.is_empty() {
        let mut exprs: Vec<Expr> = Vec::new();
        let mut descending: Vec<bool> = Vec::new();
        let mut nulls_last: Vec<bool> = Vec::new();
        for key in &query.order_by {
            let name = match &key.target {
                q::OrderTarget::Position(n) => match n.checked_sub(1).and_then(|i| outputs.get(i)) {
                    Some((_, Output::Column(def))) => def.name,
                    Some(_) => continue,
                    None => return Err(GatewayError::catalog(format!("ORDER BY position {} is not in select list", n))),
                },
                q::OrderTarget::Column(c) => {
                    // output alias first, then table column
                    let aliased = outputs.iter().find_map(|(m, o)| match o {
                        Output::Column(def) if m.name == *c => Some(def.name),
                        _ => None,
                    });
                    match aliased {
                        Some(n) => n,
                        None => ctx.column(c)?.name,
                    }
                }
            };
            exprs.push(col(name));
            descending.push(key.descending);
            nulls_last.push(key.nulls_last);
        }
        if !exprs.is_empty() {
            let opts = SortMultipleOptions { descending, nulls_last, maintain_order: true, multithreaded: true, limit: None };
            df = df.lazy().sort_by_exprs(exprs, opts).collect().map_err(polars_err)?;
        }
    }

    let height = df.height();
    let start = query.offset.min(height);
    let len = query.limit.unwrap_or(height).min(height - start);
    let df = df.slice(start as i64, len);

    let mut rs = RowSet::with_columns(columns);
    for row in 0..df.height() {
        let values = outputs
            .iter()
            .map(|(_, o)| match o {
                Output::Column(def) => cell(&df, def.name, row),
                Output::Computed(op) => ctx.operand_value(op, Some(&df), row),
                Output::Count => Ok(TypedValue::Null),
            })
            .collect::<GatewayResult<Vec<_>>>()?;
        rs.rows.push(values);
    }
    Ok(rs)
}
