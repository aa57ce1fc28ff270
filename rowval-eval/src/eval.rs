//! Constant expression folding.
//!
//! Turns a parsed expression into a [`Scalar`] with no access to columns or
//! external state; only literals, numbered `$n` slot placeholders, and a
//! small arithmetic/string surface are supported. Anything outside that
//! surface reports [`Error::Unsupported`] with the offending expression text.

use arrow::datatypes::Field;
use rowval_result::{Error, Result};
use rowval_scalar::{Scalar, coerce_scalar};
use sqlparser::ast::{
    BinaryOperator, Expr, FunctionArg, FunctionArgExpr, FunctionArguments, ObjectNamePart,
    UnaryOperator, Value, ValueWithSpan,
};
use sqlparser::ast::DataType as SqlDataType;

use crate::types::sql_type_to_arrow;

/// True when the expression is a bare literal, i.e. something the streaming
/// literal reader might have handled were it not for surface differences
/// (quoting, signs) between the two grammars.
pub fn is_literal_expr(expr: &Expr) -> bool {
    matches!(expr, Expr::Value(_))
}

/// Parse a numeric literal the way the expression grammar sees it: exponent
/// forms become floats, dotted forms become inferred-scale decimals, and
/// everything else is an integer (falling back to float when it exceeds the
/// 64-bit range).
pub fn parse_number_scalar(text: &str) -> Result<Scalar> {
    if text.contains(['e', 'E']) {
        let value = text
            .parse::<f64>()
            .map_err(|_| Error::Syntax(format!("invalid numeric literal '{text}'")))?;
        return Ok(Scalar::Float64(value));
    }
    if text.contains('.') {
        let digits = text.chars().filter(|c| c.is_ascii_digit()).count();
        if digits <= usize::from(rowval_scalar::decimal::MAX_DECIMAL_PRECISION) {
            let scale = text
                .split_once('.')
                .map(|(_, frac)| frac.len())
                .unwrap_or(0);
            let precision = digits.max(1) as u8;
            let scale = i8::try_from(scale).map_err(|_| {
                Error::Syntax(format!("invalid numeric literal '{text}'"))
            })?;
            let value = rowval_scalar::decimal::parse_decimal128(text, precision, scale)?;
            return Ok(Scalar::Decimal128 { value, precision, scale });
        }
        let value = text
            .parse::<f64>()
            .map_err(|_| Error::Syntax(format!("invalid numeric literal '{text}'")))?;
        return Ok(Scalar::Float64(value));
    }
    match text.parse::<i64>() {
        Ok(value) => Ok(Scalar::Int64(value)),
        Err(_) => text
            .parse::<f64>()
            .map(Scalar::Float64)
            .map_err(|_| Error::Syntax(format!("invalid numeric literal '{text}'"))),
    }
}

fn literal_scalar(value: &ValueWithSpan, slots: &[Scalar]) -> Result<Scalar> {
    match &value.value {
        Value::Null => Ok(Scalar::Null),
        Value::Boolean(b) => Ok(Scalar::Boolean(*b)),
        Value::Number(text, _) => parse_number_scalar(text),
        Value::SingleQuotedString(s) => Ok(Scalar::Utf8(s.clone())),
        Value::Placeholder(raw) => {
            let index = raw
                .strip_prefix('$')
                .and_then(|rest| rest.parse::<usize>().ok())
                .ok_or_else(|| Error::Unsupported(format!("placeholder '{raw}'")))?;
            slots
                .get(index)
                .cloned()
                .ok_or_else(|| Error::Unsupported(format!("unbound placeholder '{raw}'")))
        }
        other => {
            if let Some(text) = other.clone().into_string() {
                Ok(Scalar::Utf8(text))
            } else {
                Err(Error::Unsupported(format!("unsupported literal: {other:?}")))
            }
        }
    }
}

fn from_typed_string(data_type: &SqlDataType, value: &ValueWithSpan) -> Result<Scalar> {
    let text = value.value.clone().into_string().ok_or_else(|| {
        Error::Syntax("typed string literal must be a quoted string".into())
    })?;
    match data_type {
        SqlDataType::Date => Ok(Scalar::Date32(rowval_scalar::date::parse_date32(&text)?)),
        _ => Ok(Scalar::Utf8(text)),
    }
}

fn decimal_to_f64(value: i128, scale: i8) -> f64 {
    value as f64 / 10f64.powi(i32::from(scale))
}

fn as_f64(value: &Scalar) -> Option<f64> {
    match value {
        Scalar::Int64(v) => Some(*v as f64),
        Scalar::Float64(v) => Some(*v),
        Scalar::Decimal128 { value, scale, .. } => Some(decimal_to_f64(*value, *scale)),
        _ => None,
    }
}

fn numeric_pair(op: &BinaryOperator, lhs: &Scalar, rhs: &Scalar) -> Result<(f64, f64)> {
    match (as_f64(lhs), as_f64(rhs)) {
        (Some(l), Some(r)) => Ok((l, r)),
        _ => Err(Error::TypeMismatch(format!(
            "operator '{op}' requires numeric operands, got {} and {}",
            lhs.kind_name(),
            rhs.kind_name()
        ))),
    }
}

fn checked_int_op(
    op: &BinaryOperator,
    l: i64,
    r: i64,
    f: impl Fn(i64, i64) -> Option<i64>,
) -> Result<Scalar> {
    f(l, r)
        .map(Scalar::Int64)
        .ok_or_else(|| Error::NumericRange(format!("integer overflow evaluating {l} {op} {r}")))
}

fn binary_op(op: &BinaryOperator, lhs: Scalar, rhs: Scalar) -> Result<Scalar> {
    if lhs.is_null() || rhs.is_null() {
        return Ok(Scalar::Null);
    }
    match op {
        BinaryOperator::Plus => match (&lhs, &rhs) {
            (Scalar::Int64(l), Scalar::Int64(r)) => checked_int_op(op, *l, *r, i64::checked_add),
            _ => numeric_pair(op, &lhs, &rhs).map(|(l, r)| Scalar::Float64(l + r)),
        },
        BinaryOperator::Minus => match (&lhs, &rhs) {
            (Scalar::Int64(l), Scalar::Int64(r)) => checked_int_op(op, *l, *r, i64::checked_sub),
            _ => numeric_pair(op, &lhs, &rhs).map(|(l, r)| Scalar::Float64(l - r)),
        },
        BinaryOperator::Multiply => match (&lhs, &rhs) {
            (Scalar::Int64(l), Scalar::Int64(r)) => checked_int_op(op, *l, *r, i64::checked_mul),
            _ => numeric_pair(op, &lhs, &rhs).map(|(l, r)| Scalar::Float64(l * r)),
        },
        BinaryOperator::Divide => {
            let (l, r) = numeric_pair(op, &lhs, &rhs)?;
            if matches!(rhs, Scalar::Int64(0)) {
                return Err(Error::NumericRange("division by zero".into()));
            }
            Ok(Scalar::Float64(l / r))
        }
        BinaryOperator::Modulo => match (&lhs, &rhs) {
            (Scalar::Int64(_), Scalar::Int64(0)) => {
                Err(Error::NumericRange("division by zero".into()))
            }
            (Scalar::Int64(l), Scalar::Int64(r)) => Ok(Scalar::Int64(l % r)),
            _ => numeric_pair(op, &lhs, &rhs).map(|(l, r)| Scalar::Float64(l % r)),
        },
        BinaryOperator::StringConcat => match (lhs, rhs) {
            (Scalar::Utf8(mut l), Scalar::Utf8(r)) => {
                l.push_str(&r);
                Ok(Scalar::Utf8(l))
            }
            (l, r) => Err(Error::TypeMismatch(format!(
                "'||' requires string operands, got {} and {}",
                l.kind_name(),
                r.kind_name()
            ))),
        },
        BinaryOperator::PGBitwiseShiftLeft | BinaryOperator::PGBitwiseShiftRight => {
            let (l, r) = numeric_pair(op, &lhs, &rhs)?;
            let (l, r) = (l as i64, r as i64);
            let shifted = if matches!(op, BinaryOperator::PGBitwiseShiftLeft) {
                l.wrapping_shl(r as u32)
            } else {
                l.wrapping_shr(r as u32)
            };
            Ok(Scalar::Int64(shifted))
        }
        other => Err(Error::Unsupported(format!(
            "unsupported operator '{other}' in constant expression"
        ))),
    }
}

fn function_args(func: &sqlparser::ast::Function) -> Result<&[FunctionArg]> {
    if func.uses_odbc_syntax
        || !matches!(func.parameters, FunctionArguments::None)
        || func.filter.is_some()
        || func.null_treatment.is_some()
        || func.over.is_some()
        || !func.within_group.is_empty()
    {
        return Err(Error::Unsupported(
            "advanced function clauses are not allowed in constant expressions".into(),
        ));
    }
    match &func.args {
        FunctionArguments::List(list) => {
            if list.duplicate_treatment.is_some() || !list.clauses.is_empty() {
                return Err(Error::Unsupported(
                    "function argument clauses are not allowed in constant expressions".into(),
                ));
            }
            Ok(&list.args)
        }
        FunctionArguments::None => Ok(&[]),
        FunctionArguments::Subquery(_) => Err(Error::Unsupported(
            "subquery arguments are not allowed in constant expressions".into(),
        )),
    }
}

fn function_name(func: &sqlparser::ast::Function) -> Result<String> {
    if func.name.0.len() == 1 {
        if let ObjectNamePart::Identifier(ident) = &func.name.0[0] {
            return Ok(ident.value.to_ascii_lowercase());
        }
    }
    Err(Error::Unsupported(format!(
        "unsupported function name '{}'",
        func.name
    )))
}

fn eval_function(func: &sqlparser::ast::Function, slots: &[Scalar]) -> Result<Scalar> {
    let name = function_name(func)?;
    let mut args = Vec::new();
    for arg in function_args(func)? {
        match arg {
            FunctionArg::Unnamed(FunctionArgExpr::Expr(expr)) => args.push(evaluate(expr, slots)?),
            _ => {
                return Err(Error::Unsupported(format!(
                    "unsupported argument form for function '{name}'"
                )));
            }
        }
    }

    let expect_arity = |n: usize| -> Result<()> {
        if args.len() != n {
            return Err(Error::TypeMismatch(format!(
                "function '{name}' expects {n} argument(s), got {}",
                args.len()
            )));
        }
        Ok(())
    };

    match name.as_str() {
        "abs" => {
            expect_arity(1)?;
            match &args[0] {
                Scalar::Null => Ok(Scalar::Null),
                Scalar::Int64(v) => v.checked_abs().map(Scalar::Int64).ok_or_else(|| {
                    Error::NumericRange(format!("integer overflow evaluating abs({v})"))
                }),
                Scalar::Float64(v) => Ok(Scalar::Float64(v.abs())),
                Scalar::Decimal128 { value, precision, scale } => Ok(Scalar::Decimal128 {
                    value: value.abs(),
                    precision: *precision,
                    scale: *scale,
                }),
                other => Err(Error::TypeMismatch(format!(
                    "abs() requires a numeric argument, got {}",
                    other.kind_name()
                ))),
            }
        }
        "upper" | "lower" => {
            expect_arity(1)?;
            match &args[0] {
                Scalar::Null => Ok(Scalar::Null),
                Scalar::Utf8(s) => Ok(Scalar::Utf8(if name == "upper" {
                    s.to_uppercase()
                } else {
                    s.to_lowercase()
                })),
                other => Err(Error::TypeMismatch(format!(
                    "{name}() requires a string argument, got {}",
                    other.kind_name()
                ))),
            }
        }
        "concat" => {
            let mut out = String::new();
            for arg in &args {
                match arg {
                    Scalar::Null => return Ok(Scalar::Null),
                    Scalar::Utf8(s) => out.push_str(s),
                    other => {
                        return Err(Error::TypeMismatch(format!(
                            "concat() requires string arguments, got {}",
                            other.kind_name()
                        )));
                    }
                }
            }
            Ok(Scalar::Utf8(out))
        }
        other => Err(Error::Unsupported(format!(
            "unsupported function '{other}' in constant expression"
        ))),
    }
}

/// Fold a constant expression into a value, resolving `$n` placeholders from
/// `slots`.
pub fn evaluate(expr: &Expr, slots: &[Scalar]) -> Result<Scalar> {
    match expr {
        Expr::Value(value) => literal_scalar(value, slots),
        Expr::TypedString { data_type, value } => from_typed_string(data_type, value),
        Expr::Nested(inner) => evaluate(inner, slots),
        Expr::UnaryOp { op: UnaryOperator::Plus, expr } => {
            let value = evaluate(expr, slots)?;
            match value {
                Scalar::Null
                | Scalar::Int64(_)
                | Scalar::Float64(_)
                | Scalar::Decimal128 { .. } => Ok(value),
                other => Err(Error::TypeMismatch(format!(
                    "cannot apply unary plus to a {} value",
                    other.kind_name()
                ))),
            }
        }
        Expr::UnaryOp { op: UnaryOperator::Minus, expr } => match evaluate(expr, slots)? {
            Scalar::Null => Ok(Scalar::Null),
            Scalar::Int64(v) => v.checked_neg().map(Scalar::Int64).ok_or_else(|| {
                Error::NumericRange(format!("integer overflow negating {v}"))
            }),
            Scalar::Float64(v) => Ok(Scalar::Float64(-v)),
            Scalar::Decimal128 { value, precision, scale } => Ok(Scalar::Decimal128 {
                value: value.checked_neg().ok_or_else(|| {
                    Error::NumericRange("decimal overflow in negation".into())
                })?,
                precision,
                scale,
            }),
            other => Err(Error::TypeMismatch(format!(
                "cannot negate a {} value",
                other.kind_name()
            ))),
        },
        Expr::UnaryOp { op, .. } => Err(Error::Unsupported(format!(
            "unsupported unary operator '{op}' in constant expression"
        ))),
        Expr::BinaryOp { left, op, right } => {
            let lhs = evaluate(left, slots)?;
            let rhs = evaluate(right, slots)?;
            binary_op(op, lhs, rhs)
        }
        Expr::Cast { expr, data_type, .. } => {
            let value = evaluate(expr, slots)?;
            let target = sql_type_to_arrow(data_type)?;
            coerce_scalar(value, &Field::new("", target, true))
        }
        Expr::Tuple(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(evaluate(item, slots)?);
            }
            Ok(Scalar::Struct(out))
        }
        Expr::Array(array) => {
            let mut out = Vec::with_capacity(array.elem.len());
            for item in &array.elem {
                out.push(evaluate(item, slots)?);
            }
            Ok(Scalar::List(out))
        }
        Expr::Function(func) => eval_function(func, slots),
        other => Err(Error::Unsupported(format!(
            "unsupported constant expression: {other}"
        ))),
    }
}

/// Rewrite the literal leaves of an expression into numbered `$n` slots, in
/// source order, returning the slot count.
///
/// Only numbers and single-quoted strings become slots: booleans and `NULL`
/// change typing or missing-value semantics, so expressions differing there
/// must not share a structure. An `Err` means the expression shape cannot be
/// templated at all.
pub fn slotify(expr: &mut Expr) -> Result<usize> {
    let mut count = 0usize;
    slotify_inner(expr, &mut count)?;
    Ok(count)
}

fn slotify_inner(expr: &mut Expr, count: &mut usize) -> Result<()> {
    match expr {
        Expr::Value(value) => {
            match &value.value {
                Value::Number(_, _) | Value::SingleQuotedString(_) => {
                    value.value = Value::Placeholder(format!("${count}"));
                    *count += 1;
                }
                Value::Null | Value::Boolean(_) => {}
                other => {
                    return Err(Error::Unsupported(format!(
                        "literal {other:?} cannot be templated"
                    )));
                }
            }
            Ok(())
        }
        Expr::Nested(inner) => slotify_inner(inner, count),
        Expr::UnaryOp { expr, .. } => slotify_inner(expr, count),
        Expr::BinaryOp { left, right, .. } => {
            slotify_inner(left, count)?;
            slotify_inner(right, count)
        }
        Expr::Cast { expr, .. } => slotify_inner(expr, count),
        Expr::Tuple(items) => {
            for item in items {
                slotify_inner(item, count)?;
            }
            Ok(())
        }
        Expr::Array(array) => {
            for item in &mut array.elem {
                slotify_inner(item, count)?;
            }
            Ok(())
        }
        Expr::Function(func) => {
            if func.uses_odbc_syntax
                || !matches!(func.parameters, FunctionArguments::None)
                || func.filter.is_some()
                || func.null_treatment.is_some()
                || func.over.is_some()
                || !func.within_group.is_empty()
            {
                return Err(Error::Unsupported(
                    "advanced function clauses cannot be templated".into(),
                ));
            }
            match &mut func.args {
                FunctionArguments::List(list) => {
                    for arg in &mut list.args {
                        match arg {
                            FunctionArg::Unnamed(FunctionArgExpr::Expr(expr)) => {
                                slotify_inner(expr, count)?;
                            }
                            _ => {
                                return Err(Error::Unsupported(
                                    "named function arguments cannot be templated".into(),
                                ));
                            }
                        }
                    }
                    Ok(())
                }
                FunctionArguments::None => Ok(()),
                FunctionArguments::Subquery(_) => Err(Error::Unsupported(
                    "subquery arguments cannot be templated".into(),
                )),
            }
        }
        other => Err(Error::Unsupported(format!(
            "expression '{other}' cannot be templated"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ExprReader, tokenize_expr_text};

    fn parse(text: &str) -> Expr {
        let tokens = tokenize_expr_text(text).unwrap();
        ExprReader::new(tokens, 50).parse_expr().unwrap()
    }

    #[test]
    fn folds_integer_arithmetic() {
        assert_eq!(evaluate(&parse("2 + 2"), &[]).unwrap(), Scalar::Int64(4));
        assert_eq!(evaluate(&parse("2 * 3 - 1"), &[]).unwrap(), Scalar::Int64(5));
        assert_eq!(evaluate(&parse("-(4)"), &[]).unwrap(), Scalar::Int64(-4));
    }

    #[test]
    fn division_produces_floats() {
        assert_eq!(evaluate(&parse("7 / 2"), &[]).unwrap(), Scalar::Float64(3.5));
        assert!(matches!(
            evaluate(&parse("1 / 0"), &[]),
            Err(Error::NumericRange(_))
        ));
    }

    #[test]
    fn integer_overflow_is_a_range_failure() {
        let expr = parse("9223372036854775807 + 1");
        assert!(matches!(evaluate(&expr, &[]), Err(Error::NumericRange(_))));
    }

    #[test]
    fn concatenates_strings() {
        assert_eq!(
            evaluate(&parse("'a' || 'b'"), &[]).unwrap(),
            Scalar::Utf8("ab".into())
        );
        assert_eq!(
            evaluate(&parse("concat('x', 'y', 'z')"), &[]).unwrap(),
            Scalar::Utf8("xyz".into())
        );
    }

    #[test]
    fn casts_through_arrow_types() {
        assert_eq!(
            evaluate(&parse("CAST(1 AS DOUBLE)"), &[]).unwrap(),
            Scalar::Float64(1.0)
        );
        assert_eq!(
            evaluate(&parse("CAST('1970-01-03' AS DATE)"), &[]).unwrap(),
            Scalar::Date32(2)
        );
    }

    #[test]
    fn nulls_propagate_through_arithmetic() {
        assert_eq!(evaluate(&parse("NULL + 1"), &[]).unwrap(), Scalar::Null);
    }

    #[test]
    fn dotted_literals_are_decimals() {
        assert_eq!(
            evaluate(&parse("1.50"), &[]).unwrap(),
            Scalar::Decimal128 { value: 150, precision: 3, scale: 2 }
        );
    }

    #[test]
    fn slots_bind_in_source_order() {
        let mut expr = parse("1 + abs(2)");
        assert_eq!(slotify(&mut expr).unwrap(), 2);
        let value = evaluate(&expr, &[Scalar::Int64(10), Scalar::Int64(-3)]).unwrap();
        assert_eq!(value, Scalar::Int64(13));
    }

    #[test]
    fn identifiers_cannot_be_templated_or_evaluated() {
        let mut expr = parse("a + 1");
        assert!(matches!(slotify(&mut expr), Err(Error::Unsupported(_))));
        assert!(matches!(evaluate(&expr, &[]), Err(Error::Unsupported(_))));
    }

    #[test]
    fn unknown_functions_are_unsupported() {
        assert!(matches!(
            evaluate(&parse("now()"), &[]),
            Err(Error::Unsupported(_))
        ));
    }
}
