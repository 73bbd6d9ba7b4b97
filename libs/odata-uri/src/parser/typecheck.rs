//! Operand and signature checks for expressions.

use odata_edm::{Edm, EdmType, FullQualifiedName, PrimitiveKind};

use crate::error::{UriError, UriResult};
use crate::expression::{BinaryOperator, Expression, MethodKind, UnaryOperator};

use PrimitiveKind as P;

/// Operand classification used by the checks.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Operand {
    /// `null` or an alias without a value: fits anywhere.
    Untyped,
    Primitive(PrimitiveKind),
    Enum(FullQualifiedName),
    Structured,
    Collection,
}

fn operand(edm: &Edm, expr: &Expression) -> Operand {
    if expr.is_collection() {
        return Operand::Collection;
    }
    match expr.edm_type() {
        None => Operand::Untyped,
        Some(EdmType::Enum(f)) => Operand::Enum(f),
        Some(t) if t.is_structured() => Operand::Structured,
        Some(t) => edm
            .underlying_primitive(&t)
            .map_or(Operand::Untyped, Operand::Primitive),
    }
}

fn is_boolean(op: &Operand) -> bool {
    matches!(op, Operand::Untyped | Operand::Primitive(P::Boolean))
}

/// Boolean-valued or untyped.
#[must_use]
pub fn is_boolean_expression(edm: &Edm, expr: &Expression) -> bool {
    is_boolean(&operand(edm, expr))
}

/// Whether `value` can be passed where `declared` is expected.
#[must_use]
pub fn assignable(edm: &Edm, declared: &EdmType, value: &Expression) -> bool {
    match (operand(edm, value), declared) {
        (Operand::Untyped, _) => true,
        (Operand::Enum(f), EdmType::Enum(d)) => edm.canonical(d) == f,
        (Operand::Primitive(p), _) => edm
            .underlying_primitive(declared)
            .is_some_and(|d| d.is_compatible_from(p)),
        (Operand::Structured, EdmType::Complex(d) | EdmType::Entity(d)) => value
            .edm_type()
            .and_then(|t| t.structured().cloned())
            .is_some_and(|t| edm.is_compatible(&t, d)),
        _ => false,
    }
}

fn integral_rank(p: PrimitiveKind) -> u8 {
    match p {
        P::Byte | P::SByte => 0,
        P::Int16 => 1,
        P::Int32 => 2,
        _ => 3,
    }
}

fn promote_numeric(a: PrimitiveKind, b: PrimitiveKind) -> PrimitiveKind {
    if a.is_integral() && b.is_integral() {
        if a != b && integral_rank(a) == 0 && integral_rank(b) == 0 {
            return P::Int16;
        }
        return if integral_rank(a) >= integral_rank(b) { a } else { b };
    }
    a.promote(b).unwrap_or(P::Decimal)
}

fn mismatch(op: &str, left: &Expression, right: &Expression) -> UriError {
    let show = |e: &Expression| {
        e.edm_type()
            .map_or_else(|| "null".to_owned(), |t| t.to_string())
    };
    UriError::type_mismatch(format!(
        "operator '{op}' cannot combine {} and {}",
        show(left),
        show(right)
    ))
}

/// Equality and ordering compatibility.
///
/// # Errors
/// `TypeMismatch` when the operands cannot be compared.
pub fn check_comparable(
    edm: &Edm,
    op: &str,
    ordering: bool,
    left: &Expression,
    right: &Expression,
) -> UriResult<()> {
    let ok = match (operand(edm, left), operand(edm, right)) {
        (Operand::Collection, _) | (_, Operand::Collection) => false,
        (Operand::Structured, _) | (_, Operand::Structured) => {
            !ordering
                && (operand(edm, left) == Operand::Untyped
                    || operand(edm, right) == Operand::Untyped)
        }
        (Operand::Untyped, _) | (_, Operand::Untyped) => true,
        (Operand::Enum(a), Operand::Enum(b)) => a == b,
        (Operand::Primitive(a), Operand::Primitive(b)) => {
            !(ordering && (a == P::Boolean || b == P::Boolean))
                && (a.is_compatible_from(b)
                    || b.is_compatible_from(a)
                    || (a.is_numeric() && b.is_numeric()))
        }
        _ => false,
    };
    if ok {
        Ok(())
    } else {
        Err(mismatch(op, left, right))
    }
}

fn arithmetic(
    op: BinaryOperator,
    left: &Operand,
    right: &Operand,
) -> Option<Option<EdmType>> {
    let prim = |p: PrimitiveKind| Some(Some(EdmType::Primitive(p)));
    match (left, right) {
        (Operand::Untyped, Operand::Untyped) => Some(None),
        (Operand::Untyped, Operand::Primitive(p)) | (Operand::Primitive(p), Operand::Untyped) => {
            if op == BinaryOperator::DivBy && p.is_numeric() {
                prim(P::Decimal)
            } else {
                prim(*p)
            }
        }
        (Operand::Primitive(a), Operand::Primitive(b)) => {
            let (a, b) = (*a, *b);
            if a.is_numeric() && b.is_numeric() {
                return if op == BinaryOperator::DivBy {
                    prim(P::Decimal)
                } else {
                    prim(promote_numeric(a, b))
                };
            }
            match (op, a, b) {
                (
                    BinaryOperator::Add | BinaryOperator::Sub,
                    P::DateTimeOffset | P::Date | P::Duration,
                    P::Duration,
                ) => prim(a),
                (BinaryOperator::Sub, P::DateTimeOffset, P::DateTimeOffset)
                | (BinaryOperator::Sub, P::Date, P::Date) => prim(P::Duration),
                (BinaryOperator::Mul, P::Duration, n) | (BinaryOperator::Mul, n, P::Duration)
                    if n.is_numeric() =>
                {
                    prim(P::Duration)
                }
                (BinaryOperator::Div, P::Duration, n) if n.is_numeric() => prim(P::Duration),
                _ => None,
            }
        }
        _ => None,
    }
}

/// Result type of a binary operation.
///
/// # Errors
/// `TypeMismatch` for operands the operator does not accept.
pub fn binary_type(
    edm: &Edm,
    op: BinaryOperator,
    left: &Expression,
    right: &Expression,
) -> UriResult<Option<EdmType>> {
    let boolean = Some(EdmType::Primitive(P::Boolean));
    let (l, r) = (operand(edm, left), operand(edm, right));
    match op {
        BinaryOperator::Or | BinaryOperator::And => {
            if is_boolean(&l) && is_boolean(&r) {
                Ok(boolean)
            } else {
                Err(mismatch(op.as_str(), left, right))
            }
        }
        BinaryOperator::Eq | BinaryOperator::Ne => {
            check_comparable(edm, op.as_str(), false, left, right)?;
            Ok(boolean)
        }
        BinaryOperator::Gt | BinaryOperator::Ge | BinaryOperator::Lt | BinaryOperator::Le => {
            check_comparable(edm, op.as_str(), true, left, right)?;
            Ok(boolean)
        }
        BinaryOperator::Has => match (&l, &r) {
            (Operand::Enum(a), Operand::Enum(b)) if a == b => Ok(boolean),
            (Operand::Enum(_), Operand::Untyped) => Ok(boolean),
            _ => Err(mismatch(op.as_str(), left, right)),
        },
        BinaryOperator::Add
        | BinaryOperator::Sub
        | BinaryOperator::Mul
        | BinaryOperator::Div
        | BinaryOperator::DivBy
        | BinaryOperator::Mod => {
            arithmetic(op, &l, &r).ok_or_else(|| mismatch(op.as_str(), left, right))
        }
    }
}

/// Result type of a unary operation.
///
/// # Errors
/// `TypeMismatch` for a non-Boolean `not` or a non-numeric negation.
pub fn unary_type(
    edm: &Edm,
    op: UnaryOperator,
    operand_expr: &Expression,
) -> UriResult<Option<EdmType>> {
    let o = operand(edm, operand_expr);
    let ok = match op {
        UnaryOperator::Not => is_boolean(&o),
        UnaryOperator::Minus => match &o {
            Operand::Untyped => true,
            Operand::Primitive(p) => p.is_numeric() || *p == P::Duration,
            _ => false,
        },
    };
    if ok {
        Ok(match op {
            UnaryOperator::Not => Some(EdmType::Primitive(P::Boolean)),
            UnaryOperator::Minus => operand_expr.edm_type(),
        })
    } else {
        Err(UriError::type_mismatch(format!(
            "operator '{op:?}' does not accept this operand"
        )))
    }
}

const STRING: &[PrimitiveKind] = &[P::String];
const INTEGRAL: &[PrimitiveKind] = &[P::Int64];
const NUMERIC: &[PrimitiveKind] = &[P::Decimal, P::Double];
const DATE_LIKE: &[PrimitiveKind] = &[P::Date, P::DateTimeOffset];
const TIME_LIKE: &[PrimitiveKind] = &[P::DateTimeOffset, P::TimeOfDay];
const DTO: &[PrimitiveKind] = &[P::DateTimeOffset];
const DURATION: &[PrimitiveKind] = &[P::Duration];

/// Arity and parameter kinds of a canonical function.
fn signature(method: MethodKind) -> (usize, usize, &'static [&'static [PrimitiveKind]]) {
    match method {
        MethodKind::Contains
        | MethodKind::StartsWith
        | MethodKind::EndsWith
        | MethodKind::IndexOf
        | MethodKind::Concat
        | MethodKind::MatchesPattern => (2, 2, &[STRING, STRING]),
        MethodKind::Length | MethodKind::ToLower | MethodKind::ToUpper | MethodKind::Trim => {
            (1, 1, &[STRING])
        }
        MethodKind::Substring => (2, 3, &[STRING, INTEGRAL, INTEGRAL]),
        MethodKind::Year | MethodKind::Month | MethodKind::Day => (1, 1, &[DATE_LIKE]),
        MethodKind::Hour
        | MethodKind::Minute
        | MethodKind::Second
        | MethodKind::FractionalSeconds => (1, 1, &[TIME_LIKE]),
        MethodKind::TotalSeconds => (1, 1, &[DURATION]),
        MethodKind::Date | MethodKind::Time | MethodKind::TotalOffsetMinutes => (1, 1, &[DTO]),
        MethodKind::MinDateTime | MethodKind::MaxDateTime | MethodKind::Now => (0, 0, &[]),
        MethodKind::Round | MethodKind::Floor | MethodKind::Ceiling => (1, 1, &[NUMERIC]),
        MethodKind::Cast | MethodKind::IsOf => (1, 2, &[]),
    }
}

/// Result type of a canonical function call.
///
/// # Errors
/// `TypeMismatch` for a wrong number or kind of arguments.
pub fn method_type(
    edm: &Edm,
    method: MethodKind,
    args: &[Expression],
) -> UriResult<Option<EdmType>> {
    let (min, max, params) = signature(method);
    if args.len() < min || args.len() > max {
        return Err(UriError::type_mismatch(format!(
            "'{}' takes {} argument(s), {} given",
            method.name(),
            if min == max {
                min.to_string()
            } else {
                format!("{min} to {max}")
            },
            args.len()
        )));
    }
    for (i, (arg, allowed)) in args.iter().zip(params.iter()).enumerate() {
        let fits = match operand(edm, arg) {
            Operand::Untyped => true,
            Operand::Primitive(p) => allowed.iter().any(|a| a.is_compatible_from(p)),
            _ => false,
        };
        if !fits {
            return Err(UriError::type_mismatch(format!(
                "argument {} of '{}' has the wrong type",
                i + 1,
                method.name()
            )));
        }
    }

    let prim = |p| Ok(Some(EdmType::Primitive(p)));
    match method {
        MethodKind::Contains
        | MethodKind::StartsWith
        | MethodKind::EndsWith
        | MethodKind::MatchesPattern
        | MethodKind::IsOf => {
            if method == MethodKind::IsOf {
                type_literal_arg(method, args)?;
            }
            prim(P::Boolean)
        }
        MethodKind::Length
        | MethodKind::IndexOf
        | MethodKind::Year
        | MethodKind::Month
        | MethodKind::Day
        | MethodKind::Hour
        | MethodKind::Minute
        | MethodKind::Second
        | MethodKind::TotalOffsetMinutes => prim(P::Int32),
        MethodKind::Substring
        | MethodKind::ToLower
        | MethodKind::ToUpper
        | MethodKind::Trim
        | MethodKind::Concat => prim(P::String),
        MethodKind::FractionalSeconds | MethodKind::TotalSeconds => prim(P::Decimal),
        MethodKind::Date => prim(P::Date),
        MethodKind::Time => prim(P::TimeOfDay),
        MethodKind::MinDateTime | MethodKind::MaxDateTime | MethodKind::Now => {
            prim(P::DateTimeOffset)
        }
        MethodKind::Round | MethodKind::Floor | MethodKind::Ceiling => {
            Ok(args.first().and_then(Expression::edm_type))
        }
        MethodKind::Cast => type_literal_arg(method, args).map(|t| Some(t.clone())),
    }
}

fn type_literal_arg(method: MethodKind, args: &[Expression]) -> UriResult<&EdmType> {
    match args.last() {
        Some(Expression::TypeLiteral { ty }) => Ok(ty),
        _ => Err(UriError::type_mismatch(format!(
            "last argument of '{}' must be a type name",
            method.name()
        ))),
    }
}
