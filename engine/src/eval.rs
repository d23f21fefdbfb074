use sigil::expression::{BinaryOperator, Expr, UnaryOperator};

use crate::error::EvalError;
use crate::machine::Machine;
use crate::value::{Builtin, Function, Value};

/// Evaluate an expression AST node against the machine's current context
/// (local frames, then globals, then built-ins).
///
/// Undefined identifiers evaluate to Null. Macro calls and the `include`
/// built-in dispatch back through the machine.
pub fn evaluate(expr: &Expr, machine: &mut Machine) -> Result<Value, EvalError> {
    match expr {
        Expr::NumberLiteral(n) => Ok(Value::Number(*n)),
        Expr::StringLiteral(s) => Ok(Value::Str(s.clone())),
        Expr::BooleanLiteral(b) => Ok(Value::Bool(*b)),
        Expr::NullLiteral => Ok(Value::Null),

        Expr::Variable(name) => Ok(machine.lookup(name).cloned().unwrap_or(Value::Null)),

        Expr::ArrayLiteral(elements) => {
            let mut values = Vec::with_capacity(elements.len());
            for element in elements {
                values.push(evaluate(element, machine)?);
            }
            Ok(Value::Array(values))
        }

        Expr::UnaryOperation { operator, operand } => {
            let value = evaluate(operand, machine)?;
            match operator {
                UnaryOperator::Plus => Ok(Value::Number(coerce_number(&value)?)),
                UnaryOperator::Negation => Ok(Value::Number(-coerce_number(&value)?)),
                UnaryOperator::LogicalNot => Ok(Value::Bool(value.is_falsy())),
            }
        }

        Expr::BinaryOperation {
            operator,
            left,
            right,
        } => match operator {
            // Short-circuit, yielding the selected operand value
            BinaryOperator::LogicalAnd => {
                let l = evaluate(left, machine)?;
                if l.is_falsy() {
                    Ok(l)
                } else {
                    evaluate(right, machine)
                }
            }
            BinaryOperator::LogicalOr => {
                let l = evaluate(left, machine)?;
                if l.is_truthy() {
                    Ok(l)
                } else {
                    evaluate(right, machine)
                }
            }
            _ => {
                let l = evaluate(left, machine)?;
                let r = evaluate(right, machine)?;
                eval_binary_op(operator, &l, &r)
            }
        },

        // The unselected branch is never evaluated.
        Expr::Conditional {
            test,
            consequent,
            alternate,
        } => {
            let condition = evaluate(test, machine)?;
            if condition.is_truthy() {
                evaluate(consequent, machine)
            } else {
                evaluate(alternate, machine)
            }
        }

        // Member access on a mapping yields the field; on anything else, Null.
        Expr::Member { object, field } => {
            let value = evaluate(object, machine)?;
            match value {
                Value::Object(map) => Ok(map.get(field).cloned().unwrap_or(Value::Null)),
                _ => Ok(Value::Null),
            }
        }

        Expr::Index { object, index } => {
            let value = evaluate(object, machine)?;
            let key = evaluate(index, machine)?;
            match (value, key) {
                (Value::Object(map), Value::Str(field)) => {
                    Ok(map.get(&field).cloned().unwrap_or(Value::Null))
                }
                (Value::Array(items), Value::Number(n)) => {
                    if n < 0.0 || n.fract() != 0.0 {
                        Ok(Value::Null)
                    } else {
                        Ok(items.get(n as usize).cloned().unwrap_or(Value::Null))
                    }
                }
                _ => Ok(Value::Null),
            }
        }

        Expr::Call { callee, args } => {
            // Built-in table first, then the context
            if let Some(builtin) = builtin_by_name(callee) {
                return call_builtin(builtin, callee, args, machine);
            }
            match machine.lookup(callee).cloned() {
                Some(Value::Function(function)) => {
                    let values = eval_args(args, machine)?;
                    call_function(&function, callee, values, machine)
                }
                Some(other) => Err(EvalError::new(format!(
                    "\"{}\" is not a function ({})",
                    callee,
                    other.type_name()
                ))),
                None => Err(EvalError::new(format!(
                    "Function \"{}\" is not defined",
                    callee
                ))),
            }
        }
    }
}

fn builtin_by_name(name: &str) -> Option<Builtin> {
    match name {
        "min" => Some(Builtin::Min),
        "max" => Some(Builtin::Max),
        "abs" => Some(Builtin::Abs),
        "defined" => Some(Builtin::Defined),
        "include" => Some(Builtin::Include),
        _ => None,
    }
}

fn eval_args(args: &[Expr], machine: &mut Machine) -> Result<Vec<Value>, EvalError> {
    let mut values = Vec::with_capacity(args.len());
    for arg in args {
        values.push(evaluate(arg, machine)?);
    }
    Ok(values)
}

/// Built-in dispatch with access to the unevaluated argument forms.
/// `defined(x)` requires a bare identifier and never evaluates it.
fn call_builtin(
    builtin: Builtin,
    name: &str,
    args: &[Expr],
    machine: &mut Machine,
) -> Result<Value, EvalError> {
    if builtin == Builtin::Defined {
        if args.len() != 1 {
            return Err(EvalError::new("Wrong number of arguments for defined()"));
        }
        return match &args[0] {
            Expr::Variable(ident) => Ok(Value::Bool(machine.lookup(ident).is_some())),
            _ => Err(EvalError::new(
                "Wrong argument for defined(): expected an identifier",
            )),
        };
    }
    let values = eval_args(args, machine)?;
    apply_builtin(builtin, name, values, machine)
}

/// Built-in dispatch on already-evaluated arguments (also used when a
/// built-in reached the call site as a context value).
fn apply_builtin(
    builtin: Builtin,
    name: &str,
    values: Vec<Value>,
    machine: &mut Machine,
) -> Result<Value, EvalError> {
    match builtin {
        Builtin::Min | Builtin::Max => {
            if values.is_empty() {
                return Err(EvalError::new(format!(
                    "Wrong number of arguments for {}()",
                    name
                )));
            }
            let mut result = coerce_number(&values[0])?;
            for value in &values[1..] {
                let n = coerce_number(value)?;
                result = if builtin == Builtin::Min {
                    result.min(n)
                } else {
                    result.max(n)
                };
            }
            Ok(Value::Number(result))
        }
        Builtin::Abs => {
            if values.len() != 1 {
                return Err(EvalError::new("Wrong number of arguments for abs()"));
            }
            Ok(Value::Number(coerce_number(&values[0])?.abs()))
        }
        Builtin::Include => {
            if values.len() != 1 {
                return Err(EvalError::new("Wrong number of arguments for include()"));
            }
            let reference = values[0].to_string();
            let expanded = machine.include_inline(reference.trim())?;
            Ok(Value::Str(expanded))
        }
        Builtin::Defined => Err(EvalError::new(
            "Wrong argument for defined(): expected an identifier",
        )),
    }
}

fn call_function(
    function: &Function,
    name: &str,
    values: Vec<Value>,
    machine: &mut Machine,
) -> Result<Value, EvalError> {
    match function {
        Function::Builtin(builtin) => apply_builtin(*builtin, name, values, machine),
        Function::Macro(macro_name) => {
            let expanded = machine.expand_macro_inline(macro_name, values)?;
            Ok(Value::Str(expanded))
        }
    }
}

fn coerce_number(value: &Value) -> Result<f64, EvalError> {
    match value {
        Value::Number(n) => Ok(*n),
        other => Err(EvalError::new(format!(
            "Expected a number, got {}",
            other.type_name()
        ))),
    }
}

fn eval_binary_op(
    operator: &BinaryOperator,
    left: &Value,
    right: &Value,
) -> Result<Value, EvalError> {
    match operator {
        BinaryOperator::Addition => match (left, right) {
            (Value::Number(a), Value::Number(b)) => Ok(Value::Number(a + b)),
            (Value::Str(_), _) | (_, Value::Str(_)) => {
                Ok(Value::Str(format!("{}{}", left, right)))
            }
            _ => Err(EvalError::new(format!(
                "Cannot apply \"+\" to {} and {}",
                left.type_name(),
                right.type_name()
            ))),
        },
        BinaryOperator::Subtraction => numeric_binop(left, right, |a, b| a - b),
        BinaryOperator::Multiplication => numeric_binop(left, right, |a, b| a * b),
        BinaryOperator::Division => {
            let a = coerce_number(left)?;
            let b = coerce_number(right)?;
            if b == 0.0 {
                return Err(EvalError::new("Division by zero"));
            }
            Ok(Value::Number(a / b))
        }
        BinaryOperator::Modulo => {
            let a = coerce_number(left)?;
            let b = coerce_number(right)?;
            if b == 0.0 {
                return Err(EvalError::new("Division by zero"));
            }
            Ok(Value::Number(a % b))
        }
        BinaryOperator::Equality => Ok(Value::Bool(left == right)),
        BinaryOperator::Inequality => Ok(Value::Bool(left != right)),
        BinaryOperator::GreaterThan => numeric_cmp(left, right, |a, b| a > b),
        BinaryOperator::LessThan => numeric_cmp(left, right, |a, b| a < b),
        BinaryOperator::GreaterThanOrEqual => numeric_cmp(left, right, |a, b| a >= b),
        BinaryOperator::LessThanOrEqual => numeric_cmp(left, right, |a, b| a <= b),
        // Short-circuit forms are handled before operand evaluation
        BinaryOperator::LogicalAnd | BinaryOperator::LogicalOr => unreachable!(),
    }
}

fn numeric_binop(
    left: &Value,
    right: &Value,
    f: impl Fn(f64, f64) -> f64,
) -> Result<Value, EvalError> {
    let a = coerce_number(left)?;
    let b = coerce_number(right)?;
    Ok(Value::Number(f(a, b)))
}

fn numeric_cmp(
    left: &Value,
    right: &Value,
    f: impl Fn(f64, f64) -> bool,
) -> Result<Value, EvalError> {
    let a = coerce_number(left)?;
    let b = coerce_number(right)?;
    Ok(Value::Bool(f(a, b)))
}
