use crate::error::EvalError;
use crate::formula::node::{Function, Node, Operator};
use crate::formula::value::Value;
use crate::reference::Reference;
use std::collections::{BTreeMap, HashMap};

/// Source of cell values for reference lookups.
pub trait Context {
    /// `None` for a cell that has never been set.
    fn lookup(&self, reference: &Reference) -> Option<Value>;
}

/// Contexts keyed by the canonical `$A1` text.
impl Context for HashMap<String, Value> {
    fn lookup(&self, reference: &Reference) -> Option<Value> {
        self.get(&reference.to_string()).cloned()
    }
}

impl Context for HashMap<Reference, Value> {
    fn lookup(&self, reference: &Reference) -> Option<Value> {
        self.get(reference).cloned()
    }
}

impl Context for BTreeMap<Reference, Value> {
    fn lookup(&self, reference: &Reference) -> Option<Value> {
        self.get(reference).cloned()
    }
}

/// Evaluates a node against `context`. Nothing is cached between calls.
pub fn evaluate<C: Context + ?Sized>(node: &Node, context: &C) -> Result<Value, EvalError> {
    match node {
        Node::Number(n) => Ok(Value::Number(*n)),
        Node::String(s) => Ok(Value::Text(s.clone())),
        Node::Reference(r) => Ok(context.lookup(r).unwrap_or(Value::Blank)),
        Node::Operation { left, op, right } => {
            let left = evaluate(left, context)?;
            let right = evaluate(right, context)?;
            apply_operator(*op, &left, &right)
        }
        Node::FunctionCall { name, args } => {
            let args = args
                .iter()
                .map(|arg| evaluate(arg, context))
                .collect::<Result<Vec<_>, _>>()?;
            call_function(*name, args)
        }
        Node::Formula(expr) => evaluate(expr, context),
    }
}

fn apply_operator(op: Operator, left: &Value, right: &Value) -> Result<Value, EvalError> {
    let symbol = op.symbol();
    match op {
        Operator::Eq => Ok(left.loosely_equals(right).into()),
        Operator::And => Ok((left.truthy(symbol)? && right.truthy(symbol)?).into()),
        Operator::Or => Ok((left.truthy(symbol)? || right.truthy(symbol)?).into()),
        _ => {
            let a = left.coerce_number(symbol)?;
            let b = right.coerce_number(symbol)?;
            let result = match op {
                Operator::Add => Value::Number(a + b),
                Operator::Sub => Value::Number(a - b),
                Operator::Mul => Value::Number(a * b),
                Operator::Div => {
                    if b == 0.0 {
                        return Err(EvalError::DivisionByZero);
                    }
                    Value::Number(a / b)
                }
                Operator::Lt => (a < b).into(),
                Operator::Gt => (a > b).into(),
                Operator::Eq | Operator::And | Operator::Or => {
                    return Err(EvalError::UnknownOperator(symbol.to_string()));
                }
            };
            Ok(result)
        }
    }
}

/// Numbers of a SUM/AVG argument list. Blanks are skipped; text of any kind
/// is an error.
fn strict_numbers(function: Function, args: &[Value]) -> Result<Vec<f64>, EvalError> {
    args.iter()
        .filter(|v| !v.is_blank())
        .map(|v| match v {
            Value::Number(n) => Ok(*n),
            other => Err(EvalError::NotNumeric {
                function: function.name().to_string(),
                found: other.to_string(),
            }),
        })
        .collect()
}

/// Numbers of a MIN/MAX argument list. Numeric-looking text is accepted.
fn coerced_numbers(function: Function, args: &[Value]) -> Result<Vec<f64>, EvalError> {
    let numbers = args
        .iter()
        .filter(|v| !v.is_blank())
        .map(|v| v.coerce_number(function.name()))
        .collect::<Result<Vec<_>, _>>()?;

    if numbers.is_empty() {
        return Err(EvalError::Arity {
            function: function.name().to_string(),
            expected: "at least one non-blank".to_string(),
            found: 0,
        });
    }
    Ok(numbers)
}

fn arity(function: Function, args: &[Value], expected: usize) -> Result<(), EvalError> {
    if args.len() == expected {
        Ok(())
    } else {
        Err(EvalError::Arity {
            function: function.name().to_string(),
            expected: expected.to_string(),
            found: args.len(),
        })
    }
}

fn call_function(function: Function, mut args: Vec<Value>) -> Result<Value, EvalError> {
    match function {
        Function::If => {
            arity(function, &args, 3)?;
            let otherwise = args.pop().unwrap_or(Value::Blank);
            let then = args.pop().unwrap_or(Value::Blank);
            if args[0].truthy(function.name())? {
                Ok(then)
            } else {
                Ok(otherwise)
            }
        }
        Function::Sum => Ok(Value::Number(strict_numbers(function, &args)?.iter().sum())),
        Function::Avg => {
            let numbers = strict_numbers(function, &args)?;
            if numbers.is_empty() {
                return Err(EvalError::EmptyAverage);
            }
            Ok(Value::Number(
                numbers.iter().sum::<f64>() / numbers.len() as f64,
            ))
        }
        Function::Min => Ok(Value::Number(
            coerced_numbers(function, &args)?
                .into_iter()
                .fold(f64::INFINITY, f64::min),
        )),
        Function::Max => Ok(Value::Number(
            coerced_numbers(function, &args)?
                .into_iter()
                .fold(f64::NEG_INFINITY, f64::max),
        )),
        Function::Concat => Ok(Value::Text(
            args.iter().map(|v| v.to_string()).collect::<String>(),
        )),
        Function::Debug => args.into_iter().next().ok_or_else(|| EvalError::Arity {
            function: function.name().to_string(),
            expected: "at least 1".to_string(),
            found: 0,
        }),
        Function::Copy => {
            arity(function, &args, 2)?;
            Ok(args.swap_remove(0))
        }
    }
}
