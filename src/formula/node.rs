use crate::error::EvalError;
use crate::reference::Reference;
use std::fmt;
use std::str::FromStr;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operator {
    Add,
    Sub,
    Mul,
    Div,
    Lt,
    Gt,
    Eq,
    And,
    Or,
}

impl Operator {
    pub fn from_symbol(symbol: &str) -> Option<Self> {
        match symbol {
            "+" => Some(Operator::Add),
            "-" => Some(Operator::Sub),
            "*" => Some(Operator::Mul),
            "/" => Some(Operator::Div),
            "<" => Some(Operator::Lt),
            ">" => Some(Operator::Gt),
            "=" => Some(Operator::Eq),
            "&" => Some(Operator::And),
            "|" => Some(Operator::Or),
            _ => None,
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Operator::Add => "+",
            Operator::Sub => "-",
            Operator::Mul => "*",
            Operator::Div => "/",
            Operator::Lt => "<",
            Operator::Gt => ">",
            Operator::Eq => "=",
            Operator::And => "&",
            Operator::Or => "|",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Function {
    If,
    Sum,
    Min,
    Max,
    Avg,
    Concat,
    Debug,
    Copy,
}

impl Function {
    pub fn name(&self) -> &'static str {
        match self {
            Function::If => "IF",
            Function::Sum => "SUM",
            Function::Min => "MIN",
            Function::Max => "MAX",
            Function::Avg => "AVG",
            Function::Concat => "CONCAT",
            Function::Debug => "DEBUG",
            Function::Copy => "COPY",
        }
    }
}

impl FromStr for Function {
    type Err = EvalError;

    /// Accepts the bare name or the `=NAME` keyword form.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.strip_prefix('=').unwrap_or(s) {
            "IF" => Ok(Function::If),
            "SUM" => Ok(Function::Sum),
            "MIN" => Ok(Function::Min),
            "MAX" => Ok(Function::Max),
            "AVG" => Ok(Function::Avg),
            "CONCAT" => Ok(Function::Concat),
            "DEBUG" => Ok(Function::Debug),
            "COPY" => Ok(Function::Copy),
            other => Err(EvalError::UnknownFunction(other.to_string())),
        }
    }
}

/// Expression tree produced by the parser.
#[derive(Clone, Debug, PartialEq)]
pub enum Node {
    Number(f64),
    String(String),
    Reference(Reference),
    Operation {
        left: Box<Node>,
        op: Operator,
        right: Box<Node>,
    },
    FunctionCall {
        name: Function,
        args: Vec<Node>,
    },
    /// The top-level expression of an input starting with `=`.
    Formula(Box<Node>),
}

impl Node {
    pub fn is_formula(&self) -> bool {
        matches!(self, Node::Formula(_))
    }

    /// Every cell the expression reads, in first-seen order.
    pub fn references(&self) -> Vec<Reference> {
        let mut refs = Vec::new();
        self.collect_references(&mut refs);
        refs
    }

    fn collect_references(&self, refs: &mut Vec<Reference>) {
        match self {
            Node::Number(_) | Node::String(_) => {}
            Node::Reference(r) => {
                if !refs.contains(r) {
                    refs.push(*r);
                }
            }
            Node::Operation { left, right, .. } => {
                left.collect_references(refs);
                right.collect_references(refs);
            }
            Node::FunctionCall { args, .. } => {
                for arg in args {
                    arg.collect_references(refs);
                }
            }
            Node::Formula(expr) => expr.collect_references(refs),
        }
    }
}

/// Renders the tree back into formula syntax. Operations are parenthesized
/// so the rendering parses back to the same tree.
impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Node::Number(n) => write!(f, "{}", n),
            Node::String(s) => f.write_str(s),
            Node::Reference(r) => write!(f, "{}", r),
            Node::Operation { left, op, right } => {
                write!(f, "({}{}{})", left, op.symbol(), right)
            }
            Node::FunctionCall { name, args } => {
                write!(f, "={}(", name.name())?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{}", arg)?;
                }
                f.write_str(")")
            }
            Node::Formula(expr) => match expr.as_ref() {
                Node::FunctionCall { .. } => write!(f, "{}", expr),
                _ => write!(f, "={}", expr),
            },
        }
    }
}
