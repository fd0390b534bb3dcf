use crate::reference::Reference;
use thiserror::Error;

/// The tokenizer found input it cannot classify.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("cannot tokenize {input:?} at index {index}")]
pub struct LexError {
    pub index: usize,
    pub input: String,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("unexpected token at {pos}: expected {expected}, found {found}")]
    UnexpectedToken {
        pos: usize,
        expected: String,
        found: String,
    },

    #[error("unexpected end of formula at {pos}: expected {expected}")]
    UnexpectedEnd { pos: usize, expected: String },

    #[error("invalid range {range}")]
    InvalidRange { range: String },
}

impl ParseError {
    pub fn unexpected_token(
        pos: usize,
        expected: impl Into<String>,
        found: impl Into<String>,
    ) -> Self {
        Self::UnexpectedToken {
            pos,
            expected: expected.into(),
            found: found.into(),
        }
    }

    pub fn unexpected_end(pos: usize, expected: impl Into<String>) -> Self {
        Self::UnexpectedEnd {
            pos,
            expected: expected.into(),
        }
    }
}

/// Runtime failure while walking an expression tree.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvalError {
    #[error("division by zero")]
    DivisionByZero,

    #[error("{function} expects numeric arguments, got {found:?}")]
    NotNumeric { function: String, found: String },

    #[error("AVG of an empty argument list")]
    EmptyAverage,

    #[error("{function} expects {expected} arguments, got {found}")]
    Arity {
        function: String,
        expected: String,
        found: usize,
    },

    #[error("unknown function {0}")]
    UnknownFunction(String),

    #[error("unknown operator {0}")]
    UnknownOperator(String),
}

/// Malformed cell reference text.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("malformed cell reference {text:?}")]
pub struct FormatError {
    pub text: String,
}

/// A payload entry that does not have the `$<COL><ROW> <term>` shape.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("invalid payload entry on line {line}: {entry:?}")]
pub struct ValidationError {
    pub line: usize,
    pub entry: String,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum NotFoundError {
    #[error("publisher {0} not found")]
    Publisher(String),

    #[error("sheet {sheet} of publisher {publisher} not found")]
    Sheet { publisher: String, sheet: String },

    #[error("sheet id {0} is not cached")]
    SheetId(u64),
}

/// An accepted entry that could not be folded into the cache.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FoldError {
    #[error(transparent)]
    NotFound(#[from] NotFoundError),

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

/// Failures of the durable store.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("checkpoint encoding error: {0}")]
    Bincode(#[from] bincode::Error),

    #[error("store state poisoned")]
    Poisoned,
}

/// Any failure of the formula stack.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FormulaError {
    #[error(transparent)]
    Lex(#[from] LexError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Eval(#[from] EvalError),

    #[error(transparent)]
    Format(#[from] FormatError),
}

/// Why a sheet cell has no value.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CellError {
    #[error(transparent)]
    Formula(#[from] FormulaError),

    #[error("circular reference")]
    Cycle,

    #[error("reads {0}, which has an error")]
    Upstream(Reference),
}

/// Any failure of the persistence and reconciliation stack.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    NotFound(#[from] NotFoundError),

    #[error(transparent)]
    Format(#[from] FormatError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Cell(#[from] CellError),

    #[error("{client} is not allowed to {action}")]
    Unauthorized { client: String, action: String },

    #[error("{0}")]
    InvalidRequest(String),
}

impl SyncError {
    pub fn unauthorized(client: impl Into<String>, action: impl Into<String>) -> Self {
        Self::Unauthorized {
            client: client.into(),
            action: action.into(),
        }
    }
}

pub type FormulaResult<T> = Result<T, FormulaError>;
pub type SyncResult<T> = Result<T, SyncError>;
