//! The formula language: tokenizer, recursive-descent parser and tree
//! evaluator.
//!
//! Formulas are re-parsed every time they are read; no tree outlives the call
//! that produced it.

pub mod evaluator;
pub mod node;
pub mod parser;
pub mod tokenizer;
pub mod value;

pub use evaluator::{Context, evaluate};
pub use node::{Function, Node, Operator};
pub use parser::parse;
pub use tokenizer::{Token, TokenKind, tokenize};
pub use value::Value;

use crate::error::{FormulaResult, LexError};
use crate::reference::Reference;

/// Entry point to the formula stack. Holds no state between calls, so one
/// engine can serve any number of unrelated formulas.
#[derive(Clone, Copy, Debug, Default)]
pub struct FormulaEngine;

impl FormulaEngine {
    pub fn new() -> Self {
        FormulaEngine
    }

    pub fn tokenize(&self, formula: &str) -> Result<Vec<Token>, LexError> {
        tokenize(formula)
    }

    pub fn parse(&self, formula: &str) -> FormulaResult<Node> {
        parse(formula)
    }

    /// Parses and evaluates `text` in one step.
    ///
    /// # Examples
    /// ```
    /// use std::collections::HashMap;
    /// use sheetsync::formula::{FormulaEngine, Value};
    ///
    /// let mut cells = HashMap::new();
    /// cells.insert("$A1".to_string(), Value::Number(2.0));
    /// cells.insert("$A2".to_string(), Value::Number(3.0));
    ///
    /// let engine = FormulaEngine::new();
    /// assert_eq!(engine.evaluate_formula("=SUM($A1,$A2)", &cells).unwrap(), Value::Number(5.0));
    /// ```
    pub fn evaluate_formula<C: Context + ?Sized>(
        &self,
        text: &str,
        context: &C,
    ) -> FormulaResult<Value> {
        let node = parse(text)?;
        Ok(evaluate(&node, context)?)
    }

    /// Cells a term reads. Literal terms read nothing; unparsable formulas
    /// are reported as errors.
    pub fn references(&self, text: &str) -> FormulaResult<Vec<Reference>> {
        let node = parse(text)?;
        if node.is_formula() {
            Ok(node.references())
        } else {
            Ok(Vec::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{EvalError, FormulaError};
    use std::collections::HashMap;

    #[test]
    fn engine_reuse_across_unrelated_formulas() {
        let engine = FormulaEngine::new();
        let context: HashMap<String, Value> = HashMap::new();

        assert!(matches!(
            engine.evaluate_formula("=SUM(1,", &context),
            Err(FormulaError::Parse(_))
        ));
        assert_eq!(
            engine.evaluate_formula("=IF(1,2,3)", &context),
            Ok(Value::Number(2.0))
        );
        assert_eq!(
            engine.evaluate_formula("=4/0", &context),
            Err(FormulaError::Eval(EvalError::DivisionByZero))
        );
        assert_eq!(
            engine.evaluate_formula("plain", &context),
            Ok(Value::Text("plain".into()))
        );
    }

    #[test]
    fn literal_terms_have_no_references() {
        let engine = FormulaEngine::new();
        assert!(engine.references("$A1").unwrap().is_empty());
        assert_eq!(
            engine.references("=$A1+$B2*$A1").unwrap(),
            vec![Reference::new(1, 1), Reference::new(2, 2)]
        );
    }
}
