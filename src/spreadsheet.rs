//! Client-side sheet model.
//!
//! A `Spreadsheet` holds the raw terms of a sheet and knows how to evaluate
//! them. Evaluation runs in dependency order: a cell is evaluated only after
//! every cell it reads. Cells that sit on, or downstream of, a reference
//! cycle are reported as cycle errors; one bad cell never stops the others.

use crate::error::{CellError, ValidationError};
use crate::formula::{Context, Function, FormulaEngine, Node, Value, evaluate};
use crate::payload::{build_payload, parse_payload, render_payload};
use crate::reference::{Extent, Reference, number_to_column_letters};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt::Write;

pub type CellResult = Result<Value, CellError>;

#[derive(Clone, Debug, PartialEq)]
pub struct Spreadsheet {
    extent: Extent,
    terms: BTreeMap<Reference, String>,
}

impl Spreadsheet {
    pub fn new(extent: Extent) -> Self {
        Spreadsheet {
            extent,
            terms: BTreeMap::new(),
        }
    }

    pub fn extent(&self) -> Extent {
        self.extent
    }

    pub fn terms(&self) -> &BTreeMap<Reference, String> {
        &self.terms
    }

    /// Sets a cell's raw term. An empty term clears the cell. The extent
    /// grows to include `reference` either way.
    pub fn set(&mut self, reference: Reference, term: impl Into<String>) {
        let term = term.into();
        self.extent.grow_to_fit(&reference);
        if term.is_empty() {
            self.terms.remove(&reference);
        } else {
            self.terms.insert(reference, term);
        }
    }

    pub fn get(&self, reference: &Reference) -> Option<&str> {
        self.terms.get(reference).map(String::as_str)
    }

    /// Applies a payload (for example a delta from the server). Nothing is
    /// applied if any entry is malformed. Returns the number of entries.
    pub fn apply_payload(&mut self, payload: &str) -> Result<usize, ValidationError> {
        let entries = parse_payload(payload)?;
        let count = entries.len();
        for entry in entries {
            self.set(entry.reference, entry.term);
        }
        Ok(count)
    }

    /// Payload carrying the current terms of `refs`; unset cells are sent
    /// with an empty term.
    pub fn to_payload<'a, I>(&self, refs: I) -> String
    where
        I: IntoIterator<Item = &'a Reference>,
    {
        build_payload(refs, &self.terms)
    }

    /// Payload of every non-empty cell.
    pub fn payload(&self) -> String {
        self.to_payload(self.terms.keys())
    }

    /// Clears every cell of `row` and returns the payload that clears them
    /// on the other side. The extent is left as is.
    pub fn clear_row(&mut self, row: u32) -> String {
        self.clear_where(|reference| reference.row == row)
    }

    pub fn clear_column(&mut self, column: u32) -> String {
        self.clear_where(|reference| reference.column == column)
    }

    fn clear_where(&mut self, mut hit: impl FnMut(&Reference) -> bool) -> String {
        let cleared: Vec<Reference> = self.terms.keys().filter(|r| hit(r)).copied().collect();
        for reference in &cleared {
            self.terms.remove(reference);
        }
        render_payload(cleared.iter().map(|reference| (reference, "")))
    }

    /// Evaluates every cell in dependency order.
    pub fn evaluate_all(&self, engine: &FormulaEngine) -> Evaluation {
        let mut parsed: HashMap<Reference, Node> = HashMap::new();
        let mut evaluation = Evaluation::default();

        // Edges run from a cell to the cells that read it. References to
        // empty cells read as blank and carry no edge.
        let mut readers: HashMap<Reference, Vec<Reference>> = HashMap::new();
        let mut pending: HashMap<Reference, usize> = HashMap::new();

        for (reference, term) in &self.terms {
            if !is_formula(term) {
                pending.insert(*reference, 0);
                continue;
            }
            match engine.parse(term) {
                Ok(node) => {
                    let deps: Vec<Reference> = node
                        .references()
                        .into_iter()
                        .filter(|dep| self.terms.contains_key(dep))
                        .collect();
                    pending.insert(*reference, deps.len());
                    for dep in deps {
                        readers.entry(dep).or_default().push(*reference);
                    }
                    parsed.insert(*reference, node);
                }
                Err(e) => {
                    pending.insert(*reference, 0);
                    evaluation.values.insert(*reference, Err(e.into()));
                }
            }
        }

        let mut ready: VecDeque<Reference> = pending
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(reference, _)| *reference)
            .collect();
        // Deterministic order for COPY targets written by several cells.
        ready.make_contiguous().sort();

        while let Some(reference) = ready.pop_front() {
            if !evaluation.values.contains_key(&reference) {
                let result = match parsed.get(&reference) {
                    Some(node) => evaluation.evaluate_node(node),
                    None => Ok(self.get(&reference).map_or(Value::Blank, Value::from_term)),
                };
                if let (Ok(value), Some(target)) =
                    (&result, parsed.get(&reference).and_then(copy_target))
                {
                    evaluation.copies.insert(target, value.clone());
                }
                evaluation.values.insert(reference, result);
            }

            for reader in readers.get(&reference).into_iter().flatten() {
                if let Some(count) = pending.get_mut(reader) {
                    *count -= 1;
                    if *count == 0 {
                        ready.push_back(*reader);
                    }
                }
            }
        }

        for reference in self.terms.keys() {
            evaluation
                .values
                .entry(*reference)
                .or_insert(Err(CellError::Cycle));
        }

        evaluation
    }

    /// Renders a `rows` x `cols` window of evaluated cells starting at
    /// `origin` as tab-separated text.
    pub fn render(&self, evaluation: &Evaluation, origin: Reference, rows: u32, cols: u32) -> String {
        let last_row = origin.row.saturating_add(rows.saturating_sub(1)).min(self.extent.rows);
        let last_col = origin.column.saturating_add(cols.saturating_sub(1)).min(self.extent.cols);

        let mut out = String::from("\t");
        for col in origin.column..=last_col {
            let _ = write!(out, "{:<12}", number_to_column_letters(col));
        }
        out.push('\n');

        for row in origin.row..=last_row {
            let _ = write!(out, "{}\t", row);
            for col in origin.column..=last_col {
                let _ = write!(out, "{:<12}", evaluation.display(&Reference::new(col, row)));
            }
            out.push('\n');
        }
        out
    }
}

/// Result of [`Spreadsheet::evaluate_all`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Evaluation {
    values: BTreeMap<Reference, CellResult>,
    /// Values written by `COPY(value, target)` into their target cell.
    copies: BTreeMap<Reference, Value>,
}

impl Evaluation {
    /// `None` for a cell that holds no term.
    pub fn get(&self, reference: &Reference) -> Option<&CellResult> {
        self.values.get(reference)
    }

    pub fn values(&self) -> &BTreeMap<Reference, CellResult> {
        &self.values
    }

    /// What a cell shows: its own value or error, else a copied value,
    /// else nothing.
    pub fn display(&self, reference: &Reference) -> String {
        match self.values.get(reference) {
            Some(Ok(value)) => value.to_string(),
            Some(Err(CellError::Cycle)) => "#CYCLE".to_string(),
            Some(Err(_)) => "#ERR".to_string(),
            None => self
                .copies
                .get(reference)
                .map(Value::to_string)
                .unwrap_or_default(),
        }
    }

    /// Evaluates a term against the evaluated cells. Reading a cell that
    /// holds an error is an error itself.
    pub fn evaluate_term(&self, engine: &FormulaEngine, term: &str) -> CellResult {
        if !is_formula(term) {
            return Ok(Value::from_term(term));
        }
        let node = engine.parse(term)?;
        self.evaluate_node(&node)
    }

    fn evaluate_node(&self, node: &Node) -> CellResult {
        for dep in node.references() {
            if let Some(Err(_)) = self.values.get(&dep) {
                return Err(CellError::Upstream(dep));
            }
        }
        evaluate(node, self).map_err(|e| CellError::Formula(e.into()))
    }
}

impl Context for Evaluation {
    fn lookup(&self, reference: &Reference) -> Option<Value> {
        match self.values.get(reference) {
            Some(Ok(value)) => Some(value.clone()),
            _ => None,
        }
    }
}

fn is_formula(term: &str) -> bool {
    term.trim_start().starts_with('=')
}

fn copy_target(node: &Node) -> Option<Reference> {
    match node {
        Node::Formula(expr) => match expr.as_ref() {
            Node::FunctionCall {
                name: Function::Copy,
                args,
            } => match args.get(1) {
                Some(Node::Reference(target)) => Some(*target),
                _ => None,
            },
            _ => None,
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{EvalError, FormulaError};

    fn r(text: &str) -> Reference {
        text.parse().unwrap()
    }

    fn sheet(payload: &str) -> Spreadsheet {
        let mut sheet = Spreadsheet::new(Extent::new(10, 10));
        sheet.apply_payload(payload).unwrap();
        sheet
    }

    #[test]
    fn evaluates_in_dependency_order() {
        // $A1 reads $A3, which is declared after it
        let sheet = sheet("$A1 =$A3*2\n$A2 4\n$A3 =SUM($A2,1)\n");
        let evaluation = sheet.evaluate_all(&FormulaEngine::new());

        assert_eq!(evaluation.get(&r("$A3")), Some(&Ok(Value::Number(5.0))));
        assert_eq!(evaluation.get(&r("$A1")), Some(&Ok(Value::Number(10.0))));
        assert_eq!(evaluation.display(&r("$A2")), "4");
        assert_eq!(evaluation.get(&r("$B9")), None);
    }

    #[test]
    fn cycles_and_their_readers_report_cycle() {
        let sheet = sheet("$A1 =$A2+1\n$A2 =$A1+1\n$B1 =$A1\n$C1 =1+1\n");
        let evaluation = sheet.evaluate_all(&FormulaEngine::new());

        assert_eq!(evaluation.get(&r("$A1")), Some(&Err(CellError::Cycle)));
        assert_eq!(evaluation.get(&r("$A2")), Some(&Err(CellError::Cycle)));
        assert_eq!(evaluation.get(&r("$B1")), Some(&Err(CellError::Cycle)));
        assert_eq!(evaluation.get(&r("$C1")), Some(&Ok(Value::Number(2.0))));
        assert_eq!(evaluation.display(&r("$A1")), "#CYCLE");
    }

    #[test]
    fn self_reference_is_a_cycle() {
        let evaluation = sheet("$A1 =$A1\n").evaluate_all(&FormulaEngine::new());
        assert_eq!(evaluation.get(&r("$A1")), Some(&Err(CellError::Cycle)));
    }

    #[test]
    fn errors_propagate_to_readers_only() {
        let sheet = sheet("$A1 =1/0\n$A2 =$A1+1\n$A3 =SUM(1,\n$A4 7\n");
        let evaluation = sheet.evaluate_all(&FormulaEngine::new());

        assert_eq!(
            evaluation.get(&r("$A1")),
            Some(&Err(CellError::Formula(FormulaError::Eval(EvalError::DivisionByZero))))
        );
        assert_eq!(evaluation.get(&r("$A2")), Some(&Err(CellError::Upstream(r("$A1")))));
        assert!(matches!(
            evaluation.get(&r("$A3")),
            Some(Err(CellError::Formula(FormulaError::Parse(_))))
        ));
        assert_eq!(evaluation.get(&r("$A4")), Some(&Ok(Value::Number(7.0))));
        assert_eq!(evaluation.display(&r("$A2")), "#ERR");
    }

    #[test]
    fn unset_references_read_blank() {
        let evaluation = sheet("$A1 =$Z9+2\n$A2 =CONCAT(x,$Z9)\n").evaluate_all(&FormulaEngine::new());
        assert_eq!(evaluation.get(&r("$A1")), Some(&Ok(Value::Number(2.0))));
        assert_eq!(evaluation.get(&r("$A2")), Some(&Ok(Value::Text("x".into()))));
    }

    #[test]
    fn copy_shows_value_at_target() {
        let sheet = sheet("$A1 5\n$B1 =COPY($A1,$C3)\n");
        let evaluation = sheet.evaluate_all(&FormulaEngine::new());

        assert_eq!(evaluation.get(&r("$B1")), Some(&Ok(Value::Number(5.0))));
        assert_eq!(evaluation.get(&r("$C3")), None);
        assert_eq!(evaluation.display(&r("$C3")), "5");
    }

    #[test]
    fn clearing_returns_a_clearing_payload() {
        let mut sheet = sheet("$A1 1\n$B1 2\n$B2 3\n$C5 =$B1\n");

        assert_eq!(sheet.clear_column(2), "$B1 \n$B2 \n");
        assert_eq!(sheet.get(&r("$B1")), None);
        assert_eq!(sheet.clear_row(5), "$C5 \n");
        assert_eq!(sheet.payload(), "$A1 1\n");
        assert_eq!(sheet.extent(), Extent::new(10, 10));

        let mut mirror = Spreadsheet::new(Extent::new(10, 10));
        mirror.apply_payload("$A1 1\n$B1 2\n$B2 3\n").unwrap();
        mirror.apply_payload("$B1 \n$B2 \n").unwrap();
        assert_eq!(mirror.payload(), "$A1 1\n");
    }

    #[test]
    fn set_grows_extent_and_bad_payloads_change_nothing() {
        let mut sheet = Spreadsheet::new(Extent::new(2, 2));
        sheet.set(r("$D7"), "x");
        assert_eq!(sheet.extent(), Extent::new(7, 4));

        assert!(sheet.apply_payload("$A1 1\nA2 2\n").is_err());
        assert_eq!(sheet.get(&r("$A1")), None);
        assert_eq!(sheet.to_payload([&r("$D7"), &r("$A1")]), "$D7 x\n$A1 \n");
    }

    #[test]
    fn evaluate_term_against_sheet() {
        let sheet = sheet("$A1 2\n$A2 =$A1*3\n$A3 =1/0\n");
        let engine = FormulaEngine::new();
        let evaluation = sheet.evaluate_all(&engine);

        assert_eq!(evaluation.evaluate_term(&engine, "=$A2+$A1"), Ok(Value::Number(8.0)));
        assert_eq!(evaluation.evaluate_term(&engine, "12"), Ok(Value::Number(12.0)));
        assert_eq!(
            evaluation.evaluate_term(&engine, "=$A3"),
            Err(CellError::Upstream(r("$A3")))
        );
    }

    #[test]
    fn render_window() {
        let sheet = sheet("$A1 1\n$B2 =$A1+1\n");
        let evaluation = sheet.evaluate_all(&FormulaEngine::new());
        let text = sheet.render(&evaluation, r("$A1"), 2, 2);
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines.len(), 3);
        assert!(lines[0].contains('A') && lines[0].contains('B'));
        assert_eq!(lines[1].split_whitespace().collect::<Vec<_>>(), ["1", "1"]);
        assert_eq!(lines[2].split_whitespace().collect::<Vec<_>>(), ["2", "2"]);
    }

    #[test]
    fn render_window_at_the_grid_edge() {
        let corner = Reference::new(u32::MAX, u32::MAX);
        let mut sheet = Spreadsheet::new(Extent::new(10, 10));
        sheet.set(corner, "7");
        let evaluation = sheet.evaluate_all(&FormulaEngine::new());

        let text = sheet.render(&evaluation, corner, 10, 10);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1].split_whitespace().last(), Some("7"));
    }
}
