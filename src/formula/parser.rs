use crate::error::{FormulaError, ParseError};
use crate::formula::node::{Function, Node, Operator};
use crate::formula::tokenizer::{Token, TokenKind, tokenize};
use crate::reference::{expand_range, parse_reference};

/// Recursive-descent parser over one token stream. A fresh cursor is built
/// for every call to [`parse`].
struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    end: usize,
}

impl<'a> Parser<'a> {
    fn new(tokens: &'a [Token], input_len: usize) -> Self {
        Parser {
            tokens,
            pos: 0,
            end: input_len,
        }
    }

    fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<&'a Token> {
        let token = self.tokens.get(self.pos);
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn consume(&mut self, kind: TokenKind, expected: &str) -> Result<&'a Token, ParseError> {
        match self.next() {
            Some(token) if token.kind == kind => Ok(token),
            Some(token) => Err(ParseError::unexpected_token(
                token.pos,
                expected,
                token.text.clone(),
            )),
            None => Err(ParseError::unexpected_end(self.end, expected)),
        }
    }

    fn expect_end(&self) -> Result<(), ParseError> {
        match self.peek() {
            None => Ok(()),
            Some(token) => Err(ParseError::unexpected_token(
                token.pos,
                "end of formula",
                token.text.clone(),
            )),
        }
    }

    fn formula(&mut self) -> Result<Node, ParseError> {
        // `=SUM(...)` starts with the function keyword itself; `=$A1+1` with
        // a lone `=`.
        if let Some(token) = self.peek() {
            if token.kind == TokenKind::Operator && token.text == "=" {
                self.pos += 1;
            }
        }
        let expr = self.expression()?;
        self.expect_end()?;
        Ok(Node::Formula(Box::new(expr)))
    }

    fn expression(&mut self) -> Result<Node, ParseError> {
        let mut left = self.term()?;

        while let Some(token) = self.peek() {
            if token.kind != TokenKind::Operator {
                break;
            }
            let op = Operator::from_symbol(&token.text).ok_or_else(|| {
                ParseError::unexpected_token(token.pos, "operator", token.text.clone())
            })?;
            self.pos += 1;

            let right = self.term()?;
            left = Node::Operation {
                left: Box::new(left),
                op,
                right: Box::new(right),
            };
        }

        Ok(left)
    }

    fn term(&mut self) -> Result<Node, ParseError> {
        let token = match self.peek() {
            Some(token) => token,
            None => return Err(ParseError::unexpected_end(self.end, "term")),
        };

        match token.kind {
            TokenKind::Number => {
                self.pos += 1;
                token
                    .text
                    .parse::<f64>()
                    .map(Node::Number)
                    .map_err(|_| ParseError::unexpected_token(token.pos, "number", token.text.clone()))
            }
            TokenKind::Reference => {
                self.pos += 1;
                parse_reference(&token.text)
                    .map(Node::Reference)
                    .map_err(|_| {
                        ParseError::unexpected_token(token.pos, "reference", token.text.clone())
                    })
            }
            TokenKind::Text => {
                self.pos += 1;
                Ok(Node::String(token.text.clone()))
            }
            TokenKind::Function => self.function_call(),
            TokenKind::LParen => {
                self.pos += 1;
                let expr = self.expression()?;
                self.consume(TokenKind::RParen, ")")?;
                Ok(expr)
            }
            TokenKind::Range => Err(ParseError::InvalidRange {
                range: token.text.clone(),
            }),
            _ => Err(ParseError::unexpected_token(
                token.pos,
                "term",
                token.text.clone(),
            )),
        }
    }

    fn function_call(&mut self) -> Result<Node, ParseError> {
        let keyword = self.consume(TokenKind::Function, "function")?;
        let name: Function = keyword.text.parse().map_err(|_| {
            ParseError::unexpected_token(keyword.pos, "function", keyword.text.clone())
        })?;
        self.consume(TokenKind::LParen, "(")?;

        let mut args = Vec::new();
        if let Some(token) = self.peek() {
            if token.kind == TokenKind::RParen {
                self.pos += 1;
                return Ok(Node::FunctionCall { name, args });
            }
        }

        loop {
            match self.peek() {
                Some(token) if token.kind == TokenKind::Range => {
                    self.pos += 1;
                    args.extend(self.range(token)?);
                }
                _ => args.push(self.expression()?),
            }

            match self.next() {
                Some(token) if token.kind == TokenKind::Comma => continue,
                Some(token) if token.kind == TokenKind::RParen => break,
                Some(token) => {
                    return Err(ParseError::unexpected_token(
                        token.pos,
                        ", or )",
                        token.text.clone(),
                    ));
                }
                None => return Err(ParseError::unexpected_end(self.end, ", or )")),
            }
        }

        Ok(Node::FunctionCall { name, args })
    }

    fn range(&self, token: &Token) -> Result<Vec<Node>, ParseError> {
        let invalid = || ParseError::InvalidRange {
            range: token.text.clone(),
        };
        let (from, to) = token.text.split_once(':').ok_or_else(invalid)?;
        let from = parse_reference(from).map_err(|_| invalid())?;
        let to = parse_reference(to).map_err(|_| invalid())?;

        Ok(expand_range(from, to)
            .ok_or_else(invalid)?
            .into_iter()
            .map(Node::Reference)
            .collect())
    }

    /// Input without a leading `=` is a single literal term.
    fn bare_term(&mut self, input: &str) -> Result<Node, ParseError> {
        if let [token] = self.tokens {
            match token.kind {
                TokenKind::Number | TokenKind::Reference | TokenKind::Text => return self.term(),
                _ => {}
            }
        }
        Ok(Node::String(input.trim().to_string()))
    }
}

/// Parses a cell term. Input starting with `=` becomes a [`Node::Formula`];
/// anything else is a bare number, reference or string.
pub fn parse(input: &str) -> Result<Node, FormulaError> {
    let tokens = tokenize(input)?;
    let mut parser = Parser::new(&tokens, input.len());

    let node = if input.trim_start().starts_with('=') {
        parser.formula()?
    } else {
        parser.bare_term(input)?
    };
    Ok(node)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reference::Reference;

    fn num(n: f64) -> Box<Node> {
        Box::new(Node::Number(n))
    }

    #[test]
    fn bare_terms() {
        assert_eq!(parse("12").unwrap(), Node::Number(12.0));
        assert_eq!(parse("$B3").unwrap(), Node::Reference(Reference::new(2, 3)));
        assert_eq!(parse("hello").unwrap(), Node::String("hello".into()));
        assert_eq!(parse("hello world").unwrap(), Node::String("hello world".into()));
        assert_eq!(parse("1 + 2").unwrap(), Node::String("1 + 2".into()));
        assert_eq!(parse("").unwrap(), Node::String(String::new()));
    }

    #[test]
    fn operations_associate_left() {
        let node = parse("=1+2*3").unwrap();
        assert_eq!(
            node,
            Node::Formula(Box::new(Node::Operation {
                left: Box::new(Node::Operation {
                    left: num(1.0),
                    op: Operator::Add,
                    right: num(2.0),
                }),
                op: Operator::Mul,
                right: num(3.0),
            }))
        );
    }

    #[test]
    fn parentheses_group() {
        let node = parse("=1+(2*3)").unwrap();
        assert_eq!(
            node,
            Node::Formula(Box::new(Node::Operation {
                left: num(1.0),
                op: Operator::Add,
                right: Box::new(Node::Operation {
                    left: num(2.0),
                    op: Operator::Mul,
                    right: num(3.0),
                }),
            }))
        );
    }

    #[test]
    fn function_calls() {
        let node = parse("=IF($A1, =SUM(1, 2), x)").unwrap();
        let Node::Formula(expr) = node else {
            panic!("expected a formula");
        };
        let Node::FunctionCall { name, args } = *expr else {
            panic!("expected a call");
        };
        assert_eq!(name, Function::If);
        assert_eq!(args.len(), 3);
        assert_eq!(args[0], Node::Reference(Reference::new(1, 1)));
        assert_eq!(
            args[1],
            Node::FunctionCall {
                name: Function::Sum,
                args: vec![Node::Number(1.0), Node::Number(2.0)],
            }
        );
        assert_eq!(args[2], Node::String("x".into()));

        assert_eq!(
            parse("=AVG()").unwrap(),
            Node::Formula(Box::new(Node::FunctionCall {
                name: Function::Avg,
                args: vec![],
            }))
        );
    }

    #[test]
    fn ranges_expand_inside_calls() {
        let node = parse("=SUM($A1:$B2, 5)").unwrap();
        let refs = node.references();
        let texts: Vec<String> = refs.iter().map(|r| r.to_string()).collect();
        assert_eq!(texts, ["$A1", "$B1", "$A2", "$B2"]);

        assert!(matches!(
            parse("=$A1:$A2"),
            Err(FormulaError::Parse(ParseError::InvalidRange { .. }))
        ));
        assert!(parse("=SUM($A1:$A2+1)").is_err());
    }

    #[test]
    fn huge_ranges_are_invalid() {
        for formula in ["=SUM($A1:$ZZZZZZ4000000000)", "=MAX($A1:$XFD1048576)"] {
            assert!(
                matches!(
                    parse(formula),
                    Err(FormulaError::Parse(ParseError::InvalidRange { .. }))
                ),
                "{formula:?} should be refused"
            );
        }
        assert!(parse("=SUM($A1:$A65536)").is_ok());
    }

    #[test]
    fn grammar_violations() {
        for formula in ["=", "=1+", "=SUM(1,2", "=SUM 1", "=1 2", "=(1+2", "=1:2", "=SUM(1,)"] {
            assert!(
                matches!(parse(formula), Err(FormulaError::Parse(_))),
                "{formula:?} should not parse"
            );
        }
    }

    #[test]
    fn unexpected_token_names_both_sides() {
        let err = parse("=SUM(1 2)").unwrap_err();
        assert_eq!(
            err,
            FormulaError::Parse(ParseError::UnexpectedToken {
                pos: 7,
                expected: ", or )".into(),
                found: "2".into(),
            })
        );
    }

    #[test]
    fn rendering_parses_back() {
        for formula in ["=1+$A2*3", "=IF($A1>2,=CONCAT(a,b),-1)", "=SUM($A1:$A3)", "=7"] {
            let node = parse(formula).unwrap();
            assert_eq!(parse(&node.to_string()).unwrap(), node, "{formula}");
        }
    }
}
