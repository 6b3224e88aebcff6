//! Recursive-descent parser producing a [`ParseTree`].
//!
//! Grammar, lowest precedence first:
//!
//! ```text
//! program  := logical EOF
//! logical  := compare (("And" | "Or") compare)*
//! compare  := primary (COMPARISON primary)*
//! primary  := "Not"? "(" logical ")" | value
//! value    := literal | "[" args? "]" | NAME "(" args? ")" | "$" NAME ("." "$" NAME)*
//! args     := logical ("," logical)*
//! ```
//!
//! Both infix levels are left-associative.

use crate::error::{ParseError, ParseResult};
use crate::lexer::{Keyword, Span, Token, TokenKind, tokenize};
use crate::tree::{NodeId, NodeKind, ParseTree};

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    tree: ParseTree,
}

impl Parser {
    fn peek(&self) -> &Token {
        // tokenize always ends with Eof, and Eof is never consumed
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if token.kind != TokenKind::Eof {
            self.pos += 1;
        }
        token
    }

    fn unexpected(&self, expected: &str) -> ParseError {
        let token = self.peek();
        ParseError::UnexpectedToken {
            line: token.span.line,
            column: token.span.column,
            found: token.kind.to_string(),
            expected: expected.to_string(),
        }
    }

    fn expect(&mut self, kind: TokenKind, expected: &str) -> ParseResult<Token> {
        if self.peek().kind == kind {
            Ok(self.advance())
        } else {
            Err(self.unexpected(expected))
        }
    }

    fn program(&mut self) -> ParseResult<()> {
        let span = self.peek().span;
        let program = self.tree.add(NodeKind::Program, span, None);
        self.logical(program)?;
        if self.peek().kind != TokenKind::Eof {
            return Err(self.unexpected("end of input"));
        }
        Ok(())
    }

    fn logical(&mut self, parent: NodeId) -> ParseResult<NodeId> {
        let mut left = self.compare(parent)?;
        while let TokenKind::Keyword(op) = self.peek().kind {
            if !op.is_logical() {
                break;
            }
            left = self.infix(parent, left, NodeKind::Logical(op), Self::compare)?;
        }
        Ok(left)
    }

    fn compare(&mut self, parent: NodeId) -> ParseResult<NodeId> {
        let mut left = self.primary(parent)?;
        while let TokenKind::Keyword(op) = self.peek().kind {
            if !op.is_comparison() {
                break;
            }
            left = self.infix(parent, left, NodeKind::Compare(op), Self::primary)?;
        }
        Ok(left)
    }

    /// Wrap `left` in a new infix node and parse its right operand.
    fn infix(
        &mut self,
        parent: NodeId,
        left: NodeId,
        kind: NodeKind,
        operand: fn(&mut Self, NodeId) -> ParseResult<NodeId>,
    ) -> ParseResult<NodeId> {
        let span = self.advance().span;
        let node = self.tree.add(kind, span, Some(parent));
        self.tree.reparent(left, node);
        operand(self, node)?;
        Ok(node)
    }

    fn primary(&mut self, parent: NodeId) -> ParseResult<NodeId> {
        let token = self.peek().clone();
        match token.kind {
            TokenKind::Keyword(Keyword::Not) => {
                self.advance();
                if self.peek().kind != TokenKind::LParen {
                    return Err(self.unexpected("'('"));
                }
                self.parens(parent, true, token.span)
            }
            TokenKind::LParen => self.parens(parent, false, token.span),
            _ => self.value(parent),
        }
    }

    fn parens(&mut self, parent: NodeId, negated: bool, span: Span) -> ParseResult<NodeId> {
        self.expect(TokenKind::LParen, "'('")?;
        let node = self.tree.add(NodeKind::Parens { negated }, span, Some(parent));
        self.logical(node)?;
        self.expect(TokenKind::RParen, "')'")?;
        Ok(node)
    }

    fn value(&mut self, parent: NodeId) -> ParseResult<NodeId> {
        let start = self.pos;
        let token = self.advance();
        let span = token.span;
        let kind = match token.kind {
            TokenKind::Str(s) => NodeKind::Str(s),
            TokenKind::Int(text) => NodeKind::Int(text),
            TokenKind::Float(text) => NodeKind::Float(text),
            TokenKind::Keyword(Keyword::True) => NodeKind::Bool(true),
            TokenKind::Keyword(Keyword::False) => NodeKind::Bool(false),
            TokenKind::Keyword(Keyword::None) => NodeKind::Null,
            TokenKind::LBracket => {
                let node = self.tree.add(NodeKind::Array, span, Some(parent));
                self.args(node, TokenKind::RBracket, "']'")?;
                return Ok(node);
            }
            TokenKind::Name(name) => {
                self.expect(TokenKind::LParen, "'('")?;
                let node = self.tree.add(NodeKind::Function(name), span, Some(parent));
                self.args(node, TokenKind::RParen, "')'")?;
                return Ok(node);
            }
            TokenKind::Dollar => NodeKind::Attribute(self.attribute_path()?),
            _ => {
                self.pos = start;
                return Err(self.unexpected("a value"));
            }
        };
        Ok(self.tree.add(kind, span, Some(parent)))
    }

    /// Names of `$a.$b...`, with the first `$` already consumed.
    fn attribute_path(&mut self) -> ParseResult<Vec<String>> {
        let mut path = vec![self.attribute_name()?];
        while self.peek().kind == TokenKind::Dot {
            self.advance();
            self.expect(TokenKind::Dollar, "'$'")?;
            path.push(self.attribute_name()?);
        }
        Ok(path)
    }

    fn attribute_name(&mut self) -> ParseResult<String> {
        match self.peek().kind.clone() {
            TokenKind::Name(name) => {
                self.advance();
                Ok(name)
            }
            TokenKind::Keyword(keyword) => {
                self.advance();
                Ok(keyword.as_str().to_string())
            }
            _ => Err(self.unexpected("a field name")),
        }
    }

    /// Optional comma-separated arguments followed by `close`.
    fn args(&mut self, parent: NodeId, close: TokenKind, expected: &str) -> ParseResult<()> {
        if self.peek().kind == close {
            self.advance();
            return Ok(());
        }

        let span = self.peek().span;
        let args = self.tree.add(NodeKind::Args, span, Some(parent));
        self.logical(args)?;
        while self.peek().kind == TokenKind::Comma {
            self.advance();
            self.logical(args)?;
        }
        self.expect(close, &format!("',' or {expected}"))?;
        Ok(())
    }
}

/// Parse rule source into a tree rooted at a `Program` node.
pub fn parse_tree(src: &str) -> ParseResult<ParseTree> {
    let mut parser = Parser {
        tokens: tokenize(src)?,
        pos: 0,
        tree: ParseTree::new(),
    };
    parser.program()?;
    Ok(parser.tree)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds_under(tree: &ParseTree, id: NodeId) -> Vec<NodeKind> {
        tree.node(id)
            .children
            .iter()
            .map(|c| tree.node(*c).kind.clone())
            .collect()
    }

    #[test]
    fn test_compare_binds_tighter_than_logical() {
        let tree = parse_tree("1 Eq 1 And 2 Ne 3").unwrap();
        let program = tree.root().unwrap();
        let top = tree.node(program).children[0];
        assert_eq!(tree.node(top).kind, NodeKind::Logical(Keyword::And));
        assert_eq!(
            kinds_under(&tree, top),
            vec![
                NodeKind::Compare(Keyword::Eq),
                NodeKind::Compare(Keyword::Ne)
            ]
        );
    }

    #[test]
    fn test_left_associative() {
        let tree = parse_tree("1 Or 2 Or 3").unwrap();
        let top = tree.node(tree.root().unwrap()).children[0];
        assert_eq!(
            kinds_under(&tree, top),
            vec![NodeKind::Logical(Keyword::Or), NodeKind::Int("3".into())]
        );
    }

    #[test]
    fn test_nested_attribute() {
        let tree = parse_tree("$a.$b").unwrap();
        let top = tree.node(tree.root().unwrap()).children[0];
        assert_eq!(
            tree.node(top).kind,
            NodeKind::Attribute(vec!["a".into(), "b".into()])
        );
    }

    #[test]
    fn test_function_args() {
        let tree = parse_tree("Concat('a', $b, 1)").unwrap();
        let function = tree.node(tree.root().unwrap()).children[0];
        assert_eq!(tree.node(function).kind, NodeKind::Function("Concat".into()));
        let args = tree.node(function).children[0];
        assert_eq!(tree.node(args).children.len(), 3);
    }

    #[test]
    fn test_trailing_garbage() {
        let err = parse_tree("TimeSince($assigned, 'mo') Gte 6").unwrap_err();
        assert_eq!(
            err,
            ParseError::UnexpectedToken {
                line: 1,
                column: 27,
                found: "'Gte'".into(),
                expected: "end of input".into(),
            }
        );
    }

    #[test]
    fn test_unbalanced() {
        assert!(parse_tree("(1 Eq 1").is_err());
        assert!(parse_tree("Not 1").is_err());
        assert!(parse_tree("[1, 2").is_err());
        assert!(parse_tree("").is_err());
        assert!(parse_tree("1 Eq").is_err());
    }
}
