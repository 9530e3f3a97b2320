//! Expression evaluation over token slices.
//!
//! Expressions are parsed with a precedence climber driven by
//! [`Operator::precedence`]; `**` is right-associative, everything else
//! binds left. Evaluation happens during parsing, so every statement is a
//! single pass over its tokens.

use crate::error::{KdlError, Location, ReasonCode};
use crate::scope::Scope;
use crate::token::{Operator, Symbol, Token, TokenKind};

/// Names accepted on the right of `is` as type tests rather than lookups.
const TYPE_TEST_NAMES: &[&str] = &[
    "Integer", "Decimal", "String", "Boolean", "Reference", "List", "Compound",
];

/// Evaluate one expression.
pub fn evaluate(tokens: &[Token], scope: &mut Scope) -> Result<Token, KdlError> {
    let tokens = trim_eof(tokens);
    let mut evaluator = Evaluator::new(tokens, scope);
    let value = evaluator.expression(1)?;
    evaluator.finish()?;
    Ok(value)
}

/// Run a statement: `target = expression` binds the value in `scope`, any
/// other statement is evaluated as an expression. Either way the value is
/// returned.
pub fn execute(tokens: &[Token], scope: &mut Scope) -> Result<Token, KdlError> {
    let tokens = trim_eof(tokens);
    if let (Some(target), Some(assign)) = (tokens.first(), tokens.get(1)) {
        if assign.is_symbol(Symbol::Assign) {
            if let Some(name) = binding_name(target) {
                let value = evaluate(&tokens[2..], scope)?;
                scope.set_variable(&name, value.clone());
                return Ok(value);
            }
        }
    }
    evaluate(tokens, scope)
}

/// The variable name a token binds to, if it can be assigned.
pub fn binding_name(token: &Token) -> Option<String> {
    match &token.kind {
        TokenKind::Variable(name) | TokenKind::Identifier(name) => Some(name.clone()),
        TokenKind::IdentifierPath(path) => Some(path.join(".")),
        _ => None,
    }
}

fn trim_eof(tokens: &[Token]) -> &[Token] {
    match tokens.last() {
        Some(last) if last.kind == TokenKind::Eof => &tokens[..tokens.len() - 1],
        _ => tokens,
    }
}

struct Evaluator<'t, 's, 'p> {
    tokens: &'t [Token],
    index:  usize,
    scope:  &'s mut Scope<'p>,
}

impl<'t, 's, 'p> Evaluator<'t, 's, 'p> {
    fn new(tokens: &'t [Token], scope: &'s mut Scope<'p>) -> Self {
        Evaluator {
            tokens,
            index: 0,
            scope,
        }
    }

    fn peek(&self) -> Option<&'t Token> {
        self.tokens.get(self.index)
    }

    fn end_location(&self) -> Location {
        self.tokens
            .last()
            .map(|t| t.location.clone())
            .unwrap_or_else(Location::builtin)
    }

    fn next(&mut self) -> Result<&'t Token, KdlError> {
        match self.tokens.get(self.index) {
            Some(token) => {
                self.index += 1;
                Ok(token)
            }
            None => Err(KdlError::compile(
                ReasonCode::UnexpectedEndOfInput,
                "expression ended unexpectedly",
                &self.end_location(),
            )),
        }
    }

    fn eat_symbol(&mut self, symbol: Symbol) -> bool {
        if self.peek().map_or(false, |t| t.is_symbol(symbol)) {
            self.index += 1;
            true
        } else {
            false
        }
    }

    fn expect_symbol(&mut self, symbol: Symbol) -> Result<(), KdlError> {
        let token = self.next()?;
        if token.is_symbol(symbol) {
            Ok(())
        } else {
            Err(KdlError::compile(
                ReasonCode::MalformedExpression,
                format!("expected \"{}\" but found \"{}\"", symbol.as_str(), token),
                &token.location,
            ))
        }
    }

    fn finish(&self) -> Result<(), KdlError> {
        match self.peek() {
            None => Ok(()),
            Some(token) => Err(KdlError::compile(
                ReasonCode::MalformedExpression,
                format!("unexpected \"{}\" after expression", token),
                &token.location,
            )),
        }
    }

    fn expression(&mut self, min_precedence: u8) -> Result<Token, KdlError> {
        let mut lhs = self.unary()?;

        loop {
            let op = match self.peek().map(|t| &t.kind) {
                Some(TokenKind::Operator(op)) => *op,
                _ => break,
            };
            let precedence = match op.precedence() {
                Some(p) if p >= min_precedence => p,
                _ => break,
            };
            self.index += 1;

            let next_min = if op.is_right_associative() { precedence } else { precedence + 1 };
            let rhs = if op == Operator::Is {
                self.is_operand(next_min)?
            } else {
                self.expression(next_min)?
            };
            lhs = lhs.apply_binary(op, &rhs)?;
        }

        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Token, KdlError> {
        let op = match self.peek().map(|t| &t.kind) {
            Some(TokenKind::Operator(op)) => *op,
            _ => return self.postfix(),
        };

        match op {
            Operator::Minus | Operator::Plus | Operator::Not | Operator::BitNot => {
                self.index += 1;
                self.unary()?.apply_unary(op)
            }
            Operator::Increment | Operator::Decrement => {
                self.index += 1;
                let target = self.next()?;
                let name = binding_name(target).ok_or_else(|| {
                    KdlError::compile(
                        ReasonCode::InvalidOperation,
                        format!("\"{}\" needs a variable operand", op.as_str()),
                        &target.location,
                    )
                })?;
                let updated = self.lookup(&name, target)?.apply_unary(op)?;
                self.scope.set_variable(&name, updated.clone());
                Ok(updated)
            }
            _ => {
                let token = self.next()?;
                Err(KdlError::compile(
                    ReasonCode::MalformedExpression,
                    format!("unexpected operator \"{}\"", op.as_str()),
                    &token.location,
                ))
            }
        }
    }

    fn postfix(&mut self) -> Result<Token, KdlError> {
        let (value, binding) = self.primary()?;

        if let Some(name) = binding {
            let step = match self.peek().map(|t| &t.kind) {
                Some(TokenKind::Operator(Operator::Increment)) => Some(1),
                Some(TokenKind::Operator(Operator::Decrement)) => Some(-1),
                _ => None,
            };
            if let Some(delta) = step {
                self.index += 1;
                self.scope.set_variable(&name, value.step(delta)?);
            }
        }

        Ok(value)
    }

    fn lookup(&self, name: &str, at: &Token) -> Result<Token, KdlError> {
        self.scope.variable(name).cloned().ok_or_else(|| {
            KdlError::compile(
                ReasonCode::UnresolvedName,
                format!("unresolved name \"{}\"", name),
                &at.location,
            )
        })
    }

    /// Returns the value and, for names, the variable it was read from.
    fn primary(&mut self) -> Result<(Token, Option<String>), KdlError> {
        let token = self.next()?;

        match &token.kind {
            TokenKind::Integer(_)
            | TokenKind::Decimal(_)
            | TokenKind::String(_)
            | TokenKind::Boolean(_)
            | TokenKind::Reference(_)
            | TokenKind::Compound(_) => Ok((token.clone(), None)),

            TokenKind::Identifier(_) | TokenKind::IdentifierPath(_)
                if self.peek().map_or(false, |t| t.is_symbol(Symbol::LParen)) =>
            {
                let name = binding_name(token).unwrap_or_default();
                Ok((self.call(&name, token)?, None))
            }

            TokenKind::Variable(_) | TokenKind::Identifier(_) | TokenKind::IdentifierPath(_) => {
                let name = binding_name(token).unwrap_or_default();
                let mut value = self.lookup(&name, token)?;
                value.location = token.location.clone();
                Ok((value, Some(name)))
            }

            TokenKind::Symbol(Symbol::LParen) => {
                let value = self.expression(1)?;
                self.expect_symbol(Symbol::RParen)?;
                Ok((value, None))
            }

            TokenKind::Error(text) => Err(KdlError::compile(
                ReasonCode::UnrecognizedLexeme,
                format!("unrecognized input \"{}\"", text),
                &token.location,
            )),

            TokenKind::Symbol(Symbol::Hash) => Err(KdlError::compile(
                ReasonCode::MalformedReference,
                "malformed reference literal",
                &token.location,
            )),

            _ => Err(KdlError::compile(
                ReasonCode::MalformedExpression,
                format!("unexpected \"{}\" in expression", token),
                &token.location,
            )),
        }
    }

    fn call(&mut self, name: &str, at: &Token) -> Result<Token, KdlError> {
        let function = self.scope.function(name).ok_or_else(|| {
            KdlError::compile(
                ReasonCode::UnresolvedFunction,
                format!("unresolved function \"{}\"", name),
                &at.location,
            )
        })?;

        self.expect_symbol(Symbol::LParen)?;
        let mut args = Vec::new();
        if !self.eat_symbol(Symbol::RParen) {
            loop {
                args.push(self.expression(1)?);
                if self.eat_symbol(Symbol::RParen) {
                    break;
                }
                self.expect_symbol(Symbol::Comma)?;
            }
        }

        function(&args, &at.location)
    }

    fn is_operand(&mut self, min_precedence: u8) -> Result<Token, KdlError> {
        let token = match self.peek() {
            Some(token) => token,
            None => return self.expression(min_precedence),
        };

        if token.is_symbol(Symbol::LBracket) {
            self.index += 1;
            let mut items = Vec::new();
            if !self.eat_symbol(Symbol::RBracket) {
                loop {
                    items.push(self.expression(1)?);
                    if self.eat_symbol(Symbol::RBracket) {
                        break;
                    }
                    self.expect_symbol(Symbol::Comma)?;
                }
            }
            return Ok(Token::new(TokenKind::List(items), token.location.clone()));
        }

        if let TokenKind::Identifier(name) = &token.kind {
            if TYPE_TEST_NAMES.contains(&name.as_str()) && self.scope.variable(name).is_none() {
                self.index += 1;
                return Ok(token.clone());
            }
        }

        self.expression(min_precedence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::Reference;
    use crate::scope::native;
    use crate::tokenizer::tokenize;

    fn eval(text: &str, scope: &mut Scope) -> Result<Token, KdlError> {
        execute(&tokenize(text, "test.kdl"), scope)
    }

    fn eval_kind(text: &str) -> TokenKind {
        eval(text, &mut Scope::new()).unwrap().kind
    }

    #[test]
    fn precedence_and_associativity() {
        assert_eq!(eval_kind("1 + 2 * 3"), TokenKind::Integer(7));
        assert_eq!(eval_kind("(1 + 2) * 3"), TokenKind::Integer(9));
        assert_eq!(eval_kind("10 - 4 - 3"), TokenKind::Integer(3));
        assert_eq!(eval_kind("2 ** 3 ** 2"), TokenKind::Integer(512));
        assert_eq!(eval_kind("1 << 4 | 1"), TokenKind::Integer(17));
        assert_eq!(eval_kind("-2 * 3"), TokenKind::Integer(-6));
        assert_eq!(eval_kind("1 + 2 == 3 && !false"), TokenKind::Boolean(true));
        assert_eq!(eval_kind("~0 & 0xFF"), TokenKind::Integer(0xFF));
    }

    #[test]
    fn is_operator_forms() {
        assert_eq!(eval_kind("3 is Integer"), TokenKind::Boolean(true));
        assert_eq!(eval_kind("\"a\" is Integer"), TokenKind::Boolean(false));
        assert_eq!(eval_kind("3 is [1, 2, 3]"), TokenKind::Boolean(true));
        assert_eq!(eval_kind("4 is [1, 2, 3]"), TokenKind::Boolean(false));
        assert_eq!(eval_kind("#Widget.4 is #Widget.4"), TokenKind::Boolean(true));
        assert_eq!(eval_kind("#Widget.4 is Reference"), TokenKind::Boolean(true));
    }

    #[test]
    fn assignment_and_increment_rebind() {
        let mut scope = Scope::new();
        eval("$x = 5", &mut scope).unwrap();
        assert_eq!(eval("$x++", &mut scope).unwrap().kind, TokenKind::Integer(5));
        assert_eq!(eval("$x", &mut scope).unwrap().kind, TokenKind::Integer(6));
        assert_eq!(eval("++$x", &mut scope).unwrap().kind, TokenKind::Integer(7));
        assert_eq!(eval("--x", &mut scope).unwrap().kind, TokenKind::Integer(6));
        eval("this.Origin.X = $x * 2", &mut scope).unwrap();
        assert_eq!(scope.variable("this.Origin.X").unwrap().kind, TokenKind::Integer(12));
    }

    #[test]
    fn reference_arithmetic_in_expressions() {
        let got = eval_kind("#Widget.128 + 2");
        assert_eq!(got, TokenKind::Reference(Reference::typed(130, "Widget")));
        let got = eval_kind("200 - #Widget.128");
        assert_eq!(got, TokenKind::Reference(Reference::typed(72, "Widget")));
    }

    #[test]
    fn function_calls_resolve_through_scope_chain() {
        let mut root = Scope::new();
        root.add_function(
            "sum",
            native(|args, loc| {
                let total = args.iter().filter_map(|a| a.as_integer()).sum();
                Ok(Token::integer(total, loc))
            }),
        );
        let mut child = root.child();
        assert_eq!(eval("sum(1, 2, 3) * 2", &mut child).unwrap().kind, TokenKind::Integer(12));
        assert_eq!(eval("sum()", &mut child).unwrap().kind, TokenKind::Integer(0));
    }

    #[test]
    fn evaluation_errors_carry_codes() {
        let code = |text: &str| eval(text, &mut Scope::new()).unwrap_err().code();
        assert_eq!(code("missing + 1"), Some(ReasonCode::UnresolvedName));
        assert_eq!(code("nope(1)"), Some(ReasonCode::UnresolvedFunction));
        assert_eq!(code("1 / 0"), Some(ReasonCode::DivisionByZero));
        assert_eq!(code("true + 1"), Some(ReasonCode::InvalidOperation));
        assert_eq!(code("1 2"), Some(ReasonCode::MalformedExpression));
        assert_eq!(code("(1 + 2"), Some(ReasonCode::UnexpectedEndOfInput));
        assert_eq!(code("1 + `"), Some(ReasonCode::UnrecognizedLexeme));
        assert_eq!(code(""), Some(ReasonCode::UnexpectedEndOfInput));
    }

    #[test]
    fn string_concatenation() {
        assert_eq!(eval_kind("\"id-\" + 4 + true"), TokenKind::String("id-4true".into()));
    }
}
