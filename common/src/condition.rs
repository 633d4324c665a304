// Condition expressions
//
// A small JavaScript-flavoured boolean expression language evaluated against a
// named context, e.g. `!$isHoliday` or `$holidayReason == "offday" || $isHoliday`.

use crate::calendar::HolidayStatus;
use crate::errors::ConditionError;
use crate::models::Condition;
use regex::Regex;
use serde_json::{Number, Value};
use std::collections::HashMap;
use tracing::{debug, instrument};

/// Deepest operator nesting a compiled expression may have
pub const MAX_NESTING: usize = 64;

/// Named values an expression can reference
pub type ConditionContext = HashMap<String, Value>;

/// Build the context exposed to conditions for one pass
pub fn day_context(status: &HolidayStatus) -> ConditionContext {
    let mut context = ConditionContext::new();
    context.insert("$isHoliday".to_string(), Value::Bool(status.is_holiday));
    context.insert(
        "$holidayReason".to_string(),
        Value::String(status.reason.as_str().to_string()),
    );
    context
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Str(String),
    Ident(String),
    Op(String),
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Token::Number(n) => n.to_string(),
            Token::Str(s) => format!("{:?}", s),
            Token::Ident(name) => name.clone(),
            Token::Op(op) => op.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CompareOp {
    Eq { strict: bool },
    NotEq { strict: bool },
    Lt,
    Le,
    Gt,
    Ge,
}

/// Parsed expression tree
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Ident(String),
    Not(Box<Expr>),
    Neg(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Compare(CompareOp, Box<Expr>, Box<Expr>),
}

impl Expr {
    /// Evaluate to a value. Unknown identifiers resolve to `null`.
    pub fn evaluate(&self, context: &ConditionContext) -> Value {
        match self {
            Expr::Literal(value) => value.clone(),
            Expr::Ident(name) => context.get(name).cloned().unwrap_or(Value::Null),
            Expr::Not(inner) => Value::Bool(!truthy(&inner.evaluate(context))),
            Expr::Neg(inner) => number_value(-to_number(&inner.evaluate(context))),
            Expr::And(lhs, rhs) => {
                let left = lhs.evaluate(context);
                if truthy(&left) {
                    rhs.evaluate(context)
                } else {
                    left
                }
            }
            Expr::Or(lhs, rhs) => {
                let left = lhs.evaluate(context);
                if truthy(&left) {
                    left
                } else {
                    rhs.evaluate(context)
                }
            }
            Expr::Compare(op, lhs, rhs) => {
                let left = lhs.evaluate(context);
                let right = rhs.evaluate(context);
                Value::Bool(compare(*op, &left, &right))
            }
        }
    }
}

/// ConditionEvaluator compiles and evaluates condition expressions
pub struct ConditionEvaluator {
    token_regex: Regex,
}

impl ConditionEvaluator {
    pub fn new() -> Result<Self, ConditionError> {
        let token_regex = Regex::new(
            r#"^(?:(?P<num>\d+(?:\.\d+)?)|(?P<str>"(?:[^"\\]|\\.)*"|'(?:[^'\\]|\\.)*')|(?P<ident>[A-Za-z_$][A-Za-z0-9_$]*)|(?P<op>===|!==|==|!=|<=|>=|&&|\|\||[!<>()\-]))"#,
        )
        .map_err(|e| ConditionError::RegexError(e.to_string()))?;

        Ok(Self { token_regex })
    }

    /// Parse an expression without evaluating it
    pub fn compile(&self, expression: &str) -> Result<Expr, ConditionError> {
        let tokens = self.tokenize(expression)?;
        if tokens.is_empty() {
            return Err(ConditionError::Empty);
        }

        let mut parser = Parser {
            expression,
            tokens: &tokens,
            pos: 0,
            depth: 0,
        };
        let expr = parser.parse_or()?;
        if let Some(token) = parser.peek() {
            return Err(ConditionError::UnexpectedToken {
                expression: expression.to_string(),
                token: token.describe(),
            });
        }
        Ok(expr)
    }

    pub fn evaluate(
        &self,
        expression: &str,
        context: &ConditionContext,
    ) -> Result<bool, ConditionError> {
        Ok(truthy(&self.compile(expression)?.evaluate(context)))
    }

    /// True when every condition holds. Stops at the first false one.
    #[instrument(skip_all, fields(condition_count = conditions.len()))]
    pub fn evaluate_all(
        &self,
        conditions: &[Condition],
        context: &ConditionContext,
    ) -> Result<bool, ConditionError> {
        for condition in conditions {
            if !self.evaluate(&condition.custom_expr, context)? {
                debug!(expression = %condition.custom_expr, "Condition is not true");
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn tokenize(&self, expression: &str) -> Result<Vec<Token>, ConditionError> {
        let mut tokens = Vec::new();
        let mut pos = 0;

        while pos < expression.len() {
            let rest = &expression[pos..];
            let trimmed = rest.trim_start();
            if trimmed.is_empty() {
                break;
            }
            pos += rest.len() - trimmed.len();

            let caps = self.token_regex.captures(trimmed).ok_or_else(|| {
                ConditionError::UnexpectedCharacter {
                    expression: expression.to_string(),
                    offset: pos,
                }
            })?;

            let token = if let Some(m) = caps.name("num") {
                Token::Number(m.as_str().parse().unwrap_or(f64::NAN))
            } else if let Some(m) = caps.name("str") {
                Token::Str(unquote(m.as_str()))
            } else if let Some(m) = caps.name("ident") {
                Token::Ident(m.as_str().to_string())
            } else if let Some(m) = caps.name("op") {
                Token::Op(m.as_str().to_string())
            } else {
                return Err(ConditionError::UnexpectedCharacter {
                    expression: expression.to_string(),
                    offset: pos,
                });
            };

            pos += caps.get(0).map(|m| m.len()).unwrap_or(0);
            tokens.push(token);
        }

        Ok(tokens)
    }
}

struct Parser<'a> {
    expression: &'a str,
    tokens: &'a [Token],
    pos: usize,
    depth: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Result<Token, ConditionError> {
        let token = self
            .tokens
            .get(self.pos)
            .cloned()
            .ok_or_else(|| ConditionError::UnexpectedEnd(self.expression.to_string()))?;
        self.pos += 1;
        Ok(token)
    }

    fn eat_op(&mut self, ops: &[&str]) -> Option<String> {
        match self.peek() {
            Some(Token::Op(op)) if ops.contains(&op.as_str()) => {
                let op = op.clone();
                self.pos += 1;
                Some(op)
            }
            _ => None,
        }
    }

    /// Every operator adds a level to the tree; left-nested chains count too
    fn descend(&mut self) -> Result<(), ConditionError> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return Err(ConditionError::TooDeep {
                expression: self.expression.to_string(),
                limit: MAX_NESTING,
            });
        }
        Ok(())
    }

    fn parse_or(&mut self) -> Result<Expr, ConditionError> {
        let depth = self.depth;
        let mut expr = self.parse_and()?;
        while self.eat_op(&["||"]).is_some() {
            self.descend()?;
            let rhs = self.parse_and()?;
            expr = Expr::Or(Box::new(expr), Box::new(rhs));
        }
        self.depth = depth;
        Ok(expr)
    }

    fn parse_and(&mut self) -> Result<Expr, ConditionError> {
        let depth = self.depth;
        let mut expr = self.parse_equality()?;
        while self.eat_op(&["&&"]).is_some() {
            self.descend()?;
            let rhs = self.parse_equality()?;
            expr = Expr::And(Box::new(expr), Box::new(rhs));
        }
        self.depth = depth;
        Ok(expr)
    }

    fn parse_equality(&mut self) -> Result<Expr, ConditionError> {
        let depth = self.depth;
        let mut expr = self.parse_relational()?;
        while let Some(op) = self.eat_op(&["==", "===", "!=", "!=="]) {
            self.descend()?;
            let op = match op.as_str() {
                "==" => CompareOp::Eq { strict: false },
                "===" => CompareOp::Eq { strict: true },
                "!=" => CompareOp::NotEq { strict: false },
                _ => CompareOp::NotEq { strict: true },
            };
            let rhs = self.parse_relational()?;
            expr = Expr::Compare(op, Box::new(expr), Box::new(rhs));
        }
        self.depth = depth;
        Ok(expr)
    }

    fn parse_relational(&mut self) -> Result<Expr, ConditionError> {
        let depth = self.depth;
        let mut expr = self.parse_unary()?;
        while let Some(op) = self.eat_op(&["<", "<=", ">", ">="]) {
            self.descend()?;
            let op = match op.as_str() {
                "<" => CompareOp::Lt,
                "<=" => CompareOp::Le,
                ">" => CompareOp::Gt,
                _ => CompareOp::Ge,
            };
            let rhs = self.parse_unary()?;
            expr = Expr::Compare(op, Box::new(expr), Box::new(rhs));
        }
        self.depth = depth;
        Ok(expr)
    }

    fn parse_unary(&mut self) -> Result<Expr, ConditionError> {
        let depth = self.depth;
        let expr = if self.eat_op(&["!"]).is_some() {
            self.descend()?;
            Expr::Not(Box::new(self.parse_unary()?))
        } else if self.eat_op(&["-"]).is_some() {
            self.descend()?;
            Expr::Neg(Box::new(self.parse_unary()?))
        } else {
            self.parse_primary()?
        };
        self.depth = depth;
        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<Expr, ConditionError> {
        match self.next()? {
            Token::Number(n) => Ok(Expr::Literal(number_value(n))),
            Token::Str(s) => Ok(Expr::Literal(Value::String(s))),
            Token::Ident(name) => Ok(match name.as_str() {
                "true" => Expr::Literal(Value::Bool(true)),
                "false" => Expr::Literal(Value::Bool(false)),
                "null" | "undefined" => Expr::Literal(Value::Null),
                _ => Expr::Ident(name),
            }),
            Token::Op(op) if op == "(" => {
                let depth = self.depth;
                self.descend()?;
                let expr = self.parse_or()?;
                self.depth = depth;
                match self.next()? {
                    Token::Op(close) if close == ")" => Ok(expr),
                    other => Err(ConditionError::UnexpectedToken {
                        expression: self.expression.to_string(),
                        token: other.describe(),
                    }),
                }
            }
            other => Err(ConditionError::UnexpectedToken {
                expression: self.expression.to_string(),
                token: other.describe(),
            }),
        }
    }
}

fn unquote(literal: &str) -> String {
    let inner = &literal[1..literal.len() - 1];
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some(other) => out.push(other),
                None => {}
            }
        } else {
            out.push(c);
        }
    }
    out
}

fn number_value(n: f64) -> Value {
    Number::from_f64(n).map(Value::Number).unwrap_or(Value::Null)
}

/// JavaScript truthiness
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn to_number(value: &Value) -> f64 {
    match value {
        Value::Null => 0.0,
        Value::Bool(b) => {
            if *b {
                1.0
            } else {
                0.0
            }
        }
        Value::Number(n) => n.as_f64().unwrap_or(f64::NAN),
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() {
                0.0
            } else {
                s.parse().unwrap_or(f64::NAN)
            }
        }
        Value::Array(_) | Value::Object(_) => f64::NAN,
    }
}

fn equals(left: &Value, right: &Value, strict: bool) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        (Value::Null, Value::Null) => true,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::String(a), Value::String(b)) => a == b,
        (Value::Null, _) | (_, Value::Null) => false,
        (Value::Array(_) | Value::Object(_), _) | (_, Value::Array(_) | Value::Object(_)) => {
            false
        }
        _ if strict => false,
        _ => to_number(left) == to_number(right),
    }
}

fn compare(op: CompareOp, left: &Value, right: &Value) -> bool {
    match op {
        CompareOp::Eq { strict } => equals(left, right, strict),
        CompareOp::NotEq { strict } => !equals(left, right, strict),
        _ => {
            let ordering = match (left, right) {
                (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
                _ => to_number(left).partial_cmp(&to_number(right)),
            };
            let Some(ordering) = ordering else {
                return false;
            };
            match op {
                CompareOp::Lt => ordering.is_lt(),
                CompareOp::Le => ordering.is_le(),
                CompareOp::Gt => ordering.is_gt(),
                CompareOp::Ge => ordering.is_ge(),
                CompareOp::Eq { .. } | CompareOp::NotEq { .. } => false,
            }
        }
    }
}
