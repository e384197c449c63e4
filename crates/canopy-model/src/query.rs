//! A small path query language over the model.
//!
//! ## Grammar
//!
//! ```text
//! expr      := 'count(' path ')' | 'true()' | 'false()' | literal | number | path
//! path      := ('/' | '//' | '$' name)? step (('/' | '//') step)* ('/' '@' name)?
//! step      := (name | '*' | '.' | '..') predicate*
//! predicate := '[' '@' name ']' | '[' '@' name '=' literal ']' | '[' integer ']'
//! literal   := "'" chars "'" | '"' chars '"'
//! ```
//!
//! `/` alone selects the document root. `//` selects descendants, so
//! `//item` finds every `item` in the document. A trailing `@name` yields
//! the attribute's value as text (the first selected node that has it);
//! attributes are never returned as nodes. Positional predicates are
//! 1-based and apply per parent, as in XPath.

use std::collections::HashSet;

use crate::error::{ModelError, Result};
use crate::model::Model;
use crate::node::NodeKey;
use crate::value::{Scope, Value};

/// A parsed query, reusable across evaluations.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    source: String,
    expr: Expr,
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Path(Path),
    Count(Path),
    Text(String),
    Number(f64),
    Bool(bool),
}

#[derive(Debug, Clone, PartialEq)]
struct Path {
    start: Start,
    steps: Vec<Step>,
    attribute: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
enum Start {
    Root,
    Context,
    Variable(String),
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Axis {
    Child,
    Descendant,
}

#[derive(Debug, Clone, PartialEq)]
enum Test {
    Name(String),
    Any,
    SelfNode,
    Parent,
}

#[derive(Debug, Clone, PartialEq)]
enum Predicate {
    Has(String),
    Equals(String, String),
    Position(usize),
}

#[derive(Debug, Clone, PartialEq)]
struct Step {
    axis: Axis,
    test: Test,
    predicates: Vec<Predicate>,
}

impl Query {
    /// Parse a query string.
    pub fn parse(source: &str) -> Result<Query> {
        let mut parser = Parser {
            source,
            chars: source.chars().collect(),
            pos: 0,
        };
        let expr = parser.expr()?;
        parser.skip_ws();
        if !parser.at_end() {
            return Err(parser.error("unexpected trailing input"));
        }
        Ok(Query {
            source: source.to_string(),
            expr,
        })
    }

    /// The original query text.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluate against `model` with `context` as the current node.
    pub fn evaluate(&self, model: &Model, context: NodeKey, scope: Option<&Scope>) -> Result<Value> {
        if !model.contains(context) {
            return Err(ModelError::UnknownNode(context));
        }
        match &self.expr {
            Expr::Path(path) => self.eval_path(model, path, context, scope),
            Expr::Count(path) => {
                let count = match self.eval_path(model, path, context, scope)? {
                    Value::Nodes(nodes) => nodes.len(),
                    Value::Text(_) => 1,
                    other => {
                        return Err(self.error(format!("count() of a {}", other.type_name())));
                    }
                };
                Ok(Value::Number(count as f64))
            }
            Expr::Text(s) => Ok(Value::Text(s.clone())),
            Expr::Number(n) => Ok(Value::Number(*n)),
            Expr::Bool(b) => Ok(Value::Bool(*b)),
        }
    }

    fn eval_path(
        &self,
        model: &Model,
        path: &Path,
        context: NodeKey,
        scope: Option<&Scope>,
    ) -> Result<Value> {
        let mut set = match &path.start {
            Start::Root => vec![model.root()],
            Start::Context => vec![context],
            Start::Variable(name) => {
                match scope.and_then(|s| s.get(name)) {
                    None => return Err(ModelError::UnboundVariable(name.clone())),
                    Some(Value::Nodes(nodes)) => nodes
                        .iter()
                        .copied()
                        .filter(|k| model.contains(*k))
                        .collect(),
                    Some(other) if path.steps.is_empty() && path.attribute.is_none() => {
                        return Ok(other.clone());
                    }
                    Some(other) => {
                        return Err(self.error(format!(
                            "${} is a {}, not a node-set",
                            name,
                            other.type_name()
                        )));
                    }
                }
            }
        };

        for step in &path.steps {
            let mut seen = HashSet::new();
            let mut next = Vec::new();
            for node in &set {
                let origins = match step.axis {
                    Axis::Child => vec![*node],
                    Axis::Descendant => model.subtree(*node),
                };
                for origin in origins {
                    for key in select(model, origin, step) {
                        if seen.insert(key) {
                            next.push(key);
                        }
                    }
                }
            }
            set = next;
        }

        match &path.attribute {
            Some(name) => Ok(set
                .iter()
                .find_map(|k| model.attribute(*k, name))
                .map(|v| Value::Text(v.to_string()))
                .unwrap_or_else(Value::empty)),
            None => Ok(Value::Nodes(set)),
        }
    }

    fn error(&self, reason: impl Into<String>) -> ModelError {
        ModelError::InvalidQuery {
            query: self.source.clone(),
            reason: reason.into(),
        }
    }
}

/// Apply one child-axis step from `origin`, including its predicates.
fn select(model: &Model, origin: NodeKey, step: &Step) -> Vec<NodeKey> {
    let mut candidates: Vec<NodeKey> = match &step.test {
        Test::SelfNode => vec![origin],
        Test::Parent => model.parent(origin).into_iter().collect(),
        Test::Any => model.children(origin).to_vec(),
        Test::Name(name) => model
            .children(origin)
            .iter()
            .copied()
            .filter(|k| model.type_name(*k) == Some(name.as_str()))
            .collect(),
    };

    for predicate in &step.predicates {
        candidates = match predicate {
            Predicate::Has(attr) => candidates
                .into_iter()
                .filter(|k| model.attribute(*k, attr).is_some())
                .collect(),
            Predicate::Equals(attr, value) => candidates
                .into_iter()
                .filter(|k| model.attribute(*k, attr) == Some(value.as_str()))
                .collect(),
            Predicate::Position(n) => candidates.get(n - 1).copied().into_iter().collect(),
        };
    }
    candidates
}

/// Parse and evaluate in one call.
pub fn evaluate(model: &Model, query: &str, context: NodeKey, scope: Option<&Scope>) -> Result<Value> {
    Query::parse(query)?.evaluate(model, context, scope)
}

// ─────────────────────────────────────────────────────────────────────────────
// Parser
// ─────────────────────────────────────────────────────────────────────────────

struct Parser<'a> {
    source: &'a str,
    chars: Vec<char>,
    pos: usize,
}

impl Parser<'_> {
    fn error(&self, reason: impl Into<String>) -> ModelError {
        ModelError::InvalidQuery {
            query: self.source.to_string(),
            reason: format!("{} at offset {}", reason.into(), self.pos),
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.chars.len()
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn eat(&mut self, s: &str) -> bool {
        let n = s.chars().count();
        if self.chars.len() >= self.pos + n
            && self.chars[self.pos..self.pos + n].iter().copied().eq(s.chars())
        {
            self.pos += n;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, c: char) -> Result<()> {
        self.skip_ws();
        if self.peek() == Some(c) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error(format!("expected '{}'", c)))
        }
    }

    fn expr(&mut self) -> Result<Expr> {
        self.skip_ws();
        if self.eat("count(") {
            self.skip_ws();
            let path = self.path()?;
            self.expect(')')?;
            return Ok(Expr::Count(path));
        }
        if self.eat("true()") {
            return Ok(Expr::Bool(true));
        }
        if self.eat("false()") {
            return Ok(Expr::Bool(false));
        }
        match self.peek() {
            None => Err(self.error("empty query")),
            Some('\'') | Some('"') => Ok(Expr::Text(self.literal()?)),
            Some(c) if c.is_ascii_digit() => Ok(Expr::Number(self.number()?)),
            Some('-') if self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) => {
                Ok(Expr::Number(self.number()?))
            }
            Some(_) => Ok(Expr::Path(self.path()?)),
        }
    }

    fn path(&mut self) -> Result<Path> {
        let start = match self.peek() {
            Some('/') => Start::Root,
            Some('$') => {
                self.pos += 1;
                Start::Variable(self.name()?)
            }
            _ => Start::Context,
        };

        let mut path = Path {
            start,
            steps: Vec::new(),
            attribute: None,
        };

        if path.start == Start::Context {
            if self.peek() == Some('@') {
                self.pos += 1;
                path.attribute = Some(self.name()?);
                return Ok(path);
            }
            path.steps.push(self.step(Axis::Child)?);
        }

        while self.peek() == Some('/') {
            let axis = if self.eat("//") {
                Axis::Descendant
            } else {
                self.pos += 1;
                Axis::Child
            };

            // A bare "/" selects the root.
            if path.start == Start::Root
                && path.steps.is_empty()
                && axis == Axis::Child
                && matches!(self.peek(), None | Some(')') | Some(' '))
            {
                break;
            }

            if self.peek() == Some('@') {
                if axis == Axis::Descendant {
                    return Err(self.error("'//@' is not supported"));
                }
                self.pos += 1;
                path.attribute = Some(self.name()?);
                if self.peek() == Some('/') {
                    return Err(self.error("attribute step must be last"));
                }
                break;
            }
            path.steps.push(self.step(axis)?);
        }
        Ok(path)
    }

    fn step(&mut self, axis: Axis) -> Result<Step> {
        let test = if self.eat("..") {
            Test::Parent
        } else if self.eat(".") {
            Test::SelfNode
        } else if self.eat("*") {
            Test::Any
        } else {
            Test::Name(self.name()?)
        };

        let mut predicates = Vec::new();
        while self.peek() == Some('[') {
            self.pos += 1;
            predicates.push(self.predicate()?);
            self.expect(']')?;
        }
        Ok(Step {
            axis,
            test,
            predicates,
        })
    }

    fn predicate(&mut self) -> Result<Predicate> {
        self.skip_ws();
        match self.peek() {
            Some('@') => {
                self.pos += 1;
                let attr = self.name()?;
                self.skip_ws();
                if self.peek() == Some('=') {
                    self.pos += 1;
                    self.skip_ws();
                    let value = self.literal()?;
                    Ok(Predicate::Equals(attr, value))
                } else {
                    Ok(Predicate::Has(attr))
                }
            }
            Some(c) if c.is_ascii_digit() => {
                let n = self.number()?;
                if n < 1.0 || n.fract() != 0.0 {
                    return Err(self.error("position must be a positive integer"));
                }
                Ok(Predicate::Position(n as usize))
            }
            _ => Err(self.error("unsupported predicate")),
        }
    }

    fn name(&mut self) -> Result<String> {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | ':' | '#'))
        {
            self.pos += 1;
        }
        if self.pos == start {
            return Err(self.error("expected a name"));
        }
        Ok(self.chars[start..self.pos].iter().collect())
    }

    fn literal(&mut self) -> Result<String> {
        let Some(quote) = self.peek().filter(|c| *c == '\'' || *c == '"') else {
            return Err(self.error("expected a quoted string"));
        };
        self.pos += 1;
        let start = self.pos;
        while self.peek().is_some_and(|c| c != quote) {
            self.pos += 1;
        }
        if self.at_end() {
            return Err(self.error("unterminated string"));
        }
        let text = self.chars[start..self.pos].iter().collect();
        self.pos += 1;
        Ok(text)
    }

    fn number(&mut self) -> Result<f64> {
        let start = self.pos;
        if self.peek() == Some('-') {
            self.pos += 1;
        }
        while self.peek().is_some_and(|c| c.is_ascii_digit() || c == '.') {
            self.pos += 1;
        }
        let text: String = self.chars[start..self.pos].iter().collect();
        text.parse()
            .map_err(|_| self.error(format!("bad number '{}'", text)))
    }
}
