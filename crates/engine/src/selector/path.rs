//! Structural path queries: an XPath 1.0 subset evaluated over the tree that
//! `scraper` builds, so both selector kinds see the same parse of a page.
//!
//! Supported: absolute and relative location paths, `//`, `.`, `..`, the
//! child/descendant/descendant-or-self/self/parent/ancestor/sibling axes,
//! name tests and `*`, terminal `text()` and `@attr` steps, unions (`|`),
//! parenthesised filter expressions such as `(//span)[1]`, and predicates
//! with positions, comparisons, arithmetic, `and`/`or` and the common string
//! functions.

use std::collections::HashMap;

use ego_tree::NodeId;
use scraper::{ElementRef, Html};

use crate::error::SelectorSyntaxError;
use crate::text::{collapse_whitespace, element_text};

pub fn evaluate(document: &Html, expression: &str) -> Result<Vec<String>, SelectorSyntaxError> {
    let query = parse(expression)?;
    let evaluator = Evaluator::new(document);
    let env = Env {
        focus: Item::Node(Ctx::Document),
        position: 1,
        size: 1,
    };

    let fragments: Vec<String> = evaluator
        .items(&query.root, &env)
        .into_iter()
        .map(|item| match item {
            Item::Node(node) => evaluator.node_fragment(node),
            Item::Text(_, value) => collapse_whitespace(&value),
        })
        .collect();

    Ok(fragments.into_iter().filter(|f| !f.is_empty()).collect())
}

/// A parsed query. Its top-level expression always selects nodes.
#[derive(Debug, Clone)]
pub struct Query {
    root: Expr,
}

pub fn parse(expression: &str) -> Result<Query, SelectorSyntaxError> {
    let tokens =
        tokenize(expression).map_err(|reason| SelectorSyntaxError::new(expression, reason))?;
    if tokens.is_empty() {
        return Err(SelectorSyntaxError::new(expression, "empty path"));
    }

    let mut parser = Parser {
        expression,
        tokens,
        pos: 0,
    };
    let root = parser.parse_or()?;
    if parser.pos < parser.tokens.len() {
        return Err(parser.error("unexpected token"));
    }
    if !root.is_node_set() {
        return Err(SelectorSyntaxError::new(
            expression,
            "expression computes a value instead of selecting nodes",
        ));
    }
    Ok(Query { root })
}

// ---------------------------------------------------------------------------
// Tokens

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

impl ArithOp {
    fn apply(self, left: f64, right: f64) -> f64 {
        match self {
            Self::Add => left + right,
            Self::Sub => left - right,
            Self::Mul => left * right,
            Self::Div => left / right,
            // Truncated remainder, sign follows the dividend.
            Self::Mod => left % right,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Slash,
    DoubleSlash,
    LBracket,
    RBracket,
    LParen,
    RParen,
    Comma,
    At,
    Dot,
    DotDot,
    Star,
    ColonColon,
    Pipe,
    And,
    Or,
    Op(CmpOp),
    Arith(ArithOp),
    Name(String),
    Literal(String),
    Number(f64),
}

/// Whether the next token starts an operand. Decides whether `*` is a
/// wildcard or a multiplication and whether `div`, `mod`, `and` and `or` are
/// operators or element names.
fn expects_operand(previous: Option<&Tok>) -> bool {
    previous.is_none_or(|tok| {
        matches!(
            tok,
            Tok::At
                | Tok::ColonColon
                | Tok::LParen
                | Tok::LBracket
                | Tok::Comma
                | Tok::Slash
                | Tok::DoubleSlash
                | Tok::Pipe
                | Tok::And
                | Tok::Or
                | Tok::Op(_)
                | Tok::Arith(_)
        )
    })
}

fn tokenize(input: &str) -> Result<Vec<(usize, Tok)>, String> {
    let chars: Vec<(usize, char)> = input.char_indices().collect();
    let mut tokens: Vec<(usize, Tok)> = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let (pos, c) = chars[i];
        let next = chars.get(i + 1).map(|(_, c)| *c);

        if c.is_whitespace() {
            i += 1;
            continue;
        }

        let operand = expects_operand(tokens.last().map(|(_, tok)| tok));
        let (tok, width) = match c {
            '/' if next == Some('/') => (Tok::DoubleSlash, 2),
            '/' => (Tok::Slash, 1),
            '[' => (Tok::LBracket, 1),
            ']' => (Tok::RBracket, 1),
            '(' => (Tok::LParen, 1),
            ')' => (Tok::RParen, 1),
            ',' => (Tok::Comma, 1),
            '@' => (Tok::At, 1),
            '|' => (Tok::Pipe, 1),
            '+' => (Tok::Arith(ArithOp::Add), 1),
            '-' => (Tok::Arith(ArithOp::Sub), 1),
            '*' if operand => (Tok::Star, 1),
            '*' => (Tok::Arith(ArithOp::Mul), 1),
            ':' if next == Some(':') => (Tok::ColonColon, 2),
            '.' if next == Some('.') => (Tok::DotDot, 2),
            '.' if next.is_some_and(|n| n.is_ascii_digit()) => {
                let (number, width) = read_number(&chars[i..]);
                (Tok::Number(number), width)
            }
            '.' => (Tok::Dot, 1),
            '=' => (Tok::Op(CmpOp::Eq), 1),
            '!' if next == Some('=') => (Tok::Op(CmpOp::Ne), 2),
            '<' if next == Some('=') => (Tok::Op(CmpOp::Le), 2),
            '<' => (Tok::Op(CmpOp::Lt), 1),
            '>' if next == Some('=') => (Tok::Op(CmpOp::Ge), 2),
            '>' => (Tok::Op(CmpOp::Gt), 1),
            '\'' | '"' => {
                let rest = &chars[i + 1..];
                let Some(end) = rest.iter().position(|(_, ch)| *ch == c) else {
                    return Err(format!("unterminated string literal at position {pos}"));
                };
                let literal: String = rest[..end].iter().map(|(_, ch)| *ch).collect();
                (Tok::Literal(literal), end + 2)
            }
            c if c.is_ascii_digit() => {
                let (number, width) = read_number(&chars[i..]);
                (Tok::Number(number), width)
            }
            c if c.is_alphabetic() || c == '_' => {
                let width = chars[i..]
                    .iter()
                    .take_while(|(_, ch)| ch.is_alphanumeric() || matches!(ch, '_' | '-' | '.'))
                    .count();
                let name: String = chars[i..i + width].iter().map(|(_, ch)| *ch).collect();
                let tok = match name.as_str() {
                    "and" if !operand => Tok::And,
                    "or" if !operand => Tok::Or,
                    "div" if !operand => Tok::Arith(ArithOp::Div),
                    "mod" if !operand => Tok::Arith(ArithOp::Mod),
                    _ => Tok::Name(name),
                };
                (tok, width)
            }
            other => return Err(format!("unexpected character '{other}' at position {pos}")),
        };

        tokens.push((pos, tok));
        i += width;
    }

    Ok(tokens)
}

fn read_number(chars: &[(usize, char)]) -> (f64, usize) {
    let mut seen_dot = false;
    let width = chars
        .iter()
        .take_while(|(_, ch)| {
            if *ch == '.' && !seen_dot {
                seen_dot = true;
                true
            } else {
                ch.is_ascii_digit()
            }
        })
        .count();
    let text: String = chars[..width].iter().map(|(_, ch)| *ch).collect();
    (text.parse().unwrap_or(f64::NAN), width)
}

// ---------------------------------------------------------------------------
// Syntax tree

#[derive(Debug, Clone)]
struct PathExpr {
    absolute: bool,
    steps: Vec<Step>,
}

#[derive(Debug, Clone)]
struct Step {
    axis: Axis,
    test: NodeTest,
    predicates: Vec<Expr>,
}

impl Step {
    fn descendant_or_self() -> Self {
        Self {
            axis: Axis::DescendantOrSelf,
            test: NodeTest::Node,
            predicates: Vec::new(),
        }
    }

    /// `text()` and `@attr` produce strings, so nothing can follow them.
    fn is_terminal(&self) -> bool {
        self.axis == Axis::Attribute || self.test == NodeTest::Text
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Axis {
    Child,
    Descendant,
    DescendantOrSelf,
    SelfAxis,
    Parent,
    Ancestor,
    FollowingSibling,
    PrecedingSibling,
    Attribute,
}

impl Axis {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "child" => Some(Self::Child),
            "descendant" => Some(Self::Descendant),
            "descendant-or-self" => Some(Self::DescendantOrSelf),
            "self" => Some(Self::SelfAxis),
            "parent" => Some(Self::Parent),
            "ancestor" => Some(Self::Ancestor),
            "following-sibling" => Some(Self::FollowingSibling),
            "preceding-sibling" => Some(Self::PrecedingSibling),
            "attribute" => Some(Self::Attribute),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum NodeTest {
    /// Element (or attribute, on the attribute axis) name, lowercased.
    Named(String),
    Any,
    Text,
    Node,
}

#[derive(Debug, Clone, Copy)]
enum Function {
    Contains,
    StartsWith,
    NormalizeSpace,
    Translate,
    Not,
    String,
    Concat,
    Count,
    Position,
    Last,
    StringLength,
    True,
    False,
}

impl Function {
    /// Function plus its minimum and maximum argument counts.
    fn lookup(name: &str) -> Option<(Self, usize, usize)> {
        let entry = match name {
            "contains" => (Self::Contains, 2, 2),
            "starts-with" => (Self::StartsWith, 2, 2),
            "normalize-space" => (Self::NormalizeSpace, 0, 1),
            "translate" => (Self::Translate, 3, 3),
            "not" => (Self::Not, 1, 1),
            "string" => (Self::String, 0, 1),
            "concat" => (Self::Concat, 2, usize::MAX),
            "count" => (Self::Count, 1, 1),
            "position" => (Self::Position, 0, 0),
            "last" => (Self::Last, 0, 0),
            "string-length" => (Self::StringLength, 0, 1),
            "true" => (Self::True, 0, 0),
            "false" => (Self::False, 0, 0),
            _ => return None,
        };
        Some(entry)
    }
}

#[derive(Debug, Clone)]
enum Expr {
    Or(Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Compare(CmpOp, Box<Expr>, Box<Expr>),
    Arith(ArithOp, Box<Expr>, Box<Expr>),
    Negate(Box<Expr>),
    Union(Box<Expr>, Box<Expr>),
    /// A node-set expression narrowed by predicates, optionally followed by
    /// relative steps: `(//li)[2]/span`.
    Filter {
        base: Box<Expr>,
        predicates: Vec<Expr>,
        steps: Vec<Step>,
    },
    Literal(String),
    Number(f64),
    Path(PathExpr),
    Call(Function, Vec<Expr>),
}

impl Expr {
    fn is_node_set(&self) -> bool {
        matches!(self, Self::Path(_) | Self::Union(..) | Self::Filter { .. })
    }
}

// ---------------------------------------------------------------------------
// Parser

struct Parser<'s> {
    expression: &'s str,
    tokens: Vec<(usize, Tok)>,
    pos: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Tok> {
        self.tokens.get(self.pos).map(|(_, tok)| tok)
    }

    fn peek_at(&self, offset: usize) -> Option<&Tok> {
        self.tokens.get(self.pos + offset).map(|(_, tok)| tok)
    }

    fn error(&self, message: impl AsRef<str>) -> SelectorSyntaxError {
        let position = self
            .tokens
            .get(self.pos)
            .map(|(pos, _)| *pos)
            .unwrap_or(self.expression.len());
        SelectorSyntaxError::new(
            self.expression,
            format!("{} at position {}", message.as_ref(), position),
        )
    }

    fn expect(&mut self, expected: Tok, what: &str) -> Result<(), SelectorSyntaxError> {
        if self.peek() == Some(&expected) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error(format!("expected {what}")))
        }
    }

    fn starts_step(&self) -> bool {
        matches!(
            self.peek(),
            Some(Tok::Dot | Tok::DotDot | Tok::At | Tok::Star | Tok::Name(_))
        )
    }

    /// A name followed by `(` that is a function rather than a node test.
    fn starts_call(&self) -> bool {
        matches!(
            (self.peek(), self.peek_at(1)),
            (Some(Tok::Name(name)), Some(Tok::LParen)) if name != "text" && name != "node"
        )
    }

    fn parse_location_path(&mut self) -> Result<PathExpr, SelectorSyntaxError> {
        let mut steps = Vec::new();
        let absolute = match self.peek() {
            Some(Tok::Slash) => {
                self.pos += 1;
                if !self.starts_step() {
                    // A lone "/" selects the document itself.
                    return Ok(PathExpr {
                        absolute: true,
                        steps,
                    });
                }
                true
            }
            Some(Tok::DoubleSlash) => {
                self.pos += 1;
                steps.push(Step::descendant_or_self());
                true
            }
            _ => false,
        };

        let steps = self.parse_steps(steps)?;
        Ok(PathExpr { absolute, steps })
    }

    /// One step, then any further `/step` or `//step`, appended to `steps`.
    fn parse_steps(&mut self, mut steps: Vec<Step>) -> Result<Vec<Step>, SelectorSyntaxError> {
        steps.push(self.parse_step()?);
        loop {
            match self.peek() {
                Some(Tok::Slash) => self.pos += 1,
                Some(Tok::DoubleSlash) => {
                    self.pos += 1;
                    steps.push(Step::descendant_or_self());
                }
                _ => break,
            }
            if steps.last().is_some_and(Step::is_terminal) {
                return Err(self.error("text() and @attribute must be the last step"));
            }
            steps.push(self.parse_step()?);
        }
        Ok(steps)
    }

    fn parse_step(&mut self) -> Result<Step, SelectorSyntaxError> {
        match self.peek() {
            Some(Tok::Dot) => {
                self.pos += 1;
                return Ok(Step {
                    axis: Axis::SelfAxis,
                    test: NodeTest::Node,
                    predicates: Vec::new(),
                });
            }
            Some(Tok::DotDot) => {
                self.pos += 1;
                return Ok(Step {
                    axis: Axis::Parent,
                    test: NodeTest::Node,
                    predicates: Vec::new(),
                });
            }
            _ => {}
        }

        let axis = match (self.peek(), self.peek_at(1)) {
            (Some(Tok::At), _) => {
                self.pos += 1;
                Axis::Attribute
            }
            (Some(Tok::Name(name)), Some(Tok::ColonColon)) => {
                let axis = Axis::from_name(name)
                    .ok_or_else(|| self.error(format!("unknown axis '{name}'")))?;
                self.pos += 2;
                axis
            }
            _ => Axis::Child,
        };

        let test = match self.peek().cloned() {
            Some(Tok::Star) => {
                self.pos += 1;
                NodeTest::Any
            }
            Some(Tok::Name(name)) => {
                self.pos += 1;
                if self.peek() == Some(&Tok::LParen) {
                    let test = match name.as_str() {
                        "text" => NodeTest::Text,
                        "node" => NodeTest::Node,
                        _ => {
                            return Err(
                                self.error(format!("function '{name}' is not a node test"))
                            );
                        }
                    };
                    self.pos += 1;
                    self.expect(Tok::RParen, "')'")?;
                    test
                } else {
                    NodeTest::Named(name.to_ascii_lowercase())
                }
            }
            _ => return Err(self.error("expected a node test")),
        };

        if axis == Axis::Attribute && !matches!(test, NodeTest::Named(_) | NodeTest::Any) {
            return Err(self.error("attributes can only be selected by name or '*'"));
        }

        Ok(Step {
            axis,
            test,
            predicates: self.parse_predicates()?,
        })
    }

    fn parse_predicates(&mut self) -> Result<Vec<Expr>, SelectorSyntaxError> {
        let mut predicates = Vec::new();
        while self.peek() == Some(&Tok::LBracket) {
            self.pos += 1;
            predicates.push(self.parse_or()?);
            self.expect(Tok::RBracket, "']'")?;
        }
        Ok(predicates)
    }

    fn parse_or(&mut self) -> Result<Expr, SelectorSyntaxError> {
        let mut left = self.parse_and()?;
        while self.peek() == Some(&Tok::Or) {
            self.pos += 1;
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, SelectorSyntaxError> {
        let mut left = self.parse_equality()?;
        while self.peek() == Some(&Tok::And) {
            self.pos += 1;
            let right = self.parse_equality()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_equality(&mut self) -> Result<Expr, SelectorSyntaxError> {
        let mut left = self.parse_relational()?;
        while let Some(Tok::Op(op @ (CmpOp::Eq | CmpOp::Ne))) = self.peek().cloned() {
            self.pos += 1;
            let right = self.parse_relational()?;
            left = Expr::Compare(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_relational(&mut self) -> Result<Expr, SelectorSyntaxError> {
        let mut left = self.parse_additive()?;
        while let Some(Tok::Op(op @ (CmpOp::Lt | CmpOp::Le | CmpOp::Gt | CmpOp::Ge))) =
            self.peek().cloned()
        {
            self.pos += 1;
            let right = self.parse_additive()?;
            left = Expr::Compare(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_additive(&mut self) -> Result<Expr, SelectorSyntaxError> {
        let mut left = self.parse_multiplicative()?;
        while let Some(Tok::Arith(op @ (ArithOp::Add | ArithOp::Sub))) = self.peek().cloned() {
            self.pos += 1;
            let right = self.parse_multiplicative()?;
            left = Expr::Arith(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, SelectorSyntaxError> {
        let mut left = self.parse_unary()?;
        while let Some(Tok::Arith(op @ (ArithOp::Mul | ArithOp::Div | ArithOp::Mod))) =
            self.peek().cloned()
        {
            self.pos += 1;
            let right = self.parse_unary()?;
            left = Expr::Arith(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, SelectorSyntaxError> {
        if self.peek() == Some(&Tok::Arith(ArithOp::Sub)) {
            self.pos += 1;
            return Ok(Expr::Negate(Box::new(self.parse_unary()?)));
        }
        self.parse_union()
    }

    fn parse_union(&mut self) -> Result<Expr, SelectorSyntaxError> {
        let mut left = self.parse_path_expr()?;
        while self.peek() == Some(&Tok::Pipe) {
            if !left.is_node_set() {
                return Err(self.error("'|' can only join node-sets"));
            }
            self.pos += 1;
            let right = self.parse_path_expr()?;
            if !right.is_node_set() {
                return Err(self.error("'|' can only join node-sets"));
            }
            left = Expr::Union(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_path_expr(&mut self) -> Result<Expr, SelectorSyntaxError> {
        let location = matches!(self.peek(), Some(Tok::Slash | Tok::DoubleSlash))
            || (self.starts_step() && !self.starts_call());
        if location {
            return Ok(Expr::Path(self.parse_location_path()?));
        }

        let base = self.parse_primary()?;
        let predicates = self.parse_predicates()?;
        let steps = match self.peek() {
            Some(Tok::Slash) => {
                self.pos += 1;
                self.parse_steps(Vec::new())?
            }
            Some(Tok::DoubleSlash) => {
                self.pos += 1;
                self.parse_steps(vec![Step::descendant_or_self()])?
            }
            _ => Vec::new(),
        };

        if predicates.is_empty() && steps.is_empty() {
            return Ok(base);
        }
        if !base.is_node_set() {
            return Err(self.error("predicates and steps need a node-set to work on"));
        }
        Ok(Expr::Filter {
            base: Box::new(base),
            predicates,
            steps,
        })
    }

    fn parse_primary(&mut self) -> Result<Expr, SelectorSyntaxError> {
        match self.peek().cloned() {
            Some(Tok::Literal(value)) => {
                self.pos += 1;
                Ok(Expr::Literal(value))
            }
            Some(Tok::Number(value)) => {
                self.pos += 1;
                Ok(Expr::Number(value))
            }
            Some(Tok::LParen) => {
                self.pos += 1;
                let inner = self.parse_or()?;
                self.expect(Tok::RParen, "')'")?;
                Ok(inner)
            }
            Some(Tok::Name(name)) if self.starts_call() => self.parse_call(&name),
            _ => Err(self.error("expected an expression")),
        }
    }

    fn parse_call(&mut self, name: &str) -> Result<Expr, SelectorSyntaxError> {
        let (function, min, max) =
            Function::lookup(name).ok_or_else(|| self.error(format!("unknown function '{name}'")))?;
        self.pos += 2;

        let mut args = Vec::new();
        if self.peek() != Some(&Tok::RParen) {
            loop {
                args.push(self.parse_or()?);
                if self.peek() == Some(&Tok::Comma) {
                    self.pos += 1;
                    continue;
                }
                break;
            }
        }
        self.expect(Tok::RParen, "')'")?;

        if args.len() < min || args.len() > max {
            return Err(self.error(format!(
                "wrong number of arguments for {name}() ({} given)",
                args.len()
            )));
        }
        Ok(Expr::Call(function, args))
    }
}

// ---------------------------------------------------------------------------
// Evaluation

#[derive(Clone, Copy)]
enum Ctx<'a> {
    Document,
    Element(ElementRef<'a>),
}

/// Position in document order: the node's rank, then the attribute index
/// (`0` for the node itself).
type OrderKey = (usize, usize);

/// A member of a node-set: an element (or the document), or the string of a
/// text node or attribute.
#[derive(Clone)]
enum Item<'a> {
    Node(Ctx<'a>),
    Text(OrderKey, String),
}

struct Env<'a> {
    focus: Item<'a>,
    position: usize,
    size: usize,
}

#[derive(Debug, Clone)]
enum Value {
    Bool(bool),
    Number(f64),
    Str(String),
    /// String values of the selected nodes, in document order.
    NodeSet(Vec<String>),
}

impl Value {
    fn to_bool(&self) -> bool {
        match self {
            Self::Bool(b) => *b,
            Self::Number(n) => *n != 0.0 && !n.is_nan(),
            Self::Str(s) => !s.is_empty(),
            Self::NodeSet(nodes) => !nodes.is_empty(),
        }
    }

    fn to_number(&self) -> f64 {
        match self {
            Self::Bool(b) => f64::from(u8::from(*b)),
            Self::Number(n) => *n,
            Self::Str(s) => parse_number(s),
            Self::NodeSet(nodes) => nodes.first().map_or(f64::NAN, |s| parse_number(s)),
        }
    }

    fn to_text(&self) -> String {
        match self {
            Self::Bool(b) => b.to_string(),
            Self::Number(n) if n.is_finite() && n.fract() == 0.0 => format!("{}", *n as i64),
            Self::Number(n) => n.to_string(),
            Self::Str(s) => s.clone(),
            Self::NodeSet(nodes) => nodes.first().cloned().unwrap_or_default(),
        }
    }
}

fn parse_number(text: &str) -> f64 {
    text.trim().parse().unwrap_or(f64::NAN)
}

fn compare(op: CmpOp, left: Value, right: Value) -> bool {
    match (left, right) {
        (Value::NodeSet(l), Value::NodeSet(r)) => l
            .iter()
            .any(|a| r.iter().any(|b| compare_atoms(op, &Value::Str(a.clone()), &Value::Str(b.clone())))),
        (Value::NodeSet(l), Value::Bool(b)) => compare_atoms(op, &Value::Bool(!l.is_empty()), &Value::Bool(b)),
        (Value::Bool(b), Value::NodeSet(r)) => compare_atoms(op, &Value::Bool(b), &Value::Bool(!r.is_empty())),
        (Value::NodeSet(l), other) => l
            .iter()
            .any(|a| compare_atoms(op, &Value::Str(a.clone()), &other)),
        (other, Value::NodeSet(r)) => r
            .iter()
            .any(|b| compare_atoms(op, &other, &Value::Str(b.clone()))),
        (l, r) => compare_atoms(op, &l, &r),
    }
}

fn compare_atoms(op: CmpOp, left: &Value, right: &Value) -> bool {
    match op {
        CmpOp::Eq | CmpOp::Ne => {
            let equal = if matches!(left, Value::Bool(_)) || matches!(right, Value::Bool(_)) {
                left.to_bool() == right.to_bool()
            } else if matches!(left, Value::Number(_)) || matches!(right, Value::Number(_)) {
                left.to_number() == right.to_number()
            } else {
                left.to_text() == right.to_text()
            };
            (op == CmpOp::Eq) == equal
        }
        CmpOp::Lt => left.to_number() < right.to_number(),
        CmpOp::Le => left.to_number() <= right.to_number(),
        CmpOp::Gt => left.to_number() > right.to_number(),
        CmpOp::Ge => left.to_number() >= right.to_number(),
    }
}

struct Evaluator<'a> {
    document: &'a Html,
    /// Document-order rank of every node in the tree.
    order: HashMap<NodeId, usize>,
}

impl<'a> Evaluator<'a> {
    fn new(document: &'a Html) -> Self {
        let order = document
            .tree
            .root()
            .descendants()
            .enumerate()
            .map(|(rank, node)| (node.id(), rank))
            .collect();
        Self { document, order }
    }

    fn rank(&self, id: NodeId) -> usize {
        self.order.get(&id).copied().unwrap_or(usize::MAX)
    }

    fn ctx_rank(&self, ctx: Ctx<'a>) -> usize {
        match ctx {
            Ctx::Document => 0,
            Ctx::Element(element) => self.rank(element.id()),
        }
    }

    fn item_key(&self, item: &Item<'a>) -> OrderKey {
        match item {
            Item::Node(ctx) => (self.ctx_rank(*ctx), 0),
            Item::Text(key, _) => *key,
        }
    }

    /// Sorts into document order and drops repeats of the same node.
    fn in_document_order<T>(&self, mut items: Vec<T>, key: impl Fn(&T) -> OrderKey) -> Vec<T> {
        items.sort_by_key(|item| key(item));
        items.dedup_by_key(|item| key(&*item));
        items
    }

    /// The members of a node-set expression. Other expressions select nothing;
    /// the parser only puts node-set expressions where nodes are needed.
    fn items(&self, expr: &Expr, env: &Env<'a>) -> Vec<Item<'a>> {
        match expr {
            Expr::Path(path) => self.select(path, &env.focus),
            Expr::Union(left, right) => {
                let mut items = self.items(left, env);
                items.extend(self.items(right, env));
                self.in_document_order(items, |item| self.item_key(item))
            }
            Expr::Filter {
                base,
                predicates,
                steps,
            } => {
                let items = self.filter_predicates(self.items(base, env), predicates, Item::clone);
                if steps.is_empty() {
                    return items;
                }
                let contexts = items
                    .into_iter()
                    .filter_map(|item| match item {
                        Item::Node(ctx) => Some(ctx),
                        Item::Text(..) => None,
                    })
                    .collect();
                self.walk(contexts, steps)
            }
            _ => Vec::new(),
        }
    }

    fn select(&self, path: &PathExpr, focus: &Item<'a>) -> Vec<Item<'a>> {
        let start = if path.absolute {
            vec![Ctx::Document]
        } else {
            match focus {
                Item::Node(ctx) => vec![*ctx],
                Item::Text(..) => {
                    // Only "." means anything relative to a text node.
                    let is_self = path.steps.iter().all(|s| s.axis == Axis::SelfAxis);
                    return if is_self {
                        vec![focus.clone()]
                    } else {
                        Vec::new()
                    };
                }
            }
        };
        self.walk(start, &path.steps)
    }

    fn walk(&self, mut current: Vec<Ctx<'a>>, steps: &[Step]) -> Vec<Item<'a>> {
        for step in steps {
            if step.is_terminal() {
                return self.terminal_items(&current, step);
            }
            current = self.apply_step(&current, step);
            if current.is_empty() {
                break;
            }
        }
        current.into_iter().map(Item::Node).collect()
    }

    fn apply_step(&self, contexts: &[Ctx<'a>], step: &Step) -> Vec<Ctx<'a>> {
        let mut selected = Vec::new();
        for &ctx in contexts {
            let candidates: Vec<Ctx<'a>> = self
                .axis(ctx, step.axis)
                .into_iter()
                .filter(|node| matches_test(*node, &step.test))
                .collect();
            selected.extend(self.filter_predicates(candidates, &step.predicates, |node| {
                Item::Node(*node)
            }));
        }
        self.in_document_order(selected, |node| (self.ctx_rank(*node), 0))
    }

    fn axis(&self, ctx: Ctx<'a>, axis: Axis) -> Vec<Ctx<'a>> {
        match (axis, ctx) {
            (Axis::Child, Ctx::Document) => self
                .document
                .tree
                .root()
                .children()
                .filter_map(ElementRef::wrap)
                .map(Ctx::Element)
                .collect(),
            (Axis::Child, Ctx::Element(element)) => element
                .children()
                .filter_map(ElementRef::wrap)
                .map(Ctx::Element)
                .collect(),
            (Axis::Descendant, Ctx::Document) => self
                .document
                .tree
                .root()
                .descendants()
                .filter_map(ElementRef::wrap)
                .map(Ctx::Element)
                .collect(),
            (Axis::Descendant, Ctx::Element(element)) => element
                .descendants()
                .skip(1)
                .filter_map(ElementRef::wrap)
                .map(Ctx::Element)
                .collect(),
            (Axis::DescendantOrSelf, _) => {
                let mut nodes = vec![ctx];
                nodes.extend(self.axis(ctx, Axis::Descendant));
                nodes
            }
            (Axis::SelfAxis, _) => vec![ctx],
            (Axis::Parent, Ctx::Element(element)) => self.parent_of(element).into_iter().collect(),
            (Axis::Ancestor, Ctx::Element(element)) => {
                let mut nodes = Vec::new();
                let mut current = self.parent_of(element);
                while let Some(parent) = current {
                    nodes.push(parent);
                    current = match parent {
                        Ctx::Element(parent) => self.parent_of(parent),
                        Ctx::Document => None,
                    };
                }
                nodes
            }
            (Axis::FollowingSibling, Ctx::Element(element)) => element
                .next_siblings()
                .filter_map(ElementRef::wrap)
                .map(Ctx::Element)
                .collect(),
            (Axis::PrecedingSibling, Ctx::Element(element)) => element
                .prev_siblings()
                .filter_map(ElementRef::wrap)
                .map(Ctx::Element)
                .collect(),
            (
                Axis::Parent | Axis::Ancestor | Axis::FollowingSibling | Axis::PrecedingSibling,
                Ctx::Document,
            ) => Vec::new(),
            (Axis::Attribute, _) => Vec::new(),
        }
    }

    fn parent_of(&self, element: ElementRef<'a>) -> Option<Ctx<'a>> {
        let parent = element.parent()?;
        match ElementRef::wrap(parent) {
            Some(parent) => Some(Ctx::Element(parent)),
            None if parent.value().is_document() => Some(Ctx::Document),
            None => None,
        }
    }

    fn filter_predicates<T>(
        &self,
        mut items: Vec<T>,
        predicates: &[Expr],
        focus: impl Fn(&T) -> Item<'a>,
    ) -> Vec<T> {
        for predicate in predicates {
            let size = items.len();
            items = items
                .into_iter()
                .enumerate()
                .filter(|(index, item)| {
                    let env = Env {
                        focus: focus(item),
                        position: index + 1,
                        size,
                    };
                    match self.eval(predicate, &env) {
                        Value::Number(n) => n == (index + 1) as f64,
                        other => other.to_bool(),
                    }
                })
                .map(|(_, item)| item)
                .collect();
        }
        items
    }

    fn terminal_items(&self, contexts: &[Ctx<'a>], step: &Step) -> Vec<Item<'a>> {
        let mut found: Vec<Item<'a>> = Vec::new();

        for &ctx in contexts {
            let candidates = match (step.axis, ctx) {
                (Axis::Attribute, Ctx::Element(element)) => element
                    .value()
                    .attrs()
                    .enumerate()
                    .filter(|(_, (name, _))| match &step.test {
                        NodeTest::Named(wanted) => name.eq_ignore_ascii_case(wanted),
                        _ => true,
                    })
                    .map(|(index, (_, value))| {
                        Item::Text((self.ctx_rank(ctx), index + 1), value.to_string())
                    })
                    .collect(),
                (Axis::Attribute, Ctx::Document) => Vec::new(),
                (axis, ctx) => self.text_nodes(ctx, axis),
            };

            found.extend(self.filter_predicates(candidates, &step.predicates, Item::clone));
        }

        self.in_document_order(found, |item| self.item_key(item))
    }

    fn text_nodes(&self, ctx: Ctx<'a>, axis: Axis) -> Vec<Item<'a>> {
        let nodes: Vec<_> = match (axis, ctx) {
            (Axis::Child, Ctx::Element(element)) => element.children().collect(),
            (Axis::Child, Ctx::Document) => self.document.tree.root().children().collect(),
            (Axis::Descendant | Axis::DescendantOrSelf, Ctx::Element(element)) => {
                element.descendants().collect()
            }
            (Axis::Descendant | Axis::DescendantOrSelf, Ctx::Document) => {
                self.document.tree.root().descendants().collect()
            }
            _ => Vec::new(),
        };

        nodes
            .into_iter()
            .filter_map(|node| {
                let text = node.value().as_text()?;
                Some(Item::Text((self.rank(node.id()), 0), text.to_string()))
            })
            .collect()
    }

    fn string_value(&self, ctx: Ctx<'a>) -> String {
        match ctx {
            Ctx::Document => self.document.root_element().text().collect(),
            Ctx::Element(element) => element.text().collect(),
        }
    }

    fn item_string(&self, item: Item<'a>) -> String {
        match item {
            Item::Node(ctx) => self.string_value(ctx),
            Item::Text(_, text) => text,
        }
    }

    fn node_fragment(&self, ctx: Ctx<'a>) -> String {
        match ctx {
            Ctx::Document => element_text(&self.document.root_element()),
            Ctx::Element(element) => {
                let text = element_text(&element);
                if text.is_empty() {
                    element
                        .value()
                        .attr("content")
                        .map(collapse_whitespace)
                        .unwrap_or_default()
                } else {
                    text
                }
            }
        }
    }

    fn eval(&self, expr: &Expr, env: &Env<'a>) -> Value {
        match expr {
            Expr::Or(left, right) => {
                Value::Bool(self.eval(left, env).to_bool() || self.eval(right, env).to_bool())
            }
            Expr::And(left, right) => {
                Value::Bool(self.eval(left, env).to_bool() && self.eval(right, env).to_bool())
            }
            Expr::Compare(op, left, right) => {
                Value::Bool(compare(*op, self.eval(left, env), self.eval(right, env)))
            }
            Expr::Arith(op, left, right) => Value::Number(
                op.apply(self.eval(left, env).to_number(), self.eval(right, env).to_number()),
            ),
            Expr::Negate(inner) => Value::Number(-self.eval(inner, env).to_number()),
            Expr::Literal(text) => Value::Str(text.clone()),
            Expr::Number(n) => Value::Number(*n),
            Expr::Path(_) | Expr::Union(..) | Expr::Filter { .. } => Value::NodeSet(
                self.items(expr, env)
                    .into_iter()
                    .map(|item| self.item_string(item))
                    .collect(),
            ),
            Expr::Call(function, args) => self.call(*function, args, env),
        }
    }

    fn call(&self, function: Function, args: &[Expr], env: &Env<'a>) -> Value {
        let arg = |index: usize| self.eval(&args[index], env).to_text();
        let arg_or_focus = || {
            if args.is_empty() {
                self.item_string(env.focus.clone())
            } else {
                arg(0)
            }
        };

        match function {
            Function::Contains => Value::Bool(arg(0).contains(&arg(1))),
            Function::StartsWith => Value::Bool(arg(0).starts_with(&arg(1))),
            Function::NormalizeSpace => Value::Str(collapse_whitespace(&arg_or_focus())),
            Function::Translate => {
                let from: Vec<char> = arg(1).chars().collect();
                let to: Vec<char> = arg(2).chars().collect();
                let translated = arg(0)
                    .chars()
                    .filter_map(|c| match from.iter().position(|f| *f == c) {
                        Some(index) => to.get(index).copied(),
                        None => Some(c),
                    })
                    .collect();
                Value::Str(translated)
            }
            Function::Not => Value::Bool(!self.eval(&args[0], env).to_bool()),
            Function::String => Value::Str(arg_or_focus()),
            Function::Concat => Value::Str(
                args.iter()
                    .map(|expr| self.eval(expr, env).to_text())
                    .collect(),
            ),
            Function::Count => match self.eval(&args[0], env) {
                Value::NodeSet(nodes) => Value::Number(nodes.len() as f64),
                _ => Value::Number(0.0),
            },
            Function::Position => Value::Number(env.position as f64),
            Function::Last => Value::Number(env.size as f64),
            Function::StringLength => Value::Number(arg_or_focus().chars().count() as f64),
            Function::True => Value::Bool(true),
            Function::False => Value::Bool(false),
        }
    }
}

fn matches_test(ctx: Ctx<'_>, test: &NodeTest) -> bool {
    match (test, ctx) {
        (NodeTest::Node, _) => true,
        (NodeTest::Any, Ctx::Element(_)) => true,
        (NodeTest::Named(name), Ctx::Element(element)) => {
            element.value().name().eq_ignore_ascii_case(name)
        }
        _ => false,
    }
}
