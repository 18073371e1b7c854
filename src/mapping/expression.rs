//! Condition expressions evaluated against an external user profile.
//!
//! ```text
//! expr     := and ( ("||" | "or") and )*
//! and      := unary ( ("&&" | "and") unary )*
//! unary    := ("!" | "not") unary | "(" expr ")" | operand ( ("==" | "!=") operand )?
//! operand  := 'text' | "text" | number | true | false | null
//!           | #jsonPath(#profile, '$.a.b') | #profile['a'] | profile.a.b
//! ```
//!
//! A condition may be wrapped in `{ ... }`. Missing profile keys resolve to `null`, and a
//! bare operand holds only when it resolves to JSON `true`.

use nom::{
    branch::alt,
    bytes::complete::{tag, tag_no_case, take_while, take_while1},
    character::complete::{char, multispace0, satisfy},
    combinator::{all_consuming, map, map_opt, not, opt, value},
    multi::{fold_many0, many0},
    number::complete::double,
    sequence::{delimited, pair, preceded, terminated},
    IResult,
};
use serde_json::Value;
use std::fmt;

use crate::core::error::{ManagementError, ManagementResult};

/// A compiled condition
#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    source: String,
    root: Node,
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Or(Box<Node>, Box<Node>),
    And(Box<Node>, Box<Node>),
    Not(Box<Node>),
    Compare {
        left: Operand,
        op: CompareOp,
        right: Operand,
    },
    Operand(Operand),
}

#[derive(Debug, Clone, PartialEq)]
enum Operand {
    Literal(Value),
    /// Path into the profile; empty means the whole profile
    Profile(Vec<String>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CompareOp {
    Eq,
    Ne,
}

impl Expression {
    /// Compile a condition
    pub fn parse(source: &str) -> ManagementResult<Self> {
        let trimmed = source.trim();
        let body = trimmed
            .strip_prefix('{')
            .and_then(|inner| inner.strip_suffix('}'))
            .unwrap_or(trimmed);

        match all_consuming(ws(or_expr))(body) {
            Ok((_, root)) => Ok(Self {
                source: source.to_string(),
                root,
            }),
            Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => Err(ManagementError::invalid_expression(
                source,
                if e.input.is_empty() {
                    "unexpected end of expression".to_string()
                } else {
                    format!("unexpected input at '{}'", e.input)
                },
            )),
            Err(nom::Err::Incomplete(_)) => Err(ManagementError::invalid_expression(
                source,
                "incomplete expression",
            )),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluate against a profile document
    pub fn evaluate(&self, profile: &Value) -> bool {
        eval(&self.root, profile)
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

fn eval(node: &Node, profile: &Value) -> bool {
    match node {
        Node::Or(left, right) => eval(left, profile) || eval(right, profile),
        Node::And(left, right) => eval(left, profile) && eval(right, profile),
        Node::Not(inner) => !eval(inner, profile),
        Node::Compare { left, op, right } => {
            let equal = loosely_equal(&resolve(left, profile), &resolve(right, profile));
            match op {
                CompareOp::Eq => equal,
                CompareOp::Ne => !equal,
            }
        }
        Node::Operand(operand) => resolve(operand, profile) == Value::Bool(true),
    }
}

fn resolve(operand: &Operand, profile: &Value) -> Value {
    match operand {
        Operand::Literal(literal) => literal.clone(),
        Operand::Profile(path) => {
            let mut current = profile;
            for segment in path {
                let next = match current {
                    Value::Object(map) => map.get(segment),
                    Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
                    _ => None,
                };
                match next {
                    Some(value) => current = value,
                    None => return Value::Null,
                }
            }
            current.clone()
        }
    }
}

/// JSON equality, with numbers compared by value
fn loosely_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => match (a.as_f64(), b.as_f64()) {
            (Some(a), Some(b)) => a == b,
            _ => a == b,
        },
        _ => left == right,
    }
}

fn ws<'a, O, F>(inner: F) -> impl FnMut(&'a str) -> IResult<&'a str, O>
where
    F: FnMut(&'a str) -> IResult<&'a str, O>,
{
    delimited(multispace0, inner, multispace0)
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '-'
}

fn keyword<'a>(kw: &'static str) -> impl FnMut(&'a str) -> IResult<&'a str, &'a str> {
    terminated(tag_no_case(kw), not(satisfy(is_ident_char)))
}

fn identifier(input: &str) -> IResult<&str, &str> {
    take_while1(is_ident_char)(input)
}

fn string_literal(input: &str) -> IResult<&str, &str> {
    alt((
        delimited(char('\''), take_while(|c: char| c != '\''), char('\'')),
        delimited(char('"'), take_while(|c: char| c != '"'), char('"')),
    ))(input)
}

fn or_expr(input: &str) -> IResult<&str, Node> {
    let (input, first) = and_expr(input)?;
    fold_many0(
        preceded(ws(alt((tag("||"), keyword("or")))), and_expr),
        move || first.clone(),
        |acc, next| Node::Or(Box::new(acc), Box::new(next)),
    )(input)
}

fn and_expr(input: &str) -> IResult<&str, Node> {
    let (input, first) = unary(input)?;
    fold_many0(
        preceded(ws(alt((tag("&&"), keyword("and")))), unary),
        move || first.clone(),
        |acc, next| Node::And(Box::new(acc), Box::new(next)),
    )(input)
}

fn unary(input: &str) -> IResult<&str, Node> {
    alt((
        map(preceded(ws(terminated(char('!'), not(char('=')))), unary), |inner| {
            Node::Not(Box::new(inner))
        }),
        map(preceded(ws(keyword("not")), unary), |inner| Node::Not(Box::new(inner))),
        delimited(ws(char('(')), or_expr, ws(char(')'))),
        comparison,
    ))(input)
}

fn comparison(input: &str) -> IResult<&str, Node> {
    let (input, left) = ws(operand)(input)?;
    let (input, rest) = opt(pair(ws(compare_op), ws(operand)))(input)?;

    let node = match rest {
        Some((op, right)) => Node::Compare { left, op, right },
        None => Node::Operand(left),
    };
    Ok((input, node))
}

fn compare_op(input: &str) -> IResult<&str, CompareOp> {
    alt((value(CompareOp::Eq, tag("==")), value(CompareOp::Ne, tag("!="))))(input)
}

fn operand(input: &str) -> IResult<&str, Operand> {
    alt((
        map(json_path_ref, Operand::Profile),
        map(profile_ref, Operand::Profile),
        map(string_literal, |s| Operand::Literal(Value::String(s.to_string()))),
        value(Operand::Literal(Value::Bool(true)), keyword("true")),
        value(Operand::Literal(Value::Bool(false)), keyword("false")),
        value(Operand::Literal(Value::Null), keyword("null")),
        map(double, |n| Operand::Literal(Value::from(n))),
    ))(input)
}

/// `#jsonPath(#profile, '$.a.b')`
fn json_path_ref(input: &str) -> IResult<&str, Vec<String>> {
    map_opt(
        delimited(
            pair(tag("#jsonPath"), ws(char('('))),
            preceded(pair(ws(tag("#profile")), ws(char(','))), ws(string_literal)),
            char(')'),
        ),
        parse_json_path,
    )(input)
}

/// `$.a.b` or `$['a']['b']`
fn parse_json_path(path: &str) -> Option<Vec<String>> {
    let segments: IResult<&str, Vec<String>> = all_consuming(preceded(
        char('$'),
        many0(alt((
            map(preceded(char('.'), identifier), str::to_string),
            map(
                delimited(tag("['"), take_while(|c: char| c != '\''), tag("']")),
                str::to_string,
            ),
        ))),
    ))(path.trim());

    segments.ok().map(|(_, segments)| segments)
}

/// `profile.a.b`, `#profile['a']`
fn profile_ref(input: &str) -> IResult<&str, Vec<String>> {
    preceded(
        pair(opt(char('#')), keyword("profile")),
        many0(alt((
            map(preceded(char('.'), identifier), str::to_string),
            map(
                delimited(
                    pair(char('['), multispace0),
                    string_literal,
                    pair(multispace0, char(']')),
                ),
                str::to_string,
            ),
        ))),
    )(input)
}
