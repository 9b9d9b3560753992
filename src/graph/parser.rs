//! Parser for the single-pattern MATCH subset
//!
//! Keywords are case-insensitive. Literals: integers, floats, single- or
//! double-quoted strings, `true`, `false`, `null`. A trailing `;` is allowed.

use serde_json::{Number, Value};

use super::ast::MatchQuery;
use crate::pipeline::{ExecutorError, ExecutorResult, FilterOp, Predicate, ProjectionItem};

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Literal(Value),
    Symbol(&'static str),
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Token::Ident(s) => format!("'{}'", s),
            Token::Literal(v) => v.to_string(),
            Token::Symbol(s) => format!("'{}'", s),
        }
    }
}

/// Parse query text into a [`MatchQuery`]
pub fn parse_query(text: &str) -> ExecutorResult<MatchQuery> {
    let tokens = tokenize(text)?;
    Parser { tokens, pos: 0 }.parse()
}

fn tokenize(text: &str) -> ExecutorResult<Vec<Token>> {
    let chars: Vec<char> = text.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();
        match c {
            c if c.is_whitespace() => i += 1,
            '(' | ')' | ':' | '.' | ',' | '=' | ';' => {
                tokens.push(Token::Symbol(match c {
                    '(' => "(",
                    ')' => ")",
                    ':' => ":",
                    '.' => ".",
                    ',' => ",",
                    '=' => "=",
                    _ => ";",
                }));
                i += 1;
            }
            '<' => match next {
                Some('=') => {
                    tokens.push(Token::Symbol("<="));
                    i += 2;
                }
                Some('>') => {
                    tokens.push(Token::Symbol("<>"));
                    i += 2;
                }
                _ => {
                    tokens.push(Token::Symbol("<"));
                    i += 1;
                }
            },
            '>' => {
                if next == Some('=') {
                    tokens.push(Token::Symbol(">="));
                    i += 2;
                } else {
                    tokens.push(Token::Symbol(">"));
                    i += 1;
                }
            }
            '!' if next == Some('=') => {
                tokens.push(Token::Symbol("<>"));
                i += 2;
            }
            '\'' | '"' => {
                let (s, end) = lex_string(&chars, i)?;
                tokens.push(Token::Literal(Value::String(s)));
                i = end;
            }
            c if c.is_ascii_digit() || (c == '-' && next.map_or(false, |n| n.is_ascii_digit())) => {
                let (v, end) = lex_number(&chars, i)?;
                tokens.push(Token::Literal(v));
                i = end;
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            other => {
                return Err(ExecutorError::query_parse(format!(
                    "unexpected character '{}' at position {}",
                    other, i
                )))
            }
        }
    }

    Ok(tokens)
}

fn lex_string(chars: &[char], start: usize) -> ExecutorResult<(String, usize)> {
    let quote = chars[start];
    let mut out = String::new();
    let mut i = start + 1;
    while i < chars.len() {
        match chars[i] {
            '\\' if i + 1 < chars.len() => {
                out.push(chars[i + 1]);
                i += 2;
            }
            c if c == quote => return Ok((out, i + 1)),
            c => {
                out.push(c);
                i += 1;
            }
        }
    }
    Err(ExecutorError::query_parse("unterminated string literal"))
}

fn lex_number(chars: &[char], start: usize) -> ExecutorResult<(Value, usize)> {
    let mut i = start + 1;
    while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
        // `1.` followed by an identifier is not a float
        if chars[i] == '.' && !chars.get(i + 1).map_or(false, |c| c.is_ascii_digit()) {
            break;
        }
        i += 1;
    }
    let raw: String = chars[start..i].iter().collect();
    let value = if raw.contains('.') {
        raw.parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number)
    } else {
        raw.parse::<i64>().ok().map(Value::from)
    };
    value
        .map(|v| (v, i))
        .ok_or_else(|| ExecutorError::query_parse(format!("invalid number '{}'", raw)))
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn parse(mut self) -> ExecutorResult<MatchQuery> {
        self.expect_keyword("MATCH")?;
        self.expect_symbol("(")?;
        let variable = self.ident()?;
        let mut query = MatchQuery::new(variable.clone());
        if self.eat_symbol(":") {
            query.label = Some(self.ident()?);
        }
        self.expect_symbol(")")?;

        if self.eat_keyword("WHERE") {
            loop {
                query.predicates.push(self.predicate(&variable)?);
                if !self.eat_keyword("AND") {
                    break;
                }
            }
        }

        self.expect_keyword("RETURN")?;
        query.returns.clear();
        loop {
            query.returns.push(self.return_item(&variable)?);
            if !self.eat_symbol(",") {
                break;
            }
        }

        if self.eat_keyword("LIMIT") {
            query.limit = Some(self.literal()?);
        }

        self.eat_symbol(";");
        if let Some(token) = self.peek() {
            return Err(ExecutorError::query_parse(format!(
                "unexpected {} after end of query",
                token.describe()
            )));
        }
        Ok(query)
    }

    fn predicate(&mut self, variable: &str) -> ExecutorResult<Predicate> {
        let property = self.property_of(variable)?;
        let op = match self.next() {
            Some(Token::Symbol(sym)) => sym,
            other => return Err(self.unexpected(other, "comparison operator")),
        };
        let value = self.literal()?;
        let op = match op {
            "=" => FilterOp::Eq(value),
            "<>" => FilterOp::Ne(value),
            "<" => FilterOp::Lt(value),
            "<=" => FilterOp::Lte(value),
            ">" => FilterOp::Gt(value),
            ">=" => FilterOp::Gte(value),
            other => {
                return Err(ExecutorError::query_parse(format!(
                    "unsupported operator '{}'",
                    other
                )))
            }
        };
        Ok(Predicate::new(property, op))
    }

    fn return_item(&mut self, variable: &str) -> ExecutorResult<ProjectionItem> {
        let name = self.ident()?;
        if name != variable {
            return Err(ExecutorError::query_parse(format!(
                "unknown variable '{}'",
                name
            )));
        }
        if self.eat_symbol(".") {
            let property = self.ident()?;
            return Ok(ProjectionItem::Property {
                variable: name,
                property,
            });
        }
        Ok(ProjectionItem::Variable(name))
    }

    /// `variable.property`, returning the property
    fn property_of(&mut self, variable: &str) -> ExecutorResult<String> {
        let name = self.ident()?;
        if name != variable {
            return Err(ExecutorError::query_parse(format!(
                "unknown variable '{}'",
                name
            )));
        }
        self.expect_symbol(".")?;
        self.ident()
    }

    fn literal(&mut self) -> ExecutorResult<Value> {
        match self.next() {
            Some(Token::Literal(v)) => Ok(v),
            Some(Token::Ident(word)) => match word.to_ascii_lowercase().as_str() {
                "true" => Ok(Value::Bool(true)),
                "false" => Ok(Value::Bool(false)),
                "null" => Ok(Value::Null),
                _ => Err(self.unexpected(Some(Token::Ident(word)), "literal")),
            },
            other => Err(self.unexpected(other, "literal")),
        }
    }

    fn ident(&mut self) -> ExecutorResult<String> {
        match self.next() {
            Some(Token::Ident(name)) => Ok(name),
            other => Err(self.unexpected(other, "identifier")),
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat_symbol(&mut self, symbol: &str) -> bool {
        if matches!(self.peek(), Some(Token::Symbol(s)) if *s == symbol) {
            self.pos += 1;
            return true;
        }
        false
    }

    fn expect_symbol(&mut self, symbol: &str) -> ExecutorResult<()> {
        if self.eat_symbol(symbol) {
            return Ok(());
        }
        let found = self.peek().cloned();
        Err(self.unexpected(found, &format!("'{}'", symbol)))
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if matches!(self.peek(), Some(Token::Ident(s)) if s.eq_ignore_ascii_case(keyword)) {
            self.pos += 1;
            return true;
        }
        false
    }

    fn expect_keyword(&mut self, keyword: &str) -> ExecutorResult<()> {
        if self.eat_keyword(keyword) {
            return Ok(());
        }
        let found = self.peek().cloned();
        Err(self.unexpected(found, keyword))
    }

    fn unexpected(&self, found: Option<Token>, expected: &str) -> ExecutorError {
        match found {
            Some(token) => ExecutorError::query_parse(format!(
                "expected {}, found {}",
                expected,
                token.describe()
            )),
            None => ExecutorError::query_parse(format!(
                "expected {}, found end of query",
                expected
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::ScanKind;
    use serde_json::json;

    #[test]
    fn test_parse_basic_match() {
        let q = parse_query("MATCH (n:Person) WHERE n.id < 2 RETURN n;").unwrap();
        assert_eq!(q.variable, "n");
        assert_eq!(q.scan_kind(), ScanKind::Label("Person".into()));
        assert_eq!(q.predicates, vec![Predicate::lt("id", json!(2))]);
        assert_eq!(q.returns, vec![ProjectionItem::Variable("n".into())]);
        assert_eq!(q.limit, None);
    }

    #[test]
    fn test_parse_all_operators() {
        let cases = [
            ("=", Predicate::eq("id", json!(3))),
            ("<>", Predicate::ne("id", json!(3))),
            ("!=", Predicate::ne("id", json!(3))),
            (">=", Predicate::gte("id", json!(3))),
            (">", Predicate::gt("id", json!(3))),
            ("<=", Predicate::lte("id", json!(3))),
        ];
        for (op, expected) in cases {
            let q = parse_query(&format!("MATCH (n) WHERE n.id {} 3 RETURN n", op)).unwrap();
            assert_eq!(q.predicates, vec![expected], "operator {}", op);
        }
    }

    #[test]
    fn test_parse_conjunction_projection_and_limit() {
        let q = parse_query(
            "match (p:User) where p.age >= 18 and p.name = 'Ann' return p.name, p limit 5",
        )
        .unwrap();
        assert_eq!(q.predicates.len(), 2);
        assert_eq!(q.predicates[1], Predicate::eq("name", json!("Ann")));
        assert_eq!(
            q.returns,
            vec![
                ProjectionItem::Property {
                    variable: "p".into(),
                    property: "name".into()
                },
                ProjectionItem::Variable("p".into()),
            ]
        );
        assert_eq!(q.limit, Some(json!(5)));
    }

    #[test]
    fn test_parse_literals() {
        let q = parse_query("MATCH (n) WHERE n.score > -1.5 AND n.ok = true RETURN n LIMIT 2.5")
            .unwrap();
        assert_eq!(q.predicates[0], Predicate::gt("score", json!(-1.5)));
        assert_eq!(q.predicates[1], Predicate::eq("ok", json!(true)));
        // Non-integral limits are rejected when the pipeline is built
        assert_eq!(q.limit, Some(json!(2.5)));
    }

    #[test]
    fn test_parse_errors() {
        for bad in [
            "",
            "MATCH n RETURN n",
            "MATCH (n) WHERE m.id = 1 RETURN n",
            "MATCH (n) RETURN m",
            "MATCH (n) WHERE n.id ~ 1 RETURN n",
            "MATCH (n) RETURN n LIMIT",
            "MATCH (n) RETURN n extra",
            "MATCH (n) WHERE n.name = 'open RETURN n",
        ] {
            let err = parse_query(bad).unwrap_err();
            assert!(err.is_configuration(), "{}", bad);
        }
    }
}
