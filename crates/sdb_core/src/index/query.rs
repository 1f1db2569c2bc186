//! Query strings.
//!
//! A query is a whitespace-separated list of clauses:
//!
//! | Clause            | Matches                                        |
//! |-------------------|------------------------------------------------|
//! | `word`            | documents with the term in any field           |
//! | `field:word`      | documents with the term in `field`             |
//! | `"two words"`     | the terms adjacent and in order                |
//! | `pre*`            | any term starting with `pre`                   |
//! | `age:>=18`        | numeric comparison (`>`, `>=`, `<`, `<=`)      |
//! | `*`               | every document                                 |
//!
//! A leading `+` makes a clause required and `-` makes it excluded; other
//! clauses are optional, but at least one of them has to match when any are
//! present. `\` escapes the next character.

use crate::error::{IndexError, IndexResult};

/// How a clause combines with the others.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Occur {
    /// `+clause`
    Must,
    /// `clause`
    Should,
    /// `-clause`
    MustNot,
}

/// Numeric comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// `<`
    Lt,
    /// `<=`
    Le,
}

impl Comparison {
    /// Whether `value <op> bound` holds.
    #[must_use]
    pub fn holds(self, value: f64, bound: f64) -> bool {
        match self {
            Self::Gt => value > bound,
            Self::Ge => value >= bound,
            Self::Lt => value < bound,
            Self::Le => value <= bound,
        }
    }
}

/// What a clause looks for.
#[derive(Debug, Clone, PartialEq)]
pub enum Matcher {
    /// Every document.
    All,
    /// Text analyzed with the field's analyzer; any resulting term matches.
    Term(String),
    /// Text analyzed with the field's analyzer; all terms, adjacent, in order.
    Phrase(String),
    /// Any term starting with the text.
    Prefix(String),
    /// A numeric value satisfying the comparison.
    Range(Comparison, f64),
}

/// One parsed clause.
#[derive(Debug, Clone, PartialEq)]
pub struct Clause {
    /// Required, optional or excluded.
    pub occur: Occur,
    /// Field the clause is scoped to; `None` searches every field.
    pub field: Option<String>,
    /// What to look for.
    pub matcher: Matcher,
}

/// A parsed query string.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Query {
    /// Clauses in the order written.
    pub clauses: Vec<Clause>,
}

impl Query {
    /// A query matching every document.
    #[must_use]
    pub fn match_all() -> Self {
        Self {
            clauses: vec![Clause {
                occur: Occur::Should,
                field: None,
                matcher: Matcher::All,
            }],
        }
    }

    /// Parses a query string. Blank input yields a query with no clauses.
    ///
    /// # Errors
    ///
    /// [`IndexError::QuerySyntax`] on an empty field name, a dangling
    /// operator, an unterminated phrase or a malformed number.
    pub fn parse(input: &str) -> IndexResult<Self> {
        let mut parser = Parser { src: input, pos: 0 };
        let mut clauses = Vec::new();
        loop {
            parser.skip_whitespace();
            if parser.peek().is_none() {
                break;
            }
            clauses.push(parser.clause()?);
        }
        Ok(Self { clauses })
    }
}

struct Parser<'a> {
    src: &'a str,
    pos: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.bump();
        }
    }

    fn error(&self, message: &str) -> IndexError {
        IndexError::query_syntax(self.pos, message)
    }

    fn clause(&mut self) -> IndexResult<Clause> {
        let occur = match self.peek() {
            Some('+') => {
                self.bump();
                Occur::Must
            }
            Some('-') => {
                self.bump();
                Occur::MustNot
            }
            _ => Occur::Should,
        };
        let field = self.field()?;
        let matcher = self.matcher(field.is_some())?;
        Ok(Clause {
            occur,
            field,
            matcher,
        })
    }

    fn field(&mut self) -> IndexResult<Option<String>> {
        let rest = &self.src[self.pos..];
        let end = rest
            .find(|c: char| c.is_whitespace() || matches!(c, ':' | '"' | '\\'))
            .unwrap_or(rest.len());
        if !rest[end..].starts_with(':') {
            return Ok(None);
        }
        if end == 0 {
            return Err(self.error("empty field name"));
        }
        let name = rest[..end].to_string();
        self.pos += end + 1;
        Ok(Some(name))
    }

    fn matcher(&mut self, scoped: bool) -> IndexResult<Matcher> {
        match self.peek() {
            None => Err(self.error("expected a term")),
            Some(c) if c.is_whitespace() => Err(self.error("expected a term")),
            Some('"') => {
                self.bump();
                self.phrase().map(Matcher::Phrase)
            }
            Some(_) => self.word(scoped),
        }
    }

    fn phrase(&mut self) -> IndexResult<String> {
        let start = self.pos;
        let mut text = String::new();
        loop {
            match self.bump() {
                None => {
                    return Err(IndexError::query_syntax(start, "unterminated phrase"));
                }
                Some('"') => return Ok(text),
                Some('\\') => {
                    if let Some(c) = self.bump() {
                        text.push(c);
                    }
                }
                Some(c) => text.push(c),
            }
        }
    }

    fn word(&mut self, scoped: bool) -> IndexResult<Matcher> {
        let start = self.pos;
        let mut text = String::new();
        let mut first_escaped = false;
        let mut last_escaped = false;
        while let Some(c) = self.peek() {
            if c.is_whitespace() {
                break;
            }
            self.bump();
            if c == '\\' {
                let Some(next) = self.bump() else { break };
                first_escaped |= text.is_empty();
                text.push(next);
                last_escaped = true;
            } else {
                text.push(c);
                last_escaped = false;
            }
        }

        if !first_escaped {
            for (op, cmp) in [
                (">=", Comparison::Ge),
                ("<=", Comparison::Le),
                (">", Comparison::Gt),
                ("<", Comparison::Lt),
            ] {
                if let Some(num) = text.strip_prefix(op) {
                    return match num.parse::<f64>() {
                        Ok(n) if n.is_finite() => Ok(Matcher::Range(cmp, n)),
                        _ => Err(IndexError::query_syntax(start, "invalid number")),
                    };
                }
            }
        }

        if text == "*" && !last_escaped {
            return Ok(if scoped {
                Matcher::Prefix(String::new())
            } else {
                Matcher::All
            });
        }
        if !last_escaped {
            if let Some(prefix) = text.strip_suffix('*') {
                return Ok(Matcher::Prefix(prefix.to_string()));
            }
        }
        if text.is_empty() {
            return Err(IndexError::query_syntax(start, "expected a term"));
        }
        Ok(Matcher::Term(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn one(input: &str) -> Clause {
        let q = Query::parse(input).unwrap();
        assert_eq!(q.clauses.len(), 1, "{input}");
        q.clauses.into_iter().next().unwrap()
    }

    #[test]
    fn bare_and_scoped_terms() {
        assert_eq!(
            one("lorem"),
            Clause {
                occur: Occur::Should,
                field: None,
                matcher: Matcher::Term("lorem".into())
            }
        );
        let c = one("Data:lorem");
        assert_eq!(c.field.as_deref(), Some("Data"));
        assert_eq!(c.matcher, Matcher::Term("lorem".into()));
    }

    #[test]
    fn occur_prefixes() {
        let q = Query::parse("+a -b c").unwrap();
        let occurs: Vec<_> = q.clauses.iter().map(|c| c.occur).collect();
        assert_eq!(occurs, vec![Occur::Must, Occur::MustNot, Occur::Should]);
    }

    #[test]
    fn scoped_phrase_keeps_inner_text() {
        let c = one(r#"email:"b@x""#);
        assert_eq!(c.field.as_deref(), Some("email"));
        assert_eq!(c.matcher, Matcher::Phrase("b@x".into()));

        let c = one(r#""say \"hi\" now""#);
        assert_eq!(c.matcher, Matcher::Phrase(r#"say "hi" now"#.into()));
    }

    #[test]
    fn wildcards() {
        assert_eq!(one("*").matcher, Matcher::All);
        assert_eq!(one("Name:*").matcher, Matcher::Prefix(String::new()));
        assert_eq!(one("lor*").matcher, Matcher::Prefix("lor".into()));
        assert_eq!(one(r"lor\*").matcher, Matcher::Term("lor*".into()));
    }

    #[test]
    fn numeric_ranges() {
        assert_eq!(one("Age:>=18").matcher, Matcher::Range(Comparison::Ge, 18.0));
        assert_eq!(one("Age:<2.5").matcher, Matcher::Range(Comparison::Lt, 2.5));
        assert_eq!(one("-Age:>-3").occur, Occur::MustNot);
        assert_eq!(one(r"\>5").matcher, Matcher::Term(">5".into()));
        assert!(Comparison::Le.holds(3.0, 3.0));
        assert!(!Comparison::Gt.holds(3.0, 3.0));
    }

    #[test]
    fn escaped_colon_is_not_a_field() {
        let c = one(r"a\:b");
        assert_eq!(c.field, None);
        assert_eq!(c.matcher, Matcher::Term("a:b".into()));
    }

    #[test]
    fn blank_input_has_no_clauses() {
        assert!(Query::parse("").unwrap().clauses.is_empty());
        assert!(Query::parse("  \t ").unwrap().clauses.is_empty());
    }

    #[test]
    fn syntax_errors_report_position() {
        let err = |s: &str| match Query::parse(s) {
            Err(IndexError::QuerySyntax { position, .. }) => position,
            other => panic!("{s:?} gave {other:?}"),
        };
        assert_eq!(err(":x"), 0);
        assert_eq!(err("a +"), 3);
        assert_eq!(err(r#"name:"open"#), 6);
        assert_eq!(err("Age:>=ten"), 4);
        assert_eq!(err("Age: 3"), 4);
    }
}
