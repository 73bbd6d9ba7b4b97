//! Context-driven lexer.
//!
//! The parser asks for the token kind it expects next (`next(kind)`); on a
//! miss the position is left untouched so the caller can try alternatives.

use tracing::trace;

use crate::error::{SyntaxKey, UriError};

const MAX_IDENTIFIER_LEN: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    End,
    Open,
    Close,
    Comma,
    Semicolon,
    Star,
    Slash,
    EqualsSign,
    Colon,
    /// One or more spaces or tabs.
    Whitespace,
    /// Literal text ending on a word boundary (`$count`, `max`, `identity`).
    Keyword(&'static str),
    /// Name immediately followed by `(`; both are consumed.
    Call(&'static str),

    Null,
    Boolean,
    String,
    Integer,
    Decimal,
    Double,
    Guid,
    Date,
    DateTimeOffset,
    TimeOfDay,
    Duration,
    Binary,
    Enum,

    Identifier,
    QualifiedName,
    Alias,

    Or,
    And,
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    Has,
    In,
    Add,
    Sub,
    Mul,
    Div,
    DivBy,
    Mod,
    Minus,
    Not,
    As,
    From,
    With,
    Asc,
    Desc,

    SearchWord,
    SearchPhrase,
}

#[derive(Debug, Clone)]
pub struct Tokenizer<'a> {
    input: &'a str,
    index: usize,
    start: usize,
    saved: (usize, usize),
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

impl<'a> Tokenizer<'a> {
    #[must_use]
    pub fn new(input: &'a str) -> Self {
        Self {
            input,
            index: 0,
            start: 0,
            saved: (0, 0),
        }
    }

    /// Consumes a token of `kind` if one starts at the current position.
    pub fn next(&mut self, kind: TokenKind) -> bool {
        let before = self.index;
        let matched = self.scan(kind);
        if matched {
            self.start = before;
            trace!(?kind, text = self.text(), "token");
        } else {
            self.index = before;
        }
        matched
    }

    /// Text of the last matched token.
    #[must_use]
    pub fn text(&self) -> &'a str {
        &self.input[self.start..self.index]
    }

    pub fn save_state(&mut self) {
        self.saved = (self.start, self.index);
    }

    pub fn return_to_saved_state(&mut self) {
        (self.start, self.index) = self.saved;
    }

    #[must_use]
    pub fn position(&self) -> usize {
        self.index
    }

    /// Rewinds to a position obtained from [`Self::position`].
    pub fn reset(&mut self, position: usize) {
        self.index = position;
        self.start = position;
    }

    #[must_use]
    pub fn input(&self) -> &'a str {
        self.input
    }

    /// Skips optional whitespace.
    pub fn skip_ws(&mut self) {
        self.eat_ws();
    }

    /// Syntax error pointing at the current position.
    #[must_use]
    pub fn error(&self, message: impl AsRef<str>) -> UriError {
        UriError::syntax(
            SyntaxKey::Syntax,
            format!(
                "{} at position {} in '{}'",
                message.as_ref(),
                self.index,
                self.input
            ),
        )
    }

    fn scan(&mut self, kind: TokenKind) -> bool {
        match kind {
            TokenKind::End => self.index == self.input.len(),
            TokenKind::Open => self.eat_char('('),
            TokenKind::Close => self.eat_char(')'),
            TokenKind::Comma => self.eat_char(','),
            TokenKind::Semicolon => self.eat_char(';'),
            TokenKind::Star => self.eat_char('*'),
            TokenKind::Slash => self.eat_char('/'),
            TokenKind::EqualsSign => self.eat_char('='),
            TokenKind::Colon => self.eat_char(':'),
            TokenKind::Whitespace => self.eat_ws(),
            TokenKind::Keyword(k) => self.eat_keyword(k),
            TokenKind::Call(k) => self.eat_str(k) && self.eat_char('('),

            TokenKind::Null => self.eat_keyword("null"),
            TokenKind::Boolean => {
                (self.eat_str_ignore_case("true") || self.eat_str_ignore_case("false"))
                    && self.at_boundary()
            }
            TokenKind::String => self.eat_string(),
            TokenKind::Integer => self.eat_integer(),
            TokenKind::Decimal => self.eat_decimal(),
            TokenKind::Double => self.eat_double(),
            TokenKind::Guid => self.eat_guid(),
            TokenKind::Date => self.eat_date() && self.at_boundary(),
            TokenKind::DateTimeOffset => self.eat_date_time_offset(),
            TokenKind::TimeOfDay => self.eat_time() && self.at_boundary(),
            TokenKind::Duration => self.eat_prefixed_quoted("duration", is_duration_body),
            TokenKind::Binary => self.eat_prefixed_quoted("binary", |b| {
                b.chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '='))
            }),
            TokenKind::Enum => self.eat_enum(),

            TokenKind::Identifier => self.eat_identifier(),
            TokenKind::QualifiedName => self.eat_qualified_name(),
            TokenKind::Alias => self.eat_char('@') && self.eat_identifier(),

            TokenKind::Or => self.eat_binary_operator("or"),
            TokenKind::And => self.eat_binary_operator("and"),
            TokenKind::Eq => self.eat_binary_operator("eq"),
            TokenKind::Ne => self.eat_binary_operator("ne"),
            TokenKind::Gt => self.eat_binary_operator("gt"),
            TokenKind::Ge => self.eat_binary_operator("ge"),
            TokenKind::Lt => self.eat_binary_operator("lt"),
            TokenKind::Le => self.eat_binary_operator("le"),
            TokenKind::Has => self.eat_binary_operator("has"),
            TokenKind::Add => self.eat_binary_operator("add"),
            TokenKind::Sub => self.eat_binary_operator("sub"),
            TokenKind::Mul => self.eat_binary_operator("mul"),
            TokenKind::Div => self.eat_binary_operator("div"),
            TokenKind::DivBy => self.eat_binary_operator("divby"),
            TokenKind::Mod => self.eat_binary_operator("mod"),
            TokenKind::As => self.eat_binary_operator("as"),
            TokenKind::From => self.eat_binary_operator("from"),
            TokenKind::With => self.eat_binary_operator("with"),
            TokenKind::In => {
                self.eat_ws() && self.eat_str("in") && {
                    self.eat_ws();
                    self.peek() == Some('(')
                }
            }
            TokenKind::Not => self.eat_str("not") && self.eat_ws(),
            TokenKind::Minus => {
                self.eat_char('-') && {
                    self.eat_ws();
                    true
                }
            }
            TokenKind::Asc => self.eat_ws() && self.eat_keyword("asc"),
            TokenKind::Desc => self.eat_ws() && self.eat_keyword("desc"),

            TokenKind::SearchWord => self.eat_search_word(),
            TokenKind::SearchPhrase => self.eat_search_phrase(),
        }
    }

    /* ---------- character helpers ---------- */

    fn rest(&self) -> &'a str {
        &self.input[self.index..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn eat_char(&mut self, c: char) -> bool {
        if self.peek() == Some(c) {
            self.index += c.len_utf8();
            true
        } else {
            false
        }
    }

    fn eat_any(&mut self, chars: &[char]) -> bool {
        match self.peek() {
            Some(c) if chars.contains(&c) => {
                self.index += c.len_utf8();
                true
            }
            _ => false,
        }
    }

    fn eat_str(&mut self, s: &str) -> bool {
        if self.rest().starts_with(s) {
            self.index += s.len();
            true
        } else {
            false
        }
    }

    fn eat_str_ignore_case(&mut self, s: &str) -> bool {
        let rest = self.rest();
        if rest.len() >= s.len()
            && rest.is_char_boundary(s.len())
            && rest[..s.len()].eq_ignore_ascii_case(s)
        {
            self.index += s.len();
            true
        } else {
            false
        }
    }

    fn at_boundary(&self) -> bool {
        !self.peek().is_some_and(is_ident_char)
    }

    fn eat_keyword(&mut self, k: &str) -> bool {
        let needs_boundary = k.chars().last().is_some_and(is_ident_char);
        self.eat_str(k) && (!needs_boundary || self.at_boundary())
    }

    fn eat_ws(&mut self) -> bool {
        let mut any = false;
        while self.eat_any(&[' ', '\t']) {
            any = true;
        }
        any
    }

    fn eat_binary_operator(&mut self, op: &str) -> bool {
        self.eat_ws() && self.eat_str(op) && self.eat_ws()
    }

    /// Consumes between `min` and `max` ASCII digits.
    fn eat_digits(&mut self, min: usize, max: usize) -> bool {
        let count = self
            .rest()
            .bytes()
            .take(max)
            .take_while(u8::is_ascii_digit)
            .count();
        if count >= min {
            self.index += count;
            true
        } else {
            false
        }
    }

    fn eat_hex(&mut self, exact: usize) -> bool {
        let count = self
            .rest()
            .bytes()
            .take(exact)
            .take_while(u8::is_ascii_hexdigit)
            .count();
        if count == exact {
            self.index += count;
            true
        } else {
            false
        }
    }

    /* ---------- names ---------- */

    fn eat_identifier(&mut self) -> bool {
        let mut chars = self.rest().chars();
        match chars.next() {
            Some(c) if c.is_alphabetic() || c == '_' => {}
            _ => return false,
        }
        let len: usize = self
            .rest()
            .chars()
            .take_while(|c| is_ident_char(*c))
            .map(char::len_utf8)
            .sum();
        if self.rest()[..len].chars().count() > MAX_IDENTIFIER_LEN {
            return false;
        }
        self.index += len;
        true
    }

    fn eat_qualified_name(&mut self) -> bool {
        if !self.eat_identifier() {
            return false;
        }
        let mut parts = 1;
        loop {
            let before = self.index;
            if self.eat_char('.') && self.eat_identifier() {
                parts += 1;
            } else {
                self.index = before;
                break;
            }
        }
        parts >= 2
    }

    /* ---------- literals ---------- */

    fn eat_string(&mut self) -> bool {
        if !self.eat_char('\'') {
            return false;
        }
        loop {
            match self.peek() {
                None => return false,
                Some('\'') => {
                    self.index += 1;
                    if !self.eat_char('\'') {
                        return true;
                    }
                }
                Some(c) => self.index += c.len_utf8(),
            }
        }
    }

    fn eat_sign(&mut self) {
        self.eat_any(&['+', '-']);
    }

    fn eat_integer(&mut self) -> bool {
        self.eat_sign();
        self.eat_digits(1, usize::MAX) && self.at_boundary() && self.peek() != Some('.')
    }

    fn eat_decimal(&mut self) -> bool {
        self.eat_sign();
        self.eat_digits(1, usize::MAX)
            && self.eat_char('.')
            && self.eat_digits(1, usize::MAX)
            && self.at_boundary()
    }

    fn eat_double(&mut self) -> bool {
        if self.eat_str("NaN") || self.eat_str("INF") || self.eat_str("-INF") {
            return self.at_boundary();
        }
        self.eat_sign();
        if !self.eat_digits(1, usize::MAX) {
            return false;
        }
        let before = self.index;
        if !(self.eat_char('.') && self.eat_digits(1, usize::MAX)) {
            self.index = before;
        }
        if !self.eat_any(&['e', 'E']) {
            return false;
        }
        self.eat_sign();
        self.eat_digits(1, usize::MAX) && self.at_boundary()
    }

    fn eat_guid(&mut self) -> bool {
        self.eat_hex(8)
            && self.eat_char('-')
            && self.eat_hex(4)
            && self.eat_char('-')
            && self.eat_hex(4)
            && self.eat_char('-')
            && self.eat_hex(4)
            && self.eat_char('-')
            && self.eat_hex(12)
            && self.at_boundary()
    }

    fn eat_date(&mut self) -> bool {
        self.eat_char('-');
        self.eat_digits(4, 4)
            && self.eat_char('-')
            && self.eat_digits(2, 2)
            && self.eat_char('-')
            && self.eat_digits(2, 2)
    }

    fn eat_time(&mut self) -> bool {
        if !(self.eat_digits(2, 2) && self.eat_char(':') && self.eat_digits(2, 2)) {
            return false;
        }
        let before = self.index;
        if self.eat_char(':') && self.eat_digits(2, 2) {
            let frac = self.index;
            if !(self.eat_char('.') && self.eat_digits(1, 12)) {
                self.index = frac;
            }
        } else {
            self.index = before;
        }
        true
    }

    fn eat_date_time_offset(&mut self) -> bool {
        if !(self.eat_date() && self.eat_any(&['T', 't']) && self.eat_time()) {
            return false;
        }
        let offset = self.eat_any(&['Z', 'z'])
            || (self.eat_any(&['+', '-'])
                && self.eat_digits(2, 2)
                && self.eat_char(':')
                && self.eat_digits(2, 2));
        offset && self.at_boundary()
    }

    fn eat_prefixed_quoted(&mut self, prefix: &str, body_ok: impl Fn(&str) -> bool) -> bool {
        if !(self.eat_str_ignore_case(prefix) && self.eat_char('\'')) {
            return false;
        }
        let Some(end) = self.rest().find('\'') else {
            return false;
        };
        let body = &self.rest()[..end];
        if !body_ok(body) {
            return false;
        }
        self.index += end + 1;
        true
    }

    fn eat_enum(&mut self) -> bool {
        if !(self.eat_qualified_name() && self.eat_char('\'')) {
            return false;
        }
        let Some(end) = self.rest().find('\'') else {
            return false;
        };
        let body = &self.rest()[..end];
        let valid = !body.is_empty()
            && body.split(',').all(|m| {
                let m = m.trim();
                !m.is_empty() && m.chars().all(|c| is_ident_char(c) || c == '-')
            });
        if valid {
            self.index += end + 1;
        }
        valid
    }

    /* ---------- $search ---------- */

    fn eat_search_word(&mut self) -> bool {
        let len: usize = self
            .rest()
            .chars()
            .take_while(|c| !matches!(c, ' ' | '\t' | '(' | ')' | '"' | ';'))
            .map(char::len_utf8)
            .sum();
        if len == 0 {
            return false;
        }
        let word = &self.rest()[..len];
        if matches!(word, "AND" | "OR" | "NOT") {
            return false;
        }
        self.index += len;
        true
    }

    fn eat_search_phrase(&mut self) -> bool {
        if !self.eat_char('"') {
            return false;
        }
        let Some(end) = self.rest().find('"') else {
            return false;
        };
        self.index += end + 1;
        end > 0
    }
}

/// `[-]P[nD][T[nH][nM][n[.n]S]]` with at least one component.
fn is_duration_body(body: &str) -> bool {
    let body = body.strip_prefix('-').unwrap_or(body);
    let Some(body) = body.strip_prefix(['P', 'p']) else {
        return false;
    };
    let (date, time) = match body.find(['T', 't']) {
        Some(i) => (&body[..i], Some(&body[i + 1..])),
        None => (body, None),
    };
    let date_ok = date.is_empty()
        || (date.len() > 1
            && date.ends_with(['D', 'd'])
            && date[..date.len() - 1].bytes().all(|b| b.is_ascii_digit()));
    let time_ok = match time {
        None => true,
        Some(t) => !t.is_empty() && is_duration_time(t),
    };
    date_ok && time_ok && (!date.is_empty() || time.is_some())
}

fn is_duration_time(mut t: &str) -> bool {
    for unit in ['H', 'M', 'S'] {
        let Some(pos) = t.find([unit, unit.to_ascii_lowercase()]) else {
            continue;
        };
        let number = &t[..pos];
        let ok = if unit == 'S' {
            let (int, frac) = number.split_once('.').unwrap_or((number, "0"));
            !int.is_empty()
                && int.bytes().all(|b| b.is_ascii_digit())
                && !frac.is_empty()
                && frac.bytes().all(|b| b.is_ascii_digit())
        } else {
            !number.is_empty() && number.bytes().all(|b| b.is_ascii_digit())
        };
        if !ok {
            return false;
        }
        t = &t[pos + 1..];
    }
    t.is_empty()
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    fn single(kind: TokenKind, input: &str) -> bool {
        let mut t = Tokenizer::new(input);
        t.next(kind) && t.next(TokenKind::End)
    }

    #[test]
    fn miss_leaves_position_untouched() {
        let mut t = Tokenizer::new("Name eq 'x'");
        assert!(!t.next(TokenKind::Integer));
        assert_eq!(t.position(), 0);
        assert!(t.next(TokenKind::Identifier));
        assert_eq!(t.text(), "Name");
        assert!(t.next(TokenKind::Eq));
        assert!(t.next(TokenKind::String));
        assert_eq!(t.text(), "'x'");
        assert!(t.next(TokenKind::End));
    }

    #[test]
    fn numeric_literals() {
        assert!(single(TokenKind::Integer, "-42"));
        assert!(!single(TokenKind::Integer, "4.2"));
        assert!(single(TokenKind::Decimal, "4.25"));
        assert!(!single(TokenKind::Decimal, "4.25e3"));
        assert!(single(TokenKind::Double, "4.25e3"));
        assert!(single(TokenKind::Double, "1E-7"));
        assert!(single(TokenKind::Double, "-INF"));
        assert!(!single(TokenKind::Double, "42"));
    }

    #[test]
    fn string_with_escaped_quote() {
        let mut t = Tokenizer::new("'O''Neil' rest");
        assert!(t.next(TokenKind::String));
        assert_eq!(t.text(), "'O''Neil'");
        assert!(!single(TokenKind::String, "'unterminated"));
    }

    #[test]
    fn temporal_literals() {
        assert!(single(TokenKind::Date, "2024-02-29"));
        assert!(!single(TokenKind::Date, "2024-02-29T10:00Z"));
        assert!(single(TokenKind::DateTimeOffset, "2024-02-29T10:00Z"));
        assert!(single(TokenKind::DateTimeOffset, "2024-02-29T10:00:01.5+02:00"));
        assert!(!single(TokenKind::DateTimeOffset, "2024-02-29T10:00"));
        assert!(single(TokenKind::TimeOfDay, "23:59:59.999"));
        assert!(single(TokenKind::Duration, "duration'P1DT2H30M'"));
        assert!(single(TokenKind::Duration, "duration'-PT0.5S'"));
        assert!(!single(TokenKind::Duration, "duration'P'"));
        assert!(!single(TokenKind::Duration, "duration'PT5X'"));
    }

    #[test]
    fn guid_and_enum_literals() {
        assert!(single(TokenKind::Guid, "01234567-89ab-cdef-0123-456789ABCDEF"));
        assert!(!single(TokenKind::Guid, "01234567-89ab-cdef-0123-456789ABCDE"));
        assert!(single(TokenKind::Enum, "Demo.Color'Red'"));
        assert!(single(TokenKind::Enum, "Demo.Access'Read,Write'"));
        assert!(!single(TokenKind::Enum, "Color'Red'"));
    }

    #[test]
    fn operators_require_whitespace() {
        let mut t = Tokenizer::new("a eq b");
        assert!(t.next(TokenKind::Identifier));
        assert!(!t.next(TokenKind::Ne));
        assert!(t.next(TokenKind::Eq));
        let mut t = Tokenizer::new("aeqb");
        assert!(t.next(TokenKind::Identifier));
        assert_eq!(t.text(), "aeqb");
        let mut t = Tokenizer::new(" divby 2");
        assert!(!t.next(TokenKind::Div));
        assert!(t.next(TokenKind::DivBy));
    }

    #[test]
    fn keywords_need_a_word_boundary() {
        let mut t = Tokenizer::new("$countx");
        assert!(!t.next(TokenKind::Keyword("$count")));
        let mut t = Tokenizer::new("$count/");
        assert!(t.next(TokenKind::Keyword("$count")));
        assert!(t.next(TokenKind::Slash));
    }

    #[test]
    fn calls_consume_parenthesis() {
        let mut t = Tokenizer::new("contains(Name,'a')");
        assert!(!t.next(TokenKind::Call("concat")));
        assert!(t.next(TokenKind::Call("contains")));
        assert_eq!(t.text(), "contains(");
        assert!(t.next(TokenKind::Identifier));
    }

    #[test]
    fn qualified_name_needs_a_dot() {
        assert!(!single(TokenKind::QualifiedName, "Person"));
        assert!(single(TokenKind::QualifiedName, "Demo.Sub.Person"));
        let mut t = Tokenizer::new("Demo.Person/Name");
        assert!(t.next(TokenKind::QualifiedName));
        assert_eq!(t.text(), "Demo.Person");
    }

    #[test]
    fn save_and_restore() {
        let mut t = Tokenizer::new("abc def");
        t.save_state();
        assert!(t.next(TokenKind::Identifier));
        t.return_to_saved_state();
        assert_eq!(t.position(), 0);
    }

    #[test]
    fn search_tokens() {
        let mut t = Tokenizer::new("blue \"green sky\" AND");
        assert!(t.next(TokenKind::SearchWord));
        assert_eq!(t.text(), "blue");
        assert!(t.next(TokenKind::Whitespace));
        assert!(t.next(TokenKind::SearchPhrase));
        assert_eq!(t.text(), "\"green sky\"");
        assert!(t.next(TokenKind::Whitespace));
        assert!(!t.next(TokenKind::SearchWord));
        assert!(t.next(TokenKind::Keyword("AND")));
    }

    #[test]
    fn identifier_length_limit() {
        let long = "a".repeat(129);
        assert!(!single(TokenKind::Identifier, &long));
        assert!(single(TokenKind::Identifier, &long[..128]));
    }
}
