//! `$search`: terms, phrases, `NOT`, `AND`, `OR` and parentheses. Adjacent
//! terms are joined with an implicit `AND`.

use crate::error::UriResult;
use crate::parser::helper::{self, expect, lookahead};
use crate::query_options::SearchExpression;
use crate::tokenizer::{TokenKind, Tokenizer};

/// # Errors
/// Syntax errors.
pub fn parse(tok: &mut Tokenizer<'_>) -> UriResult<SearchExpression> {
    tok.skip_ws();
    let expr = parse_or(tok, 0)?;
    tok.skip_ws();
    Ok(expr)
}

fn parse_or(tok: &mut Tokenizer<'_>, depth: u32) -> UriResult<SearchExpression> {
    let mut left = parse_and(tok, depth)?;
    loop {
        let pos = tok.position();
        if tok.next(TokenKind::Whitespace)
            && tok.next(TokenKind::Keyword("OR"))
            && tok.next(TokenKind::Whitespace)
        {
            let right = parse_and(tok, depth)?;
            left = SearchExpression::Or {
                left: Box::new(left),
                right: Box::new(right),
            };
        } else {
            tok.reset(pos);
            return Ok(left);
        }
    }
}

fn at_term_end(tok: &mut Tokenizer<'_>) -> bool {
    [
        TokenKind::End,
        TokenKind::Close,
        TokenKind::Semicolon,
        TokenKind::Keyword("OR"),
    ]
    .into_iter()
    .any(|k| lookahead(tok, k))
}

fn parse_and(tok: &mut Tokenizer<'_>, depth: u32) -> UriResult<SearchExpression> {
    let mut left = parse_not(tok, depth)?;
    loop {
        let pos = tok.position();
        if !tok.next(TokenKind::Whitespace) || at_term_end(tok) {
            tok.reset(pos);
            return Ok(left);
        }
        if tok.next(TokenKind::Keyword("AND")) {
            expect(tok, TokenKind::Whitespace, "whitespace after AND")?;
        }
        let right = parse_not(tok, depth)?;
        left = SearchExpression::And {
            left: Box::new(left),
            right: Box::new(right),
        };
    }
}

fn parse_not(tok: &mut Tokenizer<'_>, depth: u32) -> UriResult<SearchExpression> {
    if tok.next(TokenKind::Keyword("NOT")) {
        expect(tok, TokenKind::Whitespace, "whitespace after NOT")?;
        let operand = parse_primary(tok, depth)?;
        return Ok(SearchExpression::Not {
            operand: Box::new(operand),
        });
    }
    parse_primary(tok, depth)
}

fn parse_primary(tok: &mut Tokenizer<'_>, depth: u32) -> UriResult<SearchExpression> {
    if tok.next(TokenKind::Open) {
        if depth >= helper::MAX_DEPTH {
            return Err(helper::too_deep());
        }
        tok.skip_ws();
        let inner = parse_or(tok, depth + 1)?;
        tok.skip_ws();
        expect(tok, TokenKind::Close, "')'")?;
        return Ok(inner);
    }
    if tok.next(TokenKind::SearchPhrase) {
        let text = tok.text().trim_matches('"').to_owned();
        return Ok(SearchExpression::Phrase { text });
    }
    if tok.next(TokenKind::SearchWord) {
        return Ok(SearchExpression::Term {
            text: tok.text().to_owned(),
        });
    }
    Err(tok.error("expected search term"))
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    fn search(text: &str) -> UriResult<SearchExpression> {
        let mut tok = Tokenizer::new(text);
        let expr = parse(&mut tok)?;
        crate::parser::helper::require_end(&mut tok)?;
        Ok(expr)
    }

    fn term(text: &str) -> Box<SearchExpression> {
        Box::new(SearchExpression::Term {
            text: text.to_owned(),
        })
    }

    #[test]
    fn implicit_and_binds_tighter_than_or() {
        let expr = search("blue green OR red").unwrap();
        assert_eq!(
            expr,
            SearchExpression::Or {
                left: Box::new(SearchExpression::And {
                    left: term("blue"),
                    right: term("green"),
                }),
                right: term("red"),
            }
        );
    }

    #[test]
    fn phrases_not_and_parentheses() {
        let expr = search("NOT (\"dark blue\" AND sky)").unwrap();
        let SearchExpression::Not { operand } = expr else {
            panic!("expected NOT");
        };
        assert!(matches!(*operand, SearchExpression::And { .. }));
    }

    #[test]
    fn dangling_operators_fail() {
        assert!(search("blue AND").is_err());
        assert!(search("(blue").is_err());
        assert!(search("").is_err());
    }

    #[test]
    fn nesting_is_bounded() {
        let ok = format!("{}blue{}", "(".repeat(50), ")".repeat(50));
        assert!(search(&ok).is_ok());
        let deep = format!("{}blue{}", "(".repeat(5000), ")".repeat(5000));
        let err = search(&deep).unwrap_err();
        assert_eq!(err.syntax_key(), Some(crate::error::SyntaxKey::Syntax));
    }
}
