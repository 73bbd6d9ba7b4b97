use crate::error::{UriError, UriResult};
use crate::parser::expression::ExpressionParser;
use crate::query_options::OrderByItem;
use crate::tokenizer::{TokenKind, Tokenizer};

/// `expr [asc|desc], ...`
///
/// # Errors
/// Expression errors and `TypeMismatch` for collection or structured items.
pub fn parse(p: &mut ExpressionParser<'_>, tok: &mut Tokenizer<'_>) -> UriResult<Vec<OrderByItem>> {
    let mut items = Vec::new();
    loop {
        tok.skip_ws();
        let expression = p.parse(tok)?;
        if expression.is_collection() || expression.edm_type().is_some_and(|t| t.is_structured())
        {
            return Err(UriError::type_mismatch(
                "$orderby items must be single primitive values",
            ));
        }
        let descending = if tok.next(TokenKind::Desc) {
            true
        } else {
            tok.next(TokenKind::Asc);
            false
        };
        items.push(OrderByItem {
            expression,
            descending,
        });
        tok.skip_ws();
        if !tok.next(TokenKind::Comma) {
            return Ok(items);
        }
    }
}
