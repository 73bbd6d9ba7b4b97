//! Request URI parsing: resource path resolution followed by the system
//! query options, all validated against the model.

pub mod apply;
pub mod context;
pub mod expand;
pub mod expression;
pub mod helper;
pub mod orderby;
pub mod resource_path;
pub mod search;
pub mod select;
pub mod typecheck;

use std::collections::BTreeMap;

use odata_edm::{Edm, EdmType};
use tracing::{debug, warn};

use crate::decoder::{self, RawOption};
use crate::error::{SemanticKey, SyntaxKey, UriError, UriResult};
use crate::query_options::QueryOptions;
use crate::tokenizer::{TokenKind, Tokenizer};
use crate::uri_info::{UriInfo, UriInfoKind};
use crate::validator::{SystemQueryOption, UriValidator};

use self::context::Scope;
use self::expression::ExpressionParser;
use self::resource_path::ResourcePathResolver;

/// Entry point: parses a request path and query string against one model.
pub struct Parser<'a> {
    edm: &'a Edm,
    max_expand_depth: Option<u32>,
}

impl<'a> Parser<'a> {
    #[must_use]
    pub fn new(edm: &'a Edm) -> Self {
        Self {
            edm,
            max_expand_depth: None,
        }
    }

    /// Rejects `$expand` trees deeper than `depth`.
    #[must_use]
    pub fn with_max_expand_depth(mut self, depth: u32) -> Self {
        self.max_expand_depth = Some(depth);
        self
    }

    /// Parses `path` (relative to the service root) and the raw `query`
    /// string (without the leading `?`).
    ///
    /// # Errors
    /// Any [`UriError`]: malformed text, names the model does not know,
    /// type errors in expressions, and options the addressed resource does
    /// not accept.
    pub fn parse_uri(&self, path: &str, query: &str) -> UriResult<UriInfo> {
        let segments = decoder::split_and_decode_path(path)?;
        let raw = decoder::split_and_decode_options(query)?;

        let mut system: Vec<(SystemQueryOption, String)> = Vec::new();
        let mut aliases = BTreeMap::new();
        let mut custom = BTreeMap::new();
        for RawOption { name, value } in raw {
            if name.starts_with('$') {
                let option = SystemQueryOption::from_name(&name).ok_or_else(|| {
                    UriError::syntax(
                        SyntaxKey::UnknownSystemQueryOption,
                        format!("unknown system query option '{name}'"),
                    )
                })?;
                if system.iter().any(|(o, _)| *o == option) {
                    return Err(UriError::syntax(
                        SyntaxKey::DoubleSystemQueryOption,
                        format!("'{name}' given twice"),
                    ));
                }
                system.push((option, value));
            } else if name.starts_with('@') {
                if aliases.insert(name.clone(), value).is_some() {
                    return Err(UriError::syntax(
                        SyntaxKey::DuplicateAlias,
                        format!("alias '{name}' given twice"),
                    ));
                }
            } else {
                warn!(option = %name, "custom query option passed through");
                custom.insert(name, value);
            }
        }

        let resolved = ResourcePathResolver::new(self.edm, &aliases).resolve(&segments)?;
        let mut info = UriInfo::new(resolved.kind);
        info.resource_parts = resolved.parts;
        info.crossjoin_entity_sets = resolved.crossjoin;
        info.entity_type_cast = resolved.entity_cast;

        let present: Vec<SystemQueryOption> = system.iter().map(|(o, _)| *o).collect();
        UriValidator::validate_options(&info, &present)?;

        let mut scope = match (&info.entity_type_cast, info.target_type()) {
            (Some(cast), _) => Scope::for_type(EdmType::Entity(cast.clone()), false),
            (None, Some(target)) => Scope::for_type(target.ty, false),
            (None, None) => Scope::default(),
        };
        scope.crossjoin.clone_from(&info.crossjoin_entity_sets);
        let mut p = ExpressionParser::new(self.edm, &aliases, scope);

        // $apply first: its aliases are visible to the other options.
        system.sort_by_key(|(o, _)| *o != SystemQueryOption::Apply);
        let mut options = QueryOptions::default();
        for (option, value) in &system {
            match option {
                SystemQueryOption::Format => info.format = Some(non_empty(*option, value)?),
                SystemQueryOption::SkipToken => info.skiptoken = Some(value.clone()),
                SystemQueryOption::Id => info.id = Some(value.clone()),
                SystemQueryOption::DeltaToken => info.deltatoken = Some(value.clone()),
                _ => {
                    let mut tok = Tokenizer::new(value);
                    tok.skip_ws();
                    parse_option(&mut p, &mut tok, *option, &mut options)?;
                    helper::require_end(&mut tok)?;
                }
            }
        }

        if info.kind == UriInfoKind::EntityId && info.id.is_none() {
            return Err(UriError::syntax(
                SyntaxKey::Syntax,
                "$entity requires the $id query option",
            ));
        }
        if let Some(max) = self.max_expand_depth {
            UriValidator::validate_expand_depth(&mut options, max)?;
        }

        info.options = options;
        info.aliases = aliases;
        info.custom_options = custom;
        debug!(
            kind = ?info.kind,
            parts = info.resource_parts.len(),
            options = present.len(),
            "parsed request URI"
        );
        Ok(info)
    }
}

fn non_empty(option: SystemQueryOption, value: &str) -> UriResult<String> {
    if value.is_empty() {
        return Err(wrong_value(option, value));
    }
    Ok(value.to_owned())
}

fn wrong_value(option: SystemQueryOption, value: &str) -> UriError {
    UriError::syntax(
        SyntaxKey::WrongValueForSystemQueryOption,
        format!("invalid value '{value}' for {}", option.name()),
    )
}

fn non_negative(tok: &mut Tokenizer<'_>, option: SystemQueryOption) -> UriResult<u64> {
    if tok.next(TokenKind::Integer)
        && let Ok(n) = tok.text().parse::<u64>()
    {
        return Ok(n);
    }
    Err(wrong_value(option, tok.input()))
}

/// Parses the value of one system query option at the tokenizer position,
/// for the query string and for options nested in `$expand`. Stops at the
/// first token that cannot continue the value.
pub(crate) fn parse_option(
    p: &mut ExpressionParser<'_>,
    tok: &mut Tokenizer<'_>,
    option: SystemQueryOption,
    options: &mut QueryOptions,
) -> UriResult<()> {
    match option {
        SystemQueryOption::Filter => options.filter = Some(p.parse_boolean(tok)?),
        SystemQueryOption::OrderBy => options.orderby = orderby::parse(p, tok)?,
        SystemQueryOption::Select => options.select = Some(select::parse(p, tok)?),
        SystemQueryOption::Expand => options.expand = Some(expand::parse(p, tok)?),
        SystemQueryOption::Search => options.search = Some(search::parse(tok)?),
        SystemQueryOption::Apply => options.apply = Some(apply::parse(p, tok)?),
        SystemQueryOption::Top => options.top = Some(non_negative(tok, option)?),
        SystemQueryOption::Skip => options.skip = Some(non_negative(tok, option)?),
        SystemQueryOption::Count => {
            options.count = Some(if tok.next(TokenKind::Keyword("true")) {
                true
            } else if tok.next(TokenKind::Keyword("false")) {
                false
            } else {
                return Err(wrong_value(option, tok.input()));
            });
        }
        SystemQueryOption::Levels
        | SystemQueryOption::Format
        | SystemQueryOption::SkipToken
        | SystemQueryOption::Id
        | SystemQueryOption::DeltaToken => {
            return Err(UriError::semantic(
                SemanticKey::NotImplemented,
                format!("{} has no expression value", option.name()),
            ));
        }
    }
    Ok(())
}
