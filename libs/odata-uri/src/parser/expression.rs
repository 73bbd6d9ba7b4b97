//! Recursive-descent parser for common expressions.
//!
//! Precedence, lowest first: `or`, `and`, `eq ne`, `gt ge lt le has in`,
//! `add sub`, `mul div divby mod`, unary `-` and `not`, primary.

use std::collections::BTreeMap;

use odata_edm::{Edm, EdmType, FullQualifiedName};

use crate::error::{SemanticKey, UriError, UriResult};
use crate::expression::{
    BinaryOperator, Expression, Member, MemberStart, MethodKind, UnaryOperator,
};
use crate::parser::context::Scope;
use crate::parser::helper::{self, expect, lookahead};
use crate::parser::typecheck;
use crate::resource::{FunctionParameter, TypeInfo, UriResource};
use crate::tokenizer::{TokenKind, Tokenizer};

#[derive(Clone, Copy)]
enum Start {
    Implicit,
    It,
    Root,
}

pub struct ExpressionParser<'a> {
    edm: &'a Edm,
    aliases: &'a BTreeMap<String, String>,
    scope: Scope,
    resolving: Vec<String>,
    depth: u32,
}

impl<'a> ExpressionParser<'a> {
    #[must_use]
    pub fn new(edm: &'a Edm, aliases: &'a BTreeMap<String, String>, scope: Scope) -> Self {
        Self {
            edm,
            aliases,
            scope,
            resolving: Vec::new(),
            depth: 0,
        }
    }

    /// Parser for a nested scope sharing the model and aliases. It starts
    /// one level below this one.
    #[must_use]
    pub fn nested(&self, scope: Scope) -> Self {
        Self {
            depth: self.depth + 1,
            ..Self::new(self.edm, self.aliases, scope)
        }
    }

    /// # Errors
    /// `Syntax` once nesting passes [`helper::MAX_DEPTH`].
    pub fn check_depth(&self) -> UriResult<()> {
        if self.depth > helper::MAX_DEPTH {
            Err(helper::too_deep())
        } else {
            Ok(())
        }
    }

    fn descend<T>(&mut self, f: impl FnOnce(&mut Self) -> UriResult<T>) -> UriResult<T> {
        if self.depth >= helper::MAX_DEPTH {
            return Err(helper::too_deep());
        }
        self.depth += 1;
        let result = f(self);
        self.depth -= 1;
        result
    }

    #[must_use]
    pub fn edm(&self) -> &'a Edm {
        self.edm
    }

    #[must_use]
    pub fn aliases(&self) -> &'a BTreeMap<String, String> {
        self.aliases
    }

    #[must_use]
    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub fn scope_mut(&mut self) -> &mut Scope {
        &mut self.scope
    }

    /// Structured type `$it` resolves against, if any.
    #[must_use]
    pub fn context_type(&self) -> Option<&FullQualifiedName> {
        self.scope.it.as_ref().and_then(|t| t.ty.structured())
    }

    /// Parses all of `text` as one expression.
    ///
    /// # Errors
    /// Syntax errors, unresolved names and type mismatches.
    pub fn parse_text(&mut self, text: &str) -> UriResult<Expression> {
        let mut tok = Tokenizer::new(text);
        let expr = self.parse(&mut tok)?;
        helper::require_end(&mut tok)?;
        Ok(expr)
    }

    /// Parses one expression, stopping at the first token that cannot
    /// continue it.
    ///
    /// # Errors
    /// Syntax errors, unresolved names and type mismatches.
    pub fn parse(&mut self, tok: &mut Tokenizer<'_>) -> UriResult<Expression> {
        self.descend(|p| p.parse_or(tok))
    }

    /// Parses an expression that must be Boolean (`$filter`, lambda bodies).
    ///
    /// # Errors
    /// As [`Self::parse`], plus `TypeMismatch` for a non-Boolean result.
    pub fn parse_boolean(&mut self, tok: &mut Tokenizer<'_>) -> UriResult<Expression> {
        let expr = self.parse(tok)?;
        if expr.edm_type() == Some(EdmType::Primitive(odata_edm::PrimitiveKind::Boolean))
            || (expr.edm_type().is_none() && !expr.is_null())
        {
            Ok(expr)
        } else {
            Err(UriError::type_mismatch("expression must be Boolean"))
        }
    }

    fn binary(
        &self,
        op: BinaryOperator,
        left: Expression,
        right: Expression,
    ) -> UriResult<Expression> {
        let ty = typecheck::binary_type(self.edm, op, &left, &right)?;
        Ok(Expression::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
            ty,
        })
    }

    fn parse_or(&mut self, tok: &mut Tokenizer<'_>) -> UriResult<Expression> {
        let mut left = self.parse_and(tok)?;
        while tok.next(TokenKind::Or) {
            let right = self.parse_and(tok)?;
            left = self.binary(BinaryOperator::Or, left, right)?;
        }
        Ok(left)
    }

    fn parse_and(&mut self, tok: &mut Tokenizer<'_>) -> UriResult<Expression> {
        let mut left = self.parse_equality(tok)?;
        while tok.next(TokenKind::And) {
            let right = self.parse_equality(tok)?;
            left = self.binary(BinaryOperator::And, left, right)?;
        }
        Ok(left)
    }

    fn parse_equality(&mut self, tok: &mut Tokenizer<'_>) -> UriResult<Expression> {
        let mut left = self.parse_relational(tok)?;
        loop {
            let op = if tok.next(TokenKind::Eq) {
                BinaryOperator::Eq
            } else if tok.next(TokenKind::Ne) {
                BinaryOperator::Ne
            } else {
                return Ok(left);
            };
            let right = self.parse_relational(tok)?;
            left = self.binary(op, left, right)?;
        }
    }

    fn parse_relational(&mut self, tok: &mut Tokenizer<'_>) -> UriResult<Expression> {
        let mut left = self.parse_additive(tok)?;
        loop {
            let op = if tok.next(TokenKind::Gt) {
                BinaryOperator::Gt
            } else if tok.next(TokenKind::Ge) {
                BinaryOperator::Ge
            } else if tok.next(TokenKind::Lt) {
                BinaryOperator::Lt
            } else if tok.next(TokenKind::Le) {
                BinaryOperator::Le
            } else if tok.next(TokenKind::Has) {
                BinaryOperator::Has
            } else if tok.next(TokenKind::In) {
                left = self.parse_in(tok, left)?;
                continue;
            } else {
                return Ok(left);
            };
            let right = self.parse_additive(tok)?;
            left = self.binary(op, left, right)?;
        }
    }

    fn parse_in(&mut self, tok: &mut Tokenizer<'_>, left: Expression) -> UriResult<Expression> {
        if left.is_collection() || left.edm_type().is_some_and(|t| t.is_structured()) {
            return Err(UriError::type_mismatch(
                "left operand of 'in' must be a single primitive value",
            ));
        }
        expect(tok, TokenKind::Open, "'('")?;
        let mut list = Vec::new();
        tok.skip_ws();
        if !tok.next(TokenKind::Close) {
            loop {
                tok.skip_ws();
                let item = self.parse_primary(tok)?;
                let literal_like = matches!(
                    item.resolved(),
                    Expression::Literal(_) | Expression::Enum { .. } | Expression::Alias { .. }
                );
                if !literal_like {
                    return Err(UriError::type_mismatch("'in' list items must be literals"));
                }
                typecheck::check_comparable(self.edm, "in", false, &left, &item)?;
                list.push(item);
                tok.skip_ws();
                if tok.next(TokenKind::Comma) {
                    continue;
                }
                expect(tok, TokenKind::Close, "')'")?;
                break;
            }
        }
        Ok(Expression::In {
            left: Box::new(left),
            list,
        })
    }

    fn parse_additive(&mut self, tok: &mut Tokenizer<'_>) -> UriResult<Expression> {
        let mut left = self.parse_multiplicative(tok)?;
        loop {
            let op = if tok.next(TokenKind::Add) {
                BinaryOperator::Add
            } else if tok.next(TokenKind::Sub) {
                BinaryOperator::Sub
            } else {
                return Ok(left);
            };
            let right = self.parse_multiplicative(tok)?;
            left = self.binary(op, left, right)?;
        }
    }

    fn parse_multiplicative(&mut self, tok: &mut Tokenizer<'_>) -> UriResult<Expression> {
        let mut left = self.parse_unary(tok)?;
        loop {
            let op = if tok.next(TokenKind::Mul) {
                BinaryOperator::Mul
            } else if tok.next(TokenKind::DivBy) {
                BinaryOperator::DivBy
            } else if tok.next(TokenKind::Div) {
                BinaryOperator::Div
            } else if tok.next(TokenKind::Mod) {
                BinaryOperator::Mod
            } else {
                return Ok(left);
            };
            let right = self.parse_unary(tok)?;
            left = self.binary(op, left, right)?;
        }
    }

    fn parse_unary(&mut self, tok: &mut Tokenizer<'_>) -> UriResult<Expression> {
        let start = tok.position();
        if tok.next(TokenKind::Minus) {
            // `-5` is a negative literal, `-Age` a negation.
            tok.reset(start);
            if let Some(lit) = helper::next_literal(tok)? {
                return Ok(Expression::Literal(lit));
            }
            tok.next(TokenKind::Minus);
            let operand = self.descend(|p| p.parse_unary(tok))?;
            return self.unary(UnaryOperator::Minus, operand);
        }
        if tok.next(TokenKind::Not) {
            let operand = self.descend(|p| p.parse_unary(tok))?;
            return self.unary(UnaryOperator::Not, operand);
        }
        if tok.next(TokenKind::Call("not")) {
            tok.skip_ws();
            let operand = self.parse(tok)?;
            tok.skip_ws();
            expect(tok, TokenKind::Close, "')'")?;
            return self.unary(UnaryOperator::Not, operand);
        }
        self.parse_primary(tok)
    }

    fn unary(&self, op: UnaryOperator, operand: Expression) -> UriResult<Expression> {
        let ty = typecheck::unary_type(self.edm, op, &operand)?;
        Ok(Expression::Unary {
            op,
            operand: Box::new(operand),
            ty,
        })
    }

    fn parse_primary(&mut self, tok: &mut Tokenizer<'_>) -> UriResult<Expression> {
        if tok.next(TokenKind::Open) {
            tok.skip_ws();
            let inner = self.parse(tok)?;
            tok.skip_ws();
            expect(tok, TokenKind::Close, "')'")?;
            return Ok(inner);
        }
        if tok.next(TokenKind::Alias) {
            let name = tok.text().to_owned();
            return self.alias(name);
        }
        if let Some(lit) = helper::next_literal(tok)? {
            return Ok(Expression::Literal(lit));
        }
        if tok.next(TokenKind::Enum) {
            let text = tok.text();
            return self.enum_literal(text);
        }
        if tok.next(TokenKind::Keyword("$it")) {
            return self.member(tok, Start::It);
        }
        if tok.next(TokenKind::Keyword("$root")) {
            return self.member(tok, Start::Root);
        }
        for method in MethodKind::ALL {
            if tok.next(TokenKind::Call(method.name())) {
                return self.method(tok, method);
            }
        }
        if lookahead(tok, TokenKind::QualifiedName) || lookahead(tok, TokenKind::Identifier) {
            return self.member(tok, Start::Implicit);
        }
        Err(tok.error("expected expression"))
    }

    fn alias(&mut self, name: String) -> UriResult<Expression> {
        let Some(text) = self.aliases.get(&name) else {
            return Ok(Expression::Alias { name, value: None });
        };
        if self.resolving.contains(&name) {
            return Err(UriError::syntax(
                crate::error::SyntaxKey::Syntax,
                format!("alias '{name}' refers to itself"),
            ));
        }
        self.resolving.push(name.clone());
        let value = self.parse_text(text);
        self.resolving.pop();
        Ok(Expression::Alias {
            name,
            value: Some(Box::new(value?)),
        })
    }

    fn enum_literal(&self, text: &str) -> UriResult<Expression> {
        let (type_name, body) = text
            .split_once('\'')
            .ok_or_else(|| UriError::type_mismatch(format!("invalid enum literal '{text}'")))?;
        let body = body.strip_suffix('\'').unwrap_or(body);
        let enum_type = FullQualifiedName::parse(type_name)
            .and_then(|f| self.edm.enum_type(&f))
            .ok_or_else(|| {
                UriError::semantic(
                    SemanticKey::TypeNotFound,
                    format!("enum type '{type_name}' not found"),
                )
            })?;
        let members: Vec<String> = body.split(',').map(|m| m.trim().to_owned()).collect();
        if members.len() > 1 && !enum_type.is_flags {
            return Err(UriError::type_mismatch(format!(
                "'{}' is not a flags enum",
                enum_type.fqn
            )));
        }
        let mut value = 0;
        for m in &members {
            value |= enum_type.member_value(m).ok_or_else(|| {
                UriError::type_mismatch(format!("'{m}' is not a member of '{}'", enum_type.fqn))
            })?;
        }
        Ok(Expression::Enum {
            ty: enum_type.fqn.clone(),
            members,
            value,
        })
    }

    fn method(&mut self, tok: &mut Tokenizer<'_>, method: MethodKind) -> UriResult<Expression> {
        tok.skip_ws();
        let mut args = Vec::new();
        if !tok.next(TokenKind::Close) {
            loop {
                tok.skip_ws();
                let type_literal = if matches!(method, MethodKind::Cast | MethodKind::IsOf) {
                    self.type_literal(tok)
                } else {
                    None
                };
                let arg = match type_literal {
                    Some(t) => t,
                    None => self.parse(tok)?,
                };
                args.push(arg);
                tok.skip_ws();
                if tok.next(TokenKind::Comma) {
                    continue;
                }
                expect(tok, TokenKind::Close, "')'")?;
                break;
            }
        }
        let ty = typecheck::method_type(self.edm, method, &args)?;
        Ok(Expression::Method { method, args, ty })
    }

    /// A qualified type name standing alone as an argument.
    fn type_literal(&self, tok: &mut Tokenizer<'_>) -> Option<Expression> {
        let pos = tok.position();
        if tok.next(TokenKind::QualifiedName) {
            let ty = self.edm.resolve_type(tok.text());
            tok.skip_ws();
            let ends = lookahead(tok, TokenKind::Close) || lookahead(tok, TokenKind::Comma);
            if let (Some(ty), true) = (ty, ends) {
                return Some(Expression::TypeLiteral { ty });
            }
        }
        tok.reset(pos);
        None
    }

    /* ---------- member paths ---------- */

    fn member(&mut self, tok: &mut Tokenizer<'_>, start: Start) -> UriResult<Expression> {
        let mut member = Member {
            start: MemberStart::It,
            type_filter: None,
            path: Vec::new(),
        };
        let mut current = self.scope.it.clone();

        match start {
            Start::It => {
                let it = current.clone().ok_or_else(|| {
                    UriError::semantic(SemanticKey::PropertyNotFound, "'$it' has no type here")
                })?;
                member.path.push(UriResource::It {
                    ty: it.ty,
                    collection: it.collection,
                });
                if !tok.next(TokenKind::Slash) {
                    return Ok(Expression::Member(member));
                }
            }
            Start::Root => {
                member.start = MemberStart::Root;
                expect(tok, TokenKind::Slash, "'/' after $root")?;
                let segment = self.root_segment(tok)?;
                current = segment.type_info();
                member.path.push(segment);
                if !tok.next(TokenKind::Slash) {
                    return Ok(Expression::Member(member));
                }
            }
            Start::Implicit => {
                if let Some((segment, info)) = self.leading_variable(tok) {
                    if let UriResource::LambdaVariable { name, .. } = &segment {
                        member.start = MemberStart::LambdaVariable(name.clone());
                    }
                    member.path.push(segment);
                    current = Some(info);
                    if !tok.next(TokenKind::Slash) {
                        return Ok(Expression::Member(member));
                    }
                }
            }
        }

        loop {
            self.member_segment(tok, &mut member, &mut current)?;
            if !tok.next(TokenKind::Slash) {
                return Ok(Expression::Member(member));
            }
        }
    }

    /// Lambda variable or `$crossjoin` entity set at the start of a path.
    fn leading_variable(&self, tok: &mut Tokenizer<'_>) -> Option<(UriResource, TypeInfo)> {
        let pos = tok.position();
        if !tok.next(TokenKind::Identifier) {
            return None;
        }
        let name = tok.text();
        if let Some(info) = self.scope.lambda_variable(name) {
            let segment = UriResource::LambdaVariable {
                name: name.to_owned(),
                ty: info.ty.clone(),
                collection: info.collection,
            };
            return Some((segment, info.clone()));
        }
        if self.scope.crossjoin.iter().any(|s| s == name)
            && let Some(set) = self.edm.entity_set(name)
        {
            let segment = UriResource::EntitySet {
                name: set.name.clone(),
                entity_type: set.entity_type.clone(),
                keys: Vec::new(),
                type_filter: None,
            };
            let info = TypeInfo {
                ty: EdmType::Entity(set.entity_type.clone()),
                collection: true,
            };
            return Some((segment, info));
        }
        tok.reset(pos);
        None
    }

    fn root_segment(&mut self, tok: &mut Tokenizer<'_>) -> UriResult<UriResource> {
        expect(tok, TokenKind::Identifier, "entity set or singleton after $root")?;
        let name = tok.text();
        if let Some(set) = self.edm.entity_set(name) {
            let mut keys = Vec::new();
            if tok.next(TokenKind::Open) {
                keys = helper::parse_keys(self.edm, self.aliases, tok, &set.entity_type)?;
            }
            return Ok(UriResource::EntitySet {
                name: set.name.clone(),
                entity_type: set.entity_type.clone(),
                keys,
                type_filter: None,
            });
        }
        if let Some(singleton) = self.edm.singleton(name) {
            return Ok(UriResource::Singleton {
                name: singleton.name.clone(),
                entity_type: singleton.entity_type.clone(),
                type_filter: None,
            });
        }
        Err(UriError::semantic(
            SemanticKey::ResourceNotFound,
            format!("'{name}' is not an entity set or singleton"),
        ))
    }

    fn member_segment(
        &mut self,
        tok: &mut Tokenizer<'_>,
        member: &mut Member,
        current: &mut Option<TypeInfo>,
    ) -> UriResult<()> {
        let info = current.clone().ok_or_else(|| {
            UriError::semantic(
                SemanticKey::PropertyNotFound,
                "path cannot continue after this segment",
            )
        })?;

        if info.collection {
            if tok.next(TokenKind::Keyword("$count")) {
                member.path.push(UriResource::Count);
                *current = UriResource::Count.type_info();
                return Ok(());
            }
            if tok.next(TokenKind::Call("any")) {
                return self.lambda(tok, member, current, &info, false);
            }
            if tok.next(TokenKind::Call("all")) {
                return self.lambda(tok, member, current, &info, true);
            }
            if tok.next(TokenKind::QualifiedName) {
                let name = tok.text();
                return self.qualified(tok, name, member, current, &info);
            }
            return Err(UriError::semantic(
                SemanticKey::PropertyNotFound,
                "only $count, any, all or a type cast may follow a collection",
            ));
        }

        let Some(owner) = info.ty.structured().cloned() else {
            return Err(UriError::semantic(
                SemanticKey::PropertyNotFound,
                format!("'{}' has no properties", info.ty),
            ));
        };
        if tok.next(TokenKind::QualifiedName) {
            let name = tok.text();
            return self.qualified(tok, name, member, current, &info);
        }
        expect(tok, TokenKind::Identifier, "property name")?;
        let name = tok.text();

        let at_start = member.path.is_empty() && member.start == MemberStart::It;
        let segment = if let (true, Some(d)) = (at_start, self.scope.dynamic_property(name)) {
            UriResource::DynamicProperty {
                name: d.name.clone(),
                ty: d.ty.clone(),
            }
        } else if let Some(p) = self.edm.property(&owner, name) {
            helper::property_segment(p)
        } else if let Some(n) = self.edm.navigation_property(&owner, name) {
            UriResource::Navigation {
                name: n.name.clone(),
                target: n.target.clone(),
                collection: n.collection,
                keys: Vec::new(),
                type_filter: None,
            }
        } else if self
            .edm
            .structured_type(&owner)
            .is_some_and(|t| t.open_type)
        {
            UriResource::DynamicProperty {
                name: name.to_owned(),
                ty: None,
            }
        } else {
            return Err(UriError::semantic(
                SemanticKey::PropertyNotFound,
                format!("property '{name}' not found on '{owner}'"),
            ));
        };
        *current = segment.type_info();
        member.path.push(segment);
        Ok(())
    }

    /// Type cast or bound function after a path segment.
    fn qualified(
        &mut self,
        tok: &mut Tokenizer<'_>,
        name: &str,
        member: &mut Member,
        current: &mut Option<TypeInfo>,
        info: &TypeInfo,
    ) -> UriResult<()> {
        let fqn = FullQualifiedName::parse(name).ok_or_else(|| tok.error("invalid name"))?;
        let binding = info.ty.structured().cloned().ok_or_else(|| {
            UriError::semantic(
                SemanticKey::TypeNotFound,
                format!("'{name}' cannot follow a primitive value"),
            )
        })?;

        if tok.next(TokenKind::Open) {
            let parameters = self.function_parameters(tok)?;
            let names: Vec<&str> = parameters.iter().map(|p| p.name.as_str()).collect();
            let function = self
                .edm
                .bound_function(&fqn, &binding, info.collection, &names)
                .ok_or_else(|| helper::operation_not_found(self.edm, &fqn, &names))?;
            helper::check_parameters(self.edm, function, &parameters)?;
            let segment = UriResource::Function {
                function: function.fqn.clone(),
                import: None,
                parameters,
                return_type: function.return_type.clone(),
                keys: Vec::new(),
                type_filter: None,
            };
            *current = segment.type_info();
            member.path.push(segment);
            return Ok(());
        }

        let target = self.edm.structured_type(&fqn).ok_or_else(|| {
            UriError::semantic(SemanticKey::TypeNotFound, format!("type '{name}' not found"))
        })?;
        if !self.edm.is_compatible(&target.fqn, &binding) {
            return Err(UriError::semantic(
                SemanticKey::IncompatibleTypeFilter,
                format!("'{}' does not derive from '{binding}'", target.fqn),
            ));
        }
        let cast = target.fqn.clone();
        match member.path.last_mut() {
            None | Some(UriResource::It { .. } | UriResource::LambdaVariable { .. }) => {
                if member.type_filter.is_some() {
                    return Err(UriError::semantic(
                        SemanticKey::TypeFilterNotChainable,
                        format!("second type cast '{cast}'"),
                    ));
                }
                member.type_filter = Some(cast);
            }
            Some(last) => helper::set_type_filter(last, cast)?,
        }
        *current = Some(TypeInfo {
            ty: target.edm_type(),
            collection: info.collection,
        });
        Ok(())
    }

    fn lambda(
        &mut self,
        tok: &mut Tokenizer<'_>,
        member: &mut Member,
        current: &mut Option<TypeInfo>,
        info: &TypeInfo,
        all: bool,
    ) -> UriResult<()> {
        tok.skip_ws();
        if !all && tok.next(TokenKind::Close) {
            member.path.push(UriResource::Any {
                variable: None,
                expression: None,
            });
            *current = Some(TypeInfo {
                ty: EdmType::Primitive(odata_edm::PrimitiveKind::Boolean),
                collection: false,
            });
            return Ok(());
        }
        expect(tok, TokenKind::Identifier, "lambda variable")?;
        let variable = tok.text().to_owned();
        tok.skip_ws();
        expect(tok, TokenKind::Colon, "':'")?;
        tok.skip_ws();

        self.scope.lambda.push((
            variable.clone(),
            TypeInfo {
                ty: info.ty.clone(),
                collection: false,
            },
        ));
        let body = self.parse_boolean(tok);
        self.scope.lambda.pop();
        let body = Box::new(body?);

        tok.skip_ws();
        expect(tok, TokenKind::Close, "')'")?;
        let segment = if all {
            UriResource::All {
                variable,
                expression: body,
            }
        } else {
            UriResource::Any {
                variable: Some(variable),
                expression: Some(body),
            }
        };
        *current = segment.type_info();
        member.path.push(segment);
        Ok(())
    }

    /// `name=value,...` after an opening parenthesis, through the closing one.
    ///
    /// # Errors
    /// Syntax errors and errors in the value expressions.
    pub fn function_parameters(
        &mut self,
        tok: &mut Tokenizer<'_>,
    ) -> UriResult<Vec<FunctionParameter>> {
        let mut out: Vec<FunctionParameter> = Vec::new();
        tok.skip_ws();
        if tok.next(TokenKind::Close) {
            return Ok(out);
        }
        loop {
            tok.skip_ws();
            expect(tok, TokenKind::Identifier, "parameter name")?;
            let name = tok.text().to_owned();
            tok.skip_ws();
            expect(tok, TokenKind::EqualsSign, "'='")?;
            tok.skip_ws();
            let start = tok.position();
            let value = self.parse(tok)?;
            let text = tok.input()[start..tok.position()].trim().to_owned();
            if out.iter().any(|p| p.name == name) {
                return Err(tok.error(format!("parameter '{name}' given twice")));
            }
            out.push(FunctionParameter { name, value, text });
            tok.skip_ws();
            if tok.next(TokenKind::Comma) {
                continue;
            }
            expect(tok, TokenKind::Close, "')'")?;
            return Ok(out);
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use odata_edm::PrimitiveKind;

    fn edm() -> Edm {
        Edm::from_json(include_str!("../../../../testdata/demo/edm.json")).unwrap()
    }

    fn person_scope() -> Scope {
        Scope::for_type(
            EdmType::Entity(FullQualifiedName::new("Demo", "Person")),
            false,
        )
    }

    fn parse(edm: &Edm, text: &str) -> UriResult<Expression> {
        let aliases = BTreeMap::new();
        ExpressionParser::new(edm, &aliases, person_scope()).parse_text(text)
    }

    #[test]
    fn precedence_binds_and_tighter_than_or() {
        let edm = edm();
        let expr = parse(&edm, "Age gt 1 or Age lt 2 and Active eq true").unwrap();
        let Expression::Binary { op, right, .. } = expr else {
            panic!("expected binary");
        };
        assert_eq!(op, BinaryOperator::Or);
        assert!(matches!(
            *right,
            Expression::Binary {
                op: BinaryOperator::And,
                ..
            }
        ));
    }

    #[test]
    fn negative_literal_versus_negation() {
        let edm = edm();
        let lit = parse(&edm, "-5 lt Age").unwrap();
        let Expression::Binary { left, .. } = lit else {
            panic!("expected binary");
        };
        assert!(matches!(*left, Expression::Literal(_)));
        let neg = parse(&edm, "-Age lt 5").unwrap();
        let Expression::Binary { left, .. } = neg else {
            panic!("expected binary");
        };
        assert!(matches!(
            *left,
            Expression::Unary {
                op: UnaryOperator::Minus,
                ..
            }
        ));
    }

    #[test]
    fn arithmetic_promotes_types() {
        let edm = edm();
        let expr = parse(&edm, "Age add 1.5").unwrap();
        assert_eq!(
            expr.edm_type(),
            Some(EdmType::Primitive(PrimitiveKind::Decimal))
        );
        let expr = parse(&edm, "Age divby 2").unwrap();
        assert_eq!(
            expr.edm_type(),
            Some(EdmType::Primitive(PrimitiveKind::Decimal))
        );
    }

    #[test]
    fn type_mismatches_are_semantic_errors() {
        let edm = edm();
        for text in [
            "Name eq 5",
            "Active gt false",
            "Name add 1",
            "Age and true",
            "contains(Age,'1')",
            "HomeAddress gt null",
        ] {
            let err = parse(&edm, text).unwrap_err();
            assert_eq!(err.semantic_key(), Some(SemanticKey::TypeMismatch), "{text}");
        }
    }

    #[test]
    fn complex_and_navigation_paths() {
        let edm = edm();
        let expr = parse(&edm, "HomeAddress/City eq 'Oslo' and Manager/Name ne null").unwrap();
        let members = expr.members();
        assert_eq!(members[0].path_string(), "HomeAddress/City");
        assert_eq!(members[1].path_string(), "Manager/Name");
    }

    #[test]
    fn lambda_variables_are_scoped() {
        let edm = edm();
        let expr = parse(&edm, "Orders/any(o: o/Amount gt 100)").unwrap();
        let Expression::Member(m) = &expr else {
            panic!("expected member");
        };
        assert!(matches!(m.path.last(), Some(UriResource::Any { .. })));
        assert_eq!(
            expr.edm_type(),
            Some(EdmType::Primitive(PrimitiveKind::Boolean))
        );
        let err = parse(&edm, "Orders/any(o: o/Amount gt 1) and o/Amount gt 1").unwrap_err();
        assert_eq!(err.semantic_key(), Some(SemanticKey::PropertyNotFound));
    }

    #[test]
    fn primitive_collection_lambda() {
        let edm = edm();
        assert!(parse(&edm, "Tags/any(t: t eq 'vip')").is_ok());
        assert!(parse(&edm, "Tags/all(t: startswith(t,'a'))").is_ok());
        assert!(parse(&edm, "Tags/any()").is_ok());
    }

    #[test]
    fn count_after_collection() {
        let edm = edm();
        let expr = parse(&edm, "Orders/$count gt 2").unwrap();
        let m = expr.members()[0];
        assert!(matches!(m.path.last(), Some(UriResource::Count)));
        assert!(parse(&edm, "Manager/$count gt 2").is_err());
    }

    #[test]
    fn type_cast_on_it() {
        let edm = edm();
        let expr = parse(&edm, "Demo.Employee/Budget gt 100").unwrap();
        let m = expr.members()[0];
        assert_eq!(
            m.type_filter,
            Some(FullQualifiedName::new("Demo", "Employee"))
        );
        let err = parse(&edm, "Demo.Order/Amount gt 1").unwrap_err();
        assert_eq!(
            err.semantic_key(),
            Some(SemanticKey::IncompatibleTypeFilter)
        );
    }

    #[test]
    fn enum_literals_and_has() {
        let edm = edm();
        let expr = parse(&edm, "Permissions has Demo.Access'Read,Write'").unwrap();
        let Expression::Binary { right, .. } = expr else {
            panic!("expected binary");
        };
        let Expression::Enum { value, .. } = *right else {
            panic!("expected enum");
        };
        assert_eq!(value, 3);
        assert!(parse(&edm, "FavoriteColor eq D.Color'Red,Blue'").is_err());
        assert!(parse(&edm, "FavoriteColor eq D.Color'Green'").is_ok());
    }

    #[test]
    fn in_lists() {
        let edm = edm();
        assert!(parse(&edm, "Name in ('a','b')").is_ok());
        assert!(parse(&edm, "Name in ()").is_ok());
        assert!(parse(&edm, "Name in ('a',Email)").is_err());
    }

    #[test]
    fn methods_check_arity() {
        let edm = edm();
        assert!(parse(&edm, "substring(Name,1) eq 'x'").is_ok());
        assert!(parse(&edm, "substring(Name,1,2) eq 'x'").is_ok());
        assert!(parse(&edm, "substring(Name) eq 'x'").is_err());
        assert!(parse(&edm, "year(BirthDate) eq 2000").is_ok());
        assert!(parse(&edm, "Created lt now()").is_ok());
        assert!(parse(&edm, "round(Score) eq 2").is_ok());
    }

    #[test]
    fn cast_and_isof_take_type_literals() {
        let edm = edm();
        let expr = parse(&edm, "cast(Age,Edm.String) eq '5'").unwrap();
        assert!(expr.edm_type().is_some());
        assert!(parse(&edm, "isof(Demo.Employee)").is_ok());
        assert!(parse(&edm, "cast(Age,Name) eq '5'").is_err());
    }

    #[test]
    fn aliases_resolve_or_stay_null() {
        let edm = edm();
        let mut aliases = BTreeMap::new();
        aliases.insert("@n".to_owned(), "'Ann'".to_owned());
        aliases.insert("@loop".to_owned(), "@loop".to_owned());
        let mut p = ExpressionParser::new(&edm, &aliases, person_scope());
        let expr = p.parse_text("Name eq @n").unwrap();
        let Expression::Binary { right, .. } = expr else {
            panic!("expected binary");
        };
        assert!(matches!(*right, Expression::Alias { value: Some(_), .. }));
        assert!(p.parse_text("Name eq @missing").is_ok());
        assert!(p.parse_text("Name eq @loop").is_err());
    }

    #[test]
    fn not_accepts_parenthesised_form() {
        let edm = edm();
        assert!(parse(&edm, "not contains(Name,'x')").is_ok());
        assert!(parse(&edm, "not(Active)").is_ok());
        assert!(parse(&edm, "not Age").is_err());
    }

    #[test]
    fn root_paths() {
        let edm = edm();
        assert!(parse(&edm, "$root/People(1)/Name eq Name").is_ok());
        assert!(parse(&edm, "$root/Me/Name eq Name").is_ok());
    }
}
