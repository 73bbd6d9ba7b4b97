//! Which system query options each kind of addressed resource accepts.

use odata_edm::EdmType;
use serde::Serialize;

use crate::error::{UriError, UriResult, ValidationKey};
use crate::query_options::{Levels, QueryOptions};
use crate::resource::UriResource;
use crate::uri_info::{UriInfo, UriInfoKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SystemQueryOption {
    Filter,
    OrderBy,
    Select,
    Expand,
    Search,
    Apply,
    Top,
    Skip,
    Count,
    SkipToken,
    Format,
    Id,
    DeltaToken,
    /// Only inside `$expand`.
    Levels,
}

impl SystemQueryOption {
    /// Options accepted in the query string itself.
    pub const TOP_LEVEL: [Self; 13] = [
        Self::Filter,
        Self::OrderBy,
        Self::Select,
        Self::Expand,
        Self::Search,
        Self::Apply,
        Self::Top,
        Self::Skip,
        Self::Count,
        Self::SkipToken,
        Self::Format,
        Self::Id,
        Self::DeltaToken,
    ];

    /// Options accepted in the parentheses of an `$expand` item.
    pub const NESTED: [Self; 9] = [
        Self::Filter,
        Self::Select,
        Self::Expand,
        Self::OrderBy,
        Self::Search,
        Self::Top,
        Self::Skip,
        Self::Count,
        Self::Levels,
    ];

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Filter => "$filter",
            Self::OrderBy => "$orderby",
            Self::Select => "$select",
            Self::Expand => "$expand",
            Self::Search => "$search",
            Self::Apply => "$apply",
            Self::Top => "$top",
            Self::Skip => "$skip",
            Self::Count => "$count",
            Self::SkipToken => "$skiptoken",
            Self::Format => "$format",
            Self::Id => "$id",
            Self::DeltaToken => "$deltatoken",
            Self::Levels => "$levels",
        }
    }

    /// Top-level option by its query string name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::TOP_LEVEL.into_iter().find(|o| o.name() == name)
    }
}

/// Shape of the addressed resource, as far as option validation cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResourceKind {
    Service,
    Metadata,
    Batch,
    All,
    CrossJoin,
    EntityId,
    EntityCollection,
    Entity,
    Primitive,
    PrimitiveCollection,
    Complex,
    ComplexCollection,
    Count,
    Value,
    RefCollection,
    Ref,
    NoReturn,
}

impl ResourceKind {
    fn of(info: &UriInfo) -> Self {
        match info.kind {
            UriInfoKind::Service => return Self::Service,
            UriInfoKind::Metadata => return Self::Metadata,
            UriInfoKind::Batch => return Self::Batch,
            UriInfoKind::All => return Self::All,
            UriInfoKind::CrossJoin => return Self::CrossJoin,
            UriInfoKind::EntityId => return Self::EntityId,
            UriInfoKind::Resource => {}
        }
        let parts = &info.resource_parts;
        match parts.last() {
            None => Self::Service,
            Some(UriResource::Count) => Self::Count,
            Some(UriResource::Value) => Self::Value,
            Some(UriResource::Ref) => {
                let previous = parts.len().checked_sub(2).and_then(|i| parts.get(i));
                if previous.is_some_and(UriResource::is_collection) {
                    Self::RefCollection
                } else {
                    Self::Ref
                }
            }
            Some(last) => match last.type_info() {
                None => Self::NoReturn,
                Some(t) => match (t.ty, t.collection) {
                    (EdmType::Entity(_), true) => Self::EntityCollection,
                    (EdmType::Entity(_), false) => Self::Entity,
                    (EdmType::Complex(_), true) => Self::ComplexCollection,
                    (EdmType::Complex(_), false) => Self::Complex,
                    (_, true) => Self::PrimitiveCollection,
                    (_, false) => Self::Primitive,
                },
            },
        }
    }

    fn allowed(self) -> &'static [SystemQueryOption] {
        use SystemQueryOption as O;
        match self {
            Self::Service | Self::Metadata | Self::Primitive | Self::Value | Self::Ref => {
                &[O::Format]
            }
            Self::Batch | Self::NoReturn => &[],
            Self::All => &[
                O::Filter,
                O::Format,
                O::Count,
                O::OrderBy,
                O::Search,
                O::Select,
                O::Skip,
                O::SkipToken,
                O::Top,
            ],
            Self::CrossJoin => &[
                O::Filter,
                O::Format,
                O::Count,
                O::OrderBy,
                O::Search,
                O::Select,
                O::Skip,
                O::SkipToken,
                O::Top,
                O::Expand,
            ],
            Self::EntityId => &[O::Format, O::Id, O::Select, O::Expand],
            Self::EntityCollection => &[
                O::Filter,
                O::Format,
                O::Count,
                O::OrderBy,
                O::Search,
                O::Select,
                O::Skip,
                O::SkipToken,
                O::Top,
                O::Expand,
                O::Apply,
                O::DeltaToken,
            ],
            Self::Entity | Self::Complex => &[O::Format, O::Select, O::Expand],
            Self::PrimitiveCollection => &[
                O::Filter,
                O::Format,
                O::Count,
                O::OrderBy,
                O::Skip,
                O::Top,
            ],
            Self::ComplexCollection => &[
                O::Filter,
                O::Format,
                O::Count,
                O::OrderBy,
                O::Select,
                O::Skip,
                O::Top,
                O::Expand,
            ],
            Self::Count => &[O::Filter, O::Search, O::Apply],
            Self::RefCollection => &[
                O::Filter,
                O::Format,
                O::Count,
                O::OrderBy,
                O::Search,
                O::Skip,
                O::SkipToken,
                O::Top,
            ],
        }
    }
}

pub struct UriValidator;

impl UriValidator {
    /// Checks the options present in the request against the resource kind.
    ///
    /// # Errors
    /// `SystemQueryOptionNotAllowed` naming the first offending option.
    pub fn validate_options(info: &UriInfo, present: &[SystemQueryOption]) -> UriResult<()> {
        let kind = ResourceKind::of(info);
        let allowed = kind.allowed();
        match present.iter().find(|o| !allowed.contains(o)) {
            Some(option) => Err(UriError::validation(
                ValidationKey::SystemQueryOptionNotAllowed,
                format!("{} is not allowed for this resource", option.name()),
            )),
            None => Ok(()),
        }
    }

    /// Rejects `$expand` trees deeper than `max` and clamps `$levels=max`.
    ///
    /// # Errors
    /// `ExpandDepthExceeded`.
    pub fn validate_expand_depth(options: &mut QueryOptions, max: u32) -> UriResult<()> {
        let depth = expand_depth(options, max);
        if depth > max {
            return Err(UriError::validation(
                ValidationKey::ExpandDepthExceeded,
                format!("$expand depth {depth} exceeds the maximum of {max}"),
            ));
        }
        Ok(())
    }
}

fn expand_depth(options: &mut QueryOptions, max: u32) -> u32 {
    let Some(expand) = options.expand.as_mut() else {
        return 0;
    };
    let mut deepest = 0;
    for item in &mut expand.items {
        let own = match item.options.levels {
            None => 1,
            Some(Levels::Value(n)) => n,
            Some(Levels::Max) => {
                item.options.levels = Some(Levels::Value(max));
                max
            }
        };
        let nested = expand_depth(&mut item.options, max);
        deepest = deepest.max(own.saturating_add(nested));
    }
    deepest
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::query_options::{ExpandItem, ExpandOption};
    use odata_edm::{FullQualifiedName, PrimitiveKind};

    fn people() -> UriResource {
        UriResource::EntitySet {
            name: "People".into(),
            entity_type: FullQualifiedName::new("Demo", "Person"),
            keys: Vec::new(),
            type_filter: None,
        }
    }

    fn info(parts: Vec<UriResource>) -> UriInfo {
        let mut info = UriInfo::new(UriInfoKind::Resource);
        info.resource_parts = parts;
        info
    }

    #[test]
    fn option_names_round_trip() {
        for option in SystemQueryOption::TOP_LEVEL {
            assert_eq!(SystemQueryOption::from_name(option.name()), Some(option));
        }
        assert_eq!(SystemQueryOption::from_name("$levels"), None);
        assert_eq!(SystemQueryOption::from_name("$foo"), None);
    }

    #[test]
    fn collections_accept_paging_but_counts_do_not() {
        let collection = info(vec![people()]);
        UriValidator::validate_options(
            &collection,
            &[SystemQueryOption::Top, SystemQueryOption::Apply],
        )
        .unwrap();

        let count = info(vec![people(), UriResource::Count]);
        let err = UriValidator::validate_options(&count, &[SystemQueryOption::Top]).unwrap_err();
        assert!(matches!(
            err,
            UriError::Validation {
                key: ValidationKey::SystemQueryOptionNotAllowed,
                ..
            }
        ));
        UriValidator::validate_options(&count, &[SystemQueryOption::Filter]).unwrap();
    }

    #[test]
    fn primitive_properties_only_take_format() {
        let name = info(vec![
            people(),
            UriResource::PrimitiveProperty {
                name: "Name".into(),
                ty: EdmType::Primitive(PrimitiveKind::String),
                collection: false,
            },
        ]);
        UriValidator::validate_options(&name, &[SystemQueryOption::Format]).unwrap();
        assert!(UriValidator::validate_options(&name, &[SystemQueryOption::Select]).is_err());
        assert!(
            UriValidator::validate_options(
                &UriInfo::new(UriInfoKind::Batch),
                &[SystemQueryOption::Format]
            )
            .is_err()
        );
    }

    fn expand_with(levels: Option<Levels>, nested: QueryOptions) -> QueryOptions {
        let mut inner = nested;
        inner.levels = levels;
        QueryOptions {
            expand: Some(ExpandOption {
                items: vec![ExpandItem {
                    options: inner,
                    ..ExpandItem::default()
                }],
            }),
            ..QueryOptions::default()
        }
    }

    #[test]
    fn expand_depth_counts_levels_and_nesting() {
        let mut two = expand_with(None, expand_with(None, QueryOptions::default()));
        UriValidator::validate_expand_depth(&mut two, 2).unwrap();
        assert!(UriValidator::validate_expand_depth(&mut two, 1).is_err());

        let mut levels = expand_with(Some(Levels::Value(3)), QueryOptions::default());
        assert!(UriValidator::validate_expand_depth(&mut levels, 2).is_err());
    }

    #[test]
    fn levels_max_is_clamped() {
        let mut options = expand_with(Some(Levels::Max), QueryOptions::default());
        UriValidator::validate_expand_depth(&mut options, 4).unwrap();
        let levels = options.expand.unwrap().items[0].options.levels;
        assert_eq!(levels, Some(Levels::Value(4)));
    }
}
