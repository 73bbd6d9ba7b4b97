use odata_edm::EdmType;

use crate::resource::TypeInfo;

/// Property added to the context type by a `$apply` alias.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DynamicProperty {
    pub name: String,
    pub ty: Option<EdmType>,
}

/// What names resolve against while parsing an expression.
#[derive(Debug, Clone, Default)]
pub struct Scope {
    /// Type of `$it`; `None` where no resource is addressed (`$all`).
    pub it: Option<TypeInfo>,
    pub dynamic: Vec<DynamicProperty>,
    /// Innermost lambda variable last.
    pub lambda: Vec<(String, TypeInfo)>,
    /// Entity sets usable as the first path segment in `$crossjoin`.
    pub crossjoin: Vec<String>,
}

impl Scope {
    #[must_use]
    pub fn for_type(ty: EdmType, collection: bool) -> Self {
        Self {
            it: Some(TypeInfo { ty, collection }),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn dynamic_property(&self, name: &str) -> Option<&DynamicProperty> {
        self.dynamic.iter().find(|d| d.name == name)
    }

    #[must_use]
    pub fn lambda_variable(&self, name: &str) -> Option<&TypeInfo> {
        self.lambda
            .iter()
            .rev()
            .find(|(n, _)| n == name)
            .map(|(_, t)| t)
    }

    pub fn add_dynamic(&mut self, name: String, ty: Option<EdmType>) {
        self.dynamic.retain(|d| d.name != name);
        self.dynamic.push(DynamicProperty { name, ty });
    }
}
