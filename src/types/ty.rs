use std::fmt;

/// Static types assigned by the checker.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    Null,
    Bool,
    Int,
    Double,
    String,
    List(Box<Type>),
    /// A map with string keys and values of the inner type.
    Map(Box<Type>),
    /// Statically unknown; checked at evaluation time.
    Dyn,
    /// The transaction record bound to the `txn` variable.
    Txn,
}

impl Type {
    #[must_use]
    pub fn list(elem: Type) -> Self {
        Type::List(Box::new(elem))
    }

    #[must_use]
    pub fn map(value: Type) -> Self {
        Type::Map(Box::new(value))
    }

    #[must_use]
    pub fn is_numeric(&self) -> bool {
        matches!(self, Type::Int | Type::Double)
    }

    #[must_use]
    pub fn is_dyn(&self) -> bool {
        matches!(self, Type::Dyn)
    }

    /// Whether a value of this type is statically allowed where `bool` is required.
    pub(crate) fn admits_bool(&self) -> bool {
        matches!(self, Type::Bool | Type::Dyn)
    }

    /// Whether `==` / `!=` between the two types can ever hold.
    pub(crate) fn is_equatable_with(&self, other: &Type) -> bool {
        match (self, other) {
            (Type::Dyn, _) | (_, Type::Dyn) | (Type::Null, _) | (_, Type::Null) => true,
            (a, b) if a.is_numeric() && b.is_numeric() => true,
            (Type::List(a), Type::List(b)) | (Type::Map(a), Type::Map(b)) => a.is_equatable_with(b),
            (Type::Txn, _) | (_, Type::Txn) => false,
            (a, b) => a == b,
        }
    }

    /// Whether `<`, `<=`, `>`, `>=` are defined between the two types.
    pub(crate) fn is_orderable_with(&self, other: &Type) -> bool {
        let orderable = |t: &Type| t.is_numeric() || matches!(t, Type::String | Type::Bool);
        match (self, other) {
            (Type::Dyn, t) | (t, Type::Dyn) => t.is_dyn() || orderable(t),
            (a, b) if a.is_numeric() && b.is_numeric() => true,
            (Type::String, Type::String) | (Type::Bool, Type::Bool) => true,
            _ => false,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Null => write!(f, "null_type"),
            Type::Bool => write!(f, "bool"),
            Type::Int => write!(f, "int"),
            Type::Double => write!(f, "double"),
            Type::String => write!(f, "string"),
            Type::List(elem) => write!(f, "list({elem})"),
            Type::Map(value) => write!(f, "map(string, {value})"),
            Type::Dyn => write!(f, "dyn"),
            Type::Txn => write!(f, "Txn"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display() {
        assert_eq!(Type::Bool.to_string(), "bool");
        assert_eq!(Type::list(Type::Int).to_string(), "list(int)");
        assert_eq!(Type::map(Type::Dyn).to_string(), "map(string, dyn)");
    }

    #[test]
    fn numeric_types_are_equatable() {
        assert!(Type::Int.is_equatable_with(&Type::Double));
        assert!(Type::Double.is_orderable_with(&Type::Int));
    }

    #[test]
    fn string_and_int_are_not_equatable() {
        assert!(!Type::String.is_equatable_with(&Type::Int));
        assert!(!Type::String.is_orderable_with(&Type::Int));
    }

    #[test]
    fn dyn_is_equatable_with_anything_but_orderable_only_with_scalars() {
        assert!(Type::Dyn.is_equatable_with(&Type::list(Type::Int)));
        assert!(Type::Dyn.is_orderable_with(&Type::String));
        assert!(!Type::Dyn.is_orderable_with(&Type::list(Type::Int)));
    }

    #[test]
    fn txn_is_not_equatable() {
        assert!(!Type::Txn.is_equatable_with(&Type::Txn));
    }
}
