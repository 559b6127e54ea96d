// Copyright (C) 2025 Ryan Daum <ryan.daum@gmail.com> This program is free
// software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, version
// 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! Type and attribute declarations, as handed over by the type registry.

use crate::model::{ModelError, PrimType};
use std::fmt::{Display, Formatter};
use std::sync::Arc;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum CollectionKind {
    Set,
    List,
    SortedSet,
    SortedList,
    Map,
    SortedMap,
    StrMap,
}

impl CollectionKind {
    pub fn keyword(&self) -> &'static str {
        match self {
            CollectionKind::Set => "set",
            CollectionKind::List => "list",
            CollectionKind::SortedSet => "sortedset",
            CollectionKind::SortedList => "sortedlist",
            CollectionKind::Map => "map",
            CollectionKind::SortedMap => "sortedmap",
            CollectionKind::StrMap => "strmap",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let k = match s {
            "set" => CollectionKind::Set,
            "list" => CollectionKind::List,
            "sortedset" => CollectionKind::SortedSet,
            "sortedlist" => CollectionKind::SortedList,
            "map" => CollectionKind::Map,
            "sortedmap" => CollectionKind::SortedMap,
            "strmap" => CollectionKind::StrMap,
            _ => return None,
        };
        Some(k)
    }

    /// Kinds whose rows carry a dense `ord1` position.
    pub fn is_positional(&self) -> bool {
        matches!(
            self,
            CollectionKind::List | CollectionKind::SortedList | CollectionKind::SortedSet
        )
    }

    pub fn is_sorted(&self) -> bool {
        matches!(
            self,
            CollectionKind::SortedList | CollectionKind::SortedSet | CollectionKind::SortedMap
        )
    }

    pub fn is_map(&self) -> bool {
        matches!(
            self,
            CollectionKind::Map | CollectionKind::SortedMap | CollectionKind::StrMap
        )
    }

    pub fn is_set(&self) -> bool {
        matches!(self, CollectionKind::Set | CollectionKind::SortedSet)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum KeyType {
    Int,
    Str,
}

impl KeyType {
    pub fn name(&self) -> &'static str {
        match self {
            KeyType::Int => "int",
            KeyType::Str => "string",
        }
    }

    pub fn parse(s: &str) -> Result<Self, ModelError> {
        match s {
            "int" => Ok(KeyType::Int),
            "string" => Ok(KeyType::Str),
            other => Err(ModelError::UnsupportedMapKey(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ElemType {
    Prim(PrimType),
    /// Reference to an object; the string is the full name of the declared element type.
    Ref(String),
}

impl ElemType {
    pub fn is_ref(&self) -> bool {
        matches!(self, ElemType::Ref(_))
    }

    fn encode(&self) -> &str {
        match self {
            ElemType::Prim(p) => p.name(),
            ElemType::Ref(t) => t,
        }
    }

    fn parse(s: &str) -> Self {
        match PrimType::parse(s) {
            Some(p) => ElemType::Prim(p),
            None => ElemType::Ref(s.to_string()),
        }
    }
}

/// Kind, key and element type of a collection. Its descriptor string names both the
/// `Object.typeName` of an independent collection and its backing table.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CollectionType {
    kind: CollectionKind,
    key: Option<KeyType>,
    elem: ElemType,
}

impl CollectionType {
    pub fn new(
        kind: CollectionKind,
        key: Option<KeyType>,
        elem: ElemType,
    ) -> Result<Self, ModelError> {
        if elem == ElemType::Prim(PrimType::Mutex) {
            return Err(ModelError::InvalidDescriptor(
                "mutex values cannot be collection elements".to_string(),
            ));
        }
        let key = match (kind, key) {
            (CollectionKind::StrMap, None | Some(KeyType::Str)) => Some(KeyType::Str),
            (CollectionKind::StrMap, Some(other)) => {
                return Err(ModelError::UnsupportedMapKey(format!(
                    "{} keys on a string-keyed map",
                    other.name()
                )));
            }
            (CollectionKind::Map | CollectionKind::SortedMap, Some(k)) => Some(k),
            (CollectionKind::Map | CollectionKind::SortedMap, None) => {
                return Err(ModelError::InvalidDescriptor(format!(
                    "{} requires a key type",
                    kind.keyword()
                )));
            }
            (_, None) => None,
            (_, Some(_)) => {
                return Err(ModelError::InvalidDescriptor(format!(
                    "{} does not take a key type",
                    kind.keyword()
                )));
            }
        };
        Ok(Self { kind, key, elem })
    }

    pub fn set(elem: ElemType) -> Self {
        Self {
            kind: CollectionKind::Set,
            key: None,
            elem,
        }
    }

    pub fn list(elem: ElemType) -> Self {
        Self {
            kind: CollectionKind::List,
            key: None,
            elem,
        }
    }

    pub fn str_map(elem: ElemType) -> Self {
        Self {
            kind: CollectionKind::StrMap,
            key: Some(KeyType::Str),
            elem,
        }
    }

    pub fn kind(&self) -> CollectionKind {
        self.kind
    }

    pub fn key(&self) -> Option<KeyType> {
        self.key
    }

    pub fn elem(&self) -> &ElemType {
        &self.elem
    }

    /// e.g. `[list<int>]`, `[map<string,vehicles.Car>]`.
    pub fn descriptor(&self) -> String {
        match (self.kind, self.key) {
            (CollectionKind::StrMap, _) | (_, None) => {
                format!("[{}<{}>]", self.kind.keyword(), self.elem.encode())
            }
            (_, Some(k)) => format!(
                "[{}<{},{}>]",
                self.kind.keyword(),
                k.name(),
                self.elem.encode()
            ),
        }
    }

    pub fn parse(descriptor: &str) -> Result<Self, ModelError> {
        let invalid = || ModelError::InvalidDescriptor(descriptor.to_string());
        let body = descriptor
            .strip_prefix('[')
            .and_then(|s| s.strip_suffix(']'))
            .ok_or_else(invalid)?;
        let (kind, rest) = body.split_once('<').ok_or_else(invalid)?;
        let params = rest.strip_suffix('>').ok_or_else(invalid)?;
        let kind = CollectionKind::parse(kind).ok_or_else(invalid)?;
        let (key, elem) = match params.split_once(',') {
            Some((k, e)) => (Some(KeyType::parse(k.trim())?), e.trim()),
            None => (None, params.trim()),
        };
        if elem.is_empty() {
            return Err(invalid());
        }
        Self::new(kind, key, ElemType::parse(elem))
    }
}

impl Display for CollectionType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.descriptor())
    }
}

/// The decoded form of the `Object.typeName` column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeTag {
    Ordinary(String),
    Collection(CollectionType),
}

impl TypeTag {
    pub fn encode(&self) -> String {
        match self {
            TypeTag::Ordinary(short) => short.clone(),
            TypeTag::Collection(ct) => ct.descriptor(),
        }
    }

    pub fn parse(s: &str) -> Result<Self, ModelError> {
        if s.starts_with('[') {
            Ok(TypeTag::Collection(CollectionType::parse(s)?))
        } else {
            Ok(TypeTag::Ordinary(s.to_string()))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttrKind {
    /// Single-valued primitive, flattened into the type table.
    Prim(PrimType),
    /// Single-valued reference to an object of the named type.
    Ref(String),
    /// Multi-valued, backed by its own join table.
    Many(CollectionType),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttrDecl {
    pub name: String,
    pub kind: AttrKind,
    /// Attribute on the element type holding the other side of this relation.
    pub inverse: Option<String>,
}

impl AttrDecl {
    pub fn is_primitive(&self) -> bool {
        matches!(self.kind, AttrKind::Prim(_))
    }

    /// Whether the values of this attribute are object references.
    pub fn holds_refs(&self) -> bool {
        match &self.kind {
            AttrKind::Prim(_) => false,
            AttrKind::Ref(_) => true,
            AttrKind::Many(ct) => ct.elem().is_ref(),
        }
    }

    /// Full name of the referenced type, for reference-valued attributes.
    pub fn target_type(&self) -> Option<&str> {
        match &self.kind {
            AttrKind::Ref(t) => Some(t),
            AttrKind::Many(ct) => match ct.elem() {
                ElemType::Ref(t) => Some(t),
                ElemType::Prim(_) => None,
            },
            AttrKind::Prim(_) => None,
        }
    }
}

/// A type declaration as produced by the compiler, before registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeDecl {
    pub full_name: String,
    pub supertype: Option<String>,
    pub attrs: Vec<AttrDecl>,
}

impl TypeDecl {
    pub fn new(full_name: impl Into<String>) -> Self {
        Self {
            full_name: full_name.into(),
            supertype: None,
            attrs: vec![],
        }
    }

    #[must_use]
    pub fn extends(mut self, supertype: impl Into<String>) -> Self {
        self.supertype = Some(supertype.into());
        self
    }

    #[must_use]
    pub fn prim(self, name: &str, t: PrimType) -> Self {
        self.attr(name, AttrKind::Prim(t))
    }

    #[must_use]
    pub fn reference(self, name: &str, target: &str) -> Self {
        self.attr(name, AttrKind::Ref(target.to_string()))
    }

    #[must_use]
    pub fn many(self, name: &str, ct: CollectionType) -> Self {
        self.attr(name, AttrKind::Many(ct))
    }

    /// Declare an inverse for the most recently added attribute.
    #[must_use]
    pub fn inverse(mut self, inverse: &str) -> Self {
        if let Some(last) = self.attrs.last_mut() {
            last.inverse = Some(inverse.to_string());
        }
        self
    }

    fn attr(mut self, name: &str, kind: AttrKind) -> Self {
        self.attrs.push(AttrDecl {
            name: name.to_string(),
            kind,
            inverse: None,
        });
        self
    }
}

/// Split `a.b.Type` into (`Some("a.b")`, `"Type"`).
pub fn split_type_name(full_name: &str) -> (Option<&str>, &str) {
    match full_name.rsplit_once('.') {
        Some((pkg, name)) => (Some(pkg), name),
        None => (None, full_name),
    }
}

/// A registered type.
#[derive(Debug)]
pub struct TypeDef {
    pub full_name: String,
    /// `<package short name>.<type name>`; names the type table and `Object.typeName`.
    pub short_name: String,
    pub package: Option<String>,
    pub supertype: Option<Arc<TypeDef>>,
    pub attrs: Vec<AttrDecl>,
}

impl TypeDef {
    /// This type followed by its chain of supertypes.
    pub fn lattice(&self) -> impl Iterator<Item = &TypeDef> {
        std::iter::successors(Some(self), |t| t.supertype.as_deref())
    }

    /// Every attribute visible on this type, paired with the type that declares it.
    pub fn all_attrs(&self) -> impl Iterator<Item = (&TypeDef, &AttrDecl)> {
        self.lattice()
            .flat_map(|t| t.attrs.iter().map(move |a| (t, a)))
    }

    pub fn find_attr(&self, name: &str) -> Option<(&TypeDef, &AttrDecl)> {
        self.all_attrs().find(|(_, a)| a.name == name)
    }

    pub fn is_subtype_of(&self, full_name: &str) -> bool {
        self.lattice().any(|t| t.full_name == full_name)
    }

    /// Name of the join table backing `attr` as declared on this type.
    pub fn attribute_table(&self, attr: &str) -> String {
        format!("{}.{}", self.short_name, attr)
    }

    /// Whether `decl` describes the same shape as this registered type.
    pub fn matches_decl(&self, decl: &TypeDecl) -> bool {
        self.full_name == decl.full_name
            && self.supertype.as_ref().map(|s| s.full_name.as_str()) == decl.supertype.as_deref()
            && self.attrs == decl.attrs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_roundtrip() {
        let cases = [
            CollectionType::list(ElemType::Prim(PrimType::Int)),
            CollectionType::set(ElemType::Ref("vehicles.Car".to_string())),
            CollectionType::str_map(ElemType::Prim(PrimType::Time)),
            CollectionType::new(
                CollectionKind::SortedMap,
                Some(KeyType::Int),
                ElemType::Prim(PrimType::Str),
            )
            .unwrap(),
        ];
        for ct in cases {
            let descriptor = ct.descriptor();
            assert!(descriptor.starts_with('['));
            assert_eq!(CollectionType::parse(&descriptor).unwrap(), ct);
        }
    }

    #[test]
    fn test_unsupported_map_keys_rejected() {
        assert!(matches!(
            CollectionType::parse("[map<float,int>]"),
            Err(ModelError::UnsupportedMapKey(_))
        ));
        assert!(
            CollectionType::new(
                CollectionKind::StrMap,
                Some(KeyType::Int),
                ElemType::Prim(PrimType::Int)
            )
            .is_err()
        );
        assert!(
            CollectionType::new(CollectionKind::Map, None, ElemType::Prim(PrimType::Int)).is_err()
        );
    }

    #[test]
    fn test_type_tag_discriminates_on_bracket() {
        assert_eq!(
            TypeTag::parse("v.Car").unwrap(),
            TypeTag::Ordinary("v.Car".to_string())
        );
        let TypeTag::Collection(ct) = TypeTag::parse("[list<string>]").unwrap() else {
            panic!("expected a collection tag");
        };
        assert_eq!(ct.kind(), CollectionKind::List);
    }

    #[test]
    fn test_split_type_name() {
        assert_eq!(split_type_name("a.b.Car"), (Some("a.b"), "Car"));
        assert_eq!(split_type_name("Car"), (None, "Car"));
    }
}
