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

use crate::model::{ModelError, PrimType, TypeDecl, TypeDef, split_type_name};
use ahash::AHashMap;
use parking_lot::RwLock;
use std::sync::Arc;

#[derive(Default)]
struct Types {
    by_full: AHashMap<String, Arc<TypeDef>>,
    by_short: AHashMap<String, Arc<TypeDef>>,
    package_short: AHashMap<String, String>,
    package_full: AHashMap<String, String>,
}

/// The runtime's table of known types and package short names.
#[derive(Default)]
pub struct TypeRegistry {
    types: RwLock<Types>,
}

impl TypeRegistry {
    /// Record a full → short package mapping. Re-registering the same pair is a no-op.
    pub fn register_package(&self, full: &str, short: &str) -> Result<(), ModelError> {
        let mut types = self.types.write();
        match (types.package_short.get(full), types.package_full.get(short)) {
            (Some(s), _) if s == short => return Ok(()),
            (None, None) => {}
            _ => {
                return Err(ModelError::PackageConflict {
                    package: full.to_string(),
                    short: short.to_string(),
                });
            }
        }
        types
            .package_short
            .insert(full.to_string(), short.to_string());
        types
            .package_full
            .insert(short.to_string(), full.to_string());
        Ok(())
    }

    pub fn package_short(&self, full: &str) -> Option<String> {
        self.types.read().package_short.get(full).cloned()
    }

    pub fn package_full(&self, short: &str) -> Option<String> {
        self.types.read().package_full.get(short).cloned()
    }

    /// The short name `full` has or would get: its last segment, suffixed with a number when
    /// another package already claimed it.
    pub fn choose_package_short(&self, full: &str) -> String {
        let types = self.types.read();
        if let Some(short) = types.package_short.get(full) {
            return short.clone();
        }
        let base = full.rsplit('.').next().unwrap_or(full);
        if !types.package_full.contains_key(base) {
            return base.to_string();
        }
        (2..)
            .map(|n| format!("{base}{n}"))
            .find(|candidate| !types.package_full.contains_key(candidate))
            .unwrap_or_else(|| base.to_string())
    }

    /// Register a type. Its package must already be registered. Returns the definition and
    /// whether it was new; an identical re-declaration returns the existing one.
    pub fn define(&self, decl: TypeDecl) -> Result<(Arc<TypeDef>, bool), ModelError> {
        let (package, simple) = split_type_name(&decl.full_name);
        if PrimType::parse(simple).is_some() || simple.starts_with('[') {
            return Err(ModelError::ReservedTypeName(decl.full_name.clone()));
        }

        let mut types = self.types.write();
        if let Some(existing) = types.by_full.get(&decl.full_name) {
            if existing.matches_decl(&decl) {
                return Ok((existing.clone(), false));
            }
            return Err(ModelError::DuplicateType(decl.full_name.clone()));
        }

        let short_name = match package {
            Some(pkg) => {
                let pkg_short = types
                    .package_short
                    .get(pkg)
                    .ok_or_else(|| ModelError::UnknownPackage(pkg.to_string()))?;
                format!("{pkg_short}.{simple}")
            }
            None => simple.to_string(),
        };

        let supertype = match &decl.supertype {
            Some(name) => Some(
                types
                    .by_full
                    .get(name)
                    .cloned()
                    .ok_or_else(|| ModelError::UnknownType(name.clone()))?,
            ),
            None => None,
        };

        for (i, attr) in decl.attrs.iter().enumerate() {
            let inherited = supertype
                .as_ref()
                .is_some_and(|s| s.find_attr(&attr.name).is_some());
            let repeated = decl.attrs[..i].iter().any(|a| a.name == attr.name);
            if inherited || repeated {
                return Err(ModelError::ShadowedAttribute {
                    type_name: decl.full_name.clone(),
                    attr: attr.name.clone(),
                });
            }
            if let Some(inverse) = &attr.inverse
                && !attr.holds_refs()
            {
                return Err(ModelError::InvalidInverse {
                    attr: attr.name.clone(),
                    inverse: inverse.clone(),
                });
            }
        }

        let def = Arc::new(TypeDef {
            full_name: decl.full_name.clone(),
            short_name: short_name.clone(),
            package: package.map(str::to_string),
            supertype,
            attrs: decl.attrs,
        });
        types.by_full.insert(def.full_name.clone(), def.clone());
        types.by_short.insert(short_name, def.clone());
        Ok((def, true))
    }

    pub fn by_full(&self, full: &str) -> Option<Arc<TypeDef>> {
        self.types.read().by_full.get(full).cloned()
    }

    pub fn by_short(&self, short: &str) -> Option<Arc<TypeDef>> {
        self.types.read().by_short.get(short).cloned()
    }

    pub fn all(&self) -> Vec<Arc<TypeDef>> {
        self.types.read().by_full.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CollectionType, ElemType};

    fn registry() -> TypeRegistry {
        let registry = TypeRegistry::default();
        registry.register_package("acme.vehicles", "vehicles").unwrap();
        registry
    }

    #[test]
    fn test_short_names_follow_package() {
        let registry = registry();
        let (vehicle, created) = registry
            .define(TypeDecl::new("acme.vehicles.Vehicle").prim("speed", PrimType::Int))
            .unwrap();
        assert!(created);
        assert_eq!(vehicle.short_name, "vehicles.Vehicle");
        let (car, _) = registry
            .define(TypeDecl::new("acme.vehicles.Car").extends("acme.vehicles.Vehicle"))
            .unwrap();
        assert!(car.is_subtype_of("acme.vehicles.Vehicle"));
        assert!(registry.by_short("vehicles.Car").is_some());
        assert_eq!(car.find_attr("speed").unwrap().0.full_name, vehicle.full_name);
    }

    #[test]
    fn test_redeclaration() {
        let registry = registry();
        let decl = TypeDecl::new("acme.vehicles.Car").prim("speed", PrimType::Int);
        registry.define(decl.clone()).unwrap();
        let (_, created) = registry.define(decl).unwrap();
        assert!(!created);
        assert!(matches!(
            registry.define(TypeDecl::new("acme.vehicles.Car").prim("speed", PrimType::Float)),
            Err(ModelError::DuplicateType(_))
        ));
    }

    #[test]
    fn test_declaration_errors() {
        let registry = registry();
        assert!(matches!(
            registry.define(TypeDecl::new("other.Car")),
            Err(ModelError::UnknownPackage(_))
        ));
        assert!(matches!(
            registry.define(TypeDecl::new("acme.vehicles.Car").extends("acme.vehicles.Nope")),
            Err(ModelError::UnknownType(_))
        ));
        assert!(matches!(
            registry.define(
                TypeDecl::new("acme.vehicles.Car")
                    .many("tags", CollectionType::set(ElemType::Prim(PrimType::Str)))
                    .inverse("owner")
            ),
            Err(ModelError::InvalidInverse { .. })
        ));
        assert!(matches!(
            registry.define(TypeDecl::new("int")),
            Err(ModelError::ReservedTypeName(_))
        ));
    }

    #[test]
    fn test_package_short_disambiguation() {
        let registry = registry();
        assert_eq!(registry.choose_package_short("acme.vehicles"), "vehicles");
        assert_eq!(registry.choose_package_short("other.vehicles"), "vehicles2");
        registry.register_package("other.vehicles", "vehicles2").unwrap();
        assert_eq!(registry.choose_package_short("third.vehicles"), "vehicles3");
        assert!(registry.register_package("third.vehicles", "vehicles").is_err());
    }
}
