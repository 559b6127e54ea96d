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

mod cache;
mod collection;
mod errors;
mod identity;
mod object;
mod registry;
mod types;
mod value;

pub use cache::ObjectCache;
pub use collection::{Collection, MapKey};
pub use errors::ModelError;
pub use identity::{FLAG_REVERSED, Identity, Uid};
pub use object::{Object, ObjectClass, Slot, WeakObject};
pub use registry::TypeRegistry;
pub use types::{
    AttrDecl, AttrKind, CollectionKind, CollectionType, ElemType, KeyType, TypeDecl, TypeDef,
    TypeTag, split_type_name,
};
pub use value::{Complex, ObjRef, PrimType, Timestamp, Value};
