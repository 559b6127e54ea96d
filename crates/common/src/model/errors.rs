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

use thiserror::Error;

/// Violations of the in-memory object model, raised before anything reaches the store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    #[error("Unknown attribute {attr} on type {type_name}")]
    UnknownAttribute { type_name: String, attr: String },
    #[error("Attribute {attr} expects {expected}, got {got}")]
    TypeMismatch {
        attr: String,
        expected: String,
        got: String,
    },
    #[error("Attribute {0} is not multi-valued")]
    NotACollection(String),
    #[error("Attribute {0} is multi-valued")]
    NotSingleValued(String),
    #[error("Collection {0} is not positional")]
    NotPositional(String),
    #[error("Operation {op} is not supported on {descriptor}")]
    WrongCollectionOp {
        descriptor: String,
        op: &'static str,
    },
    #[error("Index {index} out of range for collection of length {len}")]
    IndexOutOfRange { index: usize, len: usize },
    #[error("Type {0} is already declared with a different shape")]
    DuplicateType(String),
    #[error("Unknown type: {0}")]
    UnknownType(String),
    #[error("Unknown package: {0}")]
    UnknownPackage(String),
    #[error("Package {package} cannot take short name {short}")]
    PackageConflict { package: String, short: String },
    #[error("Unsupported map key type: {0}")]
    UnsupportedMapKey(String),
    #[error("Invalid inverse {inverse} on attribute {attr}")]
    InvalidInverse { attr: String, inverse: String },
    #[error("Invalid collection descriptor: {0}")]
    InvalidDescriptor(String),
    #[error("Attribute {attr} on {type_name} shadows an inherited attribute")]
    ShadowedAttribute { type_name: String, attr: String },
    #[error("Type name {0} collides with a primitive type")]
    ReservedTypeName(String),
}
