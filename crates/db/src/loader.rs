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

use crate::{DbError, Gateway};

/// Interface to whatever compiles and registers language packages. Fetch calls it when the store
/// names a type the runtime has not registered yet.
pub trait CodeLoader: Send + Sync {
    /// Load the package defining `full_type_name` and register its types, normally through
    /// `Gateway::define_type` on `gateway`.
    fn load_type(&self, full_type_name: &str, gateway: &Gateway) -> Result<(), DbError>;
}
