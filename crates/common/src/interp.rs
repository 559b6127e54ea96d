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

/// Hooks the storage layer calls on the interpreter thread it serves, around every point where
/// it may block: waiting for a pooled connection, and sleeping between contended retries.
///
/// `allow_gc` is called before blocking so the collector can run while the thread is parked;
/// `disallow_gc` is called once the thread resumes.
pub trait InterpThread: Send + Sync {
    fn allow_gc(&self);
    fn disallow_gc(&self);
}
