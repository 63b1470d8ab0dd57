// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2024 Jonathan Lee
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License version 3
// as published by the Free Software Foundation.
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.
// See the GNU Affero General Public License for more details.
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see https://www.gnu.org/licenses/.


use super::Conjure;

/// Types that carry a dispatch handle. Methods declared with [`conjure_fn!`](crate::conjure_fn)
/// become named calls through it.
///
/// ```no_run
/// use conjure::{conjure_fn, Conjure, ConjureBound};
///
/// struct Storyteller {
///     conjure: Conjure,
/// }
///
/// impl ConjureBound for Storyteller {
///     fn conjure(&self) -> &Conjure {
///         &self.conjure
///     }
/// }
///
/// impl Storyteller {
///     conjure_fn! {
///         pub fn opening_line();
///         pub fn villain_name(genre: &str) as "invent a villain name";
///     }
/// }
/// ```
pub trait ConjureBound {
    fn conjure(&self) -> &Conjure;
}

/// Declares methods that forward to a named call on the [`ConjureBound`] handle. The call
/// name defaults to the method name; `as "text"` overrides it.
#[macro_export]
macro_rules! conjure_fn {
    (@name $method:ident) => {
        stringify!($method)
    };
    (@name $method:ident $name:literal) => {
        $name
    };
    ($(
        $(#[$meta:meta])*
        $vis:vis fn $method:ident ( $($arg:ident : $ty:ty),* $(,)? ) $(as $name:literal)? ;
    )*) => {
        $(
            $(#[$meta])*
            $vis fn $method(&self $(, $arg: $ty)*) -> $crate::DeferredCall {
                $crate::ConjureBound::conjure(self).invoke(
                    $crate::conjure_fn!(@name $method $($name)?),
                    vec![$($crate::__json!($arg)),*],
                )
            }
        )*
    };
}
