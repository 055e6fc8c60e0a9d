//! Taint-tracking container for secret values.
//!
//! A `Classified<T>` carries a value but exposes no direct reader: its
//! display and debug representations are the fixed text `Classified(***)`.
//! Values enter the wrapper through `classify`, `read_classified` or a
//! classified chat call, and leave only through `write_classified`, a
//! classified chat call, or further transforms.

use std::fmt;

/// Opaque wrapper around a secret value of type `T`.
#[derive(Clone, PartialEq)]
pub struct Classified<T> {
    value: T,
}

impl<T> Classified<T> {
    pub fn new(value: T) -> Self {
        Self { value }
    }

    /// Transform the carried value. The function must be pure: when invoked
    /// from the scripting surface it runs under the purity guard, so any
    /// capability call inside it fails with a security error.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Classified<U> {
        Classified::new(f(self.value))
    }

    /// Like [`map`], for transforms that already produce a classified value.
    pub fn flat_map<U>(self, f: impl FnOnce(T) -> Classified<U>) -> Classified<U> {
        f(self.value)
    }

    /// Consume the wrapper. Crate-internal: the only legitimate sinks are
    /// `write_classified` and the classified chat overload.
    pub(crate) fn into_inner(self) -> T {
        self.value
    }

    pub(crate) fn inner(&self) -> &T {
        &self.value
    }
}

impl<T> fmt::Display for Classified<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Classified(***)")
    }
}

impl<T> fmt::Debug for Classified<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Classified(***)")
    }
}
