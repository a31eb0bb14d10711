//! Identity-keyed memoization
//!
//! Derived data is rebuilt only when one of its inputs is a different
//! allocation. Inputs are compared by `Rc` pointer, never by value.

use std::rc::Rc;

/// Pointer identity for `Rc`, ignoring vtables of trait objects
pub fn same_rc<T: ?Sized>(a: &Rc<T>, b: &Rc<T>) -> bool {
    std::ptr::eq(Rc::as_ptr(a) as *const (), Rc::as_ptr(b) as *const ())
}

/// Dependencies compared by identity
pub trait Identity {
    fn same(&self, other: &Self) -> bool;
}

impl<T: ?Sized> Identity for Rc<T> {
    fn same(&self, other: &Self) -> bool {
        same_rc(self, other)
    }
}

impl<A: Identity, B: Identity> Identity for (A, B) {
    fn same(&self, other: &Self) -> bool {
        self.0.same(&other.0) && self.1.same(&other.1)
    }
}

pub struct Memo<D, V> {
    deps: Option<D>,
    value: Option<Rc<V>>,
}

impl<D: Identity, V> Memo<D, V> {
    pub fn new() -> Self {
        Self {
            deps: None,
            value: None,
        }
    }

    /// Cached value for `deps`, building it when any dependency changed
    pub fn get(&mut self, deps: D, build: impl FnOnce(&D) -> V) -> Rc<V> {
        if let (Some(prev), Some(value)) = (&self.deps, &self.value) {
            if prev.same(&deps) {
                return value.clone();
            }
        }

        let value = Rc::new(build(&deps));
        self.deps = Some(deps);
        self.value = Some(value.clone());
        value
    }
}

impl<D: Identity, V> Default for Memo<D, V> {
    fn default() -> Self {
        Self::new()
    }
}
