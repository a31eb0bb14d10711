//! Binding generations
//!
//! Async engine results can arrive after the binding that asked for them was
//! released. Each binding carries an `EpochToken`; a result is acted on only
//! while its token is still current.

use std::cell::Cell;
use std::rc::Rc;

#[derive(Debug, Clone, Default)]
pub struct Epoch {
    current: Rc<Cell<u64>>,
}

impl Epoch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Invalidate every token issued so far
    pub fn advance(&self) {
        self.current.set(self.current.get() + 1);
    }

    pub fn token(&self) -> EpochToken {
        EpochToken {
            current: self.current.clone(),
            issued: self.current.get(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EpochToken {
    current: Rc<Cell<u64>>,
    issued: u64,
}

impl EpochToken {
    pub fn is_current(&self) -> bool {
        self.current.get() == self.issued
    }
}
