//! The engine context: native handle plus the shared transfer buffer.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use tracing::warn;

use crate::cache::NodeCache;
use crate::error::Result;
use crate::invariants::ensure_idle;
use crate::language::Language;
use crate::native::{LanguageId, Native};
use crate::parser::Parser;
use crate::query::Query;
use crate::transfer::{Exchange, TransferBuffer};

/// Owns a native engine and the transfer buffer every crossing goes through.
///
/// Cheap to clone. Deliberately `!Send + !Sync`: the single-slot protocol has
/// no room for a second thread.
#[derive(Clone)]
pub struct Engine(Rc<EngineInner>);

struct EngineInner {
    native: RefCell<Box<dyn Native>>,
    buffer: RefCell<TransferBuffer>,
}

impl Engine {
    pub fn new(native: impl Native + 'static) -> Self {
        Self(Rc::new(EngineInner {
            native: RefCell::new(Box::new(native)),
            buffer: RefCell::new(TransferBuffer::new()),
        }))
    }

    /// Load the metadata tables of a registered language.
    pub fn language(&self, id: LanguageId) -> Result<Language> {
        let tables = self.with_native(|native| native.language_tables(id))?;
        Ok(Language::new(self.clone(), id, tables))
    }

    pub fn parser(&self) -> Parser {
        Parser::new(self.clone())
    }

    /// Compile a query for `language`.
    pub fn query(&self, language: &Language, source: &str) -> Result<Query> {
        Query::new(self, language, source)
    }

    pub fn ptr_eq(&self, other: &Engine) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Run one marshal → native call → unmarshal sequence.
    ///
    /// Panics if another crossing is already in progress.
    pub(crate) fn exchange<R>(
        &self,
        cache: Option<&NodeCache>,
        f: impl FnOnce(&mut dyn Native, &mut Exchange<'_>) -> R,
    ) -> R {
        let mut native = ensure_idle(self.0.native.try_borrow_mut());
        let mut buffer = ensure_idle(self.0.buffer.try_borrow_mut());
        let mut exchange = Exchange::new(&mut buffer, cache);
        f(native.as_mut(), &mut exchange)
    }

    /// Call the native engine without touching the transfer buffer.
    pub(crate) fn with_native<R>(&self, f: impl FnOnce(&mut dyn Native) -> R) -> R {
        let mut native = ensure_idle(self.0.native.try_borrow_mut());
        f(native.as_mut())
    }

    /// Release a native resource from a destructor.
    ///
    /// Destructors can run in the middle of a crossing; the resource is then
    /// leaked instead of panicking inside `drop`.
    pub(crate) fn release(&self, what: &str, id: u32, f: impl FnOnce(&mut dyn Native)) {
        match self.0.native.try_borrow_mut() {
            Ok(mut native) => f(native.as_mut()),
            Err(_) => warn!(what, id, "engine busy, native resource not released"),
        }
    }

    #[cfg(test)]
    pub(crate) fn buffer_capacity_in_nodes(&self) -> usize {
        self.0.buffer.borrow().capacity_in_nodes()
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("ptr", &Rc::as_ptr(&self.0))
            .finish()
    }
}
