//! Parsing entry point.

use std::fmt;

use graft_core::Point;
use tracing::debug;

use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::language::Language;
use crate::native::{Logger, ParseOptions};
use crate::tree::{TextInput, Tree};

/// Parses input with one language at a time.
pub struct Parser {
    engine: Engine,
    language: Option<Language>,
    logger: Option<Logger>,
}

impl Parser {
    pub(crate) fn new(engine: Engine) -> Self {
        Self {
            engine,
            language: None,
            logger: None,
        }
    }

    /// Select the language; its node class table is built here.
    pub fn set_language(&mut self, language: &Language) -> Result<&mut Self> {
        if !language.engine().ptr_eq(&self.engine) {
            return Err(Error::ForeignLanguage);
        }
        language.initialize_classes();
        self.language = Some(language.clone());
        Ok(self)
    }

    pub fn language(&self) -> Option<&Language> {
        self.language.as_ref()
    }

    /// Receive the engine's log messages during every later `parse`.
    pub fn set_logger(&mut self, logger: Option<Logger>) -> &mut Self {
        self.logger = logger;
        self
    }

    pub fn logger(&self) -> Option<&Logger> {
        self.logger.as_ref()
    }

    /// Parse `input`, reusing `old_tree` for an incremental reparse.
    pub fn parse(
        &mut self,
        input: impl Into<TextInput>,
        old_tree: Option<&Tree>,
        options: &ParseOptions,
    ) -> Result<Tree> {
        let language = self.language.clone().ok_or(Error::NoLanguage)?;
        if let Some(old) = old_tree
            && !old.engine().ptr_eq(&self.engine)
        {
            return Err(Error::ForeignTree);
        }

        let input = input.into();
        let buffer_size = options.get_buffer_size();
        let mut chunk = |offset: usize, position: Point| input.chunk(offset, position, buffer_size);
        let old = old_tree.map(Tree::id);
        let logger = self.logger.clone();
        let id = self.engine.with_native(|native| {
            native.set_logger(logger);
            native.parse(language.id(), &mut chunk, old, options)
        })?;

        debug!(
            tree = id.get(),
            language = language.id().get(),
            incremental = old.is_some(),
            "parsed tree"
        );
        Ok(Tree::new(self.engine.clone(), id, input, language))
    }
}

impl fmt::Debug for Parser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Parser")
            .field("engine", &self.engine)
            .field("language", &self.language)
            .field("logger", &self.logger.is_some())
            .finish()
    }
}
