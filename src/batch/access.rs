//! Per-batch access decisions
//!
//! The caller does not change within a batch, so each (mode, privilege)
//! pair is evaluated once and the outcome, allowed or the error, is reused
//! for every later part that needs it.

use std::collections::HashMap;
use std::sync::Arc;

use crate::errors::CoreResult;
use crate::odata::{AccessChecker, AccessContext, AccessMode, Privilege};

pub struct BatchAccess {
    checker: Arc<dyn AccessChecker>,
    context: AccessContext,
    decisions: HashMap<(AccessMode, Privilege), CoreResult<()>>,
}

impl BatchAccess {
    pub fn new(checker: Arc<dyn AccessChecker>, context: AccessContext) -> Self {
        Self {
            checker,
            context,
            decisions: HashMap::new(),
        }
    }

    pub fn context(&self) -> &AccessContext {
        &self.context
    }

    /// Whole-batch check, not memoized.
    pub fn check_batch(&self) -> CoreResult<()> {
        self.checker.check_batch(&self.context)
    }

    pub fn check_read(&mut self, entity_set: &str) -> CoreResult<()> {
        self.check(entity_set, AccessMode::Read)
    }

    pub fn check_write(&mut self, entity_set: &str) -> CoreResult<()> {
        self.check(entity_set, AccessMode::Write)
    }

    fn check(&mut self, entity_set: &str, mode: AccessMode) -> CoreResult<()> {
        let privilege = self.checker.required_privilege(entity_set, mode);
        self.decisions
            .entry((mode, privilege))
            .or_insert_with(|| self.checker.check_privilege(&self.context, privilege))
            .clone()
    }
}
