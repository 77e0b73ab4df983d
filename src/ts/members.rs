// src/ts/members.rs

//! Element membership for a transaction set
//!
//! Membership is carved out of the set so it can be emptied and refilled
//! without tearing the set down. The string pool lives here but is only
//! dropped when the whole record is destroyed; emptying keeps it, since
//! interned names may still be referenced by callers.

use crate::element::{Element, ElementType};
use crate::pool::StringPool;
use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;

/// Capabilities this implementation itself provides, matched by the
/// external solver against `granary(...)` dependencies.
const BUILTIN_CAPS: [&str; 4] = [
    "granary(CompressedPayload)",
    "granary(LargeFiles)",
    "granary(RichDependencies)",
    "granary(VersionedProvides)",
];

#[derive(Default)]
pub(crate) struct Members {
    /// Execution order; index is element identity
    pub order: Vec<Element>,
    /// Database offsets of records marked for erase
    pub removed: BTreeSet<u32>,
    /// Install elements by package name, for the external solver
    added_index: Option<BTreeMap<Rc<str>, Vec<Element>>>,
    /// Cached built-in capability set
    builtin: Option<Vec<String>>,
    /// Interning pool; survives `empty`, dropped only on destroy
    pool: Option<StringPool>,
}

impl Members {
    pub fn new() -> Self {
        Self::default()
    }

    /// The shared pool, created on first demand.
    pub fn pool(&mut self) -> StringPool {
        self.pool.get_or_insert_with(StringPool::new).clone()
    }

    pub fn has_pool(&self) -> bool {
        self.pool.is_some()
    }

    /// Append an element, maintaining the added index and erase bookkeeping.
    pub fn add(&mut self, element: Element) {
        if element.element_type() == ElementType::INSTALL {
            self.added_index
                .get_or_insert_with(BTreeMap::new)
                .entry(element.interned_name())
                .or_default()
                .push(element.clone());
        }
        if let Some(offset) = element.db_offset() {
            if element.element_type() == ElementType::ERASE {
                self.removed.insert(offset);
            }
        }
        self.order.push(element);
    }

    /// Install elements registered under `name`.
    pub fn added_with_name(&self, name: &str) -> Vec<Element> {
        self.added_index
            .as_ref()
            .and_then(|ix| ix.get(name))
            .cloned()
            .unwrap_or_default()
    }

    /// The built-in capability set, computed once.
    pub fn builtin_caps(&mut self) -> Vec<String> {
        self.builtin
            .get_or_insert_with(|| BUILTIN_CAPS.iter().map(|s| s.to_string()).collect())
            .clone()
    }

    /// Drop the per-element dependency caches, the added index and the
    /// built-in capability cache. Order is untouched.
    pub fn clean(&mut self) {
        for element in &self.order {
            element.clean_depends();
        }
        self.added_index = None;
        self.builtin = None;
    }

    /// Take every element out, clearing order and erase bookkeeping but
    /// keeping the pool. The caller dispatches delete events.
    pub fn take_all(&mut self) -> Vec<Element> {
        self.removed.clear();
        std::mem::take(&mut self.order)
    }

    /// Full teardown at set destruction; the pool goes too.
    pub fn destroy(&mut self) {
        self.clean();
        self.order.clear();
        self.removed.clear();
        self.pool = None;
    }
}
