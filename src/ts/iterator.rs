// src/ts/iterator.rs

//! Forward iteration over transaction elements
//!
//! The iterator holds its own handle on the set, so the elements stay
//! reachable even if the caller drops every other handle mid-walk. The
//! cursor is forward-only; callers that need reverse order index the set
//! in reverse instead.

use crate::element::{Element, ElementType};
use crate::ts::TransactionSet;

/// Typed forward cursor over a set's element order
pub struct TsIter {
    ts: TransactionSet,
    oc: usize,
}

impl TsIter {
    pub(crate) fn new(ts: &TransactionSet) -> Self {
        Self {
            ts: ts.clone(),
            oc: 0,
        }
    }

    /// Next element whose type intersects `types`; an empty mask matches
    /// every element. `None` once the order is exhausted.
    pub fn next_typed(&mut self, types: ElementType) -> Option<Element> {
        while self.oc < self.ts.n_elements() {
            let element = self.ts.element(self.oc);
            self.oc += 1;
            let element = element?;
            if types.is_empty() || types.intersects(element.element_type()) {
                return Some(element);
            }
        }
        None
    }

    /// Index of the next element to be visited.
    pub fn position(&self) -> usize {
        self.oc
    }
}

impl Iterator for TsIter {
    type Item = Element;

    fn next(&mut self) -> Option<Element> {
        self.next_typed(ElementType::empty())
    }
}
