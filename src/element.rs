// src/element.rs

//! Transaction elements
//!
//! An element is a single install or erase intent with its package header.
//! Elements are created through the owning transaction set, which interns
//! the package name in its shared string pool, and are handed around by
//! reference-counted handle; the external depsolver and runner hold them
//! across the life of the set.

use crate::header::Header;
use bitflags::bitflags;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

bitflags! {
    /// Element kinds, usable as an iteration filter mask
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ElementType: u32 {
        const INSTALL = 1 << 0;
        const ERASE = 1 << 1;
    }
}

#[derive(Debug)]
struct ElemInner {
    etype: ElementType,
    /// Interned package name; the pool outlives element removals
    name: Rc<str>,
    header: Header,
    /// Opaque caller key echoed through the notify callback
    key: Option<String>,
    /// Database record offset; always present for erases
    db_offset: Option<u32>,
    /// Dependency strings attached by the external solver
    depends: RefCell<Option<Vec<String>>>,
}

/// A shared handle to one transaction element
#[derive(Debug, Clone)]
pub struct Element {
    inner: Rc<ElemInner>,
}

impl Element {
    pub(crate) fn install(name: Rc<str>, header: Header, key: Option<&str>) -> Self {
        Self {
            inner: Rc::new(ElemInner {
                etype: ElementType::INSTALL,
                name,
                header,
                key: key.map(str::to_string),
                db_offset: None,
                depends: RefCell::new(None),
            }),
        }
    }

    pub(crate) fn erase(name: Rc<str>, header: Header, db_offset: u32) -> Self {
        Self {
            inner: Rc::new(ElemInner {
                etype: ElementType::ERASE,
                name,
                header,
                key: None,
                db_offset: Some(db_offset),
                depends: RefCell::new(None),
            }),
        }
    }

    pub fn element_type(&self) -> ElementType {
        self.inner.etype
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub(crate) fn interned_name(&self) -> Rc<str> {
        Rc::clone(&self.inner.name)
    }

    pub fn header(&self) -> &Header {
        &self.inner.header
    }

    pub fn key(&self) -> Option<&str> {
        self.inner.key.as_deref()
    }

    pub fn db_offset(&self) -> Option<u32> {
        self.inner.db_offset
    }

    pub fn nevra(&self) -> String {
        self.inner.header.nevra()
    }

    pub fn color(&self) -> u32 {
        self.inner.header.color
    }

    /// Attach solver dependency strings, replacing any previous set.
    pub fn set_depends(&self, depends: Vec<String>) {
        *self.inner.depends.borrow_mut() = Some(depends);
    }

    pub fn depends(&self) -> Option<Vec<String>> {
        self.inner.depends.borrow().clone()
    }

    /// Drop the solver dependency cache.
    pub(crate) fn clean_depends(&self) {
        *self.inner.depends.borrow_mut() = None;
    }

    /// Whether two handles refer to the same element.
    pub fn same(&self, other: &Element) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Display for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.nevra())
    }
}
