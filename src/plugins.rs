// src/plugins.rs

//! Plugin hook surface
//!
//! Plugins observe fixed points in a transaction's life: after the
//! transaction-scope run, around each per-element state machine, around
//! scriptlets, and at two file-level points during install. The core only
//! dispatches; it never interprets a hook result beyond success/failure,
//! with one exception: a file-install hook may report that it provided the
//! file contents itself, which short-circuits the default install path.

use crate::element::Element;
use crate::Result;
use std::io::Read;
use std::path::Path;
use tracing::{debug, error};

/// What a file-install hook did with the file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FileDisposition {
    /// Fall through to the default install path
    #[default]
    Default,
    /// The plugin wrote the contents; skip the default install
    PluginProvided,
}

/// A transaction plugin. Every hook has a do-nothing default so plugins
/// implement only the points they care about.
pub trait Plugin {
    fn name(&self) -> &str;

    /// After a transaction-set-scope operation completes; `rc` is its result.
    fn tsm_post(&mut self, rc: i32) -> Result<()> {
        let _ = rc;
        Ok(())
    }

    /// Before the per-element state machine runs an element.
    fn psm_pre(&mut self, element: &Element) -> Result<()> {
        let _ = element;
        Ok(())
    }

    /// After the per-element state machine; `rc` is the element result.
    fn psm_post(&mut self, element: &Element, rc: i32) -> Result<()> {
        let _ = (element, rc);
        Ok(())
    }

    /// Before a scriptlet runs.
    fn scriptlet_pre(&mut self, name: &str) -> Result<()> {
        let _ = name;
        Ok(())
    }

    /// After a scriptlet; `rc` is the scriptlet result.
    fn scriptlet_post(&mut self, name: &str, rc: i32) -> Result<()> {
        let _ = (name, rc);
        Ok(())
    }

    /// A file is about to be installed at `path` with `mode`.
    fn fsm_file_install(&mut self, path: &Path, mode: u32) -> Result<FileDisposition> {
        let _ = (path, mode);
        Ok(FileDisposition::Default)
    }

    /// Offer an alternative payload reader for an archive; `None` keeps the
    /// default reader.
    fn fsm_file_archive_reader(&mut self, payload: &Path) -> Result<Option<Box<dyn Read>>> {
        let _ = payload;
        Ok(None)
    }
}

/// Ordered plugin collection, dispatching each hook in registration order
#[derive(Default)]
pub struct PluginRegistry {
    plugins: Vec<Box<dyn Plugin>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, plugin: Box<dyn Plugin>) {
        debug!("registered plugin {}", plugin.name());
        self.plugins.push(plugin);
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Dispatch a hook to every plugin; the first failure stops the walk.
    fn call_each(
        &mut self,
        hook: &str,
        mut f: impl FnMut(&mut Box<dyn Plugin>) -> Result<()>,
    ) -> Result<()> {
        for plugin in &mut self.plugins {
            if let Err(e) = f(plugin) {
                error!("plugin {} failed in {}: {}", plugin.name(), hook, e);
                return Err(e);
            }
        }
        Ok(())
    }

    pub fn tsm_post(&mut self, rc: i32) -> Result<()> {
        self.call_each("tsm_post", |p| p.tsm_post(rc))
    }

    pub fn psm_pre(&mut self, element: &Element) -> Result<()> {
        self.call_each("psm_pre", |p| p.psm_pre(element))
    }

    pub fn psm_post(&mut self, element: &Element, rc: i32) -> Result<()> {
        self.call_each("psm_post", |p| p.psm_post(element, rc))
    }

    pub fn scriptlet_pre(&mut self, name: &str) -> Result<()> {
        self.call_each("scriptlet_pre", |p| p.scriptlet_pre(name))
    }

    pub fn scriptlet_post(&mut self, name: &str, rc: i32) -> Result<()> {
        self.call_each("scriptlet_post", |p| p.scriptlet_post(name, rc))
    }

    /// The first plugin that provides contents wins; later plugins are not
    /// consulted for this file.
    pub fn fsm_file_install(&mut self, path: &Path, mode: u32) -> Result<FileDisposition> {
        for plugin in &mut self.plugins {
            match plugin.fsm_file_install(path, mode) {
                Ok(FileDisposition::PluginProvided) => {
                    debug!(
                        "plugin {} provided contents for {}",
                        plugin.name(),
                        path.display()
                    );
                    return Ok(FileDisposition::PluginProvided);
                }
                Ok(FileDisposition::Default) => {}
                Err(e) => {
                    error!(
                        "plugin {} failed in fsm_file_install: {}",
                        plugin.name(),
                        e
                    );
                    return Err(e);
                }
            }
        }
        Ok(FileDisposition::Default)
    }

    /// The first plugin that offers a reader wins.
    pub fn fsm_file_archive_reader(&mut self, payload: &Path) -> Result<Option<Box<dyn Read>>> {
        for plugin in &mut self.plugins {
            if let Some(reader) = plugin.fsm_file_archive_reader(payload)? {
                return Ok(Some(reader));
            }
        }
        Ok(None)
    }
}
