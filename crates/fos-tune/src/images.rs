//! Image Optimizer
//!
//! Gives every image the host did not configure itself lazy loading and
//! async decoding, at install time and as images stream in.

use crate::error::{EngineError, require};
use fos_page::{Capability, Document, Host, MutationObserver, MutationRecord, Selector};
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use tracing::{debug, info};

pub struct ImageOptimizer {
    document: Rc<dyn Document>,
    images: Selector,
    watcher: RefCell<Option<Rc<dyn MutationObserver>>>,
    optimized: Cell<u64>,
}

impl ImageOptimizer {
    pub fn install(host: &Host) -> Result<Rc<Self>, EngineError> {
        let document = require(host.document(), Capability::Document)?;
        let optimizer = Rc::new(Self {
            document: document.clone(),
            images: Selector::parse("img")?,
            watcher: RefCell::new(None),
            optimized: Cell::new(0),
        });

        if let Some(mutations) = host.mutations() {
            let weak = Rc::downgrade(&optimizer);
            let watcher = mutations.observe_subtree(
                document.root(),
                Rc::new(move |records: &[MutationRecord]| {
                    if records.iter().any(|r| !r.added_nodes.is_empty()) {
                        if let Some(optimizer) = weak.upgrade() {
                            optimizer.optimize_all();
                        }
                    }
                }),
            );
            *optimizer.watcher.borrow_mut() = Some(watcher);
        }

        let count = optimizer.optimize_all();
        info!(count, "Image optimization installed");
        Ok(optimizer)
    }

    /// Tag unconfigured images. Returns how many were changed.
    pub fn optimize_all(&self) -> usize {
        let document = self.document.as_ref();
        let mut changed = 0;
        for image in document.query_all(&self.images) {
            if document.attribute(image, "loading").is_some() {
                continue;
            }
            let result = document.set_attribute(image, "loading", "lazy").and_then(|()| {
                if document.attribute(image, "decoding").is_none() {
                    document.set_attribute(image, "decoding", "async")?;
                }
                Ok(())
            });
            match result {
                Ok(()) => changed += 1,
                Err(err) => debug!(node = %image, "Cannot optimize image: {}", err),
            }
        }
        self.optimized.set(self.optimized.get() + changed as u64);
        changed
    }

    pub fn optimized_count(&self) -> u64 {
        self.optimized.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fos_page::HeadlessPage;

    #[test]
    fn test_tags_unconfigured_images() {
        let page = HeadlessPage::new();
        let root = page.root();
        let plain = page.element("img").attr("src", "a.png").append_to(root).unwrap();
        let eager = page
            .element("img")
            .attr("loading", "eager")
            .append_to(root)
            .unwrap();
        let sync = page
            .element("img")
            .attr("decoding", "sync")
            .append_to(root)
            .unwrap();

        let optimizer = ImageOptimizer::install(&page.host()).unwrap();

        assert_eq!(optimizer.optimized_count(), 2);
        assert_eq!(page.attribute(plain, "loading").as_deref(), Some("lazy"));
        assert_eq!(page.attribute(plain, "decoding").as_deref(), Some("async"));
        assert_eq!(page.attribute(eager, "loading").as_deref(), Some("eager"));
        assert_eq!(page.attribute(eager, "decoding"), None);
        assert_eq!(page.attribute(sync, "decoding").as_deref(), Some("sync"));
    }

    #[test]
    fn test_streamed_images() {
        let page = HeadlessPage::new();
        let optimizer = ImageOptimizer::install(&page.host()).unwrap();

        let message = page.element("div").append_to(page.root()).unwrap();
        let image = page.element("img").append_to(message).unwrap();
        page.flush();

        assert_eq!(page.attribute(image, "loading").as_deref(), Some("lazy"));
        assert_eq!(optimizer.optimized_count(), 1);
    }
}
