use std::sync::{Mutex, MutexGuard};

use futures::future::{BoxFuture, FutureExt};

use crate::{
    core::errors::{AppError, AppResult},
    document::{html, tree::DocumentTree},
    segmenter::address::{self, StructuralPath},
};

/// The displayed document as seen by the pipeline.
pub trait DocumentSurface: Send + Sync {
    /// Snapshot of the live document for one pipeline run.
    fn collect_tree(&self) -> BoxFuture<'_, AppResult<DocumentTree>>;

    /// Replaces the inner markup of the node at `path`. `Ok(false)` when the path no longer resolves.
    fn replace_markup<'a>(
        &'a self,
        path: &'a StructuralPath,
        html: &'a str,
    ) -> BoxFuture<'a, AppResult<bool>>;
}

/// In-process surface over a parsed HTML page.
pub struct HtmlSurface {
    tree: Mutex<DocumentTree>,
}

impl HtmlSurface {
    pub fn from_html(markup: &str) -> Self {
        Self::from_tree(html::parse_document(markup))
    }

    pub fn from_tree(tree: DocumentTree) -> Self {
        Self {
            tree: Mutex::new(tree),
        }
    }

    pub fn markup(&self) -> AppResult<String> {
        let tree = self.lock()?;
        Ok(tree.outer_markup(tree.root()))
    }

    /// Arena size of the live document.
    pub fn node_count(&self) -> AppResult<usize> {
        Ok(self.lock()?.len())
    }

    /// Inner markup of the node at `path`, if it resolves.
    pub fn markup_at(&self, path: &StructuralPath) -> AppResult<Option<String>> {
        let tree = self.lock()?;
        Ok(address::resolve(path, &tree).map(|id| tree.inner_markup(id)))
    }

    fn lock(&self) -> AppResult<MutexGuard<'_, DocumentTree>> {
        self.tree
            .lock()
            .map_err(|_| AppError::Surface("lock poisoned".to_string()))
    }
}

impl DocumentSurface for HtmlSurface {
    fn collect_tree(&self) -> BoxFuture<'_, AppResult<DocumentTree>> {
        let snapshot = self.lock().map(|tree| tree.clone());
        async move { snapshot }.boxed()
    }

    fn replace_markup<'a>(
        &'a self,
        path: &'a StructuralPath,
        markup: &'a str,
    ) -> BoxFuture<'a, AppResult<bool>> {
        let outcome = self.lock().map(|mut tree| match address::resolve(path, &tree) {
            Some(target) => {
                html::replace_inner_markup(&mut tree, target, markup);
                tree.compact();
                true
            }
            None => false,
        });
        async move { outcome }.boxed()
    }
}
