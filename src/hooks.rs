//! Lifecycle hooks
//!
//! Hooks are typed callbacks registered per event with a priority. Lower
//! priorities run first; equal priorities run in registration order. A
//! pre-hook that aborts (or, for finds, overrides the result) stops the
//! remaining pre-hooks of that event.

use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::entity::Row;
use crate::finder::Finder;
use crate::query::Query;

/// Priority used when none is given
pub const DEFAULT_PRIORITY: i32 = 10;

/// Result of a `pre_find` hook
#[derive(Debug, Clone, PartialEq)]
pub enum FindOutcome {
    Continue,
    /// Skip execution and use these rows instead (may be empty)
    Override(Vec<Row>),
    /// Skip execution and return an empty result
    Abort,
}

/// Result of a `pre_save` / `pre_delete` hook
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Continue,
    Abort,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveKind {
    Create,
    Update,
}

pub type PreFindHook = dyn Fn(&mut Query, &Finder) -> FindOutcome + Send + Sync;
pub type PostFindHook = dyn Fn(&mut Vec<Row>, &Finder) + Send + Sync;
pub type PreSaveHook = dyn Fn(Option<&Value>, &mut Row, SaveKind) -> Outcome + Send + Sync;
pub type PostSaveHook = dyn Fn(&Value, bool) + Send + Sync;
pub type PreDeleteHook = dyn Fn(&Value, &mut bool) -> Outcome + Send + Sync;
pub type PostDeleteHook = dyn Fn(&Value) + Send + Sync;

/// Registrations for one event, kept sorted by priority
struct HookList<F: ?Sized> {
    entries: Vec<(i32, Arc<F>)>,
}

impl<F: ?Sized> HookList<F> {
    fn insert(&mut self, priority: i32, hook: Arc<F>) {
        let at = self.entries.partition_point(|(p, _)| *p <= priority);
        self.entries.insert(at, (priority, hook));
    }

    fn iter(&self) -> impl Iterator<Item = &Arc<F>> {
        self.entries.iter().map(|(_, hook)| hook)
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

impl<F: ?Sized> Default for HookList<F> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<F: ?Sized> Clone for HookList<F> {
    fn clone(&self) -> Self {
        Self {
            entries: self.entries.clone(),
        }
    }
}

/// Hook registry of one repository
#[derive(Default, Clone)]
pub struct Hooks {
    pre_find: HookList<PreFindHook>,
    post_find: HookList<PostFindHook>,
    pre_save: HookList<PreSaveHook>,
    post_save: HookList<PostSaveHook>,
    pre_delete: HookList<PreDeleteHook>,
    post_delete: HookList<PostDeleteHook>,
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }

    // =========================================================================
    // Registration
    // =========================================================================

    pub fn on_pre_find<F>(&mut self, priority: i32, hook: F) -> &mut Self
    where
        F: Fn(&mut Query, &Finder) -> FindOutcome + Send + Sync + 'static,
    {
        self.pre_find.insert(priority, Arc::new(hook));
        self
    }

    pub fn on_post_find<F>(&mut self, priority: i32, hook: F) -> &mut Self
    where
        F: Fn(&mut Vec<Row>, &Finder) + Send + Sync + 'static,
    {
        self.post_find.insert(priority, Arc::new(hook));
        self
    }

    /// `hook(id, data, kind)`; `id` is `None` on create
    pub fn on_pre_save<F>(&mut self, priority: i32, hook: F) -> &mut Self
    where
        F: Fn(Option<&Value>, &mut Row, SaveKind) -> Outcome + Send + Sync + 'static,
    {
        self.pre_save.insert(priority, Arc::new(hook));
        self
    }

    /// `hook(id, created)`
    pub fn on_post_save<F>(&mut self, priority: i32, hook: F) -> &mut Self
    where
        F: Fn(&Value, bool) + Send + Sync + 'static,
    {
        self.post_save.insert(priority, Arc::new(hook));
        self
    }

    /// `hook(id, cascade)`; clearing `cascade` keeps dependents in place
    pub fn on_pre_delete<F>(&mut self, priority: i32, hook: F) -> &mut Self
    where
        F: Fn(&Value, &mut bool) -> Outcome + Send + Sync + 'static,
    {
        self.pre_delete.insert(priority, Arc::new(hook));
        self
    }

    pub fn on_post_delete<F>(&mut self, priority: i32, hook: F) -> &mut Self
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.post_delete.insert(priority, Arc::new(hook));
        self
    }

    /// Total number of registrations
    pub fn len(&self) -> usize {
        self.pre_find.len()
            + self.post_find.len()
            + self.pre_save.len()
            + self.post_save.len()
            + self.pre_delete.len()
            + self.post_delete.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // =========================================================================
    // Dispatch
    // =========================================================================

    pub fn pre_find(&self, query: &mut Query, finder: &Finder) -> FindOutcome {
        for hook in self.pre_find.iter() {
            match hook(query, finder) {
                FindOutcome::Continue => {}
                outcome => {
                    debug!(table = query.table(), finder = finder.name(), "pre_find short-circuited");
                    return outcome;
                }
            }
        }
        FindOutcome::Continue
    }

    pub fn post_find(&self, rows: &mut Vec<Row>, finder: &Finder) {
        for hook in self.post_find.iter() {
            hook(rows, finder);
        }
    }

    pub fn pre_save(&self, id: Option<&Value>, data: &mut Row, kind: SaveKind) -> Outcome {
        for hook in self.pre_save.iter() {
            if hook(id, data, kind) == Outcome::Abort {
                debug!(?kind, "pre_save vetoed");
                return Outcome::Abort;
            }
        }
        Outcome::Continue
    }

    pub fn post_save(&self, id: &Value, created: bool) {
        for hook in self.post_save.iter() {
            hook(id, created);
        }
    }

    pub fn pre_delete(&self, id: &Value, cascade: &mut bool) -> Outcome {
        for hook in self.pre_delete.iter() {
            if hook(id, cascade) == Outcome::Abort {
                debug!(%id, "pre_delete vetoed");
                return Outcome::Abort;
            }
        }
        Outcome::Continue
    }

    pub fn post_delete(&self, id: &Value) {
        for hook in self.post_delete.iter() {
            hook(id);
        }
    }
}

/// Reusable bundle of hooks, e.g. timestamps or soft deletion
pub trait Behavior: Send + Sync {
    fn name(&self) -> &str;

    /// Register this behavior's hooks
    fn attach(&self, hooks: &mut Hooks);
}
