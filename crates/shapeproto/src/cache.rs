// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Protocol cache.
//!
//! Maps shape identity to its compiled [`Protocol`] and guarantees at most one
//! build per identity. Published protocols are served from a sharded map
//! without touching the build lock. A miss takes the build lock, marks the
//! identity as building by the current thread, and runs the build outside the
//! lock; concurrent callers for the same identity wait on a condvar until the
//! result is published.
//!
//! Builds started while the same thread is already building form one session.
//! A nested build that succeeds is staged, not published: the session publishes
//! everything at once when its outermost build succeeds and discards everything
//! when it fails, so a failed shape leaves no half-wired children behind.
//!
//! Two kinds of request must not wait:
//! - the building thread asking for its own identity again (a recursive shape);
//! - a thread whose wait would close a cycle of threads waiting on each other's
//!   builds (mutually recursive shapes built from two threads).
//!
//! Both receive a forward protocol that delegates to the real one once it is
//! published. Every protocol that embeds a forward is recorded as a dependent
//! of the forwarded identity; if that identity's build fails, its dependents
//! are evicted (or, when still unpublished, fail their own session).

use crate::descriptor::{ShapeId, TypeDescriptor};
use crate::error::{Error, Result};
use crate::protocol::Protocol;
use crate::schema::SchemaContext;
use crate::steps::ForwardCell;
use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};

/// Cache counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups served by an already published protocol.
    pub hits: u64,
    /// Successful builds (one per published identity).
    pub builds: u64,
    /// Forward protocols handed out to re-entrant or cyclic requests.
    pub deferred: u64,
    /// Builds that returned an error and were not cached.
    pub failures: u64,
    /// Published protocols dropped because a build they depend on failed.
    pub evicted: u64,
}

/// Nested builds of one thread, outermost first.
#[derive(Default)]
struct Session {
    stack: Vec<ShapeId>,
    staged: Vec<(ShapeId, Arc<Protocol>)>,
}

impl Session {
    fn staged(&self, id: &ShapeId) -> Option<Arc<Protocol>> {
        self.staged
            .iter()
            .find(|(staged, _)| staged == id)
            .map(|(_, p)| Arc::clone(p))
    }
}

#[derive(Default)]
struct BuildState {
    /// Identity -> thread currently building (or staging) it.
    building: HashMap<ShapeId, ThreadId>,
    /// Thread -> identity it is blocked on.
    waiting: HashMap<ThreadId, ShapeId>,
    /// Forward protocols handed out for identities not yet published.
    forwards: HashMap<ShapeId, (Arc<ForwardCell>, Arc<Protocol>)>,
    sessions: HashMap<ThreadId, Session>,
    /// Identity -> identities whose protocol embeds it.
    dependents: HashMap<ShapeId, HashSet<ShapeId>>,
    /// Unpublished identities that depend on a failed build, with its reason.
    poisoned: HashMap<ShapeId, String>,
}

impl BuildState {
    /// True if `owner` is (transitively) waiting on a build owned by `me`.
    fn waits_on(&self, owner: ThreadId, me: ThreadId) -> bool {
        let mut current = owner;
        // Each hop follows a distinct building thread
        for _ in 0..=self.building.len() {
            let Some(id) = self.waiting.get(&current) else {
                return false;
            };
            let Some(&next) = self.building.get(id) else {
                return false;
            };
            if next == me {
                return true;
            }
            current = next;
        }
        false
    }

    /// Record that the build `me` is running embeds `child`.
    fn link(&mut self, child: ShapeId, me: ThreadId) {
        let Some(&parent) = self.sessions.get(&me).and_then(|s| s.stack.last()) else {
            return;
        };
        if parent != child {
            self.dependents.entry(child).or_default().insert(parent);
        }
    }

    /// Pop `id` off `me`'s session; returns true if it was the outermost build.
    fn leave(&mut self, id: ShapeId, me: ThreadId) -> bool {
        let Some(session) = self.sessions.get_mut(&me) else {
            return true;
        };
        if let Some(pos) = session.stack.iter().rposition(|s| *s == id) {
            session.stack.truncate(pos);
        }
        session.stack.is_empty()
    }

    /// Drop `me`'s session, releasing every identity it staged.
    fn close(&mut self, me: ThreadId) -> Vec<(ShapeId, Arc<Protocol>)> {
        let staged = self
            .sessions
            .remove(&me)
            .map(|s| s.staged)
            .unwrap_or_default();
        for (id, _) in &staged {
            self.building.remove(id);
        }
        staged
    }
}

/// Identity-keyed store of compiled protocols.
pub struct ProtocolCache {
    ready: DashMap<ShapeId, Arc<Protocol>>,
    state: Mutex<BuildState>,
    published: Condvar,
    context: SchemaContext,
    /// Builds currently running on any thread.
    active: AtomicUsize,
    hits: AtomicU64,
    builds: AtomicU64,
    deferred: AtomicU64,
    failures: AtomicU64,
    evicted: AtomicU64,
}

impl ProtocolCache {
    pub(crate) fn new(context: SchemaContext) -> Self {
        Self {
            ready: DashMap::new(),
            state: Mutex::new(BuildState::default()),
            published: Condvar::new(),
            context,
            active: AtomicUsize::new(0),
            hits: AtomicU64::new(0),
            builds: AtomicU64::new(0),
            deferred: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            evicted: AtomicU64::new(0),
        }
    }

    /// Published protocol for `id`, if any.
    pub fn get(&self, id: &ShapeId) -> Option<Arc<Protocol>> {
        self.ready.get(id).map(|p| Arc::clone(p.value()))
    }

    pub fn len(&self) -> usize {
        self.ready.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ready.is_empty()
    }

    /// Snapshot of every published protocol.
    pub fn protocols(&self) -> Vec<Arc<Protocol>> {
        self.ready.iter().map(|p| Arc::clone(p.value())).collect()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            builds: self.builds.load(Ordering::Relaxed),
            deferred: self.deferred.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            evicted: self.evicted.load(Ordering::Relaxed),
        }
    }

    /// Return the protocol for `desc`, building it with `build` on first request.
    ///
    /// All callers for one identity observe the same instance. A caller that
    /// would deadlock by waiting gets a forward protocol instead.
    pub fn get_or_compile<F>(&self, desc: &Arc<TypeDescriptor>, build: F) -> Result<Arc<Protocol>>
    where
        F: FnOnce() -> Result<Protocol>,
    {
        let id = desc.id;
        // With no build running anywhere there is no dependency to record
        if self.active.load(Ordering::Acquire) == 0 {
            if let Some(hit) = self.get(&id) {
                self.record_hit(desc);
                return Ok(hit);
            }
        }

        let me = thread::current().id();
        let mut state = self.state.lock();
        loop {
            let staged = state.sessions.get(&me).and_then(|s| s.staged(&id));
            if let Some(hit) = staged.or_else(|| self.get(&id)) {
                state.link(id, me);
                drop(state);
                self.record_hit(desc);
                return Ok(hit);
            }
            let Some(&owner) = state.building.get(&id) else {
                break;
            };
            if owner == me || state.waits_on(owner, me) {
                state.link(id, me);
                let forward = self.forward(&mut state, desc);
                drop(state);
                self.deferred.fetch_add(1, Ordering::Relaxed);
                log::trace!("[ProtocolCache] deferred {} (build in progress)", desc.name);
                return Ok(forward);
            }
            state.waiting.insert(me, id);
            self.published.wait(&mut state);
            state.waiting.remove(&me);
        }
        state.link(id, me);
        state.building.insert(id, me);
        state.sessions.entry(me).or_default().stack.push(id);
        self.active.fetch_add(1, Ordering::AcqRel);
        drop(state);

        let mut guard = BuildGuard {
            cache: self,
            id,
            me,
            armed: true,
        };
        let result = build();
        guard.armed = false;
        self.active.fetch_sub(1, Ordering::AcqRel);

        let mut state = self.state.lock();
        let outermost = state.leave(id, me);
        let outcome = match (result, outermost) {
            (Ok(protocol), false) => {
                let protocol = Arc::new(protocol);
                if let Some(session) = state.sessions.get_mut(&me) {
                    session.staged.push((id, Arc::clone(&protocol)));
                }
                log::trace!("[ProtocolCache] staged {}", desc.name);
                // Waiters stay blocked until the session publishes
                return Ok(protocol);
            }
            (Ok(protocol), true) => self.finish(&mut state, desc, protocol, me),
            (Err(e), false) => {
                state.building.remove(&id);
                self.fail(&mut state, vec![id], &desc.name, &e);
                Err(e)
            }
            (Err(e), true) => {
                state.building.remove(&id);
                let mut abandoned: Vec<ShapeId> =
                    state.close(me).into_iter().map(|(s, _)| s).collect();
                abandoned.push(id);
                for s in &abandoned {
                    state.poisoned.remove(s);
                }
                self.fail(&mut state, abandoned, &desc.name, &e);
                Err(e)
            }
        };
        drop(state);
        self.published.notify_all();
        outcome
    }

    /// Publish a successful session, unless a build it depends on failed meanwhile.
    fn finish(
        &self,
        state: &mut BuildState,
        desc: &TypeDescriptor,
        protocol: Protocol,
        me: ThreadId,
    ) -> Result<Arc<Protocol>> {
        let id = desc.id;
        state.building.remove(&id);
        let mut staged = state.close(me);
        staged.push((id, Arc::new(protocol)));

        let poisoned = staged
            .iter()
            .find_map(|(s, _)| state.poisoned.get(s).cloned());
        for (s, _) in &staged {
            state.poisoned.remove(s);
        }
        if let Some(reason) = poisoned {
            let err = Error::invalid_shape(&desc.name, format!("depends on a failed build: {}", reason));
            self.fail(&mut *state, staged.into_iter().map(|(s, _)| s).collect(), &desc.name, &err);
            return Err(err);
        }

        let mut root = None;
        let count = staged.len();
        for (s, protocol) in staged {
            let published = Arc::clone(self.ready.entry(s).or_insert(protocol).value());
            if let Some((cell, _)) = state.forwards.remove(&s) {
                cell.fill(&published);
            }
            self.builds.fetch_add(1, Ordering::Relaxed);
            if s == id {
                root = Some(published);
            }
        }
        let root = root.ok_or_else(|| Error::invalid_shape(&desc.name, "session lost its root"))?;
        log::debug!(
            "[ProtocolCache] published {} ({} step(s), {} protocol(s))",
            desc.name,
            root.step_names().len(),
            count
        );
        Ok(root)
    }

    /// Account for failed identities and unwind everything built on their forwards.
    ///
    /// Forward cells stay registered so a later successful build fills them.
    fn fail(&self, state: &mut BuildState, failed: Vec<ShapeId>, name: &str, err: &Error) {
        self.failures.fetch_add(1, Ordering::Relaxed);
        log::warn!("[ProtocolCache] build of {} failed: {}", name, err);

        let reason = err.to_string();
        let mut queue = failed;
        let mut seen = HashSet::new();
        while let Some(id) = queue.pop() {
            if !seen.insert(id) {
                continue;
            }
            let Some(parents) = state.dependents.remove(&id) else {
                continue;
            };
            for parent in parents {
                if let Some((_, evicted)) = self.ready.remove(&parent) {
                    self.evicted.fetch_add(1, Ordering::Relaxed);
                    log::debug!("[ProtocolCache] evicted {} (depends on {})", evicted.name(), name);
                } else if state.building.contains_key(&parent) {
                    state.poisoned.insert(parent, reason.clone());
                }
                queue.push(parent);
            }
        }
    }

    /// Publish a ready-made protocol unless the identity already has one.
    pub(crate) fn publish(&self, protocol: Protocol) -> Arc<Protocol> {
        let id = protocol.id();
        let mut state = self.state.lock();
        let published = Arc::clone(
            self.ready
                .entry(id)
                .or_insert_with(|| Arc::new(protocol))
                .value(),
        );
        if let Some((cell, _)) = state.forwards.remove(&id) {
            cell.fill(&published);
        }
        drop(state);
        self.published.notify_all();
        published
    }

    fn forward(&self, state: &mut BuildState, desc: &Arc<TypeDescriptor>) -> Arc<Protocol> {
        let (_, forward) = state.forwards.entry(desc.id).or_insert_with(|| {
            let cell = Arc::new(ForwardCell::new(desc.name.clone()));
            let protocol = Protocol::forward(Arc::clone(desc), Arc::clone(&cell), self.context.clone());
            (cell, Arc::new(protocol))
        });
        Arc::clone(forward)
    }

    fn record_hit(&self, desc: &TypeDescriptor) {
        self.hits.fetch_add(1, Ordering::Relaxed);
        log::trace!("[ProtocolCache] hit {}", desc.name);
    }
}

impl std::fmt::Debug for ProtocolCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolCache")
            .field("published", &self.ready.len())
            .field("stats", &self.stats())
            .finish()
    }
}

/// Releases the building mark (and the whole session, if outermost) when a build panics.
struct BuildGuard<'a> {
    cache: &'a ProtocolCache,
    id: ShapeId,
    me: ThreadId,
    armed: bool,
}

impl Drop for BuildGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.cache.active.fetch_sub(1, Ordering::AcqRel);
            let mut state = self.cache.state.lock();
            state.building.remove(&self.id);
            if state.leave(self.id, self.me) {
                state.close(self.me);
            }
            drop(state);
            self.cache.published.notify_all();
        }
    }
}
