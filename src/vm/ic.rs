//! Inline caches for interface method dispatch.
//!
//! Each `invoke` call site owns a cache of the dynamic receiver types it has
//! seen and the method each one resolved to. A hit skips the runtime's
//! dispatch memo entirely.
use crate::ssa::{FuncId, TypeId};

/// Cache state for inline caches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    /// No receiver type recorded yet
    Uninitialized,
    /// Single receiver type observed (fastest path)
    Monomorphic,
    /// 2-4 receiver types observed
    Polymorphic,
    /// More than 4 receiver types observed (cache disabled)
    Megamorphic,
}

/// Inline cache for a single invoke site.
#[derive(Debug, Clone)]
pub struct InlineCache {
    cached_type: TypeId,
    cached_func: FuncId,
    pub state: CacheState,
    /// For polymorphic cache: additional type/method pairs
    poly_entries: Vec<(TypeId, FuncId)>,
}

impl InlineCache {
    pub fn new() -> Self {
        Self {
            cached_type: TypeId::NIL,
            cached_func: FuncId(0),
            state: CacheState::Uninitialized,
            poly_entries: Vec::new(),
        }
    }

    /// Returns the cached method for `ty`, if any.
    #[inline]
    pub fn check(&self, ty: TypeId) -> Option<FuncId> {
        match self.state {
            CacheState::Uninitialized | CacheState::Megamorphic => None,
            CacheState::Monomorphic => (self.cached_type == ty).then_some(self.cached_func),
            CacheState::Polymorphic => {
                if self.cached_type == ty {
                    return Some(self.cached_func);
                }
                self.poly_entries
                    .iter()
                    .find(|(t, _)| *t == ty)
                    .map(|(_, f)| *f)
            }
        }
    }

    /// Record a resolved method for `ty`.
    pub fn update(&mut self, ty: TypeId, func: FuncId) {
        match self.state {
            CacheState::Uninitialized => {
                self.cached_type = ty;
                self.cached_func = func;
                self.state = CacheState::Monomorphic;
            }
            CacheState::Monomorphic => {
                if self.cached_type != ty {
                    self.poly_entries.push((ty, func));
                    self.state = CacheState::Polymorphic;
                }
            }
            CacheState::Polymorphic => {
                if self.cached_type == ty || self.poly_entries.iter().any(|(t, _)| *t == ty) {
                    return;
                }
                if self.poly_entries.len() < 3 {
                    self.poly_entries.push((ty, func));
                } else {
                    self.state = CacheState::Megamorphic;
                    self.poly_entries.clear();
                }
            }
            CacheState::Megamorphic => {}
        }
    }
}

impl Default for InlineCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Inline caches for every invoke site in a program, indexed by site id.
#[derive(Debug, Clone, Default)]
pub struct InlineCacheTable {
    caches: Vec<InlineCache>,
}

impl InlineCacheTable {
    pub fn new(sites: usize) -> Self {
        Self {
            caches: vec![InlineCache::new(); sites],
        }
    }

    pub fn get(&self, site: u32) -> Option<&InlineCache> {
        self.caches.get(site as usize)
    }

    pub fn get_mut(&mut self, site: u32) -> Option<&mut InlineCache> {
        self.caches.get_mut(site as usize)
    }

    /// Number of sites per cache state, for statistics.
    pub fn census(&self) -> [usize; 4] {
        let mut out = [0; 4];
        for cache in &self.caches {
            let slot = match cache.state {
                CacheState::Uninitialized => 0,
                CacheState::Monomorphic => 1,
                CacheState::Polymorphic => 2,
                CacheState::Megamorphic => 3,
            };
            out[slot] += 1;
        }
        out
    }
}
