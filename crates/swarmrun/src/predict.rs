//! # Response Prediction
//!
//! Learns which requests always get the same answer, and answers them locally.
//!
//! Every completed round trip is recorded under the request's signature. Once
//! one response signature has been seen `threshold` times for a request, and
//! no other response was ever seen for it, the response itself is cached and
//! later identical requests never leave the process.
//!
//! ## Invariants
//! - A request that ever produced two different responses is never cached
//!   while its entry survives.
//! - Decay only moves state toward forgetting: counters drop by one per tick
//!   and vanish at zero; a cached entry falls back to counting one below the
//!   threshold, so the next observation re-caches it.

use std::collections::HashMap;

use swarmwire::Message;
use swarmwire::Signature;

enum Entry {
    Counting {
        counts: HashMap<Signature, u32>,
        /// Set once a second distinct response shows up.
        mixed: bool,
    },
    Cached(Message),
}

/// Per-service table of request signatures and what they tend to return.
///
/// A threshold of zero disables prediction entirely.
pub struct Predictor {
    threshold: u32,
    entries: HashMap<Signature, Entry>,
}

impl Predictor {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold,
            entries: HashMap::new(),
        }
    }

    /// Returns the cached response for `request`, if there is one.
    pub fn predict(&self, request: &Signature) -> Option<&Message> {
        match self.entries.get(request)? {
            Entry::Cached(response) => Some(response),
            Entry::Counting { .. } => None,
        }
    }

    /// Records that `request` was answered by `response`.
    ///
    /// Returns `true` when this observation promoted the entry into the cache.
    pub fn observe(&mut self, request: Signature, response: &Message) -> bool {
        if self.threshold == 0 {
            return false;
        }

        let response_sig = response.signature();
        let entry = self.entries.entry(request).or_insert_with(|| Entry::Counting {
            counts: HashMap::new(),
            mixed: false,
        });

        let Entry::Counting { counts, mixed } = entry else {
            return false;
        };

        if !counts.is_empty() && !counts.contains_key(&response_sig) {
            *mixed = true;
        }

        let count = counts.entry(response_sig).or_insert(0);
        *count += 1;

        if *mixed || *count < self.threshold {
            return false;
        }

        *entry = Entry::Cached(response.clone());
        true
    }

    /// Ages every entry by one step.
    pub fn decay(&mut self) {
        let reset = self.threshold.saturating_sub(1);

        self.entries.retain(|_, entry| match entry {
            Entry::Counting { counts, .. } => {
                counts.retain(|_, count| {
                    *count -= 1;
                    *count > 0
                });
                !counts.is_empty()
            }
            Entry::Cached(response) => {
                if reset == 0 {
                    return false;
                }
                let mut counts = HashMap::new();
                counts.insert(response.signature(), reset);
                *entry = Entry::Counting { counts, mixed: false };
                true
            }
        });
    }

    pub fn is_cached(&self, request: &Signature) -> bool {
        self.predict(request).is_some()
    }

    /// Number of request signatures currently tracked.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
