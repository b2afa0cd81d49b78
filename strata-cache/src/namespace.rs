//! Physical key construction.
//!
//! Every region owns a namespace string (its name, optionally prefixed).
//! Data keys embed the namespace and the region's current generation, so
//! bumping the generation orphans every previously written key without
//! touching it. Metadata keys (generation counter, live key set, the
//! shared garbage queue) are reserved names that no caller key can forge.
//!
//! The reservation scheme rests on one invariant: [`sanitize`] doubles
//! every inner separator, so caller-derived text only ever contains even
//! runs of `?`. Reserved names and key tags use odd runs.

const SEPARATOR_INNER: char = '?';

/// Splits the namespace half of a data key from the sanitized caller key.
/// Sanitized text cannot contain this triplet: its `?` would be doubled.
const NAMESPACE_SEPARATOR: &str = "#?#";

/// What a lone inner separator becomes inside sanitized text.
const ESCAPED_INNER: &str = "??";

/// Shared FIFO of retired key-set names awaiting expiry. The odd `?` on
/// each side keeps it out of every sanitized namespace.
pub const GARBAGE_QUEUE_KEY: &str = "?RETIRED_KEY_SETS?";

/// Escape caller-supplied text for embedding into a physical key.
pub fn sanitize(raw: &str) -> String {
    raw.replace(SEPARATOR_INNER, ESCAPED_INNER)
}

/// Key builder for one region namespace.
#[derive(Debug, Clone)]
pub struct RegionNamespace {
    /// Sanitized namespace string. May be empty, in which case data keys
    /// degrade to bare sanitized caller keys.
    prefix: String,
    generation_key: String,
    keys_set_key: String,
}

impl RegionNamespace {
    pub fn new(namespace: &str) -> Self {
        let prefix = sanitize(namespace);
        // Reserved names start with a single (odd) inner separator.
        let reserved = format!("{SEPARATOR_INNER}{prefix}");
        let generation_key = format!("{reserved}_generation");
        let keys_set_key = format!("{reserved}_keys");
        Self {
            prefix,
            generation_key,
            keys_set_key,
        }
    }

    /// Key holding this region's generation counter.
    pub fn generation_key(&self) -> &str {
        &self.generation_key
    }

    /// Key of the set of all data keys written under the live generation.
    pub fn keys_set_key(&self) -> &str {
        &self.keys_set_key
    }

    /// Name the live key set retires under when the region is cleared.
    /// Tagged with the superseded generation so back-to-back clears never
    /// retire onto the same name.
    pub fn retired_set_key(&self, old_generation: i64) -> String {
        format!("retired_{}_{}", self.keys_set_key, old_generation)
    }

    /// Physical key for a caller key under the given generation.
    pub fn global_key(&self, generation: i64, key: &str) -> String {
        let sanitized = sanitize(key);
        if self.prefix.is_empty() {
            return sanitized;
        }
        format!(
            "{}_{}{}{}",
            self.prefix, generation, NAMESPACE_SEPARATOR, sanitized
        )
    }

    /// Lock key guarding a caller key. The odd-`?` tag keeps it disjoint
    /// from every data key.
    pub fn global_lock_key(&self, generation: i64, key: &str) -> String {
        format!("{}{}lock", self.global_key(generation, key), SEPARATOR_INNER)
    }

    /// Container key for the hash side cache kept next to a caller key.
    pub fn global_hash_key(&self, generation: i64, key: &str) -> String {
        format!("{}{}idx", self.global_key(generation, key), SEPARATOR_INNER)
    }
}
