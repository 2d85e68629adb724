use md5::{Digest, Md5};
use std::sync::Arc;

/// Default virtual-node replica count when none (or a non-positive value) is configured.
pub const DEFAULT_VNODES: u32 = 211;

/// Immutable consistent-hash ring over a set of instance strings.
///
/// Built once from a snapshot of instances; updates produce a new `Ring`
/// rather than mutating this one. Two rings built from equal instance sets
/// with equal `vnodes` always agree on every lookup, regardless of the order
/// instances were supplied in (§3, §4.1 of the spec).
#[derive(Debug, Clone)]
pub struct Ring {
    instances: Vec<Arc<str>>,
    vnodes: u32,
    slots: Vec<(u64, Arc<str>)>,
}

impl Ring {
    /// Build a ring from an instance list and a vnode count. `vnodes <= 0` is
    /// normalized to `DEFAULT_VNODES`.
    pub fn build<I, S>(instances: I, vnodes: i64) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let vnodes = if vnodes > 0 {
            vnodes as u32
        } else {
            DEFAULT_VNODES
        };

        let mut sorted: Vec<String> = instances.into_iter().map(Into::into).collect();
        sorted.sort();
        sorted.dedup();
        let instances: Vec<Arc<str>> = sorted.into_iter().map(Arc::from).collect();

        let mut slots: Vec<(u64, Arc<str>)> = Vec::with_capacity(instances.len() * vnodes as usize);
        for inst in &instances {
            for replica in 0..vnodes {
                let h = hash_vnode(inst, replica);
                slots.push((h, Arc::clone(inst)));
            }
        }
        // Stable sort: ties (identical hash from distinct entries) keep
        // insertion order, matching the spec's determinism requirement.
        slots.sort_by(|a, b| a.0.cmp(&b.0));

        Self {
            instances,
            vnodes,
            slots,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn vnodes(&self) -> u32 {
        self.vnodes
    }

    pub fn instances(&self) -> &[Arc<str>] {
        &self.instances
    }

    /// Locate the instance owning `key`. Binary search for the first slot
    /// whose hash is `>= hash(key)`, wrapping to slot 0 when `key` hashes
    /// past the last slot.
    pub fn get(&self, key: &[u8]) -> Option<Arc<str>> {
        if self.slots.is_empty() {
            return None;
        }
        let h = hash_key(key);
        let idx = match self.slots.binary_search_by(|(slot_hash, _)| slot_hash.cmp(&h)) {
            Ok(i) => i,
            Err(i) => i,
        };
        let idx = if idx >= self.slots.len() { 0 } else { idx };
        Some(Arc::clone(&self.slots[idx].1))
    }
}

fn hash_vnode(instance: &str, replica: u32) -> u64 {
    let mut buf = String::with_capacity(instance.len() + 12);
    buf.push_str(instance);
    buf.push('#');
    buf.push_str(&replica.to_string());
    hash_key(buf.as_bytes())
}

/// Fixed 64-bit hash construction: MD5 digest, folded to the first 8 bytes,
/// big-endian. Deterministic across processes and platforms, matching the
/// spec's requirement that the hash be a fixed construction (§4.1).
fn hash_key(data: &[u8]) -> u64 {
    let mut hasher = Md5::new();
    hasher.update(data);
    let digest = hasher.finalize();
    u64::from_be_bytes(digest[0..8].try_into().expect("md5 digest is 16 bytes"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_ring_has_no_members() {
        let ring = Ring::build(Vec::<String>::new(), 100);
        assert!(ring.get(b"anything").is_none());
    }

    #[test]
    fn single_instance_always_wins() {
        let ring = Ring::build(vec!["https://example.com"], 123);
        for key in ["a", "alsdkjfa", "asdf8974", "875kjh4", "928375"] {
            assert_eq!(ring.get(key.as_bytes()).as_deref(), Some("https://example.com"));
        }
    }

    #[test]
    fn order_of_insertion_is_irrelevant() {
        let a = Ring::build(vec!["one", "two", "three"], 50);
        let b = Ring::build(vec!["three", "one", "two"], 50);
        for key in ["k1", "k2", "k3", "k4", "k5"] {
            assert_eq!(a.get(key.as_bytes()), b.get(key.as_bytes()));
        }
    }

    #[test]
    fn nonpositive_vnodes_defaults() {
        let ring = Ring::build(vec!["x"], 0);
        assert_eq!(ring.vnodes(), DEFAULT_VNODES);
    }

    #[test]
    fn lookup_is_pure_function_of_set_and_key() {
        let ring = Ring::build(vec!["a", "b", "c", "d"], 211);
        let first = ring.get(b"stable-key");
        for _ in 0..10 {
            assert_eq!(ring.get(b"stable-key"), first);
        }
    }

    #[test]
    fn removing_instance_remaps_only_its_share() {
        let full: Vec<String> = (0..20).map(|i| format!("inst-{i}")).collect();
        let ring_full = Ring::build(full.clone(), 211);
        let reduced: Vec<String> = full.iter().filter(|s| *s != "inst-0").cloned().collect();
        let ring_reduced = Ring::build(reduced, 211);

        let keys: Vec<String> = (0..2000).map(|i| format!("key-{i}")).collect();
        let mut remapped = 0;
        for key in &keys {
            let before = ring_full.get(key.as_bytes());
            let after = ring_reduced.get(key.as_bytes());
            if before != after {
                remapped += 1;
            }
        }
        // Expect roughly 1/20th of keys to move; allow generous slack.
        let fraction = remapped as f64 / keys.len() as f64;
        assert!(fraction < 0.25, "remapped fraction too high: {fraction}");
    }
}
