//! # Holt - the bridge's handle registry
//!
//! Native callback code (host functions invoked by a script, module import
//! resolution) must never hold a direct reference to a host object whose
//! lifetime it does not control. Instead it holds a [`Paw`], an integer grip,
//! and reaches back through a `Holt` at call time. If the resource has been
//! released the lookup comes back empty and the callback degrades to a no-op.
//!
//! | Term | Meaning |
//! |------|---------|
//! | **Holt** | The registry, one mutex over the whole table |
//! | **Paw** | The key; slot index plus generation |
//! | **hold** | Register a resource and get a paw |
//! | **catch** | Look a paw up (cloned `Arc`, lock already dropped) |
//! | **release** | Unregister; returns the resource if it was present |
//! | **slipped away** | The paw is stale or never existed |
//!
//! ```
//! use otter_bridge::holt::Holt;
//! use std::sync::Arc;
//!
//! let holt: Holt<String> = Holt::new();
//! let paw = holt.hold(Arc::new("socket".to_string())).unwrap();
//! assert_eq!(*holt.catch(paw).unwrap(), "socket");
//!
//! holt.release(paw);
//! assert!(holt.try_catch(paw).is_none());
//! ```

use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// A grip on a registered resource.
///
/// The raw key is `generation << 32 | slot`. Every registration draws a fresh
/// generation from its table, so keys strictly increase and are never handed
/// out twice. A paw that outlives its entry never matches whatever later
/// reuses the slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Paw {
    generation: u32,
    slot: u32,
}

impl Paw {
    /// The integer key, suitable for crossing into native code.
    pub const fn to_bits(self) -> u64 {
        ((self.generation as u64) << 32) | self.slot as u64
    }

    /// Rebuild a paw from its integer key.
    pub const fn from_bits(bits: u64) -> Self {
        Self {
            generation: (bits >> 32) as u32,
            slot: bits as u32,
        }
    }
}

impl fmt::Display for Paw {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_bits())
    }
}

/// Errors that can occur when working with a [`Holt`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HoltError {
    /// The paw is stale (already released) or was never handed out.
    #[error("Resource slipped away (paw {0} not found)")]
    SlippedAway(Paw),

    /// Every generation has been used; the table can hand out no new keys.
    #[error("Holt exhausted - no generations left")]
    Exhausted,
}

/// Result type for Holt operations.
pub type HoltResult<T> = Result<T, HoltError>;

struct Slot<T: ?Sized> {
    generation: u32,
    resource: Option<Arc<T>>,
}

struct Stash<T: ?Sized> {
    slots: Vec<Slot<T>>,
    vacant: Vec<u32>,
    /// Generation handed to the next registration. Starts at 1 so that no
    /// paw ever has the raw key 0.
    next_generation: u32,
    live: usize,
}

/// Thread-safe registry mapping [`Paw`]s to shared resources.
///
/// The whole table sits behind a single lock. `catch` clones the `Arc` and
/// returns with the lock released, so code running inside a host callback may
/// freely hold, catch or release on the same table.
pub struct Holt<T: ?Sized> {
    stash: Mutex<Stash<T>>,
}

impl<T: ?Sized + Send + Sync> Holt<T> {
    pub fn new() -> Self {
        Self {
            stash: Mutex::new(Stash {
                slots: Vec::new(),
                vacant: Vec::new(),
                next_generation: 1,
                live: 0,
            }),
        }
    }

    /// Register a resource and get its paw.
    pub fn hold(&self, resource: Arc<T>) -> HoltResult<Paw> {
        let mut stash = self.stash.lock();

        let generation = stash.next_generation;
        stash.next_generation = generation.checked_add(1).ok_or(HoltError::Exhausted)?;

        let slot = match stash.vacant.pop() {
            Some(slot) => {
                let entry = &mut stash.slots[slot as usize];
                entry.generation = generation;
                entry.resource = Some(resource);
                slot
            }
            None => {
                let slot = u32::try_from(stash.slots.len()).map_err(|_| HoltError::Exhausted)?;
                stash.slots.push(Slot {
                    generation,
                    resource: Some(resource),
                });
                slot
            }
        };
        stash.live += 1;

        Ok(Paw { generation, slot })
    }

    /// Look a paw up.
    ///
    /// # Errors
    ///
    /// [`HoltError::SlippedAway`] if the paw was released or never issued.
    pub fn catch(&self, paw: Paw) -> HoltResult<Arc<T>> {
        let stash = self.stash.lock();
        stash
            .slots
            .get(paw.slot as usize)
            .filter(|entry| entry.generation == paw.generation)
            .and_then(|entry| entry.resource.clone())
            .ok_or(HoltError::SlippedAway(paw))
    }

    /// Like [`Holt::catch`], but absent is just `None`.
    pub fn try_catch(&self, paw: Paw) -> Option<Arc<T>> {
        self.catch(paw).ok()
    }

    /// Unregister a paw. Releasing an absent paw is a no-op returning `None`.
    ///
    /// The resource itself is dropped once the last outstanding `Arc` from an
    /// earlier `catch` goes away.
    pub fn release(&self, paw: Paw) -> Option<Arc<T>> {
        let mut stash = self.stash.lock();
        let entry = stash
            .slots
            .get_mut(paw.slot as usize)
            .filter(|entry| entry.generation == paw.generation)?;
        let resource = entry.resource.take()?;
        stash.vacant.push(paw.slot);
        stash.live -= 1;
        Some(resource)
    }

    pub fn has(&self, paw: Paw) -> bool {
        self.catch(paw).is_ok()
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.stash.lock().live
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: ?Sized + Send + Sync> Default for Holt<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ?Sized> fmt::Debug for Holt<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stash = self.stash.lock();
        f.debug_struct("Holt")
            .field("live", &stash.live)
            .field("slots", &stash.slots.len())
            .field("next_generation", &stash.next_generation)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_hold_and_catch() {
        let holt = Holt::new();

        let paw = holt.hold(Arc::new(vec![1, 2, 3])).unwrap();
        assert_ne!(paw.to_bits(), 0);

        let data = holt.catch(paw).unwrap();
        assert_eq!(*data, vec![1, 2, 3]);
    }

    #[test]
    fn test_slipped_away() {
        let holt: Holt<i32> = Holt::new();

        let ghost = Paw::from_bits(999);
        assert_eq!(holt.catch(ghost), Err(HoltError::SlippedAway(ghost)));
    }

    #[test]
    fn test_release() {
        let holt = Holt::new();

        let paw = holt.hold(Arc::new(42)).unwrap();
        assert!(holt.has(paw));

        assert_eq!(holt.release(paw).as_deref(), Some(&42));
        assert!(!holt.has(paw));
        assert!(holt.catch(paw).is_err());

        // Second release is a no-op
        assert!(holt.release(paw).is_none());
    }

    #[test]
    fn test_stale_paw_does_not_alias_reused_slot() {
        let holt = Holt::new();

        let old = holt.hold(Arc::new("old")).unwrap();
        holt.release(old);
        let new = holt.hold(Arc::new("new")).unwrap();

        // Same slot, different generation
        assert_eq!(old.to_bits() as u32, new.to_bits() as u32);
        assert!(holt.try_catch(old).is_none());
        assert_eq!(*holt.catch(new).unwrap(), "new");
    }

    #[test]
    fn test_keys_strictly_increase() {
        let holt = Holt::new();

        let mut previous = 0;
        for i in 0..32 {
            let paw = holt.hold(Arc::new(i)).unwrap();
            assert!(paw.to_bits() > previous);
            previous = paw.to_bits();
            if i % 3 == 0 {
                holt.release(paw);
            }
        }
    }

    #[test]
    fn test_bits_round_trip() {
        let holt = Holt::new();
        let paw = holt.hold(Arc::new(())).unwrap();
        assert_eq!(Paw::from_bits(paw.to_bits()), paw);
    }

    #[test]
    fn test_unsized_resources() {
        let holt: Holt<dyn Fn(i32) -> i32 + Send + Sync> = Holt::new();

        let double = holt.hold(Arc::new(|x: i32| x * 2)).unwrap();
        let negate = holt.hold(Arc::new(|x: i32| -x)).unwrap();

        assert_eq!(holt.catch(double).unwrap()(21), 42);
        assert_eq!(holt.catch(negate).unwrap()(7), -7);
    }

    #[test]
    fn test_caught_arc_outlives_release() {
        let holt = Holt::new();
        let paw = holt.hold(Arc::new(String::from("kept"))).unwrap();

        let caught = holt.catch(paw).unwrap();
        holt.release(paw);

        assert_eq!(*caught, "kept");
        assert!(holt.is_empty());
    }

    #[test]
    fn test_reentrant_use_inside_caught_closure() {
        let holt: Arc<Holt<dyn Fn() -> usize + Send + Sync>> = Arc::new(Holt::new());

        let inner = holt.clone();
        let paw = holt.hold(Arc::new(move || inner.len())).unwrap();

        // The lock is not held while the caught resource runs
        assert_eq!(holt.catch(paw).unwrap()(), 1);
    }

    #[test]
    fn test_len() {
        let holt = Holt::new();
        assert!(holt.is_empty());

        let a = holt.hold(Arc::new(1)).unwrap();
        holt.hold(Arc::new(2)).unwrap();
        holt.hold(Arc::new(3)).unwrap();
        assert_eq!(holt.len(), 3);

        holt.release(a);
        assert_eq!(holt.len(), 2);
    }

    #[test]
    fn test_concurrent_access() {
        let holt = Arc::new(Holt::new());
        let mut handles = vec![];

        for i in 0..10 {
            let holt = holt.clone();
            handles.push(thread::spawn(move || {
                let mut paws = Vec::new();
                for j in 0..100 {
                    let paw = holt.hold(Arc::new(i * 1000 + j)).unwrap();
                    assert_eq!(*holt.catch(paw).unwrap(), i * 1000 + j);
                    if j % 2 == 0 {
                        holt.release(paw);
                    }
                    paws.push(paw.to_bits());
                }
                paws
            }));
        }

        let mut keys: Vec<u64> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        let total = keys.len();
        keys.sort_unstable();
        keys.dedup();

        // No key was ever handed out twice, even with slot reuse
        assert_eq!(keys.len(), total);
        assert_eq!(holt.len(), 500);
    }
}
