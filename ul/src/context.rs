//! Process-wide protocol counters.
//!
//! Association numbers and command message IDs are drawn
//! from a [`UlContext`].
//! Applications normally share the [global](UlContext::global) one,
//! while tests can create isolated contexts
//! so that counter values are predictable.
use std::sync::atomic::{AtomicU16, AtomicU32, Ordering};
use std::sync::{Arc, OnceLock};

/// Atomic counters shared by every association
/// created with the same context.
#[derive(Debug)]
pub struct UlContext {
    association_number: AtomicU32,
    message_id: AtomicU16,
}

impl Default for UlContext {
    fn default() -> Self {
        Self::new()
    }
}

impl UlContext {
    /// Create a fresh context.
    /// The first association number and the first message ID are both 1.
    pub const fn new() -> Self {
        UlContext {
            association_number: AtomicU32::new(1),
            message_id: AtomicU16::new(1),
        }
    }

    /// The context shared by the whole process.
    pub fn global() -> Arc<UlContext> {
        static GLOBAL: OnceLock<Arc<UlContext>> = OnceLock::new();
        GLOBAL.get_or_init(|| Arc::new(UlContext::new())).clone()
    }

    /// Take the next association number.
    pub fn next_association_number(&self) -> u32 {
        self.association_number.fetch_add(1, Ordering::Relaxed)
    }

    /// Take the next message ID.
    ///
    /// Wraps around on overflow, skipping 0.
    pub fn next_message_id(&self) -> u16 {
        loop {
            let id = self.message_id.fetch_add(1, Ordering::Relaxed);
            if id != 0 {
                return id;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::UlContext;
    use std::sync::Arc;

    #[test]
    fn counters_increase() {
        let ctx = UlContext::new();
        assert_eq!(ctx.next_association_number(), 1);
        assert_eq!(ctx.next_association_number(), 2);
        assert_eq!(ctx.next_message_id(), 1);
        assert_eq!(ctx.next_message_id(), 2);
    }

    #[test]
    fn message_id_wraps_and_skips_zero() {
        let ctx = UlContext::new();
        ctx.message_id
            .store(u16::MAX, std::sync::atomic::Ordering::Relaxed);
        assert_eq!(ctx.next_message_id(), u16::MAX);
        assert_eq!(ctx.next_message_id(), 1);
    }

    #[test]
    fn counters_are_shared_across_threads() {
        let ctx = Arc::new(UlContext::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let ctx = Arc::clone(&ctx);
                std::thread::spawn(move || {
                    (0..100)
                        .map(|_| ctx.next_association_number())
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        let mut all: Vec<u32> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), 400);
    }
}
