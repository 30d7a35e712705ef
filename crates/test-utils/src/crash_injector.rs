//! Crash injection utilities for testing crash recovery.
//!
//! Provides a [`CrashInjector`] that counts channel operations and reports
//! when a configured crash point is reached. A fault-injecting channel
//! consults it before every write and sync; once it fires, that operation
//! and every later one fail, as if the process had died there.
//!
//! # Crash Points
//!
//! The [`CrashPoint`] enum models the windows of the dual-slot commit:
//!
//! ```text
//! Write blocks → Sync → Write slot → Sync → Flip god byte → Sync
//!      ↑          ↑         ↑         ↑          ↑           ↑
//!  DuringBlockWrite │  BeforeSlotWrite │  BeforeGodByteFlip  │
//!            BeforeDataSync      BeforeSlotSync        BeforeFinalSync
//! ```
//!
//! Every point but the last must recover to the previous commit; a crash
//! before the final sync may recover to either, but never to a mix.

use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicU32, Ordering},
};

/// Points in the commit sequence where a crash can be injected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CrashPoint {
    /// Crash on the Nth data block write (see [`CrashInjector::on_block_write`]).
    ///
    /// On-disk state: some new blocks written, header untouched.
    DuringBlockWrite,

    /// Crash on the sync that follows the data block writes.
    ///
    /// On-disk state: all new blocks written, header untouched.
    BeforeDataSync,

    /// Crash on the write of the inactive header slot.
    ///
    /// On-disk state: blocks durable, header untouched.
    BeforeSlotWrite,

    /// Crash on the sync after the slot write.
    ///
    /// On-disk state: both slots valid, god byte still on the old one.
    BeforeSlotSync,

    /// Crash on the header write that flips the god byte.
    ///
    /// On-disk state: as [`BeforeSlotSync`](Self::BeforeSlotSync), synced.
    BeforeGodByteFlip,

    /// Crash on the final sync.
    ///
    /// On-disk state: god byte flipped but possibly not durable. Recovery
    /// may land on either commit.
    BeforeFinalSync,
}

impl CrashPoint {
    /// Every crash point, in commit order.
    pub const ALL: [CrashPoint; 6] = [
        CrashPoint::DuringBlockWrite,
        CrashPoint::BeforeDataSync,
        CrashPoint::BeforeSlotWrite,
        CrashPoint::BeforeSlotSync,
        CrashPoint::BeforeGodByteFlip,
        CrashPoint::BeforeFinalSync,
    ];

    /// True if recovery must return the commit before the crash.
    pub fn must_recover_previous(self) -> bool {
        self != CrashPoint::BeforeFinalSync
    }
}

/// Tracks crash injection state for deterministic crash simulation.
///
/// # Thread Safety
///
/// All state is atomic, making `CrashInjector` safe to share across threads.
#[derive(Debug)]
pub struct CrashInjector {
    /// The crash point to trigger.
    crash_point: CrashPoint,
    /// Number of sync calls observed.
    sync_count: AtomicU32,
    /// Number of header writes observed.
    header_write_count: AtomicU32,
    /// Number of data block writes observed.
    block_write_count: AtomicU32,
    /// Whether the crash has been triggered.
    crashed: AtomicBool,
    /// Whether injection is armed (enabled).
    armed: AtomicBool,
}

impl CrashInjector {
    /// Creates a new crash injector targeting the specified crash point.
    pub fn new(crash_point: CrashPoint) -> Arc<Self> {
        Arc::new(Self {
            crash_point,
            sync_count: AtomicU32::new(0),
            header_write_count: AtomicU32::new(0),
            block_write_count: AtomicU32::new(0),
            crashed: AtomicBool::new(false),
            armed: AtomicBool::new(false),
        })
    }

    /// Arms the injector so it will trigger on the next matching operation.
    ///
    /// The injector starts disarmed to allow setup (creating the store,
    /// loading data) without interference. Arm it right before `commit`.
    pub fn arm(&self) {
        self.sync_count.store(0, Ordering::SeqCst);
        self.header_write_count.store(0, Ordering::SeqCst);
        self.block_write_count.store(0, Ordering::SeqCst);
        self.crashed.store(false, Ordering::SeqCst);
        self.armed.store(true, Ordering::SeqCst);
    }

    /// Disarms the injector.
    pub fn disarm(&self) {
        self.armed.store(false, Ordering::SeqCst);
    }

    /// Checks if the crash has been triggered.
    pub fn has_crashed(&self) -> bool {
        self.crashed.load(Ordering::SeqCst)
    }

    fn counting(&self) -> bool {
        self.armed.load(Ordering::SeqCst) && !self.crashed.load(Ordering::SeqCst)
    }

    fn trigger(&self, should_crash: bool) -> bool {
        if should_crash {
            self.crashed.store(true, Ordering::SeqCst);
        }
        should_crash
    }

    /// Records a sync and returns `true` if it must fail.
    pub fn on_sync(&self) -> bool {
        if !self.counting() {
            return false;
        }
        let count = self.sync_count.fetch_add(1, Ordering::SeqCst);
        self.trigger(match self.crash_point {
            CrashPoint::BeforeDataSync => count == 0,
            CrashPoint::BeforeSlotSync => count == 1,
            CrashPoint::BeforeFinalSync => count == 2,
            _ => false,
        })
    }

    /// Records a header block write and returns `true` if it must fail.
    pub fn on_header_write(&self) -> bool {
        if !self.counting() {
            return false;
        }
        let count = self.header_write_count.fetch_add(1, Ordering::SeqCst);
        self.trigger(match self.crash_point {
            CrashPoint::BeforeSlotWrite => count == 0,
            CrashPoint::BeforeGodByteFlip => count == 1,
            _ => false,
        })
    }

    /// Records a data block write and returns `true` if it must fail.
    ///
    /// `block_threshold` is how many writes succeed before the crash.
    pub fn on_block_write(&self, block_threshold: u32) -> bool {
        if !self.counting() {
            return false;
        }
        let count = self.block_write_count.fetch_add(1, Ordering::SeqCst);
        self.trigger(self.crash_point == CrashPoint::DuringBlockWrite && count >= block_threshold)
    }

    /// Returns the configured crash point.
    pub fn crash_point(&self) -> CrashPoint {
        self.crash_point
    }

    /// Returns the number of sync operations observed.
    pub fn sync_count(&self) -> u32 {
        self.sync_count.load(Ordering::SeqCst)
    }

    /// Returns the number of header write operations observed.
    pub fn header_write_count(&self) -> u32 {
        self.header_write_count.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_crash_injector_starts_disarmed() {
        let injector = CrashInjector::new(CrashPoint::BeforeDataSync);
        assert!(!injector.has_crashed());
        assert!(!injector.on_sync());
        assert!(!injector.has_crashed());
    }

    #[test]
    fn test_crash_before_data_sync() {
        let injector = CrashInjector::new(CrashPoint::BeforeDataSync);
        injector.arm();
        assert!(injector.on_sync());
        assert!(injector.has_crashed());
        // Fires once.
        assert!(!injector.on_sync());
    }

    #[test]
    fn test_crash_before_slot_write() {
        let injector = CrashInjector::new(CrashPoint::BeforeSlotWrite);
        injector.arm();
        assert!(!injector.on_sync());
        assert!(injector.on_header_write());
    }

    #[test]
    fn test_crash_before_god_byte_flip() {
        let injector = CrashInjector::new(CrashPoint::BeforeGodByteFlip);
        injector.arm();
        assert!(!injector.on_sync());
        assert!(!injector.on_header_write());
        assert!(!injector.on_sync());
        assert!(injector.on_header_write());
        assert_eq!(injector.header_write_count(), 2);
    }

    #[test]
    fn test_crash_before_final_sync() {
        let injector = CrashInjector::new(CrashPoint::BeforeFinalSync);
        injector.arm();
        assert!(!injector.on_sync());
        assert!(!injector.on_sync());
        assert!(injector.on_sync());
        assert_eq!(injector.sync_count(), 3);
    }

    #[test]
    fn test_crash_during_block_write() {
        let injector = CrashInjector::new(CrashPoint::DuringBlockWrite);
        injector.arm();
        assert!(!injector.on_block_write(2));
        assert!(!injector.on_block_write(2));
        assert!(injector.on_block_write(2));
        assert!(injector.has_crashed());
    }

    #[test]
    fn test_arm_resets_state() {
        let injector = CrashInjector::new(CrashPoint::BeforeDataSync);
        injector.arm();
        assert!(injector.on_sync());
        injector.arm();
        assert!(!injector.has_crashed());
        assert_eq!(injector.sync_count(), 0);
    }

    #[test]
    fn test_disarm_prevents_crash() {
        let injector = CrashInjector::new(CrashPoint::BeforeDataSync);
        injector.arm();
        injector.disarm();
        assert!(!injector.on_sync());
        assert!(!injector.has_crashed());
    }

    #[test]
    fn test_only_final_sync_may_recover_either() {
        let either: Vec<_> =
            CrashPoint::ALL.into_iter().filter(|p| !p.must_recover_previous()).collect();
        assert_eq!(either, vec![CrashPoint::BeforeFinalSync]);
    }
}
