//! Fixed pool of transaction records.
//!
//! Interrupt-context users (tick callbacks that start a sensor read, driver
//! callbacks that chain follow-up work) cannot keep records on their stack,
//! so they borrow one from here. The engine returns pool records
//! automatically once their transfer has completed.
//!
//! Every allocation-map access happens inside `critical_section::with`:
//! `free` runs from the TWI interrupt.

use core::cell::RefCell;

use critical_section::Mutex;
use platform::config::TRANSACTION_POOL_SIZE;

use crate::error::BusError;
use crate::transaction::{PoolIndex, Transaction, TransactionHandle, TransactionSlot};

/// `N` preallocated transaction records and their allocation map.
pub struct TransactionPool<const N: usize = { TRANSACTION_POOL_SIZE }> {
    slots: [TransactionSlot; N],
    allocated: Mutex<RefCell<[bool; N]>>,
}

impl<const N: usize> TransactionPool<N> {
    /// A pool with every record free.
    pub const fn new() -> Self {
        Self {
            slots: [TransactionSlot::NEW; N],
            allocated: Mutex::new(RefCell::new([false; N])),
        }
    }

    /// Reserve `K` records at once, reset to [`Transaction::new`].
    ///
    /// # Errors
    ///
    /// [`BusError::PoolExhausted`] if fewer than `K` are free. Nothing is
    /// reserved in that case.
    pub fn reserve<const K: usize>(&self) -> Result<[TransactionHandle; K], BusError> {
        critical_section::with(|cs| {
            let mut allocated = self.allocated.borrow_ref_mut(cs);
            let free = allocated.iter().filter(|taken| !**taken).count();
            if free < K {
                platform::log_debug!("twi: pool exhausted, {} free, {} wanted", free, K);
                return Err(BusError::PoolExhausted);
            }

            let mut unclaimed = allocated
                .iter_mut()
                .enumerate()
                .filter(|(_, taken)| !**taken);
            let picked: [usize; K] = core::array::from_fn(|_| match unclaimed.next() {
                Some((index, taken)) => {
                    *taken = true;
                    index
                }
                // free >= K was checked above
                None => 0,
            });

            for &index in &picked {
                if let Some(slot) = self.slots.get(index) {
                    if let Ok(mut txn) = slot.cell(cs).try_borrow_mut() {
                        *txn = Transaction::new();
                    }
                }
            }
            Ok(picked.map(|index| TransactionHandle::Pool(PoolIndex(index))))
        })
    }

    /// Return a record to the pool.
    ///
    /// Caller-owned handles, records that are not reserved and records still
    /// queued in the engine are ignored, so any code path can free whatever
    /// handle it holds. Returns `true` if a record was actually released.
    pub fn free(&self, handle: TransactionHandle) -> bool {
        let TransactionHandle::Pool(index) = handle else {
            return false;
        };
        critical_section::with(|cs| {
            if let Some(slot) = self.slots.get(index.get()) {
                if slot.queued_in(cs) {
                    return false;
                }
            }
            match self.allocated.borrow_ref_mut(cs).get_mut(index.get()) {
                Some(taken) if *taken => {
                    *taken = false;
                    true
                }
                _ => false,
            }
        })
    }

    /// `true` if `index` is currently reserved.
    pub fn is_reserved(&self, index: PoolIndex) -> bool {
        critical_section::with(|cs| {
            self.allocated
                .borrow_ref(cs)
                .get(index.get())
                .copied()
                .unwrap_or(false)
        })
    }

    /// Records currently free.
    pub fn available(&self) -> usize {
        critical_section::with(|cs| {
            self.allocated
                .borrow_ref(cs)
                .iter()
                .filter(|taken| !**taken)
                .count()
        })
    }

    /// Total number of records.
    pub const fn capacity(&self) -> usize {
        N
    }

    /// The slot behind `handle`. `None` for an index outside this pool.
    pub fn resolve(&self, handle: TransactionHandle) -> Option<&TransactionSlot> {
        match handle {
            TransactionHandle::Pool(index) => self.slots.get(index.get()),
            TransactionHandle::Caller(slot) => Some(slot),
        }
    }
}

impl<const N: usize> Default for TransactionPool<N> {
    fn default() -> Self {
        Self::new()
    }
}
