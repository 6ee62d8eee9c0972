//! Divided-down periodic callbacks.
//!
//! Two fixed-capacity tables, one dispatched from the fine tick and one from
//! the coarse tick. An entry with divider `d` runs on every `(d + 1)`-th tick
//! of its table.
//!
//! Registration and removal run from background code while dispatch runs
//! from the tick interrupt, so every table access happens inside
//! `critical_section::with`. Dispatch only collects the due callbacks there
//! and calls them once the critical section has ended: a callback may
//! register or unregister entries, including itself.

use core::cell::RefCell;

use critical_section::Mutex;
use heapless::Vec;
use platform::config::CALLBACK_TABLE_SIZE;
use thiserror_no_std::Error;

/// A periodic callback. The argument is reserved and currently always 0.
pub type TickCallback = fn(u8);

/// Which table an entry lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TableId {
    /// Dispatched on every fine (1024 Hz) tick.
    Fast,
    /// Dispatched on every coarse (1 Hz) tick.
    Slow,
}

/// Position an entry was registered at.
///
/// Positions shift down when an earlier entry is removed, so this is only a
/// receipt; use the callback itself to unregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CallbackId(pub u8);

/// Scheduler errors.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SchedulerError {
    /// The table has no free entry.
    #[error("callback table full")]
    Full,
}

/// One registered callback.
#[derive(Debug, Clone, Copy)]
pub struct CallbackEntry {
    /// Function to call.
    pub callback: TickCallback,
    /// Ticks since the last call.
    pub counter: u16,
    /// Ticks skipped between calls.
    pub divider: u16,
}

impl CallbackEntry {
    /// Advance by one tick. Returns `true` when the callback is due, and
    /// restarts the count in that case.
    #[allow(clippy::arithmetic_side_effects)] // Safety: counter <= divider <= u16::MAX, so +1 fits u32
    fn advance(&mut self) -> bool {
        let next = u32::from(self.counter) + 1;
        if next > u32::from(self.divider) {
            self.counter = 0;
            true
        } else {
            // next <= divider, fits u16
            self.counter = u16::try_from(next).unwrap_or(u16::MAX);
            false
        }
    }
}

fn same_callback(a: TickCallback, b: TickCallback) -> bool {
    a as usize == b as usize
}

/// A compact, fixed-capacity list of [`CallbackEntry`].
///
/// Entries always occupy `[0, len)`; removal shifts later entries down.
#[derive(Debug)]
pub struct CallbackTable<const N: usize> {
    entries: Vec<CallbackEntry, N>,
}

impl<const N: usize> CallbackTable<N> {
    /// An empty table.
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Append an entry with its counter at 0.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::Full`] when all `N` entries are in use.
    pub fn register(
        &mut self,
        callback: TickCallback,
        divider: u16,
    ) -> Result<CallbackId, SchedulerError> {
        let position = self.entries.len();
        self.entries
            .push(CallbackEntry {
                callback,
                counter: 0,
                divider,
            })
            .map_err(|_| SchedulerError::Full)?;
        Ok(CallbackId(u8::try_from(position).unwrap_or(u8::MAX)))
    }

    /// Remove the first entry for `callback`. Returns `false` if there is
    /// none.
    pub fn unregister(&mut self, callback: TickCallback) -> bool {
        match self
            .entries
            .iter()
            .position(|entry| same_callback(entry.callback, callback))
        {
            Some(position) => {
                self.entries.remove(position);
                true
            }
            None => false,
        }
    }

    /// Advance every counter by one tick and append the due callbacks to
    /// `due`, in table order.
    pub fn tick(&mut self, due: &mut Vec<TickCallback, N>) {
        for entry in &mut self.entries {
            if entry.advance() {
                // due has the same capacity as the table
                let _ = due.push(entry.callback);
            }
        }
    }

    /// `true` if `callback` has an entry.
    pub fn contains(&self, callback: TickCallback) -> bool {
        self.entries
            .iter()
            .any(|entry| same_callback(entry.callback, callback))
    }

    /// Restart every counter at 0.
    pub fn reset_counters(&mut self) {
        for entry in &mut self.entries {
            entry.counter = 0;
        }
    }

    /// Registered entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `true` when nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The entries, in dispatch order.
    pub fn entries(&self) -> &[CallbackEntry] {
        &self.entries
    }
}

impl<const N: usize> Default for CallbackTable<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// The fast and slow tables, shareable between background code and the tick
/// interrupts.
pub struct CallbackScheduler<const N: usize = { CALLBACK_TABLE_SIZE }> {
    fast: Mutex<RefCell<CallbackTable<N>>>,
    slow: Mutex<RefCell<CallbackTable<N>>>,
}

impl<const N: usize> CallbackScheduler<N> {
    /// Both tables empty.
    pub const fn new() -> Self {
        Self {
            fast: Mutex::new(RefCell::new(CallbackTable::new())),
            slow: Mutex::new(RefCell::new(CallbackTable::new())),
        }
    }

    fn table(&self, table: TableId) -> &Mutex<RefCell<CallbackTable<N>>> {
        match table {
            TableId::Fast => &self.fast,
            TableId::Slow => &self.slow,
        }
    }

    /// Register `callback` to run every `divider + 1` ticks of `table`.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::Full`].
    pub fn register(
        &self,
        table: TableId,
        callback: TickCallback,
        divider: u16,
    ) -> Result<CallbackId, SchedulerError> {
        let result = critical_section::with(|cs| {
            self.table(table)
                .borrow_ref_mut(cs)
                .register(callback, divider)
        });
        if result.is_err() {
            platform::log_warn!("timebase: callback table full");
        }
        result
    }

    /// Remove `callback` from `table`. Returns `false` if it was not
    /// registered there.
    pub fn unregister(&self, table: TableId, callback: TickCallback) -> bool {
        critical_section::with(|cs| self.table(table).borrow_ref_mut(cs).unregister(callback))
    }

    /// Advance `table` by one tick and run what is due.
    ///
    /// Callbacks run outside the critical section, in table order. One that
    /// an earlier callback of the same tick unregistered is not run.
    ///
    /// Returns the number of callbacks run.
    pub fn dispatch(&self, table: TableId) -> usize {
        let mut due: Vec<TickCallback, N> = Vec::new();
        critical_section::with(|cs| self.table(table).borrow_ref_mut(cs).tick(&mut due));
        let mut ran = 0usize;
        for &callback in &due {
            let live =
                critical_section::with(|cs| self.table(table).borrow_ref(cs).contains(callback));
            if live {
                callback(0);
                ran = ran.saturating_add(1);
            }
        }
        ran
    }

    /// Restart every counter in both tables.
    pub fn reset_counters(&self) {
        critical_section::with(|cs| {
            self.fast.borrow_ref_mut(cs).reset_counters();
            self.slow.borrow_ref_mut(cs).reset_counters();
        });
    }

    /// Number of entries in `table`.
    pub fn registered(&self, table: TableId) -> usize {
        critical_section::with(|cs| self.table(table).borrow_ref(cs).len())
    }

    /// Copy of `table`'s entries, for diagnostics.
    pub fn entries(&self, table: TableId) -> Vec<CallbackEntry, N> {
        critical_section::with(|cs| {
            let mut copy = Vec::new();
            for entry in self.table(table).borrow_ref(cs).entries() {
                let _ = copy.push(*entry);
            }
            copy
        })
    }
}

impl<const N: usize> Default for CallbackScheduler<N> {
    fn default() -> Self {
        Self::new()
    }
}
