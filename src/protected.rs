use std::sync::Mutex;

use crate::util::lock_unpoisoned;

/// A value that can only be reached through serialized `read`/`write` closures.
///
/// Every access runs inside one critical section, so observers never see a
/// half-applied mutation and concurrent writers compose in some serial order.
/// No guard or reference to the inner value escapes a closure. Closures must
/// not touch the same `ProtectedState` again; doing so deadlocks.
pub struct ProtectedState<T> {
    value: Mutex<T>,
}

impl<T> ProtectedState<T> {
    pub const fn new(value: T) -> Self {
        Self {
            value: Mutex::new(value),
        }
    }

    pub fn read<R>(&self, reader: impl FnOnce(&T) -> R) -> R {
        let guard = lock_unpoisoned(&self.value);
        reader(&guard)
    }

    pub fn write<R>(&self, writer: impl FnOnce(&mut T) -> R) -> R {
        let mut guard = lock_unpoisoned(&self.value);
        writer(&mut guard)
    }

    pub fn replace(&self, value: T) -> T {
        self.write(|current| std::mem::replace(current, value))
    }

    pub fn into_inner(self) -> T {
        match self.value.into_inner() {
            Ok(value) => value,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl<T: Clone> ProtectedState<T> {
    pub fn get(&self) -> T {
        self.read(Clone::clone)
    }
}

impl<T: Default> Default for ProtectedState<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for ProtectedState<T> {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.read(|value| {
            formatter
                .debug_struct("ProtectedState")
                .field("value", value)
                .finish()
        })
    }
}

impl<T> From<T> for ProtectedState<T> {
    fn from(value: T) -> Self {
        Self::new(value)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::ProtectedState;

    #[test]
    fn concurrent_writes_never_lose_updates() {
        let counter = Arc::new(ProtectedState::new(0_u64));
        let threads = 16;
        let writes_per_thread = 1_000;

        thread::scope(|scope| {
            for _ in 0..threads {
                let counter = Arc::clone(&counter);
                scope.spawn(move || {
                    for _ in 0..writes_per_thread {
                        counter.write(|value| *value += 1);
                    }
                });
            }
        });

        assert_eq!(counter.get(), threads * writes_per_thread);
    }

    #[test]
    fn readers_never_observe_a_torn_pair() {
        let pair = Arc::new(ProtectedState::new((0_u64, 0_u64)));

        thread::scope(|scope| {
            for _ in 0..4 {
                let pair = Arc::clone(&pair);
                scope.spawn(move || {
                    for _ in 0..2_000 {
                        pair.write(|(left, right)| {
                            *left += 1;
                            std::hint::spin_loop();
                            *right += 1;
                        });
                    }
                });
            }
            for _ in 0..4 {
                let pair = Arc::clone(&pair);
                scope.spawn(move || {
                    for _ in 0..2_000 {
                        let (left, right) = pair.read(|pair| *pair);
                        assert_eq!(left, right);
                    }
                });
            }
        });

        assert_eq!(pair.get(), (8_000, 8_000));
    }

    #[test]
    fn non_commutative_mutators_compose_in_some_serial_order() {
        let log = Arc::new(ProtectedState::new(Vec::<usize>::new()));

        thread::scope(|scope| {
            for index in 0..8 {
                let log = Arc::clone(&log);
                scope.spawn(move || {
                    log.write(|entries| {
                        let snapshot = entries.len();
                        entries.push(index);
                        assert_eq!(entries.len(), snapshot + 1);
                    });
                });
            }
        });

        let mut entries = log.get();
        entries.sort_unstable();
        assert_eq!(entries, (0..8).collect::<Vec<_>>());
    }

    #[test]
    fn write_recovers_after_a_panicking_mutator() {
        let state = Arc::new(ProtectedState::new(1_u32));
        let poisoner = Arc::clone(&state);
        let outcome = thread::spawn(move || {
            poisoner.write(|value| {
                *value = 2;
                panic!("mutator failed");
            })
        })
        .join();
        assert!(outcome.is_err());

        state.write(|value| *value += 1);
        assert_eq!(state.get(), 3);
        assert_eq!(state.replace(10), 3);
        assert_eq!(Arc::try_unwrap(state).map(ProtectedState::into_inner).ok(), Some(10));
    }
}
