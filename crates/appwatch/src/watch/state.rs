//! Per-target watch state and index classification.

/// Outcome of comparing a returned index against the recorded one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    /// First read of a fresh state; index adopted without notifying
    Seeded { index: u64 },
    /// Long-poll timed out with the same index
    Unchanged { index: u64 },
    /// Index advanced; the recorded index now equals `current`
    Changed { previous: u64, current: u64 },
    /// Index went backwards (store restore/reset); ignored
    Regressed { recorded: u64, returned: u64 },
}

/// State owned by exactly one watch loop
#[derive(Debug, Default)]
pub struct WatchState {
    last_index: u64,
    last_value: Option<Vec<u8>>,
    seeded: bool,
}

impl WatchState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_index(&self) -> u64 {
        self.last_index
    }

    pub fn last_value(&self) -> Option<&[u8]> {
        self.last_value.as_deref()
    }

    /// Result of the non-blocking read at the top of the loop. Only the very
    /// first seed adopts the index silently; later seeds (after a connection
    /// error) are compared like any other observation.
    pub fn seed(&mut self, index: u64, value: Option<Vec<u8>>) -> Observation {
        if self.seeded {
            return self.observe(index, value);
        }
        self.seeded = true;
        self.last_index = index;
        self.last_value = value;
        Observation::Seeded { index }
    }

    /// Result of a blocking read
    pub fn observe(&mut self, index: u64, value: Option<Vec<u8>>) -> Observation {
        use std::cmp::Ordering;

        match index.cmp(&self.last_index) {
            Ordering::Equal => Observation::Unchanged { index },
            Ordering::Greater => {
                let previous = self.last_index;
                self.last_index = index;
                self.last_value = value;
                Observation::Changed {
                    previous,
                    current: index,
                }
            }
            Ordering::Less => Observation::Regressed {
                recorded: self.last_index,
                returned: index,
            },
        }
    }
}
