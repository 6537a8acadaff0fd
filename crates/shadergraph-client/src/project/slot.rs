/// Identifies one load request handed out by a [`LoadSlot`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadTicket(u64);

/// Holds the latest loaded value and discards results of loads that were
/// superseded before they finished. Loads themselves are never cancelled;
/// stale results are dropped on arrival.
#[derive(Debug)]
pub struct LoadSlot<T> {
    generation: u64,
    current: Option<T>,
}

impl<T> Default for LoadSlot<T> {
    fn default() -> Self {
        Self {
            generation: 0,
            current: None,
        }
    }
}

impl<T> LoadSlot<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a load; every earlier ticket becomes stale.
    pub fn begin(&mut self) -> LoadTicket {
        self.generation += 1;
        LoadTicket(self.generation)
    }

    pub fn is_current(&self, ticket: LoadTicket) -> bool {
        ticket.0 == self.generation
    }

    /// Stores `value` if `ticket` is still the latest load. Returns whether
    /// it was accepted.
    pub fn complete(&mut self, ticket: LoadTicket, value: T) -> bool {
        if !self.is_current(ticket) {
            tracing::debug!("Dropping result of superseded load #{}", ticket.0);
            return false;
        }
        self.current = Some(value);
        true
    }

    pub fn current(&self) -> Option<&T> {
        self.current.as_ref()
    }

    pub fn take(&mut self) -> Option<T> {
        self.current.take()
    }
}
