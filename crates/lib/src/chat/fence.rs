//! Request fencing: one generation counter per logical operation. A result is applied only
//! if its ticket is still the newest for that operation; anything older is dropped.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    ListChats,
    LoadMessages,
    Upload,
    ListDocuments,
}

impl Operation {
    const COUNT: usize = 4;

    fn index(self) -> usize {
        match self {
            Operation::ListChats => 0,
            Operation::LoadMessages => 1,
            Operation::Upload => 2,
            Operation::ListDocuments => 3,
        }
    }
}

/// Proof of which request a result belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticket {
    op: Operation,
    generation: u64,
}

impl Ticket {
    pub fn operation(&self) -> Operation {
        self.op
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

#[derive(Debug, Default)]
pub struct RequestFence {
    generations: [u64; Operation::COUNT],
}

impl RequestFence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new request for `op`; every earlier ticket for `op` becomes stale.
    pub fn issue(&mut self, op: Operation) -> Ticket {
        let slot = &mut self.generations[op.index()];
        *slot += 1;
        Ticket {
            op,
            generation: *slot,
        }
    }

    /// Make every outstanding ticket for `op` stale without issuing a new one.
    pub fn invalidate(&mut self, op: Operation) {
        self.generations[op.index()] += 1;
    }

    pub fn invalidate_all(&mut self) {
        for g in self.generations.iter_mut() {
            *g += 1;
        }
    }

    pub fn is_current(&self, ticket: Ticket) -> bool {
        self.generations[ticket.op.index()] == ticket.generation
    }
}
