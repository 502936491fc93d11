use core::cmp::Ordering;

/// Pending-work queue whose ordering is decided at pop time.
///
/// Key properties:
/// - Ordering is supplied per pop, so a comparator backed by state that changes
///   between pops (camera focus, regions of interest) is always current.
/// - Ties under the comparator resolve to the oldest item.
/// - Optional backpressure via a maximum pending length.
///
/// Vec-backed; pending reads are few enough that a linear scan per pop is
/// cheaper than keeping a heap consistent with a moving comparator.

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WorkId(pub u64);

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct WorkQueueFull {
    pub max_len: usize,
}

impl std::fmt::Display for WorkQueueFull {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "work queue full (max_len={})", self.max_len)
    }
}

impl std::error::Error for WorkQueueFull {}

#[derive(Debug)]
struct Item<T> {
    id: WorkId,
    payload: T,
}

#[derive(Debug)]
pub struct WorkQueue<T> {
    next_id: u64,
    items: Vec<Item<T>>,
    max_len: Option<usize>,
}

impl<T> Default for WorkQueue<T> {
    fn default() -> Self {
        Self {
            next_id: 0,
            items: Vec::new(),
            max_len: None,
        }
    }
}

impl<T> WorkQueue<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_len(max_len: usize) -> Self {
        Self {
            max_len: Some(max_len),
            ..Self::default()
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn push(&mut self, payload: T) -> WorkId {
        let id = WorkId(self.next_id);
        self.next_id = self.next_id.wrapping_add(1);
        self.items.push(Item { id, payload });
        id
    }

    pub fn try_push(&mut self, payload: T) -> Result<WorkId, WorkQueueFull> {
        if let Some(max_len) = self.max_len
            && self.items.len() >= max_len
        {
            return Err(WorkQueueFull { max_len });
        }
        Ok(self.push(payload))
    }

    pub fn remove(&mut self, id: WorkId) -> Option<T> {
        let idx = self.items.iter().position(|i| i.id == id)?;
        Some(self.items.remove(idx).payload)
    }

    pub fn retain(&mut self, mut keep: impl FnMut(&T) -> bool) {
        self.items.retain(|i| keep(&i.payload));
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter().map(|i| &i.payload)
    }

    /// Removes and returns everything, oldest first.
    pub fn drain_all(&mut self) -> Vec<T> {
        self.items.drain(..).map(|i| i.payload).collect()
    }

    /// Pops the item that sorts first under `cmp` (`Less` runs earlier).
    pub fn pop_best_by(&mut self, mut cmp: impl FnMut(&T, &T) -> Ordering) -> Option<(WorkId, T)> {
        let mut best: Option<usize> = None;
        for (idx, item) in self.items.iter().enumerate() {
            match best {
                None => best = Some(idx),
                Some(b) => {
                    let ord = cmp(&item.payload, &self.items[b].payload)
                        .then_with(|| item.id.cmp(&self.items[b].id));
                    if ord == Ordering::Less {
                        best = Some(idx);
                    }
                }
            }
        }
        let idx = best?;
        let item = self.items.remove(idx);
        Some((item.id, item.payload))
    }
}
