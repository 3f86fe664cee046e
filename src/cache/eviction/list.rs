//! Arena-backed doubly-linked list used by the ordering policies.
//!
//! Nodes live in a slab of slots addressed by index, so repositioning and
//! unlinking are O(1) without raw pointers. Front = most recent, back = oldest.
//! A freed slot drops its key and both links immediately.

#[derive(Debug)]
struct Slot<K> {
    key: K,
    /// Neighbour towards the front
    prev: Option<usize>,
    /// Neighbour towards the back
    next: Option<usize>,
}

#[derive(Debug)]
pub(crate) struct LinkedSlab<K> {
    slots: Vec<Option<Slot<K>>>,
    free: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
    len: usize,
}

impl<K> LinkedSlab<K> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            head: None,
            tail: None,
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn key(&self, idx: usize) -> Option<&K> {
        self.slots.get(idx)?.as_ref().map(|slot| &slot.key)
    }

    pub fn back(&self) -> Option<usize> {
        self.tail
    }

    /// Neighbour of `idx` towards the front.
    pub fn towards_front(&self, idx: usize) -> Option<usize> {
        self.slots.get(idx)?.as_ref()?.prev
    }

    // == Push Front ==
    /// Links a new node at the front and returns its index.
    pub fn push_front(&mut self, key: K) -> usize {
        let slot = Slot {
            key,
            prev: None,
            next: self.head,
        };
        let idx = match self.free.pop() {
            Some(idx) => {
                self.slots[idx] = Some(slot);
                idx
            }
            None => {
                self.slots.push(Some(slot));
                self.slots.len() - 1
            }
        };

        if let Some(old_head) = self.head {
            if let Some(node) = self.slots[old_head].as_mut() {
                node.prev = Some(idx);
            }
        }
        self.head = Some(idx);
        if self.tail.is_none() {
            self.tail = Some(idx);
        }
        self.len += 1;
        idx
    }

    /// Detaches a node from its neighbours without freeing the slot.
    fn detach(&mut self, idx: usize) {
        let (prev, next) = match self.slots.get(idx).and_then(|s| s.as_ref()) {
            Some(slot) => (slot.prev, slot.next),
            None => return,
        };

        match prev {
            Some(p) => {
                if let Some(node) = self.slots[p].as_mut() {
                    node.next = next;
                }
            }
            None => self.head = next,
        }
        match next {
            Some(n) => {
                if let Some(node) = self.slots[n].as_mut() {
                    node.prev = prev;
                }
            }
            None => self.tail = prev,
        }
        if let Some(node) = self.slots[idx].as_mut() {
            node.prev = None;
            node.next = None;
        }
    }

    // == Move To Front ==
    pub fn move_to_front(&mut self, idx: usize) {
        if self.head == Some(idx) || self.key(idx).is_none() {
            return;
        }
        self.detach(idx);
        if let Some(node) = self.slots[idx].as_mut() {
            node.next = self.head;
        }
        if let Some(old_head) = self.head {
            if let Some(node) = self.slots[old_head].as_mut() {
                node.prev = Some(idx);
            }
        }
        self.head = Some(idx);
        if self.tail.is_none() {
            self.tail = Some(idx);
        }
    }

    // == Unlink ==
    /// Removes a node permanently and returns its key.
    pub fn unlink(&mut self, idx: usize) -> Option<K> {
        self.key(idx)?;
        self.detach(idx);
        let slot = self.slots[idx].take()?;
        self.free.push(idx);
        self.len -= 1;
        Some(slot.key)
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.free.clear();
        self.head = None;
        self.tail = None;
        self.len = 0;
    }

    /// Keys from the back (oldest) to the front (newest).
    pub fn iter_from_back(&self) -> impl Iterator<Item = (usize, &K)> + '_ {
        let mut cursor = self.tail;
        std::iter::from_fn(move || {
            let idx = cursor?;
            let slot = self.slots[idx].as_ref()?;
            cursor = slot.prev;
            Some((idx, &slot.key))
        })
    }
}
