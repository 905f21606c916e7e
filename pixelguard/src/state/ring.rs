// pixelguard/src/state/ring.rs
//
// Fixed-capacity circular buffer. Storage is allocated once up to capacity
// and then overwritten in place: `head` is the oldest slot, `len` the number
// of live entries. Pushing into a full ring evicts the oldest entry.

#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    buf:  Vec<T>,
    cap:  usize,
    head: usize,
    len:  usize,
}

impl<T: Copy> RingBuffer<T> {
    pub fn with_capacity(cap: usize) -> Self {
        let cap = cap.max(1);
        Self { buf: Vec::with_capacity(cap), cap, head: 0, len: 0 }
    }

    pub fn capacity(&self) -> usize { self.cap }
    pub fn len(&self) -> usize { self.len }
    pub fn is_empty(&self) -> bool { self.len == 0 }
    pub fn is_full(&self) -> bool { self.len == self.cap }

    fn slot(&self, i: usize) -> usize { (self.head + i) % self.cap }

    /// Append, returning the evicted oldest entry when full.
    pub fn push(&mut self, item: T) -> Option<T> {
        if self.len < self.cap {
            let idx = self.slot(self.len);
            if idx == self.buf.len() {
                self.buf.push(item);
            } else {
                self.buf[idx] = item;
            }
            self.len += 1;
            None
        } else {
            let old = self.buf[self.head];
            self.buf[self.head] = item;
            self.head = (self.head + 1) % self.cap;
            Some(old)
        }
    }

    pub fn pop_front(&mut self) -> Option<T> {
        if self.len == 0 { return None; }
        let item = self.buf[self.head];
        self.head = (self.head + 1) % self.cap;
        self.len -= 1;
        Some(item)
    }

    pub fn front(&self) -> Option<&T> {
        if self.len == 0 { None } else { Some(&self.buf[self.head]) }
    }

    pub fn back(&self) -> Option<&T> {
        if self.len == 0 { None } else { Some(&self.buf[self.slot(self.len - 1)]) }
    }

    /// Drop entries from the front while `pred` holds. Returns how many went.
    pub fn pop_front_while(&mut self, mut pred: impl FnMut(&T) -> bool) -> usize {
        let mut n = 0;
        while self.front().map(&mut pred).unwrap_or(false) {
            self.pop_front();
            n += 1;
        }
        n
    }

    /// Oldest → newest.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> + ExactSizeIterator + '_ {
        (0..self.len).map(move |i| &self.buf[self.slot(i)])
    }

    /// The most recent `n` entries, oldest first.
    pub fn recent(&self, n: usize) -> Vec<T> {
        let skip = self.len.saturating_sub(n);
        self.iter().skip(skip).copied().collect()
    }

    pub fn clear(&mut self) {
        self.buf.clear();
        self.head = 0;
        self.len = 0;
    }

    /// Rebuild with a new capacity, keeping the newest entries.
    pub fn resize(&mut self, cap: usize) {
        if cap.max(1) == self.cap { return; }
        let keep = self.recent(cap.max(1));
        *self = Self::with_capacity(cap);
        for item in keep {
            self.push(item);
        }
    }
}
