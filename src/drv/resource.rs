use crate::error::{DrvError, DrvResult};

/// On-device resources identified by small integer handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Stream,
    Event,
    TaskPool,
    SqCq,
}

impl ResourceKind {
    pub const ALL: [Self; 4] = [Self::Stream, Self::Event, Self::TaskPool, Self::SqCq];

    /// Number of ids available per device.
    #[must_use]
    pub const fn capacity(self) -> u32 {
        match self {
            Self::Stream | Self::Event | Self::SqCq => 1024,
            Self::TaskPool => 32760,
        }
    }

    const fn slot(self) -> usize {
        match self {
            Self::Stream => 0,
            Self::Event => 1,
            Self::TaskPool => 2,
            Self::SqCq => 3,
        }
    }

    /// Error reported when every id of this kind is taken. Callers branch on the difference.
    fn exhausted(self) -> DrvError {
        match self {
            Self::TaskPool => DrvError::OutOfMemory,
            _ => DrvError::Inner(format!("no free {self:?} id")),
        }
    }
}

/// A fixed-capacity bitmap where a set bit marks an allocated id.
#[derive(Debug, Clone)]
struct IdBitmap {
    words: Vec<u64>,
    capacity: u32,
}

impl IdBitmap {
    fn new(capacity: u32) -> Self {
        Self {
            words: vec![0; capacity.div_ceil(64) as usize],
            capacity,
        }
    }

    /// Sets and returns the lowest clear bit.
    fn allocate(&mut self) -> Option<u32> {
        for (w, word) in self.words.iter_mut().enumerate() {
            if *word == u64::MAX {
                continue;
            }
            let id = w as u32 * 64 + word.trailing_ones();
            if id >= self.capacity {
                return None;
            }
            *word |= 1 << (id % 64);
            return Some(id);
        }
        None
    }

    fn is_set(&self, id: u32) -> bool {
        id < self.capacity && self.words[(id / 64) as usize] & (1 << (id % 64)) != 0
    }

    fn clear(&mut self, id: u32) {
        self.words[(id / 64) as usize] &= !(1 << (id % 64));
    }

    fn count(&self) -> u32 {
        self.words.iter().map(|w| w.count_ones()).sum()
    }
}

/// Per-device id allocators, one bitmap per resource kind.
#[derive(Debug, Clone)]
pub struct ResourceIds {
    maps: [IdBitmap; 4],
}

impl Default for ResourceIds {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceIds {
    #[must_use]
    pub fn new() -> Self {
        Self {
            maps: ResourceKind::ALL.map(|k| IdBitmap::new(k.capacity())),
        }
    }

    /// Allocates the lowest free id of `kind`.
    ///
    /// # Errors
    /// `OutOfMemory` when task pools are exhausted, `Inner` for the other kinds.
    pub fn allocate(&mut self, kind: ResourceKind) -> DrvResult<u32> {
        self.maps[kind.slot()].allocate().ok_or_else(|| {
            log::warn!("{kind:?} ids exhausted ({} in use)", kind.capacity());
            kind.exhausted()
        })
    }

    /// Returns `id` to the pool.
    ///
    /// # Errors
    /// `InvalidValue` if `id` is out of range or not currently allocated.
    pub fn release(&mut self, kind: ResourceKind, id: u32) -> DrvResult<()> {
        let map = &mut self.maps[kind.slot()];
        if !map.is_set(id) {
            log::error!("release of unallocated {kind:?} id {id}");
            return Err(DrvError::InvalidValue(format!(
                "{kind:?} id {id} is not allocated"
            )));
        }
        map.clear(id);
        Ok(())
    }

    #[must_use]
    pub fn is_allocated(&self, kind: ResourceKind, id: u32) -> bool {
        self.maps[kind.slot()].is_set(id)
    }

    #[must_use]
    pub fn in_use(&self, kind: ResourceKind) -> u32 {
        self.maps[kind.slot()].count()
    }
}
