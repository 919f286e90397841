//! Live ranges and live intervals on the linearized position axis.

/// A closed range `[start, end]` of positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LiveRange {
    pub start: i32,
    pub end: i32,
}

impl LiveRange {
    pub fn new(start: i32, end: i32) -> Self {
        Self { start, end }
    }

    pub fn overlaps(&self, other: &LiveRange) -> bool {
        !(self.end < other.start || other.end < self.start)
    }

    /// Touching ranges can be merged into one.
    pub fn adjacent(&self, other: &LiveRange) -> bool {
        self.end + 1 == other.start || other.end + 1 == self.start
    }
}

/// Location of a value after register allocation: a physical register or a
/// stack byte offset (negative for spill slots, positive for caller-provided
/// stack parameters).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Location {
    Reg(u32),
    Stack(i32),
}

/// Live interval of one virtual register: an ordered set of disjoint,
/// non-adjacent ranges.
#[derive(Debug, Clone)]
pub struct LiveInterval {
    pub vreg: u32,
    pub ranges: Vec<LiveRange>,
    pub phys_reg: Option<u32>,
    pub spill_slot: Option<i32>,
}

impl LiveInterval {
    pub fn new(vreg: u32) -> Self {
        Self {
            vreg,
            ranges: Vec::new(),
            phys_reg: None,
            spill_slot: None,
        }
    }

    /// Insert `[start, end]`, merging every existing range it overlaps or
    /// touches so the vector stays sorted and disjoint.
    pub fn add_range(&mut self, start: i32, end: i32) {
        if start > end {
            return;
        }
        let mut nr = LiveRange::new(start, end);
        let mut merged = Vec::with_capacity(self.ranges.len() + 1);
        let mut placed = false;
        for &r in &self.ranges {
            if nr.overlaps(&r) || nr.adjacent(&r) {
                nr = LiveRange::new(nr.start.min(r.start), nr.end.max(r.end));
            } else if !placed && nr.start < r.start {
                merged.push(nr);
                merged.push(r);
                placed = true;
            } else {
                merged.push(r);
            }
        }
        if !placed {
            merged.push(nr);
        }

        // Growing the merged range may have made it touch a later one.
        self.ranges.clear();
        for r in merged {
            match self.ranges.last_mut() {
                Some(last) if last.overlaps(&r) || last.adjacent(&r) => {
                    *last = LiveRange::new(last.start.min(r.start), last.end.max(r.end));
                }
                _ => self.ranges.push(r),
            }
        }
    }

    pub fn contains(&self, pos: i32) -> bool {
        self.ranges
            .iter()
            .any(|r| pos >= r.start && pos <= r.end)
    }

    /// First active position; `i32::MAX` for an empty interval so empty
    /// intervals sort last.
    pub fn start(&self) -> i32 {
        self.ranges.first().map_or(i32::MAX, |r| r.start)
    }

    /// Last active position, -1 for an empty interval.
    pub fn end(&self) -> i32 {
        self.ranges.last().map_or(-1, |r| r.end)
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Whether two intervals are live at any common position. Both range
    /// vectors are sorted, so a single merge walk suffices.
    pub fn intersects(&self, other: &LiveInterval) -> bool {
        let (mut i, mut j) = (0, 0);
        while i < self.ranges.len() && j < other.ranges.len() {
            let a = self.ranges[i];
            let b = other.ranges[j];
            if a.end < b.start {
                i += 1;
            } else if b.end < a.start {
                j += 1;
            } else {
                return true;
            }
        }
        false
    }
}
