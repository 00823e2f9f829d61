use std::collections::HashSet;
use std::hash::Hash;

/// Begin/end lifecycle between two consecutive steps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transitions<T> {
    pub began: Vec<T>,
    pub ended: Vec<T>,
    pub stayed: Vec<T>,
}

impl<T> Default for Transitions<T> {
    fn default() -> Self {
        Self {
            began: Vec::new(),
            ended: Vec::new(),
            stayed: Vec::new(),
        }
    }
}

impl<T> Transitions<T> {
    pub fn is_empty(&self) -> bool {
        self.began.is_empty() && self.ended.is_empty() && self.stayed.is_empty()
    }

    pub fn clear(&mut self) {
        self.began.clear();
        self.ended.clear();
        self.stayed.clear();
    }
}

/// Compute begin/end/stay transitions from current and previous sets.
/// Output vectors are sorted so dispatch order never depends on hashing.
pub fn compute_transitions<T>(current: &HashSet<T>, previous: &HashSet<T>, out: &mut Transitions<T>)
where
    T: Copy + Eq + Hash + Ord,
{
    out.clear();
    for item in current {
        if previous.contains(item) {
            out.stayed.push(*item);
        } else {
            out.began.push(*item);
        }
    }
    out.ended
        .extend(previous.iter().filter(|item| !current.contains(item)).copied());

    out.began.sort_unstable();
    out.ended.sort_unstable();
    out.stayed.sort_unstable();
}
