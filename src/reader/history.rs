/// Back-navigation history of page indices.
///
/// Unlike a browser-style jump list there is no forward direction: explicit
/// navigation pushes the page being left and "back" pops it again.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct HistoryStack {
    entries: Vec<usize>,
}

impl HistoryStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, page: usize) {
        self.entries.push(page);
    }

    pub fn pop(&mut self) -> Option<usize> {
        self.entries.pop()
    }

    pub fn peek(&self) -> Option<usize> {
        self.entries.last().copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_is_lifo() {
        let mut history = HistoryStack::new();
        history.push(3);
        history.push(7);

        assert_eq!(history.peek(), Some(7));
        assert_eq!(history.pop(), Some(7));
        assert_eq!(history.pop(), Some(3));
        assert_eq!(history.pop(), None);
    }

    #[test]
    fn test_history_keeps_duplicates() {
        // Unbounded and unfiltered: the same page twice means two back steps
        let mut history = HistoryStack::new();
        for _ in 0..2 {
            history.push(5);
        }
        assert_eq!(history.len(), 2);
        history.clear();
        assert!(history.is_empty());
    }
}
