//! Read-only views other components depend on instead of concrete queues.

/// Occupancy of a capacity-limited store.
///
/// The disapproval monitor samples the backlog through this port so it never
/// gains push or pop access to the queue it watches.
pub trait QueueGauge: Send + Sync {
    /// Number of items currently held.
    fn size(&self) -> usize;

    /// Maximum number of items the store accepts.
    fn capacity(&self) -> usize;

    /// Whether no further item fits.
    fn is_full(&self) -> bool {
        self.size() >= self.capacity()
    }

    /// Occupancy as a fraction of capacity, in `[0, 1]`.
    fn occupancy(&self) -> f64 {
        let capacity = self.capacity();
        if capacity == 0 {
            return 0.0;
        }
        self.size() as f64 / capacity as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(usize, usize);

    impl QueueGauge for Fixed {
        fn size(&self) -> usize {
            self.0
        }

        fn capacity(&self) -> usize {
            self.1
        }
    }

    #[test]
    fn test_occupancy() {
        assert!((Fixed(3, 5).occupancy() - 0.6).abs() < f64::EPSILON);
        assert!(Fixed(0, 0).occupancy().abs() < f64::EPSILON);
    }

    #[test]
    fn test_is_full() {
        assert!(Fixed(5, 5).is_full());
        assert!(!Fixed(4, 5).is_full());
    }
}
