/// Per-pump cap on bytes uploaded to the GPU.
///
/// The check happens before each upload, so one oversized upload is always
/// allowed to go through; the budget then reports exhausted for the rest of the
/// pump.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct UploadBudget {
    limit_bytes: Option<usize>,
    spent_bytes: usize,
}

impl UploadBudget {
    pub fn new(limit_bytes: Option<usize>) -> Self {
        Self {
            limit_bytes,
            spent_bytes: 0,
        }
    }

    pub fn unlimited() -> Self {
        Self::new(None)
    }

    pub fn spent_bytes(&self) -> usize {
        self.spent_bytes
    }

    pub fn is_exhausted(&self) -> bool {
        match self.limit_bytes {
            Some(limit) => self.spent_bytes >= limit,
            None => false,
        }
    }

    pub fn spend(&mut self, bytes: usize) {
        self.spent_bytes = self.spent_bytes.saturating_add(bytes);
    }
}

#[cfg(test)]
mod tests {
    use super::UploadBudget;

    #[test]
    fn exhausts_after_reaching_limit() {
        let mut b = UploadBudget::new(Some(100));
        assert!(!b.is_exhausted());
        b.spend(60);
        assert!(!b.is_exhausted());
        b.spend(60);
        assert!(b.is_exhausted());
        assert_eq!(b.spent_bytes(), 120);
    }

    #[test]
    fn unlimited_never_exhausts() {
        let mut b = UploadBudget::unlimited();
        b.spend(usize::MAX);
        assert!(!b.is_exhausted());
    }
}
