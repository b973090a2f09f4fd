//! Graph resource identifiers

/// Pass identifier
#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq)]
pub struct PassId(pub usize);

/// Resource handle for graph resources and temporary targets
#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq)]
pub struct ResourceHandle(pub u64);

impl ResourceHandle {
    /// Handle derived from a name; the same name always gives the same handle
    pub fn named(name: &str) -> Self {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut hasher = DefaultHasher::new();
        name.hash(&mut hasher);
        Self(hasher.finish())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn named_handles_are_stable() {
        assert_eq!(ResourceHandle::named("motion"), ResourceHandle::named("motion"));
        assert_ne!(ResourceHandle::named("motion"), ResourceHandle::named("color"));
    }
}
