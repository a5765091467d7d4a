//! Per-request context extracted by the auth middleware.

use sketchforge_core::OwnerId;

/// The authenticated actor for the current request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OwnerContext {
    owner_id: OwnerId,
}

impl OwnerContext {
    pub fn new(owner_id: OwnerId) -> Self {
        Self { owner_id }
    }

    pub fn owner_id(&self) -> OwnerId {
        self.owner_id
    }
}
