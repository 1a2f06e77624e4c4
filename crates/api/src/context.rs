use fieldstock_core::{BusinessId, UserId};

/// Business (tenant) context for a request.
///
/// This is immutable and must be present for all domain routes.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct BusinessContext {
    business_id: BusinessId,
}

impl BusinessContext {
    pub fn new(business_id: BusinessId) -> Self {
        Self { business_id }
    }

    pub fn business_id(&self) -> BusinessId {
        self.business_id
    }
}

/// The user acting on the request, when the caller names one.
///
/// Approvals and rejections require it; postings record it when present.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct ActorContext {
    user_id: Option<UserId>,
}

impl ActorContext {
    pub fn new(user_id: Option<UserId>) -> Self {
        Self { user_id }
    }

    pub fn user_id(&self) -> Option<UserId> {
        self.user_id
    }
}
