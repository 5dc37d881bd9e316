use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::model::{ChatId, UserId};
use crate::observability;

/// Status of a user in the organization chat as reported by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberStatus {
    Creator,
    Administrator,
    Member,
    Restricted,
    Left,
    Kicked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Creator,
    Administrator,
    Member,
}

impl Role {
    pub fn is_admin(self) -> bool {
        matches!(self, Role::Creator | Role::Administrator)
    }

    /// Statuses that map onto a role; everything else is not a member.
    pub fn is_supported_status(status: MemberStatus) -> bool {
        Role::from_status(status).is_some()
    }

    pub fn from_status(status: MemberStatus) -> Option<Role> {
        match status {
            MemberStatus::Creator => Some(Role::Creator),
            MemberStatus::Administrator => Some(Role::Administrator),
            MemberStatus::Member => Some(Role::Member),
            MemberStatus::Restricted | MemberStatus::Left | MemberStatus::Kicked => None,
        }
    }
}

/// Failure of the membership lookup itself. [`RoleCache`] absorbs it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    Lookup(String),
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthError::Lookup(e) => write!(f, "membership lookup failed: {e}"),
        }
    }
}

impl std::error::Error for AuthError {}

/// The user is not in the organization chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotMember(pub UserId);

impl std::fmt::Display for NotMember {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "user {} is not a member", self.0)
    }
}

impl std::error::Error for NotMember {}

#[async_trait]
pub trait MembershipLookup: Send + Sync {
    async fn member_status(&self, chat_id: ChatId, user_id: UserId)
    -> Result<MemberStatus, AuthError>;
}

#[derive(Debug, Clone, Copy)]
struct RoleCacheEntry {
    role: Role,
    expires_at: Instant,
}

/// Role lookups cached per user for a fixed TTL. Entries are replaced, never
/// updated in place.
pub struct RoleCache {
    lookup: Arc<dyn MembershipLookup>,
    /// Chat whose membership decides roles. Without one everybody is a
    /// plain member.
    org_chat: Option<ChatId>,
    ttl: Duration,
    entries: DashMap<UserId, RoleCacheEntry>,
}

impl RoleCache {
    pub fn new(lookup: Arc<dyn MembershipLookup>, org_chat: Option<ChatId>, ttl: Duration) -> Self {
        Self {
            lookup,
            org_chat,
            ttl,
            entries: DashMap::new(),
        }
    }

    /// Cached role while `now <= expires_at`, otherwise asks the transport.
    /// A failed lookup degrades to `Member` and is not cached.
    pub async fn get_role(&self, user_id: UserId) -> Result<Role, NotMember> {
        let Some(org_chat) = self.org_chat else {
            return Ok(Role::Member);
        };
        let now = Instant::now();
        if let Some(entry) = self.entries.get(&user_id)
            && now <= entry.expires_at
        {
            metrics::counter!(observability::ROLE_LOOKUPS_TOTAL, "result" => "hit").increment(1);
            return Ok(entry.role);
        }

        match self.lookup.member_status(org_chat, user_id).await {
            Ok(status) => {
                metrics::counter!(observability::ROLE_LOOKUPS_TOTAL, "result" => "miss")
                    .increment(1);
                let role = Role::from_status(status).ok_or(NotMember(user_id))?;
                self.entries.insert(
                    user_id,
                    RoleCacheEntry {
                        role,
                        expires_at: Instant::now() + self.ttl,
                    },
                );
                Ok(role)
            }
            Err(e) => {
                metrics::counter!(observability::ROLE_LOOKUPS_TOTAL, "result" => "degraded")
                    .increment(1);
                tracing::warn!("role lookup for user {user_id} failed, assuming member: {e}");
                Ok(Role::Member)
            }
        }
    }

    pub async fn is_admin(&self, user_id: UserId) -> bool {
        self.get_role(user_id).await.is_ok_and(Role::is_admin)
    }

    pub fn invalidate(&self, user_id: UserId) {
        self.entries.remove(&user_id);
    }
}
