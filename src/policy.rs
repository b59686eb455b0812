//! Role-based capability checks. Every check is `false` without a user.

use crate::models::{Post, Role, User};

impl Role {
    pub fn can_edit(&self) -> bool {
        matches!(self, Role::SuperAdmin | Role::Editor)
    }

    pub fn can_moderate(&self) -> bool {
        matches!(self, Role::SuperAdmin | Role::Editor)
    }

    pub fn can_admin(&self) -> bool {
        matches!(self, Role::SuperAdmin)
    }
}

/// Capabilities of the current session user, if any.
#[derive(Debug, Clone, Copy)]
pub struct Access<'a> {
    user: Option<&'a User>,
}

impl<'a> Access<'a> {
    pub fn new(user: Option<&'a User>) -> Self {
        Self { user }
    }

    fn role(&self) -> Option<Role> {
        self.user.map(|u| u.role)
    }

    /// Authorship is deliberately not consulted: editors and admins may
    /// edit any post, authors none. `_post_id` is kept so an ownership rule
    /// can be introduced without touching callers.
    pub fn can_edit(&self, _post_id: &str) -> bool {
        self.role().is_some_and(|r| r.can_edit())
    }

    pub fn can_moderate(&self) -> bool {
        self.role().is_some_and(|r| r.can_moderate())
    }

    pub fn can_admin(&self) -> bool {
        self.role().is_some_and(|r| r.can_admin())
    }

    /// Dashboard visibility: moderators see every post, others their own.
    pub fn can_see_in_dashboard(&self, post: &Post) -> bool {
        match self.user {
            Some(user) => user.role.can_moderate() || post.author_id == user.id,
            None => false,
        }
    }
}
