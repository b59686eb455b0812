use std::cell::Cell;
use std::rc::Rc;

use chrono::Utc;

use crate::config::Config;
use crate::db::Repository;
use crate::error::{AppError, Result};
use crate::models::{
    with_live_counts, Category, Post, PostDraft, PostFilter, PostStatus, ProfileEdit, Role, User,
};
use crate::notify::{Subscription, Topic};
use crate::policy::Access;
use crate::render;
use crate::session::{LocalSession, Registration, SessionBackend};

const UNKNOWN_AUTHOR: &str = "Unknown author";
const RECENT_POSTS: usize = 5;

pub struct BlogListing {
    pub featured: Vec<Post>,
    pub regular: Vec<Post>,
}

pub struct RenderedPost {
    pub post: Post,
    pub author_name: String,
    pub html: String,
    pub reading_minutes: usize,
}

pub struct Dashboard {
    pub user: User,
    pub posts: Vec<Post>,
    pub published: usize,
    pub drafts: usize,
    pub total_views: u64,
    /// Only filled in for moderators.
    pub users: Option<Vec<User>>,
}

impl Dashboard {
    pub fn recent(&self) -> &[Post] {
        &self.posts[..self.posts.len().min(RECENT_POSTS)]
    }
}

/// Glue between the views and the store. Keeps a local copy of the posts
/// that is thrown away whenever the store reports a change.
pub struct App {
    repository: Rc<Repository>,
    session: LocalSession,
    excerpt_length: usize,
    default_category: String,
    categories: Vec<Category>,

    posts: Vec<Post>,
    posts_stale: Rc<Cell<bool>>,
    _subscriptions: Vec<Subscription>,
}

impl App {
    pub fn new(repository: Rc<Repository>, config: &Config) -> Self {
        let posts_stale = Rc::new(Cell::new(true));
        let subscriptions = [Topic::PostsChanged, Topic::StorageChanged]
            .into_iter()
            .map(|topic| {
                let stale = Rc::clone(&posts_stale);
                repository.subscribe(topic, move |_| stale.set(true))
            })
            .collect();

        let session = LocalSession::new(Rc::clone(&repository), config.min_password_length);

        Self {
            repository,
            session,
            excerpt_length: config.excerpt_length,
            default_category: config.default_category.clone(),
            categories: config.categories.clone(),
            posts: Vec::new(),
            posts_stale,
            _subscriptions: subscriptions,
        }
    }

    pub fn open(config: &Config) -> Result<Self> {
        let repository = Rc::new(Repository::open(config)?);
        Ok(Self::new(repository, config))
    }

    /// Cached posts. A failed read shows as empty and is retried on the
    /// next call.
    pub fn posts(&mut self) -> &[Post] {
        if self.posts_stale.replace(false) {
            match self.repository.list() {
                Ok(posts) => {
                    self.posts = posts;
                    tracing::debug!("reloaded {} posts", self.posts.len());
                }
                Err(e) => {
                    tracing::warn!("{}: treating posts as empty", e);
                    self.posts.clear();
                    self.posts_stale.set(true);
                }
            }
        }
        &self.posts
    }

    /// Re-checks the backing storage for writes made by other processes.
    pub fn sync_external(&mut self) -> Result<bool> {
        self.repository.poll_external_changes()
    }

    // Session

    pub fn current_user(&self) -> Option<User> {
        self.session.current_user().unwrap_or_else(|e| {
            tracing::warn!("could not read session: {}", e);
            None
        })
    }

    fn require_user(&self) -> Result<User> {
        self.current_user()
            .ok_or(AppError::Forbidden("sign in first"))
    }

    pub fn sign_in(&self, email: &str, password: &str) -> Result<User> {
        self.session.sign_in(email, password)
    }

    pub fn sign_out(&self) -> Result<()> {
        self.session.sign_out()
    }

    pub fn register(&self, form: Registration) -> Result<User> {
        self.session.sign_up(form)
    }

    /// Admins may reset anyone, users themselves. An account that never had
    /// a password gets its first one without a session.
    pub fn set_password(&self, email: &str, password: &str) -> Result<()> {
        let user = self.current_user();
        let access = Access::new(user.as_ref());
        let own = user.as_ref().is_some_and(|u| u.has_email(email));
        if !(access.can_admin() || own || !self.session.has_credential(email)?) {
            return Err(AppError::Forbidden("only admins can reset other passwords"));
        }
        self.session.set_password(email, password)
    }

    pub fn update_profile(&self, edit: ProfileEdit) -> Result<User> {
        let user = self.require_user()?;
        self.repository.modify::<User>(&user.id, |u| edit.apply_to(u))?;
        self.repository
            .get::<User>(&user.id)?
            .ok_or_else(|| AppError::NotFound {
                collection: "users",
                id: user.id.clone(),
            })
    }

    // Public blog

    pub fn author_name(&self, author_id: &str) -> String {
        self.repository
            .list_or_empty::<User>()
            .into_iter()
            .find(|u| u.id == author_id)
            .map(|u| u.name)
            .unwrap_or_else(|| UNKNOWN_AUTHOR.to_string())
    }

    pub fn blog_listing(&mut self, filter: &PostFilter) -> BlogListing {
        let (featured, regular): (Vec<Post>, Vec<Post>) = self
            .posts()
            .iter()
            .filter(|p| p.is_published())
            .cloned()
            .partition(|p| p.is_feature);

        BlogListing {
            featured,
            regular: regular.into_iter().filter(|p| filter.matches(p)).collect(),
        }
    }

    pub fn categories(&mut self) -> Vec<Category> {
        let categories = self.categories.clone();
        with_live_counts(&categories, self.posts())
    }

    /// Looks a post up by id or slug, counts the view and renders the body.
    /// Unpublished posts are only shown to users who could see them in the
    /// dashboard.
    pub fn open_post(&mut self, key: &str) -> Result<RenderedPost> {
        let user = self.current_user();
        let found = self
            .posts()
            .iter()
            .find(|p| p.id == key || p.slug == key)
            .filter(|p| p.is_published() || Access::new(user.as_ref()).can_see_in_dashboard(p))
            .cloned();
        let Some(mut post) = found else {
            return Err(AppError::NotFound {
                collection: "posts",
                id: key.to_string(),
            });
        };

        if self.repository.modify::<Post>(&post.id, |p| p.view_count += 1)? {
            post.view_count += 1;
        }

        Ok(RenderedPost {
            author_name: self.author_name(&post.author_id),
            html: render::render(&post.content),
            reading_minutes: render::reading_minutes(&post.content),
            post,
        })
    }

    // Dashboard and editor

    pub fn dashboard(&mut self) -> Result<Dashboard> {
        let user = self.require_user()?;
        let access = Access::new(Some(&user));

        let posts: Vec<Post> = self
            .posts()
            .iter()
            .filter(|p| access.can_see_in_dashboard(p))
            .cloned()
            .collect();
        let users = if access.can_moderate() {
            Some(self.repository.list_or_empty())
        } else {
            None
        };

        Ok(Dashboard {
            published: posts.iter().filter(|p| p.is_published()).count(),
            drafts: posts
                .iter()
                .filter(|p| p.status == PostStatus::Draft)
                .count(),
            total_views: posts.iter().map(|p| p.view_count).sum(),
            posts,
            users,
            user,
        })
    }

    pub fn save_new_post(&mut self, mut draft: PostDraft) -> Result<Post> {
        let user = self.require_user()?;
        draft.validate()?;
        if draft.category.trim().is_empty() {
            draft.category = self.default_category.clone();
        }

        let mut post = draft.into_post(&user.id, Utc::now(), self.excerpt_length);
        post.id = self.repository.create(post.clone())?;
        tracing::info!("{} published {}", user.email, post.id);
        Ok(post)
    }

    /// Editors and admins may edit any post; other users only reach their
    /// own posts through the dashboard.
    pub fn edit_post(&mut self, id: &str, draft: PostDraft) -> Result<Post> {
        let user = self.require_user()?;
        draft.validate()?;

        let Some(mut post) = self.repository.get::<Post>(id)? else {
            return Err(AppError::NotFound {
                collection: "posts",
                id: id.to_string(),
            });
        };
        let access = Access::new(Some(&user));
        if !(access.can_edit(id) || access.can_see_in_dashboard(&post)) {
            return Err(AppError::Forbidden("cannot edit this post"));
        }

        draft.apply_to(&mut post, Utc::now(), self.excerpt_length);
        if !self.repository.update(id, post.clone())? {
            return Err(AppError::NotFound {
                collection: "posts",
                id: id.to_string(),
            });
        }
        Ok(post)
    }

    pub fn delete_post(&mut self, id: &str) -> Result<()> {
        let user = self.require_user()?;
        if !Access::new(Some(&user)).can_admin() {
            return Err(AppError::Forbidden("only admins can delete posts"));
        }
        if !self.repository.delete::<Post>(id)? {
            return Err(AppError::NotFound {
                collection: "posts",
                id: id.to_string(),
            });
        }
        Ok(())
    }

    // User administration

    pub fn users(&self) -> Result<Vec<User>> {
        let user = self.require_user()?;
        if !Access::new(Some(&user)).can_moderate() {
            return Err(AppError::Forbidden("only editors and admins can list users"));
        }
        self.repository.list()
    }

    fn admin_on_other(&self, target_id: &str) -> Result<User> {
        let user = self.require_user()?;
        if !Access::new(Some(&user)).can_admin() {
            return Err(AppError::Forbidden("only admins can manage users"));
        }
        if user.id == target_id {
            return Err(AppError::Forbidden("admins cannot change their own account here"));
        }
        Ok(user)
    }

    fn modify_user(&self, id: &str, f: impl FnOnce(&mut User)) -> Result<()> {
        if !self.repository.modify::<User>(id, f)? {
            return Err(AppError::NotFound {
                collection: "users",
                id: id.to_string(),
            });
        }
        Ok(())
    }

    pub fn set_role(&self, user_id: &str, role: Role) -> Result<()> {
        self.admin_on_other(user_id)?;
        self.modify_user(user_id, |u| u.role = role)?;
        tracing::info!("role of {} set to {}", user_id, role);
        Ok(())
    }

    pub fn set_active(&self, user_id: &str, active: bool) -> Result<()> {
        self.admin_on_other(user_id)?;
        self.modify_user(user_id, |u| u.is_active = active)
    }

    pub fn delete_user(&self, user_id: &str) -> Result<()> {
        self.admin_on_other(user_id)?;
        let Some(target) = self.repository.get::<User>(user_id)? else {
            return Err(AppError::NotFound {
                collection: "users",
                id: user_id.to_string(),
            });
        };
        self.repository.delete::<User>(user_id)?;
        self.session.forget_credentials(&target.email)?;
        tracing::info!("deleted user {}", target.email);
        Ok(())
    }
}
