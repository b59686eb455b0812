mod category;
mod post;
mod user;

pub use category::{with_live_counts, Category};
pub use post::{parse_tags, Post, PostDraft, PostFilter, PostStatus};
pub use user::{normalize_email, ProfileEdit, Role, User};
