use crate::error::Result;
use crate::models::{Post, User};

const DEFAULT_USERS: &str = include_str!("seed/users.json");
const DEFAULT_POSTS: &str = include_str!("seed/posts.json");

pub fn default_users() -> Result<Vec<User>> {
    Ok(serde_json::from_str(DEFAULT_USERS)?)
}

pub fn default_posts() -> Result<Vec<Post>> {
    Ok(serde_json::from_str(DEFAULT_POSTS)?)
}
