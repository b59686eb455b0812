use serde::{Deserialize, Serialize};

use super::post::{slugify, Post};

/// Display and filter metadata. Categories are configured, not stored, and
/// `post_count` is always recomputed from the live posts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Category {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub slug: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing)]
    pub post_count: usize,
}

impl Category {
    pub fn new(id: &str, name: &str, description: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            slug: slugify(name),
            description: description.to_string(),
            post_count: 0,
        }
    }
}

pub fn with_live_counts(categories: &[Category], posts: &[Post]) -> Vec<Category> {
    categories
        .iter()
        .map(|category| Category {
            slug: if category.slug.is_empty() {
                slugify(&category.name)
            } else {
                category.slug.clone()
            },
            post_count: posts
                .iter()
                .filter(|p| p.is_published() && p.category == category.name)
                .count(),
            ..category.clone()
        })
        .collect()
}
