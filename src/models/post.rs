use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::render;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PostStatus {
    #[default]
    Draft,
    Published,
    Archived,
}

impl PostStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PostStatus::Draft => "draft",
            PostStatus::Published => "published",
            PostStatus::Archived => "archived",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub id: String,
    pub title: String,
    pub content: String,
    pub excerpt: String,
    pub slug: String,
    pub author_id: String,
    pub category: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub status: PostStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub featured_image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub view_count: u64,
    #[serde(default)]
    pub is_feature: bool,
}

impl Post {
    pub fn is_published(&self) -> bool {
        self.status == PostStatus::Published
    }

    /// Timestamp used to order public listings, newest first.
    pub fn display_date(&self) -> DateTime<Utc> {
        self.published_at.unwrap_or(self.created_at)
    }
}

/// What the editor hands over on save, for both new and edited posts.
#[derive(Debug, Clone, Default)]
pub struct PostDraft {
    pub title: String,
    pub content: String,
    pub excerpt: String,
    pub featured_image: Option<String>,
    pub category: String,
    pub tags: Vec<String>,
}

impl PostDraft {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.title.trim().is_empty() {
            return Err(ValidationError::MissingField("title"));
        }
        if self.content.trim().is_empty() {
            return Err(ValidationError::MissingField("content"));
        }
        Ok(())
    }

    fn resolved_excerpt(&self, max_chars: usize) -> String {
        let excerpt = self.excerpt.trim();
        if excerpt.is_empty() {
            derive_excerpt(self.content.trim(), max_chars)
        } else {
            excerpt.to_string()
        }
    }

    fn resolved_image(&self) -> Option<String> {
        self.featured_image
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    }

    /// Builds a new post. Saving from the editor always publishes.
    pub fn into_post(self, author_id: &str, now: DateTime<Utc>, excerpt_len: usize) -> Post {
        let excerpt = self.resolved_excerpt(excerpt_len);
        let featured_image = self.resolved_image();
        let title = self.title.trim().to_string();
        Post {
            id: String::new(),
            slug: slugify(&title),
            title,
            content: self.content.trim().to_string(),
            excerpt,
            author_id: author_id.to_string(),
            category: self.category.trim().to_string(),
            tags: self.tags,
            status: PostStatus::Published,
            featured_image,
            published_at: Some(now),
            scheduled_at: None,
            created_at: now,
            updated_at: now,
            view_count: 0,
            is_feature: false,
        }
    }

    /// Edit path: author, creation time, status, views and the featured
    /// flag pass through untouched. The slug is kept so links stay stable.
    pub fn apply_to(self, post: &mut Post, now: DateTime<Utc>, excerpt_len: usize) {
        post.excerpt = self.resolved_excerpt(excerpt_len);
        post.featured_image = self.resolved_image();
        post.title = self.title.trim().to_string();
        post.content = self.content.trim().to_string();
        post.category = self.category.trim().to_string();
        post.tags = self.tags;
        post.updated_at = now.max(post.created_at);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PostFilter {
    pub category: Option<String>,
    pub search: Option<String>,
}

impl PostFilter {
    pub fn matches(&self, post: &Post) -> bool {
        let category_ok = match self.category.as_deref() {
            None | Some("all") => true,
            Some(category) => post.category == category,
        };
        let search_ok = match self.search.as_deref().map(str::trim) {
            None | Some("") => true,
            Some(term) => {
                let term = term.to_lowercase();
                post.title.to_lowercase().contains(&term)
                    || post.excerpt.to_lowercase().contains(&term)
            }
        };
        category_ok && search_ok
    }
}

fn whitespace_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").expect("valid whitespace pattern"))
}

fn non_word_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^\w-]").expect("valid slug pattern"))
}

/// Lowercase, whitespace runs to `-`, everything else that is not a word
/// character dropped. Not unique across posts.
pub fn slugify(title: &str) -> String {
    let lowered = title.trim().to_lowercase();
    let hyphenated = whitespace_re().replace_all(&lowered, "-");
    non_word_re().replace_all(&hyphenated, "").into_owned()
}

pub fn derive_excerpt(content: &str, max_chars: usize) -> String {
    let text = render::plain_text(content);
    let head: String = text.chars().take(max_chars).collect();
    format!("{}...", head.trim_end())
}

/// Comma-separated editor input into an ordered tag list.
pub fn parse_tags(input: &str) -> Vec<String> {
    let mut tags: Vec<String> = Vec::new();
    for tag in input.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        if !tags.iter().any(|t| t == tag) {
            tags.push(tag.to_string());
        }
    }
    tags
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn draft() -> PostDraft {
        PostDraft {
            title: "  Old Mills of the Valley ".to_string(),
            content: "The **mills** along the river.".to_string(),
            excerpt: String::new(),
            featured_image: Some("   ".to_string()),
            category: "History".to_string(),
            tags: parse_tags("mills, river, , mills"),
        }
    }

    #[test]
    fn slug_lowercases_hyphenates_and_strips() {
        assert_eq!(slugify("Hello,  World!"), "hello-world");
        assert_eq!(slugify("Rust & You: part 2"), "rust--you-part-2");
        assert_eq!(slugify("Стара воденица"), "стара-воденица");
    }

    #[test]
    fn tags_are_trimmed_and_deduplicated() {
        assert_eq!(parse_tags(" a, b ,,a,c "), vec!["a", "b", "c"]);
        assert!(parse_tags("  ,  ").is_empty());
    }

    #[test]
    fn new_post_is_published_with_derived_fields() {
        let now = Utc::now();
        let post = draft().into_post("author-1", now, 150);
        assert_eq!(post.status, PostStatus::Published);
        assert_eq!(post.slug, "old-mills-of-the-valley");
        assert_eq!(post.title, "Old Mills of the Valley");
        assert_eq!(post.excerpt, "The mills along the river....");
        assert_eq!(post.featured_image, None);
        assert_eq!(post.tags, vec!["mills", "river"]);
        assert_eq!(post.published_at, Some(now));
        assert_eq!(post.view_count, 0);
        assert!(!post.is_feature);
        assert!(post.id.is_empty());
    }

    #[test]
    fn excerpt_is_truncated_by_characters() {
        let excerpt = derive_excerpt("абвгдђежзијклљмн", 5);
        assert_eq!(excerpt, "абвгд...");
    }

    #[test]
    fn edit_keeps_identity_fields() {
        let created = Utc::now();
        let mut post = draft().into_post("author-1", created, 150);
        post.id = "p1".to_string();
        post.view_count = 42;
        post.is_feature = true;

        let edit = PostDraft {
            title: "New title".to_string(),
            content: "Rewritten".to_string(),
            excerpt: "Short".to_string(),
            featured_image: Some("https://img.example/x.jpg".to_string()),
            category: "Culture".to_string(),
            tags: vec!["x".to_string()],
        };
        edit.apply_to(&mut post, created - Duration::hours(1), 150);

        assert_eq!(post.id, "p1");
        assert_eq!(post.author_id, "author-1");
        assert_eq!(post.view_count, 42);
        assert!(post.is_feature);
        assert_eq!(post.slug, "old-mills-of-the-valley");
        assert_eq!(post.title, "New title");
        assert_eq!(post.excerpt, "Short");
        assert!(post.updated_at >= post.created_at);
    }

    #[test]
    fn draft_requires_title_and_content() {
        let mut d = draft();
        d.content = "  ".to_string();
        assert_eq!(d.validate(), Err(ValidationError::MissingField("content")));
        d.title.clear();
        assert_eq!(d.validate(), Err(ValidationError::MissingField("title")));
    }

    #[test]
    fn filter_matches_category_and_case_insensitive_search() {
        let post = draft().into_post("a", Utc::now(), 150);
        let filter = PostFilter {
            category: Some("History".to_string()),
            search: Some("MILLS".to_string()),
        };
        assert!(filter.matches(&post));
        let other = PostFilter {
            category: Some("Culture".to_string()),
            search: None,
        };
        assert!(!other.matches(&post));
        assert!(PostFilter::default().matches(&post));
    }
}
