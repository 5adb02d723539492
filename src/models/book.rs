use serde::{Deserialize, Serialize};

// ==================================================================================================
// Catalog Models
// ==================================================================================================

/// A catalog entry as returned by search and detail lookups
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Book {
    pub google_book_id: String,
    pub title: String,
    #[serde(default)]
    pub authors: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub thumbnail: Option<String>,
}

impl Book {
    /// Description cut to `max` characters with an ellipsis, for list views
    pub fn short_description(&self, max: usize) -> String {
        let description = self.description.as_deref().unwrap_or_default();
        if description.chars().count() <= max {
            return description.to_string();
        }
        let cut: String = description.chars().take(max).collect();
        format!("{}...", cut)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookSearchResponse {
    #[serde(default)]
    pub books: Vec<Book>,
    #[serde(default)]
    pub total_items: u64,
}

// ==================================================================================================
// Reading List Models
// ==================================================================================================

/// A book on the caller's reading list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadBook {
    pub id: i64,
    pub google_book_id: String,
    pub title: String,
    #[serde(default)]
    pub authors: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub thumbnail: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PagedReadBooks {
    #[serde(default)]
    pub content: Vec<ReadBook>,
    #[serde(default)]
    pub total_elements: u64,
}

/// Number of pages needed for `total` items, at least one
pub fn page_count(total: u64, size: u32) -> u64 {
    if size == 0 {
        return 1;
    }
    total.div_ceil(size as u64).max(1)
}
