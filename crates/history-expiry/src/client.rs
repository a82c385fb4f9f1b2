use std::collections::HashSet;
use std::sync::{PoisonError, RwLock};

/// Embedder hooks consulted before deleting user-pinned data.
pub trait HistoryBackendClient: Send + Sync {
    /// True if the user has bookmarked `url`.
    fn is_bookmarked(&self, url: &str) -> bool;

    fn is_any_bookmarked(&self, urls: &[String]) -> bool {
        urls.iter().any(|url| self.is_bookmarked(url))
    }
}

/// Bookmark set held in memory.
#[derive(Debug, Default)]
pub struct InMemoryBookmarks {
    urls: RwLock<HashSet<String>>,
}

impl InMemoryBookmarks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_urls<I, S>(urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            urls: RwLock::new(urls.into_iter().map(Into::into).collect()),
        }
    }

    /// One URL per line; blank lines and `#` comments are skipped.
    pub fn parse(text: &str) -> Self {
        Self::from_urls(
            text.lines()
                .map(str::trim)
                .filter(|line| !line.is_empty() && !line.starts_with('#')),
        )
    }

    pub fn add_bookmark(&self, url: impl Into<String>) {
        self.urls
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(url.into());
    }

    pub fn remove_bookmark(&self, url: &str) -> bool {
        self.urls
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(url)
    }

    pub fn clear(&self) {
        self.urls
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn len(&self) -> usize {
        self.urls.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl HistoryBackendClient for InMemoryBookmarks {
    fn is_bookmarked(&self, url: &str) -> bool {
        self.urls
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(url)
    }
}
