use crate::shopify::articles::{Article, ArticleListParams, fetch_article_page};
use crate::shopify::{ShopifyError, StoreCredentials};
use chrono::{DateTime, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Forward,
    Backward,
}

impl Direction {
    fn opposite(self) -> Self {
        match self {
            Self::Forward => Self::Backward,
            Self::Backward => Self::Forward,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Forward => write!(f, "forward"),
            Self::Backward => write!(f, "backward"),
        }
    }
}

#[derive(Debug, Error)]
pub enum WalkError {
    #[error("invalid pivot date {input:?}: {reason}")]
    InvalidPivot { input: String, reason: String },
    #[error("{direction} fetch failed: {source}")]
    Fetch {
        direction: Direction,
        cursor: Option<String>,
        #[source]
        source: ShopifyError,
    },
}

/// Accepts RFC3339 timestamps or bare `YYYY-MM-DD` dates (midnight UTC).
pub fn parse_pivot(input: &str) -> Result<DateTime<Utc>, WalkError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(WalkError::InvalidPivot {
            input: input.to_string(),
            reason: "empty".to_string(),
        });
    }
    if let Ok(instant) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(instant.with_timezone(&Utc));
    }
    if let Ok(date) = chrono::NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        return Ok(NaiveDateTime::new(date, NaiveTime::MIN).and_utc());
    }
    Err(WalkError::InvalidPivot {
        input: trimmed.to_string(),
        reason: "expected RFC3339 or YYYY-MM-DD".to_string(),
    })
}

/// Articles keyed by id. Pages from either direction merge in; an id only
/// ever occupies one slot, and a forward-sourced copy beats a
/// backward-sourced one when both arms surface the same id.
#[derive(Debug, Default)]
pub struct ArticleSet {
    entries: HashMap<i64, CollectedArticle>,
}

#[derive(Debug, Clone)]
struct CollectedArticle {
    article: Article,
    source: Direction,
}

impl ArticleSet {
    /// Returns true when the article was new to the set. Duplicates leave
    /// the size unchanged regardless of direction.
    pub fn merge(&mut self, article: Article, direction: Direction) -> bool {
        match self.entries.get_mut(&article.id) {
            None => {
                self.entries.insert(
                    article.id,
                    CollectedArticle {
                        article,
                        source: direction,
                    },
                );
                true
            }
            Some(existing) => {
                if direction == Direction::Forward && existing.source == Direction::Backward {
                    *existing = CollectedArticle {
                        article,
                        source: Direction::Forward,
                    };
                }
                false
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: i64) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn get(&self, id: i64) -> Option<&Article> {
        self.entries.get(&id).map(|entry| &entry.article)
    }

    /// Ascending `created_at`, ties broken by id.
    pub fn into_sorted(self) -> Vec<Article> {
        let mut articles: Vec<Article> = self
            .entries
            .into_values()
            .map(|entry| entry.article)
            .collect();
        articles.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        articles
    }
}

/// One arm's position in the listing. `cursor` and `exhausted` drive the
/// walk; `started` only reports to callers whether the arm has fetched a
/// page yet.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArmState {
    pub cursor: Option<String>,
    pub exhausted: bool,
    pub started: bool,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct WalkProgress {
    pub pages_fetched: u32,
    pub items_collected: usize,
    pub direction: Direction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResumeCursors {
    pub forward: ArmState,
    pub backward: ArmState,
}

/// Bidirectional walk over one blog's article listing, fanning out from a
/// pivot instant. Each arm keeps its own cursor; arms alternate while both
/// have pages left.
#[derive(Debug)]
pub struct CatalogWalk {
    blog_id: i64,
    pivot: DateTime<Utc>,
    forward: ArmState,
    backward: ArmState,
    next_arm: Direction,
    pages_fetched: u32,
    articles: ArticleSet,
}

impl CatalogWalk {
    pub fn new(blog_id: i64, pivot: DateTime<Utc>) -> Self {
        Self {
            blog_id,
            pivot,
            forward: ArmState::default(),
            backward: ArmState::default(),
            next_arm: Direction::Forward,
            pages_fetched: 0,
            articles: ArticleSet::default(),
        }
    }

    /// Picks up a walk from cursors returned by an earlier run. The set
    /// starts empty; already-delivered articles are the caller's to keep.
    pub fn with_cursors(blog_id: i64, pivot: DateTime<Utc>, cursors: ResumeCursors) -> Self {
        Self {
            blog_id,
            pivot,
            forward: cursors.forward,
            backward: cursors.backward,
            next_arm: Direction::Forward,
            pages_fetched: 0,
            articles: ArticleSet::default(),
        }
    }

    pub fn articles(&self) -> &ArticleSet {
        &self.articles
    }

    pub fn pages_fetched(&self) -> u32 {
        self.pages_fetched
    }

    pub fn is_exhausted(&self) -> bool {
        self.forward.exhausted && self.backward.exhausted
    }

    pub fn resume_cursors(&self) -> ResumeCursors {
        ResumeCursors {
            forward: self.forward.clone(),
            backward: self.backward.clone(),
        }
    }

    fn pick_direction(&self) -> Option<Direction> {
        match (self.forward.exhausted, self.backward.exhausted) {
            (true, true) => None,
            (false, true) => Some(Direction::Forward),
            (true, false) => Some(Direction::Backward),
            (false, false) => Some(self.next_arm),
        }
    }

    fn page_params(&self, direction: Direction) -> ArticleListParams {
        let arm = match direction {
            Direction::Forward => &self.forward,
            Direction::Backward => &self.backward,
        };
        match &arm.cursor {
            Some(cursor) => ArticleListParams::from_cursor(cursor),
            None => match direction {
                Direction::Forward => ArticleListParams::forward_from(self.pivot),
                Direction::Backward => ArticleListParams::backward_from(self.pivot),
            },
        }
    }

    /// Fetches one page in the next live direction and merges it in.
    /// `Ok(None)` means both arms were already exhausted. On a fetch error
    /// the walk keeps everything merged so far; the error names the
    /// direction and the cursor that was being fetched.
    pub async fn step(
        &mut self,
        creds: &StoreCredentials,
    ) -> Result<Option<WalkProgress>, WalkError> {
        let Some(direction) = self.pick_direction() else {
            return Ok(None);
        };
        let params = self.page_params(direction);
        let page = fetch_article_page(creds, self.blog_id, &params)
            .await
            .map_err(|source| WalkError::Fetch {
                direction,
                cursor: params.cursor.clone(),
                source,
            })?;

        let mut new_items = 0usize;
        for article in page.articles {
            if self.articles.merge(article, direction) {
                new_items += 1;
            }
        }

        let arm = match direction {
            Direction::Forward => &mut self.forward,
            Direction::Backward => &mut self.backward,
        };
        arm.started = true;
        arm.exhausted = page.next_cursor.is_none();
        arm.cursor = page.next_cursor;
        self.pages_fetched += 1;
        self.next_arm = direction.opposite();

        debug!(
            target = "blogsmith.catalog",
            direction = %direction,
            page = self.pages_fetched,
            new_items = new_items,
            collected = self.articles.len(),
            "merged listing page"
        );

        Ok(Some(WalkProgress {
            pages_fetched: self.pages_fetched,
            items_collected: self.articles.len(),
            direction,
        }))
    }

    /// Runs up to `step_limit` page fetches. Returns true when the walk
    /// finished both arms within the budget.
    pub async fn run(
        &mut self,
        creds: &StoreCredentials,
        step_limit: u32,
        progress: &mut (dyn FnMut(WalkProgress) + Send),
    ) -> Result<bool, WalkError> {
        let mut fetched_this_run = 0u32;
        while fetched_this_run < step_limit {
            match self.step(creds).await? {
                Some(report) => {
                    fetched_this_run += 1;
                    progress(report);
                }
                None => break,
            }
        }
        Ok(self.is_exhausted())
    }
}

#[derive(Debug)]
pub struct WalkOutcome {
    pub articles: ArticleSet,
    pub exhausted: bool,
    pub pages_fetched: u32,
    pub resume: Option<ResumeCursors>,
}

/// One-shot walk from a fresh pivot: at most `step_limit` page fetches,
/// union of both arms, dedup by id. `exhausted = false` means there is more
/// to fetch and `resume` carries the per-arm cursors.
pub async fn paginate(
    creds: &StoreCredentials,
    blog_id: i64,
    pivot: &str,
    step_limit: u32,
    progress: &mut (dyn FnMut(WalkProgress) + Send),
) -> Result<WalkOutcome, WalkError> {
    let pivot = parse_pivot(pivot)?;
    let walk = CatalogWalk::new(blog_id, pivot);
    drive(walk, creds, step_limit, progress).await
}

/// Continues an earlier walk from its resume cursors under a fresh budget.
pub async fn resume(
    creds: &StoreCredentials,
    blog_id: i64,
    pivot: &str,
    cursors: ResumeCursors,
    step_limit: u32,
    progress: &mut (dyn FnMut(WalkProgress) + Send),
) -> Result<WalkOutcome, WalkError> {
    let pivot = parse_pivot(pivot)?;
    let walk = CatalogWalk::with_cursors(blog_id, pivot, cursors);
    drive(walk, creds, step_limit, progress).await
}

async fn drive(
    mut walk: CatalogWalk,
    creds: &StoreCredentials,
    step_limit: u32,
    progress: &mut (dyn FnMut(WalkProgress) + Send),
) -> Result<WalkOutcome, WalkError> {
    let exhausted = walk.run(creds, step_limit, progress).await?;
    let resume = if exhausted {
        None
    } else {
        Some(walk.resume_cursors())
    };
    Ok(WalkOutcome {
        articles: walk.articles,
        exhausted,
        pages_fetched: walk.pages_fetched,
        resume,
    })
}


#[cfg(test)]
#[path = "catalog_wire_test.rs"]
mod wire_tests;
