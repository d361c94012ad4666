use crate::config::AggregatorConfig;
use crate::mapper::EntryMapper;
use crate::traits::Clock;
use crate::types::{AggregatorError, Audience, ContentRepository, NewsItem, Result};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

/// Expiration ascending, items without expiration last.
fn expiration_nulls_last(a: &NewsItem, b: &NewsItem) -> Ordering {
    match (a.expiration_date, b.expiration_date) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Display order: priority first, then soonest expiration, then (only when
/// neither expires) most recently created.
pub fn rank_order(a: &NewsItem, b: &NewsItem) -> Ordering {
    b.priority
        .cmp(&a.priority)
        .then_with(|| expiration_nulls_last(a, b))
        .then_with(|| match (a.expiration_date, b.expiration_date) {
            (None, None) => b.created_at.cmp(&a.created_at),
            _ => Ordering::Equal,
        })
}

/// Eviction order used when the list is over capacity. The smallest item under
/// this ordering is removed: anything without expiration goes first, then the
/// furthest expiration, ties going to the most recently created.
pub fn drop_order(a: &NewsItem, b: &NewsItem) -> Ordering {
    expiration_nulls_last(a, b)
        .then_with(|| a.created_at.cmp(&b.created_at))
        .reverse()
}

pub fn sort_by_rank(items: &mut [NewsItem]) {
    items.sort_by(rank_order);
}

/// Index of the item to evict next. Ties resolve to the earliest position.
pub fn drop_candidate(items: &[NewsItem]) -> Option<usize> {
    items
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| drop_order(a, b))
        .map(|(index, _)| index)
}

/// Remove one item at a time until `items` fits `capacity`. Returns the
/// removed items in removal order.
pub fn cap_to(items: &mut Vec<NewsItem>, capacity: usize) -> Vec<NewsItem> {
    let mut dropped = Vec::new();
    while items.len() > capacity {
        match drop_candidate(items) {
            Some(index) => dropped.push(items.remove(index)),
            None => break,
        }
    }
    dropped
}

/// Append shuffled extras visible to `audience` until `capacity` is reached.
/// Extras whose id is already present are skipped. Returns how many were added.
pub fn backfill<R: Rng + ?Sized>(
    items: &mut Vec<NewsItem>,
    extras: Vec<NewsItem>,
    audience: Audience,
    capacity: usize,
    rng: &mut R,
) -> usize {
    let mut used: HashSet<String> = items.iter().map(|item| item.id.clone()).collect();
    let mut pool: Vec<NewsItem> = extras
        .into_iter()
        .filter(|extra| extra.is_visible_to(audience))
        .filter(|extra| used.insert(extra.id.clone()))
        .collect();

    pool.shuffle(rng);
    let to_add = pool.len().min(capacity.saturating_sub(items.len()));
    items.extend(pool.into_iter().take(to_add));
    to_add
}

/// Builds the ranked, capped and backfilled list for one audience.
pub struct RankingEngine {
    content: Arc<dyn ContentRepository>,
    mapper: EntryMapper,
    clock: Arc<dyn Clock>,
    primary_content_type: String,
    extras_content_type: String,
    extras_limit: usize,
    capacity: usize,
}

impl RankingEngine {
    pub fn new(
        content: Arc<dyn ContentRepository>,
        mapper: EntryMapper,
        clock: Arc<dyn Clock>,
        config: &AggregatorConfig,
    ) -> Self {
        Self {
            content,
            mapper,
            clock,
            primary_content_type: config.primary_content_type.clone(),
            extras_content_type: config.extras_content_type.clone(),
            extras_limit: config.extras_limit,
            capacity: config.capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub async fn rank(&self, audience: Audience) -> Result<Vec<NewsItem>> {
        let mut rng = StdRng::from_entropy();
        self.rank_with_rng(audience, &mut rng).await
    }

    pub async fn rank_with_rng<R: Rng + Send>(&self, audience: Audience, rng: &mut R) -> Result<Vec<NewsItem>> {
        let mut ranked = self.fetch_primary(audience).await?;
        let candidates = ranked.len();
        sort_by_rank(&mut ranked);

        let dropped = cap_to(&mut ranked, self.capacity);
        for item in &dropped {
            debug!("Dropped {} from {} ranking (over capacity)", item.id, audience);
        }

        let mut backfilled = 0;
        if ranked.len() < self.capacity {
            let extras = self.fetch_extras().await?;
            backfilled = backfill(&mut ranked, extras, audience, self.capacity, rng);
        }

        ranked.truncate(self.capacity);
        info!(
            %audience,
            candidates,
            dropped = dropped.len(),
            backfilled,
            returned = ranked.len(),
            "Built ranked news list"
        );
        Ok(ranked)
    }

    async fn fetch_primary(&self, audience: Audience) -> Result<Vec<NewsItem>> {
        let entries = self
            .content
            .fetch_all(&self.primary_content_type, None)
            .await
            .map_err(AggregatorError::TransientUpstream)?;

        // One malformed entry fails the whole audience query.
        let items = self.mapper.map_all(&entries)?;
        let now = self.clock.now_utc();

        Ok(items
            .into_iter()
            .filter(|item| item.active)
            .filter(|item| item.is_live_at(now))
            .filter(|item| item.is_visible_to(audience))
            .collect())
    }

    async fn fetch_extras(&self) -> Result<Vec<NewsItem>> {
        let entries = self
            .content
            .fetch_all(&self.extras_content_type, Some(self.extras_limit))
            .await
            .map_err(AggregatorError::TransientUpstream)?;
        self.mapper.map_all(&entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, FixedOffset, TimeZone};

    fn base() -> DateTime<FixedOffset> {
        FixedOffset::west_opt(3 * 3600)
            .unwrap()
            .with_ymd_and_hms(2025, 10, 1, 12, 0, 0)
            .unwrap()
    }

    fn item(id: &str, priority: bool, expires_in_days: Option<i64>, created_hours_ago: i64) -> NewsItem {
        NewsItem {
            id: id.to_string(),
            title: format!("Title {}", id),
            active: true,
            image_url: None,
            description: None,
            show_on_app: true,
            show_on_web: true,
            external_url: None,
            expiration_date: expires_in_days.map(|days| base() + Duration::days(days)),
            created_at: base() - Duration::hours(created_hours_ago),
            priority,
        }
    }

    fn ids(items: &[NewsItem]) -> Vec<&str> {
        items.iter().map(|item| item.id.as_str()).collect()
    }

    #[test]
    fn priority_then_expiration_then_newest() {
        let mut items = vec![
            item("plain-old", false, None, 10),
            item("plain-soon", false, Some(1), 5),
            item("plain-new", false, None, 1),
            item("prio-late", true, Some(9), 3),
            item("plain-later", false, Some(4), 2),
            item("prio-none", true, None, 7),
        ];
        sort_by_rank(&mut items);
        assert_eq!(
            ids(&items),
            vec!["prio-late", "prio-none", "plain-soon", "plain-later", "plain-new", "plain-old"]
        );
    }

    #[test]
    fn equal_expirations_keep_input_order() {
        let mut items = vec![item("b", false, Some(2), 1), item("a", false, Some(2), 9)];
        sort_by_rank(&mut items);
        assert_eq!(ids(&items), vec!["b", "a"]);
    }

    #[test]
    fn cap_removes_item_without_expiration_first() {
        let mut items: Vec<NewsItem> = (1..=8)
            .map(|day| item(&format!("E{}", day), false, Some(day), day))
            .collect();
        items.insert(3, item("E9", false, None, 0));
        sort_by_rank(&mut items);

        let dropped = cap_to(&mut items, 8);

        assert_eq!(ids(&dropped), vec!["E9"]);
        assert_eq!(ids(&items), vec!["E1", "E2", "E3", "E4", "E5", "E6", "E7", "E8"]);
    }

    #[test]
    fn cap_removes_furthest_expiration_not_soonest() {
        let mut items: Vec<NewsItem> = (1..=10)
            .map(|day| item(&format!("E{}", day), false, Some(day), 1))
            .collect();
        sort_by_rank(&mut items);

        let dropped = cap_to(&mut items, 8);

        assert_eq!(ids(&dropped), vec!["E10", "E9"]);
        assert_eq!(items.first().map(|i| i.id.as_str()), Some("E1"));
    }

    #[test]
    fn cap_tie_on_furthest_expiration_drops_newest() {
        let mut items: Vec<NewsItem> = (1..=7)
            .map(|day| item(&format!("E{}", day), false, Some(day), 1))
            .collect();
        items.push(item("Ex", false, Some(8), 48));
        items.push(item("Ey", false, Some(8), 2));
        sort_by_rank(&mut items);

        let dropped = cap_to(&mut items, 8);

        assert_eq!(ids(&dropped), vec!["Ey"]);
        assert!(items.iter().any(|i| i.id == "Ex"));
    }

    #[test]
    fn cap_ignores_priority() {
        let mut items: Vec<NewsItem> = (1..=8)
            .map(|day| item(&format!("E{}", day), false, Some(day), 1))
            .collect();
        items.push(item("pinned", true, None, 1));
        sort_by_rank(&mut items);

        let dropped = cap_to(&mut items, 8);
        assert_eq!(ids(&dropped), vec!["pinned"]);
    }

    #[test]
    fn backfill_appends_unique_visible_extras() {
        let mut items: Vec<NewsItem> = (1..=5)
            .map(|day| item(&format!("N{}", day), false, Some(day), 1))
            .collect();
        let mut extras: Vec<NewsItem> = (1..=10).map(|n| item(&format!("X{}", n), false, None, n)).collect();
        extras[0].show_on_web = false;
        extras.push(item("N2", false, None, 1));

        let mut rng = StdRng::seed_from_u64(7);
        let added = backfill(&mut items, extras, Audience::Web, 8, &mut rng);

        assert_eq!(added, 3);
        assert_eq!(items.len(), 8);
        assert_eq!(ids(&items[..5]), vec!["N1", "N2", "N3", "N4", "N5"]);
        let appended: HashSet<&str> = items[5..].iter().map(|i| i.id.as_str()).collect();
        assert_eq!(appended.len(), 3);
        assert!(appended.iter().all(|id| id.starts_with('X') && *id != "X1"));
    }

    #[test]
    fn backfill_exhausts_small_pool() {
        let mut items = vec![item("N1", false, None, 1)];
        let extras = vec![item("X1", false, None, 1), item("N1", false, None, 1)];
        let mut rng = StdRng::seed_from_u64(1);

        assert_eq!(backfill(&mut items, extras, Audience::App, 8, &mut rng), 1);
        assert_eq!(ids(&items), vec!["N1", "X1"]);
    }

    #[test]
    fn ranking_is_deterministic_without_backfill() {
        let input: Vec<NewsItem> = (0..12)
            .map(|n| item(&format!("E{}", n), n % 3 == 0, if n % 4 == 0 { None } else { Some(n) }, n * 3))
            .collect();

        let run = |mut items: Vec<NewsItem>| {
            sort_by_rank(&mut items);
            cap_to(&mut items, 8);
            items
        };

        let first = run(input.clone());
        let second = run(input);
        assert_eq!(first.len(), 8);
        assert_eq!(first, second);
    }
}
