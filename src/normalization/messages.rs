use indexmap::{IndexMap, IndexSet};

use crate::reviews::error::FetchError;
use crate::reviews::types::{ProductId, RawReview, ReviewMessage};

/// Review text gathered over a whole run, plus which product ids share a SKU.
#[derive(Debug, Default, Clone)]
pub struct ReviewCollector {
    messages: IndexMap<ProductId, Vec<ReviewMessage>>,
    sku_groups: IndexMap<String, IndexSet<ProductId>>,
}

impl ReviewCollector {
    /// Add one page of raw reviews. Hidden reviews and reviews without a
    /// product id are skipped; an id that is present but not an integer fails
    /// the page. Returns how many reviews were kept.
    pub fn push_page(&mut self, rows: &[RawReview]) -> Result<usize, FetchError> {
        let mut parsed = Vec::with_capacity(rows.len());
        for raw in rows {
            if raw.hidden {
                continue;
            }
            let Some(raw_id) = raw.product_id.as_deref().filter(|s| !s.trim().is_empty()) else {
                continue;
            };
            let id: ProductId = raw_id
                .parse()
                .map_err(|e| FetchError::Malformed(format!("{e}")))?;
            parsed.push((id, raw));
        }

        let kept = parsed.len();
        for (id, raw) in parsed {
            self.messages.entry(id).or_default().push(ReviewMessage {
                title: raw.title.clone(),
                body: raw.body.clone(),
            });
            if let Some(sku) = raw.sku.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
                self.sku_groups.entry(sku.to_string()).or_default().insert(id);
            }
        }
        Ok(kept)
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Final per-product message lists. SKU groups that share an id are
    /// joined, and every id in a joined group gets the union of the group's
    /// unmerged lists, so an id in several groups keeps all of them once.
    pub fn into_merged(self) -> IndexMap<ProductId, Vec<ReviewMessage>> {
        let original = self.messages;
        let mut merged = original.clone();
        for ids in linked_groups(&self.sku_groups) {
            if ids.len() < 2 {
                continue;
            }
            let union: Vec<ReviewMessage> = ids
                .iter()
                .filter_map(|id| original.get(id))
                .flatten()
                .cloned()
                .collect();
            if union.is_empty() {
                continue;
            }
            for id in &ids {
                merged.insert(*id, union.clone());
            }
        }
        merged
    }
}

/// Join SKU groups transitively: two groups with an id in common end up in
/// the same set. Ids keep first-seen order.
fn linked_groups(sku_groups: &IndexMap<String, IndexSet<ProductId>>) -> Vec<IndexSet<ProductId>> {
    let mut owner: IndexMap<ProductId, usize> = IndexMap::new();
    let mut groups: Vec<IndexSet<ProductId>> = Vec::new();
    for ids in sku_groups.values() {
        let mut target: Option<usize> = None;
        for id in ids {
            let Some(found) = owner.get(id).copied() else {
                continue;
            };
            match target {
                None => target = Some(found),
                Some(t) if t != found => {
                    let moved = std::mem::take(&mut groups[found]);
                    for m in &moved {
                        owner.insert(*m, t);
                    }
                    groups[t].extend(moved);
                }
                Some(_) => {}
            }
        }
        let t = target.unwrap_or_else(|| {
            groups.push(IndexSet::new());
            groups.len() - 1
        });
        for id in ids {
            groups[t].insert(*id);
            owner.insert(*id, t);
        }
    }
    groups.retain(|g| !g.is_empty());
    groups
}

#[cfg(test)]
mod tests {
    use super::*;

    fn review(id: &str, sku: Option<&str>, title: &str) -> RawReview {
        RawReview {
            product_id: Some(id.to_string()),
            sku: sku.map(str::to_string),
            title: Some(title.to_string()),
            body: Some(format!("{title} body")),
            hidden: false,
        }
    }

    fn pid(n: i64) -> ProductId {
        ProductId::new(n).unwrap()
    }

    #[test]
    fn ids_sharing_a_sku_get_the_union() {
        let mut collector = ReviewCollector::default();
        collector.push_page(&[review("100", Some("X"), "A")]).unwrap();
        collector.push_page(&[review("101", Some("X"), "B")]).unwrap();
        collector.push_page(&[review("102", Some("Y"), "C")]).unwrap();

        let merged = collector.into_merged();
        let titles = |id: i64| -> Vec<String> {
            merged[&pid(id)]
                .iter()
                .filter_map(|m| m.title.clone())
                .collect()
        };
        assert_eq!(titles(100), vec!["A", "B"]);
        assert_eq!(titles(101), vec!["A", "B"]);
        assert_eq!(titles(102), vec!["C"]);
    }

    #[test]
    fn skips_hidden_and_anonymous_reviews() {
        let mut collector = ReviewCollector::default();
        let mut hidden = review("1", None, "secret");
        hidden.hidden = true;
        let anonymous = RawReview {
            product_id: None,
            title: Some("orphan".into()),
            ..RawReview::default()
        };
        let kept = collector
            .push_page(&[hidden, anonymous, review("2", None, "ok")])
            .unwrap();
        assert_eq!(kept, 1);
        let merged = collector.into_merged();
        assert_eq!(merged.len(), 1);
        assert!(merged.contains_key(&pid(2)));
    }

    #[test]
    fn invalid_ids_fail_the_page_without_partial_writes() {
        let mut collector = ReviewCollector::default();
        let err = collector
            .push_page(&[review("1", None, "fine"), review("sku-9", None, "bad")])
            .unwrap_err();
        assert!(matches!(err, FetchError::Malformed(_)));
        assert!(collector.is_empty());
    }

    #[test]
    fn id_in_two_groups_collects_both_groups() {
        let mut collector = ReviewCollector::default();
        collector
            .push_page(&[
                review("1", Some("X"), "A"),
                review("2", Some("X"), "B"),
                review("2", Some("Y"), "C"),
                review("3", Some("Y"), "D"),
                review("4", Some("Z"), "E"),
            ])
            .unwrap();
        let merged = collector.into_merged();
        let titles = |id: i64| -> Vec<String> {
            merged[&pid(id)]
                .iter()
                .filter_map(|m| m.title.clone())
                .collect()
        };
        for id in [1, 2, 3] {
            assert_eq!(titles(id), vec!["A", "B", "C", "D"], "product {id}");
        }
        assert_eq!(titles(4), vec!["E"]);
    }

    #[test]
    fn groups_joined_by_a_later_sku_are_merged() {
        let mut collector = ReviewCollector::default();
        collector.push_page(&[review("1", Some("X"), "A")]).unwrap();
        collector.push_page(&[review("2", Some("Y"), "B")]).unwrap();
        collector.push_page(&[review("3", Some("X"), "C")]).unwrap();
        collector.push_page(&[review("4", Some("Y"), "D")]).unwrap();
        collector
            .push_page(&[review("3", Some("W"), "E"), review("4", Some("W"), "F")])
            .unwrap();

        let merged = collector.into_merged();
        for id in [1, 2, 3, 4] {
            assert_eq!(merged[&pid(id)].len(), 6, "product {id}");
        }
    }
}
