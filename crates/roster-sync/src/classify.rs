//! Allow-list filtering, per-email deduplication and active/inactive partitioning.

use std::collections::BTreeMap;

use roster_core::Subscription;

use crate::config::AllowList;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Classification {
    pub active: Vec<Subscription>,
    pub inactive: Vec<Subscription>,
    /// Records received from the remote API.
    pub total: usize,
    /// Records left after the allow-list and email filter.
    pub allowed: usize,
}

impl Classification {
    pub fn unique_contacts(&self) -> usize {
        self.active.len() + self.inactive.len()
    }
}

/// Filter to allow-listed products, keep the newest record per email, then split by status.
///
/// Filtering happens before deduplication so a newer record for a foreign product can never
/// hide an allow-listed one. On equal `updated_at` the record fetched later wins. Both output
/// lists are ordered by email.
pub fn classify(raw: Vec<Subscription>, allow_list: &AllowList) -> Classification {
    let total = raw.len();
    let mut allowed = 0usize;
    let mut latest: BTreeMap<String, Subscription> = BTreeMap::new();

    for sub in raw {
        let Some(product_id) = sub.product_id() else {
            continue;
        };
        if !allow_list.contains(product_id) {
            continue;
        }
        let Some(email) = sub.normalized_email() else {
            continue;
        };
        allowed += 1;

        let older = latest
            .get(&email)
            .is_some_and(|kept| sub.updated_at < kept.updated_at);
        if !older {
            latest.insert(email, sub);
        }
    }

    let (active, inactive): (Vec<_>, Vec<_>) =
        latest.into_values().partition(Subscription::is_active);

    Classification {
        active,
        inactive,
        total,
        allowed,
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, TimeZone, Utc};
    use roster_core::{Contact, Product};

    use super::*;

    fn allow() -> AllowList {
        AllowList::new(["P1", "P2", "P3"]).unwrap()
    }

    fn day(month: u32, day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, month, day, 0, 0, 0).unwrap()
    }

    fn sub(id: &str, email: &str, status: &str, product: &str, updated: Option<DateTime<Utc>>) -> Subscription {
        Subscription {
            id: Some(id.into()),
            last_status: Some(status.into()),
            updated_at: updated,
            contact: Contact {
                email: Some(email.into()),
                name: Some("Student".into()),
                doc: Some("111".into()),
            },
            product: Product {
                id: Some(product.into()),
                name: Some(format!("Product {product}")),
            },
        }
    }

    fn ids(subs: &[Subscription]) -> Vec<&str> {
        subs.iter().filter_map(|s| s.id.as_deref()).collect()
    }

    #[test]
    fn newest_record_per_email_wins() {
        let out = classify(
            vec![
                sub("old", "a@x.com", "cancelled", "P1", Some(day(1, 1))),
                sub("new", "A@X.com ", "active", "P1", Some(day(2, 1))),
            ],
            &allow(),
        );
        assert_eq!(ids(&out.active), vec!["new"]);
        assert!(out.inactive.is_empty());
        assert_eq!(out.total, 2);
        assert_eq!(out.allowed, 2);
        assert_eq!(out.unique_contacts(), 1);
    }

    #[test]
    fn newer_cancellation_makes_contact_inactive() {
        let out = classify(
            vec![
                sub("new", "a@x.com", "canceled", "P2", Some(day(3, 1))),
                sub("old", "a@x.com", "active", "P1", Some(day(1, 1))),
            ],
            &allow(),
        );
        assert!(out.active.is_empty());
        assert_eq!(ids(&out.inactive), vec!["new"]);
    }

    #[test]
    fn foreign_products_are_dropped_before_dedup() {
        let out = classify(
            vec![
                sub("mine", "a@x.com", "active", "P1", Some(day(1, 1))),
                sub("foreign", "a@x.com", "canceled", "OTHER", Some(day(5, 1))),
                sub("only-foreign", "b@x.com", "active", "OTHER", Some(day(5, 1))),
            ],
            &allow(),
        );
        assert_eq!(ids(&out.active), vec!["mine"]);
        assert!(out.inactive.is_empty());
        assert_eq!(out.allowed, 1);
    }

    #[test]
    fn records_without_product_or_email_are_dropped() {
        let mut no_product = sub("np", "a@x.com", "active", "P1", None);
        no_product.product.id = None;
        let mut no_email = sub("ne", "", "active", "P1", None);
        no_email.contact.email = Some("   ".into());

        let out = classify(vec![no_product, no_email], &allow());
        assert_eq!(out.unique_contacts(), 0);
        assert_eq!(out.total, 2);
        assert_eq!(out.allowed, 0);
    }

    #[test]
    fn ties_go_to_the_later_record() {
        let out = classify(
            vec![
                sub("first", "a@x.com", "active", "P1", Some(day(1, 1))),
                sub("second", "a@x.com", "expired", "P2", Some(day(1, 1))),
            ],
            &allow(),
        );
        assert_eq!(ids(&out.inactive), vec!["second"]);

        let undated = classify(
            vec![
                sub("dated", "a@x.com", "active", "P1", Some(day(1, 1))),
                sub("undated", "a@x.com", "expired", "P1", None),
            ],
            &allow(),
        );
        assert_eq!(ids(&undated.active), vec!["dated"]);
    }

    #[test]
    fn trialing_counts_as_active_and_lists_are_sorted() {
        let out = classify(
            vec![
                sub("c", "c@x.com", "TRIALING", "P3", None),
                sub("a", "a@x.com", "active", "P1", None),
                sub("b", "b@x.com", "past_due", "P2", None),
                sub("d", "d@x.com", "pending", "P2", None),
            ],
            &allow(),
        );
        assert_eq!(ids(&out.active), vec!["a", "c"]);
        assert_eq!(ids(&out.inactive), vec!["b", "d"]);
    }
}
