use std::collections::BTreeMap;

use roster_core::{Class, NewClass, Subscription};
use roster_storage::{ClassRepository, StoreError};
use tracing::{error, info};
use uuid::Uuid;

/// Product display name -> class id.
pub type ClassMap = BTreeMap<String, Uuid>;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassReconciliation {
    pub classes: ClassMap,
    pub created: usize,
    pub found: usize,
    pub errors: Vec<String>,
}

pub fn class_description(product_name: &str, product_id: &str) -> String {
    format!("Auto-created from subscription product {product_name} ({product_id})")
}

/// Ensure one class exists per distinct product name among active subscriptions.
///
/// A class that can be neither found nor created is logged, recorded in `errors` and left out
/// of the map; it never aborts the run.
pub async fn reconcile_classes<S>(
    store: &S,
    active: &[Subscription],
    teacher_id: Uuid,
) -> ClassReconciliation
where
    S: ClassRepository + ?Sized,
{
    let mut products: BTreeMap<&str, &str> = BTreeMap::new();
    for sub in active {
        if let Some(name) = sub.product_name() {
            products
                .entry(name)
                .or_insert_with(|| sub.product_id().unwrap_or_default());
        }
    }

    let mut out = ClassReconciliation::default();
    for (name, product_id) in products {
        match find_or_create(store, name, product_id, teacher_id).await {
            Ok((class, created)) => {
                if created {
                    info!(class_id = %class.id, class = name, "created class for product");
                    out.created += 1;
                } else {
                    out.found += 1;
                }
                out.classes.insert(name.to_string(), class.id);
            }
            Err(err) => {
                error!(class = name, product_id, error = %err, "failed to reconcile class; skipping");
                out.errors.push(format!("class `{name}`: {err}"));
            }
        }
    }

    info!(
        classes = out.classes.len(),
        created = out.created,
        found = out.found,
        failed = out.errors.len(),
        "class reconciliation finished"
    );
    out
}

async fn find_or_create<S>(
    store: &S,
    name: &str,
    product_id: &str,
    teacher_id: Uuid,
) -> Result<(Class, bool), StoreError>
where
    S: ClassRepository + ?Sized,
{
    if let Some(existing) = store.find_class_by_name(name).await? {
        return Ok((existing, false));
    }
    let created = store
        .create_class(NewClass {
            name: name.to_string(),
            description: Some(class_description(name, product_id)),
            teacher_id,
        })
        .await;
    match created {
        Ok(class) => Ok((class, true)),
        Err(StoreError::Duplicate { .. }) => match store.find_class_by_name(name).await? {
            Some(existing) => Ok((existing, false)),
            None => Err(StoreError::Unavailable(format!(
                "class `{name}` reported as duplicate but not found"
            ))),
        },
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use roster_core::{Contact, Product};
    use roster_storage::{MemoryRosterStore, StoreOp};

    use super::*;

    fn active(email: &str, product_id: &str, product_name: &str) -> Subscription {
        Subscription {
            id: Some(format!("sub-{email}")),
            last_status: Some("active".into()),
            updated_at: None,
            contact: Contact {
                email: Some(email.into()),
                name: None,
                doc: None,
            },
            product: Product {
                id: Some(product_id.into()),
                name: Some(product_name.into()),
            },
        }
    }

    #[tokio::test]
    async fn creates_missing_and_reuses_existing_classes() {
        let store = MemoryRosterStore::new();
        let teacher_id = Uuid::new_v4();
        let existing = Class {
            id: Uuid::new_v4(),
            name: "ENEM Intensivo".into(),
            description: None,
            teacher_id: None,
        };
        store.seed_class(existing.clone()).await;

        let out = reconcile_classes(
            &store,
            &[
                active("a@x.com", "P1", " ENEM Intensivo "),
                active("b@x.com", "P2", "Vestibular"),
                active("c@x.com", "P2", "Vestibular"),
                active("d@x.com", "P3", "  "),
            ],
            teacher_id,
        )
        .await;

        assert_eq!(out.created, 1);
        assert_eq!(out.found, 1);
        assert!(out.errors.is_empty());
        assert_eq!(out.classes.get("ENEM Intensivo"), Some(&existing.id));
        assert!(out.classes.contains_key("Vestibular"));
        assert_eq!(
            store.ops().await,
            vec![StoreOp::CreateClass {
                name: "Vestibular".into()
            }]
        );

        let created = store
            .find_class_by_name("Vestibular")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(created.teacher_id, Some(teacher_id));
        assert_eq!(
            created.description.as_deref(),
            Some("Auto-created from subscription product Vestibular (P2)")
        );
    }

    #[tokio::test]
    async fn failing_class_is_skipped_not_fatal() {
        let store = MemoryRosterStore::new();
        store.fail_class_creation_for("Broken").await;

        let out = reconcile_classes(
            &store,
            &[active("a@x.com", "P1", "Broken"), active("b@x.com", "P2", "Fine")],
            Uuid::new_v4(),
        )
        .await;

        assert_eq!(out.created, 1);
        assert_eq!(out.errors.len(), 1);
        assert!(out.errors[0].contains("Broken"));
        assert!(!out.classes.contains_key("Broken"));
        assert!(out.classes.contains_key("Fine"));
    }
}
