//! Core subscription and roster model types shared across the roster workspace.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

pub const CRATE_NAME: &str = "roster-core";

/// Subscription statuses that entitle a contact to a roster seat.
pub const ACTIVE_STATUSES: [&str; 2] = ["active", "trialing"];

/// Contact block of a remote subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Contact {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    /// National identification number.
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub doc: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Product {
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

/// One subscription record as returned by the remote subscription API.
///
/// Never persisted verbatim; the sync pipeline derives students and classes from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Subscription {
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub id: Option<String>,
    #[serde(default)]
    pub last_status: Option<String>,
    #[serde(default, deserialize_with = "opt_timestamp")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub contact: Contact,
    #[serde(default, deserialize_with = "null_as_default")]
    pub product: Product,
}

impl Subscription {
    /// Lower-cased, trimmed contact email; `None` when missing or blank.
    pub fn normalized_email(&self) -> Option<String> {
        self.contact
            .email
            .as_deref()
            .map(|email| email.trim().to_lowercase())
            .filter(|email| !email.is_empty())
    }

    pub fn product_id(&self) -> Option<&str> {
        self.product
            .id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
    }

    /// Trimmed product display name; `None` when missing or blank.
    pub fn product_name(&self) -> Option<&str> {
        self.product
            .name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
    }

    pub fn is_active(&self) -> bool {
        self.last_status
            .as_deref()
            .map(str::trim)
            .is_some_and(|status| {
                ACTIVE_STATUSES
                    .iter()
                    .any(|active| status.eq_ignore_ascii_case(active))
            })
    }

    /// Short identifier used in log lines and error entries.
    pub fn label(&self) -> String {
        let id = self.id.as_deref().unwrap_or("<no-id>");
        match self.normalized_email() {
            Some(email) => format!("subscription {id} ({email})"),
            None => format!("subscription {id}"),
        }
    }
}

/// One page of the remote subscription listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SubscriptionPage {
    #[serde(default)]
    pub total_rows: Option<u64>,
    #[serde(default, deserialize_with = "loose_flag")]
    pub has_more_pages: bool,
    #[serde(default)]
    pub next_cursor: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub data: Vec<Subscription>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Teacher {
    pub id: Uuid,
    pub email: String,
    pub full_name: String,
    pub password_hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTeacher {
    pub email: String,
    pub full_name: String,
    pub password_hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Class {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub teacher_id: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewClass {
    pub name: String,
    pub description: Option<String>,
    pub teacher_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Student {
    pub id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub full_name: String,
    pub enrollment_number: Option<String>,
    pub class_id: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewStudent {
    pub email: String,
    pub password_hash: String,
    pub full_name: String,
    pub enrollment_number: Option<String>,
    pub class_id: Option<Uuid>,
}

/// Partial student update. The sync engine only ever moves students between classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudentUpdate {
    pub class_id: Option<Uuid>,
}

/// Aggregate counters for a single sync invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRunStats {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub total_subscriptions: usize,
    pub allowed_subscriptions: usize,
    pub unique_contacts: usize,
    pub active: usize,
    pub inactive: usize,
    pub classes_created: usize,
    pub classes_found: usize,
    pub students_created: usize,
    pub students_updated: usize,
    pub students_unchanged: usize,
    pub students_deleted: usize,
    pub skipped_without_class: usize,
    pub errors: Vec<String>,
}

impl SyncRunStats {
    pub fn new(run_id: Uuid, started_at: DateTime<Utc>) -> Self {
        Self {
            run_id,
            started_at,
            finished_at: None,
            total_subscriptions: 0,
            allowed_subscriptions: 0,
            unique_contacts: 0,
            active: 0,
            inactive: 0,
            classes_created: 0,
            classes_found: 0,
            students_created: 0,
            students_updated: 0,
            students_unchanged: 0,
            students_deleted: 0,
            skipped_without_class: 0,
            errors: Vec::new(),
        }
    }

    /// Number of roster writes this run performed.
    pub fn writes(&self) -> usize {
        self.classes_created + self.students_created + self.students_updated + self.students_deleted
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

/// Parse the timestamp formats the subscription API has been seen to emit.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    if let Ok(epoch) = raw.parse::<i64>() {
        return Utc.timestamp_opt(epoch, 0).single();
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StringOrNumber {
    Text(String),
    Int(i64),
    Float(f64),
}

fn opt_string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(
        Option::<StringOrNumber>::deserialize(deserializer)?.map(|value| match value {
            StringOrNumber::Text(text) => text,
            StringOrNumber::Int(n) => n.to_string(),
            StringOrNumber::Float(n) => n.to_string(),
        }),
    )
}

fn opt_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(
        Option::<StringOrNumber>::deserialize(deserializer)?.and_then(|value| match value {
            StringOrNumber::Text(text) => parse_timestamp(&text),
            StringOrNumber::Int(epoch) => Utc.timestamp_opt(epoch, 0).single(),
            StringOrNumber::Float(epoch) => Utc.timestamp_opt(epoch.trunc() as i64, 0).single(),
        }),
    )
}

#[derive(Deserialize)]
#[serde(untagged)]
enum LooseFlag {
    Bool(bool),
    Int(i64),
    Text(String),
}

/// `has_more_pages` is documented as `1|0`; only an exact 1 continues pagination.
fn loose_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<LooseFlag>::deserialize(deserializer)? {
        Some(LooseFlag::Int(n)) => n == 1,
        Some(LooseFlag::Bool(b)) => b,
        Some(LooseFlag::Text(text)) => text.trim() == "1",
        None => false,
    })
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscription_decodes_loose_wire_shapes() {
        let sub: Subscription = serde_json::from_value(serde_json::json!({
            "id": 991,
            "last_status": "Trialing",
            "updated_at": 1_706_745_600,
            "contact": { "email": "  Ana@Example.COM ", "name": "Ana Lima", "doc": 12345678901u64 },
            "product": { "id": 42, "name": " Redação ENEM " }
        }))
        .expect("decode");

        assert_eq!(sub.id.as_deref(), Some("991"));
        assert!(sub.is_active());
        assert_eq!(sub.normalized_email().as_deref(), Some("ana@example.com"));
        assert_eq!(sub.contact.doc.as_deref(), Some("12345678901"));
        assert_eq!(sub.product_id(), Some("42"));
        assert_eq!(sub.product_name(), Some("Redação ENEM"));
        assert_eq!(
            sub.updated_at,
            Some(Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn null_blocks_fall_back_to_empty() {
        let sub: Subscription = serde_json::from_value(serde_json::json!({
            "id": "abc",
            "last_status": "canceled",
            "updated_at": null,
            "contact": null,
            "product": null
        }))
        .expect("decode");

        assert!(!sub.is_active());
        assert_eq!(sub.normalized_email(), None);
        assert_eq!(sub.product_id(), None);
        assert_eq!(sub.updated_at, None);
    }

    #[test]
    fn has_more_pages_requires_exact_one() {
        let more: SubscriptionPage =
            serde_json::from_str(r#"{"total_rows":3,"has_more_pages":1,"next_cursor":"c2","data":[]}"#)
                .expect("decode");
        let done: SubscriptionPage =
            serde_json::from_str(r#"{"total_rows":3,"has_more_pages":0,"next_cursor":null,"data":[]}"#)
                .expect("decode");
        let odd: SubscriptionPage =
            serde_json::from_str(r#"{"total_rows":3,"has_more_pages":2,"data":null}"#).expect("decode");

        assert!(more.has_more_pages);
        assert_eq!(more.next_cursor.as_deref(), Some("c2"));
        assert!(!done.has_more_pages);
        assert!(!odd.has_more_pages);
        assert!(odd.data.is_empty());
    }

    #[test]
    fn timestamp_formats() {
        let expected = Utc.with_ymd_and_hms(2024, 1, 1, 10, 30, 0).unwrap();
        assert_eq!(parse_timestamp("2024-01-01T10:30:00Z"), Some(expected));
        assert_eq!(parse_timestamp("2024-01-01 10:30:00"), Some(expected));
        assert_eq!(parse_timestamp("2024-01-01T07:30:00-03:00"), Some(expected));
        assert_eq!(
            parse_timestamp("2024-01-01"),
            Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())
        );
        assert_eq!(parse_timestamp("not a date"), None);
    }
}
