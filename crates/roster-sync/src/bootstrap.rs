use anyhow::{Context, Result};
use roster_core::{NewTeacher, Teacher};
use roster_storage::{PasswordHasher, StoreError, TeacherRepository};
use tracing::{info, warn};

pub const DEFAULT_TEACHER_NAME: &str = "Default Teacher";

/// Placeholder credential for the bootstrap account; meant to be rotated by an administrator.
const DEFAULT_TEACHER_PASSWORD: &str = "change-me-on-first-login";

/// Find the default teacher by email, creating it when absent.
///
/// Losing a creation race to another writer resolves to the winner's record.
pub async fn ensure_default_teacher<S>(
    store: &S,
    hasher: &dyn PasswordHasher,
    email: &str,
) -> Result<Teacher>
where
    S: TeacherRepository + ?Sized,
{
    let email = email.trim().to_lowercase();
    if let Some(teacher) = store
        .find_teacher_by_email(&email)
        .await
        .with_context(|| format!("looking up default teacher {email}"))?
    {
        return Ok(teacher);
    }

    let password_hash = hasher
        .hash(DEFAULT_TEACHER_PASSWORD)
        .context("hashing default teacher password")?;
    let created = store
        .create_teacher(NewTeacher {
            email: email.clone(),
            full_name: DEFAULT_TEACHER_NAME.to_string(),
            password_hash,
        })
        .await;

    match created {
        Ok(teacher) => {
            info!(teacher_id = %teacher.id, %email, "created default teacher");
            Ok(teacher)
        }
        Err(StoreError::Duplicate { .. }) => {
            warn!(%email, "default teacher created concurrently; reusing existing record");
            store
                .find_teacher_by_email(&email)
                .await
                .with_context(|| format!("re-reading default teacher {email}"))?
                .with_context(|| format!("default teacher {email} vanished after duplicate insert"))
        }
        Err(err) => Err(err).with_context(|| format!("creating default teacher {email}")),
    }
}

#[cfg(test)]
mod tests {
    use roster_storage::{Argon2Hasher, MemoryRosterStore, StoreOp};

    use super::*;

    #[tokio::test]
    async fn creates_once_then_reuses() {
        let store = MemoryRosterStore::new();
        let hasher = Argon2Hasher;

        let first = ensure_default_teacher(&store, &hasher, "Admin@Essays.local")
            .await
            .expect("first");
        let second = ensure_default_teacher(&store, &hasher, "admin@essays.local")
            .await
            .expect("second");

        assert_eq!(first.id, second.id);
        assert_eq!(first.full_name, DEFAULT_TEACHER_NAME);
        assert!(hasher.verify(DEFAULT_TEACHER_PASSWORD, &first.password_hash));
        assert_eq!(
            store.ops().await,
            vec![StoreOp::CreateTeacher {
                email: "admin@essays.local".into()
            }]
        );
        assert_eq!(store.teachers().await.len(), 1);
    }
}
