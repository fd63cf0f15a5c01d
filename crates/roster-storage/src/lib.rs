//! Roster persistence contracts, the Postgres and in-memory roster stores, and password hashing.

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher as _, PasswordVerifier, SaltString};
use argon2::Argon2;
use async_trait::async_trait;
use roster_core::{Class, NewClass, NewStudent, NewTeacher, Student, StudentUpdate, Teacher};
use thiserror::Error;
use uuid::Uuid;

mod memory;
mod postgres;

pub use memory::{MemoryRosterStore, StoreOp};
pub use postgres::PgRosterStore;

pub const CRATE_NAME: &str = "roster-storage";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("{entity} `{key}` already exists")]
    Duplicate { entity: &'static str, key: String },
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: Uuid },
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait StudentRepository: Send + Sync {
    /// Case-insensitive lookup by email.
    async fn find_student_by_email(&self, email: &str) -> Result<Option<Student>, StoreError>;
    async fn create_student(&self, student: NewStudent) -> Result<Student, StoreError>;
    async fn update_student(&self, id: Uuid, update: StudentUpdate) -> Result<Student, StoreError>;
    async fn delete_student(&self, id: Uuid) -> Result<(), StoreError>;
    async fn list_students(&self) -> Result<Vec<Student>, StoreError>;
}

#[async_trait]
pub trait ClassRepository: Send + Sync {
    /// Exact-name lookup.
    async fn find_class_by_name(&self, name: &str) -> Result<Option<Class>, StoreError>;
    async fn create_class(&self, class: NewClass) -> Result<Class, StoreError>;
    async fn list_classes(&self) -> Result<Vec<Class>, StoreError>;
}

#[async_trait]
pub trait TeacherRepository: Send + Sync {
    async fn find_teacher_by_email(&self, email: &str) -> Result<Option<Teacher>, StoreError>;
    async fn create_teacher(&self, teacher: NewTeacher) -> Result<Teacher, StoreError>;
}

/// Everything the sync engine needs from the roster database.
pub trait RosterStore: StudentRepository + ClassRepository + TeacherRepository {}

impl<T> RosterStore for T where T: StudentRepository + ClassRepository + TeacherRepository {}

#[derive(Debug, Error)]
#[error("password hashing failed: {0}")]
pub struct HashError(String);

pub trait PasswordHasher: Send + Sync {
    fn hash(&self, password: &str) -> Result<String, HashError>;
    fn verify(&self, password: &str, hash: &str) -> bool;
}

/// Argon2id with the crate's default parameters, emitting PHC strings.
#[derive(Debug, Clone, Default)]
pub struct Argon2Hasher;

impl PasswordHasher for Argon2Hasher {
    fn hash(&self, password: &str) -> Result<String, HashError> {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|err| HashError(err.to_string()))
    }

    fn verify(&self, password: &str, hash: &str) -> bool {
        let Ok(parsed) = PasswordHash::new(hash) else {
            return false;
        };
        Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn argon2_hashes_verify_and_are_salted() {
        let hasher = Argon2Hasher;
        let first = hasher.hash("12345678901").expect("hash");
        let second = hasher.hash("12345678901").expect("hash");

        assert!(first.starts_with("$argon2"));
        assert_ne!(first, second);
        assert!(hasher.verify("12345678901", &first));
        assert!(!hasher.verify("wrong", &first));
        assert!(!hasher.verify("12345678901", "not-a-phc-string"));
    }
}
