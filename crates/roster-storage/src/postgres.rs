use async_trait::async_trait;
use roster_core::{Class, NewClass, NewStudent, NewTeacher, Student, StudentUpdate, Teacher};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use tracing::info;
use uuid::Uuid;

use crate::{ClassRepository, StoreError, StudentRepository, TeacherRepository};

/// Roster store backed by the application's Postgres database.
#[derive(Debug, Clone)]
pub struct PgRosterStore {
    pool: PgPool,
}

impl PgRosterStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply the roster schema migrations shipped with this crate.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!().run(&self.pool).await?;
        info!("roster schema migrations applied");
        Ok(())
    }
}

fn student_from_row(row: &PgRow) -> Result<Student, sqlx::Error> {
    Ok(Student {
        id: row.try_get("id")?,
        email: row.try_get("email")?,
        password_hash: row.try_get("password_hash")?,
        full_name: row.try_get("full_name")?,
        enrollment_number: row.try_get("enrollment_number")?,
        class_id: row.try_get("class_id")?,
    })
}

fn class_from_row(row: &PgRow) -> Result<Class, sqlx::Error> {
    Ok(Class {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        teacher_id: row.try_get("teacher_id")?,
    })
}

fn teacher_from_row(row: &PgRow) -> Result<Teacher, sqlx::Error> {
    Ok(Teacher {
        id: row.try_get("id")?,
        email: row.try_get("email")?,
        full_name: row.try_get("full_name")?,
        password_hash: row.try_get("password_hash")?,
    })
}

fn map_insert_error(err: sqlx::Error, entity: &'static str, key: &str) -> StoreError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::Duplicate {
            entity,
            key: key.to_string(),
        },
        _ => StoreError::Database(err),
    }
}

#[async_trait]
impl StudentRepository for PgRosterStore {
    async fn find_student_by_email(&self, email: &str) -> Result<Option<Student>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, email, password_hash, full_name, enrollment_number, class_id
              FROM students
             WHERE lower(email) = lower($1)
            "#,
        )
        .bind(email.trim())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(student_from_row).transpose()?)
    }

    async fn create_student(&self, student: NewStudent) -> Result<Student, StoreError> {
        let email = student.email.trim().to_lowercase();
        let row = sqlx::query(
            r#"
            INSERT INTO students (id, email, password_hash, full_name, enrollment_number, class_id)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, email, password_hash, full_name, enrollment_number, class_id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&email)
        .bind(&student.password_hash)
        .bind(&student.full_name)
        .bind(&student.enrollment_number)
        .bind(student.class_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|err| map_insert_error(err, "student", &email))?;
        Ok(student_from_row(&row)?)
    }

    async fn update_student(&self, id: Uuid, update: StudentUpdate) -> Result<Student, StoreError> {
        let row = sqlx::query(
            r#"
            UPDATE students
               SET class_id = $2,
                   updated_at = NOW()
             WHERE id = $1
            RETURNING id, email, password_hash, full_name, enrollment_number, class_id
            "#,
        )
        .bind(id)
        .bind(update.class_id)
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(row) => Ok(student_from_row(&row)?),
            None => Err(StoreError::NotFound {
                entity: "student",
                id,
            }),
        }
    }

    async fn delete_student(&self, id: Uuid) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM students WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                entity: "student",
                id,
            });
        }
        Ok(())
    }

    async fn list_students(&self) -> Result<Vec<Student>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, email, password_hash, full_name, enrollment_number, class_id
              FROM students
             ORDER BY email
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(student_from_row)
            .collect::<Result<Vec<_>, _>>()?)
    }
}

#[async_trait]
impl ClassRepository for PgRosterStore {
    async fn find_class_by_name(&self, name: &str) -> Result<Option<Class>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, name, description, teacher_id
              FROM classes
             WHERE name = $1
            "#,
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(class_from_row).transpose()?)
    }

    async fn create_class(&self, class: NewClass) -> Result<Class, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO classes (id, name, description, teacher_id)
            VALUES ($1, $2, $3, $4)
            RETURNING id, name, description, teacher_id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&class.name)
        .bind(&class.description)
        .bind(class.teacher_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|err| map_insert_error(err, "class", &class.name))?;
        Ok(class_from_row(&row)?)
    }

    async fn list_classes(&self) -> Result<Vec<Class>, StoreError> {
        let rows = sqlx::query("SELECT id, name, description, teacher_id FROM classes ORDER BY name")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .iter()
            .map(class_from_row)
            .collect::<Result<Vec<_>, _>>()?)
    }
}

#[async_trait]
impl TeacherRepository for PgRosterStore {
    async fn find_teacher_by_email(&self, email: &str) -> Result<Option<Teacher>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, email, full_name, password_hash
              FROM teachers
             WHERE lower(email) = lower($1)
            "#,
        )
        .bind(email.trim())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(teacher_from_row).transpose()?)
    }

    async fn create_teacher(&self, teacher: NewTeacher) -> Result<Teacher, StoreError> {
        let email = teacher.email.trim().to_lowercase();
        let row = sqlx::query(
            r#"
            INSERT INTO teachers (id, email, full_name, password_hash)
            VALUES ($1, $2, $3, $4)
            RETURNING id, email, full_name, password_hash
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&email)
        .bind(&teacher.full_name)
        .bind(&teacher.password_hash)
        .fetch_one(&self.pool)
        .await
        .map_err(|err| map_insert_error(err, "teacher", &email))?;
        Ok(teacher_from_row(&row)?)
    }
}
