use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use roster_core::{Class, NewClass, NewStudent, NewTeacher, Student, StudentUpdate, Teacher};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::{ClassRepository, StoreError, StudentRepository, TeacherRepository};

/// A write the in-memory store accepted, recorded in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOp {
    CreateTeacher { email: String },
    CreateClass { name: String },
    CreateStudent { email: String, class_id: Option<Uuid> },
    UpdateStudent { id: Uuid, update: StudentUpdate },
    DeleteStudent { id: Uuid },
}

#[derive(Debug, Default)]
struct MemoryState {
    teachers: BTreeMap<Uuid, Teacher>,
    classes: BTreeMap<Uuid, Class>,
    students: BTreeMap<Uuid, Student>,
    ops: Vec<StoreOp>,
    failing_emails: BTreeSet<String>,
    failing_class_names: BTreeSet<String>,
}

/// Roster store kept in process memory, with write recording and fault injection.
#[derive(Debug, Default)]
pub struct MemoryRosterStore {
    state: Mutex<MemoryState>,
}

impl MemoryRosterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a student directly, bypassing the write log.
    pub async fn seed_student(&self, student: Student) {
        let mut state = self.state.lock().await;
        state.students.insert(student.id, student);
    }

    /// Insert a class directly, bypassing the write log.
    pub async fn seed_class(&self, class: Class) {
        let mut state = self.state.lock().await;
        state.classes.insert(class.id, class);
    }

    /// Make every student write touching `email` fail.
    pub async fn fail_student_writes_for(&self, email: &str) {
        let mut state = self.state.lock().await;
        state.failing_emails.insert(email.trim().to_lowercase());
    }

    pub async fn fail_class_creation_for(&self, name: &str) {
        let mut state = self.state.lock().await;
        state.failing_class_names.insert(name.to_string());
    }

    pub async fn ops(&self) -> Vec<StoreOp> {
        self.state.lock().await.ops.clone()
    }

    pub async fn clear_ops(&self) {
        self.state.lock().await.ops.clear();
    }

    pub async fn teachers(&self) -> Vec<Teacher> {
        self.state.lock().await.teachers.values().cloned().collect()
    }
}

fn injected(email: &str) -> StoreError {
    StoreError::Unavailable(format!("injected failure for {email}"))
}

#[async_trait]
impl StudentRepository for MemoryRosterStore {
    async fn find_student_by_email(&self, email: &str) -> Result<Option<Student>, StoreError> {
        let email = email.trim().to_lowercase();
        let state = self.state.lock().await;
        Ok(state
            .students
            .values()
            .find(|s| s.email.to_lowercase() == email)
            .cloned())
    }

    async fn create_student(&self, student: NewStudent) -> Result<Student, StoreError> {
        let email = student.email.trim().to_lowercase();
        let mut state = self.state.lock().await;
        if state.failing_emails.contains(&email) {
            return Err(injected(&email));
        }
        if state.students.values().any(|s| s.email.to_lowercase() == email) {
            return Err(StoreError::Duplicate {
                entity: "student",
                key: email,
            });
        }
        let created = Student {
            id: Uuid::new_v4(),
            email: email.clone(),
            password_hash: student.password_hash,
            full_name: student.full_name,
            enrollment_number: student.enrollment_number,
            class_id: student.class_id,
        };
        state.students.insert(created.id, created.clone());
        state.ops.push(StoreOp::CreateStudent {
            email,
            class_id: created.class_id,
        });
        Ok(created)
    }

    async fn update_student(&self, id: Uuid, update: StudentUpdate) -> Result<Student, StoreError> {
        let mut state = self.state.lock().await;
        let email = match state.students.get(&id) {
            Some(existing) => existing.email.to_lowercase(),
            None => {
                return Err(StoreError::NotFound {
                    entity: "student",
                    id,
                })
            }
        };
        if state.failing_emails.contains(&email) {
            return Err(injected(&email));
        }
        let updated = {
            let student = state.students.get_mut(&id).ok_or(StoreError::NotFound {
                entity: "student",
                id,
            })?;
            student.class_id = update.class_id;
            student.clone()
        };
        state.ops.push(StoreOp::UpdateStudent { id, update });
        Ok(updated)
    }

    async fn delete_student(&self, id: Uuid) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let email = match state.students.get(&id) {
            Some(existing) => existing.email.to_lowercase(),
            None => {
                return Err(StoreError::NotFound {
                    entity: "student",
                    id,
                })
            }
        };
        if state.failing_emails.contains(&email) {
            return Err(injected(&email));
        }
        state.students.remove(&id);
        state.ops.push(StoreOp::DeleteStudent { id });
        Ok(())
    }

    async fn list_students(&self) -> Result<Vec<Student>, StoreError> {
        let state = self.state.lock().await;
        let mut students = state.students.values().cloned().collect::<Vec<_>>();
        students.sort_by(|a, b| a.email.cmp(&b.email));
        Ok(students)
    }
}

#[async_trait]
impl ClassRepository for MemoryRosterStore {
    async fn find_class_by_name(&self, name: &str) -> Result<Option<Class>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.classes.values().find(|c| c.name == name).cloned())
    }

    async fn create_class(&self, class: NewClass) -> Result<Class, StoreError> {
        let mut state = self.state.lock().await;
        if state.failing_class_names.contains(&class.name) {
            return Err(injected(&class.name));
        }
        if state.classes.values().any(|c| c.name == class.name) {
            return Err(StoreError::Duplicate {
                entity: "class",
                key: class.name,
            });
        }
        let created = Class {
            id: Uuid::new_v4(),
            name: class.name,
            description: class.description,
            teacher_id: Some(class.teacher_id),
        };
        state.classes.insert(created.id, created.clone());
        state.ops.push(StoreOp::CreateClass {
            name: created.name.clone(),
        });
        Ok(created)
    }

    async fn list_classes(&self) -> Result<Vec<Class>, StoreError> {
        let state = self.state.lock().await;
        let mut classes = state.classes.values().cloned().collect::<Vec<_>>();
        classes.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(classes)
    }
}

#[async_trait]
impl TeacherRepository for MemoryRosterStore {
    async fn find_teacher_by_email(&self, email: &str) -> Result<Option<Teacher>, StoreError> {
        let email = email.trim().to_lowercase();
        let state = self.state.lock().await;
        Ok(state
            .teachers
            .values()
            .find(|t| t.email.to_lowercase() == email)
            .cloned())
    }

    async fn create_teacher(&self, teacher: NewTeacher) -> Result<Teacher, StoreError> {
        let email = teacher.email.trim().to_lowercase();
        let mut state = self.state.lock().await;
        if state.teachers.values().any(|t| t.email == email) {
            return Err(StoreError::Duplicate {
                entity: "teacher",
                key: email,
            });
        }
        let created = Teacher {
            id: Uuid::new_v4(),
            email: email.clone(),
            full_name: teacher.full_name,
            password_hash: teacher.password_hash,
        };
        state.teachers.insert(created.id, created.clone());
        state.ops.push(StoreOp::CreateTeacher { email });
        Ok(created)
    }
}
