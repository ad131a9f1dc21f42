use crate::db;
use crate::registry::{self, ExamSubject, NewExam};
use rusqlite::Connection;
use uuid::Uuid;

pub const CLASS_TEACHER: &str = "ct-1";
pub const ADMIN: &str = "admin-1";

/// In-memory workspace with one exam, one class and a roster.
pub struct Fixture {
    pub conn: Connection,
    pub grade_id: String,
    pub exam_id: String,
    pub class_id: String,
    pub students: Vec<String>,
}

impl Fixture {
    pub fn new(subjects: &[(&str, f64)], roster_size: usize) -> Self {
        let conn = Connection::open_in_memory().unwrap();
        db::init_schema(&conn).unwrap();
        let exam = registry::create_exam(
            &conn,
            &NewExam {
                name: "Midterm",
                grade_id: "g7",
                year: 2026,
                term: 1,
                exam_type: "midterm",
            },
        )
        .unwrap();
        for (name, max) in subjects {
            let teacher = format!("t-{name}");
            registry::add_exam_subject(&conn, &exam.id, name, name, *max, Some(&teacher)).unwrap();
        }
        let class = registry::create_class(&conn, "7A", "g7", Some(CLASS_TEACHER)).unwrap();
        let students = (0..roster_size)
            .map(|i| {
                registry::create_student(&conn, &class.id, &format!("Student {i:02}"))
                    .unwrap()
                    .id
            })
            .collect();
        Self {
            conn,
            grade_id: "g7".into(),
            exam_id: exam.id,
            class_id: class.id,
            students,
        }
    }

    pub fn subject(&self, name: &str) -> ExamSubject {
        registry::resolve_exam_subject(&self.conn, &self.exam_id, name).unwrap()
    }

    pub fn put_mark(&self, subject: &str, student_idx: usize, value: Option<f64>) {
        let subj = self.subject(subject);
        self.conn
            .execute(
                "INSERT INTO marks(id, exam_id, exam_subject_id, student_id, marks_obtained, entered_by, updated_at)
                 VALUES(?, ?, ?, ?, ?, 'seed', 'seed')
                 ON CONFLICT(exam_subject_id, student_id) DO UPDATE SET marks_obtained = excluded.marks_obtained",
                (
                    Uuid::new_v4().to_string(),
                    &self.exam_id,
                    &subj.id,
                    &self.students[student_idx],
                    value,
                ),
            )
            .unwrap();
    }
}
