#![allow(dead_code)]

use roster::prelude::*;
use roster::{ConstraintErrorKind, StoreErrorKind, ValidationErrorKind};

pub fn unwrap_outcome<T>(outcome: Outcome<T, Error>) -> T {
    match outcome {
        Outcome::Ok(v) => v,
        Outcome::Err(e) => panic!("unexpected error: {e}"),
        Outcome::Cancelled(r) => panic!("cancelled: {r:?}"),
        Outcome::Panicked(p) => panic!("panicked: {p:?}"),
    }
}

pub fn expect_err<T>(outcome: Outcome<T, Error>) -> Error {
    match outcome {
        Outcome::Err(e) => e,
        Outcome::Ok(_) => panic!("expected an error"),
        Outcome::Cancelled(r) => panic!("cancelled: {r:?}"),
        Outcome::Panicked(p) => panic!("panicked: {p:?}"),
    }
}

pub fn constraint_kind(err: &Error) -> Option<ConstraintErrorKind> {
    match err {
        Error::Constraint(e) => Some(e.kind),
        _ => None,
    }
}

pub fn store_kind(err: &Error) -> Option<StoreErrorKind> {
    match err {
        Error::Store(e) => Some(e.kind),
        _ => None,
    }
}

pub fn validation_kind(err: &Error) -> Option<ValidationErrorKind> {
    match err {
        Error::Validation(e) => Some(e.kind),
        _ => None,
    }
}

/// The school schema with Class and Student rows deleted along with
/// their School.
pub fn cascade_school_schema() -> Schema {
    let mut doc = roster_schema::school_document().unwrap();
    for entity in ["Class", "Student"] {
        doc.relation_mut(entity, "school").unwrap().on_delete = Some("cascade".into());
    }
    doc.build().unwrap()
}

/// School s1 with teacher st1 (user u1), class c1 and student t1, plus a
/// second school s2 with class c2 and students t2, t3.
pub async fn seed_school<S: Store>(cx: &Cx, client: &Client<S>) {
    let no_selection = Selection::new;

    for (id, name) in [("s1", "North"), ("s2", "South")] {
        unwrap_outcome(
            client
                .school()
                .create(cx, CreateInput::new().set("id", id).set("name", name), no_selection())
                .await,
        );
    }
    unwrap_outcome(
        client
            .user()
            .create(
                cx,
                CreateInput::new()
                    .set("id", "u1")
                    .set("email", "ada@north.edu")
                    .set("name", "Ada")
                    .set("role", "TEACHER")
                    .set("schoolId", "s1"),
                no_selection(),
            )
            .await,
    );
    unwrap_outcome(
        client
            .staff()
            .create(
                cx,
                CreateInput::new()
                    .set("id", "st1")
                    .set("userId", "u1")
                    .set("subjects", vec![Value::from("math"), Value::from("physics")]),
                no_selection(),
            )
            .await,
    );
    for (id, school, name, teacher) in [
        ("c1", "s1", "1A", Some("st1")),
        ("c2", "s2", "1A", None),
    ] {
        let mut data = CreateInput::new()
            .set("id", id)
            .set("schoolId", school)
            .set("name", name);
        if let Some(teacher) = teacher {
            data = data.set("teacherId", teacher);
        }
        unwrap_outcome(client.class().create(cx, data, no_selection()).await);
    }
    for (id, name, school, class, grade) in [
        ("t1", "Tom", "s1", "c1", 3),
        ("t2", "Uma", "s2", "c2", 3),
        ("t3", "Vic", "s2", "c2", 4),
    ] {
        unwrap_outcome(
            client
                .student()
                .create(
                    cx,
                    CreateInput::new()
                        .set("id", id)
                        .set("name", name)
                        .set("schoolId", school)
                        .set("classId", class)
                        .set("grade", grade),
                    no_selection(),
                )
                .await,
        );
    }
}
