//! Typed accessors for the school schema.
//!
//! `client.student()` is shorthand for `client.model("Student")` without the
//! lookup. The accessors assume the client was built over
//! [`roster_schema::school_schema`] or a variant of it; on any other schema
//! their operations fail with an unknown-entity error.

use roster_core::Store;

use crate::client::Client;
use crate::delegate::{EntityDelegate, Target};
use crate::transaction::TransactionClient;

macro_rules! entity_accessors {
    ($($method:ident => $entity:literal),* $(,)?) => {
        impl<S: Store> Client<S> {
            $(
                #[doc = concat!("Operations on `", $entity, "`.")]
                pub fn $method(&self) -> EntityDelegate<'_, S> {
                    EntityDelegate::new(Target::Client(self), $entity)
                }
            )*
        }

        impl<S: Store> TransactionClient<S> {
            $(
                #[doc = concat!("Operations on `", $entity, "` inside this transaction.")]
                pub fn $method(&self) -> EntityDelegate<'_, S> {
                    EntityDelegate::new(Target::Transaction(self), $entity)
                }
            )*
        }
    };
}

entity_accessors! {
    school => "School",
    user => "User",
    staff => "Staff",
    parent => "Parent",
    class => "Class",
    student => "Student",
    timetable => "Timetable",
    attendance => "Attendance",
}
