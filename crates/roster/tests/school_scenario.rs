mod common;

use asupersync::runtime::RuntimeBuilder;
use roster::ConstraintErrorKind;
use roster::ValidationErrorKind;
use roster::prelude::*;

use common::{
    cascade_school_schema, constraint_kind, expect_err, seed_school, unwrap_outcome,
    validation_kind,
};

#[test]
fn find_unique_includes_class() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let client = Client::in_memory(Arc::new(school_schema().unwrap()));

    rt.block_on(async {
        seed_school(&cx, &client).await;

        let student = unwrap_outcome(
            client
                .student()
                .find_unique(&cx, UniqueWhere::id("t1"), Selection::new().include("class"))
                .await,
        )
        .expect("student t1 exists");
        let class = student.one("class").expect("class is included");
        assert_eq!(class.value("id"), &Value::from("c1"));
        assert_eq!(class.value("teacherId"), &Value::from("st1"));
        // Defaults were filled in on create.
        assert!(!student.value("enrolledAt").is_null());

        let missing = unwrap_outcome(
            client
                .student()
                .find_unique(&cx, UniqueWhere::id("nope"), Selection::new())
                .await,
        );
        assert!(missing.is_none());
        let err = expect_err(
            client
                .student()
                .find_unique_or_throw(&cx, UniqueWhere::id("nope"), Selection::new())
                .await,
        );
        assert!(err.is_not_found());
    });
}

#[test]
fn delete_school_is_restricted() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let client = Client::in_memory(Arc::new(school_schema().unwrap()));

    rt.block_on(async {
        seed_school(&cx, &client).await;

        let err = expect_err(
            client
                .school()
                .delete(&cx, UniqueWhere::id("s1"), Selection::new())
                .await,
        );
        assert_eq!(constraint_kind(&err), Some(ConstraintErrorKind::Restrict));

        // Nothing was removed.
        assert!(
            unwrap_outcome(
                client
                    .school()
                    .find_unique(&cx, UniqueWhere::id("s1"), Selection::new())
                    .await
            )
            .is_some()
        );
        assert_eq!(
            unwrap_outcome(client.student().count(&cx, FindArgs::new()).await),
            3
        );
    });
}

#[test]
fn delete_school_cascades() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let client = Client::in_memory(Arc::new(cascade_school_schema()));

    rt.block_on(async {
        seed_school(&cx, &client).await;

        let deleted = unwrap_outcome(
            client
                .school()
                .delete(&cx, UniqueWhere::id("s1"), Selection::new())
                .await,
        );
        assert_eq!(deleted.value("name"), &Value::from("North"));

        let class = unwrap_outcome(
            client
                .class()
                .find_unique(&cx, UniqueWhere::id("c1"), Selection::new())
                .await,
        );
        assert!(class.is_none());
        let student = unwrap_outcome(
            client
                .student()
                .find_unique(&cx, UniqueWhere::id("t1"), Selection::new())
                .await,
        );
        assert!(student.is_none());

        // The other school is untouched; the user only loses its school link.
        assert_eq!(
            unwrap_outcome(client.student().count(&cx, FindArgs::new()).await),
            2
        );
        let user = unwrap_outcome(
            client
                .user()
                .find_unique_or_throw(&cx, UniqueWhere::id("u1"), Selection::new())
                .await,
        );
        assert!(user.value("schoolId").is_null());
    });
}

#[test]
fn deleted_row_is_not_found_afterwards() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let client = Client::in_memory(Arc::new(school_schema().unwrap()));

    rt.block_on(async {
        seed_school(&cx, &client).await;

        unwrap_outcome(
            client
                .student()
                .delete(&cx, UniqueWhere::id("t3"), Selection::new())
                .await,
        );
        let gone = unwrap_outcome(
            client
                .student()
                .find_unique(&cx, UniqueWhere::id("t3"), Selection::new())
                .await,
        );
        assert!(gone.is_none());

        let err = expect_err(
            client
                .student()
                .delete(&cx, UniqueWhere::id("t3"), Selection::new())
                .await,
        );
        assert!(err.is_not_found());
    });
}

#[test]
fn and_filter_is_the_intersection() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let client = Client::in_memory(Arc::new(school_schema().unwrap()));

    rt.block_on(async {
        seed_school(&cx, &client).await;

        let ids = |rows: &[Record]| -> Vec<String> {
            rows.iter()
                .filter_map(|r| r.value("id").as_str().map(str::to_string))
                .collect()
        };
        let by_school = Filter::equals("schoolId", "s2");
        let by_grade = Filter::equals("grade", 3);

        let ordered = || FindArgs::new().order_by(OrderBy::asc("id"));
        let school_rows =
            unwrap_outcome(client.student().find_many(&cx, ordered().filter(by_school.clone())).await);
        let grade_rows =
            unwrap_outcome(client.student().find_many(&cx, ordered().filter(by_grade.clone())).await);
        let both = unwrap_outcome(
            client
                .student()
                .find_many(&cx, ordered().filter(Filter::and([by_school, by_grade])))
                .await,
        );

        let expected: Vec<String> = ids(&school_rows)
            .into_iter()
            .filter(|id| ids(&grade_rows).contains(id))
            .collect();
        assert_eq!(ids(&both), expected);
        assert_eq!(ids(&both), ["t2"]);
    });
}

#[test]
fn nested_reads_and_relation_filters() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let client = Client::in_memory(Arc::new(school_schema().unwrap()));

    rt.block_on(async {
        seed_school(&cx, &client).await;

        let schools = unwrap_outcome(
            client
                .school()
                .find_many(
                    &cx,
                    FindArgs::new()
                        .filter(Filter::relation(
                            "students",
                            RelationFilter::some(Filter::field("grade", FieldFilter::new().gte(4))),
                        ))
                        .include_with(
                            "students",
                            FindArgs::new().order_by(OrderBy::desc("grade")).take(1),
                        ),
                )
                .await,
        );
        assert_eq!(schools.len(), 1);
        assert_eq!(schools[0].value("id"), &Value::from("s2"));
        let top = schools[0].many("students");
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].value("id"), &Value::from("t3"));

        let err = expect_err(
            client
                .student()
                .find_many(
                    &cx,
                    FindArgs::new().select(["id"]).include("class"),
                )
                .await,
        );
        assert_eq!(
            validation_kind(&err),
            Some(ValidationErrorKind::ConflictingSelection)
        );
    });
}

#[test]
fn nested_create_and_atomic_update() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let client = Client::in_memory(Arc::new(school_schema().unwrap()));

    rt.block_on(async {
        seed_school(&cx, &client).await;

        let class = unwrap_outcome(
            client
                .class()
                .create(
                    &cx,
                    CreateInput::new()
                        .set("name", "2B")
                        .connect("school", UniqueWhere::id("s1"))
                        .create_related(
                            "students",
                            CreateInput::new()
                                .set("name", "Wes")
                                .set("schoolId", "s1")
                                .set("grade", 2),
                        ),
                    Selection::new().include("students"),
                )
                .await,
        );
        assert_eq!(class.value("schoolId"), &Value::from("s1"));
        let students = class.many("students");
        assert_eq!(students.len(), 1);
        assert_eq!(students[0].value("classId"), class.value("id"));

        let bumped = unwrap_outcome(
            client
                .student()
                .update(
                    &cx,
                    UniqueWhere::id("t1"),
                    UpdateInput::new().increment("grade", 1),
                    Selection::new(),
                )
                .await,
        );
        assert_eq!(bumped.value("grade"), &Value::from(4));

        let err = expect_err(
            client
                .class()
                .create(
                    &cx,
                    CreateInput::new().set("name", "1A").set("schoolId", "s1"),
                    Selection::new(),
                )
                .await,
        );
        assert!(err.is_unique_violation());
    });
}

#[test]
fn aggregate_and_group_by() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let client = Client::in_memory(Arc::new(school_schema().unwrap()));

    rt.block_on(async {
        seed_school(&cx, &client).await;

        let stats = unwrap_outcome(
            client
                .student()
                .aggregate(
                    &cx,
                    AggregateArgs::new(AggregateSelection::new().count_all().avg("grade").max("grade")),
                )
                .await,
        );
        assert_eq!(stats.count_all, Some(3));
        assert_eq!(stats.to_json()["_count"]["_all"], serde_json::json!(3));
        assert_eq!(stats.get(AggregateFn::Max, "grade"), Some(Value::from(4)));
        let avg = stats
            .get(AggregateFn::Avg, "grade")
            .and_then(|v| v.as_f64())
            .expect("avg of grade");
        assert!((avg - 10.0 / 3.0).abs() < 1e-9);

        let groups = unwrap_outcome(
            client
                .student()
                .group_by(
                    &cx,
                    GroupByArgs::new(["schoolId"])
                        .aggregates(AggregateSelection::new().count_all())
                        .order_by(GroupOrderBy::Field(OrderBy::asc("schoolId"))),
                )
                .await,
        );
        let counts: Vec<(Value, Option<u64>)> = groups
            .iter()
            .map(|g| (g.key["schoolId"].clone(), g.aggregates.count_all))
            .collect();
        assert_eq!(
            counts,
            [(Value::from("s1"), Some(1)), (Value::from("s2"), Some(2))]
        );

        let err = expect_err(
            client
                .student()
                .group_by(
                    &cx,
                    GroupByArgs::new(["schoolId"]).order_by(GroupOrderBy::Field(OrderBy::asc("grade"))),
                )
                .await,
        );
        assert_eq!(validation_kind(&err), Some(ValidationErrorKind::InvalidGroupBy));
        let err = expect_err(
            client
                .student()
                .group_by(&cx, GroupByArgs::new(["schoolId"]).take(1))
                .await,
        );
        assert_eq!(validation_kind(&err), Some(ValidationErrorKind::InvalidGroupBy));
    });
}

#[test]
fn model_lookup_validates_entity() {
    let client = Client::in_memory(Arc::new(school_schema().unwrap()));
    assert_eq!(client.model("Student").unwrap().entity(), "Student");
    let err = client.model("Teacher").unwrap_err();
    assert_eq!(validation_kind(&err), Some(ValidationErrorKind::UnknownEntity));
}
