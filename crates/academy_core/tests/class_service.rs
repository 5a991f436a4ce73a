mod common;

use academy_core::{
    ClassService, CoreConfig, FieldValue, FilterValue, NewClass, Patch, SearchQuery, ServiceError,
    SortOrder, ValidationError,
};
use common::{
    classes, create_class, create_student, ctx, enroll, names, setup, store, students, Calls,
    FlakyStore, Faults,
};
use rusqlite::params;
use uuid::Uuid;

#[test]
fn create_applies_defaults() {
    let conn = setup();
    let service = classes(&conn);
    let tenant = Uuid::new_v4();

    let mut input = NewClass::named("  Algebra I  ");
    input.subject = Some("Math".to_string());
    input.start_date = Some("2025-03-02".to_string());
    input.color = Some("".to_string());
    let class = service.create(tenant, input, &ctx()).unwrap();

    assert_eq!(class.text("name"), Some("Algebra I"));
    assert_eq!(class.text("class_code"), Some("C000001"));
    assert_eq!(class.field("is_active"), &FieldValue::Bool(true));
    assert_eq!(class.field("color"), &FieldValue::Null);
    assert!(class.field("created_at").as_integer().is_some());
}

#[test]
fn class_names_are_unique_per_tenant() {
    let conn = setup();
    let service = classes(&conn);
    let tenant = Uuid::new_v4();
    create_class(&service, tenant, "Physics", None);

    let err = service
        .create(tenant, NewClass::named("Physics "), &ctx())
        .unwrap_err();
    assert!(matches!(
        err,
        ServiceError::Validation(ValidationError::Duplicate { ref field, .. }) if field == "name"
    ));

    create_class(&service, Uuid::new_v4(), "Physics", None);
}

#[test]
fn rename_checks_other_classes_but_allows_own_name() {
    let conn = setup();
    let service = classes(&conn);
    let tenant = Uuid::new_v4();
    let chemistry = create_class(&service, tenant, "Chemistry", None);
    create_class(&service, tenant, "Biology", None);

    let err = service
        .update(
            tenant,
            chemistry.id,
            &Patch::new().set("name", "Biology"),
            Some(chemistry.version),
            &ctx(),
        )
        .unwrap_err();
    assert!(matches!(
        err,
        ServiceError::Validation(ValidationError::Duplicate { .. })
    ));

    let kept = service
        .update(
            tenant,
            chemistry.id,
            &Patch::new()
                .set("name", "Chemistry")
                .set("description", "Lab included"),
            Some(chemistry.version),
            &ctx(),
        )
        .unwrap();
    assert_eq!(kept.text("description"), Some("Lab included"));
}

#[test]
fn delete_is_refused_while_enrollments_are_active() {
    let conn = setup();
    let class_service = classes(&conn);
    let student_service = students(&conn);
    let tenant = Uuid::new_v4();
    let class = create_class(&class_service, tenant, "Debate", None);
    let student = create_student(&student_service, tenant, "Speaker");
    let enrollment = enroll(&conn, tenant, student.id, class.id, "active");

    let err = class_service
        .soft_delete(tenant, class.id, Some(class.version), &ctx())
        .unwrap_err();
    assert!(matches!(
        err,
        ServiceError::Validation(ValidationError::HasDependents { dependents: 1, .. })
    ));
    let unchanged = class_service.get(tenant, class.id, &ctx()).unwrap().record;
    assert_eq!(unchanged.field("is_active"), &FieldValue::Bool(true));
    assert_eq!(unchanged.version, class.version);

    conn.execute(
        "UPDATE enrollments SET status = 'withdrawn' WHERE id = ?1;",
        params![enrollment],
    )
    .unwrap();
    let deleted = class_service
        .soft_delete(tenant, class.id, Some(class.version), &ctx())
        .unwrap();
    assert_eq!(deleted.field("is_active"), &FieldValue::Bool(false));
}

#[test]
fn free_text_combines_with_active_filter() {
    let conn = setup();
    let service = classes(&conn);
    let tenant = Uuid::new_v4();
    create_class(&service, tenant, "Korean Reading", None);
    let closed = create_class(&service, tenant, "Korean Writing", None);
    create_class(&service, tenant, "English Reading", None);
    service
        .soft_delete(tenant, closed.id, Some(closed.version), &ctx())
        .unwrap();

    let page = service
        .search(
            &SearchQuery::new(tenant)
                .with_text("korean")
                .with_filter("is_active", FilterValue::Eq(FieldValue::Bool(true))),
            &ctx(),
        )
        .unwrap();
    assert_eq!(names(&page.items), vec!["Korean Reading"]);

    let inactive = service
        .search(
            &SearchQuery::new(tenant)
                .with_filter("is_active", FilterValue::Eq(FieldValue::Bool(false)))
                .with_total(),
            &ctx(),
        )
        .unwrap();
    assert_eq!(names(&inactive.items), vec!["Korean Writing"]);
    assert_eq!(inactive.total_count, Some(1));
}

#[test]
fn malformed_dates_are_rejected() {
    let conn = setup();
    let service = classes(&conn);
    let tenant = Uuid::new_v4();

    let mut input = NewClass::named("Calendar");
    input.end_date = Some("2025-13-45".to_string());
    let err = service.create(tenant, input, &ctx()).unwrap_err();
    assert!(matches!(
        err,
        ServiceError::Validation(ValidationError::TypeMismatch { ref field, .. }) if field == "end_date"
    ));

    let class = create_class(&service, tenant, "Calendar", None);
    let err = service
        .update(
            tenant,
            class.id,
            &Patch::new().set("start_date", "tomorrow"),
            Some(class.version),
            &ctx(),
        )
        .unwrap_err();
    assert!(matches!(
        err,
        ServiceError::Validation(ValidationError::TypeMismatch { .. })
    ));
}

#[test]
fn grade_sort_places_ungraded_classes_last_when_descending() {
    let conn = setup();
    let service = classes(&conn);
    let tenant = Uuid::new_v4();
    for (name, grade) in [
        ("Biology", Some("G8")),
        ("Chess Club", None),
        ("Drawing", Some("G7")),
        ("Essay", Some("G8")),
        ("Field Trip", None),
    ] {
        let mut input = NewClass::named(name);
        input.grade = grade.map(str::to_string);
        service.create(tenant, input, &ctx()).unwrap();
    }

    let base = SearchQuery::new(tenant)
        .sorted_by("grade", SortOrder::Desc)
        .with_limit(2);
    let mut grades = Vec::new();
    let mut query = base.clone();
    loop {
        let page = service.search(&query, &ctx()).unwrap();
        grades.extend(
            page.items
                .iter()
                .map(|record| record.text("grade").map(str::to_string)),
        );
        match page.next_cursor {
            Some(cursor) => query = base.clone().after(cursor),
            None => break,
        }
    }

    assert_eq!(grades.len(), 5);
    assert_eq!(
        grades[..3],
        [Some("G8".to_string()), Some("G8".to_string()), Some("G7".to_string())]
    );
    assert_eq!(grades[3..], [None, None]);
}

#[test]
fn store_index_rejects_names_the_pre_check_missed() {
    let conn = setup();
    let faults = Faults::default();
    let calls = Calls::default();
    let service = ClassService::new(
        FlakyStore::new(store(&conn), &faults, &calls),
        CoreConfig::default(),
    );
    let tenant = Uuid::new_v4();
    create_class(&service, tenant, "Robotics", None);
    let other = create_class(&service, tenant, "Debate", None);
    faults.stale_scan.set(true);

    let err = service
        .create(tenant, NewClass::named("Robotics"), &ctx())
        .unwrap_err();
    assert!(matches!(
        err,
        ServiceError::Validation(ValidationError::Duplicate { ref field, ref value })
            if field == "name" && value == "Robotics"
    ));

    let err = service
        .update(
            tenant,
            other.id,
            &Patch::new().set("name", "Robotics"),
            Some(other.version),
            &ctx(),
        )
        .unwrap_err();
    assert!(matches!(
        err,
        ServiceError::Validation(ValidationError::Duplicate { ref field, .. }) if field == "name"
    ));

    let reloaded = service.get(tenant, other.id, &ctx()).unwrap().record;
    assert_eq!(reloaded.text("name"), Some("Debate"));
    assert_eq!(reloaded.version, other.version);

    create_class(&service, Uuid::new_v4(), "Robotics", None);
}
