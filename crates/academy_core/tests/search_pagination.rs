mod common;

use academy_core::{
    EntityKind, FieldValue, FilterValue, NewStudent, Page, SearchError, SearchQuery, SortOrder,
    ValidationError,
};
use common::{create_student, ctx, names, setup, students};
use uuid::Uuid;

fn collect_all_pages(
    service: &academy_core::StudentService<academy_core::SqliteRecordStore<'_>>,
    base: SearchQuery,
) -> Vec<Page> {
    let mut pages = Vec::new();
    let mut query = base.clone();
    loop {
        let page = service.search(&query, &ctx()).unwrap();
        let next = page.next_cursor.clone();
        pages.push(page);
        match next {
            Some(cursor) => query = base.clone().after(cursor),
            None => return pages,
        }
    }
}

#[test]
fn twenty_five_records_page_as_ten_ten_five() {
    let conn = setup();
    let service = students(&conn);
    let tenant = Uuid::new_v4();
    for index in [7, 25, 1, 13, 2, 19, 24, 3, 11, 16, 4, 22, 5, 9, 18, 6, 21, 8, 14, 10, 23, 12, 17, 15, 20]
    {
        create_student(&service, tenant, &format!("Student {index:02}"));
    }

    let base = SearchQuery::new(tenant).sorted_by("name", SortOrder::Asc).with_limit(10);
    let first = service.search(&base, &ctx()).unwrap();
    assert_eq!(first.items.len(), 10);
    assert!(first.has_more);
    assert_eq!(names(&first.items)[0], "Student 01");
    assert_eq!(names(&first.items)[9], "Student 10");

    let second = service
        .search(&base.clone().after(first.next_cursor.clone().unwrap()), &ctx())
        .unwrap();
    assert_eq!(second.items.len(), 10);
    assert!(second.has_more);
    assert_eq!(names(&second.items)[0], "Student 11");
    assert_eq!(names(&second.items)[9], "Student 20");

    let third = service
        .search(&base.clone().after(second.next_cursor.clone().unwrap()), &ctx())
        .unwrap();
    assert_eq!(
        names(&third.items),
        vec!["Student 21", "Student 22", "Student 23", "Student 24", "Student 25"]
    );
    assert!(!third.has_more);
    assert!(third.next_cursor.is_none());
}

#[test]
fn paging_yields_exactly_the_unbounded_result() {
    let conn = setup();
    let service = students(&conn);
    let tenant = Uuid::new_v4();
    for index in 0..37 {
        create_student(&service, tenant, &format!("Learner {}", (index * 7) % 37));
    }

    let unbounded = service
        .search(&SearchQuery::new(tenant).with_limit(200), &ctx())
        .unwrap();
    assert_eq!(unbounded.items.len(), 37);
    assert!(!unbounded.has_more);

    for limit in [1, 4, 10, 36, 37] {
        let pages = collect_all_pages(&service, SearchQuery::new(tenant).with_limit(limit));
        let paged_ids = pages
            .iter()
            .flat_map(|page| page.items.iter().map(|record| record.id))
            .collect::<Vec<_>>();
        let unbounded_ids = unbounded.items.iter().map(|record| record.id).collect::<Vec<_>>();
        assert_eq!(paged_ids, unbounded_ids, "limit {limit}");

        for page in &pages {
            assert_eq!(page.has_more, page.next_cursor.is_some());
        }
    }
}

#[test]
fn descending_pages_reverse_the_ascending_order() {
    let conn = setup();
    let service = students(&conn);
    let tenant = Uuid::new_v4();
    for index in 1..=12 {
        create_student(&service, tenant, &format!("Member {index:02}"));
    }

    let pages = collect_all_pages(
        &service,
        SearchQuery::new(tenant)
            .sorted_by("name", SortOrder::Desc)
            .with_limit(5),
    );
    let ordered = pages
        .iter()
        .flat_map(|page| names(&page.items))
        .collect::<Vec<_>>();
    let expected = (1..=12)
        .rev()
        .map(|index| format!("Member {index:02}"))
        .collect::<Vec<_>>();
    assert_eq!(ordered, expected);
    assert_eq!(pages.len(), 3);
}

#[test]
fn equal_sort_keys_break_ties_by_id() {
    let conn = setup();
    let service = students(&conn);
    let tenant = Uuid::new_v4();
    let mut ids = (0..9)
        .map(|_| create_student(&service, tenant, "Same Name").id)
        .collect::<Vec<_>>();
    ids.sort();

    for _ in 0..2 {
        let pages = collect_all_pages(&service, SearchQuery::new(tenant).with_limit(4));
        let paged = pages
            .iter()
            .flat_map(|page| page.items.iter().map(|record| record.id))
            .collect::<Vec<_>>();
        assert_eq!(paged, ids);
    }
}

#[test]
fn sorting_by_created_at_pages_by_integer_key() {
    let conn = setup();
    let service = students(&conn);
    let tenant = Uuid::new_v4();
    for index in 0..6 {
        create_student(&service, tenant, &format!("Timed {index}"));
    }

    let pages = collect_all_pages(
        &service,
        SearchQuery::new(tenant)
            .sorted_by("created_at", SortOrder::Desc)
            .with_limit(4),
    );
    let items = pages
        .iter()
        .flat_map(|page| page.items.iter())
        .collect::<Vec<_>>();
    assert_eq!(items.len(), 6);
    for pair in items.windows(2) {
        let newer = pair[0].field("created_at").as_integer().unwrap();
        let older = pair[1].field("created_at").as_integer().unwrap();
        assert!(newer > older || (newer == older && pair[0].id > pair[1].id));
    }
}

#[test]
fn cursor_from_another_sort_is_rejected() {
    let conn = setup();
    let service = students(&conn);
    let tenant = Uuid::new_v4();
    for index in 0..3 {
        create_student(&service, tenant, &format!("Cursor {index}"));
    }

    let page = service
        .search(&SearchQuery::new(tenant).with_limit(1), &ctx())
        .unwrap();
    let cursor = page.next_cursor.unwrap();

    let err = service
        .search(
            &SearchQuery::new(tenant)
                .sorted_by("name", SortOrder::Desc)
                .with_limit(1)
                .after(cursor.clone()),
            &ctx(),
        )
        .unwrap_err();
    assert!(matches!(
        err,
        SearchError::Validation(ValidationError::CursorMismatch { .. })
    ));

    let err = service
        .search(
            &SearchQuery::new(tenant)
                .sorted_by("student_number", SortOrder::Asc)
                .after(cursor),
            &ctx(),
        )
        .unwrap_err();
    assert!(matches!(
        err,
        SearchError::Validation(ValidationError::CursorMismatch { .. })
    ));
}

#[test]
fn malformed_cursor_is_a_validation_error() {
    let conn = setup();
    let service = students(&conn);
    let err = service
        .search(&SearchQuery::new(Uuid::new_v4()).after("%%%"), &ctx())
        .unwrap_err();
    assert!(matches!(
        err,
        SearchError::Validation(ValidationError::InvalidCursor(_))
    ));
}

#[test]
fn malformed_queries_are_rejected() {
    let conn = setup();
    let service = students(&conn);
    let tenant = Uuid::new_v4();

    for limit in [0, 201] {
        let err = service
            .search(&SearchQuery::new(tenant).with_limit(limit), &ctx())
            .unwrap_err();
        assert!(matches!(
            err,
            SearchError::Validation(ValidationError::LimitOutOfRange { .. })
        ));
    }

    let err = service
        .search(&SearchQuery::new(tenant).with_text("x".repeat(101)), &ctx())
        .unwrap_err();
    assert!(matches!(
        err,
        SearchError::Validation(ValidationError::FreeTextTooLong { chars: 101, max: 100 })
    ));

    let err = service
        .search(&SearchQuery::new(tenant).sorted_by("phone", SortOrder::Asc), &ctx())
        .unwrap_err();
    assert!(matches!(
        err,
        SearchError::Validation(ValidationError::FieldNotSortable(_))
    ));

    let err = service
        .search(
            &SearchQuery::new(tenant)
                .with_filter("shoe_size", FilterValue::Eq(FieldValue::Integer(42))),
            &ctx(),
        )
        .unwrap_err();
    assert!(matches!(
        err,
        SearchError::Validation(ValidationError::UnknownField {
            kind: EntityKind::Student,
            ..
        })
    ));
}

#[test]
fn filters_are_pushed_down_on_the_filtered_path() {
    let conn = setup();
    let service = students(&conn);
    let tenant = Uuid::new_v4();
    let rows = [
        ("Ahn", "G1", "2024-02-01", "active"),
        ("Baek", "G2", "2024-03-15", "active"),
        ("Cho", "G3", "2024-04-30", "waiting"),
        ("Do", "G2", "2024-06-01", "active"),
    ];
    for (name, grade, enrolled, status) in rows {
        let mut input = NewStudent::named(name);
        input.grade_level = Some(grade.to_string());
        input.enrollment_date = Some(enrolled.to_string());
        input.status = Some(status.to_string());
        service.create(tenant, input, &ctx()).unwrap();
    }

    let page = service
        .search(
            &SearchQuery::new(tenant)
                .with_filter(
                    "grade_level",
                    FilterValue::AnyOf(vec![FieldValue::from("G2"), FieldValue::from("G3")]),
                )
                .with_filter(
                    "enrollment_date",
                    FilterValue::Range {
                        min: Some(FieldValue::from("2024-03-01")),
                        max: Some(FieldValue::from("2024-05-31")),
                    },
                )
                .with_limit(1),
            &ctx(),
        )
        .unwrap();
    assert_eq!(names(&page.items), vec!["Baek"]);
    assert!(page.has_more);

    let rest = service
        .search(
            &SearchQuery::new(tenant)
                .with_filter("status", FilterValue::Eq(FieldValue::from("active")))
                .with_total(),
            &ctx(),
        )
        .unwrap();
    assert_eq!(names(&rest.items), vec!["Ahn", "Baek", "Do"]);
    assert_eq!(rest.total_count, Some(3));
}

#[test]
fn nullable_sort_key_pages_completely_both_ways() {
    let conn = setup();
    let service = students(&conn);
    let tenant = Uuid::new_v4();
    let dates = [
        Some("2024-03-01"),
        None,
        Some("2023-09-01"),
        None,
        Some("2024-03-01"),
        Some("2022-01-15"),
        None,
        Some("2023-09-01"),
        None,
        Some("2025-01-02"),
        Some("2024-03-01"),
    ];
    for (index, date) in dates.iter().enumerate() {
        let mut input = NewStudent::named(format!("Cho {index:02}"));
        input.enrollment_date = date.map(str::to_string);
        service.create(tenant, input, &ctx()).unwrap();
    }

    for order in [SortOrder::Asc, SortOrder::Desc] {
        for text in [None, Some("cho")] {
            let mut base = SearchQuery::new(tenant).sorted_by("enrollment_date", order);
            if let Some(text) = text {
                base = base.with_text(text);
            }

            let unbounded = service
                .search(&base.clone().with_limit(200), &ctx())
                .unwrap();
            let keys = unbounded
                .items
                .iter()
                .map(|record| record.text("enrollment_date"))
                .collect::<Vec<_>>();
            let (nulls, dated) = match order {
                SortOrder::Asc => keys.split_at(4),
                SortOrder::Desc => {
                    let (dated, nulls) = keys.split_at(7);
                    (nulls, dated)
                }
            };
            assert!(nulls.iter().all(Option::is_none), "{order:?} {keys:?}");
            assert!(dated.iter().all(Option::is_some), "{order:?} {keys:?}");

            let expected = unbounded
                .items
                .iter()
                .map(|record| record.id)
                .collect::<Vec<_>>();
            for limit in [1, 2, 3, 5] {
                let paged = collect_all_pages(&service, base.clone().with_limit(limit))
                    .into_iter()
                    .flat_map(|page| page.items)
                    .map(|record| record.id)
                    .collect::<Vec<_>>();
                assert_eq!(paged, expected, "{order:?} text={text:?} limit={limit}");
            }
        }
    }
}

#[test]
fn total_count_covers_the_whole_filtered_set() {
    let conn = setup();
    let service = students(&conn);
    let tenant = Uuid::new_v4();
    for index in 0..25 {
        create_student(&service, tenant, &format!("Counted {index:02}"));
    }

    let page = service
        .search(&SearchQuery::new(tenant).with_limit(10).with_total(), &ctx())
        .unwrap();
    assert_eq!(page.items.len(), 10);
    assert_eq!(page.total_count, Some(25));

    let without = service
        .search(&SearchQuery::new(tenant).with_limit(10), &ctx())
        .unwrap();
    assert_eq!(without.total_count, None);
}

#[test]
fn tenants_never_see_each_other() {
    let conn = setup();
    let service = students(&conn);
    let academy_a = Uuid::new_v4();
    let academy_b = Uuid::new_v4();
    create_student(&service, academy_a, "Shared Name");
    create_student(&service, academy_b, "Shared Name");
    create_student(&service, academy_b, "Only B");

    let page_a = service.search(&SearchQuery::new(academy_a), &ctx()).unwrap();
    assert_eq!(page_a.items.len(), 1);
    assert!(page_a.items.iter().all(|record| record.tenant_id == academy_a));

    let page_b = service
        .search(&SearchQuery::new(academy_b).with_text("shared"), &ctx())
        .unwrap();
    assert_eq!(page_b.items.len(), 1);
    assert_eq!(page_b.items[0].tenant_id, academy_b);
}

#[test]
fn empty_tenant_yields_empty_final_page() {
    let conn = setup();
    let service = students(&conn);
    let page = service
        .search(&SearchQuery::new(Uuid::new_v4()).with_text("nobody"), &ctx())
        .unwrap();
    assert!(page.items.is_empty());
    assert!(!page.has_more);
    assert!(page.next_cursor.is_none());
}
