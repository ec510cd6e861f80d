use eventdb::{
    event::{Event, EventCol},
    query::Query,
    store::EventStore,
};
use tempfile::tempdir;

fn open_store() -> (tempfile::TempDir, EventStore) {
    let dir = tempdir().unwrap();
    let store = EventStore::open(dir.path().join("events")).unwrap();
    (dir, store)
}

fn tagged_event(name: &str, time: i64, tags: &str) -> Event {
    let mut event = Event {
        name: name.into(),
        summary: format!("event at {time}"),
        time,
        ..Event::default()
    };
    event.set_tags(tags);
    event
}

#[test]
fn tag_queries_filter_and_keep_insertion_order() {
    let (_dir, store) = open_store();
    store.save_event(&tagged_event("svc", 1, "a")).unwrap();
    store.save_event(&tagged_event("svc", 2, "a b")).unwrap();
    store.save_event(&tagged_event("svc", 3, "c")).unwrap();

    let query = Query::parse("svc:_tag=a").unwrap();
    let events = query.execute(&store, 0, 10).unwrap();
    let times: Vec<_> = events.iter().map(|event| event.time).collect();
    assert_eq!(times, [1, 2]);
}

#[test]
fn column_queries_require_an_exact_first_match() {
    let (_dir, store) = open_store();
    let mut event = tagged_event("svc", 1, "");
    event.cols.push(EventCol::new("k1", "v1"));
    event.cols.push(EventCol::new("k2", "v2"));
    store.save_event(&event).unwrap();

    let hit = Query::parse("svc:k1=v1").unwrap().execute(&store, 0, 10).unwrap();
    assert_eq!(hit.len(), 1);

    let miss = Query::parse("svc:k1=v2").unwrap().execute(&store, 0, 10).unwrap();
    assert!(miss.is_empty());
}

#[test]
fn multi_bucket_queries_concatenate_in_plan_order() {
    let (_dir, store) = open_store();
    store.save_event(&tagged_event("alpha", 5, "")).unwrap();
    store.save_event(&tagged_event("beta", 1, "")).unwrap();

    let query = Query::parse("alpha;beta").unwrap();
    let events = query.execute(&store, 0, 10).unwrap();
    let names: Vec<_> = events.iter().map(|event| event.name.as_str()).collect();
    assert_eq!(names, ["alpha", "beta"]);
}

#[test]
fn unknown_buckets_contribute_nothing() {
    let (_dir, store) = open_store();
    store.save_event(&tagged_event("svc", 1, "")).unwrap();

    let query = Query::parse("svc;ghost").unwrap();
    let events = query.execute(&store, 0, 10).unwrap();
    assert_eq!(events.len(), 1);

    assert_eq!(query.execute_delete(&store, 0, 10).unwrap(), 1);
    assert_eq!(query.execute_count(&store, 0, 10).unwrap().len(), 0);
}

#[test]
fn count_and_delete_follow_the_same_predicates() {
    let (_dir, store) = open_store();
    for time in 1..=6 {
        let tags = if time % 2 == 0 { "even" } else { "odd" };
        store.save_event(&tagged_event("svc", time, tags)).unwrap();
    }

    let query = Query::parse("svc:_tag=even").unwrap();
    let mut counted = query.execute_count(&store, 0, 10).unwrap();
    counted.sort_unstable();
    assert_eq!(counted, [2, 4, 6]);

    assert_eq!(query.execute_delete(&store, 0, 10).unwrap(), 3);

    let remaining = Query::parse("svc").unwrap().execute(&store, 0, 10).unwrap();
    let times: Vec<_> = remaining.iter().map(|event| event.time).collect();
    assert_eq!(times, [1, 3, 5]);
}

#[test]
fn match_all_and_predicate_disjuncts_combine() {
    let (_dir, store) = open_store();
    store.save_event(&tagged_event("svc", 1, "a")).unwrap();
    store.save_event(&tagged_event("svc", 2, "b")).unwrap();

    // The bare fragment collapses the whole sub-query to match-all.
    let query = Query::parse("svc:_tag=a;svc").unwrap();
    let events = query.execute(&store, 0, 10).unwrap();
    assert_eq!(events.len(), 2);
}
