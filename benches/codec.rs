use criterion::{black_box, criterion_group, criterion_main, Criterion};
use eventdb::event::{marshal_ts, Event, EventCol};

const EVENT_COUNT: usize = 1000;

fn build_events() -> Vec<Event> {
    (0..EVENT_COUNT)
        .map(|n| {
            let mut event = Event {
                name: "bench".into(),
                summary: format!("summary for event {n}"),
                description: "a moderately sized description of what happened".into(),
                time: (n as i64 + 1) * 1_000_000_000,
                ..Event::default()
            };
            event.set_tags("one two three four");
            event.cols.push(EventCol::new("host", "node-1"));
            event.cols.push(EventCol::new("job", "bench"));
            event
        })
        .collect()
}

fn bench_marshal(c: &mut Criterion) {
    let events = build_events();
    let mut n = 0;
    c.bench_function("event_marshal", |b| {
        b.iter(|| {
            let event = &events[n % EVENT_COUNT];
            n += 1;
            black_box(event.marshal().expect("marshal"));
        })
    });
}

fn bench_unmarshal(c: &mut Criterion) {
    let encoded: Vec<Vec<u8>> = build_events()
        .iter()
        .map(|event| event.marshal().expect("marshal").0)
        .collect();
    let mut n = 0;
    c.bench_function("event_unmarshal", |b| {
        b.iter(|| {
            let value = &encoded[n % EVENT_COUNT];
            n += 1;
            black_box(Event::unmarshal(value).expect("unmarshal"));
        })
    });
}

fn bench_marshal_ts(c: &mut Criterion) {
    let body = vec![0xA5u8; 256];
    let mut ts = 1i64;
    c.bench_function("key_marshal", |b| {
        b.iter(|| {
            ts = ts.wrapping_add(100) & i64::MAX;
            black_box(marshal_ts(ts, Some(&body)));
        })
    });
}

criterion_group!(benches, bench_marshal, bench_unmarshal, bench_marshal_ts);
criterion_main!(benches);
