//! Contact-list benchmarks for parley-core.

use chrono::{Duration, Utc};
use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use parley_core::{
    sort_contacts, ChatMessage, ContactListEntry, Hub, HubConfig, Identity, InMemoryGateway,
    PersistenceGateway, SystemClock,
};
use std::sync::Arc;
use tokio::runtime::Runtime;

fn identity(i: usize) -> Identity {
    Identity::new(format!("user-{i}")).unwrap()
}

fn bench_sort(c: &mut Criterion) {
    let now = Utc::now();
    let entries: Vec<ContactListEntry> = (0..1_000)
        .map(|i| ContactListEntry {
            identity: identity(i),
            display_name: format!("User {}", 1_000 - i),
            is_online: i % 3 == 0,
            last_message: (i % 2 == 0).then(|| "hey".to_string()),
            last_message_at: (i % 2 == 0).then(|| now - Duration::seconds(i as i64)),
        })
        .collect();

    c.bench_function("sort_contacts_1000", |b| {
        b.iter_batched(
            || entries.clone(),
            |mut entries| sort_contacts(black_box(&mut entries)),
            BatchSize::SmallInput,
        )
    });
}

fn bench_contact_list_for(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let store = Arc::new(InMemoryGateway::new());
    for i in 0..200 {
        store.add_user(identity(i), format!("User {i}"));
    }
    let viewer = identity(0);
    rt.block_on(async {
        for i in (1..200).step_by(2) {
            let message = ChatMessage::new(viewer.clone(), identity(i), "hello", Utc::now());
            store.save_message(&message).await.unwrap();
        }
    });

    let (hub, _tasks) = rt.block_on(async {
        let started = Hub::start(HubConfig::default(), store, Arc::new(SystemClock::new()));
        started.0.seed_from_gateway().await.unwrap();
        started
    });

    c.bench_function("contact_list_for_200", |b| {
        b.iter(|| rt.block_on(hub.contact_list_for(black_box(&viewer))))
    });
}

criterion_group!(benches, bench_sort, bench_contact_list_for);
criterion_main!(benches);
