use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::sync::Arc;
use tokio::runtime::Runtime;
use trellis_core::{EditorId, Node, NodeKind, NodePatch, ProjectKey};
use trellis_sync::{
    ChangeBroadcaster, ChangeEvent, ChangeKind, ClientMessage, MemoryStore, Request, RocksStore,
    StoreConfig, SyncHub, Topic,
};
use uuid::Uuid;

fn sample_canvas_call() -> ClientMessage {
    ClientMessage::Call {
        request_id: 42,
        editor: Some(EditorId::new("alice")),
        request: Request::AddNode {
            project: ProjectKey::from("bench"),
            node: Node::new("n1", NodeKind::Task, "Write the quarterly plan"),
        },
    }
}

fn bench_call_encode(c: &mut Criterion) {
    let msg = sample_canvas_call();
    c.bench_function("call_encode_bincode", |b| {
        b.iter(|| black_box(msg.encode().unwrap()))
    });
    c.bench_function("call_encode_json", |b| {
        b.iter(|| black_box(msg.to_json().unwrap()))
    });
}

fn bench_call_decode(c: &mut Criterion) {
    let encoded = sample_canvas_call().encode().unwrap();
    c.bench_function("call_decode_bincode", |b| {
        b.iter(|| black_box(ClientMessage::decode(black_box(&encoded)).unwrap()))
    });
}

fn bench_commit_memory(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let hub = SyncHub::in_memory();
    let key = ProjectKey::from("bench");
    rt.block_on(hub.canvas().add_node(&key, Node::new("n1", NodeKind::Task, ""), None))
        .unwrap();
    let patch = NodePatch::content("edited");

    c.bench_function("update_node_commit_memory", |b| {
        b.iter(|| {
            rt.block_on(hub.canvas().update_node(&key, "n1", &patch, None))
                .unwrap()
        })
    });
}

fn bench_commit_rocks(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let store = RocksStore::open(StoreConfig::for_testing(dir.path().join("db"))).unwrap();
    let hub = SyncHub::with_store(Arc::new(store));
    let key = ProjectKey::from("bench");
    let nodes: Vec<Node> = (0..100)
        .map(|i| Node::new(format!("n{i}"), NodeKind::Note, "content"))
        .collect();
    rt.block_on(hub.canvas().batch_replace_nodes(&key, nodes, None))
        .unwrap();
    let patch = NodePatch::content("edited");

    c.bench_function("update_node_commit_rocks_100_nodes", |b| {
        b.iter(|| {
            rt.block_on(hub.canvas().update_node(&key, "n50", &patch, None))
                .unwrap()
        })
    });
}

fn bench_broadcast_fanout(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let hub = ChangeBroadcaster::new(1024);
    let topic = Topic::Canvas(ProjectKey::from("bench"));
    let mut subs: Vec<_> = rt.block_on(async {
        let mut subs = Vec::new();
        for _ in 0..100 {
            subs.push(hub.subscribe(topic.clone()).await);
        }
        subs
    });
    let event = ChangeEvent {
        topic: topic.clone(),
        document_id: Uuid::new_v4(),
        version: 1,
        kind: ChangeKind::Content,
    };

    c.bench_function("broadcast_100_observers", |b| {
        b.iter(|| {
            rt.block_on(hub.publish(event.clone()));
            for sub in subs.iter_mut() {
                black_box(sub.try_recv());
            }
        })
    });
}

fn bench_memory_store_get_or_create(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let hub = SyncHub::with_store(Arc::new(MemoryStore::new()));
    let mut i = 0u64;

    c.bench_function("init_canvas_new_keys", |b| {
        b.iter(|| {
            i += 1;
            let key = ProjectKey::new(format!("p{i}"));
            rt.block_on(hub.canvas().init_canvas(&key)).unwrap()
        })
    });
}

criterion_group!(
    benches,
    bench_call_encode,
    bench_call_decode,
    bench_commit_memory,
    bench_commit_rocks,
    bench_broadcast_fanout,
    bench_memory_store_get_or_create,
);
criterion_main!(benches);
