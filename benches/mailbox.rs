use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use lockstep::context::SimContext;
use lockstep::mailbox::MailboxConfig;
use lockstep::network::AgentId;
use lockstep::organization::Organization;
use serde_json::json;

fn setup(agents: usize, config: MailboxConfig) -> Organization {
    let org = Organization::new("bench", SimContext::shared(42), None);
    for i in 0..agents {
        org.create_agent(&format!("A{}", i), "node", config).unwrap();
    }
    org
}

fn bench_send(c: &mut Criterion) {
    // One party, so end_turn() never blocks
    let org = setup(1, MailboxConfig::default());
    let target = AgentId::new("A0").unwrap();
    let agent = org.registry().get(&target).unwrap();

    c.bench_function("send_directed", |b| {
        b.iter(|| {
            agent
                .mailbox()
                .send(black_box(&target), Some("bench"), json!({"n": 1}))
                .unwrap();
            if agent.mailbox().incoming_len() > 10_000 {
                org.end_turn(&target).unwrap();
                agent.mailbox().reset();
                while agent.mailbox().receive().is_some() {}
            }
        })
    });
}

fn bench_broadcast(c: &mut Criterion) {
    let mut group = c.benchmark_group("broadcast");
    for agents in [8usize, 64] {
        group.bench_function(format!("{}_agents", agents), |b| {
            b.iter_batched(
                || setup(agents, MailboxConfig::lossy(0.1, 0.0)),
                |org| {
                    let sender = org.registry().get(&AgentId::new("A0").unwrap()).unwrap();
                    black_box(sender.mailbox().broadcast_include_self(None, json!("beat")).unwrap());
                },
                BatchSize::SmallInput,
            )
        });
    }
    group.finish();
}

criterion_group!(benches, bench_send, bench_broadcast);
criterion_main!(benches);
