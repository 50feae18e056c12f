use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use silver_bridge::{
    message::BridgeMessage, Address, Bridge, BridgeConfig, FeeSchedule, InMemoryLedger,
    MessageType, NewMessage, Role, RoleRegistry,
};
use std::sync::Arc;

fn bench_bridge() -> (Bridge, Arc<InMemoryLedger>) {
    let admin = Address::from("admin");
    let validator = Address::from("validator");
    let roles = Arc::new(RoleRegistry::new());
    roles.grant(admin.clone(), Role::Admin);
    roles.grant(validator.clone(), Role::Validator);

    let ledger = Arc::new(InMemoryLedger::new());
    let bridge = Bridge::new(BridgeConfig::default(), roles, ledger.clone()).unwrap();
    bridge.add_validator(&admin, validator, 1_000).unwrap();
    (bridge, ledger)
}

fn request() -> NewMessage {
    NewMessage {
        sender: Address::from("alice"),
        recipient: Address::from("bob"),
        message_type: MessageType::TokenTransfer,
        payload: vec![1, 2, 3, 4, 5],
        value: 100_000,
        gas_budget: 1_000,
    }
}

fn benchmark_fee_computation(c: &mut Criterion) {
    let schedule = FeeSchedule::default();

    c.bench_function("compute_fee", |b| {
        b.iter(|| {
            schedule.compute_fee(
                black_box(MessageType::PaymentSettlement),
                black_box(50_000),
                black_box(10),
            )
        })
    });
}

fn benchmark_message_id(c: &mut Criterion) {
    let sender = Address::from("alice");
    let recipient = Address::from("bob");
    let payload = vec![0u8; 256];

    c.bench_function("compute_message_id", |b| {
        b.iter(|| {
            BridgeMessage::compute_id(
                black_box(&sender),
                black_box(&recipient),
                black_box(MessageType::DataTransfer),
                black_box(&payload),
                black_box(7),
                black_box(1_700_000_000),
            )
        })
    });
}

fn benchmark_send_message(c: &mut Criterion) {
    let (bridge, ledger) = bench_bridge();
    let alice = Address::from("alice");

    c.bench_function("send_message", |b| {
        b.iter(|| {
            ledger.mint(&alice, 100_000);
            bridge.send_message(black_box(request()))
        })
    });
}

fn benchmark_attest(c: &mut Criterion) {
    let (bridge, ledger) = bench_bridge();
    let alice = Address::from("alice");
    let validator = Address::from("validator");

    c.bench_function("attest_and_finalize", |b| {
        b.iter_batched(
            || {
                ledger.mint(&alice, 100_000);
                bridge.send_message(request()).unwrap().id
            },
            |id| bridge.attest(&validator, &id, true),
            BatchSize::SmallInput,
        )
    });
}

criterion_group!(
    benches,
    benchmark_fee_computation,
    benchmark_message_id,
    benchmark_send_message,
    benchmark_attest
);
criterion_main!(benches);
