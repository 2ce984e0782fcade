use criterion::{Criterion, criterion_group, criterion_main};
use fulfillment::{WebhookVerifier, signature_header};

const SECRET: &str = "whsec_bench";
const NOW: i64 = 1_700_000_000;

fn payload(items: usize) -> Vec<u8> {
    let mut metadata = serde_json::Map::new();
    metadata.insert("user_id".into(), uuid_like().into());
    metadata.insert("item_count".into(), items.to_string().into());
    for i in 0..items {
        metadata.insert(format!("item_{i}_id"), format!("SKU-{i:03}").into());
        metadata.insert(format!("item_{i}_qty"), "2".into());
    }

    serde_json::json!({
        "id": "evt_bench",
        "type": "checkout.session.completed",
        "data": { "object": {
            "id": "cs_bench",
            "amount_total": 20000,
            "currency": "egp",
            "customer_details": { "email": "bench@example.com" },
            "metadata": metadata
        }}
    })
    .to_string()
    .into_bytes()
}

fn uuid_like() -> String {
    "6f1c2f4e-5d7a-4c3b-9a8e-2b1d0c9e8f7a".to_string()
}

fn bench_verify(c: &mut Criterion) {
    let verifier = WebhookVerifier::new(SECRET);
    let small = payload(1);
    let large = payload(50);
    let small_header = signature_header(SECRET, &small, NOW);
    let large_header = signature_header(SECRET, &large, NOW);

    c.bench_function("webhook/verify_1_item", |b| {
        b.iter(|| {
            verifier
                .verify_at(&small, Some(&small_header), NOW)
                .unwrap()
        });
    });

    c.bench_function("webhook/verify_50_items", |b| {
        b.iter(|| {
            verifier
                .verify_at(&large, Some(&large_header), NOW)
                .unwrap()
        });
    });

    c.bench_function("webhook/reject_bad_signature", |b| {
        let header = format!("t={NOW},v1={}", "0".repeat(64));
        b.iter(|| verifier.verify_at(&large, Some(&header), NOW).is_err());
    });
}

criterion_group!(benches, bench_verify);
criterion_main!(benches);
