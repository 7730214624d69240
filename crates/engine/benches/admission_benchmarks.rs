use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use std::sync::Arc;
use std::time::Duration;

use scenecraft_core::{ClientKey, GenerationRequest};
use scenecraft_engine::{
    AdmissionGate, EngineConfig, GenerationEngine, PermissivePolicy, StaticDeviceProbe,
};

fn bench_rate_limit_check(c: &mut Criterion) {
    let mut group = c.benchmark_group("admission_gate");

    for clients in [1usize, 100, 10_000] {
        let gate = AdmissionGate::new(30);
        let keys: Vec<ClientKey> = (0..clients)
            .map(|i| ClientKey::new(format!("10.0.{}.{}", i / 256, i % 256)))
            .collect();

        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::new("allow", clients), &keys, |b, keys| {
            let mut i = 0;
            b.iter(|| {
                let key = &keys[i % keys.len()];
                i += 1;
                black_box(gate.allow(key))
            });
        });
    }

    group.finish();
}

fn bench_id_generation(c: &mut Criterion) {
    let gate = AdmissionGate::new(30);
    c.bench_function("generate_and_release_id", |b| {
        b.iter(|| {
            let id = gate.generate_id();
            black_box(gate.validate_id(id.as_str()));
            gate.release(&id);
        });
    });
}

fn bench_submit(c: &mut Criterion) {
    c.bench_function("submit_and_cancel", |b| {
        let engine = GenerationEngine::new(
            EngineConfig {
                enqueue_timeout: Duration::from_millis(1),
                ..EngineConfig::default()
            },
            Arc::new(StaticDeviceProbe::cpu()),
            Arc::new(PermissivePolicy),
        );
        b.iter(|| {
            let submitted = engine
                .submit(None, GenerationRequest::new("a harbour at dawn"))
                .ok();
            // keep the queue drained so every iteration is admitted
            if let Some(s) = submitted {
                engine.queue().dequeue(Duration::ZERO);
                engine.registry().discard(&s.job_id);
                engine.gate().release(&s.job_id);
            }
        });
    });
}

criterion_group!(benches, bench_rate_limit_check, bench_id_generation, bench_submit);
criterion_main!(benches);
