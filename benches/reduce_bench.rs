use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use neo_mesh::prelude::*;

fn bench_reduce(c: &mut Criterion) {
    let mut group = c.benchmark_group("run_command");

    for &len in &[1usize << 12, 1 << 20] {
        let data: Vec<f64> = (0..len).map(|i| (i % 97) as f64).collect();
        group.throughput(Throughput::Elements(len as u64));

        for policy in [ExecutionPolicy::Sequential, ExecutionPolicy::Thread] {
            let queue = Runner::new(RunnerConfig::with_policy(policy)).queue();

            group.bench_with_input(BenchmarkId::new(format!("sum/{policy}"), len), &len, |b, &len| {
                b.iter(|| {
                    let sum = queue
                        .command()
                        .reduce::<f64, ReduceSum<f64>, _>(0..len, |i| data[i]);
                    black_box(sum);
                });
            });

            group.bench_with_input(BenchmarkId::new(format!("max/{policy}"), len), &len, |b, &len| {
                b.iter(|| {
                    let max = queue
                        .command()
                        .set_parallel_loop_options(ParallelLoopOptions {
                            grain_size: 4096,
                            max_thread: 0,
                        })
                        .reduce::<f64, ReduceMax<f64>, _>(0..len, |i| data[i]);
                    black_box(max);
                });
            });
        }
    }

    group.finish();
}

criterion_group!(benches, bench_reduce);
criterion_main!(benches);
