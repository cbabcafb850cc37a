use botcalc_core::{Bot, BotUpdate, PrecalculationManager};
use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

const SIZES: [usize; 3] = [100, 1_000, 5_000];

/// `n` bots in a chain of tag reads, plus one aggregate over all of them.
fn chain(n: usize) -> Vec<Bot> {
    let mut bots = Vec::with_capacity(n + 1);
    bots.push(Bot::new("b0").with_tag("v", 1).with_tag("group", "g"));
    for idx in 1..n {
        bots.push(
            Bot::new(format!("b{idx}"))
                .with_tag("v", format!("=getTag('b{}', '#v') + 1", idx - 1))
                .with_tag("group", if idx % 2 == 0 { "g" } else { "h" }),
        );
    }
    bots.push(Bot::new("total").with_tag("count", "=getBots('#group', 'g').length"));
    bots
}

fn bench_initial_add(c: &mut Criterion) {
    let mut group = c.benchmark_group("recalc.add");
    for n in SIZES {
        group.throughput(Throughput::Elements(n as u64));
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, &n| {
            b.iter(|| {
                let mut manager = PrecalculationManager::default();
                let update = manager.bots_added(chain(n)).expect("add");
                black_box(update.added_bots.len())
            });
        });
    }
    group.finish();
}

fn bench_leaf_update(c: &mut Criterion) {
    let mut group = c.benchmark_group("recalc.update_leaf");
    for n in SIZES {
        let mut manager = PrecalculationManager::default();
        manager.bots_added(chain(n)).expect("add");
        let leaf = format!("b{}", n - 1);
        let mut flip = false;
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, _| {
            b.iter(|| {
                flip = !flip;
                let group = if flip { "h" } else { "g" };
                let bot = Bot::new(leaf.as_str()).with_tag("group", group);
                let update = manager
                    .bots_updated(vec![BotUpdate::new(bot, ["group"])])
                    .expect("update");
                black_box(update.updated_bots.len())
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_initial_add, bench_leaf_update);
criterion_main!(benches);
