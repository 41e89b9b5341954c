use clap::Parser as ClapParser;
use std::{
    process,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    thread,
    time::Instant,
};

use castcore::{
    CardMarkingBarrier, CastCacheCreateInfo, CastEngine, CastEngineCreateInfo, CastError,
    MetadataOracle, Object, ObjectRef, TypeFlags, TypeHandle, TypeRegistry,
};
use log::{debug, info, warn};
use rand::{Rng, SeedableRng, rngs::StdRng};

type Engine = CastEngine<Arc<MetadataOracle>, CardMarkingBarrier>;

#[derive(ClapParser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[arg(long, default_value_t = 4, help = "Worker threads")]
    threads: usize,

    #[arg(long, default_value_t = 200_000, help = "Operations per worker")]
    operations: usize,

    #[arg(long, default_value_t = 96, help = "Classes in the generated hierarchy")]
    classes: usize,

    #[arg(long, default_value_t = 24, help = "Interfaces in the generated hierarchy")]
    interfaces: usize,

    #[arg(long, default_value_t = 0x5eed, help = "Seed for hierarchy and workload")]
    seed: u64,

    /// Start small so the run exercises growth under contention
    #[arg(long, default_value_t = 8, help = "Initial cache buckets")]
    initial_buckets: usize,

    #[arg(long, default_value_t = 4, help = "Cache slots per bucket")]
    slots_per_bucket: usize,
}

struct Universe {
    registry: TypeRegistry,
    /// types that have instances
    concrete: Vec<TypeHandle>,
    /// everything a cast may target
    targets: Vec<TypeHandle>,
}

fn build_universe(cli: &Cli, oracle: &MetadataOracle, rng: &mut StdRng) -> Universe {
    let registry = TypeRegistry::new();
    let mut interfaces: Vec<TypeHandle> = Vec::with_capacity(cli.interfaces);
    let mut variants: Vec<TypeHandle> = Vec::new();

    for i in 0..cli.interfaces {
        let mut builder = registry.interface(&format!("I{i}"));
        if !interfaces.is_empty() && rng.random_bool(0.3) {
            builder = builder.implements(&[interfaces[rng.random_range(0..interfaces.len())]]);
        }
        if rng.random_bool(0.25) {
            builder = builder.flags(TypeFlags::VARIANT);
        }
        if rng.random_bool(0.05) {
            builder = builder.flags(TypeFlags::TYPE_EQUIVALENCE);
        }
        let iface = builder.build();
        if iface.has_flags(TypeFlags::VARIANT) {
            variants.push(iface);
        }
        interfaces.push(iface);
    }

    // variance between instantiations is only known to the oracle
    for &from in &variants {
        for &to in &variants {
            if from != to && rng.random_bool(0.2) {
                oracle.allow(from, to);
            }
        }
    }

    let mut classes: Vec<TypeHandle> = Vec::with_capacity(cli.classes);
    for i in 0..cli.classes {
        let mut builder = registry.class(&format!("C{i}"));
        if !classes.is_empty() && rng.random_bool(0.8) {
            builder = builder.parent(classes[rng.random_range(0..classes.len())]);
        }
        for _ in 0..rng.random_range(0..3usize) {
            if interfaces.is_empty() {
                break;
            }
            builder = builder.implements(&[interfaces[rng.random_range(0..interfaces.len())]]);
        }
        if rng.random_bool(0.02) {
            builder = builder.flags(TypeFlags::PROVISIONAL);
        }
        classes.push(builder.build());
    }

    let arrays: Vec<TypeHandle> = classes
        .iter()
        .step_by(4)
        .map(|&element| registry.array_of(element))
        .collect();

    let mut concrete = classes.clone();
    concrete.extend_from_slice(&arrays);

    let mut targets = vec![registry.object(), registry.array_base()];
    targets.extend_from_slice(&classes);
    targets.extend_from_slice(&interfaces);
    targets.extend_from_slice(&arrays);
    targets.push(registry.generic_parameter("T").build());
    targets.push(registry.array_of(registry.object()));

    debug!(
        "universe: {} classes, {} interfaces ({} variant), {} array types",
        classes.len(),
        interfaces.len(),
        variants.len(),
        arrays.len()
    );

    Universe {
        registry,
        concrete,
        targets,
    }
}

#[derive(Default)]
struct Counters {
    operations: AtomicUsize,
    mismatches: AtomicUsize,
}

fn report_mismatch(counters: &Counters, what: &str, source: TypeHandle, target: TypeHandle) {
    counters.mismatches.fetch_add(1, Ordering::Relaxed);
    warn!("{what} disagrees with the oracle for {source} -> {target}");
}

fn run_worker(
    engine: &Engine,
    oracle: &MetadataOracle,
    universe: &Universe,
    counters: &Counters,
    seed: u64,
    operations: usize,
) {
    let mut rng = StdRng::seed_from_u64(seed);
    let pick = |rng: &mut StdRng, types: &[TypeHandle]| types[rng.random_range(0..types.len())];

    // each worker stores into arrays of its own
    let mut arrays: Vec<ObjectRef> = Vec::new();
    for _ in 0..8 {
        let element = pick(&mut rng, &universe.concrete);
        if let Some(array) = Object::new_array(universe.registry.array_of(element), 4) {
            arrays.push(array);
        }
    }

    for _ in 0..operations {
        let source = pick(&mut rng, &universe.concrete);
        let value = Object::new(source);

        match rng.random_range(0..3u8) {
            0 => {
                let target = pick(&mut rng, &universe.targets);
                let expected = oracle.is_assignable(source, target);
                if engine.is_instance_of(Some(&value), target).is_some() != expected {
                    report_mismatch(counters, "is_instance_of", source, target);
                }
            }
            1 => {
                let target = pick(&mut rng, &universe.targets);
                let expected = oracle.is_assignable(source, target);
                match engine.cast(Some(&value), target) {
                    Ok(Some(_)) if expected => {}
                    Err(CastError::CastIllegal { .. }) if !expected => {}
                    _ => report_mismatch(counters, "cast", source, target),
                }
            }
            _ => {
                let array = &arrays[rng.random_range(0..arrays.len())];
                let index = rng.random_range(0..array.len() + 1);
                let element = array.type_handle().element().unwrap_or(source);
                let result = engine.store_element(Some(array), index, Some(value));
                let ok = match result {
                    Err(CastError::OutOfBounds { .. }) => index >= array.len(),
                    Ok(()) => index < array.len() && oracle.is_assignable(source, element),
                    Err(CastError::TypeMismatch { .. }) => {
                        index < array.len() && !oracle.is_assignable(source, element)
                    }
                    Err(_) => false,
                };
                if !ok {
                    report_mismatch(counters, "store_element", source, element);
                }
            }
        }
        counters.operations.fetch_add(1, Ordering::Relaxed);
    }
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    if cli.threads == 0 || cli.operations == 0 {
        eprintln!("Nothing to do: --threads and --operations must be positive");
        process::exit(2);
    }

    let oracle = Arc::new(MetadataOracle::new());
    let mut rng = StdRng::seed_from_u64(cli.seed);
    let universe = build_universe(&cli, &oracle, &mut rng);

    let engine: Engine = CastEngine::new(
        universe.registry.object(),
        CastEngineCreateInfo {
            cache: CastCacheCreateInfo {
                initial_buckets: Some(cli.initial_buckets),
                slots_per_bucket: Some(cli.slots_per_bucket),
                ..Default::default()
            },
        },
        Arc::clone(&oracle),
        CardMarkingBarrier::default(),
    );

    info!(
        "running {} workers x {} operations, seed {:#x}",
        cli.threads, cli.operations, cli.seed
    );

    let counters = Counters::default();
    let operations = cli.operations;
    let started = Instant::now();
    thread::scope(|scope| {
        for worker in 0..cli.threads {
            let (engine, oracle, universe, counters) = (&engine, &*oracle, &universe, &counters);
            let seed = cli.seed.wrapping_add(worker as u64 + 1);
            scope.spawn(move || run_worker(engine, oracle, universe, counters, seed, operations));
        }
    });
    let elapsed = started.elapsed();

    let stats = engine.cache().stats();
    let completed = counters.operations.load(Ordering::Relaxed);
    let mismatches = counters.mismatches.load(Ordering::Relaxed);
    println!("operations:      {completed} in {elapsed:?}");
    println!("oracle calls:    {}", oracle.calls());
    println!(
        "cache:           {} buckets x {} slots, {} occupied, {} growths, version {}",
        stats.buckets, stats.slots_per_bucket, stats.occupied, stats.growths, stats.version
    );
    println!(
        "barrier:         {} stores, {} dirty cards",
        engine.barrier().stores(),
        engine.barrier().take_dirty().len()
    );
    println!("mismatches:      {mismatches}");

    if mismatches > 0 {
        process::exit(1);
    }
}
