use std::sync::Arc;
use std::time::{Duration, Instant};

use ulid::Ulid;

use rostra::clock::ManualClock;
use rostra::directory::InMemoryDirectory;
use rostra::engine::{Engine, EngineSettings};
use rostra::model::*;

const HOUR: i64 = HOUR_MS;
/// Clock start for every phase; activities are scheduled days after it.
const NOW: i64 = 3000 * DAY_MS;

struct Bench {
    engine: Arc<Engine>,
    clock: Arc<ManualClock>,
    dir: Arc<InMemoryDirectory>,
}

fn open(name: &str) -> Bench {
    let dir_path = std::env::temp_dir().join(format!("rostra_bench_{}", Ulid::new()));
    std::fs::create_dir_all(&dir_path).expect("create bench dir");
    let clock = Arc::new(ManualClock::new(NOW));
    let dir = Arc::new(InMemoryDirectory::new());
    let engine = Engine::new(
        dir_path.join(format!("{name}.wal")),
        EngineSettings::default(),
        clock.clone(),
        dir.clone(),
    )
    .expect("open engine");
    Bench {
        engine: Arc::new(engine),
        clock,
        dir,
    }
}

fn draft(start: i64, end: i64) -> ActivityDraft {
    ActivityDraft {
        title: "Bench".into(),
        description: "Load generator".into(),
        location: "Nowhere".into(),
        is_on_site: false,
        start_at: start,
        end_at: end,
    }
}

fn shift(activity_id: Ulid, user_id: Ulid, start: i64) -> ShiftDraft {
    ShiftDraft {
        activity_id,
        user_id,
        start_shift: start,
        end_shift: start + HOUR,
        activity_role: "Helper".into(),
    }
}

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
    latencies.sort();
    let total: Duration = latencies.iter().sum();
    let avg = total / latencies.len() as u32;
    println!("  {label}:");
    println!(
        "    n={}, avg={:.2}ms, p50={:.2}ms, p95={:.2}ms, p99={:.2}ms, max={:.2}ms",
        latencies.len(),
        avg.as_secs_f64() * 1000.0,
        percentile(latencies, 50.0).as_secs_f64() * 1000.0,
        percentile(latencies, 95.0).as_secs_f64() * 1000.0,
        percentile(latencies, 99.0).as_secs_f64() * 1000.0,
        latencies.last().unwrap().as_secs_f64() * 1000.0,
    );
}

async fn phase1_sequential() {
    let b = open("phase1");
    let org = b.dir.add_member("org");
    let vol = b.dir.add_member("vol");
    let start = NOW + 2 * DAY_MS;
    let n = 2000;
    let activity = b
        .engine
        .create_activity(draft(start, start + n as i64 * HOUR), &org)
        .await
        .unwrap();

    let mut latencies = Vec::with_capacity(n);
    let t0 = Instant::now();
    for i in 0..n {
        let s = start + i as i64 * HOUR;
        let t = Instant::now();
        b.engine
            .create_shift(shift(activity.id, vol.id, s), &vol)
            .await
            .unwrap();
        latencies.push(t.elapsed());
    }

    let elapsed = t0.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} shifts in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("write latency", &mut latencies);
}

async fn phase2_concurrent() {
    let b = open("phase2");
    let n_tasks = 10;
    let n_per_task = 200;
    let start = NOW + 2 * DAY_MS;

    let mut activities = Vec::new();
    for i in 0..n_tasks {
        let org = b.dir.add_member(&format!("org{i}"));
        let a = b
            .engine
            .create_activity(draft(start, start + n_per_task as i64 * HOUR), &org)
            .await
            .unwrap();
        activities.push(a.id);
    }

    let t0 = Instant::now();
    let mut handles = Vec::new();
    for (i, activity_id) in activities.into_iter().enumerate() {
        let engine = b.engine.clone();
        let vol = b.dir.add_member(&format!("vol{i}"));
        handles.push(tokio::spawn(async move {
            for j in 0..n_per_task {
                let s = start + j as i64 * HOUR;
                engine.create_shift(shift(activity_id, vol.id, s), &vol).await.unwrap();
            }
        }));
    }
    for h in handles {
        h.await.unwrap();
    }

    let elapsed = t0.elapsed();
    let total = n_tasks * n_per_task;
    let ops = total as f64 / elapsed.as_secs_f64();
    println!(
        "  {n_tasks} tasks x {n_per_task} shifts = {total} total in {:.2}s = {ops:.0} ops/sec",
        elapsed.as_secs_f64()
    );
}

async fn phase3_read_under_load() {
    let b = open("phase3");
    let start = NOW + 2 * DAY_MS;
    let org = b.dir.add_member("org");
    let reader = b.dir.add_member("reader");
    let a = b
        .engine
        .create_activity(draft(start, start + 500 * HOUR), &org)
        .await
        .unwrap();
    for i in 0..200 {
        b.engine
            .create_shift(shift(a.id, reader.id, start + i * HOUR), &reader)
            .await
            .unwrap();
    }

    let stop = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let mut writer_handles = Vec::new();
    for w in 0..5 {
        let engine = b.engine.clone();
        let stop = stop.clone();
        let worg = b.dir.add_member(&format!("worg{w}"));
        let wvol = b.dir.add_member(&format!("wvol{w}"));
        writer_handles.push(tokio::spawn(async move {
            let wstart = start + (w as i64 + 1) * 1000 * HOUR;
            let wa = engine
                .create_activity(draft(wstart, wstart + 100_000 * HOUR), &worg)
                .await
                .unwrap();
            let mut i = 0i64;
            while !stop.load(std::sync::atomic::Ordering::Relaxed) && i < 100_000 {
                let _ = engine.create_shift(shift(wa.id, wvol.id, wstart + i * HOUR), &wvol).await;
                i += 1;
            }
        }));
    }

    let n_readers = 10;
    let reads_per_reader = 500;
    let mut reader_handles = Vec::new();
    for _ in 0..n_readers {
        let engine = b.engine.clone();
        let reader_id = reader.id;
        reader_handles.push(tokio::spawn(async move {
            let mut latencies = Vec::with_capacity(reads_per_reader);
            for page in 0..reads_per_reader {
                let t = Instant::now();
                let _ = engine.my_pending_shifts(reader_id, (page % 8) as u32).await;
                latencies.push(t.elapsed());
            }
            latencies
        }));
    }

    let mut all_latencies = Vec::new();
    for h in reader_handles {
        all_latencies.extend(h.await.unwrap());
    }
    stop.store(true, std::sync::atomic::Ordering::Relaxed);
    for h in writer_handles {
        let _ = h.await;
    }

    print_latency("my_pending_shifts", &mut all_latencies);
}

async fn phase4_finalizer() {
    let b = open("phase4");
    let n_activities = 1000;
    let per_activity = 10;
    let start = NOW + 2 * DAY_MS;

    for i in 0..n_activities {
        let org = b.dir.add_member(&format!("org{i}"));
        let a = b
            .engine
            .create_activity(draft(start, start + 4 * HOUR), &org)
            .await
            .unwrap();
        for j in 0..per_activity {
            let p = b.dir.add_member(&format!("p{i}_{j}"));
            let enrolled = b.engine.enroll(a.id, &p).await.unwrap();
            if j % 2 == 0 {
                b.engine.begin(enrolled.id, &p).await.unwrap();
            }
        }
    }

    b.clock.set(start + 5 * HOUR);
    let t0 = Instant::now();
    let report = b.engine.finalize_overdue(b.engine.now()).await;
    println!(
        "  finalized {} activities ({} completed, {} cancelled) in {:.2}ms",
        report.activities_finalized,
        report.completed,
        report.cancelled,
        t0.elapsed().as_secs_f64() * 1000.0
    );

    let t0 = Instant::now();
    let again = b.engine.finalize_overdue(b.engine.now()).await;
    println!(
        "  idle rerun touched {} activities in {:.2}ms",
        again.activities_finalized,
        t0.elapsed().as_secs_f64() * 1000.0
    );
}

#[tokio::main]
async fn main() {
    println!("=== rostra stress benchmark ===\n");

    println!("[phase 1] sequential shift throughput");
    phase1_sequential().await;

    println!("\n[phase 2] concurrent shift throughput");
    phase2_concurrent().await;

    println!("\n[phase 3] read latency under write load");
    phase3_read_under_load().await;

    println!("\n[phase 4] finalizer sweep");
    phase4_finalizer().await;

    println!("\n=== done ===");
}
