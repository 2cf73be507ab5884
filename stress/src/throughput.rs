use num_format::{Locale, ToFormattedString};
use std::env;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const SLIDING_WINDOW_SIZE: u64 = 2; // In seconds
const BATCH_SIZE: u64 = 1000;

static STOP: AtomicBool = AtomicBool::new(false);

#[repr(C)]
#[derive(Default)]
struct WorkerStats {
    count: AtomicU64,
    /// We use a padding for the struct to allow each thread to have exclusive access to each WorkerStat
    /// Otherwise, there would be some cpu contention with threads needing to take ownership of the cache lines
    #[allow(dead_code)]
    padding: [u64; 15],
}

/// Number of producer threads: the first command line argument, or the
/// number of physical cores.
fn producer_threads() -> usize {
    let available = num_cpus::get();
    match env::args().nth(1).map(|arg| arg.parse::<usize>()) {
        Some(Ok(n)) if n > available => {
            println!(
                "Specified {} threads which is larger than the number of logical cores ({})!",
                n, available
            );
            n
        }
        Some(Ok(n)) if n > 0 => n,
        Some(_) => {
            eprintln!("Invalid thread count, expected a positive integer");
            std::process::exit(1);
        }
        None => num_cpus::get_physical(),
    }
}

/// Runs `func` in a tight loop on every producer thread and prints the
/// aggregate throughput until Ctrl-C is pressed. `report` is called after
/// each window with a one-line status of the system under test.
pub fn test_throughput<F, S>(func: F, report: S)
where
    F: Fn() + Sync + Send + 'static,
    S: Fn() -> String + Send + Sync + 'static,
{
    ctrlc::set_handler(move || {
        STOP.store(true, Ordering::SeqCst);
    })
    .expect("Error setting Ctrl-C handler");

    let num_threads = producer_threads();
    println!("Number of threads: {}\n", num_threads);
    let func_arc = Arc::new(func);
    let worker_stats: Arc<Vec<WorkerStats>> =
        Arc::new((0..num_threads).map(|_| WorkerStats::default()).collect());

    let mut handles = Vec::with_capacity(num_threads + 1);
    let monitor_stats = Arc::clone(&worker_stats);
    handles.push(thread::spawn(move || {
        let mut last_collect_time = Instant::now();
        let mut total_count_old: u64 = 0;

        loop {
            let current_time = Instant::now();
            let elapsed = current_time.duration_since(last_collect_time).as_secs();
            if elapsed >= SLIDING_WINDOW_SIZE {
                let total_count_u64: u64 = monitor_stats
                    .iter()
                    .map(|worker_stat| worker_stat.count.load(Ordering::Relaxed))
                    .sum();
                last_collect_time = Instant::now();
                let current_count = total_count_u64 - total_count_old;
                total_count_old = total_count_u64;
                let throughput = current_count / elapsed;
                println!(
                    "Throughput: {} iterations/sec | {}",
                    throughput.to_formatted_string(&Locale::en),
                    report()
                );
            }

            if STOP.load(Ordering::SeqCst) {
                break;
            }

            thread::sleep(Duration::from_millis(5000));
        }
    }));

    for thread_index in 0..num_threads {
        let worker_stats = Arc::clone(&worker_stats);
        let func_arc_clone = Arc::clone(&func_arc);
        handles.push(thread::spawn(move || loop {
            for _ in 0..BATCH_SIZE {
                func_arc_clone();
            }
            worker_stats[thread_index]
                .count
                .fetch_add(BATCH_SIZE, Ordering::Relaxed);
            if STOP.load(Ordering::SeqCst) {
                break;
            }
        }));
    }

    for handle in handles {
        handle.join().unwrap();
    }
}
