use crossbeam_channel::unbounded;
use scoped_threadpool::Pool;

pub type Job<'a> = Box<dyn FnOnce() + Send + 'a>;

/// Runs a FIFO list of jobs on at most `ncores` worker threads.
///
/// Workers pull from a shared queue until it drains; every job runs to
/// completion and all workers are joined before returning, so jobs may
/// borrow from the caller's scope. Jobs communicate only through their own
/// captured outputs.
pub fn run_jobs(ncores: usize, jobs: Vec<Job<'_>>) {
    if jobs.is_empty() {
        return;
    }
    let workers = ncores.max(1).min(jobs.len());
    let (sender, receiver) = unbounded();
    for job in jobs {
        sender.send(job).expect("failed to queue job");
    }
    drop(sender);

    let mut pool = Pool::new(workers as u32);
    pool.scoped(|scope| {
        for _ in 0..workers {
            let receiver = receiver.clone();
            scope.execute(move || {
                while let Ok(job) = receiver.recv() {
                    job();
                }
            });
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_all_jobs_run() {
        let counter = AtomicUsize::new(0);
        let jobs: Vec<Job> = (0..100)
            .map(|_| {
                Box::new(|| {
                    counter.fetch_add(1, Ordering::Relaxed);
                }) as Job
            })
            .collect();
        run_jobs(4, jobs);
        assert_eq!(counter.load(Ordering::Relaxed), 100);
    }

    #[test]
    fn test_disjoint_outputs() {
        let mut outputs = vec![0usize; 16];
        let jobs: Vec<Job> = outputs
            .iter_mut()
            .enumerate()
            .map(|(i, out)| {
                Box::new(move || {
                    *out = i * i;
                }) as Job
            })
            .collect();
        run_jobs(3, jobs);
        for (i, v) in outputs.iter().enumerate() {
            assert_eq!(*v, i * i);
        }
    }
}
