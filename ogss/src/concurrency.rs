//! Worker pool and semaphore used by the parallel parser and writer (§4.5,
//! §4.7).
//!
//! Grounded on `concurrent/Pool.{h,cpp}` and `concurrent/Semaphore.h`. The
//! original hand-rolls a fixed-size thread pool plus a job queue so that it
//! can run the same worker architecture across every OGSS language binding;
//! in Rust, `std::thread::scope` gives the same "workers bounded to this
//! file's lifetime" guarantee without a bespoke shutdown protocol, so the
//! pool here is a thin wrapper that just bounds concurrency and collects
//! per-job errors, and jobs are plain boxed closures rather than a `Job`
//! vtable (there is no lambda-vs-explicit-type tension in Rust).

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Condvar, Mutex};

/// A counting semaphore that can go negative, used by the writer to track
/// outstanding block-write permits (§4.7). Grounded on
/// `concurrent/Semaphore.h`.
pub struct Semaphore {
	status: Mutex<i32>,
	cv: Condvar,
}

impl Semaphore {
	pub fn new(permits: i32) -> Self {
		Self { status: Mutex::new(permits), cv: Condvar::new() }
	}

	pub fn release(&self) {
		let mut status = self.status.lock().unwrap();
		*status += 1;
		if *status > 0 {
			self.cv.notify_one();
		}
	}

	pub fn take(&self) {
		let mut status = self.status.lock().unwrap();
		while *status <= 0 {
			status = self.cv.wait(status).unwrap();
		}
		*status -= 1;
	}

	pub fn permits(&self) -> i32 {
		*self.status.lock().unwrap()
	}
}

/// Releases a permit when dropped, unless [`Self::abort`] was called.
/// Grounded on `Semaphore::ScopedPermit`.
pub struct ScopedPermit<'a> {
	target: Option<&'a Semaphore>,
}

impl<'a> ScopedPermit<'a> {
	pub fn new(target: &'a Semaphore) -> Self {
		Self { target: Some(target) }
	}

	pub fn abort(&mut self) {
		self.target = None;
	}
}

impl Drop for ScopedPermit<'_> {
	fn drop(&mut self) {
		if let Some(target) = self.target {
			target.release();
		}
	}
}

/// Bounds the parallel parser/writer to a fixed worker count and
/// accumulates per-job error messages, matching `concurrent::Pool`'s
/// "accumulate rather than propagate across threads" contract.
pub struct ErrorSink {
	messages: Mutex<Vec<String>>,
	failure_count: AtomicI32,
}

impl Default for ErrorSink {
	fn default() -> Self {
		Self::new()
	}
}

impl ErrorSink {
	pub fn new() -> Self {
		Self { messages: Mutex::new(Vec::new()), failure_count: AtomicI32::new(0) }
	}

	pub fn push(&self, message: String) {
		self.failure_count.fetch_add(1, Ordering::Relaxed);
		self.messages.lock().unwrap().push(message);
	}

	pub fn has_errors(&self) -> bool {
		self.failure_count.load(Ordering::Relaxed) > 0
	}

	/// Swaps out the accumulated errors, matching `Pool::takeErrors`.
	pub fn take(&self) -> Vec<String> {
		std::mem::take(&mut self.messages.lock().unwrap())
	}
}

/// Runs `jobs` across a worker count bounded by available parallelism,
/// inside a scope so borrowed data (the mmap, the shared type registry)
/// never needs to outlive the call. Mirrors `Pool::runAll` followed by an
/// implicit join; per-job panics are caught and folded into the returned
/// `ErrorSink` instead of unwinding the whole parse/write, matching the
/// original's "a worker never kills the process" contract.
pub fn run_all<'a, F>(jobs: Vec<F>) -> ErrorSink
where
	F: FnOnce() -> crate::error::Result<()> + Send + 'a,
{
	let sink = ErrorSink::new();
	let worker_count = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1).min(jobs.len().max(1));
	let job_queue = Mutex::new(jobs.into_iter().collect::<std::collections::VecDeque<_>>());

	std::thread::scope(|scope| {
		for _ in 0..worker_count {
			scope.spawn(|| loop {
				let job = job_queue.lock().unwrap().pop_front();
				let Some(job) = job else { break };
				let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(job));
				match outcome {
					Ok(Ok(())) => {}
					Ok(Err(e)) => sink.push(e.to_string()),
					Err(payload) => {
						let msg = payload
							.downcast_ref::<&str>()
							.map(|s| s.to_string())
							.or_else(|| payload.downcast_ref::<String>().cloned())
							.unwrap_or_else(|| "worker panicked with a non-string payload".to_string());
						sink.push(msg);
					}
				}
			});
		}
	});

	sink
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::Arc;

	#[test]
	fn semaphore_blocks_until_a_permit_is_released() {
		let sem = Arc::new(Semaphore::new(0));
		let sem2 = sem.clone();
		let handle = std::thread::spawn(move || {
			sem2.take();
		});
		std::thread::sleep(std::time::Duration::from_millis(20));
		sem.release();
		handle.join().unwrap();
	}

	#[test]
	fn scoped_permit_releases_on_drop_unless_aborted() {
		let sem = Semaphore::new(0);
		{
			let _permit = ScopedPermit::new(&sem);
		}
		assert_eq!(sem.permits(), 1);

		let sem2 = Semaphore::new(0);
		{
			let mut permit = ScopedPermit::new(&sem2);
			permit.abort();
		}
		assert_eq!(sem2.permits(), 0);
	}

	#[test]
	fn run_all_collects_errors_instead_of_propagating() {
		let jobs: Vec<Box<dyn FnOnce() -> crate::error::Result<()> + Send>> = vec![
			Box::new(|| Ok(())),
			Box::new(|| Err(crate::error::Error::Format("boom".into()))),
		];
		let sink = run_all(jobs);
		assert!(sink.has_errors());
		assert_eq!(sink.take().len(), 1);
	}
}
