use std::thread::{Builder, JoinHandle};

/// The stack size for spawned threads.
///
/// The recursive search nests extensions, internal iterative deepening
/// and verification probes on top of one another, so the default thread
/// stack is not guaranteed to fit it.
const STACK_SIZE: usize = 16 << 20;

/// Spawns a thread with a stack large enough for the search recursion.
pub fn spawn<F, T>(f: F) -> JoinHandle<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    match Builder::new().stack_size(STACK_SIZE).spawn(f) {
        Ok(handle) => handle,
        Err(e) => panic!("failed to spawn a search thread: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spawned_threads_run_and_join() {
        let handle = spawn(|| 6 * 7);
        assert_eq!(handle.join().ok(), Some(42));
    }

    #[test]
    fn spawned_threads_can_recurse_deeply() {
        fn dive(n: u32) -> u32 {
            // Large frames force real stack consumption.
            let pad = [n; 128];
            if n == 0 { pad[0] } else { dive(n - 1) + 1 }
        }

        let handle = spawn(|| dive(10_000));
        assert_eq!(handle.join().ok(), Some(10_000));
    }
}
