//! Wait-for graph and the background deadlock detector thread.
//!
//! The graph is rebuilt from the request queues on every pass and never
//! maintained incrementally. An edge `A -> B` means A waits on a resource
//! where B holds a granted lock.

use crate::types::TransactionId;
use parking_lot::{Condvar, Mutex};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Directed wait-for graph over transactions.
///
/// Vertices and neighbours are kept ordered so cycle search is
/// deterministic: it starts from the lowest transaction ID and explores
/// neighbours in ascending order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WaitsForGraph {
    edges: BTreeMap<TransactionId, BTreeSet<TransactionId>>,
}

impl WaitsForGraph {
    /// Creates an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds the edge `from -> to`.
    pub fn add_edge(&mut self, from: TransactionId, to: TransactionId) {
        self.edges.entry(from).or_default().insert(to);
    }

    /// Removes the edge `from -> to` if present.
    pub fn remove_edge(&mut self, from: TransactionId, to: TransactionId) {
        if let Some(targets) = self.edges.get_mut(&from) {
            targets.remove(&to);
            if targets.is_empty() {
                self.edges.remove(&from);
            }
        }
    }

    /// Removes `txn` and every edge touching it.
    pub fn remove_vertex(&mut self, txn: TransactionId) {
        self.edges.remove(&txn);
        self.edges.retain(|_, targets| {
            targets.remove(&txn);
            !targets.is_empty()
        });
    }

    /// Removes every edge.
    pub fn clear(&mut self) {
        self.edges.clear();
    }

    /// Returns true if the graph has no edges.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// Returns every edge as `(from, to)`, ordered.
    #[must_use]
    pub fn edge_list(&self) -> Vec<(TransactionId, TransactionId)> {
        self.edges
            .iter()
            .flat_map(|(from, targets)| targets.iter().map(move |to| (*from, *to)))
            .collect()
    }

    /// Finds a cycle by depth-first search.
    ///
    /// Returns the vertices of the first cycle found, from the vertex the
    /// back edge points to up to the top of the recursion stack.
    #[must_use]
    pub fn find_cycle(&self) -> Option<Vec<TransactionId>> {
        let mut visited = HashSet::new();
        let mut path = Vec::new();
        let mut on_path = HashSet::new();

        for start in self.edges.keys() {
            if visited.contains(start) {
                continue;
            }
            if let Some(cycle) = self.dfs(*start, &mut visited, &mut path, &mut on_path) {
                return Some(cycle);
            }
        }
        None
    }

    fn dfs(
        &self,
        node: TransactionId,
        visited: &mut HashSet<TransactionId>,
        path: &mut Vec<TransactionId>,
        on_path: &mut HashSet<TransactionId>,
    ) -> Option<Vec<TransactionId>> {
        visited.insert(node);
        path.push(node);
        on_path.insert(node);

        if let Some(targets) = self.edges.get(&node) {
            for next in targets {
                if on_path.contains(next) {
                    let start = path.iter().position(|t| t == next)?;
                    return Some(path[start..].to_vec());
                }
                if !visited.contains(next) {
                    if let Some(cycle) = self.dfs(*next, visited, path, on_path) {
                        return Some(cycle);
                    }
                }
            }
        }

        path.pop();
        on_path.remove(&node);
        None
    }

    /// Returns the victim of the first cycle found: its youngest
    /// (highest-ID) transaction.
    #[must_use]
    pub fn has_cycle(&self) -> Option<TransactionId> {
        self.find_cycle()
            .and_then(|cycle| cycle.into_iter().max())
    }
}

/// Handle to the background detector thread.
///
/// The thread sleeps on a condition variable between passes so that
/// [`stop`](Self::stop) does not have to wait out a full interval.
#[derive(Debug)]
pub struct DeadlockDetector {
    stop: Arc<(Mutex<bool>, Condvar)>,
    thread: Option<JoinHandle<()>>,
}

impl DeadlockDetector {
    /// Spawns the detector, running `pass` every `interval` until stopped.
    pub fn spawn<F>(interval: Duration, pass: F) -> io::Result<Self>
    where
        F: Fn() + Send + 'static,
    {
        let stop = Arc::new((Mutex::new(false), Condvar::new()));
        let signal = Arc::clone(&stop);

        let thread = thread::Builder::new()
            .name("deadlock-detector".into())
            .spawn(move || {
                let (stopped, cv) = &*signal;
                loop {
                    {
                        let mut stopped = stopped.lock();
                        if !*stopped {
                            cv.wait_for(&mut stopped, interval);
                        }
                        if *stopped {
                            break;
                        }
                    }
                    pass();
                }
                tracing::debug!("deadlock detector exiting");
            })?;

        Ok(Self {
            stop,
            thread: Some(thread),
        })
    }

    /// Signals the thread to exit and joins it.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let (stopped, cv) = &*self.stop;
        *stopped.lock() = true;
        cv.notify_all();
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                tracing::error!("deadlock detector thread panicked");
            }
        }
    }
}

impl Drop for DeadlockDetector {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    fn t(id: u64) -> TransactionId {
        TransactionId::new(id)
    }

    #[test]
    fn add_and_remove_edges() {
        let mut graph = WaitsForGraph::new();
        graph.add_edge(t(1), t(2));
        graph.add_edge(t(1), t(3));
        graph.add_edge(t(1), t(2));
        assert_eq!(graph.edge_list(), vec![(t(1), t(2)), (t(1), t(3))]);

        graph.remove_edge(t(1), t(2));
        assert_eq!(graph.edge_list(), vec![(t(1), t(3))]);

        graph.remove_edge(t(1), t(3));
        assert!(graph.is_empty());
    }

    #[test]
    fn no_cycle_in_chain() {
        let mut graph = WaitsForGraph::new();
        graph.add_edge(t(1), t(2));
        graph.add_edge(t(2), t(3));
        assert!(graph.find_cycle().is_none());
        assert!(graph.has_cycle().is_none());
    }

    #[test]
    fn two_cycle_victim_is_youngest() {
        let mut graph = WaitsForGraph::new();
        graph.add_edge(t(0), t(1));
        graph.add_edge(t(1), t(0));
        assert_eq!(graph.has_cycle(), Some(t(1)));
    }

    #[test]
    fn cycle_excludes_tail_leading_into_it() {
        let mut graph = WaitsForGraph::new();
        // 9 leads into the cycle 2 -> 3 -> 4 -> 2 but is not part of it.
        graph.add_edge(t(1), t(9));
        graph.add_edge(t(9), t(2));
        graph.add_edge(t(2), t(3));
        graph.add_edge(t(3), t(4));
        graph.add_edge(t(4), t(2));

        let cycle = graph.find_cycle().unwrap();
        assert_eq!(cycle, vec![t(2), t(3), t(4)]);
        assert_eq!(graph.has_cycle(), Some(t(4)));
    }

    #[test]
    fn remove_vertex_breaks_cycle() {
        let mut graph = WaitsForGraph::new();
        graph.add_edge(t(1), t(2));
        graph.add_edge(t(2), t(1));
        graph.add_edge(t(3), t(2));

        graph.remove_vertex(t(2));
        assert!(graph.is_empty());
        assert!(graph.has_cycle().is_none());
    }

    #[test]
    fn two_disjoint_cycles() {
        let mut graph = WaitsForGraph::new();
        graph.add_edge(t(1), t(2));
        graph.add_edge(t(2), t(1));
        graph.add_edge(t(5), t(6));
        graph.add_edge(t(6), t(5));

        let first = graph.has_cycle().unwrap();
        assert_eq!(first, t(2));
        graph.remove_vertex(first);
        assert_eq!(graph.has_cycle(), Some(t(6)));
    }

    #[test]
    fn detector_runs_and_stops() {
        let passes = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&passes);
        let detector = DeadlockDetector::spawn(Duration::from_millis(1), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while passes.load(Ordering::SeqCst) < 3 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        detector.stop();

        let after_stop = passes.load(Ordering::SeqCst);
        assert!(after_stop >= 3);
        thread::sleep(Duration::from_millis(10));
        assert_eq!(passes.load(Ordering::SeqCst), after_stop);
    }

    #[test]
    fn stop_does_not_wait_for_interval() {
        let detector = DeadlockDetector::spawn(Duration::from_secs(60), || {}).unwrap();
        let start = Instant::now();
        detector.stop();
        assert!(start.elapsed() < Duration::from_secs(5));
    }
}
