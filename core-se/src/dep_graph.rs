//! The static-stream dependency graph (spec.md §4.2, §9 "Cyclic stream
//! dependency graphs"). Streams are stored in a flat table; edges are
//! `StaticStreamId` integers, never owning pointers. Cycles are rejected
//! at registration by DFS over base edges.

use std::collections::{HashMap, HashSet};
use stream_engine_error::{Error, InternalErrorKind};
use stream_engine_types::{StaticStream, StaticStreamId};

pub struct StreamTable {
    streams: HashMap<StaticStreamId, StaticStream>,
}

impl StreamTable {
    pub fn new() -> Self {
        Self { streams: HashMap::new() }
    }

    /// Registers a static stream. Rejects the registration (without
    /// mutating the table) if adding it would close a cycle in the base
    /// dependency graph (spec.md §4.3 "Cycle in the step-graph -> fatal
    /// at initialization").
    pub fn register(&mut self, stream: StaticStream) -> Result<(), Error> {
        let id = stream.id;
        self.streams.insert(id, stream);
        if self.has_cycle_from(id) {
            self.streams.remove(&id);
            return Err(Error::config(InternalErrorKind::CyclicDependency));
        }
        Ok(())
    }

    pub fn get(&self, id: StaticStreamId) -> Option<&StaticStream> {
        self.streams.get(&id)
    }

    fn has_cycle_from(&self, start: StaticStreamId) -> bool {
        let mut visiting = HashSet::new();
        let mut visited = HashSet::new();
        self.dfs(start, &mut visiting, &mut visited)
    }

    fn dfs(&self, id: StaticStreamId, visiting: &mut HashSet<StaticStreamId>, visited: &mut HashSet<StaticStreamId>) -> bool {
        if visited.contains(&id) {
            return false;
        }
        if !visiting.insert(id) {
            return true; // back-edge: cycle
        }
        if let Some(stream) = self.streams.get(&id) {
            for &base in &stream.base_streams {
                if self.dfs(base, visiting, visited) {
                    return true;
                }
            }
        }
        visiting.remove(&id);
        visited.insert(id);
        false
    }

    /// `getStepStreamList(root)`: every stream whose `step_root == root`,
    /// in topological order over `base_streams` (bases before dependents).
    pub fn step_stream_list(&self, root: StaticStreamId) -> Vec<StaticStreamId> {
        let dependents: Vec<StaticStreamId> = self
            .streams
            .values()
            .filter(|s| s.step_root == root)
            .map(|s| s.id)
            .collect();
        let dependent_set: HashSet<StaticStreamId> = dependents.iter().copied().collect();

        let mut order = Vec::with_capacity(dependents.len());
        let mut done = HashSet::new();
        fn visit(
            id: StaticStreamId,
            table: &StreamTable,
            dependent_set: &HashSet<StaticStreamId>,
            done: &mut HashSet<StaticStreamId>,
            order: &mut Vec<StaticStreamId>,
        ) {
            if done.contains(&id) {
                return;
            }
            done.insert(id);
            if let Some(stream) = table.streams.get(&id) {
                for &base in &stream.base_streams {
                    if dependent_set.contains(&base) {
                        visit(base, table, dependent_set, done, order);
                    }
                }
            }
            order.push(id);
        }
        for id in dependents {
            visit(id, self, &dependent_set, &mut done, &mut order);
        }
        order
    }
}

impl Default for StreamTable {
    fn default() -> Self {
        Self::new()
    }
}
