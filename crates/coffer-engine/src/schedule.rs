//! The write schedule: a live dependency DAG of pending operations.
//!
//! Operations destined for the same shard are batched into groups, each
//! executed as a single read-modify-write round trip. The schedule keeps,
//! per shard, an ordered list of groups (the commit order for that shard)
//! and, per group, its direct parents plus transitive ancestor and
//! descendant closures, so placement decisions are O(set lookup) rather
//! than graph walks.
//!
//! Placement balances two goals: batch as many operations as possible into
//! one group, but do not let a chain of cross-shard dependencies pile
//! unrelated work behind one deep group. The `depth_limit` tunable bounds
//! the depth gap the scheduler will accept before opening a fresh group.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::fmt;

use coffer_types::ShardId;
use tracing::{debug, trace};

/// Default bound on the depth gap accepted when joining an existing group.
pub const DEPTH_LIMIT: usize = 2;

/// Identifier of a pending operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OpId(u64);

impl fmt::Display for OpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "w{}", self.0)
    }
}

/// Identifier of a group of operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GroupId(u64);

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "G{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GroupState {
    Available,
    Started,
}

struct Op<T> {
    shard: ShardId,
    deps: Vec<OpId>,
    group: GroupId,
    // Taken when the group starts; pending operations always hold a value.
    value: Option<T>,
}

struct Group {
    shard: ShardId,
    state: GroupState,
    ops: Vec<OpId>,
    parents: BTreeSet<GroupId>,
    ancestors: BTreeSet<GroupId>,
    descendants: BTreeSet<GroupId>,
    depth: usize,
}

/// The schedule of pending operations, generic over the per-operation
/// payload carried from submission to execution.
pub struct Schedule<T> {
    ops: HashMap<OpId, Op<T>>,
    groups: HashMap<GroupId, Group>,
    shards: BTreeMap<ShardId, Vec<GroupId>>,
    depth_limit: usize,
    next_op: u64,
    next_group: u64,
}

impl<T> Default for Schedule<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Schedule<T> {
    pub fn new() -> Self {
        Self {
            ops: HashMap::new(),
            groups: HashMap::new(),
            shards: BTreeMap::new(),
            depth_limit: DEPTH_LIMIT,
            next_op: 0,
            next_group: 0,
        }
    }

    /// Override the depth gap bound.
    pub fn with_depth_limit(mut self, depth_limit: usize) -> Self {
        self.depth_limit = depth_limit;
        self
    }

    /// Add an operation for a shard, depending on earlier operations.
    ///
    /// Dependencies on operations that have already completed are treated
    /// as satisfied.
    pub fn add(&mut self, shard: &ShardId, deps: &[OpId], value: T) -> OpId {
        let id = OpId(self.next_op);
        self.next_op += 1;

        self.insert_op(id, shard, deps, value);
        id
    }

    /// Shards that currently have pending groups.
    pub fn shards(&self) -> Vec<ShardId> {
        self.shards.keys().cloned().collect()
    }

    /// The next group that can run: the head of some shard's list, not yet
    /// started, with no pending ancestors. A shard whose head group is
    /// mid-flight is not offered again until that group resolves.
    pub fn next_ready(&self) -> Option<GroupId> {
        for list in self.shards.values() {
            let gid = match list.first() {
                Some(gid) => gid,
                None => continue,
            };
            let group = &self.groups[gid];
            if group.state == GroupState::Available && group.ancestors.is_empty() {
                return Some(*gid);
            }
        }
        None
    }

    /// Mark a group as started and take its operation payloads, in
    /// insertion order.
    ///
    /// Panics if the group does not exist, was already started, or still
    /// has pending ancestors; these are caller bugs, not runtime errors.
    pub fn start(&mut self, gid: GroupId) -> (ShardId, Vec<T>) {
        let group = self
            .groups
            .get_mut(&gid)
            .unwrap_or_else(|| panic!("starting unknown group {gid}"));
        if group.state != GroupState::Available {
            panic!("group {gid} was already started");
        }
        if !group.ancestors.is_empty() {
            panic!("group {gid} has pending ancestors");
        }

        group.state = GroupState::Started;
        let shard = group.shard.clone();
        let op_ids = group.ops.clone();

        let values = op_ids
            .iter()
            .map(|id| {
                self.ops
                    .get_mut(id)
                    .expect("group member exists")
                    .value
                    .take()
                    .expect("pending operation holds a value")
            })
            .collect();

        debug!(group = %gid, %shard, ops = op_ids.len(), "started group");
        (shard, values)
    }

    /// Remove a completed group, releasing its descendants.
    ///
    /// Panics if the group was not started.
    pub fn complete(&mut self, gid: GroupId) {
        let group = self
            .groups
            .get(&gid)
            .unwrap_or_else(|| panic!("completing unknown group {gid}"));
        if group.state != GroupState::Started {
            panic!("completing group {gid} that was not started");
        }

        let group = self.groups.remove(&gid).expect("group exists");
        for op_id in &group.ops {
            self.ops.remove(op_id);
        }

        for id in &group.descendants {
            let descendant = self.groups.get_mut(id).expect("descendant exists");
            descendant.parents.remove(&gid);
            descendant.ancestors.remove(&gid);
        }
        for id in &group.ancestors {
            self.groups
                .get_mut(id)
                .expect("ancestor exists")
                .descendants
                .remove(&gid);
        }
        self.recompute_depths(&group.descendants);

        if let Some(list) = self.shards.get_mut(&group.shard) {
            list.retain(|id| *id != gid);
            if list.is_empty() {
                self.shards.remove(&group.shard);
            }
        }

        debug!(group = %gid, shard = %group.shard, "completed group");
    }

    /// Remove a failed group, cancelling every operation that transitively
    /// depends on its members, and rebuild the schedule from the survivors.
    ///
    /// Groups already mid-flight on other shards are preserved untouched.
    /// Returns the payloads of the cancelled downstream operations so the
    /// caller can report the cancellation. Panics if the group was not
    /// started.
    pub fn fail(&mut self, gid: GroupId) -> Vec<T> {
        let group = self
            .groups
            .get(&gid)
            .unwrap_or_else(|| panic!("failing unknown group {gid}"));
        if group.state != GroupState::Started {
            panic!("failing group {gid} that was not started");
        }

        let members: BTreeSet<OpId> = group.ops.iter().copied().collect();

        // Transitive closure of operations depending on the failed members.
        let mut cancelled = members.clone();
        loop {
            let next: Vec<OpId> = self
                .ops
                .iter()
                .filter(|(id, op)| {
                    !cancelled.contains(id) && op.deps.iter().any(|d| cancelled.contains(d))
                })
                .map(|(id, _)| *id)
                .collect();
            if next.is_empty() {
                break;
            }
            cancelled.extend(next);
        }

        let mut old_ops = std::mem::take(&mut self.ops);
        let old_groups = std::mem::take(&mut self.groups);
        self.shards.clear();

        // Keep other in-flight groups exactly as they are: their operations
        // are already executing and cannot move. Their members have no
        // pending ancestors, so none of them can be in the cancelled set.
        for (id, mut group) in old_groups {
            if id == gid || group.state != GroupState::Started {
                continue;
            }
            group.parents.clear();
            group.ancestors.clear();
            group.descendants.clear();
            group.depth = 0;

            for op_id in &group.ops {
                if let Some(op) = old_ops.remove(op_id) {
                    self.ops.insert(*op_id, op);
                }
            }
            self.shards.insert(group.shard.clone(), vec![id]);
            self.groups.insert(id, group);
        }

        // Replay the survivors in creation order so dependencies are always
        // placed before their dependents.
        let mut survivors: Vec<(OpId, Op<T>)> = old_ops.into_iter().collect();
        survivors.sort_by_key(|(id, _)| *id);

        let mut downstream = Vec::new();
        for (id, op) in survivors {
            if cancelled.contains(&id) {
                if !members.contains(&id) {
                    if let Some(value) = op.value {
                        downstream.push(value);
                    }
                }
                continue;
            }

            let Op {
                shard, deps, value, ..
            } = op;
            let value = value.expect("pending operation holds a value");
            self.insert_op(id, &shard, &deps, value);
        }

        debug!(
            group = %gid,
            cancelled = cancelled.len(),
            "failed group, schedule rebalanced"
        );
        downstream
    }

    fn insert_op(&mut self, id: OpId, shard: &ShardId, deps: &[OpId], value: T) {
        // Dependencies on completed operations are already satisfied.
        let deps: Vec<OpId> = deps
            .iter()
            .copied()
            .filter(|d| self.ops.contains_key(d))
            .collect();
        let dep_groups: BTreeSet<GroupId> = deps.iter().map(|d| self.ops[d].group).collect();

        // An operation's required depth comes from dependencies on other
        // shards only; a same-shard dependency can share its group.
        let required = dep_groups
            .iter()
            .map(|gid| &self.groups[gid])
            .filter(|g| g.shard != *shard)
            .map(|g| g.depth + 1)
            .max()
            .unwrap_or(0);

        let list: Vec<GroupId> = self.shards.get(shard).cloned().unwrap_or_default();

        // Lower bound: the earliest index the operation may occupy. An
        // "exact" bound means the group at that index holds a direct
        // dependency and may be shared, but nothing may be inserted before
        // it; otherwise the bound is strictly past the blocking group.
        let mut start = 0usize;
        let mut exact = false;
        for (i, gid) in list.iter().enumerate() {
            let group = &self.groups[gid];
            if group.state != GroupState::Available {
                bump(&mut start, &mut exact, i + 1, false);
                continue;
            }
            // A group can hold a direct dependency and also be an ancestor
            // of another dependency's group; the ancestor relation forces
            // the stronger, strictly-past bound.
            if dep_groups.contains(gid) {
                bump(&mut start, &mut exact, i, true);
            }
            if dep_groups
                .iter()
                .any(|d| self.groups[d].ancestors.contains(gid))
            {
                bump(&mut start, &mut exact, i + 1, false);
            }
        }

        // Walk forward to the group whose depth is closest to the required
        // depth, preferring the later group on a tie.
        let mut idx = start;
        while idx + 1 < list.len() {
            let cur = self.groups[&list[idx]].depth.abs_diff(required);
            let nxt = self.groups[&list[idx + 1]].depth.abs_diff(required);
            if nxt <= cur {
                idx += 1;
            } else {
                break;
            }
        }

        let gid = if idx >= list.len() {
            self.create_group(shard, list.len())
        } else {
            let candidate = &self.groups[&list[idx]];
            let can_precede = idx > start || !exact;

            if can_precede && candidate.depth >= required + self.depth_limit {
                // The candidate sits much deeper than this operation needs;
                // a fresh group in front of it can run without waiting.
                self.create_group(shard, idx)
            } else if required >= candidate.depth + self.depth_limit + 2 {
                self.create_group(shard, idx + 1)
            } else {
                list[idx]
            }
        };

        self.ops.insert(
            id,
            Op {
                shard: shard.clone(),
                deps,
                group: gid,
                value: Some(value),
            },
        );
        let group = self.groups.get_mut(&gid).expect("group exists");
        group.ops.push(id);

        for dep_gid in &dep_groups {
            if *dep_gid != gid {
                self.groups
                    .get_mut(&gid)
                    .expect("group exists")
                    .parents
                    .insert(*dep_gid);
                self.link_groups(*dep_gid, gid);
            }
        }

        let mut affected = self.groups[&gid].descendants.clone();
        affected.insert(gid);
        self.recompute_depths(&affected);

        trace!(op = %id, %shard, group = %gid, "placed operation");
    }

    fn create_group(&mut self, shard: &ShardId, idx: usize) -> GroupId {
        let gid = GroupId(self.next_group);
        self.next_group += 1;

        self.groups.insert(
            gid,
            Group {
                shard: shard.clone(),
                state: GroupState::Available,
                ops: Vec::new(),
                parents: BTreeSet::new(),
                ancestors: BTreeSet::new(),
                descendants: BTreeSet::new(),
                depth: 0,
            },
        );
        self.shards
            .entry(shard.clone())
            .or_default()
            .insert(idx, gid);
        gid
    }

    // Extend the transitive closures in both directions: everything at or
    // above `parent` now reaches everything at or below `child`.
    fn link_groups(&mut self, parent: GroupId, child: GroupId) {
        let mut above = self.groups[&parent].ancestors.clone();
        above.insert(parent);
        let mut below = self.groups[&child].descendants.clone();
        below.insert(child);

        for id in &above {
            self.groups
                .get_mut(id)
                .expect("ancestor exists")
                .descendants
                .extend(below.iter().copied());
        }
        for id in &below {
            self.groups
                .get_mut(id)
                .expect("descendant exists")
                .ancestors
                .extend(above.iter().copied());
        }
    }

    // Recompute depths for a set of groups in topological order, so that a
    // parent's depth is final before any of its children are visited.
    fn recompute_depths(&mut self, set: &BTreeSet<GroupId>) {
        let mut remaining: BTreeMap<GroupId, usize> = set
            .iter()
            .map(|gid| {
                let in_set = self.groups[gid]
                    .parents
                    .iter()
                    .filter(|p| set.contains(p))
                    .count();
                (*gid, in_set)
            })
            .collect();

        let mut queue: VecDeque<GroupId> = remaining
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(gid, _)| *gid)
            .collect();

        while let Some(gid) = queue.pop_front() {
            let depth = self.groups[&gid]
                .parents
                .iter()
                .map(|p| self.groups[p].depth + 1)
                .max()
                .unwrap_or(0);
            self.groups.get_mut(&gid).expect("group exists").depth = depth;

            for other in set {
                if *other != gid && self.groups[other].parents.contains(&gid) {
                    let count = remaining.get_mut(other).expect("group in set");
                    *count -= 1;
                    if *count == 0 {
                        queue.push_back(*other);
                    }
                }
            }
        }
    }
}

fn bump(start: &mut usize, exact: &mut bool, idx: usize, is_exact: bool) {
    if idx > *start || (idx == *start && is_exact) {
        *start = idx;
        *exact = is_exact;
    }
}
