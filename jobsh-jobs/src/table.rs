//! Registry of live jobs.

use indexmap::IndexMap;
use jobsh_core::{DEFAULT_MAX_JOBS, Pipeline};
use nix::unistd::Pid;
use std::collections::BTreeSet;
use tracing::{debug, error};

use crate::error::{JobError, Result};
use crate::job::{Job, JobId, JobStatus};

/// Jobs keyed by id, iterated in creation order.
///
/// Ids are always the smallest positive integer not held by a live job,
/// and stay below the configured ceiling.
#[derive(Debug)]
pub struct JobTable {
    jobs: IndexMap<JobId, Job>,
    /// Released ids below `next`.
    free: BTreeSet<JobId>,
    /// Smallest id never handed out since the table was last this large.
    next: JobId,
    max: JobId,
}

impl Default for JobTable {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_JOBS)
    }
}

impl JobTable {
    /// A table handing out ids in `1..max`.
    pub fn new(max: JobId) -> Self {
        Self {
            jobs: IndexMap::new(),
            free: BTreeSet::new(),
            next: 1,
            max,
        }
    }

    pub fn allocate(&mut self, pipeline: Pipeline, status: JobStatus) -> Result<JobId> {
        let jid = match self.free.pop_first() {
            Some(jid) => jid,
            None if self.next < self.max => {
                self.next += 1;
                self.next - 1
            }
            None => {
                error!(max = self.max, "Job table exhausted");
                return Err(JobError::TableFull { max: self.max });
            }
        };
        debug!(jid, ?status, "Allocated job");
        self.jobs.insert(jid, Job::new(jid, pipeline, status));
        Ok(jid)
    }

    pub fn get(&self, jid: JobId) -> Option<&Job> {
        self.jobs.get(&jid)
    }

    pub fn get_mut(&mut self, jid: JobId) -> Option<&mut Job> {
        self.jobs.get_mut(&jid)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Job> {
        self.jobs.values()
    }

    /// The job with `pid` as a live member.
    pub fn find_by_pid(&self, pid: Pid) -> Option<JobId> {
        self.jobs.values().find(|job| job.owns(pid)).map(|job| job.jid)
    }

    /// The job holding the foreground. Finished jobs waiting to be swept
    /// hold nothing.
    pub fn foreground(&self) -> Option<&Job> {
        self.jobs
            .values()
            .find(|job| job.status == JobStatus::Foreground && job.alive() > 0)
    }

    /// Move `jid` into the foreground, failing if another live job is there.
    pub fn set_foreground(&mut self, jid: JobId) -> Result<()> {
        if self.foreground().is_some_and(|current| current.jid != jid) {
            return Err(JobError::Internal("two jobs in the foreground"));
        }
        let job = self.jobs.get_mut(&jid).ok_or(JobError::NoSuchJob(jid))?;
        job.status = JobStatus::Foreground;
        Ok(())
    }

    /// Remove every job without live processes, in creation order.
    pub fn sweep(&mut self) -> Vec<Job> {
        let mut removed = Vec::new();
        let mut i = 0;
        while i < self.jobs.len() {
            if self.jobs[i].alive() == 0 {
                if let Some((jid, job)) = self.jobs.shift_remove_index(i) {
                    self.release(jid);
                    debug!(jid, "Removed finished job");
                    removed.push(job);
                }
            } else {
                i += 1;
            }
        }
        removed
    }

    fn release(&mut self, jid: JobId) {
        self.free.insert(jid);
        while self
            .next
            .checked_sub(1)
            .is_some_and(|top| self.free.remove(&top))
        {
            self.next -= 1;
        }
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobsh_core::Command;
    use nix::sys::signal::Signal;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    use crate::job::ProcessState;

    fn pipeline(word: &str) -> Pipeline {
        Pipeline::new(vec![Command::new([word])])
    }

    fn finish(table: &mut JobTable, jid: JobId) {
        let job = table.get_mut(jid).unwrap();
        let pids: Vec<_> = job.live_pids().collect();
        for pid in pids {
            job.mark_process(pid, ProcessState::Exited(0));
        }
    }

    #[test]
    fn test_ids_start_at_one() {
        let mut table = JobTable::default();
        assert_eq!(table.allocate(pipeline("a"), JobStatus::Background).unwrap(), 1);
        assert_eq!(table.allocate(pipeline("b"), JobStatus::Background).unwrap(), 2);
    }

    #[test]
    fn test_smallest_free_id_is_reused() {
        let mut table = JobTable::default();
        for word in ["a", "b", "c"] {
            table.allocate(pipeline(word), JobStatus::Background).unwrap();
        }
        table.get_mut(1).unwrap().add_process(Pid::from_raw(11));
        table.get_mut(3).unwrap().add_process(Pid::from_raw(33));
        // Job 2 never spawned anything, so it is swept.
        let removed: Vec<_> = table.sweep().into_iter().map(|j| j.jid).collect();
        assert_eq!(removed, vec![2]);
        assert_eq!(table.allocate(pipeline("d"), JobStatus::Background).unwrap(), 2);
        assert_eq!(table.allocate(pipeline("e"), JobStatus::Background).unwrap(), 4);
    }

    #[test]
    fn test_iteration_follows_creation_order() {
        let mut table = JobTable::default();
        for word in ["a", "b", "c"] {
            let jid = table.allocate(pipeline(word), JobStatus::Background).unwrap();
            table.get_mut(jid).unwrap().add_process(Pid::from_raw(100 + jid as i32));
        }
        finish(&mut table, 1);
        table.sweep();
        let jid = table.allocate(pipeline("d"), JobStatus::Background).unwrap();
        assert_eq!(jid, 1);
        let order: Vec<_> = table.iter().map(|j| j.jid).collect();
        assert_eq!(order, vec![2, 3, 1]);
    }

    #[test]
    fn test_full_table() {
        let mut table = JobTable::new(3);
        table.allocate(pipeline("a"), JobStatus::Background).unwrap();
        table.allocate(pipeline("b"), JobStatus::Background).unwrap();
        let err = table
            .allocate(pipeline("c"), JobStatus::Background)
            .unwrap_err();
        assert!(matches!(err, JobError::TableFull { max: 3 }));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_find_by_pid_ignores_reaped_processes() {
        let mut table = JobTable::default();
        let jid = table.allocate(pipeline("a"), JobStatus::Background).unwrap();
        let job = table.get_mut(jid).unwrap();
        job.add_process(Pid::from_raw(50));
        job.add_process(Pid::from_raw(51));
        job.mark_process(Pid::from_raw(50), ProcessState::Signaled(Signal::SIGKILL));
        assert_eq!(table.find_by_pid(Pid::from_raw(50)), None);
        assert_eq!(table.find_by_pid(Pid::from_raw(51)), Some(jid));
    }

    #[test]
    fn test_second_foreground_job_is_rejected() {
        let mut table = JobTable::default();
        let a = table.allocate(pipeline("a"), JobStatus::Foreground).unwrap();
        table.get_mut(a).unwrap().add_process(Pid::from_raw(60));
        let b = table.allocate(pipeline("b"), JobStatus::Stopped).unwrap();
        assert!(table.set_foreground(a).is_ok());
        assert!(matches!(table.set_foreground(b), Err(JobError::Internal(_))));
        assert!(matches!(table.set_foreground(9), Err(JobError::NoSuchJob(9))));
    }

    #[test]
    fn test_finished_foreground_job_does_not_block_the_next() {
        let mut table = JobTable::default();
        let a = table.allocate(pipeline("a"), JobStatus::Background).unwrap();
        table.set_foreground(a).unwrap();
        table.get_mut(a).unwrap().add_process(Pid::from_raw(70));
        finish(&mut table, a);
        assert!(table.foreground().is_none());

        // Never spawned anything: also finished.
        let b = table.allocate(pipeline("b"), JobStatus::Background).unwrap();
        table.set_foreground(b).unwrap();
        let c = table.allocate(pipeline("c"), JobStatus::Background).unwrap();
        assert!(table.set_foreground(c).is_ok());
        assert_eq!(table.sweep().len(), 3);
    }

    #[test]
    fn test_sweep_is_idempotent() {
        let mut table = JobTable::default();
        table.allocate(pipeline("a"), JobStatus::Background).unwrap();
        assert_eq!(table.sweep().len(), 1);
        assert!(table.sweep().is_empty());
        assert!(table.is_empty());
    }

    #[derive(Debug, Clone)]
    enum Op {
        Allocate,
        Finish(usize),
        Sweep,
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            3 => Just(Op::Allocate),
            2 => (0usize..16).prop_map(Op::Finish),
            1 => Just(Op::Sweep),
        ]
    }

    proptest! {
        #[test]
        fn prop_allocation_is_smallest_unused(ops in prop::collection::vec(op(), 1..64)) {
            let mut table = JobTable::new(12);
            let mut pid = 1000;
            for op in ops {
                match op {
                    Op::Allocate => {
                        let expected = (1..12).find(|id| table.get(*id).is_none());
                        match table.allocate(pipeline("x"), JobStatus::Background) {
                            Ok(jid) => {
                                prop_assert_eq!(Some(jid), expected);
                                pid += 1;
                                table.get_mut(jid).unwrap().add_process(Pid::from_raw(pid));
                            }
                            Err(JobError::TableFull { .. }) => prop_assert_eq!(expected, None),
                            Err(e) => prop_assert!(false, "unexpected error {e}"),
                        }
                    }
                    Op::Finish(n) => {
                        let jid = table.iter().nth(n).map(|j| j.jid);
                        if let Some(jid) = jid {
                            finish(&mut table, jid);
                        }
                    }
                    Op::Sweep => {
                        table.sweep();
                        prop_assert!(table.iter().all(|j| j.alive() > 0));
                    }
                }
                let mut ids: Vec<_> = table.iter().map(|j| j.jid).collect();
                let count = ids.len();
                ids.sort_unstable();
                ids.dedup();
                prop_assert_eq!(ids.len(), count);
            }
        }
    }
}
