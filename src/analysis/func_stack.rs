//! Per-call-stack delay aggregation and the display tree.
//!
//! Pairs collapse leaves-first: a pair whose children are all accounted for
//! credits its stack signature and hands its inclusive (global) delay up to
//! the parent, which subtracts it from its own exclusive (local) delay.
//! The loop keeps passing over the columns until the number of pairs still
//! waiting on children stops changing, which also terminates on malformed
//! traces where a child count never reaches zero.

use std::collections::BTreeMap;

use crate::domain::{FunctionId, Pid};

use super::time_pair::{retval_is_negative, TimePairAnalysis};

/// Root prefix of every tree path.
pub const ROOT_STACK: &str = ".0";

/// A value per delay kind: global counts children and off-CPU time,
/// local is what remains after the children are subtracted.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DelayKinds<T> {
    pub global: T,
    pub local: T,
}

/// Aggregated delays of one stack signature.
#[derive(Debug, Clone, Default)]
pub struct StackInfo {
    /// Number of collapsed pairs.
    pub num: i64,
    pub delay_sum: DelayKinds<i64>,
    pub ave: DelayKinds<f64>,
    /// Share of the pid's valid window.
    pub pct: DelayKinds<f64>,
    pub ret_neg_times: i64,
}

impl StackInfo {
    /// Pairs whose 32-bit return value was non-negative.
    #[must_use]
    pub fn ret_nonneg_times(&self) -> i64 {
        self.num - self.ret_neg_times
    }
}

/// One node of the display tree, children in insertion order.
#[derive(Debug, Default)]
pub struct StackNode {
    pub function: FunctionId,
    pub children: Vec<String>,
}

/// The pid's own row: local is the window time not covered by any
/// top-level stack.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessDelay {
    pub delay_sum: DelayKinds<i64>,
    pub pct: DelayKinds<f64>,
}

/// Per-pair scratch columns consumed by the collapse loop.
struct Scratch {
    global: Vec<i64>,
    local: Vec<i64>,
    child_remaining: Vec<i32>,
    finished: Vec<bool>,
}

pub struct FunctionStackAnalysis {
    stacks: BTreeMap<Pid, BTreeMap<String, StackInfo>>,
    nodes: BTreeMap<Pid, BTreeMap<String, StackNode>>,
    process_delay: BTreeMap<Pid, ProcessDelay>,
}

impl FunctionStackAnalysis {
    #[must_use]
    pub fn run(tp: &TimePairAnalysis) -> Self {
        let mut analysis = FunctionStackAnalysis {
            stacks: BTreeMap::new(),
            nodes: BTreeMap::new(),
            process_delay: BTreeMap::new(),
        };
        analysis.collapse(tp);
        analysis.finalize(tp);
        analysis.build_nodes();
        analysis.process_delays(tp);
        analysis
    }

    #[must_use]
    pub fn stacks(&self) -> &BTreeMap<Pid, BTreeMap<String, StackInfo>> {
        &self.stacks
    }

    #[must_use]
    pub fn nodes(&self) -> &BTreeMap<Pid, BTreeMap<String, StackNode>> {
        &self.nodes
    }

    #[must_use]
    pub fn process_delay(&self) -> &BTreeMap<Pid, ProcessDelay> {
        &self.process_delay
    }

    fn collapse(&mut self, tp: &TimePairAnalysis) {
        for (pid, funcs) in tp.pairs() {
            if pid.0 == 0 {
                continue;
            }

            let mut scratch: BTreeMap<FunctionId, Scratch> = funcs
                .iter()
                .map(|(fi, info)| {
                    let delays: Vec<i64> = info.delay.iter().map(|&d| i64::from(d)).collect();
                    (
                        *fi,
                        Scratch {
                            global: delays.clone(),
                            local: delays,
                            child_remaining: info.child_count.clone(),
                            finished: vec![false; info.len()],
                        },
                    )
                })
                .collect();

            let pid_stacks = self.stacks.entry(*pid).or_default();

            // The natural exit condition is "no pair waits on children";
            // the equal-twice guard also stops on counts that can never
            // drain in malformed traces.
            let mut waiting_parents = 0_i64;
            let mut last_waiting = -1_i64;
            while last_waiting != waiting_parents {
                last_waiting = waiting_parents;
                waiting_parents = 0;
                for (fi, info) in funcs {
                    for i in 0..info.len() {
                        if info.invalid[i] || scratch[fi].finished[i] {
                            continue;
                        }
                        if scratch[fi].child_remaining[i] > 0 {
                            waiting_parents += 1;
                            continue;
                        }

                        let entry = scratch.get_mut(fi).expect("scratch covers every function");
                        entry.finished[i] = true;
                        let global = entry.global[i];
                        let local = entry.local[i];

                        let parent = info.parent[i];
                        if !parent.is_root() {
                            if let (Some(slot), Some(pscratch)) =
                                (info.parent_slot[i], scratch.get_mut(&parent))
                            {
                                // Handed up even when the parent pair itself
                                // is invalid, to keep its counters in step.
                                pscratch.child_remaining[slot] -= 1;
                                pscratch.local[slot] -= global;
                            }
                        }

                        let stack = pid_stacks.entry(info.stack_str[i].clone()).or_default();
                        stack.delay_sum.global += global;
                        stack.delay_sum.local += local;
                        stack.num += 1;
                        if retval_is_negative(info.retval_at(i)) {
                            stack.ret_neg_times += 1;
                        }
                    }
                }
            }
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn finalize(&mut self, tp: &TimePairAnalysis) {
        for (pid, stacks) in &mut self.stacks {
            let window = tp.process_valid_time(*pid);
            for info in stacks.values_mut() {
                info.ave.global = info.delay_sum.global as f64 / info.num as f64;
                info.ave.local = info.delay_sum.local as f64 / info.num as f64;
                if window > 0 {
                    info.pct.global = info.delay_sum.global as f64 / window as f64;
                    info.pct.local = info.delay_sum.local as f64 / window as f64;
                }
            }
        }
    }

    /// Insert every signature under the virtual root, creating its parent
    /// prefix node on the way.
    fn build_nodes(&mut self) {
        for (pid, stacks) in &self.stacks {
            let pid_nodes = self.nodes.entry(*pid).or_default();
            for stack in stacks.keys() {
                let full = format!("{ROOT_STACK}{stack}");
                let terminal = full
                    .rsplit('.')
                    .next()
                    .and_then(|token| token.parse().ok())
                    .map_or(FunctionId::ROOT, FunctionId);
                let parent = full.rfind('.').map_or("", |pos| &full[..pos]).to_string();

                pid_nodes.entry(full.clone()).or_default().function = terminal;
                pid_nodes.entry(parent).or_default().children.push(full);
            }
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn process_delays(&mut self, tp: &TimePairAnalysis) {
        for (pid, pid_nodes) in &self.nodes {
            let window = tp.process_valid_time(*pid);
            let mut delay = ProcessDelay {
                delay_sum: DelayKinds { global: window, local: window },
                pct: DelayKinds::default(),
            };
            if let Some(root) = pid_nodes.get(ROOT_STACK) {
                for child in &root.children {
                    let signature = &child[ROOT_STACK.len()..];
                    if let Some(info) = self.stacks.get(pid).and_then(|s| s.get(signature)) {
                        delay.delay_sum.local -= info.delay_sum.global;
                    }
                }
            }
            if delay.delay_sum.global > 0 {
                delay.pct.local =
                    delay.delay_sum.local as f64 / delay.delay_sum.global as f64;
            }
            delay.pct.global = 1.0;
            self.process_delay.insert(*pid, delay);
        }
    }
}
