//! Decides which events carry a provably complete call stack.
//!
//! Three passes over the sealed event sequence:
//!
//! 1. Collect per-(pid, function) streams of entry/return slots. A
//!    sched_switch contributes its own pid's "leave" side and the next
//!    pid's "resume" side.
//! 2. Pair the streams positionally: an entry immediately followed by a
//!    return makes both slots valid; anything else stays invalid.
//! 3. Sweep the whole sequence per pid, replaying the stack from empty to
//!    empty. Any invalid event inside an episode flips the entire episode
//!    back to invalid.
//!
//! An event therefore survives as valid iff it had a complementary partner
//! in its own stream and its enclosing stack episode was clean.

use std::collections::HashMap;

use crate::config::{Config, SymbolKind};
use crate::domain::{FunctionId, Pid};
use crate::trace::parser::TraceEvent;

/// Which side of an event a validity decision applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidSide {
    Func,
    SchedPrev,
    SchedNext,
}

impl TraceEvent {
    #[must_use]
    pub fn side_valid(&self, side: ValidSide) -> bool {
        match side {
            ValidSide::Func => self.valid.func,
            ValidSide::SchedPrev => self.valid.sched_prev,
            ValidSide::SchedNext => self.valid.sched_next,
        }
    }

    fn set_side_valid(&mut self, side: ValidSide, value: bool) {
        match side {
            ValidSide::Func => self.valid.func = value,
            ValidSide::SchedPrev => self.valid.sched_prev = value,
            ValidSide::SchedNext => self.valid.sched_next = value,
        }
    }
}

/// One slot in a per-(pid, function) entry/return stream.
struct PairSlot {
    event: usize,
    side: ValidSide,
    is_ret: bool,
}

#[derive(Default)]
struct Episode {
    stack: Vec<FunctionId>,
    buffer: Vec<(usize, ValidSide)>,
    dirty: bool,
}

pub struct ValidityMarker<'a> {
    cfg: &'a Config,
}

impl<'a> ValidityMarker<'a> {
    #[must_use]
    pub fn new(cfg: &'a Config) -> Self {
        ValidityMarker { cfg }
    }

    /// Set the validity flags on every configured event.
    pub fn mark(&self, events: &mut [TraceEvent]) {
        let streams = self.build_streams(events);
        for stream in streams.values() {
            Self::pair_stream(stream, events);
        }
        self.sweep_episodes(events);
    }

    fn build_streams(&self, events: &[TraceEvent]) -> HashMap<(Pid, FunctionId), Vec<PairSlot>> {
        let mut streams: HashMap<(Pid, FunctionId), Vec<PairSlot>> = HashMap::new();
        for (idx, ev) in events.iter().enumerate() {
            let Some(spec) = self.cfg.lookup(&ev.symbol) else { continue };
            if spec.kind == SymbolKind::Sched {
                streams.entry((ev.pid, spec.id)).or_default().push(PairSlot {
                    event: idx,
                    side: ValidSide::SchedPrev,
                    is_ret: false,
                });
                if let Some(sched) = ev.sched {
                    streams.entry((sched.next_pid, spec.id)).or_default().push(PairSlot {
                        event: idx,
                        side: ValidSide::SchedNext,
                        is_ret: true,
                    });
                }
            } else {
                streams.entry((ev.pid, spec.id)).or_default().push(PairSlot {
                    event: idx,
                    side: ValidSide::Func,
                    is_ret: spec.is_ret,
                });
            }
        }
        streams
    }

    /// Entry immediately followed by return: both valid. Anything else
    /// (doubled entries, orphan returns) is left invalid.
    fn pair_stream(stream: &[PairSlot], events: &mut [TraceEvent]) {
        let mut i = 0;
        while i < stream.len() {
            if !stream[i].is_ret && i + 1 < stream.len() && stream[i + 1].is_ret {
                events[stream[i].event].set_side_valid(stream[i].side, true);
                events[stream[i + 1].event].set_side_valid(stream[i + 1].side, true);
                i += 2;
            } else {
                i += 1;
            }
        }
    }

    /// Replay each pid's stack from empty to empty; a dirty episode flips
    /// every event recorded inside it back to invalid.
    fn sweep_episodes(&self, events: &mut [TraceEvent]) {
        let mut episodes: HashMap<Pid, Episode> = HashMap::new();
        for idx in 0..events.len() {
            let Some(spec) = self.cfg.lookup(&events[idx].symbol) else { continue };
            let fi = spec.id;

            let mut contributions: [Option<(Pid, ValidSide)>; 2] = [None, None];
            if spec.kind == SymbolKind::Sched {
                contributions[0] = Some((events[idx].pid, ValidSide::SchedPrev));
                contributions[1] = events[idx].sched.map(|s| (s.next_pid, ValidSide::SchedNext));
            } else {
                contributions[0] = Some((events[idx].pid, ValidSide::Func));
            }

            for (pid, side) in contributions.into_iter().flatten() {
                let episode = episodes.entry(pid).or_default();
                if events[idx].side_valid(side) {
                    if episode.stack.last() == Some(&fi) {
                        episode.stack.pop();
                    } else {
                        episode.stack.push(fi);
                    }
                    episode.buffer.push((idx, side));
                } else {
                    episode.dirty = true;
                }
                if episode.stack.is_empty() {
                    if episode.dirty {
                        for (event, side) in &episode.buffer {
                            events[*event].set_side_valid(*side, false);
                        }
                    }
                    episode.buffer.clear();
                    episode.dirty = false;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Paths;
    use crate::domain::{ProcessState, TsUs};
    use crate::trace::parser::{EventValidity, SchedSwitch};

    fn test_cfg() -> Config {
        Config::from_records("k,funcA\nk,funcB\ns,sched_switch\n", Paths::with_roots("/tmp/in", "/tmp/out"))
    }

    fn func_event(line_no: u32, pid: i32, ts: TsUs, symbol: &str) -> TraceEvent {
        TraceEvent {
            line_no,
            pid: Pid(pid),
            cpu: 0,
            ts,
            symbol: symbol.to_string(),
            arg1: None,
            sched: None,
            valid: EventValidity::default(),
        }
    }

    fn sched_event(line_no: u32, pid: i32, ts: TsUs, next_pid: i32) -> TraceEvent {
        TraceEvent {
            line_no,
            pid: Pid(pid),
            cpu: 0,
            ts,
            symbol: "sched_switch".to_string(),
            arg1: None,
            sched: Some(SchedSwitch {
                prev_pid: Pid(pid),
                prev_prio: 120,
                prev_state: ProcessState::Interruptible,
                next_pid: Pid(next_pid),
                next_prio: 120,
            }),
            valid: EventValidity::default(),
        }
    }

    #[test]
    fn test_matched_entry_return_is_valid() {
        let cfg = test_cfg();
        let mut events =
            vec![func_event(1, 7, 0, "funcA"), func_event(2, 7, 5, "funcA__return")];
        ValidityMarker::new(&cfg).mark(&mut events);
        assert!(events[0].valid.func);
        assert!(events[1].valid.func);
    }

    #[test]
    fn test_orphan_return_stays_invalid() {
        let cfg = test_cfg();
        let mut events = vec![
            func_event(1, 7, 0, "funcB__return"),
            func_event(2, 7, 2, "funcA"),
            func_event(3, 7, 3, "funcA__return"),
        ];
        ValidityMarker::new(&cfg).mark(&mut events);
        assert!(!events[0].valid.func);
        // The orphan arrived on an empty stack, so it poisons no episode.
        assert!(events[1].valid.func);
        assert!(events[2].valid.func);
    }

    #[test]
    fn test_doubled_entry_stays_invalid() {
        let cfg = test_cfg();
        let mut events = vec![
            func_event(1, 7, 0, "funcA"),
            func_event(2, 7, 1, "funcA"),
            func_event(3, 7, 2, "funcA__return"),
        ];
        ValidityMarker::new(&cfg).mark(&mut events);
        // Stream is (entry, entry, return): slot 0 stays unmatched. It hits
        // the sweep on an empty stack, so the paired slots 1 and 2 form a
        // clean episode of their own.
        assert!(!events[0].valid.func);
        assert!(events[1].valid.func);
        assert!(events[2].valid.func);
    }

    #[test]
    fn test_invalid_event_poisons_enclosing_episode() {
        let cfg = test_cfg();
        let mut events = vec![
            func_event(1, 7, 0, "funcA"),
            func_event(2, 7, 1, "funcB__return"), // orphan inside the A window
            func_event(3, 7, 2, "funcA__return"),
        ];
        ValidityMarker::new(&cfg).mark(&mut events);
        assert!(!events[0].valid.func);
        assert!(!events[1].valid.func);
        assert!(!events[2].valid.func);
    }

    #[test]
    fn test_episode_of_other_pid_unaffected() {
        let cfg = test_cfg();
        let mut events = vec![
            func_event(1, 7, 0, "funcA"),
            func_event(2, 9, 1, "funcB__return"),
            func_event(3, 7, 2, "funcA__return"),
        ];
        ValidityMarker::new(&cfg).mark(&mut events);
        assert!(events[0].valid.func);
        assert!(!events[1].valid.func);
        assert!(events[2].valid.func);
    }

    #[test]
    fn test_sched_round_trip_sides() {
        let cfg = test_cfg();
        let mut events = vec![sched_event(1, 7, 10, 9), sched_event(2, 9, 20, 7)];
        ValidityMarker::new(&cfg).mark(&mut events);
        // pid 7 stream: leave then resume -> both sides valid.
        assert!(events[0].valid.sched_prev);
        assert!(events[1].valid.sched_next);
        // pid 9 stream starts with a resume: unmatched on both sides.
        assert!(!events[0].valid.sched_next);
        assert!(!events[1].valid.sched_prev);
    }

    #[test]
    fn test_unconfigured_symbols_ignored() {
        let cfg = test_cfg();
        let mut events = vec![func_event(1, 7, 0, "not_probed")];
        ValidityMarker::new(&cfg).mark(&mut events);
        assert!(!events[0].valid.func);
    }
}
