use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::search::base::TraceabilityInfo;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DriftPhase {
    Init,
    Primer,
    LocalExpand,
    Followup,
    Terminal,
    Reduce,
}

impl DriftPhase {
    pub fn can_transition_to(self, next: DriftPhase) -> bool {
        use DriftPhase::*;

        matches!(
            (self, next),
            (Init, Primer)
                | (Primer, LocalExpand)
                | (Primer, Terminal)
                | (LocalExpand, Followup)
                | (LocalExpand, Terminal)
                | (Followup, LocalExpand)
                | (Followup, Terminal)
                | (Terminal, Reduce)
        )
    }
}

/// Answer produced by one local-expand cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct DriftAnswer {
    pub depth: usize,
    pub questions: Vec<String>,
    pub response: String,
    pub score: u32,
    pub traceability: TraceabilityInfo,
}

/// Mutable state of one drift search. Never shared between queries.
#[derive(Debug, Clone)]
pub struct DriftState {
    pub depth: usize,
    pub max_depth: usize,
    pub visited_entity_ids: HashSet<String>,
    pub pending_followups: Vec<String>,
    pub collected_answers: Vec<DriftAnswer>,
    pub phase: DriftPhase,
    pub history: Vec<DriftPhase>,
    asked: HashSet<String>,
}

impl DriftState {
    pub fn new(query: &str, max_depth: usize) -> Self {
        DriftState {
            depth: 0,
            max_depth,
            visited_entity_ids: HashSet::new(),
            pending_followups: vec![query.to_string()],
            collected_answers: Vec::new(),
            phase: DriftPhase::Init,
            history: vec![DriftPhase::Init],
            asked: HashSet::from([normalize_question(query)]),
        }
    }

    pub fn transition(&mut self, next: DriftPhase) {
        debug_assert!(
            self.phase.can_transition_to(next),
            "invalid drift transition {:?} -> {:?}",
            self.phase,
            next
        );
        tracing::debug!(from = ?self.phase, to = ?next, depth = self.depth, "Drift transition");
        self.phase = next;
        self.history.push(next);
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.phase, DriftPhase::Terminal | DriftPhase::Reduce)
    }

    pub fn local_cycles(&self) -> usize {
        self.history
            .iter()
            .filter(|phase| **phase == DriftPhase::LocalExpand)
            .count()
    }

    /// Removes and returns up to `k` pending questions.
    pub fn take_pending(&mut self, k: usize) -> Vec<String> {
        let k = k.max(1).min(self.pending_followups.len());
        self.pending_followups.drain(..k).collect()
    }

    /// Queues new questions, dropping ones already asked. Returns how many
    /// were queued.
    pub fn add_followups(&mut self, questions: Vec<String>, k: usize) -> usize {
        let mut added = 0;
        for question in questions {
            if added >= k {
                break;
            }
            let question = question.trim().to_string();
            if question.is_empty() || !self.asked.insert(normalize_question(&question)) {
                continue;
            }
            self.pending_followups.push(question);
            added += 1;
        }
        added
    }

    pub fn asked_questions(&self) -> Vec<String> {
        let mut asked: Vec<String> = self.asked.iter().cloned().collect();
        asked.sort();
        asked
    }
}

fn normalize_question(question: &str) -> String {
    question.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}
