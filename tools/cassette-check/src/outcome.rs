//! Classification of harness output into a [`TestOutcomeSet`].
//!
//! The harness prints `go test -v` style lines:
//!
//! ```text
//! === RUN   TestAccComputeInstance_basic
//! --- PASS: TestAccComputeInstance_basic (12.30s)
//!     --- SKIP: TestAccComputeInstance_basic/sub (0.00s)
//! ```
//!
//! Only top-level tests are classified; a subtest's verdict is already folded
//! into its parent's line. Every test that is announced or reported ends up
//! in exactly one of the three categories. A test that started but never
//! reported a verdict (the harness died underneath it) counts as failed.

use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TestVerdict {
    Skipped,
    Passed,
    Failed,
}

/// Disjoint passed/failed/skipped sequences, each in first-seen order.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct TestOutcomeSet {
    passed: Vec<String>,
    failed: Vec<String>,
    skipped: Vec<String>,
}

impl TestOutcomeSet {
    /// Builds the set from raw verdicts. A test seen more than once keeps its
    /// worst verdict: failed over passed over skipped.
    pub fn from_verdicts<I, S>(verdicts: I) -> Self
    where
        I: IntoIterator<Item = (S, TestVerdict)>,
        S: Into<String>,
    {
        let mut collector = OutcomeCollector::default();
        for (id, verdict) in verdicts {
            collector.record(id.into(), Some(verdict));
        }
        collector.finish().0
    }

    pub fn passed(&self) -> &[String] {
        &self.passed
    }

    pub fn failed(&self) -> &[String] {
        &self.failed
    }

    pub fn skipped(&self) -> &[String] {
        &self.skipped
    }

    pub fn len(&self) -> usize {
        self.passed.len() + self.failed.len() + self.skipped.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Default)]
struct OutcomeCollector {
    order: Vec<String>,
    verdicts: BTreeMap<String, Option<TestVerdict>>,
}

impl OutcomeCollector {
    fn record(&mut self, id: String, verdict: Option<TestVerdict>) {
        match self.verdicts.get_mut(&id) {
            Some(existing) => {
                if let Some(new) = verdict {
                    *existing = Some(existing.map_or(new, |old| old.max(new)));
                }
            }
            None => {
                self.order.push(id.clone());
                self.verdicts.insert(id, verdict);
            }
        }
    }

    fn finish(self) -> (TestOutcomeSet, Vec<String>) {
        let mut set = TestOutcomeSet::default();
        let mut unfinished = Vec::new();
        for id in self.order {
            match self.verdicts.get(&id).copied().flatten() {
                Some(TestVerdict::Passed) => set.passed.push(id),
                Some(TestVerdict::Skipped) => set.skipped.push(id),
                Some(TestVerdict::Failed) => set.failed.push(id),
                None => {
                    unfinished.push(id.clone());
                    set.failed.push(id);
                }
            }
        }
        (set, unfinished)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ParsedOutput {
    pub outcomes: TestOutcomeSet,
    /// Tests that started but never reported; already counted as failed.
    pub unfinished: Vec<String>,
}

pub fn parse_harness_output(output: &str) -> ParsedOutput {
    let mut collector = OutcomeCollector::default();
    for line in output.lines() {
        let line = line.trim_start();
        if let Some(rest) = line.strip_prefix("=== RUN") {
            if let Some(id) = first_token(rest) {
                collector.record(id, None);
            }
            continue;
        }
        let (rest, verdict) = if let Some(rest) = line.strip_prefix("--- PASS:") {
            (rest, TestVerdict::Passed)
        } else if let Some(rest) = line.strip_prefix("--- FAIL:") {
            (rest, TestVerdict::Failed)
        } else if let Some(rest) = line.strip_prefix("--- SKIP:") {
            (rest, TestVerdict::Skipped)
        } else {
            continue;
        };
        if let Some(id) = first_token(rest) {
            collector.record(id, Some(verdict));
        }
    }
    let (outcomes, unfinished) = collector.finish();
    ParsedOutput {
        outcomes,
        unfinished,
    }
}

/// First identifier after the marker, skipping `Parent/sub` subtests.
fn first_token(rest: &str) -> Option<String> {
    rest.split_whitespace()
        .next()
        .filter(|id| !id.contains('/'))
        .map(str::to_string)
}
