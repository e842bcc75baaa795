//! Session aggregation and statistics.
//!
//! This module folds per-host outcomes into one deduplicated batch and
//! computes the run summary.

use crate::models::{AggregationBatch, BatchSummary, HostFailure, HostOutcome, SessionRecord};
use chrono::Local;
use std::collections::HashSet;

/// Deduplicate `records` (first occurrence wins) and drop records of hosts
/// outside `reachable`.
pub fn dedup_records<I>(records: I, reachable: &HashSet<&str>) -> Vec<SessionRecord>
where
    I: IntoIterator<Item = SessionRecord>,
{
    let mut seen: HashSet<String> = HashSet::new();
    records
        .into_iter()
        .filter(|r| seen.insert(r.dedup_key()))
        .filter(|r| reachable.contains(r.host.as_str()))
        .collect()
}

/// Build the batch for one run from per-host outcomes in host-list order.
///
/// Outcomes may contain several collection passes for the same host.
pub fn aggregate(outcomes: &[HostOutcome]) -> AggregationBatch {
    let mut reachable: Vec<String> = Vec::new();
    let mut unreachable: Vec<String> = Vec::new();
    let mut failed: Vec<HostFailure> = Vec::new();

    for outcome in outcomes {
        match outcome {
            HostOutcome::Collected { host, .. } => push_unique(&mut reachable, host),
            HostOutcome::Unreachable(probe) => push_unique(&mut unreachable, &probe.host),
            HostOutcome::Failed(failure) => {
                if !failed.iter().any(|f| f.host == failure.host) {
                    failed.push(failure.clone());
                }
            }
        }
    }

    // A host collected in any pass counts as reachable for this run.
    unreachable.retain(|h| !reachable.contains(h));
    failed.retain(|f| !reachable.contains(&f.host));

    let reachable_set: HashSet<&str> = reachable.iter().map(String::as_str).collect();
    let records = dedup_records(
        outcomes.iter().flat_map(|o| match o {
            HostOutcome::Collected { records, .. } => records.clone(),
            _ => Vec::new(),
        }),
        &reachable_set,
    );

    AggregationBatch {
        records,
        reachable,
        unreachable,
        failed,
        created_at: Local::now(),
    }
}

fn push_unique(list: &mut Vec<String>, host: &str) {
    if !list.iter().any(|h| h == host) {
        list.push(host.to_string());
    }
}

/// Compute statistics for a batch.
///
/// Occupancy is the share of reachable hosts with at least one non-waiting
/// session; the run is high load when it reaches `high_load_percent`.
pub fn summarize(batch: &AggregationBatch, high_load_percent: f64) -> BatchSummary {
    let mut summary = BatchSummary {
        total_sessions: batch.records.len(),
        reachable_hosts: batch.reachable.len(),
        unreachable_hosts: batch.unreachable.len(),
        failed_hosts: batch.failed.len(),
        ..Default::default()
    };

    for record in &batch.records {
        *summary.by_state.entry(record.state.clone()).or_insert(0) += 1;
    }

    summary.occupied_hosts = batch
        .reachable
        .iter()
        .filter(|host| batch.records_for(host).any(|r| !r.is_waiting()))
        .count();

    if summary.reachable_hosts > 0 {
        summary.occupancy_percent =
            summary.occupied_hosts as f64 / summary.reachable_hosts as f64 * 100.0;
        summary.high_load = summary.occupancy_percent >= high_load_percent;
    }

    summary
}

/// Group batch records by host, keeping batch order.
pub fn group_by_host(batch: &AggregationBatch) -> Vec<(&str, Vec<&SessionRecord>)> {
    batch
        .reachable
        .iter()
        .map(|host| (host.as_str(), batch.records_for(host).collect::<Vec<_>>()))
        .collect()
}

/// Generate a text summary of batch statistics.
pub fn generate_summary_text(summary: &BatchSummary) -> String {
    let mut lines = Vec::new();

    lines.push(format!(
        "Hosts: {} reachable, {} unreachable, {} failed",
        summary.reachable_hosts, summary.unreachable_hosts, summary.failed_hosts
    ));

    if summary.total_sessions == 0 {
        lines.push("No active sessions found".to_string());
    } else {
        lines.push(format!("Sessions: {}", summary.total_sessions));
        for (state, count) in &summary.by_state {
            lines.push(format!("- {}: {}", state, count));
        }
    }

    lines.push(format!(
        "Occupancy: {:.0}% ({} of {} reachable hosts in use){}",
        summary.occupancy_percent,
        summary.occupied_hosts,
        summary.reachable_hosts,
        if summary.high_load { " - HIGH LOAD" } else { "" }
    ));

    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ProbeResult, WAITING_LABEL};

    fn create_test_record(host: &str, user: &str, session: &str) -> SessionRecord {
        SessionRecord {
            host: host.to_string(),
            user: user.to_string(),
            session: session.to_string(),
            state: "Active".to_string(),
            logon: "10/16/2026 8:15 AM".to_string(),
        }
    }

    fn collected(host: &str, records: Vec<SessionRecord>) -> HostOutcome {
        HostOutcome::Collected {
            host: host.to_string(),
            records,
        }
    }

    #[test]
    fn test_dedup_first_occurrence_wins() {
        let mut second = create_test_record("h1", "alice", "console");
        second.state = "Disc".to_string();
        let records = vec![create_test_record("h1", "alice", "console"), second];
        let reachable: HashSet<&str> = ["h1"].into_iter().collect();

        let deduped = dedup_records(records, &reachable);
        assert_eq!(deduped.len(), 1);
        assert_eq!(deduped[0].state, "Active");
    }

    #[test]
    fn test_dedup_is_idempotent() {
        let records = vec![
            create_test_record("h1", "alice", "console"),
            create_test_record("h1", "bob", "rdp-tcp#1"),
            create_test_record("h2", "alice", "console"),
        ];
        let reachable: HashSet<&str> = ["h1", "h2"].into_iter().collect();

        let doubled: Vec<SessionRecord> = records.iter().chain(records.iter()).cloned().collect();
        assert_eq!(
            dedup_records(doubled, &reachable),
            dedup_records(records, &reachable)
        );
    }

    #[test]
    fn test_repeated_pass_yields_single_record() {
        let pass = vec![create_test_record("h1", "alice", "console")];
        let batch = aggregate(&[collected("h1", pass.clone()), collected("h1", pass)]);
        assert_eq!(batch.records.len(), 1);
        assert_eq!(batch.reachable, vec!["h1"]);
    }

    #[test]
    fn test_stale_records_are_filtered() {
        // A record carried over for a host that was not reachable this run.
        let batch = aggregate(&[
            collected(
                "h1",
                vec![
                    create_test_record("h1", "alice", "console"),
                    create_test_record("h9", "mallory", "console"),
                ],
            ),
            HostOutcome::Unreachable(ProbeResult::ping_failed("h2")),
        ]);

        assert_eq!(batch.records.len(), 1);
        assert_eq!(batch.records[0].host, "h1");
        assert_eq!(batch.unreachable, vec!["h2"]);
    }

    #[test]
    fn test_summary_occupancy() {
        let batch = aggregate(&[
            collected("h1", vec![create_test_record("h1", "alice", "console")]),
            collected("h2", vec![create_test_record("h2", "bob", WAITING_LABEL)]),
            collected("h3", vec![]),
            collected("h4", vec![create_test_record("h4", "carol", "rdp-tcp#0")]),
        ]);

        let summary = summarize(&batch, 80.0);
        assert_eq!(summary.total_sessions, 3);
        assert_eq!(summary.occupied_hosts, 2);
        assert_eq!(summary.occupancy_percent, 50.0);
        assert!(!summary.high_load);
        assert!(summarize(&batch, 50.0).high_load);
    }

    #[test]
    fn test_empty_batch_summary_text() {
        let batch = aggregate(&[HostOutcome::Unreachable(ProbeResult::ping_failed("h2"))]);
        let summary = summarize(&batch, 80.0);
        assert!(!summary.high_load);
        assert!(generate_summary_text(&summary).contains("No active sessions found"));
    }

    #[test]
    fn test_group_by_host_keeps_order() {
        let batch = aggregate(&[
            collected("b", vec![create_test_record("b", "u1", "console")]),
            collected("a", vec![]),
        ]);
        let grouped = group_by_host(&batch);
        assert_eq!(grouped[0].0, "b");
        assert_eq!(grouped[0].1.len(), 1);
        assert_eq!(grouped[1].0, "a");
        assert!(grouped[1].1.is_empty());
    }
}
