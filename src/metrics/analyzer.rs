use super::MetricsSnapshot;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub name: String,
    pub turns: u64,
    /// First turn at which every expected link was in the graph.
    pub converged_at: Option<u64>,
    pub final_connections: usize,
    pub expected_connections: usize,
    pub delivery_rate: f64,
    pub send_drop_rate: f64,
    pub receive_loss_rate: f64,
    pub hellos_sent: u64,
}

pub fn analyze(snapshots: &[MetricsSnapshot], name: &str, expected_connections: usize) -> AnalysisReport {
    let last = snapshots.last();

    let converged_at = snapshots
        .iter()
        .find(|s| expected_connections > 0 && s.connections >= expected_connections)
        .map(|s| s.turn);

    let (delivery_rate, send_drop_rate, receive_loss_rate, hellos_sent, final_connections, turns) = match last {
        Some(s) => {
            let attempted = s.packets_sent + s.packets_dropped;
            let drop = if attempted > 0 {
                s.packets_dropped as f64 / attempted as f64
            } else {
                0.0
            };
            let arrived = s.packets_delivered + s.packets_lost;
            let loss = if arrived > 0 {
                s.packets_lost as f64 / arrived as f64
            } else {
                0.0
            };
            (s.delivery_rate, drop, loss, s.hellos_sent, s.connections, s.turn)
        }
        None => (0.0, 0.0, 0.0, 0, 0, 0),
    };

    AnalysisReport {
        name: name.to_string(),
        turns,
        converged_at,
        final_connections,
        expected_connections,
        delivery_rate,
        send_drop_rate,
        receive_loss_rate,
        hellos_sent,
    }
}

/// Averages repeated runs of the same configuration.
pub fn average(reports: &[AnalysisReport]) -> Option<AnalysisReport> {
    let first = reports.first()?;
    let n = reports.len() as f64;

    let converged: Vec<u64> = reports.iter().filter_map(|r| r.converged_at).collect();
    // Only report a convergence turn if every repetition converged
    let converged_at = if converged.len() == reports.len() {
        Some((converged.iter().sum::<u64>() as f64 / n).round() as u64)
    } else {
        None
    };

    Some(AnalysisReport {
        name: first.name.clone(),
        turns: (reports.iter().map(|r| r.turns).sum::<u64>() as f64 / n).round() as u64,
        converged_at,
        final_connections: reports.iter().map(|r| r.final_connections).min().unwrap_or(0),
        expected_connections: first.expected_connections,
        delivery_rate: reports.iter().map(|r| r.delivery_rate).sum::<f64>() / n,
        send_drop_rate: reports.iter().map(|r| r.send_drop_rate).sum::<f64>() / n,
        receive_loss_rate: reports.iter().map(|r| r.receive_loss_rate).sum::<f64>() / n,
        hellos_sent: (reports.iter().map(|r| r.hellos_sent).sum::<u64>() as f64 / n).round() as u64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(turn: u64, connections: usize) -> MetricsSnapshot {
        MetricsSnapshot {
            turn,
            elapsed_s: 0.0,
            packets_sent: 10,
            packets_dropped: 0,
            packets_delivered: 8,
            packets_lost: 2,
            hellos_sent: 4,
            connections,
            delivery_rate: 0.8,
        }
    }

    #[test]
    fn test_analyze_finds_convergence_turn() {
        let snaps = vec![snap(1, 0), snap(2, 1), snap(3, 2), snap(4, 2)];
        let report = analyze(&snaps, "star", 2);
        assert_eq!(report.converged_at, Some(3));
        assert_eq!(report.turns, 4);
        assert!((report.receive_loss_rate - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_average_requires_all_converged() {
        let a = analyze(&[snap(1, 2)], "x", 2);
        let b = analyze(&[snap(1, 1)], "x", 2);
        assert_eq!(average(&[a.clone(), b]).unwrap().converged_at, None);
        assert_eq!(average(&[a.clone(), a]).unwrap().converged_at, Some(1));
        assert!(average(&[]).is_none());
    }
}
