//! Per-session counters, cheap to snapshot for logging or tests.

use serde::Serialize;

#[derive(Debug, Clone, Default, Serialize)]
pub struct SenderStats {
    pub packets_sent: u64,
    pub packets_retransmitted: u64,
    pub packets_acked: u64,
    pub resends_served: u64,
}

impl SenderStats {
    pub fn retransmit_ratio(&self) -> f64 {
        if self.packets_sent == 0 {
            0.0
        } else {
            self.packets_retransmitted as f64 / self.packets_sent as f64
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReceiverStats {
    pub packets_received: u64,
    pub duplicates: u64,
    pub dropped_invalid: u64,
    pub segments_delivered: u64,
    pub resends_sent: u64,
    pub gaps_observed: u64,
}

impl ReceiverStats {
    pub fn duplicate_ratio(&self) -> f64 {
        if self.packets_received == 0 {
            0.0
        } else {
            self.duplicates as f64 / self.packets_received as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retransmit_ratio_zero_when_nothing_sent() {
        assert_eq!(SenderStats::default().retransmit_ratio(), 0.0);
    }

    #[test]
    fn retransmit_ratio_computed() {
        let stats = SenderStats {
            packets_sent: 10,
            packets_retransmitted: 3,
            ..Default::default()
        };
        assert!((stats.retransmit_ratio() - 0.3).abs() < f64::EPSILON);
    }

    #[test]
    fn stats_serialize_to_json_for_dumps() {
        let stats = ReceiverStats {
            packets_received: 5,
            duplicates: 1,
            ..Default::default()
        };
        let json = serde_json::to_string(&stats).unwrap();
        assert!(json.contains("\"packets_received\":5"));
    }
}
