//! Wire encoding for the two inter-processor datagram types (§6).

/// Tag byte identifying a completion datagram.
const TAG_COMPLETION: u8 = 0;
/// Tag byte identifying a criticality-change datagram.
const TAG_CRITICALITY_CHANGE: u8 = 1;

const COMPLETION_LEN: usize = 1 + 4 + 4 + 4;
const CRITICALITY_CHANGE_LEN: usize = 1 + 1;

/// One of the two datagram shapes exchanged between processor processes (§6 wire table).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Packet {
    /// A completed job, as reported by the originating processor.
    Completion {
        /// The completed task's id.
        task_id: u32,
        /// The arrival instant of the completed job.
        arrival_tick: u32,
        /// The system tick the completion was observed at.
        system_tick: u32,
    },
    /// A criticality-level change, honored by a receiver only if it strictly exceeds its own
    /// current global level.
    CriticalityChange {
        /// The new level, `0..=4`.
        level: u8,
    },
}

impl Packet {
    /// Encode this packet as a small fixed-shape byte buffer.
    #[must_use]
    pub fn encode(self) -> Vec<u8> {
        match self {
            Packet::Completion { task_id, arrival_tick, system_tick } => {
                let mut buf = Vec::with_capacity(COMPLETION_LEN);
                buf.push(TAG_COMPLETION);
                buf.extend_from_slice(&task_id.to_le_bytes());
                buf.extend_from_slice(&arrival_tick.to_le_bytes());
                buf.extend_from_slice(&system_tick.to_le_bytes());
                buf
            }
            Packet::CriticalityChange { level } => vec![TAG_CRITICALITY_CHANGE, level],
        }
    }

    /// Decode a packet from a received datagram. Returns `None` on an unrecognized tag or a
    /// truncated payload (§7 "bad packet: log WARN, discard" — the caller does the logging).
    #[must_use]
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        match bytes.first().copied()? {
            TAG_COMPLETION if bytes.len() == COMPLETION_LEN => {
                let task_id = u32::from_le_bytes(bytes[1..5].try_into().ok()?);
                let arrival_tick = u32::from_le_bytes(bytes[5..9].try_into().ok()?);
                let system_tick = u32::from_le_bytes(bytes[9..13].try_into().ok()?);
                Some(Packet::Completion { task_id, arrival_tick, system_tick })
            }
            TAG_CRITICALITY_CHANGE if bytes.len() == CRITICALITY_CHANGE_LEN => {
                Some(Packet::CriticalityChange { level: bytes[1] })
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completion_round_trips() {
        let packet = Packet::Completion { task_id: 7, arrival_tick: 100, system_tick: 103 };
        let bytes = packet.encode();
        assert_eq!(Packet::decode(&bytes), Some(packet));
    }

    #[test]
    fn criticality_change_round_trips() {
        let packet = Packet::CriticalityChange { level: 3 };
        let bytes = packet.encode();
        assert_eq!(Packet::decode(&bytes), Some(packet));
    }

    #[test]
    fn unknown_tag_is_rejected() {
        assert_eq!(Packet::decode(&[9, 1, 2, 3]), None);
    }

    #[test]
    fn truncated_payload_is_rejected() {
        assert_eq!(Packet::decode(&[TAG_COMPLETION, 1, 2]), None);
    }
}
