use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Answer,
}

/// Body of an offer or answer message, keyed on the wire by (room, from, to).
/// Written once into a last-write-wins slot; never mutated after write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionDescription {
    pub sdp_type: SdpKind,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }
}

/// Body of a candidate message, keyed by (room, from, to, sequence).
/// Append-only; duplicates must be tolerated by the reader.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    pub sdp_mid: Option<String>,
    pub sdp_m_line_index: Option<u16>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offer_wire_format() {
        let desc = SessionDescription::offer("v=0\r\n");
        let json = serde_json::to_value(&desc).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "sdpType": "offer", "sdp": "v=0\r\n" })
        );
    }

    #[test]
    fn candidate_wire_format() {
        let cand = IceCandidate {
            candidate: "candidate:1 1 udp 2130706431 192.0.2.1 54400 typ host".to_owned(),
            sdp_mid: Some("0".to_owned()),
            sdp_m_line_index: Some(0),
        };
        let json = serde_json::to_value(&cand).unwrap();
        assert_eq!(json["sdpMid"], "0");
        assert_eq!(json["sdpMLineIndex"], 0);
    }

    #[test]
    fn answer_round_trips() {
        let desc = SessionDescription::answer("v=0\r\n");
        let back: SessionDescription =
            serde_json::from_str(&serde_json::to_string(&desc).unwrap()).unwrap();
        assert_eq!(back.sdp_type, SdpKind::Answer);
    }
}
