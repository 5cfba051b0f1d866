//! Frames exchanged on the voice signaling channel `/ws/voice/<room>/`
//!
//! The server relays offer/answer/candidate frames between the two peers of
//! a room unchanged and adds roster notifications.

use crate::chat::UserId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CallFrame {
    /// SDP Offer
    Offer { sdp: String },

    /// SDP Answer
    Answer { sdp: String },

    /// Trickled ICE candidate. A missing or empty `candidate` marks the end
    /// of the remote candidates.
    Candidate {
        #[serde(default)]
        candidate: Option<String>,
        #[serde(rename = "sdpMid", default)]
        sdp_mid: Option<String>,
        #[serde(rename = "sdpMLineIndex", default)]
        sdp_mline_index: Option<u16>,
    },

    UserJoined { user_id: UserId, username: String },

    UserLeft { user_id: UserId },
}

impl CallFrame {
    /// Every `type` tag this enum decodes
    pub const TYPES: [&'static str; 5] = ["offer", "answer", "candidate", "user_joined", "user_left"];
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_candidate_wire_names() {
        let frame = CallFrame::Candidate {
            candidate: Some("candidate:1 1 udp 2122260223 10.0.0.2 54321 typ host".to_string()),
            sdp_mid: Some("0".to_string()),
            sdp_mline_index: Some(0),
        };
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(value["type"], "candidate");
        assert_eq!(value["sdpMid"], "0");
        assert_eq!(value["sdpMLineIndex"], 0);
    }

    #[test]
    fn test_end_of_candidates_decodes() {
        let frame: CallFrame = serde_json::from_value(json!({"type": "candidate", "candidate": null})).unwrap();
        assert_eq!(
            frame,
            CallFrame::Candidate {
                candidate: None,
                sdp_mid: None,
                sdp_mline_index: None
            }
        );

        let frame: CallFrame = serde_json::from_value(json!({"type": "candidate"})).unwrap();
        assert!(matches!(frame, CallFrame::Candidate { candidate: None, .. }));
    }

    #[test]
    fn test_roster_frames() {
        let frame: CallFrame =
            serde_json::from_value(json!({"type": "user_joined", "user_id": 9, "username": "eve"})).unwrap();
        assert_eq!(
            frame,
            CallFrame::UserJoined {
                user_id: 9,
                username: "eve".to_string()
            }
        );
    }
}
