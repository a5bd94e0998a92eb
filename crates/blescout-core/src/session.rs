//! Read-session bookkeeping for the characteristic-read orchestrator.
//!
//! A session tracks one "read everything readable" operation against a single
//! connected device. Sessions are guarded by a monotonically increasing
//! generation: every read carries the generation it was issued under, and a
//! completion whose generation no longer matches the current session is
//! discarded instead of mutating state it no longer owns.

use std::collections::HashMap;

use base64::Engine;
use base64::prelude::BASE64_STANDARD;
use time::OffsetDateTime;

use blescout_types::{CharacteristicDescriptor, CharacteristicKey, ReadState};

/// Encode a read payload for text-safe transport.
pub(crate) fn encode_payload(data: &[u8]) -> String {
    BASE64_STANDARD.encode(data)
}

/// One concurrent-read session against a single connected device.
///
/// At most one session is current at any time; starting a new one replaces
/// the old wholesale at a higher generation.
#[derive(Debug, Clone)]
pub struct ReadSession {
    device_id: String,
    device_name: Option<String>,
    generation: u64,
    started_at: OffsetDateTime,
    entries: HashMap<CharacteristicKey, ReadState>,
}

impl ReadSession {
    /// Build a session with one `Reading` entry per eligible characteristic.
    pub(crate) fn new(
        device_id: &str,
        device_name: Option<String>,
        generation: u64,
        eligible: &[CharacteristicDescriptor],
    ) -> Self {
        let entries = eligible
            .iter()
            .map(|descriptor| (descriptor.key(), ReadState::Reading))
            .collect();
        Self {
            device_id: device_id.to_string(),
            device_name,
            generation,
            started_at: OffsetDateTime::now_utc(),
            entries,
        }
    }

    /// Identifier of the device this session reads from.
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Name of the device, if it was known when the session started.
    pub fn device_name(&self) -> Option<&str> {
        self.device_name.as_deref()
    }

    /// The generation this session was created at.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// When this session was created.
    pub fn started_at(&self) -> OffsetDateTime {
        self.started_at
    }

    /// All entries, keyed by characteristic.
    pub fn entries(&self) -> &HashMap<CharacteristicKey, ReadState> {
        &self.entries
    }

    /// Look up one entry.
    pub fn get(&self, key: &CharacteristicKey) -> Option<&ReadState> {
        self.entries.get(key)
    }

    /// Number of entries in the session.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the session tracks no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of entries still awaiting a completion.
    pub fn pending(&self) -> usize {
        self.entries
            .values()
            .filter(|state| !state.is_settled())
            .count()
    }

    /// Whether every entry has reached a terminal state.
    pub fn is_settled(&self) -> bool {
        self.pending() == 0
    }

    /// Settle one entry. Returns `false` when the key is unknown or the entry
    /// already settled; a settled entry never reverts.
    pub(crate) fn settle(&mut self, key: &CharacteristicKey, state: ReadState) -> bool {
        match self.entries.get_mut(key) {
            Some(slot @ ReadState::Reading) => {
                *slot = state;
                true
            }
            _ => false,
        }
    }

    /// Settle every still-pending entry as an error. Returns the number of
    /// entries settled.
    pub(crate) fn settle_pending(&mut self, message: &str) -> usize {
        let mut settled = 0;
        for state in self.entries.values_mut() {
            if !state.is_settled() {
                *state = ReadState::Error {
                    message: message.to_string(),
                };
                settled += 1;
            }
        }
        settled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blescout_types::CharacteristicCapabilities;

    fn readable(service_id: &str, characteristic_id: &str) -> CharacteristicDescriptor {
        CharacteristicDescriptor {
            service_id: service_id.to_string(),
            characteristic_id: characteristic_id.to_string(),
            capabilities: CharacteristicCapabilities::read_only(),
        }
    }

    #[test]
    fn test_encode_payload_is_standard_base64() {
        assert_eq!(encode_payload(b"iPhone"), "aVBob25l");
        assert_eq!(encode_payload(b""), "");
    }

    #[test]
    fn test_new_session_starts_all_reading() {
        let session = ReadSession::new(
            "AA:BB",
            None,
            1,
            &[readable("180a", "2a29"), readable("180a", "2a24")],
        );

        assert_eq!(session.len(), 2);
        assert_eq!(session.pending(), 2);
        assert!(!session.is_settled());
    }

    #[test]
    fn test_settle_is_terminal() {
        let key = CharacteristicKey::new("180a", "2a29");
        let mut session = ReadSession::new("AA:BB", None, 1, &[readable("180a", "2a29")]);

        assert!(session.settle(
            &key,
            ReadState::Success {
                data: encode_payload(b"iPhone"),
            }
        ));
        assert!(session.is_settled());

        // A late completion for an already-settled entry must be ignored.
        assert!(!session.settle(
            &key,
            ReadState::Error {
                message: "status=137".into(),
            }
        ));
        assert_eq!(
            session.get(&key),
            Some(&ReadState::Success {
                data: "aVBob25l".into()
            })
        );
    }

    #[test]
    fn test_settle_unknown_key_is_ignored() {
        let mut session = ReadSession::new("AA:BB", None, 1, &[readable("180a", "2a29")]);
        assert!(!session.settle(
            &CharacteristicKey::new("180a", "ffff"),
            ReadState::Reading
        ));
    }

    #[test]
    fn test_settle_pending_fails_only_unsettled_entries() {
        let done = CharacteristicKey::new("180a", "2a29");
        let mut session = ReadSession::new(
            "AA:BB",
            Some("Band".into()),
            3,
            &[readable("180a", "2a29"), readable("180a", "2a24")],
        );
        session.settle(
            &done,
            ReadState::Success {
                data: encode_payload(&[1, 2, 3]),
            },
        );

        assert_eq!(session.settle_pending("device disconnected"), 1);
        assert!(session.is_settled());
        assert!(matches!(
            session.get(&done),
            Some(ReadState::Success { .. })
        ));
        assert_eq!(
            session.get(&CharacteristicKey::new("180a", "2a24")),
            Some(&ReadState::Error {
                message: "device disconnected".into()
            })
        );
    }
}
