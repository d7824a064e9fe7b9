use serde::{Deserialize, Serialize};

/// Caller-supplied identity and key material for one remote node.
///
/// The `(mailbox, pairing_phrase)` pair identifies at most one live session
/// in the pool. The key fields are rewritten during the handshake so the
/// caller always reads back the material actually in use: `local_key` holds
/// the hex of the 32-byte scalar (minted fresh when the caller left both key
/// fields empty) and `remote_key` the peer's 33-byte compressed point once
/// the handshake has revealed it. `status` is output-only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct NodeDescriptor {
    pub mailbox: String,
    pub pairing_phrase: String,
    pub local_key: String,
    pub remote_key: String,
    pub status: String,
}

impl NodeDescriptor {
    pub fn new(mailbox: impl Into<String>, pairing_phrase: impl Into<String>) -> Self {
        Self {
            mailbox: mailbox.into(),
            pairing_phrase: pairing_phrase.into(),
            ..Self::default()
        }
    }

    /// The pool map key for this descriptor.
    pub fn session_key(&self) -> SessionKey {
        SessionKey {
            mailbox: self.mailbox.clone(),
            pairing_phrase: self.pairing_phrase.clone(),
        }
    }
}

/// Uniquely identifies a session inside the pool.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    mailbox: String,
    pairing_phrase: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_field_names_are_pascal_case() {
        let descriptor = NodeDescriptor::new("wss://relay.example", "a b c d");
        let json = serde_json::to_value(&descriptor).unwrap();
        assert!(json.get("Mailbox").is_some());
        assert!(json.get("PairingPhrase").is_some());
        assert!(json.get("LocalKey").is_some());
        assert!(json.get("RemoteKey").is_some());
        assert!(json.get("Status").is_some());
    }

    #[test]
    fn missing_key_fields_default_to_empty() {
        let descriptor: NodeDescriptor = serde_json::from_str(
            r#"{"Mailbox":"wss://relay.example","PairingPhrase":"a b c d"}"#,
        )
        .unwrap();
        assert!(descriptor.local_key.is_empty());
        assert!(descriptor.remote_key.is_empty());
    }

    #[test]
    fn same_identity_yields_same_session_key() {
        let a = NodeDescriptor::new("wss://relay.example", "a b c d");
        let mut b = NodeDescriptor::new("wss://relay.example", "a b c d");
        b.local_key = "deadbeef".into();
        assert_eq!(a.session_key(), b.session_key());

        let other = NodeDescriptor::new("wss://relay.example", "e f g h");
        assert_ne!(a.session_key(), other.session_key());
    }
}
